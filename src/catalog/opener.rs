//! Storage-instance opener: logical namespace → directory → open instance.
//!
//! ```text
//! <root>/<hex(table)>/data/                  table documents
//! <root>/<hex(table)>/<hex(index)>/data/     one index
//! ```
//!
//! Encoded names only use `[0-9a-f]`, so an index directory can never be
//! mistaken for a table's `data` directory.

use serde::{Deserialize, Serialize};
use std::fs::DirBuilder;
use std::io;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

use crate::error::{Entity, Error, ErrorKind, Result};
use crate::metrics;
use crate::name::Name;
use crate::storage::{CompressionAlgorithm, StorageInstance, StorageOptions};

/// Final path component separating engine files from sibling namespaces.
pub const DATA_DIR: &str = "data";

/// Engine settings applied to every storage instance a database opens.
///
/// Only used when an instance is first created; an existing instance keeps
/// the settings recorded in its own manifest.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseOptions {
    /// Smallest slot size in bytes
    pub min_slot_size: usize,
    /// Largest slot size in bytes; bounds the size of a single stored value
    pub max_slot_size: usize,
    pub compression: CompressionAlgorithm,
    /// Cached values per instance
    pub cache_capacity: usize,
}

impl Default for DatabaseOptions {
    fn default() -> Self {
        Self {
            min_slot_size: 64,
            max_slot_size: 64 * 1024,
            compression: CompressionAlgorithm::Zstd,
            cache_capacity: 1000,
        }
    }
}

/// Whether opening may create the instance directory.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpenMode {
    /// Structural mutation: create the directory if it is absent.
    Create,
    /// Bootstrap: the config says it exists, so absence is an error.
    Existing,
}

/// Creates a directory and its parents, owner-only on Unix.
pub fn ensure_dir(path: &Path) -> io::Result<()> {
    let mut builder = DirBuilder::new();
    builder.recursive(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::DirBuilderExt;
        builder.mode(0o700);
    }
    builder.create(path)
}

/// Opens storage instances under one database root.
#[derive(Debug, Clone)]
pub struct Opener {
    root: PathBuf,
    options: DatabaseOptions,
}

impl Opener {
    pub fn new(root: impl Into<PathBuf>, options: DatabaseOptions) -> Self {
        Self {
            root: root.into(),
            options,
        }
    }

    pub fn options(&self) -> &DatabaseOptions {
        &self.options
    }

    /// `<root>/<hex(seg0)>/<hex(seg1)>...`
    pub fn namespace_dir(&self, segments: &[&Name]) -> PathBuf {
        let mut dir = self.root.clone();
        for segment in segments {
            dir.push(segment.encode());
        }
        dir
    }

    /// Directory handed to the engine for `segments`.
    pub fn instance_dir(&self, segments: &[&Name]) -> PathBuf {
        self.namespace_dir(segments).join(DATA_DIR)
    }

    /// Open the instance for `segments`, reporting failures against `entity`.
    pub fn open(
        &self,
        segments: &[&Name],
        mode: OpenMode,
        entity: &Entity,
        phase: &'static str,
    ) -> Result<StorageInstance> {
        let kind = if segments.len() > 1 { "index" } else { "table" };
        let result = self.open_inner(segments, mode, entity, phase);
        metrics::record_storage_open(kind, result.is_ok());
        result
    }

    fn open_inner(
        &self,
        segments: &[&Name],
        mode: OpenMode,
        entity: &Entity,
        phase: &'static str,
    ) -> Result<StorageInstance> {
        let dir = self.instance_dir(segments);

        match mode {
            OpenMode::Create => ensure_dir(&dir).map_err(|e| {
                Error::new(ErrorKind::DirectoryCreate, phase)
                    .for_entity(entity.clone())
                    .with_message(dir.display().to_string())
                    .with_source(e)
            })?,
            OpenMode::Existing => {
                if !dir.is_dir() {
                    return Err(Error::new(ErrorKind::StorageMissing, phase)
                        .for_entity(entity.clone())
                        .with_message(dir.display().to_string()));
                }
            }
        }

        let options = StorageOptions::new(&dir)
            .slot_sizes(self.options.min_slot_size, self.options.max_slot_size)
            .compression(self.options.compression)
            .cache_capacity(self.options.cache_capacity);

        let instance = StorageInstance::open(&options).map_err(|e| {
            Error::new(ErrorKind::EngineOpen, phase)
                .for_entity(entity.clone())
                .with_source(e)
        })?;
        debug!(dir = ?dir, "Opened storage instance");
        Ok(instance)
    }

    /// Remove whatever is left at the namespace of `segments`.
    ///
    /// Only called for names the config does not reference, i.e. directories
    /// orphaned by an interrupted drop or a failed create.
    pub fn purge(&self, segments: &[&Name], entity: &Entity, phase: &'static str) -> Result<()> {
        let dir = self.namespace_dir(segments);
        if !dir.is_dir() {
            return Ok(());
        }

        warn!(dir = ?dir, "Removing leftover storage directory");
        std::fs::remove_dir_all(&dir).map_err(|e| {
            Error::new(ErrorKind::DirectoryCreate, phase)
                .for_entity(entity.clone())
                .with_message(format!("cannot remove leftover {}", dir.display()))
                .with_source(e)
        })
    }

    /// Best-effort removal after the config stopped referencing `segments`.
    pub fn discard(&self, segments: &[&Name]) {
        let dir = self.namespace_dir(segments);
        if let Err(e) = std::fs::remove_dir_all(&dir) {
            if e.kind() != io::ErrorKind::NotFound {
                warn!(dir = ?dir, error = %e, "Failed to remove storage directory");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn name(s: &str) -> Name {
        Name::new(s).unwrap()
    }

    #[test]
    fn test_layout_nests_index_under_table() {
        let opener = Opener::new("/db", DatabaseOptions::default());
        let (users, email) = (name("users"), name("email"));

        assert_eq!(
            opener.instance_dir(&[&users]),
            Path::new("/db/7573657273/data")
        );
        assert_eq!(
            opener.instance_dir(&[&users, &email]),
            Path::new("/db/7573657273/656d61696c/data")
        );
    }

    #[test]
    fn test_create_mode_makes_directory() -> Result<()> {
        let root = TempDir::new().unwrap();
        let opener = Opener::new(root.path(), DatabaseOptions::default());
        let users = name("users");

        let instance = opener.open(&[&users], OpenMode::Create, &Entity::Table(users.clone()), "test")?;
        instance.set(b"k", b"v").unwrap();
        assert!(root.path().join("7573657273").join(DATA_DIR).is_dir());

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let mode = std::fs::metadata(root.path().join("7573657273"))
                .unwrap()
                .permissions()
                .mode();
            assert_eq!(mode & 0o077, 0);
        }
        Ok(())
    }

    #[test]
    fn test_existing_mode_fails_closed() {
        let root = TempDir::new().unwrap();
        let opener = Opener::new(root.path(), DatabaseOptions::default());
        let users = name("users");

        let err = opener
            .open(&[&users], OpenMode::Existing, &Entity::Table(users.clone()), "bootstrap")
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::StorageMissing);
        assert_eq!(err.entity(), Some(&Entity::Table(users)));
        assert!(!root.path().join("7573657273").exists());
    }

    #[test]
    fn test_directory_create_error() {
        let root = TempDir::new().unwrap();
        let users = name("users");
        // A regular file where the table directory should go
        std::fs::write(root.path().join(users.encode()), b"").unwrap();

        let opener = Opener::new(root.path(), DatabaseOptions::default());
        let err = opener
            .open(&[&users], OpenMode::Create, &Entity::Table(users.clone()), "create table")
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::DirectoryCreate);
        assert_eq!(err.phase(), "create table");
    }

    #[test]
    fn test_engine_open_error_when_locked() -> Result<()> {
        let root = TempDir::new().unwrap();
        let opener = Opener::new(root.path(), DatabaseOptions::default());
        let users = name("users");
        let entity = Entity::Table(users.clone());

        let _held = opener.open(&[&users], OpenMode::Create, &entity, "test")?;
        let err = opener
            .open(&[&users], OpenMode::Existing, &entity, "test")
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::EngineOpen);
        Ok(())
    }

    #[test]
    fn test_purge_removes_leftovers_only() -> Result<()> {
        let root = TempDir::new().unwrap();
        let opener = Opener::new(root.path(), DatabaseOptions::default());
        let users = name("users");
        let entity = Entity::Table(users.clone());

        opener.purge(&[&users], &entity, "test")?;

        ensure_dir(&opener.instance_dir(&[&users])).unwrap();
        opener.purge(&[&users], &entity, "test")?;
        assert!(!opener.namespace_dir(&[&users]).exists());
        Ok(())
    }
}
