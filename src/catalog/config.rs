//! The database config record: which tables exist and which indexes each has.
//!
//! Stored as JSON at `<root>/config.dat`. Rewrites go through
//! `config.dat.tmp` and a rename, so a crash leaves either the previous or
//! the new record, never a mix.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fs::{self, File};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use tracing::debug;

use crate::error::{Error, ErrorKind, Result};
use crate::metrics;
use crate::name::Name;

pub const CONFIG_FILE: &str = "config.dat";
const TMP_SUFFIX: &str = "tmp";

/// Record layout version written by this crate.
pub const CONFIG_VERSION: u32 = 1;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexConfig {
    pub name: Name,
}

impl IndexConfig {
    pub fn new(name: Name) -> Self {
        Self { name }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableConfig {
    pub name: Name,
    /// In creation order
    #[serde(default)]
    pub indexes: Vec<IndexConfig>,
}

impl TableConfig {
    pub fn new(name: Name) -> Self {
        Self {
            name,
            indexes: Vec::new(),
        }
    }

    pub fn index(&self, name: &str) -> Option<&IndexConfig> {
        self.indexes.iter().find(|i| i.name.as_str() == name)
    }
}

/// Authoritative list of tables and their indexes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DatabaseConfig {
    pub version: u32,
    /// In creation order
    #[serde(default)]
    pub tables: Vec<TableConfig>,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            version: CONFIG_VERSION,
            tables: Vec::new(),
        }
    }
}

impl DatabaseConfig {
    pub fn table(&self, name: &str) -> Option<&TableConfig> {
        self.tables.iter().find(|t| t.name.as_str() == name)
    }

    pub fn table_mut(&mut self, name: &str) -> Option<&mut TableConfig> {
        self.tables.iter_mut().find(|t| t.name.as_str() == name)
    }

    pub fn index_count(&self) -> usize {
        self.tables.iter().map(|t| t.indexes.len()).sum()
    }

    /// Check invariants a decoded record must satisfy.
    fn validate(&self) -> std::result::Result<(), String> {
        if self.version != CONFIG_VERSION {
            return Err(format!(
                "unsupported config version {} (expected {})",
                self.version, CONFIG_VERSION
            ));
        }

        let mut tables = HashSet::new();
        for table in &self.tables {
            if !tables.insert(&table.name) {
                return Err(format!("table {:?} listed twice", table.name.as_str()));
            }
            let mut indexes = HashSet::new();
            for index in &table.indexes {
                if !indexes.insert(&index.name) {
                    return Err(format!(
                        "index {:?} listed twice in table {:?}",
                        index.name.as_str(),
                        table.name.as_str()
                    ));
                }
            }
        }
        Ok(())
    }
}

pub fn config_path(root: &Path) -> PathBuf {
    root.join(CONFIG_FILE)
}

fn tmp_path(root: &Path) -> PathBuf {
    root.join(format!("{}.{}", CONFIG_FILE, TMP_SUFFIX))
}

/// Read the record under `root`.
///
/// A missing file is [`ErrorKind::ConfigMissing`]; anything that exists but
/// cannot be read, decoded or validated is [`ErrorKind::ConfigCorrupt`].
pub fn load(root: &Path) -> Result<DatabaseConfig> {
    let path = config_path(root);
    let bytes = match fs::read(&path) {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == io::ErrorKind::NotFound => {
            return Err(Error::new(ErrorKind::ConfigMissing, "load config")
                .with_message(path.display().to_string())
                .with_source(e));
        }
        Err(e) => {
            return Err(Error::new(ErrorKind::ConfigCorrupt, "load config")
                .with_message(path.display().to_string())
                .with_source(e));
        }
    };

    let config: DatabaseConfig = serde_json::from_slice(&bytes).map_err(|e| {
        Error::new(ErrorKind::ConfigCorrupt, "load config")
            .with_message(path.display().to_string())
            .with_source(e)
    })?;
    config.validate().map_err(|msg| {
        Error::new(ErrorKind::ConfigCorrupt, "load config").with_message(msg)
    })?;

    debug!(
        tables = config.tables.len(),
        indexes = config.index_count(),
        "Loaded config"
    );
    Ok(config)
}

/// Durably replace the record under `root` with `config`.
pub fn store(root: &Path, config: &DatabaseConfig) -> Result<()> {
    let result = write_atomic(root, config);
    metrics::record_config_write(result.is_ok());
    result.map_err(|e| Error::new(ErrorKind::ConfigWrite, "store config").with_source(e))
}

fn write_atomic(root: &Path, config: &DatabaseConfig) -> io::Result<()> {
    let bytes = serde_json::to_vec_pretty(config)?;
    let tmp = tmp_path(root);

    {
        let mut file = File::create(&tmp)?;
        file.write_all(&bytes)?;
        file.sync_all()?;
    }
    fs::rename(&tmp, config_path(root))?;
    sync_dir(root)?;

    debug!(bytes = bytes.len(), "Stored config");
    Ok(())
}

#[cfg(unix)]
fn sync_dir(dir: &Path) -> io::Result<()> {
    File::open(dir)?.sync_all()
}

#[cfg(not(unix))]
fn sync_dir(_dir: &Path) -> io::Result<()> {
    Ok(())
}
