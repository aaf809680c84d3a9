//! Engine manifest: format version and slot geometry of an instance.

use super::compression::CompressionAlgorithm;
use super::error::{SlabError, SlabResult};
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::{ErrorKind, Write};
use std::path::Path;
use tracing::debug;

pub const FORMAT_VERSION: u32 = 1;
const MANIFEST_FILE: &str = "MANIFEST";

/// Settings fixed at creation time. Slot indices in the metadata log are
/// only meaningful under the geometry that produced them, so an existing
/// manifest always wins over the options passed to `open`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Manifest {
    pub format_version: u32,
    pub min_slot_size: usize,
    pub max_slot_size: usize,
    pub compression: CompressionAlgorithm,
}

impl Manifest {
    pub fn new(
        min_slot_size: usize,
        max_slot_size: usize,
        compression: CompressionAlgorithm,
    ) -> Self {
        Self {
            format_version: FORMAT_VERSION,
            min_slot_size,
            max_slot_size,
            compression,
        }
    }

    /// Read the manifest under `dir`, or persist `initial` if there is none.
    pub fn load_or_init(dir: &Path, initial: Manifest) -> SlabResult<Manifest> {
        let path = dir.join(MANIFEST_FILE);
        match std::fs::read(&path) {
            Ok(bytes) => {
                let manifest: Manifest = serde_json::from_slice(&bytes)
                    .map_err(|e| SlabError::Corrupt(format!("unreadable manifest: {}", e)))?;
                if manifest.format_version != FORMAT_VERSION {
                    return Err(SlabError::VersionMismatch {
                        found: manifest.format_version,
                        expected: FORMAT_VERSION,
                    });
                }
                if manifest.min_slot_size == 0 || manifest.max_slot_size < manifest.min_slot_size
                {
                    return Err(SlabError::Corrupt(format!(
                        "manifest slot geometry {}..{} is invalid",
                        manifest.min_slot_size, manifest.max_slot_size
                    )));
                }
                if manifest != initial {
                    debug!(stored = ?manifest, requested = ?initial, "Using stored engine settings");
                }
                Ok(manifest)
            }
            Err(e) if e.kind() == ErrorKind::NotFound => {
                let bytes = serde_json::to_vec_pretty(&initial)
                    .map_err(|e| SlabError::Corrupt(format!("failed to encode manifest: {}", e)))?;
                let temp = path.with_extension("tmp");
                let mut file = File::create(&temp)
                    .map_err(|e| SlabError::io("failed to create manifest", e))?;
                file.write_all(&bytes)
                    .and_then(|_| file.sync_all())
                    .map_err(|e| SlabError::io("failed to write manifest", e))?;
                std::fs::rename(&temp, &path)
                    .map_err(|e| SlabError::io("failed to install manifest", e))?;
                Ok(initial)
            }
            Err(e) => Err(SlabError::io("failed to read manifest", e)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_stored_manifest_wins() -> SlabResult<()> {
        let dir = TempDir::new().unwrap();
        let first = Manifest::new(64, 4096, CompressionAlgorithm::None);
        Manifest::load_or_init(dir.path(), first.clone())?;

        let again = Manifest::load_or_init(
            dir.path(),
            Manifest::new(128, 65536, CompressionAlgorithm::Zstd),
        )?;
        assert_eq!(again, first);
        Ok(())
    }

    #[test]
    fn test_version_mismatch() {
        let dir = TempDir::new().unwrap();
        let mut future = Manifest::new(64, 4096, CompressionAlgorithm::Zstd);
        future.format_version = 99;
        std::fs::write(
            dir.path().join(MANIFEST_FILE),
            serde_json::to_vec(&future).unwrap(),
        )
        .unwrap();

        let err = Manifest::load_or_init(dir.path(), Manifest::new(64, 4096, CompressionAlgorithm::Zstd))
            .unwrap_err();
        assert!(matches!(err, SlabError::VersionMismatch { found: 99, expected: 1 }));
    }

    #[test]
    fn test_garbage_manifest_is_corrupt() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join(MANIFEST_FILE), b"\x00\x01garbage").unwrap();

        let err = Manifest::load_or_init(dir.path(), Manifest::new(64, 4096, CompressionAlgorithm::Zstd))
            .unwrap_err();
        assert!(matches!(err, SlabError::Corrupt(_)));
    }
}
