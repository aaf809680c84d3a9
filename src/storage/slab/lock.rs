//! Exclusive advisory lock on a storage directory.

use super::error::{SlabError, SlabResult};
use std::fs::{File, OpenOptions, TryLockError};
use std::path::{Path, PathBuf};
use tracing::debug;

const LOCK_FILE: &str = "LOCK";

/// Held for the lifetime of an open instance; released on drop.
///
/// The lock is tied to the open file description, so a second open of the
/// same directory fails even from within the same process.
#[derive(Debug)]
pub struct DirLock {
    file: File,
    dir: PathBuf,
}

impl DirLock {
    pub fn acquire(dir: &Path) -> SlabResult<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(dir.join(LOCK_FILE))
            .map_err(|e| SlabError::io("failed to open lock file", e))?;

        match file.try_lock() {
            Ok(()) => {
                debug!(dir = ?dir, "Acquired directory lock");
                Ok(Self {
                    file,
                    dir: dir.to_path_buf(),
                })
            }
            Err(TryLockError::WouldBlock) => Err(SlabError::Locked {
                path: dir.to_path_buf(),
            }),
            Err(TryLockError::Error(e)) => Err(SlabError::io("failed to lock directory", e)),
        }
    }
}

impl Drop for DirLock {
    fn drop(&mut self) {
        if let Err(e) = self.file.unlock() {
            debug!(dir = ?self.dir, error = %e, "Failed to release directory lock");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_second_lock_fails_until_release() {
        let dir = TempDir::new().unwrap();

        let first = DirLock::acquire(dir.path()).unwrap();
        let err = DirLock::acquire(dir.path()).unwrap_err();
        assert!(matches!(err, SlabError::Locked { .. }));

        drop(first);
        assert!(DirLock::acquire(dir.path()).is_ok());
    }
}
