//! Error types for the slab engine.

use std::io;
use std::path::PathBuf;

use thiserror::Error;

use super::allocator::SlotId;

/// Result type for slab engine operations.
pub type SlabResult<T> = std::result::Result<T, SlabError>;

/// Errors raised by a slab storage instance.
#[derive(Debug, Error)]
pub enum SlabError {
    /// Underlying filesystem failure, with what was being attempted.
    #[error("{context}: {source}")]
    Io {
        context: String,
        #[source]
        source: io::Error,
    },

    /// Another handle (in this or another process) holds the directory lock.
    #[error("storage directory {} is locked by another handle", path.display())]
    Locked { path: PathBuf },

    /// The on-disk manifest was written by an incompatible engine.
    #[error("unsupported engine format version {found} (expected {expected})")]
    VersionMismatch { found: u32, expected: u32 },

    /// On-disk state that cannot be interpreted.
    #[error("corrupt storage: {0}")]
    Corrupt(String),

    #[error("value of {size} bytes exceeds the largest slot ({max} bytes)")]
    ValueTooLarge { size: usize, max: usize },

    #[error("invalid slot {0}")]
    InvalidSlot(SlotId),
}

impl SlabError {
    pub(crate) fn io(context: impl Into<String>, source: io::Error) -> Self {
        SlabError::Io {
            context: context.into(),
            source,
        }
    }
}
