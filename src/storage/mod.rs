//! Storage layer
//!
//! Every table and every index owns one independent [`StorageInstance`]: a
//! slab engine rooted at its own directory, with its own lock, manifest,
//! metadata log and cache.
//!
//! ```text
//! <dir>/
//!   LOCK                  exclusive while open
//!   MANIFEST              slot sizes, compression, format version
//!   metadata.log          key → slot batches
//!   <value_dir>/slab_*.bin
//! ```

pub mod slab;

pub use slab::{
    CacheStats, CompressionAlgorithm, SlabError, SlabResult, SlabStorage, StorageOptions,
    StorageStats,
};

/// The storage engine backing tables and indexes.
pub type StorageInstance = SlabStorage;
