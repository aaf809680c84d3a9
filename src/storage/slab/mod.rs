//! Slab storage engine
//!
//! Inspired by Sled's heap allocator design. Values live in fixed-size slots
//! grouped into size classes, one file per class; an append-only metadata
//! log maps keys to slots.
//!
//! ```text
//! SlabAllocator
//!   ├─→ SizeClass(64B)   → Free: [3, 7, 12]
//!   ├─→ SizeClass(77B)   → Free: [1, 4]
//!   └─→ SizeClass(93B)   → Free: []
//!
//! MetadataStore (ordered, append-only, fsynced batches)
//!   └─→ key1 → SlotId(class=3, offset=128)
//!   └─→ key2 → ∅ (tombstone)
//! ```

pub mod allocator;
pub mod cache;
pub mod compression;
pub mod error;
pub mod lock;
pub mod manifest;
pub mod metadata;
pub mod size_class;
pub mod storage;

pub use allocator::{SlabAllocator, SlotId};
pub use cache::{CacheStats, SlabCache};
pub use compression::CompressionAlgorithm;
pub use error::{SlabError, SlabResult};
pub use metadata::MetadataStore;
pub use storage::{SlabStorage, StorageOptions, StorageStats};
