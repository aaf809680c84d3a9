//! Slab storage instance
//!
//! Combines the slab allocator, the metadata log, compression and the read
//! cache into one ordered key-value store rooted at a directory.
//!
//! # On-disk layout
//!
//! ```text
//! <dir>/LOCK            advisory lock held while open
//! <dir>/MANIFEST        format version + slot geometry
//! <dir>/metadata.log    key → slot batches
//! <value_dir>/slab_NNNN_<size>.bin
//! ```

use super::allocator::{SlabAllocator, SlotId};
use super::cache::SlabCache;
use super::compression::{compress, decompress, CompressionAlgorithm};
use super::error::{SlabError, SlabResult};
use super::lock::DirLock;
use super::manifest::Manifest;
use super::metadata::MetadataStore;
use parking_lot::RwLock;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// How to open a slab storage instance.
#[derive(Debug, Clone)]
pub struct StorageOptions {
    /// Directory holding the lock, manifest and metadata log
    pub dir: PathBuf,
    /// Directory holding the slab files
    pub value_dir: PathBuf,
    pub min_slot_size: usize,
    pub max_slot_size: usize,
    pub compression: CompressionAlgorithm,
    pub cache_capacity: usize,
}

impl StorageOptions {
    /// Defaults rooted at `dir` for both metadata and values.
    pub fn new<P: Into<PathBuf>>(dir: P) -> Self {
        let dir = dir.into();
        Self {
            value_dir: dir.clone(),
            dir,
            min_slot_size: 64,
            max_slot_size: 64 * 1024,
            compression: CompressionAlgorithm::Zstd,
            cache_capacity: 1000,
        }
    }

    pub fn value_dir<P: Into<PathBuf>>(mut self, value_dir: P) -> Self {
        self.value_dir = value_dir.into();
        self
    }

    pub fn slot_sizes(mut self, min: usize, max: usize) -> Self {
        self.min_slot_size = min;
        self.max_slot_size = max;
        self
    }

    pub fn compression(mut self, compression: CompressionAlgorithm) -> Self {
        self.compression = compression;
        self
    }

    pub fn cache_capacity(mut self, capacity: usize) -> Self {
        self.cache_capacity = capacity;
        self
    }
}

/// One open key-value store. Safe to share across threads: reads run
/// concurrently, mutations serialize on an internal lock.
pub struct SlabStorage {
    dir: PathBuf,
    allocator: SlabAllocator,
    metadata: MetadataStore,
    cache: SlabCache,
    compression: CompressionAlgorithm,
    /// Shared by reads, exclusive for mutations, so a slot is never
    /// reused while a reader is still on it.
    slot_lock: RwLock<()>,
    // Declared last so the lock outlives everything else on drop.
    _lock: DirLock,
}

impl std::fmt::Debug for SlabStorage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SlabStorage")
            .field("dir", &self.dir)
            .field("keys", &self.metadata.len())
            .finish()
    }
}

impl SlabStorage {
    /// Open (or create) the instance described by `options`.
    pub fn open(options: &StorageOptions) -> SlabResult<Self> {
        for dir in [&options.dir, &options.value_dir] {
            std::fs::create_dir_all(dir)
                .map_err(|e| SlabError::io(format!("failed to create {}", dir.display()), e))?;
        }

        let lock = DirLock::acquire(&options.dir)?;
        let manifest = Manifest::load_or_init(
            &options.dir,
            Manifest::new(
                options.min_slot_size,
                options.max_slot_size,
                options.compression,
            ),
        )?;
        let metadata = MetadataStore::open(&options.dir)?;
        let allocator = SlabAllocator::open(
            &options.value_dir,
            manifest.min_slot_size,
            manifest.max_slot_size,
        )?;
        allocator.restore(metadata.live_slots())?;

        info!(
            dir = ?options.dir,
            keys = metadata.len(),
            compression = ?manifest.compression,
            "Opened slab storage"
        );

        Ok(Self {
            dir: options.dir.clone(),
            allocator,
            metadata,
            cache: SlabCache::new(options.cache_capacity),
            compression: manifest.compression,
            slot_lock: RwLock::new(()),
            _lock: lock,
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn get(&self, key: &[u8]) -> SlabResult<Option<Vec<u8>>> {
        if let Some(cached) = self.cache.get(key) {
            return Ok(Some(cached));
        }

        let _guard = self.slot_lock.read();
        let slot = match self.metadata.get(key) {
            Some(slot) => slot,
            None => return Ok(None),
        };
        let value = self.read_slot(slot)?;
        self.cache.put(key.to_vec(), value.clone());
        Ok(Some(value))
    }

    /// Insert or replace `key`.
    ///
    /// The new payload is written and synced before the metadata batch that
    /// points at it; the old slot is only freed afterwards.
    pub fn set(&self, key: &[u8], value: &[u8]) -> SlabResult<()> {
        let compressed = compress(value, self.compression)?;

        let _guard = self.slot_lock.write();
        let slot = self.allocator.allocate(compressed.len())?;
        if let Err(e) = self.allocator.write(slot, &compressed) {
            self.allocator.free(slot)?;
            return Err(e);
        }

        let previous = self.metadata.get(key);
        if let Err(e) = self.metadata.write_batch(vec![(key.to_vec(), Some(slot))]) {
            self.allocator.free(slot)?;
            return Err(e);
        }
        if let Some(old) = previous {
            self.allocator.free(old)?;
        }
        self.cache.remove(key);

        debug!(
            key_len = key.len(),
            value_len = value.len(),
            stored_len = compressed.len(),
            "Set key"
        );
        Ok(())
    }

    /// Remove `key`, returning whether it existed.
    pub fn delete(&self, key: &[u8]) -> SlabResult<bool> {
        let _guard = self.slot_lock.write();
        let slot = match self.metadata.get(key) {
            Some(slot) => slot,
            None => return Ok(false),
        };

        self.metadata.remove(key)?;
        self.allocator.free(slot)?;
        self.cache.remove(key);

        debug!(key_len = key.len(), "Deleted key");
        Ok(true)
    }

    pub fn contains_key(&self, key: &[u8]) -> bool {
        self.metadata.get(key).is_some()
    }

    /// All keys in ascending byte order.
    pub fn keys(&self) -> Vec<Vec<u8>> {
        self.metadata.keys()
    }

    /// Up to `limit` entries with key `>= start`, ascending.
    pub fn scan(&self, start: &[u8], limit: usize) -> SlabResult<Vec<(Vec<u8>, Vec<u8>)>> {
        let _guard = self.slot_lock.read();
        self.metadata
            .range_from(start, limit)
            .into_iter()
            .map(|(key, slot)| Ok((key, self.read_slot(slot)?)))
            .collect()
    }

    /// Every entry whose key starts with `prefix`, ascending.
    pub fn scan_prefix(&self, prefix: &[u8]) -> SlabResult<Vec<(Vec<u8>, Vec<u8>)>> {
        let _guard = self.slot_lock.read();
        self.metadata
            .range_from(prefix, usize::MAX)
            .into_iter()
            .take_while(|(key, _)| key.starts_with(prefix))
            .map(|(key, slot)| Ok((key, self.read_slot(slot)?)))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.metadata.len()
    }

    pub fn is_empty(&self) -> bool {
        self.metadata.is_empty()
    }

    /// Sync slab files. The metadata log is synced on every write already.
    pub fn flush(&self) -> SlabResult<()> {
        self.allocator.flush()
    }

    pub fn compact_metadata(&self) -> SlabResult<()> {
        let _guard = self.slot_lock.write();
        self.metadata.compact()
    }

    pub fn stats(&self) -> StorageStats {
        let slab = self.allocator.stats();
        let cache = self.cache.stats();
        StorageStats {
            key_count: self.len(),
            total_allocated: slab.total_allocated,
            size_classes: slab.size_classes.len(),
            cache_hits: cache.hits,
            cache_misses: cache.misses,
            cache_hit_rate: cache.hit_rate,
        }
    }

    fn read_slot(&self, slot: SlotId) -> SlabResult<Vec<u8>> {
        let stored = self.allocator.read(slot)?;
        decompress(&stored, self.compression)
    }
}

#[derive(Debug, Clone)]
pub struct StorageStats {
    pub key_count: usize,
    pub total_allocated: u64,
    pub size_classes: usize,
    pub cache_hits: u64,
    pub cache_misses: u64,
    pub cache_hit_rate: f64,
}
