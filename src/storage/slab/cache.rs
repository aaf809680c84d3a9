//! LRU read cache for slab storage

use lru::LruCache;
use parking_lot::Mutex;
use std::num::NonZeroUsize;
use std::sync::atomic::{AtomicU64, Ordering};

const DEFAULT_CAPACITY: NonZeroUsize = match NonZeroUsize::new(1000) {
    Some(n) => n,
    None => unreachable!(),
};

/// Decompressed values keyed by their storage key.
pub struct SlabCache {
    entries: Mutex<LruCache<Vec<u8>, Vec<u8>>>,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl SlabCache {
    /// A zero capacity falls back to the default of 1000 entries.
    pub fn new(capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(DEFAULT_CAPACITY);
        Self {
            entries: Mutex::new(LruCache::new(capacity)),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    pub fn get(&self, key: &[u8]) -> Option<Vec<u8>> {
        let found = self.entries.lock().get(key).cloned();
        match found {
            Some(_) => self.hits.fetch_add(1, Ordering::Relaxed),
            None => self.misses.fetch_add(1, Ordering::Relaxed),
        };
        found
    }

    pub fn put(&self, key: Vec<u8>, value: Vec<u8>) {
        self.entries.lock().put(key, value);
    }

    pub fn remove(&self, key: &[u8]) {
        self.entries.lock().pop(key);
    }

    pub fn clear(&self) {
        self.entries.lock().clear();
    }

    pub fn stats(&self) -> CacheStats {
        let hits = self.hits.load(Ordering::Relaxed);
        let misses = self.misses.load(Ordering::Relaxed);
        let total = hits + misses;
        let entries = self.entries.lock();
        CacheStats {
            hits,
            misses,
            hit_rate: if total > 0 {
                hits as f64 / total as f64
            } else {
                0.0
            },
            size: entries.len(),
            capacity: entries.cap().get(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub hit_rate: f64,
    pub size: usize,
    pub capacity: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cache_hit_and_miss_counting() {
        let cache = SlabCache::new(100);

        assert!(cache.get(b"doc:1").is_none());
        cache.put(b"doc:1".to_vec(), b"{}".to_vec());
        assert_eq!(cache.get(b"doc:1"), Some(b"{}".to_vec()));

        let stats = cache.stats();
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.size, 1);
        assert_eq!(stats.hit_rate, 0.5);
    }

    #[test]
    fn test_cache_eviction() {
        let cache = SlabCache::new(2);

        cache.put(b"key1".to_vec(), b"data1".to_vec());
        cache.put(b"key2".to_vec(), b"data2".to_vec());
        cache.put(b"key3".to_vec(), b"data3".to_vec());

        assert!(cache.get(b"key1").is_none());
        assert!(cache.get(b"key2").is_some());
        assert!(cache.get(b"key3").is_some());
    }

    #[test]
    fn test_cache_remove_and_clear() {
        let cache = SlabCache::new(0);
        assert_eq!(cache.stats().capacity, 1000);

        cache.put(b"key1".to_vec(), b"data1".to_vec());
        cache.put(b"key2".to_vec(), b"data2".to_vec());
        cache.remove(b"key1");
        assert!(cache.get(b"key1").is_none());

        cache.clear();
        assert_eq!(cache.stats().size, 0);
    }
}
