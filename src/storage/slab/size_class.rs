//! Size class bookkeeping for the slab allocator

use std::cmp::Reverse;
use std::collections::{BTreeSet, BinaryHeap};

/// Slots of one fixed size, backed by a single slab file.
///
/// Free slots are kept in a min-heap so the lowest offsets are reused first,
/// which keeps slab files dense after deletes.
#[derive(Debug)]
pub struct SizeClass {
    /// Size of slots in this class (bytes)
    pub slot_size: usize,
    /// Position of this class in the allocator
    pub index: u16,
    free_slots: BinaryHeap<Reverse<u64>>,
    /// High-water mark: offset handed out when the free list is empty
    next_offset: u64,
}

impl SizeClass {
    pub fn new(index: u16, slot_size: usize) -> Self {
        Self {
            slot_size,
            index,
            free_slots: BinaryHeap::new(),
            next_offset: 0,
        }
    }

    /// Rebuild the free list and high-water mark after a reopen.
    ///
    /// `file_len` is the current length of the backing slab file and `live`
    /// the offsets still referenced by the metadata log. Every slot below the
    /// high-water mark that is not live becomes free.
    pub fn restore(&mut self, file_len: u64, live: &BTreeSet<u64>) {
        let slot = self.slot_size as u64;
        let mut high = file_len.div_ceil(slot) * slot;
        if let Some(&last) = live.iter().next_back() {
            high = high.max(last + slot);
        }

        self.free_slots.clear();
        let mut offset = 0;
        while offset < high {
            if !live.contains(&offset) {
                self.free_slots.push(Reverse(offset));
            }
            offset += slot;
        }
        self.next_offset = high;
    }

    /// Allocate a slot, returning its offset in the slab file.
    pub fn allocate(&mut self) -> u64 {
        if let Some(Reverse(offset)) = self.free_slots.pop() {
            return offset;
        }

        let offset = self.next_offset;
        self.next_offset += self.slot_size as u64;
        offset
    }

    pub fn free(&mut self, offset: u64) {
        self.free_slots.push(Reverse(offset));
    }

    pub fn free_count(&self) -> usize {
        self.free_slots.len()
    }

    /// Slots ever handed out, free ones included.
    pub fn total_slots(&self) -> u64 {
        self.next_offset / self.slot_size as u64
    }

    pub fn can_fit(&self, size: usize) -> bool {
        size <= self.slot_size
    }
}

/// Size classes growing by ~20% from `min_size` up to `max_size`.
pub fn calculate_size_classes(min_size: usize, max_size: usize) -> Vec<usize> {
    let mut classes = Vec::new();
    let mut current = min_size.max(8);

    while current <= max_size {
        classes.push(current);
        current = (current as f64 * 1.2).ceil() as usize;
    }

    classes
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_size_class_allocation() {
        let mut sc = SizeClass::new(0, 64);

        assert_eq!(sc.allocate(), 0);
        assert_eq!(sc.allocate(), 64);
        assert_eq!(sc.allocate(), 128);

        assert_eq!(sc.total_slots(), 3);
        assert_eq!(sc.free_count(), 0);
    }

    #[test]
    fn test_size_class_reuse_lowest_first() {
        let mut sc = SizeClass::new(0, 64);

        let a = sc.allocate();
        let b = sc.allocate();
        let _c = sc.allocate();

        sc.free(b);
        sc.free(a);
        assert_eq!(sc.free_count(), 2);

        assert_eq!(sc.allocate(), 0);
        assert_eq!(sc.allocate(), 64);
        assert_eq!(sc.allocate(), 192);
    }

    #[test]
    fn test_restore_rebuilds_free_list() {
        let mut sc = SizeClass::new(0, 64);
        let live: BTreeSet<u64> = [0, 128].into_iter().collect();

        // 3 full slots plus a torn partial write at the end
        sc.restore(64 * 3 + 10, &live);

        assert_eq!(sc.total_slots(), 4);
        assert_eq!(sc.free_count(), 2);
        assert_eq!(sc.allocate(), 64);
        assert_eq!(sc.allocate(), 192);
        assert_eq!(sc.allocate(), 256);
    }

    #[test]
    fn test_restore_with_live_slot_past_file_end() {
        let mut sc = SizeClass::new(0, 64);
        let live: BTreeSet<u64> = [256].into_iter().collect();

        sc.restore(0, &live);
        assert_eq!(sc.total_slots(), 5);
        assert_eq!(sc.free_count(), 4);
    }

    #[test]
    fn test_calculate_size_classes() {
        let classes = calculate_size_classes(64, 500);

        assert_eq!(classes[0], 64);
        for pair in classes.windows(2) {
            let ratio = pair[1] as f64 / pair[0] as f64;
            assert!((1.15..=1.25).contains(&ratio), "ratio: {}", ratio);
        }
        assert!(classes.iter().all(|&s| s <= 500));
    }

    #[test]
    fn test_can_fit() {
        let sc = SizeClass::new(0, 128);

        assert!(sc.can_fit(128));
        assert!(!sc.can_fit(129));
    }
}
