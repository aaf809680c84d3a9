//! Slab allocator: one file per size class, fixed-size slots inside each.

use super::error::{SlabError, SlabResult};
use super::size_class::{calculate_size_classes, SizeClass};
use parking_lot::Mutex;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Length prefix stored in front of every slot payload.
const LEN_PREFIX: usize = 4;

/// Address of a slot: its size class and byte offset in that class's file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct SlotId {
    pub size_class: u16,
    pub offset: u64,
}

impl SlotId {
    pub fn new(size_class: u16, offset: u64) -> Self {
        Self { size_class, offset }
    }

    fn class_index(&self) -> usize {
        self.size_class as usize
    }
}

impl fmt::Display for SlotId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.size_class, self.offset)
    }
}

/// One size class together with the file that backs it.
struct ClassFile {
    class: Mutex<SizeClass>,
    file: Mutex<File>,
}

/// Slab allocator for on-disk storage
///
/// Slot payloads are written as `[u32 little-endian length][bytes]`, so a
/// slot holds at most `slot_size - 4` bytes.
pub struct SlabAllocator {
    dir: PathBuf,
    classes: Vec<ClassFile>,
}

impl SlabAllocator {
    /// Open (or create) the slab files under `dir`.
    pub fn open<P: AsRef<Path>>(dir: P, min_size: usize, max_size: usize) -> SlabResult<Self> {
        let dir = dir.as_ref().to_path_buf();
        std::fs::create_dir_all(&dir)
            .map_err(|e| SlabError::io("failed to create slab directory", e))?;

        let sizes = calculate_size_classes(min_size, max_size);
        if sizes.is_empty() {
            return Err(SlabError::Corrupt(format!(
                "no size classes between {} and {} bytes",
                min_size, max_size
            )));
        }
        info!(dir = ?dir, classes = sizes.len(), "Opening slab allocator");

        let mut classes = Vec::with_capacity(sizes.len());
        for (index, &size) in sizes.iter().enumerate() {
            let path = dir.join(format!("slab_{:04}_{}.bin", index, size));
            let file = OpenOptions::new()
                .read(true)
                .write(true)
                .create(true)
                .truncate(false)
                .open(&path)
                .map_err(|e| SlabError::io(format!("failed to open {}", path.display()), e))?;

            classes.push(ClassFile {
                class: Mutex::new(SizeClass::new(index as u16, size)),
                file: Mutex::new(file),
            });
        }

        Ok(Self { dir, classes })
    }

    /// Rebuild free lists from the slots the metadata log still references.
    pub fn restore(&self, live: impl IntoIterator<Item = SlotId>) -> SlabResult<()> {
        let mut per_class = vec![BTreeSet::new(); self.classes.len()];
        for slot in live {
            per_class
                .get_mut(slot.class_index())
                .ok_or(SlabError::InvalidSlot(slot))?
                .insert(slot.offset);
        }

        for (entry, live) in self.classes.iter().zip(per_class.iter()) {
            let file_len = entry
                .file
                .lock()
                .metadata()
                .map_err(|e| SlabError::io("failed to stat slab file", e))?
                .len();
            let mut class = entry.class.lock();
            class.restore(file_len, live);
            debug!(
                class = class.index,
                slot_size = class.slot_size,
                live = live.len(),
                free = class.free_count(),
                "Restored size class"
            );
        }
        Ok(())
    }

    /// Largest payload any slot can hold.
    pub fn max_payload(&self) -> usize {
        self.classes
            .last()
            .map(|c| c.class.lock().slot_size - LEN_PREFIX)
            .unwrap_or(0)
    }

    /// Allocate the smallest slot that fits `size` payload bytes.
    pub fn allocate(&self, size: usize) -> SlabResult<SlotId> {
        let needed = size + LEN_PREFIX;
        for entry in &self.classes {
            let mut class = entry.class.lock();
            if class.can_fit(needed) {
                let slot = SlotId::new(class.index, class.allocate());
                debug!(size, slot = %slot, "Allocated slot");
                return Ok(slot);
            }
        }
        Err(SlabError::ValueTooLarge {
            size,
            max: self.max_payload(),
        })
    }

    pub fn free(&self, slot: SlotId) -> SlabResult<()> {
        let entry = self.class(slot)?;
        entry.class.lock().free(slot.offset);
        debug!(slot = %slot, "Freed slot");
        Ok(())
    }

    /// Write `data` into `slot` and sync it, so the metadata log never points
    /// at a payload that did not reach the disk.
    pub fn write(&self, slot: SlotId, data: &[u8]) -> SlabResult<()> {
        let entry = self.class(slot)?;
        let slot_size = entry.class.lock().slot_size;
        if data.len() + LEN_PREFIX > slot_size {
            return Err(SlabError::ValueTooLarge {
                size: data.len(),
                max: slot_size - LEN_PREFIX,
            });
        }

        let mut file = entry.file.lock();
        file.seek(SeekFrom::Start(slot.offset))
            .map_err(|e| SlabError::io("seek failed", e))?;
        file.write_all(&(data.len() as u32).to_le_bytes())
            .map_err(|e| SlabError::io("write failed", e))?;
        file.write_all(data)
            .map_err(|e| SlabError::io("write failed", e))?;
        file.sync_data()
            .map_err(|e| SlabError::io("sync failed", e))?;
        Ok(())
    }

    pub fn read(&self, slot: SlotId) -> SlabResult<Vec<u8>> {
        let entry = self.class(slot)?;
        let slot_size = entry.class.lock().slot_size;

        let mut file = entry.file.lock();
        file.seek(SeekFrom::Start(slot.offset))
            .map_err(|e| SlabError::io("seek failed", e))?;

        let mut len_bytes = [0u8; LEN_PREFIX];
        file.read_exact(&mut len_bytes)
            .map_err(|e| SlabError::io(format!("failed to read slot {}", slot), e))?;
        let len = u32::from_le_bytes(len_bytes) as usize;
        if len + LEN_PREFIX > slot_size {
            return Err(SlabError::Corrupt(format!(
                "slot {} claims {} bytes but holds at most {}",
                slot,
                len,
                slot_size - LEN_PREFIX
            )));
        }

        let mut data = vec![0u8; len];
        file.read_exact(&mut data)
            .map_err(|e| SlabError::io(format!("failed to read slot {}", slot), e))?;
        Ok(data)
    }

    pub fn stats(&self) -> SlabStats {
        let mut stats = SlabStats::default();

        for entry in &self.classes {
            let class = entry.class.lock();
            let allocated = class.total_slots() - class.free_count() as u64;
            stats.size_classes.push(SizeClassStats {
                slot_size: class.slot_size,
                total_slots: class.total_slots(),
                free_slots: class.free_count() as u64,
                allocated_slots: allocated,
            });
            stats.total_allocated += allocated * class.slot_size as u64;
        }

        stats
    }

    /// Sync every slab file to disk.
    pub fn flush(&self) -> SlabResult<()> {
        self.classes.par_iter().try_for_each(|entry| {
            entry
                .file
                .lock()
                .sync_all()
                .map_err(|e| SlabError::io("flush failed", e))
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn class(&self, slot: SlotId) -> SlabResult<&ClassFile> {
        self.classes
            .get(slot.class_index())
            .ok_or(SlabError::InvalidSlot(slot))
    }
}

#[derive(Debug, Default)]
pub struct SlabStats {
    pub size_classes: Vec<SizeClassStats>,
    pub total_allocated: u64,
}

#[derive(Debug, Clone, Copy)]
pub struct SizeClassStats {
    pub slot_size: usize,
    pub total_slots: u64,
    pub free_slots: u64,
    pub allocated_slots: u64,
}
