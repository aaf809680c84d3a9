//! Append-only metadata log mapping keys to slots
//!
//! There is no separate WAL: every mutation appends one self-checking batch
//! of `(key, slot)` entries and fsyncs it. A `None` slot is a tombstone.
//!
//! ```text
//! metadata.log:
//! [len][batch 1: {k1→s1, k2→s2}][sum]
//! [len][batch 2: {k1→s4}][sum]        ← k1 updated
//! [len][batch 3: {k2→∅}][sum]         ← k2 deleted
//! ```
//!
//! Recovery replays batches in order (last write wins) and truncates a torn
//! tail left by a crash mid-append.

use super::allocator::SlotId;
use super::error::{SlabError, SlabResult};
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs::{File, OpenOptions};
use std::io::{self, BufReader, Read, Write};
use std::ops::Bound;
use std::path::{Path, PathBuf};
use tracing::{debug, error, info, warn};

const LOG_FILE: &str = "metadata.log";

/// A batch of key→slot updates written atomically.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetadataBatch {
    pub sequence: u64,
    pub mappings: Vec<(Vec<u8>, Option<SlotId>)>,
}

impl MetadataBatch {
    pub fn new(sequence: u64, mappings: Vec<(Vec<u8>, Option<SlotId>)>) -> Self {
        Self { sequence, mappings }
    }

    /// `[u32 len][json][u32 checksum]`
    pub fn to_bytes(&self) -> SlabResult<Vec<u8>> {
        let json = serde_json::to_vec(self)
            .map_err(|e| SlabError::Corrupt(format!("failed to serialize batch: {}", e)))?;

        let mut out = Vec::with_capacity(json.len() + 8);
        out.extend_from_slice(&(json.len() as u32).to_le_bytes());
        out.extend_from_slice(&json);
        out.extend_from_slice(&checksum(&json).to_le_bytes());
        Ok(out)
    }

    pub fn from_bytes(bytes: &[u8]) -> SlabResult<Self> {
        if bytes.len() < 8 {
            return Err(SlabError::Corrupt("batch too short".to_string()));
        }

        let len = u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]) as usize;
        if bytes.len() < len + 8 {
            return Err(SlabError::Corrupt(format!(
                "incomplete batch: expected {} bytes, got {}",
                len + 8,
                bytes.len()
            )));
        }

        let json = &bytes[4..4 + len];
        let stored = u32::from_le_bytes([
            bytes[4 + len],
            bytes[5 + len],
            bytes[6 + len],
            bytes[7 + len],
        ]);
        if stored != checksum(json) {
            return Err(SlabError::Corrupt("batch checksum mismatch".to_string()));
        }

        serde_json::from_slice(json)
            .map_err(|e| SlabError::Corrupt(format!("failed to deserialize batch: {}", e)))
    }
}

fn checksum(bytes: &[u8]) -> u32 {
    bytes
        .iter()
        .fold(0x811c_9dc5u32, |acc, &b| (acc ^ b as u32).wrapping_mul(0x0100_0193))
}

/// Ordered key→slot index backed by the metadata log.
pub struct MetadataStore {
    log_path: PathBuf,
    index: RwLock<BTreeMap<Vec<u8>, SlotId>>,
    /// Held for the whole append
    log: Mutex<LogState>,
}

/// Append side of the log.
struct LogState {
    file: File,
    next_sequence: u64,
    /// Bytes of complete, synced batches; a failed append is cut back to this.
    len: u64,
    /// Set when a failed append could not be rolled back.
    failed: bool,
}

impl MetadataStore {
    /// Open the log under `dir`, replaying it into memory.
    pub fn open<P: AsRef<Path>>(dir: P) -> SlabResult<Self> {
        let log_path = dir.as_ref().join(LOG_FILE);
        let (index, next_sequence) = Self::recover(&log_path)?;

        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&log_path)
            .map_err(|e| SlabError::io("failed to open metadata log", e))?;
        let len = file
            .metadata()
            .map_err(|e| SlabError::io("failed to stat metadata log", e))?
            .len();

        Ok(Self {
            log_path,
            index: RwLock::new(index),
            log: Mutex::new(LogState {
                file,
                next_sequence,
                len,
                failed: false,
            }),
        })
    }

    /// Replay the log. A bad batch that reaches the end of the file is a torn
    /// append and is cut off; one followed by more data is corruption.
    fn recover(log_path: &Path) -> SlabResult<(BTreeMap<Vec<u8>, SlotId>, u64)> {
        let mut index = BTreeMap::new();
        if !log_path.exists() {
            debug!(path = ?log_path, "No metadata log, starting empty");
            return Ok((index, 0));
        }

        let file =
            File::open(log_path).map_err(|e| SlabError::io("failed to open metadata log", e))?;
        let file_len = file
            .metadata()
            .map_err(|e| SlabError::io("failed to stat metadata log", e))?
            .len();
        let mut reader = BufReader::new(file);

        let mut max_sequence = None;
        let mut batches = 0usize;
        let mut valid_len = 0u64;

        loop {
            let mut len_bytes = [0u8; 4];
            if reader.read_exact(&mut len_bytes).is_err() {
                break;
            }
            let len = u32::from_le_bytes(len_bytes) as usize;
            let end = valid_len + len as u64 + 8;
            if end > file_len {
                break;
            }

            let mut bytes = vec![0u8; len + 8];
            bytes[..4].copy_from_slice(&len_bytes);
            if reader.read_exact(&mut bytes[4..]).is_err() {
                break;
            }

            let batch = match MetadataBatch::from_bytes(&bytes) {
                Ok(batch) => batch,
                Err(e) if end >= file_len => {
                    warn!(error = %e, offset = valid_len, "Bad final metadata batch");
                    break;
                }
                Err(e) => {
                    return Err(SlabError::Corrupt(format!(
                        "metadata log {} damaged at offset {} with {} bytes after it: {}",
                        log_path.display(),
                        valid_len,
                        file_len - end,
                        e
                    )));
                }
            };
            for (key, slot) in batch.mappings {
                match slot {
                    Some(slot) => index.insert(key, slot),
                    None => index.remove(&key),
                };
            }
            max_sequence = Some(max_sequence.map_or(batch.sequence, |s: u64| s.max(batch.sequence)));
            batches += 1;
            valid_len = end;
        }

        if valid_len < file_len {
            warn!(
                path = ?log_path,
                valid_len,
                file_len,
                "Truncating torn metadata log tail"
            );
            OpenOptions::new()
                .write(true)
                .open(log_path)
                .and_then(|f| f.set_len(valid_len).and_then(|_| f.sync_all()))
                .map_err(|e| SlabError::io("failed to truncate metadata log", e))?;
        }

        let next_sequence = max_sequence.map_or(0, |s| s + 1);
        info!(batches, keys = index.len(), next_sequence, "Metadata recovery complete");
        Ok((index, next_sequence))
    }

    /// Append one batch durably, then apply it to the in-memory index.
    pub fn write_batch(&self, mappings: Vec<(Vec<u8>, Option<SlotId>)>) -> SlabResult<()> {
        self.write_batch_with(mappings, |file, bytes| file.write_all(bytes))
    }

    fn write_batch_with<F>(&self, mappings: Vec<(Vec<u8>, Option<SlotId>)>, write: F) -> SlabResult<()>
    where
        F: FnOnce(&mut File, &[u8]) -> io::Result<()>,
    {
        if mappings.is_empty() {
            return Ok(());
        }

        let mut log = self.log.lock();
        if log.failed {
            return Err(SlabError::Corrupt(format!(
                "metadata log {} has an unrecoverable partial append",
                self.log_path.display()
            )));
        }

        let batch = MetadataBatch::new(log.next_sequence, mappings);
        let bytes = batch.to_bytes()?;

        let appended = write(&mut log.file, &bytes).and_then(|_| log.file.sync_data());
        if let Err(e) = appended {
            let len = log.len;
            if let Err(rollback) = log.file.set_len(len).and_then(|_| log.file.sync_data()) {
                error!(
                    path = ?self.log_path,
                    error = %rollback,
                    "Failed to roll back partial metadata append"
                );
                log.failed = true;
            }
            return Err(SlabError::io("failed to append metadata batch", e));
        }
        log.len += bytes.len() as u64;
        log.next_sequence += 1;

        let mut index = self.index.write();
        for (key, slot) in batch.mappings {
            match slot {
                Some(slot) => index.insert(key, slot),
                None => index.remove(&key),
            };
        }
        debug!(sequence = batch.sequence, "Wrote metadata batch");
        Ok(())
    }

    pub fn get(&self, key: &[u8]) -> Option<SlotId> {
        self.index.read().get(key).copied()
    }

    /// Durably remove `key`.
    pub fn remove(&self, key: &[u8]) -> SlabResult<()> {
        self.write_batch(vec![(key.to_vec(), None)])
    }

    /// Keys in ascending byte order.
    pub fn keys(&self) -> Vec<Vec<u8>> {
        self.index.read().keys().cloned().collect()
    }

    /// Entries whose key is `>= start`, ascending, at most `limit` of them.
    pub fn range_from(&self, start: &[u8], limit: usize) -> Vec<(Vec<u8>, SlotId)> {
        self.index
            .read()
            .range::<[u8], _>((Bound::Included(start), Bound::Unbounded))
            .take(limit)
            .map(|(k, v)| (k.clone(), *v))
            .collect()
    }

    pub fn live_slots(&self) -> Vec<SlotId> {
        self.index.read().values().copied().collect()
    }

    pub fn len(&self) -> usize {
        self.index.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.index.read().is_empty()
    }

    /// Rewrite the log as a single batch of the live entries.
    pub fn compact(&self) -> SlabResult<()> {
        let mut log = self.log.lock();
        let mappings: Vec<_> = self
            .index
            .read()
            .iter()
            .map(|(k, v)| (k.clone(), Some(*v)))
            .collect();
        let bytes = MetadataBatch::new(0, mappings).to_bytes()?;

        let temp_path = self.log_path.with_extension("log.tmp");
        let mut temp = File::create(&temp_path)
            .map_err(|e| SlabError::io("failed to create compacted log", e))?;
        temp.write_all(&bytes)
            .map_err(|e| SlabError::io("failed to write compacted log", e))?;
        temp.sync_all()
            .map_err(|e| SlabError::io("failed to sync compacted log", e))?;
        std::fs::rename(&temp_path, &self.log_path)
            .map_err(|e| SlabError::io("failed to replace metadata log", e))?;

        let file = OpenOptions::new()
            .append(true)
            .open(&self.log_path)
            .map_err(|e| SlabError::io("failed to reopen metadata log", e))?;
        *log = LogState {
            file,
            next_sequence: 1,
            len: bytes.len() as u64,
            failed: false,
        };

        info!(path = ?self.log_path, "Metadata log compacted");
        Ok(())
    }
}
