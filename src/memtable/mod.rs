//! # Memtable Module
//!
//! ## Design Invariants
//!
//! - All writes are WAL-first and assigned a monotonically increasing LSN.
//! - The memtable holds exactly one entry per key — the most recent write
//!   (by LSN) replaces any prior entry. Older versions are not retained;
//!   once an SSTable is flushed, cross-version ordering across tables is
//!   handled at merge time, not inside a single memtable.
//! - Deletes are represented via tombstones, not physical removal.
//! - Range tombstones logically delete all keys in `[start, end)` with
//!   lower LSNs.
//! - Reads (`get`, `scan`) always resolve point entries against range
//!   tombstones.
//! - Version ordering is by LSN only. The `timestamp` carried on each
//!   record is informational (diagnostics, audit) and never used to
//!   break ties — two records can never share an LSN.
//!
//! ## Flush Semantics
//!
//! - `iter_for_flush` returns a *logical snapshot* of the memtable state.
//! - Returned records are sufficient to reconstruct the same memtable
//!   state via WAL replay.
//! - Flush iteration does **not** mutate or clear in-memory state.
//!
//! ## Frozen Memtable
//!
//! - A `FrozenMemtable` is read-only.
//! - It retains ownership of the WAL to guarantee durability until
//!   data is persisted to SSTables.

// ------------------------------------------------------------------------------------------------
// Unit tests
// ------------------------------------------------------------------------------------------------

#[cfg(test)]
mod tests;

// ------------------------------------------------------------------------------------------------
// Includes
// ------------------------------------------------------------------------------------------------

use std::{
    path::Path,
    sync::{
        Arc,
        atomic::{AtomicU64, AtomicUsize, Ordering},
    },
    time::{SystemTime, UNIX_EPOCH},
};

use crossbeam_skiplist::SkipMap;

use crate::encoding::{self, Decode, Encode, EncodingError};
use crate::wal::{Wal, WalError};
use thiserror::Error;
use tracing::{error, info, trace, warn};

// ------------------------------------------------------------------------------------------------
// Error Types
// ------------------------------------------------------------------------------------------------

/// Represents possible errors returned by [`Memtable`] operations.
#[derive(Debug, Error)]
pub enum MemtableError {
    /// Underlying WAL I/O failure.
    #[error("WAL error: {0}")]
    WAL(#[from] WalError),

    /// Write buffer limit reached; a flush is required before further writes.
    #[error("Flush required")]
    FlushRequired,

    /// The key argument to a mutating operation was empty.
    #[error("key must not be empty")]
    EmptyKey,

    /// Internal invariant violation or poisoned lock.
    #[error("Internal error: {0}")]
    Internal(String),
}

// ------------------------------------------------------------------------------------------------
// Wire types
// ------------------------------------------------------------------------------------------------

/// A single latest-version point entry stored in the memtable.
///
/// Deletions are represented by tombstones (`is_delete = true`).
#[derive(Debug, PartialEq, Clone)]
pub struct MemtableEntry {
    /// The stored value. `None` indicates a deletion (tombstone).
    pub value: Option<Vec<u8>>,

    /// Logical timestamp in nanoseconds since UNIX epoch. Diagnostic only.
    pub timestamp: u64,

    /// Whether this entry represents a deletion.
    pub is_delete: bool,

    /// Log sequence number this entry was written at.
    pub lsn: u64,
}

impl Encode for MemtableEntry {
    fn encode_to(&self, buf: &mut Vec<u8>) -> Result<(), EncodingError> {
        self.value.encode_to(buf)?;
        self.timestamp.encode_to(buf)?;
        self.is_delete.encode_to(buf)?;
        self.lsn.encode_to(buf)?;
        Ok(())
    }
}

impl Decode for MemtableEntry {
    fn decode_from(buf: &[u8]) -> Result<(Self, usize), EncodingError> {
        let mut offset = 0;
        let (value, n) = Option::<Vec<u8>>::decode_from(&buf[offset..])?;
        offset += n;
        let (timestamp, n) = u64::decode_from(&buf[offset..])?;
        offset += n;
        let (is_delete, n) = bool::decode_from(&buf[offset..])?;
        offset += n;
        let (lsn, n) = u64::decode_from(&buf[offset..])?;
        offset += n;
        Ok((
            Self {
                value,
                timestamp,
                is_delete,
                lsn,
            },
            offset,
        ))
    }
}

/// A range tombstone that logically deletes keys in `[start, end)`.
///
/// Range tombstones are versioned via LSN and may overlap. During reads,
/// the highest-LSN tombstone covering a key takes precedence.
#[derive(Clone, Debug)]
pub struct MemtableRangeTombstone {
    /// Inclusive start key of the deleted range.
    pub start: Vec<u8>,

    /// Exclusive end key of the deleted range.
    pub end: Vec<u8>,

    /// Log Sequence Number of this mutation.
    pub lsn: u64,

    /// Timestamp associated with this mutation. Diagnostic only.
    pub timestamp: u64,
}

impl Encode for MemtableRangeTombstone {
    fn encode_to(&self, buf: &mut Vec<u8>) -> Result<(), EncodingError> {
        self.start.encode_to(buf)?;
        self.end.encode_to(buf)?;
        self.lsn.encode_to(buf)?;
        self.timestamp.encode_to(buf)?;
        Ok(())
    }
}

impl Decode for MemtableRangeTombstone {
    fn decode_from(buf: &[u8]) -> Result<(Self, usize), EncodingError> {
        let mut offset = 0;
        let (start, n) = Vec::<u8>::decode_from(&buf[offset..])?;
        offset += n;
        let (end, n) = Vec::<u8>::decode_from(&buf[offset..])?;
        offset += n;
        let (lsn, n) = u64::decode_from(&buf[offset..])?;
        offset += n;
        let (timestamp, n) = u64::decode_from(&buf[offset..])?;
        offset += n;
        Ok((
            Self {
                start,
                end,
                lsn,
                timestamp,
            },
            offset,
        ))
    }
}

/// A logical WAL record representing a memtable mutation.
///
/// These records are appended to the WAL, replayed during recovery, and
/// emitted during memtable flush. Together they form a complete,
/// replayable history.
///
/// `batch_flag`/`batch_size` mark records written via [`Memtable::batch_put`]
/// / [`Memtable::batch_delete`]: every member of an N-record batch carries
/// `batch_flag = true` and the same `batch_size = N`. Replay groups
/// consecutive same-sized runs of flagged records and discards any run
/// shorter than its declared size — the tail of a crash mid-batch-write —
/// so a batch is all-or-nothing from the reader's perspective.
#[derive(Debug, PartialEq)]
pub enum MemtableRecord {
    /// Insert or update a single key.
    Put {
        key: Vec<u8>,
        value: Vec<u8>,
        lsn: u64,
        timestamp: u64,
        batch_flag: bool,
        batch_size: u32,
    },

    /// Delete a single key.
    Delete {
        key: Vec<u8>,
        lsn: u64,
        timestamp: u64,
        batch_flag: bool,
        batch_size: u32,
    },

    /// Delete all keys in `[start, end)`.
    RangeDelete {
        start: Vec<u8>,
        end: Vec<u8>,
        lsn: u64,
        timestamp: u64,
    },
}

impl MemtableRecord {
    fn batch_info(&self) -> Option<(bool, u32)> {
        match self {
            MemtableRecord::Put {
                batch_flag,
                batch_size,
                ..
            }
            | MemtableRecord::Delete {
                batch_flag,
                batch_size,
                ..
            } => Some((*batch_flag, *batch_size)),
            MemtableRecord::RangeDelete { .. } => None,
        }
    }

    fn lsn(&self) -> u64 {
        match self {
            MemtableRecord::Put { lsn, .. }
            | MemtableRecord::Delete { lsn, .. }
            | MemtableRecord::RangeDelete { lsn, .. } => *lsn,
        }
    }
}

impl Encode for MemtableRecord {
    fn encode_to(&self, buf: &mut Vec<u8>) -> Result<(), EncodingError> {
        match self {
            MemtableRecord::Put {
                key,
                value,
                lsn,
                timestamp,
                batch_flag,
                batch_size,
            } => {
                0u32.encode_to(buf)?;
                key.encode_to(buf)?;
                value.encode_to(buf)?;
                lsn.encode_to(buf)?;
                timestamp.encode_to(buf)?;
                batch_flag.encode_to(buf)?;
                batch_size.encode_to(buf)?;
            }
            MemtableRecord::Delete {
                key,
                lsn,
                timestamp,
                batch_flag,
                batch_size,
            } => {
                1u32.encode_to(buf)?;
                key.encode_to(buf)?;
                lsn.encode_to(buf)?;
                timestamp.encode_to(buf)?;
                batch_flag.encode_to(buf)?;
                batch_size.encode_to(buf)?;
            }
            MemtableRecord::RangeDelete {
                start,
                end,
                lsn,
                timestamp,
            } => {
                2u32.encode_to(buf)?;
                start.encode_to(buf)?;
                end.encode_to(buf)?;
                lsn.encode_to(buf)?;
                timestamp.encode_to(buf)?;
            }
        }
        Ok(())
    }
}

impl Decode for MemtableRecord {
    fn decode_from(buf: &[u8]) -> Result<(Self, usize), EncodingError> {
        let mut offset = 0;
        let (tag, n) = u32::decode_from(buf)?;
        offset += n;
        match tag {
            0 => {
                let (key, n) = Vec::<u8>::decode_from(&buf[offset..])?;
                offset += n;
                let (value, n) = Vec::<u8>::decode_from(&buf[offset..])?;
                offset += n;
                let (lsn, n) = u64::decode_from(&buf[offset..])?;
                offset += n;
                let (timestamp, n) = u64::decode_from(&buf[offset..])?;
                offset += n;
                let (batch_flag, n) = bool::decode_from(&buf[offset..])?;
                offset += n;
                let (batch_size, n) = u32::decode_from(&buf[offset..])?;
                offset += n;
                Ok((
                    MemtableRecord::Put {
                        key,
                        value,
                        lsn,
                        timestamp,
                        batch_flag,
                        batch_size,
                    },
                    offset,
                ))
            }
            1 => {
                let (key, n) = Vec::<u8>::decode_from(&buf[offset..])?;
                offset += n;
                let (lsn, n) = u64::decode_from(&buf[offset..])?;
                offset += n;
                let (timestamp, n) = u64::decode_from(&buf[offset..])?;
                offset += n;
                let (batch_flag, n) = bool::decode_from(&buf[offset..])?;
                offset += n;
                let (batch_size, n) = u32::decode_from(&buf[offset..])?;
                offset += n;
                Ok((
                    MemtableRecord::Delete {
                        key,
                        lsn,
                        timestamp,
                        batch_flag,
                        batch_size,
                    },
                    offset,
                ))
            }
            2 => {
                let (start, n) = Vec::<u8>::decode_from(&buf[offset..])?;
                offset += n;
                let (end, n) = Vec::<u8>::decode_from(&buf[offset..])?;
                offset += n;
                let (lsn, n) = u64::decode_from(&buf[offset..])?;
                offset += n;
                let (timestamp, n) = u64::decode_from(&buf[offset..])?;
                offset += n;
                Ok((
                    MemtableRecord::RangeDelete {
                        start,
                        end,
                        lsn,
                        timestamp,
                    },
                    offset,
                ))
            }
            _ => Err(EncodingError::InvalidTag {
                tag,
                type_name: "MemtableRecord",
            }),
        }
    }
}

/// Result of a `get` operation on the memtable.
#[derive(Debug, PartialEq)]
pub enum MemtableGetResult {
    /// Value found for the key.
    Put(Vec<u8>),

    /// Key was deleted by a point tombstone.
    Delete,

    /// Key was deleted by a range tombstone.
    RangeDelete,

    /// Key not found in the memtable.
    NotFound,
}

// ------------------------------------------------------------------------------------------------
// Memtable Core
// ------------------------------------------------------------------------------------------------

/// The mutable, in-memory write buffer of the storage engine.
///
/// The memtable:
/// - Accepts writes (`put`, `delete`, `delete_range`, `batch_put`, `batch_delete`)
/// - Persists all mutations to a WAL
/// - Serves reads (`get`, `scan`)
/// - Can be logically flushed via `iter_for_flush`
///
/// Internally, point entries live in a lock-free [`SkipMap`] keyed by the
/// user key, holding exactly one (latest) version — concurrent readers
/// never block behind a writer.
///
/// # Durability
/// - Every mutation is appended to the WAL *before* being applied in memory.
pub struct Memtable {
    /// Latest-version point entries, ordered by key.
    tree: Arc<SkipMap<Vec<u8>, MemtableEntry>>,

    /// Range tombstones, keyed by their start key.
    range_tombstones: Arc<SkipMap<Vec<u8>, MemtableRangeTombstone>>,

    /// Approximate in-memory footprint.
    approximate_size: AtomicUsize,

    /// Configured maximum buffer size before flush is required.
    write_buffer_size: usize,

    /// Associated write-ahead log for durability.
    pub wal: Wal<MemtableRecord>,

    /// Monotonic log sequence number (LSN) for version ordering.
    next_lsn: AtomicU64,
}

impl Memtable {
    /// Creates a new mutable [`Memtable`] backed by a write-ahead log (WAL).
    ///
    /// # Arguments
    /// - `wal_path` — Path to the WAL file used for durability.
    /// - `max_record_size` — Optional maximum size of a single WAL record.
    /// - `write_buffer_size` — Maximum in-memory size before a flush is required.
    ///
    /// # Behavior
    /// - Replays the WAL (if present) to reconstruct the in-memory state.
    /// - Restores the highest observed LSN and advances the internal counter.
    /// - Subsequent writes will continue with monotonically increasing LSNs.
    ///
    /// # Crash Safety
    /// WAL replay guarantees recovery to the last durable state after a crash.
    /// An incomplete trailing batch (fewer members than its declared
    /// `batch_size`) is dropped in its entirety. Replay stops at the first
    /// invalid frame (checksum mismatch, truncated payload, oversized
    /// record) rather than failing the whole open — everything before it is
    /// kept, and the WAL file is truncated at that boundary so the corrupt
    /// tail can't resurface on a later replay.
    pub fn new<P: AsRef<Path>>(
        wal_path: P,
        max_record_size: Option<u32>,
        write_buffer_size: usize,
    ) -> Result<Self, MemtableError> {
        Self::new_with_policy(wal_path, max_record_size, write_buffer_size, Default::default())
    }

    /// Like [`Memtable::new`] but with an explicit WAL sync policy.
    pub fn new_with_policy<P: AsRef<Path>>(
        wal_path: P,
        max_record_size: Option<u32>,
        write_buffer_size: usize,
        sync_policy: crate::wal::WalSyncPolicy,
    ) -> Result<Self, MemtableError> {
        info!("Initializing Memtable with WAL replay");

        let mut wal = Wal::open_with_policy(&wal_path, max_record_size, sync_policy)?;

        let tree = Arc::new(SkipMap::new());
        let range_tombstones = Arc::new(SkipMap::new());
        let approximate_size = AtomicUsize::new(0);

        let mut max_lsn_seen: u64 = 0;

        let mut records = wal.replay_iter()?;
        let mut valid_offset = records.offset();
        let mut pending_batch: Vec<MemtableRecord> = Vec::new();
        let mut corrupted = false;

        while let Some(result) = records.next() {
            let record: MemtableRecord = match result {
                Ok(record) => record,
                Err(err) => {
                    // Stop at the first invalid frame and keep everything
                    // applied so far; the WAL tail is truncated below.
                    warn!(
                        error = %err,
                        offset = valid_offset,
                        "WAL replay hit an invalid frame, truncating at the last valid record"
                    );
                    corrupted = true;
                    break;
                }
            };

            match record.batch_info() {
                Some((true, batch_size)) => {
                    pending_batch.push(record);
                    if pending_batch.len() as u32 >= batch_size {
                        for r in pending_batch.drain(..) {
                            max_lsn_seen = max_lsn_seen.max(r.lsn());
                            apply_replayed(&tree, &range_tombstones, &approximate_size, r);
                        }
                    }
                }
                _ => {
                    // A non-batch record flushes (discards) any incomplete
                    // pending batch — it can never legitimately interleave.
                    pending_batch.clear();
                    max_lsn_seen = max_lsn_seen.max(record.lsn());
                    apply_replayed(&tree, &range_tombstones, &approximate_size, record);
                }
            }

            valid_offset = records.offset();
        }

        drop(records);

        if corrupted {
            wal.truncate_to(valid_offset)?;
        }

        if !pending_batch.is_empty() {
            trace!(
                dropped = pending_batch.len(),
                "discarding incomplete trailing batch on replay"
            );
        }

        info!(lsn = max_lsn_seen, "Memtable initialized successfully");

        Ok(Self {
            tree,
            range_tombstones,
            approximate_size,
            write_buffer_size,
            wal,
            next_lsn: AtomicU64::new(max_lsn_seen.saturating_add(1)),
        })
    }

    /// Inserts or updates a key with a new value.
    ///
    /// # Behavior
    /// - The mutation is first appended to the WAL (write-ahead).
    /// - The entry is then applied to the in-memory skip map.
    /// - A unique, monotonically increasing LSN is assigned.
    /// - An empty `value` is accepted; only an empty `key` is rejected.
    pub fn put(&self, key: Vec<u8>, value: Vec<u8>) -> Result<(), MemtableError> {
        trace!("put() started, key: {}", HexKey(&key));

        if key.is_empty() {
            return Err(MemtableError::EmptyKey);
        }

        let lsn = self.next_lsn.fetch_add(1, Ordering::SeqCst);
        let timestamp = Self::current_timestamp();
        let record_size = std::mem::size_of::<MemtableEntry>() + key.len() + value.len();

        if self.approximate_size.load(Ordering::SeqCst) + record_size > self.write_buffer_size {
            return Err(MemtableError::FlushRequired);
        }

        let record = MemtableRecord::Put {
            key: key.clone(),
            value: value.clone(),
            lsn,
            timestamp,
            batch_flag: false,
            batch_size: 0,
        };

        // 1. WAL first (crash safety)
        self.wal.append(&record)?;

        // 2. In-memory update
        self.tree.insert(
            key.clone(),
            MemtableEntry {
                value: Some(value),
                timestamp,
                is_delete: false,
                lsn,
            },
        );
        self.approximate_size.fetch_add(record_size, Ordering::SeqCst);

        trace!(lsn, key = %HexKey(&key), "put completed");
        Ok(())
    }

    /// Deletes a key by inserting a tombstone entry.
    ///
    /// # Behavior
    /// - Writes a delete record to the WAL.
    /// - Overwrites any prior entry with a tombstone at a higher LSN.
    pub fn delete(&self, key: Vec<u8>) -> Result<(), MemtableError> {
        trace!("delete() started, key: {}", HexKey(&key));

        if key.is_empty() {
            return Err(MemtableError::EmptyKey);
        }

        let lsn = self.next_lsn.fetch_add(1, Ordering::SeqCst);
        let timestamp = Self::current_timestamp();
        let record_size = std::mem::size_of::<MemtableEntry>() + key.len();

        if self.approximate_size.load(Ordering::SeqCst) + record_size > self.write_buffer_size {
            return Err(MemtableError::FlushRequired);
        }

        let record = MemtableRecord::Delete {
            key: key.clone(),
            lsn,
            timestamp,
            batch_flag: false,
            batch_size: 0,
        };

        self.wal.append(&record)?;

        self.tree.insert(
            key.clone(),
            MemtableEntry {
                value: None,
                timestamp,
                is_delete: true,
                lsn,
            },
        );
        self.approximate_size.fetch_add(record_size, Ordering::SeqCst);

        trace!(lsn, key = %HexKey(&key), "delete completed");
        Ok(())
    }

    /// Deletes all keys in the range `[start, end)`.
    ///
    /// # Range Semantics
    /// - Inclusive `start`
    /// - Exclusive `end`
    pub fn delete_range(&self, start: Vec<u8>, end: Vec<u8>) -> Result<(), MemtableError> {
        trace!(
            "delete_range() started, start key: {}, end key: {}",
            HexKey(&start),
            HexKey(&end)
        );

        if start.is_empty() || end.is_empty() {
            return Err(MemtableError::EmptyKey);
        }

        let lsn = self.next_lsn.fetch_add(1, Ordering::SeqCst);
        let timestamp = Self::current_timestamp();
        let record_size = std::mem::size_of::<MemtableRangeTombstone>() + start.len() + end.len();

        if self.approximate_size.load(Ordering::SeqCst) + record_size > self.write_buffer_size {
            return Err(MemtableError::FlushRequired);
        }

        let record = MemtableRecord::RangeDelete {
            start: start.clone(),
            end: end.clone(),
            lsn,
            timestamp,
        };

        self.wal.append(&record)?;

        self.range_tombstones.insert(
            start.clone(),
            MemtableRangeTombstone {
                start,
                end,
                lsn,
                timestamp,
            },
        );
        self.approximate_size.fetch_add(record_size, Ordering::SeqCst);

        trace!(lsn, "delete_range completed");
        Ok(())
    }

    /// Atomically applies a batch of puts: the whole batch is durable (via a
    /// single WAL append) or, on a crash mid-write, none of its trailing
    /// members survive replay.
    pub fn batch_put(&self, entries: Vec<(Vec<u8>, Vec<u8>)>) -> Result<(), MemtableError> {
        if entries.is_empty() {
            return Ok(());
        }
        if entries.iter().any(|(k, _)| k.is_empty()) {
            return Err(MemtableError::EmptyKey);
        }

        let batch_size = entries.len() as u32;
        let timestamp = Self::current_timestamp();
        let mut records = Vec::with_capacity(entries.len());
        let mut total_size = 0usize;

        for (key, value) in &entries {
            let lsn = self.next_lsn.fetch_add(1, Ordering::SeqCst);
            total_size += std::mem::size_of::<MemtableEntry>() + key.len() + value.len();
            records.push(MemtableRecord::Put {
                key: key.clone(),
                value: value.clone(),
                lsn,
                timestamp,
                batch_flag: true,
                batch_size,
            });
        }

        if self.approximate_size.load(Ordering::SeqCst) + total_size > self.write_buffer_size {
            return Err(MemtableError::FlushRequired);
        }

        self.wal.append_batch(&records)?;

        for (record, (key, value)) in records.into_iter().zip(entries.into_iter()) {
            let lsn = record.lsn();
            self.tree.insert(
                key,
                MemtableEntry {
                    value: Some(value),
                    timestamp,
                    is_delete: false,
                    lsn,
                },
            );
        }
        self.approximate_size.fetch_add(total_size, Ordering::SeqCst);

        trace!(batch_size, "batch_put completed");
        Ok(())
    }

    /// Atomically applies a batch of point deletes. See [`Memtable::batch_put`]
    /// for the atomicity contract.
    pub fn batch_delete(&self, keys: Vec<Vec<u8>>) -> Result<(), MemtableError> {
        if keys.is_empty() {
            return Ok(());
        }
        if keys.iter().any(|k| k.is_empty()) {
            return Err(MemtableError::EmptyKey);
        }

        let batch_size = keys.len() as u32;
        let timestamp = Self::current_timestamp();
        let mut records = Vec::with_capacity(keys.len());
        let mut total_size = 0usize;

        for key in &keys {
            let lsn = self.next_lsn.fetch_add(1, Ordering::SeqCst);
            total_size += std::mem::size_of::<MemtableEntry>() + key.len();
            records.push(MemtableRecord::Delete {
                key: key.clone(),
                lsn,
                timestamp,
                batch_flag: true,
                batch_size,
            });
        }

        if self.approximate_size.load(Ordering::SeqCst) + total_size > self.write_buffer_size {
            return Err(MemtableError::FlushRequired);
        }

        self.wal.append_batch(&records)?;

        for (record, key) in records.into_iter().zip(keys.into_iter()) {
            let lsn = record.lsn();
            self.tree.insert(
                key,
                MemtableEntry {
                    value: None,
                    timestamp,
                    is_delete: true,
                    lsn,
                },
            );
        }
        self.approximate_size.fetch_add(total_size, Ordering::SeqCst);

        trace!(batch_size, "batch_delete completed");
        Ok(())
    }

    /// Retrieves the latest visible value for a key.
    ///
    /// Resolution rules:
    /// 1. Look up the point entry (there is at most one, by construction).
    /// 2. Check all covering range tombstones.
    /// 3. If a tombstone has a higher LSN than the point entry, the key is
    ///    considered deleted by the range tombstone.
    pub fn get(&self, key: &[u8]) -> Result<MemtableGetResult, MemtableError> {
        trace!("get() started, key: {}", HexKey(key));

        let point = self.tree.get(key).map(|e| e.value().clone());
        let covering_tombstone_lsn = self.covering_tombstone_lsn(key);

        match (point, covering_tombstone_lsn) {
            (None, None) => Ok(MemtableGetResult::NotFound),
            (None, Some(_)) => Ok(MemtableGetResult::RangeDelete),
            (Some(point), None) => Ok(Self::resolve_point(point)),
            (Some(point), Some(tombstone_lsn)) => {
                if tombstone_lsn > point.lsn {
                    Ok(MemtableGetResult::RangeDelete)
                } else {
                    Ok(Self::resolve_point(point))
                }
            }
        }
    }

    fn resolve_point(point: MemtableEntry) -> MemtableGetResult {
        if point.is_delete {
            MemtableGetResult::Delete
        } else {
            MemtableGetResult::Put(point.value.unwrap_or_default())
        }
    }

    /// Highest LSN among range tombstones covering `key`, if any.
    fn covering_tombstone_lsn(&self, key: &[u8]) -> Option<u64> {
        let mut covering_lsn = None;
        for entry in self.range_tombstones.range(..=key.to_vec()) {
            let tombstone = entry.value();
            if tombstone.start.as_slice() <= key && key < tombstone.end.as_slice() {
                covering_lsn = Some(covering_lsn.map_or(tombstone.lsn, |l: u64| l.max(tombstone.lsn)));
            }
        }
        covering_lsn
    }

    /// Performs an ordered range scan over `[start, end)`.
    ///
    /// Each key is resolved against its point entry and all applicable
    /// range tombstones. Deleted keys are omitted from the result.
    pub fn scan(
        &self,
        start: &[u8],
        end: &[u8],
    ) -> Result<impl Iterator<Item = (Vec<u8>, MemtableEntry)>, MemtableError> {
        trace!(
            "scan() started with range. Start key: {} end key: {}",
            HexKey(start),
            HexKey(end)
        );

        if start >= end {
            return Ok(Vec::new().into_iter());
        }

        let mut records = Vec::new();
        for entry in self.tree.range(start.to_vec()..end.to_vec()) {
            let point = entry.value();
            if point.is_delete {
                continue;
            }
            let tombstone_lsn = self.covering_tombstone_lsn(entry.key()).unwrap_or(0);
            if tombstone_lsn > point.lsn {
                continue;
            }
            records.push((entry.key().clone(), point.clone()));
        }

        Ok(records.into_iter())
    }

    /// Returns a logical snapshot of the memtable suitable for flushing.
    ///
    /// The iterator emits the latest version of every point key (put or
    /// delete) plus **all** range tombstones, without filtering tombstone
    /// interaction — the returned records are sufficient to rebuild the
    /// same state via replay. Does not mutate in-memory state.
    pub fn iter_for_flush(&self) -> Result<impl Iterator<Item = MemtableRecord>, MemtableError> {
        let mut records = Vec::new();

        for entry in self.tree.iter() {
            let key = entry.key();
            let e = entry.value();
            let record = if e.is_delete {
                MemtableRecord::Delete {
                    key: key.clone(),
                    lsn: e.lsn,
                    timestamp: e.timestamp,
                    batch_flag: false,
                    batch_size: 0,
                }
            } else {
                MemtableRecord::Put {
                    key: key.clone(),
                    value: e.value.clone().unwrap_or_default(),
                    lsn: e.lsn,
                    timestamp: e.timestamp,
                    batch_flag: false,
                    batch_size: 0,
                }
            };
            records.push(record);
        }

        for entry in self.range_tombstones.iter() {
            let t = entry.value();
            records.push(MemtableRecord::RangeDelete {
                start: t.start.clone(),
                end: t.end.clone(),
                lsn: t.lsn,
                timestamp: t.timestamp,
            });
        }

        Ok(records.into_iter())
    }

    /// Converts this mutable memtable into an immutable [`FrozenMemtable`].
    ///
    /// Consumes `self`, preventing any further writes, but preserves
    /// ownership of the WAL to keep it alive during flushing.
    pub fn frozen(self) -> Result<FrozenMemtable, MemtableError> {
        Ok(FrozenMemtable::new(self))
    }

    /// Override the current LSN counter with a recovered value.
    ///
    /// Must only be called during recovery **before any writes**.
    pub fn inject_max_lsn(&self, lsn: u64) {
        self.next_lsn.store(lsn.saturating_add(1), Ordering::SeqCst);
    }

    /// Returns the highest assigned LSN so far.
    pub fn max_lsn(&self) -> u64 {
        self.next_lsn.load(Ordering::SeqCst).saturating_sub(1)
    }

    /// Returns the approximate in-memory footprint in bytes.
    pub fn approximate_size(&self) -> usize {
        self.approximate_size.load(Ordering::SeqCst)
    }

    /// Returns the current system timestamp in nanoseconds.
    ///
    /// Used only to tag entries for diagnostics; never used for ordering.
    fn current_timestamp() -> u64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("system clock before UNIX epoch")
            .as_nanos() as u64
    }
}

/// Applies a single replayed record to the in-memory structures, mirroring
/// the in-memory half of `put`/`delete`/`delete_range` (the WAL append is
/// skipped — the record is already durable).
fn apply_replayed(
    tree: &SkipMap<Vec<u8>, MemtableEntry>,
    range_tombstones: &SkipMap<Vec<u8>, MemtableRangeTombstone>,
    approximate_size: &AtomicUsize,
    record: MemtableRecord,
) {
    match record {
        MemtableRecord::Put {
            key,
            value,
            lsn,
            timestamp,
            ..
        } => {
            approximate_size.fetch_add(
                std::mem::size_of::<MemtableEntry>() + key.len() + value.len(),
                Ordering::SeqCst,
            );
            tree.insert(
                key,
                MemtableEntry {
                    value: Some(value),
                    timestamp,
                    is_delete: false,
                    lsn,
                },
            );
        }
        MemtableRecord::Delete {
            key, lsn, timestamp, ..
        } => {
            approximate_size.fetch_add(
                std::mem::size_of::<MemtableEntry>() + key.len(),
                Ordering::SeqCst,
            );
            tree.insert(
                key,
                MemtableEntry {
                    value: None,
                    timestamp,
                    is_delete: true,
                    lsn,
                },
            );
        }
        MemtableRecord::RangeDelete {
            start,
            end,
            lsn,
            timestamp,
        } => {
            approximate_size.fetch_add(
                std::mem::size_of::<MemtableRangeTombstone>() + start.len() + end.len(),
                Ordering::SeqCst,
            );
            range_tombstones.insert(
                start.clone(),
                MemtableRangeTombstone {
                    start,
                    end,
                    lsn,
                    timestamp,
                },
            );
        }
    }
}

// ------------------------------------------------------------------------------------------------
// Frozen Memtable
// ------------------------------------------------------------------------------------------------

/// An immutable, read-only view of a memtable.
///
/// A frozen memtable exposes only read APIs, retains ownership of the WAL,
/// and prevents further mutation by construction. It represents a memtable
/// in the process of being flushed to an on-disk SSTable.
pub struct FrozenMemtable {
    pub memtable: Memtable,
    pub creation_timestamp: u64,
}

impl FrozenMemtable {
    /// Creates a new frozen memtable, wrapping an already-replayed memtable.
    pub fn new(memtable: Memtable) -> Self {
        Self {
            memtable,
            creation_timestamp: Memtable::current_timestamp(),
        }
    }

    /// Retrieves the latest visible value for a key.
    pub fn get(&self, key: &[u8]) -> Result<MemtableGetResult, MemtableError> {
        self.memtable.get(key)
    }

    /// Performs a range scan over the frozen memtable.
    pub fn scan(
        &self,
        start: &[u8],
        end: &[u8],
    ) -> Result<impl Iterator<Item = (Vec<u8>, MemtableEntry)>, MemtableError> {
        self.memtable.scan(start, end)
    }

    /// Returns all records required to materialize this memtable into an SSTable.
    pub fn iter_for_flush(&self) -> Result<impl Iterator<Item = MemtableRecord>, MemtableError> {
        self.memtable.iter_for_flush()
    }

    /// Returns the highest assigned LSN so far.
    pub fn max_lsn(&self) -> u64 {
        self.memtable.max_lsn()
    }
}

// ------------------------------------------------------------------------------------------------
// Tracing Helper
// ------------------------------------------------------------------------------------------------

struct HexKey<'a>(&'a [u8]);

impl<'a> std::fmt::Display for HexKey<'a> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.0.len() <= 32 {
            for byte in self.0 {
                write!(f, "{:02x}", byte)?;
            }
        } else {
            for byte in &self.0[..16] {
                write!(f, "{:02x}", byte)?;
            }
            write!(f, "...[{} bytes]", self.0.len())?;
        }
        Ok(())
    }
}
