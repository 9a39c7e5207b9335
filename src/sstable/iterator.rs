//! SSTable iterators — single-block entry decoding and range scan.
//!
//! This module provides two iterator types:
//!
//! - [`BlockIterator`] — decodes the (already decompressed) data block and
//!   yields [`BlockEntry`] values. It supports `seek_to_first()` and
//!   `seek_to(key)` for positioning.
//! - [`ScanIterator`] — walks the data block plus range tombstones, yielding
//!   a merged stream of [`Record`] items in `(key ASC, LSN DESC)` order.
//!
//! # Block iterator
//!
//! Each entry is an encoded `SSTableCell` header followed by key and value
//! bytes:
//!
//! ```text
//! [SSTableCell header][KEY_BYTES][VALUE_BYTES]
//! ```
//!
//! Since every SSTable now holds exactly one data block (see the
//! [module docs](super)), seeking starts from the byte offset returned by
//! the sparse index rather than from a block boundary, then scans linearly.
//! If corruption or truncation is detected, the iterator treats the
//! remaining bytes as exhausted rather than panicking.
//!
//! # Scan iterator
//!
//! [`ScanIterator`] provides a **sorted forward scan** over a single
//! SSTable, yielding all point entries (`Put`, `Delete`) and range
//! tombstones (`RangeDelete`) that overlap a user-specified key range
//! `[start_key, end_key]`, inclusive of both bounds. Point entries and range
//! tombstones are interleaved in `(key ASC, LSN DESC)` order, matching
//! [`Record`]'s `Ord` implementation.

use crate::encoding::Decode;
use crate::engine::Record;

use super::{SSTable, SSTableCell, SSTableError};

/// A single decoded entry from the data block.
#[derive(Debug, Clone)]
pub struct BlockEntry {
    /// The entry's key.
    pub key: Vec<u8>,
    /// The entry's value. Empty for deletes.
    pub value: Vec<u8>,
    /// Whether this entry is a point delete.
    pub is_delete: bool,
    /// Log sequence number.
    pub lsn: u64,
    /// Timestamp (diagnostic only).
    pub timestamp: u64,
}

/// Iterates over cells in the (decompressed) data block, starting from an
/// arbitrary byte offset.
pub struct BlockIterator {
    data: Vec<u8>,
    cursor: usize,
}

impl BlockIterator {
    /// Creates an iterator starting at the beginning of `data`.
    pub fn new(data: Vec<u8>) -> Self {
        Self { data, cursor: 0 }
    }

    /// Creates an iterator starting at `offset` within `data`.
    pub fn new_at(data: Vec<u8>, offset: u64) -> Self {
        let cursor = (offset as usize).min(data.len());
        Self { data, cursor }
    }

    /// Resets the cursor to the start of the block.
    pub fn seek_to_first(&mut self) {
        self.cursor = 0;
    }

    /// Advances the cursor to the first entry whose key is `>= search_key`.
    ///
    /// Linear scan from the current cursor position. Truncated or
    /// malformed cells are treated as end-of-data.
    pub fn seek_to(&mut self, search_key: &[u8]) {
        loop {
            let start = self.cursor;
            let Ok((cell, consumed)) = SSTableCell::decode_from(&self.data[start..]) else {
                self.cursor = self.data.len();
                return;
            };

            let key_start = start + consumed;
            let key_end = key_start + cell.key_len as usize;
            if key_end > self.data.len() {
                self.cursor = self.data.len();
                return;
            }

            let key = &self.data[key_start..key_end];
            if key >= search_key {
                self.cursor = start;
                return;
            }

            let value_end = key_end + cell.value_len as usize;
            if value_end > self.data.len() {
                self.cursor = self.data.len();
                return;
            }
            self.cursor = value_end;
        }
    }

    /// Decodes and returns the next entry, advancing the cursor past it.
    pub fn next_entry(&mut self) -> Option<BlockEntry> {
        if self.cursor >= self.data.len() {
            return None;
        }

        let start = self.cursor;
        let (cell, consumed) = SSTableCell::decode_from(&self.data[start..]).ok()?;

        let key_start = start + consumed;
        let key_end = key_start + cell.key_len as usize;
        if key_end > self.data.len() {
            self.cursor = self.data.len();
            return None;
        }
        let key = self.data[key_start..key_end].to_vec();

        let value_end = key_end + cell.value_len as usize;
        if value_end > self.data.len() {
            self.cursor = self.data.len();
            return None;
        }
        let value = self.data[key_end..value_end].to_vec();

        self.cursor = value_end;

        Some(BlockEntry {
            key,
            value,
            is_delete: cell.is_delete,
            lsn: cell.lsn,
            timestamp: cell.timestamp,
        })
    }
}

impl Iterator for BlockIterator {
    type Item = BlockEntry;

    fn next(&mut self) -> Option<Self::Item> {
        self.next_entry()
    }
}

/// Merged forward scan over a single SSTable's point entries and range
/// tombstones within `[start_key, end_key]`.
pub struct ScanIterator<'a> {
    sstable: &'a SSTable,
    block_iter: BlockIterator,
    start_key: Vec<u8>,
    end_key: Vec<u8>,
    pending_range_idx: usize,
    next_point: Option<Record>,
    next_range: Option<Record>,
}

impl<'a> ScanIterator<'a> {
    /// Creates a new scan iterator over `sstable`, positioned at `start_key`.
    pub fn new(
        sstable: &'a SSTable,
        start_key: Vec<u8>,
        end_key: Vec<u8>,
    ) -> Result<Self, SSTableError> {
        let start_offset = sstable.sparse_offset_for_key(&start_key).unwrap_or(0);
        let mut block_iter = BlockIterator::new_at(sstable.data.clone(), start_offset);
        block_iter.seek_to(&start_key);

        let mut iter = Self {
            sstable,
            block_iter,
            start_key,
            end_key,
            pending_range_idx: 0,
            next_point: None,
            next_range: None,
        };
        iter.fill_point();
        iter.fill_range();
        Ok(iter)
    }

    fn fill_point(&mut self) {
        self.next_point = None;
        while let Some(entry) = self.block_iter.next_entry() {
            if entry.key.as_slice() > self.end_key.as_slice() {
                break;
            }
            let record = if entry.is_delete {
                Record::Delete {
                    key: entry.key,
                    lsn: entry.lsn,
                    timestamp: entry.timestamp,
                }
            } else {
                Record::Put {
                    key: entry.key,
                    value: entry.value,
                    lsn: entry.lsn,
                    timestamp: entry.timestamp,
                }
            };
            self.next_point = Some(record);
            break;
        }
    }

    /// Advances to the next range tombstone overlapping `[start_key, end_key]`.
    ///
    /// The tombstone itself keeps its own `[start, end)` semantics; only the
    /// scan's end bound is inclusive, so the overlap test compares the
    /// tombstone's start against `end_key` directly rather than strictly.
    fn fill_range(&mut self) {
        self.next_range = None;
        while self.pending_range_idx < self.sstable.range_deletes.data.len() {
            let rd = &self.sstable.range_deletes.data[self.pending_range_idx];
            self.pending_range_idx += 1;

            let overlaps = rd.start_key.as_slice() <= self.end_key.as_slice()
                && rd.end_key.as_slice() > self.start_key.as_slice();
            if !overlaps {
                continue;
            }

            self.next_range = Some(Record::RangeDelete {
                start: rd.start_key.clone(),
                end: rd.end_key.clone(),
                lsn: rd.lsn,
                timestamp: rd.timestamp,
            });
            break;
        }
    }
}

impl Iterator for ScanIterator<'_> {
    type Item = Record;

    fn next(&mut self) -> Option<Self::Item> {
        match (self.next_point.take(), self.next_range.take()) {
            (None, None) => None,
            (Some(p), None) => {
                self.fill_point();
                Some(p)
            }
            (None, Some(r)) => {
                self.fill_range();
                Some(r)
            }
            (Some(p), Some(r)) => {
                if r.key().cmp(p.key()).then_with(|| p.lsn().cmp(&r.lsn())).is_le() {
                    self.next_point = Some(p);
                    self.fill_range();
                    Some(r)
                } else {
                    self.next_range = Some(r);
                    self.fill_point();
                    Some(p)
                }
            }
        }
    }
}
