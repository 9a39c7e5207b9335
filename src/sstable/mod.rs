//! Sorted String Table (SSTable) Module
//!
//! This module implements an **immutable**, **disk-backed** sorted string
//! table suitable for embedded databases and key-value storage engines.
//! It provides **range tombstones**, **sidecar bloom filter** point lookups,
//! and strict **LSN ordering** for crash-safe reads and merges.
//!
//! ## Design Overview
//!
//! Each SSTable holds its sorted point entries in a single data block
//! (optionally gzip-compressed) plus a sparse index sampling every Nth
//! logical entry. This keeps the format simple: one seek, one decompress,
//! then a linear scan bounded by the sparse interval. Updates (including
//! deletes) are represented as new entries with higher **LSN**, never by
//! timestamp — two mutations can never legitimately share an LSN, so LSN
//! alone totally orders versions.
//!
//! **Point deletes** and **range tombstones** are stored as special entries
//! to allow fast pruning during reads and merges. A bloom filter is
//! maintained per SSTable as a **sidecar file** (not embedded) for quick
//! existence checks before touching the data block.
//!
//! Data is serialized using a custom [`encoding`] module with **fixed
//! integer encoding**, and block-level CRC32 checksums ensure corruption
//! detection.
//!
//! # On-disk layout
//!
//! ```text
//! [HEADER_BYTES]
//! [DATA_BLOCK_LEN_LE][DATA_BLOCK_BYTES][DATA_BLOCK_CRC32_LE]
//! [RANGE_DELETES_LEN_LE][RANGE_DELETES_BYTES][RANGE_DELETES_CRC32_LE]
//! [PROPERTIES_LEN_LE][PROPERTIES_BYTES][PROPERTIES_CRC32_LE]
//! [METAINDEX_LEN_LE][METAINDEX_BYTES][METAINDEX_CRC32_LE]
//! [INDEX_LEN_LE][INDEX_BYTES][INDEX_CRC32_LE]
//! [FOOTER_BYTES]
//! ```
//!
//! The matching bloom filter lives alongside, under `blooms/`, with the
//! same basename and a `.bloom` extension — see [`bloom_path_for`].
//!
//! - **Header** — `SSTableHeader` with magic/version/compression/CRC32.
//! - **Data block** — single (optionally compressed) block of serialized
//!   `SSTableCell` entries (key-value or tombstone), sorted by key.
//! - **Range deletes block** — serialized `SSTableRangeTombstoneCell` entries.
//! - **Properties block** — table metadata: min/max key, LSNs, timestamps,
//!   record counts.
//! - **Metaindex block** — directory of the properties and range-delete
//!   blocks.
//! - **Index block** — sparse directory of sampled keys to byte offsets
//!   within the (decompressed) data block.
//! - **Footer** — offsets/sizes of the data, metaindex and index blocks,
//!   plus a CRC32 checksum.
//!
//! # Sub-modules
//!
//! - [`builder`] — [`SstWriter`] for building SSTables from sorted streams.
//! - [`iterator`] — [`BlockIterator`], [`BlockEntry`], and [`ScanIterator`] for reading.
//!
//! # Concurrency model
//!
//! - SSTables are **immutable**, so reads are lock-free and thread-safe.
//! - No writes occur in-place; updates are appended via **new SSTables**.
//!
//! # Guarantees
//!
//! - **Immutability:** Once written, an SSTable is never modified.
//! - **Range deletes:** Efficient representation and merging of point/range deletions.
//! - **Integrity:** Each block and footer contains CRC32 checksums to detect corruption.
//! - **Fast point lookups:** Sidecar bloom filter reduces unnecessary decompression/scans.
//! - **Crash recovery:** Files are written atomically using temporary paths,
//!   rename-on-success, and a parent-directory fsync so the rename itself
//!   is durable.

// ------------------------------------------------------------------------------------------------
// Sub-modules
// ------------------------------------------------------------------------------------------------

pub mod builder;
pub mod iterator;

#[cfg(test)]
mod tests;

// ------------------------------------------------------------------------------------------------
// Re-exports — public API surface
// ------------------------------------------------------------------------------------------------

#[allow(unused_imports)] // public API surface for downstream consumers
pub use crate::engine::{PointEntry, RangeTombstone, Record};
pub use builder::SstWriter;
#[allow(unused_imports)] // public API surface for downstream consumers
pub use iterator::{BlockEntry, BlockIterator, ScanIterator};

// ------------------------------------------------------------------------------------------------
// Includes
// ------------------------------------------------------------------------------------------------

use std::{
    fs::File,
    io::{self, Read},
    path::{Path, PathBuf},
};

use crate::bloom::BloomFilter;
use crate::encoding::{self, EncodingError};
use crc32fast::Hasher as Crc32;
use flate2::read::GzDecoder;
use memmap2::Mmap;
use thiserror::Error;

// ------------------------------------------------------------------------------------------------
// Constants
// ------------------------------------------------------------------------------------------------

pub(crate) const SST_HDR_MAGIC: [u8; 4] = *b"SST0";
pub(crate) const SST_HDR_VERSION: u32 = 1;
const SST_HDR_SIZE: usize = 4 + 4 + 1 + 4; // magic + version + compression + header_crc
pub(crate) const SST_FOOTER_SIZE: usize = 16 + 16 + 16 + 8 + 4; // data + metaindex + index handles, total size, crc
const SST_DATA_BLOCK_LEN_SIZE: usize = 4;
const SST_DATA_BLOCK_CHECKSUM_SIZE: usize = 4;

/// Data-block compression applied to the single SSTable data block.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Compression {
    /// No compression; the data block is the raw concatenation of cells.
    #[default]
    None,
    /// Gzip (via [`flate2`]) over the concatenation of cells.
    Gzip,
}

impl Compression {
    fn tag(self) -> u8 {
        match self {
            Compression::None => 0,
            Compression::Gzip => 1,
        }
    }

    fn from_tag(tag: u8) -> Result<Self, SSTableError> {
        match tag {
            0 => Ok(Compression::None),
            1 => Ok(Compression::Gzip),
            other => Err(SSTableError::Internal(format!(
                "unknown compression tag {other}"
            ))),
        }
    }
}

/// Returns the sidecar bloom filter path for a given SSTable path, by
/// convention swapping the `sstables/` path component for `blooms/` and the
/// `.sst` extension for `.bloom`.
pub fn bloom_path_for(sst_path: &Path) -> PathBuf {
    let file_stem = sst_path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();

    let blooms_dir = match sst_path.parent().and_then(Path::parent) {
        Some(root) => root.join("blooms"),
        None => PathBuf::from("blooms"),
    };

    blooms_dir.join(format!("{file_stem}.bloom"))
}

// ------------------------------------------------------------------------------------------------
// Error Types
// ------------------------------------------------------------------------------------------------

/// Errors returned by SSTable operations (read, write, build).
#[derive(Debug, Error)]
pub enum SSTableError {
    /// Underlying I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Encoding / decoding error.
    #[error("Encoding error: {0}")]
    Encoding(#[from] EncodingError),

    /// Internal invariant violation or poisoned lock.
    #[error("Internal error: {0}")]
    Internal(String),

    /// Checksum mismatch.
    #[error("Checksum mismatch")]
    ChecksumMismatch,
}

// ------------------------------------------------------------------------------------------------
// On-disk format structures
// ------------------------------------------------------------------------------------------------

/// SSTable file header, written at the beginning of the SSTable.
#[derive(Default)]
pub(crate) struct SSTableHeader {
    /// Magic bytes to identify SSTable format (`b"SST0"`).
    magic: [u8; 4],

    /// SSTable format version.
    version: u32,

    /// Compression applied to the data block (`0` = none, `1` = gzip).
    compression: u8,

    /// CRC32 checksum of the header (excluding this field).
    header_crc: u32,
}

/// Represents the single data block in the SSTable, which contains
/// serialized key-value entries (optionally compressed).
pub(crate) struct SSTableDataBlock {
    /// Raw serialized (and possibly compressed) block data.
    pub(crate) data: Vec<u8>,
}

/// Represents a block containing range tombstones.
pub(crate) struct SSTableRangeTombstoneDataBlock {
    /// List of serialized range tombstone cells.
    pub(crate) data: Vec<SSTableRangeTombstoneCell>,
}

/// Metadata block containing SSTable-level properties and statistics.
pub struct SSTablePropertiesBlock {
    /// Creation timestamp (UNIX epoch nanos).
    pub creation_timestamp: u64,

    /// Total number of point records in the SSTable (puts + point deletes).
    pub record_count: u64,

    /// Number of point deletions.
    pub tombstone_count: u64,

    /// Number of range tombstones.
    pub range_tombstones_count: u64,

    /// Minimum LSN present in this SSTable.
    pub min_lsn: u64,

    /// Maximum LSN present in this SSTable.
    pub max_lsn: u64,

    /// Minimum timestamp in this SSTable. Diagnostic only.
    pub min_timestamp: u64,

    /// Maximum timestamp in this SSTable. Diagnostic only.
    pub max_timestamp: u64,

    /// Minimum key in the SSTable.
    pub min_key: Vec<u8>,

    /// Maximum key in the SSTable.
    pub max_key: Vec<u8>,
}

/// Sparse index entry: a sampled key and its byte offset within the
/// decompressed data block.
pub(crate) struct SSTableIndexEntry {
    /// Sampled key (every Nth logical entry, plus always the first).
    pub(crate) separator_key: Vec<u8>,

    /// Byte offset of this entry's cell within the decompressed data block.
    pub(crate) offset: u64,
}

/// SSTable footer, stored at the very end of the file.
pub(crate) struct SSTableFooter {
    /// Handle of the single data block.
    pub(crate) data_block: BlockHandle,

    /// Handle of the metaindex block (properties, range deletes).
    pub(crate) metaindex: BlockHandle,

    /// Handle of the sparse index block.
    pub(crate) index: BlockHandle,

    /// Total size of the SSTable file, including this footer.
    pub(crate) total_file_size: u64,

    /// CRC32 checksum computed over the footer fields except this one.
    pub(crate) footer_crc32: u32,
}

/// Represents a single key-value entry (or tombstone) in the data block.
pub(crate) struct SSTableCell {
    /// Length of the key in bytes.
    pub(crate) key_len: u32,

    /// Length of the value in bytes (0 if deleted).
    pub(crate) value_len: u32,

    /// Timestamp of the operation. Diagnostic only.
    pub(crate) timestamp: u64,

    /// Whether this entry represents a deletion.
    pub(crate) is_delete: bool,

    /// Log Sequence Number for versioning.
    pub(crate) lsn: u64,
}

/// Represents a range tombstone marking deletion of keys in `[start_key, end_key)`.
pub(crate) struct SSTableRangeTombstoneCell {
    /// Start key of the deleted range (inclusive).
    pub(crate) start_key: Vec<u8>,

    /// End key of the deleted range (exclusive).
    pub(crate) end_key: Vec<u8>,

    /// Timestamp of the deletion. Diagnostic only.
    pub(crate) timestamp: u64,

    /// LSN of the deletion.
    pub(crate) lsn: u64,
}

/// Handle to a block in the SSTable file, specifying its offset and size.
#[derive(Debug, Clone, Copy)]
pub(crate) struct BlockHandle {
    /// Offset of the block in the SSTable file.
    pub(crate) offset: u64,

    /// Size of the block in bytes, including length prefix and checksum.
    pub(crate) size: u64,
}

/// Represents a single entry in the metaindex block.
#[derive(Debug)]
pub(crate) struct MetaIndexEntry {
    /// Name of the block (`"meta.properties"`, `"meta.range_deletes"`).
    pub(crate) name: String,

    /// Handle pointing to the block location.
    pub(crate) handle: BlockHandle,
}

// ------------------------------------------------------------------------------------------------
// Encoding implementations
// ------------------------------------------------------------------------------------------------

impl encoding::Encode for BlockHandle {
    fn encode_to(&self, buf: &mut Vec<u8>) -> Result<(), EncodingError> {
        encoding::Encode::encode_to(&self.offset, buf)?;
        encoding::Encode::encode_to(&self.size, buf)?;
        Ok(())
    }
}

impl encoding::Decode for BlockHandle {
    fn decode_from(buf: &[u8]) -> Result<(Self, usize), EncodingError> {
        let mut off = 0;
        let (offset, n) = u64::decode_from(&buf[off..])?;
        off += n;
        let (size, n) = u64::decode_from(&buf[off..])?;
        off += n;
        Ok((Self { offset, size }, off))
    }
}

impl encoding::Encode for SSTableHeader {
    fn encode_to(&self, buf: &mut Vec<u8>) -> Result<(), EncodingError> {
        encoding::Encode::encode_to(&self.magic, buf)?;
        encoding::Encode::encode_to(&self.version, buf)?;
        encoding::Encode::encode_to(&self.compression, buf)?;
        encoding::Encode::encode_to(&self.header_crc, buf)?;
        Ok(())
    }
}

impl encoding::Decode for SSTableHeader {
    fn decode_from(buf: &[u8]) -> Result<(Self, usize), EncodingError> {
        let mut off = 0;
        let (magic, n) = <[u8; 4]>::decode_from(&buf[off..])?;
        off += n;
        let (version, n) = u32::decode_from(&buf[off..])?;
        off += n;
        let (compression, n) = u8::decode_from(&buf[off..])?;
        off += n;
        let (header_crc, n) = u32::decode_from(&buf[off..])?;
        off += n;
        Ok((
            Self {
                magic,
                version,
                compression,
                header_crc,
            },
            off,
        ))
    }
}

impl encoding::Encode for SSTableDataBlock {
    fn encode_to(&self, buf: &mut Vec<u8>) -> Result<(), EncodingError> {
        encoding::Encode::encode_to(&self.data, buf)?;
        Ok(())
    }
}

impl encoding::Decode for SSTableDataBlock {
    fn decode_from(buf: &[u8]) -> Result<(Self, usize), EncodingError> {
        let (data, n) = <Vec<u8>>::decode_from(buf)?;
        Ok((Self { data }, n))
    }
}

impl encoding::Encode for SSTableCell {
    fn encode_to(&self, buf: &mut Vec<u8>) -> Result<(), EncodingError> {
        encoding::Encode::encode_to(&self.key_len, buf)?;
        encoding::Encode::encode_to(&self.value_len, buf)?;
        encoding::Encode::encode_to(&self.timestamp, buf)?;
        encoding::Encode::encode_to(&self.is_delete, buf)?;
        encoding::Encode::encode_to(&self.lsn, buf)?;
        Ok(())
    }
}

impl encoding::Decode for SSTableCell {
    fn decode_from(buf: &[u8]) -> Result<(Self, usize), EncodingError> {
        let mut off = 0;
        let (key_len, n) = u32::decode_from(&buf[off..])?;
        off += n;
        let (value_len, n) = u32::decode_from(&buf[off..])?;
        off += n;
        let (timestamp, n) = u64::decode_from(&buf[off..])?;
        off += n;
        let (is_delete, n) = bool::decode_from(&buf[off..])?;
        off += n;
        let (lsn, n) = u64::decode_from(&buf[off..])?;
        off += n;
        Ok((
            Self {
                key_len,
                value_len,
                timestamp,
                is_delete,
                lsn,
            },
            off,
        ))
    }
}

impl encoding::Encode for SSTableRangeTombstoneCell {
    fn encode_to(&self, buf: &mut Vec<u8>) -> Result<(), EncodingError> {
        encoding::Encode::encode_to(&self.start_key, buf)?;
        encoding::Encode::encode_to(&self.end_key, buf)?;
        encoding::Encode::encode_to(&self.timestamp, buf)?;
        encoding::Encode::encode_to(&self.lsn, buf)?;
        Ok(())
    }
}

impl encoding::Decode for SSTableRangeTombstoneCell {
    fn decode_from(buf: &[u8]) -> Result<(Self, usize), EncodingError> {
        let mut off = 0;
        let (start_key, n) = <Vec<u8>>::decode_from(&buf[off..])?;
        off += n;
        let (end_key, n) = <Vec<u8>>::decode_from(&buf[off..])?;
        off += n;
        let (timestamp, n) = u64::decode_from(&buf[off..])?;
        off += n;
        let (lsn, n) = u64::decode_from(&buf[off..])?;
        off += n;
        Ok((
            Self {
                start_key,
                end_key,
                timestamp,
                lsn,
            },
            off,
        ))
    }
}

impl encoding::Encode for SSTableRangeTombstoneDataBlock {
    fn encode_to(&self, buf: &mut Vec<u8>) -> Result<(), EncodingError> {
        encoding::encode_vec(&self.data, buf)?;
        Ok(())
    }
}

impl encoding::Decode for SSTableRangeTombstoneDataBlock {
    fn decode_from(buf: &[u8]) -> Result<(Self, usize), EncodingError> {
        let (data, n) = encoding::decode_vec::<SSTableRangeTombstoneCell>(buf)?;
        Ok((Self { data }, n))
    }
}

impl encoding::Encode for SSTablePropertiesBlock {
    fn encode_to(&self, buf: &mut Vec<u8>) -> Result<(), EncodingError> {
        encoding::Encode::encode_to(&self.creation_timestamp, buf)?;
        encoding::Encode::encode_to(&self.record_count, buf)?;
        encoding::Encode::encode_to(&self.tombstone_count, buf)?;
        encoding::Encode::encode_to(&self.range_tombstones_count, buf)?;
        encoding::Encode::encode_to(&self.min_lsn, buf)?;
        encoding::Encode::encode_to(&self.max_lsn, buf)?;
        encoding::Encode::encode_to(&self.min_timestamp, buf)?;
        encoding::Encode::encode_to(&self.max_timestamp, buf)?;
        encoding::Encode::encode_to(&self.min_key, buf)?;
        encoding::Encode::encode_to(&self.max_key, buf)?;
        Ok(())
    }
}

impl encoding::Decode for SSTablePropertiesBlock {
    fn decode_from(buf: &[u8]) -> Result<(Self, usize), EncodingError> {
        let mut off = 0;
        let (creation_timestamp, n) = u64::decode_from(&buf[off..])?;
        off += n;
        let (record_count, n) = u64::decode_from(&buf[off..])?;
        off += n;
        let (tombstone_count, n) = u64::decode_from(&buf[off..])?;
        off += n;
        let (range_tombstones_count, n) = u64::decode_from(&buf[off..])?;
        off += n;
        let (min_lsn, n) = u64::decode_from(&buf[off..])?;
        off += n;
        let (max_lsn, n) = u64::decode_from(&buf[off..])?;
        off += n;
        let (min_timestamp, n) = u64::decode_from(&buf[off..])?;
        off += n;
        let (max_timestamp, n) = u64::decode_from(&buf[off..])?;
        off += n;
        let (min_key, n) = <Vec<u8>>::decode_from(&buf[off..])?;
        off += n;
        let (max_key, n) = <Vec<u8>>::decode_from(&buf[off..])?;
        off += n;
        Ok((
            Self {
                creation_timestamp,
                record_count,
                tombstone_count,
                range_tombstones_count,
                min_lsn,
                max_lsn,
                min_timestamp,
                max_timestamp,
                min_key,
                max_key,
            },
            off,
        ))
    }
}

impl encoding::Encode for SSTableIndexEntry {
    fn encode_to(&self, buf: &mut Vec<u8>) -> Result<(), EncodingError> {
        encoding::Encode::encode_to(&self.separator_key, buf)?;
        encoding::Encode::encode_to(&self.offset, buf)?;
        Ok(())
    }
}

impl encoding::Decode for SSTableIndexEntry {
    fn decode_from(buf: &[u8]) -> Result<(Self, usize), EncodingError> {
        let mut off = 0;
        let (separator_key, n) = <Vec<u8>>::decode_from(&buf[off..])?;
        off += n;
        let (offset, n) = u64::decode_from(&buf[off..])?;
        off += n;
        Ok((
            Self {
                separator_key,
                offset,
            },
            off,
        ))
    }
}

impl encoding::Encode for MetaIndexEntry {
    fn encode_to(&self, buf: &mut Vec<u8>) -> Result<(), EncodingError> {
        encoding::Encode::encode_to(&self.name, buf)?;
        encoding::Encode::encode_to(&self.handle, buf)?;
        Ok(())
    }
}

impl encoding::Decode for MetaIndexEntry {
    fn decode_from(buf: &[u8]) -> Result<(Self, usize), EncodingError> {
        let mut off = 0;
        let (name, n) = String::decode_from(&buf[off..])?;
        off += n;
        let (handle, n) = BlockHandle::decode_from(&buf[off..])?;
        off += n;
        Ok((Self { name, handle }, off))
    }
}

impl encoding::Encode for SSTableFooter {
    fn encode_to(&self, buf: &mut Vec<u8>) -> Result<(), EncodingError> {
        encoding::Encode::encode_to(&self.data_block, buf)?;
        encoding::Encode::encode_to(&self.metaindex, buf)?;
        encoding::Encode::encode_to(&self.index, buf)?;
        encoding::Encode::encode_to(&self.total_file_size, buf)?;
        encoding::Encode::encode_to(&self.footer_crc32, buf)?;
        Ok(())
    }
}

impl encoding::Decode for SSTableFooter {
    fn decode_from(buf: &[u8]) -> Result<(Self, usize), EncodingError> {
        let mut off = 0;
        let (data_block, n) = BlockHandle::decode_from(&buf[off..])?;
        off += n;
        let (metaindex, n) = BlockHandle::decode_from(&buf[off..])?;
        off += n;
        let (index, n) = BlockHandle::decode_from(&buf[off..])?;
        off += n;
        let (total_file_size, n) = u64::decode_from(&buf[off..])?;
        off += n;
        let (footer_crc32, n) = u32::decode_from(&buf[off..])?;
        off += n;
        Ok((
            Self {
                data_block,
                metaindex,
                index,
                total_file_size,
                footer_crc32,
            },
            off,
        ))
    }
}

// ------------------------------------------------------------------------------------------------
// GetResult
// ------------------------------------------------------------------------------------------------

/// Result of a single key lookup in an SSTable.
#[derive(Debug, PartialEq, Clone)]
pub enum GetResult {
    /// A value stored in this SST.
    Put {
        /// Stored value.
        value: Vec<u8>,
        /// LSN of this version.
        lsn: u64,
        /// Timestamp of this version (diagnostic only).
        timestamp: u64,
    },

    /// A point delete for this key.
    Delete {
        /// LSN of the delete.
        lsn: u64,
        /// Timestamp of the delete (diagnostic only).
        timestamp: u64,
    },

    /// The key falls inside a range deletion.
    RangeDelete {
        /// LSN of the range tombstone.
        lsn: u64,
        /// Timestamp of the range tombstone (diagnostic only).
        timestamp: u64,
    },

    /// This SST has no information about the key.
    NotFound,
}

impl GetResult {
    /// Returns the LSN associated with this get result.
    pub fn lsn(&self) -> u64 {
        match self {
            Self::Put { lsn, .. } => *lsn,
            Self::Delete { lsn, .. } => *lsn,
            Self::RangeDelete { lsn, .. } => *lsn,
            Self::NotFound => 0,
        }
    }

    /// Returns the timestamp associated with this get result. Diagnostic
    /// only — never used to break ordering ties.
    pub fn timestamp(&self) -> u64 {
        match self {
            Self::Put { timestamp, .. } => *timestamp,
            Self::Delete { timestamp, .. } => *timestamp,
            Self::RangeDelete { timestamp, .. } => *timestamp,
            Self::NotFound => 0,
        }
    }
}

// ------------------------------------------------------------------------------------------------
// SSTable — immutable reader
// ------------------------------------------------------------------------------------------------

/// A memory-mapped, immutable **Sorted String Table (SSTable)**.
pub struct SSTable {
    /// Unique identifier assigned by the engine (from the manifest).
    /// Set to 0 by `SSTable::open()` — the engine sets the correct value after loading.
    pub id: u64,

    /// Filesystem path this table was opened from.
    pub path: PathBuf,

    /// Memory-mapped file containing the full SSTable bytes.
    pub mmap: Mmap,

    /// Parsed header block containing magic/version/compression information.
    pub(crate) header: SSTableHeader,

    /// Decompressed data block payload (the concatenation of all cells),
    /// materialized once at open time.
    pub(crate) data: Vec<u8>,

    /// Sidecar bloom filter, if the `.bloom` file was present alongside
    /// this table. `None` means lookups cannot be excluded by bloom alone.
    pub(crate) bloom: Option<BloomFilter>,

    /// Properties block with statistics and metadata.
    pub properties: SSTablePropertiesBlock,

    /// Range delete tombstone block.
    pub(crate) range_deletes: SSTableRangeTombstoneDataBlock,

    /// Sparse index entries mapping sampled keys to byte offsets.
    pub(crate) index: Vec<SSTableIndexEntry>,

    /// Footer containing block handles and file integrity data.
    pub(crate) footer: SSTableFooter,
}

impl SSTable {
    /// Returns the on-disk file size of this SSTable in bytes.
    pub fn file_size(&self) -> u64 {
        self.footer.total_file_size
    }

    /// Checks whether `key` *might* exist in this SSTable according to the
    /// sidecar bloom filter.
    ///
    /// Returns `true` if the bloom says "maybe present" or no bloom sidecar
    /// was found. Returns `false` only when the bloom definitively says
    /// "not present".
    pub fn bloom_may_contain(&self, key: &[u8]) -> bool {
        self.bloom.as_ref().is_none_or(|b| b.may_contain(key))
    }

    /// Returns an iterator over the range tombstones stored in this SSTable.
    pub fn range_tombstone_iter(&self) -> impl Iterator<Item = crate::engine::RangeTombstone> + '_ {
        self.range_deletes
            .data
            .iter()
            .map(|rd| crate::engine::RangeTombstone {
                start: rd.start_key.clone(),
                end: rd.end_key.clone(),
                lsn: rd.lsn,
                timestamp: rd.timestamp,
            })
    }

    /// Opens an SSTable from disk, verifies its integrity, and loads all
    /// metadata plus its sidecar bloom filter (if present).
    ///
    /// # Pipeline
    ///
    /// 1. Open and mmap the file.
    /// 2. Decode and verify the header CRC, magic, and version.
    /// 3. Decode and verify the footer CRC.
    /// 4. Load the metaindex block (locates properties/range-delete blocks).
    /// 5. Load the data block and decompress it according to the header's
    ///    compression tag.
    /// 6. Load the properties block (required), range-delete block
    ///    (optional), and sparse index (required).
    /// 7. Load the sidecar `.bloom` file, if present.
    ///
    /// # Errors
    ///
    /// - [`SSTableError::ChecksumMismatch`] if header, footer, or any block
    ///   checksum fails.
    /// - [`SSTableError::Internal`] for malformed blocks, mismatched
    ///   magic/version, missing properties block, or out-of-bounds reads.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, SSTableError> {
        let path = path.as_ref();
        let file = File::open(path)?;

        // SAFETY: the file is never mutated after creation (SSTables are
        // immutable once written) and this mapping is read-only.
        let mmap = unsafe { Mmap::map(&file)? };

        let file_len = mmap.len();
        if file_len < SST_FOOTER_SIZE {
            return Err(SSTableError::Internal("File too small".into()));
        }

        let (mut header, _) = encoding::decode_from_slice::<SSTableHeader>(&mmap[..SST_HDR_SIZE])?;
        let header_checksum = header.header_crc;
        header.header_crc = 0;
        let header_bytes = encoding::encode_to_vec(&header)?;
        if crc32(&header_bytes) != header_checksum {
            return Err(SSTableError::ChecksumMismatch);
        }
        header.header_crc = header_checksum;

        if header.magic != SST_HDR_MAGIC {
            return Err(SSTableError::Internal(
                "SSTable header magic mismatch".into(),
            ));
        }
        if header.version != SST_HDR_VERSION {
            return Err(SSTableError::Internal(
                "SSTable header version mismatch".into(),
            ));
        }
        let compression = Compression::from_tag(header.compression)?;

        let footer_start = file_len - SST_FOOTER_SIZE;
        let (mut footer, _) = encoding::decode_from_slice::<SSTableFooter>(&mmap[footer_start..])?;
        let footer_checksum = footer.footer_crc32;
        footer.footer_crc32 = 0;
        let footer_bytes = encoding::encode_to_vec(&footer)?;
        if crc32(&footer_bytes) != footer_checksum {
            return Err(SSTableError::ChecksumMismatch);
        }
        footer.footer_crc32 = footer_checksum;

        let metaindex_data = Self::read_block_bytes(&mmap, &footer.metaindex)?;
        let (meta_entries, _) = encoding::decode_vec::<MetaIndexEntry>(&metaindex_data)?;

        let mut properties_handle = None;
        let mut range_deletes_handle = None;
        for entry in meta_entries {
            match entry.name.as_str() {
                "meta.properties" => properties_handle = Some(entry.handle),
                "meta.range_deletes" => range_deletes_handle = Some(entry.handle),
                other => {
                    return Err(SSTableError::Internal(format!(
                        "unrecognized metaindex entry {other}"
                    )));
                }
            }
        }

        let data_block_bytes = Self::read_block_bytes(&mmap, &footer.data_block)?;
        let (raw_block, _) = encoding::decode_from_slice::<SSTableDataBlock>(&data_block_bytes)?;
        let data = match compression {
            Compression::None => raw_block.data,
            Compression::Gzip => {
                let mut decoder = GzDecoder::new(raw_block.data.as_slice());
                let mut out = Vec::new();
                decoder.read_to_end(&mut out)?;
                out
            }
        };

        let properties = match properties_handle {
            Some(pb) => {
                let pbytes = Self::read_block_bytes(&mmap, &pb)?;
                encoding::decode_from_slice::<SSTablePropertiesBlock>(&pbytes)?.0
            }
            None => return Err(SSTableError::Internal("SSTable missing properties".into())),
        };

        let range_deletes = match range_deletes_handle {
            Some(rh) => {
                let rbytes = Self::read_block_bytes(&mmap, &rh)?;
                let (ranges, _) = encoding::decode_vec::<SSTableRangeTombstoneCell>(&rbytes)?;
                SSTableRangeTombstoneDataBlock { data: ranges }
            }
            None => SSTableRangeTombstoneDataBlock { data: Vec::new() },
        };

        let index_bytes = Self::read_block_bytes(&mmap, &footer.index)?;
        let (index_entries, _) = encoding::decode_vec::<SSTableIndexEntry>(&index_bytes)?;

        let bloom = Self::load_bloom_sidecar(path)?;

        Ok(Self {
            id: 0,
            path: path.to_path_buf(),
            mmap,
            header,
            data,
            bloom,
            properties,
            range_deletes,
            index: index_entries,
            footer,
        })
    }

    /// Loads the sidecar `.bloom` file, if present. A missing sidecar is
    /// not an error — `bloom_may_contain` simply degrades to "always maybe".
    fn load_bloom_sidecar(sst_path: &Path) -> Result<Option<BloomFilter>, SSTableError> {
        let bloom_path = bloom_path_for(sst_path);
        match File::open(&bloom_path) {
            Ok(mut f) => Ok(Some(BloomFilter::read_from(&mut f)?)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(SSTableError::Io(e)),
        }
    }

    /// Performs a **single-SST lookup** of a key.
    ///
    /// Returns the raw result from this SSTable alone — higher-level LSM
    /// layers apply merging across tables.
    ///
    /// # Lookup pipeline
    ///
    /// 1. Check range tombstones covering `key`.
    /// 2. Bloom filter check (point keys only).
    /// 3. Binary search the sparse index for a starting offset.
    /// 4. Linear scan the data block from that offset.
    /// 5. Merge the point result with any covering range tombstone by LSN.
    ///
    /// # Ordering
    ///
    /// Versions are totally ordered by LSN alone; no tie-break is needed or
    /// performed on timestamp, since LSNs are never shared between distinct
    /// mutations.
    pub fn get(&self, key: &[u8]) -> Result<GetResult, SSTableError> {
        let range_info = self.covering_range_for_key(key);

        if !self.bloom_may_contain(key) {
            return Ok(match range_info {
                Some(lsn) => GetResult::RangeDelete {
                    lsn,
                    timestamp: self.range_timestamp_for_lsn(lsn),
                },
                None => GetResult::NotFound,
            });
        }

        if self.index.is_empty() {
            return Ok(match range_info {
                Some(lsn) => GetResult::RangeDelete {
                    lsn,
                    timestamp: self.range_timestamp_for_lsn(lsn),
                },
                None => GetResult::NotFound,
            });
        }

        let start_offset = self.sparse_offset_for_key(key);
        let mut latest: Option<GetResult> = None;

        if let Some(offset) = start_offset {
            let mut iter = BlockIterator::new_at(self.data.clone(), offset);
            for item in &mut iter {
                if item.key.as_slice() > key {
                    break;
                }
                if item.key.as_slice() != key {
                    continue;
                }

                let candidate = if item.is_delete {
                    GetResult::Delete {
                        lsn: item.lsn,
                        timestamp: item.timestamp,
                    }
                } else {
                    GetResult::Put {
                        value: item.value,
                        lsn: item.lsn,
                        timestamp: item.timestamp,
                    }
                };

                latest = Some(match latest {
                    Some(existing) if existing.lsn() >= candidate.lsn() => existing,
                    _ => candidate,
                });
            }
        }

        match (latest, range_info) {
            (None, None) => Ok(GetResult::NotFound),
            (Some(r), None) => Ok(r),
            (None, Some(lsn)) => Ok(GetResult::RangeDelete {
                lsn,
                timestamp: self.range_timestamp_for_lsn(lsn),
            }),
            (Some(point), Some(r_lsn)) => {
                if r_lsn > point.lsn() {
                    Ok(GetResult::RangeDelete {
                        lsn: r_lsn,
                        timestamp: self.range_timestamp_for_lsn(r_lsn),
                    })
                } else {
                    Ok(point)
                }
            }
        }
    }

    /// Returns a range-scan iterator over this SSTable.
    ///
    /// The iterator yields **raw entries** (Put/Delete/RangeDelete) in
    /// `(key ASC, LSN DESC)` order. Higher layers of the LSM tree (merging
    /// iterators) are responsible for de-duplicating versions and
    /// reconciling deletes.
    pub fn scan(
        &self,
        start_key: &[u8],
        end_key: &[u8],
    ) -> Result<impl Iterator<Item = Record> + use<'_>, SSTableError> {
        ScanIterator::new(self, start_key.to_vec(), end_key.to_vec())
    }

    /// Reads a block referenced by a [`BlockHandle`] from the mmap and verifies
    /// its checksum.
    pub(crate) fn read_block_bytes(
        mmap: &Mmap,
        handle: &BlockHandle,
    ) -> Result<Vec<u8>, SSTableError> {
        let start = usize::try_from(handle.offset)
            .map_err(|_| SSTableError::Internal("block offset exceeds addressable range".into()))?;
        let size = usize::try_from(handle.size)
            .map_err(|_| SSTableError::Internal("block size exceeds addressable range".into()))?;

        if start + size > mmap.len() {
            return Err(SSTableError::Internal("Block out of range".into()));
        }

        let mut cursor = start;

        let len_bytes: [u8; SST_DATA_BLOCK_LEN_SIZE] = mmap
            [cursor..cursor + SST_DATA_BLOCK_LEN_SIZE]
            .try_into()
            .map_err(|_| SSTableError::Internal("Short block length".into()))?;
        let content_len = u32::from_le_bytes(len_bytes) as usize;
        cursor += SST_DATA_BLOCK_LEN_SIZE;

        if start + content_len > mmap.len() {
            return Err(SSTableError::Internal("Block out of range".into()));
        }

        let content = &mmap[cursor..cursor + content_len];
        cursor += content_len;

        let checksum_bytes: [u8; SST_DATA_BLOCK_CHECKSUM_SIZE] = mmap
            [cursor..cursor + SST_DATA_BLOCK_CHECKSUM_SIZE]
            .try_into()
            .map_err(|_| SSTableError::Internal("Short checksum".into()))?;
        let stored_checksum = u32::from_le_bytes(checksum_bytes);

        if crc32(content) != stored_checksum {
            return Err(SSTableError::ChecksumMismatch);
        }

        Ok(content.to_vec())
    }

    /// Finds the byte offset to start a linear scan from for `key`, via
    /// binary search over the sparse index's sampled separator keys.
    ///
    /// Returns `None` if `key` is smaller than every sampled key (the table
    /// cannot contain it, since the first logical entry is always sampled).
    pub(crate) fn sparse_offset_for_key(&self, key: &[u8]) -> Option<u64> {
        if self.index.is_empty() {
            return None;
        }
        match self
            .index
            .binary_search_by(|entry| entry.separator_key.as_slice().cmp(key))
        {
            Ok(i) => Some(self.index[i].offset),
            Err(0) => None,
            Err(i) => Some(self.index[i - 1].offset),
        }
    }

    /// Returns the newest (highest LSN) range tombstone that covers `key`, if any.
    fn covering_range_for_key(&self, key: &[u8]) -> Option<u64> {
        self.range_deletes
            .data
            .iter()
            .filter(|rd| key >= rd.start_key.as_slice() && key < rd.end_key.as_slice())
            .map(|rd| rd.lsn)
            .max()
    }

    fn range_timestamp_for_lsn(&self, lsn: u64) -> u64 {
        self.range_deletes
            .data
            .iter()
            .find(|rd| rd.lsn == lsn)
            .map_or(0, |rd| rd.timestamp)
    }
}

fn crc32(bytes: &[u8]) -> u32 {
    let mut hasher = Crc32::new();
    hasher.update(bytes);
    hasher.finalize()
}
