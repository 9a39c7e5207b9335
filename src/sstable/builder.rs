//! SSTable construction from sorted streams of point entries and range tombstones.
//!
//! [`SstWriter`] consumes already-sorted iterators (as produced by a frozen
//! memtable flush or a compaction merge) and writes a single immutable
//! SSTable file plus its sidecar bloom filter. The data block is built as
//! one contiguous buffer, optionally gzip-compressed, with a sparse index
//! sampling every Nth logical entry (plus always the first) so that point
//! lookups can seek close to their target before falling back to a linear
//! scan.
//!
//! Files are written to a `.tmp` path and atomically renamed into place,
//! with a trailing fsync of the parent directory so the rename survives a
//! crash — the same pattern the manifest uses for its snapshot writes.

use std::{
    fs::{self, File},
    io::Write,
    path::Path,
};

use crc32fast::Hasher as Crc32;
use flate2::{write::GzEncoder, Compression as GzCompressionLevel};

use crate::bloom::BloomFilter;
use crate::encoding;
use crate::engine::{PointEntry, RangeTombstone};

use super::{
    BlockHandle, Compression, MetaIndexEntry, SSTableCell, SSTableDataBlock, SSTableError,
    SSTableFooter, SSTableHeader, SSTableIndexEntry, SSTablePropertiesBlock,
    SSTableRangeTombstoneCell, SSTableRangeTombstoneDataBlock, SST_HDR_MAGIC, SST_HDR_VERSION,
    SST_FOOTER_SIZE,
};

/// Default bloom filter false-positive rate, overridable via [`SstWriter::with_bloom_fp_rate`].
pub const SST_BLOOM_FILTER_FALSE_POSITIVE_RATE: f64 = 0.01;

/// Default sparse index sampling interval (every Nth logical entry), overridable
/// via [`SstWriter::with_sparse_index_interval`].
pub const SST_SPARSE_INDEX_INTERVAL: usize = 10;

const SST_HDR_SIZE_ON_DISK: usize = 4 + 4 + 1 + 4;

/// Accumulates min/max statistics while streaming point entries into the builder.
#[derive(Default)]
struct BuildStats {
    record_count: u64,
    tombstone_count: u64,
    min_lsn: u64,
    max_lsn: u64,
    min_timestamp: u64,
    max_timestamp: u64,
    min_key: Option<Vec<u8>>,
    max_key: Option<Vec<u8>>,
}

impl BuildStats {
    fn track(&mut self, key: &[u8], lsn: u64, timestamp: u64, is_delete: bool) {
        if self.record_count == 0 {
            self.min_lsn = lsn;
            self.max_lsn = lsn;
            self.min_timestamp = timestamp;
            self.max_timestamp = timestamp;
        } else {
            self.min_lsn = self.min_lsn.min(lsn);
            self.max_lsn = self.max_lsn.max(lsn);
            self.min_timestamp = self.min_timestamp.min(timestamp);
            self.max_timestamp = self.max_timestamp.max(timestamp);
        }
        self.record_count += 1;
        if is_delete {
            self.tombstone_count += 1;
        }

        if self.min_key.as_deref().is_none_or(|mk| key < mk) {
            self.min_key = Some(key.to_vec());
        }
        if self.max_key.as_deref().is_none_or(|mk| key > mk) {
            self.max_key = Some(key.to_vec());
        }
    }

    fn into_properties(self, range_count: u64) -> SSTablePropertiesBlock {
        SSTablePropertiesBlock {
            creation_timestamp: self.max_timestamp,
            record_count: self.record_count,
            tombstone_count: self.tombstone_count,
            range_tombstones_count: range_count,
            min_lsn: self.min_lsn,
            max_lsn: self.max_lsn,
            min_timestamp: self.min_timestamp,
            max_timestamp: self.max_timestamp,
            min_key: self.min_key.unwrap_or_default(),
            max_key: self.max_key.unwrap_or_default(),
        }
    }
}

/// Writes a checksummed block as `[len_le][data][crc32_le]`, returning the
/// block's starting offset and total on-disk size.
fn write_checksummed_block(
    writer: &mut File,
    offset_cursor: &mut u64,
    data: &[u8],
) -> Result<BlockHandle, SSTableError> {
    let offset = *offset_cursor;
    let len = data.len() as u32;

    writer.write_all(&len.to_le_bytes())?;
    writer.write_all(data)?;

    let checksum = crc32(data);
    writer.write_all(&checksum.to_le_bytes())?;

    let size = 4 + data.len() as u64 + 4;
    *offset_cursor += size;

    Ok(BlockHandle { offset, size })
}

/// Builds a single immutable SSTable file (plus sidecar bloom filter) from
/// sorted point entries and range tombstones.
pub struct SstWriter<P: AsRef<Path>> {
    path: P,
    compression: Compression,
    bloom_fp_rate: f64,
    sparse_index_interval: usize,
}

impl<P: AsRef<Path>> SstWriter<P> {
    /// Creates a writer targeting `path`, with no compression and default
    /// bloom/sparse-index settings.
    pub fn new(path: P) -> Self {
        Self {
            path,
            compression: Compression::None,
            bloom_fp_rate: SST_BLOOM_FILTER_FALSE_POSITIVE_RATE,
            sparse_index_interval: SST_SPARSE_INDEX_INTERVAL,
        }
    }

    /// Sets the data-block compression.
    pub fn with_compression(mut self, compression: Compression) -> Self {
        self.compression = compression;
        self
    }

    /// Overrides the bloom filter's target false positive rate.
    pub fn with_bloom_fp_rate(mut self, rate: f64) -> Self {
        self.bloom_fp_rate = rate;
        self
    }

    /// Overrides the sparse index sampling interval.
    pub fn with_sparse_index_interval(mut self, interval: usize) -> Self {
        self.sparse_index_interval = interval.max(1);
        self
    }

    /// Writes the SSTable (and its sidecar `.bloom` file) to disk.
    ///
    /// `point_entries` must be sorted by key ascending; `range_tombstones`
    /// need not be sorted. `point_count` sizes the bloom filter — range
    /// tombstones are never inserted into it, since point lookups only test
    /// the filter against exact keys.
    ///
    /// # Errors
    ///
    /// Returns an error if both inputs are empty, or on any I/O or encoding
    /// failure. The file is written to a temporary path and only renamed
    /// into place on success, so a failed build never leaves a partial file
    /// at `path`.
    pub fn build(
        self,
        point_entries: impl Iterator<Item = PointEntry>,
        point_count: usize,
        range_tombstones: impl Iterator<Item = RangeTombstone>,
    ) -> Result<(), SSTableError> {
        let range_tombstones: Vec<RangeTombstone> = range_tombstones.collect();
        let final_path = self.path.as_ref().to_path_buf();
        if point_count == 0 && range_tombstones.is_empty() {
            return Err(SSTableError::Internal(
                "cannot build an empty SSTable".into(),
            ));
        }

        let tmp_path = final_path.with_extension("sst.tmp");
        if let Some(parent) = final_path.parent() {
            fs::create_dir_all(parent)?;
        }

        let mut file = File::create(&tmp_path)?;
        let mut offset: u64 = 0;

        // Header is rewritten in place once the final compression tag and
        // CRC are known; reserve its space up front.
        file.write_all(&vec![0u8; SST_HDR_SIZE_ON_DISK])?;

        let mut stats = BuildStats::default();
        let mut bloom = (point_count > 0).then(|| BloomFilter::new(point_count, self.bloom_fp_rate));

        let mut raw_block = Vec::new();
        let mut index_entries = Vec::new();
        let mut logical_index = 0usize;

        for entry in point_entries {
            let is_delete = entry.value.is_none();
            stats.track(&entry.key, entry.lsn, entry.timestamp, is_delete);
            if let Some(bloom) = bloom.as_mut() {
                bloom.insert(&entry.key);
            }

            if logical_index % self.sparse_index_interval == 0 {
                index_entries.push(SSTableIndexEntry {
                    separator_key: entry.key.clone(),
                    offset: raw_block.len() as u64,
                });
            }
            logical_index += 1;

            let value_bytes = entry.value.clone().unwrap_or_default();
            let cell = SSTableCell {
                key_len: entry.key.len() as u32,
                value_len: value_bytes.len() as u32,
                timestamp: entry.timestamp,
                is_delete,
                lsn: entry.lsn,
            };
            encoding::Encode::encode_to(&cell, &mut raw_block)?;
            raw_block.extend_from_slice(&entry.key);
            raw_block.extend_from_slice(&value_bytes);
        }

        let compressed = match self.compression {
            Compression::None => raw_block,
            Compression::Gzip => {
                let mut encoder = GzEncoder::new(Vec::new(), GzCompressionLevel::default());
                encoder.write_all(&raw_block)?;
                encoder.finish()?
            }
        };

        let data_block = SSTableDataBlock { data: compressed };
        let data_block_bytes = encoding::encode_to_vec(&data_block)?;
        let data_block_handle = write_checksummed_block(&mut file, &mut offset, &data_block_bytes)?;

        let range_cells: Vec<SSTableRangeTombstoneCell> = range_tombstones
            .iter()
            .map(|rt| SSTableRangeTombstoneCell {
                start_key: rt.start.clone(),
                end_key: rt.end.clone(),
                timestamp: rt.timestamp,
                lsn: rt.lsn,
            })
            .collect();
        let range_block = SSTableRangeTombstoneDataBlock { data: range_cells };
        let range_block_bytes = encoding::encode_to_vec(&range_block)?;
        let range_handle = write_checksummed_block(&mut file, &mut offset, &range_block_bytes)?;

        let properties = stats.into_properties(range_tombstones.len() as u64);
        let properties_bytes = encoding::encode_to_vec(&properties)?;
        let properties_handle = write_checksummed_block(&mut file, &mut offset, &properties_bytes)?;

        let meta_entries = vec![
            MetaIndexEntry {
                name: "meta.properties".to_string(),
                handle: properties_handle,
            },
            MetaIndexEntry {
                name: "meta.range_deletes".to_string(),
                handle: range_handle,
            },
        ];
        let mut metaindex_bytes = Vec::new();
        encoding::encode_vec(&meta_entries, &mut metaindex_bytes)?;
        let metaindex_handle = write_checksummed_block(&mut file, &mut offset, &metaindex_bytes)?;

        let mut index_bytes = Vec::new();
        encoding::encode_vec(&index_entries, &mut index_bytes)?;
        let index_handle = write_checksummed_block(&mut file, &mut offset, &index_bytes)?;

        let total_file_size = SST_HDR_SIZE_ON_DISK as u64 + offset + SST_FOOTER_SIZE as u64;
        let mut footer = SSTableFooter {
            data_block: data_block_handle,
            metaindex: metaindex_handle,
            index: index_handle,
            total_file_size,
            footer_crc32: 0,
        };
        let footer_bytes_for_crc = encoding::encode_to_vec(&footer)?;
        footer.footer_crc32 = crc32(&footer_bytes_for_crc);
        let footer_bytes = encoding::encode_to_vec(&footer)?;
        file.write_all(&footer_bytes)?;

        Self::rewrite_header(&mut file, self.compression)?;

        file.sync_all()?;
        drop(file);

        fs::rename(&tmp_path, &final_path)?;
        Self::fsync_dir(
            final_path
                .parent()
                .ok_or_else(|| SSTableError::Internal("SSTable path has no parent".into()))?,
        )?;

        if let Some(bloom) = bloom {
            Self::write_bloom_sidecar(&final_path, &bloom)?;
        }

        Ok(())
    }

    fn rewrite_header(file: &mut File, compression: Compression) -> Result<(), SSTableError> {
        let mut header = SSTableHeader {
            magic: SST_HDR_MAGIC,
            version: SST_HDR_VERSION,
            compression: compression.tag(),
            header_crc: 0,
        };
        let header_bytes_for_crc = encoding::encode_to_vec(&header)?;
        header.header_crc = crc32(&header_bytes_for_crc);
        let header_bytes = encoding::encode_to_vec(&header)?;

        use std::io::{Seek, SeekFrom};
        file.seek(SeekFrom::Start(0))?;
        file.write_all(&header_bytes)?;
        file.seek(SeekFrom::End(0))?;
        Ok(())
    }

    fn write_bloom_sidecar(sst_path: &Path, bloom: &BloomFilter) -> Result<(), SSTableError> {
        let bloom_path = super::bloom_path_for(sst_path);
        if let Some(parent) = bloom_path.parent() {
            fs::create_dir_all(parent)?;
        }
        let tmp_path = bloom_path.with_extension("bloom.tmp");
        {
            let mut f = File::create(&tmp_path)?;
            bloom.write_to(&mut f)?;
            f.sync_all()?;
        }
        fs::rename(&tmp_path, &bloom_path)?;
        Self::fsync_dir(
            bloom_path
                .parent()
                .ok_or_else(|| SSTableError::Internal("bloom path has no parent".into()))?,
        )?;
        Ok(())
    }

    fn fsync_dir(dir: &Path) -> Result<(), SSTableError> {
        let dir_file = File::open(dir)?;
        dir_file.sync_all()?;
        Ok(())
    }
}

fn crc32(bytes: &[u8]) -> u32 {
    let mut hasher = Crc32::new();
    hasher.update(bytes);
    hasher.finalize()
}
