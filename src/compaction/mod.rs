//! # Compaction Module
//!
//! Implements **leveled compaction** for the LSM storage engine:
//!
//! - **L0 → L1**: once L0 accumulates `l0_compaction_trigger` files, all of
//!   them are merged with any overlapping L1 tables into a new set of L1
//!   tables.
//! - **ℓ → ℓ+1** (ℓ ≥ 1): once a level's total byte size exceeds
//!   `base_level_size_bytes * level_size_multiplier^(ℓ-1)`, one table from
//!   that level is merged with all overlapping tables in level ℓ+1.
//!
//! Point entries are deduplicated keeping only the highest-LSN version per
//! key; both point and range tombstones are preserved in the merge output
//! unless the target is the last level a key could possibly occupy (in
//! which case spent tombstones still ride along — this crate does not
//! attempt a last-level "definitely safe to drop" optimisation, matching
//! the conservative, always-correct merge behavior the teacher's own
//! minor/major compaction already used).
//!
//! ## Code organization
//!
//! The module separates strategy-specific logic ([`leveled`]) from shared
//! execution primitives (merge, dedup, build) defined here, so the merge
//! and manifest-commit plumbing is identical regardless of which levels
//! are involved.

pub mod leveled;

use std::path::PathBuf;
use std::sync::Arc;

use crate::engine::RangeTombstone;
pub use crate::engine::utils::MergeIterator;
use crate::engine::utils::Record;
use crate::sstable::{self, PointEntry, SSTable, SSTableError};

use crate::engine::EngineConfig;
use crate::manifest::{Manifest, ManifestError, ManifestSstEntry};
use tracing::{debug, info};

// ------------------------------------------------------------------------------------------------
// CompactionStrategy trait
// ------------------------------------------------------------------------------------------------

/// A uniform interface for compaction strategies.
///
/// Implementations inspect the current per-level SSTable layout and decide
/// whether a round of compaction is due. They return:
///
/// - `Ok(Some(result))` — compaction was performed; the caller should
///   update in-memory state using [`CompactionResult`].
/// - `Ok(None)` — nothing to compact (thresholds not met).
pub trait CompactionStrategy: Send + Sync {
    /// Execute one round of compaction, if the strategy's preconditions
    /// are met. Implementations must be idempotent — calling when there
    /// is nothing to do should simply return `Ok(None)`.
    fn compact(
        &self,
        levels: &[Vec<Arc<SSTable>>],
        manifest: &mut Manifest,
        data_dir: &str,
        config: &EngineConfig,
    ) -> Result<Option<CompactionResult>, CompactionError>;
}

// ------------------------------------------------------------------------------------------------
// Shared types
// ------------------------------------------------------------------------------------------------

/// Result of a compaction execution — enough information to update the
/// manifest and in-memory per-level SSTable layout.
pub struct CompactionResult {
    /// SSTable IDs that were consumed (to be removed from their levels).
    pub removed_ids: Vec<u64>,

    /// Newly built SSTables: `(level, path, id)` triples. Empty when every
    /// input entry was eliminated (fully-shadowed tombstones at the last
    /// level).
    pub added: Vec<(u32, String, u64)>,
}

// ------------------------------------------------------------------------------------------------
// Dedup logic
// ------------------------------------------------------------------------------------------------

/// Deduplicates a merge iterator stream into separate point entries
/// and range tombstones.
///
/// For each unique key, keeps only the version with the highest LSN (the
/// merge stream is already `(key ASC, LSN DESC)`, so only the *first*
/// occurrence of a key needs to be kept). **All tombstones (point and
/// range) are preserved** — callers further up the stack decide whether a
/// given compaction is deep enough in the level hierarchy to drop spent
/// tombstones.
pub fn dedup_records(
    merge_iter: impl Iterator<Item = Record>,
) -> (Vec<PointEntry>, Vec<RangeTombstone>) {
    let mut point_entries = Vec::new();
    let mut range_tombstones = Vec::new();
    let mut last_key: Option<Vec<u8>> = None;

    for record in merge_iter {
        match record {
            Record::RangeDelete {
                start,
                end,
                lsn,
                timestamp,
            } => {
                range_tombstones.push(RangeTombstone {
                    start,
                    end,
                    lsn,
                    timestamp,
                });
            }
            Record::Put {
                key,
                value,
                lsn,
                timestamp,
            } => {
                if last_key.as_ref() == Some(&key) {
                    continue; // Older version — skip
                }
                last_key = Some(key.clone());
                point_entries.push(PointEntry {
                    key,
                    value: Some(value),
                    lsn,
                    timestamp,
                });
            }
            Record::Delete {
                key,
                lsn,
                timestamp,
            } => {
                if last_key.as_ref() == Some(&key) {
                    continue; // Older version — skip
                }
                last_key = Some(key.clone());
                point_entries.push(PointEntry {
                    key,
                    value: None,
                    lsn,
                    timestamp,
                });
            }
        }
    }

    (point_entries, range_tombstones)
}

// ------------------------------------------------------------------------------------------------
// Helpers
// ------------------------------------------------------------------------------------------------

/// Creates scan iterators for the given SSTables covering their full key range.
///
/// Computes the min/max key bounds across all selected SSTables and returns
/// a vec of boxed iterators that can be fed into [`MergeIterator`].
///
/// The returned iterators borrow the SSTables; iteration is streaming over
/// each table's already-decompressed data block, so no additional I/O is
/// performed beyond the initial `SSTable::open`.
pub fn full_range_scan_iters<'a>(
    sstables: &'a [&'a SSTable],
) -> Result<Vec<Box<dyn Iterator<Item = Record> + 'a>>, SSTableError> {
    if sstables.is_empty() {
        return Ok(Vec::new());
    }

    let min_key = sstables
        .iter()
        .map(|s| &s.properties.min_key)
        .min()
        .ok_or_else(|| SSTableError::Internal("empty sstables in full_range_scan".into()))?
        .clone();

    let mut max_key = sstables
        .iter()
        .map(|s| &s.properties.max_key)
        .max()
        .ok_or_else(|| SSTableError::Internal("empty sstables in full_range_scan".into()))?
        .clone();
    // sst.scan's end bound is inclusive; pad past the real max key so every
    // table's own max_key is still covered even though it differs per table.
    max_key.push(0xFF);

    let mut iters: Vec<Box<dyn Iterator<Item = Record> + 'a>> = Vec::new();
    for sst in sstables {
        let scan = sst.scan(&min_key, &max_key)?;
        iters.push(Box::new(scan));
    }

    Ok(iters)
}

/// Returns `true` when two `[min_key, max_key]` (inclusive) ranges overlap.
pub(crate) fn ranges_overlap(a_min: &[u8], a_max: &[u8], b_min: &[u8], b_max: &[u8]) -> bool {
    a_min <= b_max && b_min <= a_max
}

// ------------------------------------------------------------------------------------------------
// Shared error type
// ------------------------------------------------------------------------------------------------

/// Unified error type for all compaction strategies.
#[derive(Debug, thiserror::Error)]
pub enum CompactionError {
    #[error("SSTable error: {0}")]
    SSTable(#[from] SSTableError),

    #[error("Manifest error: {0}")]
    Manifest(#[from] ManifestError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

// ------------------------------------------------------------------------------------------------
// Finalize — shared build + manifest + cleanup
// ------------------------------------------------------------------------------------------------

/// Builds new SSTable(s) at `target_level` from the given entries,
/// atomically updates the manifest, and deletes old SSTable files.
///
/// If both `point_entries` and `range_tombstones` are empty, no new
/// SSTable is produced — old SSTables are simply removed. This is the
/// common tail shared by every leveled-compaction round.
///
/// `removed` carries both the ID and on-disk path of each consumed
/// SSTable so the old files (and their bloom sidecars) can be deleted
/// after the manifest swap commits, without having to reconstruct a
/// filename from ID alone.
pub(crate) fn finalize_compaction(
    manifest: &mut Manifest,
    data_dir: &str,
    target_level: u32,
    removed: Vec<(u64, PathBuf)>,
    point_entries: Vec<PointEntry>,
    range_tombstones: Vec<RangeTombstone>,
    config: &EngineConfig,
) -> Result<CompactionResult, CompactionError> {
    let removed_ids: Vec<u64> = removed.iter().map(|(id, _)| *id).collect();

    if point_entries.is_empty() && range_tombstones.is_empty() {
        info!(
            removed_count = removed_ids.len(),
            ?removed_ids,
            "finalize: all entries eliminated, removing old SSTables"
        );
        manifest.apply_compaction(Vec::new(), removed_ids.clone())?;
        manifest.checkpoint()?;
        remove_old_sstables(&removed);

        return Ok(CompactionResult {
            removed_ids,
            added: Vec::new(),
        });
    }

    let new_sst_id = manifest.allocate_sst_id()?;
    let new_sst_path = format!(
        "{}/sstables/level_{}_{:06}.sst",
        data_dir, target_level, new_sst_id
    );

    let point_count = point_entries.len();
    let range_count = range_tombstones.len();

    debug!(
        new_sst_id,
        target_level,
        point_count,
        range_count,
        removed_count = removed_ids.len(),
        path = %new_sst_path,
        "finalize: building new SSTable"
    );

    sstable::SstWriter::new(&new_sst_path)
        .with_compression(config.compression)
        .with_bloom_fp_rate(config.bloom_false_positive_rate)
        .with_sparse_index_interval(config.sparse_index_interval)
        .build(
            point_entries.into_iter(),
            point_count,
            range_tombstones.into_iter(),
        )?;

    let new_entry = ManifestSstEntry {
        id: new_sst_id,
        path: PathBuf::from(&new_sst_path),
        level: target_level,
    };
    manifest.apply_compaction(vec![new_entry], removed_ids.clone())?;
    manifest.checkpoint()?;
    remove_old_sstables(&removed);

    Ok(CompactionResult {
        removed_ids,
        added: vec![(target_level, new_sst_path, new_sst_id)],
    })
}

fn remove_old_sstables(removed: &[(u64, PathBuf)]) {
    for (id, path) in removed {
        let bloom_path = sstable::bloom_path_for(path);
        if let Err(e) = std::fs::remove_file(path) {
            tracing::warn!(id, %e, path = %path.display(), "failed to remove old SSTable file during compaction");
        }
        if let Err(e) = std::fs::remove_file(&bloom_path) {
            if e.kind() != std::io::ErrorKind::NotFound {
                tracing::warn!(id, %e, path = %bloom_path.display(), "failed to remove old bloom sidecar during compaction");
            }
        }
    }
}
