//! Leveled compaction strategy.
//!
//! Implements the two triggers named by the engine's level design:
//!
//! - **L0 → L1**: once L0 holds `l0_compaction_trigger` or more files, all
//!   of them are merged together with every L1 table whose key range
//!   overlaps the combined L0 range, producing a new, non-overlapping set
//!   of L1 tables.
//! - **ℓ → ℓ+1** (ℓ ≥ 1): once level ℓ's total on-disk size exceeds
//!   `base_level_size_bytes * level_size_multiplier^(ℓ-1)`, one table is
//!   picked from level ℓ and merged with every overlapping table in level
//!   ℓ+1.
//!
//! Only one trigger fires per [`CompactionStrategy::compact`] call — the
//! background worker re-polls afterward, so a backlog drains incrementally
//! rather than blocking for one giant merge. L0 is checked first since an
//! unbounded L0 directly slows down point lookups (every L0 table must be
//! probed on a miss).

use std::sync::Arc;

use crate::engine::EngineConfig;
use crate::manifest::Manifest;
use crate::sstable::SSTable;

use super::{
    CompactionError, CompactionResult, CompactionStrategy, dedup_records, full_range_scan_iters,
    ranges_overlap,
};

/// Leveled compaction: L0 → L1 file-count trigger, ℓ → ℓ+1 size trigger.
pub struct LeveledCompaction;

impl CompactionStrategy for LeveledCompaction {
    fn compact(
        &self,
        levels: &[Vec<Arc<SSTable>>],
        manifest: &mut Manifest,
        data_dir: &str,
        config: &EngineConfig,
    ) -> Result<Option<CompactionResult>, CompactionError> {
        if let Some(l0) = levels.first()
            && l0.len() >= config.l0_compaction_trigger
        {
            return compact_l0_to_l1(levels, manifest, data_dir, config);
        }

        for (level_idx, level) in levels.iter().enumerate().skip(1) {
            if level.is_empty() {
                continue;
            }
            let total_size: u64 = level.iter().map(|s| s.file_size()).sum();
            let threshold = level_size_threshold(config, level_idx as u32);
            if total_size > threshold {
                return compact_level_to_next(levels, level_idx, manifest, data_dir, config);
            }
        }

        Ok(None)
    }
}

/// Target byte-size threshold for `level` (1-indexed: level 1 uses the
/// base size, level ℓ uses `base * multiplier^(ℓ-1)`).
fn level_size_threshold(config: &EngineConfig, level: u32) -> u64 {
    let exponent = level.saturating_sub(1);
    let multiplier = (config.level_size_multiplier as u64).pow(exponent);
    config.base_level_size_bytes as u64 * multiplier
}

fn key_range(sst: &SSTable) -> (&[u8], &[u8]) {
    (&sst.properties.min_key, &sst.properties.max_key)
}

fn compact_l0_to_l1(
    levels: &[Vec<Arc<SSTable>>],
    manifest: &mut Manifest,
    data_dir: &str,
    config: &EngineConfig,
) -> Result<Option<CompactionResult>, CompactionError> {
    let l0 = &levels[0];
    let empty = Vec::new();
    let l1 = levels.get(1).unwrap_or(&empty);

    let (mut combined_min, mut combined_max) = key_range(&l0[0]);
    for sst in &l0[1..] {
        let (min_k, max_k) = key_range(sst);
        if min_k < combined_min {
            combined_min = min_k;
        }
        if max_k > combined_max {
            combined_max = max_k;
        }
    }

    let overlapping_l1: Vec<&Arc<SSTable>> = l1
        .iter()
        .filter(|s| {
            let (min_k, max_k) = key_range(s);
            ranges_overlap(combined_min, combined_max, min_k, max_k)
        })
        .collect();

    let mut inputs: Vec<&SSTable> = l0.iter().map(|s| s.as_ref()).collect();
    inputs.extend(overlapping_l1.iter().map(|s| s.as_ref()));

    let removed: Vec<(u64, std::path::PathBuf)> = l0
        .iter()
        .map(|s| (s.id, s.path.clone()))
        .chain(overlapping_l1.iter().map(|s| (s.id, s.path.clone())))
        .collect();

    let iters = full_range_scan_iters(&inputs)?;
    let merged = crate::compaction::MergeIterator::new(iters);
    let (point_entries, range_tombstones) = dedup_records(merged);

    let result = super::finalize_compaction(
        manifest,
        data_dir,
        1,
        removed,
        point_entries,
        range_tombstones,
        config,
    )?;
    Ok(Some(result))
}

fn compact_level_to_next(
    levels: &[Vec<Arc<SSTable>>],
    level_idx: usize,
    manifest: &mut Manifest,
    data_dir: &str,
    config: &EngineConfig,
) -> Result<Option<CompactionResult>, CompactionError> {
    let level = &levels[level_idx];
    let empty = Vec::new();
    let next_level = levels.get(level_idx + 1).unwrap_or(&empty);

    // Pick the table with the smallest max_lsn: it's the oldest data in
    // this level and thus the best candidate to push down first.
    let victim = level
        .iter()
        .min_by_key(|s| s.properties.max_lsn)
        .expect("level checked non-empty by caller");
    let (victim_min, victim_max) = key_range(victim);

    let overlapping_next: Vec<&Arc<SSTable>> = next_level
        .iter()
        .filter(|s| {
            let (min_k, max_k) = key_range(s);
            ranges_overlap(victim_min, victim_max, min_k, max_k)
        })
        .collect();

    let mut inputs: Vec<&SSTable> = vec![victim.as_ref()];
    inputs.extend(overlapping_next.iter().map(|s| s.as_ref()));

    let removed: Vec<(u64, std::path::PathBuf)> = std::iter::once((victim.id, victim.path.clone()))
        .chain(overlapping_next.iter().map(|s| (s.id, s.path.clone())))
        .collect();

    let iters = full_range_scan_iters(&inputs)?;
    let merged = crate::compaction::MergeIterator::new(iters);
    let (point_entries, range_tombstones) = dedup_records(merged);

    let result = super::finalize_compaction(
        manifest,
        data_dir,
        (level_idx + 1) as u32,
        removed,
        point_entries,
        range_tombstones,
        config,
    )?;
    Ok(Some(result))
}
