//! # LSM Storage Engine
//!
//! This module implements a **synchronous**, **crash-safe** LSM-tree storage
//! engine with multi-version concurrency, point and range tombstones, and
//! leveled compaction.
//!
//! ## Design Overview
//!
//! The engine organises data across three layers, queried newest-first:
//!
//! 1. **Active memtable** — an in-memory sorted map backed by a
//!    write-ahead log (WAL).
//! 2. **Frozen memtables** — read-only snapshots of previously active
//!    memtables, awaiting flush to persistent SSTables.
//! 3. **SSTables, organised into levels** — level 0 holds the raw,
//!    possibly key-overlapping output of memtable flushes; levels ≥ 1
//!    hold non-overlapping, progressively larger tables produced by
//!    compaction.
//!
//! Writes go through the WAL first, then into the active memtable. When
//! the memtable exceeds [`EngineConfig::memtable_flush_threshold_entries`]
//! or [`EngineConfig::memtable_flush_threshold_bytes`] it is frozen and a
//! fresh memtable + WAL is created. Frozen memtables are flushed to L0
//! SSTables via [`Engine::flush_oldest_frozen`] / [`Engine::flush_all_frozen`].
//!
//! ## Concurrency Model
//!
//! All engine state is protected by a single `Arc<RwLock<EngineInner>>`.
//! Reads acquire a **read lock**; writes, flushes, and compaction commits
//! acquire a **write lock**. A background thread polls for compaction work
//! every [`EngineConfig::compaction_poll_interval_ms`]; [`Engine::compact_now`]
//! wakes it early without blocking the caller.
//!
//! ## Guarantees
//!
//! - **Durability:** Every write is persisted to WAL before acknowledgement
//!   (or batched, for [`Engine::batch_put`]/[`Engine::batch_delete`]).
//! - **Crash recovery:** On [`Engine::open`], the manifest, WALs, and
//!   SSTables are replayed to reconstruct the last durable state.
//! - **Multi-version reads:** Point lookups and scans always see the
//!   highest-LSN committed version of each key, respecting tombstones.
//! - **Atomic flushes and compactions:** Each transition is committed to
//!   the manifest atomically before any file is deleted.

use std::fs;
use std::sync::atomic::Ordering;
use std::sync::{Arc, Mutex, RwLock};
use std::time::{Duration, Instant};

use thiserror::Error;

use crate::compaction::{CompactionStrategy, leveled::LeveledCompaction};
use crate::manifest::{Manifest, ManifestError, ManifestSstEntry};
use crate::memtable::{
    FrozenMemtable, Memtable, MemtableError, MemtableGetResult, MemtableRecord,
};
use crate::sstable::{self, Compression, SSTable, SSTableError};
use crate::wal::WalSyncPolicy;

pub mod health;
pub mod utils;
pub mod visibility;

pub use health::{Health, HealthStatus, Metrics};
pub use utils::{PointEntry, RangeTombstone, Record};
pub use visibility::VisibilityFilter;

#[cfg(test)]
mod tests;

pub const MANIFEST_DIR: &str = "manifest";
pub const WAL_DIR: &str = "wal";
pub const SSTABLE_DIR: &str = "sstables";
pub const BLOOM_DIR: &str = "blooms";

/// Errors that can occur during engine operations.
#[derive(Debug, Error)]
pub enum EngineError {
    /// Error originating from the manifest subsystem.
    #[error("Manifest error: {0}")]
    Manifest(#[from] ManifestError),

    /// Error originating from the memtable subsystem.
    #[error("Memtable error: {0}")]
    Memtable(#[from] MemtableError),

    /// Error originating from the SSTable subsystem.
    #[error("SSTable error: {0}")]
    SSTable(#[from] SSTableError),

    /// Underlying filesystem I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The underlying device has no space left; the engine has switched to
    /// read-only mode until the operator frees space and reopens it.
    #[error("disk full, engine is now read-only")]
    DiskFull,

    /// The engine is in read-only mode (entered via a prior [`EngineError::DiskFull`]).
    #[error("engine is read-only")]
    ReadOnly,

    /// The requested operation could not be performed right now because the
    /// engine is busy (e.g. a compaction is already running).
    #[error("engine is busy")]
    Busy,

    /// Internal invariant violation (poisoned lock, unexpected state, etc.).
    #[error("Internal error: {0}")]
    Internal(String),
}

fn is_disk_full(e: &std::io::Error) -> bool {
    matches!(e.raw_os_error(), Some(28)) || e.kind() == std::io::ErrorKind::StorageFull
}

// ------------------------------------------------------------------------------------------------
// Configuration
// ------------------------------------------------------------------------------------------------

/// Configuration for an [`Engine`] instance.
///
/// Passed to [`Engine::open`]. `Default` provides the documented defaults
/// for every tunable.
pub struct EngineConfig {
    /// Root directory the engine is mounted at.
    pub data_dir: String,

    /// Max number of entries in the active memtable before it is frozen.
    /// Clamped to `[50, 50000]`.
    pub memtable_flush_threshold_entries: usize,

    /// Max approximate byte size of the active memtable before it is frozen.
    pub memtable_flush_threshold_bytes: usize,

    /// Number of L0 files that triggers an L0 → L1 compaction round.
    pub l0_compaction_trigger: usize,

    /// Growth factor between a level's target size and the next level's.
    pub level_size_multiplier: usize,

    /// Target byte size of level 1; level ℓ's target is
    /// `base_level_size_bytes * level_size_multiplier^(ℓ-1)`.
    pub base_level_size_bytes: usize,

    /// Sample every Nth logical entry into an SSTable's sparse index.
    pub sparse_index_interval: usize,

    /// Target false-positive rate for newly built SSTables' bloom filters.
    pub bloom_false_positive_rate: f64,

    /// WAL fsync policy for both data WALs and the manifest WAL.
    pub wal_sync_policy: WalSyncPolicy,

    /// How often the background compaction worker polls for work.
    pub compaction_poll_interval_ms: u64,

    /// Compression applied to newly built SSTable data blocks.
    pub compression: Compression,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            data_dir: String::new(),
            memtable_flush_threshold_entries: 1000,
            memtable_flush_threshold_bytes: 4 * 1024 * 1024,
            l0_compaction_trigger: 4,
            level_size_multiplier: 10,
            base_level_size_bytes: 100 * 1024,
            sparse_index_interval: 10,
            bloom_false_positive_rate: 0.01,
            wal_sync_policy: WalSyncPolicy::Always,
            compaction_poll_interval_ms: 5000,
            compression: Compression::Gzip,
        }
    }
}

impl EngineConfig {
    /// Creates a default config rooted at `data_dir`.
    pub fn new(data_dir: impl Into<String>) -> Self {
        Self {
            data_dir: data_dir.into(),
            ..Default::default()
        }
    }

    fn clamped_entries_threshold(&self) -> usize {
        self.memtable_flush_threshold_entries.clamp(50, 50_000)
    }
}

/// Snapshot of engine statistics returned by [`Engine::stats`].
pub struct EngineStats {
    /// Number of frozen memtables pending flush.
    pub frozen_count: usize,
    /// Total number of SSTables on disk, across all levels.
    pub sstables_count: usize,
    /// Number of SSTables per level (index 0 = L0).
    pub sstables_per_level: Vec<usize>,
    /// Sum of all SSTable file sizes in bytes.
    pub total_sst_size_bytes: u64,
    /// Whether a compaction round is currently in progress.
    pub is_compacting: bool,
    /// Monotonic counters and latency histograms.
    pub puts: u64,
    pub deletes: u64,
    pub scans: u64,
    pub bloom_hits: u64,
    pub bloom_misses: u64,
    pub compactions: u64,
}

// ------------------------------------------------------------------------------------------------
// Inner state
// ------------------------------------------------------------------------------------------------

struct EngineInner {
    manifest: Manifest,
    active: Memtable,
    active_entry_count: usize,
    frozen: Vec<FrozenMemtable>,
    /// SSTables grouped by level; index 0 is L0 (may overlap), levels ≥ 1
    /// are kept sorted and non-overlapping by `min_key`.
    levels: Vec<Vec<Arc<SSTable>>>,
    data_dir: String,
    config: EngineConfig,
    read_only: bool,
}

impl EngineInner {
    fn level_mut(&mut self, level: usize) -> &mut Vec<Arc<SSTable>> {
        if self.levels.len() <= level {
            self.levels.resize_with(level + 1, Vec::new);
        }
        &mut self.levels[level]
    }

    fn check_writable(&self) -> Result<(), EngineError> {
        if self.read_only {
            Err(EngineError::ReadOnly)
        } else {
            Ok(())
        }
    }
}

enum CompactorMsg {
    Wake,
    Stop,
}

/// The main LSM storage engine handle.
///
/// Thread-safe — can be cloned and shared across threads via the internal
/// `Arc<RwLock<_>>`. Cloning shares the same background compaction thread.
pub struct Engine {
    inner: Arc<RwLock<EngineInner>>,
    metrics: Arc<Metrics>,
    compactor_tx: crossbeam::channel::Sender<CompactorMsg>,
    compactor_handle: Arc<Mutex<Option<std::thread::JoinHandle<()>>>>,
}

impl Clone for Engine {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
            metrics: Arc::clone(&self.metrics),
            compactor_tx: self.compactor_tx.clone(),
            compactor_handle: Arc::clone(&self.compactor_handle),
        }
    }
}

impl Engine {
    /// Opens (or creates) an engine rooted at `config.data_dir`.
    ///
    /// On a fresh directory the manifest, WAL, SSTable, and bloom
    /// sub-directories are created automatically. On an existing directory
    /// the manifest is replayed, frozen WALs are loaded, and SSTables are
    /// opened and grouped by level.
    pub fn open(config: EngineConfig) -> Result<Self, EngineError> {
        let path_str = config.data_dir.clone();
        let manifest_dir = format!("{path_str}/{MANIFEST_DIR}");
        let wal_dir = format!("{path_str}/{WAL_DIR}");
        let sstable_dir = format!("{path_str}/{SSTABLE_DIR}");
        let bloom_dir = format!("{path_str}/{BLOOM_DIR}");

        fs::create_dir_all(&manifest_dir)?;
        fs::create_dir_all(&wal_dir)?;
        fs::create_dir_all(&sstable_dir)?;
        fs::create_dir_all(&bloom_dir)?;

        let manifest = Manifest::open(&manifest_dir)?;
        let manifest_last_lsn = manifest.get_last_lsn()?;

        let active_wal_nr = manifest.get_active_wal()?;
        let active_wal_path = format!("{wal_dir}/wal_{active_wal_nr:06}.log");
        let memtable = Memtable::new_with_policy(
            active_wal_path,
            None,
            config.memtable_flush_threshold_bytes,
            config.wal_sync_policy,
        )?;

        let frozen_wals = manifest.get_frozen_wals()?;
        let mut frozen_memtables = Vec::new();
        for wal_nr in frozen_wals {
            let frozen_wal_path = format!("{wal_dir}/wal_{wal_nr:06}.log");
            let frozen_memtable = Memtable::new_with_policy(
                frozen_wal_path,
                None,
                config.memtable_flush_threshold_bytes,
                config.wal_sync_policy,
            )?;
            frozen_memtables.push(frozen_memtable.frozen()?);
        }

        let manifest_sstables = manifest.get_sstables()?;

        // Remove orphaned SSTable files not tracked by the manifest (e.g.
        // left over from a crash between `SstWriter::build` and
        // `Manifest::add_sstable`/`apply_compaction`).
        for entry in fs::read_dir(&sstable_dir)? {
            let entry = entry?;
            let file_path = entry.path();
            if file_path.is_file()
                && file_path.extension().and_then(|s| s.to_str()) == Some("sst")
                && !manifest_sstables.iter().any(|e| e.path == file_path)
            {
                let _ = fs::remove_file(&file_path);
                let _ = fs::remove_file(sstable::bloom_path_for(&file_path));
            }
        }

        let mut levels: Vec<Vec<Arc<SSTable>>> = Vec::new();
        for entry in &manifest_sstables {
            let mut table = SSTable::open(&entry.path)?;
            table.id = entry.id;
            let level = entry.level as usize;
            if levels.len() <= level {
                levels.resize_with(level + 1, Vec::new);
            }
            levels[level].push(Arc::new(table));
        }
        if levels.is_empty() {
            levels.push(Vec::new());
        }

        let mut max_lsn = manifest_last_lsn;
        if memtable.max_lsn() > max_lsn {
            max_lsn = memtable.max_lsn();
        }
        for frozen in &frozen_memtables {
            if frozen.max_lsn() > max_lsn {
                max_lsn = frozen.max_lsn();
            }
        }
        for level in &levels {
            for sst in level {
                if sst.properties.max_lsn > max_lsn {
                    max_lsn = sst.properties.max_lsn;
                }
            }
        }
        if memtable.max_lsn() < max_lsn {
            memtable.inject_max_lsn(max_lsn);
        }

        // Sort frozen memtables newest-first by WAL sequence number — on
        // crash recovery all frozen memtables replay at nearly the same
        // instant, so a WAL sequence counter is the reliable ordering key,
        // not a wall-clock timestamp.
        frozen_memtables.sort_by(|a, b| b.memtable.wal.wal_seq().cmp(&a.memtable.wal.wal_seq()));

        // L0 is queried newest-first for get()'s early-termination trick.
        if let Some(l0) = levels.first_mut() {
            l0.sort_by(|a, b| b.properties.max_lsn.cmp(&a.properties.max_lsn));
        }
        // Levels ≥ 1 are non-overlapping; keep them sorted by min_key so
        // point lookups can binary search.
        for level in levels.iter_mut().skip(1) {
            level.sort_by(|a, b| a.properties.min_key.cmp(&b.properties.min_key));
        }

        let inner = EngineInner {
            manifest,
            active: memtable,
            active_entry_count: 0,
            frozen: frozen_memtables,
            levels,
            data_dir: path_str,
            config,
            read_only: false,
        };

        let inner = Arc::new(RwLock::new(inner));
        let metrics = Arc::new(Metrics::default());
        let (compactor_tx, compactor_rx) = crossbeam::channel::bounded(1);

        let poll_interval = {
            let guard = inner
                .read()
                .map_err(|_| EngineError::Internal("RwLock poisoned".into()))?;
            Duration::from_millis(guard.config.compaction_poll_interval_ms)
        };

        let worker_inner = Arc::clone(&inner);
        let worker_metrics = Arc::clone(&metrics);
        let handle = std::thread::Builder::new()
            .name("compaction-worker".into())
            .spawn(move || compaction_worker(worker_inner, worker_metrics, compactor_rx, poll_interval))
            .map_err(EngineError::Io)?;

        Ok(Self {
            inner,
            metrics,
            compactor_tx,
            compactor_handle: Arc::new(Mutex::new(Some(handle))),
        })
    }

    /// Gracefully shuts down the engine.
    ///
    /// Stops the background compaction worker, flushes all remaining
    /// frozen memtables, checkpoints the manifest, and fsyncs all
    /// directories to ensure full durability.
    pub fn close(&self) -> Result<(), EngineError> {
        let _ = self.compactor_tx.send(CompactorMsg::Stop);
        if let Ok(mut guard) = self.compactor_handle.lock()
            && let Some(handle) = guard.take()
        {
            let _ = handle.join();
        }

        let mut inner = self
            .inner
            .write()
            .map_err(|_| EngineError::Internal("RwLock poisoned".into()))?;

        while !inner.frozen.is_empty() {
            Self::flush_frozen_to_sstable_inner(&mut inner)?;
        }

        let max_lsn = inner.active.max_lsn();
        inner.manifest.update_lsn(max_lsn)?;
        inner.manifest.checkpoint()?;

        let manifest_dir = format!("{}/{}", inner.data_dir, MANIFEST_DIR);
        let wal_dir = format!("{}/{}", inner.data_dir, WAL_DIR);
        let sstable_dir = format!("{}/{}", inner.data_dir, SSTABLE_DIR);
        let bloom_dir = format!("{}/{}", inner.data_dir, BLOOM_DIR);

        for dir_path in [&manifest_dir, &wal_dir, &sstable_dir, &bloom_dir] {
            if let Ok(dir) = fs::File::open(dir_path) {
                dir.sync_all()?;
            }
        }
        if let Ok(root) = fs::File::open(&inner.data_dir) {
            root.sync_all()?;
        }

        Ok(())
    }

    fn lock_write(&self) -> Result<std::sync::RwLockWriteGuard<'_, EngineInner>, EngineError> {
        self.inner
            .write()
            .map_err(|_| EngineError::Internal("RwLock poisoned".into()))
    }

    fn lock_read(&self) -> Result<std::sync::RwLockReadGuard<'_, EngineInner>, EngineError> {
        self.inner
            .read()
            .map_err(|_| EngineError::Internal("RwLock poisoned".into()))
    }

    /// Converts a disk-full I/O error into a read-only transition,
    /// otherwise passes the error through unchanged.
    fn classify_io(inner: &mut EngineInner, err: impl Into<EngineError>) -> EngineError {
        let err = err.into();
        if let EngineError::Io(ref io_err) = err
            && is_disk_full(io_err)
        {
            inner.read_only = true;
            return EngineError::DiskFull;
        }
        err
    }

    /// Insert a key-value pair.
    ///
    /// Returns `Ok(true)` if the active memtable was frozen (caller should
    /// arrange a flush), `Ok(false)` otherwise.
    pub fn put(&self, key: Vec<u8>, value: Vec<u8>) -> Result<bool, EngineError> {
        let started = Instant::now();
        let mut inner = self.lock_write()?;
        inner.check_writable()?;

        let froze = self.put_inner(&mut inner, key, value)?;
        self.metrics.puts.fetch_add(1, Ordering::Relaxed);
        self.metrics.put_latency.record(started.elapsed());
        Ok(froze)
    }

    fn put_inner(
        &self,
        inner: &mut EngineInner,
        key: Vec<u8>,
        value: Vec<u8>,
    ) -> Result<bool, EngineError> {
        let entries_threshold = inner.config.clamped_entries_threshold();
        let mut froze = false;

        if inner.active_entry_count + 1 > entries_threshold {
            Self::freeze_active(inner)?;
            froze = true;
        }

        match inner.active.put(key.clone(), value.clone()) {
            Ok(()) => {
                inner.active_entry_count += 1;
            }
            Err(MemtableError::FlushRequired) => {
                Self::freeze_active(inner)?;
                inner.active.put(key, value)?;
                inner.active_entry_count = 1;
                froze = true;
            }
            Err(e) => return Err(Self::classify_io(inner, e)),
        }

        if froze {
            let max_lsn = inner.active.max_lsn();
            inner.manifest.update_lsn(max_lsn)?;
        }
        Ok(froze)
    }

    /// Delete a key (insert a point tombstone).
    ///
    /// Returns `Ok(true)` if the active memtable was frozen, `Ok(false)`
    /// otherwise.
    pub fn delete(&self, key: Vec<u8>) -> Result<bool, EngineError> {
        let mut inner = self.lock_write()?;
        inner.check_writable()?;

        let entries_threshold = inner.config.clamped_entries_threshold();
        let mut froze = false;

        if inner.active_entry_count + 1 > entries_threshold {
            Self::freeze_active(&mut inner)?;
            froze = true;
        }

        match inner.active.delete(key.clone()) {
            Ok(()) => {
                inner.active_entry_count += 1;
            }
            Err(MemtableError::FlushRequired) => {
                Self::freeze_active(&mut inner)?;
                inner.active.delete(key)?;
                inner.active_entry_count = 1;
                froze = true;
            }
            Err(e) => return Err(Self::classify_io(&mut inner, e)),
        }

        if froze {
            let max_lsn = inner.active.max_lsn();
            inner.manifest.update_lsn(max_lsn)?;
        }
        self.metrics.deletes.fetch_add(1, Ordering::Relaxed);
        Ok(froze)
    }

    /// Delete all keys in `[start_key, end_key)` (insert a range tombstone).
    ///
    /// Returns `Ok(true)` if the active memtable was frozen, `Ok(false)`
    /// otherwise.
    pub fn delete_range(&self, start_key: Vec<u8>, end_key: Vec<u8>) -> Result<bool, EngineError> {
        let mut inner = self.lock_write()?;
        inner.check_writable()?;

        match inner
            .active
            .delete_range(start_key.clone(), end_key.clone())
        {
            Ok(()) => {
                inner.active_entry_count += 1;
                Ok(false)
            }
            Err(MemtableError::FlushRequired) => {
                Self::freeze_active(&mut inner)?;
                inner.active.delete_range(start_key, end_key)?;
                inner.active_entry_count = 1;

                let max_lsn = inner.active.max_lsn();
                inner.manifest.update_lsn(max_lsn)?;
                Ok(true)
            }
            Err(e) => Err(Self::classify_io(&mut inner, e)),
        }
    }

    /// Inserts `entries` atomically: all are written to the WAL as a single
    /// batch of consecutive LSNs before any is applied to the memtable. A
    /// WAL failure aborts before any memtable mutation.
    pub fn batch_put(&self, entries: Vec<(Vec<u8>, Vec<u8>)>) -> Result<bool, EngineError> {
        let mut inner = self.lock_write()?;
        inner.check_writable()?;

        let n = entries.len();
        match inner.active.batch_put(entries.clone()) {
            Ok(()) => {
                inner.active_entry_count += n;
                Ok(false)
            }
            Err(MemtableError::FlushRequired) => {
                Self::freeze_active(&mut inner)?;
                inner.active.batch_put(entries)?;
                inner.active_entry_count = n;

                let max_lsn = inner.active.max_lsn();
                inner.manifest.update_lsn(max_lsn)?;
                Ok(true)
            }
            Err(e) => Err(Self::classify_io(&mut inner, e)),
        }
    }

    /// Deletes `keys` atomically; same batching discipline as [`Engine::batch_put`].
    pub fn batch_delete(&self, keys: Vec<Vec<u8>>) -> Result<bool, EngineError> {
        let mut inner = self.lock_write()?;
        inner.check_writable()?;

        let n = keys.len();
        match inner.active.batch_delete(keys.clone()) {
            Ok(()) => {
                inner.active_entry_count += n;
                Ok(false)
            }
            Err(MemtableError::FlushRequired) => {
                Self::freeze_active(&mut inner)?;
                inner.active.batch_delete(keys)?;
                inner.active_entry_count = n;

                let max_lsn = inner.active.max_lsn();
                inner.manifest.update_lsn(max_lsn)?;
                Ok(true)
            }
            Err(e) => Err(Self::classify_io(&mut inner, e)),
        }
    }

    /// Look up a single key.
    ///
    /// Returns `Ok(Some(value))` if the key exists, `Ok(None)` if it has
    /// been deleted or was never written.
    ///
    /// Lookup order: active memtable → frozen memtables (newest-first) →
    /// L0 SSTables (newest-first) → levels ≥ 1 (binary search per level,
    /// since tables within a level are non-overlapping).
    pub fn get(&self, key: Vec<u8>) -> Result<Option<Vec<u8>>, EngineError> {
        let started = Instant::now();
        let inner = self.lock_read()?;

        match inner.active.get(&key)? {
            MemtableGetResult::Put(value) => return Ok(Some(value)),
            MemtableGetResult::Delete | MemtableGetResult::RangeDelete => return Ok(None),
            MemtableGetResult::NotFound => {}
        }

        for frozen in &inner.frozen {
            match frozen.get(&key)? {
                MemtableGetResult::Put(value) => return Ok(Some(value)),
                MemtableGetResult::Delete | MemtableGetResult::RangeDelete => return Ok(None),
                MemtableGetResult::NotFound => {}
            }
        }

        let mut best: Option<sstable::GetResult> = None;
        let mut best_lsn: u64 = 0;

        // L0 — newest-first, early-terminating once no remaining table's
        // max_lsn could beat the best result found so far.
        if let Some(l0) = inner.levels.first() {
            for sst in l0 {
                if sst.properties.max_lsn <= best_lsn {
                    break;
                }
                self.metrics.record_bloom(sst.bloom_may_contain(&key));
                match sst.get(&key)? {
                    sstable::GetResult::NotFound => {}
                    result => {
                        let lsn = result.lsn();
                        if lsn > best_lsn {
                            best_lsn = lsn;
                            best = Some(result);
                        }
                    }
                }
            }
        }

        // Levels ≥ 1 — each level's tables are non-overlapping, so binary
        // search for the single table that could contain the key.
        for level in inner.levels.iter().skip(1) {
            let idx = level.partition_point(|s| s.properties.max_key.as_slice() < key.as_slice());
            let Some(sst) = level.get(idx) else { continue };
            if key.as_slice() < sst.properties.min_key.as_slice() {
                continue;
            }
            self.metrics.record_bloom(sst.bloom_may_contain(&key));
            match sst.get(&key)? {
                sstable::GetResult::NotFound => {}
                result => {
                    let lsn = result.lsn();
                    if lsn > best_lsn {
                        best_lsn = lsn;
                        best = Some(result);
                    }
                }
            }
        }

        self.metrics.get_latency.record(started.elapsed());
        match best {
            Some(sstable::GetResult::Put { value, .. }) => Ok(Some(value)),
            Some(sstable::GetResult::Delete { .. } | sstable::GetResult::RangeDelete { .. }) => {
                Ok(None)
            }
            _ => Ok(None),
        }
    }

    /// Scan all live key-value pairs in `[start_key, end_key]`, inclusive of
    /// both bounds, yielding at most `limit` entries.
    ///
    /// Merges entries from all layers and applies point/range tombstone
    /// semantics, returning only currently-visible `(key, value)` pairs in
    /// ascending key order.
    pub fn scan(
        &self,
        start_key: &[u8],
        end_key: &[u8],
        limit: usize,
    ) -> Result<impl Iterator<Item = (Vec<u8>, Vec<u8>)>, EngineError> {
        self.metrics.scans.fetch_add(1, Ordering::Relaxed);
        let merged = self.raw_scan(start_key, end_key)?;
        Ok(VisibilityFilter::new(merged).take(limit))
    }

    fn raw_scan(
        &self,
        start_key: &[u8],
        end_key: &[u8],
    ) -> Result<utils::MergeIterator<'static>, EngineError> {
        let inner = self.lock_read()?;

        let mut iters: Vec<Box<dyn Iterator<Item = Record>>> = Vec::new();

        // `Memtable::scan` already strips tombstones, which is wrong for a
        // cross-layer merge — a delete here must still shadow older data in
        // frozen memtables and SSTables. `iter_for_flush` returns the full
        // unfiltered snapshot (puts, point deletes, and range deletes); we
        // filter it to the requested range ourselves.
        let active_records = memtable_records_in_range(inner.active.iter_for_flush()?, start_key, end_key);
        iters.push(Box::new(active_records.into_iter()));

        for frozen in &inner.frozen {
            let records = memtable_records_in_range(frozen.iter_for_flush()?, start_key, end_key);
            iters.push(Box::new(records.into_iter()));
        }

        for level in &inner.levels {
            for sst in level {
                let overlaps = sst.properties.min_key.as_slice() <= end_key
                    && sst.properties.max_key.as_slice() >= start_key;
                if !overlaps {
                    continue;
                }
                let records: Vec<_> = sst.scan(start_key, end_key)?.collect();
                iters.push(Box::new(records.into_iter()));
            }
        }

        Ok(utils::MergeIterator::new(iters))
    }

    /// Returns a snapshot of engine statistics.
    pub fn stats(&self) -> Result<EngineStats, EngineError> {
        let inner = self.lock_read()?;

        let sstables_per_level: Vec<usize> = inner.levels.iter().map(|l| l.len()).collect();
        let sstables_count: usize = sstables_per_level.iter().sum();
        let total_sst_size_bytes: u64 = inner
            .levels
            .iter()
            .flatten()
            .map(|s| s.file_size())
            .sum();

        Ok(EngineStats {
            frozen_count: inner.frozen.len(),
            sstables_count,
            sstables_per_level,
            total_sst_size_bytes,
            is_compacting: self.metrics.is_compacting.load(Ordering::Relaxed),
            puts: self.metrics.puts.load(Ordering::Relaxed),
            deletes: self.metrics.deletes.load(Ordering::Relaxed),
            scans: self.metrics.scans.load(Ordering::Relaxed),
            bloom_hits: self.metrics.bloom_hits.load(Ordering::Relaxed),
            bloom_misses: self.metrics.bloom_misses.load(Ordering::Relaxed),
            compactions: self.metrics.compactions.load(Ordering::Relaxed),
        })
    }

    /// Returns a coarse health classification for the engine.
    pub fn health(&self) -> Result<Health, EngineError> {
        let inner = self.lock_read()?;
        let l0_file_count = inner.levels.first().map(|l| l.len()).unwrap_or(0);
        Ok(health::classify(
            inner.read_only,
            l0_file_count,
            inner.config.l0_compaction_trigger,
        ))
    }

    /// Freeze the current active memtable and swap in a fresh one. The old
    /// memtable is pushed to the front of `inner.frozen`.
    fn freeze_active(inner: &mut EngineInner) -> Result<(), EngineError> {
        let frozen_wal_id = inner.active.wal.wal_seq();
        let current_max_lsn = inner.active.max_lsn();
        let new_active_wal_id = frozen_wal_id + 1;

        let new_active = Memtable::new_with_policy(
            format!("{}/{}/wal_{:06}.log", inner.data_dir, WAL_DIR, new_active_wal_id),
            None,
            inner.config.memtable_flush_threshold_bytes,
            inner.config.wal_sync_policy,
        )?;

        let old_active = std::mem::replace(&mut inner.active, new_active);
        let frozen = old_active.frozen()?;
        inner.frozen.insert(0, frozen);
        inner.active_entry_count = 0;

        inner.active.inject_max_lsn(current_max_lsn);

        inner.manifest.add_frozen_wal(frozen_wal_id)?;
        inner.manifest.set_active_wal(new_active_wal_id)?;

        Ok(())
    }

    /// Flush the oldest frozen memtable to a new L0 SSTable.
    ///
    /// Returns `Ok(true)` if a frozen memtable was flushed, `Ok(false)` if
    /// there were none.
    pub fn flush_oldest_frozen(&self) -> Result<bool, EngineError> {
        let started = Instant::now();
        let mut inner = self.lock_write()?;
        if inner.frozen.is_empty() {
            return Ok(false);
        }
        Self::flush_frozen_to_sstable_inner(&mut inner)?;
        self.metrics.flush_latency.record(started.elapsed());
        Ok(true)
    }

    /// Flush **all** frozen memtables to SSTables. Returns the count flushed.
    pub fn flush_all_frozen(&self) -> Result<usize, EngineError> {
        let mut inner = self.lock_write()?;
        let mut count = 0usize;
        while !inner.frozen.is_empty() {
            Self::flush_frozen_to_sstable_inner(&mut inner)?;
            count += 1;
        }
        Ok(count)
    }

    fn next_sstable_id(inner: &mut EngineInner) -> Result<u64, EngineError> {
        Ok(inner.manifest.allocate_sst_id()?)
    }

    fn flush_frozen_to_sstable_inner(inner: &mut EngineInner) -> Result<(), EngineError> {
        if inner.frozen.is_empty() {
            return Ok(());
        }

        let frozen = inner
            .frozen
            .pop()
            .ok_or_else(|| EngineError::Internal("frozen list became empty unexpectedly".into()))?;
        let frozen_wal_id = frozen.memtable.wal.wal_seq();

        let records: Vec<_> = frozen.iter_for_flush()?.collect();

        let mut point_entries = Vec::new();
        let mut range_tombstones = Vec::new();
        for record in records {
            match record {
                MemtableRecord::Put { key, value, lsn, timestamp, .. } => {
                    point_entries.push(PointEntry { key, value: Some(value), lsn, timestamp });
                }
                MemtableRecord::Delete { key, lsn, timestamp, .. } => {
                    point_entries.push(PointEntry { key, value: None, lsn, timestamp });
                }
                MemtableRecord::RangeDelete { start, end, lsn, timestamp } => {
                    range_tombstones.push(RangeTombstone { start, end, lsn, timestamp });
                }
            }
        }

        let sstable_id = Self::next_sstable_id(inner)?;
        let sstable_path = format!(
            "{}/{}/level_0_{:06}.sst",
            inner.data_dir, SSTABLE_DIR, sstable_id
        );

        let point_count = point_entries.len();
        sstable::SstWriter::new(&sstable_path)
            .with_compression(inner.config.compression)
            .with_bloom_fp_rate(inner.config.bloom_false_positive_rate)
            .with_sparse_index_interval(inner.config.sparse_index_interval)
            .build(point_entries.into_iter(), point_count, range_tombstones.into_iter())?;

        let mut table = SSTable::open(&sstable_path)?;
        table.id = sstable_id;
        inner.level_mut(0).insert(0, Arc::new(table));

        inner.manifest.add_sstable(ManifestSstEntry {
            id: sstable_id,
            path: sstable_path.into(),
            level: 0,
        })?;
        inner.manifest.remove_frozen_wal(frozen_wal_id)?;

        Ok(())
    }

    // --------------------------------------------------------------------------------------------
    // Compaction API
    // --------------------------------------------------------------------------------------------

    /// Requests an out-of-band compaction round from the background worker
    /// and returns immediately without waiting for it to run.
    ///
    /// Returns [`EngineError::Busy`] if a compaction round is already in
    /// progress — the request is implicitly satisfied by the one already
    /// running.
    pub fn compact_now(&self) -> Result<(), EngineError> {
        if self.metrics.is_compacting.load(Ordering::Relaxed) {
            return Err(EngineError::Busy);
        }
        let _ = self.compactor_tx.try_send(CompactorMsg::Wake);
        Ok(())
    }

    fn apply_compaction_result(
        inner: &mut EngineInner,
        result: crate::compaction::CompactionResult,
    ) -> Result<(), EngineError> {
        for level in inner.levels.iter_mut() {
            level.retain(|sst| !result.removed_ids.contains(&sst.id));
        }

        for (level, path, id) in result.added {
            let mut table = SSTable::open(&path)?;
            table.id = id;
            inner.level_mut(level as usize).push(Arc::new(table));
        }

        if let Some(l0) = inner.levels.first_mut() {
            l0.sort_by(|a, b| b.properties.max_lsn.cmp(&a.properties.max_lsn));
        }
        for level in inner.levels.iter_mut().skip(1) {
            level.sort_by(|a, b| a.properties.min_key.cmp(&b.properties.min_key));
        }

        Ok(())
    }
}

/// Type alias preserving the public scan iterator name.
pub type EngineScanIterator = utils::MergeIterator<'static>;

/// Converts a [`MemtableRecord`] stream into [`Record`]s overlapping
/// `[start_key, end_key]`, preserving point and range tombstones so
/// cross-layer visibility resolution still sees them.
fn memtable_records_in_range(
    records: impl Iterator<Item = MemtableRecord>,
    start_key: &[u8],
    end_key: &[u8],
) -> Vec<Record> {
    records
        .filter_map(|record| match record {
            MemtableRecord::Put { key, value, lsn, timestamp, .. } => {
                if key.as_slice() >= start_key && key.as_slice() <= end_key {
                    Some(Record::Put { key, value, lsn, timestamp })
                } else {
                    None
                }
            }
            MemtableRecord::Delete { key, lsn, timestamp, .. } => {
                if key.as_slice() >= start_key && key.as_slice() <= end_key {
                    Some(Record::Delete { key, lsn, timestamp })
                } else {
                    None
                }
            }
            MemtableRecord::RangeDelete { start, end, lsn, timestamp } => {
                // Range tombstones keep their own `[start, end)` semantics;
                // only the query's end bound is inclusive, so the overlap
                // test compares the tombstone start against `end_key` itself.
                if start.as_slice() <= end_key && end.as_slice() > start_key {
                    Some(Record::RangeDelete { start, end, lsn, timestamp })
                } else {
                    None
                }
            }
        })
        .collect()
}

fn compaction_worker(
    inner: Arc<RwLock<EngineInner>>,
    metrics: Arc<Metrics>,
    rx: crossbeam::channel::Receiver<CompactorMsg>,
    poll_interval: Duration,
) {
    let strategy = LeveledCompaction;
    loop {
        match rx.recv_timeout(poll_interval) {
            Ok(CompactorMsg::Stop) | Err(crossbeam::channel::RecvTimeoutError::Disconnected) => {
                return;
            }
            Ok(CompactorMsg::Wake) | Err(crossbeam::channel::RecvTimeoutError::Timeout) => {}
        }

        metrics.is_compacting.store(true, Ordering::Relaxed);
        let outcome = run_one_round(&inner, &strategy);
        metrics.is_compacting.store(false, Ordering::Relaxed);

        match outcome {
            Ok(true) => {
                metrics.compactions.fetch_add(1, Ordering::Relaxed);
            }
            Ok(false) => {}
            Err(e) => {
                tracing::warn!(%e, "background compaction round failed");
            }
        }
    }
}

fn run_one_round(
    inner: &Arc<RwLock<EngineInner>>,
    strategy: &dyn CompactionStrategy,
) -> Result<bool, EngineError> {
    let mut guard = inner
        .write()
        .map_err(|_| EngineError::Internal("RwLock poisoned".into()))?;
    if guard.read_only {
        return Ok(false);
    }

    let levels = guard.levels.clone();
    let data_dir = guard.data_dir.clone();
    let inner_mut = &mut *guard;
    let result = strategy
        .compact(&levels, &mut inner_mut.manifest, &data_dir, &inner_mut.config)
        .map_err(|e| EngineError::Internal(format!("compaction failed: {e}")))?;

    match result {
        None => Ok(false),
        Some(cr) => {
            Engine::apply_compaction_result(&mut guard, cr)?;
            Ok(true)
        }
    }
}
