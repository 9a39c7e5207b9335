//! # ledgerdb
//!
//! An embeddable, persistent, ordered key-value storage engine built on a
//! **leveled Log-Structured Merge Tree (LSM-tree)**. Designed for fast
//! writes and crash-safe single-node operation.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────┐
//! │                        Engine                            │
//! │  ┌────────────┐  ┌──────────────┐  ┌──────────────────┐ │
//! │  │  Active     │  │   Frozen     │  │  L0  L1  L2  …   │ │
//! │  │  Memtable   │  │  Memtables   │  │  SSTables (disk) │ │
//! │  │  + WAL      │  │  + WALs      │  │                  │ │
//! │  └─────┬───────┘  └──────┬───────┘  └─────────┬────────┘ │
//! │        │   freeze        │   flush            │          │
//! │        └─────────►       └────────►    (L0→L1, ℓ→ℓ+1)    │
//! │                                                           │
//! │  ┌─────────────────────────────────────────────────────┐  │
//! │  │   Leveled compaction (background worker thread)     │  │
//! │  └─────────────────────────────────────────────────────┘  │
//! │                                                           │
//! │  ┌─────────────────────────────────────────────────────┐  │
//! │  │           Manifest (WAL + snapshot model)            │  │
//! │  └─────────────────────────────────────────────────────┘  │
//! └───────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`engine`] | Core storage engine — open, read, write, scan, flush, compact, health |
//! | [`engine::visibility`] | Tombstone-aware filtering of merged record streams |
//! | [`engine::health`] | Hand-rolled counters, latency histograms, readiness classification |
//! | [`memtable`] | In-memory write buffer with multi-version entries and range tombstones |
//! | [`wal`] | Generic, CRC-protected write-ahead log for crash recovery |
//! | [`sstable`] | Immutable, sorted, on-disk tables with bloom filters and sparse indices |
//! | [`manifest`] | Persistent metadata manager (WAL + snapshot model) |
//! | [`compaction`] | Leveled compaction: L0→L1 and ℓ→ℓ+1 triggers |
//!
//! ## Key Features
//!
//! - **Write-ahead logging** — every mutation is persisted to a WAL before
//!   being acknowledged, guaranteeing durability and crash recovery.
//! - **Multi-version concurrency** — multiple versions per key, ordered by
//!   log sequence number (LSN) only. Reads always see the latest committed
//!   version.
//! - **Point and range tombstones** — efficient delete semantics for both
//!   individual keys and key ranges.
//! - **Bloom filter lookups** — each SSTable carries a sidecar bloom filter
//!   for fast negative point-lookup responses.
//! - **Block-level CRC32 integrity** — every on-disk block (WAL records,
//!   SSTable data blocks, headers, footers) is checksummed.
//! - **Leveled compaction** — a background worker keeps L0 bounded and
//!   pushes data down through progressively larger, non-overlapping levels.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use ledgerdb::engine::{Engine, EngineConfig};
//!
//! let config = EngineConfig::new("/tmp/my_db");
//! let engine = Engine::open(config).unwrap();
//!
//! // Write
//! engine.put(b"hello".to_vec(), b"world".to_vec()).unwrap();
//!
//! // Read
//! assert_eq!(engine.get(b"hello".to_vec()).unwrap(), Some(b"world".to_vec()));
//!
//! // Delete
//! engine.delete(b"hello".to_vec()).unwrap();
//! assert_eq!(engine.get(b"hello".to_vec()).unwrap(), None);
//!
//! // Atomic batch write
//! engine
//!     .batch_put(vec![(b"a".to_vec(), b"1".to_vec()), (b"b".to_vec(), b"2".to_vec())])
//!     .unwrap();
//!
//! // Scan
//! let results: Vec<_> = engine.scan(b"a", b"c", 10).unwrap().collect();
//! assert_eq!(results.len(), 2);
//!
//! // Ask the background worker to compact without waiting for it.
//! let _ = engine.compact_now();
//!
//! // Observability
//! let health = engine.health().unwrap();
//! println!("engine status: {:?}", health.status);
//!
//! // Graceful shutdown
//! engine.close().unwrap();
//! ```

#![allow(dead_code)]

pub mod bloom;
pub mod compaction;
pub mod encoding;
pub mod engine;
pub mod manifest;
pub mod memtable;
pub mod sstable;
pub mod wal;
