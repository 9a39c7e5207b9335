use super::*;
use std::time::Duration;
use tempfile::tempdir;

fn open_default(dir: &std::path::Path) -> Engine {
    Engine::open(EngineConfig::new(dir.to_str().unwrap())).unwrap()
}

fn wait_until(mut pred: impl FnMut() -> bool, timeout: Duration) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if pred() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(5));
    }
    false
}

/// Waits for at least one more background compaction round to complete
/// past `baseline`. Polling `is_compacting` directly is racy: the flag
/// only flips true once the worker thread wakes and picks up the round,
/// which can be later than the first poll.
fn wait_for_compaction_past(engine: &Engine, baseline: u64, timeout: Duration) {
    assert!(
        wait_until(
            || engine.stats().unwrap().compactions > baseline,
            timeout
        ),
        "no compaction round completed within {timeout:?}"
    );
}

#[test]
fn basic_crud() {
    let dir = tempdir().unwrap();
    let engine = open_default(dir.path());

    engine.put(b"k1".to_vec(), b"v1".to_vec()).unwrap();
    engine.put(b"k1".to_vec(), b"v2".to_vec()).unwrap();
    engine.delete(b"k2".to_vec()).unwrap();

    assert_eq!(engine.get(b"k1".to_vec()).unwrap(), Some(b"v2".to_vec()));
    assert_eq!(engine.get(b"k2".to_vec()).unwrap(), None);
    assert_eq!(engine.get(b"k3".to_vec()).unwrap(), None);

    engine.close().unwrap();
}

#[test]
fn flush_boundary_creates_l0_sstables_and_survives_restart() {
    let dir = tempdir().unwrap();
    let config = EngineConfig {
        memtable_flush_threshold_entries: 50,
        ..EngineConfig::new(dir.path().to_str().unwrap())
    };
    let engine = Engine::open(config).unwrap();

    for i in 0..250u32 {
        let key = format!("key_{i:04}").into_bytes();
        let value = format!("val_{i}").into_bytes();
        engine.put(key, value).unwrap();
    }
    engine.flush_all_frozen().unwrap();

    let stats = engine.stats().unwrap();
    assert!(
        stats.sstables_count >= 5,
        "expected at least 5 L0 SSTables, got {}",
        stats.sstables_count
    );

    assert_eq!(
        engine.get(b"key_0123".to_vec()).unwrap(),
        Some(b"val_123".to_vec())
    );

    let scanned: Vec<_> = engine.scan(b"key_0000", b"key_0249", 1000).unwrap().collect();
    assert_eq!(scanned.len(), 250);
    for i in 0..249 {
        assert!(scanned[i].0 < scanned[i + 1].0);
    }

    engine.close().unwrap();

    let config = EngineConfig::new(dir.path().to_str().unwrap());
    let reopened = Engine::open(config).unwrap();
    for i in 0..250u32 {
        let key = format!("key_{i:04}").into_bytes();
        let value = format!("val_{i}").into_bytes();
        assert_eq!(reopened.get(key).unwrap(), Some(value));
    }
    reopened.close().unwrap();
}

#[test]
fn compaction_drops_tombstoned_entries_and_leaves_the_rest_intact() {
    let dir = tempdir().unwrap();
    let config = EngineConfig {
        memtable_flush_threshold_entries: 50,
        l0_compaction_trigger: 2,
        compaction_poll_interval_ms: 10,
        ..EngineConfig::new(dir.path().to_str().unwrap())
    };
    let engine = Engine::open(config).unwrap();

    for i in 0..300u32 {
        let key = format!("compact_test_{i}").into_bytes();
        let value = format!("value_{i}").into_bytes();
        engine.put(key, value).unwrap();
    }
    for i in 0..20u32 {
        engine.delete(format!("compact_test_{i}").into_bytes()).unwrap();
    }
    engine.flush_all_frozen().unwrap();

    let baseline = engine.stats().unwrap().compactions;
    engine.compact_now().unwrap();
    wait_for_compaction_past(&engine, baseline, Duration::from_secs(5));

    assert_eq!(engine.get(b"compact_test_5".to_vec()).unwrap(), None);
    assert_eq!(
        engine.get(b"compact_test_25".to_vec()).unwrap(),
        Some(b"value_25".to_vec())
    );

    let scanned: Vec<_> = engine
        .scan(b"compact_test_", b"compact_test_~", 1000)
        .unwrap()
        .collect();
    assert_eq!(scanned.len(), 280);
    let mut seen = std::collections::HashSet::new();
    for (key, _) in &scanned {
        assert!(seen.insert(key.clone()), "duplicate key in scan output");
    }

    engine.close().unwrap();
}

#[test]
fn bloom_filters_never_produce_false_negatives() {
    let dir = tempdir().unwrap();
    let config = EngineConfig {
        memtable_flush_threshold_entries: 50,
        ..EngineConfig::new(dir.path().to_str().unwrap())
    };
    let engine = Engine::open(config).unwrap();

    for i in 0..500u32 {
        let key = format!("bloom_key_{i}").into_bytes();
        engine.put(key, b"v".to_vec()).unwrap();
    }
    engine.flush_all_frozen().unwrap();

    for i in 0..500u32 {
        let key = format!("bloom_key_{i}").into_bytes();
        assert_eq!(engine.get(key).unwrap(), Some(b"v".to_vec()));
    }
    for i in 500..1000u32 {
        let key = format!("bloom_key_{i}").into_bytes();
        assert_eq!(engine.get(key).unwrap(), None);
    }

    let stats = engine.stats().unwrap();
    assert!(stats.bloom_hits + stats.bloom_misses > 0);

    engine.close().unwrap();
}

#[test]
fn concurrent_writers_and_readers_lose_no_data() {
    let dir = tempdir().unwrap();
    let engine = Arc::new(open_default(dir.path()));

    let mut handles = Vec::new();
    for i in 0..50u32 {
        let engine = Arc::clone(&engine);
        handles.push(std::thread::spawn(move || {
            let key = format!("concurrent_{i:02}").into_bytes();
            let value = format!("value_{i}").into_bytes();
            engine.put(key, value).unwrap();
        }));
    }
    for j in 0..50u32 {
        let engine = Arc::clone(&engine);
        handles.push(std::thread::spawn(move || {
            let key = format!("concurrent_{:02}", j % 50).into_bytes();
            let _ = engine.get(key);
        }));
    }
    for h in handles {
        h.join().unwrap();
    }

    for i in 0..50u32 {
        let key = format!("concurrent_{i:02}").into_bytes();
        let expected = format!("value_{i}").into_bytes();
        assert_eq!(engine.get(key).unwrap(), Some(expected));
    }

    // Literal spec scenario: `scan("concurrent_00", "concurrent_49", limit)`
    // over the full inclusive range returns exactly 50 entries.
    let scanned: Vec<_> =
        engine.scan(b"concurrent_00", b"concurrent_49", 1000).unwrap().collect();
    assert_eq!(scanned.len(), 50);

    engine.close().unwrap();
}

#[test]
fn crash_recovery_preserves_every_acknowledged_write() {
    let dir = tempdir().unwrap();
    {
        let engine = open_default(dir.path());
        for i in 0..100u32 {
            let key = format!("crash_key_{i:03}").into_bytes();
            let value = format!("crash_value_{i}").into_bytes();
            engine.put(key, value).unwrap();
        }
        // No explicit close — simulates an abrupt crash with an `Always`
        // sync policy, under which every acknowledged write is already
        // durable on disk.
    }

    let recovered = open_default(dir.path());
    for i in 0..100u32 {
        let key = format!("crash_key_{i:03}").into_bytes();
        let expected = format!("crash_value_{i}").into_bytes();
        assert_eq!(recovered.get(key).unwrap(), Some(expected));
    }
    recovered.close().unwrap();
}

#[test]
fn open_recovers_past_a_corrupted_trailing_wal_record() {
    use std::io::{Seek, SeekFrom, Write};

    let dir = tempdir().unwrap();
    {
        let engine = open_default(dir.path());
        for i in 0..10u32 {
            let key = format!("wal_key_{i:02}").into_bytes();
            let value = format!("wal_value_{i}").into_bytes();
            engine.put(key, value).unwrap();
        }
        // No explicit close — leaves the active WAL as the only record of
        // these writes.
    }

    // Corrupt the checksum of the last record written to the active WAL.
    let wal_path = dir.path().join(WAL_DIR).join("wal_000000.log");
    let mut f = std::fs::OpenOptions::new()
        .read(true)
        .write(true)
        .open(&wal_path)
        .unwrap();
    f.seek(SeekFrom::End(-2)).unwrap();
    f.write_all(&[0x13, 0x37]).unwrap();
    f.sync_all().unwrap();
    drop(f);

    // Open must succeed despite the corrupted tail.
    let recovered = open_default(dir.path());
    for i in 0..9u32 {
        let key = format!("wal_key_{i:02}").into_bytes();
        let expected = format!("wal_value_{i}").into_bytes();
        assert_eq!(recovered.get(key).unwrap(), Some(expected));
    }
    assert_eq!(recovered.get(b"wal_key_09".to_vec()).unwrap(), None);

    recovered.close().unwrap();
}

#[test]
fn empty_key_is_rejected_empty_value_is_accepted() {
    let dir = tempdir().unwrap();
    let engine = open_default(dir.path());

    assert!(engine.put(Vec::new(), b"v".to_vec()).is_err());
    engine.put(b"k".to_vec(), Vec::new()).unwrap();
    assert_eq!(engine.get(b"k".to_vec()).unwrap(), Some(Vec::new()));

    engine.close().unwrap();
}

#[test]
fn scan_boundary_behaviors() {
    let dir = tempdir().unwrap();
    let engine = open_default(dir.path());

    // Empty store.
    assert_eq!(engine.scan(b"a", b"z", 1000).unwrap().count(), 0);

    engine.put(b"a".to_vec(), b"1".to_vec()).unwrap();
    engine.put(b"b".to_vec(), b"2".to_vec()).unwrap();
    engine.put(b"c".to_vec(), b"3".to_vec()).unwrap();

    // start > end yields an empty sequence, not an error.
    assert_eq!(engine.scan(b"z", b"a", 1000).unwrap().count(), 0);

    // end_key is inclusive: "c" itself is returned.
    let scanned: Vec<_> = engine.scan(b"a", b"c", 1000).unwrap().collect();
    assert_eq!(
        scanned,
        vec![
            (b"a".to_vec(), b"1".to_vec()),
            (b"b".to_vec(), b"2".to_vec()),
            (b"c".to_vec(), b"3".to_vec())
        ]
    );

    // limit caps the number of live entries returned, even though more exist.
    let limited: Vec<_> = engine.scan(b"a", b"c", 2).unwrap().collect();
    assert_eq!(
        limited,
        vec![(b"a".to_vec(), b"1".to_vec()), (b"b".to_vec(), b"2".to_vec())]
    );

    engine.close().unwrap();
}

#[test]
fn repeated_writes_to_the_same_key_yield_one_live_entry() {
    let dir = tempdir().unwrap();
    let engine = open_default(dir.path());

    for i in 0..10u32 {
        engine
            .put(b"dup".to_vec(), format!("v{i}").into_bytes())
            .unwrap();
    }
    assert_eq!(engine.get(b"dup".to_vec()).unwrap(), Some(b"v9".to_vec()));
    let scanned: Vec<_> = engine.scan(b"dup", b"dup", 10).unwrap().collect();
    assert_eq!(scanned.len(), 1);

    engine.close().unwrap();
}

#[test]
fn put_delete_put_observationally_equals_a_single_put() {
    let dir = tempdir().unwrap();
    let engine = open_default(dir.path());

    engine.put(b"k".to_vec(), b"v1".to_vec()).unwrap();
    engine.delete(b"k".to_vec()).unwrap();
    engine.put(b"k".to_vec(), b"v2".to_vec()).unwrap();

    assert_eq!(engine.get(b"k".to_vec()).unwrap(), Some(b"v2".to_vec()));

    engine.close().unwrap();
}

#[test]
fn delete_range_hides_every_key_in_range_across_layers() {
    let dir = tempdir().unwrap();
    let config = EngineConfig {
        memtable_flush_threshold_entries: 50,
        ..EngineConfig::new(dir.path().to_str().unwrap())
    };
    let engine = Engine::open(config).unwrap();

    for i in 0..20u32 {
        let key = format!("range_{i:02}").into_bytes();
        engine.put(key, b"v".to_vec()).unwrap();
    }
    engine.flush_all_frozen().unwrap();

    engine
        .delete_range(b"range_05".to_vec(), b"range_15".to_vec())
        .unwrap();

    for i in 5..15u32 {
        let key = format!("range_{i:02}").into_bytes();
        assert_eq!(engine.get(key).unwrap(), None);
    }
    assert_eq!(engine.get(b"range_04".to_vec()).unwrap(), Some(b"v".to_vec()));
    assert_eq!(engine.get(b"range_15".to_vec()).unwrap(), Some(b"v".to_vec()));

    engine.close().unwrap();
}

#[test]
fn batch_put_and_batch_delete_are_atomic_and_visible() {
    let dir = tempdir().unwrap();
    let engine = open_default(dir.path());

    engine
        .batch_put(vec![
            (b"a".to_vec(), b"1".to_vec()),
            (b"b".to_vec(), b"2".to_vec()),
            (b"c".to_vec(), b"3".to_vec()),
        ])
        .unwrap();
    assert_eq!(engine.get(b"a".to_vec()).unwrap(), Some(b"1".to_vec()));
    assert_eq!(engine.get(b"c".to_vec()).unwrap(), Some(b"3".to_vec()));

    engine
        .batch_delete(vec![b"a".to_vec(), b"b".to_vec()])
        .unwrap();
    assert_eq!(engine.get(b"a".to_vec()).unwrap(), None);
    assert_eq!(engine.get(b"b".to_vec()).unwrap(), None);
    assert_eq!(engine.get(b"c".to_vec()).unwrap(), Some(b"3".to_vec()));

    engine.close().unwrap();
}

#[test]
fn health_reports_degraded_when_l0_backlog_exceeds_twice_the_trigger() {
    let dir = tempdir().unwrap();
    let config = EngineConfig {
        memtable_flush_threshold_entries: 50,
        l0_compaction_trigger: 2,
        compaction_poll_interval_ms: 60_000,
        ..EngineConfig::new(dir.path().to_str().unwrap())
    };
    let engine = Engine::open(config).unwrap();

    assert_eq!(engine.health().unwrap().status, HealthStatus::Healthy);

    for batch in 0..6u32 {
        for i in 0..50u32 {
            let key = format!("health_{batch}_{i:03}").into_bytes();
            engine.put(key, b"v".to_vec()).unwrap();
        }
    }
    engine.flush_all_frozen().unwrap();

    let health = engine.health().unwrap();
    assert_eq!(health.status, HealthStatus::Degraded);
    assert!(!health.read_only);

    engine.close().unwrap();
}

#[test]
fn compact_now_does_not_change_the_key_value_mapping() {
    let dir = tempdir().unwrap();
    let config = EngineConfig {
        memtable_flush_threshold_entries: 50,
        l0_compaction_trigger: 2,
        compaction_poll_interval_ms: 10,
        ..EngineConfig::new(dir.path().to_str().unwrap())
    };
    let engine = Engine::open(config).unwrap();

    for i in 0..200u32 {
        let key = format!("stable_{i:03}").into_bytes();
        let value = format!("v{i}").into_bytes();
        engine.put(key, value).unwrap();
    }
    engine.flush_all_frozen().unwrap();

    let before: Vec<_> = engine.scan(b"stable_000", b"stable_199", 1000).unwrap().collect();

    let baseline = engine.stats().unwrap().compactions;
    engine.compact_now().unwrap();
    wait_for_compaction_past(&engine, baseline, Duration::from_secs(5));

    let after: Vec<_> = engine.scan(b"stable_000", b"stable_199", 1000).unwrap().collect();
    assert_eq!(before, after);

    engine.close().unwrap();
}
