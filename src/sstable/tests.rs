use super::*;
use crate::engine::{PointEntry, RangeTombstone};
use tempfile::tempdir;

fn build_table(
    dir: &std::path::Path,
    name: &str,
    entries: Vec<PointEntry>,
    ranges: Vec<RangeTombstone>,
    compression: Compression,
) -> SSTable {
    let path = dir.join(name);
    let point_count = entries.len();
    SstWriter::new(&path)
        .with_compression(compression)
        .with_sparse_index_interval(2)
        .build(entries.into_iter(), point_count, ranges.into_iter())
        .expect("build sstable");
    SSTable::open(&path).expect("open sstable")
}

#[test]
fn roundtrip_get_uncompressed() {
    let dir = tempdir().unwrap();
    let entries = vec![
        PointEntry::new(b"a".to_vec(), b"1".to_vec(), 1, 100),
        PointEntry::new(b"b".to_vec(), b"2".to_vec(), 2, 101),
        PointEntry::new(b"c".to_vec(), b"3".to_vec(), 3, 102),
    ];
    let sst = build_table(dir.path(), "a.sst", entries, vec![], Compression::None);

    assert_eq!(
        sst.get(b"b").unwrap(),
        GetResult::Put {
            value: b"2".to_vec(),
            lsn: 2,
            timestamp: 101
        }
    );
    assert_eq!(sst.get(b"z").unwrap(), GetResult::NotFound);
}

#[test]
fn roundtrip_get_gzip() {
    let dir = tempdir().unwrap();
    let entries: Vec<PointEntry> = (0..50)
        .map(|i| PointEntry::new(format!("key-{i:03}").into_bytes(), vec![i as u8; 16], i as u64, i as u64))
        .collect();
    let sst = build_table(dir.path(), "b.sst", entries, vec![], Compression::Gzip);

    match sst.get(b"key-025").unwrap() {
        GetResult::Put { value, lsn, .. } => {
            assert_eq!(lsn, 25);
            assert_eq!(value, vec![25u8; 16]);
        }
        other => panic!("expected Put, got {other:?}"),
    }
}

#[test]
fn point_delete_shadows_earlier_put() {
    let dir = tempdir().unwrap();
    let entries = vec![
        PointEntry::new(b"x".to_vec(), b"old".to_vec(), 1, 10),
        PointEntry::new_delete(b"y".to_vec(), 2, 20),
    ];
    let sst = build_table(dir.path(), "c.sst", entries, vec![], Compression::None);

    assert_eq!(
        sst.get(b"y").unwrap(),
        GetResult::Delete { lsn: 2, timestamp: 20 }
    );
}

#[test]
fn range_tombstone_shadows_lower_lsn_point() {
    let dir = tempdir().unwrap();
    let entries = vec![PointEntry::new(b"m".to_vec(), b"v".to_vec(), 1, 10)];
    let ranges = vec![RangeTombstone::new(b"a".to_vec(), b"z".to_vec(), 5, 50)];
    let sst = build_table(dir.path(), "d.sst", entries, ranges, Compression::None);

    assert_eq!(
        sst.get(b"m").unwrap(),
        GetResult::RangeDelete { lsn: 5, timestamp: 50 }
    );
}

#[test]
fn point_with_higher_lsn_wins_over_range_tombstone() {
    let dir = tempdir().unwrap();
    let entries = vec![PointEntry::new(b"m".to_vec(), b"v2".to_vec(), 10, 100)];
    let ranges = vec![RangeTombstone::new(b"a".to_vec(), b"z".to_vec(), 5, 50)];
    let sst = build_table(dir.path(), "e.sst", entries, ranges, Compression::None);

    assert_eq!(
        sst.get(b"m").unwrap(),
        GetResult::Put {
            value: b"v2".to_vec(),
            lsn: 10,
            timestamp: 100
        }
    );
}

#[test]
fn bloom_sidecar_rejects_absent_key() {
    let dir = tempdir().unwrap();
    let entries: Vec<PointEntry> = (0..200)
        .map(|i| PointEntry::new(format!("present-{i}").into_bytes(), vec![0u8], i, i))
        .collect();
    let sst = build_table(dir.path(), "f.sst", entries, vec![], Compression::None);

    assert!(sst.bloom.is_some());
    // Extremely unlikely to collide at the default 1% FP rate across one key.
    let rejected_count = (0..20)
        .filter(|i| !sst.bloom_may_contain(format!("absent-{i}").as_bytes()))
        .count();
    assert!(rejected_count > 0, "bloom sidecar should reject most absent keys");
}

#[test]
fn scan_yields_sorted_records_in_range() {
    let dir = tempdir().unwrap();
    let entries = vec![
        PointEntry::new(b"a".to_vec(), b"1".to_vec(), 1, 1),
        PointEntry::new(b"b".to_vec(), b"2".to_vec(), 2, 2),
        PointEntry::new(b"c".to_vec(), b"3".to_vec(), 3, 3),
        PointEntry::new(b"d".to_vec(), b"4".to_vec(), 4, 4),
    ];
    let sst = build_table(dir.path(), "g.sst", entries, vec![], Compression::None);

    let keys: Vec<Vec<u8>> = sst
        .scan(b"b", b"c")
        .unwrap()
        .map(|r| r.key().to_vec())
        .collect();
    assert_eq!(keys, vec![b"b".to_vec(), b"c".to_vec()]);
}

#[test]
fn sparse_index_samples_first_entry_always() {
    let dir = tempdir().unwrap();
    let entries: Vec<PointEntry> = (0..30)
        .map(|i| PointEntry::new(format!("k{i:03}").into_bytes(), vec![1u8], i, i))
        .collect();
    let sst = build_table(dir.path(), "h.sst", entries, vec![], Compression::None);

    assert!(!sst.index.is_empty());
    assert_eq!(sst.index[0].separator_key, b"k000".to_vec());
    assert!(sst.index.len() < 30, "sparse index should sample fewer than every entry");
}

#[test]
fn build_rejects_empty_input() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("empty.sst");
    let result = SstWriter::new(&path).build(std::iter::empty(), 0, std::iter::empty());
    assert!(result.is_err());
}

#[test]
fn header_and_footer_checksums_detect_corruption() {
    let dir = tempdir().unwrap();
    let entries = vec![PointEntry::new(b"a".to_vec(), b"1".to_vec(), 1, 1)];
    let path = dir.path().join("corrupt.sst");
    SstWriter::new(&path)
        .build(entries.into_iter(), 1, std::iter::empty())
        .unwrap();

    let mut bytes = std::fs::read(&path).unwrap();
    let mid = bytes.len() / 2;
    bytes[mid] ^= 0xFF;
    std::fs::write(&path, &bytes).unwrap();

    assert!(SSTable::open(&path).is_err());
}
