// WAL tests
// Appending records, sync policies and replay after a torn write.

use std::fs::{self, OpenOptions};
use std::io::Write;

use quorumkv::types::ValueType;
use quorumkv::wal::{SyncPolicy, WALReader, WALRecord, WALWriter};
use tempfile::tempdir;

// =============================================================================
// Test 1: Records come back in append order with their versions
// =============================================================================
#[test]
fn append_then_replay_in_order() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("1.wal");

    let mut writer = WALWriter::new(&path, SyncPolicy::Never).unwrap();
    writer.append(&WALRecord::put(b"a".to_vec(), b"1".to_vec(), 10)).unwrap();
    writer.append(&WALRecord::put(b"b".to_vec(), b"2".to_vec(), 11)).unwrap();
    writer.append(&WALRecord::delete(b"a".to_vec(), 12)).unwrap();
    drop(writer);

    let reader = WALReader::open(&path).unwrap();
    let records: Vec<WALRecord> = reader.iter().collect();
    assert_eq!(records.len(), 3);
    assert_eq!(records[0], WALRecord::put(b"a".to_vec(), b"1".to_vec(), 10));
    assert_eq!(records[2].record_type, ValueType::Delete);
    assert_eq!(records[2].timestamp, 12);
}

// =============================================================================
// Test 2: Offset tracks the bytes written
// =============================================================================
#[test]
fn offset_matches_file_length() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("1.wal");

    let mut writer = WALWriter::new(&path, SyncPolicy::EveryNWrites(2)).unwrap();
    let record = WALRecord::put(b"key".to_vec(), b"value".to_vec(), 1);
    for _ in 0..5 {
        writer.append(&record).unwrap();
    }
    writer.sync().unwrap();

    assert_eq!(writer.offset(), 5 * record.encoded_size() as u64);
    assert_eq!(fs::metadata(&path).unwrap().len(), writer.offset());
}

// =============================================================================
// Test 3: Reopening appends after the existing records
// =============================================================================
#[test]
fn reopen_appends() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("1.wal");

    {
        let mut writer = WALWriter::new(&path, SyncPolicy::EveryWrite).unwrap();
        writer.append(&WALRecord::put(b"first".to_vec(), b"1".to_vec(), 1)).unwrap();
    }
    {
        let mut writer = WALWriter::new(&path, SyncPolicy::EveryWrite).unwrap();
        assert!(writer.offset() > 0);
        writer.append(&WALRecord::put(b"second".to_vec(), b"2".to_vec(), 2)).unwrap();
    }

    let (cells, torn) = WALReader::open(&path).unwrap().replay();
    assert!(!torn);
    let keys: Vec<_> = cells.iter().map(|c| c.key.clone()).collect();
    assert_eq!(keys, vec![b"first".to_vec(), b"second".to_vec()]);
}

// =============================================================================
// Test 4: Torn tail is dropped, everything before it survives
// =============================================================================
#[test]
fn torn_tail_is_skipped() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("1.wal");

    let mut writer = WALWriter::new(&path, SyncPolicy::EveryWrite).unwrap();
    for i in 0..10u64 {
        let key = format!("key_{i}");
        writer.append(&WALRecord::put(key.into_bytes(), b"v".to_vec(), i + 1)).unwrap();
    }
    drop(writer);

    // chop the last record in half
    let len = fs::metadata(&path).unwrap().len();
    let file = OpenOptions::new().write(true).open(&path).unwrap();
    file.set_len(len - 5).unwrap();

    let (cells, torn) = WALReader::open(&path).unwrap().replay();
    assert!(torn);
    assert_eq!(cells.len(), 9);
    assert_eq!(cells[8].key, b"key_8");
}

// =============================================================================
// Test 5: Garbage after a valid prefix stops the replay
// =============================================================================
#[test]
fn corrupted_record_stops_replay() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("1.wal");

    let mut writer = WALWriter::new(&path, SyncPolicy::Never).unwrap();
    writer.append(&WALRecord::put(b"good".to_vec(), b"v".to_vec(), 1)).unwrap();
    drop(writer);

    let mut file = OpenOptions::new().append(true).open(&path).unwrap();
    file.write_all(&[0xAB; 40]).unwrap();
    drop(file);

    let (cells, torn) = WALReader::open(&path).unwrap().replay();
    assert!(torn);
    assert_eq!(cells.len(), 1);
    assert_eq!(cells[0].key, b"good");
}

// =============================================================================
// Test 6: Empty WAL replays nothing
// =============================================================================
#[test]
fn empty_wal_replays_nothing() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("1.wal");
    WALWriter::new(&path, SyncPolicy::Never).unwrap();

    let (cells, torn) = WALReader::open(&path).unwrap().replay();
    assert!(cells.is_empty());
    assert!(!torn);
}
