// Recovery tests
// Reopening a data directory after a clean close, a crash with unflushed
// writes, and a crash in the middle of a flush or compaction.

use std::fs::{self, OpenOptions};

use quorumkv::db::compaction::{COMPACTION_TMP, compacted_file_name};
use quorumkv::sstable::SSTableBuilder;
use quorumkv::wal::SyncPolicy;
use quorumkv::{Cell, DB, Error, Options, VersionedValue};
use tempfile::tempdir;

fn file_names(dir: &std::path::Path) -> Vec<String> {
    let mut names: Vec<String> = fs::read_dir(dir)
        .unwrap()
        .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
        .collect();
    names.sort();
    names
}

fn table_names(dir: &std::path::Path) -> Vec<String> {
    file_names(dir).into_iter().filter(|n| n.ends_with(".sst")).collect()
}

/// Simulates a crash: the handle is leaked, so close never runs.
fn crash(db: DB) {
    std::mem::forget(db);
}

// =============================================================================
// Test 1: Data survives a clean close and reopen
// =============================================================================
#[test]
fn reopen_after_close() {
    let dir = tempdir().unwrap();
    let ts = {
        let db = DB::open(Options::new(dir.path())).unwrap();
        db.upsert(b"a", b"1", None).unwrap();
        db.flush().unwrap();
        let ts = db.upsert(b"b", b"2", None).unwrap();
        db.remove(b"a", None).unwrap();
        db.close().unwrap();
        ts
    };

    let db = DB::open(Options::new(dir.path())).unwrap();
    assert!(db.get(b"a").unwrap().is_tombstone());
    assert_eq!(db.get(b"b").unwrap(), VersionedValue::value(ts, b"2".to_vec()));
    // the clock never goes back behind what's stored
    assert!(db.next_timestamp() > ts);
}

// =============================================================================
// Test 2: Unflushed writes are replayed from the WAL
// =============================================================================
#[test]
fn recover_unflushed_writes_from_wal() {
    let dir = tempdir().unwrap();
    {
        let db = DB::open(Options::new(dir.path()).sync_policy(SyncPolicy::EveryWrite)).unwrap();
        for i in 0..100u32 {
            let key = format!("key_{i:03}");
            db.upsert(key.as_bytes(), b"v", Some(u64::from(i) + 1)).unwrap();
        }
        db.remove(b"key_007", Some(1000)).unwrap();
        crash(db);
    }
    assert!(file_names(dir.path()).iter().any(|n| n.ends_with(".wal")));

    let db = DB::open(Options::new(dir.path())).unwrap();
    for i in 0..100u32 {
        let key = format!("key_{i:03}");
        let got = db.get(key.as_bytes()).unwrap();
        if i == 7 {
            assert!(got.is_tombstone());
        } else {
            assert_eq!(got.timestamp(), u64::from(i) + 1);
        }
    }
    // replayed into a table; old WALs gone
    assert_eq!(db.stats().sstables, 1);
    assert!(db.next_timestamp() > 1000);
}

// =============================================================================
// Test 3: WALs from several frozen memtables are all replayed
// =============================================================================
#[test]
fn recover_multiple_wals() {
    let dir = tempdir().unwrap();
    {
        let db = DB::open(Options::new(dir.path())).unwrap();
        db.upsert(b"flushed", b"1", Some(5)).unwrap();
        db.flush().unwrap();
        db.upsert(b"pending", b"2", Some(6)).unwrap();
        db.upsert(b"flushed", b"3", Some(7)).unwrap();
        crash(db);
    }

    let db = DB::open(Options::new(dir.path())).unwrap();
    assert_eq!(db.get(b"flushed").unwrap().payload(), Some(b"3".as_slice()));
    assert_eq!(db.get(b"pending").unwrap().payload(), Some(b"2".as_slice()));
    assert_eq!(db.stats().sstables, 2);
}

// =============================================================================
// Test 4: A torn WAL tail loses only the torn record
// =============================================================================
#[test]
fn torn_wal_tail_is_dropped() {
    let dir = tempdir().unwrap();
    {
        let db = DB::open(Options::new(dir.path())).unwrap();
        db.upsert(b"a", b"first", Some(1)).unwrap();
        db.upsert(b"b", b"second", Some(2)).unwrap();
        crash(db);
    }

    let wal = file_names(dir.path())
        .into_iter()
        .find(|n| n.ends_with(".wal"))
        .unwrap();
    let path = dir.path().join(wal);
    let len = fs::metadata(&path).unwrap().len();
    OpenOptions::new().write(true).open(&path).unwrap().set_len(len - 3).unwrap();

    let db = DB::open(Options::new(dir.path())).unwrap();
    assert_eq!(db.get(b"a").unwrap().payload(), Some(b"first".as_slice()));
    assert!(matches!(db.get(b"b"), Err(Error::NotFound)));
}

// =============================================================================
// Test 5: Leftover temp files from an interrupted flush are removed
// =============================================================================
#[test]
fn temp_files_are_removed() {
    let dir = tempdir().unwrap();
    {
        let db = DB::open(Options::new(dir.path())).unwrap();
        db.upsert(b"k", b"v", None).unwrap();
        db.close().unwrap();
    }
    fs::write(dir.path().join("9.tmp"), b"half a table").unwrap();
    fs::write(dir.path().join(COMPACTION_TMP), b"half a compaction").unwrap();

    let db = DB::open(Options::new(dir.path())).unwrap();
    assert_eq!(db.get(b"k").unwrap().payload(), Some(b"v".as_slice()));
    let names = file_names(dir.path());
    assert!(!names.iter().any(|n| n.ends_with(".tmp")), "{names:?}");
}

// =============================================================================
// Test 6: A committed compaction marker replaces the numbered tables
// =============================================================================
#[test]
fn compaction_marker_is_finished() {
    let dir = tempdir().unwrap();
    {
        let db = DB::open(Options::new(dir.path())).unwrap();
        db.upsert(b"a", b"stale", Some(1)).unwrap();
        db.flush().unwrap();
        db.upsert(b"b", b"stale", Some(2)).unwrap();
        db.flush().unwrap();
        db.close().unwrap();
    }

    // crash after the commit rename, before the old tables were deleted
    let mut builder =
        SSTableBuilder::new(&dir.path().join(compacted_file_name(2)), 1, 4096, 0.01).unwrap();
    builder
        .add(&Cell::new(b"a".to_vec(), VersionedValue::value(3, b"compacted".to_vec())))
        .unwrap();
    builder
        .add(&Cell::new(b"b".to_vec(), VersionedValue::tombstone(4)))
        .unwrap();
    builder.finish().unwrap();

    let db = DB::open(Options::new(dir.path())).unwrap();
    assert_eq!(db.get(b"a").unwrap().payload(), Some(b"compacted".as_slice()));
    assert!(db.get(b"b").unwrap().is_tombstone());
    assert_eq!(db.stats().sstables, 1);
    assert_eq!(db.stats().next_generation, 2);

    let names = file_names(dir.path());
    assert!(names.contains(&"1.sst".to_string()), "{names:?}");
    assert!(!names.iter().any(|n| n.starts_with("compacted")), "{names:?}");
    assert!(!names.contains(&"2.sst".to_string()));
}

// =============================================================================
// Test 7: Reopening twice in a row changes nothing
// =============================================================================
#[test]
fn recovery_is_idempotent() {
    let dir = tempdir().unwrap();
    {
        let db = DB::open(Options::new(dir.path())).unwrap();
        db.upsert(b"k", b"v", Some(10)).unwrap();
        crash(db);
    }

    let first = {
        let db = DB::open(Options::new(dir.path())).unwrap();
        let stats = db.stats();
        db.close().unwrap();
        stats
    };
    let db = DB::open(Options::new(dir.path())).unwrap();
    assert_eq!(db.stats().sstables, first.sstables);
    assert_eq!(db.get(b"k").unwrap().timestamp(), 10);
}

fn write_marker(dir: &std::path::Path, upto: u64, cells: &[Cell]) {
    let mut builder =
        SSTableBuilder::new(&dir.join(compacted_file_name(upto)), 1, 4096, 0.01).unwrap();
    for cell in cells {
        builder.add(cell).unwrap();
    }
    builder.finish().unwrap();
}

// =============================================================================
// Test 8: Tables flushed after a committed compaction survive its install
// =============================================================================
#[test]
fn marker_keeps_later_generations() {
    let dir = tempdir().unwrap();
    {
        let db = DB::open(Options::new(dir.path())).unwrap();
        db.upsert(b"a", b"stale", Some(1)).unwrap();
        db.flush().unwrap();
        db.upsert(b"b", b"stale", Some(2)).unwrap();
        db.flush().unwrap();
        // flushed after the compaction committed
        db.upsert(b"c", b"late", Some(5)).unwrap();
        db.upsert(b"a", b"latest", Some(6)).unwrap();
        db.flush().unwrap();
        db.close().unwrap();
    }
    write_marker(
        dir.path(),
        2,
        &[
            Cell::new(b"a".to_vec(), VersionedValue::value(1, b"stale".to_vec())),
            Cell::new(b"b".to_vec(), VersionedValue::value(2, b"stale".to_vec())),
        ],
    );

    let db = DB::open(Options::new(dir.path())).unwrap();
    assert_eq!(db.get(b"c").unwrap().payload(), Some(b"late".as_slice()));
    assert_eq!(db.get(b"a").unwrap().payload(), Some(b"latest".as_slice()));
    assert_eq!(db.get(b"b").unwrap().payload(), Some(b"stale".as_slice()));
    assert_eq!(db.stats().sstables, 2);
    assert_eq!(db.stats().next_generation, 4);

    assert_eq!(table_names(dir.path()), vec!["1.sst".to_string(), "3.sst".to_string()]);
}

// =============================================================================
// Test 9: Of several markers the newest compaction wins
// =============================================================================
#[test]
fn newest_marker_wins() {
    let dir = tempdir().unwrap();
    {
        let db = DB::open(Options::new(dir.path())).unwrap();
        db.upsert(b"a", b"1", Some(1)).unwrap();
        db.flush().unwrap();
        db.upsert(b"b", b"2", Some(2)).unwrap();
        db.flush().unwrap();
        db.upsert(b"c", b"3", Some(3)).unwrap();
        db.flush().unwrap();
        db.close().unwrap();
    }
    // an older install that failed part way, then a full one
    write_marker(
        dir.path(),
        2,
        &[Cell::new(b"a".to_vec(), VersionedValue::value(1, b"1".to_vec()))],
    );
    write_marker(
        dir.path(),
        3,
        &[
            Cell::new(b"a".to_vec(), VersionedValue::value(1, b"1".to_vec())),
            Cell::new(b"b".to_vec(), VersionedValue::value(2, b"2".to_vec())),
            Cell::new(b"c".to_vec(), VersionedValue::value(3, b"3".to_vec())),
        ],
    );

    let db = DB::open(Options::new(dir.path())).unwrap();
    for key in [b"a", b"b", b"c"] {
        assert!(db.get(key).is_ok());
    }
    assert_eq!(db.stats().sstables, 1);
    assert_eq!(table_names(dir.path()), vec!["1.sst".to_string()]);
}

// =============================================================================
// Test 10: A compaction that can't finish its install loses nothing
// =============================================================================
#[test]
fn failed_install_keeps_later_flushes() {
    let dir = tempdir().unwrap();
    {
        let db = DB::open(Options::new(dir.path())).unwrap();
        db.upsert(b"a", b"1", None).unwrap();
        db.flush().unwrap();
        db.upsert(b"b", b"2", None).unwrap();
        db.flush().unwrap();

        // 2.sst stays readable through its open handle, but can't be unlinked
        let blocked = dir.path().join("2.sst");
        fs::remove_file(&blocked).unwrap();
        fs::create_dir(&blocked).unwrap();
        fs::write(blocked.join("pin"), b"").unwrap();

        assert!(db.compact().is_err());
        assert_eq!(db.get(b"b").unwrap().payload(), Some(b"2".as_slice()));

        db.upsert(b"c", b"3", None).unwrap();
        db.flush().unwrap();
        assert_eq!(db.stats().sstables, 3);
        db.close().unwrap();

        fs::remove_dir_all(&blocked).unwrap();
    }

    let db = DB::open(Options::new(dir.path())).unwrap();
    assert_eq!(db.get(b"a").unwrap().payload(), Some(b"1".as_slice()));
    assert_eq!(db.get(b"b").unwrap().payload(), Some(b"2".as_slice()));
    assert_eq!(db.get(b"c").unwrap().payload(), Some(b"3".as_slice()));
    assert_eq!(table_names(dir.path()), vec!["1.sst".to_string(), "3.sst".to_string()]);
}
