use std::ops::Bound;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::thread;

use crossbeam_skiplist::SkipSet;
use parking_lot::Mutex;

use crate::error::Result;
use crate::iterator::StorageIterator;
use crate::types::{Cell, VersionedValue};
use crate::wal::{SyncPolicy, WALRecord, WALWriter, wal_file_name};

/// In-memory sorted buffer for writes.
///
/// Every write goes here first. When size exceeds the threshold,
/// the memtable is frozen (becomes immutable) and flushed to an SSTable.
///
/// Every version is kept, not just the latest: writes arrive with their own
/// timestamps (replica traffic, read repair), so an older version can land
/// after a newer one. Readers resolve the newest through `Cell` ordering.
///
/// Deletes are tombstone versions. You can't just remove the key because
/// older versions may exist in SSTables on disk.
///
/// Engine writes enter through `admit_writer`. Once the table is sealed no
/// writer gets in, and the flusher waits out the ones already inside.
pub struct MemTable {
    id: u64,
    cells: SkipSet<Cell>,
    size: AtomicUsize,
    wal: Option<Mutex<WALWriter>>,
    writers: AtomicUsize,
    sealed: AtomicBool,
}

/// An admitted writer. Dropping it lets a pending flush proceed.
pub struct WriterGuard<'a> {
    writers: &'a AtomicUsize,
}

impl Drop for WriterGuard<'_> {
    fn drop(&mut self) {
        self.writers.fetch_sub(1, Ordering::SeqCst);
    }
}

impl MemTable {
    /// Create a memtable without a write-ahead log.
    pub fn new(id: u64) -> Self {
        MemTable {
            id,
            cells: SkipSet::new(),
            size: AtomicUsize::new(0),
            wal: None,
            writers: AtomicUsize::new(0),
            sealed: AtomicBool::new(false),
        }
    }

    /// Create a memtable whose writes are logged to `<dir>/<id>.wal`.
    pub fn with_wal(id: u64, dir: &Path, sync_policy: SyncPolicy) -> Result<Self> {
        let writer = WALWriter::new(&dir.join(wal_file_name(id)), sync_policy)?;
        Ok(MemTable {
            wal: Some(Mutex::new(writer)),
            ..MemTable::new(id)
        })
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    /// Register a writer, or `None` if the table is sealed and the write
    /// belongs in its successor.
    pub fn admit_writer(&self) -> Option<WriterGuard<'_>> {
        self.writers.fetch_add(1, Ordering::SeqCst);
        let guard = WriterGuard {
            writers: &self.writers,
        };
        // Pairs with `seal` then `wait_for_writers`: either this writer sees
        // the seal, or the flusher sees this writer.
        if self.sealed.load(Ordering::SeqCst) {
            return None;
        }
        Some(guard)
    }

    /// Refuse new writers. Called when the table is frozen for a flush.
    pub fn seal(&self) {
        self.sealed.store(true, Ordering::SeqCst);
    }

    /// Block until every admitted writer has finished its insert.
    pub fn wait_for_writers(&self) {
        while self.writers.load(Ordering::SeqCst) > 0 {
            thread::yield_now();
        }
    }

    /// Record a version of `key`. Logged before it becomes visible.
    pub fn put(&self, key: Vec<u8>, value: VersionedValue) -> Result<()> {
        let cell = Cell::new(key, value);
        if let Some(wal) = &self.wal {
            wal.lock().append(&WALRecord::from_cell(&cell))?;
        }
        self.insert(cell);
        Ok(())
    }

    /// Insert without logging. Used when rebuilding from a WAL.
    pub fn insert(&self, cell: Cell) {
        let size = cell.size_bytes();
        if !self.cells.contains(&cell) {
            self.cells.insert(cell);
            self.size.fetch_add(size, Ordering::Relaxed);
        }
    }

    /// Newest version of `key`, tombstones included.
    pub fn get(&self, key: &[u8]) -> Option<VersionedValue> {
        let entry = self
            .cells
            .lower_bound(Bound::Included(&Cell::seek_marker(key)))?;
        let cell = entry.value();
        (cell.key == key).then(|| cell.value.clone())
    }

    /// Cursor over every version, starting at the first key >= `from`.
    pub fn iter_from(self: &Arc<Self>, from: &[u8]) -> MemTableIterator {
        MemTableIterator::new(Arc::clone(self), from)
    }

    /// Approximate memory usage in bytes.
    pub fn size(&self) -> usize {
        self.size.load(Ordering::Relaxed)
    }

    /// Number of stored versions.
    pub fn len(&self) -> usize {
        self.cells.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cells.is_empty()
    }

    pub fn wal_path(&self) -> Option<PathBuf> {
        self.wal.as_ref().map(|wal| wal.lock().path().to_path_buf())
    }
}

/// Owned cursor over a memtable.
///
/// Holds the table through an `Arc` and re-seeks past the current cell on
/// every step, so it tolerates concurrent inserts and never borrows from a
/// lock guard.
pub struct MemTableIterator {
    table: Arc<MemTable>,
    current: Option<Cell>,
}

impl MemTableIterator {
    fn new(table: Arc<MemTable>, from: &[u8]) -> Self {
        let current = table
            .cells
            .lower_bound(Bound::Included(&Cell::seek_marker(from)))
            .map(|entry| entry.value().clone());
        MemTableIterator { table, current }
    }
}

impl StorageIterator for MemTableIterator {
    fn key(&self) -> &[u8] {
        match &self.current {
            Some(cell) => &cell.key,
            None => &[],
        }
    }

    fn value(&self) -> &VersionedValue {
        match &self.current {
            Some(cell) => &cell.value,
            None => panic!("value() called on an exhausted MemTableIterator"),
        }
    }

    fn is_valid(&self) -> bool {
        self.current.is_some()
    }

    fn next(&mut self) -> Result<()> {
        if let Some(current) = self.current.take() {
            self.current = self
                .table
                .cells
                .lower_bound(Bound::Excluded(&current))
                .map(|entry| entry.value().clone());
        }
        Ok(())
    }
}
