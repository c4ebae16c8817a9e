pub mod compaction;
pub mod flush;
pub mod recovery;
pub mod table_set;

pub use table_set::{FlushingTable, TableSet};

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::thread::JoinHandle;

use crossbeam_channel::{Sender, bounded, unbounded};
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use tracing::{debug, error, info};

use crate::error::{Error, Result};
use crate::iterator::MergeIterator;
use crate::memtable::MemTable;
use crate::types::{Cell, TimestampSource, VersionedValue, is_valid_timestamp};
use crate::wal::SyncPolicy;

use flush::Job;

/// Storage engine settings.
#[derive(Debug, Clone)]
pub struct Options {
    /// Directory holding tables and WAL files.
    pub dir: PathBuf,
    /// Active memtable size that triggers a flush (default: 4MB).
    pub flush_threshold: usize,
    /// Target data block size (default: 4KB).
    pub block_size: usize,
    /// Bloom filter false positive rate (default: 1%).
    pub bloom_fpr: f64,
    /// Log writes ahead of the memtable (default: true).
    pub wal: bool,
    pub sync_policy: SyncPolicy,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            dir: PathBuf::from("./data"),
            flush_threshold: 4 * 1024 * 1024,
            block_size: 4096,
            bloom_fpr: 0.01,
            wal: true,
            sync_policy: SyncPolicy::default(),
        }
    }
}

impl Options {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            ..Default::default()
        }
    }

    pub fn flush_threshold(mut self, bytes: usize) -> Self {
        self.flush_threshold = bytes;
        self
    }

    pub fn block_size(mut self, bytes: usize) -> Self {
        self.block_size = bytes;
        self
    }

    pub fn bloom_fpr(mut self, rate: f64) -> Self {
        self.bloom_fpr = rate;
        self
    }

    pub fn wal(mut self, enabled: bool) -> Self {
        self.wal = enabled;
        self
    }

    pub fn sync_policy(mut self, policy: SyncPolicy) -> Self {
        self.sync_policy = policy;
        self
    }
}

/// Point-in-time view of the engine's structure.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Stats {
    pub memtable_bytes: usize,
    pub memtable_entries: usize,
    pub flushing_memtables: usize,
    pub sstables: usize,
    pub sstable_bytes: u64,
    pub next_generation: u64,
}

/// State shared between the engine handle and its background worker.
pub(crate) struct Shared {
    pub(crate) options: Options,
    pub(crate) tables: RwLock<Arc<TableSet>>,
    pub(crate) next_memtable_id: AtomicU64,
}

impl Shared {
    pub(crate) fn snapshot(&self) -> Arc<TableSet> {
        Arc::clone(&self.tables.read())
    }

    pub(crate) fn new_memtable(&self) -> Result<Arc<MemTable>> {
        let id = self.next_memtable_id.fetch_add(1, Ordering::Relaxed);
        create_memtable(&self.options, id)
    }

    /// Phase 1 of a flush. Swaps out memtable `expected` if it is still the
    /// active one and holds data. Returns whether a swap happened.
    pub(crate) fn freeze(&self, expected: u64) -> Result<bool> {
        {
            let tables = self.tables.read();
            if tables.memtable.id() != expected || tables.memtable.is_empty() {
                return Ok(false);
            }
        }

        // The WAL file is created outside the write lock.
        let fresh = self.new_memtable()?;

        let mut tables = self.tables.write();
        if tables.memtable.id() != expected || tables.memtable.is_empty() {
            drop(tables);
            discard_memtable(&fresh);
            return Ok(false);
        }
        tables.memtable.seal();
        let next = tables.begin_flush(fresh);
        debug!(
            memtable = expected,
            generation = tables.version,
            "memtable frozen for flush"
        );
        *tables = Arc::new(next);
        Ok(true)
    }
}

fn create_memtable(options: &Options, id: u64) -> Result<Arc<MemTable>> {
    let memtable = if options.wal {
        MemTable::with_wal(id, &options.dir, options.sync_policy)?
    } else {
        MemTable::new(id)
    };
    Ok(Arc::new(memtable))
}

fn discard_memtable(memtable: &MemTable) {
    if let Some(path) = memtable.wal_path() {
        if let Err(e) = fs::remove_file(&path) {
            debug!(path = %path.display(), "failed to remove unused WAL: {e}");
        }
    }
}

/// The local storage engine.
///
/// Writes go to the active memtable (logged to its WAL first). A memtable
/// past the flush threshold is frozen and handed to the background worker,
/// which turns it into an SSTable. Reads merge every live source of the
/// current `TableSet` snapshot.
///
/// `DB` is `Send + Sync`; share it behind an `Arc`.
pub struct DB {
    shared: Arc<Shared>,
    clock: TimestampSource,
    jobs: Sender<Job>,
    worker: Mutex<Option<JoinHandle<()>>>,
    closed: AtomicBool,
}

impl DB {
    /// Open (or create) a database, recovering whatever a previous process
    /// left in `options.dir`.
    pub fn open(options: Options) -> Result<Self> {
        fs::create_dir_all(&options.dir)?;
        let recovered = recovery::recover(&options)?;

        let active = create_memtable(&options, recovered.next_memtable_id)?;
        let shared = Arc::new(Shared {
            tables: RwLock::new(Arc::new(TableSet::new(
                active,
                recovered.sstables,
                recovered.version,
            ))),
            next_memtable_id: AtomicU64::new(recovered.next_memtable_id + 1),
            options,
        });

        let clock = TimestampSource::new();
        clock.observe(recovered.max_timestamp);

        let (jobs, receiver) = unbounded();
        let worker = flush::spawn_worker(Arc::clone(&shared), receiver)?;

        let snapshot = shared.snapshot();
        info!(
            dir = %shared.options.dir.display(),
            sstables = snapshot.sstables.len(),
            next_generation = snapshot.version,
            "storage engine opened"
        );

        Ok(DB {
            shared,
            clock,
            jobs,
            worker: Mutex::new(Some(worker)),
            closed: AtomicBool::new(false),
        })
    }

    /// Newest version of `key`. Tombstones are returned, not `NotFound`.
    pub fn get(&self, key: &[u8]) -> Result<VersionedValue> {
        let snapshot = self.shared.snapshot();
        let merged = MergeIterator::new(snapshot.point_sources(key)?)?;
        match merged.current() {
            Some(cell) if cell.key == key => Ok(cell.value.clone()),
            _ => Err(Error::NotFound),
        }
    }

    /// Live cells with `from <= key < to`, newest version per key, in key
    /// order. `to = None` scans to the end. Each call takes a fresh snapshot.
    pub fn range(&self, from: &[u8], to: Option<&[u8]>) -> Result<RangeIter> {
        let snapshot = self.shared.snapshot();
        let merged = MergeIterator::new(snapshot.sources(from)?)?;
        Ok(RangeIter {
            merged,
            to: to.map(<[u8]>::to_vec),
            done: false,
        })
    }

    /// Write `payload` under `key`. `timestamp = None` stamps it with the
    /// engine clock. Returns the timestamp stored. Zero and `u64::MAX` are
    /// refused with `InvalidTimestamp`.
    pub fn upsert(&self, key: &[u8], payload: &[u8], timestamp: Option<u64>) -> Result<u64> {
        let timestamp = self.stamp(timestamp)?;
        self.write(key, VersionedValue::value(timestamp, payload.to_vec()))?;
        Ok(timestamp)
    }

    /// Write a tombstone for `key`. Same timestamp rule as `upsert`.
    pub fn remove(&self, key: &[u8], timestamp: Option<u64>) -> Result<u64> {
        let timestamp = self.stamp(timestamp)?;
        self.write(key, VersionedValue::tombstone(timestamp))?;
        Ok(timestamp)
    }

    /// Store an already versioned value as is.
    pub fn apply(&self, key: &[u8], value: VersionedValue) -> Result<()> {
        self.stamp(Some(value.timestamp()))?;
        self.write(key, value)
    }

    /// A fresh timestamp from the engine clock.
    pub fn next_timestamp(&self) -> u64 {
        self.clock.now()
    }

    fn stamp(&self, timestamp: Option<u64>) -> Result<u64> {
        match timestamp {
            Some(ts) if !is_valid_timestamp(ts) => Err(Error::InvalidTimestamp(ts)),
            Some(ts) => {
                self.clock.observe(ts);
                Ok(ts)
            }
            None => Ok(self.clock.now()),
        }
    }

    fn write(&self, key: &[u8], value: VersionedValue) -> Result<()> {
        if self.closed.load(Ordering::Acquire) {
            return Err(Error::Closed);
        }

        // A freeze between the snapshot and the admission seals the table;
        // the write then goes to its successor.
        let memtable = loop {
            let memtable = self.shared.snapshot().memtable.clone();
            if let Some(_writer) = memtable.admit_writer() {
                memtable.put(key.to_vec(), value)?;
                break Arc::clone(&memtable);
            }
        };

        if memtable.size() >= self.shared.options.flush_threshold
            && self.shared.freeze(memtable.id())?
        {
            self.jobs.send(Job::Flush { done: None }).map_err(|_| Error::WorkerGone)?;
        }
        Ok(())
    }

    /// Freeze the active memtable (if it holds data) and wait until every
    /// pending memtable is on disk.
    pub fn flush(&self) -> Result<()> {
        if self.closed.load(Ordering::Acquire) {
            return Err(Error::Closed);
        }
        self.flush_all()
    }

    fn flush_all(&self) -> Result<()> {
        let active = self.shared.snapshot().memtable.id();
        self.shared.freeze(active)?;
        self.run_job(|done| Job::Flush { done: Some(done) })
    }

    /// Merge every SSTable into one. Waits for flushes queued before it.
    pub fn compact(&self) -> Result<()> {
        if self.closed.load(Ordering::Acquire) {
            return Err(Error::Closed);
        }
        self.run_job(|reply| Job::Compact { reply })
    }

    fn run_job<F>(&self, job: F) -> Result<()>
    where
        F: FnOnce(Sender<Result<()>>) -> Job,
    {
        let (reply, result) = bounded(1);
        self.jobs.send(job(reply)).map_err(|_| Error::WorkerGone)?;
        result.recv().map_err(|_| Error::WorkerGone)?
    }

    pub fn stats(&self) -> Stats {
        let snapshot = self.shared.snapshot();
        Stats {
            memtable_bytes: snapshot.memtable.size(),
            memtable_entries: snapshot.memtable.len(),
            flushing_memtables: snapshot.flushing.len(),
            sstables: snapshot.sstables.len(),
            sstable_bytes: snapshot.sstables.values().map(|t| t.meta().file_size).sum(),
            next_generation: snapshot.version,
        }
    }

    pub fn dir(&self) -> &Path {
        &self.shared.options.dir
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Flush pending data, stop the worker and refuse further writes.
    /// Calling it again is a no-op.
    pub fn close(&self) -> Result<()> {
        if self.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }

        let flushed = self.flush_all();
        if let Err(e) = &flushed {
            error!("final flush failed: {e}");
        }

        let _ = self.jobs.send(Job::Shutdown);
        if let Some(handle) = self.worker.lock().take() {
            if handle.join().is_err() {
                error!("flush worker panicked");
            }
        }

        // The memtable installed by the final freeze never takes a write.
        let active = self.shared.snapshot().memtable.clone();
        if active.is_empty() {
            discard_memtable(&active);
        }

        info!(dir = %self.dir().display(), "storage engine closed");
        flushed
    }
}

impl Drop for DB {
    fn drop(&mut self) {
        if let Err(e) = self.close() {
            error!("close on drop failed: {e}");
        }
    }
}

/// Lazy scan returned by `DB::range`. Skips tombstones.
pub struct RangeIter {
    merged: MergeIterator,
    to: Option<Vec<u8>>,
    done: bool,
}

impl Iterator for RangeIter {
    type Item = Result<Cell>;

    fn next(&mut self) -> Option<Self::Item> {
        while !self.done {
            let cell = match self.merged.next_cell() {
                Ok(Some(cell)) => cell,
                Ok(None) => break,
                Err(e) => {
                    self.done = true;
                    return Some(Err(e));
                }
            };
            if self.to.as_ref().is_some_and(|to| cell.key >= *to) {
                break;
            }
            if !cell.is_tombstone() {
                return Some(Ok(cell));
            }
        }
        self.done = true;
        None
    }
}
