use std::fs::{self, File};
use std::path::Path;
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use crossbeam_channel::{Receiver, Sender};
use tracing::{debug, error, info, warn};

use crate::db::compaction;
use crate::db::{FlushingTable, Options, Shared};
use crate::error::Result;
use crate::iterator::{MergeIterator, StorageIterator};
use crate::sstable::{SSTable, SSTableBuilder, SSTableMeta, sstable_file_name, temp_file_name};

/// Work for the background thread. Jobs run one at a time in send order,
/// so a compaction always sees the results of flushes queued before it.
pub(crate) enum Job {
    /// Write every frozen memtable to disk, oldest first.
    Flush { done: Option<Sender<Result<()>>> },
    Compact { reply: Sender<Result<()>> },
    Shutdown,
}

pub(crate) fn spawn_worker(shared: Arc<Shared>, jobs: Receiver<Job>) -> Result<JoinHandle<()>> {
    let handle = thread::Builder::new()
        .name("quorumkv-flush".into())
        .spawn(move || run(&shared, &jobs))?;
    Ok(handle)
}

fn run(shared: &Shared, jobs: &Receiver<Job>) {
    for job in jobs.iter() {
        match job {
            Job::Flush { done } => {
                let result = flush_pending(shared);
                if let Err(e) = &result {
                    error!("flush failed, memtable kept for retry: {e}");
                }
                if let Some(done) = done {
                    let _ = done.send(result);
                }
            }
            Job::Compact { reply } => {
                let result = compaction::compact(shared);
                if let Err(e) = &result {
                    error!("compaction failed: {e}");
                }
                let _ = reply.send(result);
            }
            Job::Shutdown => break,
        }
    }
    debug!("flush worker stopped");
}

/// Phase 2 for every frozen memtable, oldest first.
pub(crate) fn flush_pending(shared: &Shared) -> Result<()> {
    while let Some(target) = shared.snapshot().oldest_flushing().cloned() {
        flush_one(shared, &target)?;
    }
    Ok(())
}

fn flush_one(shared: &Shared, target: &FlushingTable) -> Result<()> {
    let dir = &shared.options.dir;
    let generation = target.generation;
    let path = dir.join(sstable_file_name(generation));

    target.memtable.wait_for_writers();
    let sources: Vec<Box<dyn StorageIterator>> = vec![Box::new(target.memtable.iter_from(&[]))];
    let meta = write_table(
        &shared.options,
        &dir.join(temp_file_name(generation)),
        &path,
        generation,
        sources,
    )?;
    let table = Arc::new(SSTable::open(&path, generation)?);

    {
        let mut tables = shared.tables.write();
        let next = tables.finish_flush(target.memtable.id(), table);
        *tables = Arc::new(next);
    }

    if let Some(wal) = target.memtable.wal_path() {
        if let Err(e) = fs::remove_file(&wal) {
            warn!(path = %wal.display(), "failed to delete flushed WAL: {e}");
        }
    }

    info!(
        generation,
        entries = meta.entry_count,
        bytes = meta.file_size,
        "memtable flushed"
    );
    Ok(())
}

/// Merge `sources` into a new table at `tmp`, then rename it to `dest`.
/// The rename is the durability point; a crash before it leaves only a
/// temp file for recovery to delete.
pub(crate) fn write_table(
    options: &Options,
    tmp: &Path,
    dest: &Path,
    generation: u64,
    sources: Vec<Box<dyn StorageIterator>>,
) -> Result<SSTableMeta> {
    let meta = match build_table(options, tmp, generation, sources) {
        Ok(meta) => meta,
        Err(e) => {
            let _ = fs::remove_file(tmp);
            return Err(e);
        }
    };
    fs::rename(tmp, dest)?;
    sync_dir(&options.dir)?;
    Ok(meta)
}

pub(crate) fn build_table(
    options: &Options,
    path: &Path,
    generation: u64,
    sources: Vec<Box<dyn StorageIterator>>,
) -> Result<SSTableMeta> {
    let mut merged = MergeIterator::new(sources)?;
    let mut builder = SSTableBuilder::new(path, generation, options.block_size, options.bloom_fpr)?;
    while let Some(cell) = merged.next_cell()? {
        builder.add(&cell)?;
    }
    builder.finish()
}

/// Make renames and deletions in `dir` durable.
pub(crate) fn sync_dir(dir: &Path) -> Result<()> {
    File::open(dir)?.sync_all()?;
    Ok(())
}
