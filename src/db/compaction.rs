use std::fs;
use std::io;
use std::path::Path;
use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::db::Shared;
use crate::db::flush::{build_table, sync_dir};
use crate::error::Result;
use crate::iterator::StorageIterator;
use crate::sstable::{SSTable, sstable_file_name};

/// Work file of an in-progress compaction. Garbage after a crash.
pub const COMPACTION_TMP: &str = "compaction.tmp";

/// The generation a compacted table is installed under.
pub const COMPACTED_GENERATION: u64 = 1;

/// A finished compaction waiting to replace the numbered tables up to and
/// including generation `upto`. Its presence at startup means the
/// compaction committed.
pub fn compacted_file_name(upto: u64) -> String {
    format!("compacted-{upto}.sst")
}

/// Parse `upto` out of `compacted-<upto>.sst`.
pub fn parse_compacted_file_name(name: &str) -> Option<u64> {
    name.strip_prefix("compacted-")?.strip_suffix(".sst")?.parse().ok()
}

/// Collapse every SSTable into one.
///
/// Only the newest version of each key survives. Tombstones are kept: a
/// replica that missed the delete must still see it lose to this one.
///
/// Runs on the background worker, so no flush can install a table while
/// it runs; the snapshot's table list stays complete throughout.
pub(crate) fn compact(shared: &Shared) -> Result<()> {
    let snapshot = shared.snapshot();
    if snapshot.sstables.len() < 2 {
        debug!(tables = snapshot.sstables.len(), "nothing to compact");
        return Ok(());
    }
    let Some(&upto) = snapshot.sstables.keys().next_back() else {
        return Ok(());
    };

    let dir = &shared.options.dir;
    let tmp = dir.join(COMPACTION_TMP);
    let marker = dir.join(compacted_file_name(upto));

    let mut sources: Vec<Box<dyn StorageIterator>> = Vec::with_capacity(snapshot.sstables.len());
    for table in snapshot.sstables.values().rev() {
        sources.push(Box::new(table.iter()?));
    }
    let meta = match build_table(&shared.options, &tmp, COMPACTED_GENERATION, sources) {
        Ok(meta) => meta,
        Err(e) => {
            let _ = fs::remove_file(&tmp);
            return Err(e);
        }
    };

    // Commit point.
    fs::rename(&tmp, &marker)?;
    sync_dir(dir)?;

    // From here a failure leaves the live tables untouched. Flushes keep
    // numbering above `upto`, which the marker doesn't cover, and the next
    // restart finishes the install.
    let path = dir.join(sstable_file_name(COMPACTED_GENERATION));
    if let Err(e) = install(dir, upto, snapshot.sstables.keys().copied()) {
        warn!(upto, "compaction committed but not installed: {e}");
        return Err(e);
    }
    let compacted = Arc::new(SSTable::open(&path, COMPACTED_GENERATION)?);

    {
        let mut tables = shared.tables.write();
        let next = tables.compacted(compacted);
        *tables = Arc::new(next);
    }

    info!(
        merged = snapshot.sstables.len(),
        entries = meta.entry_count,
        bytes = meta.file_size,
        "compaction finished"
    );
    Ok(())
}

/// Replace `generations` with the committed `compacted-<upto>.sst`.
///
/// Idempotent: files already gone count as removed. Markers left by older
/// failed installs go before the rename, since generation numbering
/// restarts once the compacted table is generation 1.
pub(crate) fn install<I>(dir: &Path, upto: u64, generations: I) -> Result<()>
where
    I: IntoIterator<Item = u64>,
{
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        let file_name = entry.file_name();
        let stale = file_name
            .to_str()
            .and_then(parse_compacted_file_name)
            .is_some_and(|other| other != upto);
        if stale {
            remove_if_exists(&entry.path())?;
        }
    }
    for generation in generations {
        remove_if_exists(&dir.join(sstable_file_name(generation)))?;
    }
    fs::rename(
        dir.join(compacted_file_name(upto)),
        dir.join(sstable_file_name(COMPACTED_GENERATION)),
    )?;
    sync_dir(dir)?;
    Ok(())
}

fn remove_if_exists(path: &Path) -> io::Result<()> {
    match fs::remove_file(path) {
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        other => other,
    }
}
