use std::collections::BTreeMap;
use std::fs;
use std::sync::Arc;

use tracing::{info, warn};

use crate::db::Options;
use crate::db::compaction::{self, COMPACTED_GENERATION, parse_compacted_file_name};
use crate::db::flush::{sync_dir, write_table};
use crate::error::Result;
use crate::iterator::StorageIterator;
use crate::memtable::MemTable;
use crate::sstable::{SSTable, parse_sstable_file_name, sstable_file_name, temp_file_name};
use crate::wal::{WALReader, parse_wal_file_name, wal_file_name};

/// What a previous process left on disk, made consistent.
pub(crate) struct Recovered {
    pub sstables: BTreeMap<u64, Arc<SSTable>>,
    pub version: u64,
    pub next_memtable_id: u64,
    pub max_timestamp: u64,
}

/// Bring the data directory to a clean state and load it.
///
/// 1. Temp files (`*.tmp`) are unfinished flushes or compactions: delete.
/// 2. `compacted-<n>.sst` is a committed compaction: it replaces the
///    numbered tables up to `n` and becomes generation 1. Tables above `n`
///    were flushed after it and stay. Of several markers the highest wins.
/// 3. Numbered tables are opened; the next generation follows the highest.
/// 4. WAL files hold memtables that never reached disk: replay them all
///    into one new table, then delete them.
pub(crate) fn recover(options: &Options) -> Result<Recovered> {
    let dir = &options.dir;

    let mut generations = Vec::new();
    let mut wal_ids = Vec::new();
    let mut markers = Vec::new();

    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        let file_name = entry.file_name();
        let Some(name) = file_name.to_str() else {
            continue;
        };

        if let Some(upto) = parse_compacted_file_name(name) {
            markers.push(upto);
        } else if name.ends_with(".tmp") {
            warn!(file = name, "removing unfinished table");
            fs::remove_file(entry.path())?;
        } else if let Some(generation) = parse_sstable_file_name(name) {
            generations.push(generation);
        } else if let Some(id) = parse_wal_file_name(name) {
            wal_ids.push(id);
        }
    }

    if let Some(&upto) = markers.iter().max() {
        let (replaced, kept): (Vec<u64>, Vec<u64>) =
            generations.into_iter().partition(|generation| *generation <= upto);
        compaction::install(dir, upto, replaced)?;
        generations = kept;
        generations.push(COMPACTED_GENERATION);
        info!(upto, kept = generations.len() - 1, "finished interrupted compaction");
    }
    sync_dir(dir)?;

    generations.sort_unstable();
    let mut sstables = BTreeMap::new();
    let mut max_timestamp = 0;
    for generation in generations {
        let table = SSTable::open(&dir.join(sstable_file_name(generation)), generation)?;
        max_timestamp = max_timestamp.max(table.meta().max_timestamp);
        sstables.insert(generation, Arc::new(table));
    }
    let mut version = sstables.keys().next_back().map_or(1, |last| last + 1);

    wal_ids.sort_unstable();
    let next_memtable_id = wal_ids.last().map_or(1, |last| last + 1);

    if !wal_ids.is_empty() {
        let replayed = Arc::new(MemTable::new(0));
        for id in &wal_ids {
            let reader = WALReader::open(&dir.join(wal_file_name(*id)))?;
            let (cells, torn) = reader.replay();
            if torn {
                warn!(wal = id, recovered = cells.len(), "WAL ends in a torn record");
            }
            for cell in cells {
                max_timestamp = max_timestamp.max(cell.value.timestamp());
                replayed.insert(cell);
            }
        }

        if !replayed.is_empty() {
            let path = dir.join(sstable_file_name(version));
            let sources: Vec<Box<dyn StorageIterator>> = vec![Box::new(replayed.iter_from(&[]))];
            write_table(options, &dir.join(temp_file_name(version)), &path, version, sources)?;
            sstables.insert(version, Arc::new(SSTable::open(&path, version)?));
            info!(
                generation = version,
                wals = wal_ids.len(),
                entries = replayed.len(),
                "recovered unflushed writes"
            );
            version += 1;
        }

        for id in &wal_ids {
            fs::remove_file(dir.join(wal_file_name(*id)))?;
        }
        sync_dir(dir)?;
    }

    Ok(Recovered {
        sstables,
        version,
        next_memtable_id,
        max_timestamp,
    })
}
