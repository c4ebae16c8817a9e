use std::collections::BTreeMap;
use std::sync::Arc;

use crate::error::Result;
use crate::iterator::StorageIterator;
use crate::memtable::MemTable;
use crate::sstable::SSTable;

/// A frozen memtable waiting for (or undergoing) its flush.
#[derive(Clone)]
pub struct FlushingTable {
    pub memtable: Arc<MemTable>,
    /// Generation the resulting SSTable will be installed under.
    pub generation: u64,
}

/// Immutable snapshot of every live source of data.
///
/// Never mutated in place: each structural change builds a new `TableSet`
/// and swaps the `Arc` under the engine's write lock. A reader that copied
/// the `Arc` keeps a consistent view for as long as it needs one.
#[derive(Clone)]
pub struct TableSet {
    pub memtable: Arc<MemTable>,
    /// Newest first.
    pub flushing: Vec<FlushingTable>,
    pub sstables: BTreeMap<u64, Arc<SSTable>>,
    /// Next generation to hand out.
    pub version: u64,
}

impl TableSet {
    pub fn new(memtable: Arc<MemTable>, sstables: BTreeMap<u64, Arc<SSTable>>, version: u64) -> Self {
        TableSet {
            memtable,
            flushing: Vec::new(),
            sstables,
            version,
        }
    }

    /// Phase 1 of a flush: the active memtable moves to `flushing` and
    /// reserves the current version as its generation.
    pub fn begin_flush(&self, fresh: Arc<MemTable>) -> TableSet {
        let mut flushing = Vec::with_capacity(self.flushing.len() + 1);
        flushing.push(FlushingTable {
            memtable: Arc::clone(&self.memtable),
            generation: self.version,
        });
        flushing.extend(self.flushing.iter().cloned());

        TableSet {
            memtable: fresh,
            flushing,
            sstables: self.sstables.clone(),
            version: self.version + 1,
        }
    }

    /// Phase 2 of a flush: the memtable is replaced by its SSTable.
    pub fn finish_flush(&self, memtable_id: u64, table: Arc<SSTable>) -> TableSet {
        let mut sstables = self.sstables.clone();
        sstables.insert(table.generation(), table);

        TableSet {
            memtable: Arc::clone(&self.memtable),
            flushing: self
                .flushing
                .iter()
                .filter(|f| f.memtable.id() != memtable_id)
                .cloned()
                .collect(),
            sstables,
            version: self.version,
        }
    }

    /// All tables collapsed into one at generation 1. Pending flushes are
    /// renumbered right after it, oldest first, so they still shadow it.
    pub fn compacted(&self, table: Arc<SSTable>) -> TableSet {
        let mut flushing = self.flushing.clone();
        let pending = flushing.len() as u64;
        for (newest_first, entry) in flushing.iter_mut().enumerate() {
            entry.generation = 1 + pending - newest_first as u64;
        }

        let mut sstables = BTreeMap::new();
        sstables.insert(table.generation(), table);

        TableSet {
            memtable: Arc::clone(&self.memtable),
            flushing,
            sstables,
            version: 2 + pending,
        }
    }

    /// The flushing memtable that was frozen first.
    pub fn oldest_flushing(&self) -> Option<&FlushingTable> {
        self.flushing.last()
    }

    /// One cursor per source, seeked to `from`, newest source first.
    pub fn sources(&self, from: &[u8]) -> Result<Vec<Box<dyn StorageIterator>>> {
        self.sources_filtered(from, |_| true)
    }

    /// Like `sources`, skipping SSTables the bloom filter rules out for `key`.
    pub fn point_sources(&self, key: &[u8]) -> Result<Vec<Box<dyn StorageIterator>>> {
        self.sources_filtered(key, |table| table.may_contain(key))
    }

    fn sources_filtered<F>(&self, from: &[u8], keep: F) -> Result<Vec<Box<dyn StorageIterator>>>
    where
        F: Fn(&SSTable) -> bool,
    {
        let mut sources: Vec<Box<dyn StorageIterator>> =
            Vec::with_capacity(1 + self.flushing.len() + self.sstables.len());
        sources.push(Box::new(self.memtable.iter_from(from)));
        for entry in &self.flushing {
            sources.push(Box::new(entry.memtable.iter_from(from)));
        }
        for table in self.sstables.values().rev() {
            if keep(table) {
                sources.push(Box::new(table.iter_from(from)?));
            }
        }
        Ok(sources)
    }
}
