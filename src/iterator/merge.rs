use std::cmp::{Ordering, Reverse};
use std::collections::BinaryHeap;

use crate::error::Result;
use crate::iterator::StorageIterator;
use crate::types::{Cell, VersionedValue};

/// Head of one source inside the merge heap.
///
/// Ties on the full cell (same key, same version in two tables) go to the
/// lower source index, i.e. the newer source.
struct HeapEntry {
    cell: Cell,
    source: usize,
}

impl PartialEq for HeapEntry {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for HeapEntry {}

impl Ord for HeapEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        self.cell
            .cmp(&other.cell)
            .then_with(|| self.source.cmp(&other.source))
    }
}

impl PartialOrd for HeapEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// Merges multiple sorted iterators into a single sorted stream.
///
/// Used by point lookups, range scans, flushes and compaction, each with a
/// different set of sources.
///
/// Ordering guarantee: cells come out in (key ASC, newest version first)
/// order, and only the newest version of each key is yielded. Tombstones
/// are yielded too; filtering them is the caller's decision.
///
/// K-way merge with a min-heap holding the current head of every source.
pub struct MergeIterator {
    sources: Vec<Box<dyn StorageIterator>>,
    heap: BinaryHeap<Reverse<HeapEntry>>,
    current: Option<Cell>,
}

impl MergeIterator {
    /// Create a new MergeIterator from multiple sorted sources.
    /// Sources are ordered by priority: index 0 = newest (active memtable),
    /// higher indices = older (flushing memtables, then SSTables from the
    /// highest generation down).
    pub fn new(sources: Vec<Box<dyn StorageIterator>>) -> Result<Self> {
        let mut heap = BinaryHeap::with_capacity(sources.len());
        for (source, iter) in sources.iter().enumerate() {
            if iter.is_valid() {
                heap.push(Reverse(HeapEntry {
                    cell: iter.cell(),
                    source,
                }));
            }
        }
        let mut merged = MergeIterator {
            sources,
            heap,
            current: None,
        };
        merged.advance()?;
        Ok(merged)
    }

    /// Pop the smallest head, then drop every other version of the same key.
    fn advance(&mut self) -> Result<()> {
        let Some(Reverse(top)) = self.heap.pop() else {
            self.current = None;
            return Ok(());
        };
        self.refill(top.source)?;

        while let Some(Reverse(next)) = self.heap.peek() {
            if next.cell.key != top.cell.key {
                break;
            }
            let source = next.source;
            self.heap.pop();
            self.refill(source)?;
        }

        self.current = Some(top.cell);
        Ok(())
    }

    fn refill(&mut self, source: usize) -> Result<()> {
        let iter = &mut self.sources[source];
        iter.next()?;
        if iter.is_valid() {
            self.heap.push(Reverse(HeapEntry {
                cell: iter.cell(),
                source,
            }));
        }
        Ok(())
    }

    /// The cell the merge is positioned at.
    pub fn current(&self) -> Option<&Cell> {
        self.current.as_ref()
    }

    /// Take the current cell out and move on.
    pub fn next_cell(&mut self) -> Result<Option<Cell>> {
        let current = self.current.take();
        if current.is_some() {
            self.advance()?;
        }
        Ok(current)
    }
}

impl StorageIterator for MergeIterator {
    fn key(&self) -> &[u8] {
        match &self.current {
            Some(cell) => &cell.key,
            None => &[],
        }
    }

    fn value(&self) -> &VersionedValue {
        match &self.current {
            Some(cell) => &cell.value,
            None => panic!("value() called on an exhausted MergeIterator"),
        }
    }

    fn is_valid(&self) -> bool {
        self.current.is_some()
    }

    fn next(&mut self) -> Result<()> {
        self.advance()
    }
}
