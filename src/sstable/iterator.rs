use std::sync::Arc;

use crate::error::Result;
use crate::iterator::StorageIterator;
use crate::sstable::block::Block;
use crate::sstable::reader::SSTable;
use crate::types::{Cell, VersionedValue};

/// Owned cursor over one SSTable, one data block in memory at a time.
pub struct SSTableIterator {
    table: Arc<SSTable>,
    block_idx: usize,
    block: Option<Block>,
    pos: usize,
    current: Option<Cell>,
}

impl SSTableIterator {
    pub(crate) fn seek(table: Arc<SSTable>, from: &[u8]) -> Result<Self> {
        let block_idx = table.block_for(from);
        let mut iter = SSTableIterator {
            table,
            block_idx,
            block: None,
            pos: 0,
            current: None,
        };
        if block_idx < iter.table.block_count() {
            let block = iter.table.read_block(block_idx)?;
            iter.pos = block.seek(from)?;
            iter.block = Some(block);
            iter.settle()?;
        }
        Ok(iter)
    }

    /// Load `current` from (block, pos), moving to later blocks as needed.
    fn settle(&mut self) -> Result<()> {
        loop {
            let Some(block) = &self.block else {
                self.current = None;
                return Ok(());
            };
            if self.pos < block.len() {
                self.current = Some(block.cell(self.pos)?);
                return Ok(());
            }
            self.block_idx += 1;
            self.pos = 0;
            self.block = if self.block_idx < self.table.block_count() {
                Some(self.table.read_block(self.block_idx)?)
            } else {
                None
            };
        }
    }
}

impl StorageIterator for SSTableIterator {
    fn key(&self) -> &[u8] {
        match &self.current {
            Some(cell) => &cell.key,
            None => &[],
        }
    }

    fn value(&self) -> &VersionedValue {
        match &self.current {
            Some(cell) => &cell.value,
            None => panic!("value() called on an exhausted SSTableIterator"),
        }
    }

    fn is_valid(&self) -> bool {
        self.current.is_some()
    }

    fn next(&mut self) -> Result<()> {
        if self.current.is_some() {
            self.pos += 1;
            self.settle()?;
        }
        Ok(())
    }
}
