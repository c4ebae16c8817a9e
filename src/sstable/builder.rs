use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

use crate::bloom::BloomFilterBuilder;
use crate::error::Result;
use crate::sstable::block::BlockBuilder;
use crate::sstable::footer::{Footer, IndexEntry, MetaBlock, SSTABLE_MAGIC, SSTableMeta};
use crate::types::Cell;

/// Builds an SSTable file from a sorted stream of cells.
///
/// Used during:
/// - Memtable flush (sorted memtable → SSTable)
/// - Compaction (merged iterators → one new SSTable)
///
/// Build process:
/// 1. Add cells one by one (must be in `Cell` order)
/// 2. Cells fill up blocks; when a block is full it's written to disk
/// 3. finish() flushes the last block, writes meta, index, footer, fsync
pub struct SSTableBuilder {
    block_builder: BlockBuilder,
    /// One per flushed data block.
    index_entries: Vec<IndexEntry>,
    data_offset: u64,
    writer: BufWriter<File>,
    generation: u64,
    block_size: usize,
    bloom: BloomFilterBuilder,
    min_key: Option<Vec<u8>>,
    max_key: Option<Vec<u8>>,
    max_timestamp: u64,
    entry_count: u64,
    last_key_in_block: Option<Vec<u8>>,
}

impl SSTableBuilder {
    pub fn new(path: &Path, generation: u64, block_size: usize, bloom_fpr: f64) -> Result<Self> {
        let file = File::create(path)?;
        Ok(SSTableBuilder {
            block_builder: BlockBuilder::new(block_size),
            index_entries: Vec::new(),
            data_offset: 0,
            writer: BufWriter::new(file),
            generation,
            block_size,
            bloom: BloomFilterBuilder::new(bloom_fpr),
            min_key: None,
            max_key: None,
            max_timestamp: 0,
            entry_count: 0,
            last_key_in_block: None,
        })
    }

    /// Add a cell. MUST be called in `Cell` order.
    pub fn add(&mut self, cell: &Cell) -> Result<()> {
        if self.min_key.is_none() {
            self.min_key = Some(cell.key.clone());
        }
        if self.max_key.as_ref() != Some(&cell.key) {
            self.bloom.add_key(&cell.key);
            self.max_key = Some(cell.key.clone());
        }
        self.max_timestamp = self.max_timestamp.max(cell.value.timestamp());
        self.entry_count += 1;

        if !self.block_builder.add(cell) {
            self.flush_block()?;
            // first entry of a fresh block is always accepted
            self.block_builder.add(cell);
        }
        self.last_key_in_block = Some(cell.key.clone());

        Ok(())
    }

    pub fn entry_count(&self) -> u64 {
        self.entry_count
    }

    /// Write the current block and record an index entry for it.
    fn flush_block(&mut self) -> Result<()> {
        let Some(last_key) = self.last_key_in_block.take() else {
            return Ok(());
        };

        let block = std::mem::replace(&mut self.block_builder, BlockBuilder::new(self.block_size));
        let block_data = block.build();
        let block_size = block_data.len() as u64;

        self.writer.write_all(&block_data)?;
        self.index_entries.push(IndexEntry {
            last_key,
            offset: self.data_offset,
            size: block_size,
        });

        self.data_offset += block_size;
        Ok(())
    }

    /// Finalize the SSTable: last block, meta block, index block, footer, fsync.
    pub fn finish(mut self) -> Result<SSTableMeta> {
        self.flush_block()?;

        let min_key = self.min_key.unwrap_or_default();
        let max_key = self.max_key.unwrap_or_default();

        let meta_block = MetaBlock {
            entry_count: self.entry_count,
            max_timestamp: self.max_timestamp,
            min_key: min_key.clone(),
            max_key: max_key.clone(),
            bloom: self.bloom.build(),
        }
        .encode();
        let meta_block_offset = self.data_offset;
        let meta_block_size = meta_block.len() as u64;
        self.writer.write_all(&meta_block)?;

        let index_block: Vec<u8> = self.index_entries.iter().flat_map(IndexEntry::encode).collect();
        let index_block_offset = meta_block_offset + meta_block_size;
        let index_block_size = index_block.len() as u64;
        self.writer.write_all(&index_block)?;

        let footer = Footer {
            index_block_offset,
            index_block_size,
            meta_block_offset,
            meta_block_size,
            magic: SSTABLE_MAGIC,
        };
        self.writer.write_all(&footer.encode())?;

        self.writer.flush()?;
        self.writer.get_ref().sync_all()?;

        Ok(SSTableMeta {
            generation: self.generation,
            min_key,
            max_key,
            max_timestamp: self.max_timestamp,
            file_size: index_block_offset + index_block_size + Footer::SIZE as u64,
            entry_count: self.entry_count,
        })
    }
}
