use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::bloom::BloomFilter;
use crate::error::{Error, Result};
use crate::sstable::block::Block;
use crate::sstable::footer::{Footer, IndexEntry, MetaBlock, SSTableMeta, decode_index};
use crate::sstable::iterator::SSTableIterator;
use crate::types::VersionedValue;

/// An opened SSTable file. Supports point lookups and range scans.
///
/// On open:
/// 1. Read footer (last 40 bytes) → find index and meta block positions
/// 2. Read and parse the index block → Vec<IndexEntry>
/// 3. Read the meta block: key range, counts, bloom filter
/// 4. Ready for queries (data blocks read on demand)
///
/// The file handle stays open for the table's lifetime. Compaction may
/// unlink the file while a scan still holds the table; reads keep working
/// until the last `Arc` is dropped.
pub struct SSTable {
    path: PathBuf,
    file: Mutex<File>,
    index: Vec<IndexEntry>,
    meta: SSTableMeta,
    bloom: BloomFilter,
}

impl SSTable {
    pub fn open(path: &Path, generation: u64) -> Result<Self> {
        let mut file = File::open(path)?;

        let file_size = file.metadata()?.len();
        if file_size < Footer::SIZE as u64 {
            return Err(Error::Corruption(format!(
                "{}: file too short to contain footer",
                path.display()
            )));
        }

        let footer = Footer::decode(&read_at(&mut file, file_size - Footer::SIZE as u64, Footer::SIZE)?)?;
        if footer.index_block_offset + footer.index_block_size > file_size
            || footer.meta_block_offset + footer.meta_block_size > file_size
        {
            return Err(Error::Corruption(format!(
                "{}: footer points past end of file",
                path.display()
            )));
        }

        let index = decode_index(&read_at(
            &mut file,
            footer.index_block_offset,
            footer.index_block_size as usize,
        )?)?;
        let meta_block = MetaBlock::decode(&read_at(
            &mut file,
            footer.meta_block_offset,
            footer.meta_block_size as usize,
        )?)?;

        Ok(SSTable {
            path: path.to_path_buf(),
            file: Mutex::new(file),
            index,
            meta: SSTableMeta {
                generation,
                min_key: meta_block.min_key,
                max_key: meta_block.max_key,
                max_timestamp: meta_block.max_timestamp,
                file_size,
                entry_count: meta_block.entry_count,
            },
            bloom: meta_block.bloom,
        })
    }

    /// Newest version of `key` in this table, tombstones included.
    ///
    /// 1. Bloom filter and key range rule out most misses without IO
    /// 2. Binary search the index for the first block whose last key >= key
    /// 3. Read that block and binary search within it
    pub fn get(&self, key: &[u8]) -> Result<Option<VersionedValue>> {
        if !self.may_contain(key) {
            return Ok(None);
        }
        let block_idx = self.block_for(key);
        if block_idx >= self.index.len() {
            return Ok(None);
        }
        self.read_block(block_idx)?.get(key)
    }

    /// Cheap pre-check: false means the key is definitely absent.
    pub fn may_contain(&self, key: &[u8]) -> bool {
        self.meta.entry_count > 0
            && key >= self.meta.min_key.as_slice()
            && key <= self.meta.max_key.as_slice()
            && self.bloom.may_contain(key)
    }

    /// Cursor over every cell, starting at the first key >= `from`.
    pub fn iter_from(self: &Arc<Self>, from: &[u8]) -> Result<SSTableIterator> {
        SSTableIterator::seek(Arc::clone(self), from)
    }

    pub fn iter(self: &Arc<Self>) -> Result<SSTableIterator> {
        self.iter_from(&[])
    }

    /// Index of the first block that can hold `key`.
    pub(crate) fn block_for(&self, key: &[u8]) -> usize {
        self.index.partition_point(|entry| entry.last_key.as_slice() < key)
    }

    pub(crate) fn block_count(&self) -> usize {
        self.index.len()
    }

    pub(crate) fn read_block(&self, block_idx: usize) -> Result<Block> {
        let entry = &self.index[block_idx];
        let data = read_at(&mut self.file.lock(), entry.offset, entry.size as usize)?;
        Block::decode(data).map_err(|e| match e {
            Error::Corruption(msg) => {
                Error::Corruption(format!("{} block {block_idx}: {msg}", self.path.display()))
            }
            other => other,
        })
    }

    pub fn meta(&self) -> &SSTableMeta {
        &self.meta
    }

    pub fn generation(&self) -> u64 {
        self.meta.generation
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

fn read_at(file: &mut File, offset: u64, len: usize) -> Result<Vec<u8>> {
    let mut buf = vec![0u8; len];
    file.seek(SeekFrom::Start(offset))?;
    file.read_exact(&mut buf)?;
    Ok(buf)
}
