use crate::bloom::BloomFilter;
use crate::error::{Error, Result};
use crate::sstable::block::reader::{read_u32, read_u64};

/// Magic number to identify SSTable files.
pub const SSTABLE_MAGIC: u64 = 0x514B_565F_5353_5401; // "QKV_SST" + format 1

/// What an SSTable knows about itself.
///
/// The generation is not stored in the file: it comes from the file name,
/// which compaction rewrites.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SSTableMeta {
    pub generation: u64,
    /// Smallest key in the SSTable.
    pub min_key: Vec<u8>,
    /// Largest key in the SSTable.
    pub max_key: Vec<u8>,
    /// Newest timestamp of any cell.
    pub max_timestamp: u64,
    pub file_size: u64,
    /// Number of cells (including tombstones).
    pub entry_count: u64,
}

/// An entry in the SSTable's index block.
/// Maps a block's last key to its location in the file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexEntry {
    /// Last (largest) key in the block.
    pub last_key: Vec<u8>,
    /// Byte offset of the block in the file.
    pub offset: u64,
    /// Size of the block in bytes.
    pub size: u64,
}

impl IndexEntry {
    /// Format: [key_len(4B)][key][offset(8B)][size(8B)]
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(4 + self.last_key.len() + 16);
        buf.extend_from_slice(&(self.last_key.len() as u32).to_le_bytes());
        buf.extend_from_slice(&self.last_key);
        buf.extend_from_slice(&self.offset.to_le_bytes());
        buf.extend_from_slice(&self.size.to_le_bytes());
        buf
    }

    /// Decode an index entry from bytes, returning (entry, bytes_consumed).
    pub fn decode(data: &[u8]) -> Result<(Self, usize)> {
        if data.len() < 4 {
            return Err(Error::Corruption("index entry too short".into()));
        }
        let key_len = read_u32(data, 0) as usize;
        let total = 4 + key_len + 16;
        if data.len() < total {
            return Err(Error::Corruption("index entry truncated".into()));
        }
        let last_key = data[4..4 + key_len].to_vec();
        let offset = read_u64(data, 4 + key_len);
        let size = read_u64(data, 12 + key_len);
        Ok((IndexEntry { last_key, offset, size }, total))
    }
}

/// Decode a whole index block.
pub fn decode_index(data: &[u8]) -> Result<Vec<IndexEntry>> {
    let mut index = Vec::new();
    let mut offset = 0usize;
    while offset < data.len() {
        let (entry, consumed) = IndexEntry::decode(&data[offset..])?;
        index.push(entry);
        offset += consumed;
    }
    Ok(index)
}

/// Table statistics plus the bloom filter, stored between index and footer.
///
/// Format:
/// ```text
/// [entry_count(8B)][max_timestamp(8B)]
/// [min_key_len(4B)][min_key][max_key_len(4B)][max_key]
/// [bloom_len(4B)][bloom filter bytes]
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MetaBlock {
    pub entry_count: u64,
    pub max_timestamp: u64,
    pub min_key: Vec<u8>,
    pub max_key: Vec<u8>,
    pub bloom: BloomFilter,
}

impl MetaBlock {
    pub fn encode(&self) -> Vec<u8> {
        let bloom = self.bloom.serialize();
        let mut buf = Vec::with_capacity(28 + self.min_key.len() + self.max_key.len() + bloom.len());
        buf.extend_from_slice(&self.entry_count.to_le_bytes());
        buf.extend_from_slice(&self.max_timestamp.to_le_bytes());
        buf.extend_from_slice(&(self.min_key.len() as u32).to_le_bytes());
        buf.extend_from_slice(&self.min_key);
        buf.extend_from_slice(&(self.max_key.len() as u32).to_le_bytes());
        buf.extend_from_slice(&self.max_key);
        buf.extend_from_slice(&(bloom.len() as u32).to_le_bytes());
        buf.extend_from_slice(&bloom);
        buf
    }

    pub fn decode(data: &[u8]) -> Result<Self> {
        let mut cursor = Cursor { data, at: 0 };
        let entry_count = cursor.u64()?;
        let max_timestamp = cursor.u64()?;
        let min_key = cursor.bytes()?.to_vec();
        let max_key = cursor.bytes()?.to_vec();
        let bloom = BloomFilter::deserialize(cursor.bytes()?)?;
        Ok(MetaBlock {
            entry_count,
            max_timestamp,
            min_key,
            max_key,
            bloom,
        })
    }
}

struct Cursor<'a> {
    data: &'a [u8],
    at: usize,
}

impl<'a> Cursor<'a> {
    fn take(&mut self, n: usize) -> Result<&'a [u8]> {
        let slice = self
            .data
            .get(self.at..self.at + n)
            .ok_or_else(|| Error::Corruption("meta block truncated".into()))?;
        self.at += n;
        Ok(slice)
    }

    fn u64(&mut self) -> Result<u64> {
        Ok(read_u64(self.take(8)?, 0))
    }

    fn bytes(&mut self) -> Result<&'a [u8]> {
        let len = read_u32(self.take(4)?, 0) as usize;
        self.take(len)
    }
}

/// The footer sits at the end of the SSTable file.
/// It tells the reader where to find the index block and meta blocks.
///
/// ```text
/// ┌──────────────────────────────────────┐
/// │ Index block offset (8B)              │
/// │ Index block size (8B)                │
/// │ Meta block offset (8B)               │
/// │ Meta block size (8B)                 │
/// │ Magic number (8B)                    │
/// └──────────────────────────────────────┘
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Footer {
    pub index_block_offset: u64,
    pub index_block_size: u64,
    pub meta_block_offset: u64,
    pub meta_block_size: u64,
    pub magic: u64,
}

impl Footer {
    pub const SIZE: usize = 8 * 5;

    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(Self::SIZE);
        buf.extend_from_slice(&self.index_block_offset.to_le_bytes());
        buf.extend_from_slice(&self.index_block_size.to_le_bytes());
        buf.extend_from_slice(&self.meta_block_offset.to_le_bytes());
        buf.extend_from_slice(&self.meta_block_size.to_le_bytes());
        buf.extend_from_slice(&self.magic.to_le_bytes());
        buf
    }

    pub fn decode(data: &[u8]) -> Result<Self> {
        if data.len() < Self::SIZE {
            return Err(Error::Corruption("footer too short".into()));
        }
        let magic = read_u64(data, 32);
        if magic != SSTABLE_MAGIC {
            return Err(Error::Corruption(format!(
                "bad magic: expected {SSTABLE_MAGIC:#x}, got {magic:#x}"
            )));
        }

        Ok(Footer {
            index_block_offset: read_u64(data, 0),
            index_block_size: read_u64(data, 8),
            meta_block_offset: read_u64(data, 16),
            meta_block_size: read_u64(data, 24),
            magic,
        })
    }
}
