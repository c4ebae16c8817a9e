use crate::sstable::block::{BLOCK_TRAILER_SIZE, ENTRY_HEADER_SIZE};
use crate::types::Cell;

/// Accumulates sorted cells and serializes them into a block.
///
/// A block is typically 4KB (matching OS page size / SSD block size).
/// Contains sorted entries + an offset array for binary search.
///
/// On-disk layout of a block:
/// ```text
/// ┌──────────────────────────────────────────────────────────────────┐
/// │ Entry 0: [key_len(4B)][type(1B)][timestamp(8B)][val_len(4B)][key][value] │
/// │ Entry 1: ...                                                     │
/// │ Entry N: ...                                                     │
/// ├──────────────────────────────────────────────────────────────────┤
/// │ Offset array: [off_0(4B)][off_1(4B)]...[off_N(4B)]               │
/// │ Num entries (4B)                                                 │
/// │ CRC32 of everything above (4B)                                   │
/// └──────────────────────────────────────────────────────────────────┘
/// ```
///
/// The offset array at the end enables binary search without parsing
/// every entry: jump to offsets[mid], read the key, compare.
pub struct BlockBuilder {
    data: Vec<u8>,
    offsets: Vec<u32>,
    block_size: usize,
}

impl BlockBuilder {
    pub fn new(block_size: usize) -> Self {
        BlockBuilder {
            data: Vec::new(),
            offsets: Vec::new(),
            block_size,
        }
    }

    /// Add a cell to the block.
    /// Returns false if the block is full (entry doesn't fit).
    /// First entry is always accepted even if it exceeds block_size.
    /// Cells MUST be added in `Cell` order.
    pub fn add(&mut self, cell: &Cell) -> bool {
        let payload = cell.value.payload().unwrap_or_default();
        let entry_size = ENTRY_HEADER_SIZE + cell.key.len() + payload.len() + 4;

        if !self.offsets.is_empty() && self.estimated_size() + entry_size > self.block_size {
            return false;
        }

        self.offsets.push(self.data.len() as u32);

        self.data.extend_from_slice(&(cell.key.len() as u32).to_le_bytes());
        self.data.push(cell.value.value_type() as u8);
        self.data.extend_from_slice(&cell.value.timestamp().to_le_bytes());
        self.data.extend_from_slice(&(payload.len() as u32).to_le_bytes());
        self.data.extend_from_slice(&cell.key);
        self.data.extend_from_slice(payload);

        true
    }

    /// Finalize the block: append offset array, entry count and checksum.
    pub fn build(self) -> Vec<u8> {
        let mut block = self.data;

        for offset in &self.offsets {
            block.extend_from_slice(&offset.to_le_bytes());
        }
        block.extend_from_slice(&(self.offsets.len() as u32).to_le_bytes());

        let crc = crc32fast::hash(&block);
        block.extend_from_slice(&crc.to_le_bytes());

        block
    }

    /// Current estimated size of the block (data + offsets + trailer).
    pub fn estimated_size(&self) -> usize {
        self.data.len() + self.offsets.len() * 4 + BLOCK_TRAILER_SIZE
    }

    pub fn is_empty(&self) -> bool {
        self.offsets.is_empty()
    }

    pub fn len(&self) -> usize {
        self.offsets.len()
    }
}
