use crate::error::{Error, Result};
use crate::sstable::block::{BLOCK_TRAILER_SIZE, ENTRY_HEADER_SIZE};
use crate::types::{Cell, ValueType, VersionedValue};

/// A decoded, checksum-verified data block.
///
/// Entries stay in their encoded form; `cell(i)` decodes one on demand.
pub struct Block {
    data: Vec<u8>,
    offsets: Vec<u32>,
}

impl Block {
    /// Verify the trailer checksum and parse the offset array.
    pub fn decode(mut data: Vec<u8>) -> Result<Self> {
        if data.len() < BLOCK_TRAILER_SIZE {
            return Err(Error::Corruption("block too short".into()));
        }

        let crc_at = data.len() - 4;
        let stored_crc = read_u32(&data, crc_at);
        if crc32fast::hash(&data[..crc_at]) != stored_crc {
            return Err(Error::Corruption("block checksum mismatch".into()));
        }

        let count_at = crc_at - 4;
        let count = read_u32(&data, count_at) as usize;
        let offsets_len = count * 4;
        if offsets_len > count_at {
            return Err(Error::Corruption(format!("block claims {count} entries")));
        }

        let offsets_at = count_at - offsets_len;
        let offsets: Vec<u32> = (0..count)
            .map(|i| read_u32(&data, offsets_at + i * 4))
            .collect();
        if offsets.iter().any(|&off| off as usize + ENTRY_HEADER_SIZE > offsets_at) {
            return Err(Error::Corruption("block offset out of range".into()));
        }

        data.truncate(offsets_at);
        Ok(Block { data, offsets })
    }

    pub fn len(&self) -> usize {
        self.offsets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.offsets.is_empty()
    }

    /// Key of entry `i` without decoding the rest.
    pub fn key_at(&self, i: usize) -> Result<&[u8]> {
        let at = self.offsets[i] as usize;
        let key_len = read_u32(&self.data, at) as usize;
        let start = at + ENTRY_HEADER_SIZE;
        self.data
            .get(start..start + key_len)
            .ok_or_else(|| Error::Corruption("block entry key out of range".into()))
    }

    /// Decode entry `i`.
    pub fn cell(&self, i: usize) -> Result<Cell> {
        let at = self.offsets[i] as usize;
        let key_len = read_u32(&self.data, at) as usize;
        let value_type = ValueType::from_u8(self.data[at + 4])
            .ok_or_else(|| Error::Corruption(format!("invalid value type: {}", self.data[at + 4])))?;
        let timestamp = read_u64(&self.data, at + 5);
        let val_len = read_u32(&self.data, at + 13) as usize;

        let key_start = at + ENTRY_HEADER_SIZE;
        let val_start = key_start + key_len;
        if val_start + val_len > self.data.len() {
            return Err(Error::Corruption("block entry out of range".into()));
        }

        let key = self.data[key_start..val_start].to_vec();
        let value = match value_type {
            ValueType::Put => {
                VersionedValue::value(timestamp, self.data[val_start..val_start + val_len].to_vec())
            }
            ValueType::Delete => VersionedValue::tombstone(timestamp),
        };
        Ok(Cell::new(key, value))
    }

    /// Index of the first entry whose key is >= `key`, or `len()` if none.
    /// That entry is the newest version of `key` when the key is present.
    pub fn seek(&self, key: &[u8]) -> Result<usize> {
        let (mut lo, mut hi) = (0, self.offsets.len());
        while lo < hi {
            let mid = lo + (hi - lo) / 2;
            if self.key_at(mid)? < key {
                lo = mid + 1;
            } else {
                hi = mid;
            }
        }
        Ok(lo)
    }

    /// Newest version of `key` stored in this block.
    pub fn get(&self, key: &[u8]) -> Result<Option<VersionedValue>> {
        let i = self.seek(key)?;
        if i < self.len() && self.key_at(i)? == key {
            return Ok(Some(self.cell(i)?.value));
        }
        Ok(None)
    }
}

pub(crate) fn read_u32(data: &[u8], at: usize) -> u32 {
    let mut raw = [0u8; 4];
    raw.copy_from_slice(&data[at..at + 4]);
    u32::from_le_bytes(raw)
}

pub(crate) fn read_u64(data: &[u8], at: usize) -> u64 {
    let mut raw = [0u8; 8];
    raw.copy_from_slice(&data[at..at + 8]);
    u64::from_le_bytes(raw)
}
