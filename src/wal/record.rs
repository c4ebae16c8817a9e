use crate::error::{Error, Result};
use crate::types::{Cell, ValueType, VersionedValue};

/// A single record in the WAL: one upsert or one remove, with the exact
/// version it wrote.
///
/// On-disk format:
/// ```text
/// ┌──────────┬─────────┬──────────┬────────────┬────────────┬───────────┬───────────┐
/// │ CRC (4B) │ Len (4B)│ Type (1B)│ Stamp (8B) │ KeyLen (4B)│ Key (var) │ Val (var) │
/// └──────────┴─────────┴──────────┴────────────┴────────────┴───────────┴───────────┘
/// ```
///
/// CRC covers everything after the CRC field itself.
/// If CRC doesn't match on read, the record was a partial write (crash mid-write)
/// and recovery stops here; all preceding records are valid.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WALRecord {
    pub record_type: ValueType,
    pub timestamp: u64,
    pub key: Vec<u8>,
    pub value: Vec<u8>,
}

const CRC_SIZE: usize = 4;
const LEN_SIZE: usize = 4;
const TYPE_SIZE: usize = 1;
const STAMP_SIZE: usize = 8;
const KEY_LEN_SIZE: usize = 4;
const HEADER_SIZE: usize = CRC_SIZE + LEN_SIZE + TYPE_SIZE + STAMP_SIZE + KEY_LEN_SIZE;

impl WALRecord {
    /// Create a Put record.
    pub fn put(key: Vec<u8>, value: Vec<u8>, timestamp: u64) -> Self {
        WALRecord {
            record_type: ValueType::Put,
            timestamp,
            key,
            value,
        }
    }

    /// Create a Delete record.
    pub fn delete(key: Vec<u8>, timestamp: u64) -> Self {
        WALRecord {
            record_type: ValueType::Delete,
            timestamp,
            key,
            value: Vec::new(),
        }
    }

    pub fn from_cell(cell: &Cell) -> Self {
        match cell.value.payload() {
            Some(payload) => WALRecord::put(cell.key.clone(), payload.to_vec(), cell.value.timestamp()),
            None => WALRecord::delete(cell.key.clone(), cell.value.timestamp()),
        }
    }

    pub fn into_cell(self) -> Cell {
        let value = match self.record_type {
            ValueType::Put => VersionedValue::value(self.timestamp, self.value),
            ValueType::Delete => VersionedValue::tombstone(self.timestamp),
        };
        Cell::new(self.key, value)
    }

    /// Serialize this record to bytes (including CRC header).
    pub fn encode(&self) -> Vec<u8> {
        let payload_len = TYPE_SIZE + STAMP_SIZE + KEY_LEN_SIZE + self.key.len() + self.value.len();
        let mut buf = Vec::with_capacity(CRC_SIZE + LEN_SIZE + payload_len);

        // CRC placeholder, filled once the rest is in place
        buf.extend_from_slice(&[0u8; CRC_SIZE]);
        buf.extend_from_slice(&(payload_len as u32).to_le_bytes());
        buf.push(self.record_type as u8);
        buf.extend_from_slice(&self.timestamp.to_le_bytes());
        buf.extend_from_slice(&(self.key.len() as u32).to_le_bytes());
        buf.extend_from_slice(&self.key);
        buf.extend_from_slice(&self.value);

        let crc = crc32fast::hash(&buf[CRC_SIZE..]);
        buf[0..CRC_SIZE].copy_from_slice(&crc.to_le_bytes());
        buf
    }

    /// Deserialize a record from the front of `data`. Returns error if CRC
    /// doesn't match or the record is cut short.
    pub fn decode(data: &[u8]) -> Result<Self> {
        if data.len() < HEADER_SIZE {
            return Err(Error::Corruption("record too short".into()));
        }

        let stored_crc = read_u32(data, 0);
        let payload_len = read_u32(data, CRC_SIZE) as usize;

        let total_len = CRC_SIZE + LEN_SIZE + payload_len;
        if data.len() < total_len || total_len < HEADER_SIZE {
            return Err(Error::Corruption("record truncated".into()));
        }

        let computed_crc = crc32fast::hash(&data[CRC_SIZE..total_len]);
        if stored_crc != computed_crc {
            return Err(Error::Corruption("CRC mismatch".into()));
        }

        let mut offset = CRC_SIZE + LEN_SIZE;
        let record_type = ValueType::from_u8(data[offset])
            .ok_or_else(|| Error::Corruption(format!("invalid record type: {}", data[offset])))?;
        offset += TYPE_SIZE;

        let timestamp = read_u64(data, offset);
        offset += STAMP_SIZE;

        let key_len = read_u32(data, offset) as usize;
        offset += KEY_LEN_SIZE;

        if offset + key_len > total_len {
            return Err(Error::Corruption("key length exceeds record".into()));
        }
        let key = data[offset..offset + key_len].to_vec();
        offset += key_len;

        let value = data[offset..total_len].to_vec();

        Ok(WALRecord {
            record_type,
            timestamp,
            key,
            value,
        })
    }

    /// Size of this record when serialized on disk.
    pub fn encoded_size(&self) -> usize {
        HEADER_SIZE + self.key.len() + self.value.len()
    }
}

fn read_u32(data: &[u8], at: usize) -> u32 {
    let mut raw = [0u8; 4];
    raw.copy_from_slice(&data[at..at + 4]);
    u32::from_le_bytes(raw)
}

fn read_u64(data: &[u8], at: usize) -> u64 {
    let mut raw = [0u8; 8];
    raw.copy_from_slice(&data[at..at + 8]);
    u64::from_le_bytes(raw)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn put_record_roundtrip() {
        let record = WALRecord::put(b"key".to_vec(), b"value".to_vec(), 17);
        let encoded = record.encode();
        assert_eq!(encoded.len(), record.encoded_size());
        assert_eq!(WALRecord::decode(&encoded).unwrap(), record);
    }

    #[test]
    fn delete_record_becomes_tombstone_cell() {
        let record = WALRecord::delete(b"gone".to_vec(), 99);
        let cell = WALRecord::decode(&record.encode()).unwrap().into_cell();
        assert!(cell.is_tombstone());
        assert_eq!(cell.value.timestamp(), 99);
    }

    #[test]
    fn flipped_bit_is_detected() {
        let mut encoded = WALRecord::put(b"k".to_vec(), b"v".to_vec(), 1).encode();
        let last = encoded.len() - 1;
        encoded[last] ^= 0x01;
        assert!(matches!(WALRecord::decode(&encoded), Err(Error::Corruption(_))));
    }
}
