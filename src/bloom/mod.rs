pub mod builder;

pub use builder::BloomFilterBuilder;

use xxhash_rust::xxh3::xxh3_128;

use crate::error::{Error, Result};

/// Probabilistic data structure: "is this key in the set?"
///
/// - If any bit is 0 → key is DEFINITELY NOT in the set
/// - If all bits are 1 → key is PROBABLY in the set (false positive possible)
///
/// Every SSTable carries one in its meta block. Point lookups consult it
/// before touching the index, so a miss costs no disk read.
///
/// Sizing:
///   bits_per_key = -1.44 * log2(false_positive_rate)
///   num_hashes = bits_per_key * ln(2)
///
/// Double hashing: h_i(key) = h1(key) + i * h2(key) (mod m), with h1 and
/// h2 the two halves of one 128-bit xxh3.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BloomFilter {
    bits: Vec<u64>,
    num_hashes: u32,
    num_bits: u32,
}

const HEADER_SIZE: usize = 8;

impl BloomFilter {
    /// Create an empty filter sized for `expected_items` at the given FPR.
    /// Zero items is treated as one; the rate is clamped into (0, 1).
    pub fn new(expected_items: usize, false_positive_rate: f64) -> Self {
        let expected_items = expected_items.max(1);
        let rate = false_positive_rate.clamp(1e-9, 0.5);

        let bits_per_key = -1.44 * rate.log2();
        let num_bits = ((expected_items as f64) * bits_per_key).ceil() as u32;
        let num_bits = num_bits.max(64);

        let num_hashes = ((bits_per_key * 2.0f64.ln()).ceil() as u32).max(1);

        BloomFilter {
            bits: vec![0u64; (num_bits as usize).div_ceil(64)],
            num_hashes,
            num_bits,
        }
    }

    pub fn insert(&mut self, key: &[u8]) {
        self.insert_hash(xxh3_128(key));
    }

    fn insert_hash(&mut self, hash: u128) {
        let (h1, h2) = split(hash);
        for i in 0..self.num_hashes {
            let pos = self.position(h1, h2, i);
            self.bits[(pos / 64) as usize] |= 1 << (pos % 64);
        }
    }

    /// false → definitely not here. true → probably here.
    pub fn may_contain(&self, key: &[u8]) -> bool {
        let (h1, h2) = split(xxh3_128(key));
        (0..self.num_hashes).all(|i| {
            let pos = self.position(h1, h2, i);
            (self.bits[(pos / 64) as usize] >> (pos % 64)) & 1 == 1
        })
    }

    /// Layout: [num_hashes u32][num_bits u32][bit words u64 ...], little endian.
    pub fn serialize(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(HEADER_SIZE + self.bits.len() * 8);
        buf.extend_from_slice(&self.num_hashes.to_le_bytes());
        buf.extend_from_slice(&self.num_bits.to_le_bytes());
        for word in &self.bits {
            buf.extend_from_slice(&word.to_le_bytes());
        }
        buf
    }

    pub fn deserialize(data: &[u8]) -> Result<Self> {
        if data.len() < HEADER_SIZE {
            return Err(Error::Corruption("bloom filter too short".into()));
        }
        let num_hashes = u32::from_le_bytes([data[0], data[1], data[2], data[3]]);
        let num_bits = u32::from_le_bytes([data[4], data[5], data[6], data[7]]);
        let words = (num_bits as usize).div_ceil(64);

        if num_hashes == 0 || num_bits == 0 || data.len() != HEADER_SIZE + words * 8 {
            return Err(Error::Corruption(format!(
                "bloom filter header mismatch: {num_hashes} hashes, {num_bits} bits, {} bytes",
                data.len()
            )));
        }

        let bits = data[HEADER_SIZE..]
            .chunks_exact(8)
            .map(|chunk| {
                let mut raw = [0u8; 8];
                raw.copy_from_slice(chunk);
                u64::from_le_bytes(raw)
            })
            .collect();

        Ok(BloomFilter {
            bits,
            num_hashes,
            num_bits,
        })
    }

    pub fn num_hashes(&self) -> u32 {
        self.num_hashes
    }

    pub fn num_bits(&self) -> u32 {
        self.num_bits
    }

    fn position(&self, h1: u64, h2: u64, i: u32) -> u32 {
        (h1.wrapping_add((i as u64).wrapping_mul(h2)) % self.num_bits as u64) as u32
    }
}

fn split(hash: u128) -> (u64, u64) {
    (hash as u64, (hash >> 64) as u64)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn inserted_keys_are_found() {
        let mut bf = BloomFilter::new(100, 0.01);
        bf.insert(b"hello");
        assert!(bf.may_contain(b"hello"));
        assert!(!bf.may_contain(b"world"));
    }

    #[test]
    fn serialize_roundtrip_preserves_membership() {
        let mut bf = BloomFilter::new(500, 0.01);
        for i in 0..500u32 {
            bf.insert(&i.to_be_bytes());
        }
        let restored = BloomFilter::deserialize(&bf.serialize()).unwrap();
        assert_eq!(restored, bf);
        assert!((0..500u32).all(|i| restored.may_contain(&i.to_be_bytes())));
    }

    #[test]
    fn truncated_filter_is_rejected() {
        let bytes = BloomFilter::new(10, 0.01).serialize();
        assert!(BloomFilter::deserialize(&bytes[..bytes.len() - 1]).is_err());
        assert!(BloomFilter::deserialize(&bytes[..4]).is_err());
    }
}
