use xxhash_rust::xxh3::xxh3_128;

use crate::bloom::BloomFilter;

/// Collects keys while an SSTable is being written.
///
/// The number of keys isn't known until the table is finished, so the
/// builder keeps one 128-bit hash per key and sizes the filter in `build()`.
pub struct BloomFilterBuilder {
    hashes: Vec<u128>,
    false_positive_rate: f64,
}

impl BloomFilterBuilder {
    pub fn new(false_positive_rate: f64) -> Self {
        BloomFilterBuilder {
            hashes: Vec::new(),
            false_positive_rate,
        }
    }

    pub fn add_key(&mut self, key: &[u8]) {
        self.hashes.push(xxh3_128(key));
    }

    pub fn len(&self) -> usize {
        self.hashes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.hashes.is_empty()
    }

    pub fn build(self) -> BloomFilter {
        let mut filter = BloomFilter::new(self.hashes.len(), self.false_positive_rate);
        for hash in self.hashes {
            filter.insert_hash(hash);
        }
        filter
    }
}
