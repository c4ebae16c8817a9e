use std::fs;
use std::path::Path;

use crate::error::Result;
use crate::types::Cell;
use crate::wal::record::WALRecord;

/// Reads a WAL file back for crash recovery.
///
/// Loads the entire file into memory, then decodes record by record.
/// Decoding stops at the first torn or corrupted record: WAL writes are
/// sequential and append-only, so a bad record marks where the crash
/// happened and nothing valid can follow it.
pub struct WALReader {
    data: Vec<u8>,
}

impl WALReader {
    pub fn open(path: &Path) -> Result<Self> {
        let data = fs::read(path)?;
        Ok(WALReader { data })
    }

    pub fn iter(&self) -> WALIterator<'_> {
        WALIterator {
            data: &self.data,
            offset: 0,
        }
    }

    /// Every intact record as a cell, plus whether a torn tail was skipped.
    pub fn replay(&self) -> (Vec<Cell>, bool) {
        let mut iter = self.iter();
        let cells = iter.by_ref().map(WALRecord::into_cell).collect();
        (cells, iter.offset < self.data.len())
    }
}

/// Iterator over intact WAL records.
pub struct WALIterator<'a> {
    data: &'a [u8],
    offset: usize,
}

impl Iterator for WALIterator<'_> {
    type Item = WALRecord;

    fn next(&mut self) -> Option<Self::Item> {
        if self.offset >= self.data.len() {
            return None;
        }
        let record = WALRecord::decode(&self.data[self.offset..]).ok()?;
        self.offset += record.encoded_size();
        Some(record)
    }
}
