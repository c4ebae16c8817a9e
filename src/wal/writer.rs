use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use crate::error::Result;
use crate::wal::SyncPolicy;
use crate::wal::record::WALRecord;

/// Appends WAL records to one memtable's log file.
///
/// Two layers of buffering:
///   BufWriter.flush()  → Rust buffer → OS page cache
///   file.sync_all()    → OS page cache → physical disk
///
/// Every append is flushed to the page cache before it returns, so a
/// process crash never loses an acknowledged write; `SyncPolicy` decides
/// how often the page cache is forced to disk.
pub struct WALWriter {
    path: PathBuf,
    writer: BufWriter<File>,
    offset: u64,
    sync_policy: SyncPolicy,
    writes_since_sync: usize,
}

impl WALWriter {
    /// Create (or append to) the WAL at the given path.
    pub fn new(path: &Path, sync_policy: SyncPolicy) -> Result<Self> {
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        let offset = file.metadata()?.len();

        Ok(WALWriter {
            path: path.to_path_buf(),
            writer: BufWriter::new(file),
            offset,
            sync_policy,
            writes_since_sync: 0,
        })
    }

    /// Append a record. Depending on SyncPolicy, may fsync after this write.
    pub fn append(&mut self, record: &WALRecord) -> Result<()> {
        let encoded = record.encode();

        self.writer.write_all(&encoded)?;
        self.writer.flush()?;
        self.offset += encoded.len() as u64;
        self.writes_since_sync += 1;

        match self.sync_policy {
            SyncPolicy::EveryWrite => self.sync()?,
            SyncPolicy::EveryNWrites(n) if self.writes_since_sync >= n => self.sync()?,
            SyncPolicy::EveryNWrites(_) | SyncPolicy::Never => {}
        }

        Ok(())
    }

    /// Force fsync to disk. Ensures all buffered writes are durable.
    pub fn sync(&mut self) -> Result<()> {
        self.writer.flush()?;
        self.writer.get_ref().sync_all()?;
        self.writes_since_sync = 0;
        Ok(())
    }

    /// Current file offset (bytes written so far).
    pub fn offset(&self) -> u64 {
        self.offset
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}
