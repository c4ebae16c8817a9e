pub mod reader;
pub mod record;
pub mod writer;

pub use reader::WALReader;
pub use record::WALRecord;
pub use writer::WALWriter;

/// Controls when the WAL is fsync'd to disk.
///
/// Trade-off: durability vs throughput.
///   - EveryWrite: zero data loss, each write waits for the disk
///   - EveryNWrites: batched durability, lose up to N writes on crash
///   - Never: leave it to the OS page cache; the WAL still survives a
///     process crash, only a machine crash can lose the tail
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncPolicy {
    /// fsync after every record. Safest, slowest.
    EveryWrite,
    /// fsync every N records.
    EveryNWrites(usize),
    /// Never fsync explicitly.
    Never,
}

impl Default for SyncPolicy {
    fn default() -> Self {
        SyncPolicy::Never
    }
}

/// File name of the WAL that belongs to memtable `id`.
pub fn wal_file_name(id: u64) -> String {
    format!("{id}.wal")
}

/// Parse a memtable id out of a WAL file name.
pub fn parse_wal_file_name(name: &str) -> Option<u64> {
    let stem = name.strip_suffix(".wal")?;
    if stem.is_empty() || !stem.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    stem.parse().ok()
}
