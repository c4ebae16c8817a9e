pub mod block;
pub mod builder;
pub mod footer;
pub mod iterator;
pub mod reader;

pub use builder::SSTableBuilder;
pub use footer::SSTableMeta;
pub use iterator::SSTableIterator;
pub use reader::SSTable;

/// File name of a finished table.
pub fn sstable_file_name(generation: u64) -> String {
    format!("{generation}.sst")
}

/// File name a flush writes to before the atomic rename.
pub fn temp_file_name(generation: u64) -> String {
    format!("{generation}.tmp")
}

/// Parse a generation out of `<n>.sst`.
pub fn parse_sstable_file_name(name: &str) -> Option<u64> {
    let stem = name.strip_suffix(".sst")?;
    if stem.is_empty() || !stem.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    stem.parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_numbered_tables_parse() {
        assert_eq!(parse_sstable_file_name("12.sst"), Some(12));
        assert_eq!(parse_sstable_file_name(&sstable_file_name(3)), Some(3));
        assert_eq!(parse_sstable_file_name("compacted.sst"), None);
        assert_eq!(parse_sstable_file_name("12.tmp"), None);
    }
}
