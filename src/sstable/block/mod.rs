pub mod builder;
pub mod reader;

pub use builder::BlockBuilder;
pub use reader::Block;

/// Fixed part of an encoded entry: key_len(4) + type(1) + timestamp(8) + val_len(4).
pub(crate) const ENTRY_HEADER_SIZE: usize = 4 + 1 + 8 + 4;

/// Trailer after the offset array: entry count(4) + crc32(4).
pub(crate) const BLOCK_TRAILER_SIZE: usize = 4 + 4;
