pub mod merge;

use crate::error::Result;
use crate::types::{Cell, VersionedValue};

pub use merge::MergeIterator;

/// The central iteration abstraction for the storage engine.
///
/// Every sorted source of cells (memtable, SSTable, merged view) implements
/// this trait, which lets `MergeIterator` take `Vec<Box<dyn StorageIterator>>`
/// and merge them. Sources are positioned when they are created (seeked to
/// the requested start key); a fresh scan builds fresh iterators.
///
/// Implementations are owned (`'static`): they keep their table alive
/// through an `Arc`, so a scan can outlive the lock that handed it the
/// table snapshot.
pub trait StorageIterator: Send {
    /// Returns the current key. Only valid when is_valid() is true.
    fn key(&self) -> &[u8];

    /// Returns the current version. Only valid when is_valid() is true.
    fn value(&self) -> &VersionedValue;

    /// Returns true if the iterator is positioned at a valid entry.
    fn is_valid(&self) -> bool;

    /// Advances to the next entry. Returns error on IO failure.
    fn next(&mut self) -> Result<()>;

    /// Copy of the current cell.
    fn cell(&self) -> Cell {
        Cell::new(self.key().to_vec(), self.value().clone())
    }
}
