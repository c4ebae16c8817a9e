//! # quorumkv
//!
//! A partitioned, replicated key-value store.
//!
//! ## Layers
//! - **Storage**: every node runs a local LSM engine ([`db::DB`]). Writes
//!   land in a memtable, memtables are flushed to immutable sorted tables,
//!   and compaction merges the tables back into one.
//! - **Cluster**: nodes share a consistent-hash ring ([`cluster::HashRing`]).
//!   The [`cluster::Coordinator`] sends each request to the key's replicas,
//!   answers once an `ack/from` quorum is settled, and repairs stale
//!   replicas in the background.
//!
//! Every version carries a timestamp; the newest one wins everywhere, in a
//! single engine and across replicas. Deletes are timestamped tombstones.

pub mod bloom;
pub mod cluster;
pub mod config;
pub mod db;
pub mod error;
pub mod iterator;
pub mod memtable;
pub mod server;
pub mod sstable;
pub mod transport;
pub mod types;
pub mod wal;

// Public re-exports for the top-level API
pub use db::{DB, Options, Stats};
pub use error::{Error, Result};
pub use types::{Cell, VersionedValue};
