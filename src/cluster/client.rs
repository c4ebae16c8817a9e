use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

use crate::cluster::NodeId;
use crate::types::VersionedValue;

/// Why one replica failed to answer. Each counts as one failure vote.
#[derive(Debug, Error)]
pub enum ReplicaError {
    #[error("replica {node} timed out after {timeout:?}")]
    Timeout { node: NodeId, timeout: Duration },
    #[error("replica {node} unreachable: {message}")]
    Transport { node: NodeId, message: String },
    #[error("replica {node} answered with status {status}")]
    UnexpectedStatus { node: NodeId, status: u16 },
    #[error("replica {node} sent a malformed response: {message}")]
    Protocol { node: NodeId, message: String },
    #[error("local storage failure: {0}")]
    Storage(String),
}

/// How the coordinator talks to a remote replica.
///
/// Calls are replica hops: the receiver serves them from its own storage
/// and never fans out again. The coordinator applies its own timeout on
/// top of whatever the implementation does.
#[async_trait]
pub trait ReplicaClient: Send + Sync + 'static {
    /// Newest version the replica holds, tombstones included.
    /// `Ok(None)` means the replica has never seen the key.
    async fn get(&self, node: &NodeId, key: &[u8]) -> Result<Option<VersionedValue>, ReplicaError>;

    /// Store exactly this version (value or tombstone) on the replica.
    async fn write(&self, node: &NodeId, key: &[u8], value: &VersionedValue) -> Result<(), ReplicaError>;
}
