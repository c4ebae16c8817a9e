pub mod client;
pub mod coordinator;
pub mod quorum;
pub mod repair;
pub mod replica;
pub mod response;
pub mod ring;

pub use client::{ReplicaClient, ReplicaError};
pub use coordinator::Coordinator;
pub use replica::{ReplicaInfo, ReplicaSpecError};
pub use response::Response;
pub use ring::HashRing;

use std::fmt;

/// Identity of a physical node: the base URL its peers reach it at.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(String);

impl NodeId {
    pub fn new(id: impl Into<String>) -> Self {
        NodeId(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for NodeId {
    fn from(id: &str) -> Self {
        NodeId::new(id)
    }
}

impl From<String> for NodeId {
    fn from(id: String) -> Self {
        NodeId(id)
    }
}
