use std::fmt;
use std::str::FromStr;

use thiserror::Error;

/// Malformed `replicas` parameter.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ReplicaSpecError {
    #[error("replica spec must look like <ack>/<from>, got {0:?}")]
    Format(String),
    #[error("ack must be positive")]
    ZeroAck,
    #[error("ack {ack} exceeds from {from}")]
    AckExceedsFrom { ack: usize, from: usize },
}

/// Quorum parameters of one request: contact `from` replicas, succeed once
/// `ack` of them have answered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReplicaInfo {
    pub ack: usize,
    pub from: usize,
}

impl ReplicaInfo {
    pub fn new(ack: usize, from: usize) -> Result<Self, ReplicaSpecError> {
        if ack == 0 {
            return Err(ReplicaSpecError::ZeroAck);
        }
        if ack > from {
            return Err(ReplicaSpecError::AckExceedsFrom { ack, from });
        }
        Ok(ReplicaInfo { ack, from })
    }

    /// Majority of a cluster of `nodes`.
    pub fn default_for(nodes: usize) -> Self {
        let from = nodes.max(1);
        ReplicaInfo {
            ack: from / 2 + 1,
            from,
        }
    }
}

impl FromStr for ReplicaInfo {
    type Err = ReplicaSpecError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let format = || ReplicaSpecError::Format(s.to_string());
        let (ack, from) = s.split_once('/').ok_or_else(format)?;
        let ack = ack.trim().parse().map_err(|_| format())?;
        let from = from.trim().parse().map_err(|_| format())?;
        ReplicaInfo::new(ack, from)
    }
}

impl fmt::Display for ReplicaInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.ack, self.from)
    }
}
