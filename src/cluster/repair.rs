use crate::cluster::NodeId;
use crate::types::VersionedValue;

/// Replicas whose read differs from `winner` in any way: older timestamp,
/// other tombstone state, other payload, or no version at all.
pub fn stale_replicas(winner: &VersionedValue, reads: &[(NodeId, Option<VersionedValue>)]) -> Vec<NodeId> {
    reads
        .iter()
        .filter(|(_, read)| read.as_ref() != Some(winner))
        .map(|(node, _)| node.clone())
        .collect()
}
