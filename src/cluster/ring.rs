use std::collections::{BTreeMap, BTreeSet};

use xxhash_rust::xxh3::xxh3_64;

use crate::cluster::NodeId;

/// Ring positions per physical node unless configured otherwise.
pub const DEFAULT_VIRTUAL_NODES: usize = 64;

/// Consistent-hash ring mapping keys to nodes.
///
/// Every physical node owns `virtual_nodes` positions, the xxh3 hashes of
/// `"<node><i>"`. A key belongs to the first position at or after its own
/// hash, wrapping around. Built once; membership changes build a new ring.
#[derive(Debug, Clone)]
pub struct HashRing {
    ring: BTreeMap<u64, NodeId>,
    nodes: BTreeSet<NodeId>,
    local: NodeId,
}

impl HashRing {
    /// The local node is always a member, listed in `nodes` or not.
    pub fn new<I>(local: NodeId, nodes: I, virtual_nodes: usize) -> Self
    where
        I: IntoIterator<Item = NodeId>,
    {
        let mut members: BTreeSet<NodeId> = nodes.into_iter().collect();
        members.insert(local.clone());

        let mut ring = BTreeMap::new();
        for node in &members {
            for i in 0..virtual_nodes.max(1) {
                ring.insert(hash(format!("{node}{i}").as_bytes()), node.clone());
            }
        }

        HashRing {
            ring,
            nodes: members,
            local,
        }
    }

    /// The node owning `key`.
    pub fn primary_for(&self, key: &[u8]) -> &NodeId {
        let h = hash(key);
        self.ring
            .range(h..)
            .next()
            .or_else(|| self.ring.iter().next())
            .map(|(_, node)| node)
            .unwrap_or(&self.local)
    }

    /// Up to `n` distinct nodes for `key`, walking clockwise from its hash.
    /// The first is `primary_for(key)`.
    pub fn nodes_for_key(&self, key: &[u8], n: usize) -> Vec<NodeId> {
        let h = hash(key);
        let mut picked: Vec<NodeId> = Vec::with_capacity(n.min(self.nodes.len()));
        for (_, node) in self.ring.range(h..).chain(self.ring.range(..h)) {
            if picked.len() >= n {
                break;
            }
            if !picked.contains(node) {
                picked.push(node.clone());
            }
        }
        picked
    }

    /// Number of distinct physical nodes.
    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    pub fn local(&self) -> &NodeId {
        &self.local
    }

    pub fn is_local(&self, node: &NodeId) -> bool {
        *node == self.local
    }
}

fn hash(bytes: &[u8]) -> u64 {
    xxh3_64(bytes)
}
