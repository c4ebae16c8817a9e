// Hash ring tests
// Placement determinism, load spread and key movement on membership change.

use std::collections::HashMap;

use quorumkv::cluster::ring::DEFAULT_VIRTUAL_NODES;
use quorumkv::cluster::{HashRing, NodeId};
use rand::distributions::Alphanumeric;
use rand::{Rng, SeedableRng};
use rand::rngs::StdRng;

fn nodes(count: usize) -> Vec<NodeId> {
    (0..count)
        .map(|i| NodeId::new(format!("http://127.0.0.1:{}", 8080 + i)))
        .collect()
}

fn random_keys(count: usize) -> Vec<Vec<u8>> {
    let mut rng = StdRng::seed_from_u64(42);
    (0..count)
        .map(|_| {
            let len = rng.gen_range(4..24);
            (&mut rng).sample_iter(&Alphanumeric).take(len).collect()
        })
        .collect()
}

// =============================================================================
// Test 1: Every node computes the same placement
// =============================================================================
#[test]
fn placement_is_identical_on_every_node() {
    let members = nodes(5);
    let rings: Vec<HashRing> = members
        .iter()
        .map(|local| HashRing::new(local.clone(), members.clone(), DEFAULT_VIRTUAL_NODES))
        .collect();

    for key in random_keys(500) {
        let expected = rings[0].nodes_for_key(&key, 3);
        for ring in &rings[1..] {
            assert_eq!(ring.nodes_for_key(&key, 3), expected);
        }
    }
}

// =============================================================================
// Test 2: Member order doesn't matter
// =============================================================================
#[test]
fn member_order_is_irrelevant() {
    let members = nodes(4);
    let mut reversed = members.clone();
    reversed.reverse();
    let a = HashRing::new(members[0].clone(), members, 16);
    let b = HashRing::new(reversed[3].clone(), reversed, 16);

    for key in random_keys(200) {
        assert_eq!(a.primary_for(&key), b.primary_for(&key));
    }
}

// =============================================================================
// Test 3: Replica lists are distinct and start at the primary
// =============================================================================
#[test]
fn replicas_are_distinct_and_capped() {
    let members = nodes(4);
    let ring = HashRing::new(members[0].clone(), members, DEFAULT_VIRTUAL_NODES);

    for key in random_keys(200) {
        let picked = ring.nodes_for_key(&key, 3);
        assert_eq!(picked.len(), 3);
        assert_eq!(&picked[0], ring.primary_for(&key));
        assert!(picked[0] != picked[1] && picked[1] != picked[2] && picked[0] != picked[2]);

        // asking for more than the cluster has returns every node once
        assert_eq!(ring.nodes_for_key(&key, 10).len(), 4);
    }
}

// =============================================================================
// Test 4: Keys spread roughly evenly over the nodes
// =============================================================================
#[test]
fn load_is_roughly_even() {
    let members = nodes(4);
    let ring = HashRing::new(members[0].clone(), members.clone(), DEFAULT_VIRTUAL_NODES);
    let keys = random_keys(20_000);

    let mut owned: HashMap<NodeId, usize> = HashMap::new();
    for key in &keys {
        *owned.entry(ring.primary_for(key).clone()).or_default() += 1;
    }

    let fair = keys.len() / members.len();
    for node in &members {
        let count = owned.get(node).copied().unwrap_or(0);
        assert!(
            count > fair / 2 && count < fair * 2,
            "{node} owns {count} keys, fair share is {fair}"
        );
    }
}

// =============================================================================
// Test 5: Adding a node moves about 1/M of the keys, all to the new node
// =============================================================================
#[test]
fn adding_a_node_moves_few_keys() {
    let before_members = nodes(4);
    let after_members = nodes(5);
    let before = HashRing::new(before_members[0].clone(), before_members, DEFAULT_VIRTUAL_NODES);
    let after = HashRing::new(after_members[0].clone(), after_members.clone(), DEFAULT_VIRTUAL_NODES);
    let newcomer = &after_members[4];

    let keys = random_keys(20_000);
    let mut moved = 0;
    for key in &keys {
        let old = before.primary_for(key);
        let new = after.primary_for(key);
        if old != new {
            assert_eq!(new, newcomer, "a key moved between two old nodes");
            moved += 1;
        }
    }

    let expected = keys.len() / 5;
    assert!(
        moved > expected / 2 && moved < expected * 2,
        "{moved} keys moved, expected about {expected}"
    );
}

// =============================================================================
// Test 6: Single-node cluster owns everything
// =============================================================================
#[test]
fn single_node_owns_everything() {
    let solo = NodeId::from("http://localhost:8080");
    let ring = HashRing::new(solo.clone(), Vec::new(), DEFAULT_VIRTUAL_NODES);

    assert_eq!(ring.node_count(), 1);
    assert!(ring.is_local(&solo));
    for key in random_keys(50) {
        assert_eq!(ring.nodes_for_key(&key, 3), vec![solo.clone()]);
    }
}
