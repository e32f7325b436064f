//! Iterative Crawler (design §4.6, §5): α-parallel nearest-node lookups built
//! on top of [`crate::routing::RoutingTable::find_neighbors`] as the seed.
//!
//! The whole crawl runs on the single cooperative event-loop task: one round
//! issues up to `alpha` RPCs concurrently via `tokio::join!`/`join_all` and
//! waits for all of them before deciding whether to issue another round —
//! there is no spawned task racing ahead of the loop that owns the socket.

use crate::node::{Node, NodeId};
use std::collections::{HashSet, VecDeque};

/// Bounded priority structure tracking the closest-known nodes to a crawl
/// target, ordered by XOR distance. Capacity `(k+1)*k` per
/// [`crate::config::DhtConfig::node_heap_capacity`] — larger than classical
/// Kademlia's plain k-bucket width so a handful of unresponsive or
/// cert-less detours don't starve the crawl of real candidates.
pub struct NodeHeap {
    target: NodeId,
    capacity: usize,
    seen: HashSet<NodeId>,
    /// Sorted ascending by distance to `target`.
    nodes: Vec<Node>,
}

impl NodeHeap {
    pub fn new(target: NodeId, capacity: usize) -> Self {
        NodeHeap { target, capacity, seen: HashSet::new(), nodes: Vec::new() }
    }

    pub fn push_all(&mut self, candidates: impl IntoIterator<Item = Node>) {
        for node in candidates {
            if self.seen.insert(node.id) {
                self.nodes.push(node);
            }
        }
        self.nodes.sort_by_key(|n| n.id.distance(&self.target));
        self.nodes.truncate(self.capacity);
    }

    /// The `count` closest nodes not yet marked as queried.
    pub fn next_unqueried(&self, queried: &HashSet<NodeId>, count: usize) -> Vec<Node> {
        self.nodes
            .iter()
            .filter(|n| !queried.contains(&n.id))
            .take(count)
            .cloned()
            .collect()
    }

    pub fn closest(&self, count: usize) -> Vec<Node> {
        self.nodes.iter().take(count).cloned().collect()
    }

    pub fn contains(&self, id: &NodeId) -> bool {
        self.seen.contains(id)
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }
}

/// Per-round bookkeeping shared by all crawl variants: which nodes have
/// already been queried this crawl, so a round never re-issues an RPC to the
/// same peer.
#[derive(Default)]
pub struct CrawlState {
    pub queried: HashSet<NodeId>,
}

/// Plan the next batch of up to `alpha` nodes to query in a `find_node`-style
/// crawl round, given the current heap and what's already been queried. The
/// caller drives the actual RPCs (the crawler module has no transport
/// dependency so it stays unit-testable without a socket).
pub fn plan_round(heap: &NodeHeap, state: &CrawlState, alpha: usize) -> Vec<Node> {
    heap.next_unqueried(&state.queried, alpha)
}

/// Of the two candidates for "nearest node that answered without the value"
/// (design §4.4's `nearestWithoutValue`, capacity 1), keep whichever is
/// closer to `target`; ties keep the existing one.
pub fn closer_of(target: &NodeId, existing: Option<Node>, candidate: Node) -> Node {
    match existing {
        Some(node) if node.id.distance(target) <= candidate.id.distance(target) => node,
        _ => candidate,
    }
}

/// Merge two `find_value` replicas of a set-typed key returned from
/// different nodes during a crawl. Used by the server-facing `get_concat`
/// path to reconcile when more than one responder returns a non-identical
/// live-set before picking the union as the reconciled answer (design
/// §4.5's "JSON-array union vs majority vote" resolution: sets reconcile by
/// union, scalars by majority/most-recent value since they carry no merge
/// semantics of their own).
pub fn reconcile_value_set(replicas: Vec<Vec<String>>) -> Vec<String> {
    let mut union: Vec<String> = Vec::new();
    let mut seen = HashSet::new();
    for replica in replicas {
        for element in replica {
            if seen.insert(element.clone()) {
                union.push(element);
            }
        }
    }
    union
}

/// Reconcile divergent scalar replicas by majority vote, falling back to the
/// first-seen value on a tie (scalar keys are last-writer-wins at the
/// storage layer, so a tie here means the crawl raced two equally-recent
/// writers and either answer is defensible).
pub fn reconcile_scalar(replicas: Vec<String>) -> Option<String> {
    let mut counts: VecDeque<(String, usize)> = VecDeque::new();
    for value in replicas {
        if let Some(entry) = counts.iter_mut().find(|(v, _)| v == &value) {
            entry.1 += 1;
        } else {
            counts.push_back((value, 1));
        }
    }
    counts.into_iter().max_by_key(|(_, count)| *count).map(|(value, _)| value)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn node_with_id(byte: u8) -> Node {
        Node::new(NodeId::from_bytes([byte; 20]), "127.0.0.1", 9000 + byte as u16)
    }

    #[test]
    fn heap_dedupes_and_orders_by_distance() {
        let target = NodeId::from_bytes([0u8; 20]);
        let mut heap = NodeHeap::new(target, 10);
        heap.push_all(vec![node_with_id(0x04), node_with_id(0x01), node_with_id(0x02)]);
        heap.push_all(vec![node_with_id(0x01)]); // duplicate
        assert_eq!(heap.len(), 3);
        let closest = heap.closest(1);
        assert_eq!(closest[0].id, NodeId::from_bytes([0x01; 20]));
    }

    #[test]
    fn heap_respects_capacity() {
        let target = NodeId::from_bytes([0u8; 20]);
        let mut heap = NodeHeap::new(target, 2);
        heap.push_all(vec![node_with_id(0x01), node_with_id(0x02), node_with_id(0x03)]);
        assert_eq!(heap.len(), 2);
    }

    #[test]
    fn plan_round_excludes_already_queried() {
        let target = NodeId::from_bytes([0u8; 20]);
        let mut heap = NodeHeap::new(target, 10);
        heap.push_all(vec![node_with_id(0x01), node_with_id(0x02)]);
        let mut state = CrawlState::default();
        state.queried.insert(NodeId::from_bytes([0x01; 20]));
        let next = plan_round(&heap, &state, 3);
        assert_eq!(next.len(), 1);
        assert_eq!(next[0].id, NodeId::from_bytes([0x02; 20]));
    }

    #[test]
    fn reconcile_value_set_unions_without_duplicates() {
        let merged = reconcile_value_set(vec![
            vec!["a".to_string(), "b".to_string()],
            vec!["b".to_string(), "c".to_string()],
        ]);
        assert_eq!(merged, vec!["a".to_string(), "b".to_string(), "c".to_string()]);
    }

    #[test]
    fn reconcile_scalar_picks_majority() {
        let winner = reconcile_scalar(vec!["x".into(), "y".into(), "x".into()]);
        assert_eq!(winner, Some("x".to_string()));
    }

    #[test]
    fn closer_of_picks_nearer_candidate() {
        let target = NodeId::from_bytes([0u8; 20]);
        let far = node_with_id(0xF0);
        let near = node_with_id(0x01);
        let picked = closer_of(&target, Some(far.clone()), near.clone());
        assert_eq!(picked.id, near.id);
        let picked = closer_of(&target, Some(near.clone()), far);
        assert_eq!(picked.id, near.id);
    }

    #[test]
    fn closer_of_with_no_existing_keeps_candidate() {
        let target = NodeId::from_bytes([0u8; 20]);
        let candidate = node_with_id(0x03);
        let picked = closer_of(&target, None, candidate.clone());
        assert_eq!(picked.id, candidate.id);
    }
}
