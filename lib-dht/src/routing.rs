//! Routing Table (design §4.3): a binary trie of k-buckets keyed by XOR
//! distance from the local node.

use crate::node::{Node, NodeId, ID_BITS};
use std::collections::VecDeque;

/// A single k-bucket: at most `k` contacts, ordered least- to
/// most-recently-seen (front = stalest, back = freshest).
#[derive(Clone, Debug, Default)]
pub struct Bucket {
    contacts: VecDeque<Node>,
    capacity: usize,
}

/// Outcome of attempting to insert a contact, used by the caller to decide
/// whether a liveness ping of the bucket's stalest entry is warranted.
#[derive(Debug, PartialEq, Eq)]
pub enum InsertOutcome {
    /// Contact was new and the bucket had room; inserted.
    Inserted,
    /// Contact already existed; moved to the fresh end.
    Refreshed,
    /// Bucket is full of other contacts; caller should ping `stalest` and
    /// evict it if it doesn't answer before retrying the insert.
    Full { stalest: Node },
}

impl Bucket {
    pub fn new(capacity: usize) -> Self {
        Bucket { contacts: VecDeque::new(), capacity }
    }

    pub fn len(&self) -> usize {
        self.contacts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.contacts.is_empty()
    }

    pub fn contains(&self, id: &NodeId) -> bool {
        self.contacts.iter().any(|n| &n.id == id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Node> {
        self.contacts.iter()
    }

    pub fn insert(&mut self, node: Node) -> InsertOutcome {
        if let Some(pos) = self.contacts.iter().position(|n| n.id == node.id) {
            self.contacts.remove(pos);
            self.contacts.push_back(node);
            return InsertOutcome::Refreshed;
        }
        if self.contacts.len() < self.capacity {
            self.contacts.push_back(node);
            return InsertOutcome::Inserted;
        }
        InsertOutcome::Full { stalest: self.contacts.front().cloned().unwrap() }
    }

    /// Remove a contact that failed a liveness ping, freeing a slot.
    pub fn remove(&mut self, id: &NodeId) -> bool {
        if let Some(pos) = self.contacts.iter().position(|n| &n.id == id) {
            self.contacts.remove(pos);
            true
        } else {
            false
        }
    }
}

/// Binary-trie routing table: one bucket per distinct bucket index (0..160).
/// Sparse: only indices that have ever held a contact allocate a bucket.
pub struct RoutingTable {
    local_id: NodeId,
    bucket_capacity: usize,
    buckets: Vec<Option<Bucket>>,
}

impl RoutingTable {
    pub fn new(local_id: NodeId, bucket_capacity: usize) -> Self {
        let mut buckets = Vec::with_capacity(ID_BITS);
        buckets.resize_with(ID_BITS, || None);
        RoutingTable { local_id, bucket_capacity, buckets }
    }

    fn bucket_index_for(&self, id: &NodeId) -> usize {
        self.local_id.bucket_index(id)
    }

    /// `addContact`: insert or refresh. Ignores attempts to add the local
    /// node to its own table.
    pub fn add_contact(&mut self, node: Node) -> Option<InsertOutcome> {
        if node.id == self.local_id {
            return None;
        }
        let idx = self.bucket_index_for(&node.id);
        let bucket = self.buckets[idx].get_or_insert_with(|| Bucket::new(self.bucket_capacity));
        Some(bucket.insert(node))
    }

    /// `removeContact`: drop a contact that failed a liveness check.
    pub fn remove_contact(&mut self, id: &NodeId) -> bool {
        let idx = self.bucket_index_for(id);
        match &mut self.buckets[idx] {
            Some(bucket) => bucket.remove(id),
            None => false,
        }
    }

    /// `isNewNode`: true if `id` is not currently tracked in any bucket.
    pub fn is_new_node(&self, id: &NodeId) -> bool {
        let idx = self.bucket_index_for(id);
        match &self.buckets[idx] {
            Some(bucket) => !bucket.contains(id),
            None => true,
        }
    }

    /// `findNeighbors`: the `count` contacts closest to `target`, searching
    /// outward from `target`'s own bucket index first (classical Kademlia
    /// neighbor search), excluding `exclude` if given.
    pub fn find_neighbors(&self, target: &NodeId, count: usize, exclude: Option<&NodeId>) -> Vec<Node> {
        let mut candidates: Vec<Node> = Vec::new();
        let start = self.bucket_index_for(target);

        let mut visited = vec![false; ID_BITS];
        let mut visit = |idx: usize, visited: &mut Vec<bool>, candidates: &mut Vec<Node>| {
            if idx >= ID_BITS || visited[idx] {
                return;
            }
            visited[idx] = true;
            if let Some(bucket) = &self.buckets[idx] {
                for node in bucket.iter() {
                    if Some(&node.id) != exclude {
                        candidates.push(node.clone());
                    }
                }
            }
        };

        visit(start, &mut visited, &mut candidates);
        for offset in 1..ID_BITS {
            if candidates.len() >= count && offset > 1 {
                break;
            }
            if let Some(lower) = start.checked_sub(offset) {
                visit(lower, &mut visited, &mut candidates);
            }
            let upper = start + offset;
            visit(upper, &mut visited, &mut candidates);
        }

        candidates.sort_by_key(|n| n.id.distance(target));
        candidates.truncate(count);
        candidates
    }

    pub fn all_contacts(&self) -> Vec<Node> {
        self.buckets
            .iter()
            .flatten()
            .flat_map(|b| b.iter().cloned())
            .collect()
    }

    pub fn contact_count(&self) -> usize {
        self.buckets.iter().flatten().map(|b| b.len()).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn node_with_id(byte: u8, port: u16) -> Node {
        Node::new(NodeId::from_bytes([byte; 20]), "127.0.0.1", port)
    }

    #[test]
    fn add_contact_refreshes_existing() {
        let local = NodeId::from_bytes([0u8; 20]);
        let mut table = RoutingTable::new(local, 20);
        let node = node_with_id(0x01, 9000);
        assert_eq!(table.add_contact(node.clone()), Some(InsertOutcome::Inserted));
        assert_eq!(table.add_contact(node), Some(InsertOutcome::Refreshed));
        assert_eq!(table.contact_count(), 1);
    }

    #[test]
    fn add_contact_ignores_self() {
        let local = NodeId::from_bytes([0u8; 20]);
        let mut table = RoutingTable::new(local, 20);
        assert_eq!(table.add_contact(Node::new(local, "127.0.0.1", 9000)), None);
        assert_eq!(table.contact_count(), 0);
    }

    #[test]
    fn bucket_reports_full_with_stalest_contact() {
        let local = NodeId::from_bytes([0u8; 20]);
        let mut table = RoutingTable::new(local, 2);
        let a = node_with_id(0x80, 9000);
        let b = node_with_id(0x81, 9001);
        let c = node_with_id(0x82, 9002);
        table.add_contact(a.clone());
        table.add_contact(b);
        let outcome = table.add_contact(c);
        assert_eq!(outcome, Some(InsertOutcome::Full { stalest: a }));
    }

    #[test]
    fn remove_contact_frees_slot() {
        let local = NodeId::from_bytes([0u8; 20]);
        let mut table = RoutingTable::new(local, 20);
        let node = node_with_id(0x10, 9000);
        table.add_contact(node.clone());
        assert!(table.remove_contact(&node.id));
        assert!(table.is_new_node(&node.id));
    }

    #[test]
    fn find_neighbors_orders_by_distance() {
        let local = NodeId::from_bytes([0u8; 20]);
        let mut table = RoutingTable::new(local, 20);
        for byte in [0x01, 0x02, 0x04, 0x08, 0x10] {
            table.add_contact(node_with_id(byte, 9000 + byte as u16));
        }
        let target = NodeId::from_bytes([0x01; 20]);
        let neighbors = table.find_neighbors(&target, 3, None);
        assert_eq!(neighbors.len(), 3);
        assert_eq!(neighbors[0].id, NodeId::from_bytes([0x01; 20]));
    }

    #[test]
    fn is_new_node_true_for_unknown_id() {
        let local = NodeId::from_bytes([0u8; 20]);
        let table = RoutingTable::new(local, 20);
        assert!(table.is_new_node(&NodeId::from_bytes([0xFF; 20])));
    }
}
