//! Maintenance (design §4.6, §2 component 10 "Maintenance"): the two
//! background duties that keep replicas warm without a full anti-entropy
//! pass — key handoff when a new neighbor is discovered, and periodic
//! republish of locally-owned keys so replicas that missed a crawl
//! eventually catch up.
//!
//! Both are deliberately throttled (see design §9's "at most one key per
//! event" reading of the source's `transferKeyValues`): a single new-neighbor
//! event hands off at most one key, and a republish tick only resends keys
//! older than the configured interval, never the whole store at once.

use crate::node::{Node, NodeId};

/// `transferKeyValues`'s per-key eligibility check (design §4.6 step 2): `n`
/// is worth pushing `key` to iff it is closer to `key`'s digest than the
/// current farthest neighbor we know of, *and* we ourselves are closer than
/// the current closest neighbor (i.e. we are an authoritative replica and the
/// new node would also become one).
///
/// `neighbors` must already be sorted nearest-first, as returned by
/// [`crate::routing::RoutingTable::find_neighbors`].
pub fn should_hand_off(new_node: &Node, local_id: &NodeId, key_target: &NodeId, neighbors: &[Node]) -> bool {
    let (Some(closest), Some(farthest)) = (neighbors.first(), neighbors.last()) else {
        // No known neighbors for this key yet: we are the sole replica, so
        // any new node is worth bringing in as a second one.
        return true;
    };
    let new_node_closer_than_farthest = new_node.id.distance(key_target) < farthest.id.distance(key_target);
    let local_closer_than_closest = local_id.distance(key_target) < closest.id.distance(key_target);
    new_node_closer_than_farthest && local_closer_than_closest
}

/// Picks the first local key (in the iteration order handed in) eligible for
/// handoff to `new_node`, pairing it with whether it should be pushed via the
/// set-union path (`append`) or the scalar path (`store`). Returns `None` if
/// no key is eligible — a new-neighbor event that finds nothing to hand off
/// does no RPC work at all.
pub fn pick_handoff_key<'a>(
    new_node: &Node,
    local_id: &NodeId,
    candidates: impl IntoIterator<Item = (&'a str, &'a [Node])>,
) -> Option<&'a str> {
    for (key, neighbors) in candidates {
        let target = crate::server::key_to_node_id(key);
        if should_hand_off(new_node, local_id, &target, neighbors) {
            return Some(key);
        }
    }
    None
}
