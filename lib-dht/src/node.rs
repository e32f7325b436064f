//! 160-bit node identifiers and the XOR distance metric.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Number of bits in a [`NodeId`]. Matches the 160-bit space the certificate's
/// embedded UUID is mapped into (a 128-bit UUID zero-padded at the high end).
pub const ID_BITS: usize = 160;
/// Number of bytes backing a [`NodeId`].
pub const ID_BYTES: usize = ID_BITS / 8;

/// 160-bit identifier, derived deterministically from a node's certificate.
///
/// See [`crate::identity::id_from_cert`] for the derivation rule: the low 16
/// bytes are the raw bytes of the UUID found in the certificate's
/// `dnQualifier`; the top 4 bytes are zero.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct NodeId([u8; ID_BYTES]);

impl NodeId {
    pub const ZERO: NodeId = NodeId([0u8; ID_BYTES]);

    pub fn from_bytes(bytes: [u8; ID_BYTES]) -> Self {
        NodeId(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; ID_BYTES] {
        &self.0
    }

    /// Canonical uppercase hex representation used in signature payloads and
    /// cert-key derivation (`idHex`).
    pub fn to_hex_upper(&self) -> String {
        hex::encode_upper(self.0)
    }

    pub fn from_hex(hex_str: &str) -> anyhow::Result<Self> {
        let bytes = hex::decode(hex_str)?;
        if bytes.len() != ID_BYTES {
            anyhow::bail!("NodeId hex must decode to {} bytes, got {}", ID_BYTES, bytes.len());
        }
        let mut arr = [0u8; ID_BYTES];
        arr.copy_from_slice(&bytes);
        Ok(NodeId(arr))
    }

    /// `a XOR b`, the Kademlia distance metric between two ids.
    pub fn distance(&self, other: &NodeId) -> Distance {
        let mut out = [0u8; ID_BYTES];
        for i in 0..ID_BYTES {
            out[i] = self.0[i] ^ other.0[i];
        }
        Distance(out)
    }

    /// Index (0 = most significant) of the highest bit at which `self` and
    /// `other` differ. Used to pick a bucket index in the routing trie.
    pub fn bucket_index(&self, other: &NodeId) -> usize {
        let d = self.distance(other);
        for (byte_idx, byte) in d.0.iter().enumerate() {
            if *byte != 0 {
                let bit_in_byte = byte.leading_zeros() as usize;
                return byte_idx * 8 + bit_in_byte;
            }
        }
        ID_BITS - 1
    }
}

impl fmt::Debug for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "NodeId({})", self.to_hex_upper())
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hex_upper())
    }
}

/// XOR distance between two [`NodeId`]s. Ordered lexicographically by byte,
/// which is the correct total order for an XOR metric.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct Distance([u8; ID_BYTES]);

impl Distance {
    pub fn is_zero(&self) -> bool {
        self.0.iter().all(|b| *b == 0)
    }
}

impl fmt::Debug for Distance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Distance({})", hex::encode(self.0))
    }
}

/// A peer's routable address and identity. Two nodes are equal iff their ids
/// match, regardless of address (an address change does not mint a new node).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Node {
    pub id: NodeId,
    pub ip: String,
    pub port: u16,
}

impl Node {
    pub fn new(id: NodeId, ip: impl Into<String>, port: u16) -> Self {
        Node { id, ip: ip.into(), port }
    }

    pub fn socket_addr(&self) -> anyhow::Result<std::net::SocketAddr> {
        Ok(format!("{}:{}", self.ip, self.port).parse()?)
    }
}

impl PartialEq for Node {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}
impl Eq for Node {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn distance_to_self_is_zero() {
        let id = NodeId::from_bytes([0x42u8; ID_BYTES]);
        assert!(id.distance(&id).is_zero());
    }

    #[test]
    fn xor_distance_is_symmetric() {
        let a = NodeId::from_bytes([0x01u8; ID_BYTES]);
        let b = NodeId::from_bytes([0xFFu8; ID_BYTES]);
        assert_eq!(a.distance(&b).0, b.distance(&a).0);
    }

    #[test]
    fn bucket_index_for_equal_ids_is_last() {
        let id = NodeId::from_bytes([0xAAu8; ID_BYTES]);
        assert_eq!(id.bucket_index(&id), ID_BITS - 1);
    }

    #[test]
    fn bucket_index_detects_msb_difference() {
        let mut a_bytes = [0u8; ID_BYTES];
        let mut b_bytes = [0u8; ID_BYTES];
        a_bytes[0] = 0b1000_0000;
        b_bytes[0] = 0b0000_0000;
        let a = NodeId::from_bytes(a_bytes);
        let b = NodeId::from_bytes(b_bytes);
        assert_eq!(a.bucket_index(&b), 0);
    }

    #[test]
    fn hex_round_trip_is_uppercase() {
        let id = NodeId::from_bytes([0xAB; ID_BYTES]);
        let hex_str = id.to_hex_upper();
        assert_eq!(hex_str, hex_str.to_uppercase());
        assert_eq!(NodeId::from_hex(&hex_str).unwrap(), id);
    }

    #[test]
    fn nodes_equal_iff_id_matches() {
        let id = NodeId::from_bytes([0x01; ID_BYTES]);
        let a = Node::new(id, "10.0.0.1", 9000);
        let b = Node::new(id, "10.0.0.2", 9001);
        assert_eq!(a, b);
    }
}
