//! Signed-RPC Protocol (design §4.2, §6): the six DHT verbs, the
//! challenge/signature envelope every request and response carries, and the
//! NACK-based "introduce yourself" rescue flow for a peer whose certificate
//! hasn't been seen yet.
//!
//! Wire format: one `bincode`-encoded [`WireMessage`] per datagram. A request
//! is signed over `idHex(receiver) || challenge` (uppercase 40-char hex id,
//! concatenated with the challenge's lowercase hex encoding); a response is
//! signed over the challenge alone, proving the responder holds the private
//! key for the certificate it claims without a second round trip.

use crate::error::DhtError;
use crate::identity::{Certificate, IdentityAdapter};
use crate::node::NodeId;
use crate::transport::MessageId;
use lib_crypto::types::Signature;
use rand::RngCore;
use serde::{Deserialize, Serialize};

/// 8 random bytes, rendered as 16 lowercase hex characters in the signed
/// payload.
#[derive(Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Debug)]
pub struct Challenge([u8; 8]);

impl Challenge {
    pub fn random() -> Self {
        let mut bytes = [0u8; 8];
        rand::thread_rng().fill_bytes(&mut bytes);
        Challenge(bytes)
    }

    pub fn to_hex_lower(&self) -> String {
        hex::encode(self.0)
    }
}

/// Build the exact byte sequence a request's signature covers:
/// `idHex(receiver) || challengeHexLower`.
pub fn request_signing_payload(receiver: &NodeId, challenge: &Challenge) -> Vec<u8> {
    let mut payload = receiver.to_hex_upper().into_bytes();
    payload.extend_from_slice(challenge.to_hex_lower().as_bytes());
    payload
}

/// A response is signed over the challenge alone.
pub fn response_signing_payload(challenge: &Challenge) -> Vec<u8> {
    challenge.to_hex_lower().into_bytes()
}

#[derive(Clone, Serialize, Deserialize, Debug)]
pub enum Verb {
    Ping,
    FindNode { target: NodeId },
    FindValue { key: String },
    Store { key: String, value: String },
    /// `json_list` is the raw JSON-array encoding of the elements to union in
    /// (design §4.3: "parse the incoming payload as a JSON array; fail the
    /// RPC if parsing fails" — parsing happens at the receiver, not here, so
    /// a malformed list still reaches the handler and can be reported back
    /// as [`ResponsePayload::Error`] rather than silently dropped).
    Append { key: String, json_list: String },
    /// Set-difference counterpart of `Append`, same wire shape.
    Remove { key: String, json_list: String },
}

#[derive(Clone, Serialize, Deserialize, Debug)]
pub enum ResponsePayload {
    Pong,
    Nodes(Vec<crate::node::Node>),
    /// A direct hit on `find_value`: the scalar value, or the union of a
    /// CRDT set's live elements if the key is set-typed.
    Value(String),
    ValueSet(Vec<String>),
    /// `find_value` miss: the `k` nodes closest to the key, same shape as
    /// `FindNode`'s response.
    NotFound(Vec<crate::node::Node>),
    Stored,
    Ok,
    /// `append`/`remove` received a payload that didn't parse as a JSON
    /// array (design §4.9's failure table: "JSON parse failure on
    /// append/remove -> return error to originator; no storage change").
    Error(String),
}

#[derive(Clone, Serialize, Deserialize, Debug)]
pub struct RequestEnvelope {
    pub id: u64,
    pub sender_id: NodeId,
    /// Included on the first attempt to a peer that might not have it yet,
    /// and always on the retry that follows a NACK.
    pub sender_cert_der: Option<Vec<u8>>,
    pub challenge: Challenge,
    pub verb: Verb,
    pub signature: Signature,
}

#[derive(Clone, Serialize, Deserialize, Debug)]
pub struct ResponseEnvelope {
    pub id: u64,
    pub responder_id: NodeId,
    pub responder_cert_der: Option<Vec<u8>>,
    pub payload: ResponsePayload,
    pub signature: Signature,
}

#[derive(Clone, Serialize, Deserialize, Debug)]
pub enum NackReason {
    /// The responder has no certificate on file for the sender and cannot
    /// verify the request's signature. The sender should retry once with
    /// `sender_cert_der` populated.
    UnknownCertificate,
    /// The request signature did not verify against a known certificate.
    BadSignature,
    /// The verb/payload could not be decoded.
    Malformed,
}

#[derive(Clone, Serialize, Deserialize, Debug)]
pub struct NackEnvelope {
    pub id: u64,
    pub reason: NackReason,
}

#[derive(Clone, Serialize, Deserialize, Debug)]
pub enum WireMessage {
    Request(RequestEnvelope),
    Response(ResponseEnvelope),
    Nack(NackEnvelope),
}

impl WireMessage {
    pub fn encode(&self) -> anyhow::Result<Vec<u8>> {
        Ok(bincode::serialize(self)?)
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, DhtError> {
        bincode::deserialize(bytes).map_err(|e| DhtError::Policy(format!("malformed message: {e}")))
    }
}

/// Build a signed request for `verb` addressed to `receiver`, including the
/// local certificate only when `include_cert` is set (first contact, or a
/// NACK-driven retry).
pub fn build_request(
    identity: &IdentityAdapter,
    id: MessageId,
    receiver: &NodeId,
    verb: Verb,
    include_cert: bool,
) -> anyhow::Result<RequestEnvelope> {
    let challenge = Challenge::random();
    let payload = request_signing_payload(receiver, &challenge);
    let signature = identity.sign(&payload)?;
    Ok(RequestEnvelope {
        id: id_as_u64(id),
        sender_id: identity.node_id(),
        sender_cert_der: include_cert.then(|| identity.own_cert().der.clone()),
        challenge,
        verb,
        signature,
    })
}

/// Build a signed response. The response is signed over the same challenge
/// the request carried, never over a fresh one.
pub fn build_response(
    identity: &IdentityAdapter,
    id: MessageId,
    challenge: &Challenge,
    payload: ResponsePayload,
    include_cert: bool,
) -> anyhow::Result<ResponseEnvelope> {
    let signature = identity.sign(&response_signing_payload(challenge))?;
    Ok(ResponseEnvelope {
        id: id_as_u64(id),
        responder_id: identity.node_id(),
        responder_cert_der: include_cert.then(|| identity.own_cert().der.clone()),
        payload,
        signature,
    })
}

fn id_as_u64(id: MessageId) -> u64 {
    id.as_u64()
}

/// Verify an inbound request's signature against `sender_cert`, checking
/// both the signature itself and that the cert's derived id matches the
/// claimed `sender_id`.
pub fn verify_request(
    req: &RequestEnvelope,
    receiver: &NodeId,
    sender_cert: &Certificate,
) -> Result<(), DhtError> {
    if IdentityAdapter::id_from_cert(sender_cert) != req.sender_id {
        return Err(DhtError::Auth("certificate id does not match claimed sender".into()));
    }
    let payload = request_signing_payload(receiver, &req.challenge);
    let ok = IdentityAdapter::verify(sender_cert, &req.signature, &payload)?;
    if ok {
        Ok(())
    } else {
        Err(DhtError::Auth("request signature verification failed".into()))
    }
}

pub fn verify_response(
    resp: &ResponseEnvelope,
    challenge: &Challenge,
    responder_cert: &Certificate,
) -> Result<(), DhtError> {
    if IdentityAdapter::id_from_cert(responder_cert) != resp.responder_id {
        return Err(DhtError::Auth("certificate id does not match claimed responder".into()));
    }
    let payload = response_signing_payload(challenge);
    let ok = IdentityAdapter::verify(responder_cert, &resp.signature, &payload)?;
    if ok {
        Ok(())
    } else {
        Err(DhtError::Auth("response signature verification failed".into()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_round_trip_verifies() {
        let sender = IdentityAdapter::generate().unwrap();
        let receiver_id = NodeId::from_bytes([0x42; 20]);
        let req = build_request(&sender, test_message_id(), &receiver_id, Verb::Ping, true).unwrap();
        verify_request(&req, &receiver_id, sender.own_cert()).unwrap();
    }

    #[test]
    fn response_round_trip_verifies() {
        let responder = IdentityAdapter::generate().unwrap();
        let challenge = Challenge::random();
        let resp = build_response(&responder, test_message_id(), &challenge, ResponsePayload::Pong, true).unwrap();
        verify_response(&resp, &challenge, responder.own_cert()).unwrap();
    }

    #[test]
    fn request_signed_for_one_receiver_fails_for_another() {
        let sender = IdentityAdapter::generate().unwrap();
        let receiver_a = NodeId::from_bytes([0x01; 20]);
        let receiver_b = NodeId::from_bytes([0x02; 20]);
        let req = build_request(&sender, test_message_id(), &receiver_a, Verb::Ping, true).unwrap();
        assert!(verify_request(&req, &receiver_b, sender.own_cert()).is_err());
    }

    #[test]
    fn encode_decode_round_trips_through_wire_format() {
        let sender = IdentityAdapter::generate().unwrap();
        let receiver_id = NodeId::from_bytes([0x42; 20]);
        let req = build_request(&sender, test_message_id(), &receiver_id, Verb::Ping, false).unwrap();
        let wire = WireMessage::Request(req);
        let bytes = wire.encode().unwrap();
        let decoded = WireMessage::decode(&bytes).unwrap();
        match decoded {
            WireMessage::Request(r) => assert_eq!(r.sender_id, sender.node_id()),
            _ => panic!("expected Request variant"),
        }
    }

    fn test_message_id() -> MessageId {
        crate::transport::MessageIdGenerator::new().next()
    }
}
