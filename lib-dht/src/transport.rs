//! RPC Transport (design §5, §6): an unreliable datagram transport plus the
//! outstanding-request table that turns reply datagrams back into resolved
//! futures.
//!
//! The event loop is single-threaded and cooperative: one task owns the
//! socket and the outstanding table, so there is no `Arc<Mutex<_>>` around
//! shared mutable state — callers park a [`tokio::sync::oneshot`] resolver
//! keyed by message id and the recv loop completes it when (or if) a
//! matching reply arrives.

use anyhow::{Context, Result};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::net::UdpSocket;
use tokio::sync::oneshot;

/// Maximum single datagram size. Large `store`/`append` payloads that would
/// exceed this are rejected at the protocol layer rather than fragmented —
/// fragmentation is an explicit Non-goal.
pub const MAX_DATAGRAM_BYTES: usize = 8192;

/// Monotonically increasing message id, unique for the lifetime of one
/// transport instance. Not a security boundary — it only needs to be unique
/// long enough that a stale reply doesn't get matched to the wrong waiter.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub struct MessageId(u64);

pub struct MessageIdGenerator {
    next: AtomicU64,
}

impl MessageId {
    pub fn as_u64(&self) -> u64 {
        self.0
    }

    pub fn from_u64(id: u64) -> MessageId {
        MessageId(id)
    }
}

impl MessageIdGenerator {
    pub fn new() -> Self {
        MessageIdGenerator { next: AtomicU64::new(1) }
    }

    pub fn next(&self) -> MessageId {
        MessageId(self.next.fetch_add(1, Ordering::Relaxed))
    }
}

impl Default for MessageIdGenerator {
    fn default() -> Self {
        MessageIdGenerator::new()
    }
}

/// A raw wire datagram: the message id the reply must echo back, the
/// destination, and the serialized payload.
pub struct Outbound {
    pub id: MessageId,
    pub dest: SocketAddr,
    pub payload: Vec<u8>,
}

/// The UDP socket plus the outstanding-request table. Owned by a single
/// task; `recv_loop` drives it and `send_request` is called from crawl/RPC
/// code running on that same task.
pub struct Transport {
    socket: UdpSocket,
    ids: MessageIdGenerator,
    outstanding: HashMap<MessageId, oneshot::Sender<Vec<u8>>>,
}

impl Transport {
    pub async fn bind(addr: SocketAddr) -> Result<Self> {
        let socket = UdpSocket::bind(addr).await.context("binding DHT UDP socket")?;
        Ok(Transport { socket, ids: MessageIdGenerator::new(), outstanding: HashMap::new() })
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.socket.local_addr()?)
    }

    pub fn next_id(&self) -> MessageId {
        self.ids.next()
    }

    /// Send `payload` to `dest` and register a resolver for its reply. The
    /// caller is responsible for racing the returned receiver against a
    /// timeout (design: a reply that never comes resolves the RPC to
    /// `(false, null)`, never blocks the caller forever).
    pub async fn send_request(
        &mut self,
        id: MessageId,
        dest: SocketAddr,
        payload: &[u8],
    ) -> Result<oneshot::Receiver<Vec<u8>>> {
        anyhow::ensure!(payload.len() <= MAX_DATAGRAM_BYTES, "payload exceeds datagram limit");
        let (tx, rx) = oneshot::channel();
        self.outstanding.insert(id, tx);
        self.socket.send_to(payload, dest).await.context("sending DHT datagram")?;
        Ok(rx)
    }

    /// Send a reply or fire-and-forget message with no outstanding entry
    /// expected (NACKs, responses to an inbound request).
    pub async fn send_raw(&self, dest: SocketAddr, payload: &[u8]) -> Result<()> {
        anyhow::ensure!(payload.len() <= MAX_DATAGRAM_BYTES, "payload exceeds datagram limit");
        self.socket.send_to(payload, dest).await.context("sending DHT datagram")?;
        Ok(())
    }

    /// Block for the next inbound datagram. Returns the sender address and
    /// raw bytes; the caller (protocol layer) decides whether it is a reply
    /// matching an outstanding id or a fresh inbound request.
    pub async fn recv(&mut self) -> Result<(SocketAddr, Vec<u8>)> {
        let mut buf = vec![0u8; MAX_DATAGRAM_BYTES];
        let (len, from) = self.socket.recv_from(&mut buf).await.context("receiving DHT datagram")?;
        buf.truncate(len);
        Ok((from, buf))
    }

    /// Resolve an outstanding request's waiter, if one is parked under `id`.
    /// Silently drops the reply if the id is unknown (duplicate, or the
    /// waiter already timed out and was reaped).
    pub fn resolve(&mut self, id: MessageId, payload: Vec<u8>) {
        if let Some(tx) = self.outstanding.remove(&id) {
            let _ = tx.send(payload);
        }
    }

    /// Drop an outstanding entry without resolving it, e.g. after its
    /// timeout has already fired on the caller side.
    pub fn forget(&mut self, id: MessageId) {
        self.outstanding.remove(&id);
    }

    pub fn outstanding_count(&self) -> usize {
        self.outstanding.len()
    }
}

/// Wrap a oneshot receiver in the RPC timeout defined by [`crate::config::DhtConfig`].
/// Resolves to `None` on timeout or if the sender was dropped without a reply.
pub async fn await_reply(rx: oneshot::Receiver<Vec<u8>>, timeout: Duration) -> Option<Vec<u8>> {
    tokio::time::timeout(timeout, rx).await.ok().and_then(|r| r.ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn loopback_any_port() -> SocketAddr {
        "127.0.0.1:0".parse().unwrap()
    }

    #[tokio::test]
    async fn bind_and_loopback_roundtrip() {
        let mut a = Transport::bind(loopback_any_port()).await.unwrap();
        let mut b = Transport::bind(loopback_any_port()).await.unwrap();

        let b_addr = b.local_addr().unwrap();
        let id = a.next_id();
        let rx = a.send_request(id, b_addr, b"ping").await.unwrap();

        let (from, payload) = b.recv().await.unwrap();
        assert_eq!(payload, b"ping");
        b.send_raw(from, b"pong").await.unwrap();

        let (_, reply) = a.recv().await.unwrap();
        a.resolve(id, reply);
        let got = await_reply(rx, Duration::from_millis(200)).await;
        assert_eq!(got, Some(b"pong".to_vec()));
    }

    #[tokio::test]
    async fn unresolved_request_times_out() {
        let mut a = Transport::bind(loopback_any_port()).await.unwrap();
        let id = a.next_id();
        let dest = a.local_addr().unwrap();
        let rx = a.send_request(id, dest, b"ping").await.unwrap();
        let got = await_reply(rx, Duration::from_millis(20)).await;
        assert_eq!(got, None);
    }
}
