//! Server Facade (design §4.9): the public operations a caller drives —
//! `bootstrap`, `set`, `get`, `append`, `remove`, `get_concat` — plus the
//! single cooperative event loop that backs all of them.
//!
//! There is exactly one task in flight on the transport at any time. A
//! lookup issues its α requests, then drives a combined
//! `select!` between `transport.recv()` (dispatching inbound requests and
//! resolving outstanding replies) and the crawl's own oneshot receivers via
//! `futures::future::join_all`, rather than spawning a task per RPC.

use crate::cert_store::{cert_storage_key, CertificateCache};
use crate::config::DhtConfig;
use crate::crawler::{reconcile_scalar, reconcile_value_set, CrawlState, NodeHeap};
use crate::identity::{Certificate, IdentityAdapter, TrustStore};
use crate::maintenance;
use crate::node::{Node, NodeId};
use crate::protocol::{
    build_request, build_response, verify_request, verify_response, Challenge, NackEnvelope,
    NackReason, RequestEnvelope, ResponseEnvelope, ResponsePayload, Verb, WireMessage,
};
use crate::storage::{ForgetfulStorage, SetStore};
use crate::transport::{await_reply, MessageId, Transport};
use anyhow::Result;
use futures::future::join_all;
use std::collections::{HashMap, HashSet};
use std::net::SocketAddr;
use tracing::{debug, info, warn};

pub struct DhtServer {
    config: DhtConfig,
    identity: IdentityAdapter,
    transport: Transport,
    routing: crate::routing::RoutingTable,
    storage: ForgetfulStorage,
    sets: SetStore,
    certs: CertificateCache,
    trust: TrustStore,
    /// Bounded guard against fetching the same unknown node's certificate
    /// more than once concurrently (design §10 supplemented feature).
    cert_fetch_in_flight: HashSet<NodeId>,
    /// Challenge issued with each still-outstanding request, needed to
    /// verify the matching response's signature when it arrives.
    pending_challenges: HashMap<MessageId, (NodeId, Challenge)>,
}

impl DhtServer {
    pub async fn bind(config: DhtConfig, addr: SocketAddr) -> Result<Self> {
        let identity = IdentityAdapter::generate()?;
        let transport = Transport::bind(addr).await?;
        let routing = crate::routing::RoutingTable::new(identity.node_id(), config.k);
        let storage = ForgetfulStorage::new(config.storage_capacity, config.storage_ttl);
        let mut trust = TrustStore::new();
        trust.trust(identity.own_cert());
        let mut certs = CertificateCache::new();
        certs.insert(identity.own_cert().clone());

        Ok(DhtServer {
            config,
            identity,
            transport,
            routing,
            storage,
            sets: SetStore::new(),
            certs,
            trust,
            cert_fetch_in_flight: HashSet::new(),
            pending_challenges: HashMap::new(),
        })
    }

    pub fn node_id(&self) -> NodeId {
        self.identity.node_id()
    }

    /// Our own id and currently-bound address, suitable for handing to
    /// another node as a bootstrap seed.
    pub fn local_node(&self) -> Result<Node> {
        let addr = self.transport.local_addr()?;
        Ok(Node::new(self.identity.node_id(), addr.ip().to_string(), addr.port()))
    }

    pub fn own_certificate(&self) -> &Certificate {
        self.identity.own_cert()
    }

    /// Privileged trust-on-first-use path for bootstrap seeds: a fresh node
    /// has no one in its truststore yet, so the seeds it was handed out of
    /// band are trusted unconditionally (design §4.3's bootstrap exception).
    pub fn trust_bootstrap_seed(&mut self, cert: Certificate) {
        self.trust.trust(&cert);
        self.certs.insert(cert);
    }

    /// `bootstrap` (design §4.7): seed the routing table from a known set of
    /// nodes, then run a `find_node` crawl for our own id to populate nearby
    /// buckets. The first RPC this crawl sends to each seed already carries
    /// our certificate (`issue_request` always attaches it to a first
    /// contact), so the privileged first-seed introduction §4.7 describes is
    /// implicit rather than a distinct step; seeds are expected to already be
    /// trusted via [`Self::trust_bootstrap_seed`] before this is called.
    pub async fn bootstrap(&mut self, seeds: Vec<Node>) -> Result<()> {
        for seed in &seeds {
            self.routing.add_contact(seed.clone());
        }
        let own_id = self.identity.node_id();
        self.find_node_crawl(own_id).await?;
        Ok(())
    }

    /// `set`: store `value` locally and replicate to the `k` nodes closest
    /// to `key`'s hash.
    pub async fn set(&mut self, key: &str, value: &str) -> Result<()> {
        self.storage.set(key.to_string(), value.to_string());
        let target = key_to_node_id(key);
        let closest = self.find_node_crawl(target).await?;
        for node in closest {
            let _ = self.send_store(&node, key, value).await;
        }
        Ok(())
    }

    /// `get`: local hit, else a `find_value` crawl.
    pub async fn get(&mut self, key: &str) -> Result<Option<String>> {
        if let Some(v) = self.storage.get(key) {
            return Ok(Some(v));
        }
        let target = key_to_node_id(key);
        let outcome = self.find_value_crawl(target, key).await?;
        Ok(outcome)
    }

    /// `append(key, jsonArray)`: union a whole JSON-array of elements into
    /// the local set, then replicate the same union to the `k` closest nodes
    /// (design §4.3's append semantics, applied identically whether the call
    /// originates locally or arrives over the wire).
    pub async fn append(&mut self, key: &str, elements: &[String]) -> Result<()> {
        self.sets.append_many(key, elements);
        let target = key_to_node_id(key);
        let closest = self.find_node_crawl(target).await?;
        for node in closest {
            let _ = self.send_append(&node, key, elements).await;
        }
        Ok(())
    }

    /// `remove(key, jsonArray)`: set-difference locally, replicated like `set`.
    pub async fn remove(&mut self, key: &str, elements: &[String]) -> Result<()> {
        self.sets.remove_many(key, elements);
        let target = key_to_node_id(key);
        let closest = self.find_node_crawl(target).await?;
        for node in closest {
            let _ = self.send_remove(&node, key, elements).await;
        }
        Ok(())
    }

    /// `get_concat`: the reconciled union of a set-typed key's live elements
    /// across the network, falling back to the local replica if the crawl
    /// finds nothing.
    pub async fn get_concat(&mut self, key: &str) -> Result<Vec<String>> {
        let target = key_to_node_id(key);
        let mut replicas = vec![self.sets.get_concat(key)];
        if let Some(remote) = self.find_value_set_crawl(target, key).await? {
            replicas.push(remote);
        }
        Ok(reconcile_value_set(replicas))
    }

    /// `certificateExists`: true if the certificate for `id` is already
    /// cached locally, without touching the network.
    pub fn certificate_exists(&self, id: &NodeId) -> bool {
        self.certs.certificate_exists(id)
    }

    /// `storeOwnCert`: publish our own certificate at `digest(idHex||"cert")`
    /// so peers that only know our id can discover it through an ordinary
    /// `find_value` crawl.
    pub async fn store_own_cert(&mut self) -> Result<()> {
        let key = cert_storage_key(&self.identity.node_id());
        let value = hex::encode(&self.identity.own_cert().der);
        self.set(&key, &value).await
    }

    pub fn get_own_cert(&self) -> &Certificate {
        self.identity.own_cert()
    }

    /// `searchForCertificate`: resolve `id`'s certificate, checking the
    /// local cache first and falling back to a `find_value` crawl under its
    /// reserved cert key. A bounded in-flight guard prevents two concurrent
    /// callers from racing the same id through separate crawls.
    pub async fn search_for_certificate(&mut self, id: NodeId) -> Result<Option<Certificate>> {
        if let Some(cert) = self.certs.get(&id) {
            return Ok(Some(cert.clone()));
        }
        if !self.cert_fetch_in_flight.insert(id) {
            return Ok(None);
        }

        let key = cert_storage_key(&id);
        let target = key_to_node_id(&key);
        let result = self.find_value_crawl(target, &key).await;
        self.cert_fetch_in_flight.remove(&id);

        let Some(hex_der) = result? else { return Ok(None) };
        let der = hex::decode(hex_der)?;
        let cert = crate::identity::parse_certificate(&der)?;
        self.certs.insert(cert.clone());
        Ok(Some(cert))
    }

    // -- crawling -----------------------------------------------------

    async fn find_node_crawl(&mut self, target: NodeId) -> Result<Vec<Node>> {
        let mut heap = NodeHeap::new(target, self.config.node_heap_capacity());
        heap.push_all(self.routing.find_neighbors(&target, self.config.k, None));
        let mut state = CrawlState::default();

        loop {
            let batch = crate::crawler::plan_round(&heap, &state, self.config.alpha);
            if batch.is_empty() {
                break;
            }
            for node in &batch {
                state.queried.insert(node.id);
            }
            let responses = self.query_find_node_batch(&batch, target).await;
            for nodes in responses.into_iter().flatten() {
                heap.push_all(nodes);
            }
        }

        Ok(heap.closest(self.config.k))
    }

    /// `find_value` crawl for a scalar key. Tracks `nearestWithoutValue`
    /// (design §4.4/§4.5, capacity 1): the closest node that answered
    /// without the value. On a successful resolution that peer is healed
    /// with a direct `store` of the resolved value — the crawl's one
    /// allowed write-back; anti-entropy covers the rest.
    async fn find_value_crawl(&mut self, target: NodeId, key: &str) -> Result<Option<String>> {
        let mut heap = NodeHeap::new(target, self.config.node_heap_capacity());
        heap.push_all(self.routing.find_neighbors(&target, self.config.k, None));
        let mut state = CrawlState::default();
        let mut hits: Vec<String> = Vec::new();
        let mut nearest_without_value: Option<Node> = None;

        loop {
            let batch = crate::crawler::plan_round(&heap, &state, self.config.alpha);
            // Terminate as soon as α replicas of the value have been seen,
            // not on the first hit alone (design §4.6's lookup-termination
            // rule) — a single early responder could be stale or malicious.
            if batch.is_empty() || hits.len() >= self.config.alpha {
                break;
            }
            for node in &batch {
                state.queried.insert(node.id);
            }
            for (node, outcome) in self.query_find_value_batch(&batch, key).await {
                match outcome {
                    Some(ResponsePayload::Value(v)) => hits.push(v),
                    Some(ResponsePayload::NotFound(nodes)) => {
                        heap.push_all(nodes);
                        nearest_without_value =
                            Some(crate::crawler::closer_of(&target, nearest_without_value.take(), node));
                    }
                    _ => {}
                }
            }
        }

        let resolved = reconcile_scalar(hits);
        if let (Some(value), Some(node)) = (&resolved, &nearest_without_value) {
            let _ = self.send_store(node, key, value).await;
        }
        Ok(resolved)
    }

    /// `find_value` crawl for a set-typed key, same `nearestWithoutValue`
    /// healing write as [`Self::find_value_crawl`] but via `append` rather
    /// than `store` since the resolved answer is the reconciled union.
    async fn find_value_set_crawl(&mut self, target: NodeId, key: &str) -> Result<Option<Vec<String>>> {
        let mut heap = NodeHeap::new(target, self.config.node_heap_capacity());
        heap.push_all(self.routing.find_neighbors(&target, self.config.k, None));
        let mut state = CrawlState::default();
        let mut hits: Vec<Vec<String>> = Vec::new();
        let mut nearest_without_value: Option<Node> = None;

        loop {
            let batch = crate::crawler::plan_round(&heap, &state, self.config.alpha);
            if batch.is_empty() || hits.len() >= self.config.alpha {
                break;
            }
            for node in &batch {
                state.queried.insert(node.id);
            }
            for (node, outcome) in self.query_find_value_batch(&batch, key).await {
                match outcome {
                    Some(ResponsePayload::ValueSet(v)) => hits.push(v),
                    Some(ResponsePayload::NotFound(nodes)) => {
                        heap.push_all(nodes);
                        nearest_without_value =
                            Some(crate::crawler::closer_of(&target, nearest_without_value.take(), node));
                    }
                    _ => {}
                }
            }
        }

        if hits.is_empty() {
            return Ok(None);
        }
        let merged = reconcile_value_set(hits);
        if let Some(node) = &nearest_without_value {
            let _ = self.send_append(node, key, &merged).await;
        }
        Ok(Some(merged))
    }

    // -- batch RPC issuing ---------------------------------------------

    async fn query_find_node_batch(&mut self, batch: &[Node], target: NodeId) -> Vec<Option<Vec<Node>>> {
        let mut pending = Vec::new();
        for node in batch {
            if let Ok(addr) = node.socket_addr() {
                if let Ok((id, rx)) = self.issue_request(addr, &node.id, Verb::FindNode { target }).await {
                    pending.push((id, rx));
                }
            }
        }
        self.drive_pending(pending)
            .await
            .into_iter()
            .map(|payload| match payload {
                Some(ResponsePayload::Nodes(nodes)) => Some(nodes),
                _ => None,
            })
            .collect()
    }

    /// Issues `find_value` to every node in `batch` and pairs each reply
    /// back up with the node that sent it — needed so the caller can track
    /// `nearestWithoutValue` (design §4.4) rather than just the bag of
    /// outcomes. A node whose address doesn't parse or whose request fails
    /// to send is dropped from the pairing entirely rather than misaligning
    /// the rest of the batch against `drive_pending`'s results.
    async fn query_find_value_batch(&mut self, batch: &[Node], key: &str) -> Vec<(Node, Option<ResponsePayload>)> {
        let mut pending = Vec::new();
        let mut asked = Vec::new();
        for node in batch {
            if let Ok(addr) = node.socket_addr() {
                if let Ok((id, rx)) = self
                    .issue_request(addr, &node.id, Verb::FindValue { key: key.to_string() })
                    .await
                {
                    pending.push((id, rx));
                    asked.push(node.clone());
                }
            }
        }
        let results = self.drive_pending(pending).await;
        asked.into_iter().zip(results).collect()
    }

    async fn send_store(&mut self, node: &Node, key: &str, value: &str) -> Result<()> {
        let addr = node.socket_addr()?;
        let (id, rx) = self
            .issue_request(
                addr,
                &node.id,
                Verb::Store { key: key.to_string(), value: value.to_string() },
            )
            .await?;
        let _ = self.drive_pending(vec![(id, rx)]).await;
        Ok(())
    }

    async fn send_append(&mut self, node: &Node, key: &str, elements: &[String]) -> Result<()> {
        let addr = node.socket_addr()?;
        let json_list = serde_json::to_string(elements)?;
        let (id, rx) = self
            .issue_request(addr, &node.id, Verb::Append { key: key.to_string(), json_list })
            .await?;
        let _ = self.drive_pending(vec![(id, rx)]).await;
        Ok(())
    }

    async fn send_remove(&mut self, node: &Node, key: &str, elements: &[String]) -> Result<()> {
        let addr = node.socket_addr()?;
        let json_list = serde_json::to_string(elements)?;
        let (id, rx) = self
            .issue_request(addr, &node.id, Verb::Remove { key: key.to_string(), json_list })
            .await?;
        let _ = self.drive_pending(vec![(id, rx)]).await;
        Ok(())
    }

    /// Sign and send a request, registering its oneshot resolver with the
    /// transport. Includes our own certificate whenever the receiver is not
    /// yet one we've successfully talked to (first contact, or recovering
    /// from a prior NACK).
    async fn issue_request(
        &mut self,
        addr: SocketAddr,
        receiver: &NodeId,
        verb: Verb,
    ) -> Result<(MessageId, tokio::sync::oneshot::Receiver<Vec<u8>>)> {
        let id = self.transport.next_id();
        let include_cert = true;
        let req = build_request(&self.identity, id, receiver, verb, include_cert)?;
        self.pending_challenges.insert(id, (*receiver, req.challenge));
        let wire = WireMessage::Request(req).encode()?;
        let rx = self.transport.send_request(id, addr, &wire).await?;
        Ok((id, rx))
    }

    /// Drive the recv loop until every pending reply has resolved or the
    /// configured RPC timeout elapses, dispatching any inbound requests it
    /// sees along the way. A request that never gets a reply at all
    /// (true timeout, as opposed to a NACK) drops its peer from the routing
    /// table (design §4.9's failure table).
    async fn drive_pending(
        &mut self,
        pending: Vec<(MessageId, tokio::sync::oneshot::Receiver<Vec<u8>>)>,
    ) -> Vec<Option<ResponsePayload>> {
        if pending.is_empty() {
            return Vec::new();
        }
        let timeout = self.config.rpc_timeout;
        let ids: Vec<MessageId> = pending.iter().map(|(id, _)| *id).collect();
        let targets: HashMap<MessageId, NodeId> = ids
            .iter()
            .filter_map(|id| self.pending_challenges.get(id).map(|(node_id, _)| (*id, *node_id)))
            .collect();
        let waiters = join_all(pending.into_iter().map(|(_, rx)| await_reply(rx, timeout)));
        tokio::pin!(waiters);

        let results = loop {
            tokio::select! {
                resolved = &mut waiters => break resolved,
                inbound = self.transport.recv() => {
                    if let Ok((from, bytes)) = inbound {
                        // Boxed deliberately: `dispatch_inbound` reaches
                        // `hand_off_on_new_neighbor` -> `send_store`/
                        // `send_append` -> this same `drive_pending`, and an
                        // unboxed call here would make this function's
                        // future embed itself (E0733, recursion in an async
                        // fn without indirection).
                        Box::pin(self.dispatch_inbound(from, bytes)).await;
                    }
                }
            }
        };

        let mut out = Vec::with_capacity(results.len());
        for (id, raw) in ids.iter().zip(results.into_iter()) {
            self.transport.forget(*id);
            self.pending_challenges.remove(id);
            match raw {
                None => {
                    // A true timeout: no datagram at all, not even a NACK
                    // (those resolve the waiter with an undecodable marker
                    // instead of leaving it to expire).
                    if let Some(node_id) = targets.get(id) {
                        debug!(?node_id, "RPC timed out, dropping contact");
                        self.routing.remove_contact(node_id);
                    }
                    out.push(None);
                }
                Some(bytes) => out.push(decode_response_payload(&bytes)),
            }
        }
        out
    }

    /// Handle one inbound datagram: either it's a reply to an outstanding
    /// request (resolve it) or a fresh request/NACK to service.
    async fn dispatch_inbound(&mut self, from: SocketAddr, bytes: Vec<u8>) {
        let msg = match WireMessage::decode(&bytes) {
            Ok(m) => m,
            Err(e) => {
                debug!(?e, "dropping malformed datagram");
                return;
            }
        };
        match msg {
            WireMessage::Response(resp) => self.handle_response(from, bytes, resp).await,
            WireMessage::Nack(nack) => self.handle_nack(from, nack).await,
            WireMessage::Request(req) => self.handle_request(from, req).await,
        }
    }

    /// Verify a response's signature against the challenge we issued before
    /// resolving its waiter; an unverifiable response is dropped and its
    /// caller sees a timeout, same as if no reply had arrived at all. A
    /// response that verifies promotes its sender into the routing table
    /// (design §4.3's caller-side verification step 2).
    async fn handle_response(&mut self, from: SocketAddr, bytes: Vec<u8>, resp: ResponseEnvelope) {
        let id = MessageId::from_u64(resp.id);
        let Some((expected_sender, challenge)) = self.pending_challenges.get(&id).copied() else {
            debug!("dropping response with no matching outstanding request");
            return;
        };
        if resp.responder_id != expected_sender {
            warn!("dropping response from unexpected responder id");
            return;
        }
        if let Some(der) = &resp.responder_cert_der {
            if let Ok(cert) = crate::identity::parse_certificate(der) {
                self.certs.insert(cert);
            }
        }
        let Some(cert) = self.certs.get(&resp.responder_id).cloned() else {
            warn!("dropping response from peer with unknown certificate");
            return;
        };
        if verify_response(&resp, &challenge, &cert).is_err() {
            warn!("dropping response with invalid signature");
            return;
        }

        let was_new = self.routing.is_new_node(&resp.responder_id);
        let node = Node::new(resp.responder_id, from.ip().to_string(), from.port());
        self.routing.add_contact(node.clone());
        if was_new {
            self.hand_off_on_new_neighbor(&node).await;
        }

        self.transport.resolve(id, bytes);
    }

    /// NACK is not an error: it is "I don't know your certificate yet".
    /// The caller's next action is always `callPing(sender, own_cert())` so
    /// the peer learns our certificate and a retried call can succeed
    /// (design §4.3's caller-side verification step 1, scenario S4).
    async fn handle_nack(&mut self, from: SocketAddr, nack: NackEnvelope) {
        let id = MessageId::from_u64(nack.id);
        let expected_sender = self.pending_challenges.get(&id).map(|(node_id, _)| *node_id);
        warn!(reason = ?nack.reason, "peer nacked our request");
        // Wake the waiter immediately rather than let it run out the clock;
        // an undecodable marker reads as "no usable response" downstream
        // without being mistaken for a true timeout (which would also evict
        // the contact, which a NACK must not do).
        self.transport.resolve(id, Vec::new());

        if let Some(receiver) = expected_sender {
            if let Ok((ping_id, rx)) = self.issue_request(from, &receiver, Verb::Ping).await {
                let _ = self.drive_pending(vec![(ping_id, rx)]).await;
            }
        }
    }

    /// Request-side verification (design §4.3). Six verbs share one gate:
    /// locate the sender's certificate, verify the signature against it, add
    /// the sender as a contact, then dispatch to the verb's handler. Only
    /// `ping` and a `find_value` for the caller's own cert key may use an
    /// explicitly-attached certificate when the sender is otherwise unknown
    /// — every other verb NACKs an unrecognized sender outright, even if a
    /// certificate rode along on the envelope, so the only way into the
    /// network for a stranger is through that privileged pair.
    async fn handle_request(&mut self, from: SocketAddr, req: RequestEnvelope) {
        let cert = match self.certs.get(&req.sender_id).cloned() {
            Some(known) => Some(known),
            None if self.is_privileged_bootstrap(&req) => self.admit_privileged_cert(&req),
            None => None,
        };

        let Some(cert) = cert else {
            let nack = NackEnvelope { id: req.id, reason: NackReason::UnknownCertificate };
            if let Ok(bytes) = WireMessage::Nack(nack).encode() {
                let _ = self.transport.send_raw(from, &bytes).await;
            }
            return;
        };

        if verify_request(&req, &self.identity.node_id(), &cert).is_err() {
            let nack = NackEnvelope { id: req.id, reason: NackReason::BadSignature };
            if let Ok(bytes) = WireMessage::Nack(nack).encode() {
                let _ = self.transport.send_raw(from, &bytes).await;
            }
            return;
        }

        let was_new = self.routing.is_new_node(&req.sender_id);
        let sender_node = Node::new(req.sender_id, from.ip().to_string(), from.port());
        self.routing.add_contact(sender_node.clone());
        if was_new {
            self.hand_off_on_new_neighbor(&sender_node).await;
        }

        let payload = self.handle_verb(req.verb);
        let id = self.transport.next_id();
        let Ok(resp) = build_response(&self.identity, id, &req.challenge, payload, false) else {
            return;
        };
        if let Ok(bytes) = WireMessage::Response(resp).encode() {
            let _ = self.transport.send_raw(from, &bytes).await;
        }
    }

    /// Design §4.3's "privileged bootstrap case": `ping` admits any
    /// attached certificate; `find_value` only admits one when the caller is
    /// asking for its own certificate's storage key (the one request an
    /// unknown node legitimately needs answered before it has a cert on
    /// file anywhere).
    fn is_privileged_bootstrap(&self, req: &RequestEnvelope) -> bool {
        match &req.verb {
            Verb::Ping => true,
            Verb::FindValue { key } => *key == cert_storage_key(&req.sender_id),
            _ => false,
        }
    }

    /// Validate an explicitly-attached certificate against the transport
    /// truststore and the claimed sender id, then persist it via `storeCert`
    /// on success (design §4.3, §4.9's "cert id != claimed node id" /
    /// "chain validation fails" failure rows).
    fn admit_privileged_cert(&mut self, req: &RequestEnvelope) -> Option<Certificate> {
        let der = req.sender_cert_der.as_ref()?;
        let cert = crate::identity::parse_certificate(der).ok()?;
        if IdentityAdapter::id_from_cert(&cert) != req.sender_id {
            warn!("refusing certificate whose id does not match the claimed sender");
            return None;
        }
        if IdentityAdapter::validate_chain(&cert, &self.trust).is_err() {
            warn!("refusing certificate that failed chain validation");
            return None;
        }
        self.certs.insert(cert.clone());
        Some(cert)
    }

    /// Key Handoff on New Neighbor (design §4.6): when a node we didn't
    /// already know about proves itself (via a verified request or
    /// response), offer it at most one locally-held key — the closest one
    /// for which it would become an authoritative replica alongside us.
    /// Anti-entropy (the periodic republish sweep) fills in the rest over
    /// time; this path is deliberately throttled to one key per event.
    async fn hand_off_on_new_neighbor(&mut self, new_node: &Node) {
        let local_id = self.identity.node_id();
        for key in self.storage.keys() {
            let target = key_to_node_id(&key);
            let neighbors = self.routing.find_neighbors(&target, self.config.k, Some(&new_node.id));
            if maintenance::should_hand_off(new_node, &local_id, &target, &neighbors) {
                if let Some(value) = self.storage.get(&key) {
                    let _ = self.send_store(new_node, &key, &value).await;
                }
                return;
            }
        }
        for key in self.sets.keys() {
            let target = key_to_node_id(&key);
            let neighbors = self.routing.find_neighbors(&target, self.config.k, Some(&new_node.id));
            if maintenance::should_hand_off(new_node, &local_id, &target, &neighbors) {
                let elements = self.sets.get_concat(&key);
                let _ = self.send_append(new_node, &key, &elements).await;
                return;
            }
        }
    }

    /// Maintenance (design §2 component 10): periodic republish of
    /// locally-owned keys older than `config.republish_interval`, so a
    /// replica that missed every crawl since the last write still converges
    /// eventually. Set keys have no per-entry age (the CRDT has no single
    /// "inserted_at"), so every set key is republished on each tick; this is
    /// the anti-entropy fallback the key-handoff throttle in §4.6 defers to.
    pub async fn run_maintenance_tick(&mut self) -> Result<()> {
        let due = self.storage.entries_older_than(self.config.republish_interval);
        info!(count = due.len(), "republishing scalar keys");
        for (key, value) in due {
            let target = key_to_node_id(&key);
            let closest = self.find_node_crawl(target).await?;
            for node in closest {
                let _ = self.send_store(&node, &key, &value).await;
            }
        }

        for key in self.sets.keys() {
            let elements = self.sets.get_concat(&key);
            let target = key_to_node_id(&key);
            let closest = self.find_node_crawl(target).await?;
            for node in closest {
                let _ = self.send_append(&node, &key, &elements).await;
            }
        }
        Ok(())
    }

    fn handle_verb(&mut self, verb: Verb) -> ResponsePayload {
        match verb {
            Verb::Ping => ResponsePayload::Pong,
            Verb::FindNode { target } => {
                ResponsePayload::Nodes(self.routing.find_neighbors(&target, self.config.k, None))
            }
            Verb::FindValue { key } => {
                if key == cert_storage_key(&self.identity.node_id()) {
                    return ResponsePayload::Value(
                        hex::encode(&self.identity.own_cert().der),
                    );
                }
                if let Some(value) = self.storage.get(&key) {
                    ResponsePayload::Value(value)
                } else {
                    let set = self.sets.get_concat(&key);
                    if !set.is_empty() {
                        ResponsePayload::ValueSet(set)
                    } else {
                        let target = key_to_node_id(&key);
                        ResponsePayload::NotFound(self.routing.find_neighbors(&target, self.config.k, None))
                    }
                }
            }
            Verb::Store { key, value } => {
                self.storage.set(key, value);
                ResponsePayload::Stored
            }
            Verb::Append { key, json_list } => match serde_json::from_str::<Vec<String>>(&json_list) {
                Ok(elements) => {
                    self.sets.append_many(&key, &elements);
                    ResponsePayload::Ok
                }
                Err(e) => ResponsePayload::Error(format!("append payload is not a JSON array: {e}")),
            },
            Verb::Remove { key, json_list } => match serde_json::from_str::<Vec<String>>(&json_list) {
                Ok(elements) => {
                    self.sets.remove_many(&key, &elements);
                    ResponsePayload::Ok
                }
                Err(e) => ResponsePayload::Error(format!("remove payload is not a JSON array: {e}")),
            },
        }
    }
}

pub(crate) fn key_to_node_id(key: &str) -> NodeId {
    let digest = lib_crypto::hash_blake3(key.as_bytes());
    let mut bytes = [0u8; 20];
    bytes.copy_from_slice(&digest[..20]);
    NodeId::from_bytes(bytes)
}

fn decode_response_payload(bytes: &[u8]) -> Option<ResponsePayload> {
    match WireMessage::decode(bytes).ok()? {
        WireMessage::Response(resp) => Some(resp.payload),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn loopback_any_port() -> SocketAddr {
        "127.0.0.1:0".parse().unwrap()
    }

    async fn two_mutually_trusting_servers() -> (DhtServer, DhtServer) {
        let mut a = DhtServer::bind(DhtConfig::default(), loopback_any_port()).await.unwrap();
        let mut b = DhtServer::bind(DhtConfig::default(), loopback_any_port()).await.unwrap();
        a.trust_bootstrap_seed(b.own_certificate().clone());
        b.trust_bootstrap_seed(a.own_certificate().clone());
        // Mutual trust does not imply mutual certificate knowledge: a fresh
        // peer still introduces itself on the first request, so pre-seed the
        // cache to exercise the steady-state path in these unit tests.
        a.certs.insert(b.own_certificate().clone());
        b.certs.insert(a.own_certificate().clone());
        (a, b)
    }

    #[tokio::test]
    async fn bootstrap_adds_seed_to_routing_table() {
        let (mut a, b) = two_mutually_trusting_servers().await;
        let b_node = b.local_node().unwrap();
        a.bootstrap(vec![b_node.clone()]).await.unwrap();
        assert!(!a.routing.is_new_node(&b_node.id));
    }

    #[tokio::test]
    async fn set_then_get_round_trips_through_a_remote_replica() {
        let (mut a, b) = two_mutually_trusting_servers().await;
        let b_node = b.local_node().unwrap();
        a.bootstrap(vec![b_node]).await.unwrap();

        a.set("greeting", "hello").await.unwrap();
        assert_eq!(a.get("greeting").await.unwrap(), Some("hello".to_string()));
    }

    #[tokio::test]
    async fn append_and_get_concat_reconcile_across_replicas() {
        let (mut a, b) = two_mutually_trusting_servers().await;
        let b_node = b.local_node().unwrap();
        a.bootstrap(vec![b_node]).await.unwrap();

        a.append("members", &["alice".to_string()]).await.unwrap();
        a.append("members", &["bob".to_string()]).await.unwrap();
        let mut members = a.get_concat("members").await.unwrap();
        members.sort();
        assert_eq!(members, vec!["alice".to_string(), "bob".to_string()]);
    }

    #[tokio::test]
    async fn unknown_certificate_request_is_nacked_not_serviced() {
        let a_identity = IdentityAdapter::generate().unwrap();
        let mut b = DhtServer::bind(DhtConfig::default(), loopback_any_port()).await.unwrap();
        let b_addr = b.local_node().unwrap().socket_addr().unwrap();

        let mut probe = Transport::bind(loopback_any_port()).await.unwrap();
        let id = probe.next_id();
        // Built without `sender_cert_der`, simulating a request from a peer
        // `b` has never exchanged certificates with.
        let req = build_request(&a_identity, id, &b.node_id(), Verb::Ping, false).unwrap();
        let wire = WireMessage::Request(req).encode().unwrap();
        let rx = probe.send_request(id, b_addr, &wire).await.unwrap();

        let (from, bytes) = b.transport.recv().await.unwrap();
        b.dispatch_inbound(from, bytes).await;

        let (_, reply_bytes) = probe.recv().await.unwrap();
        probe.resolve(id, reply_bytes);
        let reply_bytes = await_reply(rx, std::time::Duration::from_millis(200)).await.unwrap();
        match WireMessage::decode(&reply_bytes).unwrap() {
            WireMessage::Nack(nack) => assert!(matches!(nack.reason, NackReason::UnknownCertificate)),
            other => panic!("expected a NACK, got {other:?}"),
        }
    }
}
