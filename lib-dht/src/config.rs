//! Fixed-at-construction configuration. No dynamic `k`/`α` tuning at runtime
//! (explicit Non-goal) — a `DhtConfig` is built once and handed to [`crate::server::DhtServer`].

use std::time::Duration;

/// Kademlia bucket width.
pub const DEFAULT_K: usize = 20;
/// Lookup concurrency.
pub const DEFAULT_ALPHA: usize = 3;

#[derive(Clone, Debug)]
pub struct DhtConfig {
    /// Bucket width / replication factor.
    pub k: usize,
    /// Crawl concurrency.
    pub alpha: usize,
    /// Per-RPC timeout before the outstanding entry resolves to `(false, null)`.
    pub rpc_timeout: Duration,
    /// Bootstrap retry interval while the transport is not yet up.
    pub bootstrap_retry_interval: Duration,
    /// ForgetfulStorage capacity (entries).
    pub storage_capacity: usize,
    /// ForgetfulStorage entry TTL.
    pub storage_ttl: Duration,
    /// Minimum age before a locally-stored scalar key is republished by the
    /// periodic maintenance sweep (design §2 component 10, "Maintenance").
    pub republish_interval: Duration,
}

impl DhtConfig {
    /// NodeHeap capacity used by the crawler: `(k+1)*k`, larger than classical
    /// Kademlia to tolerate churn and cert-fetch detours.
    pub fn node_heap_capacity(&self) -> usize {
        (self.k + 1) * self.k
    }
}

impl Default for DhtConfig {
    fn default() -> Self {
        DhtConfig {
            k: DEFAULT_K,
            alpha: DEFAULT_ALPHA,
            rpc_timeout: Duration::from_secs(5),
            bootstrap_retry_interval: Duration::from_secs(1),
            storage_capacity: 1000,
            storage_ttl: Duration::from_secs(24 * 60 * 60),
            republish_interval: Duration::from_secs(60 * 60),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_matches_spec_defaults() {
        let cfg = DhtConfig::default();
        assert_eq!(cfg.k, 20);
        assert_eq!(cfg.alpha, 3);
        assert_eq!(cfg.node_heap_capacity(), 420);
        assert_eq!(cfg.rpc_timeout, Duration::from_secs(5));
    }
}
