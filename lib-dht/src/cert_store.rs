//! Certificate Store (design §4.3, §6): certificates are themselves values in
//! the DHT, addressed under `digest(idHex||"cert")` so any node can fetch a
//! peer's certificate through the ordinary `find_value` path before it has
//! ever talked to that peer directly.
//!
//! Certificates owned by the local node are additionally mirrored to a
//! persistent sink on disk, using a write-tmp-then-fsync-then-rename-then-
//! fsync-parent pattern for durability, so a restart does not mint a new
//! identity.

use crate::identity::Certificate;
use crate::node::NodeId;
use anyhow::{Context, Result};
use sha1::{Digest, Sha1};
use std::collections::HashMap;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

/// `digest(idHex(id) || "cert")`, the storage key a certificate for `id` is
/// found under.
pub fn cert_storage_key(id: &NodeId) -> String {
    let mut hasher = Sha1::new();
    hasher.update(id.to_hex_upper().as_bytes());
    hasher.update(b"cert");
    hex::encode(hasher.finalize())
}

/// In-memory cache of known certificates, keyed by node id. Cleared entries
/// are never re-derived; a cache miss falls through to a `find_value` crawl
/// in the protocol layer.
#[derive(Default)]
pub struct CertificateCache {
    certs: HashMap<NodeId, Certificate>,
}

impl CertificateCache {
    pub fn new() -> Self {
        CertificateCache::default()
    }

    pub fn certificate_exists(&self, id: &NodeId) -> bool {
        self.certs.contains_key(id)
    }

    pub fn get(&self, id: &NodeId) -> Option<&Certificate> {
        self.certs.get(id)
    }

    pub fn insert(&mut self, cert: Certificate) {
        self.certs.insert(cert.node_id, cert);
    }
}

/// Durable single-file sink for the local node's own certificate and
/// keypair material. Every write goes to a sibling temp file, is fsynced,
/// renamed into place, and the containing directory is fsynced — a rename
/// alone is not durable against a crash between rename and the next fsync of
/// the directory entry.
pub struct CertificateSink {
    path: PathBuf,
}

impl CertificateSink {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        CertificateSink { path: path.into() }
    }

    pub fn load(&self) -> Result<Option<Vec<u8>>> {
        match fs::read(&self.path) {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e).context("reading persisted certificate"),
        }
    }

    pub fn store(&self, der: &[u8]) -> Result<()> {
        let parent = self
            .path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or_else(|| Path::new("."));
        fs::create_dir_all(parent)?;

        let tmp_path = parent.join(format!(
            ".{}.tmp",
            self.path.file_name().and_then(|n| n.to_str()).unwrap_or("cert")
        ));

        {
            let mut tmp = fs::File::create(&tmp_path).context("creating temp certificate file")?;
            tmp.write_all(der)?;
            tmp.sync_all().context("fsync temp certificate file")?;
        }

        fs::rename(&tmp_path, &self.path).context("renaming certificate into place")?;

        let dir = fs::File::open(parent).context("opening certificate directory for fsync")?;
        dir.sync_all().context("fsync certificate directory")?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identity::IdentityAdapter;

    #[test]
    fn cert_storage_key_is_deterministic() {
        let adapter = IdentityAdapter::generate().expect("identity generation");
        let id = adapter.node_id();
        assert_eq!(cert_storage_key(&id), cert_storage_key(&id));
    }

    #[test]
    fn cache_round_trips_certificate() {
        let adapter = IdentityAdapter::generate().expect("identity generation");
        let mut cache = CertificateCache::new();
        assert!(!cache.certificate_exists(&adapter.node_id()));
        cache.insert(adapter.own_cert().clone());
        assert!(cache.certificate_exists(&adapter.node_id()));
    }

    #[test]
    fn sink_store_and_load_round_trips() {
        let dir = tempfile::tempdir().expect("tempdir");
        let sink = CertificateSink::new(dir.path().join("node.cert"));
        assert!(sink.load().unwrap().is_none());
        sink.store(b"der-bytes").unwrap();
        assert_eq!(sink.load().unwrap(), Some(b"der-bytes".to_vec()));
    }

    #[test]
    fn sink_overwrite_replaces_previous_contents() {
        let dir = tempfile::tempdir().expect("tempdir");
        let sink = CertificateSink::new(dir.path().join("node.cert"));
        sink.store(b"first").unwrap();
        sink.store(b"second").unwrap();
        assert_eq!(sink.load().unwrap(), Some(b"second".to_vec()));
    }
}
