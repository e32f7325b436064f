//! The four recoverable error kinds at the RPC boundary (see design §7).
//!
//! None of these ever propagate as a panic to a caller of the public Server
//! Facade operations; they are caught at the RPC boundary and resolved into
//! a NACK, a dropped datagram, or a `None`/timeout result as appropriate.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum DhtError {
    /// No reply within the deadline, or a malformed packet.
    #[error("transport error: {0}")]
    Transport(String),

    /// Missing certificate, bad signature, or cert/id mismatch.
    #[error("auth error: {0}")]
    Auth(String),

    /// JSON parse failure, unknown verb.
    #[error("policy error: {0}")]
    Policy(String),

    /// Storage full; soft failure, caller is not notified, entries are
    /// silently evicted on next cull.
    #[error("local storage error: {0}")]
    Local(String),
}

pub type DhtResult<T> = Result<T, DhtError>;
