//! Certificate-bootstrapped, mutually-authenticated Kademlia DHT core.
//!
//! See `DESIGN.md` at the workspace root for the grounding ledger mapping
//! each module back to the codebase it was modeled on.

pub mod cert_store;
pub mod config;
pub mod crawler;
pub mod error;
pub mod identity;
pub mod maintenance;
pub mod node;
pub mod protocol;
pub mod routing;
pub mod server;
pub mod storage;
pub mod transport;

pub use config::DhtConfig;
pub use error::{DhtError, DhtResult};
pub use node::{Node, NodeId};
pub use server::DhtServer;
