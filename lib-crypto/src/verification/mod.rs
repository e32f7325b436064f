//! Signature verification module
//! 
//! implementations from crypto.rs preserving working verification logic

pub mod signature_verify;
pub mod dev_mode;

// Re-export main functions
pub use signature_verify::verify_signature;
