//! Post-quantum cryptography module - CRYSTALS implementations
//! 
//! CRYSTALS-Dilithium and CRYSTALS-Kyber implementations

pub mod dilithium;
pub mod kyber;
pub mod constants;

// Re-export main functions
pub use dilithium::*;
pub use kyber::*;
pub use constants::*;
