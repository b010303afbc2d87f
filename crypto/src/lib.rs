//! LOCKSTEP Cryptography Module
//!
//! Provides the signing capability and hash functions the consensus core relies on:
//! - Ed25519 for signatures
//! - BLAKE3 for content hashing
//! - SHA-256 for message signing digests
//! - HKDF for deterministic validator key derivation

pub mod keys;
pub mod signing;
pub mod hashing;
pub mod derivation;

pub use keys::*;
pub use signing::*;
pub use hashing::*;
pub use derivation::*;
