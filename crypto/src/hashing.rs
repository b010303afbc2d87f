//! BLAKE3 identifies content; SHA-256 is the digest that gets signed

use lockstep_core::Hash;
use sha2::{Digest, Sha256};

pub fn blake3_hash(data: &[u8]) -> Hash {
    Hash::from_bytes(*blake3::hash(data).as_bytes())
}

pub fn sha256_hash(data: &[u8]) -> Hash {
    Hash::from_bytes(Sha256::digest(data).into())
}

/// BLAKE3 over the concatenation of `parts`, without building it
pub fn hash_multiple(parts: &[&[u8]]) -> Hash {
    let mut hasher = blake3::Hasher::new();
    for part in parts {
        hasher.update(part);
    }
    Hash::from_bytes(*hasher.finalize().as_bytes())
}
