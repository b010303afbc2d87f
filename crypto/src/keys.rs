//! Validator identities
//!
//! Peers know a validator by its signatory: the BLAKE3 digest of its Ed25519
//! public key.

use ed25519_dalek::{SigningKey, VerifyingKey};
use lockstep_core::{LockstepError, LockstepResult, PublicKey, Signatory};
use rand::rngs::OsRng;

use crate::hashing::blake3_hash;

/// Ed25519 signing key held by one validator
#[derive(Clone)]
pub struct KeyPair {
    signing_key: SigningKey,
}

impl KeyPair {
    /// Fresh key from the operating system's RNG
    pub fn generate() -> Self {
        Self {
            signing_key: SigningKey::generate(&mut OsRng),
        }
    }

    /// Key for a fixed seed; equal seeds give the same validator
    pub fn from_seed(seed: &[u8; 32]) -> Self {
        Self {
            signing_key: SigningKey::from_bytes(seed),
        }
    }

    pub fn public_key(&self) -> PublicKey {
        PublicKey::from_bytes(self.signing_key.verifying_key().to_bytes())
    }

    pub fn signatory(&self) -> Signatory {
        signatory_from_public_key(&self.public_key())
    }

    pub(crate) fn signing_key(&self) -> &SigningKey {
        &self.signing_key
    }
}

/// Signatory a public key is known by
pub fn signatory_from_public_key(public_key: &PublicKey) -> Signatory {
    Signatory::from_bytes(*blake3_hash(public_key.as_bytes()).as_bytes())
}

/// Parse a public key carried in a message header
pub(crate) fn verifying_key(public_key: &PublicKey) -> LockstepResult<VerifyingKey> {
    VerifyingKey::from_bytes(public_key.as_bytes()).map_err(|_| LockstepError::InvalidPublicKey)
}
