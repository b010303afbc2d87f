//! Deterministic validator keys
//!
//! Members of a devnet share one phrase. HKDF-SHA256 stretches it into a
//! master seed, then expands that seed once per validator index.

use hkdf::Hkdf;
use lockstep_core::{LockstepError, LockstepResult};
use sha2::Sha256;
use zeroize::{Zeroize, ZeroizeOnDrop, Zeroizing};

use crate::keys::KeyPair;

const PHRASE_SALT: &[u8] = b"lockstep-seed";
const MASTER_INFO: &[u8] = b"master";

fn expand_into(ikm: &[u8], salt: Option<&[u8]>, info: &[u8], out: &mut [u8; 32]) -> LockstepResult<()> {
    Hkdf::<Sha256>::new(salt, ikm)
        .expand(info, out)
        .map_err(|e| LockstepError::KeyDerivationFailed(e.to_string()))
}

/// Seed every validator key of a set is derived from
#[derive(Zeroize, ZeroizeOnDrop)]
pub struct MasterKey {
    seed: [u8; 32],
}

impl MasterKey {
    pub fn from_phrase(phrase: &str) -> LockstepResult<Self> {
        let mut master = Self { seed: [0u8; 32] };
        expand_into(phrase.as_bytes(), Some(PHRASE_SALT), MASTER_INFO, &mut master.seed)?;
        Ok(master)
    }

    /// Key of the validator at `index`
    pub fn derive_keypair(&self, index: usize) -> LockstepResult<KeyPair> {
        let info = format!("lockstep/validator/{}", index);
        let mut seed = Zeroizing::new([0u8; 32]);
        expand_into(&self.seed, None, info.as_bytes(), &mut seed)?;
        Ok(KeyPair::from_seed(&seed))
    }

    /// Keys of validators `0..count`
    pub fn derive_validators(&self, count: usize) -> LockstepResult<Vec<KeyPair>> {
        (0..count).map(|index| self.derive_keypair(index)).collect()
    }
}
