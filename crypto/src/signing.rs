//! Ed25519 signatures over message digests

use ed25519_dalek::{Signer, Verifier};
use lockstep_core::{LockstepError, LockstepResult, PublicKey, Signature};

use crate::keys::{verifying_key, KeyPair};

/// Sign `digest`, reporting a failure of the signature primitive as `SigningError`
pub fn sign(keypair: &KeyPair, digest: &[u8]) -> LockstepResult<Signature> {
    keypair
        .signing_key()
        .try_sign(digest)
        .map(|signature| Signature::from_bytes(signature.to_bytes()))
        .map_err(|e| LockstepError::SigningError(e.to_string()))
}

/// Check that `signature` over `digest` was produced by `public_key`
pub fn verify(public_key: &PublicKey, digest: &[u8], signature: &Signature) -> LockstepResult<()> {
    let signature = ed25519_dalek::Signature::from_bytes(signature.as_bytes());
    verifying_key(public_key)?
        .verify(digest, &signature)
        .map_err(|_| LockstepError::InvalidSignature)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sign_and_verify() {
        let keypair = KeyPair::generate();
        let digest = b"Prevote(Height=1,Round=0)";

        let signature = sign(&keypair, digest).unwrap();
        assert!(verify(&keypair.public_key(), digest, &signature).is_ok());
    }

    #[test]
    fn test_signatures_are_deterministic() {
        let keypair = KeyPair::from_seed(&[3u8; 32]);

        assert_eq!(
            sign(&keypair, b"deterministic").unwrap(),
            sign(&keypair, b"deterministic").unwrap()
        );
    }

    #[test]
    fn test_rejects_wrong_key_or_digest() {
        let signer = KeyPair::generate();
        let other = KeyPair::generate();
        let digest = b"Precommit(Height=1,Round=0)";
        let signature = sign(&signer, digest).unwrap();

        assert!(matches!(
            verify(&other.public_key(), digest, &signature),
            Err(LockstepError::InvalidSignature)
        ));
        assert!(verify(&signer.public_key(), b"Precommit(Height=1,Round=1)", &signature).is_err());
    }

    #[test]
    fn test_rejects_tampered_signature() {
        let signer = KeyPair::from_seed(&[4u8; 32]);
        let signature = sign(&signer, b"digest").unwrap();

        let mut bytes = *signature.as_bytes();
        bytes[0] ^= 0x01;
        let tampered = Signature::from_bytes(bytes);

        assert!(verify(&signer.public_key(), b"digest", &tampered).is_err());
    }
}
