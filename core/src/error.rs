//! Error types for LOCKSTEP

use thiserror::Error;

use crate::types::Signatory;

/// Main error type for LOCKSTEP
#[derive(Error, Debug)]
pub enum LockstepError {
    // ============ Cryptography Errors ============
    #[error("Invalid signature")]
    InvalidSignature,

    #[error("Invalid public key")]
    InvalidPublicKey,

    #[error("Key derivation failed: {0}")]
    KeyDerivationFailed(String),

    #[error("Signing error: {0}")]
    SigningError(String),

    #[error("Verification error: {0}")]
    VerificationError(String),

    // ============ Consensus Errors ============
    #[error("Not a validator: {0}")]
    NotAValidator(Signatory),

    // ============ Encoding Errors ============
    #[error("Message serialization failed: {0}")]
    SerializationError(String),

    #[error("Message deserialization failed: {0}")]
    DeserializationError(String),

    // ============ Configuration Errors ============
    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("I/O error: {0}")]
    IoError(String),

    // ============ General Errors ============
    #[error("Internal error: {0}")]
    Internal(String),
}

impl LockstepError {
    /// Decoding failure for any persisted or received encoding
    pub fn decode(err: impl std::fmt::Display) -> Self {
        LockstepError::DeserializationError(err.to_string())
    }
}

impl From<std::io::Error> for LockstepError {
    fn from(err: std::io::Error) -> Self {
        LockstepError::IoError(err.to_string())
    }
}

impl From<bincode::Error> for LockstepError {
    fn from(err: bincode::Error) -> Self {
        LockstepError::SerializationError(err.to_string())
    }
}

impl From<serde_json::Error> for LockstepError {
    fn from(err: serde_json::Error) -> Self {
        LockstepError::SerializationError(err.to_string())
    }
}
