//! Core traits shared by LOCKSTEP crates

use crate::types::*;

/// Result type for LOCKSTEP operations
pub type LockstepResult<T> = Result<T, crate::error::LockstepError>;

/// Trait for content with a deterministic, collision-resistant identity
pub trait Hashable {
    /// Compute the hash of this object
    fn hash(&self) -> Hash;
}
