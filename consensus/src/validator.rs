//! Validator management

use lockstep_core::{ConsensusConfig, Height, LockstepError, LockstepResult, PublicKey, Round, Signatory};
use lockstep_crypto::keys::KeyPair;
use std::collections::BTreeMap;
use std::sync::Arc;

use crate::message::ConsensusMessage;

/// Validator information
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidatorInfo {
    pub signatory: Signatory,
    pub public_key: PublicKey,
}

impl ValidatorInfo {
    pub fn new(signatory: Signatory, public_key: PublicKey) -> Self {
        Self {
            signatory,
            public_key,
        }
    }
}

/// Fixed, equally weighted validator set
///
/// Validators are ordered by signatory, which fixes the proposer rotation.
#[derive(Debug, Clone, Default)]
pub struct ValidatorSet {
    validators: BTreeMap<Signatory, ValidatorInfo>,
}

impl ValidatorSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create with initial validators
    pub fn with_validators(validators: Vec<ValidatorInfo>) -> Self {
        let validators = validators
            .into_iter()
            .map(|v| (v.signatory, v))
            .collect();
        Self { validators }
    }

    pub fn len(&self) -> usize {
        self.validators.len()
    }

    pub fn is_empty(&self) -> bool {
        self.validators.is_empty()
    }

    pub fn is_validator(&self, signatory: &Signatory) -> bool {
        self.validators.contains_key(signatory)
    }

    pub fn get_public_key(&self, signatory: &Signatory) -> Option<PublicKey> {
        self.validators.get(signatory).map(|v| v.public_key)
    }

    /// Signatories in rotation order
    pub fn signatories(&self) -> impl Iterator<Item = &Signatory> {
        self.validators.keys()
    }

    /// Maximum number of faulty validators the set tolerates
    pub fn fault_tolerance(&self) -> usize {
        self.len().saturating_sub(1) / 3
    }

    /// Calculate required votes for consensus (2f + 1)
    pub fn consensus_threshold(&self) -> usize {
        2 * self.fault_tolerance() + 1
    }

    /// Quorum parameters for a machine starting at `start_height`
    pub fn consensus_config(&self, start_height: Height) -> ConsensusConfig {
        ConsensusConfig {
            start_height,
            ..ConsensusConfig::for_validators(self.len())
        }
    }

    /// Round-robin proposer of `(height, round)`
    pub fn proposer(&self, height: Height, round: Round) -> Option<Signatory> {
        if self.validators.is_empty() {
            return None;
        }
        let offset = height.0.wrapping_add(round.0) % self.len() as u64;
        self.validators.keys().nth(offset as usize).copied()
    }

    /// Check that a message is signed by a member of the set
    pub fn authenticate<M: ConsensusMessage>(&self, message: &M) -> LockstepResult<()> {
        let signatory = message.signatory();
        let public_key = self
            .get_public_key(&signatory)
            .ok_or(LockstepError::NotAValidator(signatory))?;

        if public_key != message.header().public_key {
            return Err(LockstepError::VerificationError(format!(
                "public key of {} does not match the validator set",
                signatory
            )));
        }

        message.verify()
    }
}

/// Local validator identity
pub struct LocalValidator {
    keypair: KeyPair,
    signatory: Signatory,
}

impl LocalValidator {
    pub fn new(keypair: KeyPair) -> Self {
        let signatory = keypair.signatory();
        Self { keypair, signatory }
    }

    pub fn signatory(&self) -> Signatory {
        self.signatory
    }

    pub fn public_key(&self) -> PublicKey {
        self.keypair.public_key()
    }

    /// Sign a message with this validator's key
    pub fn sign<M: ConsensusMessage>(&self, mut message: M) -> LockstepResult<M> {
        message.sign(&self.keypair)?;
        Ok(message)
    }

    pub fn to_validator_info(&self) -> ValidatorInfo {
        ValidatorInfo::new(self.signatory, self.public_key())
    }
}

/// Shared validator set
pub type SharedValidatorSet = Arc<ValidatorSet>;
