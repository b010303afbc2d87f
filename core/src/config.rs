//! Configuration types for LOCKSTEP

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::error::LockstepError;
use crate::traits::LockstepResult;
use crate::types::{Height, Round};

/// Main node configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeConfig {
    /// Node name for logging
    pub name: String,

    /// Number of validators in the local simulation
    pub validators: usize,

    /// Height at which replicas stop once reached
    pub target_height: u64,

    /// Phrase the validator keys are derived from
    pub seed_phrase: String,

    /// Upper bound on the wall-clock duration of a run, in seconds
    pub max_run_secs: u64,

    /// Consensus configuration
    pub consensus: ConsensusConfig,

    /// Round timeout configuration
    pub timeouts: TimeoutConfig,

    /// How far ahead of a replica inbound messages are still buffered
    #[serde(default)]
    pub lookahead: LookaheadConfig,

    /// Logging level
    pub log_level: String,
}

impl NodeConfig {
    /// Parse a configuration from JSON
    pub fn from_json(json: &str) -> LockstepResult<Self> {
        let config: NodeConfig = serde_json::from_str(json)?;
        config.consensus.validate(config.validators)?;
        Ok(config)
    }

    /// Serialize to pretty JSON
    pub fn to_json(&self) -> LockstepResult<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Resize the validator set, recomputing the quorum parameters
    pub fn with_validators(mut self, validators: usize) -> Self {
        let start_height = self.consensus.start_height;
        self.validators = validators;
        self.consensus = ConsensusConfig::for_validators(validators);
        self.consensus.start_height = start_height;
        self
    }

    /// Stop after deciding `heights` heights past the start height
    pub fn with_heights(mut self, heights: u64) -> LockstepResult<Self> {
        self.target_height = self
            .consensus
            .start_height
            .0
            .checked_add(heights)
            .ok_or_else(|| {
                LockstepError::ConfigError(format!(
                    "{} heights past height {} overflows",
                    heights, self.consensus.start_height
                ))
            })?;
        Ok(self)
    }
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            name: "lockstep-devnet".to_string(),
            validators: 4,
            target_height: 5,
            seed_phrase: "lockstep devnet".to_string(),
            max_run_secs: 60,
            consensus: ConsensusConfig::default(),
            timeouts: TimeoutConfig::default(),
            lookahead: LookaheadConfig::default(),
            log_level: "info".to_string(),
        }
    }
}

/// Consensus configuration
///
/// Both quorum parameters are fixed for the lifetime of a height range.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ConsensusConfig {
    /// Maximum number of faulty validators tolerated (`f`)
    pub fault_tolerance: usize,

    /// Number of matching votes forming a quorum (conventionally `2f + 1`)
    pub consensus_threshold: usize,

    /// Height the state machine starts at
    pub start_height: Height,
}

impl ConsensusConfig {
    /// Quorum parameters for `n` equally weighted validators
    pub fn for_validators(n: usize) -> Self {
        let fault_tolerance = n.saturating_sub(1) / 3;
        Self {
            fault_tolerance,
            consensus_threshold: 2 * fault_tolerance + 1,
            start_height: Height::new(0),
        }
    }

    /// Check the parameters against the size of the validator set
    pub fn validate(&self, validators: usize) -> LockstepResult<()> {
        if validators == 0 {
            return Err(LockstepError::ConfigError("validator set is empty".into()));
        }
        if validators < 3 * self.fault_tolerance + 1 {
            return Err(LockstepError::ConfigError(format!(
                "{} validators cannot tolerate {} faults",
                validators, self.fault_tolerance
            )));
        }
        if self.consensus_threshold <= 2 * self.fault_tolerance {
            return Err(LockstepError::ConfigError(format!(
                "threshold {} does not exceed 2f = {}",
                self.consensus_threshold,
                2 * self.fault_tolerance
            )));
        }
        if self.consensus_threshold > validators {
            return Err(LockstepError::ConfigError(format!(
                "threshold {} exceeds validator count {}",
                self.consensus_threshold, validators
            )));
        }
        Ok(())
    }
}

impl Default for ConsensusConfig {
    fn default() -> Self {
        Self::for_validators(4)
    }
}

/// Round timeout configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimeoutConfig {
    /// Timeout of round zero in milliseconds
    pub base_timeout_ms: u64,

    /// Added to the timeout for every further round, in milliseconds
    pub timeout_increment_ms: u64,
}

impl TimeoutConfig {
    /// Timeout for a given round; grows linearly so that slow rounds eventually overlap
    pub fn timeout_for(&self, round: Round) -> Duration {
        let increment = self.timeout_increment_ms.saturating_mul(round.0);
        Duration::from_millis(self.base_timeout_ms.saturating_add(increment))
    }
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            base_timeout_ms: 1000,
            timeout_increment_ms: 500,
        }
    }
}

/// Bound on buffering for heights and rounds a replica has not reached
///
/// Buffered proposals and votes are only evicted once the replica decides past
/// their height, so anything further ahead than this is dropped on arrival.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct LookaheadConfig {
    /// Heights above the current one that are still buffered
    pub max_heights: u64,

    /// Rounds above the current one (or above round zero, for a later height)
    /// that are still buffered
    pub max_rounds: u64,
}

impl LookaheadConfig {
    /// Whether a message for `(height, round)` is close enough to buffer
    pub fn admits(&self, current: (Height, Round), message: (Height, Round)) -> bool {
        let ((height, round), (at_height, at_round)) = (current, message);
        if at_height.0 > height.0.saturating_add(self.max_heights) {
            return false;
        }
        let base = if at_height == height { round.0 } else { 0 };
        at_round.0 <= base.saturating_add(self.max_rounds)
    }
}

impl Default for LookaheadConfig {
    fn default() -> Self {
        Self {
            max_heights: 8,
            max_rounds: 64,
        }
    }
}
