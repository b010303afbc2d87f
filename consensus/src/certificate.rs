//! Quorum certificates over prevotes (`Polka`) and precommits (`Commit`)

use lockstep_core::{Hash, Hashable, Height, Round};
use serde::{Deserialize, Serialize};

use crate::block::SignedBlock;

/// Proof that +2/3 of the validators prevoted the same block (or nil) at a round
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Polka {
    pub height: Height,
    pub round: Round,
    /// `None` when the quorum prevoted nil
    pub block: Option<SignedBlock>,
}

impl Polka {
    pub fn new(height: Height, round: Round, block: Option<SignedBlock>) -> Self {
        Self { height, round, block }
    }

    /// Polka for "no block"
    pub fn nil(height: Height, round: Round) -> Self {
        Self::new(height, round, None)
    }

    pub fn is_nil(&self) -> bool {
        self.block.is_none()
    }

    pub fn block_hash(&self) -> Option<Hash> {
        self.block.as_ref().map(SignedBlock::hash)
    }
}

/// Proof that +2/3 of the validators precommitted a polka
///
/// A nil commit means the round failed; otherwise the height is decided.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Commit {
    pub polka: Polka,
}

impl Commit {
    pub fn new(polka: Polka) -> Self {
        Self { polka }
    }

    pub fn nil(height: Height, round: Round) -> Self {
        Self::new(Polka::nil(height, round))
    }

    pub fn height(&self) -> Height {
        self.polka.height
    }

    pub fn round(&self) -> Round {
        self.polka.round
    }

    pub fn block(&self) -> Option<&SignedBlock> {
        self.polka.block.as_ref()
    }

    pub fn is_nil(&self) -> bool {
        self.polka.is_nil()
    }
}
