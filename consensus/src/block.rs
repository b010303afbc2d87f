//! Blocks as seen by consensus: opaque payloads identified by their hash

use lockstep_core::{Hash, Hashable, Height, Signatory, Signature, Timestamp};
use lockstep_crypto::hashing::hash_multiple;
use serde::{Deserialize, Serialize};

/// Block proposed for a height
///
/// Consensus never interprets the payload; it only agrees on the hash.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Block {
    /// Height this block is proposed for
    pub height: Height,
    /// Hash of the block decided at the previous height
    pub parent: Hash,
    /// Creation timestamp
    pub timestamp: Timestamp,
    /// Application payload
    pub payload: Vec<u8>,
}

impl Block {
    /// Create a new block stamped with the current time
    pub fn new(height: Height, parent: Hash, payload: Vec<u8>) -> Self {
        Self::with_timestamp(height, parent, Timestamp::now(), payload)
    }

    pub fn with_timestamp(height: Height, parent: Hash, timestamp: Timestamp, payload: Vec<u8>) -> Self {
        Self {
            height,
            parent,
            timestamp,
            payload,
        }
    }
}

impl Hashable for Block {
    fn hash(&self) -> Hash {
        let payload_len = (self.payload.len() as u64).to_le_bytes();
        hash_multiple(&[
            b"LOCKSTEP_BLOCK:",
            &self.height.0.to_le_bytes(),
            self.parent.as_bytes(),
            &self.timestamp.0.to_le_bytes(),
            &payload_len,
            &self.payload,
        ])
    }
}

/// A block together with the signature of the proposal that carried it
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignedBlock {
    pub block: Block,
    /// Proposer of the block
    pub signatory: Signatory,
    /// Proposer's signature over the proposal
    pub signature: Signature,
}

impl SignedBlock {
    pub fn new(block: Block, signatory: Signatory, signature: Signature) -> Self {
        Self {
            block,
            signatory,
            signature,
        }
    }

    pub fn height(&self) -> Height {
        self.block.height
    }
}

impl Hashable for SignedBlock {
    fn hash(&self) -> Hash {
        self.block.hash()
    }
}
