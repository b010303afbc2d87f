//! Signed consensus messages
//!
//! Every message carries a [`Header`] with its height, round and signature
//! context. The signing digest covers the semantic fields only, so the header's
//! signature fields can be filled in after the digest is computed.

use lockstep_core::{
    Hash, Hashable, Height, LockstepError, LockstepResult, PublicKey, Round, Signatory, Signature,
};
use lockstep_crypto::hashing::sha256_hash;
use lockstep_crypto::keys::{signatory_from_public_key, KeyPair};
use lockstep_crypto::signing;
use serde::{Deserialize, Serialize};

use crate::block::{Block, SignedBlock};
use crate::certificate::Polka;

/// Message variant, part of the deduplication key
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MessageKind {
    Propose,
    Prevote,
    Precommit,
}

impl MessageKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageKind::Propose => "propose",
            MessageKind::Prevote => "prevote",
            MessageKind::Precommit => "precommit",
        }
    }
}

/// Fields shared by every message
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Header {
    pub height: Height,
    pub round: Round,
    /// Populated by signing
    pub signatory: Signatory,
    /// Key the signatory was derived from; needed to check Ed25519 signatures
    pub public_key: PublicKey,
    pub signature: Signature,
}

impl Header {
    /// Header of a message that has not been signed yet
    pub fn unsigned(height: Height, round: Round) -> Self {
        Self {
            height,
            round,
            signatory: Signatory::EMPTY,
            public_key: PublicKey::EMPTY,
            signature: Signature::EMPTY,
        }
    }
}

/// Behaviour common to all consensus messages
pub trait ConsensusMessage {
    fn header(&self) -> &Header;

    fn header_mut(&mut self) -> &mut Header;

    fn kind(&self) -> MessageKind;

    /// Hash of the block the message refers to, `None` for nil
    fn block_hash(&self) -> Option<Hash>;

    /// Appends variant specific fields to the signing payload
    fn extend_signing_payload(&self, _payload: &mut Vec<u8>) {}

    fn height(&self) -> Height {
        self.header().height
    }

    fn round(&self) -> Round {
        self.header().round
    }

    fn signatory(&self) -> Signatory {
        self.header().signatory
    }

    fn signature(&self) -> Signature {
        self.header().signature
    }

    /// Digest of the semantic fields, excluding signature and signatory
    fn signing_digest(&self) -> Hash {
        let mut payload = Vec::new();
        payload.extend_from_slice(b"LOCKSTEP_");
        payload.extend_from_slice(self.kind().as_str().as_bytes());
        payload.push(b':');
        payload.extend_from_slice(&self.height().0.to_le_bytes());
        payload.extend_from_slice(&self.round().0.to_le_bytes());
        match self.block_hash() {
            Some(hash) => {
                payload.push(1);
                payload.extend_from_slice(hash.as_bytes());
            }
            None => payload.push(0),
        }
        self.extend_signing_payload(&mut payload);
        sha256_hash(&payload)
    }

    /// Sign the digest and record the signatory derived from the key
    fn sign(&mut self, keypair: &KeyPair) -> LockstepResult<()> {
        let digest = self.signing_digest();
        let signature = signing::sign(keypair, digest.as_bytes())?;

        let header = self.header_mut();
        header.signatory = keypair.signatory();
        header.public_key = keypair.public_key();
        header.signature = signature;
        Ok(())
    }

    /// Check that the signature authenticates the digest under the claimed signatory
    fn verify(&self) -> LockstepResult<()> {
        let header = self.header();
        let signatory = signatory_from_public_key(&header.public_key);
        if signatory != header.signatory {
            return Err(LockstepError::VerificationError(format!(
                "bad signatory: expected {}, got {}",
                header.signatory, signatory
            )));
        }

        signing::verify(&header.public_key, self.signing_digest().as_bytes(), &header.signature)
            .map_err(|e| LockstepError::VerificationError(e.to_string()))
    }
}

/// Proposal of a block for a height and round
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Propose {
    pub header: Header,
    pub block: Block,
    /// Round of an earlier polka that justifies re-proposing this block
    pub valid_round: Option<Round>,
}

impl Propose {
    pub fn new(height: Height, round: Round, block: Block, valid_round: Option<Round>) -> Self {
        Self {
            header: Header::unsigned(height, round),
            block,
            valid_round,
        }
    }

    /// The proposed block together with the proposer's signature context
    pub fn signed_block(&self) -> SignedBlock {
        SignedBlock::new(self.block.clone(), self.header.signatory, self.header.signature)
    }
}

impl ConsensusMessage for Propose {
    fn header(&self) -> &Header {
        &self.header
    }

    fn header_mut(&mut self) -> &mut Header {
        &mut self.header
    }

    fn kind(&self) -> MessageKind {
        MessageKind::Propose
    }

    fn block_hash(&self) -> Option<Hash> {
        Some(self.block.hash())
    }

    fn extend_signing_payload(&self, payload: &mut Vec<u8>) {
        match self.valid_round {
            Some(round) => {
                payload.push(1);
                payload.extend_from_slice(&round.0.to_le_bytes());
            }
            None => payload.push(0),
        }
    }
}

/// Vote cast in the prevote step
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Prevote {
    pub header: Header,
    /// `None` prevotes nil
    pub block: Option<SignedBlock>,
}

impl Prevote {
    pub fn new(height: Height, round: Round, block: Option<SignedBlock>) -> Self {
        Self {
            header: Header::unsigned(height, round),
            block,
        }
    }
}

impl ConsensusMessage for Prevote {
    fn header(&self) -> &Header {
        &self.header
    }

    fn header_mut(&mut self) -> &mut Header {
        &mut self.header
    }

    fn kind(&self) -> MessageKind {
        MessageKind::Prevote
    }

    fn block_hash(&self) -> Option<Hash> {
        self.block.as_ref().map(SignedBlock::hash)
    }
}

/// Vote cast in the precommit step
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Precommit {
    pub header: Header,
    /// `None` precommits nil
    pub block: Option<SignedBlock>,
}

impl Precommit {
    pub fn new(height: Height, round: Round, block: Option<SignedBlock>) -> Self {
        Self {
            header: Header::unsigned(height, round),
            block,
        }
    }

    /// Precommit stamped with the height and round of the polka it refers to
    pub fn from_polka(polka: Polka) -> Self {
        Self::new(polka.height, polka.round, polka.block)
    }
}

impl ConsensusMessage for Precommit {
    fn header(&self) -> &Header {
        &self.header
    }

    fn header_mut(&mut self) -> &mut Header {
        &mut self.header
    }

    fn kind(&self) -> MessageKind {
        MessageKind::Precommit
    }

    fn block_hash(&self) -> Option<Hash> {
        self.block.as_ref().map(SignedBlock::hash)
    }
}

/// Any consensus message, as exchanged between replicas
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Message {
    Propose(Propose),
    Prevote(Prevote),
    Precommit(Precommit),
}

impl Message {
    pub fn to_bytes(&self) -> LockstepResult<Vec<u8>> {
        Ok(bincode::serialize(self)?)
    }

    pub fn from_bytes(bytes: &[u8]) -> LockstepResult<Self> {
        bincode::deserialize(bytes).map_err(LockstepError::decode)
    }
}

impl ConsensusMessage for Message {
    fn header(&self) -> &Header {
        match self {
            Message::Propose(m) => m.header(),
            Message::Prevote(m) => m.header(),
            Message::Precommit(m) => m.header(),
        }
    }

    fn header_mut(&mut self) -> &mut Header {
        match self {
            Message::Propose(m) => m.header_mut(),
            Message::Prevote(m) => m.header_mut(),
            Message::Precommit(m) => m.header_mut(),
        }
    }

    fn kind(&self) -> MessageKind {
        match self {
            Message::Propose(_) => MessageKind::Propose,
            Message::Prevote(_) => MessageKind::Prevote,
            Message::Precommit(_) => MessageKind::Precommit,
        }
    }

    fn block_hash(&self) -> Option<Hash> {
        match self {
            Message::Propose(m) => m.block_hash(),
            Message::Prevote(m) => m.block_hash(),
            Message::Precommit(m) => m.block_hash(),
        }
    }

    fn extend_signing_payload(&self, payload: &mut Vec<u8>) {
        match self {
            Message::Propose(m) => m.extend_signing_payload(payload),
            Message::Prevote(m) => m.extend_signing_payload(payload),
            Message::Precommit(m) => m.extend_signing_payload(payload),
        }
    }
}

impl From<Propose> for Message {
    fn from(propose: Propose) -> Self {
        Message::Propose(propose)
    }
}

impl From<Prevote> for Message {
    fn from(prevote: Prevote) -> Self {
        Message::Prevote(prevote)
    }
}

impl From<Precommit> for Message {
    fn from(precommit: Precommit) -> Self {
        Message::Precommit(precommit)
    }
}
