//! Per-height, per-round collection of signed messages
//!
//! An inbox holds one message kind. Messages are keyed by
//! height → round → signatory; a later message from the same signatory at the
//! same height and round replaces the earlier one.

use lockstep_core::{Hash, Height, LockstepError, LockstepResult, Round, Signatory};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::message::ConsensusMessage;

type RoundMessages<M> = BTreeMap<Signatory, M>;

/// What an insertion changed at the message's height and round
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct InsertOutcome {
    /// Distinct signatories after the insert
    pub count: usize,
    /// The first message at this height and round
    pub first_time: bool,
    /// The count just reached `f + 1`
    pub first_time_exceeding_f: bool,
    /// The count just reached `2f + 1`
    pub first_time_exceeding_2f: bool,
}

/// Deduplicating message store
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Inbox<M> {
    f: usize,
    messages: BTreeMap<Height, BTreeMap<Round, RoundMessages<M>>>,
}

impl<M: ConsensusMessage> Inbox<M> {
    /// Create an inbox tolerating `f` faulty signatories
    pub fn new(f: usize) -> Self {
        Self {
            f,
            messages: BTreeMap::new(),
        }
    }

    pub fn f(&self) -> usize {
        self.f
    }

    /// Store a message, replacing any earlier one from the same signatory
    pub fn insert(&mut self, message: M) -> InsertOutcome {
        let round_messages = self
            .messages
            .entry(message.height())
            .or_default()
            .entry(message.round())
            .or_default();

        let previous = round_messages.len();
        round_messages.insert(message.signatory(), message);
        let count = round_messages.len();

        InsertOutcome {
            count,
            first_time: previous == 0 && count == 1,
            first_time_exceeding_f: previous < self.f + 1 && count > self.f,
            first_time_exceeding_2f: previous < 2 * self.f + 1 && count > 2 * self.f,
        }
    }

    /// Number of signatories whose message at `(height, round)` references `block_hash`
    pub fn query_by_height_round_block_hash(
        &self,
        height: Height,
        round: Round,
        block_hash: Option<Hash>,
    ) -> usize {
        self.round_messages(height, round)
            .map(|messages| {
                messages
                    .values()
                    .filter(|message| message.block_hash() == block_hash)
                    .count()
            })
            .unwrap_or(0)
    }

    pub fn query_by_height_round_signatory(
        &self,
        height: Height,
        round: Round,
        signatory: &Signatory,
    ) -> Option<&M> {
        self.round_messages(height, round)
            .and_then(|messages| messages.get(signatory))
    }

    /// Number of distinct signatories at `(height, round)`
    pub fn query_by_height_round(&self, height: Height, round: Round) -> usize {
        self.round_messages(height, round)
            .map(BTreeMap::len)
            .unwrap_or(0)
    }

    /// Messages at a height, grouped by round in ascending round order
    pub fn rounds(&self, height: Height) -> impl Iterator<Item = (Round, &RoundMessages<M>)> {
        self.messages
            .get(&height)
            .into_iter()
            .flat_map(|rounds| rounds.iter().map(|(round, messages)| (*round, messages)))
    }

    /// Purge every message at or below `height`
    pub fn drop(&mut self, height: Height) {
        self.messages.retain(|h, _| *h > height);
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    fn round_messages(&self, height: Height, round: Round) -> Option<&RoundMessages<M>> {
        self.messages.get(&height).and_then(|rounds| rounds.get(&round))
    }
}

impl<M: ConsensusMessage + Serialize + DeserializeOwned> Inbox<M> {
    pub fn to_bytes(&self) -> LockstepResult<Vec<u8>> {
        Ok(bincode::serialize(self)?)
    }

    pub fn from_bytes(bytes: &[u8]) -> LockstepResult<Self> {
        bincode::deserialize(bytes).map_err(LockstepError::decode)
    }
}
