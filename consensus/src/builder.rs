//! Quorum builders turning individual votes into `Polka` and `Commit` certificates

use lockstep_core::{Hash, Height, Round};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::debug;

use crate::block::SignedBlock;
use crate::certificate::{Commit, Polka};
use crate::inbox::Inbox;
use crate::message::{ConsensusMessage, Precommit, Prevote};

/// A vote for a block or for nil
pub trait BlockVote: ConsensusMessage + Clone + PartialEq {
    fn voted_block(&self) -> Option<&SignedBlock>;
}

impl BlockVote for Prevote {
    fn voted_block(&self) -> Option<&SignedBlock> {
        self.block.as_ref()
    }
}

impl BlockVote for Precommit {
    fn voted_block(&self) -> Option<&SignedBlock> {
        self.block.as_ref()
    }
}

/// Highest quorum among stored votes of one kind
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Quorum {
    /// Highest round where a single block (or nil) gathered the threshold
    pub certified: Option<(Round, Option<SignedBlock>)>,
    /// Highest round where the threshold of votes, for anything, was observed
    pub round: Option<Round>,
}

/// Vote store shared by both builders
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VoteSet<V> {
    votes: Inbox<V>,
}

impl<V: BlockVote> VoteSet<V> {
    pub fn new(f: usize) -> Self {
        Self { votes: Inbox::new(f) }
    }

    /// Store a vote; `false` when the identical vote was already stored
    ///
    /// Any future height or round is accepted and kept until `drop` passes its
    /// height. Callers facing untrusted peers bound how far ahead they insert.
    pub fn insert(&mut self, vote: V) -> bool {
        let (height, round, signatory) = (vote.height(), vote.round(), vote.signatory());
        if self.votes.query_by_height_round_signatory(height, round, &signatory) == Some(&vote) {
            return false;
        }

        let outcome = self.votes.insert(vote);
        if outcome.first_time_exceeding_2f {
            debug!(
                "{} votes at (H,R) = ({}, {}) exceed 2f",
                outcome.count, height, round
            );
        }
        true
    }

    /// Scan the rounds of `height` in ascending order for quorums
    pub fn quorum(&self, height: Height, threshold: usize) -> Quorum {
        let mut quorum = Quorum {
            certified: None,
            round: None,
        };

        for (round, votes) in self.votes.rounds(height) {
            if votes.len() >= threshold {
                quorum.round = Some(round);
            }

            let mut tally: BTreeMap<Option<Hash>, (usize, Option<&SignedBlock>)> = BTreeMap::new();
            for vote in votes.values() {
                let entry = tally
                    .entry(vote.block_hash())
                    .or_insert((0, vote.voted_block()));
                entry.0 += 1;
            }
            // At most one hash can reach a quorum while at most f signatories are faulty
            if let Some((_, block)) = tally.into_values().find(|(count, _)| *count >= threshold) {
                quorum.certified = Some((round, block.cloned()));
            }
        }

        quorum
    }

    pub fn drop(&mut self, height: Height) {
        self.votes.drop(height);
    }
}

/// Aggregates prevotes into polkas
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PolkaBuilder {
    prevotes: VoteSet<Prevote>,
}

impl PolkaBuilder {
    pub fn new(f: usize) -> Self {
        Self {
            prevotes: VoteSet::new(f),
        }
    }

    pub fn insert(&mut self, prevote: Prevote) -> bool {
        self.prevotes.insert(prevote)
    }

    /// Polka of the highest certified round, and the highest round with +2/3 prevotes
    pub fn polka(&self, height: Height, threshold: usize) -> (Option<Polka>, Option<Round>) {
        let quorum = self.prevotes.quorum(height, threshold);
        let polka = quorum
            .certified
            .map(|(round, block)| Polka::new(height, round, block));
        (polka, quorum.round)
    }

    /// Purge every prevote at or below `height`
    pub fn drop(&mut self, height: Height) {
        self.prevotes.drop(height);
    }
}

/// Aggregates precommits into commits
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommitBuilder {
    precommits: VoteSet<Precommit>,
}

impl CommitBuilder {
    pub fn new(f: usize) -> Self {
        Self {
            precommits: VoteSet::new(f),
        }
    }

    pub fn insert(&mut self, precommit: Precommit) -> bool {
        self.precommits.insert(precommit)
    }

    /// Commit of the highest certified round, and the highest round with +2/3 precommits
    pub fn commit(&self, height: Height, threshold: usize) -> (Option<Commit>, Option<Round>) {
        let quorum = self.precommits.quorum(height, threshold);
        let commit = quorum
            .certified
            .map(|(round, block)| Commit::new(Polka::new(height, round, block)));
        (commit, quorum.round)
    }

    /// Purge every precommit at or below `height`
    pub fn drop(&mut self, height: Height) {
        self.precommits.drop(height);
    }
}
