//! Propose → prevote → precommit state machine
//!
//! The machine is driven by [`Transition`]s and answers each one with at most
//! one [`Action`]. It never performs I/O: timers, signing and broadcasting
//! belong to the caller, which must also serialize all calls into one machine.

use lockstep_core::{ConsensusConfig, Hashable, Height, Round};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::block::SignedBlock;
use crate::builder::{CommitBuilder, PolkaBuilder};
use crate::certificate::{Commit, Polka};
use crate::message::{ConsensusMessage, Precommit, Prevote};

/// Step of the current round
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum State {
    WaitingForPropose,
    WaitingForPolka,
    WaitingForCommit,
}

/// Inbound event
#[derive(Debug, Clone)]
pub enum Transition {
    /// A proposal for `round` arrived from the round's proposer
    Proposed { block: SignedBlock, round: Round },
    PreVoted(Prevote),
    PreCommitted(Precommit),
    /// The caller's timer for the current step expired
    TimedOut,
}

/// Prevote the caller should sign and broadcast
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PreVote {
    pub height: Height,
    pub round: Round,
    pub block: Option<SignedBlock>,
}

impl PreVote {
    pub fn into_message(self) -> Prevote {
        Prevote::new(self.height, self.round, self.block)
    }
}

/// Precommit the caller should sign and broadcast
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PreCommit {
    pub polka: Polka,
}

impl PreCommit {
    pub fn into_message(self) -> Precommit {
        Precommit::from_polka(self.polka)
    }
}

/// Outbound result of a transition
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    PreVote(PreVote),
    PreCommit(PreCommit),
    /// A decided height, or a nil commit marking the start of the next round
    Commit(Commit),
}

/// Block this replica is locked on, and the round it was locked in
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Lock {
    pub round: Round,
    pub block: SignedBlock,
}

/// Consensus state machine of a single replica
#[derive(Debug, Clone)]
pub struct Machine {
    state: State,
    height: Height,
    round: Round,
    lock: Option<Lock>,

    polka_builder: PolkaBuilder,
    commit_builder: CommitBuilder,
    consensus_threshold: usize,
}

impl Machine {
    pub fn new(config: &ConsensusConfig) -> Self {
        Self::with_builders(
            config.start_height,
            PolkaBuilder::new(config.fault_tolerance),
            CommitBuilder::new(config.fault_tolerance),
            config.consensus_threshold,
        )
    }

    /// Start at `height` with builders that may already hold buffered votes
    pub fn with_builders(
        height: Height,
        polka_builder: PolkaBuilder,
        commit_builder: CommitBuilder,
        consensus_threshold: usize,
    ) -> Self {
        Self {
            state: State::WaitingForPropose,
            height,
            round: Round::ZERO,
            lock: None,
            polka_builder,
            commit_builder,
            consensus_threshold,
        }
    }

    pub fn state(&self) -> State {
        self.state
    }

    pub fn height(&self) -> Height {
        self.height
    }

    pub fn round(&self) -> Round {
        self.round
    }

    pub fn lock(&self) -> Option<&Lock> {
        self.lock.as_ref()
    }

    /// Buffer a prevote without running a transition
    pub fn insert_prevote(&mut self, prevote: Prevote) -> bool {
        if prevote.height() < self.height {
            return false;
        }
        self.polka_builder.insert(prevote)
    }

    /// Buffer a precommit without running a transition
    pub fn insert_precommit(&mut self, precommit: Precommit) -> bool {
        if precommit.height() < self.height {
            return false;
        }
        self.commit_builder.insert(precommit)
    }

    /// Fast-forward past a height decided elsewhere
    pub fn sync_commit(&mut self, commit: &Commit) {
        if commit.height() > self.height {
            info!(
                "syncing to height {} from commit at (H,R) = ({}, {})",
                commit.height().next(),
                commit.height(),
                commit.round()
            );
            self.enter_height(commit.height());
        }
    }

    /// Purge buffered votes at or below the current height
    pub fn drop(&mut self) {
        debug!("dropping votes at or below height {}", self.height);
        self.polka_builder.drop(self.height);
        self.commit_builder.drop(self.height);
    }

    pub fn transition(&mut self, transition: Transition) -> Option<Action> {
        debug!(
            "{} while {:?} at (H,R) = ({}, {})",
            transition.name(),
            self.state,
            self.height,
            self.round
        );
        match self.state {
            State::WaitingForPropose => self.wait_for_propose(transition),
            State::WaitingForPolka => self.wait_for_polka(transition),
            State::WaitingForCommit => self.wait_for_commit(transition),
        }
    }

    fn wait_for_propose(&mut self, transition: Transition) -> Option<Action> {
        match transition {
            Transition::Proposed { block, round } => {
                debug!(
                    "waiting for polka after propose at (H,R) = ({}, {})",
                    block.height(),
                    round
                );
                self.state = State::WaitingForPolka;
                return Some(self.pre_vote(Some(&block)));
            }
            Transition::PreVoted(prevote) => {
                self.insert_prevote(prevote);
            }
            Transition::PreCommitted(precommit) => {
                self.insert_precommit(precommit);
            }
            Transition::TimedOut => {
                debug!("waiting for polka after propose timeout");
                self.state = State::WaitingForPolka;
                return Some(self.pre_vote(None));
            }
        }

        self.check_common_exit_conditions()
    }

    fn wait_for_polka(&mut self, transition: Transition) -> Option<Action> {
        match transition {
            Transition::Proposed { .. } => {}
            Transition::PreVoted(prevote) => {
                if !self.insert_prevote(prevote) {
                    return None;
                }

                let (polka, _) = self.polka();
                if polka.is_some_and(|polka| polka.round == self.round) {
                    debug!(
                        "waiting for commit after polka at (H,R) = ({}, {})",
                        self.height, self.round
                    );
                    self.state = State::WaitingForCommit;
                    return Some(self.pre_commit());
                }
            }
            Transition::PreCommitted(precommit) => {
                if !self.insert_precommit(precommit) {
                    return None;
                }
            }
            Transition::TimedOut => {
                let (_, pre_voting_round) = self.polka();
                pre_voting_round?;

                debug!("waiting for commit after prevote timeout");
                self.state = State::WaitingForCommit;
                return Some(self.pre_commit());
            }
        }

        self.check_common_exit_conditions()
    }

    fn wait_for_commit(&mut self, transition: Transition) -> Option<Action> {
        match transition {
            Transition::Proposed { .. } => {}
            Transition::PreVoted(prevote) => {
                self.insert_prevote(prevote);
            }
            Transition::PreCommitted(precommit) => {
                if !self.insert_precommit(precommit) {
                    return None;
                }

                let (commit, _) = self.commit();
                if commit.is_some_and(|commit| commit.is_nil() && commit.round() == self.round) {
                    return Some(self.next_round());
                }
            }
            Transition::TimedOut => {
                let (_, pre_committing_round) = self.commit();
                pre_committing_round?;

                return Some(self.next_round());
            }
        }

        self.check_common_exit_conditions()
    }

    /// Prevote the locked block, else the proposed block, else nil
    fn pre_vote(&mut self, proposed: Option<&SignedBlock>) -> Action {
        let (polka, _) = self.polka();

        // A polka newer than the lock releases it
        let released = match (&self.lock, &polka) {
            (Some(lock), Some(polka)) if lock.round < polka.round => Some((lock.round, polka.round)),
            _ => None,
        };
        if let Some((locked, round)) = released {
            info!("unlocking from round {} after polka at round {}", locked, round);
            self.lock = None;
        }

        let block = match (&self.lock, proposed) {
            (Some(lock), _) => Some(lock.block.clone()),
            (None, Some(block)) if block.height() == self.height => Some(block.clone()),
            _ => None,
        };

        Action::PreVote(PreVote {
            height: self.height,
            round: self.round,
            block,
        })
    }

    /// Precommit the current polka, relocking on it when it is for a block
    fn pre_commit(&mut self) -> Action {
        let (polka, _) = self.polka();

        let polka = match polka {
            Some(polka) => {
                match &polka.block {
                    Some(block) => {
                        info!("locking on block {} at round {}", block.hash(), polka.round);
                        self.lock = Some(Lock {
                            round: polka.round,
                            block: block.clone(),
                        });
                    }
                    None => {
                        if self.lock.take().is_some() {
                            info!("unlocking after nil polka at round {}", polka.round);
                        }
                    }
                }
                polka
            }
            // No polka: precommit nil, keep the lock unchanged
            None => Polka::nil(self.height, self.round),
        };

        Action::PreCommit(PreCommit { polka })
    }

    fn check_common_exit_conditions(&mut self) -> Option<Action> {
        let (commit, pre_committing_round) = self.commit();
        if let Some(commit) = commit.filter(|commit| !commit.is_nil()) {
            info!(
                "decided height {} at round {}",
                commit.height(),
                commit.round()
            );
            self.enter_height(commit.height());
            return Some(Action::Commit(commit));
        }

        let (_, pre_voting_round) = self.polka();
        if let Some(round) = pre_voting_round.filter(|round| *round > self.round) {
            // +2/3 prevotes at a later round pull this replica forward
            info!("jumping to round {} after prevotes", round);
            self.round = round;
            return Some(self.pre_vote(None));
        }

        if let Some(round) = pre_committing_round.filter(|round| *round > self.round) {
            info!("jumping to round {} after precommits", round);
            self.state = State::WaitingForCommit;
            self.round = round;
            return Some(self.pre_commit());
        }

        None
    }

    /// Abandon the current round after a nil commit
    fn next_round(&mut self) -> Action {
        self.state = State::WaitingForPropose;
        self.round = self.round.next();
        info!("moving to round {} at height {}", self.round, self.height);
        Action::Commit(Commit::nil(self.height, self.round))
    }

    /// Move past `decided`, releasing the lock and the votes of decided heights
    fn enter_height(&mut self, decided: Height) {
        self.state = State::WaitingForPropose;
        self.height = decided.next();
        self.round = Round::ZERO;
        self.lock = None;
        self.polka_builder.drop(decided);
        self.commit_builder.drop(decided);
    }

    fn polka(&self) -> (Option<Polka>, Option<Round>) {
        self.polka_builder.polka(self.height, self.consensus_threshold)
    }

    fn commit(&self) -> (Option<Commit>, Option<Round>) {
        self.commit_builder.commit(self.height, self.consensus_threshold)
    }
}

impl Transition {
    fn name(&self) -> &'static str {
        match self {
            Transition::Proposed { .. } => "proposed",
            Transition::PreVoted(_) => "prevoted",
            Transition::PreCommitted(_) => "precommitted",
            Transition::TimedOut => "timed out",
        }
    }
}
