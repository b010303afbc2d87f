//! Replica driver wrapping a single consensus state machine
//!
//! The driver authenticates inbound messages, buffers proposals until the
//! machine reaches their round, signs the machine's actions and proposes
//! blocks when this replica is the round's proposer.

use lockstep_consensus::{
    Action, Block, Commit, ConsensusMessage, Inbox, LocalValidator, Machine, Message, Propose,
    SharedValidatorSet, State, Transition,
};
use lockstep_core::{
    ConsensusConfig, Hash, Hashable, Height, LockstepResult, LookaheadConfig, Round, Signatory,
};
use parking_lot::Mutex;
use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Where a replica currently is; used to rearm its timer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct View {
    pub height: Height,
    pub round: Round,
    pub state: State,
}

/// One validator's machine plus everything needed to drive it
pub struct Replica {
    local: LocalValidator,
    validators: SharedValidatorSet,
    machine: Machine,
    proposals: Inbox<Propose>,
    decisions: Vec<Commit>,
    last_decided: Hash,
    /// Last `(height, round)` this replica proposed in
    proposed: Option<(Height, Round)>,
    /// Last `(height, round)` this replica prevoted in
    prevoted: Option<(Height, Round)>,
    /// Every `(height, round)` precommitted in at undecided heights
    precommitted: BTreeSet<(Height, Round)>,
    lookahead: LookaheadConfig,
}

/// Replica shared between its runtime task and observers
pub type SharedReplica = Arc<Mutex<Replica>>;

impl Replica {
    pub fn new(
        local: LocalValidator,
        validators: SharedValidatorSet,
        config: &ConsensusConfig,
        lookahead: LookaheadConfig,
    ) -> Self {
        Self {
            local,
            validators,
            machine: Machine::new(config),
            proposals: Inbox::new(config.fault_tolerance),
            decisions: Vec::new(),
            last_decided: Hash::ZERO,
            proposed: None,
            prevoted: None,
            precommitted: BTreeSet::new(),
            lookahead,
        }
    }

    pub fn signatory(&self) -> Signatory {
        self.local.signatory()
    }

    pub fn view(&self) -> View {
        View {
            height: self.machine.height(),
            round: self.machine.round(),
            state: self.machine.state(),
        }
    }

    pub fn height(&self) -> Height {
        self.machine.height()
    }

    /// Every non-nil commit this replica decided, in height order
    pub fn decisions(&self) -> &[Commit] {
        &self.decisions
    }

    /// Propose if this replica leads the first round
    pub fn start(&mut self) -> LockstepResult<Vec<Message>> {
        let mut outgoing = Vec::new();
        self.step(&mut outgoing)?;
        Ok(outgoing)
    }

    /// Authenticate and route one inbound message
    pub fn handle_message(&mut self, message: Message) -> LockstepResult<Vec<Message>> {
        let mut outgoing = Vec::new();
        let current = (self.machine.height(), self.machine.round());
        if !self.lookahead.admits(current, (message.height(), message.round())) {
            debug!(
                "dropping {} from {} at (H,R) = ({}, {}): too far ahead",
                message.kind().as_str(),
                message.signatory(),
                message.height(),
                message.round()
            );
            return Ok(outgoing);
        }
        self.validators.authenticate(&message)?;

        match message {
            Message::Propose(propose) => {
                let expected = self.validators.proposer(propose.height(), propose.round());
                if expected != Some(propose.signatory()) {
                    warn!(
                        "ignoring proposal from {} at (H,R) = ({}, {}): not the proposer",
                        propose.signatory(),
                        propose.height(),
                        propose.round()
                    );
                    return Ok(outgoing);
                }
                if propose.height() >= self.machine.height() {
                    self.proposals.insert(propose);
                }
            }
            Message::Prevote(prevote) => {
                let action = self.machine.transition(Transition::PreVoted(prevote));
                self.apply(action, &mut outgoing)?;
            }
            Message::Precommit(precommit) => {
                let action = self.machine.transition(Transition::PreCommitted(precommit));
                self.apply(action, &mut outgoing)?;
            }
        }

        self.step(&mut outgoing)?;
        Ok(outgoing)
    }

    /// Deliver an expired timer to the machine
    pub fn handle_timeout(&mut self) -> LockstepResult<Vec<Message>> {
        let view = self.view();
        debug!(
            "timeout while {:?} at (H,R) = ({}, {})",
            view.state, view.height, view.round
        );

        let mut outgoing = Vec::new();
        let action = self.machine.transition(Transition::TimedOut);
        self.apply(action, &mut outgoing)?;
        self.step(&mut outgoing)?;
        Ok(outgoing)
    }

    /// Propose and feed buffered proposals until the machine stops waiting for one
    fn step(&mut self, outgoing: &mut Vec<Message>) -> LockstepResult<()> {
        loop {
            let view = self.view();
            if view.state != State::WaitingForPropose || self.prevoted == Some((view.height, view.round)) {
                return Ok(());
            }
            let Some(proposer) = self.validators.proposer(view.height, view.round) else {
                return Ok(());
            };

            if proposer == self.signatory() && self.proposed != Some((view.height, view.round)) {
                outgoing.push(self.propose(view.height, view.round)?);
            }

            let Some(propose) = self
                .proposals
                .query_by_height_round_signatory(view.height, view.round, &proposer)
            else {
                return Ok(());
            };
            let transition = Transition::Proposed {
                block: propose.signed_block(),
                round: view.round,
            };

            let action = self.machine.transition(transition);
            self.apply(action, outgoing)?;
        }
    }

    /// Build and sign a proposal, re-proposing the locked block if there is one
    fn propose(&mut self, height: Height, round: Round) -> LockstepResult<Message> {
        let (block, valid_round) = match self.machine.lock() {
            Some(lock) => (lock.block.block.clone(), Some(lock.round)),
            None => {
                let payload = format!("height {} proposed by {}", height, self.signatory()).into_bytes();
                (Block::new(height, self.last_decided, payload), None)
            }
        };

        info!(
            "proposing block {} at (H,R) = ({}, {})",
            block.hash(),
            height,
            round
        );
        self.proposed = Some((height, round));
        let propose = self.local.sign(Propose::new(height, round, block, valid_round))?;

        // The proposer hears its own proposal like any other replica
        self.proposals.insert(propose.clone());
        Ok(propose.into())
    }

    fn apply(&mut self, action: Option<Action>, outgoing: &mut Vec<Message>) -> LockstepResult<()> {
        match action {
            None => {}
            Some(Action::PreVote(pre_vote)) => {
                self.prevoted = Some((pre_vote.height, pre_vote.round));
                let prevote = self.local.sign(pre_vote.into_message())?;
                outgoing.push(prevote.into());
            }
            Some(Action::PreCommit(pre_commit)) => {
                // A precommit carries the round of its polka, which can be an
                // earlier round this replica already precommitted in
                let stamp = (pre_commit.polka.height, pre_commit.polka.round);
                if !self.precommitted.insert(stamp) {
                    debug!(
                        "already precommitted at (H,R) = ({}, {}), not signing again",
                        stamp.0, stamp.1
                    );
                    return Ok(());
                }
                let precommit = self.local.sign(pre_commit.into_message())?;
                outgoing.push(precommit.into());
            }
            Some(Action::Commit(commit)) => match commit.block() {
                Some(block) => {
                    info!(
                        "replica {} committed block {} at height {}",
                        self.signatory(),
                        block.hash(),
                        commit.height()
                    );
                    self.last_decided = block.hash();
                    self.proposals.drop(commit.height());
                    self.precommitted.retain(|(height, _)| *height > commit.height());
                    self.decisions.push(commit);
                }
                None => {
                    debug!("starting round {} at height {}", commit.round(), commit.height());
                }
            },
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lockstep_consensus::{Precommit, Prevote, SignedBlock, ValidatorInfo, ValidatorSet};
    use lockstep_crypto::derivation::MasterKey;
    use lockstep_crypto::keys::KeyPair;
    use std::collections::VecDeque;

    fn signers(n: usize) -> Vec<LocalValidator> {
        MasterKey::from_phrase("replica tests")
            .unwrap()
            .derive_validators(n)
            .unwrap()
            .into_iter()
            .map(LocalValidator::new)
            .collect()
    }

    fn signer(signers: &[LocalValidator], signatory: Signatory) -> &LocalValidator {
        signers.iter().find(|s| s.signatory() == signatory).unwrap()
    }

    fn replicas(n: usize) -> Vec<Replica> {
        let locals = signers(n);
        let infos: Vec<ValidatorInfo> = locals.iter().map(LocalValidator::to_validator_info).collect();
        let validators = Arc::new(ValidatorSet::with_validators(infos));
        let config = validators.consensus_config(Height::new(0));

        locals
            .into_iter()
            .map(|local| Replica::new(local, validators.clone(), &config, LookaheadConfig::default()))
            .collect()
    }

    /// Deliver every message to every replica, dropping messages at or above `until`
    fn deliver(replicas: &mut [Replica], mut queue: VecDeque<Message>, until: Height) {
        while let Some(message) = queue.pop_front() {
            if message.height() >= until {
                continue;
            }
            for replica in replicas.iter_mut() {
                queue.extend(replica.handle_message(message.clone()).unwrap());
            }
        }
    }

    fn start(replicas: &mut [Replica]) -> VecDeque<Message> {
        let mut queue = VecDeque::new();
        for replica in replicas.iter_mut() {
            queue.extend(replica.start().unwrap());
        }
        queue
    }

    fn decided_hashes(replica: &Replica) -> Vec<Hash> {
        replica
            .decisions()
            .iter()
            .filter_map(|commit| commit.block().map(Hashable::hash))
            .collect()
    }

    #[test]
    fn test_replicas_decide_the_same_blocks() {
        let mut replicas = replicas(4);
        let queue = start(&mut replicas);

        deliver(&mut replicas, queue, Height::new(3));

        let reference = decided_hashes(&replicas[0]);
        assert_eq!(reference.len(), 3);
        for replica in &replicas {
            assert_eq!(replica.height(), Height::new(3));
            assert_eq!(decided_hashes(replica), reference);
        }
    }

    #[test]
    fn test_blocks_chain_to_previous_decision() {
        let mut replicas = replicas(4);
        let queue = start(&mut replicas);
        deliver(&mut replicas, queue, Height::new(2));

        let decisions = replicas[0].decisions();
        assert_eq!(decisions.len(), 2);
        let first = decisions[0].block().unwrap();
        let second = decisions[1].block().unwrap();
        assert_eq!(first.block.parent, Hash::ZERO);
        assert_eq!(second.block.parent, first.hash());
        assert_eq!(second.height(), Height::new(1));
    }

    #[test]
    fn test_rejects_unknown_signatory() {
        let mut replicas = replicas(4);
        let outsider = LocalValidator::new(KeyPair::generate());
        let vote = outsider
            .sign(Prevote::new(Height::new(0), Round::ZERO, None))
            .unwrap();

        assert!(replicas[0].handle_message(vote.into()).is_err());
    }

    #[test]
    fn test_ignores_proposal_from_wrong_proposer() {
        let mut replicas = replicas(4);
        let view = replicas[0].view();
        let proposer = replicas[0].validators.proposer(view.height, view.round).unwrap();
        let index = replicas.iter().position(|r| r.signatory() != proposer).unwrap();

        let block = Block::new(Height::new(0), Hash::ZERO, b"rogue".to_vec());
        let rogue = replicas[index]
            .local
            .sign(Propose::new(Height::new(0), Round::ZERO, block, None))
            .unwrap();

        let receiver = (index + 1) % replicas.len();
        let outgoing = replicas[receiver].handle_message(rogue.into()).unwrap();
        assert!(outgoing.is_empty());
        assert_eq!(replicas[receiver].view().state, State::WaitingForPropose);
    }

    #[test]
    fn test_missing_proposer_leads_to_next_round() {
        let mut replicas = replicas(4);
        let view = replicas[0].view();
        let proposer = replicas[0].validators.proposer(view.height, view.round).unwrap();
        replicas.retain(|r| r.signatory() != proposer);

        // Everyone gives up on the silent proposer at once
        let mut queue = VecDeque::new();
        for replica in replicas.iter_mut() {
            queue.extend(replica.handle_timeout().unwrap());
        }
        deliver(&mut replicas, queue, Height::new(1));

        for replica in &replicas {
            let decisions = replica.decisions();
            assert_eq!(decisions.len(), 1);
            assert_eq!(decisions[0].round(), Round::new(1));
        }
    }

    #[test]
    fn test_late_polka_does_not_produce_second_precommit() {
        let mut replicas = replicas(4);
        let signers = signers(4);
        let h0 = Height::new(0);
        let first = replicas[0].validators.proposer(h0, Round::ZERO).unwrap();
        let second = replicas[0].validators.proposer(h0, Round::new(1)).unwrap();
        let index = replicas
            .iter()
            .position(|r| r.signatory() != first && r.signatory() != second)
            .unwrap();
        let mut replica = replicas.swap_remove(index);
        let other = replicas
            .iter()
            .map(Replica::signatory)
            .find(|s| *s != first && *s != second)
            .unwrap();

        let prevote = |who: Signatory, round: u64, block: Option<&SignedBlock>| -> Message {
            signer(&signers, who)
                .sign(Prevote::new(h0, Round::new(round), block.cloned()))
                .unwrap()
                .into()
        };
        let precommit = |who: Signatory, round: u64| -> Message {
            signer(&signers, who)
                .sign(Precommit::new(h0, Round::new(round), None))
                .unwrap()
                .into()
        };

        let mut sent = Vec::new();
        let proposal = signer(&signers, first)
            .sign(Propose::new(h0, Round::ZERO, Block::new(h0, Hash::ZERO, b"a".to_vec()), None))
            .unwrap();
        let a = proposal.signed_block();
        sent.extend(replica.handle_message(proposal.into()).unwrap());
        assert_eq!(sent.len(), 1);

        // Two prevotes for A and one nil: no polka, so the timeout precommits nil
        let own = sent[0].clone();
        for message in [own, prevote(first, 0, Some(&a)), prevote(other, 0, None)] {
            sent.extend(replica.handle_message(message).unwrap());
        }
        sent.extend(replica.handle_timeout().unwrap());

        // A late prevote completes a polka for A at round 0
        sent.extend(replica.handle_message(prevote(second, 0, Some(&a))).unwrap());
        for who in [first, second, other] {
            sent.extend(replica.handle_message(precommit(who, 0)).unwrap());
        }
        assert_eq!(replica.view().round, Round::new(1));

        // Round 1 has no proposal and split prevotes
        sent.extend(replica.handle_timeout().unwrap());
        let b = signer(&signers, other)
            .sign(Propose::new(h0, Round::new(1), Block::new(h0, Hash::ZERO, b"b".to_vec()), None))
            .unwrap()
            .signed_block();
        let own = prevote(replica.signatory(), 1, None);
        for message in [own, prevote(first, 1, Some(&a)), prevote(other, 1, Some(&b))] {
            sent.extend(replica.handle_message(message).unwrap());
        }
        sent.extend(replica.handle_timeout().unwrap());

        let precommits: Vec<(Height, Round, Option<Hash>)> = sent
            .iter()
            .filter_map(|message| match message {
                Message::Precommit(precommit) => Some((
                    precommit.height(),
                    precommit.round(),
                    precommit.block_hash(),
                )),
                _ => None,
            })
            .collect();
        assert_eq!(precommits, vec![(h0, Round::ZERO, None)]);
        assert_eq!(replica.view().state, State::WaitingForCommit);
    }

    #[test]
    fn test_drops_messages_beyond_lookahead() {
        let mut replicas = replicas(4);
        let signers = signers(4);
        let lookahead = LookaheadConfig::default();
        let validators = replicas[0].validators.clone();

        let propose_at = |height: Height| {
            let proposer = validators.proposer(height, Round::ZERO).unwrap();
            let block = Block::new(height, Hash::ZERO, b"ahead".to_vec());
            let proposal = signer(&signers, proposer)
                .sign(Propose::new(height, Round::ZERO, block, None))
                .unwrap();
            (proposer, proposal)
        };

        let (proposer, far) = propose_at(Height::new(lookahead.max_heights + 1));
        let receiver = replicas.iter().position(|r| r.signatory() != proposer).unwrap();
        assert!(replicas[receiver].handle_message(far.into()).unwrap().is_empty());
        assert!(replicas[receiver].proposals.is_empty());

        let (proposer, near) = propose_at(Height::new(lookahead.max_heights));
        let receiver = replicas.iter().position(|r| r.signatory() != proposer).unwrap();
        replicas[receiver].handle_message(near.into()).unwrap();
        assert!(!replicas[receiver].proposals.is_empty());

        // A quorum of prevotes too many rounds ahead cannot pull the replica forward
        let far_round = Round::new(lookahead.max_rounds + 1);
        for local in &signers[..3] {
            let vote = local.sign(Prevote::new(Height::new(0), far_round, None)).unwrap();
            assert!(replicas[0].handle_message(vote.into()).unwrap().is_empty());
        }
        assert_eq!(replicas[0].view().round, Round::ZERO);
    }
}
