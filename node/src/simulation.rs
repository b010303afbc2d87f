//! Local multi-validator simulation
//!
//! Spawns one replica task per validator over a [`LocalNetwork`] and waits
//! until every replica reaches the configured target height.

use lockstep_consensus::{LocalValidator, ValidatorInfo, ValidatorSet};
use lockstep_core::{Hash, Hashable, Height, LockstepError, LockstepResult, NodeConfig};
use lockstep_crypto::derivation::MasterKey;
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use crate::network::{Inbound, LocalNetwork};
use crate::replica::{Replica, SharedReplica};
use crate::runtime::run_replica;

const POLL_INTERVAL: Duration = Duration::from_millis(20);

/// Outcome of a simulation run
#[derive(Debug, Clone)]
pub struct SimulationReport {
    /// Decided block hashes per replica, in height order
    pub decisions: Vec<Vec<Hash>>,
    /// Whether every replica reached the target height in time
    pub completed: bool,
}

impl SimulationReport {
    /// No two replicas decided different blocks at the same height
    pub fn agreed(&self) -> bool {
        self.decisions.iter().all(|decided| {
            self.decisions
                .iter()
                .all(|other| decided.iter().zip(other).all(|(a, b)| a == b))
        })
    }

    /// Number of heights decided by every replica
    pub fn common_heights(&self) -> usize {
        self.decisions.iter().map(Vec::len).min().unwrap_or(0)
    }
}

/// N replicas sharing one in-process network
pub struct Simulation {
    config: NodeConfig,
    network: Arc<LocalNetwork>,
    replicas: Vec<(SharedReplica, Inbound)>,
}

impl Simulation {
    pub fn new(config: NodeConfig) -> LockstepResult<Self> {
        config.consensus.validate(config.validators)?;

        let keys = MasterKey::from_phrase(&config.seed_phrase)?.derive_validators(config.validators)?;
        let locals: Vec<LocalValidator> = keys.into_iter().map(LocalValidator::new).collect();
        let infos: Vec<ValidatorInfo> = locals.iter().map(LocalValidator::to_validator_info).collect();
        let validators = Arc::new(ValidatorSet::with_validators(infos));

        let network = Arc::new(LocalNetwork::new());
        let replicas = locals
            .into_iter()
            .map(|local| {
                let inbound = network.register(local.signatory());
                let replica = Replica::new(
                    local,
                    validators.clone(),
                    &config.consensus,
                    config.lookahead.clone(),
                );
                (Arc::new(Mutex::new(replica)), inbound)
            })
            .collect();

        Ok(Self {
            config,
            network,
            replicas,
        })
    }

    /// Run until every replica reaches the target height or the run times out
    pub async fn run(self) -> LockstepResult<SimulationReport> {
        let target = Height::new(self.config.target_height);
        info!(
            "simulating {} validators (f = {}) up to height {}",
            self.config.validators, self.config.consensus.fault_tolerance, target
        );

        let mut shared = Vec::with_capacity(self.replicas.len());
        let mut handles: Vec<JoinHandle<LockstepResult<()>>> = Vec::with_capacity(self.replicas.len());
        for (replica, inbound) in self.replicas {
            shared.push(replica.clone());
            handles.push(tokio::spawn(run_replica(
                replica,
                self.network.clone(),
                inbound,
                self.config.timeouts.clone(),
            )));
        }

        let max_run = Duration::from_secs(self.config.max_run_secs);
        let completed = tokio::time::timeout(max_run, wait_for_height(&shared, target))
            .await
            .is_ok();
        if !completed {
            warn!("simulation stopped after {:?} before reaching height {}", max_run, target);
        }

        for handle in &handles {
            handle.abort();
        }
        for handle in handles {
            match handle.await {
                Ok(Err(e)) => error!("replica failed: {}", e),
                Err(e) if !e.is_cancelled() => {
                    return Err(LockstepError::Internal(format!("replica task panicked: {}", e)))
                }
                _ => {}
            }
        }

        let decisions: Vec<Vec<Hash>> = shared
            .iter()
            .map(|replica| {
                replica
                    .lock()
                    .decisions()
                    .iter()
                    .filter_map(|commit| commit.block().map(Hashable::hash))
                    .collect::<Vec<Hash>>()
            })
            .collect();

        Ok(SimulationReport {
            decisions,
            completed,
        })
    }
}

async fn wait_for_height(replicas: &[SharedReplica], target: Height) {
    let mut interval = tokio::time::interval(POLL_INTERVAL);
    loop {
        interval.tick().await;
        if replicas.iter().all(|replica| replica.lock().height() >= target) {
            return;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lockstep_core::TimeoutConfig;

    fn config(validators: usize, target_height: u64) -> NodeConfig {
        NodeConfig {
            target_height,
            max_run_secs: 20,
            timeouts: TimeoutConfig {
                base_timeout_ms: 200,
                timeout_increment_ms: 100,
            },
            ..NodeConfig::default()
        }
        .with_validators(validators)
    }

    #[tokio::test]
    async fn test_four_validators_agree() {
        let report = Simulation::new(config(4, 3)).unwrap().run().await.unwrap();

        assert!(report.completed);
        assert!(report.agreed());
        assert!(report.common_heights() >= 3);
    }

    #[tokio::test]
    async fn test_single_validator_decides_alone() {
        let report = Simulation::new(config(1, 2)).unwrap().run().await.unwrap();

        assert!(report.completed);
        assert_eq!(report.decisions.len(), 1);
        assert!(report.common_heights() >= 2);
    }

    #[test]
    fn test_rejects_inconsistent_config() {
        let mut config = config(4, 1);
        config.consensus.fault_tolerance = 2;

        assert!(Simulation::new(config).is_err());
    }

    #[test]
    fn test_report_detects_disagreement() {
        let a = Hash::from_bytes([1; 32]);
        let b = Hash::from_bytes([2; 32]);

        let agreeing = SimulationReport {
            decisions: vec![vec![a, b], vec![a]],
            completed: false,
        };
        assert!(agreeing.agreed());
        assert_eq!(agreeing.common_heights(), 1);

        let forked = SimulationReport {
            decisions: vec![vec![a], vec![b]],
            completed: true,
        };
        assert!(!forked.agreed());
    }
}
