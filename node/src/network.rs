//! In-process message hub connecting the replicas of a simulation

use async_trait::async_trait;
use dashmap::DashMap;
use lockstep_consensus::Message;
use lockstep_core::{LockstepResult, Signatory};
use tokio::sync::mpsc;
use tracing::debug;

/// Outbound side of a replica's transport
#[async_trait]
pub trait Broadcaster: Send + Sync {
    /// Send a message to every registered replica, the sender included
    async fn broadcast(&self, message: &Message) -> LockstepResult<()>;
}

/// Encoded messages delivered to one replica
pub type Inbound = mpsc::UnboundedReceiver<Vec<u8>>;

/// Fully connected, lossless network living in one process
#[derive(Default)]
pub struct LocalNetwork {
    peers: DashMap<Signatory, mpsc::UnboundedSender<Vec<u8>>>,
}

impl LocalNetwork {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a replica and return the receiving end of its channel
    pub fn register(&self, signatory: Signatory) -> Inbound {
        let (tx, rx) = mpsc::unbounded_channel();
        self.peers.insert(signatory, tx);
        rx
    }

    pub fn peer_count(&self) -> usize {
        self.peers.len()
    }
}

#[async_trait]
impl Broadcaster for LocalNetwork {
    async fn broadcast(&self, message: &Message) -> LockstepResult<()> {
        let bytes = message.to_bytes()?;
        for peer in self.peers.iter() {
            if peer.value().send(bytes.clone()).is_err() {
                debug!("dropping message for stopped replica {}", peer.key());
            }
        }
        Ok(())
    }
}
