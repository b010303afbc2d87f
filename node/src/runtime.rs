//! Async event loop driving one replica

use lockstep_consensus::Message;
use lockstep_core::{LockstepResult, TimeoutConfig};
use std::sync::Arc;
use tokio::time::{sleep_until, Instant};
use tracing::{debug, info, warn};

use crate::network::{Broadcaster, Inbound};
use crate::replica::SharedReplica;

enum Event {
    Received(Vec<u8>),
    TimedOut,
}

/// Run a replica until its inbound channel closes
///
/// Messages and timer expiries are handled one at a time; the replica lock is
/// never held across an await point.
pub async fn run_replica<B: Broadcaster + ?Sized>(
    replica: SharedReplica,
    network: Arc<B>,
    mut inbound: Inbound,
    timeouts: TimeoutConfig,
) -> LockstepResult<()> {
    let signatory = replica.lock().signatory();
    info!("starting replica {}", signatory);

    let outgoing = replica.lock().start()?;
    broadcast_all(network.as_ref(), outgoing).await?;

    let mut view = replica.lock().view();
    let mut deadline = Instant::now() + timeouts.timeout_for(view.round);

    loop {
        let event = tokio::select! {
            received = inbound.recv() => match received {
                Some(bytes) => Event::Received(bytes),
                None => break,
            },
            _ = sleep_until(deadline) => Event::TimedOut,
        };

        let result = match event {
            Event::Received(bytes) => match Message::from_bytes(&bytes) {
                Ok(message) => replica.lock().handle_message(message),
                Err(e) => {
                    warn!("replica {} dropped undecodable message: {}", signatory, e);
                    continue;
                }
            },
            Event::TimedOut => {
                deadline = Instant::now() + timeouts.timeout_for(view.round);
                replica.lock().handle_timeout()
            }
        };

        match result {
            Ok(outgoing) => broadcast_all(network.as_ref(), outgoing).await?,
            Err(e) => warn!("replica {} rejected message: {}", signatory, e),
        }

        let current = replica.lock().view();
        if current != view {
            view = current;
            deadline = Instant::now() + timeouts.timeout_for(view.round);
        }
    }

    debug!("replica {} stopped", signatory);
    Ok(())
}

async fn broadcast_all<B: Broadcaster + ?Sized>(network: &B, messages: Vec<Message>) -> LockstepResult<()> {
    for message in &messages {
        network.broadcast(message).await?;
    }
    Ok(())
}
