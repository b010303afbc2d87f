//! LOCKSTEP Node
//!
//! Everything around the consensus state machine:
//! - Replica driver (authentication, proposals, signing)
//! - In-process network
//! - Timer-driven runtime and local simulation

mod network;
mod replica;
mod runtime;
mod simulation;

pub use network::*;
pub use replica::*;
pub use runtime::*;
pub use simulation::*;
