//! LOCKSTEP Consensus
//!
//! Decision core of a Tendermint-style BFT protocol:
//! - Signed propose, prevote and precommit messages
//! - Per-height, per-round inboxes and quorum builders
//! - A locking state machine deciding one block per height

pub mod block;
pub mod builder;
pub mod certificate;
pub mod inbox;
pub mod machine;
pub mod message;
pub mod validator;

pub use block::*;
pub use builder::*;
pub use certificate::*;
pub use inbox::*;
pub use machine::*;
pub use message::*;
pub use validator::*;
