//! Instance lifecycle controller
//!
//! Brings the node's instance to a ready state before a session and stops it
//! afterwards. See [`LifecycleController`].

mod controller;
mod error;

pub use controller::{LifecycleController, TeardownOutcome};
pub use error::LifecycleError;

/// A running instance with a reachable address
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReadyInstance {
    pub instance_id: String,
    pub address: String,
}
