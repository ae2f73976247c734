//! Launch errors
//!
//! Separates failures that happen before an address exists (lifecycle) from
//! failures in the transport layer, so callers can tell a never-ready
//! instance apart from an agent that would not come up.

use crate::lifecycle::LifecycleError;
use thiserror::Error;

/// Why a delegated launch failed
#[derive(Debug, Error)]
pub enum LaunchError {
    /// The instance never became ready; the connector was not invoked
    #[error(transparent)]
    Lifecycle(#[from] LifecycleError),

    /// The connector could not produce a launcher for the address
    #[error("Failed to connect to {address}")]
    Connector {
        address: String,
        #[source]
        source: anyhow::Error,
    },

    /// An earlier session has not been disconnected yet
    #[error("A session on {address} is still live; disconnect it before launching again")]
    SessionActive { address: String },

    /// The launcher's own handshake failed
    #[error("Agent launch failed")]
    Launcher(#[source] anyhow::Error),
}

impl LaunchError {
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Lifecycle(e) if e.is_cancelled())
    }
}
