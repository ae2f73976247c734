//! Transport-layer collaborators
//!
//! A [`Connector`] is supplied by configuration and knows how to reach an
//! agent once a network address exists. The [`Launcher`] it produces performs
//! the actual agent session handshake. The lifecycle code only calls these
//! traits and never looks inside an implementation.

use crate::session_log::SessionLog;
use std::future::Future;

/// Establishes and tears down one agent session on a reachable host
pub trait Launcher: Send {
    /// Whether this launcher can start a session on demand
    fn supports_launch(&self) -> bool {
        true
    }

    /// Perform the agent session handshake
    fn launch(&mut self, log: &dyn SessionLog) -> impl Future<Output = anyhow::Result<()>> + Send;

    /// Called before the agent is disconnected
    fn before_disconnect(&mut self, _log: &dyn SessionLog) -> impl Future<Output = ()> + Send {
        async {}
    }

    /// Called after the agent has been disconnected
    fn after_disconnect(&mut self, _log: &dyn SessionLog) -> impl Future<Output = ()> + Send {
        async {}
    }
}

/// Factory that turns a network address into a [`Launcher`]
pub trait Connector: Send + Sync {
    type Launcher: Launcher;

    /// Build a launcher bound to `address`
    fn launcher_for(&self, address: &str, log: &dyn SessionLog) -> anyhow::Result<Self::Launcher>;
}
