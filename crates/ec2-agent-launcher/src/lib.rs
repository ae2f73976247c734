//! ec2-agent-launcher - binds a CI agent's lifecycle to an EC2 instance
//!
//! Before an agent session starts, the node's instance is created or started
//! and polled until it is running with a public address. The address is
//! then handed to a configured [`Connector`](ec2_agent_common::Connector).
//! When the agent disconnects, the instance is stopped (or terminated).

pub mod aws;
pub mod connector;
pub mod delegate;
pub mod error;
pub mod lifecycle;
pub mod wait;

pub use connector::{CommandConnector, CommandLauncher};
pub use delegate::LauncherDelegate;
pub use error::LaunchError;
pub use lifecycle::{LifecycleController, LifecycleError, ReadyInstance, TeardownOutcome};
pub use wait::PollConfig;
