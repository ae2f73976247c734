//! ec2-agent-common - Shared types and collaborator contracts
//!
//! This crate holds everything the lifecycle controller needs to know about
//! its collaborators without pulling in the AWS SDK:
//!
//! ## Modules
//!
//! - [`defaults`]: Default configuration values
//! - [`error`]: Configuration errors
//! - [`instance`]: Cloud instance state and description
//! - [`launcher`]: `Connector` / `Launcher` traits for the transport layer
//! - [`node_config`]: Persisted node configuration (TOML)
//! - [`service`]: The `InstanceService` trait and its error type
//! - [`session_log`]: Per-session operator log stream
//! - [`tags`]: Tag constants applied to instances created from images

pub mod defaults;
pub mod error;
pub mod instance;
pub mod launcher;
pub mod node_config;
pub mod service;
pub mod session_log;
pub mod tags;

pub use error::ConfigError;
pub use instance::{InstanceDescription, InstanceState};
pub use launcher::{Connector, Launcher};
pub use node_config::{
    AwsSettings, ImageLaunchParams, InstanceIdentity, NodeConfig, PollSettings, TeardownAction,
};
pub use service::{InstanceService, ServiceError};
pub use session_log::{SessionBuffer, SessionLog};
