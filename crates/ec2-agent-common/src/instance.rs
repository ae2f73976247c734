//! Cloud instance state as reported by the instance service
//!
//! The state is owned by the cloud provider. The controller only ever looks at
//! the most recent observation and never caches it across calls.

use std::fmt;

/// Lifecycle state of a cloud instance.
///
/// Names match the EC2 API (`shutting-down`, `stopped`, ...). Anything the
/// API reports that is not listed here lands in [`InstanceState::Unknown`],
/// which callers must treat as unexpected.
#[derive(Debug, Clone, PartialEq, Eq, Hash, strum::EnumString, strum::AsRefStr)]
#[strum(serialize_all = "kebab-case", ascii_case_insensitive)]
pub enum InstanceState {
    Pending,
    Running,
    ShuttingDown,
    Stopping,
    Stopped,
    Terminated,
    /// A state name this crate does not recognize
    #[strum(default)]
    Unknown(String),
}

impl InstanceState {
    /// Parse an API state name. Never fails; unrecognized names map to `Unknown`.
    pub fn from_name(name: &str) -> Self {
        name.parse()
            .unwrap_or_else(|_| InstanceState::Unknown(name.to_string()))
    }

    /// States that resolve on their own and are worth waiting through
    pub fn is_transitional(&self) -> bool {
        matches!(self, Self::Pending | Self::Stopping)
    }
}

impl fmt::Display for InstanceState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unknown(name) => write!(f, "{name}"),
            known => f.write_str(known.as_ref()),
        }
    }
}

/// One observation of an instance from a describe call
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstanceDescription {
    pub instance_id: String,
    pub state: InstanceState,
    /// Public DNS name, or public IP when no DNS name is assigned
    pub public_address: Option<String>,
}
