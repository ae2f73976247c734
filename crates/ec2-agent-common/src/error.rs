//! Configuration errors
//!
//! Typed errors for loading, validating and changing a [`NodeConfig`](crate::NodeConfig).

use thiserror::Error;

/// Configuration loading and validation errors
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Failed to read the configuration file
    #[error("Failed to read config file '{path}': {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    /// Failed to parse TOML
    #[error("Failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    /// Field-level validation failed
    #[error("Invalid configuration: {0}")]
    Invalid(String),

    /// Terminate-on-teardown was configured for an existing instance
    #[error("teardown action 'terminate' is only allowed when launching from an image")]
    TerminateRequiresImage,

    /// Attempted to change instance configuration while the instance is running
    #[error("You cannot change '{field}' while instance {instance_id} is running")]
    ChangeWhileRunning {
        field: &'static str,
        instance_id: String,
    },

    /// AWS settings are bound to the service client when the controller is built
    #[error("AWS settings cannot be changed on a live controller; build a new one")]
    AwsSettingsChanged,
}

impl ConfigError {
    /// Create an IO error with path context
    pub fn io(path: impl Into<String>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}
