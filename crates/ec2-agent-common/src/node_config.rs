//! Persisted node configuration
//!
//! A [`NodeConfig`] is loaded once (usually from TOML) and is safe to
//! serialize back out. It never holds runtime session data; that lives in the
//! launcher crate's controller and session types.
//!
//! ```toml
//! name = "linux-builder"
//! teardown = "stop"
//!
//! [aws]
//! region = "us-west-1"
//!
//! [instance]
//! mode = "image"
//! image_id = "ami-0123456789abcdef0"
//! instance_type = "c7i.large"
//! key_name = "ci"
//!
//! [polling]
//! max_retries = 60
//! poll_interval_secs = 10
//! settle_delay_secs = 60
//! ```

use crate::defaults::{
    default_max_retries, default_poll_interval_secs, default_region, default_security_group,
    default_settle_delay_secs,
};
use crate::error::ConfigError;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Configuration for one EC2-backed CI node
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, garde::Validate)]
#[serde(deny_unknown_fields)]
pub struct NodeConfig {
    /// CI node name, used for tagging created instances
    #[garde(length(min = 1))]
    pub name: String,

    /// What to do with the instance when the agent disconnects
    #[serde(default)]
    #[garde(skip)]
    pub teardown: TeardownAction,

    /// AWS connection settings
    #[serde(default)]
    #[garde(dive)]
    pub aws: AwsSettings,

    /// Which instance backs this node
    #[garde(dive)]
    pub instance: InstanceIdentity,

    /// Wait tuning
    #[serde(default)]
    #[garde(dive)]
    pub polling: PollSettings,
}

/// AWS connection settings. Credentials come from the standard provider chain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, garde::Validate)]
#[serde(deny_unknown_fields)]
pub struct AwsSettings {
    #[serde(default = "default_region")]
    #[garde(length(min = 1))]
    pub region: String,

    /// Named profile (overrides default credential resolution)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[garde(skip)]
    pub profile: Option<String>,
}

impl Default for AwsSettings {
    fn default() -> Self {
        Self {
            region: default_region(),
            profile: None,
        }
    }
}

/// Either a fixed instance or parameters for creating one from an image
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, garde::Validate)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum InstanceIdentity {
    /// Bind to an instance that already exists
    Existing {
        #[garde(length(min = 1))]
        instance_id: String,
    },
    /// Create an instance from a machine image on first launch
    Image(#[garde(dive)] ImageLaunchParams),
}

impl InstanceIdentity {
    /// The configured instance id in fixed-id mode
    pub fn existing_instance_id(&self) -> Option<&str> {
        match self {
            Self::Existing { instance_id } => Some(instance_id),
            Self::Image(_) => None,
        }
    }

    pub fn is_image(&self) -> bool {
        matches!(self, Self::Image(_))
    }

    fn normalize(&mut self) {
        match self {
            Self::Existing { instance_id } => trim_in_place(instance_id),
            Self::Image(params) => params.normalize(),
        }
    }
}

/// Machine-image launch parameters
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, garde::Validate)]
pub struct ImageLaunchParams {
    /// AMI id
    #[garde(length(min = 1))]
    pub image_id: String,

    /// EC2 instance type (e.g., "c7i.large")
    #[garde(length(min = 1))]
    pub instance_type: String,

    /// Key pair installed on the instance
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[garde(skip)]
    pub key_name: Option<String>,

    /// Security group name
    #[serde(default = "default_security_group")]
    #[garde(length(min = 1))]
    pub security_group: String,

    /// Availability zone; the API picks one when absent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[garde(skip)]
    pub availability_zone: Option<String>,
}

impl ImageLaunchParams {
    fn normalize(&mut self) {
        trim_in_place(&mut self.image_id);
        trim_in_place(&mut self.instance_type);
        trim_in_place(&mut self.security_group);
        trim_optional(&mut self.key_name);
        trim_optional(&mut self.availability_zone);
    }
}

/// Wait tuning for state polling
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, garde::Validate)]
#[serde(deny_unknown_fields)]
pub struct PollSettings {
    /// Maximum number of state checks per wait
    #[serde(default = "default_max_retries")]
    #[garde(range(min = 1))]
    pub max_retries: u32,

    /// Seconds between state checks
    #[serde(default = "default_poll_interval_secs")]
    #[garde(skip)]
    pub poll_interval_secs: u64,

    /// Seconds to hold after the instance first reports running
    #[serde(default = "default_settle_delay_secs")]
    #[garde(skip)]
    pub settle_delay_secs: u64,
}

impl Default for PollSettings {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            poll_interval_secs: default_poll_interval_secs(),
            settle_delay_secs: default_settle_delay_secs(),
        }
    }
}

impl PollSettings {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }

    pub fn settle_delay(&self) -> Duration {
        Duration::from_secs(self.settle_delay_secs)
    }
}

/// What teardown does with the instance
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, strum::Display,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum TeardownAction {
    /// Stop the instance so the next launch can start it again
    #[default]
    Stop,
    /// Terminate the instance; the next launch creates a new one from the image
    Terminate,
}

impl NodeConfig {
    /// Load configuration from a TOML file
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::io(path.display().to_string(), e))?;
        Self::from_toml_str(&content)
    }

    /// Parse, normalize and validate configuration from a TOML string
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let mut config: NodeConfig = toml::from_str(content)?;
        config.normalize();
        config.check()?;
        Ok(config)
    }

    /// Validate field rules and cross-field constraints
    pub fn check(&self) -> Result<(), ConfigError> {
        garde::Validate::validate(self).map_err(|report| ConfigError::Invalid(report.to_string()))?;

        if self.teardown == TeardownAction::Terminate && !self.instance.is_image() {
            return Err(ConfigError::TerminateRequiresImage);
        }
        Ok(())
    }

    /// Trim whitespace from identifiers
    pub fn normalize(&mut self) {
        trim_in_place(&mut self.name);
        trim_in_place(&mut self.aws.region);
        trim_optional(&mut self.aws.profile);
        self.instance.normalize();
    }
}

fn trim_in_place(value: &mut String) {
    let trimmed = value.trim();
    if trimmed.len() != value.len() {
        *value = trimmed.to_string();
    }
}

fn trim_optional(value: &mut Option<String>) {
    if let Some(v) = value {
        trim_in_place(v);
        if v.is_empty() {
            *value = None;
        }
    }
}
