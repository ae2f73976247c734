//! Default configuration values
//!
//! Shared between the persisted configuration and the CLI so both agree.

/// Default AWS region
pub const DEFAULT_REGION: &str = "us-west-1";

/// Default maximum number of state checks per wait
pub const DEFAULT_MAX_RETRIES: u32 = 60;

/// Default interval between state checks, in seconds
pub const DEFAULT_POLL_INTERVAL_SECS: u64 = 10;

/// Default settle delay after an instance reports running, in seconds
pub const DEFAULT_SETTLE_DELAY_SECS: u64 = 60;

/// Security group used when none is configured
pub const DEFAULT_SECURITY_GROUP: &str = "default";

// Serde default functions for struct field defaults

pub fn default_region() -> String {
    DEFAULT_REGION.to_string()
}

pub fn default_max_retries() -> u32 {
    DEFAULT_MAX_RETRIES
}

pub fn default_poll_interval_secs() -> u64 {
    DEFAULT_POLL_INTERVAL_SECS
}

pub fn default_settle_delay_secs() -> u64 {
    DEFAULT_SETTLE_DELAY_SECS
}

pub fn default_security_group() -> String {
    DEFAULT_SECURITY_GROUP.to_string()
}
