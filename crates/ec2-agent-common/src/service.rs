//! Cloud instance service contract
//!
//! The lifecycle controller drives exactly these operations. The EC2-backed
//! implementation lives in `ec2-agent-launcher`; tests substitute a scripted
//! fake.

use crate::instance::{InstanceDescription, InstanceState};
use crate::node_config::ImageLaunchParams;
use std::future::Future;
use thiserror::Error;

/// Errors reported by an [`InstanceService`]
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ServiceError {
    /// The instance does not exist (domain error, never retried)
    #[error("Instance '{instance_id}' not found")]
    NotFound { instance_id: String },

    /// Rate limit exceeded
    #[error("Rate limit exceeded")]
    Throttled,

    /// Any other API failure: network, auth, capacity, ...
    #[error("API error: {message}")]
    Api {
        code: Option<String>,
        message: String,
    },

    /// The API answered but the response lacked required data
    #[error("Malformed response: {0}")]
    MalformedResponse(String),
}

impl ServiceError {
    /// Check if this is a "not found" error
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }

    /// Check if this error may clear up by itself
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Throttled | Self::Api { .. })
    }

    /// The API error code, when the service supplied one
    pub fn code(&self) -> Option<&str> {
        match self {
            Self::Api { code, .. } => code.as_deref(),
            _ => None,
        }
    }
}

/// Operations against a cloud compute API for a single instance.
///
/// Each call may fail with a transient [`ServiceError`]. Mutating calls
/// (`create`, `start`, `stop`, `terminate`) are never retried by callers, so
/// implementations should not retry them either.
pub trait InstanceService: Send + Sync {
    /// Describe an instance's current state and public address
    fn describe_instance(
        &self,
        instance_id: &str,
    ) -> impl Future<Output = Result<InstanceDescription, ServiceError>> + Send;

    /// Create an instance from a machine image, returning its id
    fn create_instance(
        &self,
        params: &ImageLaunchParams,
        node_name: &str,
    ) -> impl Future<Output = Result<String, ServiceError>> + Send;

    /// Request a start; returns the state reported right after the request
    fn start_instance(
        &self,
        instance_id: &str,
    ) -> impl Future<Output = Result<InstanceState, ServiceError>> + Send;

    /// Request a stop; returns the state reported right after the request
    fn stop_instance(
        &self,
        instance_id: &str,
    ) -> impl Future<Output = Result<InstanceState, ServiceError>> + Send;

    /// Request termination; returns the state reported right after the request
    fn terminate_instance(
        &self,
        instance_id: &str,
    ) -> impl Future<Output = Result<InstanceState, ServiceError>> + Send;
}
