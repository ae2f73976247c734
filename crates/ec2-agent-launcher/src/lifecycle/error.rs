//! Lifecycle failure taxonomy

use ec2_agent_common::{InstanceState, ServiceError};
use thiserror::Error;

/// Why bringing up or waiting on an instance failed
#[derive(Debug, Error)]
pub enum LifecycleError {
    /// The instance reported a state that will not resolve toward the goal
    #[error("Instance {instance_id} encountered unexpected state [{state}] while waiting for [{goal}]")]
    UnexpectedState {
        instance_id: String,
        state: InstanceState,
        goal: InstanceState,
    },

    /// A fixed instance was destroyed outside this controller
    #[error("Instance {instance_id} is terminated and cannot be restarted")]
    InstanceTerminated { instance_id: String },

    /// The retry budget ran out before the goal was reached
    #[error("Maximum number of retries {max_retries} exceeded waiting for instance {instance_id} to reach [{goal}]")]
    RetriesExhausted {
        instance_id: String,
        goal: InstanceState,
        max_retries: u32,
    },

    /// The wait was aborted from outside
    #[error("Wait for instance {instance_id} cancelled")]
    Cancelled { instance_id: String },

    /// The instance does not exist
    #[error("Instance {instance_id} not found")]
    InstanceNotFound { instance_id: String },

    /// A cloud API call failed
    #[error("Failed to {operation} instance: {source}")]
    Service {
        operation: &'static str,
        instance_id: Option<String>,
        #[source]
        source: ServiceError,
    },
}

impl LifecycleError {
    /// Cancellation is an outcome, not a failure worth alerting on
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled { .. })
    }

    pub(crate) fn service(
        operation: &'static str,
        instance_id: Option<&str>,
        source: ServiceError,
    ) -> Self {
        Self::Service {
            operation,
            instance_id: instance_id.map(str::to_string),
            source,
        }
    }
}
