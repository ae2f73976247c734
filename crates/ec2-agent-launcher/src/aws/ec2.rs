//! EC2 implementation of the instance service

use super::context::AwsContext;
use super::error::classify_sdk_error;
use aws_sdk_ec2::Client;
use aws_sdk_ec2::types::{
    InstanceStateChange, InstanceStateName, InstanceType, Placement, ResourceType, Tag,
    TagSpecification,
};
use chrono::Utc;
use ec2_agent_common::tags::{self, TAG_CREATED_AT, TAG_NODE, TAG_TOOL, TAG_TOOL_VALUE};
use ec2_agent_common::{
    AwsSettings, ImageLaunchParams, InstanceDescription, InstanceService, InstanceState,
    ServiceError,
};
use tracing::{debug, info};

/// EC2 client for one node's instance
pub struct Ec2Client {
    pub(crate) client: Client,
}

impl Ec2Client {
    /// Create a new EC2 client (loads AWS config from environment)
    pub async fn new(settings: &AwsSettings) -> Self {
        let ctx = AwsContext::new(settings).await;
        Self::from_context(&ctx)
    }

    /// Create an EC2 client from a pre-loaded AWS context
    pub fn from_context(ctx: &AwsContext) -> Self {
        Self {
            client: ctx.ec2_client(),
        }
    }
}

/// Map an SDK state name onto the crate's state enum
pub(crate) fn state_from_sdk(name: &InstanceStateName) -> InstanceState {
    match name {
        InstanceStateName::Pending => InstanceState::Pending,
        InstanceStateName::Running => InstanceState::Running,
        InstanceStateName::ShuttingDown => InstanceState::ShuttingDown,
        InstanceStateName::Stopping => InstanceState::Stopping,
        InstanceStateName::Stopped => InstanceState::Stopped,
        InstanceStateName::Terminated => InstanceState::Terminated,
        other => InstanceState::from_name(other.as_str()),
    }
}

/// Current state from a start/stop/terminate response
fn current_state(changes: &[InstanceStateChange]) -> Option<InstanceState> {
    changes
        .first()
        .and_then(|c| c.current_state())
        .and_then(|s| s.name())
        .map(state_from_sdk)
}

/// Treat empty strings as absent; EC2 reports "" for unassigned DNS names
fn non_empty(value: Option<&str>) -> Option<String> {
    value.filter(|v| !v.is_empty()).map(str::to_string)
}

impl InstanceService for Ec2Client {
    async fn describe_instance(
        &self,
        instance_id: &str,
    ) -> Result<InstanceDescription, ServiceError> {
        let response = self
            .client
            .describe_instances()
            .instance_ids(instance_id)
            .send()
            .await
            .map_err(|e| classify_sdk_error(&e, instance_id))?;

        let instance = response
            .reservations()
            .first()
            .and_then(|r| r.instances().first())
            .ok_or_else(|| ServiceError::NotFound {
                instance_id: instance_id.to_string(),
            })?;

        let state = instance
            .state()
            .and_then(|s| s.name())
            .map(state_from_sdk)
            .ok_or_else(|| {
                ServiceError::MalformedResponse(format!("instance {instance_id} has no state"))
            })?;

        let public_address = non_empty(instance.public_dns_name())
            .or_else(|| non_empty(instance.public_ip_address()));

        debug!(instance_id = %instance_id, state = %state, public_address = ?public_address, "Described instance");

        Ok(InstanceDescription {
            instance_id: instance_id.to_string(),
            state,
            public_address,
        })
    }

    async fn create_instance(
        &self,
        params: &ImageLaunchParams,
        node_name: &str,
    ) -> Result<String, ServiceError> {
        info!(
            image_id = %params.image_id,
            instance_type = %params.instance_type,
            security_group = %params.security_group,
            availability_zone = ?params.availability_zone,
            "Launching instance from image"
        );

        let created_at = tags::format_created_at(Utc::now());
        let mut request = self
            .client
            .run_instances()
            .image_id(&params.image_id)
            .instance_type(InstanceType::from(params.instance_type.as_str()))
            .min_count(1)
            .max_count(1)
            .security_groups(&params.security_group)
            .tag_specifications(
                TagSpecification::builder()
                    .resource_type(ResourceType::Instance)
                    .tags(Tag::builder().key("Name").value(tags::instance_name(node_name)).build())
                    .tags(Tag::builder().key(TAG_TOOL).value(TAG_TOOL_VALUE).build())
                    .tags(Tag::builder().key(TAG_NODE).value(node_name).build())
                    .tags(Tag::builder().key(TAG_CREATED_AT).value(&created_at).build())
                    .build(),
            );

        if let Some(key_name) = &params.key_name {
            request = request.key_name(key_name);
        }

        if let Some(zone) = &params.availability_zone {
            request = request.placement(Placement::builder().availability_zone(zone).build());
        }

        let response = request
            .send()
            .await
            .map_err(|e| classify_sdk_error(&e, ""))?;

        let instance_id = response
            .instances()
            .first()
            .and_then(|i| i.instance_id())
            .ok_or_else(|| ServiceError::MalformedResponse("no instance ID returned".to_string()))?
            .to_string();

        info!(instance_id = %instance_id, "Instance launched");
        Ok(instance_id)
    }

    async fn start_instance(&self, instance_id: &str) -> Result<InstanceState, ServiceError> {
        let response = self
            .client
            .start_instances()
            .instance_ids(instance_id)
            .send()
            .await
            .map_err(|e| classify_sdk_error(&e, instance_id))?;

        Ok(current_state(response.starting_instances()).unwrap_or(InstanceState::Pending))
    }

    async fn stop_instance(&self, instance_id: &str) -> Result<InstanceState, ServiceError> {
        let response = self
            .client
            .stop_instances()
            .instance_ids(instance_id)
            .send()
            .await
            .map_err(|e| classify_sdk_error(&e, instance_id))?;

        Ok(current_state(response.stopping_instances()).unwrap_or(InstanceState::Stopping))
    }

    async fn terminate_instance(&self, instance_id: &str) -> Result<InstanceState, ServiceError> {
        let response = self
            .client
            .terminate_instances()
            .instance_ids(instance_id)
            .send()
            .await
            .map_err(|e| classify_sdk_error(&e, instance_id))?;

        Ok(current_state(response.terminating_instances()).unwrap_or(InstanceState::ShuttingDown))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn maps_sdk_states() {
        assert_eq!(state_from_sdk(&InstanceStateName::Pending), InstanceState::Pending);
        assert_eq!(state_from_sdk(&InstanceStateName::Running), InstanceState::Running);
        assert_eq!(
            state_from_sdk(&InstanceStateName::ShuttingDown),
            InstanceState::ShuttingDown
        );
        assert_eq!(state_from_sdk(&InstanceStateName::Stopped), InstanceState::Stopped);
        assert_eq!(
            state_from_sdk(&InstanceStateName::from("hibernating")),
            InstanceState::Unknown("hibernating".to_string())
        );
    }

    #[test]
    fn empty_addresses_are_absent() {
        assert_eq!(non_empty(Some("")), None);
        assert_eq!(non_empty(None), None);
        assert_eq!(
            non_empty(Some("203.0.113.10")).as_deref(),
            Some("203.0.113.10")
        );
    }
}
