//! Shared AWS configuration context

use aws_config::{BehaviorVersion, Region, SdkConfig};
use ec2_agent_common::AwsSettings;
use std::sync::Arc;

/// Loaded AWS SDK configuration for one region and credential profile.
#[derive(Clone)]
pub struct AwsContext {
    config: Arc<SdkConfig>,
    region: String,
}

impl AwsContext {
    /// Load AWS configuration for the given settings.
    ///
    /// Credentials come from the environment, config files, or IAM roles; a
    /// configured profile overrides `AWS_PROFILE`.
    pub async fn new(settings: &AwsSettings) -> Self {
        let mut loader = aws_config::defaults(BehaviorVersion::latest())
            .region(Region::new(settings.region.clone()));
        if let Some(profile) = &settings.profile {
            loader = loader.profile_name(profile);
        }

        Self {
            config: Arc::new(loader.load().await),
            region: settings.region.clone(),
        }
    }

    pub fn sdk_config(&self) -> &SdkConfig {
        &self.config
    }

    pub fn region(&self) -> &str {
        &self.region
    }

    /// Create an EC2 client from this context.
    pub fn ec2_client(&self) -> aws_sdk_ec2::Client {
        aws_sdk_ec2::Client::new(self.sdk_config())
    }
}

impl std::fmt::Debug for AwsContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AwsContext")
            .field("region", &self.region)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    #[ignore = "requires AWS credentials"]
    async fn test_context_creation() {
        let settings = AwsSettings {
            region: "us-west-1".to_string(),
            profile: None,
        };
        let ctx = AwsContext::new(&settings).await;
        assert_eq!(ctx.region(), "us-west-1");
    }
}
