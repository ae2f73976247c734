//! Node configurations tuned for fast tests
//!
//! Both helpers use a zero poll interval and no settle delay so scripted
//! waits finish immediately.

use crate::fake::TEST_INSTANCE_ID;
use ec2_agent_common::{
    AwsSettings, ImageLaunchParams, InstanceIdentity, NodeConfig, PollSettings, TeardownAction,
};

/// Image id used by [`image_config`]
pub const TEST_IMAGE_ID: &str = "ami-0123456789abcdef0";

/// Polling with no delays and the given budget
pub fn instant_polling(max_retries: u32) -> PollSettings {
    PollSettings {
        max_retries,
        poll_interval_secs: 0,
        settle_delay_secs: 0,
    }
}

/// A node bound to [`TEST_INSTANCE_ID`]
pub fn fixed_config() -> NodeConfig {
    NodeConfig {
        name: "test-node".to_string(),
        teardown: TeardownAction::Stop,
        aws: AwsSettings::default(),
        instance: InstanceIdentity::Existing {
            instance_id: TEST_INSTANCE_ID.to_string(),
        },
        polling: instant_polling(10),
    }
}

/// A node that launches from [`TEST_IMAGE_ID`]
pub fn image_config() -> NodeConfig {
    NodeConfig {
        instance: InstanceIdentity::Image(ImageLaunchParams {
            image_id: TEST_IMAGE_ID.to_string(),
            instance_type: "t3.micro".to_string(),
            key_name: Some("ci".to_string()),
            security_group: "default".to_string(),
            availability_zone: None,
        }),
        ..fixed_config()
    }
}
