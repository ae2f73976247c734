//! EC2 integration tests - actually call AWS APIs
//!
//! These tests are marked `#[ignore]` and only run with:
//! ```
//! AWS_PROFILE=your_profile EC2_AGENT_TEST_INSTANCE_ID=i-... \
//!     cargo test --test aws_ec2_integration -- --ignored
//! ```
//!
//! The instance named by `EC2_AGENT_TEST_INSTANCE_ID` is started and stopped;
//! use a disposable one.

use ec2_agent_common::{
    AwsSettings, InstanceIdentity, InstanceService, InstanceState, NodeConfig, PollSettings,
    SessionBuffer, TeardownAction,
};
use ec2_agent_launcher::aws::Ec2Client;
use ec2_agent_launcher::{LifecycleController, TeardownOutcome};
use ec2_agent_test_utils::{get_test_region, test_node_name};
use tokio_util::sync::CancellationToken;

fn test_instance_id() -> String {
    std::env::var("EC2_AGENT_TEST_INSTANCE_ID")
        .expect("EC2_AGENT_TEST_INSTANCE_ID must name a disposable instance")
}

fn settings() -> AwsSettings {
    AwsSettings {
        region: get_test_region(),
        profile: None,
    }
}

/// Describing an id that cannot exist maps to not-found
#[tokio::test]
#[ignore]
async fn test_describe_missing_instance() {
    let client = Ec2Client::new(&settings()).await;

    let err = client
        .describe_instance("i-00000000000000000")
        .await
        .expect_err("Instance should not exist");

    assert!(err.is_not_found(), "Expected not-found, got: {err:?}");
}

/// Full start -> ready -> stop cycle against a real instance
#[tokio::test]
#[ignore]
async fn test_fixed_instance_lifecycle() {
    let config = NodeConfig {
        name: test_node_name(),
        teardown: TeardownAction::Stop,
        aws: settings(),
        instance: InstanceIdentity::Existing {
            instance_id: test_instance_id(),
        },
        polling: PollSettings {
            max_retries: 60,
            poll_interval_secs: 5,
            settle_delay_secs: 0,
        },
    };
    let client = Ec2Client::new(&config.aws).await;
    let mut controller = LifecycleController::new(client, config);
    let log = SessionBuffer::default();

    let ready = controller
        .ensure_running_and_ready(&log, &CancellationToken::new())
        .await
        .expect("Instance should become ready");
    assert!(!ready.address.is_empty());

    let desc = controller
        .service()
        .describe_instance(&ready.instance_id)
        .await
        .expect("Should describe instance");
    assert_eq!(desc.state, InstanceState::Running);

    let outcome = controller.teardown(&log).await;
    assert!(
        matches!(outcome, TeardownOutcome::Stopped(_)),
        "Unexpected teardown outcome: {outcome:?}"
    );
}
