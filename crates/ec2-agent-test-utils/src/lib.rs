//! Shared test utilities for ec2-agent
//!
//! ## Modules
//!
//! - [`aws`]: AWS region detection for integration tests
//! - [`config`]: Node configurations with instant polling
//! - [`fake`]: Scripted [`InstanceService`](ec2_agent_common::InstanceService)
//! - [`journal`]: Cross-component call ordering
//! - [`launcher`]: Recording `Connector` / `Launcher` stubs

pub mod aws;
pub mod config;
pub mod fake;
pub mod journal;
pub mod launcher;

pub use aws::{get_test_region, test_node_name};
pub use config::{TEST_IMAGE_ID, fixed_config, image_config, instant_polling};
pub use fake::{CallCounts, FakeInstanceService, TEST_ADDRESS, TEST_INSTANCE_ID};
pub use journal::Journal;
pub use launcher::{RecordingConnector, RecordingLauncher};
