//! AWS-backed instance service
//!
//! - [`context`]: shared SDK configuration
//! - [`ec2`]: `Ec2Client`, the EC2 implementation of `InstanceService`
//! - [`error`]: error-code classification into `ServiceError`

pub mod context;
pub mod ec2;
pub mod error;

pub use context::AwsContext;
pub use ec2::Ec2Client;
pub use error::{classify_aws_error, classify_sdk_error, suggestion_for_code};
