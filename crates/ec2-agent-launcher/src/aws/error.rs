//! AWS error classification
//!
//! Maps SDK errors onto [`ServiceError`] using the `.code()` from
//! `ProvideErrorMetadata` instead of string matching on Debug output.

use aws_sdk_ec2::error::{DisplayErrorContext, ProvideErrorMetadata};
use ec2_agent_common::ServiceError;

/// Known AWS error codes for "not found" conditions
const NOT_FOUND_CODES: &[&str] = &["InvalidInstanceID.NotFound", "InvalidInstanceID.Malformed"];

/// Known AWS error codes for throttling/rate limiting
const THROTTLING_CODES: &[&str] = &["Throttling", "ThrottlingException", "RequestLimitExceeded"];

/// Classify an AWS error by code.
pub fn classify_aws_error(code: Option<&str>, message: Option<&str>, instance_id: &str) -> ServiceError {
    match code {
        Some(c) if NOT_FOUND_CODES.contains(&c) => ServiceError::NotFound {
            instance_id: instance_id.to_string(),
        },
        Some(c) if THROTTLING_CODES.contains(&c) => ServiceError::Throttled,
        _ => ServiceError::Api {
            code: code.map(str::to_string),
            message: message.unwrap_or("Unknown error").to_string(),
        },
    }
}

/// Classify an SDK operation error.
///
/// Dispatch and timeout failures carry no service metadata; their full
/// error chain becomes the message.
pub fn classify_sdk_error<E>(error: &E, instance_id: &str) -> ServiceError
where
    E: ProvideErrorMetadata + std::error::Error,
{
    let message = match error.message() {
        Some(m) => m.to_string(),
        None => DisplayErrorContext(error).to_string(),
    };
    classify_aws_error(error.code(), Some(&message), instance_id)
}

/// Error code to user-friendly suggestion mapping
const SUGGESTIONS: &[(&str, &str)] = &[
    (
        "InsufficientInstanceCapacity",
        "Try a different availability zone or instance type.",
    ),
    (
        "InstanceLimitExceeded",
        "Request a service limit increase via AWS Service Quotas console.",
    ),
    (
        "VcpuLimitExceeded",
        "Request a service limit increase via AWS Service Quotas console.",
    ),
    (
        "IncorrectInstanceState",
        "The instance is changing state; retry the launch once it settles.",
    ),
    (
        "UnauthorizedOperation",
        "Check the IAM permissions of the configured credentials.",
    ),
    (
        "AuthFailure",
        "Check the configured AWS credentials and region.",
    ),
    (
        "InvalidAMIID.NotFound",
        "The configured image does not exist in this region.",
    ),
    (
        "InvalidKeyPair.NotFound",
        "The configured key pair does not exist in this region.",
    ),
];

/// Get a user-friendly suggestion for a known error code.
pub fn suggestion_for_code(code: &str) -> Option<&'static str> {
    SUGGESTIONS
        .iter()
        .find(|(c, _)| *c == code)
        .map(|(_, s)| *s)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn not_found_codes() {
        for code in NOT_FOUND_CODES {
            let err = classify_aws_error(Some(code), Some("some message"), "i-0abc");
            assert_eq!(
                err,
                ServiceError::NotFound {
                    instance_id: "i-0abc".to_string()
                },
                "Expected NotFound for code: {code}"
            );
        }
    }

    #[test]
    fn throttling_codes() {
        for code in THROTTLING_CODES {
            let err = classify_aws_error(Some(code), Some("slow down"), "i-0abc");
            assert!(matches!(err, ServiceError::Throttled));
            assert!(err.is_retryable());
        }
    }

    #[test]
    fn unknown_and_missing_codes() {
        let err = classify_aws_error(Some("IncorrectInstanceState"), Some("stopping"), "i-0abc");
        assert_eq!(err.code(), Some("IncorrectInstanceState"));
        assert!(!err.is_not_found());

        let err = classify_aws_error(None, None, "i-0abc");
        assert_eq!(
            err,
            ServiceError::Api {
                code: None,
                message: "Unknown error".to_string()
            }
        );
    }

    #[test]
    fn suggestions_for_known_codes() {
        for (code, _) in SUGGESTIONS {
            assert!(suggestion_for_code(code).is_some(), "No suggestion for code: {code}");
        }
        assert!(suggestion_for_code("SomeUnknownCode").is_none());
    }
}
