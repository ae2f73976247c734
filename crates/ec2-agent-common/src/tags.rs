//! Tags applied to instances created from a machine image
//!
//! | Tag Key | Description |
//! |---------|-------------|
//! | `Name` | `ec2-agent-<node>` |
//! | `ec2-agent:tool` | Static identifier ("ec2-agent") |
//! | `ec2-agent:node` | CI node the instance serves |
//! | `ec2-agent:created-at` | RFC 3339 creation timestamp |

/// Tag key for tool identification
pub const TAG_TOOL: &str = "ec2-agent:tool";

/// Tag value for tool identification
pub const TAG_TOOL_VALUE: &str = "ec2-agent";

/// Tag key for the owning CI node
pub const TAG_NODE: &str = "ec2-agent:node";

/// Tag key for creation timestamp (RFC 3339 format)
pub const TAG_CREATED_AT: &str = "ec2-agent:created-at";

/// Helper to format creation timestamp for tags
pub fn format_created_at(time: chrono::DateTime<chrono::Utc>) -> String {
    time.to_rfc3339()
}

/// `Name` tag value for a node's instance
pub fn instance_name(node_name: &str) -> String {
    format!("ec2-agent-{node_name}")
}
