//! Side effects a scaling decision can trigger.

use std::time::Duration;

use async_trait::async_trait;
use error_stack::Report;

pub mod dry_run;
pub mod cluster;

pub use dry_run::DryRunActions;
pub use cluster::KubeNodeActions;

#[derive(Debug, thiserror::Error)]
pub enum ActionError {
    #[error("Failed to add {count} node(s) to group {group}")]
    AddNodesFailed { group: String, count: u32 },
    #[error("Failed to cordon node {node}")]
    CordonFailed { node: String },
    #[error("Failed to uncordon node {node}")]
    UncordonFailed { node: String },
    #[error("Failed to drain node {node}")]
    DrainFailed { node: String },
    #[error("Node {node} still runs {remaining} pod(s) after the drain grace period")]
    DrainTimedOut { node: String, remaining: usize },
    #[error("Failed to terminate node {node}")]
    TerminateFailed { node: String },
    #[error("{action} is not supported by this backend")]
    Unsupported { action: &'static str },
}

/// Capability the scan loop needs from the infrastructure to change the size
/// of a node group. Each call may fail on its own and is retried by the next
/// tick, never within the same one.
#[async_trait]
pub trait ScalingActions: Send + Sync {
    /// Requests `count` additional nodes for `group`.
    async fn add_nodes(&self, group: &str, count: u32) -> Result<(), Report<ActionError>>;

    /// Marks the node unschedulable without touching running pods.
    async fn cordon_node(&self, node: &str) -> Result<(), Report<ActionError>>;

    /// Reverts a cordon after an aborted scale-down.
    async fn uncordon_node(&self, node: &str) -> Result<(), Report<ActionError>>;

    /// Evicts running workloads, giving them at most `grace_period`.
    async fn drain_node(&self, node: &str, grace_period: Duration)
        -> Result<(), Report<ActionError>>;

    async fn terminate_node(&self, node: &str) -> Result<(), Report<ActionError>>;
}
