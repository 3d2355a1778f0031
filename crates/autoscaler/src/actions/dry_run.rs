use std::time::Duration;

use async_trait::async_trait;
use error_stack::Report;
use tracing::info;

use super::ActionError;
use super::ScalingActions;

/// Logs every action and reports success without touching the cluster.
#[derive(Debug, Default, Clone, Copy)]
pub struct DryRunActions;

#[async_trait]
impl ScalingActions for DryRunActions {
    async fn add_nodes(&self, group: &str, count: u32) -> Result<(), Report<ActionError>> {
        info!(group, count, "[dry-run] would add nodes");
        Ok(())
    }

    async fn cordon_node(&self, node: &str) -> Result<(), Report<ActionError>> {
        info!(node, "[dry-run] would cordon node");
        Ok(())
    }

    async fn uncordon_node(&self, node: &str) -> Result<(), Report<ActionError>> {
        info!(node, "[dry-run] would uncordon node");
        Ok(())
    }

    async fn drain_node(
        &self,
        node: &str,
        grace_period: Duration,
    ) -> Result<(), Report<ActionError>> {
        info!(node, ?grace_period, "[dry-run] would drain node");
        Ok(())
    }

    async fn terminate_node(&self, node: &str) -> Result<(), Report<ActionError>> {
        info!(node, "[dry-run] would terminate node");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn every_action_succeeds() {
        let actions = DryRunActions;
        assert!(actions.add_nodes("pool-a", 2).await.is_ok());
        assert!(actions.cordon_node("n1").await.is_ok());
        assert!(actions.drain_node("n1", Duration::from_secs(1)).await.is_ok());
        assert!(actions.terminate_node("n1").await.is_ok());
        assert!(actions.uncordon_node("n1").await.is_ok());
    }
}
