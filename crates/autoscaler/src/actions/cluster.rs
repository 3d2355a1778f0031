use std::time::Duration;

use async_trait::async_trait;
use error_stack::Report;
use error_stack::ResultExt;
use k8s_openapi::api::core::v1::Node;
use k8s_openapi::api::core::v1::Pod;
use kube::api::DeleteParams;
use kube::api::EvictParams;
use kube::api::ListParams;
use kube::api::Patch;
use kube::api::PatchParams;
use kube::Api;
use kube::Client;
use kube::ResourceExt;
use serde_json::json;
use tokio::time::Instant;
use tracing::debug;
use tracing::info;
use tracing::warn;

use super::ActionError;
use super::ScalingActions;
use crate::k8s::resources::is_daemonset_pod;
use crate::k8s::resources::pod_is_active;

const DRAIN_POLL_INTERVAL: Duration = Duration::from_secs(5);

/// Scaling actions backed by the Kubernetes API.
///
/// Node removal is fully handled through the API server. Adding nodes needs a
/// cloud provider integration, which this backend does not have.
pub struct KubeNodeActions {
    nodes: Api<Node>,
    client: Client,
}

impl KubeNodeActions {
    pub fn new(client: Client) -> Self {
        Self {
            nodes: Api::all(client.clone()),
            client,
        }
    }

    async fn set_unschedulable(&self, node: &str, unschedulable: bool) -> Result<(), kube::Error> {
        let patch = json!({ "spec": { "unschedulable": unschedulable } });
        self.nodes
            .patch(node, &PatchParams::default(), &Patch::Merge(&patch))
            .await
            .map(|_| ())
    }

    /// Pods on `node` that a drain has to move away.
    async fn evictable_pods(&self, node: &str) -> Result<Vec<Pod>, kube::Error> {
        let pods: Api<Pod> = Api::all(self.client.clone());
        let params = ListParams::default().fields(&format!("spec.nodeName={node}"));
        Ok(pods
            .list(&params)
            .await?
            .items
            .into_iter()
            .filter(|pod| pod_is_active(pod) && !is_daemonset_pod(pod))
            .collect())
    }

    async fn evict(&self, pod: &Pod, grace_period: Duration) -> Result<(), kube::Error> {
        let namespace = pod.namespace().unwrap_or_else(|| "default".to_string());
        let api: Api<Pod> = Api::namespaced(self.client.clone(), &namespace);
        let params = EvictParams {
            delete_options: Some(DeleteParams {
                grace_period_seconds: Some(grace_period.as_secs().min(u64::from(u32::MAX)) as u32),
                ..Default::default()
            }),
            ..Default::default()
        };
        match api.evict(&pod.name_any(), &params).await {
            Ok(_) => Ok(()),
            // Already gone
            Err(kube::Error::Api(resp)) if resp.code == 404 => Ok(()),
            // Blocked by a disruption budget, retried on the next poll
            Err(kube::Error::Api(resp)) if resp.code == 429 => {
                debug!(
                    pod = %pod.name_any(),
                    namespace,
                    "Eviction refused by disruption budget"
                );
                Ok(())
            }
            Err(e) => Err(e),
        }
    }
}

#[async_trait]
impl ScalingActions for KubeNodeActions {
    async fn add_nodes(&self, group: &str, count: u32) -> Result<(), Report<ActionError>> {
        warn!(group, count, "Adding nodes requires a cloud provider backend");
        Err(Report::new(ActionError::Unsupported {
            action: "add_nodes",
        }))
        .attach_printable(format!("group {group} requested {count} node(s)"))
    }

    async fn cordon_node(&self, node: &str) -> Result<(), Report<ActionError>> {
        self.set_unschedulable(node, true)
            .await
            .change_context(ActionError::CordonFailed {
                node: node.to_string(),
            })?;
        info!(node, "Cordoned node");
        Ok(())
    }

    async fn uncordon_node(&self, node: &str) -> Result<(), Report<ActionError>> {
        self.set_unschedulable(node, false)
            .await
            .change_context(ActionError::UncordonFailed {
                node: node.to_string(),
            })?;
        info!(node, "Uncordoned node");
        Ok(())
    }

    async fn drain_node(
        &self,
        node: &str,
        grace_period: Duration,
    ) -> Result<(), Report<ActionError>> {
        let deadline = Instant::now() + grace_period;
        loop {
            let pods = self
                .evictable_pods(node)
                .await
                .change_context(ActionError::DrainFailed {
                    node: node.to_string(),
                })?;
            if pods.is_empty() {
                info!(node, "Node drained");
                return Ok(());
            }
            if Instant::now() >= deadline {
                return Err(Report::new(ActionError::DrainTimedOut {
                    node: node.to_string(),
                    remaining: pods.len(),
                }));
            }

            debug!(node, remaining = pods.len(), "Evicting pods");
            for pod in &pods {
                self.evict(pod, grace_period)
                    .await
                    .change_context(ActionError::DrainFailed {
                        node: node.to_string(),
                    })?;
            }
            tokio::time::sleep_until((Instant::now() + DRAIN_POLL_INTERVAL).min(deadline)).await;
        }
    }

    async fn terminate_node(&self, node: &str) -> Result<(), Report<ActionError>> {
        match self.nodes.delete(node, &DeleteParams::default()).await {
            Ok(_) => {
                info!(node, "Deleted node");
                Ok(())
            }
            Err(kube::Error::Api(resp)) if resp.code == 404 => {
                debug!(node, "Node already deleted");
                Ok(())
            }
            Err(e) => Err(Report::new(e).change_context(ActionError::TerminateFailed {
                node: node.to_string(),
            })),
        }
    }
}
