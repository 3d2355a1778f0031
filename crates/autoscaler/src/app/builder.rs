use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use k8s_openapi::api::core::v1::Node;
use k8s_openapi::api::core::v1::Pod;
use kube::Client;
use tracing::info;

use crate::actions::DryRunActions;
use crate::actions::KubeNodeActions;
use crate::actions::ScalingActions;
use crate::app::tasks::Tasks;
use crate::app::tasks::DEFAULT_SHUTDOWN_TIMEOUT;
use crate::app::Application;
use crate::config::load_node_groups;
use crate::config::DaemonArgs;
use crate::controller::Controller;
use crate::k8s::kube_client::init_kube_client;
use crate::k8s::ListScope;
use crate::k8s::ResourceCache;
use crate::lifecycle::Shutdown;
use crate::metrics::MetricsRecorder;
use crate::registry::NodeGroupRegistry;

/// Application builder
pub struct ApplicationBuilder {
    daemon_args: DaemonArgs,
}

impl ApplicationBuilder {
    pub fn new(daemon_args: DaemonArgs) -> Self {
        Self { daemon_args }
    }

    /// Validates the configuration, connects to the cluster and starts the
    /// resource caches. Any configuration error stops here, before the scan
    /// loop exists.
    pub async fn build(self) -> Result<Application> {
        info!("Building application components...");
        let args = self.daemon_args;

        let registry = load_registry(&args)?;
        info!(groups = registry.len(), "Loaded node groups");

        let client = init_kube_client(args.kubeconfig.clone())
            .await
            .map_err(|e| anyhow::anyhow!("Failed to initialize Kubernetes client: {e:?}"))?;

        let metrics = Arc::new(MetricsRecorder::new(&args.metrics_format));
        let shutdown = Shutdown::new();
        let mut tasks =
            Tasks::new(shutdown.clone()).with_shutdown_timeout(shutdown_timeout(&registry));

        let pod_scope = ListScope::from_filters(
            args.namespace.clone(),
            args.pod_label_selector.clone(),
            None,
        );
        let (pods, pod_task) = ResourceCache::<Pod>::spawn(
            client.clone(),
            "pods",
            pod_scope,
            args.resync_interval(),
            metrics.clone(),
            shutdown.token(),
        );
        tasks.push("pod-cache", pod_task);

        let (nodes, node_task) = ResourceCache::<Node>::spawn(
            client.clone(),
            "nodes",
            ListScope::All,
            args.resync_interval(),
            metrics.clone(),
            shutdown.token(),
        );
        tasks.push("node-cache", node_task);

        let controller = Controller::new(
            registry,
            pods,
            nodes,
            create_actions(&args, client),
            metrics,
            args.scan_interval(),
        );

        Ok(Application::new(controller, tasks))
    }
}

/// A scale-down caught by shutdown still drains and terminates its node, so
/// the join bound covers the longest drain plus the surrounding API calls.
fn shutdown_timeout(registry: &NodeGroupRegistry) -> Duration {
    DEFAULT_SHUTDOWN_TIMEOUT + registry.longest_drain_grace_period()
}

pub fn load_registry(args: &DaemonArgs) -> Result<NodeGroupRegistry> {
    load_registry_from(&args.nodegroups)
}

pub fn load_registry_from(path: &std::path::Path) -> Result<NodeGroupRegistry> {
    let groups = load_node_groups(path)
        .map_err(|e| anyhow::anyhow!("Failed to load node groups: {e:?}"))?;
    NodeGroupRegistry::new(groups)
        .map_err(|e| anyhow::anyhow!("Invalid node group configuration: {e:?}"))
}

fn create_actions(args: &DaemonArgs, client: Client) -> Arc<dyn ScalingActions> {
    if args.dry_mode {
        info!("Dry mode enabled, scaling actions will only be logged");
        Arc::new(DryRunActions)
    } else {
        Arc::new(KubeNodeActions::new(client))
    }
}
