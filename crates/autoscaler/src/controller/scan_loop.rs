//! The periodic scan, decide and act loop.

use std::sync::Arc;
use std::time::Duration;
use std::time::Instant;

use api_types::NodeGroupConfig;
use error_stack::Report;
use futures::future::join_all;
use k8s_openapi::api::core::v1::Node;
use k8s_openapi::api::core::v1::Pod;
use k8s_openapi::chrono::Utc;
use tokio::select;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::debug;
use tracing::error;
use tracing::info;
use tracing::warn;

use crate::actions::ActionError;
use crate::actions::ScalingActions;
use crate::controller::scaler::decide;
use crate::controller::scaler::GroupStats;
use crate::controller::scaler::NoOpReason;
use crate::controller::scaler::ScalingDecision;
use crate::controller::state::ActionKind;
use crate::controller::state::GroupPhase;
use crate::controller::state::GroupState;
use crate::controller::view::ClusterView;
use crate::controller::view::ViewError;
use crate::k8s::ResourceCache;
use crate::metrics::MetricsRecorder;
use crate::registry::NodeGroupRegistry;

#[derive(Debug, Clone, Copy, PartialEq, Eq, derive_more::Display)]
pub enum SkipReason {
    #[display("not synced")]
    NotSynced,
    #[display("view unavailable")]
    ViewUnavailable,
}

/// What happened to one group during one tick.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GroupOutcome {
    Skipped(SkipReason),
    NoOp(NoOpReason),
    CoolingDown,
    ScaledUp(u32),
    ScaledDown(Vec<String>),
    Failed(String),
    /// Shutdown was requested before the group acted
    Aborted,
}

impl GroupOutcome {
    pub fn kind(&self) -> &'static str {
        match self {
            GroupOutcome::Skipped(_) => "skipped",
            GroupOutcome::NoOp(_) => "noop",
            GroupOutcome::CoolingDown => "cooling_down",
            GroupOutcome::ScaledUp(_) => "scaled_up",
            GroupOutcome::ScaledDown(_) => "scaled_down",
            GroupOutcome::Failed(_) => "failed",
            GroupOutcome::Aborted => "aborted",
        }
    }

    pub fn is_failure(&self) -> bool {
        matches!(self, GroupOutcome::Failed(_))
    }
}

/// Drives autoscaling for every registered group until cancelled.
pub struct Controller {
    registry: NodeGroupRegistry,
    pods: ResourceCache<Pod>,
    nodes: ResourceCache<Node>,
    actions: Arc<dyn ScalingActions>,
    metrics: Arc<MetricsRecorder>,
    scan_interval: Duration,
    states: Vec<GroupState>,
}

impl Controller {
    pub fn new(
        registry: NodeGroupRegistry,
        pods: ResourceCache<Pod>,
        nodes: ResourceCache<Node>,
        actions: Arc<dyn ScalingActions>,
        metrics: Arc<MetricsRecorder>,
        scan_interval: Duration,
    ) -> Self {
        let states = vec![GroupState::default(); registry.len()];
        Self {
            registry,
            pods,
            nodes,
            actions,
            metrics,
            scan_interval,
            states,
        }
    }

    /// Current state of a group, by name.
    pub fn group_state(&self, name: &str) -> Option<&GroupState> {
        self.registry
            .groups()
            .iter()
            .position(|group| group.name == name)
            .map(|i| &self.states[i])
    }

    /// Runs ticks until `token` is cancelled. The first tick fires
    /// immediately; a tick in progress when shutdown arrives is allowed to
    /// finish its in-flight actions.
    #[tracing::instrument(skip_all, fields(groups = self.registry.len()))]
    pub async fn run(mut self, token: CancellationToken) {
        info!(interval = ?self.scan_interval, "Starting scan loop");
        let mut ticker = tokio::time::interval(self.scan_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            select! {
                _ = token.cancelled() => {
                    info!("Scan loop shutdown requested");
                    break;
                }
                _ = ticker.tick() => {
                    if token.is_cancelled() {
                        break;
                    }
                    self.run_once(&token).await;
                }
            }
        }
        info!("Scan loop stopped");
    }

    /// One pass over every group, all evaluated from the same snapshot.
    pub async fn run_once(&mut self, token: &CancellationToken) -> Vec<(String, GroupOutcome)> {
        let now = Instant::now();
        let captured = ClusterView::capture(&self.pods, &self.nodes);
        let Self {
            registry,
            actions,
            metrics,
            states,
            ..
        } = self;

        let view = match captured {
            Ok(view) => view,
            Err(e) => {
                let reason = match e.current_context() {
                    ViewError::NotSynced { .. } => SkipReason::NotSynced,
                    ViewError::ListFailed { .. } => {
                        error!("Failed to read cluster view: {e:?}");
                        SkipReason::ViewUnavailable
                    }
                };
                warn!("Skipping tick: {}", e.current_context());
                return registry
                    .groups()
                    .iter()
                    .map(|group| {
                        let outcome = GroupOutcome::Skipped(reason);
                        metrics.record_outcome(&group.name, &outcome);
                        (group.name.clone(), outcome)
                    })
                    .collect();
            }
        };

        for node in &view.nodes {
            let owners = registry.groups_for_node(node);
            if owners.len() > 1 {
                warn!(
                    node = ?node.metadata.name,
                    groups = ?owners,
                    "Node matches several node groups"
                );
            }
        }

        let view = &view;
        let actions: &dyn ScalingActions = &**actions;
        let metrics: &MetricsRecorder = &**metrics;
        let evaluations = registry
            .groups()
            .iter()
            .zip(states.iter_mut())
            .map(|(group, state)| async move {
                let outcome = evaluate_group(group, state, view, actions, metrics, token, now).await;
                metrics.record_outcome(&group.name, &outcome);
                (group.name.clone(), outcome)
            });
        join_all(evaluations).await
    }
}

async fn evaluate_group(
    group: &NodeGroupConfig,
    state: &mut GroupState,
    view: &ClusterView,
    actions: &dyn ScalingActions,
    metrics: &MetricsRecorder,
    token: &CancellationToken,
    now: Instant,
) -> GroupOutcome {
    let cooldown = group.cooldown();
    if token.is_cancelled() {
        return GroupOutcome::Aborted;
    }
    state.begin_evaluation();

    let stats = GroupStats::compute(
        &view.group_slice(group),
        group.provisioning_timeout(),
        Utc::now(),
    );
    state.observe_slack(
        stats.utilization_percent < group.scale_down_threshold_percent,
        now,
    );
    let decision = decide(group, &stats, state, now);
    metrics.record_decision(&group.name, &decision, &stats);
    debug!(
        group = %group.name,
        nodes = stats.node_count,
        ready = stats.ready_node_count,
        pending = stats.pending_pod_count,
        utilization = stats.utilization_percent,
        decision = decision.kind(),
        "Evaluated node group"
    );

    match decision {
        ScalingDecision::NoOp(reason) => {
            state.finish(now, cooldown);
            if reason == NoOpReason::CoolingDown {
                GroupOutcome::CoolingDown
            } else {
                GroupOutcome::NoOp(reason)
            }
        }
        _ if token.is_cancelled() => {
            info!(group = %group.name, "Shutdown requested, not acting on decision");
            state.finish(now, cooldown);
            GroupOutcome::Aborted
        }
        ScalingDecision::ScaleUp(count) => {
            state.phase = GroupPhase::ScalingUp;
            info!(group = %group.name, count, "Scaling up");
            let result = actions.add_nodes(&group.name, count).await;
            metrics.record_action(&group.name, "add_nodes", &count.to_string(), result.is_ok());
            match result {
                Ok(()) => {
                    state.action_succeeded(ActionKind::ScaleUp, Instant::now(), cooldown);
                    GroupOutcome::ScaledUp(count)
                }
                Err(e) => fail(group, state, e),
            }
        }
        ScalingDecision::ScaleDown(victims) => {
            state.phase = GroupPhase::ScalingDown;
            for node in &victims {
                info!(group = %group.name, node, "Scaling down");
                if let Err(e) = remove_node(group, node, actions, metrics).await {
                    return fail(group, state, e);
                }
            }
            state.action_succeeded(ActionKind::ScaleDown, Instant::now(), cooldown);
            GroupOutcome::ScaledDown(victims)
        }
    }
}

fn fail(group: &NodeGroupConfig, state: &mut GroupState, e: Report<ActionError>) -> GroupOutcome {
    error!(group = %group.name, "Scaling action failed, will re-evaluate next tick: {e:?}");
    state.action_failed();
    GroupOutcome::Failed(e.current_context().to_string())
}

/// Cordon, drain, then terminate. A failure after the cordon puts the node
/// back into service before the error is returned.
async fn remove_node(
    group: &NodeGroupConfig,
    node: &str,
    actions: &dyn ScalingActions,
    metrics: &MetricsRecorder,
) -> Result<(), Report<ActionError>> {
    let name = group.name.as_str();

    let cordoned = actions.cordon_node(node).await;
    metrics.record_action(name, "cordon", node, cordoned.is_ok());
    cordoned?;

    let drained = actions.drain_node(node, group.drain_grace_period()).await;
    metrics.record_action(name, "drain", node, drained.is_ok());
    let result = match drained {
        Ok(()) => {
            let terminated = actions.terminate_node(node).await;
            metrics.record_action(name, "terminate", node, terminated.is_ok());
            terminated
        }
        Err(e) => Err(e),
    };

    if result.is_err() {
        let uncordoned = actions.uncordon_node(node).await;
        metrics.record_action(name, "uncordon", node, uncordoned.is_ok());
        if let Err(e) = uncordoned {
            warn!(node, "Failed to put node back into service: {e:?}");
        }
    }
    result
}
