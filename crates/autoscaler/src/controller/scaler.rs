//! Per-group demand aggregation and the scaling decision.
//!
//! Utilization is the larger of the CPU and memory ratios between requested
//! and allocatable resources, in percent. A group with no capacity but some
//! demand is infinitely utilized.
//!
//! Scale-up sizes the group so that demand fits under the scale-up threshold
//! assuming new nodes look like the average ready node, and never counts
//! nodes that are still provisioning twice. A node only counts as
//! provisioning while it has never been Ready and is younger than the group's
//! provisioning timeout; anything else that is not Ready is simply broken.
//! After a scale-up the group waits out its cooldown before asking again,
//! except to restore the minimum. Scale-down removes a single node
//! per tick, picking the least utilized ready node (oldest first on ties), and
//! only when the group has been below its scale-down threshold for the
//! configured delay, outside its cooldown and with no pending pods.

use std::cmp::Ordering;
use std::time::Duration;
use std::time::Instant;

use api_types::NodeGroupConfig;
use k8s_openapi::api::core::v1::Node;
use k8s_openapi::api::core::v1::Pod;
use k8s_openapi::chrono::DateTime;
use k8s_openapi::chrono::Utc;
use kube::ResourceExt;
use tracing::warn;

use crate::controller::state::GroupState;
use crate::controller::view::GroupSlice;
use crate::k8s::resources::node_allocatable;
use crate::k8s::resources::node_creation_time;
use crate::k8s::resources::node_has_been_ready;
use crate::k8s::resources::node_is_being_deleted;
use crate::k8s::resources::node_is_ready;
use crate::k8s::resources::node_is_unschedulable;
use crate::k8s::resources::pod_node_name;
use crate::k8s::resources::pod_requests;
use crate::k8s::resources::ResourceAmount;

/// Load of a single group node.
#[derive(Debug, Clone, PartialEq)]
pub struct NodeUsage {
    pub name: String,
    pub allocatable: ResourceAmount,
    pub requested: ResourceAmount,
    pub created: Option<DateTime<Utc>>,
    pub ready: bool,
    /// Recently created, schedulable and never Ready so far
    pub provisioning: bool,
}

impl NodeUsage {
    pub fn utilization_percent(&self) -> f64 {
        utilization_percent(self.requested, self.allocatable)
    }
}

/// Aggregates computed from a [`GroupSlice`].
#[derive(Debug, Clone, PartialEq)]
pub struct GroupStats {
    /// Nodes not being deleted, in any state
    pub node_count: u32,
    pub ready_node_count: u32,
    pub provisioning_node_count: u32,
    /// Active pods bound to group nodes
    pub pod_count: u32,
    /// Unbound pods targeting the group
    pub pending_pod_count: u32,
    /// Requests of bound and pending pods
    pub demand: ResourceAmount,
    /// Allocatable resources of ready nodes
    pub capacity: ResourceAmount,
    pub utilization_percent: f64,
    pub nodes: Vec<NodeUsage>,
}

fn requests_or_zero(pod: &Pod) -> ResourceAmount {
    pod_requests(pod).unwrap_or_else(|e| {
        warn!(
            pod = %pod.name_any(),
            "Ignoring pod with unparseable resource requests: {e:?}"
        );
        ResourceAmount::default()
    })
}

/// A node still joining the cluster, as opposed to one that failed after
/// having served.
fn node_is_provisioning(node: &Node, provisioning_timeout: Duration, now: DateTime<Utc>) -> bool {
    if node_has_been_ready(node) || node_is_unschedulable(node) || node_is_being_deleted(node) {
        return false;
    }
    node_creation_time(node).is_some_and(|created| {
        // a creation time in the future means clock skew, so the node is new
        now.signed_duration_since(created)
            .to_std()
            .map_or(true, |age| age < provisioning_timeout)
    })
}

impl GroupStats {
    /// `now` is wall-clock time, compared against node creation timestamps.
    pub fn compute(
        slice: &GroupSlice<'_>,
        provisioning_timeout: Duration,
        now: DateTime<Utc>,
    ) -> Self {
        let mut nodes: Vec<NodeUsage> = slice
            .nodes
            .iter()
            .map(|node| NodeUsage {
                name: node.name_any(),
                allocatable: node_allocatable(node).unwrap_or_else(|e| {
                    warn!(
                        node = %node.name_any(),
                        "Ignoring unparseable node allocatable: {e:?}"
                    );
                    ResourceAmount::default()
                }),
                requested: ResourceAmount::default(),
                created: node_creation_time(node),
                ready: node_is_ready(node),
                provisioning: node_is_provisioning(node, provisioning_timeout, now),
            })
            .collect();

        let mut demand = ResourceAmount::default();
        for pod in &slice.bound_pods {
            let requests = requests_or_zero(pod);
            demand += requests;
            if let Some(usage) = pod_node_name(pod)
                .and_then(|name| nodes.iter_mut().find(|usage| usage.name == name))
            {
                usage.requested += requests;
            }
        }
        for pod in &slice.pending_pods {
            demand += requests_or_zero(pod);
        }

        let capacity = nodes
            .iter()
            .filter(|usage| usage.ready)
            .fold(ResourceAmount::default(), |acc, usage| acc + usage.allocatable);

        Self {
            node_count: nodes.len() as u32,
            ready_node_count: nodes.iter().filter(|usage| usage.ready).count() as u32,
            provisioning_node_count: nodes.iter().filter(|usage| usage.provisioning).count() as u32,
            pod_count: slice.bound_pods.len() as u32,
            pending_pod_count: slice.pending_pods.len() as u32,
            demand,
            capacity,
            utilization_percent: utilization_percent(demand, capacity),
            nodes,
        }
    }
}

fn ratio_percent(demand: u64, capacity: u64) -> f64 {
    match (demand, capacity) {
        (0, _) => 0.0,
        (_, 0) => f64::INFINITY,
        (d, c) => d as f64 / c as f64 * 100.0,
    }
}

pub fn utilization_percent(demand: ResourceAmount, capacity: ResourceAmount) -> f64 {
    ratio_percent(demand.cpu_millicores, capacity.cpu_millicores)
        .max(ratio_percent(demand.memory_bytes, capacity.memory_bytes))
}

/// Why a tick ended without a scaling action.
#[derive(Debug, Clone, Copy, PartialEq, Eq, derive_more::Display)]
pub enum NoOpReason {
    #[display("balanced")]
    Balanced,
    #[display("at_minimum")]
    AtMinimum,
    #[display("at_maximum")]
    AtMaximum,
    #[display("provisioning_in_progress")]
    ProvisioningInProgress,
    #[display("pending_pods")]
    PendingPods,
    #[display("cooling_down")]
    CoolingDown,
    #[display("awaiting_sustained_slack")]
    AwaitingSustainedSlack,
    #[display("would_exceed_threshold")]
    WouldExceedThreshold,
    #[display("no_candidate")]
    NoCandidate,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScalingDecision {
    NoOp(NoOpReason),
    ScaleUp(u32),
    /// Names of the nodes to remove
    ScaleDown(Vec<String>),
}

impl ScalingDecision {
    pub fn kind(&self) -> &'static str {
        match self {
            ScalingDecision::NoOp(_) => "noop",
            ScalingDecision::ScaleUp(_) => "scale_up",
            ScalingDecision::ScaleDown(_) => "scale_down",
        }
    }

    pub fn node_delta(&self) -> i64 {
        match self {
            ScalingDecision::NoOp(_) => 0,
            ScalingDecision::ScaleUp(count) => i64::from(*count),
            ScalingDecision::ScaleDown(nodes) => -(nodes.len() as i64),
        }
    }
}

/// Nodes needed so that `demand` sits at `threshold_percent` of nodes sized
/// like `per_node`.
fn nodes_needed(demand: u64, per_node: f64, threshold_percent: f64) -> u32 {
    if demand == 0 || per_node <= 0.0 {
        return 0;
    }
    let usable = per_node * threshold_percent / 100.0;
    (demand as f64 / usable).ceil().min(f64::from(u32::MAX)) as u32
}

fn scale_up(group: &NodeGroupConfig, stats: &GroupStats) -> ScalingDecision {
    let headroom = group.max_nodes.saturating_sub(stats.node_count);
    if headroom == 0 {
        return ScalingDecision::NoOp(NoOpReason::AtMaximum);
    }

    if stats.ready_node_count == 0 {
        if stats.provisioning_node_count > 0 {
            return ScalingDecision::NoOp(NoOpReason::ProvisioningInProgress);
        }
        return ScalingDecision::ScaleUp(1);
    }

    let ready = f64::from(stats.ready_node_count);
    let target = nodes_needed(
        stats.demand.cpu_millicores,
        stats.capacity.cpu_millicores as f64 / ready,
        group.scale_up_threshold_percent,
    )
    .max(nodes_needed(
        stats.demand.memory_bytes,
        stats.capacity.memory_bytes as f64 / ready,
        group.scale_up_threshold_percent,
    ));

    let existing = stats.ready_node_count + stats.provisioning_node_count;
    match target.saturating_sub(existing) {
        0 => ScalingDecision::NoOp(NoOpReason::ProvisioningInProgress),
        delta => ScalingDecision::ScaleUp(delta.min(headroom)),
    }
}

/// Oldest first. A node without a creation timestamp has unknown age and
/// sorts after every dated node.
fn older_first(a: Option<DateTime<Utc>>, b: Option<DateTime<Utc>>) -> Ordering {
    match (a, b) {
        (Some(a), Some(b)) => a.cmp(&b),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    }
}

/// Least utilized ready node, oldest first, then by name.
pub fn select_victim(stats: &GroupStats) -> Option<&NodeUsage> {
    stats.nodes.iter().filter(|usage| usage.ready).min_by(|a, b| {
        a.utilization_percent()
            .total_cmp(&b.utilization_percent())
            .then_with(|| older_first(a.created, b.created))
            .then_with(|| a.name.cmp(&b.name))
    })
}

/// Computes the decision for one group. Reads `state` but never changes it.
pub fn decide(
    group: &NodeGroupConfig,
    stats: &GroupStats,
    state: &GroupState,
    now: Instant,
) -> ScalingDecision {
    if stats.node_count < group.min_nodes {
        return ScalingDecision::ScaleUp(group.min_nodes - stats.node_count);
    }

    let over_max = stats.node_count > group.max_nodes;
    if !over_max {
        if stats.utilization_percent > group.scale_up_threshold_percent {
            if state.scale_up_in_cooldown(now, group.cooldown()) {
                return ScalingDecision::NoOp(NoOpReason::CoolingDown);
            }
            return scale_up(group, stats);
        }
        if stats.utilization_percent >= group.scale_down_threshold_percent {
            return ScalingDecision::NoOp(NoOpReason::Balanced);
        }
        if stats.node_count <= group.min_nodes {
            return ScalingDecision::NoOp(NoOpReason::AtMinimum);
        }
        if stats.pending_pod_count > 0 {
            return ScalingDecision::NoOp(NoOpReason::PendingPods);
        }
    }

    if state.in_cooldown(now, group.cooldown()) {
        return ScalingDecision::NoOp(NoOpReason::CoolingDown);
    }
    if !over_max && state.slack_duration(now) < group.scale_down_delay() {
        return ScalingDecision::NoOp(NoOpReason::AwaitingSustainedSlack);
    }

    let Some(victim) = select_victim(stats) else {
        return ScalingDecision::NoOp(NoOpReason::NoCandidate);
    };
    if !over_max {
        let remaining = stats.capacity.saturating_sub(victim.allocatable);
        if utilization_percent(stats.demand, remaining) > group.scale_up_threshold_percent {
            return ScalingDecision::NoOp(NoOpReason::WouldExceedThreshold);
        }
    }

    ScalingDecision::ScaleDown(vec![victim.name.clone()])
}
