//! Read-only helpers over cached pod and node objects.

use std::collections::BTreeMap;
use std::ops::Add;
use std::ops::AddAssign;

use error_stack::Report;
use k8s_openapi::api::core::v1::Container;
use k8s_openapi::api::core::v1::Node;
use k8s_openapi::api::core::v1::Pod;
use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use k8s_openapi::chrono::DateTime;
use k8s_openapi::chrono::Utc;
use kube::ResourceExt;

use crate::k8s::quantity;
use crate::k8s::KubernetesError;

/// CPU and memory amounts in integer units.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ResourceAmount {
    pub cpu_millicores: u64,
    pub memory_bytes: u64,
}

impl ResourceAmount {
    pub fn new(cpu_millicores: u64, memory_bytes: u64) -> Self {
        Self {
            cpu_millicores,
            memory_bytes,
        }
    }

    pub fn is_zero(&self) -> bool {
        self.cpu_millicores == 0 && self.memory_bytes == 0
    }

    pub fn saturating_sub(self, other: Self) -> Self {
        Self {
            cpu_millicores: self.cpu_millicores.saturating_sub(other.cpu_millicores),
            memory_bytes: self.memory_bytes.saturating_sub(other.memory_bytes),
        }
    }

    fn max(self, other: Self) -> Self {
        Self {
            cpu_millicores: self.cpu_millicores.max(other.cpu_millicores),
            memory_bytes: self.memory_bytes.max(other.memory_bytes),
        }
    }

    fn from_resource_map(
        map: Option<&BTreeMap<String, Quantity>>,
    ) -> Result<Self, Report<KubernetesError>> {
        let Some(map) = map else {
            return Ok(Self::default());
        };
        let cpu_millicores = match map.get("cpu") {
            Some(cpu) => quantity::cpu_millicores(cpu)?,
            None => 0,
        };
        let memory_bytes = match map.get("memory") {
            Some(memory) => quantity::memory_bytes(memory)?,
            None => 0,
        };
        Ok(Self {
            cpu_millicores,
            memory_bytes,
        })
    }
}

impl Add for ResourceAmount {
    type Output = Self;

    fn add(self, rhs: Self) -> Self {
        Self {
            cpu_millicores: self.cpu_millicores.saturating_add(rhs.cpu_millicores),
            memory_bytes: self.memory_bytes.saturating_add(rhs.memory_bytes),
        }
    }
}

impl AddAssign for ResourceAmount {
    fn add_assign(&mut self, rhs: Self) {
        *self = *self + rhs;
    }
}

fn container_requests(container: &Container) -> Result<ResourceAmount, Report<KubernetesError>> {
    ResourceAmount::from_resource_map(
        container
            .resources
            .as_ref()
            .and_then(|resources| resources.requests.as_ref()),
    )
}

/// Effective scheduling request of a pod: the larger of the summed app
/// container requests and the biggest single init container request.
pub fn pod_requests(pod: &Pod) -> Result<ResourceAmount, Report<KubernetesError>> {
    let Some(spec) = pod.spec.as_ref() else {
        return Ok(ResourceAmount::default());
    };

    let mut total = ResourceAmount::default();
    for container in &spec.containers {
        total += container_requests(container)?;
    }

    let mut init_max = ResourceAmount::default();
    for container in spec.init_containers.iter().flatten() {
        init_max = init_max.max(container_requests(container)?);
    }

    Ok(total.max(init_max))
}

/// Allocatable capacity reported by the node status.
pub fn node_allocatable(node: &Node) -> Result<ResourceAmount, Report<KubernetesError>> {
    ResourceAmount::from_resource_map(
        node.status
            .as_ref()
            .and_then(|status| status.allocatable.as_ref()),
    )
}

/// Name of the node the pod is bound to, if any.
pub fn pod_node_name(pod: &Pod) -> Option<&str> {
    pod.spec
        .as_ref()
        .and_then(|spec| spec.node_name.as_deref())
        .filter(|name| !name.is_empty())
}

/// A pod counts towards demand unless it has finished or is being deleted.
pub fn pod_is_active(pod: &Pod) -> bool {
    if pod.metadata.deletion_timestamp.is_some() {
        return false;
    }
    !matches!(
        pod.status.as_ref().and_then(|status| status.phase.as_deref()),
        Some("Succeeded") | Some("Failed")
    )
}

/// Pods owned by a DaemonSet are recreated on every node and are never evicted.
pub fn is_daemonset_pod(pod: &Pod) -> bool {
    pod.owner_references()
        .iter()
        .any(|owner| owner.kind == "DaemonSet")
}

pub fn node_is_being_deleted(node: &Node) -> bool {
    node.metadata.deletion_timestamp.is_some()
}

pub fn node_is_unschedulable(node: &Node) -> bool {
    node.spec
        .as_ref()
        .and_then(|spec| spec.unschedulable)
        .unwrap_or(false)
}

/// Whether the node reports a `Ready=True` condition.
pub fn node_has_ready_condition(node: &Node) -> bool {
    node.status
        .as_ref()
        .and_then(|status| status.conditions.as_ref())
        .map(|conditions| {
            conditions
                .iter()
                .any(|condition| condition.type_ == "Ready" && condition.status == "True")
        })
        .unwrap_or(false)
}

/// Whether the node has ever reported Ready. A kubelet that stopped posting
/// status leaves `NodeStatusUnknown` behind, while one that never posted
/// leaves `NodeStatusNeverUpdated`.
pub fn node_has_been_ready(node: &Node) -> bool {
    node.status
        .as_ref()
        .and_then(|status| status.conditions.as_ref())
        .and_then(|conditions| conditions.iter().find(|condition| condition.type_ == "Ready"))
        .is_some_and(|ready| {
            ready.status == "True" || ready.reason.as_deref() == Some("NodeStatusUnknown")
        })
}

/// A node can take new workloads: ready, schedulable and not being deleted.
pub fn node_is_ready(node: &Node) -> bool {
    node_has_ready_condition(node) && !node_is_unschedulable(node) && !node_is_being_deleted(node)
}

pub fn node_creation_time(node: &Node) -> Option<DateTime<Utc>> {
    node.metadata.creation_timestamp.as_ref().map(|time| time.0)
}
