//! Point-in-time snapshot of the cached cluster state.

use std::collections::HashSet;
use std::sync::Arc;

use api_types::NodeGroupConfig;
use error_stack::Report;
use error_stack::ResultExt;
use k8s_openapi::api::core::v1::Node;
use k8s_openapi::api::core::v1::Pod;
use kube::ResourceExt;

use crate::k8s::resources::node_is_being_deleted;
use crate::k8s::resources::pod_is_active;
use crate::k8s::resources::pod_node_name;
use crate::k8s::Lister;
use crate::registry::node_belongs_to;
use crate::registry::pod_belongs_to;

#[derive(Debug, derive_more::Display)]
pub enum ViewError {
    #[display("{resource} cache has not completed its initial listing")]
    NotSynced { resource: &'static str },
    #[display("Failed to list cached {resource}")]
    ListFailed { resource: &'static str },
}

impl std::error::Error for ViewError {}

/// All pods and all nodes, read once per tick.
///
/// Every group evaluated in a tick works from the same pair, so node and pod
/// data can never come from two different cache states within one decision.
#[derive(Debug, Clone, Default)]
pub struct ClusterView {
    pub pods: Vec<Arc<Pod>>,
    pub nodes: Vec<Arc<Node>>,
}

impl ClusterView {
    /// Reads both caches, refusing to return a view built from an incomplete
    /// initial listing.
    pub fn capture(
        pods: &impl Lister<Pod>,
        nodes: &impl Lister<Node>,
    ) -> Result<Self, Report<ViewError>> {
        if !pods.has_synced() {
            return Err(Report::new(ViewError::NotSynced { resource: "pods" }));
        }
        if !nodes.has_synced() {
            return Err(Report::new(ViewError::NotSynced { resource: "nodes" }));
        }

        let nodes = nodes
            .list()
            .change_context(ViewError::ListFailed { resource: "nodes" })?;
        let pods = pods
            .list()
            .change_context(ViewError::ListFailed { resource: "pods" })?;
        Ok(Self { pods, nodes })
    }

    /// The part of the view relevant to one group.
    ///
    /// Nodes being deleted are left out entirely. Pods count when they are
    /// bound to one of the group's nodes, or unbound and asking for the group.
    pub fn group_slice(&self, group: &NodeGroupConfig) -> GroupSlice<'_> {
        let nodes: Vec<&Node> = self
            .nodes
            .iter()
            .map(Arc::as_ref)
            .filter(|node| node_belongs_to(group, node) && !node_is_being_deleted(node))
            .collect();
        let names: HashSet<String> = nodes.iter().map(|node| node.name_any()).collect();

        let mut bound_pods = Vec::new();
        let mut pending_pods = Vec::new();
        for pod in self.pods.iter().map(Arc::as_ref).filter(|pod| pod_is_active(pod)) {
            match pod_node_name(pod) {
                Some(node_name) if names.contains(node_name) => bound_pods.push(pod),
                Some(_) => {}
                None if pod_belongs_to(group, pod) => pending_pods.push(pod),
                None => {}
            }
        }

        GroupSlice {
            nodes,
            bound_pods,
            pending_pods,
        }
    }
}

/// Nodes and pods of a single group, borrowed from a [`ClusterView`].
#[derive(Debug, Default)]
pub struct GroupSlice<'a> {
    pub nodes: Vec<&'a Node>,
    pub bound_pods: Vec<&'a Pod>,
    pub pending_pods: Vec<&'a Pod>,
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use k8s_openapi::api::core::v1::PodStatus;
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::Time;
    use k8s_openapi::chrono::Utc;
    use similar_asserts::assert_eq;

    use super::*;
    use crate::k8s::resources::fixtures::node;
    use crate::k8s::resources::fixtures::pod;
    use crate::k8s::ResourceCache;
    use crate::registry::fixtures::group;

    fn names<T: kube::Resource>(objects: &[&T]) -> Vec<String> {
        let mut names: Vec<String> = objects.iter().map(|o| o.name_any()).collect();
        names.sort();
        names
    }

    #[test]
    fn capture_requires_both_caches_synced() {
        let pods = ResourceCache::<Pod>::with_objects("pods", vec![]);
        let nodes = ResourceCache::<Node>::new("nodes");

        let err = ClusterView::capture(&pods, &nodes).unwrap_err();
        assert!(matches!(
            err.current_context(),
            ViewError::NotSynced { resource: "nodes" }
        ));

        let nodes = ResourceCache::<Node>::with_objects("nodes", vec![node("n1", &[], "1", "1Gi")]);
        let view = ClusterView::capture(&pods, &nodes).unwrap();
        assert_eq!(view.nodes.len(), 1);
        assert!(view.pods.is_empty());
    }

    #[test]
    fn slice_partitions_by_group() {
        let mut pending_a = pod("pending-a", None, "1", "1Gi");
        pending_a.spec.as_mut().unwrap().node_selector =
            Some(BTreeMap::from([("pool".to_string(), "a".to_string())]));
        let mut finished = pod("finished", Some("a1"), "1", "1Gi");
        finished.status = Some(PodStatus {
            phase: Some("Failed".to_string()),
            ..Default::default()
        });
        let mut deleting = node("a2", &[("pool", "a")], "4", "8Gi");
        deleting.metadata.deletion_timestamp = Some(Time(Utc::now()));

        let view = ClusterView {
            nodes: vec![
                Arc::new(node("a1", &[("pool", "a")], "4", "8Gi")),
                Arc::new(deleting),
                Arc::new(node("b1", &[("pool", "b")], "4", "8Gi")),
            ],
            pods: vec![
                Arc::new(pod("on-a1", Some("a1"), "1", "1Gi")),
                Arc::new(pod("on-b1", Some("b1"), "1", "1Gi")),
                Arc::new(pod("on-a2", Some("a2"), "1", "1Gi")),
                Arc::new(pending_a),
                Arc::new(pod("pending-any", None, "1", "1Gi")),
                Arc::new(finished),
            ],
        };

        let slice = view.group_slice(&group("pool-a", "a", 1, 5));
        assert_eq!(names(&slice.nodes), vec!["a1"]);
        assert_eq!(names(&slice.bound_pods), vec!["on-a1"]);
        assert_eq!(names(&slice.pending_pods), vec!["pending-a"]);

        let slice = view.group_slice(&group("pool-b", "b", 1, 5));
        assert_eq!(names(&slice.nodes), vec!["b1"]);
        assert_eq!(names(&slice.bound_pods), vec!["on-b1"]);
        assert!(slice.pending_pods.is_empty());
    }
}
