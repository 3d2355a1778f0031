//! Read-only registry of configured node groups.

use std::collections::HashMap;
use std::collections::HashSet;
use std::time::Duration;

use api_types::NodeGroupConfig;
use error_stack::Report;
use k8s_openapi::api::core::v1::Node;
use k8s_openapi::api::core::v1::Pod;
use kube::ResourceExt;

use crate::config::ConfigError;

/// Validated, immutable set of node groups keyed by name.
#[derive(Debug, Clone)]
pub struct NodeGroupRegistry {
    groups: Vec<NodeGroupConfig>,
    index: HashMap<String, usize>,
}

impl NodeGroupRegistry {
    /// Builds the registry, rejecting any configuration that would make
    /// scaling decisions meaningless.
    pub fn new(groups: Vec<NodeGroupConfig>) -> Result<Self, Report<ConfigError>> {
        if groups.is_empty() {
            return Err(invalid("no node groups configured"));
        }

        let mut index = HashMap::with_capacity(groups.len());
        let mut selectors = HashSet::with_capacity(groups.len());
        for (i, group) in groups.iter().enumerate() {
            validate_group(group)?;
            if index.insert(group.name.clone(), i).is_some() {
                return Err(invalid(format!("duplicate node group name '{}'", group.name)));
            }
            if !selectors.insert((group.label_key.clone(), group.label_value.clone())) {
                return Err(invalid(format!(
                    "node group '{}' selects {}={} which is already claimed by another group",
                    group.name, group.label_key, group.label_value
                )));
            }
        }

        Ok(Self { groups, index })
    }

    pub fn get(&self, name: &str) -> Option<&NodeGroupConfig> {
        self.index.get(name).map(|&i| &self.groups[i])
    }

    /// Groups in configuration order
    pub fn groups(&self) -> &[NodeGroupConfig] {
        &self.groups
    }

    pub fn len(&self) -> usize {
        self.groups.len()
    }

    pub fn is_empty(&self) -> bool {
        self.groups.is_empty()
    }

    /// Upper bound on how long removing one node can keep a group busy.
    pub fn longest_drain_grace_period(&self) -> Duration {
        self.groups
            .iter()
            .map(NodeGroupConfig::drain_grace_period)
            .max()
            .unwrap_or_default()
    }

    /// Names of every group whose selector matches `node`.
    ///
    /// Validation guarantees selectors are distinct, so more than one match
    /// can only happen through a node carrying several group labels.
    pub fn groups_for_node(&self, node: &Node) -> Vec<&str> {
        self.groups
            .iter()
            .filter(|group| node_belongs_to(group, node))
            .map(|group| group.name.as_str())
            .collect()
    }
}

fn invalid(message: impl Into<String>) -> Report<ConfigError> {
    Report::new(ConfigError::Invalid {
        message: message.into(),
    })
}

fn validate_group(group: &NodeGroupConfig) -> Result<(), Report<ConfigError>> {
    let name = &group.name;
    if name.trim().is_empty() {
        return Err(invalid("node group name must not be empty"));
    }
    if group.label_key.is_empty() || group.label_value.is_empty() {
        return Err(invalid(format!(
            "node group '{name}' must set both label_key and label_value"
        )));
    }
    if group.max_nodes == 0 {
        return Err(invalid(format!("node group '{name}' has max_nodes = 0")));
    }
    if group.min_nodes > group.max_nodes {
        return Err(invalid(format!(
            "node group '{name}' has min_nodes {} > max_nodes {}",
            group.min_nodes, group.max_nodes
        )));
    }
    let in_range = |v: f64| v > 0.0 && v <= 100.0;
    if !in_range(group.scale_up_threshold_percent) || !in_range(group.scale_down_threshold_percent)
    {
        return Err(invalid(format!(
            "node group '{name}' thresholds must be within (0, 100]"
        )));
    }
    if group.scale_down_threshold_percent >= group.scale_up_threshold_percent {
        return Err(invalid(format!(
            "node group '{name}' scale_down_threshold_percent {} must be below scale_up_threshold_percent {}",
            group.scale_down_threshold_percent, group.scale_up_threshold_percent
        )));
    }
    Ok(())
}

/// Whether `node` carries the group's selector label.
pub fn node_belongs_to(group: &NodeGroupConfig, node: &Node) -> bool {
    node.labels()
        .get(&group.label_key)
        .is_some_and(|value| *value == group.label_value)
}

/// Whether an unscheduled `pod` asks for nodes of this group, either through
/// its node selector or through a required node affinity `In` expression.
pub fn pod_belongs_to(group: &NodeGroupConfig, pod: &Pod) -> bool {
    let Some(spec) = pod.spec.as_ref() else {
        return false;
    };

    if spec
        .node_selector
        .as_ref()
        .and_then(|selector| selector.get(&group.label_key))
        .is_some_and(|value| *value == group.label_value)
    {
        return true;
    }

    let Some(terms) = spec
        .affinity
        .as_ref()
        .and_then(|affinity| affinity.node_affinity.as_ref())
        .and_then(|node_affinity| {
            node_affinity
                .required_during_scheduling_ignored_during_execution
                .as_ref()
        })
        .map(|required| &required.node_selector_terms)
    else {
        return false;
    };

    terms.iter().any(|term| {
        term.match_expressions.iter().flatten().any(|expr| {
            expr.key == group.label_key
                && expr.operator == "In"
                && expr
                    .values
                    .iter()
                    .flatten()
                    .any(|value| *value == group.label_value)
        })
    })
}


#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use k8s_openapi::api::core::v1::Affinity;
    use k8s_openapi::api::core::v1::NodeAffinity;
    use k8s_openapi::api::core::v1::NodeSelector;
    use k8s_openapi::api::core::v1::NodeSelectorRequirement;
    use k8s_openapi::api::core::v1::NodeSelectorTerm;

    use super::fixtures::group;
    use super::*;
    use crate::k8s::resources::fixtures::node;
    use crate::k8s::resources::fixtures::pod;

    fn message(err: Report<ConfigError>) -> String {
        err.current_context().to_string()
    }

    #[test]
    fn lookup_by_name() {
        let registry =
            NodeGroupRegistry::new(vec![group("pool-a", "a", 1, 5), group("pool-b", "b", 0, 2)])
                .unwrap();
        assert_eq!(registry.len(), 2);
        assert_eq!(registry.get("pool-b").map(|g| g.max_nodes), Some(2));
        assert!(registry.get("pool-c").is_none());
    }

    #[test]
    fn longest_drain_grace_spans_all_groups() {
        let mut slow = group("pool-b", "b", 0, 2);
        slow.drain_grace_period_seconds = 600;
        let registry = NodeGroupRegistry::new(vec![group("pool-a", "a", 1, 5), slow]).unwrap();
        assert_eq!(registry.longest_drain_grace_period(), Duration::from_secs(600));
    }

    #[test]
    fn rejects_overlapping_selectors() {
        let err = NodeGroupRegistry::new(vec![group("pool-a", "a", 1, 5), group("pool-x", "a", 1, 5)])
            .unwrap_err();
        assert!(message(err).contains("already claimed"));
    }

    #[test]
    fn rejects_duplicate_names() {
        let err = NodeGroupRegistry::new(vec![group("pool-a", "a", 1, 5), group("pool-a", "b", 1, 5)])
            .unwrap_err();
        assert!(message(err).contains("duplicate"));
    }

    #[test]
    fn rejects_impossible_bounds_and_thresholds() {
        assert!(NodeGroupRegistry::new(vec![]).is_err());
        assert!(NodeGroupRegistry::new(vec![group("g", "a", 3, 2)]).is_err());
        assert!(NodeGroupRegistry::new(vec![group("g", "a", 0, 0)]).is_err());

        let mut g = group("g", "a", 1, 2);
        g.scale_down_threshold_percent = 80.0;
        assert!(NodeGroupRegistry::new(vec![g]).is_err());

        let mut g = group("g", "a", 1, 2);
        g.scale_up_threshold_percent = 150.0;
        assert!(NodeGroupRegistry::new(vec![g]).is_err());

        let mut g = group("g", "a", 1, 2);
        g.label_key = String::new();
        assert!(NodeGroupRegistry::new(vec![g]).is_err());
    }

    #[test]
    fn node_membership_follows_label() {
        let g = group("pool-a", "a", 1, 5);
        assert!(node_belongs_to(&g, &node("n1", &[("pool", "a")], "4", "8Gi")));
        assert!(!node_belongs_to(&g, &node("n2", &[("pool", "b")], "4", "8Gi")));
        assert!(!node_belongs_to(&g, &node("n3", &[], "4", "8Gi")));
    }

    #[test]
    fn pod_targets_group_by_node_selector() {
        let g = group("pool-a", "a", 1, 5);
        let mut p = pod("web", None, "1", "1Gi");
        assert!(!pod_belongs_to(&g, &p));

        p.spec.as_mut().unwrap().node_selector =
            Some(BTreeMap::from([("pool".to_string(), "a".to_string())]));
        assert!(pod_belongs_to(&g, &p));
    }

    #[test]
    fn pod_targets_group_by_required_affinity() {
        let g = group("pool-a", "a", 1, 5);
        let mut p = pod("batch", None, "1", "1Gi");
        p.spec.as_mut().unwrap().affinity = Some(Affinity {
            node_affinity: Some(NodeAffinity {
                required_during_scheduling_ignored_during_execution: Some(NodeSelector {
                    node_selector_terms: vec![NodeSelectorTerm {
                        match_expressions: Some(vec![NodeSelectorRequirement {
                            key: "pool".to_string(),
                            operator: "In".to_string(),
                            values: Some(vec!["z".to_string(), "a".to_string()]),
                        }]),
                        ..Default::default()
                    }],
                }),
                ..Default::default()
            }),
            ..Default::default()
        });
        assert!(pod_belongs_to(&g, &p));
        assert!(!pod_belongs_to(&group("pool-b", "b", 1, 5), &p));
    }

    #[test]
    fn groups_for_node_reports_all_matches() {
        let registry =
            NodeGroupRegistry::new(vec![group("pool-a", "a", 1, 5), group("pool-b", "b", 0, 2)])
                .unwrap();
        let n = node("n1", &[("pool", "b")], "4", "8Gi");
        assert_eq!(registry.groups_for_node(&n), vec!["pool-b"]);
    }
}
