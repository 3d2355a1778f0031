//! Shared API type definitions
//!
//! This crate contains the configuration types shared across the autoscaler
//! workspace: per node group scaling bounds and policy, and the document
//! format of the node groups file.

use std::time::Duration;

use serde::Deserialize;
use serde::Serialize;

fn default_scale_up_threshold_percent() -> f64 {
    70.0
}

fn default_scale_down_threshold_percent() -> f64 {
    40.0
}

fn default_cooldown_seconds() -> u64 {
    300
}

fn default_drain_grace_period_seconds() -> u64 {
    120
}

fn default_provisioning_timeout_seconds() -> u64 {
    900
}

/// Static configuration of a single node group.
///
/// A node belongs to the group when its label `label_key` equals
/// `label_value`. A pending pod targets the group when its node selector (or
/// required node affinity) asks for the same label.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeGroupConfig {
    /// Unique group name
    pub name: String,
    /// Node label key selecting the group
    pub label_key: String,
    /// Node label value selecting the group
    pub label_value: String,
    /// Lower bound on the number of nodes
    pub min_nodes: u32,
    /// Upper bound on the number of nodes
    pub max_nodes: u32,
    /// Utilization (percent of allocatable) above which the group scales up
    #[serde(default = "default_scale_up_threshold_percent")]
    pub scale_up_threshold_percent: f64,
    /// Utilization (percent of allocatable) below which the group may scale down
    #[serde(default = "default_scale_down_threshold_percent")]
    pub scale_down_threshold_percent: f64,
    /// Window after a scaling action during which no scale-down, and no
    /// further scale-up, is issued
    #[serde(default = "default_cooldown_seconds")]
    pub cooldown_seconds: u64,
    /// How long slack must persist before a scale-down is issued
    #[serde(default)]
    pub scale_down_delay_seconds: u64,
    /// Time given to evicted pods before a drained node is terminated
    #[serde(default = "default_drain_grace_period_seconds")]
    pub drain_grace_period_seconds: u64,
    /// How long a node that has never reported Ready counts as capacity on
    /// its way rather than as a broken node
    #[serde(default = "default_provisioning_timeout_seconds")]
    pub provisioning_timeout_seconds: u64,
}

impl NodeGroupConfig {
    pub fn cooldown(&self) -> Duration {
        Duration::from_secs(self.cooldown_seconds)
    }

    pub fn scale_down_delay(&self) -> Duration {
        Duration::from_secs(self.scale_down_delay_seconds)
    }

    pub fn drain_grace_period(&self) -> Duration {
        Duration::from_secs(self.drain_grace_period_seconds)
    }

    pub fn provisioning_timeout(&self) -> Duration {
        Duration::from_secs(self.provisioning_timeout_seconds)
    }
}

/// Top level document of the node groups file
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeGroupsFile {
    pub node_groups: Vec<NodeGroupConfig>,
}
