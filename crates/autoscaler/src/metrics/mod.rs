//! Metrics side-channel.
//!
//! Every measurement is encoded into a single line and emitted as a tracing
//! event with target `metrics`; the logging setup routes those events into the
//! metrics file. Nothing here is read back by the scaling logic.

use std::time::SystemTime;
use std::time::UNIX_EPOCH;

pub mod encoders;

use encoders::create_encoder;
use encoders::Fields;
use encoders::MetricsEncoder;
use encoders::Tags;

use crate::controller::GroupOutcome;
use crate::controller::GroupStats;
use crate::controller::ScalingDecision;

pub struct MetricsRecorder {
    encoder: Box<dyn MetricsEncoder>,
}

impl MetricsRecorder {
    pub fn new(metrics_format: &str) -> Self {
        Self {
            encoder: create_encoder(metrics_format),
        }
    }

    fn emit(&self, measurement: &str, tags: &Tags, fields: &Fields) {
        let line = self
            .encoder
            .encode_metrics(measurement, tags, fields, current_time());
        tracing::info!(target: "metrics", msg = %line);
    }

    /// Records the decision computed for a group in one tick.
    pub fn record_decision(&self, group: &str, decision: &ScalingDecision, stats: &GroupStats) {
        let mut tags = Tags::new();
        tags.insert("node_group", group.to_string());

        let mut fields = Fields::new();
        fields.insert("decision", decision.kind().into());
        fields.insert("delta", decision.node_delta().into());
        fields.insert("nodes", stats.node_count.into());
        fields.insert("ready_nodes", stats.ready_node_count.into());
        fields.insert("pods", stats.pod_count.into());
        fields.insert("pending_pods", stats.pending_pod_count.into());
        fields.insert("requested_cpu_millicores", stats.demand.cpu_millicores.into());
        fields.insert("requested_memory_bytes", stats.demand.memory_bytes.into());
        fields.insert("allocatable_cpu_millicores", stats.capacity.cpu_millicores.into());
        fields.insert("allocatable_memory_bytes", stats.capacity.memory_bytes.into());
        if stats.utilization_percent.is_finite() {
            fields.insert("utilization_percent", stats.utilization_percent.into());
        }

        self.emit("autoscaler_decision", &tags, &fields);
    }

    /// Records the final outcome of a group's tick, including skips and failures.
    pub fn record_outcome(&self, group: &str, outcome: &GroupOutcome) {
        let mut tags = Tags::new();
        tags.insert("node_group", group.to_string());
        tags.insert("outcome", outcome.kind().to_string());

        let mut fields = Fields::new();
        fields.insert("success", (!outcome.is_failure()).into());
        if let GroupOutcome::Skipped(reason) = outcome {
            fields.insert("reason", reason.to_string().into());
        }

        self.emit("autoscaler_outcome", &tags, &fields);
    }

    /// Records one external scaling call.
    pub fn record_action(&self, group: &str, action: &str, target: &str, success: bool) {
        let mut tags = Tags::new();
        tags.insert("node_group", group.to_string());
        tags.insert("action", action.to_string());

        let mut fields = Fields::new();
        fields.insert("target", target.into());
        fields.insert("success", success.into());

        self.emit("autoscaler_action", &tags, &fields);
    }

    /// Records the state of a resource cache after a listing or a failure.
    pub fn record_cache_sync(&self, resource: &str, synced: bool, objects: usize, errors: u32) {
        let mut tags = Tags::new();
        tags.insert("resource", resource.to_string());

        let mut fields = Fields::new();
        fields.insert("synced", synced.into());
        fields.insert("objects", (objects as u64).into());
        fields.insert("consecutive_errors", errors.into());

        self.emit("autoscaler_cache_sync", &tags, &fields);
    }
}

pub fn current_time() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or_default()
}
