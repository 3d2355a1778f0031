use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;

#[derive(Parser, Debug, Clone)]
pub struct DaemonArgs {
    #[arg(
        long,
        env = "NODEGROUPS_CONFIG",
        value_hint = clap::ValueHint::FilePath,
        help = "Config file describing the node groups to scale"
    )]
    pub nodegroups: PathBuf,

    #[arg(
        long,
        env = "KUBECONFIG",
        value_hint = clap::ValueHint::FilePath,
        help = "Path to kubeconfig file (defaults to in-cluster config or ~/.kube/config)"
    )]
    pub kubeconfig: Option<PathBuf>,

    #[arg(
        long,
        default_value = "60",
        help = "How often the cluster is re-evaluated for scale up or down, in seconds"
    )]
    pub scan_interval_secs: u64,

    #[arg(
        long,
        default_value = "3600",
        help = "How often the pod and node caches re-list everything, in seconds"
    )]
    pub resync_interval_secs: u64,

    #[arg(long, help = "Only consider pods in this namespace (empty for all namespaces)")]
    pub namespace: Option<String>,

    #[arg(long, help = "Only consider pods matching this label selector")]
    pub pod_label_selector: Option<String>,

    #[arg(
        long,
        env = "AUTOSCALER_METRICS_FILE",
        value_hint = clap::ValueHint::FilePath,
        default_value = "/logs/metrics.log",
        help = "Path for scaling metrics output, e.g. /logs/metrics.log"
    )]
    pub metrics_file: PathBuf,

    #[arg(
        long,
        env = "AUTOSCALER_METRICS_FORMAT",
        default_value = "influx",
        help = "Metrics format, either 'influx' or 'json'"
    )]
    pub metrics_format: String,

    #[arg(
        long,
        env = "DRY_MODE",
        help = "Log scaling actions instead of calling the cluster",
        default_value_t = false,
        action = clap::ArgAction::Set
    )]
    pub dry_mode: bool,
}

impl DaemonArgs {
    pub fn scan_interval(&self) -> Duration {
        Duration::from_secs(self.scan_interval_secs.max(1))
    }

    pub fn resync_interval(&self) -> Duration {
        Duration::from_secs(self.resync_interval_secs.max(1))
    }
}

#[derive(Parser, Debug, Clone)]
pub struct ValidateConfigArgs {
    #[arg(
        long,
        env = "NODEGROUPS_CONFIG",
        value_hint = clap::ValueHint::FilePath,
        help = "Config file describing the node groups to scale"
    )]
    pub nodegroups: PathBuf,
}
