use clap::Parser;
use clap::Subcommand;
use utils::version;

use crate::config::daemon::DaemonArgs;
use crate::config::daemon::ValidateConfigArgs;

#[derive(Parser)]
#[command(about, long_about, version = &**version::VERSION)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run the autoscaler daemon
    Run(Box<DaemonArgs>),
    /// Load and validate a node groups file, then exit
    #[command(name = "validate-config")]
    ValidateConfig(ValidateConfigArgs),
}
