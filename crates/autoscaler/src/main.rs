use anyhow::Result;
use autoscaler::app::builder::load_registry_from;
use autoscaler::app::ApplicationBuilder;
use autoscaler::config::Cli;
use autoscaler::config::Commands;
use autoscaler::config::DaemonArgs;
use autoscaler::config::ValidateConfigArgs;
use autoscaler::logging;
use clap::Parser;
use utils::version;

/// Sets up global panic hooks.
fn setup_global_hooks() {
    let default_hook = std::panic::take_hook();
    std::panic::set_hook(Box::new(move |panic_info| {
        default_hook(panic_info);
        tracing::error!("Thread panicked: {}", panic_info);
    }));
}

#[tokio::main]
async fn main() -> Result<()> {
    setup_global_hooks();

    let cli = Cli::parse();

    match cli.command {
        Commands::Run(daemon_args) => run_daemon(*daemon_args).await,
        Commands::ValidateConfig(args) => validate_config(args),
    }
}

async fn run_daemon(daemon_args: DaemonArgs) -> Result<()> {
    let _guard = logging::init(&daemon_args.metrics_file)?;

    tracing::info!("Starting autoscaler {}", &**version::VERSION);

    let app = ApplicationBuilder::new(daemon_args).build().await?;
    app.run().await
}

fn validate_config(args: ValidateConfigArgs) -> Result<()> {
    utils::logging::init();

    let registry = load_registry_from(&args.nodegroups)?;
    for group in registry.groups() {
        println!(
            "{}: {}={} nodes [{}, {}] scale up above {}%, down below {}%, cooldown {}s",
            group.name,
            group.label_key,
            group.label_value,
            group.min_nodes,
            group.max_nodes,
            group.scale_up_threshold_percent,
            group.scale_down_threshold_percent,
            group.cooldown_seconds,
        );
    }
    println!("{} node group(s) valid", registry.len());
    Ok(())
}
