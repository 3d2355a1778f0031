//! provides logging helpers

use tracing::Subscriber;
use tracing_subscriber::filter::{self};
use tracing_subscriber::fmt::layer;
use tracing_subscriber::prelude::*;
use tracing_subscriber::registry;
use tracing_subscriber::registry::LookupSpan;
use tracing_subscriber::Layer;

/// Directory for daily rolling log files; logs go to stderr when unset
pub const LOG_PATH_ENV_VAR: &str = "AUTOSCALER_LOG_PATH";

const LOG_FILE_PREFIX: &str = "autoscaler.log";

/// Builds the human readable fmt layer, writing to `log_path` when given.
pub fn get_fmt_layer<S>(log_path: Option<String>) -> Box<dyn Layer<S> + Send + Sync>
where
    S: Subscriber + for<'a> LookupSpan<'a>,
{
    match log_path {
        Some(path) => {
            let appender = tracing_appender::rolling::daily(path, LOG_FILE_PREFIX);
            layer()
                .with_writer(appender)
                .with_ansi(false)
                .with_target(true)
                .boxed()
        }
        None => layer()
            .with_writer(std::io::stderr)
            .with_target(true)
            .boxed(),
    }
}

/// initiate the global tracing subscriber
pub fn init() {
    let env_filter = filter::EnvFilter::builder()
        .with_default_directive(filter::LevelFilter::INFO.into())
        .from_env_lossy();

    let fmt_layer = get_fmt_layer(std::env::var(LOG_PATH_ENV_VAR).ok()).with_filter(env_filter);

    registry().with(fmt_layer).init();
}
