//! provides logging helpers

use std::env;
use std::fmt::{self};
use std::path::Path;

use anyhow::Context;
use anyhow::Result;
use tracing::field::Field;
use tracing::field::Visit;
use tracing::Event;
use tracing::Subscriber;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::RollingFileAppender;
use tracing_appender::rolling::Rotation;
use tracing_subscriber::filter::FilterExt;
use tracing_subscriber::filter::{self};
use tracing_subscriber::fmt::format;
use tracing_subscriber::fmt::layer;
use tracing_subscriber::fmt::FmtContext;
use tracing_subscriber::fmt::FormatEvent;
use tracing_subscriber::prelude::*;
use tracing_subscriber::registry;
use utils::logging::LOG_PATH_ENV_VAR;

/// Target of events carrying pre-encoded metric lines
pub const METRICS_TARGET: &str = "metrics";

/// Writes the `msg` field of an event verbatim, without level or timestamp.
struct MetricLineFormatter;

struct MessageVisitor {
    msg: String,
}

impl Visit for MessageVisitor {
    fn record_str(&mut self, field: &Field, value: &str) {
        if field.name() == "msg" {
            self.msg.push_str(value);
        }
    }

    fn record_debug(&mut self, field: &Field, value: &dyn fmt::Debug) {
        if field.name() == "msg" {
            self.msg.push_str(&format!("{value:?}"));
        }
    }
}

impl<S, N> FormatEvent<S, N> for MetricLineFormatter
where
    S: Subscriber + for<'a> tracing_subscriber::registry::LookupSpan<'a>,
    N: for<'a> tracing_subscriber::fmt::FormatFields<'a> + 'static,
{
    fn format_event(
        &self,
        _ctx: &FmtContext<'_, S, N>,
        mut writer: format::Writer<'_>,
        event: &Event<'_>,
    ) -> fmt::Result {
        let mut visitor = MessageVisitor { msg: String::new() };
        event.record(&mut visitor);
        if !visitor.msg.ends_with('\n') {
            visitor.msg.push('\n');
        }
        write!(writer, "{}", visitor.msg)
    }
}

fn is_metric(metadata: &tracing::Metadata<'_>) -> bool {
    metadata.target() == METRICS_TARGET
}

/// initiate the global tracing subscriber
///
/// Regular logs go to stderr (or to a rolling file under
/// `AUTOSCALER_LOG_PATH`); metric lines go to a daily rolling `metrics_file`.
/// The returned guard flushes the metrics writer when dropped.
pub fn init(metrics_file: &Path) -> Result<WorkerGuard> {
    let log_path = env::var(LOG_PATH_ENV_VAR).ok();
    let fmt_layer = utils::logging::get_fmt_layer(log_path);

    let dir = metrics_file
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or(Path::new("."));
    let file = metrics_file
        .file_name()
        .and_then(|name| name.to_str())
        .with_context(|| format!("invalid metrics file path: {}", metrics_file.display()))?;

    let env_filter = filter::EnvFilter::builder()
        .with_default_directive(filter::LevelFilter::INFO.into())
        .from_env_lossy();
    let fmt_layer = fmt_layer.with_filter(env_filter.and(filter::filter_fn(|m| !is_metric(m))));

    let appender = RollingFileAppender::builder()
        .rotation(Rotation::DAILY)
        .filename_prefix(file)
        .max_log_files(3)
        .build(dir)
        .context("failed to create rolling metrics file appender")?;
    let (file_writer, file_guard) = tracing_appender::non_blocking(appender);

    let metrics_layer = layer()
        .event_format(MetricLineFormatter)
        .fmt_fields(format::DefaultFields::new())
        .with_writer(file_writer)
        .with_ansi(false)
        .with_filter(filter::filter_fn(is_metric));

    registry().with(fmt_layer).with(metrics_layer).try_init()?;
    Ok(file_guard)
}
