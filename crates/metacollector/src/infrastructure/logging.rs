//! Global tracing subscriber: human logs plus a line protocol metrics file.

use std::env;
use std::fmt::{self};
use std::path::Path;

use anyhow::Context as _;
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

/// Target of the events carrying encoded metric lines.
pub const METRICS_TARGET: &str = "metrics";

const DEFAULT_METRICS_FILE: &str = "/logs/metrics.log";

/// Writes the event's fields verbatim: a metrics event is a finished line.
struct LineProtocolFormatter;

struct FieldVisitor {
    msg: String,
}

impl Visit for FieldVisitor {
    fn record_str(&mut self, _: &Field, value: &str) {
        self.msg.push_str(value);
    }

    fn record_debug(&mut self, _: &Field, value: &dyn fmt::Debug) {
        self.msg.push_str(&format!("{value:?}"));
    }
}

impl<S, N> FormatEvent<S, N> for LineProtocolFormatter
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
        let mut visitor = FieldVisitor { msg: String::new() };
        event.record(&mut visitor);
        write!(writer, "{}", visitor.msg)
    }
}

/// Keeps the non-blocking writers flushing; drop on exit.
pub struct LoggingGuard {
    _metrics: WorkerGuard,
    _log: Option<WorkerGuard>,
}

/// Initiate the global tracing subscriber.
///
/// Events targeted at [`METRICS_TARGET`] go to a daily rolling file at
/// `metrics_file` and nowhere else.
pub fn init(metrics_file: Option<&Path>) -> anyhow::Result<LoggingGuard> {
    let log_path = env::var(LOG_PATH_ENV_VAR).ok();
    let (fmt_layer, log_guard) = utils::logging::get_fmt_layer(log_path);

    let metrics_file = metrics_file.unwrap_or(Path::new(DEFAULT_METRICS_FILE));
    let dir = metrics_file
        .parent()
        .filter(|dir| !dir.as_os_str().is_empty())
        .unwrap_or(Path::new("."));
    let prefix = metrics_file
        .file_name()
        .and_then(|name| name.to_str())
        .with_context(|| format!("invalid metrics file {}", metrics_file.display()))?;

    let env_filter = filter::EnvFilter::builder()
        .with_default_directive(filter::LevelFilter::INFO.into())
        .from_env_lossy();

    let fmt_layer = fmt_layer.with_filter(env_filter.and(filter::filter_fn(|metadata| {
        metadata.target() != METRICS_TARGET
    })));

    let appender = RollingFileAppender::builder()
        .rotation(Rotation::DAILY)
        .filename_prefix(prefix)
        .max_log_files(3)
        .build(dir)
        .with_context(|| format!("cannot create metrics appender in {}", dir.display()))?;

    let (file_writer, metrics_guard) = tracing_appender::non_blocking(appender);

    let metrics_layer = layer()
        .event_format(LineProtocolFormatter)
        .fmt_fields(format::DefaultFields::new())
        .with_writer(file_writer)
        .with_ansi(false)
        .with_filter(filter::filter_fn(|metadata| {
            metadata.target() == METRICS_TARGET
        }));

    registry()
        .with(fmt_layer)
        .with(metrics_layer)
        .try_init()
        .context("global tracing subscriber already set")?;

    Ok(LoggingGuard {
        _metrics: metrics_guard,
        _log: log_guard,
    })
}
