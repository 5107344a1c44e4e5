//! provides logging helpers

use std::path::Path;

use tracing::Subscriber;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::RollingFileAppender;
use tracing_appender::rolling::Rotation;
use tracing_subscriber::filter::{self};
use tracing_subscriber::fmt::layer;
use tracing_subscriber::prelude::*;
use tracing_subscriber::registry;
use tracing_subscriber::registry::LookupSpan;
use tracing_subscriber::Layer;

/// Environment variable pointing at a log file. When unset logs go to stderr.
pub const LOG_PATH_ENV_VAR: &str = "METACOLLECTOR_LOG_PATH";

pub type BoxedLayer<S> = Box<dyn Layer<S> + Send + Sync + 'static>;

/// initiate the global tracing subscriber
pub fn init() {
    let env_filter = filter::EnvFilter::builder()
        .with_default_directive(filter::LevelFilter::INFO.into())
        .from_env_lossy();

    let fmt_layer = layer()
        .with_writer(std::io::stderr)
        .with_target(true)
        .with_filter(env_filter);

    registry().with(fmt_layer).init();
}

/// Build the human-readable log layer.
///
/// With a `log_path` the layer writes to a daily rolling file next to it and the
/// returned guard must be kept alive for the lifetime of the process. Without
/// one, or when the file cannot be created, it writes to stderr.
pub fn get_fmt_layer<S>(log_path: Option<String>) -> (BoxedLayer<S>, Option<WorkerGuard>)
where
    S: Subscriber + for<'a> LookupSpan<'a>,
{
    if let Some(log_path) = log_path {
        let path = Path::new(&log_path);
        let dir = path.parent().unwrap_or(Path::new("."));
        let prefix = path
            .file_name()
            .and_then(|name| name.to_str())
            .unwrap_or("metacollector.log");

        match RollingFileAppender::builder()
            .rotation(Rotation::DAILY)
            .filename_prefix(prefix)
            .max_log_files(7)
            .build(dir)
        {
            Ok(appender) => {
                let (writer, guard) = tracing_appender::non_blocking(appender);
                let fmt_layer = layer()
                    .with_writer(writer)
                    .with_ansi(false)
                    .with_target(true)
                    .boxed();
                return (fmt_layer, Some(guard));
            }
            Err(e) => {
                eprintln!("failed to open log file {log_path}: {e}, logging to stderr");
            }
        }
    }

    let fmt_layer = layer()
        .with_writer(std::io::stderr)
        .with_target(true)
        .boxed();
    (fmt_layer, None)
}
