use std::path::PathBuf;

use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling;
use tracing_subscriber::{EnvFilter, Layer, fmt, layer::SubscriberExt, util::SubscriberInitExt};

use crate::error::{BootstrapError, Result};

/// Where and how log lines are written.
#[derive(Debug, Clone, Default)]
pub struct LogSettings {
    /// Directory for `bootstrap.log.{date}`; stdout only when `None`.
    pub log_dir: Option<PathBuf>,
    /// JSON lines in the file instead of logfmt.
    pub json_format: bool,
}

/// Initialize tracing with stdout output and an optional daily rolling file.
///
/// Filtering follows `RUST_LOG`, defaulting to `info`. Keep the returned guard
/// alive for as long as file output is wanted; dropping it flushes the writer.
/// Calling this twice is an error rather than a panic.
pub fn init_logging(settings: &LogSettings) -> Result<Option<WorkerGuard>> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    // Console layer (stdout for dev visibility)
    let stdout_layer = fmt::layer()
        .with_writer(std::io::stdout)
        .with_target(false)
        .with_level(true);

    let (file_layer, guard) = match &settings.log_dir {
        Some(dir) => {
            let file_appender = rolling::daily(dir, "bootstrap.log");
            let (non_blocking_file, guard) = tracing_appender::non_blocking(file_appender);
            let layer = if settings.json_format {
                fmt::layer()
                    .json()
                    .with_writer(non_blocking_file)
                    .with_current_span(false)
                    .with_span_list(false)
                    .with_level(true)
                    .boxed()
            } else {
                fmt::layer()
                    .with_writer(non_blocking_file)
                    .with_target(false)
                    .with_level(true)
                    .with_ansi(false)
                    .boxed()
            };
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(stdout_layer)
        .with(file_layer)
        .try_init()
        .map_err(|e| BootstrapError::Logging(format!("logging already initialized: {e}")))?;

    Ok(guard)
}
