//! Logging setup: stdout plus non-blocking log files.

use std::path::Path;

use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt, Layer};

use crate::Result;

/// Default log filter directive.
pub const DEFAULT_LOG_FILTER: &str = "vidbridge=info,sqlx=warn";

/// Initialize the global tracing subscriber.
///
/// Writes human-readable logs to stdout, plain (non-ANSI) logs to
/// `<log_dir>/<log_file>`, and warnings/errors additionally to
/// `<log_dir>/<error_file>`, all through non-blocking appenders. The
/// returned guards must be held for the lifetime of the process so
/// buffered log lines are flushed on shutdown.
pub fn init(log_dir: &Path, log_file: &str, error_file: &str) -> Result<Vec<WorkerGuard>> {
    std::fs::create_dir_all(log_dir)?;

    let (output_writer, output_guard) =
        tracing_appender::non_blocking(tracing_appender::rolling::never(log_dir, log_file));
    let (error_writer, error_guard) =
        tracing_appender::non_blocking(tracing_appender::rolling::never(log_dir, error_file));

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| DEFAULT_LOG_FILTER.into());

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer())
        .with(fmt::layer().with_ansi(false).with_writer(output_writer))
        .with(
            fmt::layer()
                .with_ansi(false)
                .with_writer(error_writer)
                .with_filter(LevelFilter::WARN),
        )
        .init();

    Ok(vec![output_guard, error_guard])
}
