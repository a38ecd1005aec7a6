//! Logging Infrastructure
//!
//! Structured logging with optional JSON output and daily rolling files.

use std::path::Path;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Initialize the logger with console output only
pub fn init_logger() -> anyhow::Result<Option<WorkerGuard>> {
    init_logger_with_file(None, false, None)
}

/// Initialize the logger with optional file output
///
/// `RUST_LOG` takes precedence over `log_level`. The returned guard flushes
/// the file writer on drop and must be held for the lifetime of the process.
pub fn init_logger_with_file(
    log_level: Option<&str>,
    json: bool,
    log_dir: Option<&str>,
) -> anyhow::Result<Option<WorkerGuard>> {
    let level = log_level.unwrap_or("info");
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(level))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    let (file_writer, guard) = match log_dir {
        Some(dir) => {
            let log_path = Path::new(dir);
            std::fs::create_dir_all(log_path)?;
            let appender = tracing_appender::rolling::daily(log_path, "plate-server");
            let (writer, guard) = tracing_appender::non_blocking(appender);
            (Some(writer), Some(guard))
        }
        None => (None, None),
    };

    let registry = tracing_subscriber::registry().with(filter);

    if json {
        let file_layer = file_writer.map(|w| fmt::layer().json().with_ansi(false).with_writer(w));
        registry
            .with(fmt::layer().json().with_target(true))
            .with(file_layer)
            .try_init()?;
    } else {
        let file_layer = file_writer.map(|w| fmt::layer().with_ansi(false).with_writer(w));
        registry
            .with(fmt::layer().with_target(false))
            .with(file_layer)
            .try_init()?;
    }

    Ok(guard)
}
