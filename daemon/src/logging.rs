/// Tracing setup: formatted output to stdout plus a plain-text copy appended
/// to `<app data dir>/log.txt`.
use std::path::Path;

use anyhow::{Context, Result};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::prelude::*;
use tracing_subscriber::EnvFilter;

use crate::paths::LOG_FILE_NAME;

/// Installs the global subscriber.  `RUST_LOG` overrides `default_filter`.
///
/// Keep the returned guard alive for the life of the process; dropping it
/// flushes and closes the log file.
pub fn init(app_dir: &Path, default_filter: &str) -> Result<WorkerGuard> {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));
    let (subscriber, guard) = subscriber(app_dir, filter)?;
    tracing::subscriber::set_global_default(subscriber)
        .context("Failed to install tracing subscriber")?;
    Ok(guard)
}

fn subscriber(
    app_dir: &Path,
    filter: EnvFilter,
) -> Result<(impl tracing::Subscriber + Send + Sync + 'static, WorkerGuard)> {
    std::fs::create_dir_all(app_dir)
        .with_context(|| format!("Failed to create log directory {}", app_dir.display()))?;

    let file_appender = tracing_appender::rolling::never(app_dir, LOG_FILE_NAME);
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

    let file_layer = tracing_subscriber::fmt::layer()
        .with_writer(non_blocking)
        .with_ansi(false);

    let subscriber = tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .with(file_layer);
    Ok((subscriber, guard))
}
