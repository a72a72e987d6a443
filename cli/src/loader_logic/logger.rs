use anyhow::Result;
use std::fs;
use std::path::Path;
use tracing::info;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::{non_blocking, rolling};
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

const LOG_FILE_PREFIX: &str = "defi_loader.log";

/// Installs the global subscriber: human-readable console output on stderr
/// and JSON lines in a daily rolling file under `log_dir`.
///
/// `RUST_LOG` wins over `log_level`. The returned guard flushes the file
/// writer when dropped, so keep it alive until the program exits.
pub fn setup_logging(log_dir: &Path, log_level: &str) -> Result<WorkerGuard> {
    fs::create_dir_all(log_dir)?;

    let file_appender = rolling::daily(log_dir, LOG_FILE_PREFIX);
    let (non_blocking_appender, guard) = non_blocking(file_appender);

    // stdout carries the command's JSON report
    let console_layer = fmt::layer()
        .with_target(true)
        .with_ansi(true)
        .with_writer(std::io::stderr);

    let file_layer = fmt::layer()
        .with_ansi(false)
        .with_writer(non_blocking_appender)
        .json();

    let env_filter = EnvFilter::try_from_default_env().or_else(|_| EnvFilter::try_new(log_level))?;

    tracing_subscriber::registry()
        .with(env_filter)
        .with(console_layer)
        .with(file_layer)
        .try_init()?;

    info!(%log_level, log_dir = %log_dir.display(), "logging initialized");
    Ok(guard)
}
