use std::fs::{File, OpenOptions};
use std::path::Path;
use std::sync::Mutex;

use anyhow::Context;
use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::prelude::*;
use tracing_subscriber::{fmt, EnvFilter};

use crate::paths::LogPaths;

/// Install the backend logger.
///
/// Everything at the active level goes to stdout and `backend_logs.txt`;
/// warnings and errors are additionally written to `backend_errors.txt`.
/// `RUST_LOG` takes precedence over `default_level`.
pub fn init(logs: &LogPaths, default_level: &str) -> anyhow::Result<()> {
    std::fs::create_dir_all(&logs.log_dir)
        .with_context(|| format!("failed to create log directory {}", logs.log_dir.display()))?;

    let log_file = open_append(&logs.backend_logs)?;
    let error_file = open_append(&logs.backend_errors)?;

    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(default_level))
        .context("invalid log filter")?;

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_target(false))
        .with(
            fmt::layer()
                .with_ansi(false)
                .with_writer(Mutex::new(log_file)),
        )
        .with(
            fmt::layer()
                .with_ansi(false)
                .with_writer(Mutex::new(error_file))
                .with_filter(LevelFilter::WARN),
        )
        .try_init()
        .context("a global logger is already installed")?;

    tracing::info!(log_dir = %logs.log_dir.display(), "backend logger initialized");
    Ok(())
}

fn open_append(path: &Path) -> anyhow::Result<File> {
    OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .with_context(|| format!("cannot write to log file {}", path.display()))
}
