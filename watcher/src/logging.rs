//! Logging setup.
//!
//! Log lines go to stdout and, without ANSI colours, to the configured log
//! file. The file is written by a background thread from `tracing-appender`;
//! keep the returned [`WorkerGuard`] alive until exit or buffered lines are
//! lost.
//!
//! The level comes from `RUST_LOG` and defaults to `info`.

use std::fs;
use std::io;
use std::path::Path;

use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

/// Fallback file name when the log path has none.
const DEFAULT_LOG_FILE_NAME: &str = "discord_watcher.log";

/// Installs the global subscriber.
///
/// # Errors
///
/// Returns an error if the log file's directory cannot be created.
///
/// # Panics
///
/// Panics if a global subscriber is already installed.
pub fn init_logging(log_file: &Path) -> io::Result<WorkerGuard> {
    let directory = match log_file.parent() {
        Some(dir) if !dir.as_os_str().is_empty() => dir,
        _ => Path::new("."),
    };
    fs::create_dir_all(directory)?;

    let file_name = log_file
        .file_name()
        .map_or_else(|| DEFAULT_LOG_FILE_NAME.into(), ToOwned::to_owned);

    let appender = tracing_appender::rolling::never(directory, file_name);
    let (file_writer, guard) = tracing_appender::non_blocking(appender);

    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let stdout_layer = fmt::layer().with_target(true).with_level(true);

    let file_layer = fmt::layer()
        .with_writer(file_writer)
        .with_ansi(false)
        .with_target(true)
        .with_level(true);

    tracing_subscriber::registry()
        .with(env_filter)
        .with(stdout_layer)
        .with(file_layer)
        .init();

    Ok(guard)
}
