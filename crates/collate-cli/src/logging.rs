use std::env;
use std::path::{Path, PathBuf};
use tracing::{info, warn};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::prelude::*;
use tracing_subscriber::{fmt, EnvFilter};

const DEFAULT_LOG_FILE: &str = "./logs/collate.log";
const DEFAULT_LEVEL: &str = "info";

/// Stdout plus a plain-text log file. File lines carry the worker thread
/// (`collate-group-N`, `collate-task-N`) and the `group` span, so interleaved
/// groups can be told apart.
pub fn init_logger() -> WorkerGuard {
    let level = env::var("TRACING_LEVEL").unwrap_or_else(|_| DEFAULT_LEVEL.to_string());
    let (filter_layer, bad_level) = match EnvFilter::try_new(&level) {
        Ok(filter) => (filter, false),
        Err(_) => (EnvFilter::new(DEFAULT_LEVEL), true),
    };

    let log_file_path = env::var("LOG_FILE_PATH").unwrap_or_else(|_| DEFAULT_LOG_FILE.to_string());
    let (dir, file_name) = split_log_path(&log_file_path);
    let file_appender = tracing_appender::rolling::never(dir, file_name);
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

    tracing_subscriber::registry()
        .with(
            fmt::layer()
                .with_writer(std::io::stdout)
                .compact()
                .with_target(false)
                .without_time()
                .with_ansi(true),
        )
        .with(
            fmt::layer()
                .with_writer(non_blocking)
                .with_thread_names(true)
                .with_ansi(false),
        )
        .with(filter_layer)
        .init();

    if bad_level {
        warn!("Ignoring invalid TRACING_LEVEL '{}', using '{}'", level, DEFAULT_LEVEL);
    }
    info!("Logging to stdout and {}", log_file_path);

    guard
}

/// Directory and file name for the appender; a bare name logs to `.`.
fn split_log_path(path: &str) -> (PathBuf, PathBuf) {
    let path = Path::new(path);
    let dir = path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    let file_name = path
        .file_name()
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("collate.log"));
    (dir.to_path_buf(), file_name)
}
