//! Structured logging for reddit_downloader
//!
//! Terminal output plus an optional daily-rolling log file, in JSON or line
//! format. `RUST_LOG` overrides the configured level.

use std::fs;
use std::path::Path;

use thiserror::Error;
use tracing::info;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{EnvFilter, Layer, fmt, fmt::time::ChronoUtc, prelude::*};

use crate::config::Logging;

/// Log file name prefix inside the log directory
pub const LOG_FILE_NAME: &str = "reddit_downloader.log";

/// Error types for logging
#[derive(Error, Debug)]
pub enum LoggerError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid log filter '{filter}': {reason}")]
    Filter { filter: String, reason: String },

    #[error("Logging error: {0}")]
    Logging(String),
}

/// Result type for logging operations
pub type LoggerResult<T> = Result<T, LoggerError>;

/// Keeps the non-blocking file writer alive; drop it last to flush the log.
pub struct LogGuard {
    _file_guard: Option<WorkerGuard>,
}

/// Install the global subscriber described by `logging`
pub fn init_logger(logging: &Logging, log_dir: &Path) -> LoggerResult<LogGuard> {
    let filter = build_filter(std::env::var("RUST_LOG").ok().as_deref(), &logging.log_level)?;
    let json = logging.log_format == "json";

    let terminal_layer = logging.log_to_terminal.then(|| {
        fmt::layer()
            .with_writer(std::io::stderr)
            .with_timer(ChronoUtc::rfc_3339())
            .with_target(false)
            .boxed()
    });

    let mut file_guard = None;
    let file_layer = if logging.log_to_file {
        fs::create_dir_all(log_dir)?;
        let file_appender = RollingFileAppender::new(Rotation::DAILY, log_dir, LOG_FILE_NAME);
        let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);
        file_guard = Some(guard);

        let layer = if json {
            fmt::layer()
                .json()
                .with_writer(non_blocking)
                .with_timer(ChronoUtc::rfc_3339())
                .boxed()
        } else {
            fmt::layer()
                .with_ansi(false)
                .with_writer(non_blocking)
                .with_timer(ChronoUtc::rfc_3339())
                .boxed()
        };
        Some(layer)
    } else {
        None
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(terminal_layer)
        .with(file_layer)
        .try_init()
        .map_err(|e| LoggerError::Logging(e.to_string()))?;

    info!(
        log_format = %logging.log_format,
        log_level = %logging.log_level,
        log_dir = %log_dir.display(),
        "Logger initialized"
    );

    Ok(LogGuard { _file_guard: file_guard })
}

/// An explicit `RUST_LOG` value wins over the configured level.
fn build_filter(env_override: Option<&str>, level: &str) -> LoggerResult<EnvFilter> {
    let filter = env_override.filter(|value| !value.trim().is_empty()).unwrap_or(level);
    EnvFilter::try_new(filter).map_err(|e| LoggerError::Filter {
        filter: filter.to_string(),
        reason: e.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tracing::level_filters::LevelFilter;

    #[test]
    fn test_configured_level_is_used_without_override() {
        let filter = build_filter(None, "debug").unwrap();
        assert_eq!(filter.max_level_hint(), Some(LevelFilter::DEBUG));
    }

    #[test]
    fn test_env_override_wins() {
        let filter = build_filter(Some("reddit_downloader=trace"), "info").unwrap();
        assert_eq!(filter.max_level_hint(), Some(LevelFilter::TRACE));

        let filter = build_filter(Some("  "), "warn").unwrap();
        assert_eq!(filter.max_level_hint(), Some(LevelFilter::WARN));
    }

    #[test]
    fn test_invalid_filter_is_rejected() {
        let result = build_filter(None, "reddit_downloader=loudest");
        assert!(matches!(result, Err(LoggerError::Filter { .. })));
    }
}
