//! Logging infrastructure for webticks
//!
//! Logs are written to `~/.local/state/webticks/webticks.log` following XDG
//! standards, optionally mirrored to stderr.
//!
//! The filter comes from `RUST_LOG` when set. Otherwise it is
//! `logging.level`, with `webticks_core` raised to `debug` when the tracker
//! runs with `tracker.debug = true`, so batch delivery and page change
//! detection show up next to the per-event queue lines.

use crate::config::Config;
use std::io::IsTerminal;
use std::path::PathBuf;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{
    fmt::{self, format::FmtSpan},
    layer::SubscriberExt,
    util::SubscriberInitExt,
    EnvFilter,
};

/// Initialize the logging system
///
/// Sets up tracing with:
/// - File output to XDG state directory, rotated daily
/// - A compact stderr layer when `console` is set
/// - The filter described in the module docs
pub fn init(config: &Config, console: bool) -> crate::error::Result<LoggingGuard> {
    let log_dir = Config::state_dir();

    std::fs::create_dir_all(&log_dir)?;

    let file_appender = RollingFileAppender::new(Rotation::DAILY, &log_dir, "webticks.log");
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

    let directives = filter_directives(config);
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&directives));

    let file_layer = fmt::layer()
        .with_writer(non_blocking)
        .with_ansi(false)
        .with_target(true)
        .with_thread_ids(true)
        .with_file(true)
        .with_line_number(true);

    let console_layer = console.then(|| {
        fmt::layer()
            .compact()
            .with_writer(std::io::stderr)
            .with_ansi(std::io::stderr().is_terminal())
            .with_target(false)
    });

    tracing_subscriber::registry()
        .with(filter)
        .with(file_layer)
        .with(console_layer)
        .try_init()
        .map_err(|e| crate::error::Error::Config(format!("logging already initialized: {}", e)))?;

    tracing::info!(
        log_dir = %log_dir.display(),
        filter = %directives,
        console,
        "Logging initialized"
    );

    Ok(LoggingGuard { _guard: guard })
}

/// Default filter directives for `config`, used when `RUST_LOG` is unset
pub fn filter_directives(config: &Config) -> String {
    let level = config.logging.level.trim();
    if config.tracker.debug && !matches!(level, "debug" | "trace") {
        format!("{},webticks_core=debug", level)
    } else {
        level.to_string()
    }
}

/// Initialize logging for tests (logs to stdout)
pub fn init_test() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .with_span_events(FmtSpan::CLOSE)
        .try_init();
}

/// Guard that keeps the logging system alive
///
/// When dropped, flushes any pending log writes.
pub struct LoggingGuard {
    _guard: tracing_appender::non_blocking::WorkerGuard,
}

/// Returns the log file path
pub fn log_file_path() -> PathBuf {
    Config::log_path()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_log_file_path() {
        let path = log_file_path();
        assert!(path.ends_with("webticks.log"));
    }

    #[test]
    fn test_filter_uses_configured_level() {
        let mut config = Config::default();
        config.logging.level = "warn".to_string();
        assert_eq!(filter_directives(&config), "warn");
    }

    #[test]
    fn test_tracker_debug_raises_crate_level() {
        let mut config = Config::default();
        config.tracker.debug = true;
        assert_eq!(filter_directives(&config), "info,webticks_core=debug");

        config.logging.level = "trace".to_string();
        assert_eq!(filter_directives(&config), "trace");
    }
}
