// src/logging.rs

//! Log output for the manager process.
//!
//! Everything goes to stderr through one `tracing-subscriber` fmt layer, so
//! `report`/`control` replies printed on stdout stay machine-readable.
//!
//! The level comes from `--log-level`, else `NOWCAST_LOG`, else `info`.
//! Operator alerts (target [`ALERT_TARGET`], field `alert`) are let through
//! at `warn` whatever the level, so a quiet manager still reports crashed
//! workers and failed persists. Route that target to a pager by adding a
//! layer filtered on it.

use anyhow::Result;
use tracing::Level;
use tracing_subscriber::{fmt, EnvFilter};

use crate::cli::LogLevel;
use crate::engine::alert::ALERT_TARGET;

pub const LOG_ENV_VAR: &str = "NOWCAST_LOG";

/// Install the global subscriber. Fails if one is already installed.
pub fn init_logging(cli_level: Option<LogLevel>) -> Result<()> {
    let level = match cli_level {
        Some(lvl) => level_from_log_level(lvl),
        None => std::env::var(LOG_ENV_VAR)
            .ok()
            .and_then(|s| parse_level_str(&s))
            .unwrap_or(Level::INFO),
    };

    fmt()
        .with_env_filter(log_filter(level))
        .with_target(true)
        .with_writer(std::io::stderr)
        .try_init()
        .map_err(|e| anyhow::anyhow!("installing log subscriber: {e}"))?;

    Ok(())
}

/// Filter directives for `level`. Alerts are only ever `warn` or `error`,
/// so a `warn` directive on their target passes all of them.
pub fn log_filter_directives(level: Level) -> String {
    format!("{},{ALERT_TARGET}=warn", level.as_str().to_lowercase())
}

fn log_filter(level: Level) -> EnvFilter {
    EnvFilter::new(log_filter_directives(level))
}

fn level_from_log_level(lvl: LogLevel) -> Level {
    match lvl {
        LogLevel::Error => Level::ERROR,
        LogLevel::Warn => Level::WARN,
        LogLevel::Info => Level::INFO,
        LogLevel::Debug => Level::DEBUG,
        LogLevel::Trace => Level::TRACE,
    }
}

pub fn parse_level_str(s: &str) -> Option<Level> {
    match s.trim().to_lowercase().as_str() {
        "error" => Some(Level::ERROR),
        "warn" | "warning" => Some(Level::WARN),
        "info" => Some(Level::INFO),
        "debug" => Some(Level::DEBUG),
        "trace" => Some(Level::TRACE),
        _ => None,
    }
}
