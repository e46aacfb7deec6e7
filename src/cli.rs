// src/cli.rs

//! CLI argument parsing using `clap`.

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueEnum};

use crate::config::default_config_path;

/// Command-line arguments for `nowcast-manager`.
#[derive(Debug, Clone, Parser)]
#[command(
    name = "nowcast-manager",
    version,
    about = "Orchestrate nowcast pipeline workers from their completion messages.",
    long_about = None
)]
pub struct CliArgs {
    /// Logging level (error, warn, info, debug, trace).
    ///
    /// If omitted, `NOWCAST_LOG` or a default level will be used.
    #[arg(long, value_enum, value_name = "LEVEL", global = true)]
    pub log_level: Option<LogLevel>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Clone, Subcommand)]
pub enum Command {
    /// Run the manager and its broker.
    Serve {
        #[command(flatten)]
        config: ConfigArg,

        /// Parse + validate, print registry and rules, but don't start.
        #[arg(long)]
        dry_run: bool,
    },

    /// Send a worker completion message to a running broker.
    Report(ReportArgs),

    /// Send an operator command to a running manager.
    Control {
        /// Broker address.
        #[arg(long, value_name = "HOST:PORT", default_value = "127.0.0.1:5555")]
        addr: String,

        #[command(subcommand)]
        action: ControlAction,
    },

    /// Validate a config file and print what it defines.
    Check {
        #[command(flatten)]
        config: ConfigArg,
    },
}

#[derive(Debug, Clone, Args)]
pub struct ConfigArg {
    /// Path to the config file (TOML).
    ///
    /// Default: `nowcast.toml` in the current working directory.
    #[arg(long, value_name = "PATH", default_value_os_t = default_config_path())]
    pub config: PathBuf,
}

#[derive(Debug, Clone, Args)]
pub struct ReportArgs {
    /// Broker address.
    #[arg(long, value_name = "HOST:PORT", default_value = "127.0.0.1:5555")]
    pub addr: String,

    #[arg(long)]
    pub worker: String,

    /// Message type, e.g. "success 06" or "failure".
    #[arg(long = "type", value_name = "TYPE")]
    pub message_type: String,

    #[arg(long)]
    pub run_type: String,

    /// Run date as YYYY-MM-DD.
    #[arg(long, value_name = "DATE")]
    pub run_date: String,

    /// JSON object carried as the message payload.
    #[arg(long, value_name = "JSON")]
    pub payload: Option<String>,

    /// Idempotency key; derived from the content when omitted.
    #[arg(long)]
    pub id: Option<String>,
}

#[derive(Debug, Clone, Subcommand)]
pub enum ControlAction {
    /// Reload registry and rules from the config file.
    Reload,
    /// Print the manager's pair table and checklist.
    Status,
    /// Stop launching, drain, persist and exit.
    Shutdown,
    /// Reset a run type's checklist entries and pair states.
    ClearChecklist {
        #[arg(long)]
        run_type: String,

        /// Only clear this run date (YYYY-MM-DD).
        #[arg(long, value_name = "DATE")]
        run_date: Option<String>,
    },
}

/// Log level as exposed on the CLI.
#[derive(Debug, Copy, Clone, ValueEnum)]
pub enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

/// Convenience wrapper around `CliArgs::parse()`.
pub fn parse() -> CliArgs {
    CliArgs::parse()
}
