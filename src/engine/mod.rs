// src/engine/mod.rs

//! Orchestration engine for the nowcast manager.
//!
//! This module ties together:
//! - the per-pair lifecycle table (`Idle -> Launched -> terminal`)
//! - message handling: registry check, checklist update, resolution, launch
//! - the watchdog that turns silent workers into synthetic crashes
//! - the main runtime event loop that reacts to:
//!   - broker deliveries
//!   - watchdog expiries and process exits
//!   - operator control commands and config reloads
//!   - shutdown signals
//!
//! The pure core state machine lives in [`core`]; the async/IO shell is
//! implemented in [`runtime`].

use std::sync::Arc;
use std::time::Duration;

use chrono::NaiveDate;

use crate::broker::{Delivery, ReplyTo};
use crate::config::PipelineTables;
use crate::resolver::LaunchSpec;
use crate::types::{PairKey, RunType};

pub mod alert;
pub mod core;
pub mod event_handlers;
pub mod pairs;
pub mod runtime;
pub mod watchdog;

pub use alert::{Alert, AlertKind};
pub use core::{CoreState, ManagerCore};
pub use event_handlers::{CoreCommand, CoreStep};
pub use pairs::{PairState, Phase};
pub use runtime::Runtime;
pub use watchdog::Watchdogs;

/// Options used by the core when it decides launch deadlines and how much
/// per-run history to keep.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CoreOptions {
    /// Default time a launched worker has to report.
    pub watchdog_timeout: Duration,
    /// Time allowed between a process exit and its message.
    pub crash_grace: Duration,
    /// Days of finished pair state kept behind the newest run date.
    pub pair_retention_days: u32,
}

/// Operator commands.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ControlCommand {
    Reload,
    Status,
    Shutdown,
    /// Reset a run type, optionally for a single run date.
    ClearChecklist {
        run_type: RunType,
        run_date: Option<NaiveDate>,
    },
}

impl ControlCommand {
    pub fn name(&self) -> &'static str {
        match self {
            ControlCommand::Reload => "reload",
            ControlCommand::Status => "status",
            ControlCommand::Shutdown => "shutdown",
            ControlCommand::ClearChecklist { .. } => "clear_checklist",
        }
    }
}

/// A materialized launch, ready for the launcher.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LaunchOrder {
    pub spec: LaunchSpec,
    pub launch_id: u64,
    /// Program and leading arguments from the registry.
    pub command: Vec<String>,
}

impl LaunchOrder {
    pub fn pair(&self) -> PairKey {
        PairKey::new(self.spec.worker.clone(), self.spec.run_context.clone())
    }
}

/// Events flowing into the runtime from the broker, launcher, watchdog, etc.
#[derive(Debug, Clone)]
pub enum ManagerEvent {
    /// A worker message delivered by the broker.
    Delivered(Delivery),
    /// The watchdog for `launch_id` fired.
    WatchdogExpired { pair: PairKey, launch_id: u64 },
    /// A launched process exited; `exit_code` is `None` if it never started
    /// or was killed by a signal.
    ProcessExited {
        pair: PairKey,
        launch_id: u64,
        exit_code: Option<i32>,
    },
    Control {
        command: ControlCommand,
        reply: Option<ReplyTo>,
    },
    /// Result of loading the config file for a reload.
    ConfigReloaded {
        result: Result<Arc<PipelineTables>, String>,
        reply: Option<ReplyTo>,
    },
    /// Graceful shutdown requested (e.g. Ctrl-C).
    ShutdownRequested,
}
