// src/engine/core.rs

//! Pure core manager state machine.
//!
//! This module contains a synchronous, deterministic "core" that consumes
//! [`ManagerEvent`]s and produces:
//! - the next core state (checklist file + tables), if anything changed
//! - whether that state must be persisted before it takes effect
//! - a list of "commands" describing what the IO shell should do next
//!
//! The async/IO-heavy shell (`engine::runtime::Runtime`) is responsible for:
//! - reading events from channels
//! - persisting the checklist file, then committing the state
//! - launching workers, running watchdog timers, sending replies
//! - handling Ctrl+C / shutdown
//!
//! The core is tested without any Tokio, channels, filesystem, or processes.
//! Time is passed in, never read.

use std::sync::Arc;

use chrono::{DateTime, Utc};

use crate::checklist::{Checklist, ChecklistFile};
use crate::config::PipelineTables;
use crate::engine::event_handlers::{
    handle_config_reloaded, handle_control, handle_delivery, handle_process_exited,
    handle_shutdown, handle_watchdog_expired, CoreCommand, CoreStep,
};
use crate::engine::pairs::PairState;
use crate::engine::{CoreOptions, ManagerEvent};
use crate::types::PairKey;

/// Everything a handler may read, as one immutable value.
#[derive(Debug, Clone)]
pub struct CoreState {
    /// Registry, rules and run types; replaced whole on reload.
    pub tables: Arc<PipelineTables>,
    /// Checklist and pair table, exactly as persisted.
    pub file: ChecklistFile,
    /// Set once shutdown starts; no launches after that.
    pub draining: bool,
}

impl CoreState {
    pub fn with_file(&self, file: ChecklistFile) -> Self {
        Self {
            tables: Arc::clone(&self.tables),
            file,
            draining: self.draining,
        }
    }
}

/// Pure core manager.
///
/// It has **no** channels, no Tokio types, and does not perform any IO.
#[derive(Debug)]
pub struct ManagerCore {
    state: CoreState,
    options: CoreOptions,
}

impl ManagerCore {
    pub fn new(tables: Arc<PipelineTables>, file: ChecklistFile, options: CoreOptions) -> Self {
        Self {
            state: CoreState {
                tables,
                file,
                draining: false,
            },
            options,
        }
    }

    pub fn state(&self) -> &CoreState {
        &self.state
    }

    pub fn options(&self) -> &CoreOptions {
        &self.options
    }

    pub fn checklist(&self) -> &Checklist {
        &self.state.file.checklist
    }

    pub fn pair(&self, pair: &PairKey) -> Option<&PairState> {
        self.state.file.pair(pair)
    }

    pub fn is_draining(&self) -> bool {
        self.state.draining
    }

    /// Handle a single event against the current state and return what
    /// should happen. Nothing changes until [`ManagerCore::commit`].
    pub fn step(&self, event: ManagerEvent, now: DateTime<Utc>) -> CoreStep {
        match event {
            ManagerEvent::Delivered(delivery) => {
                handle_delivery(&self.state, &self.options, delivery, now)
            }
            ManagerEvent::WatchdogExpired { pair, launch_id } => {
                handle_watchdog_expired(&self.state, &self.options, pair, launch_id, now)
            }
            ManagerEvent::ProcessExited {
                pair,
                launch_id,
                exit_code,
            } => handle_process_exited(&self.state, &self.options, pair, launch_id, exit_code, now),
            ManagerEvent::Control { command, reply } => handle_control(&self.state, command, reply),
            ManagerEvent::ConfigReloaded { result, reply } => {
                handle_config_reloaded(&self.state, result, reply)
            }
            ManagerEvent::ShutdownRequested => handle_shutdown(&self.state),
        }
    }

    /// Adopt a state produced by [`ManagerCore::step`].
    pub fn commit(&mut self, next: CoreState) {
        self.state = next;
    }

    /// Watchdogs to re-arm after a restart, one per pair still `Launched`,
    /// with whatever time its deadline has left.
    pub fn recovery_commands(&self, now: DateTime<Utc>) -> Vec<CoreCommand> {
        self.state
            .file
            .workers
            .iter()
            .filter(|(_, p)| p.is_launched())
            .filter_map(|(pair, p)| {
                let launch_id = p.launch_id?;
                let after = match p.deadline {
                    Some(deadline) => (deadline - now).to_std().unwrap_or_default(),
                    None => self.options.watchdog_timeout,
                };
                Some(CoreCommand::ArmWatchdog {
                    pair: pair.clone(),
                    launch_id,
                    after,
                })
            })
            .collect()
    }
}
