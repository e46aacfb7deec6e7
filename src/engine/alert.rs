// src/engine/alert.rs

//! Operator-visible alerts.
//!
//! Alerts are ordinary `tracing` events on the [`ALERT_TARGET`] target with an
//! `alert` field naming the kind, so any subscriber layer can route them to a
//! pager, mail or chat sink.

use std::fmt;

use tracing::{error, warn};

use crate::message::MessageType;
use crate::types::{RunContext, WorkerId};

pub const ALERT_TARGET: &str = "nowcast_manager::alert";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AlertKind {
    /// A worker reported a failure message.
    WorkerFailed,
    /// A worker crashed, or the watchdog presumed it did.
    WorkerCrashed,
    /// A registered success message has no rule; forward progress stalled.
    NoResolutionRule,
    ReloadFailed,
    /// The checklist could not be persisted; the event will be retried.
    PersistFailed,
    LaunchFailed,
}

impl AlertKind {
    pub fn as_str(self) -> &'static str {
        match self {
            AlertKind::WorkerFailed => "worker_failed",
            AlertKind::WorkerCrashed => "worker_crashed",
            AlertKind::NoResolutionRule => "no_resolution_rule",
            AlertKind::ReloadFailed => "reload_failed",
            AlertKind::PersistFailed => "persist_failed",
            AlertKind::LaunchFailed => "launch_failed",
        }
    }

    /// Critical alerts are logged at `error`, the rest at `warn`.
    pub fn is_critical(self) -> bool {
        matches!(
            self,
            AlertKind::WorkerCrashed | AlertKind::PersistFailed | AlertKind::LaunchFailed
        )
    }
}

impl fmt::Display for AlertKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Alert {
    pub kind: AlertKind,
    pub worker: Option<WorkerId>,
    pub message_type: Option<MessageType>,
    pub run_context: Option<RunContext>,
    pub reason: String,
}

impl Alert {
    pub fn new(kind: AlertKind, reason: impl Into<String>) -> Self {
        Self {
            kind,
            worker: None,
            message_type: None,
            run_context: None,
            reason: reason.into(),
        }
    }

    pub fn for_message(
        kind: AlertKind,
        worker: &WorkerId,
        message_type: &MessageType,
        run_context: &RunContext,
        reason: impl Into<String>,
    ) -> Self {
        Self {
            kind,
            worker: Some(worker.clone()),
            message_type: Some(message_type.clone()),
            run_context: Some(run_context.clone()),
            reason: reason.into(),
        }
    }

    /// Emit this alert through `tracing`.
    pub fn raise(&self) {
        let worker = self.worker.as_ref().map(WorkerId::as_str).unwrap_or("-");
        let message_type = self
            .message_type
            .as_ref()
            .map(ToString::to_string)
            .unwrap_or_else(|| "-".to_string());
        let run_type = self
            .run_context
            .as_ref()
            .map(|c| c.run_type.to_string())
            .unwrap_or_else(|| "-".to_string());
        let run_date = self
            .run_context
            .as_ref()
            .map(|c| c.run_date_string())
            .unwrap_or_else(|| "-".to_string());

        if self.kind.is_critical() {
            error!(
                target: ALERT_TARGET,
                alert = %self.kind,
                worker,
                message_type = %message_type,
                run_type = %run_type,
                run_date = %run_date,
                reason = %self.reason,
                "operator alert"
            );
        } else {
            warn!(
                target: ALERT_TARGET,
                alert = %self.kind,
                worker,
                message_type = %message_type,
                run_type = %run_type,
                run_date = %run_date,
                reason = %self.reason,
                "operator alert"
            );
        }
    }
}
