// src/engine/pairs.rs

//! Per-`(worker, run context)` lifecycle table.

use std::collections::VecDeque;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::message::Outcome;

/// Number of message ids remembered per pair for duplicate detection.
pub const SEEN_IDS_LIMIT: usize = 32;

/// Lifecycle phase of one pair: `Idle -> Launched -> (Succeeded | Failed | Crashed)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Phase {
    Idle,
    Launched,
    Succeeded,
    Failed,
    Crashed,
}

impl Phase {
    pub fn from_outcome(outcome: Outcome) -> Self {
        match outcome {
            Outcome::Success => Phase::Succeeded,
            Outcome::Failure => Phase::Failed,
            Outcome::Crash => Phase::Crashed,
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, Phase::Succeeded | Phase::Failed | Phase::Crashed)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PairState {
    pub phase: Phase,

    /// Id of the most recent launch, if the manager ever launched this pair.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub launch_id: Option<u64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub launched_at: Option<DateTime<Utc>>,

    /// When the watchdog presumes the current launch crashed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deadline: Option<DateTime<Utc>>,

    pub updated_at: DateTime<Utc>,

    /// Most recent message ids processed for this pair, oldest first.
    #[serde(default)]
    pub seen: VecDeque<String>,
}

impl PairState {
    pub fn idle(now: DateTime<Utc>) -> Self {
        Self {
            phase: Phase::Idle,
            launch_id: None,
            launched_at: None,
            deadline: None,
            updated_at: now,
            seen: VecDeque::new(),
        }
    }

    pub fn is_launched(&self) -> bool {
        self.phase == Phase::Launched
    }

    /// Whether `launch_id` is the launch this pair is currently waiting on.
    pub fn is_waiting_on(&self, launch_id: u64) -> bool {
        self.is_launched() && self.launch_id == Some(launch_id)
    }

    pub fn has_seen(&self, message_id: &str) -> bool {
        self.seen.iter().any(|id| id == message_id)
    }

    pub fn launched(
        &self,
        launch_id: u64,
        now: DateTime<Utc>,
        deadline: Option<DateTime<Utc>>,
    ) -> Self {
        Self {
            phase: Phase::Launched,
            launch_id: Some(launch_id),
            launched_at: Some(now),
            deadline,
            updated_at: now,
            seen: self.seen.clone(),
        }
    }

    /// Record a terminal message. The launch id stays for inspection.
    pub fn terminal(&self, outcome: Outcome, message_id: &str, now: DateTime<Utc>) -> Self {
        let mut seen = self.seen.clone();
        seen.push_back(message_id.to_string());
        while seen.len() > SEEN_IDS_LIMIT {
            seen.pop_front();
        }

        Self {
            phase: Phase::from_outcome(outcome),
            launch_id: self.launch_id,
            launched_at: self.launched_at,
            deadline: None,
            updated_at: now,
            seen,
        }
    }

    pub fn with_deadline(&self, deadline: Option<DateTime<Utc>>, now: DateTime<Utc>) -> Self {
        Self {
            deadline,
            updated_at: now,
            ..self.clone()
        }
    }
}
