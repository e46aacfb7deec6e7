// src/checklist/mod.rs

//! The checklist: persistent record of pipeline progress.
//!
//! - [`Checklist`] is the pure value: stage key -> run type -> latest entry.
//! - [`file`] is the on-disk document wrapping the checklist together with the
//!   manager's per-pair table.
//! - [`store`] loads and durably persists that document.
//!
//! Every mutation returns a new value; callers keep earlier values as
//! immutable snapshots.

pub mod file;
pub mod store;

use std::collections::BTreeMap;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::message::{Message, MessageType, Outcome};
use crate::types::{ChecklistKey, RunContext, RunType};

pub use file::{ChecklistFile, CHECKLIST_FILE_VERSION};
pub use store::{ChecklistStore, WriteTicket};

/// What one worker reported for one run type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChecklistEntry {
    pub run_date: NaiveDate,
    pub outcome: Outcome,
    pub message_type: MessageType,
    pub message_id: String,
    #[serde(default)]
    pub payload: Map<String, Value>,
    pub recorded_at: DateTime<Utc>,

    /// Fields written by other tools; preserved across load/persist.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl ChecklistEntry {
    /// Entry for a worker message. `Ack` never reaches the checklist, so it is
    /// recorded as a failure if it ever does.
    pub fn from_message(message: &Message, recorded_at: DateTime<Utc>) -> Self {
        Self {
            run_date: message.run_context.run_date,
            outcome: message.message_type.outcome().unwrap_or(Outcome::Failure),
            message_type: message.message_type.clone(),
            message_id: message.id.clone(),
            payload: message.payload.clone(),
            recorded_at,
            extra: Map::new(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Checklist {
    entries: BTreeMap<ChecklistKey, BTreeMap<RunType, ChecklistEntry>>,
}

impl Checklist {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record `entry` under `(key, run_context.run_type)`.
    ///
    /// - An entry from a newer run date replaces the old one wholesale.
    /// - Re-applying the entry for the same message id and run date is a no-op.
    /// - An entry older than what is recorded leaves the checklist untouched.
    pub fn apply(&self, key: &ChecklistKey, run_context: &RunContext, entry: ChecklistEntry) -> Checklist {
        let mut next = self.clone();

        if let Some(existing) = self.entry(key, &run_context.run_type) {
            if existing.run_date > run_context.run_date {
                return next;
            }
            if existing.run_date == run_context.run_date && existing.message_id == entry.message_id {
                return next;
            }
        }

        next.entries
            .entry(key.clone())
            .or_default()
            .insert(run_context.run_type.clone(), entry);
        next
    }

    /// Whether an entry for `key`/`run_type` is newer than `run_date`.
    pub fn is_newer_than(&self, key: &ChecklistKey, run_context: &RunContext) -> bool {
        self.entry(key, &run_context.run_type)
            .is_some_and(|e| e.run_date > run_context.run_date)
    }

    /// Drop every entry for `run_type` (optionally only for one run date).
    pub fn clear(&self, run_type: &RunType, run_date: Option<NaiveDate>) -> Checklist {
        let mut next = self.clone();
        for by_run_type in next.entries.values_mut() {
            let matches = by_run_type
                .get(run_type)
                .is_some_and(|e| run_date.is_none_or(|d| e.run_date == d));
            if matches {
                by_run_type.remove(run_type);
            }
        }
        next.entries.retain(|_, by_run_type| !by_run_type.is_empty());
        next
    }

    pub fn entry(&self, key: &ChecklistKey, run_type: &RunType) -> Option<&ChecklistEntry> {
        self.entries.get(key).and_then(|m| m.get(run_type))
    }

    /// Whether `key` has a successful entry.
    ///
    /// - `run_type: None` accepts any run type.
    /// - `run_date: None` accepts any run date.
    pub fn has_success(
        &self,
        key: &ChecklistKey,
        run_type: Option<&RunType>,
        run_date: Option<NaiveDate>,
    ) -> bool {
        let Some(by_run_type) = self.entries.get(key) else {
            return false;
        };
        by_run_type
            .iter()
            .filter(|(rt, _)| run_type.is_none_or(|want| *rt == want))
            .any(|(_, e)| {
                e.outcome == Outcome::Success && run_date.is_none_or(|d| e.run_date == d)
            })
    }

    pub fn keys(&self) -> impl Iterator<Item = &ChecklistKey> {
        self.entries.keys()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&ChecklistKey, &BTreeMap<RunType, ChecklistEntry>)> {
        self.entries.iter()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
