// src/checklist/file.rs

use std::collections::BTreeMap;

use chrono::{Days, NaiveDate};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::checklist::Checklist;
use crate::engine::pairs::PairState;
use crate::types::{PairKey, RunType, WorkerId};

pub const CHECKLIST_FILE_VERSION: u32 = 1;

/// The persisted state document.
///
/// Holds everything the manager must see again after a restart: the checklist
/// itself, the per-`(worker, run)` state table (including outstanding
/// launches and recently seen message ids), and the launch id counter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChecklistFile {
    #[serde(default = "default_version")]
    pub version: u32,

    #[serde(default)]
    pub checklist: Checklist,

    #[serde(default)]
    pub workers: BTreeMap<PairKey, PairState>,

    #[serde(default = "default_next_launch_id")]
    pub next_launch_id: u64,

    /// Top-level keys this version does not know about.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

fn default_version() -> u32 {
    CHECKLIST_FILE_VERSION
}

fn default_next_launch_id() -> u64 {
    1
}

impl Default for ChecklistFile {
    fn default() -> Self {
        Self {
            version: CHECKLIST_FILE_VERSION,
            checklist: Checklist::default(),
            workers: BTreeMap::new(),
            next_launch_id: default_next_launch_id(),
            extra: Map::new(),
        }
    }
}

impl ChecklistFile {
    pub fn pair(&self, pair: &PairKey) -> Option<&PairState> {
        self.workers.get(pair)
    }

    /// Newest run date with state for `worker` under `run_type`.
    pub fn newest_run_date(&self, worker: &WorkerId, run_type: &RunType) -> Option<NaiveDate> {
        self.workers
            .keys()
            .filter(|p| &p.worker == worker && &p.run_context.run_type == run_type)
            .map(|p| p.run_context.run_date)
            .max()
    }

    /// Drop finished state for `worker` under `run_type` whose run date is
    /// more than `keep_days` before the newest one. Launched pairs stay.
    /// Returns how many pairs were dropped.
    pub fn prune_pairs(&mut self, worker: &WorkerId, run_type: &RunType, keep_days: u32) -> usize {
        let Some(cutoff) = self
            .newest_run_date(worker, run_type)
            .and_then(|newest| retention_cutoff(newest, keep_days))
        else {
            return 0;
        };

        let before = self.workers.len();
        self.workers.retain(|p, state| {
            &p.worker != worker
                || &p.run_context.run_type != run_type
                || p.run_context.run_date >= cutoff
                || state.is_launched()
        });
        before - self.workers.len()
    }
}

/// Oldest run date still inside a `keep_days` window ending at `newest`.
pub fn retention_cutoff(newest: NaiveDate, keep_days: u32) -> Option<NaiveDate> {
    newest.checked_sub_days(Days::new(u64::from(keep_days)))
}
