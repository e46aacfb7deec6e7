// src/resolver/rules.rs

//! Typed dependency rule table.

use std::collections::{BTreeMap, BTreeSet};

use regex::Regex;
use serde_json::{Map, Value};

use crate::checklist::Checklist;
use crate::message::MessageType;
use crate::types::{ChecklistKey, RunContext, RunType, WorkerId};

/// Placeholders understood in launch template arguments.
pub const PLACEHOLDERS: &[&str] = &["run_type", "run_date", "run_date_compact"];

/// Prefix for placeholders that read a field from the triggering payload.
pub const PAYLOAD_PLACEHOLDER_PREFIX: &str = "payload.";

const PLACEHOLDER_PATTERN: &str = r"\{([A-Za-z_][A-Za-z0-9_.\-]*)\}";

/// Condition a launch template must meet to fire.
#[derive(Debug, Clone, PartialEq)]
pub enum Guard {
    Always,
    /// `key` has a successful entry. `run_type: None` means the triggering
    /// run type; unless `any_date`, the entry must be for the triggering date.
    ChecklistHas {
        key: ChecklistKey,
        run_type: Option<RunType>,
        any_date: bool,
    },
    /// Negation of `ChecklistHas`.
    ChecklistMissing {
        key: ChecklistKey,
        run_type: Option<RunType>,
        any_date: bool,
    },
    RunTypeIs(BTreeSet<RunType>),
    PayloadEquals {
        field: String,
        value: String,
    },
    All(Vec<Guard>),
}

/// What a guard may look at. Read-only.
#[derive(Debug, Clone, Copy)]
pub struct GuardInput<'a> {
    pub run_context: &'a RunContext,
    pub checklist: &'a Checklist,
    pub payload: &'a Map<String, Value>,
}

impl Guard {
    pub fn evaluate(&self, input: &GuardInput<'_>) -> bool {
        match self {
            Guard::Always => true,
            Guard::ChecklistHas {
                key,
                run_type,
                any_date,
            } => checklist_has(input, key, run_type.as_ref(), *any_date),
            Guard::ChecklistMissing {
                key,
                run_type,
                any_date,
            } => !checklist_has(input, key, run_type.as_ref(), *any_date),
            Guard::RunTypeIs(run_types) => run_types.contains(&input.run_context.run_type),
            Guard::PayloadEquals { field, value } => input
                .payload
                .get(field)
                .is_some_and(|v| payload_value_matches(v, value)),
            Guard::All(guards) => guards.iter().all(|g| g.evaluate(input)),
        }
    }

    /// Checklist keys referenced anywhere in this guard.
    pub fn checklist_keys(&self) -> Vec<&ChecklistKey> {
        match self {
            Guard::ChecklistHas { key, .. } | Guard::ChecklistMissing { key, .. } => vec![key],
            Guard::All(guards) => guards.iter().flat_map(Guard::checklist_keys).collect(),
            Guard::Always | Guard::RunTypeIs(_) | Guard::PayloadEquals { .. } => Vec::new(),
        }
    }

    /// Run types referenced anywhere in this guard.
    pub fn run_types(&self) -> Vec<&RunType> {
        match self {
            Guard::ChecklistHas { run_type, .. } | Guard::ChecklistMissing { run_type, .. } => {
                run_type.iter().collect()
            }
            Guard::RunTypeIs(run_types) => run_types.iter().collect(),
            Guard::All(guards) => guards.iter().flat_map(Guard::run_types).collect(),
            Guard::Always | Guard::PayloadEquals { .. } => Vec::new(),
        }
    }
}

fn checklist_has(
    input: &GuardInput<'_>,
    key: &ChecklistKey,
    run_type: Option<&RunType>,
    any_date: bool,
) -> bool {
    let run_type = run_type.unwrap_or(&input.run_context.run_type);
    let run_date = if any_date {
        None
    } else {
        Some(input.run_context.run_date)
    };
    input.checklist.has_success(key, Some(run_type), run_date)
}

fn payload_value_matches(actual: &Value, expected: &str) -> bool {
    match actual {
        Value::String(s) => s == expected,
        other => other.to_string() == expected,
    }
}

/// One candidate launch produced by a rule.
#[derive(Debug, Clone, PartialEq)]
pub struct LaunchTemplate {
    pub worker: WorkerId,
    pub args: Vec<String>,
    pub run_type: Option<RunType>,
    pub run_date_offset: i64,
    pub guard: Guard,
}

impl LaunchTemplate {
    pub fn new(worker: impl Into<WorkerId>) -> Self {
        Self {
            worker: worker.into(),
            args: Vec::new(),
            run_type: None,
            run_date_offset: 0,
            guard: Guard::Always,
        }
    }

    /// Launches for the same `(worker, run context)` as its trigger, with no
    /// condition: a cycle of these would relaunch forever.
    pub fn is_unconditional_same_run(&self) -> bool {
        self.guard == Guard::Always && self.run_type.is_none() && self.run_date_offset == 0
    }
}

/// Closed mapping `(trigger worker, trigger message type) -> templates`.
#[derive(Debug, Clone)]
pub struct RuleTable {
    rules: BTreeMap<(WorkerId, MessageType), Vec<LaunchTemplate>>,
    placeholder: Regex,
}

impl RuleTable {
    pub fn new(
        rules: BTreeMap<(WorkerId, MessageType), Vec<LaunchTemplate>>,
    ) -> Result<Self, regex::Error> {
        Ok(Self {
            rules,
            placeholder: Regex::new(PLACEHOLDER_PATTERN)?,
        })
    }

    pub fn get(&self, worker: &WorkerId, message_type: &MessageType) -> Option<&[LaunchTemplate]> {
        self.rules
            .get(&(worker.clone(), message_type.clone()))
            .map(Vec::as_slice)
    }

    pub fn contains(&self, worker: &WorkerId, message_type: &MessageType) -> bool {
        self.rules.contains_key(&(worker.clone(), message_type.clone()))
    }

    pub fn iter(&self) -> impl Iterator<Item = (&(WorkerId, MessageType), &Vec<LaunchTemplate>)> {
        self.rules.iter()
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    /// Placeholder names in `arg` that are neither built-in nor `payload.*`.
    pub fn unknown_placeholders(&self, arg: &str) -> Vec<String> {
        self.placeholder
            .captures_iter(arg)
            .filter_map(|c| c.get(1))
            .map(|m| m.as_str())
            .filter(|name| {
                !PLACEHOLDERS.contains(name)
                    && !(name.starts_with(PAYLOAD_PLACEHOLDER_PREFIX)
                        && name.len() > PAYLOAD_PLACEHOLDER_PREFIX.len())
            })
            .map(str::to_string)
            .collect()
    }

    /// Replace placeholders in `arg` using the launch's run context and the
    /// triggering payload. Missing payload fields become empty strings.
    pub(crate) fn substitute(
        &self,
        arg: &str,
        run_context: &RunContext,
        payload: &Map<String, Value>,
        missing: &mut Vec<String>,
    ) -> String {
        self.placeholder
            .replace_all(arg, |caps: &regex::Captures<'_>| {
                let name = caps.get(1).map(|m| m.as_str()).unwrap_or_default();
                match name {
                    "run_type" => run_context.run_type.to_string(),
                    "run_date" => run_context.run_date_string(),
                    "run_date_compact" => run_context.run_date.format("%Y%m%d").to_string(),
                    _ => match name.strip_prefix(PAYLOAD_PLACEHOLDER_PREFIX) {
                        Some(field) => match payload.get(field) {
                            Some(Value::String(s)) => s.clone(),
                            Some(other) => other.to_string(),
                            None => {
                                missing.push(field.to_string());
                                String::new()
                            }
                        },
                        None => caps
                            .get(0)
                            .map(|m| m.as_str().to_string())
                            .unwrap_or_default(),
                    },
                }
            })
            .into_owned()
    }
}
