// src/resolver/mod.rs

//! Next-Worker Resolver.
//!
//! `resolve` is a pure function from a completion event and a checklist
//! snapshot to the workers that must be launched next. It never performs IO
//! and never panics; the only error is a missing rule for a success type.
//!
//! - [`rules`] holds the typed table loaded from `[[rule]]` config entries.

pub mod rules;

use chrono::Days;
use serde_json::{Map, Value};
use tracing::{debug, warn};

use crate::checklist::Checklist;
use crate::errors::ResolveError;
use crate::message::MessageType;
use crate::types::{RunContext, WorkerId};

pub use rules::{Guard, GuardInput, LaunchTemplate, RuleTable};

/// A worker invocation to hand to the launcher.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LaunchSpec {
    pub worker: WorkerId,
    pub args: Vec<String>,
    pub run_context: RunContext,
}

/// Decide which workers to launch after `source` reported `message_type`.
///
/// - `failure`/`crash`/`ack` resolve to nothing: only success moves the
///   pipeline forward.
/// - A success type without a rule is `NoResolutionRule`.
/// - Otherwise every template whose guard passes becomes a `LaunchSpec`, in
///   rule order.
pub fn resolve(
    rules: &RuleTable,
    source: &WorkerId,
    message_type: &MessageType,
    run_context: &RunContext,
    checklist: &Checklist,
    payload: &Map<String, Value>,
) -> Result<Vec<LaunchSpec>, ResolveError> {
    if !message_type.is_success() {
        return Ok(Vec::new());
    }

    let templates = rules
        .get(source, message_type)
        .ok_or_else(|| ResolveError::NoResolutionRule {
            worker: source.clone(),
            message_type: message_type.clone(),
        })?;

    let input = GuardInput {
        run_context,
        checklist,
        payload,
    };

    let specs = templates
        .iter()
        .filter(|template| {
            let pass = template.guard.evaluate(&input);
            if !pass {
                debug!(
                    worker = %source,
                    message_type = %message_type,
                    target = %template.worker,
                    "launch template guard not satisfied"
                );
            }
            pass
        })
        .map(|template| materialize(rules, template, run_context, payload))
        .collect();

    Ok(specs)
}

fn materialize(
    rules: &RuleTable,
    template: &LaunchTemplate,
    trigger: &RunContext,
    payload: &Map<String, Value>,
) -> LaunchSpec {
    let run_type = template
        .run_type
        .clone()
        .unwrap_or_else(|| trigger.run_type.clone());
    let run_date = shift_date(trigger, template.run_date_offset);
    let run_context = RunContext { run_type, run_date };

    let mut missing = Vec::new();
    let args = template
        .args
        .iter()
        .map(|arg| rules.substitute(arg, &run_context, payload, &mut missing))
        .collect();

    if !missing.is_empty() {
        warn!(
            target_worker = %template.worker,
            run_type = %run_context.run_type,
            run_date = %run_context.run_date_string(),
            ?missing,
            "payload fields referenced by launch args are missing; substituted empty strings"
        );
    }

    LaunchSpec {
        worker: template.worker.clone(),
        args,
        run_context,
    }
}

fn shift_date(trigger: &RunContext, offset: i64) -> chrono::NaiveDate {
    let days = Days::new(offset.unsigned_abs());
    let shifted = if offset >= 0 {
        trigger.run_date.checked_add_days(days)
    } else {
        trigger.run_date.checked_sub_days(days)
    };
    shifted.unwrap_or_else(|| {
        warn!(offset, run_date = %trigger.run_date_string(), "run date offset out of range; using trigger date");
        trigger.run_date
    })
}
