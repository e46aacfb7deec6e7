// src/engine/event_handlers.rs

//! Event handling logic for the core manager.
//!
//! Every handler is a pure function of the current [`CoreState`] and the
//! event. Handlers never mutate the state they are given; they return the
//! next state (if any) and the commands the IO shell must run once that
//! state is safely on disk.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, NaiveDate, TimeDelta, Utc};
use serde_json::{json, Map, Value};
use tracing::{debug, info, warn};

use crate::broker::{Delivery, DeliveryId, ReplyTo};
use crate::checklist::file::retention_cutoff;
use crate::checklist::{ChecklistEntry, ChecklistFile};
use crate::config::PipelineTables;
use crate::engine::alert::{Alert, AlertKind};
use crate::engine::core::CoreState;
use crate::engine::pairs::PairState;
use crate::engine::{ControlCommand, CoreOptions, LaunchOrder};
use crate::message::{Message, MessageType, Outcome, Reply};
use crate::resolver::{resolve, LaunchSpec};
use crate::types::{PairKey, RunType};

/// Command produced by the pure core, to be executed by the outer IO shell.
#[derive(Debug, Clone)]
pub enum CoreCommand {
    /// Hand a worker invocation to the launcher.
    Launch(LaunchOrder),
    /// (Re)start the watchdog for `pair`; replaces any running timer.
    ArmWatchdog {
        pair: PairKey,
        launch_id: u64,
        after: Duration,
    },
    DisarmWatchdog { pair: PairKey },
    /// Stop the process of `launch_id` if it is still running.
    CancelLaunch { pair: PairKey, launch_id: u64 },
    Reply { to: ReplyTo, reply: Reply },
    /// Tell the broker a delivery has been handled.
    Settle(DeliveryId),
    Alert(Alert),
    /// Load the config file and feed the result back as `ConfigReloaded`.
    Reload { reply: Option<ReplyTo> },
    RequestExit,
}

/// Decision returned by the core after handling a single `ManagerEvent`.
#[derive(Debug, Clone)]
pub struct CoreStep {
    /// State to adopt. `None` leaves the current state untouched.
    pub next: Option<CoreState>,
    /// Whether `next` must be durably persisted before it is adopted and
    /// before any command runs.
    pub persist: bool,
    pub commands: Vec<CoreCommand>,
    /// Whether the outer runtime loop should keep running.
    pub keep_running: bool,
}

impl CoreStep {
    pub fn unchanged(commands: Vec<CoreCommand>) -> Self {
        Self {
            next: None,
            persist: false,
            commands,
            keep_running: true,
        }
    }

    fn adopt(next: CoreState, commands: Vec<CoreCommand>) -> Self {
        Self {
            next: Some(next),
            persist: false,
            commands,
            keep_running: true,
        }
    }

    fn persisted(next: CoreState, commands: Vec<CoreCommand>) -> Self {
        Self {
            next: Some(next),
            persist: true,
            commands,
            keep_running: true,
        }
    }

    /// Launch orders in this step, in the order they will be issued.
    pub fn launches(&self) -> impl Iterator<Item = &LaunchOrder> {
        self.commands.iter().filter_map(|c| match c {
            CoreCommand::Launch(order) => Some(order),
            _ => None,
        })
    }

    pub fn replies(&self) -> impl Iterator<Item = &Reply> {
        self.commands.iter().filter_map(|c| match c {
            CoreCommand::Reply { reply, .. } => Some(reply),
            _ => None,
        })
    }

    pub fn alerts(&self) -> impl Iterator<Item = &Alert> {
        self.commands.iter().filter_map(|c| match c {
            CoreCommand::Alert(alert) => Some(alert),
            _ => None,
        })
    }
}

enum Processed {
    Rejected(String),
    Duplicate,
    /// Older than the retained history for its worker; its dedup record may
    /// be gone, so it is not applied.
    Stale,
    Applied(CoreState),
}

/// Handle a message delivered by the broker.
///
/// Every delivery is settled and answered, whatever the outcome: rejected
/// messages get an error reply, duplicates and applied messages an ack.
pub fn handle_delivery(
    state: &CoreState,
    options: &CoreOptions,
    delivery: Delivery,
    now: DateTime<Utc>,
) -> CoreStep {
    let mut commands = Vec::new();
    let message = &delivery.message;

    let (next, reply) = match process_message(state, options, message, now, &mut commands) {
        Processed::Rejected(reason) => (
            None,
            Reply::Error {
                in_reply_to: Some(message.id.clone()),
                reason,
            },
        ),
        Processed::Duplicate | Processed::Stale => (
            None,
            Reply::Ack {
                in_reply_to: message.id.clone(),
            },
        ),
        Processed::Applied(next) => (
            Some(next),
            Reply::Ack {
                in_reply_to: message.id.clone(),
            },
        ),
    };

    if let Some(to) = delivery.reply_to {
        commands.push(CoreCommand::Reply { to, reply });
    }
    commands.push(CoreCommand::Settle(delivery.id));

    match next {
        Some(next) => CoreStep::persisted(next, commands),
        None => CoreStep::unchanged(commands),
    }
}

/// Handle a watchdog expiry.
///
/// Only the expiry for the launch a pair is still waiting on counts; anything
/// else is a timer that lost a race with a terminal message.
pub fn handle_watchdog_expired(
    state: &CoreState,
    options: &CoreOptions,
    pair: PairKey,
    launch_id: u64,
    now: DateTime<Utc>,
) -> CoreStep {
    let waiting = state
        .file
        .pair(&pair)
        .is_some_and(|p| p.is_waiting_on(launch_id));
    if !waiting {
        debug!(pair = %pair, launch_id, "stale watchdog expiry ignored");
        return CoreStep::unchanged(Vec::new());
    }

    warn!(
        worker = %pair.worker,
        run_type = %pair.run_context.run_type,
        run_date = %pair.run_context.run_date_string(),
        launch_id,
        "no terminal message before watchdog deadline; inferring crash"
    );

    let message = synthetic_crash(&pair, launch_id);
    let mut commands = vec![CoreCommand::CancelLaunch {
        pair: pair.clone(),
        launch_id,
    }];

    match process_message(state, options, &message, now, &mut commands) {
        Processed::Applied(next) => CoreStep::persisted(next, commands),
        Processed::Duplicate | Processed::Stale => CoreStep::unchanged(commands),
        Processed::Rejected(reason) => {
            // The worker left the registry while it was running. Close the
            // pair anyway so it can never block later launches.
            let mut file = state.file.clone();
            if let Some(current) = state.file.pair(&pair) {
                file.workers
                    .insert(pair.clone(), current.terminal(Outcome::Crash, &message.id, now));
            }
            commands.push(CoreCommand::Alert(Alert::for_message(
                AlertKind::WorkerCrashed,
                &message.worker,
                &message.message_type,
                &message.run_context,
                format!("watchdog expired; crash not recorded in checklist: {reason}"),
            )));
            CoreStep::persisted(state.with_file(file), commands)
        }
    }
}

/// Synthetic terminal message for a launch the watchdog gave up on.
pub fn synthetic_crash(pair: &PairKey, launch_id: u64) -> Message {
    let mut payload = Map::new();
    payload.insert("reason".to_string(), json!("watchdog timeout"));
    payload.insert("launch_id".to_string(), json!(launch_id));

    Message::new(
        pair.worker.clone(),
        MessageType::Crash,
        pair.run_context.clone(),
        payload,
        Some(format!("watchdog-{launch_id}")),
    )
}

/// Handle a launched process exiting.
///
/// A worker sends its message before it exits, so the message is normally
/// already processed. If not, the watchdog is shortened to `crash_grace`.
pub fn handle_process_exited(
    state: &CoreState,
    options: &CoreOptions,
    pair: PairKey,
    launch_id: u64,
    exit_code: Option<i32>,
    now: DateTime<Utc>,
) -> CoreStep {
    let Some(current) = state.file.pair(&pair).filter(|p| p.is_waiting_on(launch_id)) else {
        debug!(pair = %pair, launch_id, ?exit_code, "worker process exited after reporting");
        return CoreStep::unchanged(Vec::new());
    };

    let grace_deadline = deadline_after(now, options.crash_grace);
    if let (Some(deadline), Some(grace)) = (current.deadline, grace_deadline) {
        if deadline <= grace {
            return CoreStep::unchanged(Vec::new());
        }
    }

    info!(
        worker = %pair.worker,
        run_type = %pair.run_context.run_type,
        run_date = %pair.run_context.run_date_string(),
        launch_id,
        ?exit_code,
        grace_ms = options.crash_grace.as_millis() as u64,
        "worker process exited without a terminal message; waiting for crash grace"
    );

    let mut file = state.file.clone();
    file.workers
        .insert(pair.clone(), current.with_deadline(grace_deadline, now));

    CoreStep::persisted(
        state.with_file(file),
        vec![CoreCommand::ArmWatchdog {
            pair,
            launch_id,
            after: options.crash_grace,
        }],
    )
}

/// Handle an operator command.
pub fn handle_control(
    state: &CoreState,
    command: ControlCommand,
    reply: Option<ReplyTo>,
) -> CoreStep {
    match command {
        ControlCommand::Status => {
            let mut commands = Vec::new();
            push_reply(
                &mut commands,
                reply,
                Reply::Status {
                    status: status_report(state),
                },
            );
            CoreStep::unchanged(commands)
        }
        ControlCommand::Reload => CoreStep::unchanged(vec![CoreCommand::Reload { reply }]),
        ControlCommand::Shutdown => {
            let mut step = handle_shutdown(state);
            let mut commands = Vec::new();
            push_reply(
                &mut commands,
                reply,
                Reply::Done {
                    command: "shutdown".to_string(),
                },
            );
            commands.append(&mut step.commands);
            step.commands = commands;
            step
        }
        ControlCommand::ClearChecklist { run_type, run_date } => {
            handle_clear_checklist(state, run_type, run_date, reply)
        }
    }
}

fn handle_clear_checklist(
    state: &CoreState,
    run_type: RunType,
    run_date: Option<NaiveDate>,
    reply: Option<ReplyTo>,
) -> CoreStep {
    let mut commands = Vec::new();

    if !state.tables.run_types.contains(&run_type) {
        push_reply(
            &mut commands,
            reply,
            Reply::Error {
                in_reply_to: None,
                reason: format!("unknown run type '{run_type}'"),
            },
        );
        return CoreStep::unchanged(commands);
    }

    let mut file = state.file.clone();
    file.checklist = file.checklist.clear(&run_type, run_date);

    let cleared: Vec<PairKey> = file
        .workers
        .keys()
        .filter(|p| {
            p.run_context.run_type == run_type
                && run_date.is_none_or(|d| p.run_context.run_date == d)
        })
        .cloned()
        .collect();

    for pair in cleared.iter() {
        if file.workers.remove(pair).is_some_and(|p| p.is_launched()) {
            commands.push(CoreCommand::DisarmWatchdog { pair: pair.clone() });
        }
    }

    warn!(
        run_type = %run_type,
        run_date = ?run_date,
        pairs = cleared.len(),
        "checklist cleared by operator"
    );

    push_reply(
        &mut commands,
        reply,
        Reply::Done {
            command: "clear_checklist".to_string(),
        },
    );
    CoreStep::persisted(state.with_file(file), commands)
}

/// Handle the outcome of a config reload.
///
/// A successful reload swaps the tables in one move, between two events;
/// a failed one leaves the current tables in place.
pub fn handle_config_reloaded(
    state: &CoreState,
    result: Result<Arc<PipelineTables>, String>,
    reply: Option<ReplyTo>,
) -> CoreStep {
    let mut commands = Vec::new();

    match result {
        Ok(tables) => {
            info!(
                workers = tables.registry.len(),
                rules = tables.rules.len(),
                run_types = tables.run_types.len(),
                "registry and rules reloaded"
            );
            push_reply(
                &mut commands,
                reply,
                Reply::Done {
                    command: "reload".to_string(),
                },
            );
            let next = CoreState {
                tables,
                file: state.file.clone(),
                draining: state.draining,
            };
            CoreStep::adopt(next, commands)
        }
        Err(reason) => {
            commands.push(CoreCommand::Alert(Alert::new(
                AlertKind::ReloadFailed,
                format!("config reload rejected; keeping previous tables: {reason}"),
            )));
            push_reply(
                &mut commands,
                reply,
                Reply::Error {
                    in_reply_to: None,
                    reason,
                },
            );
            CoreStep::unchanged(commands)
        }
    }
}

/// Handle a shutdown request: stop launching, then let the shell drain.
pub fn handle_shutdown(state: &CoreState) -> CoreStep {
    info!("shutdown requested; new launches suppressed");
    CoreStep {
        next: Some(CoreState {
            draining: true,
            ..state.clone()
        }),
        persist: false,
        commands: vec![CoreCommand::RequestExit],
        keep_running: false,
    }
}

/// Registry check, dedupe, checklist update and resolution for one message.
fn process_message(
    state: &CoreState,
    options: &CoreOptions,
    message: &Message,
    now: DateTime<Utc>,
    commands: &mut Vec<CoreCommand>,
) -> Processed {
    let tables = &state.tables;
    let run_context = &message.run_context;

    if !tables.run_types.contains(&run_context.run_type) {
        let reason = format!("unknown run type '{}'", run_context.run_type);
        log_rejection(message, &reason);
        return Processed::Rejected(reason);
    }

    let key = match tables.registry.validate(&message.worker, &message.message_type) {
        Ok(key) => key.clone(),
        Err(err) => {
            let reason = err.to_string();
            log_rejection(message, &reason);
            return Processed::Rejected(reason);
        }
    };

    let Some(outcome) = message.message_type.outcome() else {
        let reason = "ack is not a worker report".to_string();
        log_rejection(message, &reason);
        return Processed::Rejected(reason);
    };

    let pair = PairKey::new(message.worker.clone(), run_context.clone());
    let known = state.file.pair(&pair).cloned();

    if known.is_none() && is_past_retention(&state.file, options, message) {
        warn!(
            worker = %message.worker,
            message_type = %message.message_type,
            run_type = %run_context.run_type,
            run_date = %run_context.run_date_string(),
            message_id = %message.id,
            retention_days = options.pair_retention_days,
            "message older than retained history; not applied"
        );
        return Processed::Stale;
    }

    let current = known.unwrap_or_else(|| PairState::idle(now));

    if current.has_seen(&message.id) {
        debug!(
            worker = %message.worker,
            message_type = %message.message_type,
            run_type = %run_context.run_type,
            run_date = %run_context.run_date_string(),
            message_id = %message.id,
            "duplicate message ignored"
        );
        return Processed::Duplicate;
    }

    let mut file = state.file.clone();
    if file.checklist.is_newer_than(&key, run_context) {
        info!(
            worker = %message.worker,
            checklist_key = %key,
            run_type = %run_context.run_type,
            run_date = %run_context.run_date_string(),
            "checklist holds a newer run date; entry kept"
        );
    }
    file.checklist = file.checklist.apply(
        &key,
        run_context,
        ChecklistEntry::from_message(message, now),
    );

    if current.is_launched() {
        commands.push(CoreCommand::DisarmWatchdog { pair: pair.clone() });
    }
    file.workers
        .insert(pair, current.terminal(outcome, &message.id, now));
    let pruned = file.prune_pairs(
        &message.worker,
        &run_context.run_type,
        options.pair_retention_days,
    );
    if pruned > 0 {
        debug!(
            worker = %message.worker,
            run_type = %run_context.run_type,
            pruned,
            "finished pair state past retention dropped"
        );
    }

    info!(
        worker = %message.worker,
        message_type = %message.message_type,
        run_type = %run_context.run_type,
        run_date = %run_context.run_date_string(),
        message_id = %message.id,
        "message recorded in checklist"
    );

    let description = tables
        .registry
        .entry(&message.worker)
        .and_then(|e| e.describe(&message.message_type))
        .unwrap_or_default()
        .to_string();

    match outcome {
        Outcome::Success => {}
        Outcome::Failure => commands.push(CoreCommand::Alert(Alert::for_message(
            AlertKind::WorkerFailed,
            &message.worker,
            &message.message_type,
            run_context,
            description,
        ))),
        Outcome::Crash => commands.push(CoreCommand::Alert(Alert::for_message(
            AlertKind::WorkerCrashed,
            &message.worker,
            &message.message_type,
            run_context,
            description,
        ))),
    }

    match resolve(
        &tables.rules,
        &message.worker,
        &message.message_type,
        run_context,
        &file.checklist,
        &message.payload,
    ) {
        Ok(specs) => {
            for spec in specs {
                schedule_launch(&mut file, tables, options, spec, state.draining, now, commands);
            }
        }
        Err(err) => commands.push(CoreCommand::Alert(Alert::for_message(
            AlertKind::NoResolutionRule,
            &message.worker,
            &message.message_type,
            run_context,
            err.to_string(),
        ))),
    }

    Processed::Applied(state.with_file(file))
}

/// Move the target pair to `Launched` and emit the launch, unless it is
/// already in flight.
fn schedule_launch(
    file: &mut ChecklistFile,
    tables: &PipelineTables,
    options: &CoreOptions,
    spec: LaunchSpec,
    draining: bool,
    now: DateTime<Utc>,
    commands: &mut Vec<CoreCommand>,
) {
    let pair = PairKey::new(spec.worker.clone(), spec.run_context.clone());

    if draining {
        info!(pair = %pair, "shutting down; launch suppressed");
        return;
    }

    let current = file
        .pair(&pair)
        .cloned()
        .unwrap_or_else(|| PairState::idle(now));
    if current.is_launched() {
        info!(
            pair = %pair,
            launch_id = ?current.launch_id,
            "worker already launched for this run; not launching again"
        );
        return;
    }

    let Some(entry) = tables.registry.entry(&spec.worker).filter(|e| e.is_launchable()) else {
        commands.push(CoreCommand::Alert(Alert::new(
            AlertKind::LaunchFailed,
            format!("worker '{}' has no launch command", spec.worker),
        )));
        return;
    };

    let launch_id = file.next_launch_id;
    file.next_launch_id = file.next_launch_id.saturating_add(1);

    let timeout = entry.timeout.unwrap_or(options.watchdog_timeout);
    file.workers.insert(
        pair.clone(),
        current.launched(launch_id, now, deadline_after(now, timeout)),
    );

    info!(
        worker = %spec.worker,
        run_type = %spec.run_context.run_type,
        run_date = %spec.run_context.run_date_string(),
        launch_id,
        args = ?spec.args,
        "launching worker"
    );

    commands.push(CoreCommand::Launch(LaunchOrder {
        spec,
        launch_id,
        command: entry.command.clone(),
    }));
    commands.push(CoreCommand::ArmWatchdog {
        pair,
        launch_id,
        after: timeout,
    });
}

/// Snapshot of the manager's tables for the `status` command.
pub fn status_report(state: &CoreState) -> Value {
    json!({
        "draining": state.draining,
        "next_launch_id": state.file.next_launch_id,
        "run_types": serde_json::to_value(&state.tables.run_types).unwrap_or_default(),
        "registered_workers": state.tables.registry.len(),
        "rules": state.tables.rules.len(),
        "workers": serde_json::to_value(&state.file.workers).unwrap_or_default(),
        "checklist": serde_json::to_value(&state.file.checklist).unwrap_or_default(),
    })
}

pub(crate) fn deadline_after(now: DateTime<Utc>, after: Duration) -> Option<DateTime<Utc>> {
    TimeDelta::from_std(after)
        .ok()
        .and_then(|d| now.checked_add_signed(d))
}

/// Whether `message` is for a run date before the retained window of its
/// worker and run type.
fn is_past_retention(file: &ChecklistFile, options: &CoreOptions, message: &Message) -> bool {
    let run_context = &message.run_context;
    file.newest_run_date(&message.worker, &run_context.run_type)
        .and_then(|newest| retention_cutoff(newest, options.pair_retention_days))
        .is_some_and(|cutoff| run_context.run_date < cutoff)
}

fn push_reply(commands: &mut Vec<CoreCommand>, to: Option<ReplyTo>, reply: Reply) {
    if let Some(to) = to {
        commands.push(CoreCommand::Reply { to, reply });
    }
}

fn log_rejection(message: &Message, reason: &str) {
    warn!(
        worker = %message.worker,
        message_type = %message.message_type,
        run_type = %message.run_context.run_type,
        run_date = %message.run_context.run_date_string(),
        message_id = %message.id,
        reason,
        "message rejected"
    );
}
