mod common;

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::TimeDelta;
use nowcast_manager::broker::Delivery;
use nowcast_manager::checklist::ChecklistFile;
use nowcast_manager::engine::{
    AlertKind, ControlCommand, CoreCommand, ManagerCore, ManagerEvent, PairState, Phase,
};
use nowcast_manager::message::{Outcome, Reply};
use nowcast_manager::registry::MessageRegistry;
use nowcast_manager::types::{ChecklistKey, RunType, WorkerId};
use nowcast_manager_test_utils::builders::{
    nowcast_pipeline, ConfigBuilder, LaunchBuilder, RuleBuilder, WorkerBuilder,
};
use nowcast_manager_test_utils::messages::{
    date, delivered, message, message_with_id, message_with_payload, pair,
};
use serde_json::json;
use tokio::sync::mpsc;

use common::{apply, core, init_tracing, now, options};

/// Worker `A` (not launched by the manager) triggers `B` on `success nowcast`.
fn example_config() -> ConfigBuilder {
    ConfigBuilder::new()
        .with_worker(
            "A",
            WorkerBuilder::new("nowcast run")
                .not_launchable()
                .messages(&["success nowcast", "failure nowcast"])
                .build(),
        )
        .with_worker("B", WorkerBuilder::new("B output").messages(&["success"]).build())
        .with_rule(
            RuleBuilder::new("A", "success nowcast")
                .launch(LaunchBuilder::new("B").args(&["{run_type}", "{run_date}"]))
                .build(),
        )
        .with_rule(RuleBuilder::new("B", "success").build())
}

fn alert_kinds(step: &nowcast_manager::engine::CoreStep) -> Vec<AlertKind> {
    step.alerts().map(|a| a.kind).collect()
}

#[test]
fn success_records_checklist_launches_successor_and_acks() {
    init_tracing();
    let mut core = core(example_config());
    let (reply_tx, _reply_rx) = mpsc::unbounded_channel();

    let msg = message_with_payload(
        "A",
        "success nowcast",
        "nowcast",
        "2024-05-01",
        json!({ "path": "/results/01may24" }).as_object().unwrap().clone(),
    );
    let msg_id = msg.id.clone();
    let step = apply(
        &mut core,
        ManagerEvent::Delivered(Delivery {
            id: 7,
            message: msg,
            reply_to: Some(reply_tx),
        }),
        now(),
    );

    assert!(step.persist, "an applied message must be persisted first");
    assert!(step.keep_running);

    let launches: Vec<_> = step.launches().collect();
    assert_eq!(launches.len(), 1);
    assert_eq!(launches[0].spec.worker, WorkerId::new("B"));
    assert_eq!(launches[0].spec.args, vec!["nowcast", "2024-05-01"]);
    assert_eq!(launches[0].spec.run_context, pair("B", "nowcast", "2024-05-01").run_context);
    assert_eq!(launches[0].launch_id, 1);
    assert_eq!(launches[0].command, vec!["true"]);

    let replies: Vec<_> = step.replies().cloned().collect();
    assert_eq!(replies, vec![Reply::Ack { in_reply_to: msg_id.clone() }]);
    assert!(step
        .commands
        .iter()
        .any(|c| matches!(c, CoreCommand::Settle(7))));
    assert!(step.commands.iter().any(|c| matches!(
        c,
        CoreCommand::ArmWatchdog { launch_id: 1, after, .. } if *after == Duration::from_secs(3600)
    )));

    let entry = core
        .checklist()
        .entry(&ChecklistKey::from("nowcast run"), &RunType::from("nowcast"))
        .expect("checklist entry written");
    assert_eq!(entry.outcome, Outcome::Success);
    assert_eq!(entry.run_date, date("2024-05-01"));
    assert_eq!(entry.message_id, msg_id);
    assert_eq!(entry.payload["path"], json!("/results/01may24"));

    let a = core.pair(&pair("A", "nowcast", "2024-05-01")).unwrap();
    assert_eq!(a.phase, Phase::Succeeded);
    let b = core.pair(&pair("B", "nowcast", "2024-05-01")).unwrap();
    assert_eq!(b.phase, Phase::Launched);
    assert_eq!(b.launch_id, Some(1));
    assert_eq!(b.deadline, Some(now() + TimeDelta::hours(1)));
    assert_eq!(core.state().file.next_launch_id, 2);
}

#[test]
fn duplicate_idempotency_key_is_acked_without_effect() {
    init_tracing();
    let mut core = core(example_config());

    let first = message_with_id("A", "success nowcast", "nowcast", "2024-05-01", "msg-1");
    let step = apply(&mut core, delivered(first), now());
    assert_eq!(step.launches().count(), 1);
    let before = core.state().file.clone();

    // Same idempotency key, different content: still the same message instance.
    let (reply_tx, _reply_rx) = mpsc::unbounded_channel();
    let dup = message_with_id("A", "failure nowcast", "nowcast", "2024-05-01", "msg-1");
    let step = apply(
        &mut core,
        ManagerEvent::Delivered(Delivery {
            id: 2,
            message: dup,
            reply_to: Some(reply_tx),
        }),
        now() + TimeDelta::minutes(1),
    );

    assert!(step.next.is_none());
    assert_eq!(step.launches().count(), 0);
    assert!(alert_kinds(&step).is_empty());
    assert_eq!(
        step.replies().cloned().collect::<Vec<_>>(),
        vec![Reply::Ack {
            in_reply_to: "msg-1".to_string()
        }]
    );
    assert!(step.commands.iter().any(|c| matches!(c, CoreCommand::Settle(2))));
    assert_eq!(core.state().file, before);
}

#[test]
fn reapplying_the_same_message_leaves_identical_state() {
    let mut core = core(nowcast_pipeline());
    let msg = message("download_weather", "success 06", "nowcast", "2024-05-01");

    apply(&mut core, delivered(msg.clone()), now());
    let once = core.state().file.clone();
    apply(&mut core, delivered(msg), now() + TimeDelta::seconds(5));

    assert_eq!(core.state().file, once);
}

#[test]
fn no_second_launch_while_pair_is_in_flight() {
    init_tracing();
    let mut core = core(nowcast_pipeline());

    let first = message_with_id("download_weather", "success 06", "nowcast", "2024-05-01", "dl-1");
    let step = apply(&mut core, delivered(first), now());
    assert_eq!(step.launches().count(), 1);

    // A second, distinct success for the same run would resolve to the same
    // make_runoff_file pair, which is still Launched.
    let second = message_with_id("download_weather", "success 06", "nowcast", "2024-05-01", "dl-2");
    let step = apply(&mut core, delivered(second), now() + TimeDelta::minutes(5));

    assert!(step.next.is_some(), "the message itself is still recorded");
    assert_eq!(step.launches().count(), 0);
    assert_eq!(core.state().file.next_launch_id, 2);
    assert_eq!(
        core.pair(&pair("make_runoff_file", "nowcast", "2024-05-01"))
            .unwrap()
            .launch_id,
        Some(1)
    );
}

#[test]
fn successor_may_launch_again_after_terminal_message() {
    let mut core = core(nowcast_pipeline());

    apply(
        &mut core,
        delivered(message_with_id("download_weather", "success 06", "nowcast", "2024-05-01", "dl-1")),
        now(),
    );
    apply(
        &mut core,
        delivered(message("make_runoff_file", "failure", "nowcast", "2024-05-01")),
        now(),
    );
    let step = apply(
        &mut core,
        delivered(message_with_id("download_weather", "success 06", "nowcast", "2024-05-01", "dl-2")),
        now(),
    );

    let launches: Vec<_> = step.launches().collect();
    assert_eq!(launches.len(), 1);
    assert_eq!(launches[0].launch_id, 2);
}

#[test]
fn invalid_messages_are_rejected_without_mutation() {
    init_tracing();
    let mut core = core(nowcast_pipeline());
    let before = core.state().file.clone();

    let cases = [
        (message("nobody", "success", "nowcast", "2024-05-01"), "unregistered worker"),
        (
            message("download_weather", "success 12", "nowcast", "2024-05-01"),
            "is not registered for worker",
        ),
        (
            message("download_weather", "success 06", "hindcast", "2024-05-01"),
            "unknown run type",
        ),
    ];

    for (i, (msg, expected)) in cases.into_iter().enumerate() {
        let (reply_tx, _reply_rx) = mpsc::unbounded_channel();
        let id = msg.id.clone();
        let step = apply(
            &mut core,
            ManagerEvent::Delivered(Delivery {
                id: i as u64 + 1,
                message: msg,
                reply_to: Some(reply_tx),
            }),
            now(),
        );

        assert!(step.next.is_none());
        assert_eq!(step.launches().count(), 0);
        match step.replies().next() {
            Some(Reply::Error {
                in_reply_to,
                reason,
            }) => {
                assert_eq!(in_reply_to.as_deref(), Some(id.as_str()));
                assert!(reason.contains(expected), "reason {reason:?} lacks {expected:?}");
            }
            other => panic!("expected error reply, got {other:?}"),
        }
        assert!(step
            .commands
            .iter()
            .any(|c| matches!(c, CoreCommand::Settle(d) if *d == i as u64 + 1)));
    }

    assert_eq!(core.state().file, before);
}

#[test]
fn failure_is_recorded_and_alerted_but_launches_nothing() {
    let mut core = core(nowcast_pipeline());

    let step = apply(
        &mut core,
        delivered(message("download_weather", "failure 06", "nowcast", "2024-05-01")),
        now(),
    );

    assert!(step.persist);
    assert_eq!(step.launches().count(), 0);
    assert_eq!(alert_kinds(&step), vec![AlertKind::WorkerFailed]);

    let entry = core
        .checklist()
        .entry(&ChecklistKey::from("weather forecast"), &RunType::from("nowcast"))
        .unwrap();
    assert_eq!(entry.outcome, Outcome::Failure);
    assert_eq!(
        core.pair(&pair("download_weather", "nowcast", "2024-05-01"))
            .unwrap()
            .phase,
        Phase::Failed
    );
}

#[test]
fn success_without_rule_is_recorded_and_raises_no_resolution_rule() {
    let config = ConfigBuilder::new().with_worker(
        "orphan",
        WorkerBuilder::new("orphan stage").messages(&["success"]).build(),
    );
    let mut core = core(config);

    let step = apply(
        &mut core,
        delivered(message("orphan", "success", "nowcast", "2024-05-01")),
        now(),
    );

    assert!(step.next.is_some());
    assert_eq!(step.launches().count(), 0);
    assert_eq!(alert_kinds(&step), vec![AlertKind::NoResolutionRule]);
    assert!(core
        .checklist()
        .has_success(&ChecklistKey::from("orphan stage"), None, None));
}

#[test]
fn older_run_date_does_not_overwrite_checklist() {
    let mut core = core(nowcast_pipeline());

    apply(
        &mut core,
        delivered(message("make_runoff_file", "failure", "nowcast", "2024-05-02")),
        now(),
    );
    apply(
        &mut core,
        delivered(message("make_runoff_file", "failure", "nowcast", "2024-05-01")),
        now(),
    );

    let entry = core
        .checklist()
        .entry(&ChecklistKey::from("rivers forcing"), &RunType::from("nowcast"))
        .unwrap();
    assert_eq!(entry.run_date, date("2024-05-02"));
    assert_eq!(
        core.pair(&pair("make_runoff_file", "nowcast", "2024-05-01"))
            .unwrap()
            .phase,
        Phase::Failed
    );
}

#[test]
fn watchdog_expiry_infers_crash_exactly_once() {
    init_tracing();
    let mut core = core(example_config());
    apply(
        &mut core,
        delivered(message("A", "success nowcast", "nowcast", "2024-05-01")),
        now(),
    );
    let b = pair("B", "nowcast", "2024-05-01");

    let later = now() + TimeDelta::hours(1);
    let step = apply(
        &mut core,
        ManagerEvent::WatchdogExpired {
            pair: b.clone(),
            launch_id: 1,
        },
        later,
    );

    assert!(step.persist);
    assert_eq!(alert_kinds(&step), vec![AlertKind::WorkerCrashed]);
    assert!(step
        .commands
        .iter()
        .any(|c| matches!(c, CoreCommand::DisarmWatchdog { pair } if *pair == b)));
    assert!(
        step.commands.iter().any(|c| matches!(
            c,
            CoreCommand::CancelLaunch { pair, launch_id: 1 } if *pair == b
        )),
        "the silent process is stopped"
    );

    let state = core.pair(&b).unwrap();
    assert_eq!(state.phase, Phase::Crashed);
    assert!(state.has_seen("watchdog-1"));
    let entry = core
        .checklist()
        .entry(&ChecklistKey::from("B output"), &RunType::from("nowcast"))
        .unwrap();
    assert_eq!(entry.outcome, Outcome::Crash);
    assert_eq!(entry.message_id, "watchdog-1");

    // The same expiry again (e.g. raced with a re-arm) changes nothing.
    let step = apply(
        &mut core,
        ManagerEvent::WatchdogExpired {
            pair: b,
            launch_id: 1,
        },
        later + TimeDelta::seconds(1),
    );
    assert!(step.next.is_none());
    assert!(step.commands.is_empty());
}

#[test]
fn expiry_after_terminal_message_is_stale() {
    let mut core = core(example_config());
    apply(
        &mut core,
        delivered(message("A", "success nowcast", "nowcast", "2024-05-01")),
        now(),
    );
    let step = apply(
        &mut core,
        delivered(message("B", "success", "nowcast", "2024-05-01")),
        now(),
    );
    let b = pair("B", "nowcast", "2024-05-01");
    assert!(step
        .commands
        .iter()
        .any(|c| matches!(c, CoreCommand::DisarmWatchdog { pair } if *pair == b)));

    let step = apply(
        &mut core,
        ManagerEvent::WatchdogExpired {
            pair: b.clone(),
            launch_id: 1,
        },
        now() + TimeDelta::hours(2),
    );
    assert!(step.next.is_none());
    assert_eq!(core.pair(&b).unwrap().phase, Phase::Succeeded);
}

#[test]
fn process_exit_without_message_shortens_deadline_to_crash_grace() {
    let mut core = core(example_config());
    apply(
        &mut core,
        delivered(message("A", "success nowcast", "nowcast", "2024-05-01")),
        now(),
    );
    let b = pair("B", "nowcast", "2024-05-01");

    let exited_at = now() + TimeDelta::minutes(3);
    let step = apply(
        &mut core,
        ManagerEvent::ProcessExited {
            pair: b.clone(),
            launch_id: 1,
            exit_code: Some(1),
        },
        exited_at,
    );

    assert!(step.persist);
    assert!(step.commands.iter().any(|c| matches!(
        c,
        CoreCommand::ArmWatchdog { launch_id: 1, after, .. } if *after == options().crash_grace
    )));
    let state = core.pair(&b).unwrap();
    assert_eq!(state.phase, Phase::Launched);
    assert_eq!(state.deadline, Some(exited_at + TimeDelta::seconds(30)));

    // A second exit report for the same launch does not extend anything.
    let step = apply(
        &mut core,
        ManagerEvent::ProcessExited {
            pair: b,
            launch_id: 1,
            exit_code: Some(1),
        },
        exited_at,
    );
    assert!(step.next.is_none());
}

#[test]
fn process_exit_after_report_is_ignored() {
    let mut core = core(example_config());
    apply(
        &mut core,
        delivered(message("A", "success nowcast", "nowcast", "2024-05-01")),
        now(),
    );
    apply(
        &mut core,
        delivered(message("B", "success", "nowcast", "2024-05-01")),
        now(),
    );

    let step = apply(
        &mut core,
        ManagerEvent::ProcessExited {
            pair: pair("B", "nowcast", "2024-05-01"),
            launch_id: 1,
            exit_code: Some(0),
        },
        now(),
    );
    assert!(step.next.is_none());
    assert!(step.commands.is_empty());
}

#[test]
fn reload_swaps_rules_between_events() {
    init_tracing();
    let mut core = core(example_config());

    // New rules: A's success now launches C instead of B.
    let reloaded = ConfigBuilder::new()
        .with_worker(
            "A",
            WorkerBuilder::new("nowcast run")
                .not_launchable()
                .messages(&["success nowcast"])
                .build(),
        )
        .with_worker("C", WorkerBuilder::new("C output").messages(&["success"]).build())
        .with_rule(
            RuleBuilder::new("A", "success nowcast")
                .launch(LaunchBuilder::new("C"))
                .build(),
        )
        .tables();

    let (reply_tx, _reply_rx) = mpsc::unbounded_channel();
    let step = apply(
        &mut core,
        ManagerEvent::ConfigReloaded {
            result: Ok(reloaded),
            reply: Some(reply_tx),
        },
        now(),
    );
    assert!(!step.persist, "tables are not part of the persisted file");
    assert_eq!(
        step.replies().cloned().collect::<Vec<_>>(),
        vec![Reply::Done {
            command: "reload".to_string()
        }]
    );

    let step = apply(
        &mut core,
        delivered(message("A", "success nowcast", "nowcast", "2024-05-01")),
        now(),
    );
    let targets: Vec<_> = step.launches().map(|o| o.spec.worker.to_string()).collect();
    assert_eq!(targets, vec!["C"]);
}

#[test]
fn failed_reload_keeps_previous_tables() {
    let mut core = core(example_config());

    let (reply_tx, _reply_rx) = mpsc::unbounded_channel();
    let step = apply(
        &mut core,
        ManagerEvent::ConfigReloaded {
            result: Err("duplicate rule for (A, success nowcast)".to_string()),
            reply: Some(reply_tx),
        },
        now(),
    );
    assert!(step.next.is_none());
    assert_eq!(alert_kinds(&step), vec![AlertKind::ReloadFailed]);
    assert!(matches!(step.replies().next(), Some(Reply::Error { .. })));

    let step = apply(
        &mut core,
        delivered(message("A", "success nowcast", "nowcast", "2024-05-01")),
        now(),
    );
    let targets: Vec<_> = step.launches().map(|o| o.spec.worker.to_string()).collect();
    assert_eq!(targets, vec!["B"]);
}

#[test]
fn reload_command_is_handed_to_the_shell() {
    let core = core(example_config());
    let step = core.step(
        ManagerEvent::Control {
            command: ControlCommand::Reload,
            reply: None,
        },
        now(),
    );
    assert!(step.next.is_none());
    assert!(matches!(
        step.commands.as_slice(),
        [CoreCommand::Reload { reply: None }]
    ));
}

#[test]
fn clear_checklist_resets_one_run_type() {
    init_tracing();
    let mut core = core(nowcast_pipeline());

    apply(
        &mut core,
        delivered(message("download_weather", "success 06", "nowcast", "2024-05-01")),
        now(),
    );
    apply(
        &mut core,
        delivered(message("make_plots", "failure", "forecast", "2024-05-01")),
        now(),
    );

    let (reply_tx, _reply_rx) = mpsc::unbounded_channel();
    let step = apply(
        &mut core,
        ManagerEvent::Control {
            command: ControlCommand::ClearChecklist {
                run_type: RunType::from("nowcast"),
                run_date: None,
            },
            reply: Some(reply_tx),
        },
        now(),
    );

    assert!(step.persist);
    let runoff = pair("make_runoff_file", "nowcast", "2024-05-01");
    assert!(step
        .commands
        .iter()
        .any(|c| matches!(c, CoreCommand::DisarmWatchdog { pair } if *pair == runoff)));
    assert_eq!(
        step.replies().cloned().collect::<Vec<_>>(),
        vec![Reply::Done {
            command: "clear_checklist".to_string()
        }]
    );

    assert!(!core
        .checklist()
        .has_success(&ChecklistKey::from("weather forecast"), None, None));
    assert!(core.pair(&runoff).is_none());
    assert!(core
        .checklist()
        .entry(&ChecklistKey::from("plots"), &RunType::from("forecast"))
        .is_some());
    assert!(core.pair(&pair("make_plots", "forecast", "2024-05-01")).is_some());

    // With the pair gone, the same trigger launches again.
    let step = apply(
        &mut core,
        delivered(message("download_weather", "success 06", "nowcast", "2024-05-01")),
        now(),
    );
    assert_eq!(step.launches().count(), 1);
}

#[test]
fn clear_checklist_rejects_unknown_run_type() {
    let mut core = core(nowcast_pipeline());
    let (reply_tx, _reply_rx) = mpsc::unbounded_channel();
    let step = apply(
        &mut core,
        ManagerEvent::Control {
            command: ControlCommand::ClearChecklist {
                run_type: RunType::from("hindcast"),
                run_date: Some(date("2024-05-01")),
            },
            reply: Some(reply_tx),
        },
        now(),
    );
    assert!(step.next.is_none());
    assert!(matches!(step.replies().next(), Some(Reply::Error { .. })));
}

#[test]
fn shutdown_suppresses_new_launches() {
    init_tracing();
    let mut core = core(nowcast_pipeline());

    let step = apply(&mut core, ManagerEvent::ShutdownRequested, now());
    assert!(!step.keep_running);
    assert!(!step.persist);
    assert!(matches!(step.commands.as_slice(), [CoreCommand::RequestExit]));
    assert!(core.is_draining());

    let step = apply(
        &mut core,
        delivered(message("download_weather", "success 06", "nowcast", "2024-05-01")),
        now(),
    );
    assert!(step.persist, "drained messages are still recorded");
    assert_eq!(step.launches().count(), 0);
    assert!(core
        .pair(&pair("make_runoff_file", "nowcast", "2024-05-01"))
        .is_none());
}

#[test]
fn shutdown_command_replies_done() {
    let core = core(nowcast_pipeline());
    let (reply_tx, _reply_rx) = mpsc::unbounded_channel();
    let step = core.step(
        ManagerEvent::Control {
            command: ControlCommand::Shutdown,
            reply: Some(reply_tx),
        },
        now(),
    );
    assert!(!step.keep_running);
    assert_eq!(
        step.replies().cloned().collect::<Vec<_>>(),
        vec![Reply::Done {
            command: "shutdown".to_string()
        }]
    );
}

#[test]
fn status_reports_pairs_and_checklist() {
    let mut core = core(nowcast_pipeline());
    apply(
        &mut core,
        delivered(message("download_weather", "success 06", "nowcast", "2024-05-01")),
        now(),
    );

    let (reply_tx, _reply_rx) = mpsc::unbounded_channel();
    let step = core.step(
        ManagerEvent::Control {
            command: ControlCommand::Status,
            reply: Some(reply_tx),
        },
        now(),
    );
    assert!(step.next.is_none());

    let Some(Reply::Status { status }) = step.replies().next() else {
        panic!("expected status reply");
    };
    assert_eq!(status["draining"], json!(false));
    assert_eq!(status["next_launch_id"], json!(2));
    assert_eq!(
        status["workers"]["make_runoff_file/nowcast/2024-05-01"]["phase"],
        json!("launched")
    );
    assert_eq!(
        status["checklist"]["weather forecast"]["nowcast"]["outcome"],
        json!("success")
    );
}

#[test]
fn launch_of_unlaunchable_worker_raises_launch_failed() {
    // Config validation refuses rules that target a worker without a command,
    // so build such tables by hand.
    let mut tables = (*nowcast_pipeline().tables()).clone();
    let mut workers: BTreeMap<_, _> = tables
        .registry
        .workers()
        .map(|(id, e)| (id.clone(), e.clone()))
        .collect();
    if let Some(entry) = workers.get_mut(&WorkerId::new("make_runoff_file")) {
        entry.command.clear();
    }
    tables.registry = MessageRegistry::new(workers);
    let mut core = ManagerCore::new(Arc::new(tables), ChecklistFile::default(), options());

    let step = apply(
        &mut core,
        delivered(message("download_weather", "success 06", "nowcast", "2024-05-01")),
        now(),
    );
    assert_eq!(step.launches().count(), 0);
    assert_eq!(alert_kinds(&step), vec![AlertKind::LaunchFailed]);
    assert!(core
        .pair(&pair("make_runoff_file", "nowcast", "2024-05-01"))
        .is_none());
}

#[test]
fn recovery_rearms_in_flight_launches_with_remaining_time() {
    let mut file = ChecklistFile::default();
    let in_flight = pair("run_nemo", "nowcast", "2024-05-01");
    let overdue = pair("make_plots", "forecast", "2024-04-30");
    let done = pair("make_runoff_file", "nowcast", "2024-05-01");

    let started = now() - TimeDelta::minutes(50);
    file.workers.insert(
        in_flight.clone(),
        PairState::idle(started).launched(4, started, Some(now() + TimeDelta::minutes(10))),
    );
    file.workers.insert(
        overdue.clone(),
        PairState::idle(started).launched(5, started, Some(now() - TimeDelta::minutes(1))),
    );
    file.workers.insert(
        done,
        PairState::idle(started).terminal(Outcome::Success, "m-1", started),
    );
    file.next_launch_id = 6;

    let core = ManagerCore::new(nowcast_pipeline().tables(), file, options());
    let mut commands = core.recovery_commands(now());
    commands.sort_by_key(|c| match c {
        CoreCommand::ArmWatchdog { launch_id, .. } => *launch_id,
        _ => u64::MAX,
    });

    match commands.as_slice() {
        [CoreCommand::ArmWatchdog {
            pair: p1,
            launch_id: 4,
            after: a1,
        }, CoreCommand::ArmWatchdog {
            pair: p2,
            launch_id: 5,
            after: a2,
        }] => {
            assert_eq!(p1, &in_flight);
            assert_eq!(*a1, Duration::from_secs(600));
            assert_eq!(p2, &overdue);
            assert_eq!(*a2, Duration::ZERO);
        }
        other => panic!("unexpected recovery commands: {other:?}"),
    }
}

#[test]
fn seen_ids_survive_relaunch() {
    let mut core = core(example_config());
    apply(
        &mut core,
        delivered(message_with_id("A", "success nowcast", "nowcast", "2024-05-01", "a-1")),
        now(),
    );
    apply(
        &mut core,
        delivered(message_with_id("B", "success", "nowcast", "2024-05-01", "b-1")),
        now(),
    );
    // Relaunch B through a new trigger message.
    let step = apply(
        &mut core,
        delivered(message_with_id("A", "success nowcast", "nowcast", "2024-05-01", "a-2")),
        now(),
    );
    assert_eq!(step.launches().count(), 1);

    // A late redelivery of B's first report must not close the new launch.
    let step = apply(
        &mut core,
        delivered(message_with_id("B", "success", "nowcast", "2024-05-01", "b-1")),
        now(),
    );
    assert!(step.next.is_none());
    assert_eq!(
        core.pair(&pair("B", "nowcast", "2024-05-01")).unwrap().phase,
        Phase::Launched
    );
}

/// One simulated day: the weather arrives, the runoff file is made, and
/// NEMO is given up on by its watchdog.
fn run_one_day(core: &mut ManagerCore, day: chrono::NaiveDate) {
    let run_date = day.format("%Y-%m-%d").to_string();
    let at = now() + TimeDelta::days((day - date("2024-01-01")).num_days());

    apply(
        core,
        delivered(message("download_weather", "success 06", "nowcast", &run_date)),
        at,
    );
    apply(
        core,
        delivered(message("make_runoff_file", "success", "nowcast", &run_date)),
        at,
    );
    let nemo = pair("run_nemo", "nowcast", &run_date);
    let launch_id = core.pair(&nemo).and_then(|p| p.launch_id).unwrap();
    apply(
        core,
        ManagerEvent::WatchdogExpired {
            pair: nemo,
            launch_id,
        },
        at,
    );
}

#[test]
fn finished_pairs_are_pruned_past_retention() {
    let mut core = core(nowcast_pipeline());
    let first = date("2024-01-01");

    for offset in 0..365 {
        run_one_day(&mut core, first + chrono::Days::new(offset));
    }

    // Three workers, each keeping the newest day plus `pair_retention_days`.
    let per_worker = options().pair_retention_days as usize + 1;
    let pairs = core.state().file.workers.len();
    assert_eq!(pairs, 3 * per_worker, "pair table grew to {pairs} entries");

    let newest = first + chrono::Days::new(364);
    let oldest_kept = newest - chrono::Days::new(u64::from(options().pair_retention_days));
    assert!(core.state().file.workers.keys().all(|p| p.run_context.run_date >= oldest_kept));
    assert_eq!(core.checklist().keys().count(), 3);
}

#[test]
fn launched_pairs_are_never_pruned() {
    let mut core = core(nowcast_pipeline());

    // Runoff for May 1 is launched and never reports.
    apply(
        &mut core,
        delivered(message("download_weather", "success 06", "nowcast", "2024-05-01")),
        now(),
    );
    let stuck = pair("make_runoff_file", "nowcast", "2024-05-01");

    // Weeks later, runoff for a newer date completes.
    apply(
        &mut core,
        delivered(message("download_weather", "success 06", "nowcast", "2024-06-01")),
        now(),
    );
    apply(
        &mut core,
        delivered(message("make_runoff_file", "success", "nowcast", "2024-06-01")),
        now(),
    );

    assert_eq!(core.pair(&stuck).unwrap().phase, Phase::Launched);
    assert!(core.pair(&pair("download_weather", "nowcast", "2024-05-01")).is_none());
}

#[test]
fn redelivery_older_than_retention_is_acked_but_not_applied() {
    let mut core = core(nowcast_pipeline());
    let (reply_tx, _reply_rx) = mpsc::unbounded_channel();

    let old = message("download_weather", "success 06", "nowcast", "2024-05-01");
    apply(&mut core, delivered(old.clone()), now());
    apply(
        &mut core,
        delivered(message("download_weather", "success 06", "nowcast", "2024-05-20")),
        now(),
    );
    assert!(core.pair(&pair("download_weather", "nowcast", "2024-05-01")).is_none());

    let step = apply(
        &mut core,
        ManagerEvent::Delivered(Delivery {
            id: 99,
            message: old.clone(),
            reply_to: Some(reply_tx),
        }),
        now(),
    );

    assert!(step.next.is_none());
    assert_eq!(step.launches().count(), 0);
    assert!(core.pair(&pair("download_weather", "nowcast", "2024-05-01")).is_none());
    assert_eq!(
        step.replies().cloned().collect::<Vec<_>>(),
        vec![Reply::Ack { in_reply_to: old.id }]
    );
}
