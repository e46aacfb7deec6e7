// src/lib.rs

pub mod broker;
pub mod checklist;
pub mod cli;
pub mod config;
pub mod engine;
pub mod errors;
pub mod exec;
pub mod fs;
pub mod logging;
pub mod message;
pub mod registry;
pub mod resolver;
pub mod retry;
pub mod types;
pub mod watch;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{anyhow, bail, Context, Result};
use serde_json::{Map, Value};
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::broker::{BrokerClient, ControlKind, ControlRequest, Pattern, Relay};
use crate::checklist::ChecklistStore;
use crate::cli::{CliArgs, Command, ControlAction, ReportArgs};
use crate::config::loader::load_and_validate;
use crate::config::model::ConfigFile;
use crate::engine::{ControlCommand, CoreOptions, ManagerCore, ManagerEvent, Runtime};
use crate::exec::RealLauncher;
use crate::fs::RealFileSystem;
use crate::message::{Reply, WireMessage};

/// Capacity of the manager's event channel.
const EVENT_CHANNEL_CAPACITY: usize = 256;

/// High-level entry point used by `main.rs`.
pub async fn run(args: CliArgs) -> Result<()> {
    match args.command {
        Command::Serve { config, dry_run } => {
            let config_path = config.config;
            let cfg = load_and_validate(&config_path)?;
            if dry_run {
                print_summary(&cfg);
                return Ok(());
            }
            serve(Some(config_path), cfg).await
        }
        Command::Check { config } => {
            let cfg = load_and_validate(&config.config)?;
            print_summary(&cfg);
            Ok(())
        }
        Command::Report(report) => send_report(report).await,
        Command::Control { addr, action } => send_control(&addr, action).await,
    }
}

/// Run the manager until shutdown.
///
/// This wires together:
/// - checklist store (loaded before anything else runs)
/// - relay + TCP broker front end
/// - process launcher
/// - (optional) config watcher
/// - Ctrl-C / SIGHUP handling
/// - the manager runtime itself
pub async fn serve(config_path: Option<PathBuf>, cfg: ConfigFile) -> Result<()> {
    let ConfigFile { manager, tables } = cfg;

    let store = ChecklistStore::new(&manager.checklist_file, Arc::new(RealFileSystem));
    let file = store.load()?;

    let (tx, rx) = mpsc::channel::<ManagerEvent>(EVENT_CHANNEL_CAPACITY);

    let relay = Relay::new();
    let listener = TcpListener::bind(&manager.listen)
        .await
        .with_context(|| format!("binding broker to {}", manager.listen))?;
    {
        let relay = relay.clone();
        let tx = tx.clone();
        tokio::spawn(async move {
            if let Err(err) = broker::serve(listener, relay, tx).await {
                warn!(error = %err, "broker front end stopped");
            }
        });
    }
    tokio::spawn(broker::forward_deliveries(
        relay.subscribe(Pattern::All),
        tx.clone(),
    ));

    let launcher = RealLauncher::new(tx.clone());

    let _watcher_handle = match config_path.as_deref() {
        Some(path) if manager.watch_config => Some(watch::spawn_config_watcher(
            path,
            tx.clone(),
            watch::DEFAULT_DEBOUNCE,
        )?),
        _ => None,
    };

    spawn_signal_handlers(tx.clone());

    let options = CoreOptions {
        watchdog_timeout: manager.watchdog_timeout,
        crash_grace: manager.crash_grace,
        pair_retention_days: manager.pair_retention_days,
    };

    // Construct the pure core (single source of truth for semantics).
    let core = ManagerCore::new(Arc::new(tables), file, options);

    // Construct the async IO shell around the core.
    let mut runtime = Runtime::new(core, store, manager, launcher, relay, (tx, rx));
    if let Some(path) = config_path {
        runtime = runtime.with_config_path(path);
    }
    runtime.run().await?;
    Ok(())
}

fn spawn_signal_handlers(tx: mpsc::Sender<ManagerEvent>) {
    // Ctrl-C → graceful shutdown.
    {
        let tx = tx.clone();
        tokio::spawn(async move {
            if let Err(e) = tokio::signal::ctrl_c().await {
                warn!(error = %e, "failed to listen for Ctrl+C");
                return;
            }
            info!("Ctrl+C received; shutting down");
            let _ = tx.send(ManagerEvent::ShutdownRequested).await;
        });
    }

    // SIGHUP → reload.
    #[cfg(unix)]
    tokio::spawn(async move {
        use tokio::signal::unix::{signal, SignalKind};

        let mut hangup = match signal(SignalKind::hangup()) {
            Ok(s) => s,
            Err(e) => {
                warn!(error = %e, "failed to listen for SIGHUP");
                return;
            }
        };
        while hangup.recv().await.is_some() {
            info!("SIGHUP received; reloading config");
            let event = ManagerEvent::Control {
                command: ControlCommand::Reload,
                reply: None,
            };
            if tx.send(event).await.is_err() {
                return;
            }
        }
    });
    #[cfg(not(unix))]
    drop(tx);
}

async fn send_report(args: ReportArgs) -> Result<()> {
    let payload = match args.payload.as_deref() {
        None => Map::new(),
        Some(raw) => match serde_json::from_str::<Value>(raw).context("parsing --payload")? {
            Value::Object(map) => map,
            other => bail!("--payload must be a JSON object, got {other}"),
        },
    };

    let wire = WireMessage {
        worker: args.worker,
        message_type: args.message_type,
        payload,
        run_type: args.run_type,
        run_date: args.run_date,
        id: args.id,
    };

    let reply = BrokerClient::new(args.addr).report(wire).await?;
    print_reply(reply)
}

async fn send_control(addr: &str, action: ControlAction) -> Result<()> {
    let request = match action {
        ControlAction::Reload => ControlRequest::new(ControlKind::Reload),
        ControlAction::Status => ControlRequest::new(ControlKind::Status),
        ControlAction::Shutdown => ControlRequest::new(ControlKind::Shutdown),
        ControlAction::ClearChecklist { run_type, run_date } => ControlRequest {
            command: ControlKind::ClearChecklist,
            run_type: Some(run_type),
            run_date,
        },
    };

    let reply = BrokerClient::new(addr).control(request).await?;
    print_reply(reply)
}

/// Print a reply on stdout; error replies become a failing exit.
fn print_reply(reply: Reply) -> Result<()> {
    match reply {
        Reply::Error { in_reply_to, reason } => Err(match in_reply_to {
            Some(id) => anyhow!("rejected ({id}): {reason}"),
            None => anyhow!("rejected: {reason}"),
        }),
        Reply::Status { status } => {
            println!("{}", serde_json::to_string_pretty(&status)?);
            Ok(())
        }
        Reply::Ack { in_reply_to } => {
            println!("ack {in_reply_to}");
            Ok(())
        }
        Reply::Done { command } => {
            println!("{command}: done");
            Ok(())
        }
    }
}

/// Dry-run output: print settings, registry and rule table.
fn print_summary(cfg: &ConfigFile) {
    let manager = &cfg.manager;
    let tables = &cfg.tables;

    println!("nowcast-manager dry-run");
    println!("  manager.checklist_file = {}", manager.checklist_file.display());
    println!("  manager.listen = {}", manager.listen);
    println!("  manager.watchdog_timeout = {:?}", manager.watchdog_timeout);
    println!("  manager.crash_grace = {:?}", manager.crash_grace);
    println!("  manager.persist_timeout = {:?}", manager.persist_timeout);
    println!("  manager.requeue_delay = {:?}", manager.requeue_delay);
    println!("  manager.watch_config = {}", manager.watch_config);
    println!("  manager.pair_retention_days = {}", manager.pair_retention_days);
    println!(
        "  run_types = {:?}",
        tables.run_types.iter().map(|r| r.as_str()).collect::<Vec<_>>()
    );
    println!();

    println!("workers ({}):", tables.registry.len());
    for (id, entry) in tables.registry.workers() {
        println!("  - {id}");
        println!("      checklist_key: {}", entry.checklist_key);
        if entry.is_launchable() {
            println!("      command: {:?}", entry.command);
        } else {
            println!("      command: (not launched by the manager)");
        }
        if let Some(timeout) = entry.timeout {
            println!("      timeout: {timeout:?}");
        }
        for message_type in entry.message_types() {
            println!(
                "      {message_type}: {}",
                entry.describe(message_type).unwrap_or_default()
            );
        }
    }
    println!();

    println!("rules ({}):", tables.rules.len());
    for ((worker, message_type), templates) in tables.rules.iter() {
        println!("  - ({worker}, {message_type})");
        if templates.is_empty() {
            println!("      (launch nothing)");
        }
        for template in templates {
            println!("      -> {} {:?}", template.worker, template.args);
            if let Some(ref run_type) = template.run_type {
                println!("         run_type: {run_type}");
            }
            if template.run_date_offset != 0 {
                println!("         run_date_offset: {}", template.run_date_offset);
            }
            if template.guard != crate::resolver::Guard::Always {
                println!("         guard: {:?}", template.guard);
            }
        }
    }

    debug!("dry-run complete (no execution)");
}
