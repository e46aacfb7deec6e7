// src/engine/runtime.rs

use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

use chrono::Utc;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::broker::{ReplyTo, Relay};
use crate::checklist::{ChecklistFile, ChecklistStore};
use crate::config::{load_and_validate, ManagerSettings};
use crate::errors::{ManagerError, Result};
use crate::exec::LaunchBackend;

use super::alert::{Alert, AlertKind};
use super::core::ManagerCore;
use super::watchdog::Watchdogs;
use super::{CoreCommand, CoreStep, ManagerEvent};

/// Drives the manager core in response to `ManagerEvent`s.
///
/// This is a pure IO shell around `ManagerCore`, which contains all the
/// manager semantics. This struct handles async IO: reading events from the
/// channel, persisting the checklist file before any state change takes
/// effect, and carrying out the commands the core returns.
pub struct Runtime<L: LaunchBackend> {
    core: ManagerCore,
    store: ChecklistStore,
    settings: ManagerSettings,
    launcher: L,
    relay: Relay,
    event_tx: mpsc::Sender<ManagerEvent>,
    event_rx: mpsc::Receiver<ManagerEvent>,
    watchdogs: Watchdogs,
    config_path: Option<PathBuf>,
}

impl<L: LaunchBackend> fmt::Debug for Runtime<L> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Runtime")
            .field("core", &self.core)
            .field("store", &self.store)
            .field("config_path", &self.config_path)
            .finish_non_exhaustive()
    }
}

impl<L: LaunchBackend> Runtime<L> {
    /// `events` must be the two halves of the channel every event source
    /// (broker forwarder, launcher, watcher, signals) sends into.
    pub fn new(
        core: ManagerCore,
        store: ChecklistStore,
        settings: ManagerSettings,
        launcher: L,
        relay: Relay,
        events: (mpsc::Sender<ManagerEvent>, mpsc::Receiver<ManagerEvent>),
    ) -> Self {
        let (event_tx, event_rx) = events;
        Self {
            core,
            store,
            settings,
            launcher,
            relay,
            watchdogs: Watchdogs::new(event_tx.clone()),
            event_tx,
            event_rx,
            config_path: None,
        }
    }

    /// Config file re-read on `reload`. Without one, reloads are rejected.
    pub fn with_config_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.config_path = Some(path.into());
        self
    }

    /// Main event loop.
    ///
    /// - Re-arms watchdogs for launches that were in flight at the last stop.
    /// - Consumes `ManagerEvent`s and feeds them into the core.
    /// - On shutdown, drains queued events and persists a final time.
    pub async fn run(mut self) -> Result<()> {
        info!(
            checklist = ?self.store.path(),
            workers = self.core.state().tables.registry.len(),
            rules = self.core.state().tables.rules.len(),
            "nowcast manager runtime started"
        );

        let recovery = self.core.recovery_commands(Utc::now());
        if !recovery.is_empty() {
            info!(pairs = recovery.len(), "re-arming watchdogs for in-flight launches");
        }
        for command in recovery {
            self.execute_command(command).await;
        }

        loop {
            let event = match self.event_rx.recv().await {
                Some(e) => e,
                None => {
                    info!("manager event channel closed; exiting");
                    break;
                }
            };

            debug!(?event, "runtime received event");

            if !self.process(event, true).await {
                info!("core requested exit; draining");
                break;
            }
        }

        self.drain().await;
        let result = self.final_persist().await;
        self.watchdogs.disarm_all();
        info!("runtime exiting");
        result
    }

    /// Feed one event through the core. Returns whether to keep running.
    async fn process(&mut self, event: ManagerEvent, requeue_on_failure: bool) -> bool {
        let retained = requeue_on_failure.then(|| event.clone());
        let CoreStep {
            next,
            persist,
            commands,
            keep_running,
        } = self.core.step(event, Utc::now());

        if let Some(next) = next {
            if persist {
                if let Err(err) = self.persist(&next.file).await {
                    Alert::new(
                        AlertKind::PersistFailed,
                        format!("checklist not persisted; event not applied: {err}"),
                    )
                    .raise();
                    if let Some(event) = retained {
                        self.requeue(event);
                    }
                    return true;
                }
            }
            self.core.commit(next);
        }

        for command in commands {
            self.execute_command(command).await;
        }

        keep_running
    }

    /// Execute a single command from the core.
    async fn execute_command(&mut self, command: CoreCommand) {
        match command {
            CoreCommand::Launch(order) => {
                let pair = order.pair();
                let launch_id = order.launch_id;
                if let Err(err) = self.launcher.launch(order).await {
                    // The pair stays Launched; its watchdog turns this into a crash.
                    Alert::new(
                        AlertKind::LaunchFailed,
                        format!("could not launch {pair} (launch {launch_id}): {err}"),
                    )
                    .raise();
                }
            }
            CoreCommand::ArmWatchdog {
                pair,
                launch_id,
                after,
            } => self.watchdogs.arm(pair, launch_id, after),
            CoreCommand::DisarmWatchdog { pair } => self.watchdogs.disarm(&pair),
            CoreCommand::CancelLaunch { pair, launch_id } => {
                if let Err(err) = self.launcher.cancel(pair.clone(), launch_id).await {
                    warn!(pair = %pair, launch_id, error = %err, "could not stop worker process");
                }
            }
            CoreCommand::Reply { to, reply } => {
                if to.send(reply).is_err() {
                    debug!("reply dropped; requester disconnected");
                }
            }
            CoreCommand::Settle(id) => {
                self.relay.settle(id);
            }
            CoreCommand::Alert(alert) => alert.raise(),
            CoreCommand::Reload { reply } => self.spawn_reload(reply),
            CoreCommand::RequestExit => {
                info!("core issued RequestExit command");
            }
        }
    }

    /// Load the config file off the event loop and send the outcome back as
    /// `ConfigReloaded`, so the swap happens between two events.
    fn spawn_reload(&self, reply: Option<ReplyTo>) {
        let tx = self.event_tx.clone();
        let current = self.settings.clone();
        let path = self.config_path.clone();

        tokio::spawn(async move {
            let result = match path {
                None => Err("manager was started without a config file".to_string()),
                Some(path) => {
                    info!(path = ?path, "reloading config");
                    match tokio::task::spawn_blocking(move || load_and_validate(&path)).await {
                        Ok(Ok(cfg)) => {
                            if cfg.manager != current {
                                warn!("[manager] settings changed on disk; they take effect after a restart");
                            }
                            Ok(Arc::new(cfg.tables))
                        }
                        Ok(Err(err)) => Err(err.to_string()),
                        Err(join) => Err(format!("config reload task failed: {join}")),
                    }
                }
            };
            let _ = tx.send(ManagerEvent::ConfigReloaded { result, reply }).await;
        });
    }

    /// Send `event` back into the loop after `requeue_delay`.
    fn requeue(&self, event: ManagerEvent) {
        let delay = self.settings.requeue_delay;
        warn!(delay_ms = delay.as_millis() as u64, "event re-queued for a later attempt");

        let tx = self.event_tx.clone();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let _ = tx.send(event).await;
        });
    }

    /// Process whatever is already queued, with launches suppressed, so
    /// pending acks still reach their workers.
    async fn drain(&mut self) {
        let mut drained = 0usize;
        while let Ok(event) = self.event_rx.try_recv() {
            drained += 1;
            self.process(event, false).await;
        }
        if drained > 0 {
            info!(events = drained, "drained queued events before exit");
        }
    }

    async fn final_persist(&self) -> Result<()> {
        let file = self.core.state().file.clone();
        match self.persist(&file).await {
            Ok(()) => {
                info!("final checklist persisted");
                Ok(())
            }
            Err(err) => {
                Alert::new(
                    AlertKind::PersistFailed,
                    format!("final checklist persist failed: {err}"),
                )
                .raise();
                Err(err)
            }
        }
    }

    /// Durable write with a per-attempt timeout, retried with backoff.
    async fn persist(&self, file: &ChecklistFile) -> Result<()> {
        let timeout = self.settings.persist_timeout;
        let store = &self.store;

        self.settings
            .retry
            .run("persist checklist", || {
                let store = store.clone();
                let file = file.clone();
                async move { persist_with_timeout(store, file, timeout).await }
            })
            .await
    }
}

async fn persist_with_timeout(
    store: ChecklistStore,
    file: ChecklistFile,
    timeout: std::time::Duration,
) -> Result<()> {
    // The ticket is taken here, in request order. The blocking write may
    // outlive the timeout, and must then lose to any later attempt.
    let ticket = store.ticket();
    let write = tokio::task::spawn_blocking(move || store.persist_in_order(ticket, &file));
    match tokio::time::timeout(timeout, write).await {
        Ok(Ok(result)) => result,
        Ok(Err(join)) => Err(ManagerError::Other(anyhow::Error::new(join))),
        Err(_elapsed) => Err(ManagerError::PersistTimeout(timeout)),
    }
}
