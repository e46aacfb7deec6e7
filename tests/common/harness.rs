//! A running manager over a mock filesystem and a fake launcher.

use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use nowcast_manager::broker::{forward_deliveries, Pattern, Relay};
use nowcast_manager::checklist::{ChecklistFile, ChecklistStore};
use nowcast_manager::config::{ConfigFile, ManagerSettings};
use nowcast_manager::engine::{
    ControlCommand, CoreOptions, LaunchOrder, ManagerCore, ManagerEvent, Runtime,
};
use nowcast_manager::fs::mock::MockFileSystem;
use nowcast_manager::message::{Message, MessageType, Reply};
use nowcast_manager::retry::RetryPolicy;
use nowcast_manager_test_utils::builders::ConfigBuilder;
use nowcast_manager_test_utils::fake_launcher::FakeLauncher;
use nowcast_manager_test_utils::{init_tracing, with_timeout};
use serde_json::{json, Value};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

pub const CHECKLIST: &str = "/state/checklist.json";

pub struct Harness {
    pub relay: Relay,
    pub events: mpsc::Sender<ManagerEvent>,
    pub launched: Arc<Mutex<Vec<LaunchOrder>>>,
    pub cancelled: Arc<Mutex<Vec<u64>>>,
    pub fs: MockFileSystem,
    pub handle: JoinHandle<nowcast_manager::errors::Result<()>>,
}

#[derive(Default)]
pub struct Setup<'a> {
    pub file: ChecklistFile,
    pub fs: MockFileSystem,
    pub completions: Vec<(&'a str, MessageType)>,
    pub config_path: Option<&'a Path>,
    pub persist_timeout: Option<Duration>,
}

fn fast(manager: ManagerSettings, persist_timeout: Option<Duration>) -> ManagerSettings {
    ManagerSettings {
        persist_timeout: persist_timeout.unwrap_or(Duration::from_secs(2)),
        requeue_delay: Duration::from_millis(100),
        retry: RetryPolicy::once(),
        ..manager
    }
}

pub fn start(config: ConfigBuilder, setup: Setup<'_>) -> Harness {
    init_tracing();
    let ConfigFile { manager, tables } = config.build();
    let settings = fast(manager, setup.persist_timeout);
    let options = CoreOptions {
        watchdog_timeout: settings.watchdog_timeout,
        crash_grace: settings.crash_grace,
        pair_retention_days: settings.pair_retention_days,
    };

    let core = ManagerCore::new(Arc::new(tables), setup.file, options);
    let store = ChecklistStore::new(CHECKLIST, Arc::new(setup.fs.clone()));
    let relay = Relay::new();

    let launched = Arc::new(Mutex::new(Vec::new()));
    let cancelled = Arc::new(Mutex::new(Vec::new()));
    let mut launcher =
        FakeLauncher::new(Arc::clone(&launched)).recording_cancels(Arc::clone(&cancelled));
    for (worker, message_type) in setup.completions {
        launcher = launcher.completing(relay.clone(), worker, message_type);
    }

    let (tx, rx) = mpsc::channel(64);
    tokio::spawn(forward_deliveries(relay.subscribe(Pattern::All), tx.clone()));

    let mut runtime = Runtime::new(core, store, settings, launcher, relay.clone(), (tx.clone(), rx));
    if let Some(path) = setup.config_path {
        runtime = runtime.with_config_path(path);
    }
    let handle = tokio::spawn(runtime.run());

    Harness {
        relay,
        events: tx,
        launched,
        cancelled,
        fs: setup.fs,
        handle,
    }
}

impl Harness {
    pub fn report(&self, msg: Message) -> mpsc::UnboundedReceiver<Reply> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.relay.publish(msg, Some(tx));
        rx
    }

    pub async fn control(&self, command: ControlCommand) -> Reply {
        let (tx, mut rx) = mpsc::unbounded_channel();
        self.events
            .send(ManagerEvent::Control {
                command,
                reply: Some(tx),
            })
            .await
            .unwrap();
        with_timeout(rx.recv()).await.expect("control reply")
    }

    pub async fn status(&self) -> Value {
        match self.control(ControlCommand::Status).await {
            Reply::Status { status } => status,
            other => panic!("expected status, got {other:?}"),
        }
    }

    pub fn launches(&self) -> Vec<LaunchOrder> {
        self.launched.lock().unwrap().clone()
    }

    pub async fn wait_for_launches(&self, n: usize) {
        with_timeout(async {
            while self.launched.lock().unwrap().len() < n {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await;
    }

    pub async fn wait_for_phase(&self, key: &str, phase: &str) {
        with_timeout(async {
            loop {
                if self.status().await["workers"][key]["phase"] == json!(phase) {
                    return;
                }
                tokio::time::sleep(Duration::from_millis(25)).await;
            }
        })
        .await;
    }

    /// Stop the manager and return what it left on disk.
    pub async fn shutdown(self) -> (ChecklistFile, Relay, Vec<LaunchOrder>) {
        assert_eq!(
            self.control(ControlCommand::Shutdown).await,
            Reply::Done {
                command: "shutdown".to_string()
            }
        );
        with_timeout(self.handle).await.unwrap().unwrap();

        let saved = ChecklistStore::new(CHECKLIST, Arc::new(self.fs.clone()))
            .load()
            .unwrap();
        let launches = self.launched.lock().unwrap().clone();
        (saved, self.relay, launches)
    }
}
