// src/config/model.rs

use std::collections::{BTreeMap, BTreeSet};
use std::path::PathBuf;
use std::time::Duration;

use serde::Deserialize;

use crate::registry::MessageRegistry;
use crate::resolver::RuleTable;
use crate::retry::RetryPolicy;
use crate::types::RunType;

/// Top-level configuration as read from a TOML file.
///
/// ```toml
/// [manager]
/// checklist_file = "nowcast_checklist.json"
/// run_types = ["nowcast", "forecast"]
///
/// [worker.download_weather]
/// checklist_key = "weather forecast"
/// command = ["python3", "-m", "nowcast.workers.download_weather"]
/// [worker.download_weather.messages]
/// "success 06" = "06 forecast ready"
///
/// [[rule]]
/// worker = "download_weather"
/// message = "success 06"
/// launch = [{ worker = "make_runoff_file", args = ["{run_date}"] }]
/// ```
///
/// This is the raw, unvalidated form. Use `ConfigFile::try_from` (or
/// `config::load_and_validate`) to obtain the typed tables.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawConfigFile {
    #[serde(default)]
    pub manager: ManagerSection,

    /// Message registry entries from `[worker.<name>]`.
    #[serde(default)]
    pub worker: BTreeMap<String, WorkerConfig>,

    /// Dependency rules from `[[rule]]`.
    #[serde(default)]
    pub rule: Vec<RuleConfig>,
}

/// `[manager]` section. Not hot-reloadable.
#[derive(Debug, Clone, Deserialize)]
pub struct ManagerSection {
    #[serde(default = "default_checklist_file")]
    pub checklist_file: PathBuf,

    /// Address of the broker's TCP front end.
    #[serde(default = "default_listen")]
    pub listen: String,

    #[serde(default = "default_run_types")]
    pub run_types: Vec<String>,

    /// Default time a launched worker has to report before it is presumed crashed.
    #[serde(default = "default_watchdog_timeout")]
    pub watchdog_timeout: String,

    /// How long to wait for a message after a worker process exits.
    #[serde(default = "default_crash_grace")]
    pub crash_grace: String,

    #[serde(default = "default_persist_timeout")]
    pub persist_timeout: String,

    /// Delay before an event whose persist failed is processed again.
    #[serde(default = "default_requeue_delay")]
    pub requeue_delay: String,

    /// Reload registry and rules when the config file changes on disk.
    #[serde(default = "default_true")]
    pub watch_config: bool,

    /// Days of finished per-run state kept per worker and run type, counted
    /// back from the newest run date. Redeliveries older than that are
    /// dropped unapplied.
    #[serde(default = "default_pair_retention_days")]
    pub pair_retention_days: u32,

    #[serde(default)]
    pub retry: RetrySection,
}

fn default_checklist_file() -> PathBuf {
    PathBuf::from("nowcast_checklist.json")
}

fn default_listen() -> String {
    "127.0.0.1:5555".to_string()
}

fn default_run_types() -> Vec<String> {
    ["nowcast", "nowcast-green", "forecast", "forecast2"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}

fn default_watchdog_timeout() -> String {
    "6h".to_string()
}

fn default_crash_grace() -> String {
    "30s".to_string()
}

fn default_persist_timeout() -> String {
    "10s".to_string()
}

fn default_requeue_delay() -> String {
    "5s".to_string()
}

fn default_pair_retention_days() -> u32 {
    7
}

fn default_true() -> bool {
    true
}

impl Default for ManagerSection {
    fn default() -> Self {
        Self {
            checklist_file: default_checklist_file(),
            listen: default_listen(),
            run_types: default_run_types(),
            watchdog_timeout: default_watchdog_timeout(),
            crash_grace: default_crash_grace(),
            persist_timeout: default_persist_timeout(),
            requeue_delay: default_requeue_delay(),
            watch_config: true,
            pair_retention_days: default_pair_retention_days(),
            retry: RetrySection::default(),
        }
    }
}

/// `[manager.retry]` section: backoff for transient infrastructure errors.
#[derive(Debug, Clone, Deserialize)]
pub struct RetrySection {
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_retry_base")]
    pub base: String,
    #[serde(default = "default_retry_cap")]
    pub cap: String,
    #[serde(default = "default_jitter")]
    pub jitter: f64,
}

fn default_max_attempts() -> u32 {
    5
}

fn default_retry_base() -> String {
    "200ms".to_string()
}

fn default_retry_cap() -> String {
    "10s".to_string()
}

fn default_jitter() -> f64 {
    0.2
}

impl Default for RetrySection {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            base: default_retry_base(),
            cap: default_retry_cap(),
            jitter: default_jitter(),
        }
    }
}

/// `[worker.<name>]` section: one Message Registry entry.
#[derive(Debug, Clone, Deserialize)]
pub struct WorkerConfig {
    /// Stage name this worker owns in the checklist.
    pub checklist_key: String,

    /// Program and leading arguments used to launch the worker.
    ///
    /// Workers with an empty command can report but cannot be launched by
    /// the manager (e.g. cron-started download workers).
    #[serde(default)]
    pub command: Vec<String>,

    /// Per-worker override of `[manager].watchdog_timeout`.
    #[serde(default)]
    pub timeout: Option<String>,

    /// Legal message types mapped to human-readable descriptions.
    ///
    /// `crash` is always registered, whether listed or not.
    #[serde(default)]
    pub messages: BTreeMap<String, String>,
}

/// `[[rule]]` entry: `(worker, message) -> launch templates`.
#[derive(Debug, Clone, Deserialize)]
pub struct RuleConfig {
    pub worker: String,
    pub message: String,
    /// An empty list is a valid, explicit "launch nothing" resolution.
    #[serde(default)]
    pub launch: Vec<LaunchTemplateConfig>,
}

/// One launch template inside a rule.
#[derive(Debug, Clone, Deserialize)]
pub struct LaunchTemplateConfig {
    pub worker: String,

    /// Arguments; may contain `{run_type}`, `{run_date}`,
    /// `{run_date_compact}` and `{payload.<field>}` placeholders.
    #[serde(default)]
    pub args: Vec<String>,

    /// Launch for a different run type than the triggering message.
    #[serde(default)]
    pub run_type: Option<String>,

    /// Shift the run date by this many days.
    #[serde(default)]
    pub run_date_offset: i64,

    #[serde(default)]
    pub guard: GuardConfig,
}

/// Guard predicate as written in TOML (`guard = { kind = "..." }`).
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum GuardConfig {
    #[default]
    Always,
    ChecklistHas {
        key: String,
        #[serde(default)]
        run_type: Option<String>,
        #[serde(default)]
        any_date: bool,
    },
    ChecklistMissing {
        key: String,
        #[serde(default)]
        run_type: Option<String>,
        #[serde(default)]
        any_date: bool,
    },
    RunTypeIs {
        run_types: Vec<String>,
    },
    PayloadEquals {
        field: String,
        value: String,
    },
    All {
        guards: Vec<GuardConfig>,
    },
}

/// Parsed `[manager]` settings.
#[derive(Debug, Clone, PartialEq)]
pub struct ManagerSettings {
    pub checklist_file: PathBuf,
    pub listen: String,
    pub watchdog_timeout: Duration,
    pub crash_grace: Duration,
    pub persist_timeout: Duration,
    pub requeue_delay: Duration,
    pub watch_config: bool,
    pub pair_retention_days: u32,
    pub retry: RetryPolicy,
}

/// The hot-reloadable part of the configuration.
///
/// The manager holds this behind an `Arc` and swaps the whole value on
/// reload, so every message is handled against exactly one table set.
#[derive(Debug, Clone)]
pub struct PipelineTables {
    pub run_types: BTreeSet<RunType>,
    pub registry: MessageRegistry,
    pub rules: RuleTable,
}

/// Validated configuration.
#[derive(Debug, Clone)]
pub struct ConfigFile {
    pub manager: ManagerSettings,
    pub tables: PipelineTables,
}
