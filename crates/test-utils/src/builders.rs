#![allow(dead_code)]

use std::sync::Arc;

use nowcast_manager::config::{
    ConfigFile, GuardConfig, LaunchTemplateConfig, ManagerSection, PipelineTables, RawConfigFile,
    RuleConfig, WorkerConfig,
};
use nowcast_manager::errors::Result;

/// Builder for `ConfigFile` to simplify test setup.
///
/// Starts from the default `[manager]` section with config watching off.
pub struct ConfigBuilder {
    config: RawConfigFile,
}

impl ConfigBuilder {
    pub fn new() -> Self {
        Self {
            config: RawConfigFile {
                manager: ManagerSection {
                    watch_config: false,
                    ..ManagerSection::default()
                },
                ..RawConfigFile::default()
            },
        }
    }

    pub fn run_types(mut self, run_types: &[&str]) -> Self {
        self.config.manager.run_types = run_types.iter().map(|s| s.to_string()).collect();
        self
    }

    pub fn watchdog_timeout(mut self, timeout: &str) -> Self {
        self.config.manager.watchdog_timeout = timeout.to_string();
        self
    }

    pub fn crash_grace(mut self, grace: &str) -> Self {
        self.config.manager.crash_grace = grace.to_string();
        self
    }

    pub fn with_worker(mut self, name: &str, worker: WorkerConfig) -> Self {
        self.config.worker.insert(name.to_string(), worker);
        self
    }

    pub fn with_rule(mut self, rule: RuleConfig) -> Self {
        self.config.rule.push(rule);
        self
    }

    pub fn raw(self) -> RawConfigFile {
        self.config
    }

    pub fn try_build(self) -> Result<ConfigFile> {
        ConfigFile::try_from(self.config)
    }

    pub fn build(self) -> ConfigFile {
        ConfigFile::try_from(self.config).expect("Failed to build valid config from builder")
    }

    pub fn tables(self) -> Arc<PipelineTables> {
        Arc::new(self.build().tables)
    }
}

impl Default for ConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Builder for `WorkerConfig`. Launchable (`true`) unless told otherwise.
pub struct WorkerBuilder {
    worker: WorkerConfig,
}

impl WorkerBuilder {
    pub fn new(checklist_key: &str) -> Self {
        Self {
            worker: WorkerConfig {
                checklist_key: checklist_key.to_string(),
                command: vec!["true".to_string()],
                timeout: None,
                messages: Default::default(),
            },
        }
    }

    pub fn command(mut self, argv: &[&str]) -> Self {
        self.worker.command = argv.iter().map(|s| s.to_string()).collect();
        self
    }

    pub fn not_launchable(mut self) -> Self {
        self.worker.command.clear();
        self
    }

    pub fn timeout(mut self, timeout: &str) -> Self {
        self.worker.timeout = Some(timeout.to_string());
        self
    }

    pub fn message(mut self, message_type: &str, description: &str) -> Self {
        self.worker
            .messages
            .insert(message_type.to_string(), description.to_string());
        self
    }

    /// Shorthand for `message(type, type)`.
    pub fn messages(mut self, message_types: &[&str]) -> Self {
        for mt in message_types {
            self.worker.messages.insert(mt.to_string(), mt.to_string());
        }
        self
    }

    pub fn build(self) -> WorkerConfig {
        self.worker
    }
}

/// Builder for `RuleConfig`.
pub struct RuleBuilder {
    rule: RuleConfig,
}

impl RuleBuilder {
    pub fn new(worker: &str, message: &str) -> Self {
        Self {
            rule: RuleConfig {
                worker: worker.to_string(),
                message: message.to_string(),
                launch: Vec::new(),
            },
        }
    }

    pub fn launch(mut self, launch: LaunchBuilder) -> Self {
        self.rule.launch.push(launch.build());
        self
    }

    pub fn build(self) -> RuleConfig {
        self.rule
    }
}

/// Builder for one launch template.
pub struct LaunchBuilder {
    launch: LaunchTemplateConfig,
}

impl LaunchBuilder {
    pub fn new(worker: &str) -> Self {
        Self {
            launch: LaunchTemplateConfig {
                worker: worker.to_string(),
                args: Vec::new(),
                run_type: None,
                run_date_offset: 0,
                guard: GuardConfig::Always,
            },
        }
    }

    pub fn args(mut self, args: &[&str]) -> Self {
        self.launch.args = args.iter().map(|s| s.to_string()).collect();
        self
    }

    pub fn run_type(mut self, run_type: &str) -> Self {
        self.launch.run_type = Some(run_type.to_string());
        self
    }

    pub fn run_date_offset(mut self, days: i64) -> Self {
        self.launch.run_date_offset = days;
        self
    }

    pub fn guard(mut self, guard: GuardConfig) -> Self {
        self.launch.guard = guard;
        self
    }

    pub fn build(self) -> LaunchTemplateConfig {
        self.launch
    }
}

/// A small nowcast pipeline:
///
/// ```text
/// download_weather "success 06"  -> make_runoff_file {run_date}
/// make_runoff_file "success"     -> run_nemo {run_type} {run_date}
/// run_nemo "success nowcast"     -> make_plots, run_nemo (forecast)
/// run_nemo "success forecast"    -> make_plots
/// make_plots "success"           -> (nothing)
/// ```
pub fn nowcast_pipeline() -> ConfigBuilder {
    ConfigBuilder::new()
        .with_worker(
            "download_weather",
            WorkerBuilder::new("weather forecast")
                .not_launchable()
                .message("success 06", "06 weather forecast ready")
                .message("failure 06", "06 weather forecast download failed")
                .build(),
        )
        .with_worker(
            "make_runoff_file",
            WorkerBuilder::new("rivers forcing")
                .messages(&["success", "failure"])
                .build(),
        )
        .with_worker(
            "run_nemo",
            WorkerBuilder::new("NEMO run")
                .messages(&["success nowcast", "success forecast", "failure nowcast"])
                .build(),
        )
        .with_worker(
            "make_plots",
            WorkerBuilder::new("plots")
                .messages(&["success", "failure"])
                .build(),
        )
        .with_rule(
            RuleBuilder::new("download_weather", "success 06")
                .launch(LaunchBuilder::new("make_runoff_file").args(&["{run_date}"]))
                .build(),
        )
        .with_rule(
            RuleBuilder::new("make_runoff_file", "success")
                .launch(LaunchBuilder::new("run_nemo").args(&["{run_type}", "{run_date}"]))
                .build(),
        )
        .with_rule(
            RuleBuilder::new("run_nemo", "success nowcast")
                .launch(LaunchBuilder::new("make_plots").args(&["{run_type}", "{run_date}"]))
                .launch(
                    LaunchBuilder::new("run_nemo")
                        .run_type("forecast")
                        .args(&["forecast", "{run_date}"]),
                )
                .build(),
        )
        .with_rule(
            RuleBuilder::new("run_nemo", "success forecast")
                .launch(LaunchBuilder::new("make_plots").args(&["{run_type}", "{run_date}"]))
                .build(),
        )
        .with_rule(RuleBuilder::new("make_plots", "success").build())
}
