// src/config/validate.rs

use std::collections::{BTreeMap, BTreeSet};

use petgraph::algo::toposort;
use petgraph::graphmap::DiGraphMap;
use regex::Regex;
use tracing::warn;

use crate::config::model::{
    ConfigFile, GuardConfig, LaunchTemplateConfig, ManagerSection, ManagerSettings,
    PipelineTables, RawConfigFile, RetrySection, RuleConfig, WorkerConfig,
};
use crate::errors::{ManagerError, Result};
use crate::message::MessageType;
use crate::registry::{MessageRegistry, WorkerEntry};
use crate::resolver::{Guard, LaunchTemplate, RuleTable};
use crate::retry::RetryPolicy;
use crate::types::{parse_duration, ChecklistKey, RunType, WorkerId};

/// Longest run date shift a template may ask for, in days.
const MAX_RUN_DATE_OFFSET: i64 = 366;

const NAME_PATTERN: &str = r"^[A-Za-z0-9][A-Za-z0-9_.\-]*$";

impl TryFrom<RawConfigFile> for ConfigFile {
    type Error = crate::errors::ManagerError;

    fn try_from(raw: RawConfigFile) -> std::result::Result<Self, Self::Error> {
        validate_raw_config(&raw)
    }
}

fn validate_raw_config(cfg: &RawConfigFile) -> Result<ConfigFile> {
    let names = Regex::new(NAME_PATTERN).map_err(|e| ManagerError::Other(e.into()))?;

    ensure_has_workers(cfg)?;
    let manager = parse_manager_section(&cfg.manager)?;
    let run_types = parse_run_types(&cfg.manager.run_types, &names)?;
    let registry = build_registry(&cfg.worker, &names)?;
    let rules = build_rules(&cfg.rule, &registry, &run_types)?;
    validate_launch_cycles(&rules)?;
    warn_missing_rules(&registry, &rules);

    Ok(ConfigFile {
        manager,
        tables: PipelineTables {
            run_types,
            registry,
            rules,
        },
    })
}

fn config_error(msg: impl Into<String>) -> ManagerError {
    ManagerError::ConfigError(msg.into())
}

fn ensure_has_workers(cfg: &RawConfigFile) -> Result<()> {
    if cfg.worker.is_empty() {
        return Err(config_error(
            "config must contain at least one [worker.<name>] section",
        ));
    }
    Ok(())
}

fn duration_field(section: &str, field: &str, value: &str) -> Result<std::time::Duration> {
    parse_duration(value).map_err(|e| config_error(format!("[{section}].{field}: {e}")))
}

fn parse_manager_section(section: &ManagerSection) -> Result<ManagerSettings> {
    if section.listen.trim().is_empty() {
        return Err(config_error("[manager].listen must not be empty"));
    }
    if section.checklist_file.as_os_str().is_empty() {
        return Err(config_error("[manager].checklist_file must not be empty"));
    }

    let watchdog_timeout = duration_field("manager", "watchdog_timeout", &section.watchdog_timeout)?;
    if watchdog_timeout.is_zero() {
        return Err(config_error("[manager].watchdog_timeout must be > 0"));
    }

    Ok(ManagerSettings {
        checklist_file: section.checklist_file.clone(),
        listen: section.listen.clone(),
        watchdog_timeout,
        crash_grace: duration_field("manager", "crash_grace", &section.crash_grace)?,
        persist_timeout: duration_field("manager", "persist_timeout", &section.persist_timeout)?,
        requeue_delay: duration_field("manager", "requeue_delay", &section.requeue_delay)?,
        watch_config: section.watch_config,
        pair_retention_days: section.pair_retention_days,
        retry: parse_retry_section(&section.retry)?,
    })
}

fn parse_retry_section(section: &RetrySection) -> Result<RetryPolicy> {
    if section.max_attempts == 0 {
        return Err(config_error(
            "[manager.retry].max_attempts must be >= 1 (got 0)",
        ));
    }
    if !(0.0..=1.0).contains(&section.jitter) {
        return Err(config_error(format!(
            "[manager.retry].jitter must be within 0.0..=1.0 (got {})",
            section.jitter
        )));
    }

    let base = duration_field("manager.retry", "base", &section.base)?;
    let cap = duration_field("manager.retry", "cap", &section.cap)?;
    if cap < base {
        return Err(config_error("[manager.retry].cap must be >= base"));
    }

    Ok(RetryPolicy {
        max_attempts: section.max_attempts,
        base,
        cap,
        jitter: section.jitter,
    })
}

fn parse_run_types(run_types: &[String], names: &Regex) -> Result<BTreeSet<RunType>> {
    if run_types.is_empty() {
        return Err(config_error("[manager].run_types must not be empty"));
    }

    let mut parsed = BTreeSet::new();
    for name in run_types {
        if !names.is_match(name) {
            return Err(config_error(format!("invalid run type name '{name}'")));
        }
        if !parsed.insert(RunType::new(name.clone())) {
            return Err(config_error(format!(
                "run type '{name}' is listed more than once in [manager].run_types"
            )));
        }
    }
    Ok(parsed)
}

fn build_registry(
    workers: &BTreeMap<String, WorkerConfig>,
    names: &Regex,
) -> Result<MessageRegistry> {
    let mut entries = BTreeMap::new();

    for (name, worker) in workers.iter() {
        if !names.is_match(name) {
            return Err(config_error(format!("invalid worker name '{name}'")));
        }
        if worker.checklist_key.trim().is_empty() {
            return Err(config_error(format!(
                "worker '{name}' has an empty checklist_key"
            )));
        }

        let mut messages = BTreeMap::new();
        for (raw_type, description) in worker.messages.iter() {
            let message_type: MessageType = raw_type
                .parse()
                .map_err(|e| config_error(format!("worker '{name}': {e}")))?;
            if message_type == MessageType::Ack {
                return Err(config_error(format!(
                    "worker '{name}' cannot register 'ack'; it is sent by the manager"
                )));
            }
            if messages
                .insert(message_type.clone(), description.clone())
                .is_some()
            {
                return Err(config_error(format!(
                    "worker '{name}' registers message type '{message_type}' more than once"
                )));
            }
        }

        let timeout = match worker.timeout.as_deref() {
            Some(t) => {
                let timeout = parse_duration(t)
                    .map_err(|e| config_error(format!("worker '{name}' timeout: {e}")))?;
                if timeout.is_zero() {
                    return Err(config_error(format!("worker '{name}' timeout must be > 0")));
                }
                Some(timeout)
            }
            None => None,
        };

        entries.insert(
            WorkerId::new(name.clone()),
            WorkerEntry::new(
                ChecklistKey::new(worker.checklist_key.clone()),
                messages,
                worker.command.clone(),
                timeout,
            ),
        );
    }

    Ok(MessageRegistry::new(entries))
}

fn build_rules(
    rules: &[RuleConfig],
    registry: &MessageRegistry,
    run_types: &BTreeSet<RunType>,
) -> Result<RuleTable> {
    let known_keys: BTreeSet<ChecklistKey> =
        registry.checklist_keys().into_iter().cloned().collect();
    let mut table = BTreeMap::new();

    for rule in rules {
        let worker = WorkerId::new(rule.worker.clone());
        let message_type: MessageType = rule
            .message
            .parse()
            .map_err(|e| config_error(format!("rule for worker '{worker}': {e}")))?;

        registry.validate(&worker, &message_type).map_err(|e| {
            config_error(format!("rule trigger ({worker}, {message_type}) is not registered: {e}"))
        })?;

        if !message_type.is_success() {
            return Err(config_error(format!(
                "rule ({worker}, {message_type}): only success message types may trigger launches"
            )));
        }

        let templates = rule
            .launch
            .iter()
            .map(|t| build_template(t, &worker, &message_type, registry, run_types, &known_keys))
            .collect::<Result<Vec<_>>>()?;

        if table
            .insert((worker.clone(), message_type.clone()), templates)
            .is_some()
        {
            return Err(config_error(format!(
                "duplicate rule for ({worker}, {message_type})"
            )));
        }
    }

    let table = RuleTable::new(table).map_err(|e| ManagerError::Other(e.into()))?;

    for ((worker, message_type), templates) in table.iter() {
        for template in templates {
            for arg in template.args.iter() {
                let unknown = table.unknown_placeholders(arg);
                if !unknown.is_empty() {
                    return Err(config_error(format!(
                        "rule ({worker}, {message_type}) launching '{}': unknown placeholder(s) {:?} in argument '{arg}'",
                        template.worker, unknown
                    )));
                }
            }
        }
    }

    Ok(table)
}

fn build_template(
    cfg: &LaunchTemplateConfig,
    trigger: &WorkerId,
    message_type: &MessageType,
    registry: &MessageRegistry,
    run_types: &BTreeSet<RunType>,
    known_keys: &BTreeSet<ChecklistKey>,
) -> Result<LaunchTemplate> {
    let context = format!("rule ({trigger}, {message_type})");
    let worker = WorkerId::new(cfg.worker.clone());

    match registry.entry(&worker) {
        None => {
            return Err(config_error(format!(
                "{context} launches unregistered worker '{worker}'"
            )));
        }
        Some(entry) if !entry.is_launchable() => {
            return Err(config_error(format!(
                "{context} launches worker '{worker}', which has no command"
            )));
        }
        Some(_) => {}
    }

    let run_type = match cfg.run_type.as_deref() {
        Some(rt) => Some(known_run_type(rt, run_types, &context)?),
        None => None,
    };

    if cfg.run_date_offset.abs() > MAX_RUN_DATE_OFFSET {
        return Err(config_error(format!(
            "{context} launching '{worker}': run_date_offset must be within ±{MAX_RUN_DATE_OFFSET} days"
        )));
    }

    Ok(LaunchTemplate {
        worker,
        args: cfg.args.clone(),
        run_type,
        run_date_offset: cfg.run_date_offset,
        guard: build_guard(&cfg.guard, run_types, known_keys, &context)?,
    })
}

fn known_run_type(name: &str, run_types: &BTreeSet<RunType>, context: &str) -> Result<RunType> {
    let run_type = RunType::new(name);
    if !run_types.contains(&run_type) {
        return Err(config_error(format!(
            "{context}: run type '{name}' is not listed in [manager].run_types"
        )));
    }
    Ok(run_type)
}

fn known_key(key: &str, known_keys: &BTreeSet<ChecklistKey>, context: &str) -> Result<ChecklistKey> {
    let key = ChecklistKey::new(key);
    if !known_keys.contains(&key) {
        return Err(config_error(format!(
            "{context}: guard refers to unknown checklist key '{key}'"
        )));
    }
    Ok(key)
}

fn build_guard(
    cfg: &GuardConfig,
    run_types: &BTreeSet<RunType>,
    known_keys: &BTreeSet<ChecklistKey>,
    context: &str,
) -> Result<Guard> {
    let optional_run_type = |rt: &Option<String>| -> Result<Option<RunType>> {
        rt.as_deref()
            .map(|name| known_run_type(name, run_types, context))
            .transpose()
    };

    Ok(match cfg {
        GuardConfig::Always => Guard::Always,
        GuardConfig::ChecklistHas {
            key,
            run_type,
            any_date,
        } => Guard::ChecklistHas {
            key: known_key(key, known_keys, context)?,
            run_type: optional_run_type(run_type)?,
            any_date: *any_date,
        },
        GuardConfig::ChecklistMissing {
            key,
            run_type,
            any_date,
        } => Guard::ChecklistMissing {
            key: known_key(key, known_keys, context)?,
            run_type: optional_run_type(run_type)?,
            any_date: *any_date,
        },
        GuardConfig::RunTypeIs { run_types: names } => {
            if names.is_empty() {
                return Err(config_error(format!(
                    "{context}: run_type_is guard needs at least one run type"
                )));
            }
            Guard::RunTypeIs(
                names
                    .iter()
                    .map(|name| known_run_type(name, run_types, context))
                    .collect::<Result<_>>()?,
            )
        }
        GuardConfig::PayloadEquals { field, value } => {
            if field.trim().is_empty() {
                return Err(config_error(format!(
                    "{context}: payload_equals guard needs a field"
                )));
            }
            Guard::PayloadEquals {
                field: field.clone(),
                value: value.clone(),
            }
        }
        GuardConfig::All { guards } => Guard::All(
            guards
                .iter()
                .map(|g| build_guard(g, run_types, known_keys, context))
                .collect::<Result<_>>()?,
        ),
    })
}

/// Reject cycles made only of unconditional, same-run launches.
///
/// Edge direction: trigger worker -> launched worker. Such a cycle would have
/// every completion relaunch the chain for the same run context forever.
fn validate_launch_cycles(rules: &RuleTable) -> Result<()> {
    let mut graph: DiGraphMap<&str, ()> = DiGraphMap::new();

    for ((trigger, _), templates) in rules.iter() {
        graph.add_node(trigger.as_str());
        for template in templates.iter().filter(|t| t.is_unconditional_same_run()) {
            graph.add_edge(trigger.as_str(), template.worker.as_str(), ());
        }
    }

    match toposort(&graph, None) {
        Ok(_order) => Ok(()),
        Err(cycle) => Err(config_error(format!(
            "unconditional launch cycle detected involving worker '{}'",
            cycle.node_id()
        ))),
    }
}

/// Success types without a rule are legal config but cannot move the
/// pipeline forward; they surface as `NoResolutionRule` at runtime.
fn warn_missing_rules(registry: &MessageRegistry, rules: &RuleTable) {
    for (worker, message_type) in registry.registered_pairs() {
        if message_type.is_success() && !rules.contains(worker, message_type) {
            warn!(
                worker = %worker,
                message_type = %message_type,
                "registered success message has no resolution rule"
            );
        }
    }
}
