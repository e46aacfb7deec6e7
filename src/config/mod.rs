// src/config/mod.rs

//! Configuration loading and validation for the manager.
//!
//! Responsibilities:
//! - Define the TOML-backed data model (`model.rs`).
//! - Load a config file from disk (`loader.rs`).
//! - Turn the raw model into typed registry and rule tables, rejecting
//!   anything malformed (`validate.rs`).

pub mod loader;
pub mod model;
pub mod validate;

pub use loader::{default_config_path, load_and_validate, load_from_path, load_from_str};
pub use model::{
    ConfigFile, GuardConfig, LaunchTemplateConfig, ManagerSection, ManagerSettings,
    PipelineTables, RawConfigFile, RetrySection, RuleConfig, WorkerConfig,
};
