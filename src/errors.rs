// src/errors.rs

//! Crate-wide error types.

use thiserror::Error;

use crate::message::MessageType;
use crate::types::WorkerId;

#[derive(Error, Debug)]
pub enum ManagerError {
    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("TOML parsing error: {0}")]
    TomlError(#[from] toml::de::Error),

    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error(transparent)]
    Registry(#[from] RegistryError),

    #[error(transparent)]
    Resolve(#[from] ResolveError),

    #[error("checklist persist timed out after {0:?}")]
    PersistTimeout(std::time::Duration),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Failures of [`crate::registry::MessageRegistry::validate`].
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RegistryError {
    #[error("unregistered worker: {0}")]
    UnregisteredWorker(WorkerId),

    #[error("message type '{message_type}' is not registered for worker '{worker}'")]
    UnregisteredMessageType {
        worker: WorkerId,
        message_type: MessageType,
    },
}

/// Failures of [`crate::resolver::resolve`].
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ResolveError {
    #[error("no resolution rule for worker '{worker}' message '{message_type}'")]
    NoResolutionRule {
        worker: WorkerId,
        message_type: MessageType,
    },
}

pub use anyhow::Error;
pub type Result<T> = std::result::Result<T, ManagerError>;
