// src/registry/mod.rs

//! Message Registry: which worker may send which message types, and which
//! checklist key each worker owns.
//!
//! Read-only after construction. Reload builds a new registry and the manager
//! swaps it in whole.

use std::collections::{BTreeMap, BTreeSet};
use std::time::Duration;

use crate::errors::RegistryError;
use crate::message::MessageType;
use crate::types::{ChecklistKey, WorkerId};

/// Registry entry for one worker kind.
#[derive(Debug, Clone, PartialEq)]
pub struct WorkerEntry {
    pub checklist_key: ChecklistKey,
    /// Legal message types and their descriptions. Always contains `Crash`.
    messages: BTreeMap<MessageType, String>,
    /// Program + leading args; empty means "not launchable by the manager".
    pub command: Vec<String>,
    pub timeout: Option<Duration>,
}

impl WorkerEntry {
    pub fn new(
        checklist_key: ChecklistKey,
        messages: BTreeMap<MessageType, String>,
        command: Vec<String>,
        timeout: Option<Duration>,
    ) -> Self {
        let mut messages = messages;
        messages
            .entry(MessageType::Crash)
            .or_insert_with(|| "worker crashed".to_string());
        Self {
            checklist_key,
            messages,
            command,
            timeout,
        }
    }

    pub fn message_types(&self) -> impl Iterator<Item = &MessageType> {
        self.messages.keys()
    }

    pub fn describe(&self, message_type: &MessageType) -> Option<&str> {
        self.messages.get(message_type).map(String::as_str)
    }

    pub fn is_launchable(&self) -> bool {
        !self.command.is_empty()
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct MessageRegistry {
    workers: BTreeMap<WorkerId, WorkerEntry>,
}

impl MessageRegistry {
    pub fn new(workers: BTreeMap<WorkerId, WorkerEntry>) -> Self {
        Self { workers }
    }

    /// Check that `worker` may send `message_type` and return the checklist
    /// key the message is recorded under.
    pub fn validate(
        &self,
        worker: &WorkerId,
        message_type: &MessageType,
    ) -> Result<&ChecklistKey, RegistryError> {
        let entry = self
            .workers
            .get(worker)
            .ok_or_else(|| RegistryError::UnregisteredWorker(worker.clone()))?;

        if !entry.messages.contains_key(message_type) {
            return Err(RegistryError::UnregisteredMessageType {
                worker: worker.clone(),
                message_type: message_type.clone(),
            });
        }

        Ok(&entry.checklist_key)
    }

    pub fn entry(&self, worker: &WorkerId) -> Option<&WorkerEntry> {
        self.workers.get(worker)
    }

    pub fn contains(&self, worker: &WorkerId) -> bool {
        self.workers.contains_key(worker)
    }

    pub fn workers(&self) -> impl Iterator<Item = (&WorkerId, &WorkerEntry)> {
        self.workers.iter()
    }

    /// Every registered `(worker, message_type)` pair.
    pub fn registered_pairs(&self) -> impl Iterator<Item = (&WorkerId, &MessageType)> {
        self.workers
            .iter()
            .flat_map(|(id, entry)| entry.message_types().map(move |mt| (id, mt)))
    }

    pub fn checklist_keys(&self) -> BTreeSet<&ChecklistKey> {
        self.workers.values().map(|e| &e.checklist_key).collect()
    }

    pub fn len(&self) -> usize {
        self.workers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.workers.is_empty()
    }
}
