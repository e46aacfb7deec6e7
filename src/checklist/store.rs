// src/checklist/store.rs

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use anyhow::Context;
use tracing::{debug, info};

use crate::checklist::ChecklistFile;
use crate::errors::{ManagerError, Result};
use crate::fs::FileSystem;

/// Durable home of the [`ChecklistFile`].
///
/// Writes go through [`FileSystem::write_atomic`] (temp file + rename), so a
/// crash mid-write leaves the previous document intact.
///
/// Writes are also ordered: each one carries a [`WriteTicket`] taken when the
/// write was requested, writes never overlap, and a write whose ticket is
/// older than the last one on disk is dropped. A write that outlives its
/// caller's timeout therefore cannot replace a newer document.
#[derive(Debug, Clone)]
pub struct ChecklistStore {
    path: PathBuf,
    fs: Arc<dyn FileSystem>,
    order: Arc<WriteOrder>,
}

/// Position of a write in request order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct WriteTicket(u64);

#[derive(Debug, Default)]
struct WriteOrder {
    issued: AtomicU64,
    /// Ticket of the document currently on disk.
    written: Mutex<u64>,
}

impl ChecklistStore {
    pub fn new(path: impl Into<PathBuf>, fs: Arc<dyn FileSystem>) -> Self {
        Self {
            path: path.into(),
            fs,
            order: Arc::new(WriteOrder::default()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read the persisted document. A missing file is an empty checklist.
    pub fn load(&self) -> Result<ChecklistFile> {
        if !self.fs.exists(&self.path) {
            info!(path = ?self.path, "no checklist file found; starting with empty checklist");
            return Ok(ChecklistFile::default());
        }

        let contents = self.fs.read_to_string(&self.path)?;
        let file: ChecklistFile = serde_json::from_str(&contents).map_err(|e| {
            ManagerError::ConfigError(format!(
                "checklist file {:?} is not valid: {e}",
                self.path
            ))
        })?;

        info!(
            path = ?self.path,
            stages = file.checklist.keys().count(),
            pairs = file.workers.len(),
            "loaded checklist"
        );
        Ok(file)
    }

    /// Reserve the next position in write order. Take it before handing the
    /// write to another thread.
    pub fn ticket(&self) -> WriteTicket {
        WriteTicket(self.order.issued.fetch_add(1, Ordering::SeqCst) + 1)
    }

    /// Durably write `file`.
    pub fn persist(&self, file: &ChecklistFile) -> Result<()> {
        self.persist_in_order(self.ticket(), file)
    }

    /// Durably write `file` unless a later ticket has already been written.
    pub fn persist_in_order(&self, ticket: WriteTicket, file: &ChecklistFile) -> Result<()> {
        let mut written = self.order.written.lock().unwrap_or_else(|e| e.into_inner());
        if ticket.0 < *written {
            debug!(
                path = ?self.path,
                ticket = ticket.0,
                written = *written,
                "newer checklist already on disk; superseded write dropped"
            );
            return Ok(());
        }

        let mut contents = serde_json::to_vec_pretty(file)?;
        contents.push(b'\n');
        self.fs
            .write_atomic(&self.path, &contents)
            .with_context(|| format!("persisting checklist to {:?}", self.path))?;
        *written = ticket.0;
        debug!(path = ?self.path, bytes = contents.len(), "checklist persisted");
        Ok(())
    }
}
