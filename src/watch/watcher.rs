// src/watch/watcher.rs

use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use notify::{Config, Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::engine::{ControlCommand, ManagerEvent};

/// Quiet period after the last change before a reload is requested.
pub const DEFAULT_DEBOUNCE: Duration = Duration::from_millis(500);

/// Handle for the config watcher.
///
/// This exists mainly so the underlying `RecommendedWatcher` is kept alive for
/// as long as needed. Dropping this handle will stop watching.
pub struct WatcherHandle {
    _inner: RecommendedWatcher,
}

impl std::fmt::Debug for WatcherHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WatcherHandle").finish()
    }
}

/// Watch `config_path` and send a `reload` control event when its content
/// changes.
///
/// The parent directory is watched rather than the file, because editors
/// and deploy tools usually replace the file instead of writing into it.
/// Bursts of events are collapsed over `debounce`, and a reload is only
/// requested when the file's blake3 hash actually differs from the last one
/// seen.
pub fn spawn_config_watcher(
    config_path: impl Into<PathBuf>,
    events: mpsc::Sender<ManagerEvent>,
    debounce: Duration,
) -> Result<WatcherHandle> {
    let config_path = config_path.into();
    let config_path = config_path.canonicalize().unwrap_or(config_path);
    let file_name = config_path
        .file_name()
        .map(|n| n.to_os_string())
        .ok_or_else(|| anyhow!("config path {:?} has no file name", config_path))?;
    let dir = match config_path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => PathBuf::from("."),
    };

    // Channel from the blocking notify callback into the async world.
    let (notify_tx, mut notify_rx) = mpsc::unbounded_channel::<Event>();

    let mut watcher = RecommendedWatcher::new(
        move |res: notify::Result<Event>| match res {
            Ok(event) => {
                if let Err(err) = notify_tx.send(event) {
                    // Receiver gone; the watcher is being torn down.
                    eprintln!("nowcast-manager: failed to forward notify event: {err}");
                }
            }
            Err(err) => {
                eprintln!("nowcast-manager: config watch error: {err}");
            }
        },
        Config::default(),
    )?;

    watcher
        .watch(&dir, RecursiveMode::NonRecursive)
        .with_context(|| format!("watching {:?}", dir))?;

    info!(path = ?config_path, "config watcher started");

    tokio::spawn(async move {
        let mut last_hash = hash_file(&config_path);

        while let Some(event) = notify_rx.recv().await {
            if !concerns_config(&event, &file_name) {
                continue;
            }
            debug!(?event, "config file event");

            // Swallow the rest of the burst.
            loop {
                match tokio::time::timeout(debounce, notify_rx.recv()).await {
                    Ok(Some(_)) => continue,
                    Ok(None) => return,
                    Err(_quiet) => break,
                }
            }

            let hash = hash_file(&config_path);
            if hash.is_none() {
                warn!(path = ?config_path, "config file unreadable after change; keeping current config");
                continue;
            }
            if hash == last_hash {
                debug!("config file content unchanged; no reload");
                continue;
            }
            last_hash = hash;

            info!(path = ?config_path, "config file changed; requesting reload");
            let event = ManagerEvent::Control {
                command: ControlCommand::Reload,
                reply: None,
            };
            if events.send(event).await.is_err() {
                debug!("manager event channel closed; config watcher stopping");
                return;
            }
        }
        debug!("config watcher loop finished");
    });

    Ok(WatcherHandle { _inner: watcher })
}

fn concerns_config(event: &Event, file_name: &OsString) -> bool {
    let relevant_kind = matches!(
        event.kind,
        EventKind::Create(_) | EventKind::Modify(_) | EventKind::Any
    );
    relevant_kind
        && event
            .paths
            .iter()
            .any(|p| p.file_name() == Some(file_name.as_os_str()))
}

/// blake3 of the file's bytes, or `None` if it cannot be read.
pub fn hash_file(path: &Path) -> Option<blake3::Hash> {
    std::fs::read(path).ok().map(|bytes| blake3::hash(&bytes))
}
