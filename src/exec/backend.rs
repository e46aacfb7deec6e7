// src/exec/backend.rs

//! Pluggable launch backend abstraction.
//!
//! The runtime talks to a `LaunchBackend` instead of spawning processes
//! itself. This makes it easy to swap in a fake launcher in tests while
//! keeping the production launcher in [`launcher_loop`](super::launcher_loop).
//!
//! - `RealLauncher` is the implementation used by `nowcast-manager serve`.
//!   It forwards launch orders over an mpsc channel to the launcher loop.
//! - Tests can provide their own `LaunchBackend` that records orders and
//!   feeds worker messages straight into the broker.

use std::future::Future;
use std::pin::Pin;

use anyhow::anyhow;
use tokio::sync::mpsc;

use crate::engine::{LaunchOrder, ManagerEvent};
use crate::errors::Result;
use crate::types::PairKey;

use super::launcher_loop::{spawn_launcher, LauncherRequest};

/// Trait abstracting how launch orders are carried out.
pub trait LaunchBackend: Send {
    /// Start the worker described by `order`.
    ///
    /// The implementation is free to:
    /// - spawn an OS process (production)
    /// - record the order and simulate the worker (tests)
    ///
    /// Returning `Ok` only means the order was accepted; the outcome arrives
    /// later as a worker message or a `ProcessExited` event.
    fn launch(&mut self, order: LaunchOrder) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>>;

    /// Stop the process started for `launch_id`, if it is still running.
    ///
    /// Called once the manager has given up on that launch. A cancelled
    /// process reports nothing further.
    fn cancel(
        &mut self,
        pair: PairKey,
        launch_id: u64,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>>;
}

/// Real launcher used in production.
pub struct RealLauncher {
    tx: mpsc::Sender<LauncherRequest>,
}

impl RealLauncher {
    /// Create a launcher reporting process exits to `events`.
    ///
    /// This spawns the background launcher loop immediately.
    pub fn new(events: mpsc::Sender<ManagerEvent>) -> Self {
        let tx = spawn_launcher(events);
        Self { tx }
    }
}

impl RealLauncher {
    fn send(&self, request: LauncherRequest) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>> {
        // Clone the sender so the future doesn't borrow `self` across `await`.
        let tx = self.tx.clone();

        Box::pin(async move {
            tx.send(request)
                .await
                .map_err(|e| anyhow!("launcher loop has stopped: {e}"))?;
            Ok(())
        })
    }
}

impl LaunchBackend for RealLauncher {
    fn launch(&mut self, order: LaunchOrder) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>> {
        self.send(LauncherRequest::Launch(order))
    }

    fn cancel(
        &mut self,
        pair: PairKey,
        launch_id: u64,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>> {
        self.send(LauncherRequest::Cancel { pair, launch_id })
    }
}
