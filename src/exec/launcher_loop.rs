// src/exec/launcher_loop.rs

//! Background loop that owns running worker processes.

use std::collections::HashMap;

use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info};

use crate::engine::{LaunchOrder, ManagerEvent};
use crate::exec::process::run_worker;
use crate::types::PairKey;

/// What the launcher loop is asked to do.
#[derive(Debug)]
pub enum LauncherRequest {
    Launch(LaunchOrder),
    /// Kill the process of `launch_id`; ignored if `pair` has moved on to a
    /// newer launch or the process already exited.
    Cancel { pair: PairKey, launch_id: u64 },
}

/// Internal handle for a running worker process.
///
/// - `cancel` asks the process runner to kill the child.
/// - `handle` is the Tokio task that is actually running the command.
struct ActiveWorker {
    launch_id: u64,
    cancel: Option<oneshot::Sender<()>>,
    handle: tokio::task::JoinHandle<()>,
}

/// Spawn the background launcher loop.
///
/// The returned sender is what [`RealLauncher`](super::RealLauncher) feeds.
/// Each order runs in its own Tokio task, and **per `(worker, run)` pair
/// there is never more than one process**: a process the manager gave up on
/// is cancelled, and a relaunch kills whatever is left of the previous one.
pub fn spawn_launcher(events: mpsc::Sender<ManagerEvent>) -> mpsc::Sender<LauncherRequest> {
    let (tx, mut rx) = mpsc::channel::<LauncherRequest>(32);

    tokio::spawn(async move {
        info!("launcher loop started");

        let mut active: HashMap<PairKey, ActiveWorker> = HashMap::new();

        while let Some(request) = rx.recv().await {
            active.retain(|_, w| !w.handle.is_finished());
            match request {
                LauncherRequest::Launch(order) => handle_launch_order(order, &mut active, &events),
                LauncherRequest::Cancel { pair, launch_id } => {
                    handle_cancel(&pair, launch_id, &mut active)
                }
            }
        }

        info!("launcher loop finished (channel closed)");
    });

    tx
}

fn handle_launch_order(
    order: LaunchOrder,
    active: &mut HashMap<PairKey, ActiveWorker>,
    events: &mpsc::Sender<ManagerEvent>,
) {
    let pair = order.pair();

    if let Some(previous) = active.get_mut(&pair) {
        cancel_previous(&pair, order.launch_id, previous);
    }

    let (cancel_tx, cancel_rx) = oneshot::channel::<()>();
    let events = events.clone();
    let launch_id = order.launch_id;
    let spawn_pair = pair.clone();

    let handle = tokio::spawn(async move {
        run_worker(order, events, cancel_rx).await;
        debug!(pair = %spawn_pair, launch_id, "worker runner future finished");
    });

    active.insert(
        pair,
        ActiveWorker {
            launch_id,
            cancel: Some(cancel_tx),
            handle,
        },
    );
}

fn handle_cancel(pair: &PairKey, launch_id: u64, active: &mut HashMap<PairKey, ActiveWorker>) {
    match active.get(pair) {
        Some(worker) if worker.launch_id == launch_id => {
            if let Some(mut worker) = active.remove(pair) {
                info!(pair = %pair, launch_id, "stopping worker process the manager gave up on");
                if let Some(cancel) = worker.cancel.take() {
                    if cancel.send(()).is_err() {
                        debug!(pair = %pair, launch_id, "process already finished while cancelling");
                    }
                }
            }
        }
        Some(worker) => debug!(
            pair = %pair,
            launch_id,
            running_launch_id = worker.launch_id,
            "cancel for an older launch ignored"
        ),
        None => debug!(pair = %pair, launch_id, "cancel for a process that is not running"),
    }
}

fn cancel_previous(pair: &PairKey, launch_id: u64, previous: &mut ActiveWorker) {
    info!(
        pair = %pair,
        previous_launch_id = previous.launch_id,
        launch_id,
        "relaunch while previous process is still running; killing previous process"
    );

    match previous.cancel.take() {
        Some(cancel) => {
            if cancel.send(()).is_err() {
                debug!(pair = %pair, "previous process already finished while cancelling");
            }
        }
        None => {
            debug!(pair = %pair, "previous process was already cancelled");
        }
    }
}
