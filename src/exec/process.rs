// src/exec/process.rs

//! Runs one worker process.

use std::process::Stdio;

use anyhow::{anyhow, Context, Result};
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::Command;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error, info, warn};

use crate::engine::{LaunchOrder, ManagerEvent};

/// Environment variables every launched worker receives.
pub const ENV_WORKER: &str = "NOWCAST_WORKER";
pub const ENV_RUN_TYPE: &str = "NOWCAST_RUN_TYPE";
pub const ENV_RUN_DATE: &str = "NOWCAST_RUN_DATE";
pub const ENV_LAUNCH_ID: &str = "NOWCAST_LAUNCH_ID";

/// Run a worker process and report its exit as `ProcessExited`.
///
/// - A process that cannot be started is reported as an exit with no code;
///   the manager then infers a crash after its grace period.
/// - If the cancel channel fires, the child is killed and **no** event is
///   sent: the launch it belonged to has already been closed.
pub async fn run_worker(
    order: LaunchOrder,
    events: mpsc::Sender<ManagerEvent>,
    cancel_rx: oneshot::Receiver<()>,
) {
    let pair = order.pair();
    let launch_id = order.launch_id;

    if let Err(err) = run_worker_inner(&order, &events, cancel_rx).await {
        error!(
            pair = %pair,
            launch_id,
            error = %err,
            "worker process error"
        );
        let _ = events
            .send(ManagerEvent::ProcessExited {
                pair,
                launch_id,
                exit_code: None,
            })
            .await;
    }
}

/// The argv for `order`: configured command followed by resolved args.
pub fn build_command(order: &LaunchOrder) -> Result<Command> {
    let (program, leading) = order
        .command
        .split_first()
        .ok_or_else(|| anyhow!("worker '{}' has an empty command", order.spec.worker))?;

    let run_context = &order.spec.run_context;
    let mut cmd = Command::new(program);
    cmd.args(leading)
        .args(&order.spec.args)
        .env(ENV_WORKER, order.spec.worker.as_str())
        .env(ENV_RUN_TYPE, run_context.run_type.as_str())
        .env(ENV_RUN_DATE, run_context.run_date_string())
        .env(ENV_LAUNCH_ID, order.launch_id.to_string())
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);
    Ok(cmd)
}

async fn run_worker_inner(
    order: &LaunchOrder,
    events: &mpsc::Sender<ManagerEvent>,
    mut cancel_rx: oneshot::Receiver<()>,
) -> Result<()> {
    let pair = order.pair();
    let launch_id = order.launch_id;

    info!(
        pair = %pair,
        launch_id,
        command = ?order.command,
        args = ?order.spec.args,
        "starting worker process"
    );

    let mut child = build_command(order)?
        .spawn()
        .with_context(|| format!("spawning process for worker '{}'", order.spec.worker))?;

    // Always consume output so pipe buffers don't fill; log at debug.
    if let Some(stdout) = child.stdout.take() {
        forward_lines(stdout, pair.to_string(), "stdout");
    }
    if let Some(stderr) = child.stderr.take() {
        forward_lines(stderr, pair.to_string(), "stderr");
    }

    tokio::select! {
        status_res = child.wait() => {
            let status = status_res
                .with_context(|| format!("waiting for process of worker '{}'", order.spec.worker))?;
            let exit_code = status.code();

            info!(
                pair = %pair,
                launch_id,
                ?exit_code,
                success = status.success(),
                "worker process exited"
            );

            events
                .send(ManagerEvent::ProcessExited { pair, launch_id, exit_code })
                .await
                .context("sending ProcessExited event to the manager")?;
        }

        cancel = &mut cancel_rx => {
            match cancel {
                Ok(()) => {
                    info!(pair = %pair, launch_id, "killing cancelled worker process");
                    if let Err(e) = child.kill().await {
                        warn!(pair = %pair, launch_id, error = %e, "failed to kill worker process");
                    }
                }
                Err(e) => {
                    debug!(
                        pair = %pair,
                        launch_id,
                        error = %e,
                        "cancel channel closed without explicit cancellation"
                    );
                    // Child will be killed on drop due to kill_on_drop(true).
                }
            }
        }
    }

    Ok(())
}

fn forward_lines<R>(reader: R, pair: String, stream: &'static str)
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut lines = BufReader::new(reader).lines();
        while let Ok(Some(line)) = lines.next_line().await {
            debug!(pair = %pair, stream, "{}", line);
        }
    });
}
