// src/broker/server.rs

//! TCP front end of the broker.

use anyhow::Context;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::engine::{ControlCommand, ManagerEvent};
use crate::errors::Result;
use crate::message::{Message, Reply};

use super::wire::{encode_line, Frame};
use super::{Relay, ReplyTo, Subscription};

/// Accept connections until the listener fails.
///
/// Reports are published to `relay`; control frames go straight to the
/// manager through `events`. Each connection gets its replies on the same
/// socket, one JSON line per request.
pub async fn serve(
    listener: TcpListener,
    relay: Relay,
    events: mpsc::Sender<ManagerEvent>,
) -> Result<()> {
    let addr = listener.local_addr()?;
    info!(%addr, "broker listening");

    loop {
        let (stream, peer) = listener.accept().await?;
        debug!(%peer, "broker connection accepted");

        let relay = relay.clone();
        let events = events.clone();
        tokio::spawn(async move {
            if let Err(err) = handle_connection(stream, relay, events).await {
                warn!(%peer, error = %err, "broker connection ended with error");
            }
        });
    }
}

async fn handle_connection(
    stream: TcpStream,
    relay: Relay,
    events: mpsc::Sender<ManagerEvent>,
) -> anyhow::Result<()> {
    let (read_half, mut write_half) = stream.into_split();
    let (reply_tx, mut reply_rx) = mpsc::unbounded_channel::<Reply>();

    // Replies may arrive in any order relative to reads; a dedicated writer
    // keeps the socket single-writer. It ends when every reply sender is gone.
    tokio::spawn(async move {
        while let Some(reply) = reply_rx.recv().await {
            let line = match encode_line(&reply) {
                Ok(line) => line,
                Err(err) => {
                    warn!(error = %err, "could not encode reply");
                    continue;
                }
            };
            if write_half.write_all(line.as_bytes()).await.is_err() {
                debug!("peer closed before reply was written");
                break;
            }
        }
    });

    let mut lines = BufReader::new(read_half).lines();
    while let Some(line) = lines
        .next_line()
        .await
        .context("reading frame from broker connection")?
    {
        if line.trim().is_empty() {
            continue;
        }
        handle_frame(&line, &relay, &events, &reply_tx).await;
    }

    Ok(())
}

async fn handle_frame(
    line: &str,
    relay: &Relay,
    events: &mpsc::Sender<ManagerEvent>,
    reply_tx: &ReplyTo,
) {
    let frame: Frame = match serde_json::from_str(line) {
        Ok(frame) => frame,
        Err(err) => {
            reject(reply_tx, format!("malformed frame: {err}"));
            return;
        }
    };

    match frame {
        Frame::Report(wire) => match Message::from_wire(wire) {
            Ok(message) => {
                relay.publish(message, Some(reply_tx.clone()));
            }
            Err(reason) => reject(reply_tx, reason),
        },
        Frame::Control(request) => match ControlCommand::try_from(request) {
            Ok(command) => {
                let event = ManagerEvent::Control {
                    command,
                    reply: Some(reply_tx.clone()),
                };
                if events.send(event).await.is_err() {
                    reject(reply_tx, "manager is not running".to_string());
                }
            }
            Err(reason) => reject(reply_tx, reason),
        },
    }
}

fn reject(reply_tx: &ReplyTo, reason: String) {
    debug!(reason = %reason, "frame rejected by broker");
    let _ = reply_tx.send(Reply::Error {
        in_reply_to: None,
        reason,
    });
}

/// Move deliveries from the relay into the manager's event channel.
///
/// Runs until either side goes away. Deliveries stay unsettled in the relay
/// until the manager has handled them, so nothing is lost if this stops.
pub async fn forward_deliveries(mut subscription: Subscription, events: mpsc::Sender<ManagerEvent>) {
    while let Some(delivery) = subscription.recv().await {
        let id = delivery.id;
        if events.send(ManagerEvent::Delivered(delivery)).await.is_err() {
            debug!(delivery_id = id, "manager event channel closed; delivery forwarder stopping");
            return;
        }
    }
}
