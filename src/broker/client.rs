// src/broker/client.rs

//! Client side of the broker protocol, for workers and operators.

use std::time::Duration;

use anyhow::{anyhow, Context};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tracing::debug;

use crate::errors::{ManagerError, Result};
use crate::message::{Message, Reply, WireMessage};
use crate::retry::RetryPolicy;

use super::wire::{decode_line, encode_line, ControlRequest, Frame};

/// Sends one frame per connection and waits for the single reply line.
///
/// Transport failures (refused connection, reset, reply timeout) are retried
/// with the configured [`RetryPolicy`], so a worker survives a broker restart.
/// Reports always carry an id, so a retried report is deduplicated by the
/// manager rather than applied twice.
#[derive(Debug, Clone)]
pub struct BrokerClient {
    addr: String,
    retry: RetryPolicy,
    reply_timeout: Duration,
}

impl BrokerClient {
    pub fn new(addr: impl Into<String>) -> Self {
        Self {
            addr: addr.into(),
            retry: RetryPolicy::default(),
            reply_timeout: Duration::from_secs(30),
        }
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_reply_timeout(mut self, timeout: Duration) -> Self {
        self.reply_timeout = timeout;
        self
    }

    /// Report a worker outcome and wait for the manager's ack or error.
    pub async fn report(&self, wire: WireMessage) -> Result<Reply> {
        let message = Message::from_wire(wire).map_err(ManagerError::ConfigError)?;
        self.request(&Frame::Report(message.to_wire())).await
    }

    pub async fn control(&self, request: ControlRequest) -> Result<Reply> {
        self.request(&Frame::Control(request)).await
    }

    pub async fn request(&self, frame: &Frame) -> Result<Reply> {
        let line = encode_line(frame)?;
        let reply = self
            .retry
            .run("broker request", || self.request_once(&line))
            .await?;
        Ok(reply)
    }

    async fn request_once(&self, line: &str) -> anyhow::Result<Reply> {
        let stream = TcpStream::connect(&self.addr)
            .await
            .with_context(|| format!("connecting to broker at {}", self.addr))?;
        let (read_half, mut write_half) = stream.into_split();

        write_half
            .write_all(line.as_bytes())
            .await
            .context("sending frame to broker")?;
        debug!(addr = %self.addr, "frame sent; waiting for reply");

        let mut lines = BufReader::new(read_half).lines();
        let reply_line = tokio::time::timeout(self.reply_timeout, lines.next_line())
            .await
            .map_err(|_| anyhow!("no reply from broker within {:?}", self.reply_timeout))?
            .context("reading reply from broker")?
            .ok_or_else(|| anyhow!("broker closed the connection without replying"))?;

        let reply = decode_line(&reply_line).context("decoding broker reply")?;
        Ok(reply)
    }
}
