// src/broker/mod.rs

//! Message broker: the relay between workers and the manager.
//!
//! - [`relay`] is the in-process at-least-once pub/sub relay.
//! - [`server`] accepts worker reports and operator commands over TCP.
//! - [`client`] is what workers and the CLI use to talk to that server.
//! - [`wire`] defines the line-oriented JSON frames.
//!
//! The broker applies no business logic; validation is the manager's job.

use tokio::sync::mpsc;

use crate::message::{Message, Reply};
use crate::types::{RunType, WorkerId};

pub mod client;
pub mod relay;
pub mod server;
pub mod wire;

pub use client::BrokerClient;
pub use relay::{Relay, Subscription};
pub use server::{forward_deliveries, serve};
pub use wire::{ControlKind, ControlRequest, Frame};

/// Relay-assigned id of one delivery, used to settle it.
pub type DeliveryId = u64;

/// Where replies for a delivery or control command go.
pub type ReplyTo = mpsc::UnboundedSender<Reply>;

/// A message in transit, with the channel its sender waits on.
#[derive(Debug, Clone)]
pub struct Delivery {
    pub id: DeliveryId,
    pub message: Message,
    pub reply_to: Option<ReplyTo>,
}

impl Delivery {
    /// Delivery that is not tracked by any relay and expects no reply.
    pub fn detached(message: Message) -> Self {
        Self {
            id: 0,
            message,
            reply_to: None,
        }
    }
}

/// Subscription filter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Pattern {
    All,
    Worker(WorkerId),
    RunType(RunType),
}

impl Pattern {
    pub fn matches(&self, message: &Message) -> bool {
        match self {
            Pattern::All => true,
            Pattern::Worker(worker) => message.worker == *worker,
            Pattern::RunType(run_type) => message.run_context.run_type == *run_type,
        }
    }
}
