// src/broker/relay.rs

//! In-process at-least-once relay.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard};

use tokio::sync::mpsc;
use tracing::{debug, trace};

use crate::message::Message;

use super::{Delivery, DeliveryId, Pattern, ReplyTo};

/// Pub/sub relay between the TCP front end and the manager.
///
/// - Every published message is retained until it is settled.
/// - A new subscriber first receives every unsettled message matching its
///   pattern, in publish order, then live traffic.
/// - With no subscriber, messages simply accumulate.
///
/// Publishing and subscribing happen under one lock, so a single source's
/// messages reach every subscriber in the order they were published.
#[derive(Debug, Clone, Default)]
pub struct Relay {
    inner: Arc<Mutex<RelayInner>>,
}

#[derive(Debug, Default)]
struct RelayInner {
    next_id: DeliveryId,
    unsettled: BTreeMap<DeliveryId, Delivery>,
    subscribers: Vec<(Pattern, mpsc::UnboundedSender<Delivery>)>,
}

/// Stream of deliveries for one subscriber.
#[derive(Debug)]
pub struct Subscription {
    pattern: Pattern,
    rx: mpsc::UnboundedReceiver<Delivery>,
}

impl Subscription {
    pub fn pattern(&self) -> &Pattern {
        &self.pattern
    }

    /// Next delivery; `None` once the relay has been dropped.
    pub async fn recv(&mut self) -> Option<Delivery> {
        self.rx.recv().await
    }
}

impl Relay {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, RelayInner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Accept `message` for delivery. Replies go to `reply_to`, if given.
    pub fn publish(&self, message: Message, reply_to: Option<ReplyTo>) -> DeliveryId {
        let mut inner = self.lock();
        inner.next_id += 1;
        let id = inner.next_id;

        let delivery = Delivery {
            id,
            message,
            reply_to,
        };

        inner
            .subscribers
            .retain(|(pattern, tx)| !pattern.matches(&delivery.message) || tx.send(delivery.clone()).is_ok());

        debug!(
            delivery_id = id,
            worker = %delivery.message.worker,
            message_type = %delivery.message.message_type,
            subscribers = inner.subscribers.len(),
            "message published"
        );

        inner.unsettled.insert(id, delivery);
        id
    }

    pub fn subscribe(&self, pattern: Pattern) -> Subscription {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut inner = self.lock();

        let mut replayed = 0usize;
        for delivery in inner.unsettled.values() {
            if pattern.matches(&delivery.message) && tx.send(delivery.clone()).is_ok() {
                replayed += 1;
            }
        }
        if replayed > 0 {
            debug!(?pattern, replayed, "redelivering unsettled messages to new subscriber");
        }

        inner.subscribers.push((pattern.clone(), tx));
        Subscription { pattern, rx }
    }

    /// Mark a delivery as handled. Returns `false` if it was unknown or
    /// already settled.
    pub fn settle(&self, id: DeliveryId) -> bool {
        let settled = self.lock().unsettled.remove(&id).is_some();
        trace!(delivery_id = id, settled, "settle");
        settled
    }

    pub fn unsettled_len(&self) -> usize {
        self.lock().unsettled.len()
    }

    pub fn subscriber_count(&self) -> usize {
        let mut inner = self.lock();
        inner.subscribers.retain(|(_, tx)| !tx.is_closed());
        inner.subscribers.len()
    }
}
