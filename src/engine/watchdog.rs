// src/engine/watchdog.rs

//! Per-pair watchdog timers.
//!
//! At most one timer runs per pair. Arming replaces the previous timer, and
//! an expiry carries the launch id it was armed for, so the core can tell a
//! live expiry from one that lost a race with a terminal message.

use std::collections::HashMap;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::debug;

use crate::engine::ManagerEvent;
use crate::types::PairKey;

#[derive(Debug)]
pub struct Watchdogs {
    events: mpsc::Sender<ManagerEvent>,
    timers: HashMap<PairKey, JoinHandle<()>>,
}

impl Watchdogs {
    pub fn new(events: mpsc::Sender<ManagerEvent>) -> Self {
        Self {
            events,
            timers: HashMap::new(),
        }
    }

    pub fn arm(&mut self, pair: PairKey, launch_id: u64, after: Duration) {
        self.disarm(&pair);

        debug!(pair = %pair, launch_id, after_ms = after.as_millis() as u64, "watchdog armed");

        let events = self.events.clone();
        let expired = pair.clone();
        let handle = tokio::spawn(async move {
            tokio::time::sleep(after).await;
            let _ = events
                .send(ManagerEvent::WatchdogExpired {
                    pair: expired,
                    launch_id,
                })
                .await;
        });
        self.timers.insert(pair, handle);
    }

    pub fn disarm(&mut self, pair: &PairKey) {
        if let Some(handle) = self.timers.remove(pair) {
            handle.abort();
            debug!(pair = %pair, "watchdog disarmed");
        }
    }

    /// Number of timers that have not fired yet.
    pub fn active(&self) -> usize {
        self.timers.values().filter(|h| !h.is_finished()).count()
    }

    pub fn disarm_all(&mut self) {
        for (_, handle) in self.timers.drain() {
            handle.abort();
        }
    }
}

impl Drop for Watchdogs {
    fn drop(&mut self) {
        self.disarm_all();
    }
}
