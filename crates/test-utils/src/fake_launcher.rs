use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex};

use nowcast_manager::broker::Relay;
use nowcast_manager::engine::LaunchOrder;
use nowcast_manager::errors::Result;
use nowcast_manager::exec::LaunchBackend;
use nowcast_manager::message::{Message, MessageType};
use nowcast_manager::types::PairKey;
use serde_json::{json, Map};

/// A fake launcher that:
/// - records every launch order it receives
/// - optionally plays the worker: publishes a configured message for the
///   launched worker straight into the relay, as a real worker would through
///   the broker.
/// - records the launch ids the manager cancels.
#[derive(Clone, Default)]
pub struct FakeLauncher {
    launched: Arc<Mutex<Vec<LaunchOrder>>>,
    cancelled: Arc<Mutex<Vec<u64>>>,
    relay: Option<Relay>,
    replies: HashMap<String, MessageType>,
}

impl FakeLauncher {
    pub fn new(launched: Arc<Mutex<Vec<LaunchOrder>>>) -> Self {
        Self {
            launched,
            cancelled: Arc::default(),
            relay: None,
            replies: HashMap::new(),
        }
    }

    /// Record cancelled launch ids into `cancelled`.
    pub fn recording_cancels(mut self, cancelled: Arc<Mutex<Vec<u64>>>) -> Self {
        self.cancelled = cancelled;
        self
    }

    /// Launched `worker`s report `message_type` through `relay`.
    ///
    /// The launch id goes into the payload so every simulated run has its
    /// own message id.
    pub fn completing(mut self, relay: Relay, worker: &str, message_type: MessageType) -> Self {
        self.relay = Some(relay);
        self.replies.insert(worker.to_string(), message_type);
        self
    }
}

impl LaunchBackend for FakeLauncher {
    fn launch(&mut self, order: LaunchOrder) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>> {
        let launched = Arc::clone(&self.launched);
        let reply = self
            .relay
            .clone()
            .zip(self.replies.get(order.spec.worker.as_str()).cloned());

        Box::pin(async move {
            if let Some((relay, message_type)) = reply {
                let mut payload = Map::new();
                payload.insert("launch_id".to_string(), json!(order.launch_id));
                let message = Message::new(
                    order.spec.worker.clone(),
                    message_type,
                    order.spec.run_context.clone(),
                    payload,
                    None,
                );
                relay.publish(message, None);
            }

            launched.lock().unwrap().push(order);
            Ok(())
        })
    }

    fn cancel(
        &mut self,
        _pair: PairKey,
        launch_id: u64,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>> {
        let cancelled = Arc::clone(&self.cancelled);
        Box::pin(async move {
            cancelled.lock().unwrap().push(launch_id);
            Ok(())
        })
    }
}
