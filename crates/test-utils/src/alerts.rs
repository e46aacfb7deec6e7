use std::fmt;
use std::sync::{Arc, Mutex};

use nowcast_manager::engine::alert::ALERT_TARGET;
use tracing::field::{Field, Visit};
use tracing::subscriber::DefaultGuard;
use tracing::{Event, Subscriber};
use tracing_subscriber::layer::{Context, Layer, SubscriberExt};
use tracing_subscriber::Registry;

/// Alert kinds (`worker_crashed`, `persist_failed`, ...) seen so far.
#[derive(Debug, Clone, Default)]
pub struct AlertLog {
    kinds: Arc<Mutex<Vec<String>>>,
}

impl AlertLog {
    pub fn kinds(&self) -> Vec<String> {
        self.kinds.lock().unwrap().clone()
    }

    pub fn contains(&self, kind: &str) -> bool {
        self.kinds.lock().unwrap().iter().any(|k| k == kind)
    }
}

struct AlertLayer {
    log: AlertLog,
}

impl<S: Subscriber> Layer<S> for AlertLayer {
    fn on_event(&self, event: &Event<'_>, _ctx: Context<'_, S>) {
        if event.metadata().target() != ALERT_TARGET {
            return;
        }
        let mut kind = AlertField(None);
        event.record(&mut kind);
        if let Some(kind) = kind.0 {
            self.log.kinds.lock().unwrap().push(kind);
        }
    }
}

struct AlertField(Option<String>);

impl Visit for AlertField {
    fn record_str(&mut self, field: &Field, value: &str) {
        if field.name() == "alert" {
            self.0 = Some(value.to_string());
        }
    }

    fn record_debug(&mut self, field: &Field, value: &dyn fmt::Debug) {
        if field.name() == "alert" {
            self.0 = Some(format!("{value:?}"));
        }
    }
}

/// Capture alerts raised on the current thread until the guard drops.
///
/// Works with `#[tokio::test]`'s current-thread runtime, where the manager's
/// tasks run on the test thread.
pub fn record_alerts() -> (AlertLog, DefaultGuard) {
    let log = AlertLog::default();
    let subscriber = Registry::default().with(AlertLayer { log: log.clone() });
    let guard = tracing::subscriber::set_default(subscriber);
    (log, guard)
}
