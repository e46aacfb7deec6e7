#![allow(dead_code)]

pub mod harness;

use std::time::Duration;

use chrono::{DateTime, TimeZone, Utc};
use nowcast_manager::engine::{CoreOptions, CoreStep, ManagerCore, ManagerEvent};
use nowcast_manager::checklist::ChecklistFile;
use nowcast_manager_test_utils::builders::ConfigBuilder;

pub use nowcast_manager_test_utils::init_tracing;

/// Fixed wall clock for core tests.
pub fn now() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap()
}

pub fn options() -> CoreOptions {
    CoreOptions {
        watchdog_timeout: Duration::from_secs(3600),
        crash_grace: Duration::from_secs(30),
        pair_retention_days: 7,
    }
}

/// A core over `config` with an empty checklist.
pub fn core(config: ConfigBuilder) -> ManagerCore {
    ManagerCore::new(config.tables(), ChecklistFile::default(), options())
}

/// Step the core and commit whatever it decided, as the runtime would after a
/// successful persist.
pub fn apply(core: &mut ManagerCore, event: ManagerEvent, at: DateTime<Utc>) -> CoreStep {
    let step = core.step(event, at);
    if let Some(next) = step.next.clone() {
        core.commit(next);
    }
    step
}
