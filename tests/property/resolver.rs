use nowcast_manager::checklist::{Checklist, ChecklistEntry};
use nowcast_manager::config::PipelineTables;
use nowcast_manager::message::{Message, MessageType};
use nowcast_manager::resolver::resolve;
use nowcast_manager::types::{ChecklistKey, RunContext, RunType, WorkerId};
use nowcast_manager_test_utils::builders::nowcast_pipeline;
use proptest::prelude::*;
use serde_json::{json, Map, Value};

const WORKERS: &[&str] = &["download_weather", "make_runoff_file", "run_nemo", "make_plots", "unknown"];
const RUN_TYPES: &[&str] = &["nowcast", "nowcast-green", "forecast", "forecast2"];
const KEYS: &[&str] = &["weather forecast", "rivers forcing", "NEMO run", "plots"];

fn message_type() -> impl Strategy<Value = MessageType> {
    prop_oneof![
        Just(MessageType::Success(None)),
        Just(MessageType::Failure(None)),
        Just(MessageType::Crash),
        Just(MessageType::Ack),
        prop::sample::select(vec!["06", "12", "18", "nowcast", "forecast"]).prop_map(MessageType::success),
        prop::sample::select(vec!["06", "nowcast"]).prop_map(MessageType::failure),
    ]
}

fn run_context() -> impl Strategy<Value = RunContext> {
    (prop::sample::select(RUN_TYPES), 0u32..3650).prop_map(|(rt, days)| {
        let date = chrono::NaiveDate::from_ymd_opt(2015, 1, 1).unwrap() + chrono::Days::new(days.into());
        RunContext::new(rt, date)
    })
}

fn payload() -> impl Strategy<Value = Map<String, Value>> {
    prop::collection::btree_map("[a-z_]{1,8}", "[ -~]{0,12}", 0..4).prop_map(|m| {
        m.into_iter().map(|(k, v)| (k, json!(v))).collect()
    })
}

fn checklist() -> impl Strategy<Value = Checklist> {
    prop::collection::vec(
        (prop::sample::select(KEYS), run_context(), message_type()),
        0..8,
    )
    .prop_map(|entries| {
        let at = chrono::DateTime::<chrono::Utc>::UNIX_EPOCH;
        entries
            .into_iter()
            .filter(|(_, _, mt)| mt.outcome().is_some())
            .fold(Checklist::new(), |c, (key, ctx, mt)| {
                let msg = Message::new(WorkerId::new("w"), mt, ctx.clone(), Map::new(), None);
                c.apply(&ChecklistKey::from(key), &ctx, ChecklistEntry::from_message(&msg, at))
            })
    })
}

fn tables() -> PipelineTables {
    (*nowcast_pipeline().tables()).clone()
}

proptest! {
    /// Resolution is total and deterministic: any input gives a value, and
    /// the same input always gives the same value.
    #[test]
    fn resolve_is_total_and_deterministic(
        worker in prop::sample::select(WORKERS),
        mt in message_type(),
        ctx in run_context(),
        checklist in checklist(),
        payload in payload(),
    ) {
        let tables = tables();
        let worker = WorkerId::new(worker);
        let first = resolve(&tables.rules, &worker, &mt, &ctx, &checklist, &payload);
        let second = resolve(&tables.rules, &worker, &mt, &ctx, &checklist, &payload);
        prop_assert_eq!(first, second);
    }

    /// Only success moves the pipeline forward.
    #[test]
    fn non_success_never_launches(
        worker in prop::sample::select(WORKERS),
        mt in message_type().prop_filter("non-success", |mt| !mt.is_success()),
        ctx in run_context(),
        checklist in checklist(),
    ) {
        let tables = tables();
        let specs = resolve(&tables.rules, &WorkerId::new(worker), &mt, &ctx, &checklist, &Map::new());
        prop_assert_eq!(specs, Ok(Vec::new()));
    }

    /// Launches stay on registered, launchable workers and keep the trigger's
    /// run date (the pipeline fixture uses no date offsets).
    #[test]
    fn launches_target_launchable_workers(
        worker in prop::sample::select(WORKERS),
        mt in message_type(),
        ctx in run_context(),
        checklist in checklist(),
    ) {
        let tables = tables();
        if let Ok(specs) = resolve(&tables.rules, &WorkerId::new(worker), &mt, &ctx, &checklist, &Map::new()) {
            for spec in specs {
                let entry = tables.registry.entry(&spec.worker);
                prop_assert!(entry.is_some_and(|e| e.is_launchable()));
                prop_assert_eq!(spec.run_context.run_date, ctx.run_date);
                prop_assert!(tables.run_types.contains(&spec.run_context.run_type)
                    || spec.run_context.run_type == ctx.run_type);
            }
        }
    }
}

#[test]
fn fixture_run_types_are_declared() {
    let tables = tables();
    for rt in RUN_TYPES {
        assert!(tables.run_types.contains(&RunType::from(*rt)));
    }
}
