use chrono::{DateTime, NaiveDate, TimeDelta, Utc};
use nowcast_manager::checklist::{Checklist, ChecklistEntry};
use nowcast_manager::message::{Message, MessageType};
use nowcast_manager::types::{ChecklistKey, RunContext, RunType, WorkerId};
use proptest::prelude::*;
use serde_json::Map;

fn report() -> impl Strategy<Value = (RunContext, MessageType)> {
    (
        prop::sample::select(vec!["nowcast", "forecast"]),
        0u64..30,
        prop_oneof![
            Just(MessageType::Success(None)),
            Just(MessageType::Failure(None)),
            Just(MessageType::Crash),
        ],
    )
        .prop_map(|(rt, day, mt)| {
            let date = NaiveDate::from_ymd_opt(2024, 5, 1).unwrap() + chrono::Days::new(day);
            (RunContext::new(rt, date), mt)
        })
}

fn entry(ctx: &RunContext, mt: &MessageType, at: DateTime<Utc>) -> ChecklistEntry {
    let msg = Message::new(WorkerId::new("run_nemo"), mt.clone(), ctx.clone(), Map::new(), None);
    ChecklistEntry::from_message(&msg, at)
}

proptest! {
    /// Applying the same message again never changes the checklist.
    #[test]
    fn apply_is_idempotent(reports in prop::collection::vec(report(), 1..12)) {
        let key = ChecklistKey::from("NEMO run");
        let at = DateTime::<Utc>::UNIX_EPOCH;
        let mut checklist = Checklist::new();
        for (ctx, mt) in &reports {
            checklist = checklist.apply(&key, ctx, entry(ctx, mt, at));
            let again = checklist.apply(&key, ctx, entry(ctx, mt, at + TimeDelta::hours(1)));
            prop_assert_eq!(&again, &checklist);
        }
    }

    /// Each run type's entry is for the newest date reported for it.
    #[test]
    fn entries_hold_the_newest_date(reports in prop::collection::vec(report(), 1..12)) {
        let key = ChecklistKey::from("NEMO run");
        let at = DateTime::<Utc>::UNIX_EPOCH;
        let checklist = reports
            .iter()
            .fold(Checklist::new(), |c, (ctx, mt)| c.apply(&key, ctx, entry(ctx, mt, at)));

        for rt in ["nowcast", "forecast"] {
            let newest = reports
                .iter()
                .filter(|(ctx, _)| ctx.run_type.as_str() == rt)
                .map(|(ctx, _)| ctx.run_date)
                .max();
            let recorded = checklist.entry(&key, &RunType::from(rt)).map(|e| e.run_date);
            prop_assert_eq!(recorded, newest);
        }
    }
}
