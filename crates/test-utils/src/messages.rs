#![allow(dead_code)]

use chrono::NaiveDate;
use nowcast_manager::broker::Delivery;
use nowcast_manager::engine::ManagerEvent;
use nowcast_manager::message::{Message, MessageType, WireMessage};
use nowcast_manager::types::{PairKey, RunContext, WorkerId};
use serde_json::{Map, Value};

/// `YYYY-MM-DD` -> `NaiveDate`; panics on bad input.
pub fn date(s: &str) -> NaiveDate {
    NaiveDate::parse_from_str(s, "%Y-%m-%d").expect("valid test date")
}

pub fn run(run_type: &str, run_date: &str) -> RunContext {
    RunContext::new(run_type, date(run_date))
}

pub fn pair(worker: &str, run_type: &str, run_date: &str) -> PairKey {
    PairKey::new(WorkerId::new(worker), run(run_type, run_date))
}

/// A worker message with an empty payload and a content-derived id.
pub fn message(worker: &str, message_type: &str, run_type: &str, run_date: &str) -> Message {
    message_with_payload(worker, message_type, run_type, run_date, Map::new())
}

pub fn message_with_payload(
    worker: &str,
    message_type: &str,
    run_type: &str,
    run_date: &str,
    payload: Map<String, Value>,
) -> Message {
    let message_type: MessageType = message_type.parse().expect("valid test message type");
    Message::new(
        WorkerId::new(worker),
        message_type,
        run(run_type, run_date),
        payload,
        None,
    )
}

pub fn message_with_id(
    worker: &str,
    message_type: &str,
    run_type: &str,
    run_date: &str,
    id: &str,
) -> Message {
    let message_type: MessageType = message_type.parse().expect("valid test message type");
    Message::new(
        WorkerId::new(worker),
        message_type,
        run(run_type, run_date),
        Map::new(),
        Some(id.to_string()),
    )
}

pub fn wire(worker: &str, message_type: &str, run_type: &str, run_date: &str) -> WireMessage {
    WireMessage {
        worker: worker.to_string(),
        message_type: message_type.to_string(),
        payload: Map::new(),
        run_type: run_type.to_string(),
        run_date: run_date.to_string(),
        id: None,
    }
}

/// `Delivered` event for a message that is not tracked by any relay.
pub fn delivered(message: Message) -> ManagerEvent {
    ManagerEvent::Delivered(Delivery::detached(message))
}
