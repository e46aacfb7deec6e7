// src/message.rs

//! Worker completion messages, their wire encoding, and manager replies.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::{Map, Value};

use crate::types::{parse_run_date, RunContext, RunType, WorkerId};

/// Payload field that workers may use to carry their own idempotency key.
pub const IDEMPOTENCY_KEY_FIELD: &str = "idempotency_key";

/// Closed vocabulary of message types.
///
/// On the wire these are the strings `"success"`, `"success <variant>"`,
/// `"failure"`, `"failure <variant>"`, `"crash"` and `"ack"`. Which of them a
/// given worker may send is decided by the registry.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum MessageType {
    Success(Option<String>),
    Failure(Option<String>),
    Crash,
    Ack,
}

impl MessageType {
    pub fn success(variant: &str) -> Self {
        Self::Success(Some(variant.to_string()))
    }

    pub fn failure(variant: &str) -> Self {
        Self::Failure(Some(variant.to_string()))
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success(_))
    }

    /// Terminal outcome a worker reports with this message type.
    ///
    /// `Ack` is manager-to-worker only and has no outcome.
    pub fn outcome(&self) -> Option<Outcome> {
        match self {
            Self::Success(_) => Some(Outcome::Success),
            Self::Failure(_) => Some(Outcome::Failure),
            Self::Crash => Some(Outcome::Crash),
            Self::Ack => None,
        }
    }
}

impl fmt::Display for MessageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Success(None) => f.write_str("success"),
            Self::Success(Some(v)) => write!(f, "success {v}"),
            Self::Failure(None) => f.write_str("failure"),
            Self::Failure(Some(v)) => write!(f, "failure {v}"),
            Self::Crash => f.write_str("crash"),
            Self::Ack => f.write_str("ack"),
        }
    }
}

impl FromStr for MessageType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        let (head, variant) = match s.split_once(char::is_whitespace) {
            Some((head, rest)) => (head, Some(rest.trim().to_string())),
            None => (s, None),
        };
        let variant = variant.filter(|v| !v.is_empty());

        match (head, variant) {
            ("success", v) => Ok(Self::Success(v)),
            ("failure", v) => Ok(Self::Failure(v)),
            ("crash", None) => Ok(Self::Crash),
            ("ack", None) => Ok(Self::Ack),
            ("crash" | "ack", Some(v)) => Err(format!(
                "message type '{head}' does not take a variant (got '{v}')"
            )),
            _ => Err(format!(
                "invalid message type '{s}' (expected success, failure, crash or ack)"
            )),
        }
    }
}

impl Serialize for MessageType {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for MessageType {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// Terminal outcome recorded in the checklist.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Outcome {
    Success,
    Failure,
    Crash,
}

/// A validated-for-shape completion message.
///
/// Whether the worker/type pair is *legal* is the registry's decision; this
/// type only guarantees the fields parsed.
#[derive(Debug, Clone, PartialEq)]
pub struct Message {
    /// Idempotency key; also the `in_reply_to` of the ack.
    pub id: String,
    pub worker: WorkerId,
    pub message_type: MessageType,
    pub run_context: RunContext,
    pub payload: Map<String, Value>,
}

impl Message {
    /// Build a message, deriving the id from its content when none is given.
    pub fn new(
        worker: WorkerId,
        message_type: MessageType,
        run_context: RunContext,
        payload: Map<String, Value>,
        id: Option<String>,
    ) -> Self {
        let id = id
            .or_else(|| {
                payload
                    .get(IDEMPOTENCY_KEY_FIELD)
                    .and_then(Value::as_str)
                    .map(str::to_string)
            })
            .unwrap_or_else(|| content_id(&worker, &message_type, &run_context, &payload));

        Self {
            id,
            worker,
            message_type,
            run_context,
            payload,
        }
    }

    /// Parse the worker wire format.
    pub fn from_wire(wire: WireMessage) -> Result<Self, String> {
        let message_type: MessageType = wire.message_type.parse()?;
        let run_date = parse_run_date(&wire.run_date)?;
        if wire.worker.trim().is_empty() {
            return Err("message has an empty worker name".to_string());
        }
        if wire.run_type.trim().is_empty() {
            return Err("message has an empty run_type".to_string());
        }

        Ok(Self::new(
            WorkerId::new(wire.worker),
            message_type,
            RunContext::new(RunType::new(wire.run_type), run_date),
            wire.payload,
            wire.id,
        ))
    }

    pub fn to_wire(&self) -> WireMessage {
        WireMessage {
            worker: self.worker.to_string(),
            message_type: self.message_type.to_string(),
            payload: self.payload.clone(),
            run_type: self.run_context.run_type.to_string(),
            run_date: self.run_context.run_date_string(),
            id: Some(self.id.clone()),
        }
    }
}

/// Deterministic id over the message content (blake3 of its canonical JSON).
///
/// `serde_json::Map` is ordered, so the encoding is stable.
fn content_id(
    worker: &WorkerId,
    message_type: &MessageType,
    run_context: &RunContext,
    payload: &Map<String, Value>,
) -> String {
    let mut hasher = blake3::Hasher::new();
    hasher.update(worker.as_str().as_bytes());
    hasher.update(b"\0");
    hasher.update(message_type.to_string().as_bytes());
    hasher.update(b"\0");
    hasher.update(run_context.run_type.as_str().as_bytes());
    hasher.update(b"\0");
    hasher.update(run_context.run_date_string().as_bytes());
    hasher.update(b"\0");
    hasher.update(Value::Object(payload.clone()).to_string().as_bytes());
    hasher.finalize().to_hex().to_string()
}

/// Worker -> broker -> manager message, as JSON.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WireMessage {
    pub worker: String,
    #[serde(rename = "type")]
    pub message_type: String,
    #[serde(default)]
    pub payload: Map<String, Value>,
    pub run_type: String,
    pub run_date: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
}

/// Manager -> worker/operator replies.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Reply {
    /// The report was processed (or recognised as a duplicate).
    Ack { in_reply_to: String },
    /// The report or command was rejected.
    Error {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        in_reply_to: Option<String>,
        reason: String,
    },
    /// Answer to a `status` command.
    Status { status: Value },
    /// An operator command completed.
    Done { command: String },
}
