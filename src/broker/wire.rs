// src/broker/wire.rs

//! Newline-delimited JSON frames spoken on the broker's TCP port.
//!
//! ```text
//! {"kind":"report","worker":"download_weather","type":"success 06","payload":{},"run_type":"nowcast","run_date":"2024-05-01"}
//! {"kind":"control","command":"clear_checklist","run_type":"forecast2"}
//! ```
//!
//! Every request frame is answered with one [`Reply`](crate::message::Reply)
//! line.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::engine::ControlCommand;
use crate::errors::Result;
use crate::message::WireMessage;
use crate::types::{parse_run_date, RunType};

/// A request from a worker or operator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Frame {
    Report(WireMessage),
    Control(ControlRequest),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ControlKind {
    Reload,
    Status,
    Shutdown,
    ClearChecklist,
}

/// Operator command as sent on the wire.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ControlRequest {
    pub command: ControlKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub run_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub run_date: Option<String>,
}

impl ControlRequest {
    pub fn new(command: ControlKind) -> Self {
        Self {
            command,
            run_type: None,
            run_date: None,
        }
    }
}

impl TryFrom<ControlRequest> for ControlCommand {
    type Error = String;

    fn try_from(req: ControlRequest) -> std::result::Result<Self, Self::Error> {
        Ok(match req.command {
            ControlKind::Reload => ControlCommand::Reload,
            ControlKind::Status => ControlCommand::Status,
            ControlKind::Shutdown => ControlCommand::Shutdown,
            ControlKind::ClearChecklist => {
                let run_type = req
                    .run_type
                    .filter(|rt| !rt.trim().is_empty())
                    .ok_or_else(|| "clear_checklist requires a run_type".to_string())?;
                let run_date = req.run_date.as_deref().map(parse_run_date).transpose()?;
                ControlCommand::ClearChecklist {
                    run_type: RunType::new(run_type),
                    run_date,
                }
            }
        })
    }
}

/// Serialize `value` as one line, including the trailing newline.
pub fn encode_line<T: Serialize>(value: &T) -> Result<String> {
    let mut line = serde_json::to_string(value)?;
    line.push('\n');
    Ok(line)
}

pub fn decode_line<T: DeserializeOwned>(line: &str) -> Result<T> {
    Ok(serde_json::from_str(line.trim_end())?)
}
