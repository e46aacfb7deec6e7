// src/types.rs

//! Small value types shared across the crate.

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use chrono::NaiveDate;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// Format used for run dates on the wire and in the checklist file.
pub const RUN_DATE_FORMAT: &str = "%Y-%m-%d";

/// Identifies a worker *kind* (e.g. `download_weather`), not a process.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct WorkerId(String);

impl WorkerId {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for WorkerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for WorkerId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Named pipeline variant (`nowcast`, `forecast2`, ...).
///
/// The legal set is declared in `[manager].run_types` and checked when
/// messages are received and when rules are loaded.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RunType(String);

impl RunType {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RunType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for RunType {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Human-readable stage name under which a worker records its results.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ChecklistKey(String);

impl ChecklistKey {
    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ChecklistKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ChecklistKey {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Which pipeline instance a message belongs to.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct RunContext {
    pub run_type: RunType,
    pub run_date: NaiveDate,
}

impl RunContext {
    pub fn new(run_type: impl Into<RunType>, run_date: NaiveDate) -> Self {
        Self {
            run_type: run_type.into(),
            run_date,
        }
    }

    pub fn run_date_string(&self) -> String {
        self.run_date.format(RUN_DATE_FORMAT).to_string()
    }
}

impl fmt::Display for RunContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.run_type, self.run_date_string())
    }
}

/// Parse a `YYYY-MM-DD` run date.
pub fn parse_run_date(s: &str) -> Result<NaiveDate, String> {
    NaiveDate::parse_from_str(s.trim(), RUN_DATE_FORMAT)
        .map_err(|e| format!("invalid run date '{s}' (expected YYYY-MM-DD): {e}"))
}

/// The unit of serialization in the manager: one worker kind for one run.
///
/// Rendered as `worker/run_type/run_date`, which is also how it is keyed in
/// the persisted state file.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct PairKey {
    pub worker: WorkerId,
    pub run_context: RunContext,
}

impl PairKey {
    pub fn new(worker: WorkerId, run_context: RunContext) -> Self {
        Self {
            worker,
            run_context,
        }
    }
}

impl fmt::Display for PairKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}/{}/{}",
            self.worker,
            self.run_context.run_type,
            self.run_context.run_date_string()
        )
    }
}

impl FromStr for PairKey {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut parts = s.rsplitn(3, '/');
        let (Some(date), Some(run_type), Some(worker)) = (parts.next(), parts.next(), parts.next())
        else {
            return Err(format!("invalid pair key '{s}' (expected worker/run_type/run_date)"));
        };
        Ok(Self {
            worker: WorkerId::new(worker),
            run_context: RunContext::new(run_type, parse_run_date(date)?),
        })
    }
}

impl Serialize for PairKey {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for PairKey {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// Parse durations like `"250ms"`, `"30s"`, `"5m"`, `"6h"`.
pub fn parse_duration(s: &str) -> Result<Duration, String> {
    let s = s.trim();
    if s.is_empty() {
        return Err("empty duration string".to_string());
    }

    // Find the boundary between digits and suffix.
    let idx = s
        .chars()
        .position(|c| !c.is_ascii_digit())
        .ok_or_else(|| "duration missing unit suffix".to_string())?;

    let (num_part, unit_part) = s.split_at(idx);
    let value: u64 = num_part
        .parse()
        .map_err(|e| format!("invalid duration number '{}': {}", num_part, e))?;
    let unit = unit_part.trim().to_lowercase();

    match unit.as_str() {
        "ms" => Ok(Duration::from_millis(value)),
        "s" => Ok(Duration::from_secs(value)),
        "m" => Ok(Duration::from_secs(value.saturating_mul(60))),
        "h" => Ok(Duration::from_secs(value.saturating_mul(60 * 60))),
        _ => Err(format!(
            "unsupported duration unit '{}'; expected ms, s, m, or h",
            unit
        )),
    }
}
