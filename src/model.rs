//! Task, line and snapshot types as exchanged with the remote task store.
//!
//! The store is spreadsheet-backed, so quantities sometimes arrive as
//! numeric strings and unset timestamps as empty strings. The deserializers
//! below accept both shapes, and a snapshot drops rows it cannot read
//! instead of failing whole.

use chrono::{DateTime, NaiveDateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer, Serialize};
use std::fmt;
use std::str::FromStr;
use tracing::warn;

use crate::error::PutawayError;

// ---------------------------------------------------------------------------
// Task status
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskStatus {
    /// Device-local task created by the legacy per-line strategy.
    InProgress,
    Open,
    Closed,
}

impl TaskStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::InProgress => "IN_PROGRESS",
            Self::Open => "OPEN",
            Self::Closed => "CLOSED",
        }
    }

    /// `CLOSED` is terminal; `OPEN` may only close.
    pub fn can_transition_to(&self, next: TaskStatus) -> bool {
        matches!(
            (self, next),
            (Self::InProgress, Self::Open)
                | (Self::InProgress, Self::Closed)
                | (Self::Open, Self::Closed)
        )
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TaskStatus {
    type Err = PutawayError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "IN_PROGRESS" => Ok(Self::InProgress),
            "OPEN" => Ok(Self::Open),
            "CLOSED" => Ok(Self::Closed),
            other => Err(PutawayError::Validation(format!(
                "Unknown task status: {other}"
            ))),
        }
    }
}

// ---------------------------------------------------------------------------
// Remote records
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Task {
    #[serde(alias = "taskId", deserialize_with = "de_string_lenient")]
    pub id: String,
    #[serde(default, deserialize_with = "de_opt_string")]
    pub code: Option<String>,
    #[serde(deserialize_with = "de_status")]
    pub status: TaskStatus,
    #[serde(deserialize_with = "de_timestamp")]
    pub created_at: DateTime<Utc>,
    #[serde(default, deserialize_with = "de_opt_timestamp")]
    pub closed_at: Option<DateTime<Utc>>,
    #[serde(default, deserialize_with = "de_string_lenient")]
    pub device_id: String,
    #[serde(default, deserialize_with = "de_opt_string")]
    pub closed_by: Option<String>,
}

impl Task {
    /// Human-readable label: the backend code when assigned, else the id.
    pub fn label(&self) -> &str {
        self.code.as_deref().unwrap_or(&self.id)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Line {
    #[serde(alias = "lineId", deserialize_with = "de_string_lenient")]
    pub id: String,
    #[serde(deserialize_with = "de_string_lenient")]
    pub task_id: String,
    #[serde(deserialize_with = "de_string_lenient")]
    pub bin_id: String,
    #[serde(deserialize_with = "de_string_lenient")]
    pub sku_id: String,
    #[serde(default, deserialize_with = "de_qty_lenient")]
    pub qty: u32,
    #[serde(default, deserialize_with = "de_opt_string")]
    pub remarks: Option<String>,
    #[serde(default, deserialize_with = "de_opt_timestamp")]
    pub scanned_at: Option<DateTime<Utc>>,
}

/// A line assembled on the scan station, not yet known to the backend.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DraftLine {
    pub id: String,
    pub bin_id: String,
    pub sku_id: String,
    pub qty: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub remarks: Option<String>,
    pub scanned_at: DateTime<Utc>,
}

/// Signed-in operator as returned by the backend PIN login.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct User {
    #[serde(alias = "userId", deserialize_with = "de_string_lenient")]
    pub id: String,
    #[serde(default, deserialize_with = "de_string_lenient")]
    pub name: String,
    #[serde(default, deserialize_with = "de_opt_string")]
    pub role: Option<String>,
}

impl User {
    pub fn display_name(&self) -> &str {
        if self.name.trim().is_empty() {
            &self.id
        } else {
            &self.name
        }
    }
}

// ---------------------------------------------------------------------------
// Snapshot
// ---------------------------------------------------------------------------

/// All tasks and lines as last fetched. Replaced wholesale on refresh.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AppSnapshot {
    #[serde(deserialize_with = "de_rows")]
    pub tasks: Vec<Task>,
    #[serde(deserialize_with = "de_rows")]
    pub lines: Vec<Line>,
}

impl AppSnapshot {
    pub fn task(&self, task_id: &str) -> Option<&Task> {
        self.tasks.iter().find(|t| t.id == task_id)
    }

    pub fn line(&self, line_id: &str) -> Option<&Line> {
        self.lines.iter().find(|l| l.id == line_id)
    }

    pub fn lines_for_task<'a>(&'a self, task_id: &'a str) -> impl Iterator<Item = &'a Line> + 'a {
        self.lines.iter().filter(move |l| l.task_id == task_id)
    }
}

// ---------------------------------------------------------------------------
// Lenient deserializers
// ---------------------------------------------------------------------------

#[derive(Deserialize)]
#[serde(untagged)]
enum Scalar {
    Str(String),
    Int(i64),
    Float(f64),
    Bool(bool),
}

impl Scalar {
    fn into_string(self) -> String {
        match self {
            Scalar::Str(s) => s,
            Scalar::Int(n) => n.to_string(),
            Scalar::Float(f) => f.to_string(),
            Scalar::Bool(b) => b.to_string(),
        }
    }
}

pub(crate) fn de_string_lenient<'de, D: Deserializer<'de>>(d: D) -> Result<String, D::Error> {
    let v: Option<Scalar> = Option::deserialize(d)?;
    Ok(v.map(|s| s.into_string().trim().to_string())
        .unwrap_or_default())
}

pub(crate) fn de_opt_string<'de, D: Deserializer<'de>>(d: D) -> Result<Option<String>, D::Error> {
    let v: Option<Scalar> = Option::deserialize(d)?;
    Ok(v.map(|s| s.into_string().trim().to_string())
        .filter(|s| !s.is_empty()))
}

/// Non-numeric or negative remote quantities count as zero.
fn de_qty_lenient<'de, D: Deserializer<'de>>(d: D) -> Result<u32, D::Error> {
    let v: Option<Scalar> = Option::deserialize(d)?;
    Ok(match v {
        Some(Scalar::Int(n)) => u32::try_from(n).unwrap_or(0),
        Some(Scalar::Float(f)) if f.is_finite() && f >= 0.0 => f.trunc().min(u32::MAX as f64) as u32,
        Some(Scalar::Str(s)) => s.trim().parse::<u32>().unwrap_or(0),
        _ => 0,
    })
}

/// Sheet cells without a zone suffix are taken as UTC.
const NAIVE_TIMESTAMP_FORMATS: &[&str] = &["%Y-%m-%d %H:%M:%S", "%Y-%m-%dT%H:%M:%S"];

fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt.with_timezone(&Utc));
    }
    NAIVE_TIMESTAMP_FORMATS
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(raw, fmt).ok())
        .map(|naive| naive.and_utc())
}

fn de_timestamp<'de, D: Deserializer<'de>>(d: D) -> Result<DateTime<Utc>, D::Error> {
    let raw = String::deserialize(d)?;
    parse_timestamp(&raw)
        .ok_or_else(|| serde::de::Error::custom(format!("invalid timestamp: {raw:?}")))
}

fn de_opt_timestamp<'de, D: Deserializer<'de>>(d: D) -> Result<Option<DateTime<Utc>>, D::Error> {
    let raw: Option<String> = Option::deserialize(d)?;
    Ok(raw.as_deref().and_then(parse_timestamp))
}

fn de_status<'de, D: Deserializer<'de>>(d: D) -> Result<TaskStatus, D::Error> {
    let raw = Scalar::deserialize(d)?.into_string();
    raw.parse().map_err(serde::de::Error::custom)
}

/// Rows that fail to deserialize are logged and skipped.
fn de_rows<'de, D, T>(d: D) -> Result<Vec<T>, D::Error>
where
    D: Deserializer<'de>,
    T: DeserializeOwned,
{
    let rows: Vec<serde_json::Value> = Vec::deserialize(d)?;
    let total = rows.len();
    let parsed: Vec<T> = rows
        .into_iter()
        .enumerate()
        .filter_map(|(index, row)| match serde_json::from_value(row) {
            Ok(value) => Some(value),
            Err(e) => {
                warn!(index, error = %e, "Skipping unreadable snapshot row");
                None
            }
        })
        .collect();
    if parsed.len() < total {
        warn!(kept = parsed.len(), total, "Snapshot rows dropped");
    }
    Ok(parsed)
}
