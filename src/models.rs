//! Core data models for the memory layer.
//!
//! [`Document`] and [`PredictionRecord`] are the two persisted entity types.
//! Both are handed to callers as owned copies; the only write paths are
//! [`DocumentStore::store`](crate::documents::DocumentStore::store) and the
//! [`PredictionLedger`](crate::ledger::PredictionLedger) methods.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

/// Metadata attached to a stored document.
///
/// The named fields cover what ingestion producers send today. Anything
/// else goes into `extra`, which must only hold scalar JSON values.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DocumentMetadata {
    /// Caller-supplied stable key. Used as the document id when present.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub date: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub author: Option<String>,
    #[serde(flatten)]
    pub extra: BTreeMap<String, serde_json::Value>,
}

impl DocumentMetadata {
    pub fn with_source_id(mut self, source_id: impl Into<String>) -> Self {
        self.source_id = Some(source_id.into());
        self
    }

    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        self.source = Some(source.into());
        self
    }

    pub fn with_author(mut self, author: impl Into<String>) -> Self {
        self.author = Some(author.into());
        self
    }

    pub fn with_date(mut self, date: impl Into<String>) -> Self {
        self.date = Some(date.into());
        self
    }

    pub fn with_extra(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.extra.insert(key.into(), value);
        self
    }

    /// The caller-supplied id, if one is set and non-blank.
    pub fn intended_id(&self) -> Option<&str> {
        self.source_id
            .as_deref()
            .map(str::trim)
            .filter(|id| !id.is_empty())
    }

    /// Reject extension values that are not strings, numbers, or booleans.
    pub fn check_scalars(&self) -> Result<(), String> {
        for (key, value) in &self.extra {
            match value {
                serde_json::Value::String(_)
                | serde_json::Value::Number(_)
                | serde_json::Value::Bool(_) => {}
                other => {
                    return Err(format!(
                        "metadata field '{}' must be a string, number, or bool (got {})",
                        key,
                        json_kind(other)
                    ))
                }
            }
        }
        Ok(())
    }
}

fn json_kind(value: &serde_json::Value) -> &'static str {
    match value {
        serde_json::Value::Null => "null",
        serde_json::Value::Bool(_) => "bool",
        serde_json::Value::Number(_) => "number",
        serde_json::Value::String(_) => "string",
        serde_json::Value::Array(_) => "array",
        serde_json::Value::Object(_) => "object",
    }
}

/// A document as persisted in the `documents` table.
#[derive(Debug, Clone, Serialize)]
pub struct Document {
    pub id: String,
    pub text: String,
    pub metadata: DocumentMetadata,
    /// Hex SHA-256 of `text`.
    pub content_hash: String,
    pub created_at: DateTime<Utc>,
}

/// A similarity match returned by
/// [`DocumentStore::query_scored`](crate::documents::DocumentStore::query_scored).
#[derive(Debug, Clone, Serialize)]
pub struct ScoredDocument {
    pub id: String,
    pub text: String,
    pub metadata: DocumentMetadata,
    /// Cosine similarity in `[-1.0, 1.0]`.
    pub similarity: f64,
}

/// Direction of a market call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Direction {
    Long,
    Short,
}

impl Direction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Direction::Long => "LONG",
            Direction::Short => "SHORT",
        }
    }

    /// A LONG call is right on an upward move, a SHORT call on a downward
    /// one. A flat market makes every directional call wrong.
    pub fn matches(&self, outcome: MarketOutcome) -> bool {
        matches!(
            (self, outcome),
            (Direction::Long, MarketOutcome::Up) | (Direction::Short, MarketOutcome::Down)
        )
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Direction {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "LONG" => Ok(Direction::Long),
            "SHORT" => Ok(Direction::Short),
            other => Err(format!("unknown direction '{}': expected LONG or SHORT", other)),
        }
    }
}

/// Realized market move supplied by the caller when scoring.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum MarketOutcome {
    Up,
    Down,
    Flat,
}

impl MarketOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            MarketOutcome::Up => "UP",
            MarketOutcome::Down => "DOWN",
            MarketOutcome::Flat => "FLAT",
        }
    }
}

impl fmt::Display for MarketOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MarketOutcome {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "UP" => Ok(MarketOutcome::Up),
            "DOWN" => Ok(MarketOutcome::Down),
            "FLAT" => Ok(MarketOutcome::Flat),
            other => Err(format!(
                "unknown outcome '{}': expected UP, DOWN, or FLAT",
                other
            )),
        }
    }
}

/// A logged directional call awaiting (or past) validation.
#[derive(Debug, Clone, Serialize)]
pub struct PredictionRecord {
    pub id: String,
    pub text: String,
    pub direction: Direction,
    pub timeframe: String,
    pub timestamp: DateTime<Utc>,
    pub validated: bool,
    pub outcome: Option<MarketOutcome>,
    pub correct: Option<bool>,
    pub validated_at: Option<DateTime<Utc>>,
}

impl PredictionRecord {
    /// The parsed horizon of this record's `timeframe`, if it has one.
    pub fn horizon(&self) -> Option<Duration> {
        parse_horizon(&self.timeframe)
    }

    /// True once `as_of` is at or past `timestamp + horizon`.
    pub fn is_mature(&self, as_of: DateTime<Utc>) -> bool {
        self.horizon()
            .and_then(|h| self.timestamp.checked_add_signed(h))
            .map(|due| due <= as_of)
            .unwrap_or(false)
    }
}

/// Parse a horizon label such as `"15m"`, `"4h"`, `"1d"`, or `"2w"`.
///
/// Returns `None` for anything else; timeframes are opaque labels and a
/// label without a horizon is still a valid prediction.
pub fn parse_horizon(timeframe: &str) -> Option<Duration> {
    let label = timeframe.trim().to_ascii_lowercase();
    let split = label.find(|c: char| !c.is_ascii_digit())?;
    let (amount, unit) = label.split_at(split);
    let amount: i64 = amount.parse().ok()?;

    match unit {
        "m" | "min" => Duration::try_minutes(amount),
        "h" => Duration::try_hours(amount),
        "d" => Duration::try_days(amount),
        "w" => Duration::try_weeks(amount),
        _ => None,
    }
}
