//! Wire contracts exchanged with upstream reasoning and downstream execution.
//!
//! - [`MarketSentimentPayload`]: the validated output of a sentiment analysis.
//! - [`SentimentPayload`]: the per-symbol signal sent to execution systems.
//!
//! Both enforce their numeric bounds when constructed and when deserialized
//! from JSON. Out-of-range or non-finite values are rejected, never clamped.
//! The one exception is a sentiment of exactly `0`, which is replaced by
//! [`ZERO_SENTIMENT_EPSILON`] so consumers never receive a neutral signal.

use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};

use crate::models::Direction;

/// Value substituted for a sentiment of exactly zero.
pub const ZERO_SENTIMENT_EPSILON: f64 = 0.001;

#[derive(Debug, thiserror::Error)]
pub enum ContractError {
    #[error("{field} must be within [{min}, {max}] (got {value})")]
    OutOfRange {
        field: &'static str,
        value: f64,
        min: f64,
        max: f64,
    },

    #[error("{field} must be a finite number")]
    NotFinite { field: &'static str },

    #[error("{field} must not be empty")]
    Empty { field: &'static str },

    #[error("invalid payload JSON: {0}")]
    Json(#[from] serde_json::Error),
}

fn check_range(field: &'static str, value: f64, min: f64, max: f64) -> Result<f64, ContractError> {
    if !value.is_finite() {
        return Err(ContractError::NotFinite { field });
    }
    if value < min || value > max {
        return Err(ContractError::OutOfRange {
            field,
            value,
            min,
            max,
        });
    }
    Ok(value)
}

fn check_sentiment(field: &'static str, value: f64) -> Result<f64, ContractError> {
    let value = check_range(field, value, -1.0, 1.0)?;
    Ok(if value == 0.0 {
        ZERO_SENTIMENT_EPSILON
    } else {
        value
    })
}

// ============ Sentiment analysis result ============

/// Output of the reasoning step: an overall market sentiment with the
/// headlines that drove it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RawMarketSentiment")]
pub struct MarketSentimentPayload {
    timestamp: DateTime<Utc>,
    overall_sentiment: f64,
    confidence_score: f64,
    top_impact_news: Vec<String>,
}

#[derive(Deserialize)]
struct RawMarketSentiment {
    #[serde(default = "Utc::now", deserialize_with = "flexible_timestamp")]
    timestamp: DateTime<Utc>,
    overall_sentiment: f64,
    confidence_score: f64,
    top_impact_news: Vec<String>,
}

impl TryFrom<RawMarketSentiment> for MarketSentimentPayload {
    type Error = ContractError;

    fn try_from(raw: RawMarketSentiment) -> Result<Self, Self::Error> {
        Ok(MarketSentimentPayload::new(
            raw.overall_sentiment,
            raw.confidence_score,
            raw.top_impact_news,
        )?
        .with_timestamp(raw.timestamp))
    }
}

impl MarketSentimentPayload {
    /// Build a payload timestamped now.
    pub fn new(
        overall_sentiment: f64,
        confidence_score: f64,
        top_impact_news: Vec<String>,
    ) -> Result<Self, ContractError> {
        let overall_sentiment = check_sentiment("overall_sentiment", overall_sentiment)?;
        let confidence_score = check_range("confidence_score", confidence_score, 0.0, 1.0)?;
        if top_impact_news.is_empty() {
            return Err(ContractError::Empty {
                field: "top_impact_news",
            });
        }

        Ok(Self {
            timestamp: Utc::now(),
            overall_sentiment,
            confidence_score,
            top_impact_news,
        })
    }

    pub fn with_timestamp(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = timestamp;
        self
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    pub fn overall_sentiment(&self) -> f64 {
        self.overall_sentiment
    }

    pub fn confidence_score(&self) -> f64 {
        self.confidence_score
    }

    pub fn top_impact_news(&self) -> &[String] {
        &self.top_impact_news
    }

    /// LONG for positive sentiment, SHORT for negative. Zero never occurs.
    pub fn direction(&self) -> Direction {
        if self.overall_sentiment > 0.0 {
            Direction::Long
        } else {
            Direction::Short
        }
    }

    /// Human-readable rationale suitable for the prediction ledger.
    pub fn rationale(&self) -> String {
        format!(
            "sentiment {:+.3} (confidence {:.2}): {}",
            self.overall_sentiment,
            self.confidence_score,
            self.top_impact_news.join("; ")
        )
    }

    pub fn to_json(&self) -> Result<String, ContractError> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn from_json(json: &str) -> Result<Self, ContractError> {
        Ok(serde_json::from_str(json)?)
    }
}

// ============ Signal payload ============

/// Per-symbol sentiment signal for downstream execution engines.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RawSentimentPayload")]
pub struct SentimentPayload {
    symbol: String,
    sentiment_score: f64,
    confidence: f64,
    timestamp: DateTime<Utc>,
}

#[derive(Deserialize)]
struct RawSentimentPayload {
    symbol: String,
    sentiment_score: f64,
    confidence: f64,
    #[serde(default = "Utc::now", deserialize_with = "flexible_timestamp")]
    timestamp: DateTime<Utc>,
}

impl TryFrom<RawSentimentPayload> for SentimentPayload {
    type Error = ContractError;

    fn try_from(raw: RawSentimentPayload) -> Result<Self, Self::Error> {
        Ok(SentimentPayload::new(raw.symbol, raw.sentiment_score, raw.confidence)?
            .with_timestamp(raw.timestamp))
    }
}

impl SentimentPayload {
    pub fn new(
        symbol: impl Into<String>,
        sentiment_score: f64,
        confidence: f64,
    ) -> Result<Self, ContractError> {
        let symbol = symbol.into();
        if symbol.trim().is_empty() {
            return Err(ContractError::Empty { field: "symbol" });
        }

        Ok(Self {
            symbol,
            sentiment_score: check_sentiment("sentiment_score", sentiment_score)?,
            confidence: check_range("confidence", confidence, 0.0, 1.0)?,
            timestamp: Utc::now(),
        })
    }

    /// Derive the execution signal for `symbol` from an analysis, keeping
    /// the analysis timestamp.
    pub fn from_analysis(
        symbol: impl Into<String>,
        analysis: &MarketSentimentPayload,
    ) -> Result<Self, ContractError> {
        Ok(Self::new(
            symbol,
            analysis.overall_sentiment(),
            analysis.confidence_score(),
        )?
        .with_timestamp(analysis.timestamp()))
    }

    pub fn with_timestamp(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = timestamp;
        self
    }

    pub fn symbol(&self) -> &str {
        &self.symbol
    }

    pub fn sentiment_score(&self) -> f64 {
        self.sentiment_score
    }

    pub fn confidence(&self) -> f64 {
        self.confidence
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    pub fn to_json(&self) -> Result<String, ContractError> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn from_json(json: &str) -> Result<Self, ContractError> {
        Ok(serde_json::from_str(json)?)
    }
}

/// Accept RFC 3339 timestamps as well as offset-less ones
/// (`2026-02-04T12:00:00`), which are read as UTC.
fn flexible_timestamp<'de, D>(deserializer: D) -> Result<DateTime<Utc>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = String::deserialize(deserializer)?;
    if let Ok(ts) = DateTime::parse_from_rfc3339(&raw) {
        return Ok(ts.with_timezone(&Utc));
    }
    NaiveDateTime::parse_from_str(&raw, "%Y-%m-%dT%H:%M:%S%.f")
        .map(|naive| naive.and_utc())
        .map_err(|e| serde::de::Error::custom(format!("invalid timestamp '{}': {}", raw, e)))
}
