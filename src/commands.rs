//! CLI command implementations.
//!
//! Each `run_*` function opens the database, performs one operation, prints
//! a report to stdout, and closes the pool. Diagnostics go through `tracing`
//! to stderr.

use anyhow::{anyhow, bail, Context, Result};
use chrono::{DateTime, NaiveDate, Utc};
use std::path::Path;
use tracing::warn;

use crate::config::Config;
use crate::contracts::{MarketSentimentPayload, SentimentPayload};
use crate::error::MemoryError;
use crate::memory::Memory;
use crate::models::{Direction, DocumentMetadata, MarketOutcome, PredictionRecord};

pub async fn run_init(config: &Config) -> Result<()> {
    let memory = Memory::open(config).await?;
    memory.close().await;
    println!("initialized {}", config.db.path.display());
    Ok(())
}

pub async fn run_store(config: &Config, text: &str, metadata: DocumentMetadata) -> Result<()> {
    let memory = Memory::open(config).await?;
    let result = store_document(&memory, text, metadata).await;
    memory.close().await;

    let (doc_id, existed) = result?;
    if existed {
        println!("exists {}", doc_id);
    } else {
        println!("stored {}", doc_id);
    }
    Ok(())
}

/// Store and report whether the resolved id was already present.
async fn store_document(
    memory: &Memory,
    text: &str,
    metadata: DocumentMetadata,
) -> Result<(String, bool), MemoryError> {
    let existed = match metadata.intended_id() {
        Some(id) => memory.documents().get(id).await?.is_some(),
        None => false,
    };
    let doc_id = memory.documents().store(text, metadata).await?;
    Ok((doc_id, existed))
}

pub async fn run_query(config: &Config, text: &str, limit: Option<usize>) -> Result<()> {
    let limit = limit.unwrap_or(config.retrieval.default_limit);
    let memory = Memory::open(config).await?;
    let result = memory.documents().query_scored(text, limit).await;
    memory.close().await;

    let matches = match result {
        Ok(matches) => matches,
        Err(e @ MemoryError::QueryDegraded { .. }) => {
            warn!(error = %e, "context query degraded");
            Vec::new()
        }
        Err(e) => return Err(e.into()),
    };

    if matches.is_empty() {
        println!("No results.");
        return Ok(());
    }

    for (i, m) in matches.iter().enumerate() {
        let source = m.metadata.source.as_deref().unwrap_or("-");
        println!("{}. [{:.3}] {} ({})", i + 1, m.similarity, m.id, source);
        println!("    {}", snippet(&m.text, 200));
    }
    Ok(())
}

pub async fn run_get(config: &Config, id: &str) -> Result<()> {
    let memory = Memory::open(config).await?;
    let doc = memory.documents().get(id).await;
    memory.close().await;

    match doc? {
        Some(doc) => {
            println!("{}", serde_json::to_string_pretty(&doc)?);
            Ok(())
        }
        None => bail!("document not found: {}", id),
    }
}

pub async fn run_predict(
    config: &Config,
    text: Option<&str>,
    direction: Option<&str>,
    timeframe: &str,
    from_analysis: Option<&Path>,
) -> Result<()> {
    enum Call<'a> {
        Analysis(MarketSentimentPayload),
        Manual(&'a str, Direction),
    }

    let call = match from_analysis {
        Some(path) => Call::Analysis(read_analysis(path)?),
        None => {
            let text = text.ok_or_else(|| anyhow!("prediction text is required"))?;
            let direction: Direction = direction
                .ok_or_else(|| anyhow!("--direction is required"))?
                .parse()
                .map_err(|e: String| anyhow!(e))?;
            Call::Manual(text, direction)
        }
    };

    let memory = Memory::open(config).await?;
    let result = match call {
        Call::Analysis(analysis) => memory.ledger().record_analysis(&analysis, timeframe).await,
        Call::Manual(text, direction) => {
            memory
                .ledger()
                .record_prediction(text, direction, timeframe)
                .await
        }
    };
    memory.close().await;

    println!("recorded {}", result?);
    Ok(())
}

pub async fn run_predictions(config: &Config, pending: bool, limit: Option<usize>) -> Result<()> {
    let memory = Memory::open(config).await?;
    let records = memory.ledger().list(pending, limit).await;
    memory.close().await;
    let records = records?;

    if records.is_empty() {
        println!("No predictions.");
        return Ok(());
    }

    for record in &records {
        println!("{}", format_record(record));
    }
    Ok(())
}

pub async fn run_score(config: &Config, outcome: &str, since: &str, matured: bool) -> Result<()> {
    let outcome: MarketOutcome = outcome.parse().map_err(|e: String| anyhow!(e))?;
    let window_start = parse_window_start(since)?;

    let memory = Memory::open(config).await?;
    let ledger = memory.ledger();
    let result = if matured {
        ledger.score_matured(outcome, window_start, Utc::now()).await
    } else {
        ledger.score(outcome, window_start).await
    };
    memory.close().await;

    match result {
        Ok(report) => {
            println!("score {} since {}", report.outcome, report.window_start.to_rfc3339());
            println!("  evaluated: {}", report.evaluated);
            println!("  correct: {}", report.correct);
            println!("  accuracy: {:.4}", report.accuracy);
            if matured {
                println!("  deferred (horizon not elapsed): {}", report.deferred);
            }
            Ok(())
        }
        Err(MemoryError::InsufficientScoringData { window_start }) => {
            println!(
                "insufficient data: no unvalidated predictions since {}",
                window_start.to_rfc3339()
            );
            Ok(())
        }
        Err(e) => Err(e.into()),
    }
}

pub fn run_validate(kind: &str, path: &Path) -> Result<()> {
    let json = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read payload file: {}", path.display()))?;

    let normalized = match kind {
        "analysis" => MarketSentimentPayload::from_json(&json)?.to_json()?,
        "signal" => SentimentPayload::from_json(&json)?.to_json()?,
        other => bail!("Unknown payload kind: '{}'. Use analysis or signal.", other),
    };

    println!("{}", normalized);
    Ok(())
}

fn read_analysis(path: &Path) -> Result<MarketSentimentPayload> {
    let json = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read analysis file: {}", path.display()))?;
    MarketSentimentPayload::from_json(&json)
        .with_context(|| format!("Invalid analysis payload: {}", path.display()))
}

/// Parse `key=value`. Values that read as JSON numbers or booleans keep that
/// type; everything else is a string.
pub fn parse_meta_pair(pair: &str) -> Result<(String, serde_json::Value)> {
    let (key, raw) = pair
        .split_once('=')
        .ok_or_else(|| anyhow!("metadata must be key=value (got '{}')", pair))?;
    let key = key.trim();
    if key.is_empty() {
        bail!("metadata key must not be empty (got '{}')", pair);
    }

    let value = match serde_json::from_str::<serde_json::Value>(raw) {
        Ok(v @ (serde_json::Value::Number(_) | serde_json::Value::Bool(_))) => v,
        _ => serde_json::Value::String(raw.to_string()),
    };
    Ok((key.to_string(), value))
}

/// Accept an RFC 3339 timestamp or a `YYYY-MM-DD` date (midnight UTC).
pub fn parse_window_start(since: &str) -> Result<DateTime<Utc>> {
    if let Ok(ts) = DateTime::parse_from_rfc3339(since) {
        return Ok(ts.with_timezone(&Utc));
    }
    let date = NaiveDate::parse_from_str(since, "%Y-%m-%d").with_context(|| {
        format!(
            "Invalid --since '{}': expected RFC 3339 or YYYY-MM-DD",
            since
        )
    })?;
    date.and_hms_opt(0, 0, 0)
        .map(|dt| dt.and_utc())
        .ok_or_else(|| anyhow!("Invalid --since date: {}", since))
}

fn format_record(record: &PredictionRecord) -> String {
    let status = match (record.validated, record.correct) {
        (true, Some(true)) => format!("validated {} ✓", outcome_label(record)),
        (true, _) => format!("validated {} ✗", outcome_label(record)),
        (false, _) => "pending".to_string(),
    };
    format!(
        "{}  {:<5} {:<6} {}  [{}]  {}",
        record.id,
        record.direction.as_str(),
        record.timeframe,
        record.timestamp.format("%Y-%m-%d %H:%M:%S"),
        status,
        snippet(&record.text, 80)
    )
}

fn outcome_label(record: &PredictionRecord) -> &'static str {
    record.outcome.map(|o| o.as_str()).unwrap_or("?")
}

fn snippet(text: &str, max_chars: usize) -> String {
    let flat: String = text.split_whitespace().collect::<Vec<_>>().join(" ");
    if flat.chars().count() <= max_chars {
        flat
    } else {
        let cut: String = flat.chars().take(max_chars).collect();
        format!("{}...", cut)
    }
}
