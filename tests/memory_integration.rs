//! Integration tests for the document store and prediction ledger.
//!
//! Each test opens a fresh SQLite database in a temp directory through the
//! public [`Memory`] handle, the same way the CLI does.

use anyhow::{bail, Result};
use async_trait::async_trait;
use chrono::{Duration, Utc};
use market_memory::config::Config;
use market_memory::embedding::{EmbeddingProvider, HashProvider};
use market_memory::{
    Direction, DocumentMetadata, MarketOutcome, MarketSentimentPayload, Memory, MemoryError,
};
use std::sync::Arc;
use tempfile::TempDir;

fn test_config(tmp: &TempDir) -> Config {
    let config_content = format!(
        r#"
[db]
path = "{}"

[embedding]
provider = "hash"
dims = 256

[retrieval]
default_limit = 5
"#,
        tmp.path().join("data").join("memory.sqlite").display()
    );
    toml::from_str(&config_content).unwrap()
}

async fn open(tmp: &TempDir) -> Memory {
    Memory::open(&test_config(tmp)).await.unwrap()
}

/// Embedding provider that is always down.
struct UnavailableEmbedder;

#[async_trait]
impl EmbeddingProvider for UnavailableEmbedder {
    fn model_name(&self) -> &str {
        "unavailable"
    }
    fn dims(&self) -> usize {
        256
    }
    async fn embed(&self, _texts: &[String]) -> Result<Vec<Vec<f32>>> {
        bail!("embedding service unreachable")
    }
}

// ─── Document store ─────────────────────────────────────────────────

#[tokio::test]
async fn test_store_is_idempotent_per_source_id() {
    let tmp = TempDir::new().unwrap();
    let memory = open(&tmp).await;
    let docs = memory.documents();

    let meta = DocumentMetadata::default()
        .with_source_id("yt-abc123")
        .with_source("youtube")
        .with_author("Macro Weekly");

    let first = docs
        .store("FED maintains rates, ETF inflows surge", meta.clone())
        .await
        .unwrap();
    let second = docs
        .store("A completely different retry payload", meta)
        .await
        .unwrap();

    assert_eq!(first, "yt-abc123");
    assert_eq!(first, second);
    assert_eq!(docs.count().await.unwrap(), 1);

    let stored = docs.get("yt-abc123").await.unwrap().unwrap();
    assert_eq!(stored.text, "FED maintains rates, ETF inflows surge");
    assert_eq!(stored.metadata.author.as_deref(), Some("Macro Weekly"));
}

#[tokio::test]
async fn test_store_without_source_id_generates_unique_ids() {
    let tmp = TempDir::new().unwrap();
    let memory = open(&tmp).await;
    let docs = memory.documents();

    let a = docs
        .store("Same text", DocumentMetadata::default())
        .await
        .unwrap();
    let b = docs
        .store("Same text", DocumentMetadata::default())
        .await
        .unwrap();

    assert_ne!(a, b);
    assert_eq!(docs.count().await.unwrap(), 2);
}

#[tokio::test]
async fn test_metadata_returned_unmodified() {
    let tmp = TempDir::new().unwrap();
    let memory = open(&tmp).await;
    let docs = memory.documents();

    let meta = DocumentMetadata::default()
        .with_source_id("report-7")
        .with_source("research")
        .with_date("2026-02-04")
        .with_extra("pages", serde_json::json!(12))
        .with_extra("desk", serde_json::json!("rates"));

    docs.store("Rates desk weekly report", meta.clone())
        .await
        .unwrap();

    let stored = docs.get("report-7").await.unwrap().unwrap();
    assert_eq!(stored.metadata, meta);
}

#[tokio::test]
async fn test_store_rejects_empty_text_and_nested_metadata() {
    let tmp = TempDir::new().unwrap();
    let memory = open(&tmp).await;
    let docs = memory.documents();

    let err = docs
        .store("   ", DocumentMetadata::default())
        .await
        .unwrap_err();
    assert!(matches!(err, MemoryError::InvalidInput(_)));

    let nested = DocumentMetadata::default().with_extra("tags", serde_json::json!({"a": 1}));
    let err = docs.store("Valid text", nested).await.unwrap_err();
    assert!(matches!(err, MemoryError::InvalidInput(_)));
    assert_eq!(docs.count().await.unwrap(), 0);
}

#[tokio::test]
async fn test_query_on_empty_store_returns_empty() {
    let tmp = TempDir::new().unwrap();
    let memory = open(&tmp).await;

    let results = memory.documents().query("anything", 5).await;
    assert!(results.is_empty());
}

#[tokio::test]
async fn test_query_ranks_near_duplicate_first() {
    let tmp = TempDir::new().unwrap();
    let memory = open(&tmp).await;
    let docs = memory.documents();

    docs.store(
        "Sourdough bread recipe with rye flour and a long cold proof",
        DocumentMetadata::default().with_source_id("b"),
    )
    .await
    .unwrap();
    docs.store(
        "Bitcoin ETF inflows surge as institutions keep buying",
        DocumentMetadata::default().with_source_id("a"),
    )
    .await
    .unwrap();

    let results = docs
        .query("Bitcoin ETF inflows surge as institutions buy", 1)
        .await;
    assert_eq!(
        results,
        vec!["Bitcoin ETF inflows surge as institutions keep buying".to_string()]
    );

    let scored = docs.query_scored("bitcoin etf inflows", 5).await.unwrap();
    assert_eq!(scored.len(), 2);
    assert_eq!(scored[0].id, "a");
    assert!(scored[0].similarity > scored[1].similarity);
}

#[tokio::test]
async fn test_query_respects_limit() {
    let tmp = TempDir::new().unwrap();
    let memory = open(&tmp).await;
    let docs = memory.documents();

    for i in 0..4 {
        docs.store(
            &format!("market note number {}", i),
            DocumentMetadata::default(),
        )
        .await
        .unwrap();
    }

    assert_eq!(docs.query("market note", 2).await.len(), 2);
    assert_eq!(docs.query("market note", 10).await.len(), 4);
    assert!(docs.query("market note", 0).await.is_empty());
}

#[tokio::test]
async fn test_embedding_outage_fails_writes_and_degrades_queries() {
    let tmp = TempDir::new().unwrap();
    let cfg = test_config(&tmp);

    // Seed one document with a working provider.
    let memory = Memory::open(&cfg).await.unwrap();
    memory
        .documents()
        .store("ETF inflows", DocumentMetadata::default())
        .await
        .unwrap();
    memory.close().await;

    let memory = Memory::open_with_embedder(&cfg, Arc::new(UnavailableEmbedder))
        .await
        .unwrap();
    let docs = memory.documents();

    let err = docs
        .store("New transcript", DocumentMetadata::default().with_source_id("t1"))
        .await
        .unwrap_err();
    assert!(matches!(err, MemoryError::Write { .. }));
    assert!(!err.is_fatal());

    assert!(docs.query("ETF inflows", 5).await.is_empty());
    let err = docs.query_scored("ETF inflows", 5).await.unwrap_err();
    assert!(matches!(err, MemoryError::QueryDegraded { .. }));
    assert_eq!(docs.count().await.unwrap(), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_concurrent_duplicate_store_persists_once() {
    let tmp = TempDir::new().unwrap();
    let memory = open(&tmp).await;
    let text = "Concurrent ingestion of the same transcript";

    let left = memory.documents().clone();
    let right = memory.documents().clone();
    let meta = DocumentMetadata::default().with_source_id("dup-1");
    let meta_right = meta.clone();

    let (a, b) = tokio::join!(
        tokio::spawn(async move { left.store(text, meta).await }),
        tokio::spawn(async move { right.store(text, meta_right).await }),
    );

    assert_eq!(a.unwrap().unwrap(), "dup-1");
    assert_eq!(b.unwrap().unwrap(), "dup-1");
    assert_eq!(memory.documents().count().await.unwrap(), 1);
    assert_eq!(
        memory.documents().get("dup-1").await.unwrap().unwrap().text,
        text
    );
}

#[tokio::test]
async fn test_documents_survive_reopen() {
    let tmp = TempDir::new().unwrap();
    let cfg = test_config(&tmp);

    let memory = Memory::open(&cfg).await.unwrap();
    memory
        .documents()
        .store(
            "Treasury yields climb",
            DocumentMetadata::default().with_source_id("y1"),
        )
        .await
        .unwrap();
    memory.close().await;

    let memory = Memory::open(&cfg).await.unwrap();
    assert_eq!(memory.documents().count().await.unwrap(), 1);
    assert_eq!(
        memory.documents().query("treasury yields", 1).await,
        vec!["Treasury yields climb".to_string()]
    );
}

#[tokio::test]
async fn test_open_fails_when_database_cannot_be_created() {
    let tmp = TempDir::new().unwrap();
    let blocker = tmp.path().join("blocker");
    std::fs::write(&blocker, "not a directory").unwrap();

    let cfg = Config::new(blocker.join("nested").join("memory.sqlite"));
    let err = match Memory::open(&cfg).await {
        Ok(_) => panic!("open should fail when the parent path is a file"),
        Err(e) => e,
    };
    assert!(matches!(err, MemoryError::Initialization { .. }));
    assert!(err.is_fatal());
}

// ─── Prediction ledger ──────────────────────────────────────────────

#[tokio::test]
async fn test_score_half_right_and_marks_validated() {
    let tmp = TempDir::new().unwrap();
    let memory = open(&tmp).await;
    let ledger = memory.ledger();
    let window_start = Utc::now() - Duration::minutes(1);

    let long_id = ledger
        .record_prediction("Institutional adoption keeps BTC bid", Direction::Long, "4h")
        .await
        .unwrap();
    let short_id = ledger
        .record_prediction("Regulatory overhang caps upside", Direction::Short, "1d")
        .await
        .unwrap();

    let report = ledger.score(MarketOutcome::Up, window_start).await.unwrap();
    assert_eq!(report.evaluated, 2);
    assert_eq!(report.correct, 1);
    assert!((report.accuracy - 0.5).abs() < f64::EPSILON);

    let long = ledger.get(&long_id).await.unwrap().unwrap();
    let short = ledger.get(&short_id).await.unwrap().unwrap();
    assert!(long.validated && short.validated);
    assert_eq!(long.correct, Some(true));
    assert_eq!(short.correct, Some(false));
    assert_eq!(long.outcome, Some(MarketOutcome::Up));
    assert!(long.validated_at.is_some());
    assert_eq!(long.text, "Institutional adoption keeps BTC bid");
    assert_eq!(long.timeframe, "4h");
}

#[tokio::test]
async fn test_rescoring_same_window_reports_insufficient_data() {
    let tmp = TempDir::new().unwrap();
    let memory = open(&tmp).await;
    let ledger = memory.ledger();
    let window_start = Utc::now() - Duration::minutes(1);

    ledger
        .record_prediction("Up only", Direction::Long, "4h")
        .await
        .unwrap();
    ledger
        .record_prediction("Down bad", Direction::Short, "4h")
        .await
        .unwrap();

    ledger.score(MarketOutcome::Up, window_start).await.unwrap();
    let err = ledger
        .score(MarketOutcome::Up, window_start)
        .await
        .unwrap_err();
    assert!(matches!(err, MemoryError::InsufficientScoringData { .. }));
}

#[tokio::test]
async fn test_score_on_empty_ledger_is_insufficient_not_zero() {
    let tmp = TempDir::new().unwrap();
    let memory = open(&tmp).await;

    let err = memory
        .ledger()
        .score(MarketOutcome::Down, Utc::now() - Duration::days(7))
        .await
        .unwrap_err();
    assert!(matches!(err, MemoryError::InsufficientScoringData { .. }));
}

#[tokio::test]
async fn test_score_only_considers_window() {
    let tmp = TempDir::new().unwrap();
    let memory = open(&tmp).await;
    let ledger = memory.ledger();

    let old_id = ledger
        .record_prediction("Before the window", Direction::Short, "1d")
        .await
        .unwrap();
    tokio::time::sleep(std::time::Duration::from_millis(20)).await;
    let window_start = Utc::now();
    tokio::time::sleep(std::time::Duration::from_millis(20)).await;
    ledger
        .record_prediction("Inside the window", Direction::Short, "1d")
        .await
        .unwrap();

    let report = ledger
        .score(MarketOutcome::Down, window_start)
        .await
        .unwrap();
    assert_eq!(report.evaluated, 1);
    assert_eq!(report.accuracy, 1.0);
    assert!(!ledger.get(&old_id).await.unwrap().unwrap().validated);

    // A wider, overlapping window picks up only what is still pending.
    let report = ledger
        .score(MarketOutcome::Up, window_start - Duration::minutes(5))
        .await
        .unwrap();
    assert_eq!(report.evaluated, 1);
    assert_eq!(report.prediction_ids, vec![old_id]);
    assert_eq!(report.accuracy, 0.0);
}

#[tokio::test]
async fn test_flat_outcome_scores_every_call_wrong() {
    let tmp = TempDir::new().unwrap();
    let memory = open(&tmp).await;
    let ledger = memory.ledger();
    let window_start = Utc::now() - Duration::minutes(1);

    ledger
        .record_prediction("Breakout", Direction::Long, "4h")
        .await
        .unwrap();
    ledger
        .record_prediction("Breakdown", Direction::Short, "4h")
        .await
        .unwrap();

    let report = ledger
        .score(MarketOutcome::Flat, window_start)
        .await
        .unwrap();
    assert_eq!(report.evaluated, 2);
    assert_eq!(report.accuracy, 0.0);
}

#[tokio::test]
async fn test_score_matured_defers_open_horizons() {
    let tmp = TempDir::new().unwrap();
    let memory = open(&tmp).await;
    let ledger = memory.ledger();
    let window_start = Utc::now() - Duration::minutes(1);

    let id = ledger
        .record_prediction("Four hour call", Direction::Long, "4h")
        .await
        .unwrap();
    ledger
        .record_prediction("No horizon", Direction::Long, "until earnings")
        .await
        .unwrap();

    let err = ledger
        .score_matured(MarketOutcome::Up, window_start, Utc::now())
        .await
        .unwrap_err();
    assert!(matches!(err, MemoryError::InsufficientScoringData { .. }));

    let report = ledger
        .score_matured(
            MarketOutcome::Up,
            window_start,
            Utc::now() + Duration::hours(5),
        )
        .await
        .unwrap();
    assert_eq!(report.evaluated, 1);
    assert_eq!(report.deferred, 1);
    assert_eq!(report.prediction_ids, vec![id]);

    let pending = ledger.list(true, None).await.unwrap();
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0].timeframe, "until earnings");
}

#[tokio::test]
async fn test_identical_predictions_are_independent_events() {
    let tmp = TempDir::new().unwrap();
    let memory = open(&tmp).await;
    let ledger = memory.ledger();

    let a = ledger
        .record_prediction("Same call", Direction::Long, "1d")
        .await
        .unwrap();
    let b = ledger
        .record_prediction("Same call", Direction::Long, "1d")
        .await
        .unwrap();

    assert_ne!(a, b);
    assert!(a.starts_with("pred_"));
    assert_eq!(ledger.list(false, None).await.unwrap().len(), 2);
    assert_eq!(ledger.list(false, Some(1)).await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_record_prediction_rejects_blank_fields() {
    let tmp = TempDir::new().unwrap();
    let memory = open(&tmp).await;

    let err = memory
        .ledger()
        .record_prediction("", Direction::Long, "4h")
        .await
        .unwrap_err();
    assert!(matches!(err, MemoryError::InvalidInput(_)));

    let err = memory
        .ledger()
        .record_prediction("Call", Direction::Long, " ")
        .await
        .unwrap_err();
    assert!(matches!(err, MemoryError::InvalidInput(_)));
}

#[tokio::test]
async fn test_record_analysis_uses_sentiment_sign() {
    let tmp = TempDir::new().unwrap();
    let memory = open(&tmp).await;
    let ledger = memory.ledger();

    let analysis = MarketSentimentPayload::new(
        -0.4,
        0.7,
        vec!["Exchange outflows spike".to_string()],
    )
    .unwrap();
    let id = ledger.record_analysis(&analysis, "1d").await.unwrap();

    let record = ledger.get(&id).await.unwrap().unwrap();
    assert_eq!(record.direction, Direction::Short);
    assert!(record.text.contains("Exchange outflows spike"));
    assert!(!record.validated);
}

#[tokio::test]
async fn test_track_record_accumulates_across_passes() {
    let tmp = TempDir::new().unwrap();
    let memory = open(&tmp).await;
    let ledger = memory.ledger();
    let window_start = Utc::now() - Duration::minutes(1);

    let empty = ledger.track_record().await.unwrap();
    assert_eq!(empty.accuracy, None);

    ledger
        .record_prediction("Call 1", Direction::Long, "4h")
        .await
        .unwrap();
    ledger.score(MarketOutcome::Up, window_start).await.unwrap();

    ledger
        .record_prediction("Call 2", Direction::Long, "4h")
        .await
        .unwrap();
    ledger
        .record_prediction("Call 3", Direction::Short, "4h")
        .await
        .unwrap();
    ledger
        .record_prediction("Call 4", Direction::Short, "4h")
        .await
        .unwrap();
    ledger
        .score(MarketOutcome::Down, window_start)
        .await
        .unwrap();

    let record = ledger.track_record().await.unwrap();
    assert_eq!(record.pending, 0);
    assert_eq!(record.validated, 4);
    assert_eq!(record.correct, 3);
    assert_eq!(record.accuracy, Some(0.75));

    let long = record
        .by_direction
        .iter()
        .find(|d| d.direction == Direction::Long)
        .unwrap();
    assert_eq!((long.correct, long.validated), (1, 2));
}

#[tokio::test]
async fn test_stores_share_database_independently() {
    let tmp = TempDir::new().unwrap();
    let memory = Memory::open_with_embedder(&test_config(&tmp), Arc::new(HashProvider::new(64)))
        .await
        .unwrap();

    memory
        .documents()
        .store("Gold rallies", DocumentMetadata::default())
        .await
        .unwrap();
    memory
        .ledger()
        .record_prediction("Gold higher", Direction::Long, "1w")
        .await
        .unwrap();

    let stats = market_memory::stats::collect(&memory).await.unwrap();
    assert_eq!(stats.documents, 1);
    assert_eq!(stats.predictions, 1);
    assert_eq!(stats.track_record.pending, 1);
}

#[tokio::test]
async fn test_score_window_excludes_same_millisecond_earlier_prediction() {
    let tmp = TempDir::new().unwrap();
    let memory = open(&tmp).await;
    let ledger = memory.ledger();

    let id = ledger
        .record_prediction("Just before the window", Direction::Long, "4h")
        .await
        .unwrap();
    let recorded = ledger.get(&id).await.unwrap().unwrap();

    // Window opens half a millisecond after the record, inside the same ms.
    let window_start = recorded.timestamp + Duration::microseconds(500);
    let err = ledger
        .score(MarketOutcome::Up, window_start)
        .await
        .unwrap_err();
    assert!(matches!(err, MemoryError::InsufficientScoringData { .. }));
    assert!(!ledger.get(&id).await.unwrap().unwrap().validated);

    let report = ledger
        .score(MarketOutcome::Up, recorded.timestamp)
        .await
        .unwrap();
    assert_eq!(report.prediction_ids, vec![id]);
}

#[tokio::test]
async fn test_failed_mark_rolls_back_whole_pass() {
    let tmp = TempDir::new().unwrap();
    let cfg = test_config(&tmp);
    let memory = Memory::open(&cfg).await.unwrap();
    let ledger = memory.ledger();
    let window_start = Utc::now() - Duration::minutes(1);

    let first = ledger
        .record_prediction("Marked first", Direction::Long, "4h")
        .await
        .unwrap();
    tokio::time::sleep(std::time::Duration::from_millis(5)).await;
    let second = ledger
        .record_prediction("Mark fails", Direction::Short, "4h")
        .await
        .unwrap();

    let admin = sqlx::SqlitePool::connect(&format!("sqlite:{}", cfg.db.path.display()))
        .await
        .unwrap();
    sqlx::query(&format!(
        "CREATE TRIGGER fail_mark BEFORE UPDATE ON predictions WHEN OLD.id = '{}' \
         BEGIN SELECT RAISE(ABORT, 'disk full'); END",
        second
    ))
    .execute(&admin)
    .await
    .unwrap();

    let err = ledger
        .score(MarketOutcome::Up, window_start)
        .await
        .unwrap_err();
    assert!(matches!(err, MemoryError::Write { .. }));

    let pending = ledger.list(true, None).await.unwrap();
    assert_eq!(pending.len(), 2);
    assert!(!ledger.get(&first).await.unwrap().unwrap().validated);

    sqlx::query("DROP TRIGGER fail_mark")
        .execute(&admin)
        .await
        .unwrap();
    admin.close().await;

    let report = ledger.score(MarketOutcome::Up, window_start).await.unwrap();
    assert_eq!(report.evaluated, 2);
    assert_eq!(report.accuracy, 0.5);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_scoring_never_double_counts() {
    let tmp = TempDir::new().unwrap();
    let memory = open(&tmp).await;
    let window_start = Utc::now() - Duration::minutes(1);

    for i in 0..50 {
        let direction = if i % 2 == 0 {
            Direction::Long
        } else {
            Direction::Short
        };
        memory
            .ledger()
            .record_prediction(&format!("Call {}", i), direction, "1d")
            .await
            .unwrap();
    }

    let handles: Vec<_> = (0..4)
        .map(|_| {
            let ledger = memory.ledger().clone();
            tokio::spawn(async move { ledger.score(MarketOutcome::Up, window_start).await })
        })
        .collect();

    let mut total = 0;
    for handle in handles {
        match handle.await.unwrap() {
            Ok(report) => total += report.evaluated,
            Err(MemoryError::InsufficientScoringData { .. }) => {}
            Err(e) => panic!("unexpected scoring error: {}", e),
        }
    }

    assert_eq!(total, 50);
    let record = memory.ledger().track_record().await.unwrap();
    assert_eq!(record.validated, 50);
    assert_eq!(record.correct, 25);
}

#[tokio::test]
async fn test_padded_source_id_stored_trimmed() {
    let tmp = TempDir::new().unwrap();
    let memory = open(&tmp).await;
    let docs = memory.documents();

    let id = docs
        .store(
            "Padded id transcript",
            DocumentMetadata::default().with_source_id("  yt-pad  "),
        )
        .await
        .unwrap();
    assert_eq!(id, "yt-pad");

    let stored = docs.get("yt-pad").await.unwrap().unwrap();
    assert_eq!(stored.metadata.source_id.as_deref(), Some("yt-pad"));

    let again = docs
        .store("Padded id transcript", DocumentMetadata::default().with_source_id("yt-pad"))
        .await
        .unwrap();
    assert_eq!(again, "yt-pad");
    assert_eq!(docs.count().await.unwrap(), 1);
}
