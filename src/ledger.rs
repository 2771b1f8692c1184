//! Prediction ledger and scoring engine.
//!
//! Predictions are appended with [`PredictionLedger::record_prediction`] and
//! later reconciled against a caller-supplied [`MarketOutcome`] by
//! [`PredictionLedger::score`]. Each record flips from unvalidated to
//! validated exactly once, so re-scoring an overlapping window only ever
//! sees records no earlier pass has claimed.
//!
//! # Scoring rule
//!
//! | Direction | Outcome | Correct |
//! |-----------|---------|---------|
//! | `LONG`    | `UP`    | yes     |
//! | `SHORT`   | `DOWN`  | yes     |
//! | any       | `FLAT`  | no      |
//! | otherwise |         | no      |
//!
//! All marks of a pass are written in one transaction. If any of them
//! fails, the whole pass rolls back and every record stays unvalidated.

use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};
use tracing::{error, info};
use uuid::Uuid;

use crate::contracts::MarketSentimentPayload;
use crate::documents::from_millis;
use crate::error::{MemoryError, MemoryResult};
use crate::models::{Direction, MarketOutcome, PredictionRecord};

/// Append-mostly log of directional predictions.
#[derive(Clone)]
pub struct PredictionLedger {
    pool: SqlitePool,
}

/// Result of one scoring pass.
#[derive(Debug, Clone, Serialize)]
pub struct ScoreReport {
    pub outcome: MarketOutcome,
    pub window_start: DateTime<Utc>,
    /// Predictions validated by this pass.
    pub evaluated: usize,
    /// How many of those matched the outcome.
    pub correct: usize,
    /// `correct / evaluated`, always in `[0.0, 1.0]`.
    pub accuracy: f64,
    /// Unvalidated predictions in the window left for a later pass because
    /// their horizon had not elapsed. Always zero for [`PredictionLedger::score`].
    pub deferred: usize,
    pub prediction_ids: Vec<String>,
}

/// Lifetime accuracy across every validated prediction.
#[derive(Debug, Clone, Serialize)]
pub struct TrackRecord {
    pub pending: i64,
    pub validated: i64,
    pub correct: i64,
    /// `None` until at least one prediction has been validated.
    pub accuracy: Option<f64>,
    pub by_direction: Vec<DirectionRecord>,
}

#[derive(Debug, Clone, Serialize)]
pub struct DirectionRecord {
    pub direction: Direction,
    pub validated: i64,
    pub correct: i64,
    pub accuracy: Option<f64>,
}

const SELECT_COLUMNS: &str =
    "id, text, direction, timeframe, created_at, validated, outcome, correct, validated_at";

impl PredictionLedger {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Log a new prediction and return its id.
    ///
    /// Every call is an independent event; identical text is recorded again.
    pub async fn record_prediction(
        &self,
        text: &str,
        direction: Direction,
        timeframe: &str,
    ) -> MemoryResult<String> {
        if text.trim().is_empty() {
            return Err(MemoryError::InvalidInput(
                "prediction text must not be empty".to_string(),
            ));
        }
        if timeframe.trim().is_empty() {
            return Err(MemoryError::InvalidInput(
                "prediction timeframe must not be empty".to_string(),
            ));
        }

        let now = Utc::now();
        let pred_id = prediction_id(now);

        sqlx::query(
            r#"
            INSERT INTO predictions (id, text, direction, timeframe, created_at, validated)
            VALUES (?, ?, ?, ?, ?, 0)
            "#,
        )
        .bind(&pred_id)
        .bind(text)
        .bind(direction.as_str())
        .bind(timeframe.trim())
        .bind(now.timestamp_millis())
        .execute(&self.pool)
        .await
        .map_err(|e| {
            error!(id = %pred_id, error = %e, "failed to record prediction");
            MemoryError::write("prediction", &pred_id, e)
        })?;

        info!(id = %pred_id, %direction, timeframe, "recorded prediction for scoring");
        Ok(pred_id)
    }

    /// Log a validated sentiment analysis as a prediction.
    ///
    /// The direction follows the sign of `overall_sentiment` and the text is
    /// the analysis rationale.
    pub async fn record_analysis(
        &self,
        analysis: &MarketSentimentPayload,
        timeframe: &str,
    ) -> MemoryResult<String> {
        self.record_prediction(&analysis.rationale(), analysis.direction(), timeframe)
            .await
    }

    /// Score every unvalidated prediction made at or after `window_start`.
    ///
    /// # Errors
    ///
    /// - [`MemoryError::InsufficientScoringData`] when nothing is eligible.
    /// - [`MemoryError::Write`] when marking fails; no record is validated.
    pub async fn score(
        &self,
        outcome: MarketOutcome,
        window_start: DateTime<Utc>,
    ) -> MemoryResult<ScoreReport> {
        self.score_pass(outcome, window_start, None).await
    }

    /// Like [`score`](Self::score), but only predictions whose timeframe
    /// horizon has elapsed by `as_of` are reconciled. Records with a
    /// timeframe that has no parseable horizon are left pending.
    pub async fn score_matured(
        &self,
        outcome: MarketOutcome,
        window_start: DateTime<Utc>,
        as_of: DateTime<Utc>,
    ) -> MemoryResult<ScoreReport> {
        self.score_pass(outcome, window_start, Some(as_of)).await
    }

    async fn score_pass(
        &self,
        outcome: MarketOutcome,
        window_start: DateTime<Utc>,
        as_of: Option<DateTime<Utc>>,
    ) -> MemoryResult<ScoreReport> {
        info!(%outcome, %window_start, "running prediction scoring pass");

        let mut candidates = self.pending_since(window_start).await?;
        let in_window = candidates.len();
        if let Some(as_of) = as_of {
            candidates.retain(|record| record.is_mature(as_of));
        }
        let deferred = in_window - candidates.len();

        if candidates.is_empty() {
            return Err(MemoryError::InsufficientScoringData { window_start });
        }

        let validated_at = Utc::now().timestamp_millis();
        let mut evaluated = 0usize;
        let mut correct = 0usize;
        let mut prediction_ids = Vec::with_capacity(candidates.len());

        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| MemoryError::write("prediction", "scoring pass", e))?;

        for record in &candidates {
            let hit = record.direction.matches(outcome);
            let result = sqlx::query(
                r#"
                UPDATE predictions
                SET validated = 1, outcome = ?, correct = ?, validated_at = ?
                WHERE id = ? AND validated = 0
                "#,
            )
            .bind(outcome.as_str())
            .bind(hit)
            .bind(validated_at)
            .bind(&record.id)
            .execute(&mut *tx)
            .await
            .map_err(|e| {
                error!(id = %record.id, error = %e, "failed to mark prediction validated");
                MemoryError::write("prediction", &record.id, e)
            })?;

            // Zero rows means a concurrent pass already claimed it.
            if result.rows_affected() == 1 {
                evaluated += 1;
                if hit {
                    correct += 1;
                }
                prediction_ids.push(record.id.clone());
            }
        }

        tx.commit()
            .await
            .map_err(|e| MemoryError::write("prediction", "scoring pass", e))?;

        if evaluated == 0 {
            return Err(MemoryError::InsufficientScoringData { window_start });
        }

        let accuracy = correct as f64 / evaluated as f64;
        info!(evaluated, correct, accuracy, deferred, "scoring pass complete");

        Ok(ScoreReport {
            outcome,
            window_start,
            evaluated,
            correct,
            accuracy,
            deferred,
            prediction_ids,
        })
    }

    /// Fetch a prediction by id.
    pub async fn get(&self, id: &str) -> MemoryResult<Option<PredictionRecord>> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM predictions WHERE id = ?",
            SELECT_COLUMNS
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| MemoryError::read("prediction", e))?;

        row.as_ref().map(row_to_record).transpose()
    }

    /// Most recent predictions first.
    pub async fn list(
        &self,
        pending_only: bool,
        limit: Option<usize>,
    ) -> MemoryResult<Vec<PredictionRecord>> {
        let filter = if pending_only { "WHERE validated = 0" } else { "" };
        let rows = sqlx::query(&format!(
            "SELECT {} FROM predictions {} ORDER BY created_at DESC, id DESC LIMIT ?",
            SELECT_COLUMNS, filter
        ))
        .bind(limit.map(|l| l as i64).unwrap_or(-1))
        .fetch_all(&self.pool)
        .await
        .map_err(|e| MemoryError::read("predictions", e))?;

        rows.iter().map(row_to_record).collect()
    }

    /// Lifetime accuracy, overall and per direction.
    pub async fn track_record(&self) -> MemoryResult<TrackRecord> {
        let pending: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM predictions WHERE validated = 0")
            .fetch_one(&self.pool)
            .await
            .map_err(|e| MemoryError::read("predictions", e))?;

        let rows = sqlx::query(
            r#"
            SELECT direction,
                   COUNT(*) AS validated,
                   COALESCE(SUM(correct), 0) AS correct
            FROM predictions
            WHERE validated = 1
            GROUP BY direction
            ORDER BY direction
            "#,
        )
        .fetch_all(&self.pool)
        .await
        .map_err(|e| MemoryError::read("predictions", e))?;

        let mut by_direction = Vec::with_capacity(rows.len());
        for row in &rows {
            let label: String = row.get("direction");
            let direction = label
                .parse::<Direction>()
                .map_err(|e| MemoryError::read("predictions", e))?;
            let validated: i64 = row.get("validated");
            let correct: i64 = row.get("correct");
            by_direction.push(DirectionRecord {
                direction,
                validated,
                correct,
                accuracy: ratio(correct, validated),
            });
        }

        let validated = by_direction.iter().map(|d| d.validated).sum();
        let correct = by_direction.iter().map(|d| d.correct).sum();

        Ok(TrackRecord {
            pending,
            validated,
            correct,
            accuracy: ratio(correct, validated),
            by_direction,
        })
    }

    async fn pending_since(&self, window_start: DateTime<Utc>) -> MemoryResult<Vec<PredictionRecord>> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM predictions WHERE validated = 0 AND created_at >= ? ORDER BY created_at ASC",
            SELECT_COLUMNS
        ))
        .bind(window_bound_millis(window_start))
        .fetch_all(&self.pool)
        .await
        .map_err(|e| MemoryError::read("predictions", e))?;

        rows.iter().map(row_to_record).collect()
    }
}

/// `pred_<yyyymmddHHMMSSmmm>_<8 hex>`: sortable by creation time, unique
/// even when several predictions land in the same millisecond.
fn prediction_id(now: DateTime<Utc>) -> String {
    let suffix = Uuid::new_v4().simple().to_string();
    format!("pred_{}_{}", now.format("%Y%m%d%H%M%S%3f"), &suffix[..8])
}

/// Smallest stored millisecond timestamp that is not before `window_start`.
///
/// `created_at` has millisecond resolution, so a sub-millisecond window
/// start rounds up rather than down.
fn window_bound_millis(window_start: DateTime<Utc>) -> i64 {
    let millis = window_start.timestamp_millis();
    if window_start.timestamp_subsec_nanos() % 1_000_000 != 0 {
        millis + 1
    } else {
        millis
    }
}

fn ratio(numerator: i64, denominator: i64) -> Option<f64> {
    (denominator > 0).then(|| numerator as f64 / denominator as f64)
}

fn row_to_record(row: &SqliteRow) -> MemoryResult<PredictionRecord> {
    let direction: String = row.get("direction");
    let outcome: Option<String> = row.get("outcome");
    let created_at: i64 = row.get("created_at");
    let validated_at: Option<i64> = row.get("validated_at");

    Ok(PredictionRecord {
        id: row.get("id"),
        text: row.get("text"),
        direction: direction
            .parse::<Direction>()
            .map_err(|e| MemoryError::read("prediction", e))?,
        timeframe: row.get("timeframe"),
        timestamp: from_millis(created_at),
        validated: row.get::<bool, _>("validated"),
        outcome: outcome
            .map(|o| o.parse::<MarketOutcome>())
            .transpose()
            .map_err(|e| MemoryError::read("prediction", e))?,
        correct: row.get::<Option<bool>, _>("correct"),
        validated_at: validated_at.map(from_millis),
    })
}
