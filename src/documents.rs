//! Semantic document store.
//!
//! Persists text plus metadata under a caller-supplied (or generated) id and
//! answers similarity queries against the stored embeddings.
//!
//! # Idempotence
//!
//! Writes are keyed. [`DocumentStore::store`] first checks whether the id is
//! already present and, if so, returns without embedding anything. When two
//! writers race past that check, the insert itself is
//! `ON CONFLICT(id) DO NOTHING`, so the loser affects zero rows and the
//! first writer's content stays in place.
//!
//! # Retrieval
//!
//! Similarity is brute-force cosine over every stored vector whose
//! dimensionality matches the active provider. Retrieval is best-effort
//! context: [`DocumentStore::query`] turns every failure into an empty result.

use chrono::{DateTime, Utc};
use sha2::{Digest, Sha256};
use sqlx::{Row, SqlitePool};
use std::sync::Arc;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::embedding::{self, blob_to_vec, cosine_similarity, vec_to_blob, EmbeddingProvider};
use crate::error::{MemoryError, MemoryResult};
use crate::models::{Document, DocumentMetadata, ScoredDocument};

/// Default number of matches returned by [`DocumentStore::query`].
pub const DEFAULT_QUERY_LIMIT: usize = 5;

/// Text + metadata storage with idempotent writes and similarity retrieval.
#[derive(Clone)]
pub struct DocumentStore {
    pool: SqlitePool,
    embedder: Arc<dyn EmbeddingProvider>,
}

impl DocumentStore {
    pub fn new(pool: SqlitePool, embedder: Arc<dyn EmbeddingProvider>) -> Self {
        Self { pool, embedder }
    }

    /// Store `text` under the id resolved from `metadata`, returning that id.
    ///
    /// The id is `metadata.source_id` when set, otherwise a fresh UUID. If a
    /// document with that id already exists nothing is written and the
    /// existing id is returned.
    ///
    /// # Errors
    ///
    /// - [`MemoryError::InvalidInput`] for blank text or non-scalar metadata.
    /// - [`MemoryError::Write`] if embedding or persisting fails. Retrying is
    ///   safe.
    pub async fn store(&self, text: &str, mut metadata: DocumentMetadata) -> MemoryResult<String> {
        if text.trim().is_empty() {
            return Err(MemoryError::InvalidInput(
                "document text must not be empty".to_string(),
            ));
        }
        metadata
            .check_scalars()
            .map_err(MemoryError::InvalidInput)?;

        let doc_id = metadata
            .intended_id()
            .map(str::to_string)
            .unwrap_or_else(|| Uuid::new_v4().to_string());
        // Persisted metadata carries the id exactly as stored.
        metadata.source_id = metadata.intended_id().map(str::to_string);
        let content_hash = content_hash(text);

        if let Some(existing_hash) = self.existing_hash(&doc_id).await? {
            self.note_duplicate(&doc_id, &existing_hash, &content_hash);
            return Ok(doc_id);
        }

        let vector = embedding::embed_query(self.embedder.as_ref(), text)
            .await
            .map_err(|e| {
                error!(id = %doc_id, error = %e, "failed to embed document");
                MemoryError::write("document", &doc_id, e)
            })?;

        let metadata_json = serde_json::to_string(&metadata)
            .map_err(|e| MemoryError::write("document", &doc_id, e))?;

        let result = sqlx::query(
            r#"
            INSERT INTO documents (id, text, source, author, metadata_json, content_hash,
                                   embedding, model, dims, created_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(id) DO NOTHING
            "#,
        )
        .bind(&doc_id)
        .bind(text)
        .bind(&metadata.source)
        .bind(&metadata.author)
        .bind(&metadata_json)
        .bind(&content_hash)
        .bind(vec_to_blob(&vector))
        .bind(self.embedder.model_name())
        .bind(vector.len() as i64)
        .bind(Utc::now().timestamp_millis())
        .execute(&self.pool)
        .await
        .map_err(|e| {
            error!(id = %doc_id, error = %e, "failed to persist document");
            MemoryError::write("document", &doc_id, e)
        })?;

        if result.rows_affected() == 0 {
            // Lost a race with a concurrent writer for the same id.
            if let Some(existing_hash) = self.existing_hash(&doc_id).await? {
                self.note_duplicate(&doc_id, &existing_hash, &content_hash);
            }
            return Ok(doc_id);
        }

        info!(id = %doc_id, model = self.embedder.model_name(), "stored document");
        Ok(doc_id)
    }

    /// Texts most similar to `text`, best first, at most `limit` of them.
    ///
    /// Never fails: an empty store, a `limit` of zero, or a broken
    /// embedding/similarity engine all yield an empty vector.
    pub async fn query(&self, text: &str, limit: usize) -> Vec<String> {
        match self.query_scored(text, limit).await {
            Ok(matches) => {
                if matches.is_empty() {
                    warn!("context query returned no documents");
                } else {
                    info!(count = matches.len(), "retrieved context documents");
                }
                matches.into_iter().map(|m| m.text).collect()
            }
            Err(e) => {
                warn!(error = %e, "context query degraded to empty result");
                Vec::new()
            }
        }
    }

    /// Like [`query`](Self::query) but returns ids, metadata, and scores, and
    /// reports failures as [`MemoryError::QueryDegraded`].
    pub async fn query_scored(&self, text: &str, limit: usize) -> MemoryResult<Vec<ScoredDocument>> {
        if limit == 0 {
            return Err(MemoryError::InvalidInput(
                "query limit must be >= 1".to_string(),
            ));
        }
        if text.trim().is_empty() {
            return Ok(Vec::new());
        }

        let query_vec = embedding::embed_query(self.embedder.as_ref(), text)
            .await
            .map_err(|e| MemoryError::QueryDegraded {
                reason: format!("query embedding failed: {}", e),
            })?;

        let rows = sqlx::query(
            "SELECT id, text, metadata_json, embedding FROM documents WHERE dims = ?",
        )
        .bind(query_vec.len() as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| MemoryError::QueryDegraded {
            reason: format!("similarity scan failed: {}", e),
        })?;

        let mut candidates: Vec<ScoredDocument> = rows
            .iter()
            .map(|row| {
                let blob: Vec<u8> = row.get("embedding");
                let vec = blob_to_vec(&blob);
                let metadata_json: String = row.get("metadata_json");
                ScoredDocument {
                    id: row.get("id"),
                    text: row.get("text"),
                    metadata: parse_metadata(&metadata_json),
                    similarity: cosine_similarity(&query_vec, &vec) as f64,
                }
            })
            .collect();

        candidates.sort_by(|a, b| {
            b.similarity
                .partial_cmp(&a.similarity)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        candidates.truncate(limit);

        Ok(candidates)
    }

    /// Fetch a stored document by id.
    pub async fn get(&self, id: &str) -> MemoryResult<Option<Document>> {
        let row = sqlx::query(
            "SELECT id, text, metadata_json, content_hash, created_at FROM documents WHERE id = ?",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| MemoryError::read("document", e))?;

        Ok(row.map(|r| {
            let metadata_json: String = r.get("metadata_json");
            let created_at: i64 = r.get("created_at");
            Document {
                id: r.get("id"),
                text: r.get("text"),
                metadata: parse_metadata(&metadata_json),
                content_hash: r.get("content_hash"),
                created_at: from_millis(created_at),
            }
        }))
    }

    /// Number of stored documents.
    pub async fn count(&self) -> MemoryResult<i64> {
        sqlx::query_scalar("SELECT COUNT(*) FROM documents")
            .fetch_one(&self.pool)
            .await
            .map_err(|e| MemoryError::read("documents", e))
    }

    async fn existing_hash(&self, id: &str) -> MemoryResult<Option<String>> {
        sqlx::query_scalar("SELECT content_hash FROM documents WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| MemoryError::write("document", id, e))
    }

    fn note_duplicate(&self, id: &str, existing_hash: &str, incoming_hash: &str) {
        if existing_hash == incoming_hash {
            debug!(id, "document already stored, skipping duplicate");
        } else {
            warn!(
                id,
                "document id already stored with different content; keeping original"
            );
        }
    }
}

/// Hex SHA-256 of a document body.
pub fn content_hash(text: &str) -> String {
    format!("{:x}", Sha256::digest(text.as_bytes()))
}

fn parse_metadata(json: &str) -> DocumentMetadata {
    serde_json::from_str(json).unwrap_or_default()
}

pub(crate) fn from_millis(ms: i64) -> DateTime<Utc> {
    DateTime::from_timestamp_millis(ms).unwrap_or_default()
}
