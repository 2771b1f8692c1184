//! Error taxonomy for the memory layer.
//!
//! Every public store operation returns [`MemoryError`], so callers can tell
//! a fatal initialization failure apart from a retryable write failure, a
//! degraded similarity query, or a scoring window with nothing to score.

use chrono::{DateTime, Utc};

/// Boxed error carried as the source of a [`MemoryError`].
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Errors produced by the document store and the prediction ledger.
#[derive(Debug, thiserror::Error)]
pub enum MemoryError {
    /// The database could not be opened, created, or migrated.
    ///
    /// Fatal: the process must not continue without storage.
    #[error("failed to initialize memory database at {path}: {source}")]
    Initialization {
        path: String,
        #[source]
        source: BoxError,
    },

    /// A single record failed to persist. Safe to retry.
    #[error("failed to persist {entity} '{id}': {source}")]
    Write {
        entity: &'static str,
        id: String,
        #[source]
        source: BoxError,
    },

    /// Similarity search could not run. `query` resolves this to an
    /// empty result; only `query_scored` surfaces it.
    #[error("similarity query degraded: {reason}")]
    QueryDegraded { reason: String },

    /// No unvalidated predictions fell inside the scoring window.
    #[error("insufficient scoring data: no unvalidated predictions since {window_start}")]
    InsufficientScoringData { window_start: DateTime<Utc> },

    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// A lookup or listing query failed.
    #[error("failed to read {entity}: {source}")]
    Read {
        entity: &'static str,
        #[source]
        source: BoxError,
    },
}

impl MemoryError {
    pub(crate) fn write(entity: &'static str, id: &str, source: impl Into<BoxError>) -> Self {
        MemoryError::Write {
            entity,
            id: id.to_string(),
            source: source.into(),
        }
    }

    pub(crate) fn read(entity: &'static str, source: impl Into<BoxError>) -> Self {
        MemoryError::Read {
            entity,
            source: source.into(),
        }
    }

    /// True for failures that must abort startup.
    pub fn is_fatal(&self) -> bool {
        matches!(self, MemoryError::Initialization { .. })
    }
}

/// Convenience alias used across the store modules.
pub type MemoryResult<T> = std::result::Result<T, MemoryError>;
