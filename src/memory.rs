//! Process-wide handle over the shared database.
//!
//! [`Memory::open`] connects to SQLite, runs migrations, and builds the
//! [`DocumentStore`] and [`PredictionLedger`] over one pool. Any failure here
//! is a [`MemoryError::Initialization`]; there is no degraded mode without
//! storage.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use sqlx::SqlitePool;
use tracing::{error, info};

use crate::config::Config;
use crate::db;
use crate::documents::DocumentStore;
use crate::embedding::{self, EmbeddingProvider};
use crate::error::{MemoryError, MemoryResult};
use crate::ledger::PredictionLedger;
use crate::migrate;

pub struct Memory {
    pool: SqlitePool,
    db_path: PathBuf,
    documents: DocumentStore,
    ledger: PredictionLedger,
}

impl Memory {
    /// Open the database with the embedding provider named in `config`.
    pub async fn open(config: &Config) -> MemoryResult<Self> {
        let embedder = embedding::create_provider(&config.embedding)
            .map_err(|e| initialization_error(config, e))?;
        Self::open_with_embedder(config, embedder).await
    }

    /// Open the database with a caller-supplied embedding provider.
    pub async fn open_with_embedder(
        config: &Config,
        embedder: Arc<dyn EmbeddingProvider>,
    ) -> MemoryResult<Self> {
        let pool = db::connect(config)
            .await
            .map_err(|e| initialization_error(config, e))?;

        if let Err(e) = migrate::run_migrations(&pool).await {
            pool.close().await;
            return Err(initialization_error(config, e));
        }

        info!(
            path = %config.db.path.display(),
            model = embedder.model_name(),
            dims = embedder.dims(),
            "memory database initialized"
        );

        Ok(Self {
            documents: DocumentStore::new(pool.clone(), embedder),
            ledger: PredictionLedger::new(pool.clone()),
            db_path: config.db.path.clone(),
            pool,
        })
    }

    pub fn documents(&self) -> &DocumentStore {
        &self.documents
    }

    pub fn ledger(&self) -> &PredictionLedger {
        &self.ledger
    }

    pub fn db_path(&self) -> &Path {
        &self.db_path
    }

    /// Close the pool, waiting for in-flight queries to finish.
    pub async fn close(self) {
        self.pool.close().await;
    }
}

fn initialization_error(config: &Config, source: anyhow::Error) -> MemoryError {
    error!(path = %config.db.path.display(), error = %source, "failed to initialize memory database");
    MemoryError::Initialization {
        path: config.db.path.display().to_string(),
        source: source.into(),
    }
}
