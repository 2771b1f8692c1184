//! # Market Memory
//!
//! **Semantic document memory and prediction ledger for a market-intelligence
//! pipeline.**
//!
//! Upstream producers push processed transcripts and reports into the
//! [`documents::DocumentStore`] and log directional calls in the
//! [`ledger::PredictionLedger`]. Downstream consumers pull semantic context
//! for their reasoning prompts and periodically score past calls against the
//! realized market outcome.
//!
//! ## Architecture
//!
//! ```text
//! ┌────────────┐  store()   ┌───────────────┐  embed   ┌─────────────┐
//! │ Producers  │──────────▶│ DocumentStore │◀────────▶│  Embedding   │
//! │ transcripts│           └──────┬────────┘          │  provider    │
//! │ analyses   │  record()  ┌─────┴─────────┐         └─────────────┘
//! │            │──────────▶│ PredictionLedger│
//! └────────────┘           └──────┬────────┘
//!                                 ▼
//!                       ┌──────────────────┐
//!                       │ SQLite (WAL)     │
//!                       │ documents        │
//!                       │ predictions      │
//!                       └──────────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! mm init
//! mm store "FED maintains rates; BTC ETF inflows surge" --source-id yt-123 --source youtube
//! mm query "ETF inflows" --limit 3
//! mm predict "Institutional demand keeps BTC bid" --direction LONG --timeframe 1d
//! mm score --outcome UP --since 2026-02-01
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing and validation |
//! | [`models`] | Documents, metadata, predictions, directions, outcomes |
//! | [`error`] | `MemoryError` taxonomy |
//! | [`contracts`] | Validated sentiment-analysis and signal payloads |
//! | [`embedding`] | Embedding provider trait, implementations, vector utilities |
//! | [`documents`] | Idempotent document store with similarity retrieval |
//! | [`ledger`] | Prediction ledger and scoring engine |
//! | [`memory`] | Shared database handle owning both stores |
//! | [`stats`] | Counts and lifetime accuracy |
//! | [`commands`] | CLI command implementations |
//! | [`db`] | SQLite connection pool with WAL mode |
//! | [`migrate`] | Database schema migrations (idempotent) |

pub mod commands;
pub mod config;
pub mod contracts;
pub mod db;
pub mod documents;
pub mod embedding;
pub mod error;
pub mod ledger;
pub mod memory;
pub mod migrate;
pub mod models;
pub mod stats;

pub use contracts::{ContractError, MarketSentimentPayload, SentimentPayload};
pub use documents::DocumentStore;
pub use error::{MemoryError, MemoryResult};
pub use ledger::{PredictionLedger, ScoreReport};
pub use memory::Memory;
pub use models::{Direction, DocumentMetadata, MarketOutcome, PredictionRecord};
