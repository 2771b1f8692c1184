//! # Market Memory CLI (`mm`)
//!
//! ```bash
//! mm --config ./config/mm.toml <command>
//! ```
//!
//! | Command | Description |
//! |---------|-------------|
//! | `mm init` | Create the SQLite database and run schema migrations |
//! | `mm store "<text>"` | Store a document (idempotent per `--source-id`) |
//! | `mm query "<text>"` | Retrieve the most similar stored documents |
//! | `mm get <id>` | Print a stored document as JSON |
//! | `mm predict "<text>"` | Log a directional prediction |
//! | `mm predictions` | List logged predictions |
//! | `mm score` | Reconcile pending predictions against an outcome |
//! | `mm stats` | Document and prediction counts, lifetime accuracy |
//! | `mm validate` | Validate a sentiment or signal payload |
//!
//! Logs go to stderr; set `MARKET_MEMORY_LOG` (e.g. `debug`) to change the
//! level.

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

use market_memory::commands;
use market_memory::config;
use market_memory::models::DocumentMetadata;
use market_memory::stats;

#[derive(Parser)]
#[command(
    name = "mm",
    about = "Market Memory: semantic document memory and prediction ledger",
    version
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/mm.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize the database schema. Safe to run repeatedly.
    Init,

    /// Store a document. A second store with the same --source-id is a no-op.
    Store {
        /// Document text.
        text: String,

        /// Stable id for the document (e.g. a video or report id).
        #[arg(long)]
        source_id: Option<String>,

        #[arg(long)]
        source: Option<String>,

        #[arg(long)]
        date: Option<String>,

        #[arg(long)]
        author: Option<String>,

        /// Extra metadata as key=value. Repeatable.
        #[arg(long = "meta", value_name = "KEY=VALUE")]
        meta: Vec<String>,
    },

    /// Retrieve stored documents most similar to the query text.
    Query {
        text: String,

        /// Maximum number of results (defaults to retrieval.default_limit).
        #[arg(long)]
        limit: Option<usize>,
    },

    /// Print a stored document as JSON.
    Get { id: String },

    /// Log a directional prediction for later scoring.
    Predict {
        /// Prediction rationale. Not needed with --from-analysis.
        #[arg(required_unless_present = "from_analysis")]
        text: Option<String>,

        /// LONG or SHORT. Not needed with --from-analysis.
        #[arg(long, required_unless_present = "from_analysis")]
        direction: Option<String>,

        /// Horizon label, e.g. 4h or 1d.
        #[arg(long)]
        timeframe: String,

        /// Derive text and direction from a sentiment analysis JSON file.
        #[arg(long, conflicts_with_all = ["text", "direction"])]
        from_analysis: Option<PathBuf>,
    },

    /// List logged predictions, newest first.
    Predictions {
        /// Only show predictions that have not been scored.
        #[arg(long)]
        pending: bool,

        #[arg(long)]
        limit: Option<usize>,
    },

    /// Score pending predictions against a realized outcome.
    Score {
        /// UP, DOWN, or FLAT.
        #[arg(long)]
        outcome: String,

        /// Window start: RFC 3339 timestamp or YYYY-MM-DD.
        #[arg(long)]
        since: String,

        /// Only score predictions whose timeframe horizon has elapsed.
        #[arg(long)]
        matured: bool,
    },

    /// Show document and prediction statistics.
    Stats,

    /// Validate a payload file and print its normalized JSON.
    Validate {
        /// analysis or signal.
        #[arg(long)]
        kind: String,

        path: PathBuf,
    },
}

fn init_tracing() {
    let filter =
        EnvFilter::try_from_env("MARKET_MEMORY_LOG").unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();
    let cli = Cli::parse();

    // Payload validation needs no database.
    if let Commands::Validate { kind, path } = &cli.command {
        return commands::run_validate(kind, path);
    }

    let cfg = config::load_config(&cli.config)?;

    match cli.command {
        Commands::Init => {
            commands::run_init(&cfg).await?;
        }
        Commands::Store {
            text,
            source_id,
            source,
            date,
            author,
            meta,
        } => {
            let mut metadata = DocumentMetadata {
                source_id,
                source,
                date,
                author,
                ..Default::default()
            };
            for pair in &meta {
                let (key, value) = commands::parse_meta_pair(pair)?;
                metadata.extra.insert(key, value);
            }
            commands::run_store(&cfg, &text, metadata).await?;
        }
        Commands::Query { text, limit } => {
            commands::run_query(&cfg, &text, limit).await?;
        }
        Commands::Get { id } => {
            commands::run_get(&cfg, &id).await?;
        }
        Commands::Predict {
            text,
            direction,
            timeframe,
            from_analysis,
        } => {
            commands::run_predict(
                &cfg,
                text.as_deref(),
                direction.as_deref(),
                &timeframe,
                from_analysis.as_deref(),
            )
            .await?;
        }
        Commands::Predictions { pending, limit } => {
            commands::run_predictions(&cfg, pending, limit).await?;
        }
        Commands::Score {
            outcome,
            since,
            matured,
        } => {
            commands::run_score(&cfg, &outcome, &since, matured).await?;
        }
        Commands::Stats => {
            stats::run_stats(&cfg).await?;
        }
        Commands::Validate { .. } => unreachable!("handled before config loading"),
    }

    Ok(())
}
