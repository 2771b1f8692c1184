//! Database statistics.
//!
//! A quick summary of what's stored: document count, ledger size, and the
//! lifetime accuracy of validated predictions. Used by `mm stats`.

use anyhow::Result;
use serde::Serialize;

use crate::config::Config;
use crate::error::MemoryResult;
use crate::ledger::TrackRecord;
use crate::memory::Memory;

#[derive(Debug, Clone, Serialize)]
pub struct MemoryStats {
    pub documents: i64,
    pub predictions: i64,
    pub track_record: TrackRecord,
    pub db_size_bytes: u64,
}

/// Gather counts from both stores.
pub async fn collect(memory: &Memory) -> MemoryResult<MemoryStats> {
    let documents = memory.documents().count().await?;
    let track_record = memory.ledger().track_record().await?;
    let db_size_bytes = std::fs::metadata(memory.db_path())
        .map(|m| m.len())
        .unwrap_or(0);

    Ok(MemoryStats {
        documents,
        predictions: track_record.pending + track_record.validated,
        track_record,
        db_size_bytes,
    })
}

/// Run the stats command: query the database and print a summary.
pub async fn run_stats(config: &Config) -> Result<()> {
    let memory = Memory::open(config).await?;
    let stats = collect(&memory).await;
    memory.close().await;
    let stats = stats?;

    println!("Market Memory: Database Stats");
    println!("==============================");
    println!();
    println!("  Database:     {}", config.db.path.display());
    println!("  Size:         {}", format_bytes(stats.db_size_bytes));
    println!();
    println!("  Documents:    {}", stats.documents);
    println!("  Predictions:  {}", stats.predictions);
    println!("    pending:    {}", stats.track_record.pending);
    println!("    validated:  {}", stats.track_record.validated);
    println!("    correct:    {}", stats.track_record.correct);
    println!(
        "  Accuracy:     {}",
        format_accuracy(stats.track_record.accuracy)
    );

    if !stats.track_record.by_direction.is_empty() {
        println!();
        println!("  By direction:");
        for d in &stats.track_record.by_direction {
            println!(
                "    {:<6} {:>4} / {:<4} {}",
                d.direction.as_str(),
                d.correct,
                d.validated,
                format_accuracy(d.accuracy)
            );
        }
    }

    Ok(())
}

fn format_accuracy(accuracy: Option<f64>) -> String {
    match accuracy {
        Some(a) => format!("{:.1}%", a * 100.0),
        None => "n/a (nothing validated yet)".to_string(),
    }
}

fn format_bytes(bytes: u64) -> String {
    if bytes < 1024 {
        format!("{} B", bytes)
    } else if bytes < 1024 * 1024 {
        format!("{:.1} KB", bytes as f64 / 1024.0)
    } else if bytes < 1024 * 1024 * 1024 {
        format!("{:.1} MB", bytes as f64 / (1024.0 * 1024.0))
    } else {
        format!("{:.2} GB", bytes as f64 / (1024.0 * 1024.0 * 1024.0))
    }
}
