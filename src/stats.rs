//! Index statistics and validation output for `cidx stats` / `cidx validate`.
//!
//! Gives a quick summary of what is indexed: document and chunk counts,
//! staleness, the embedding model the index is bound to, and per-format and
//! per-source breakdowns.

use anyhow::{bail, Result};
use chrono::{DateTime, Utc};

use crate::indexer::{IndexingController, Stats, ValidationReport};

/// Run the stats command: collect statistics and print a summary.
pub async fn run_stats(controller: &IndexingController, json: bool) -> Result<()> {
    let stats = controller.stats().await;
    if json {
        println!("{}", serde_json::to_string_pretty(&stats)?);
    } else {
        print_stats(controller, &stats);
    }
    Ok(())
}

fn print_stats(controller: &IndexingController, stats: &Stats) {
    let config = controller.config();

    println!("Corpus Index: Stats");
    println!("===================");
    println!();
    println!("  Corpus:      {}", config.corpus.root.display());
    println!("  Index:       {}", config.index.vectors_path().display());
    println!(
        "  Size:        {}",
        stats
            .index_size_bytes
            .map(format_bytes)
            .unwrap_or_else(|| "not written".to_string())
    );
    println!("  State:       {}", stats.state);
    println!();
    println!("  Documents:   {}", stats.documents);
    println!("  Chunks:      {}", stats.chunks);
    println!(
        "  Stale:       {}",
        stats
            .stale_documents
            .map(|n| n.to_string())
            .unwrap_or_else(|| "unknown".to_string())
    );
    match (&stats.embedding_model, stats.embedding_dims) {
        (Some(model), Some(dims)) => println!("  Model:       {} ({} dims)", model, dims),
        _ => println!("  Model:       none"),
    }
    println!(
        "  Last run:    {}",
        stats
            .last_processed_at
            .map(format_relative)
            .unwrap_or_else(|| "never".to_string())
    );
    if let Some(err) = &stats.last_error {
        println!("  Last error:  {}", err);
    }

    if !stats.documents_by_format.is_empty() {
        println!();
        println!("  By format:");
        for (format, count) in &stats.documents_by_format {
            println!("    {:<8} {:>6}", format, count);
        }
    }

    if !stats.chunks_by_source.is_empty() {
        println!();
        println!("  {:<48} {:>8}", "SOURCE", "CHUNKS");
        println!("  {}", "-".repeat(57));
        for (source, count) in &stats.chunks_by_source {
            println!("  {:<48} {:>8}", source, count);
        }
    }

    println!();
}

/// Run the validate command. Fails when the index is corrupt.
pub async fn run_validate(controller: &IndexingController, json: bool) -> Result<()> {
    let report = controller.validate().await;
    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        print_validation(&report);
    }
    if !report.is_consistent() {
        bail!(
            "index validation found {} problem(s); run `cidx clear` and `cidx init` to rebuild",
            report.corruption.len()
        );
    }
    Ok(())
}

fn print_validation(report: &ValidationReport) {
    if let Some(err) = &report.last_error {
        println!("last error: {}", err);
    }
    for warning in &report.warnings {
        println!("warning: {}", warning);
    }
    for issue in &report.corruption {
        println!("corrupt: {}", issue);
    }
    for path in &report.stale {
        println!("stale: {}", path);
    }
    if report.is_consistent() {
        println!("ok ({} stale)", report.stale.len());
    }
}

/// Format a byte count as a human-readable string.
pub fn format_bytes(bytes: u64) -> String {
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

/// Format a timestamp relative to now (e.g. "3 hours ago").
fn format_relative(ts: DateTime<Utc>) -> String {
    let delta = (Utc::now() - ts).num_seconds();

    if delta < 0 {
        return ts.format("%Y-%m-%d %H:%M").to_string();
    }

    if delta < 60 {
        "just now".to_string()
    } else if delta < 3600 {
        let mins = delta / 60;
        format!("{} min{} ago", mins, if mins == 1 { "" } else { "s" })
    } else if delta < 86400 {
        let hours = delta / 3600;
        format!("{} hour{} ago", hours, if hours == 1 { "" } else { "s" })
    } else if delta < 86400 * 30 {
        let days = delta / 86400;
        format!("{} day{} ago", days, if days == 1 { "" } else { "s" })
    } else {
        ts.format("%Y-%m-%d %H:%M").to_string()
    }
}
