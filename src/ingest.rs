//! Mutating CLI commands: `init`, `refresh`, `reindex`, `remove`, `clear`.
//!
//! Each command drives the [`IndexingController`] and prints a short
//! summary to stdout. Per-document failures are listed but do not fail the
//! command; configuration and corruption errors do.

use anyhow::Result;
use std::path::Path;

use crate::config::Config;
use crate::indexer::{IndexingController, RunReport};

pub async fn run_init(controller: &IndexingController, json: bool) -> Result<()> {
    let report = controller.initialize().await?;
    print_report("init", controller, &report, json)
}

pub async fn run_refresh(controller: &IndexingController, json: bool) -> Result<()> {
    let report = controller.refresh().await?;
    print_report("refresh", controller, &report, json)
}

pub async fn run_reindex(controller: &IndexingController, path: &Path, json: bool) -> Result<()> {
    let report = controller.reindex_document(path).await?;
    print_report("reindex", controller, &report, json)
}

pub async fn run_remove(controller: &IndexingController, path: &Path) -> Result<()> {
    if controller.remove_document(path).await? {
        println!("removed {}", path.display());
    } else {
        println!("{} was not indexed", path.display());
    }
    Ok(())
}

/// Delete the persisted state without loading it, so a model change or a
/// damaged index can always be recovered from.
pub fn run_clear(config: &Config) -> Result<()> {
    IndexingController::reset_state(config)?;
    println!("cleared {}", config.index.dir.display());
    Ok(())
}

fn print_report(
    label: &str,
    controller: &IndexingController,
    report: &RunReport,
    json: bool,
) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(report)?);
        return Ok(());
    }

    println!("{} {}", label, controller.config().corpus.root.display());
    println!("  documents found: {}", report.documents_found);
    println!("  processed: {}", report.documents_processed);
    println!("  unchanged: {}", report.documents_unchanged);
    println!("  removed: {}", report.documents_removed);
    println!("  failed: {}", report.documents_failed);
    println!("  chunks written: {}", report.chunks_written);
    for failure in &report.failures {
        println!("    {}: {}", failure.path, failure.error);
    }
    println!("  elapsed: {} ms", report.elapsed_ms);
    println!("ok");
    Ok(())
}
