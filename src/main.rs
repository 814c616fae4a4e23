//! # Corpus Index CLI (`cidx`)
//!
//! Builds and queries a vector index over a directory of documents.
//!
//! ## Usage
//!
//! ```bash
//! cidx --config ./config/cidx.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `cidx init` | Index every file in the corpus that is not already current |
//! | `cidx refresh` | Reprocess new and modified files, prune deleted ones |
//! | `cidx search "<query>"` | Similarity search over indexed chunks |
//! | `cidx stats` | Document, chunk and staleness summary |
//! | `cidx validate` | Check index/catalog consistency |
//! | `cidx reindex <path>` | Force reprocessing of one file |
//! | `cidx remove <path>` | Drop one file from the index |
//! | `cidx clear` | Delete the persisted index and catalog |

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

use corpus_index::config;
use corpus_index::embedding::create_gateway;
use corpus_index::{ingest, search, stats, IndexingController};

/// Corpus Index: incremental document indexing and similarity search.
///
/// All commands accept a `--config` flag pointing to a TOML configuration
/// file. See `config/cidx.example.toml` for a full example.
#[derive(Parser)]
#[command(name = "cidx", version, about = "Incremental document indexing and similarity search")]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/cidx.toml")]
    config: PathBuf,

    /// Log filter (e.g. `debug`, `corpus_index=trace`). Overrides `RUST_LOG`.
    #[arg(long, global = true)]
    log_level: Option<String>,

    /// Print machine-readable JSON instead of text.
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Index the whole corpus.
    ///
    /// Files already indexed at their current modification time are skipped,
    /// so running it again is safe.
    Init,

    /// Incrementally update the index.
    ///
    /// Reprocesses new and modified files and prunes files that no longer exist.
    Refresh,

    /// Search indexed chunks.
    Search {
        /// The search query string.
        query: String,

        /// Maximum number of results (default: `retrieval.max_results`).
        #[arg(long)]
        limit: Option<usize>,

        /// Minimum cosine score (default: `retrieval.min_score`).
        #[arg(long, allow_negative_numbers = true)]
        min_score: Option<f32>,

        /// Print hits as one prompt-ready context block.
        #[arg(long)]
        context: bool,
    },

    /// Show index statistics.
    Stats,

    /// Check that the index and catalog agree. Exits non-zero on corruption.
    Validate,

    /// Reprocess one file regardless of its modification time.
    Reindex {
        /// File path, relative to the corpus root or absolute.
        path: PathBuf,
    },

    /// Remove one file's chunks and catalog entry.
    Remove {
        /// File path, relative to the corpus root or absolute.
        path: PathBuf,
    },

    /// Delete the persisted index and catalog.
    ///
    /// Use after changing the embedding model; the next `init` rebuilds.
    Clear,
}

fn init_tracing(level: Option<&str>) {
    let env_filter = match level {
        Some(level) => EnvFilter::new(level),
        None => EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
    };

    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.log_level.as_deref());

    let cfg = config::load_config(&cli.config)?;

    // Runs without opening the index so a model mismatch can be recovered from.
    if let Commands::Clear = cli.command {
        return ingest::run_clear(&cfg);
    }

    let gateway = create_gateway(&cfg.embedding)?;
    let controller = IndexingController::open(cfg, gateway)?;

    match cli.command {
        Commands::Init => ingest::run_init(&controller, cli.json).await?,
        Commands::Refresh => ingest::run_refresh(&controller, cli.json).await?,
        Commands::Search {
            query,
            limit,
            min_score,
            context,
        } => search::run_search(&controller, &query, limit, min_score, context, cli.json).await?,
        Commands::Stats => stats::run_stats(&controller, cli.json).await?,
        Commands::Validate => stats::run_validate(&controller, cli.json).await?,
        Commands::Reindex { path } => ingest::run_reindex(&controller, &path, cli.json).await?,
        Commands::Remove { path } => ingest::run_remove(&controller, &path).await?,
        Commands::Clear => unreachable!("clear runs before the index is opened"),
    }

    Ok(())
}
