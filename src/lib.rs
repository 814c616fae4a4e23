//! # Corpus Index
//!
//! A document indexing and retrieval engine for retrieval-augmented tools.
//!
//! Corpus Index turns a directory of PDF, DOCX, PPTX and plain-text files
//! into a persistent vector index that is kept up to date incrementally,
//! and answers similarity queries against it.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────┐   ┌───────────┐   ┌─────────┐   ┌─────────────┐
//! │ Scanner  │──▶│ Extractor │──▶│ Chunker │──▶│  Embedding  │
//! │ walkdir  │   │ pdf/ooxml │   │ windows │   │   Gateway   │
//! └──────────┘   └───────────┘   └─────────┘   └──────┬──────┘
//!       ▲                                             ▼
//! ┌─────┴──────┐  mtime diff   ┌─────────┐   ┌─────────────┐
//! │  Indexing  │◀─────────────▶│ Catalog │   │ VectorIndex │
//! │ Controller │──────────────────────────────▶ (RwLock)    │
//! └────────────┘               └─────────┘   └─────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! cidx init                       # index the corpus
//! cidx refresh                    # pick up changed files
//! cidx search "project milestones" --limit 3
//! cidx stats
//! cidx validate
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`error`] | Error taxonomy |
//! | [`models`] | Core data types |
//! | [`scan`] | Corpus walker |
//! | [`extract`] | PDF/DOCX/PPTX/text extraction |
//! | [`chunk`] | Character-window chunking |
//! | [`embedding`] | Embedding gateway abstraction |
//! | [`vector_index`] | Cosine search and durable storage |
//! | [`catalog`] | Per-document processing ledger |
//! | [`indexer`] | Indexing controller |
//! | [`persist`] | Atomic file replacement |
//! | [`ingest`], [`search`], [`stats`] | CLI command handlers |

pub mod catalog;
pub mod chunk;
pub mod config;
pub mod embedding;
pub mod error;
pub mod extract;
pub mod indexer;
pub mod ingest;
pub mod models;
pub mod persist;
pub mod scan;
pub mod search;
pub mod stats;
pub mod vector_index;

pub use error::{IndexError, Result};
pub use indexer::{render_context, IndexingController, RunReport, Stats, ValidationReport};
