//! Indexing controller: keeps the vector index consistent with the corpus.
//!
//! A run walks the corpus (`Scanning`), classifies every file against the
//! catalog (`Diffing`), and reprocesses each new or modified file
//! (`Processing`): extract → chunk → embed → replace its chunks in the
//! index → persist the index → record the file in the catalog → persist
//! the catalog. Files that vanished from the corpus are pruned first.
//!
//! # Failure policy
//!
//! Extraction and embedding failures only affect the document at hand: it
//! is logged, keeps whatever chunks and catalog entry it had, and is
//! retried on the next refresh. Configuration and corruption errors abort
//! the run and are recorded so [`IndexingController::stats`] and
//! [`IndexingController::validate`] can show them.
//!
//! # Locking
//!
//! - `run_lock` serializes every mutating operation (runs, reindex,
//!   remove, clear).
//! - The index sits behind a reader/writer lock. Searches share it; a
//!   document commit holds it exclusively while swapping that document's
//!   chunks, then downgrades to a read guard while the index is encoded.
//!   File writes run on the blocking pool.
//! - The catalog has its own lock.
//!
//! Additions write the index before the catalog; deletions write the
//! catalog before the index. A crash between the two writes leaves the
//! catalog entry stale or missing, never current. Diffing also reprocesses
//! any file whose recorded chunk count disagrees with the index, which
//! covers a lost or replaced index file.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{Mutex, RwLock};

use crate::catalog::{classify, Catalog, Change};
use crate::chunk::{ChunkParams, Chunker, DocumentText};
use crate::config::Config;
use crate::embedding::{embed_in_batches, embed_query, EmbeddingGateway};
use crate::error::{IndexError, Result};
use crate::extract::extract_file;
use crate::models::{CatalogEntry, Chunk, SearchHit, SourceDocument, SourceFormat};
use crate::persist;
use crate::scan;
use crate::vector_index::VectorIndex;

/// Where the controller is in its run cycle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", content = "document", rename_all = "snake_case")]
pub enum ControllerState {
    Idle,
    Scanning,
    Diffing,
    Processing(String),
    Failed(String),
    Committing,
}

impl std::fmt::Display for ControllerState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ControllerState::Idle => write!(f, "idle"),
            ControllerState::Scanning => write!(f, "scanning"),
            ControllerState::Diffing => write!(f, "diffing"),
            ControllerState::Processing(doc) => write!(f, "processing({})", doc),
            ControllerState::Failed(doc) => write!(f, "failed({})", doc),
            ControllerState::Committing => write!(f, "committing"),
        }
    }
}

/// A document that could not be processed during a run.
#[derive(Debug, Clone, Serialize)]
pub struct DocumentFailure {
    pub path: String,
    pub error: String,
}

/// Summary of one indexing run.
#[derive(Debug, Clone, Default, Serialize)]
pub struct RunReport {
    pub documents_found: usize,
    pub documents_processed: usize,
    pub documents_unchanged: usize,
    pub documents_failed: usize,
    pub documents_removed: usize,
    pub chunks_written: usize,
    pub failures: Vec<DocumentFailure>,
    pub elapsed_ms: u128,
}

/// Aggregate index statistics.
#[derive(Debug, Clone, Serialize)]
pub struct Stats {
    pub state: String,
    pub documents: usize,
    pub chunks: usize,
    /// New, modified or vanished files. `None` when the corpus could not be scanned.
    pub stale_documents: Option<usize>,
    pub documents_by_format: BTreeMap<String, usize>,
    pub chunks_by_source: BTreeMap<String, usize>,
    pub embedding_model: Option<String>,
    pub embedding_dims: Option<usize>,
    pub index_size_bytes: Option<u64>,
    pub last_processed_at: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
}

/// Result of checking the index/catalog invariant.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ValidationReport {
    /// Violations that indicate corruption.
    pub corruption: Vec<String>,
    /// Documents that are out of date and will be reprocessed by the next refresh.
    pub stale: Vec<String>,
    pub warnings: Vec<String>,
    pub last_error: Option<String>,
}

impl ValidationReport {
    pub fn is_consistent(&self) -> bool {
        self.corruption.is_empty()
    }
}

#[derive(Debug)]
struct Status {
    state: ControllerState,
    last_error: Option<String>,
}

pub struct IndexingController {
    config: Config,
    chunker: Chunker,
    gateway: Arc<dyn EmbeddingGateway>,
    index: RwLock<VectorIndex>,
    catalog: Mutex<Catalog>,
    run_lock: Mutex<()>,
    status: std::sync::Mutex<Status>,
}

impl IndexingController {
    /// Load persisted state for `config` and bind it to `gateway`.
    ///
    /// A corrupt index or catalog is discarded (both files are removed and
    /// the next run rebuilds from the corpus). An index built with a
    /// different embedding model or dimension is a configuration error and
    /// leaves the files untouched.
    pub fn open(config: Config, gateway: Arc<dyn EmbeddingGateway>) -> Result<Self> {
        config.validate()?;
        let params = ChunkParams::new(config.chunking.chunk_size, config.chunking.chunk_overlap)?;

        let vectors_path = config.index.vectors_path();
        let catalog_path = config.index.catalog_path();

        let mut last_error = None;
        let loaded = VectorIndex::load(&vectors_path).and_then(|index| {
            let catalog = Catalog::load(&catalog_path)?;
            Ok((index.unwrap_or_default(), catalog))
        });
        let (index, catalog) = match loaded {
            Ok(state) => state,
            Err(IndexError::IndexCorruption(msg)) => {
                tracing::warn!(error = %msg, "discarding corrupt index state; it will be rebuilt from the corpus");
                persist::remove_if_exists(&catalog_path)?;
                persist::remove_if_exists(&vectors_path)?;
                last_error = Some(format!("index corruption: {}", msg));
                (VectorIndex::new(), Catalog::new())
            }
            Err(e) => return Err(e),
        };

        // A disabled gateway has no identity; searches fail per call instead.
        if gateway.dims() > 0 {
            index.check_identity(gateway.model_name(), gateway.dims())?;
        }

        tracing::debug!(
            chunks = index.len(),
            documents = catalog.len(),
            model = gateway.model_name(),
            "index opened"
        );

        Ok(Self {
            config,
            chunker: Chunker::new(params),
            gateway,
            index: RwLock::new(index),
            catalog: Mutex::new(catalog),
            run_lock: Mutex::new(()),
            status: std::sync::Mutex::new(Status {
                state: ControllerState::Idle,
                last_error,
            }),
        })
    }

    /// Remove the persisted index and catalog without loading them.
    ///
    /// Works even when the stored index was built with another model.
    pub fn reset_state(config: &Config) -> Result<()> {
        persist::remove_if_exists(&config.index.catalog_path())?;
        persist::remove_if_exists(&config.index.vectors_path())?;
        Ok(())
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn state(&self) -> ControllerState {
        self.status().state.clone()
    }

    pub fn last_error(&self) -> Option<String> {
        self.status().last_error.clone()
    }

    /// Full scan: process every file that is not already current.
    pub async fn initialize(&self) -> Result<RunReport> {
        self.run("initialize").await
    }

    /// Incremental scan. A no-op for files whose mtime is unchanged.
    pub async fn refresh(&self) -> Result<RunReport> {
        self.run("refresh").await
    }

    async fn run(&self, label: &str) -> Result<RunReport> {
        let _guard = self.run_lock.lock().await;
        let started = Instant::now();
        tracing::info!(run = label, root = %self.config.corpus.root.display(), "indexing run started");

        let result = self.run_locked().await;
        self.set_state(ControllerState::Idle);

        match result {
            Ok(mut report) => {
                report.elapsed_ms = started.elapsed().as_millis();
                self.status().last_error = None;
                tracing::info!(
                    run = label,
                    found = report.documents_found,
                    processed = report.documents_processed,
                    unchanged = report.documents_unchanged,
                    failed = report.documents_failed,
                    removed = report.documents_removed,
                    chunks = report.chunks_written,
                    elapsed_ms = report.elapsed_ms as u64,
                    "indexing run finished"
                );
                Ok(report)
            }
            Err(e) => {
                tracing::error!(run = label, error = %e, "indexing run aborted");
                self.record_fatal(&e);
                Err(e)
            }
        }
    }

    async fn run_locked(&self) -> Result<RunReport> {
        self.set_state(ControllerState::Scanning);
        let scan = scan::scan_corpus(&self.config)?;
        let docs = &scan.documents;

        self.set_state(ControllerState::Diffing);
        let mut report = RunReport {
            documents_found: docs.len(),
            ..RunReport::default()
        };
        let (pending, vanished) = {
            let catalog = self.catalog.lock().await;
            let index = self.index.read().await;
            let counts = index.chunk_counts_by_source();

            let mut pending = Vec::new();
            for doc in docs {
                let entry = catalog.get(&doc.key);
                match classify(entry, doc.modified_at) {
                    Change::Unchanged if !count_matches(entry, &counts, &doc.key) => {
                        tracing::warn!(path = %doc.key, "catalog disagrees with the index; reprocessing");
                        pending.push(doc);
                    }
                    Change::Unchanged => report.documents_unchanged += 1,
                    change => {
                        tracing::debug!(path = %doc.key, ?change, "document out of date");
                        pending.push(doc);
                    }
                }
            }

            let present: BTreeSet<&str> = docs.iter().map(|d| d.key.as_str()).collect();
            let known: BTreeSet<String> = catalog
                .iter()
                .map(|(path, _)| path.clone())
                .chain(counts.into_keys())
                .collect();
            let mut vanished = Vec::new();
            for path in known.into_iter().filter(|p| !present.contains(p.as_str())) {
                if scan.may_hide(&path) {
                    tracing::warn!(path = %path, "not pruning document below an unreadable corpus entry");
                } else {
                    vanished.push(path);
                }
            }
            (pending, vanished)
        };

        for path in &vanished {
            tracing::info!(path = %path, "pruning document no longer in corpus");
            self.remove_locked(path).await?;
            report.documents_removed += 1;
        }

        for doc in pending {
            self.set_state(ControllerState::Processing(doc.key.clone()));
            match self.process_document(doc).await {
                Ok(chunks) => {
                    report.documents_processed += 1;
                    report.chunks_written += chunks;
                }
                Err(e) if e.is_document_level() => {
                    self.set_state(ControllerState::Failed(doc.key.clone()));
                    tracing::warn!(path = %doc.key, error = %e, "document skipped; it stays stale");
                    report.documents_failed += 1;
                    report.failures.push(DocumentFailure {
                        path: doc.key.clone(),
                        error: e.to_string(),
                    });
                }
                Err(e) => return Err(e),
            }
        }

        self.set_state(ControllerState::Committing);
        Ok(report)
    }

    /// Extract, chunk, embed and commit one document. Returns the number of
    /// chunks written.
    async fn process_document(&self, doc: &SourceDocument) -> Result<usize> {
        let units = extract_file(&doc.path, doc.format)?;
        let text = DocumentText::from_units(&units);
        let chunks: Vec<Chunk> = self.chunker.chunks(&text, &doc.key).collect();
        let texts: Vec<String> = chunks.iter().map(|c| c.text.clone()).collect();

        let emb = &self.config.embedding;
        let embeddings = embed_in_batches(
            self.gateway.as_ref(),
            &texts,
            emb.batch_size,
            emb.concurrency,
            Duration::from_secs(emb.timeout_secs),
        )
        .await?;

        let count = chunks.len();
        self.commit_document(doc, chunks, embeddings).await?;
        tracing::info!(path = %doc.key, format = doc.format.as_str(), chunks = count, "document indexed");
        Ok(count)
    }

    /// Swap a document's chunks in the index, persist the index, then
    /// record and persist the catalog entry.
    async fn commit_document(
        &self,
        doc: &SourceDocument,
        chunks: Vec<Chunk>,
        embeddings: Vec<Vec<f32>>,
    ) -> Result<()> {
        {
            let mut index = self.index.write().await;
            if !chunks.is_empty() {
                index.check_identity(self.gateway.model_name(), self.gateway.dims())?;
            }
            index.remove(&doc.key);
            index.insert(self.gateway.model_name(), chunks.clone(), embeddings)?;
            let bytes = index.downgrade().encode()?;
            write_state(self.config.index.vectors_path(), bytes).await?;
        }

        let mut catalog = self.catalog.lock().await;
        catalog.put(
            doc.key.clone(),
            CatalogEntry {
                last_processed_mtime: doc.modified_at,
                chunk_count: chunks.len(),
                processed_at: Utc::now(),
            },
        );
        write_state(self.config.index.catalog_path(), catalog.encode()?).await?;
        Ok(())
    }

    /// Drop a path from the catalog and then the index, persisting both.
    /// Returns whether anything was removed.
    async fn remove_locked(&self, key: &str) -> Result<bool> {
        let mut catalog = self.catalog.lock().await;
        let had_entry = catalog.remove(key).is_some();
        if had_entry {
            write_state(self.config.index.catalog_path(), catalog.encode()?).await?;
        }
        drop(catalog);

        let mut index = self.index.write().await;
        let removed_chunks = index.remove(key);
        if removed_chunks > 0 {
            let bytes = index.downgrade().encode()?;
            write_state(self.config.index.vectors_path(), bytes).await?;
        }
        Ok(removed_chunks > 0 || had_entry)
    }

    /// Reprocess one corpus file regardless of its mtime. A path that no
    /// longer exists is removed instead.
    pub async fn reindex_document(&self, path: &Path) -> Result<RunReport> {
        let _guard = self.run_lock.lock().await;
        let started = Instant::now();
        let mut report = RunReport::default();

        let result = async {
            match scan::scan_one(&self.config, path)? {
                Some(doc) => {
                    report.documents_found = 1;
                    self.set_state(ControllerState::Processing(doc.key.clone()));
                    match self.process_document(&doc).await {
                        Ok(chunks) => {
                            report.documents_processed = 1;
                            report.chunks_written = chunks;
                        }
                        Err(e) if e.is_document_level() => {
                            tracing::warn!(path = %doc.key, error = %e, "reindex failed; document stays stale");
                            report.documents_failed = 1;
                            report.failures.push(DocumentFailure {
                                path: doc.key.clone(),
                                error: e.to_string(),
                            });
                        }
                        Err(e) => return Err(e),
                    }
                }
                None => {
                    let key = self.key_for(path)?;
                    if self.remove_locked(&key).await? {
                        report.documents_removed = 1;
                    }
                }
            }
            Ok::<(), IndexError>(())
        }
        .await;

        self.set_state(ControllerState::Idle);
        if let Err(e) = result {
            self.record_fatal(&e);
            return Err(e);
        }
        report.elapsed_ms = started.elapsed().as_millis();
        Ok(report)
    }

    /// Drop one document's chunks and catalog entry.
    pub async fn remove_document(&self, path: &Path) -> Result<bool> {
        let _guard = self.run_lock.lock().await;
        let key = self.key_for(path)?;
        let removed = self.remove_locked(&key).await?;
        if removed {
            tracing::info!(path = %key, "document removed from index");
        }
        Ok(removed)
    }

    /// Empty the index and the catalog and persist both.
    pub async fn clear(&self) -> Result<()> {
        let _guard = self.run_lock.lock().await;
        {
            let mut catalog = self.catalog.lock().await;
            catalog.clear();
            write_state(self.config.index.catalog_path(), catalog.encode()?).await?;
        }
        let mut index = self.index.write().await;
        index.clear();
        let bytes = index.downgrade().encode()?;
        write_state(self.config.index.vectors_path(), bytes).await?;
        self.status().last_error = None;
        tracing::info!("index cleared");
        Ok(())
    }

    /// Embed `query` and return the closest chunks. `max_results` and
    /// `min_score` default to the `[retrieval]` settings.
    pub async fn search(
        &self,
        query: &str,
        max_results: Option<usize>,
        min_score: Option<f32>,
    ) -> Result<Vec<SearchHit>> {
        let max_results = max_results.unwrap_or(self.config.retrieval.max_results);
        let min_score = min_score.unwrap_or(self.config.retrieval.min_score);

        if query.trim().is_empty() || self.index.read().await.is_empty() {
            return Ok(Vec::new());
        }

        let embedding = embed_query(
            self.gateway.as_ref(),
            query,
            Duration::from_secs(self.config.embedding.timeout_secs),
        )
        .await?;

        let index = self.index.read().await;
        let hits = index.search(&embedding, max_results, min_score)?;
        tracing::debug!(hits = hits.len(), max_results, min_score, "search complete");
        Ok(hits)
    }

    /// Look up an indexed chunk by id.
    pub async fn chunk(&self, chunk_id: &str) -> Option<Chunk> {
        self.index.read().await.get(chunk_id).cloned()
    }

    /// Catalog entry for a corpus path, if it has been processed.
    pub async fn catalog_entry(&self, key: &str) -> Option<CatalogEntry> {
        self.catalog.lock().await.get(key).cloned()
    }

    pub async fn stats(&self) -> Stats {
        let (documents, documents_by_format, last_processed_at, catalog) = {
            let catalog = self.catalog.lock().await;
            let mut by_format = BTreeMap::new();
            for (path, _) in catalog.iter() {
                let format = SourceFormat::from_path(Path::new(path))
                    .map(|f| f.as_str())
                    .unwrap_or("unknown");
                *by_format.entry(format.to_string()).or_insert(0) += 1;
            }
            (
                catalog.len(),
                by_format,
                catalog.last_processed_at(),
                catalog.clone(),
            )
        };

        let (chunks, chunks_by_source, identity) = {
            let index = self.index.read().await;
            (
                index.len(),
                index.chunk_counts_by_source(),
                index.identity().cloned(),
            )
        };

        let stale_documents = match scan::scan_corpus(&self.config) {
            Ok(scan) => {
                let docs = &scan.documents;
                let present: BTreeSet<&str> = docs.iter().map(|d| d.key.as_str()).collect();
                let out_of_date = docs
                    .iter()
                    .filter(|d| {
                        let entry = catalog.get(&d.key);
                        classify(entry, d.modified_at).needs_processing()
                            || !count_matches(entry, &chunks_by_source, &d.key)
                    })
                    .count();
                let vanished = catalog
                    .iter()
                    .filter(|(path, _)| !present.contains(path.as_str()) && !scan.may_hide(path))
                    .count();
                Some(out_of_date + vanished)
            }
            Err(e) => {
                tracing::warn!(error = %e, "cannot scan corpus for stats");
                None
            }
        };

        let index_size_bytes = std::fs::metadata(self.config.index.vectors_path())
            .ok()
            .map(|m| m.len());

        Stats {
            state: self.state().to_string(),
            documents,
            chunks,
            stale_documents,
            documents_by_format,
            chunks_by_source,
            embedding_model: identity.as_ref().map(|id| id.model.clone()),
            embedding_dims: identity.map(|id| id.dims),
            index_size_bytes,
            last_processed_at,
            last_error: self.last_error(),
        }
    }

    /// Check the index/catalog invariant without failing.
    ///
    /// Every catalog entry whose file is current must own exactly
    /// `chunk_count` chunks, and the index must be internally consistent.
    /// Out-of-date entries and chunks without a catalog entry are reported
    /// as stale, not corrupt: the write order leaves them behind after an
    /// interrupted run and the next refresh replaces them.
    pub async fn validate(&self) -> ValidationReport {
        let mut report = ValidationReport {
            last_error: self.last_error(),
            ..ValidationReport::default()
        };

        let current: Option<BTreeMap<String, DateTime<Utc>>> = match scan::scan_corpus(&self.config) {
            Ok(scan) => {
                for key in &scan.unreadable {
                    report
                        .warnings
                        .push(format!("corpus entry unreadable, staleness below it unknown: {}", key));
                }
                Some(scan.documents.into_iter().map(|d| (d.key, d.modified_at)).collect())
            }
            Err(e) => {
                report
                    .warnings
                    .push(format!("corpus not scanned, staleness unknown: {}", e));
                None
            }
        };

        let catalog = self.catalog.lock().await;
        let index = self.index.read().await;
        report.corruption.extend(index.consistency_issues());

        let counts = index.chunk_counts_by_source();
        for (path, entry) in catalog.iter() {
            let stale = match &current {
                Some(files) => match files.get(path) {
                    Some(mtime) => classify(Some(entry), *mtime).needs_processing(),
                    None => true,
                },
                None => false,
            };
            if stale {
                report.stale.push(path.clone());
                continue;
            }
            let indexed = counts.get(path).copied().unwrap_or(0);
            if indexed != entry.chunk_count {
                report.corruption.push(format!(
                    "{}: catalog records {} chunks, index holds {}",
                    path, entry.chunk_count, indexed
                ));
            }
        }

        for path in counts.keys().filter(|p| catalog.get(p).is_none()) {
            report.stale.push(path.clone());
        }
        if let Some(files) = &current {
            for path in files.keys().filter(|p| catalog.get(p).is_none()) {
                if !counts.contains_key(path) {
                    report.stale.push(path.clone());
                }
            }
        }
        report.stale.sort();
        report.stale.dedup();

        if !report.corruption.is_empty() {
            tracing::warn!(issues = report.corruption.len(), "index validation found corruption");
        }
        report
    }

    fn key_for(&self, path: &Path) -> Result<String> {
        let root = &self.config.corpus.root;
        let relative = if path.is_absolute() {
            path.strip_prefix(root).map_err(|_| {
                IndexError::Configuration(format!(
                    "{} is not inside the corpus root {}",
                    path.display(),
                    root.display()
                ))
            })?
        } else {
            path
        };
        Ok(scan::relative_key(relative))
    }

    fn status(&self) -> std::sync::MutexGuard<'_, Status> {
        self.status.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn set_state(&self, state: ControllerState) {
        self.status().state = state;
    }

    fn record_fatal(&self, e: &IndexError) {
        if !e.is_document_level() {
            self.status().last_error = Some(e.to_string());
        }
    }
}

/// Whether a catalog entry agrees with the chunks the index holds for `key`.
fn count_matches(entry: Option<&CatalogEntry>, counts: &BTreeMap<String, usize>, key: &str) -> bool {
    match entry {
        Some(entry) => counts.get(key).copied().unwrap_or(0) == entry.chunk_count,
        None => true,
    }
}

/// Write a state file on the blocking pool.
async fn write_state(path: PathBuf, bytes: Vec<u8>) -> Result<()> {
    tokio::task::spawn_blocking(move || persist::write_atomic(&path, &bytes))
        .await
        .map_err(std::io::Error::other)??;
    Ok(())
}

/// Join search hits into one prompt-ready context block.
///
/// Each hit gets a `[Source: path, Page N, Score: x.xxx]` header; hits are
/// separated by `---` lines. No hits gives an empty string.
pub fn render_context(hits: &[SearchHit]) -> String {
    hits.iter()
        .map(|hit| {
            let mut header = format!("[Source: {}", hit.chunk.source_path);
            if let Some(page) = hit.chunk.page_or_slide {
                header.push_str(&format!(", Page {}", page));
            }
            header.push_str(&format!(", Score: {:.3}]", hit.score));
            format!("{}\n{}", header, hit.chunk.text)
        })
        .collect::<Vec<_>>()
        .join("\n\n---\n\n")
}
