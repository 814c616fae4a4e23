//! Per-document processing ledger.
//!
//! The catalog maps each corpus path to the modification time it was last
//! indexed at, how many chunks it produced, and when. It is persisted as a
//! flat, pretty-printed JSON object keyed by path so it can be inspected by
//! hand.
//!
//! [`classify`] is the diffing rule: a document is current only when its
//! on-disk mtime equals the recorded one.

use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use std::path::Path;

use crate::error::{IndexError, Result};
use crate::models::CatalogEntry;
use crate::persist;

/// Outcome of comparing a document against its catalog entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Change {
    Unchanged,
    New,
    Modified,
}

impl Change {
    pub fn needs_processing(self) -> bool {
        self != Change::Unchanged
    }
}

/// Classify a document by its catalog entry and current mtime.
pub fn classify(entry: Option<&CatalogEntry>, current_mtime: DateTime<Utc>) -> Change {
    match entry {
        None => Change::New,
        Some(e) if e.last_processed_mtime == current_mtime => Change::Unchanged,
        Some(_) => Change::Modified,
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Catalog {
    entries: BTreeMap<String, CatalogEntry>,
}

impl Catalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, path: &str) -> Option<&CatalogEntry> {
        self.entries.get(path)
    }

    pub fn put(&mut self, path: impl Into<String>, entry: CatalogEntry) {
        self.entries.insert(path.into(), entry);
    }

    pub fn remove(&mut self, path: &str) -> Option<CatalogEntry> {
        self.entries.remove(path)
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &CatalogEntry)> {
        self.entries.iter()
    }

    /// Copy of every entry, ordered by path.
    pub fn snapshot(&self) -> BTreeMap<String, CatalogEntry> {
        self.entries.clone()
    }

    pub fn total_chunks(&self) -> usize {
        self.entries.values().map(|e| e.chunk_count).sum()
    }

    /// Most recent `processed_at` across all entries.
    pub fn last_processed_at(&self) -> Option<DateTime<Utc>> {
        self.entries.values().map(|e| e.processed_at).max()
    }

    /// Load the catalog at `path`. A missing file is an empty catalog; an
    /// unreadable one is reported as corruption.
    pub fn load(path: &Path) -> Result<Self> {
        let content = match std::fs::read(path) {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Self::new()),
            Err(e) => return Err(e.into()),
        };
        let entries = serde_json::from_slice(&content).map_err(|e| {
            IndexError::IndexCorruption(format!("catalog {} is unreadable: {}", path.display(), e))
        })?;
        Ok(Self { entries })
    }

    /// Pretty JSON, as written by [`Catalog::persist`].
    pub fn encode(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec_pretty(&self.entries)?)
    }

    pub fn persist(&self, path: &Path) -> Result<()> {
        persist::write_atomic(path, &self.encode()?)?;
        Ok(())
    }
}
