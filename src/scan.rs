//! Corpus scanner.
//!
//! Walks the corpus root and returns every file that matches the include
//! globs, does not match the exclude globs, and has a supported extension.
//! The index directory is always skipped, as are `.git`, `target` and
//! `node_modules` trees.
//!
//! Results are sorted by key so processing order is deterministic. Entries
//! the walk could not read are reported alongside the documents so callers
//! can tell a vanished file from one that is temporarily out of reach.

use chrono::{DateTime, Utc};
use globset::{Glob, GlobSet, GlobSetBuilder};
use std::path::Path;
use walkdir::WalkDir;

use crate::config::Config;
use crate::error::{IndexError, Result};
use crate::models::{SourceDocument, SourceFormat};

/// Outcome of one corpus walk.
#[derive(Debug, Default)]
pub struct CorpusScan {
    pub documents: Vec<SourceDocument>,
    /// Root-relative keys of entries that could not be read. An empty key
    /// stands for the whole tree.
    pub unreadable: Vec<String>,
}

impl CorpusScan {
    pub fn is_complete(&self) -> bool {
        self.unreadable.is_empty()
    }

    /// Whether `key` is at or below an unreadable entry, so its absence
    /// from `documents` proves nothing.
    pub fn may_hide(&self, key: &str) -> bool {
        self.unreadable.iter().any(|prefix| {
            prefix.is_empty()
                || key == prefix
                || key
                    .strip_prefix(prefix.as_str())
                    .map_or(false, |rest| rest.starts_with('/'))
        })
    }
}

pub fn scan_corpus(config: &Config) -> Result<CorpusScan> {
    let root = &config.corpus.root;
    if !root.is_dir() {
        return Err(IndexError::Configuration(format!(
            "corpus root does not exist or is not a directory: {}",
            root.display()
        )));
    }

    let include_set = build_globset(&config.corpus.include_globs)?;

    let mut excludes = vec![
        "**/.git/**".to_string(),
        "**/target/**".to_string(),
        "**/node_modules/**".to_string(),
    ];
    excludes.extend(config.corpus.exclude_globs.iter().cloned());
    let exclude_set = build_globset(&excludes)?;

    let index_dir = std::fs::canonicalize(&config.index.dir).ok();

    let mut scan = CorpusScan::default();
    let walker = WalkDir::new(root)
        .follow_links(config.corpus.follow_symlinks)
        .into_iter()
        .filter_entry(|e| match &index_dir {
            Some(dir) => std::fs::canonicalize(e.path()).map_or(true, |p| &p != dir),
            None => true,
        });

    for entry in walker {
        let entry = match entry {
            Ok(e) => e,
            Err(e) => {
                let key = e
                    .path()
                    .and_then(|p| p.strip_prefix(root).ok())
                    .map(relative_key)
                    .unwrap_or_default();
                tracing::warn!(path = %key, error = %e, "skipping unreadable corpus entry");
                scan.unreadable.push(key);
                continue;
            }
        };
        if !entry.file_type().is_file() {
            continue;
        }

        let path = entry.path();
        let relative = path.strip_prefix(root).unwrap_or(path);
        let key = relative_key(relative);

        if exclude_set.is_match(&key) || !include_set.is_match(&key) {
            continue;
        }
        let Some(format) = SourceFormat::from_path(path) else {
            tracing::debug!(path = %key, "skipping unsupported file type");
            continue;
        };

        let modified = match entry
            .metadata()
            .map_err(|e| e.to_string())
            .and_then(|m| m.modified().map_err(|e| e.to_string()))
        {
            Ok(m) => m,
            Err(e) => {
                tracing::warn!(path = %key, error = %e, "cannot read modification time");
                scan.unreadable.push(key);
                continue;
            }
        };

        scan.documents.push(SourceDocument {
            key,
            path: path.to_path_buf(),
            format,
            modified_at: DateTime::<Utc>::from(modified),
        });
    }

    scan.documents.sort_by(|a, b| a.key.cmp(&b.key));
    Ok(scan)
}

/// Resolve a single corpus path (relative to the root, or absolute inside
/// it) to a document.
pub fn scan_one(config: &Config, path: &Path) -> Result<Option<SourceDocument>> {
    let root = &config.corpus.root;
    let full = if path.is_absolute() {
        path.to_path_buf()
    } else {
        root.join(path)
    };
    let relative = full.strip_prefix(root).map_err(|_| {
        IndexError::Configuration(format!(
            "{} is not inside the corpus root {}",
            path.display(),
            root.display()
        ))
    })?;
    let key = relative_key(relative);

    let metadata = match std::fs::metadata(&full) {
        Ok(m) if m.is_file() => m,
        Ok(_) => return Ok(None),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e.into()),
    };
    let Some(format) = SourceFormat::from_path(&full) else {
        return Ok(None);
    };

    Ok(Some(SourceDocument {
        key,
        path: full,
        format,
        modified_at: DateTime::<Utc>::from(metadata.modified()?),
    }))
}

/// Catalog key for a root-relative path: components joined with `/`.
pub fn relative_key(relative: &Path) -> String {
    relative
        .components()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/")
}

fn build_globset(patterns: &[String]) -> Result<GlobSet> {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        let glob = Glob::new(pattern).map_err(|e| {
            IndexError::Configuration(format!("invalid glob '{}': {}", pattern, e))
        })?;
        builder.add(glob);
    }
    builder
        .build()
        .map_err(|e| IndexError::Configuration(format!("invalid glob set: {}", e)))
}
