//! Core data types shared by the extraction, chunking, and indexing stages.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// File formats the extractor understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceFormat {
    Pdf,
    Docx,
    Pptx,
    PlainText,
}

impl SourceFormat {
    /// Format tag for a path, by lowercase extension.
    pub fn from_path(path: &Path) -> Option<Self> {
        let ext = path.extension()?.to_str()?.to_ascii_lowercase();
        match ext.as_str() {
            "pdf" => Some(SourceFormat::Pdf),
            "docx" => Some(SourceFormat::Docx),
            "pptx" => Some(SourceFormat::Pptx),
            "txt" => Some(SourceFormat::PlainText),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            SourceFormat::Pdf => "pdf",
            SourceFormat::Docx => "docx",
            SourceFormat::Pptx => "pptx",
            SourceFormat::PlainText => "txt",
        }
    }
}

/// A file under the corpus root, as seen by the scanner.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceDocument {
    /// Path relative to the corpus root with `/` separators. This is the
    /// document's identity in the catalog and the index.
    pub key: String,
    /// Location on disk.
    pub path: PathBuf,
    pub format: SourceFormat,
    pub modified_at: DateTime<Utc>,
}

/// One structural unit of extracted text: a PDF page, a DOCX paragraph,
/// a PPTX slide, or a whole plain-text file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtractedUnit {
    pub text: String,
    /// 1-based page or slide number, when the format has one.
    pub page_or_slide: Option<u32>,
}

/// A contiguous window of a document's extracted text.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Chunk {
    pub chunk_id: String,
    pub source_path: String,
    pub text: String,
    /// Offsets in characters into the document's joined text.
    pub char_start: usize,
    pub char_end: usize,
    pub page_or_slide: Option<u32>,
}

/// Processing state of one corpus file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CatalogEntry {
    pub last_processed_mtime: DateTime<Utc>,
    pub chunk_count: usize,
    pub processed_at: DateTime<Utc>,
}

/// A chunk returned from similarity search.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SearchHit {
    pub chunk: Chunk,
    pub score: f32,
    /// Insertion position in the index at search time.
    pub position: usize,
}
