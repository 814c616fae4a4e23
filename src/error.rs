//! Error taxonomy for the indexing engine.
//!
//! Document-level failures ([`IndexError::Extraction`],
//! [`IndexError::EmbeddingProvider`]) are logged and swallowed by the
//! indexing controller; the document stays stale and is retried on the
//! next refresh. Everything else propagates to the caller.

use thiserror::Error;

/// Errors produced by the indexing engine.
#[derive(Error, Debug)]
pub enum IndexError {
    /// The document could not be read, parsed, or is an unsupported format.
    #[error("extraction error: {0}")]
    Extraction(#[from] ExtractError),

    /// The embedding service timed out, was unreachable, or returned a
    /// malformed response.
    #[error("embedding provider error: {0}")]
    EmbeddingProvider(String),

    /// Invalid configuration, or a dimension/model mismatch against the index.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// The persisted index failed its integrity check.
    #[error("index corruption: {0}")]
    IndexCorruption(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl IndexError {
    /// True for errors that only affect a single document and must not abort a run.
    pub fn is_document_level(&self) -> bool {
        matches!(
            self,
            IndexError::Extraction(_) | IndexError::EmbeddingProvider(_)
        )
    }
}

/// Extraction failure for a single file.
#[derive(Error, Debug)]
pub enum ExtractError {
    #[error("unsupported format: {0}")]
    UnsupportedFormat(String),

    #[error("PDF extraction failed: {0}")]
    Pdf(String),

    #[error("OOXML extraction failed: {0}")]
    Ooxml(String),

    #[error("text decoding failed: {0}")]
    Text(String),

    #[error("read failed: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, IndexError>;
