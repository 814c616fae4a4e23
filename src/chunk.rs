//! Fixed-window character chunker with overlap.
//!
//! Windows are `chunk_size` characters wide and advance by
//! `chunk_size - chunk_overlap` (the stride). The final window is truncated
//! at the end of the text; a text shorter than `chunk_size` yields exactly
//! one chunk. Chunking is lazy: [`Chunker::chunks`] returns an iterator that
//! can be cloned to restart from the beginning.
//!
//! Each chunk gets a stable id derived from its source path and sequence
//! index, and carries the page/slide number of the extraction unit that
//! contains its first character.

use sha2::{Digest, Sha256};

use crate::error::{IndexError, Result};
use crate::models::{Chunk, ExtractedUnit};

/// Separator inserted between extraction units when joining them.
pub const UNIT_SEPARATOR: &str = "\n\n";

/// Validated chunk window parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkParams {
    chunk_size: usize,
    chunk_overlap: usize,
}

impl ChunkParams {
    /// Fails with a configuration error when the stride would be zero or negative.
    pub fn new(chunk_size: usize, chunk_overlap: usize) -> Result<Self> {
        if chunk_size == 0 {
            return Err(IndexError::Configuration(
                "chunk_size must be > 0".to_string(),
            ));
        }
        if chunk_overlap >= chunk_size {
            return Err(IndexError::Configuration(format!(
                "chunk_overlap ({}) must be smaller than chunk_size ({})",
                chunk_overlap, chunk_size
            )));
        }
        Ok(Self {
            chunk_size,
            chunk_overlap,
        })
    }

    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    pub fn chunk_overlap(&self) -> usize {
        self.chunk_overlap
    }

    pub fn stride(&self) -> usize {
        self.chunk_size - self.chunk_overlap
    }
}

#[derive(Debug, Clone)]
struct UnitSpan {
    char_start: usize,
    page_or_slide: Option<u32>,
}

/// The joined text of one document plus the spans of its extraction units.
#[derive(Debug, Clone)]
pub struct DocumentText {
    text: String,
    /// Byte offset of every char boundary, including the end of the text.
    boundaries: Vec<usize>,
    units: Vec<UnitSpan>,
}

impl DocumentText {
    pub fn from_units(units: &[ExtractedUnit]) -> Self {
        let mut text = String::new();
        let mut spans = Vec::with_capacity(units.len());
        let mut chars = 0usize;

        for (i, unit) in units.iter().enumerate() {
            if i > 0 {
                text.push_str(UNIT_SEPARATOR);
                chars += UNIT_SEPARATOR.chars().count();
            }
            spans.push(UnitSpan {
                char_start: chars,
                page_or_slide: unit.page_or_slide,
            });
            text.push_str(&unit.text);
            chars += unit.text.chars().count();
        }

        let mut boundaries: Vec<usize> = text.char_indices().map(|(b, _)| b).collect();
        boundaries.push(text.len());

        Self {
            text,
            boundaries,
            units: spans,
        }
    }

    pub fn as_str(&self) -> &str {
        &self.text
    }

    /// Length in characters.
    pub fn char_len(&self) -> usize {
        self.boundaries.len() - 1
    }

    pub fn is_empty(&self) -> bool {
        self.text.is_empty()
    }

    /// Text between two character offsets. `end` is clamped to the text length.
    pub fn slice(&self, start: usize, end: usize) -> &str {
        let end = end.min(self.char_len());
        let start = start.min(end);
        &self.text[self.boundaries[start]..self.boundaries[end]]
    }

    /// Page or slide of the unit whose span contains `offset`. Offsets that
    /// fall on a separator belong to the preceding unit.
    pub fn page_at(&self, offset: usize) -> Option<u32> {
        let idx = self.units.partition_point(|u| u.char_start <= offset);
        if idx == 0 {
            return None;
        }
        self.units[idx - 1].page_or_slide
    }
}

/// Splits documents into overlapping character windows.
#[derive(Debug, Clone, Copy)]
pub struct Chunker {
    params: ChunkParams,
}

impl Chunker {
    pub fn new(params: ChunkParams) -> Self {
        Self { params }
    }

    pub fn params(&self) -> ChunkParams {
        self.params
    }

    /// Lazily produce the chunks of `doc`, tagged with `source_path`.
    pub fn chunks<'a>(&self, doc: &'a DocumentText, source_path: &'a str) -> ChunkIter<'a> {
        ChunkIter {
            doc,
            source_path,
            path_hash: path_hash(source_path),
            params: self.params,
            offset: 0,
            index: 0,
        }
    }
}

/// Iterator over the chunks of one document. Clone it to restart.
#[derive(Debug, Clone)]
pub struct ChunkIter<'a> {
    doc: &'a DocumentText,
    source_path: &'a str,
    path_hash: String,
    params: ChunkParams,
    offset: usize,
    index: usize,
}

impl Iterator for ChunkIter<'_> {
    type Item = Chunk;

    fn next(&mut self) -> Option<Chunk> {
        let len = self.doc.char_len();
        if self.offset >= len {
            return None;
        }

        let start = self.offset;
        let end = (start + self.params.chunk_size).min(len);
        let chunk = Chunk {
            chunk_id: format!("{}:{}", self.path_hash, self.index),
            source_path: self.source_path.to_string(),
            text: self.doc.slice(start, end).to_string(),
            char_start: start,
            char_end: end,
            page_or_slide: self.doc.page_at(start),
        };

        self.offset += self.params.stride();
        self.index += 1;
        Some(chunk)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let len = self.doc.char_len();
        let remaining = if self.offset >= len {
            0
        } else {
            (len - self.offset).div_ceil(self.params.stride())
        };
        (remaining, Some(remaining))
    }
}

/// Stable chunk id for the `index`-th chunk of `source_path`.
pub fn chunk_id(source_path: &str, index: usize) -> String {
    format!("{}:{}", path_hash(source_path), index)
}

fn path_hash(source_path: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(source_path.as_bytes());
    let digest = format!("{:x}", hasher.finalize());
    digest[..16].to_string()
}
