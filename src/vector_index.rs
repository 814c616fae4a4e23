//! In-memory vector index with durable, integrity-checked persistence.
//!
//! Holds an ordered list of (chunk, embedding) pairs and a bijective
//! `chunk_id → position` map. Search is brute-force cosine similarity.
//!
//! # On-disk format
//!
//! ```text
//! ┌──────────┬──────────────┬─────────────────────────────────────┬──────────┐
//! │ magic 8B │ payload len  │ payload                             │ SHA-256  │
//! │ CIDXVEC1 │ u64 LE       │ header len u32 LE │ header JSON │ f32 │ of       │
//! │          │              │                   │             │ LE  │ payload  │
//! └──────────┴──────────────┴─────────────────────────────────────┴──────────┘
//! ```
//!
//! The header carries the embedding model id, dimension, chunk metadata and
//! the position map; the vectors follow as one contiguous little-endian
//! block. [`VectorIndex::load`] rejects any file whose digest, lengths or
//! position map do not check out.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, HashMap};
use std::path::Path;

use crate::embedding::{blob_to_vec, cosine_similarity, vec_to_blob};
use crate::error::{IndexError, Result};
use crate::models::{Chunk, SearchHit};
use crate::persist;

const MAGIC: &[u8; 8] = b"CIDXVEC1";
const FORMAT_VERSION: u32 = 1;
const DIGEST_LEN: usize = 32;

/// Embedding model and dimension every vector in the index shares.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexIdentity {
    pub model: String,
    pub dims: usize,
}

#[derive(Debug, Clone, Default)]
pub struct VectorIndex {
    identity: Option<IndexIdentity>,
    chunks: Vec<Chunk>,
    embeddings: Vec<Vec<f32>>,
    positions: HashMap<String, usize>,
}

#[derive(Serialize, Deserialize)]
struct Header {
    format_version: u32,
    identity: Option<IndexIdentity>,
    chunk_count: usize,
    chunks: Vec<Chunk>,
    positions: HashMap<String, usize>,
}

impl VectorIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.chunks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }

    pub fn identity(&self) -> Option<&IndexIdentity> {
        self.identity.as_ref()
    }

    pub fn get(&self, chunk_id: &str) -> Option<&Chunk> {
        self.positions.get(chunk_id).map(|&pos| &self.chunks[pos])
    }

    pub fn chunks(&self) -> impl Iterator<Item = &Chunk> {
        self.chunks.iter()
    }

    /// Number of chunks per source path.
    pub fn chunk_counts_by_source(&self) -> BTreeMap<String, usize> {
        let mut counts = BTreeMap::new();
        for chunk in &self.chunks {
            *counts.entry(chunk.source_path.clone()).or_insert(0) += 1;
        }
        counts
    }

    /// Fail unless the index is unbound or bound to exactly `model`/`dims`.
    pub fn check_identity(&self, model: &str, dims: usize) -> Result<()> {
        match &self.identity {
            None => Ok(()),
            Some(id) if id.model == model && id.dims == dims => Ok(()),
            Some(id) => Err(IndexError::Configuration(format!(
                "index was built with model '{}' ({} dims) but '{}' ({} dims) is configured; rebuild the index",
                id.model, id.dims, model, dims
            ))),
        }
    }

    /// Append chunks with their embeddings. The first insert into an
    /// unbound index fixes its model and dimension. Nothing is modified
    /// unless every pair is valid.
    pub fn insert(&mut self, model: &str, chunks: Vec<Chunk>, embeddings: Vec<Vec<f32>>) -> Result<()> {
        if chunks.len() != embeddings.len() {
            return Err(IndexError::Configuration(format!(
                "{} chunks but {} embeddings",
                chunks.len(),
                embeddings.len()
            )));
        }
        let Some(first) = embeddings.first() else {
            return Ok(());
        };

        let dims = self.identity.as_ref().map(|id| id.dims).unwrap_or(first.len());
        self.check_identity(model, dims)?;
        if dims == 0 {
            return Err(IndexError::Configuration(
                "embeddings must have at least one dimension".to_string(),
            ));
        }
        if let Some(bad) = embeddings.iter().find(|e| e.len() != dims) {
            return Err(IndexError::Configuration(format!(
                "embedding dimension mismatch: index has {}, got {}",
                dims,
                bad.len()
            )));
        }

        let mut seen = std::collections::HashSet::new();
        for chunk in &chunks {
            if self.positions.contains_key(&chunk.chunk_id) || !seen.insert(&chunk.chunk_id) {
                return Err(IndexError::Configuration(format!(
                    "duplicate chunk id {}",
                    chunk.chunk_id
                )));
            }
        }

        if self.identity.is_none() {
            self.identity = Some(IndexIdentity {
                model: model.to_string(),
                dims,
            });
        }
        for (chunk, embedding) in chunks.into_iter().zip(embeddings) {
            self.positions.insert(chunk.chunk_id.clone(), self.chunks.len());
            self.chunks.push(chunk);
            self.embeddings.push(embedding);
        }
        Ok(())
    }

    /// Remove every chunk of `source_path`, compacting positions. Returns
    /// the number of chunks removed.
    pub fn remove(&mut self, source_path: &str) -> usize {
        let before = self.chunks.len();
        if !self.chunks.iter().any(|c| c.source_path == source_path) {
            return 0;
        }

        let mut chunks = Vec::with_capacity(before);
        let mut embeddings = Vec::with_capacity(before);
        for (chunk, embedding) in self.chunks.drain(..).zip(self.embeddings.drain(..)) {
            if chunk.source_path != source_path {
                chunks.push(chunk);
                embeddings.push(embedding);
            }
        }
        self.chunks = chunks;
        self.embeddings = embeddings;
        self.rebuild_positions();
        before - self.chunks.len()
    }

    /// Drop all chunks and the model binding.
    pub fn clear(&mut self) {
        *self = Self::default();
    }

    /// Up to `max_results` chunks with cosine score ≥ `min_score`, by
    /// descending score; ties go to the earlier insertion position.
    pub fn search(&self, query: &[f32], max_results: usize, min_score: f32) -> Result<Vec<SearchHit>> {
        if self.is_empty() || max_results == 0 {
            return Ok(Vec::new());
        }
        if let Some(id) = &self.identity {
            if query.len() != id.dims {
                return Err(IndexError::Configuration(format!(
                    "query has {} dimensions, index has {}",
                    query.len(),
                    id.dims
                )));
            }
        }

        let mut scored: Vec<(usize, f32)> = self
            .embeddings
            .iter()
            .enumerate()
            .map(|(pos, e)| (pos, cosine_similarity(query, e)))
            .filter(|(_, score)| *score >= min_score)
            .collect();
        scored.sort_by(|a, b| b.1.total_cmp(&a.1).then(a.0.cmp(&b.0)));
        scored.truncate(max_results);

        Ok(scored
            .into_iter()
            .map(|(pos, score)| SearchHit {
                chunk: self.chunks[pos].clone(),
                score,
                position: pos,
            })
            .collect())
    }

    /// Structural problems in the in-memory state. Empty means consistent.
    pub fn consistency_issues(&self) -> Vec<String> {
        let mut issues = Vec::new();
        if self.embeddings.len() != self.chunks.len() {
            issues.push(format!(
                "{} embeddings for {} chunks",
                self.embeddings.len(),
                self.chunks.len()
            ));
        }
        if self.positions.len() != self.chunks.len() {
            issues.push(format!(
                "position map has {} entries for {} chunks",
                self.positions.len(),
                self.chunks.len()
            ));
        }
        for (pos, chunk) in self.chunks.iter().enumerate() {
            if self.positions.get(&chunk.chunk_id) != Some(&pos) {
                issues.push(format!(
                    "chunk {} at position {} is not mapped to that position",
                    chunk.chunk_id, pos
                ));
            }
        }
        if let Some(id) = &self.identity {
            if let Some(pos) = self.embeddings.iter().position(|e| e.len() != id.dims) {
                issues.push(format!(
                    "embedding at position {} does not have {} dimensions",
                    pos, id.dims
                ));
            }
        } else if !self.chunks.is_empty() {
            issues.push("index holds chunks but no embedding model".to_string());
        }
        issues
    }

    fn rebuild_positions(&mut self) {
        self.positions = self
            .chunks
            .iter()
            .enumerate()
            .map(|(pos, c)| (c.chunk_id.clone(), pos))
            .collect();
    }

    /// Serialize the whole index into the integrity-checked file format.
    pub fn encode(&self) -> Result<Vec<u8>> {
        let header = Header {
            format_version: FORMAT_VERSION,
            identity: self.identity.clone(),
            chunk_count: self.chunks.len(),
            chunks: self.chunks.clone(),
            positions: self.positions.clone(),
        };
        let header_json = serde_json::to_vec(&header)?;
        let dims = self.identity.as_ref().map(|id| id.dims).unwrap_or(0);

        let mut payload = Vec::with_capacity(4 + header_json.len() + self.len() * dims * 4);
        payload.extend_from_slice(&(header_json.len() as u32).to_le_bytes());
        payload.extend_from_slice(&header_json);
        for embedding in &self.embeddings {
            payload.extend_from_slice(&vec_to_blob(embedding));
        }

        let mut out = Vec::with_capacity(MAGIC.len() + 8 + payload.len() + DIGEST_LEN);
        out.extend_from_slice(MAGIC);
        out.extend_from_slice(&(payload.len() as u64).to_le_bytes());
        out.extend_from_slice(&payload);
        out.extend_from_slice(&Sha256::digest(&payload));
        Ok(out)
    }

    /// Parse bytes produced by [`encode`](Self::encode). Any structural or
    /// integrity failure is reported as [`IndexError::IndexCorruption`].
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        let corrupt = |msg: &str| IndexError::IndexCorruption(msg.to_string());

        if bytes.len() < MAGIC.len() + 8 + DIGEST_LEN || &bytes[..MAGIC.len()] != MAGIC {
            return Err(corrupt("missing or invalid file header"));
        }
        let mut len_bytes = [0u8; 8];
        len_bytes.copy_from_slice(&bytes[8..16]);
        let payload_len = u64::from_le_bytes(len_bytes) as usize;
        if bytes.len() - 16 - DIGEST_LEN != payload_len {
            return Err(corrupt("file length does not match recorded payload length"));
        }

        let payload = &bytes[16..16 + payload_len];
        let digest = &bytes[16 + payload_len..];
        if Sha256::digest(payload).as_slice() != digest {
            return Err(corrupt("integrity digest mismatch"));
        }

        if payload.len() < 4 {
            return Err(corrupt("truncated payload"));
        }
        let header_len = u32::from_le_bytes([payload[0], payload[1], payload[2], payload[3]]) as usize;
        if payload.len() < 4 + header_len {
            return Err(corrupt("truncated header"));
        }
        let header: Header = serde_json::from_slice(&payload[4..4 + header_len])
            .map_err(|e| IndexError::IndexCorruption(format!("unreadable header: {}", e)))?;

        if header.format_version != FORMAT_VERSION {
            return Err(IndexError::IndexCorruption(format!(
                "unsupported format version {}",
                header.format_version
            )));
        }
        if header.chunk_count != header.chunks.len() {
            return Err(corrupt("chunk count does not match chunk list"));
        }

        let dims = header.identity.as_ref().map(|id| id.dims).unwrap_or(0);
        let blob = &payload[4 + header_len..];
        if blob.len() != header.chunk_count * dims * 4 {
            return Err(corrupt("embedding block size does not match chunk count"));
        }
        let embeddings: Vec<Vec<f32>> = if dims == 0 {
            Vec::new()
        } else {
            blob.chunks_exact(dims * 4).map(blob_to_vec).collect()
        };

        let index = Self {
            identity: header.identity,
            chunks: header.chunks,
            embeddings,
            positions: header.positions,
        };
        let issues = index.consistency_issues();
        if !issues.is_empty() {
            return Err(IndexError::IndexCorruption(issues.join("; ")));
        }
        Ok(index)
    }

    /// Write the index to `path` atomically.
    pub fn persist(&self, path: &Path) -> Result<()> {
        let bytes = self.encode()?;
        persist::write_atomic(path, &bytes)?;
        Ok(())
    }

    /// Load the index at `path`. A missing file yields `None`.
    pub fn load(path: &Path) -> Result<Option<Self>> {
        let bytes = match std::fs::read(path) {
            Ok(b) => b,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        Self::decode(&bytes).map(Some)
    }
}
