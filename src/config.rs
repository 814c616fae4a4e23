//! TOML configuration parsing and validation.
//!
//! All settings are read from one file (default `./config/cidx.toml`).
//! Validation runs eagerly in [`load_config`] so an invalid chunk window
//! or embedding setup fails at startup, not halfway through a run.

use serde::Deserialize;
use std::path::{Path, PathBuf};

use crate::error::{IndexError, Result};

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub corpus: CorpusConfig,
    pub index: IndexConfig,
    #[serde(default)]
    pub chunking: ChunkingConfig,
    #[serde(default)]
    pub retrieval: RetrievalConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct CorpusConfig {
    pub root: PathBuf,
    #[serde(default = "default_include_globs")]
    pub include_globs: Vec<String>,
    #[serde(default)]
    pub exclude_globs: Vec<String>,
    #[serde(default)]
    pub follow_symlinks: bool,
}

fn default_include_globs() -> Vec<String> {
    vec![
        "**/*.pdf".to_string(),
        "**/*.docx".to_string(),
        "**/*.pptx".to_string(),
        "**/*.txt".to_string(),
    ]
}

/// Location of the durable index state.
#[derive(Debug, Deserialize, Clone)]
pub struct IndexConfig {
    pub dir: PathBuf,
}

impl IndexConfig {
    pub fn vectors_path(&self) -> PathBuf {
        self.dir.join("vectors.idx")
    }

    pub fn catalog_path(&self) -> PathBuf {
        self.dir.join("catalog.json")
    }
}

/// Chunk window in characters.
#[derive(Debug, Deserialize, Clone)]
pub struct ChunkingConfig {
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,
    #[serde(default = "default_chunk_overlap")]
    pub chunk_overlap: usize,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            chunk_size: default_chunk_size(),
            chunk_overlap: default_chunk_overlap(),
        }
    }
}

fn default_chunk_size() -> usize {
    800
}
fn default_chunk_overlap() -> usize {
    100
}

#[derive(Debug, Deserialize, Clone)]
pub struct RetrievalConfig {
    #[serde(default = "default_max_results")]
    pub max_results: usize,
    #[serde(default)]
    pub min_score: f32,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            max_results: default_max_results(),
            min_score: 0.0,
        }
    }
}

fn default_max_results() -> usize {
    5
}

#[derive(Debug, Deserialize, Clone)]
pub struct EmbeddingConfig {
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub dims: Option<usize>,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            model: None,
            dims: None,
            url: None,
            batch_size: default_batch_size(),
            concurrency: default_concurrency(),
            max_retries: default_max_retries(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

fn default_provider() -> String {
    "disabled".to_string()
}
fn default_batch_size() -> usize {
    32
}
fn default_concurrency() -> usize {
    2
}
fn default_max_retries() -> u32 {
    3
}
fn default_timeout_secs() -> u64 {
    30
}

impl EmbeddingConfig {
    pub fn is_enabled(&self) -> bool {
        self.provider != "disabled"
    }
}

impl Config {
    /// Check every cross-field constraint. Called by [`load_config`];
    /// also usable on configs built in code.
    pub fn validate(&self) -> Result<()> {
        if self.chunking.chunk_size == 0 {
            return Err(config_err("chunking.chunk_size must be > 0"));
        }
        if self.chunking.chunk_overlap >= self.chunking.chunk_size {
            return Err(config_err(format!(
                "chunking.chunk_overlap ({}) must be smaller than chunking.chunk_size ({})",
                self.chunking.chunk_overlap, self.chunking.chunk_size
            )));
        }

        if self.retrieval.max_results < 1 {
            return Err(config_err("retrieval.max_results must be >= 1"));
        }
        if !(-1.0..=1.0).contains(&self.retrieval.min_score) {
            return Err(config_err("retrieval.min_score must be in [-1.0, 1.0]"));
        }

        let emb = &self.embedding;
        if emb.batch_size == 0 {
            return Err(config_err("embedding.batch_size must be >= 1"));
        }
        if emb.concurrency == 0 {
            return Err(config_err("embedding.concurrency must be >= 1"));
        }

        match emb.provider.as_str() {
            "disabled" | "ollama" | "openai" => {}
            other => {
                return Err(config_err(format!(
                    "Unknown embedding provider: '{}'. Must be disabled, ollama, or openai.",
                    other
                )))
            }
        }

        if emb.is_enabled() {
            if emb.dims.is_none() || emb.dims == Some(0) {
                return Err(config_err(format!(
                    "embedding.dims must be > 0 when provider is '{}'",
                    emb.provider
                )));
            }
            if emb.model.is_none() {
                return Err(config_err(format!(
                    "embedding.model must be specified when provider is '{}'",
                    emb.provider
                )));
            }
        }

        Ok(())
    }
}

fn config_err(msg: impl Into<String>) -> IndexError {
    IndexError::Configuration(msg.into())
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path).map_err(|e| {
        config_err(format!(
            "Failed to read config file {}: {}",
            path.display(),
            e
        ))
    })?;
    parse_config(&content)
}

pub fn parse_config(content: &str) -> Result<Config> {
    let config: Config = toml::from_str(content)
        .map_err(|e| config_err(format!("Failed to parse config file: {}", e)))?;
    config.validate()?;
    Ok(config)
}
