//! Embedding gateway abstraction and HTTP implementations.
//!
//! Defines the [`EmbeddingGateway`] trait and concrete gateways:
//! - **[`DisabledGateway`]**: always fails; used when no provider is configured.
//! - **[`OllamaGateway`]**: calls a local Ollama instance's `/api/embed` endpoint.
//! - **[`OpenAIGateway`]**: calls the OpenAI `/v1/embeddings` endpoint.
//!
//! Also provides the batching driver [`embed_in_batches`] and the vector
//! helpers [`cosine_similarity`], [`vec_to_blob`] and [`blob_to_vec`].
//!
//! # Retry Strategy
//!
//! Both HTTP gateways use exponential backoff for transient errors:
//! - HTTP 429 (rate limited) and 5xx (server error) → retry
//! - HTTP 4xx (client error, not 429) → fail immediately
//! - Network errors → retry
//! - Backoff: 1s, 2s, 4s, 8s, 16s, 32s (capped at 2^5)

use async_trait::async_trait;
use futures::stream::{self, StreamExt, TryStreamExt};
use std::sync::Arc;
use std::time::Duration;

use crate::config::EmbeddingConfig;
use crate::error::{IndexError, Result};

const DEFAULT_OLLAMA_URL: &str = "http://localhost:11434";
const DEFAULT_OPENAI_URL: &str = "https://api.openai.com";

/// Contract to an external embedding service.
///
/// `embed` returns exactly one vector per input text, in input order, or
/// fails the whole batch with [`IndexError::EmbeddingProvider`].
#[async_trait]
pub trait EmbeddingGateway: Send + Sync {
    /// Returns the model identifier (e.g. `"nomic-embed-text"`).
    fn model_name(&self) -> &str;
    /// Returns the embedding vector dimensionality (e.g. `768`).
    fn dims(&self) -> usize;
    /// Embed one batch of texts.
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>>;
}

/// Build the gateway named by `config.provider`.
pub fn create_gateway(config: &EmbeddingConfig) -> Result<Arc<dyn EmbeddingGateway>> {
    match config.provider.as_str() {
        "disabled" => Ok(Arc::new(DisabledGateway)),
        "ollama" => Ok(Arc::new(OllamaGateway::new(config)?)),
        "openai" => Ok(Arc::new(OpenAIGateway::new(config)?)),
        other => Err(IndexError::Configuration(format!(
            "Unknown embedding provider: {}",
            other
        ))),
    }
}

/// Embed `texts` in batches of `batch_size`, with up to `concurrency`
/// batches in flight. Every call is bounded by `timeout`. Results are
/// reassembled in input order; any failed batch fails the whole call.
pub async fn embed_in_batches(
    gateway: &dyn EmbeddingGateway,
    texts: &[String],
    batch_size: usize,
    concurrency: usize,
    timeout: Duration,
) -> Result<Vec<Vec<f32>>> {
    if texts.is_empty() {
        return Ok(Vec::new());
    }

    let calls: Vec<_> = texts
        .chunks(batch_size.max(1))
        .map(|batch| embed_one_batch(gateway, batch, timeout))
        .collect();
    let batches: Vec<Vec<Vec<f32>>> = stream::iter(calls)
        .buffered(concurrency.max(1))
        .try_collect()
        .await?;

    Ok(batches.into_iter().flatten().collect())
}

/// Embed a single query string under a timeout.
pub async fn embed_query(
    gateway: &dyn EmbeddingGateway,
    text: &str,
    timeout: Duration,
) -> Result<Vec<f32>> {
    embed_one_batch(gateway, &[text.to_string()], timeout)
        .await?
        .into_iter()
        .next()
        .ok_or_else(|| IndexError::EmbeddingProvider("Empty embedding response".to_string()))
}

async fn embed_one_batch(
    gateway: &dyn EmbeddingGateway,
    batch: &[String],
    timeout: Duration,
) -> Result<Vec<Vec<f32>>> {
    let vectors = tokio::time::timeout(timeout, gateway.embed(batch))
        .await
        .map_err(|_| {
            IndexError::EmbeddingProvider(format!(
                "embedding call timed out after {}s",
                timeout.as_secs_f32()
            ))
        })??;

    if vectors.len() != batch.len() {
        return Err(IndexError::EmbeddingProvider(format!(
            "malformed response: {} vectors for {} texts",
            vectors.len(),
            batch.len()
        )));
    }
    if let Some(bad) = vectors.iter().find(|v| v.len() != gateway.dims()) {
        return Err(IndexError::EmbeddingProvider(format!(
            "malformed response: expected {} dimensions, got {}",
            gateway.dims(),
            bad.len()
        )));
    }
    Ok(vectors)
}

// ============ Disabled Gateway ============

/// A gateway that always fails.
///
/// Used when `embedding.provider = "disabled"`. Indexing runs still scan and
/// extract, but every document ends in the stale state.
pub struct DisabledGateway;

#[async_trait]
impl EmbeddingGateway for DisabledGateway {
    fn model_name(&self) -> &str {
        "disabled"
    }
    fn dims(&self) -> usize {
        0
    }
    async fn embed(&self, _texts: &[String]) -> Result<Vec<Vec<f32>>> {
        Err(IndexError::EmbeddingProvider(
            "Embedding provider is disabled".to_string(),
        ))
    }
}

// ============ Ollama Gateway ============

/// Gateway to a local Ollama instance.
///
/// Calls `POST /api/embed` on the configured URL (default: `http://localhost:11434`).
/// Requires an embedding model to be pulled (e.g. `ollama pull nomic-embed-text`).
pub struct OllamaGateway {
    model: String,
    dims: usize,
    url: String,
    max_retries: u32,
    client: reqwest::Client,
}

impl OllamaGateway {
    pub fn new(config: &EmbeddingConfig) -> Result<Self> {
        let (model, dims) = model_and_dims(config, "Ollama")?;
        let url = config
            .url
            .clone()
            .unwrap_or_else(|| DEFAULT_OLLAMA_URL.to_string());
        Ok(Self {
            model,
            dims,
            url: url.trim_end_matches('/').to_string(),
            max_retries: config.max_retries,
            client: http_client(config)?,
        })
    }
}

#[async_trait]
impl EmbeddingGateway for OllamaGateway {
    fn model_name(&self) -> &str {
        &self.model
    }
    fn dims(&self) -> usize {
        self.dims
    }

    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let body = serde_json::json!({
            "model": self.model,
            "input": texts,
        });
        let endpoint = format!("{}/api/embed", self.url);
        let json = post_with_retry(
            "Ollama",
            self.max_retries,
            || self.client.post(&endpoint).json(&body),
        )
        .await
        .map_err(|e| {
            IndexError::EmbeddingProvider(format!("{} (is Ollama running at {}?)", e, self.url))
        })?;
        parse_ollama_response(&json)
    }
}

fn parse_ollama_response(json: &serde_json::Value) -> Result<Vec<Vec<f32>>> {
    let embeddings = json
        .get("embeddings")
        .and_then(|e| e.as_array())
        .ok_or_else(|| malformed("Ollama", "missing embeddings array"))?;

    embeddings
        .iter()
        .map(|embedding| {
            embedding
                .as_array()
                .ok_or_else(|| malformed("Ollama", "embedding is not an array"))
                .and_then(|values| to_f32_vec("Ollama", values))
        })
        .collect()
}

// ============ OpenAI Gateway ============

/// Gateway to the OpenAI embeddings API.
///
/// Requires the `OPENAI_API_KEY` environment variable. The base URL can be
/// overridden with `embedding.url` for compatible services.
pub struct OpenAIGateway {
    model: String,
    dims: usize,
    url: String,
    api_key: String,
    max_retries: u32,
    client: reqwest::Client,
}

impl OpenAIGateway {
    pub fn new(config: &EmbeddingConfig) -> Result<Self> {
        let (model, dims) = model_and_dims(config, "OpenAI")?;
        let api_key = std::env::var("OPENAI_API_KEY").map_err(|_| {
            IndexError::Configuration("OPENAI_API_KEY environment variable not set".to_string())
        })?;
        let url = config
            .url
            .clone()
            .unwrap_or_else(|| DEFAULT_OPENAI_URL.to_string());
        Ok(Self {
            model,
            dims,
            url: url.trim_end_matches('/').to_string(),
            api_key,
            max_retries: config.max_retries,
            client: http_client(config)?,
        })
    }
}

#[async_trait]
impl EmbeddingGateway for OpenAIGateway {
    fn model_name(&self) -> &str {
        &self.model
    }
    fn dims(&self) -> usize {
        self.dims
    }

    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let body = serde_json::json!({
            "model": self.model,
            "input": texts,
        });
        let endpoint = format!("{}/v1/embeddings", self.url);
        let json = post_with_retry("OpenAI", self.max_retries, || {
            self.client
                .post(&endpoint)
                .header("Authorization", format!("Bearer {}", self.api_key))
                .json(&body)
        })
        .await
        .map_err(IndexError::EmbeddingProvider)?;
        parse_openai_response(&json)
    }
}

/// Extract `data[].embedding`, ordered by each item's `index` field.
fn parse_openai_response(json: &serde_json::Value) -> Result<Vec<Vec<f32>>> {
    let data = json
        .get("data")
        .and_then(|d| d.as_array())
        .ok_or_else(|| malformed("OpenAI", "missing data array"))?;

    let mut indexed = Vec::with_capacity(data.len());
    for (pos, item) in data.iter().enumerate() {
        let values = item
            .get("embedding")
            .and_then(|e| e.as_array())
            .ok_or_else(|| malformed("OpenAI", "missing embedding"))?;
        let index = item
            .get("index")
            .and_then(|i| i.as_u64())
            .map(|i| i as usize)
            .unwrap_or(pos);
        indexed.push((index, to_f32_vec("OpenAI", values)?));
    }
    indexed.sort_by_key(|(index, _)| *index);

    Ok(indexed.into_iter().map(|(_, v)| v).collect())
}

// ============ Shared HTTP plumbing ============

fn model_and_dims(config: &EmbeddingConfig, label: &str) -> Result<(String, usize)> {
    let model = config.model.clone().ok_or_else(|| {
        IndexError::Configuration(format!("embedding.model required for {} provider", label))
    })?;
    let dims = config.dims.filter(|d| *d > 0).ok_or_else(|| {
        IndexError::Configuration(format!("embedding.dims required for {} provider", label))
    })?;
    Ok((model, dims))
}

fn http_client(config: &EmbeddingConfig) -> Result<reqwest::Client> {
    reqwest::Client::builder()
        .timeout(Duration::from_secs(config.timeout_secs))
        .build()
        .map_err(|e| IndexError::Configuration(format!("failed to build HTTP client: {}", e)))
}

/// POST with exponential backoff. Returns the decoded JSON body, or a
/// message describing the last failure.
async fn post_with_retry<F>(
    label: &str,
    max_retries: u32,
    build: F,
) -> std::result::Result<serde_json::Value, String>
where
    F: Fn() -> reqwest::RequestBuilder,
{
    let mut last_err = None;

    for attempt in 0..=max_retries {
        if attempt > 0 {
            let delay = Duration::from_secs(1 << (attempt - 1).min(5));
            tracing::debug!(provider = label, attempt, ?delay, "retrying embedding request");
            tokio::time::sleep(delay).await;
        }

        match build().send().await {
            Ok(response) => {
                let status = response.status();

                if status.is_success() {
                    return response
                        .json::<serde_json::Value>()
                        .await
                        .map_err(|e| format!("{} returned invalid JSON: {}", label, e));
                }

                let body_text = response.text().await.unwrap_or_default();
                let err = format!("{} API error {}: {}", label, status, body_text);

                // Rate limited or server error: retry
                if status.as_u16() == 429 || status.is_server_error() {
                    last_err = Some(err);
                    continue;
                }

                return Err(err);
            }
            Err(e) => {
                last_err = Some(format!("{} connection error: {}", label, e));
                continue;
            }
        }
    }

    Err(last_err.unwrap_or_else(|| format!("{} embedding failed after retries", label)))
}

fn malformed(label: &str, what: &str) -> IndexError {
    IndexError::EmbeddingProvider(format!("Invalid {} response: {}", label, what))
}

fn to_f32_vec(label: &str, values: &[serde_json::Value]) -> Result<Vec<f32>> {
    values
        .iter()
        .map(|v| {
            v.as_f64()
                .map(|f| f as f32)
                .ok_or_else(|| malformed(label, "non-numeric embedding value"))
        })
        .collect()
}

// ============ Vector helpers ============

/// Compute cosine similarity between two embedding vectors.
///
/// Returns a value in `[-1.0, 1.0]`, or `0.0` for empty vectors, vectors
/// of different lengths, or zero-magnitude vectors.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let mut dot = 0.0f32;
    let mut norm_a = 0.0f32;
    let mut norm_b = 0.0f32;

    for (x, y) in a.iter().zip(b.iter()) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }

    let denom = norm_a.sqrt() * norm_b.sqrt();
    if denom < f32::EPSILON {
        return 0.0;
    }

    dot / denom
}

/// Encode a float vector as little-endian f32 bytes.
pub fn vec_to_blob(vec: &[f32]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(vec.len() * 4);
    for &v in vec {
        bytes.extend_from_slice(&v.to_le_bytes());
    }
    bytes
}

/// Decode little-endian f32 bytes back into a float vector.
pub fn blob_to_vec(blob: &[u8]) -> Vec<f32> {
    blob.chunks_exact(4)
        .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
        .collect()
}
