//! Embedding provider abstraction and implementations.
//!
//! Defines the [`Embedder`] trait and concrete implementations:
//! - **[`DisabledEmbedder`]**: returns errors; used when embeddings are not configured.
//! - **[`OpenAIEmbedder`]**: calls the OpenAI embeddings API.
//! - **[`OllamaEmbedder`]**: calls a local Ollama instance's `/api/embed` endpoint.
//!
//! Callers never talk to an embedder directly for bulk work; they go
//! through [`embed_texts`], which splits input into provider-sized batches
//! and reassembles the vectors in input order.
//!
//! # Batching
//!
//! Providers cap the number of inputs per request at
//! [`PROVIDER_BATCH_CAP`]. `embed_texts` cuts larger inputs into
//! successive batches (250 texts → 100 + 100 + 50) and may keep up to
//! `concurrency` of them in flight. A failed batch fails the whole call;
//! no partial result is ever returned.

use anyhow::{anyhow, bail, Result};
use async_trait::async_trait;
use futures::stream::{self, StreamExt, TryStreamExt};
use std::time::Duration;

use crate::config::EmbeddingConfig;
use crate::error::ApiError;
use crate::retry::{send_with_retry, RetryPolicy};

/// Largest batch any provider is asked to embed in one request.
pub const PROVIDER_BATCH_CAP: usize = 100;

/// Trait for embedding providers.
///
/// Implementations embed exactly the batch they are given, returning one
/// vector per input in input order. Batch sizing is the caller's job.
#[async_trait]
pub trait Embedder: Send + Sync {
    /// Returns the model identifier (e.g. `"text-embedding-3-small"`).
    fn model_name(&self) -> &str;

    /// Embed one batch of at most [`PROVIDER_BATCH_CAP`] texts.
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>>;
}

/// Batch sizing and fan-out for [`embed_texts`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BatchOptions {
    pub batch_size: usize,
    pub concurrency: usize,
}

impl Default for BatchOptions {
    fn default() -> Self {
        Self {
            batch_size: PROVIDER_BATCH_CAP,
            concurrency: 1,
        }
    }
}

impl BatchOptions {
    pub fn from_config(config: &EmbeddingConfig) -> Self {
        Self {
            batch_size: config.batch_size,
            concurrency: config.concurrency,
        }
    }

    fn effective_batch_size(&self) -> usize {
        self.batch_size.clamp(1, PROVIDER_BATCH_CAP)
    }
}

/// Embed `texts`, returning one vector per input in the same order.
///
/// # Errors
///
/// Any batch failure, or a batch answering with the wrong number of
/// vectors, fails the entire call.
pub async fn embed_texts(
    embedder: &dyn Embedder,
    texts: &[String],
    options: &BatchOptions,
) -> Result<Vec<Vec<f32>>> {
    if texts.is_empty() {
        return Ok(Vec::new());
    }

    let batch_size = options.effective_batch_size();
    let batches: Vec<Vec<Vec<f32>>> = stream::iter(texts.chunks(batch_size))
        .map(|batch| async move {
            let vectors = embedder.embed_batch(batch).await?;
            if vectors.len() != batch.len() {
                return Err(anyhow::Error::new(ApiError::CountMismatch {
                    provider: "embedder",
                    expected: batch.len(),
                    got: vectors.len(),
                }));
            }
            Ok::<_, anyhow::Error>(vectors)
        })
        .buffered(options.concurrency.max(1))
        .try_collect()
        .await?;

    let embeddings: Vec<Vec<f32>> = batches.into_iter().flatten().collect();
    tracing::debug!(
        "created {} embeddings in {} batches",
        embeddings.len(),
        texts.len().div_ceil(batch_size)
    );
    Ok(embeddings)
}

/// Embed a single query text.
pub async fn embed_query(embedder: &dyn Embedder, text: &str) -> Result<Vec<f32>> {
    let results = embedder.embed_batch(&[text.to_string()]).await?;
    results
        .into_iter()
        .next()
        .ok_or_else(|| anyhow!("Empty embedding response"))
}

// ============ Disabled Provider ============

/// A no-op embedder that always returns errors.
///
/// Used when `embedding.provider = "disabled"`, and by commands that
/// only read the store.
pub struct DisabledEmbedder;

#[async_trait]
impl Embedder for DisabledEmbedder {
    fn model_name(&self) -> &str {
        "disabled"
    }

    async fn embed_batch(&self, _texts: &[String]) -> Result<Vec<Vec<f32>>> {
        bail!("Embedding provider is disabled. Set [embedding] provider in config.")
    }
}

// ============ OpenAI Provider ============

/// Embedding provider using the OpenAI API.
///
/// Calls `POST {base_url}/embeddings` with the configured model.
pub struct OpenAIEmbedder {
    client: reqwest::Client,
    api_key: String,
    base_url: String,
    model: String,
    retry: RetryPolicy,
}

impl OpenAIEmbedder {
    pub fn new(
        api_key: String,
        base_url: &str,
        model: String,
        timeout: Duration,
        retry: RetryPolicy,
    ) -> Result<Self> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            api_key,
            base_url: base_url.trim_end_matches('/').to_string(),
            model,
            retry,
        })
    }

    /// Create a provider from configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if `OPENAI_API_KEY` is not in the environment.
    pub fn from_config(config: &EmbeddingConfig) -> Result<Self> {
        let api_key = std::env::var("OPENAI_API_KEY")
            .map_err(|_| anyhow!("OPENAI_API_KEY environment variable not set"))?;
        let model = config
            .model
            .clone()
            .unwrap_or_else(|| "text-embedding-3-small".to_string());
        let base_url = config
            .base_url
            .as_deref()
            .unwrap_or("https://api.openai.com/v1");
        Self::new(
            api_key,
            base_url,
            model,
            Duration::from_secs(config.timeout_secs),
            config.retry_policy(),
        )
    }
}

#[async_trait]
impl Embedder for OpenAIEmbedder {
    fn model_name(&self) -> &str {
        &self.model
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let body = serde_json::json!({
            "model": self.model,
            "input": texts,
        });
        let url = format!("{}/embeddings", self.base_url);

        let response = send_with_retry("openai", &self.retry, || {
            self.client
                .post(&url)
                .header("Authorization", format!("Bearer {}", self.api_key))
                .json(&body)
                .send()
        })
        .await?;

        let json: serde_json::Value = response.json().await.map_err(|source| ApiError::Http {
            provider: "openai",
            source,
        })?;
        Ok(parse_openai_response(&json)?)
    }
}

/// Parse the OpenAI embeddings API response JSON.
///
/// Extracts the `data[].embedding` arrays and orders them by `data[].index`.
fn parse_openai_response(json: &serde_json::Value) -> Result<Vec<Vec<f32>>, ApiError> {
    let invalid = |detail: &str| ApiError::InvalidResponse {
        provider: "openai",
        detail: detail.to_string(),
    };

    let data = json
        .get("data")
        .and_then(|d| d.as_array())
        .ok_or_else(|| invalid("missing data array"))?;

    let mut indexed = Vec::with_capacity(data.len());
    for (position, item) in data.iter().enumerate() {
        let index = item
            .get("index")
            .and_then(|i| i.as_u64())
            .map(|i| i as usize)
            .unwrap_or(position);
        let embedding = item
            .get("embedding")
            .and_then(|e| e.as_array())
            .ok_or_else(|| invalid("missing embedding"))?;
        let vector =
            parse_vector(embedding).ok_or_else(|| invalid("non-numeric embedding"))?;
        indexed.push((index, vector));
    }

    indexed.sort_by_key(|(index, _)| *index);
    Ok(indexed.into_iter().map(|(_, v)| v).collect())
}

fn parse_vector(values: &[serde_json::Value]) -> Option<Vec<f32>> {
    values.iter().map(|v| v.as_f64().map(|f| f as f32)).collect()
}

// ============ Ollama Provider ============

/// Embedding provider using a local Ollama instance.
///
/// Calls `POST /api/embed` on the configured URL (default: `http://localhost:11434`).
/// Requires an embedding model to be pulled (e.g. `ollama pull nomic-embed-text`).
pub struct OllamaEmbedder {
    client: reqwest::Client,
    url: String,
    model: String,
    retry: RetryPolicy,
}

impl OllamaEmbedder {
    pub fn new(url: &str, model: String, timeout: Duration, retry: RetryPolicy) -> Result<Self> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            url: url.trim_end_matches('/').to_string(),
            model,
            retry,
        })
    }

    pub fn from_config(config: &EmbeddingConfig) -> Result<Self> {
        let model = config
            .model
            .clone()
            .ok_or_else(|| anyhow!("embedding.model required for Ollama provider"))?;
        let url = config.base_url.as_deref().unwrap_or("http://localhost:11434");
        Self::new(
            url,
            model,
            Duration::from_secs(config.timeout_secs),
            config.retry_policy(),
        )
    }
}

#[async_trait]
impl Embedder for OllamaEmbedder {
    fn model_name(&self) -> &str {
        &self.model
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let body = serde_json::json!({
            "model": self.model,
            "input": texts,
        });
        let url = format!("{}/api/embed", self.url);

        let response = send_with_retry("ollama", &self.retry, || {
            self.client.post(&url).json(&body).send()
        })
        .await?;

        let json: serde_json::Value = response.json().await.map_err(|source| ApiError::Http {
            provider: "ollama",
            source,
        })?;
        Ok(parse_ollama_response(&json)?)
    }
}

fn parse_ollama_response(json: &serde_json::Value) -> Result<Vec<Vec<f32>>, ApiError> {
    let invalid = |detail: &str| ApiError::InvalidResponse {
        provider: "ollama",
        detail: detail.to_string(),
    };

    let embeddings = json
        .get("embeddings")
        .and_then(|e| e.as_array())
        .ok_or_else(|| invalid("missing embeddings array"))?;

    embeddings
        .iter()
        .map(|embedding| {
            embedding
                .as_array()
                .and_then(|values| parse_vector(values))
                .ok_or_else(|| invalid("embedding is not a numeric array"))
        })
        .collect()
}

/// Create the appropriate [`Embedder`] based on configuration.
///
/// | Config Value | Provider |
/// |-------------|----------|
/// | `"disabled"` | [`DisabledEmbedder`] |
/// | `"openai"` | [`OpenAIEmbedder`] |
/// | `"ollama"` | [`OllamaEmbedder`] |
pub fn create_embedder(config: &EmbeddingConfig) -> Result<Box<dyn Embedder>> {
    match config.provider.as_str() {
        "disabled" => Ok(Box::new(DisabledEmbedder)),
        "openai" => Ok(Box::new(OpenAIEmbedder::from_config(config)?)),
        "ollama" => Ok(Box::new(OllamaEmbedder::from_config(config)?)),
        other => bail!("Unknown embedding provider: {}", other),
    }
}
