//! Embedding backends and the query embedder.
//!
//! Defines the [`Embedder`] trait and concrete implementations:
//! - **[`OpenAiEmbedder`]**: calls the OpenAI embeddings API with retry and backoff.
//! - **[`OllamaEmbedder`]**: calls an Ollama instance's `/api/embed` endpoint.
//! - **`LocalEmbedder`**: runs a fastembed model in-process (feature `local-models`).
//!
//! [`QueryEmbedder`] resolves the configured provider once into a
//! `Primary | Fallback` choice. A remote primary that errors at call time
//! falls back to the local model; when no backend can produce a vector the
//! call fails with [`ConfigError::NoEmbeddingModel`].
//!
//! Also provides the vector utilities used by the stores:
//! - [`cosine_similarity`]: similarity between two embedding vectors
//! - [`vec_to_blob`]: encode a `Vec<f32>` as little-endian bytes for SQLite BLOB storage
//! - [`blob_to_vec`]: decode a SQLite BLOB back into a `Vec<f32>`
//!
//! # Retry Strategy
//!
//! The OpenAI and Ollama embedders use exponential backoff for transient
//! errors, up to `max_retries` for ingestion batches and
//! `query_max_retries` (default 0) on the query path:
//! - HTTP 429 (rate limited) and 5xx (server error) → retry
//! - HTTP 4xx (client error, not 429) → fail immediately
//! - Network errors → retry
//! - Backoff: 1s, 2s, 4s, 8s, 16s, 32s (capped at 2^5)

#[cfg(feature = "local-models")]
mod local;

#[cfg(feature = "local-models")]
pub use local::LocalEmbedder;

use anyhow::{bail, Result};
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;

use crate::config::EmbeddingConfig;
use crate::error::ConfigError;

const OPENAI_DEFAULT_URL: &str = "https://api.openai.com";
const OLLAMA_DEFAULT_URL: &str = "http://localhost:11434";

/// A text embedding backend.
#[async_trait]
pub trait Embedder: Send + Sync {
    /// Model identifier (e.g. `"text-embedding-3-small"`).
    fn model_name(&self) -> &str;

    /// Embed a batch of texts, one vector per input, in input order.
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>>;
}

// ============ Query embedder ============

/// The embedding backend choice, resolved once at construction.
#[derive(Clone)]
pub enum QueryEmbedder {
    /// A remote service, with an optional local model used when it errors.
    Primary {
        remote: Arc<dyn Embedder>,
        fallback: Option<Arc<dyn Embedder>>,
    },
    /// Local model only.
    Fallback(Arc<dyn Embedder>),
}

impl QueryEmbedder {
    /// Resolve the configured provider.
    ///
    /// Fails with [`ConfigError::NoEmbeddingModel`] when neither a remote
    /// nor a local backend can be constructed.
    pub fn from_config(config: &EmbeddingConfig) -> Result<Self> {
        let remote: Option<Arc<dyn Embedder>> = match config.provider.as_str() {
            "openai" => match OpenAiEmbedder::new(config) {
                Ok(e) => Some(Arc::new(e)),
                Err(e) => {
                    tracing::warn!(error = %e, "OpenAI embedder unavailable");
                    None
                }
            },
            "ollama" => Some(Arc::new(OllamaEmbedder::new(config)?)),
            "local" | "disabled" => None,
            other => return Err(ConfigError::UnknownEmbeddingProvider(other.to_string()).into()),
        };

        let wants_local = match config.provider.as_str() {
            "local" => true,
            "disabled" => false,
            _ => config.local_fallback,
        };
        let local = if wants_local { local_embedder(config) } else { None };

        Self::new(remote, local)
    }

    /// Build a choice directly from backends.
    pub fn new(remote: Option<Arc<dyn Embedder>>, local: Option<Arc<dyn Embedder>>) -> Result<Self> {
        match (remote, local) {
            (Some(remote), fallback) => Ok(QueryEmbedder::Primary { remote, fallback }),
            (None, Some(local)) => Ok(QueryEmbedder::Fallback(local)),
            (None, None) => Err(ConfigError::NoEmbeddingModel.into()),
        }
    }

    pub fn model_name(&self) -> &str {
        match self {
            QueryEmbedder::Primary { remote, .. } => remote.model_name(),
            QueryEmbedder::Fallback(local) => local.model_name(),
        }
    }

    /// Embed a batch, falling back to the local model if the remote fails.
    pub async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        match self {
            QueryEmbedder::Primary { remote, fallback } => match remote.embed(texts).await {
                Ok(vectors) => Ok(vectors),
                Err(e) => {
                    tracing::warn!(
                        model = remote.model_name(),
                        error = %e,
                        "remote embedding failed, falling back to local model"
                    );
                    match fallback {
                        Some(local) => embed_local_or_fail(local.as_ref(), texts).await,
                        None => Err(ConfigError::NoEmbeddingModel.into()),
                    }
                }
            },
            QueryEmbedder::Fallback(local) => embed_local_or_fail(local.as_ref(), texts).await,
        }
    }

    /// Embed a single query text.
    pub async fn embed_query(&self, text: &str) -> Result<Vec<f32>> {
        let results = self.embed(&[text.to_string()]).await?;
        results
            .into_iter()
            .next()
            .ok_or_else(|| anyhow::anyhow!("Empty embedding response"))
    }
}

async fn embed_local_or_fail(local: &dyn Embedder, texts: &[String]) -> Result<Vec<Vec<f32>>> {
    local.embed(texts).await.map_err(|e| {
        tracing::warn!(model = local.model_name(), error = %e, "local embedding failed");
        ConfigError::NoEmbeddingModel.into()
    })
}

#[cfg(feature = "local-models")]
fn local_embedder(config: &EmbeddingConfig) -> Option<Arc<dyn Embedder>> {
    match LocalEmbedder::new(&config.local_model, config.batch_size) {
        Ok(e) => Some(Arc::new(e)),
        Err(e) => {
            tracing::warn!(model = %config.local_model, error = %e, "local embedder unavailable");
            None
        }
    }
}

#[cfg(not(feature = "local-models"))]
fn local_embedder(_config: &EmbeddingConfig) -> Option<Arc<dyn Embedder>> {
    None
}

// ============ OpenAI ============

/// Embedder using the OpenAI API (`POST /v1/embeddings`).
///
/// Requires the `OPENAI_API_KEY` environment variable. `embedding.url`
/// points it at any OpenAI-compatible endpoint.
pub struct OpenAiEmbedder {
    model: String,
    dims: Option<usize>,
    base_url: String,
    api_key: String,
    max_retries: u32,
    client: reqwest::Client,
}

impl OpenAiEmbedder {
    pub fn new(config: &EmbeddingConfig) -> Result<Self> {
        let api_key = std::env::var("OPENAI_API_KEY")
            .map_err(|_| anyhow::anyhow!("OPENAI_API_KEY environment variable not set"))?;

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;

        Ok(Self {
            model: config.model.clone(),
            dims: config.dims,
            base_url: base_url(config.url.as_deref(), OPENAI_DEFAULT_URL),
            api_key,
            max_retries: config.max_retries,
            client,
        })
    }
}

#[async_trait]
impl Embedder for OpenAiEmbedder {
    fn model_name(&self) -> &str {
        &self.model
    }

    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let mut body = serde_json::json!({
            "model": self.model,
            "input": texts,
        });
        if let Some(dims) = self.dims {
            body["dimensions"] = serde_json::json!(dims);
        }

        let url = format!("{}/v1/embeddings", self.base_url);
        let json = post_with_retry("OpenAI", self.max_retries, || {
            self.client
                .post(&url)
                .header("Authorization", format!("Bearer {}", self.api_key))
                .json(&body)
        })
        .await?;

        parse_openai_response(&json)
    }
}

/// Extract `data[].embedding`, ordered by `data[].index`.
fn parse_openai_response(json: &serde_json::Value) -> Result<Vec<Vec<f32>>> {
    let data = json
        .get("data")
        .and_then(|d| d.as_array())
        .ok_or_else(|| anyhow::anyhow!("Invalid OpenAI response: missing data array"))?;

    let mut indexed = Vec::with_capacity(data.len());

    for (position, item) in data.iter().enumerate() {
        let embedding = item
            .get("embedding")
            .and_then(|e| e.as_array())
            .ok_or_else(|| anyhow::anyhow!("Invalid OpenAI response: missing embedding"))?;

        let index = item
            .get("index")
            .and_then(|i| i.as_u64())
            .unwrap_or(position as u64);

        indexed.push((index, json_to_vec(embedding)));
    }

    indexed.sort_by_key(|(index, _)| *index);
    Ok(indexed.into_iter().map(|(_, v)| v).collect())
}

// ============ Ollama ============

/// Embedder using an Ollama instance (`POST /api/embed`).
pub struct OllamaEmbedder {
    model: String,
    base_url: String,
    max_retries: u32,
    client: reqwest::Client,
}

impl OllamaEmbedder {
    pub fn new(config: &EmbeddingConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;

        Ok(Self {
            model: config.model.clone(),
            base_url: base_url(config.url.as_deref(), OLLAMA_DEFAULT_URL),
            max_retries: config.max_retries,
            client,
        })
    }
}

#[async_trait]
impl Embedder for OllamaEmbedder {
    fn model_name(&self) -> &str {
        &self.model
    }

    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let body = serde_json::json!({
            "model": self.model,
            "input": texts,
        });

        let url = format!("{}/api/embed", self.base_url);
        let json = post_with_retry("Ollama", self.max_retries, || {
            self.client.post(&url).json(&body)
        })
        .await?;

        parse_ollama_response(&json)
    }
}

fn parse_ollama_response(json: &serde_json::Value) -> Result<Vec<Vec<f32>>> {
    let embeddings = json
        .get("embeddings")
        .and_then(|e| e.as_array())
        .ok_or_else(|| anyhow::anyhow!("Invalid Ollama response: missing embeddings array"))?;

    embeddings
        .iter()
        .map(|embedding| {
            embedding
                .as_array()
                .map(|values| json_to_vec(values))
                .ok_or_else(|| anyhow::anyhow!("Invalid Ollama response: embedding is not an array"))
        })
        .collect()
}

// ============ HTTP helpers ============

fn base_url(configured: Option<&str>, default: &str) -> String {
    configured.unwrap_or(default).trim_end_matches('/').to_string()
}

fn json_to_vec(values: &[serde_json::Value]) -> Vec<f32> {
    values
        .iter()
        .map(|v| v.as_f64().unwrap_or(0.0) as f32)
        .collect()
}

/// Send a JSON request with exponential backoff on 429, 5xx and network errors.
async fn post_with_retry<F>(service: &str, max_retries: u32, build: F) -> Result<serde_json::Value>
where
    F: Fn() -> reqwest::RequestBuilder,
{
    let mut last_err = None;

    for attempt in 0..=max_retries {
        if attempt > 0 {
            // Exponential backoff: 1s, 2s, 4s, 8s, ...
            let delay = Duration::from_secs(1 << (attempt - 1).min(5));
            tokio::time::sleep(delay).await;
        }

        match build().send().await {
            Ok(response) => {
                let status = response.status();

                if status.is_success() {
                    return Ok(response.json().await?);
                }

                // Rate limited or server error, retry
                if status.as_u16() == 429 || status.is_server_error() {
                    let body_text = response.text().await.unwrap_or_default();
                    last_err = Some(anyhow::anyhow!(
                        "{} API error {}: {}",
                        service,
                        status,
                        body_text
                    ));
                    continue;
                }

                // Client error (not 429), no retry
                let body_text = response.text().await.unwrap_or_default();
                bail!("{} API error {}: {}", service, status, body_text);
            }
            Err(e) => {
                last_err = Some(anyhow::anyhow!("{} connection error: {}", service, e));
                continue;
            }
        }
    }

    Err(last_err.unwrap_or_else(|| anyhow::anyhow!("{} embedding failed after retries", service)))
}

// ============ Vector utilities ============

/// Encode a float vector as a BLOB (little-endian f32 bytes).
///
/// ```rust
/// use grounded_rag::embedding::{vec_to_blob, blob_to_vec};
///
/// let v = vec![1.0f32, -2.5, 3.125];
/// let blob = vec_to_blob(&v);
/// assert_eq!(blob.len(), 12); // 3 × 4 bytes
/// assert_eq!(blob_to_vec(&blob), v);
/// ```
pub fn vec_to_blob(vec: &[f32]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(vec.len() * 4);
    for &v in vec {
        bytes.extend_from_slice(&v.to_le_bytes());
    }
    bytes
}

/// Decode a BLOB written by [`vec_to_blob`].
pub fn blob_to_vec(blob: &[u8]) -> Vec<f32> {
    blob.chunks_exact(4)
        .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
        .collect()
}

/// Cosine similarity in `[-1.0, 1.0]`.
///
/// Returns `0.0` for empty vectors, zero vectors, or vectors of different
/// lengths (e.g. a query embedded by the local fallback compared against
/// chunks embedded by a remote model).
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

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct FixedEmbedder {
        name: &'static str,
        vector: Vec<f32>,
        calls: AtomicUsize,
    }

    impl FixedEmbedder {
        fn new(name: &'static str, vector: Vec<f32>) -> Self {
            Self {
                name,
                vector,
                calls: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl Embedder for FixedEmbedder {
        fn model_name(&self) -> &str {
            self.name
        }
        async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(texts.iter().map(|_| self.vector.clone()).collect())
        }
    }

    struct FailingEmbedder;

    #[async_trait]
    impl Embedder for FailingEmbedder {
        fn model_name(&self) -> &str {
            "failing"
        }
        async fn embed(&self, _texts: &[String]) -> Result<Vec<Vec<f32>>> {
            bail!("connection refused")
        }
    }

    fn is_no_model(err: &anyhow::Error) -> bool {
        matches!(
            err.downcast_ref::<ConfigError>(),
            Some(ConfigError::NoEmbeddingModel)
        )
    }

    #[tokio::test]
    async fn test_primary_success_skips_fallback() {
        let local = Arc::new(FixedEmbedder::new("local", vec![0.0, 1.0]));
        let embedder = QueryEmbedder::new(
            Some(Arc::new(FixedEmbedder::new("remote", vec![1.0, 0.0]))),
            Some(local.clone()),
        )
        .unwrap();

        assert_eq!(embedder.embed_query("q").await.unwrap(), vec![1.0, 0.0]);
        assert_eq!(local.calls.load(Ordering::SeqCst), 0);
        assert_eq!(embedder.model_name(), "remote");
    }

    #[tokio::test]
    async fn test_remote_failure_falls_back_to_local() {
        let embedder = QueryEmbedder::new(
            Some(Arc::new(FailingEmbedder)),
            Some(Arc::new(FixedEmbedder::new("local", vec![0.5, 0.5]))),
        )
        .unwrap();

        assert_eq!(embedder.embed_query("q").await.unwrap(), vec![0.5, 0.5]);
    }

    #[tokio::test]
    async fn test_remote_failure_without_local_is_config_error() {
        let embedder = QueryEmbedder::new(Some(Arc::new(FailingEmbedder)), None).unwrap();
        let err = embedder.embed_query("q").await.unwrap_err();
        assert!(is_no_model(&err), "unexpected error: {err:#}");
    }

    #[tokio::test]
    async fn test_failing_local_only_is_config_error() {
        let embedder = QueryEmbedder::new(None, Some(Arc::new(FailingEmbedder))).unwrap();
        assert!(matches!(embedder, QueryEmbedder::Fallback(_)));
        let err = embedder.embed(&["q".to_string()]).await.unwrap_err();
        assert!(is_no_model(&err));
    }

    #[test]
    fn test_no_backend_fails_construction() {
        let err = QueryEmbedder::new(None, None).err().unwrap();
        assert!(is_no_model(&err));
    }

    #[test]
    fn test_disabled_provider_fails_construction() {
        let config = EmbeddingConfig {
            provider: "disabled".to_string(),
            ..EmbeddingConfig::default()
        };
        let err = QueryEmbedder::from_config(&config).err().unwrap();
        assert!(is_no_model(&err));
    }

    #[tokio::test]
    async fn test_query_path_falls_back_without_backoff() {
        let config = EmbeddingConfig {
            provider: "ollama".to_string(),
            model: "nomic-embed-text".to_string(),
            url: Some("http://127.0.0.1:1".to_string()),
            ..EmbeddingConfig::default()
        };
        assert_eq!(config.max_retries, 5);

        let remote = OllamaEmbedder::new(&config.for_queries()).unwrap();
        let embedder = QueryEmbedder::new(
            Some(Arc::new(remote)),
            Some(Arc::new(FixedEmbedder::new("local", vec![1.0]))),
        )
        .unwrap();

        let started = std::time::Instant::now();
        assert_eq!(embedder.embed_query("q").await.unwrap(), vec![1.0]);
        assert!(
            started.elapsed() < Duration::from_secs(1),
            "fallback took {:?}",
            started.elapsed()
        );
    }

    #[test]
    fn test_parse_openai_response_orders_by_index() {
        let json = serde_json::json!({
            "data": [
                { "index": 1, "embedding": [0.0, 1.0] },
                { "index": 0, "embedding": [1.0, 0.0] }
            ]
        });
        let vectors = parse_openai_response(&json).unwrap();
        assert_eq!(vectors, vec![vec![1.0, 0.0], vec![0.0, 1.0]]);
    }

    #[test]
    fn test_parse_openai_response_missing_data() {
        assert!(parse_openai_response(&serde_json::json!({ "error": "x" })).is_err());
    }

    #[test]
    fn test_parse_ollama_response() {
        let json = serde_json::json!({ "embeddings": [[0.25, 0.5], [1.0, 2.0]] });
        let vectors = parse_ollama_response(&json).unwrap();
        assert_eq!(vectors, vec![vec![0.25, 0.5], vec![1.0, 2.0]]);
        assert!(parse_ollama_response(&serde_json::json!({ "embeddings": [1.0] })).is_err());
    }

    #[test]
    fn test_base_url_trims_trailing_slash() {
        assert_eq!(base_url(Some("http://host:1/"), OLLAMA_DEFAULT_URL), "http://host:1");
        assert_eq!(base_url(None, OPENAI_DEFAULT_URL), OPENAI_DEFAULT_URL);
    }

    #[test]
    fn test_vec_blob_roundtrip() {
        let vec = vec![1.0f32, -2.5, 3.125, 0.0, -0.001];
        assert_eq!(blob_to_vec(&vec_to_blob(&vec)), vec);
    }

    #[test]
    fn test_cosine_identical() {
        let v = vec![1.0, 2.0, 3.0];
        assert!((cosine_similarity(&v, &v) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_cosine_orthogonal() {
        assert!(cosine_similarity(&[1.0, 0.0, 0.0], &[0.0, 1.0, 0.0]).abs() < 1e-6);
    }

    #[test]
    fn test_cosine_opposite() {
        assert!((cosine_similarity(&[1.0, 0.0], &[-1.0, 0.0]) + 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_cosine_empty_or_mismatched() {
        assert_eq!(cosine_similarity(&[], &[]), 0.0);
        assert_eq!(cosine_similarity(&[1.0, 2.0], &[1.0]), 0.0);
        assert_eq!(cosine_similarity(&[0.0, 0.0], &[1.0, 1.0]), 0.0);
    }
}
