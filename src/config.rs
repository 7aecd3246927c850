use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

use crate::error::ConfigError;

/// Maximum allowed deviation of `weight_keyword + weight_vector` from 1.0.
pub const WEIGHT_SUM_TOLERANCE: f64 = 0.01;

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub db: DbConfig,
    #[serde(default)]
    pub chunking: ChunkingConfig,
    #[serde(default)]
    pub retrieval: RetrievalConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub reranker: RerankerConfig,
    #[serde(default)]
    pub generation: GenerationConfig,
    #[serde(default)]
    pub guardrails: GuardrailsConfig,
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DbConfig {
    pub path: PathBuf,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ChunkingConfig {
    /// Window size in whitespace-delimited words.
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,
    /// Words shared by consecutive windows.
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
    512
}
fn default_chunk_overlap() -> usize {
    64
}

#[derive(Debug, Deserialize, Clone)]
pub struct RetrievalConfig {
    /// Candidates fetched from each search channel and kept after fusion.
    #[serde(default = "default_top_k")]
    pub top_k: usize,
    /// Passages handed to the generator after reranking.
    #[serde(default = "default_context_k")]
    pub context_k: usize,
    #[serde(default = "default_weight")]
    pub weight_keyword: f64,
    #[serde(default = "default_weight")]
    pub weight_vector: f64,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            top_k: default_top_k(),
            context_k: default_context_k(),
            weight_keyword: default_weight(),
            weight_vector: default_weight(),
        }
    }
}

fn default_top_k() -> usize {
    8
}
fn default_context_k() -> usize {
    4
}
fn default_weight() -> f64 {
    0.5
}

#[derive(Debug, Deserialize, Clone)]
pub struct EmbeddingConfig {
    #[serde(default = "default_provider")]
    pub provider: String,
    /// Remote embedding model name.
    #[serde(default = "default_embedding_model")]
    pub model: String,
    #[serde(default)]
    pub dims: Option<usize>,
    /// Base URL override (Ollama host or an OpenAI-compatible endpoint).
    #[serde(default)]
    pub url: Option<String>,
    /// Fall back to the local model when the remote provider fails.
    #[serde(default = "default_true")]
    pub local_fallback: bool,
    #[serde(default = "default_local_model")]
    pub local_model: String,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    /// Retries per ingestion batch.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    /// Retries per query embedding before the local fallback runs.
    #[serde(default)]
    pub query_max_retries: u32,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            model: default_embedding_model(),
            dims: None,
            url: None,
            local_fallback: true,
            local_model: default_local_model(),
            batch_size: default_batch_size(),
            max_retries: default_max_retries(),
            query_max_retries: 0,
            timeout_secs: default_timeout_secs(),
        }
    }
}

fn default_provider() -> String {
    "openai".to_string()
}
fn default_embedding_model() -> String {
    "text-embedding-3-small".to_string()
}
fn default_local_model() -> String {
    "all-minilm-l6-v2".to_string()
}
fn default_batch_size() -> usize {
    64
}
fn default_max_retries() -> u32 {
    5
}
fn default_timeout_secs() -> u64 {
    30
}
fn default_true() -> bool {
    true
}

impl EmbeddingConfig {
    /// True when the primary provider is a network service.
    pub fn is_remote(&self) -> bool {
        matches!(self.provider.as_str(), "openai" | "ollama")
    }

    /// This configuration with the query-time retry budget in place of
    /// the ingestion one.
    pub fn for_queries(&self) -> Self {
        Self {
            max_retries: self.query_max_retries,
            ..self.clone()
        }
    }
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct RerankerConfig {
    /// Cross-encoder model name. Absent means identity ranking.
    #[serde(default)]
    pub model: Option<String>,
    /// Passages kept after reranking. Defaults to all.
    #[serde(default)]
    pub top_k: Option<usize>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct GenerationConfig {
    /// `openai:<model>`, `ollama:<model>`, or `local`.
    #[serde(default = "default_generation_model")]
    pub model: String,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub temperature: f32,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    #[serde(default = "default_generation_timeout")]
    pub timeout_secs: u64,
    /// Dollars per 1 000 context tokens.
    #[serde(default = "default_cost_per_1k")]
    pub cost_per_1k_tokens: f64,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            model: default_generation_model(),
            url: None,
            temperature: 0.0,
            max_tokens: default_max_tokens(),
            timeout_secs: default_generation_timeout(),
            cost_per_1k_tokens: default_cost_per_1k(),
        }
    }
}

fn default_generation_model() -> String {
    "openai:gpt-4o-mini".to_string()
}
fn default_max_tokens() -> u32 {
    1024
}
fn default_generation_timeout() -> u64 {
    60
}
fn default_cost_per_1k() -> f64 {
    0.0005
}

#[derive(Debug, Deserialize, Clone)]
pub struct GuardrailsConfig {
    #[serde(default = "default_denylist")]
    pub denylist: Vec<String>,
    /// Presidio-compatible analyzer endpoint. Absent means regex detection.
    #[serde(default)]
    pub pii_analyzer_url: Option<String>,
    #[serde(default = "default_pii_language")]
    pub pii_language: String,
    #[serde(default = "default_rate_limit_requests")]
    pub rate_limit_requests: u32,
    #[serde(default = "default_rate_limit_period")]
    pub rate_limit_period_secs: f64,
}

impl Default for GuardrailsConfig {
    fn default() -> Self {
        Self {
            denylist: default_denylist(),
            pii_analyzer_url: None,
            pii_language: default_pii_language(),
            rate_limit_requests: default_rate_limit_requests(),
            rate_limit_period_secs: default_rate_limit_period(),
        }
    }
}

pub fn default_denylist() -> Vec<String> {
    ["politics", "violence", "weapon", "hate speech", "adult"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}
fn default_pii_language() -> String {
    "en".to_string()
}
fn default_rate_limit_requests() -> u32 {
    60
}
fn default_rate_limit_period() -> f64 {
    60.0
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    #[serde(default = "default_bind")]
    pub bind: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
        }
    }
}

fn default_bind() -> String {
    "127.0.0.1:8000".to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

/// Reject weight pairs that do not sum to 1.0 within [`WEIGHT_SUM_TOLERANCE`].
pub fn validate_weights(keyword: f64, vector: f64) -> Result<(), ConfigError> {
    let valid = keyword >= 0.0
        && vector >= 0.0
        && (keyword + vector - 1.0).abs() <= WEIGHT_SUM_TOLERANCE;
    if valid {
        Ok(())
    } else {
        Err(ConfigError::InvalidWeights { keyword, vector })
    }
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;
    parse_config(&content)
}

/// Parse and validate a TOML configuration string.
pub fn parse_config(content: &str) -> Result<Config> {
    let config: Config = toml::from_str(content).with_context(|| "Failed to parse config file")?;
    validate(&config)?;
    Ok(config)
}

fn validate(config: &Config) -> Result<(), ConfigError> {
    // Chunking
    if config.chunking.chunk_size == 0 {
        return Err(ConfigError::Invalid("chunking.chunk_size must be > 0".into()));
    }
    if config.chunking.chunk_overlap >= config.chunking.chunk_size {
        return Err(ConfigError::Invalid(
            "chunking.chunk_overlap must be smaller than chunking.chunk_size".into(),
        ));
    }

    // Retrieval
    let retrieval = &config.retrieval;
    if retrieval.top_k == 0 {
        return Err(ConfigError::Invalid("retrieval.top_k must be >= 1".into()));
    }
    if retrieval.context_k == 0 {
        return Err(ConfigError::Invalid("retrieval.context_k must be >= 1".into()));
    }
    validate_weights(retrieval.weight_keyword, retrieval.weight_vector)?;
    if config.reranker.top_k == Some(0) {
        return Err(ConfigError::Invalid("reranker.top_k must be >= 1".into()));
    }

    // Embedding
    match config.embedding.provider.as_str() {
        "openai" | "ollama" | "local" | "disabled" => {}
        other => return Err(ConfigError::UnknownEmbeddingProvider(other.to_string())),
    }
    if config.embedding.is_remote() && config.embedding.model.trim().is_empty() {
        return Err(ConfigError::Invalid(format!(
            "embedding.model must not be empty when provider is '{}'",
            config.embedding.provider
        )));
    }

    // Generation
    let model = config.generation.model.as_str();
    let known = model == "local"
        || model
            .split_once(':')
            .is_some_and(|(backend, name)| matches!(backend, "openai" | "ollama") && !name.is_empty());
    if !known {
        return Err(ConfigError::UnknownGenerationModel(model.to_string()));
    }

    // Guardrails
    if config.guardrails.rate_limit_requests == 0 {
        return Err(ConfigError::Invalid(
            "guardrails.rate_limit_requests must be >= 1".into(),
        ));
    }
    let period = config.guardrails.rate_limit_period_secs;
    if !(period.is_finite() && period > 0.0) {
        return Err(ConfigError::Invalid(
            "guardrails.rate_limit_period_secs must be a finite number > 0".into(),
        ));
    }

    Ok(())
}
