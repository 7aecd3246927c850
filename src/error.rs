//! Typed configuration errors.
//!
//! Configuration errors are fatal: they surface at startup (or, for
//! [`ConfigError::NoEmbeddingModel`], on the first query that needs an
//! embedding once every backend has failed) and are never retried.
//! They travel inside [`anyhow::Error`]; recover them with
//! `err.downcast_ref::<ConfigError>()`.

use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum ConfigError {
    #[error("hybrid weights must sum to 1.0 (keyword={keyword}, vector={vector})")]
    InvalidWeights { keyword: f64, vector: f64 },

    #[error("no embedding model available; configure a remote provider or enable the `local-models` feature")]
    NoEmbeddingModel,

    #[error("unknown embedding provider: '{0}'. Must be openai, ollama, local, or disabled")]
    UnknownEmbeddingProvider(String),

    #[error("unknown generation model: '{0}'. Use openai:<model>, ollama:<model>, or local")]
    UnknownGenerationModel(String),

    #[error("{0}")]
    Invalid(String),
}
