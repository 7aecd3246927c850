//! Answer generation with a deterministic local fallback.
//!
//! Remote generators ([`OpenAiGenerator`], [`OllamaGenerator`]) send the
//! question and the selected contexts to a chat-completion endpoint with a
//! system instruction that restricts the model to the supplied passages
//! and requires `[doc_id:chunk_id]` citation markers.
//!
//! [`LocalGenerator`] needs no network: it returns the top-ranked context
//! followed by its citation marker, or [`NO_INFORMATION_FOUND`] when there
//! is nothing to answer from.
//!
//! [`Generator::generate`] never fails. Any remote error (transport, auth,
//! quota, malformed or empty response) is logged and the request is
//! answered by the local generator instead.

use anyhow::{bail, Result};
use async_trait::async_trait;
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;

use crate::config::GenerationConfig;
use crate::models::DocumentChunk;

/// Returned by the local generator when no context is available.
pub const NO_INFORMATION_FOUND: &str =
    "I'm sorry, I could not find relevant information in the corpus.";

pub const SYSTEM_PROMPT: &str = "You are an assistant that answers exclusively from the provided documents. \
Always cite your sources with the passage identifiers in the form [doc_id:chunk_id], exactly as they appear in the context. \
If the requested information does not appear in the context, politely say that you do not know.";

const OPENAI_DEFAULT_URL: &str = "https://api.openai.com";
const OLLAMA_DEFAULT_URL: &str = "http://localhost:11434";

#[async_trait]
pub trait AnswerGenerator: Send + Sync {
    /// Identifier used in logs, e.g. `openai:gpt-4o-mini`.
    fn name(&self) -> &str;

    async fn generate(&self, query: &str, contexts: &[DocumentChunk]) -> Result<String>;
}

/// One `[doc_id:chunk_id] content` line per context.
pub fn build_context_block(contexts: &[DocumentChunk]) -> String {
    contexts
        .iter()
        .map(|c| format!("{} {}", c.marker(), c.content.trim()))
        .collect::<Vec<_>>()
        .join("\n")
}

pub fn build_user_prompt(query: &str, contexts: &[DocumentChunk]) -> String {
    format!(
        "Question: {}\n\nContext:\n{}\n\nAnswer the question using only the context above and cite the relevant passages.",
        query,
        build_context_block(contexts)
    )
}

fn chat_messages(query: &str, contexts: &[DocumentChunk]) -> serde_json::Value {
    serde_json::json!([
        { "role": "system", "content": SYSTEM_PROMPT },
        { "role": "user", "content": build_user_prompt(query, contexts) },
    ])
}

// ============ Local ============

#[derive(Debug, Clone, Copy, Default)]
pub struct LocalGenerator;

impl LocalGenerator {
    pub fn answer(&self, contexts: &[DocumentChunk]) -> String {
        match contexts.first() {
            None => NO_INFORMATION_FOUND.to_string(),
            Some(top) => format!("{}\n\n{}", top.content.trim(), top.marker()),
        }
    }
}

#[async_trait]
impl AnswerGenerator for LocalGenerator {
    fn name(&self) -> &str {
        "local"
    }

    async fn generate(&self, _query: &str, contexts: &[DocumentChunk]) -> Result<String> {
        Ok(self.answer(contexts))
    }
}

// ============ OpenAI ============

/// `POST /v1/chat/completions` on OpenAI or a compatible endpoint.
pub struct OpenAiGenerator {
    name: String,
    model: String,
    base_url: String,
    api_key: String,
    temperature: f32,
    max_tokens: u32,
    client: reqwest::Client,
}

#[derive(Debug, Deserialize)]
struct ChatCompletionResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: Option<ChatMessage>,
}

#[derive(Debug, Deserialize)]
struct ChatMessage {
    content: Option<String>,
}

impl OpenAiGenerator {
    pub fn new(model: &str, config: &GenerationConfig) -> Result<Self> {
        let api_key = std::env::var("OPENAI_API_KEY")
            .map_err(|_| anyhow::anyhow!("OPENAI_API_KEY environment variable not set"))?;

        Ok(Self {
            name: format!("openai:{}", model),
            model: model.to_string(),
            base_url: config
                .url
                .as_deref()
                .unwrap_or(OPENAI_DEFAULT_URL)
                .trim_end_matches('/')
                .to_string(),
            api_key,
            temperature: config.temperature,
            max_tokens: config.max_tokens,
            client: http_client(config)?,
        })
    }
}

#[async_trait]
impl AnswerGenerator for OpenAiGenerator {
    fn name(&self) -> &str {
        &self.name
    }

    async fn generate(&self, query: &str, contexts: &[DocumentChunk]) -> Result<String> {
        let body = serde_json::json!({
            "model": self.model,
            "messages": chat_messages(query, contexts),
            "temperature": self.temperature,
            "max_tokens": self.max_tokens,
        });

        let resp = self
            .client
            .post(format!("{}/v1/chat/completions", self.base_url))
            .header("Authorization", format!("Bearer {}", self.api_key))
            .json(&body)
            .send()
            .await?;

        let status = resp.status();
        if !status.is_success() {
            let body_text = resp.text().await.unwrap_or_default();
            bail!("OpenAI API error {}: {}", status, body_text);
        }

        let parsed: ChatCompletionResponse = resp.json().await?;
        let content = parsed
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message)
            .and_then(|m| m.content)
            .unwrap_or_default();
        non_empty(content, "OpenAI")
    }
}

// ============ Ollama ============

/// `POST /api/chat` on an Ollama instance, non-streaming.
pub struct OllamaGenerator {
    name: String,
    model: String,
    base_url: String,
    temperature: f32,
    client: reqwest::Client,
}

#[derive(Debug, Deserialize)]
struct OllamaChatResponse {
    message: Option<ChatMessage>,
}

impl OllamaGenerator {
    pub fn new(model: &str, config: &GenerationConfig) -> Result<Self> {
        Ok(Self {
            name: format!("ollama:{}", model),
            model: model.to_string(),
            base_url: config
                .url
                .as_deref()
                .unwrap_or(OLLAMA_DEFAULT_URL)
                .trim_end_matches('/')
                .to_string(),
            temperature: config.temperature,
            client: http_client(config)?,
        })
    }
}

#[async_trait]
impl AnswerGenerator for OllamaGenerator {
    fn name(&self) -> &str {
        &self.name
    }

    async fn generate(&self, query: &str, contexts: &[DocumentChunk]) -> Result<String> {
        let body = serde_json::json!({
            "model": self.model,
            "messages": chat_messages(query, contexts),
            "stream": false,
            "options": { "temperature": self.temperature },
        });

        let resp = self
            .client
            .post(format!("{}/api/chat", self.base_url))
            .json(&body)
            .send()
            .await?;

        let status = resp.status();
        if !status.is_success() {
            let body_text = resp.text().await.unwrap_or_default();
            bail!("Ollama API error {}: {}", status, body_text);
        }

        let parsed: OllamaChatResponse = resp.json().await?;
        let content = parsed.message.and_then(|m| m.content).unwrap_or_default();
        non_empty(content, "Ollama")
    }
}

fn http_client(config: &GenerationConfig) -> Result<reqwest::Client> {
    Ok(reqwest::Client::builder()
        .timeout(Duration::from_secs(config.timeout_secs))
        .build()?)
}

fn non_empty(content: String, service: &str) -> Result<String> {
    let trimmed = content.trim();
    if trimmed.is_empty() {
        bail!("{} returned an empty answer", service);
    }
    Ok(trimmed.to_string())
}

// ============ Generator choice ============

/// The generation strategy, resolved once at construction.
#[derive(Clone)]
pub enum Generator {
    /// A remote model; the local generator answers when it fails.
    Primary(Arc<dyn AnswerGenerator>),
    Fallback(LocalGenerator),
}

impl Generator {
    /// Resolve `generation.model`. A remote backend that cannot be
    /// constructed (e.g. missing API key) resolves to the local generator.
    pub fn from_config(config: &GenerationConfig) -> Self {
        let remote: Result<Arc<dyn AnswerGenerator>> = match config.model.split_once(':') {
            Some(("openai", model)) => {
                OpenAiGenerator::new(model, config).map(|g| Arc::new(g) as Arc<dyn AnswerGenerator>)
            }
            Some(("ollama", model)) => {
                OllamaGenerator::new(model, config).map(|g| Arc::new(g) as Arc<dyn AnswerGenerator>)
            }
            _ => return Generator::Fallback(LocalGenerator),
        };

        match remote {
            Ok(generator) => Generator::Primary(generator),
            Err(e) => {
                tracing::warn!(
                    model = %config.model,
                    error = %e,
                    "remote generator unavailable, using local generator"
                );
                Generator::Fallback(LocalGenerator)
            }
        }
    }

    pub fn name(&self) -> &str {
        match self {
            Generator::Primary(remote) => remote.name(),
            Generator::Fallback(local) => local.name(),
        }
    }

    /// Generate an answer; remote failures degrade to the local generator.
    pub async fn generate(&self, query: &str, contexts: &[DocumentChunk]) -> String {
        match self {
            Generator::Primary(remote) => match remote.generate(query, contexts).await {
                Ok(answer) => answer,
                Err(e) => {
                    tracing::warn!(
                        generator = remote.name(),
                        error = %e,
                        "remote generation failed, using local generator"
                    );
                    LocalGenerator.answer(contexts)
                }
            },
            Generator::Fallback(local) => local.answer(contexts),
        }
    }
}
