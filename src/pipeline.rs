//! The guarded query pipeline.
//!
//! One call to [`QueryPipeline::run`] moves a question through:
//!
//! ```text
//! topic gate ──reject──▶ RejectedByTopic (fixed refusal, no cost)
//!     │
//! mask PII in question
//!     │
//! hybrid retrieval (keyword ∥ vector, fused)
//!     │
//! rerank ─▶ keep context_k passages
//!     │
//! generate (remote, local on failure)
//!     │
//! mask PII in answer
//!     │
//! extract + validate citations ──invalid──▶ RejectedByCitation (fixed refusal)
//!     │
//! Answered
//! ```
//!
//! Stage failures inside the PII detector, reranker and generator are
//! absorbed by their fallbacks. Only store failures and a missing
//! embedding backend surface as `Err`.

use anyhow::Result;
use std::sync::Arc;
use std::time::Instant;

use crate::citations;
use crate::config::Config;
use crate::embedding::QueryEmbedder;
use crate::generate::Generator;
use crate::models::{DocumentChunk, QueryResponse};
use crate::pii::PiiDetector;
use crate::rerank::Reranker;
use crate::retriever::{HybridRetriever, HybridWeights};
use crate::store::ChunkStore;
use crate::topic::TopicGate;

pub const REFUSAL_DISALLOWED_TOPIC: &str = "I'm sorry, I am not allowed to answer this question.";

pub const REFUSAL_UNRELIABLE_CITATIONS: &str =
    "I'm sorry, I cannot provide a reliable answer because the citations are invalid.";

/// How a request left the pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineOutcome {
    Answered,
    RejectedByTopic,
    RejectedByCitation,
}

impl PipelineOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            PipelineOutcome::Answered => "answered",
            PipelineOutcome::RejectedByTopic => "rejected_topic",
            PipelineOutcome::RejectedByCitation => "rejected_citation",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct PipelineResult {
    pub response: QueryResponse,
    pub outcome: PipelineOutcome,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PipelineSettings {
    /// Candidates per search channel, and after fusion.
    pub top_k: usize,
    /// Passages passed to the generator.
    pub context_k: usize,
    /// Passages kept by the reranker; `None` keeps all.
    pub rerank_top_k: Option<usize>,
    pub cost_per_1k_tokens: f64,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            top_k: 8,
            context_k: 4,
            rerank_top_k: None,
            cost_per_1k_tokens: 0.0005,
        }
    }
}

impl PipelineSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            top_k: config.retrieval.top_k,
            context_k: config.retrieval.context_k,
            rerank_top_k: config.reranker.top_k,
            cost_per_1k_tokens: config.generation.cost_per_1k_tokens,
        }
    }
}

pub struct QueryPipeline {
    topic_gate: TopicGate,
    pii: PiiDetector,
    retriever: HybridRetriever,
    reranker: Reranker,
    generator: Generator,
    settings: PipelineSettings,
}

impl QueryPipeline {
    pub fn new(
        topic_gate: TopicGate,
        pii: PiiDetector,
        retriever: HybridRetriever,
        reranker: Reranker,
        generator: Generator,
        settings: PipelineSettings,
    ) -> Self {
        Self {
            topic_gate,
            pii,
            retriever,
            reranker,
            generator,
            settings,
        }
    }

    /// Assemble every stage from configuration.
    ///
    /// Fails on invalid hybrid weights or when no embedding backend is
    /// available. Unavailable PII, reranker and generation backends
    /// resolve to their fallbacks.
    pub async fn from_config(config: &Config, store: Arc<dyn ChunkStore>) -> Result<Self> {
        let weights = HybridWeights::from_config(&config.retrieval)?;
        let embedder = QueryEmbedder::from_config(&config.embedding.for_queries())?;
        let pii = PiiDetector::from_config(&config.guardrails).await;
        let reranker = Reranker::from_config(&config.reranker).await;
        let generator = Generator::from_config(&config.generation);

        tracing::info!(
            embedder = embedder.model_name(),
            pii = pii.backend_name(),
            reranker = if reranker.is_identity() { "identity" } else { "cross-encoder" },
            generator = generator.name(),
            "query pipeline ready"
        );

        Ok(Self::new(
            TopicGate::new(&config.guardrails.denylist),
            pii,
            HybridRetriever::new(store, embedder, weights),
            reranker,
            generator,
            PipelineSettings::from_config(config),
        ))
    }

    pub fn settings(&self) -> &PipelineSettings {
        &self.settings
    }

    /// Answer a question with the configured candidate count.
    pub async fn answer(&self, question: &str) -> Result<QueryResponse> {
        Ok(self.run(question, None).await?.response)
    }

    /// Run the full pipeline; `top_k` overrides the candidate count.
    #[tracing::instrument(name = "query", skip_all, fields(outcome = tracing::field::Empty))]
    pub async fn run(&self, question: &str, top_k: Option<usize>) -> Result<PipelineResult> {
        let started = Instant::now();

        if let Some(keyword) = self.topic_gate.matched_keyword(question) {
            tracing::info!(keyword, "question rejected by topic gate");
            tracing::Span::current().record("outcome", PipelineOutcome::RejectedByTopic.as_str());
            return Ok(PipelineResult {
                response: QueryResponse {
                    answer: REFUSAL_DISALLOWED_TOPIC.to_string(),
                    citations: Vec::new(),
                    cost: 0.0,
                    latency_ms: elapsed_ms(started),
                },
                outcome: PipelineOutcome::RejectedByTopic,
            });
        }

        let masked_query = self.pii.redact(question).await;

        let top_k = top_k.unwrap_or(self.settings.top_k).max(1);
        let retrieved = self.retriever.search(&masked_query, top_k).await?;
        tracing::debug!(retrieved = retrieved.len(), "retrieval complete");

        let mut contexts = self
            .reranker
            .rerank(&masked_query, retrieved, self.settings.rerank_top_k)
            .await;
        contexts.truncate(self.settings.context_k);
        tracing::debug!(contexts = contexts.len(), "reranking complete");

        let raw_answer = self.generator.generate(&masked_query, &contexts).await;
        let answer = self.pii.redact(&raw_answer).await;

        let cited = citations::extract(&answer);
        let cost = estimate_cost(&contexts, self.settings.cost_per_1k_tokens);

        let (answer, cited, outcome) =
            if citations::validate(&cited, &citations::retrieved_keys(&contexts)) {
                (answer, cited, PipelineOutcome::Answered)
            } else {
                tracing::info!(
                    citations = cited.len(),
                    "answer cites passages outside its contexts, refusing"
                );
                (
                    REFUSAL_UNRELIABLE_CITATIONS.to_string(),
                    Vec::new(),
                    PipelineOutcome::RejectedByCitation,
                )
            };

        tracing::Span::current().record("outcome", outcome.as_str());

        Ok(PipelineResult {
            response: QueryResponse {
                answer,
                citations: cited,
                cost,
                latency_ms: elapsed_ms(started),
            },
            outcome,
        })
    }
}

/// Dollar cost, linear in the whitespace token count of `contexts`.
pub fn estimate_cost(contexts: &[DocumentChunk], cost_per_1k_tokens: f64) -> f64 {
    let tokens: usize = contexts
        .iter()
        .map(|c| c.content.split_whitespace().count())
        .sum();
    cost_per_1k_tokens * tokens as f64 / 1000.0
}

fn elapsed_ms(started: Instant) -> f64 {
    started.elapsed().as_secs_f64() * 1000.0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_estimate_cost_linear_in_tokens() {
        let contexts = vec![
            DocumentChunk::new("a", 0, "one two three", 0.0),
            DocumentChunk::new("b", 0, "  four\nfive ", 0.0),
        ];
        let cost = estimate_cost(&contexts, 0.0005);
        assert!((cost - 0.0005 * 5.0 / 1000.0).abs() < 1e-15);
        assert_eq!(estimate_cost(&[], 0.0005), 0.0);
    }

    #[test]
    fn test_outcome_labels() {
        assert_eq!(PipelineOutcome::Answered.as_str(), "answered");
        assert_eq!(PipelineOutcome::RejectedByTopic.as_str(), "rejected_topic");
        assert_eq!(
            PipelineOutcome::RejectedByCitation.as_str(),
            "rejected_citation"
        );
    }
}
