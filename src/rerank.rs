//! Cross-encoder reranking with an identity fallback.
//!
//! [`Reranker`] is resolved once from `[reranker]`:
//! - a configured, loadable model → [`Reranker::CrossEncoder`]
//! - no model, an unknown name, a load failure, or a build without the
//!   `local-models` feature → [`Reranker::Identity`]
//!
//! With a cross-encoder, every `(query, passage)` pair is scored, each
//! chunk's `score` is overwritten, and the list is sorted descending
//! (stable on ties). Identity keeps the incoming order. A scoring error at
//! query time degrades that call to identity.

use anyhow::Result;
use async_trait::async_trait;
use std::sync::Arc;

use crate::config::RerankerConfig;
use crate::models::DocumentChunk;
use crate::store::sort_by_score_desc;

/// A pairwise query/passage relevance model.
#[async_trait]
pub trait CrossEncoder: Send + Sync {
    fn model_name(&self) -> &str;

    /// One relevance score per passage, in input order.
    async fn score(&self, query: &str, passages: &[String]) -> Result<Vec<f32>>;
}

#[derive(Clone)]
pub enum Reranker {
    CrossEncoder(Arc<dyn CrossEncoder>),
    Identity,
}

impl Reranker {
    /// Resolve the configured model. Never fails.
    pub async fn from_config(config: &RerankerConfig) -> Self {
        let Some(name) = config.model.as_deref() else {
            return Reranker::Identity;
        };

        match load_cross_encoder(name).await {
            Ok(model) => {
                tracing::info!(model = name, "cross-encoder reranker loaded");
                Reranker::CrossEncoder(model)
            }
            Err(e) => {
                tracing::warn!(model = name, error = %e, "reranker unavailable, using identity order");
                Reranker::Identity
            }
        }
    }

    pub fn is_identity(&self) -> bool {
        matches!(self, Reranker::Identity)
    }

    /// Reorder `chunks` by relevance to `query`, keeping at most `top_k`.
    pub async fn rerank(
        &self,
        query: &str,
        chunks: Vec<DocumentChunk>,
        top_k: Option<usize>,
    ) -> Vec<DocumentChunk> {
        if chunks.is_empty() {
            return chunks;
        }
        let keep = top_k.unwrap_or(chunks.len());

        let model = match self {
            Reranker::CrossEncoder(model) => model,
            Reranker::Identity => return identity(chunks, keep),
        };

        let passages: Vec<String> = chunks.iter().map(|c| c.content.clone()).collect();
        let scores = match model.score(query, &passages).await {
            Ok(scores) if scores.len() == chunks.len() => scores,
            Ok(scores) => {
                tracing::warn!(
                    model = model.model_name(),
                    expected = chunks.len(),
                    got = scores.len(),
                    "reranker returned wrong number of scores, keeping incoming order"
                );
                return identity(chunks, keep);
            }
            Err(e) => {
                tracing::warn!(
                    model = model.model_name(),
                    error = %e,
                    "reranking failed, keeping incoming order"
                );
                return identity(chunks, keep);
            }
        };

        let mut reranked: Vec<DocumentChunk> = chunks
            .into_iter()
            .zip(scores)
            .map(|(mut chunk, score)| {
                chunk.score = f64::from(score);
                chunk
            })
            .collect();

        sort_by_score_desc(&mut reranked);
        reranked.truncate(keep);
        reranked
    }
}

fn identity(mut chunks: Vec<DocumentChunk>, keep: usize) -> Vec<DocumentChunk> {
    chunks.truncate(keep);
    chunks
}

#[cfg(feature = "local-models")]
async fn load_cross_encoder(name: &str) -> Result<Arc<dyn CrossEncoder>> {
    let model = FastembedCrossEncoder::load(name).await?;
    Ok(Arc::new(model))
}

#[cfg(not(feature = "local-models"))]
async fn load_cross_encoder(name: &str) -> Result<Arc<dyn CrossEncoder>> {
    anyhow::bail!(
        "reranker '{}' requires the `local-models` feature",
        name
    )
}

// ============ fastembed cross-encoder ============

#[cfg(feature = "local-models")]
pub use fastembed_impl::FastembedCrossEncoder;

#[cfg(feature = "local-models")]
mod fastembed_impl {
    use super::CrossEncoder;
    use anyhow::{bail, Result};
    use async_trait::async_trait;
    use std::sync::{Arc, Mutex};

    /// fastembed `TextRerank` model, run on the blocking pool.
    pub struct FastembedCrossEncoder {
        name: String,
        model: Arc<Mutex<fastembed::TextRerank>>,
    }

    impl FastembedCrossEncoder {
        /// Download (first use) and load the named model.
        pub async fn load(name: &str) -> Result<Self> {
            let kind = reranker_model(name)?;
            let model = tokio::task::spawn_blocking(move || {
                fastembed::TextRerank::try_new(
                    fastembed::RerankInitOptions::new(kind).with_show_download_progress(false),
                )
                .map_err(|e| anyhow::anyhow!("Failed to initialize reranker model: {}", e))
            })
            .await??;

            Ok(Self {
                name: name.to_string(),
                model: Arc::new(Mutex::new(model)),
            })
        }
    }

    #[async_trait]
    impl CrossEncoder for FastembedCrossEncoder {
        fn model_name(&self) -> &str {
            &self.name
        }

        async fn score(&self, query: &str, passages: &[String]) -> Result<Vec<f32>> {
            let model = Arc::clone(&self.model);
            let query = query.to_string();
            let passages = passages.to_vec();
            let count = passages.len();

            tokio::task::spawn_blocking(move || {
                #[allow(unused_mut)]
                let mut model = model.lock().unwrap_or_else(|e| e.into_inner());

                // Results come back sorted by score; map them to input order.
                let results = model
                    .rerank(query, passages, false, None)
                    .map_err(|e| anyhow::anyhow!("fastembed rerank failed: {}", e))?;

                let mut scores = vec![0.0f32; count];
                for result in results {
                    if result.index < count {
                        scores[result.index] = result.score;
                    }
                }
                Ok(scores)
            })
            .await?
        }
    }

    fn reranker_model(name: &str) -> Result<fastembed::RerankerModel> {
        match name {
            "bge-reranker-base" | "BAAI/bge-reranker-base" => {
                Ok(fastembed::RerankerModel::BGERerankerBase)
            }
            "bge-reranker-v2-m3" | "BAAI/bge-reranker-v2-m3" => {
                Ok(fastembed::RerankerModel::BGERerankerV2M3)
            }
            "jina-reranker-v1-turbo-en" | "jinaai/jina-reranker-v1-turbo-en" => {
                Ok(fastembed::RerankerModel::JINARerankerV1TurboEn)
            }
            other => bail!(
                "Unknown reranker model: '{}'. Supported models: \
                 bge-reranker-base, bge-reranker-v2-m3, jina-reranker-v1-turbo-en",
                other
            ),
        }
    }

}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::bail;

    /// Scores each passage by its length.
    struct LengthEncoder;

    #[async_trait]
    impl CrossEncoder for LengthEncoder {
        fn model_name(&self) -> &str {
            "length"
        }
        async fn score(&self, _query: &str, passages: &[String]) -> Result<Vec<f32>> {
            Ok(passages.iter().map(|p| p.len() as f32).collect())
        }
    }

    struct BrokenEncoder;

    #[async_trait]
    impl CrossEncoder for BrokenEncoder {
        fn model_name(&self) -> &str {
            "broken"
        }
        async fn score(&self, _query: &str, _passages: &[String]) -> Result<Vec<f32>> {
            bail!("onnx session crashed")
        }
    }

    fn chunks() -> Vec<DocumentChunk> {
        vec![
            DocumentChunk::new("a", 0, "mid size", 0.9),
            DocumentChunk::new("b", 0, "the longest passage", 0.8),
            DocumentChunk::new("c", 0, "tiny", 0.7),
            DocumentChunk::new("d", 0, "same len", 0.6),
        ]
    }

    fn docs(chunks: &[DocumentChunk]) -> Vec<&str> {
        chunks.iter().map(|c| c.doc_id.as_str()).collect()
    }

    #[tokio::test]
    async fn test_identity_keeps_order_and_truncates() {
        let reranked = Reranker::Identity.rerank("q", chunks(), Some(2)).await;
        assert_eq!(docs(&reranked), vec!["a", "b"]);
        assert_eq!(reranked[0].score, 0.9);

        let all = Reranker::Identity.rerank("q", chunks(), None).await;
        assert_eq!(all.len(), 4);
    }

    #[tokio::test]
    async fn test_cross_encoder_overwrites_scores_and_sorts_stably() {
        let reranker = Reranker::CrossEncoder(Arc::new(LengthEncoder));
        let reranked = reranker.rerank("q", chunks(), None).await;

        // "mid size" and "same len" tie at 8; incoming order wins.
        assert_eq!(docs(&reranked), vec!["b", "a", "d", "c"]);
        assert_eq!(reranked[0].score, 19.0);
    }

    #[tokio::test]
    async fn test_cross_encoder_top_k() {
        let reranker = Reranker::CrossEncoder(Arc::new(LengthEncoder));
        let reranked = reranker.rerank("q", chunks(), Some(1)).await;
        assert_eq!(docs(&reranked), vec!["b"]);
    }

    #[tokio::test]
    async fn test_scoring_failure_degrades_to_identity() {
        let reranker = Reranker::CrossEncoder(Arc::new(BrokenEncoder));
        let reranked = reranker.rerank("q", chunks(), Some(3)).await;
        assert_eq!(docs(&reranked), vec!["a", "b", "c"]);
        assert_eq!(reranked[2].score, 0.7);
    }

    #[tokio::test]
    async fn test_empty_input_yields_empty_output() {
        let reranker = Reranker::CrossEncoder(Arc::new(LengthEncoder));
        assert!(reranker.rerank("q", Vec::new(), Some(3)).await.is_empty());
        assert!(Reranker::Identity.rerank("q", Vec::new(), None).await.is_empty());
    }

    #[tokio::test]
    async fn test_unconfigured_or_unknown_model_is_identity() {
        assert!(Reranker::from_config(&RerankerConfig::default()).await.is_identity());

        let config = RerankerConfig {
            model: Some("no-such-reranker".to_string()),
            top_k: None,
        };
        assert!(Reranker::from_config(&config).await.is_identity());
    }
}
