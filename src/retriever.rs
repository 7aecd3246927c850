//! Hybrid retrieval: keyword and vector search fused by weighted sum.
//!
//! For each query the retriever embeds the question, runs both search
//! channels concurrently, and merges their results by `(doc_id, chunk_id)`:
//!
//! ```text
//! fused(c) = w_k · keyword_score(c) + w_v · vector_score(c)
//! ```
//!
//! A chunk missing from one channel contributes nothing from that channel,
//! so a chunk found by both ranks above one found by only one (for equal
//! native scores). Native scores are used as-is, without normalization.
//!
//! The result is sorted by fused score descending (first-seen order on
//! ties: keyword hits, then vector-only hits) and truncated to `top_k`.

use anyhow::Result;
use std::collections::HashMap;
use std::sync::Arc;

use crate::config::{validate_weights, RetrievalConfig};
use crate::embedding::QueryEmbedder;
use crate::models::{ChunkKey, DocumentChunk};
use crate::store::{sort_by_score_desc, ChunkStore};

/// Validated channel weights; `keyword + vector` is 1.0 within tolerance.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct HybridWeights {
    keyword: f64,
    vector: f64,
}

impl HybridWeights {
    pub fn new(keyword: f64, vector: f64) -> Result<Self> {
        validate_weights(keyword, vector)?;
        Ok(Self { keyword, vector })
    }

    pub fn from_config(config: &RetrievalConfig) -> Result<Self> {
        Self::new(config.weight_keyword, config.weight_vector)
    }

    pub fn keyword(&self) -> f64 {
        self.keyword
    }

    pub fn vector(&self) -> f64 {
        self.vector
    }
}

impl Default for HybridWeights {
    fn default() -> Self {
        Self {
            keyword: 0.5,
            vector: 0.5,
        }
    }
}

pub struct HybridRetriever {
    store: Arc<dyn ChunkStore>,
    embedder: QueryEmbedder,
    weights: HybridWeights,
}

impl HybridRetriever {
    pub fn new(store: Arc<dyn ChunkStore>, embedder: QueryEmbedder, weights: HybridWeights) -> Self {
        Self {
            store,
            embedder,
            weights,
        }
    }

    /// Search with the configured weights.
    pub async fn search(&self, query: &str, top_k: usize) -> Result<Vec<DocumentChunk>> {
        self.search_weighted(query, top_k, self.weights).await
    }

    /// Search with explicit weights.
    ///
    /// Fails only if the store fails or no embedding backend can embed the
    /// query.
    pub async fn search_weighted(
        &self,
        query: &str,
        top_k: usize,
        weights: HybridWeights,
    ) -> Result<Vec<DocumentChunk>> {
        let embedding = self.embedder.embed_query(query).await?;

        let (keyword, vector) = tokio::join!(
            self.store.keyword_search(query, top_k),
            self.store.vector_search(&embedding, top_k),
        );
        let (keyword, vector) = (keyword?, vector?);

        tracing::debug!(
            keyword_hits = keyword.len(),
            vector_hits = vector.len(),
            "hybrid search channels complete"
        );

        Ok(fuse(keyword, vector, top_k, weights))
    }
}

/// Additive weighted fusion of two ranked lists keyed by `(doc_id, chunk_id)`.
pub fn fuse(
    keyword: Vec<DocumentChunk>,
    vector: Vec<DocumentChunk>,
    top_k: usize,
    weights: HybridWeights,
) -> Vec<DocumentChunk> {
    let mut index: HashMap<ChunkKey, usize> = HashMap::new();
    let mut fused: Vec<DocumentChunk> = Vec::with_capacity(keyword.len() + vector.len());

    for mut chunk in keyword {
        // A channel may repeat a key; keep the first hit.
        if index.contains_key(&chunk.key()) {
            continue;
        }
        chunk.score *= weights.keyword;
        index.insert(chunk.key(), fused.len());
        fused.push(chunk);
    }

    for mut chunk in vector {
        let score = chunk.score * weights.vector;
        match index.get(&chunk.key()) {
            Some(&i) => fused[i].score += score,
            None => {
                chunk.score = score;
                index.insert(chunk.key(), fused.len());
                fused.push(chunk);
            }
        }
    }

    sort_by_score_desc(&mut fused);
    fused.truncate(top_k);
    fused
}
