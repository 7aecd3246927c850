//! Core data models used throughout the query pipeline.
//!
//! These types represent the chunks, citations, and responses that flow
//! from retrieval through generation to the caller.

use serde::{Deserialize, Serialize};

/// Identity of a logical passage: `(doc_id, chunk_id)`.
///
/// Two chunks are the same passage iff their keys are equal, regardless
/// of content or score.
pub type ChunkKey = (String, u64);

/// A retrievable unit of document text.
///
/// Constructed fresh by every search call. `score` is overwritten at each
/// stage (keyword rank, fused score, rerank score).
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DocumentChunk {
    pub doc_id: String,
    pub chunk_id: u64,
    pub content: String,
    pub score: f64,
}

impl DocumentChunk {
    pub fn new(doc_id: impl Into<String>, chunk_id: u64, content: impl Into<String>, score: f64) -> Self {
        Self {
            doc_id: doc_id.into(),
            chunk_id,
            content: content.into(),
            score,
        }
    }

    /// The `(doc_id, chunk_id)` identity of this chunk.
    pub fn key(&self) -> ChunkKey {
        (self.doc_id.clone(), self.chunk_id)
    }

    /// The inline citation marker for this chunk, e.g. `[handbook.md:3]`.
    pub fn marker(&self) -> String {
        format!("[{}:{}]", self.doc_id, self.chunk_id)
    }
}

/// A claim that an answer used a specific chunk.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Citation {
    pub doc_id: String,
    pub chunk_id: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end: Option<usize>,
}

impl Citation {
    pub fn new(doc_id: impl Into<String>, chunk_id: u64) -> Self {
        Self {
            doc_id: doc_id.into(),
            chunk_id,
            start: None,
            end: None,
        }
    }

    pub fn key(&self) -> ChunkKey {
        (self.doc_id.clone(), self.chunk_id)
    }
}

/// Body of `POST /query`.
#[derive(Debug, Clone, Deserialize)]
pub struct QueryRequest {
    pub query: String,
    /// Overrides `retrieval.top_k` for this request.
    #[serde(default)]
    pub top_k: Option<usize>,
}

/// The unit returned to the caller for every processed question.
///
/// When `citations` is non-empty, every entry refers to a chunk that was
/// passed to the generator for this request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryResponse {
    pub answer: String,
    pub citations: Vec<Citation>,
    /// Estimated cost in dollars, linear in context token count.
    pub cost: f64,
    /// Wall-clock duration of the full pipeline call.
    pub latency_ms: f64,
}
