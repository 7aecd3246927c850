//! Chunk storage and the two search channels the retriever fans out to.
//!
//! [`ChunkStore`] is the seam between the query pipeline and persistence:
//! - [`SqliteStore`]: FTS5 keyword search and brute-force cosine vector
//!   search over a SQLite database.
//! - [`InMemoryStore`]: the same contract over an in-process map, used by
//!   tests and by programs that embed the pipeline without a database.
//!
//! Both search methods return at most `top_k` chunks sorted by their
//! native score, highest first. Scores from the two channels are not on
//! the same scale; fusion weights them in [`crate::retriever`].

mod memory;
mod sqlite;

pub use memory::InMemoryStore;
pub use sqlite::SqliteStore;

use anyhow::Result;
use async_trait::async_trait;

use crate::models::DocumentChunk;

/// A document as written by ingestion.
#[derive(Debug, Clone)]
pub struct NewDocument {
    pub doc_id: String,
    pub title: Option<String>,
    pub content: String,
    pub content_hash: String,
}

/// A chunk as written by ingestion.
#[derive(Debug, Clone, PartialEq)]
pub struct NewChunk {
    pub chunk_id: u64,
    pub content: String,
    pub embedding: Option<Vec<f32>>,
}

#[async_trait]
pub trait ChunkStore: Send + Sync {
    /// Full-text relevance search.
    async fn keyword_search(&self, query: &str, top_k: usize) -> Result<Vec<DocumentChunk>>;

    /// Nearest neighbours of `embedding` by cosine similarity.
    async fn vector_search(&self, embedding: &[f32], top_k: usize) -> Result<Vec<DocumentChunk>>;

    /// Content hash of a stored document, if present.
    async fn document_hash(&self, doc_id: &str) -> Result<Option<String>>;

    /// Upsert a document and replace all of its chunks atomically.
    async fn replace_document(&self, document: &NewDocument, chunks: &[NewChunk]) -> Result<()>;
}

/// Lowercased alphanumeric terms of `text`, deduplicated in order.
pub(crate) fn query_terms(text: &str) -> Vec<String> {
    let mut terms: Vec<String> = Vec::new();
    for word in text.split(|c: char| !c.is_alphanumeric()) {
        if word.is_empty() {
            continue;
        }
        let term = word.to_lowercase();
        if !terms.contains(&term) {
            terms.push(term);
        }
    }
    terms
}

/// Sort by score descending, keeping insertion order on ties.
pub(crate) fn sort_by_score_desc(chunks: &mut [DocumentChunk]) {
    chunks.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(std::cmp::Ordering::Equal)
    });
}
