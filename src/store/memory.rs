use anyhow::Result;
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::RwLock;

use super::{query_terms, sort_by_score_desc, ChunkStore, NewChunk, NewDocument};
use crate::embedding::cosine_similarity;
use crate::models::DocumentChunk;

#[derive(Debug, Clone, Default)]
struct StoredDocument {
    content_hash: String,
    chunks: Vec<NewChunk>,
}

/// In-process [`ChunkStore`].
///
/// Keyword relevance is the total count of query-term occurrences in the
/// chunk; chunks with no occurrence are not returned. Iteration order is
/// `(doc_id, chunk_id)`, so ties resolve deterministically.
#[derive(Debug, Default)]
pub struct InMemoryStore {
    documents: RwLock<BTreeMap<String, StoredDocument>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or overwrite a single chunk.
    pub fn insert(
        &self,
        doc_id: &str,
        chunk_id: u64,
        content: &str,
        embedding: Option<Vec<f32>>,
    ) {
        let mut documents = self.documents.write().unwrap_or_else(|e| e.into_inner());
        let document = documents.entry(doc_id.to_string()).or_default();
        document.chunks.retain(|c| c.chunk_id != chunk_id);
        document.chunks.push(NewChunk {
            chunk_id,
            content: content.to_string(),
            embedding,
        });
        document.chunks.sort_by_key(|c| c.chunk_id);
    }

    pub fn chunk_count(&self) -> usize {
        let documents = self.documents.read().unwrap_or_else(|e| e.into_inner());
        documents.values().map(|d| d.chunks.len()).sum()
    }

    fn scan<F>(&self, mut score: F) -> Vec<DocumentChunk>
    where
        F: FnMut(&NewChunk) -> Option<f64>,
    {
        let documents = self.documents.read().unwrap_or_else(|e| e.into_inner());
        documents
            .iter()
            .flat_map(|(doc_id, doc)| doc.chunks.iter().map(move |c| (doc_id, c)))
            .filter_map(|(doc_id, chunk)| {
                score(chunk).map(|s| DocumentChunk::new(doc_id.as_str(), chunk.chunk_id, chunk.content.as_str(), s))
            })
            .collect()
    }
}

#[async_trait]
impl ChunkStore for InMemoryStore {
    async fn keyword_search(&self, query: &str, top_k: usize) -> Result<Vec<DocumentChunk>> {
        let terms = query_terms(query);
        if terms.is_empty() {
            return Ok(Vec::new());
        }

        let mut hits = self.scan(|chunk| {
            let words = query_terms_with_repeats(&chunk.content);
            let count = words.iter().filter(|w| terms.contains(w)).count();
            (count > 0).then_some(count as f64)
        });

        sort_by_score_desc(&mut hits);
        hits.truncate(top_k);
        Ok(hits)
    }

    async fn vector_search(&self, embedding: &[f32], top_k: usize) -> Result<Vec<DocumentChunk>> {
        let mut hits = self.scan(|chunk| {
            chunk
                .embedding
                .as_deref()
                .map(|v| cosine_similarity(embedding, v) as f64)
        });

        sort_by_score_desc(&mut hits);
        hits.truncate(top_k);
        Ok(hits)
    }

    async fn document_hash(&self, doc_id: &str) -> Result<Option<String>> {
        let documents = self.documents.read().unwrap_or_else(|e| e.into_inner());
        Ok(documents.get(doc_id).map(|d| d.content_hash.clone()))
    }

    async fn replace_document(&self, document: &NewDocument, chunks: &[NewChunk]) -> Result<()> {
        let mut documents = self.documents.write().unwrap_or_else(|e| e.into_inner());
        let mut chunks = chunks.to_vec();
        chunks.sort_by_key(|c| c.chunk_id);
        documents.insert(
            document.doc_id.clone(),
            StoredDocument {
                content_hash: document.content_hash.clone(),
                chunks,
            },
        );
        Ok(())
    }
}

/// Lowercased alphanumeric words, repeats kept.
fn query_terms_with_repeats(text: &str) -> Vec<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|w| !w.is_empty())
        .map(str::to_lowercase)
        .collect()
}
