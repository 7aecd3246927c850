use anyhow::{Context, Result};
use async_trait::async_trait;
use sqlx::{Row, SqlitePool};

use super::{query_terms, sort_by_score_desc, ChunkStore, NewChunk, NewDocument};
use crate::embedding::{blob_to_vec, cosine_similarity, vec_to_blob};
use crate::models::DocumentChunk;

/// [`ChunkStore`] over the SQLite schema created by [`crate::migrate`].
#[derive(Clone)]
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

/// Build an FTS5 OR-query from the question's terms.
///
/// Every term is double-quoted so FTS5 operators in user input are
/// treated as plain text. Returns `None` when nothing is searchable.
fn fts_query(query: &str) -> Option<String> {
    let terms = query_terms(query);
    if terms.is_empty() {
        return None;
    }
    Some(
        terms
            .iter()
            .map(|t| format!("\"{}\"", t))
            .collect::<Vec<_>>()
            .join(" OR "),
    )
}

fn chunk_id_from(raw: i64) -> Result<u64> {
    u64::try_from(raw).with_context(|| format!("negative chunk_id in store: {}", raw))
}

#[async_trait]
impl ChunkStore for SqliteStore {
    async fn keyword_search(&self, query: &str, top_k: usize) -> Result<Vec<DocumentChunk>> {
        let Some(match_expr) = fts_query(query) else {
            return Ok(Vec::new());
        };

        let rows = sqlx::query(
            r#"
            SELECT doc_id, CAST(chunk_id AS INTEGER) AS chunk_id, content, rank
            FROM chunks_fts
            WHERE chunks_fts MATCH ?
            ORDER BY rank
            LIMIT ?
            "#,
        )
        .bind(&match_expr)
        .bind(i64::try_from(top_k).unwrap_or(i64::MAX))
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|row| {
                let rank: f64 = row.get("rank");
                Ok(DocumentChunk::new(
                    row.get::<String, _>("doc_id"),
                    chunk_id_from(row.get("chunk_id"))?,
                    row.get::<String, _>("content"),
                    -rank, // negate so higher = better
                ))
            })
            .collect()
    }

    async fn vector_search(&self, embedding: &[f32], top_k: usize) -> Result<Vec<DocumentChunk>> {
        // Fetch all vectors and compute cosine similarity in Rust
        let rows = sqlx::query(
            r#"
            SELECT d.doc_id, c.chunk_id, c.content, c.embedding
            FROM chunks c
            JOIN documents d ON d.id = c.document_id
            WHERE c.embedding IS NOT NULL
            ORDER BY d.doc_id, c.chunk_id
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        let mut candidates = rows
            .iter()
            .map(|row| {
                let blob: Vec<u8> = row.get("embedding");
                let similarity = cosine_similarity(embedding, &blob_to_vec(&blob)) as f64;
                Ok(DocumentChunk::new(
                    row.get::<String, _>("doc_id"),
                    chunk_id_from(row.get("chunk_id"))?,
                    row.get::<String, _>("content"),
                    similarity,
                ))
            })
            .collect::<Result<Vec<_>>>()?;

        sort_by_score_desc(&mut candidates);
        candidates.truncate(top_k);
        Ok(candidates)
    }

    async fn document_hash(&self, doc_id: &str) -> Result<Option<String>> {
        let hash: Option<String> =
            sqlx::query_scalar("SELECT content_hash FROM documents WHERE doc_id = ?")
                .bind(doc_id)
                .fetch_optional(&self.pool)
                .await?;
        Ok(hash)
    }

    async fn replace_document(&self, document: &NewDocument, chunks: &[NewChunk]) -> Result<()> {
        let now = chrono::Utc::now().timestamp();
        let mut tx = self.pool.begin().await?;

        let document_id: i64 = sqlx::query_scalar(
            r#"
            INSERT INTO documents (doc_id, title, content, content_hash, updated_at)
            VALUES (?, ?, ?, ?, ?)
            ON CONFLICT(doc_id) DO UPDATE SET
                title = excluded.title,
                content = excluded.content,
                content_hash = excluded.content_hash,
                updated_at = excluded.updated_at
            RETURNING id
            "#,
        )
        .bind(&document.doc_id)
        .bind(&document.title)
        .bind(&document.content)
        .bind(&document.content_hash)
        .bind(now)
        .fetch_one(&mut *tx)
        .await?;

        sqlx::query("DELETE FROM chunks_fts WHERE doc_id = ?")
            .bind(&document.doc_id)
            .execute(&mut *tx)
            .await?;
        sqlx::query("DELETE FROM chunks WHERE document_id = ?")
            .bind(document_id)
            .execute(&mut *tx)
            .await?;

        for chunk in chunks {
            let chunk_id = i64::try_from(chunk.chunk_id)
                .with_context(|| format!("chunk_id {} out of range", chunk.chunk_id))?;
            let blob = chunk.embedding.as_deref().map(vec_to_blob);

            sqlx::query(
                "INSERT INTO chunks (document_id, chunk_id, content, embedding) VALUES (?, ?, ?, ?)",
            )
            .bind(document_id)
            .bind(chunk_id)
            .bind(&chunk.content)
            .bind(blob)
            .execute(&mut *tx)
            .await?;

            sqlx::query("INSERT INTO chunks_fts (doc_id, chunk_id, content) VALUES (?, ?, ?)")
                .bind(&document.doc_id)
                .bind(chunk_id)
                .bind(&chunk.content)
                .execute(&mut *tx)
                .await?;
        }

        tx.commit().await?;
        Ok(())
    }
}
