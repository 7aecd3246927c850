//! Corpus ingestion: walk → extract → chunk → embed → store.
//!
//! Every supported file under the corpus root becomes one document whose
//! `doc_id` is its path relative to the root (characters outside the
//! citation grammar replaced by `_`). Documents whose content hash is
//! unchanged are skipped. A changed document has its chunks, full-text
//! rows and embeddings replaced atomically.
//!
//! Extraction and embedding failures skip the file with a warning; only
//! store failures abort the run.

use anyhow::{bail, Result};
use globset::{Glob, GlobSet, GlobSetBuilder};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use walkdir::WalkDir;

use crate::chunk::{chunk_words, content_hash};
use crate::config::{ChunkingConfig, Config};
use crate::db;
use crate::embedding::QueryEmbedder;
use crate::extract::extract_file;
use crate::migrate;
use crate::store::{ChunkStore, NewChunk, NewDocument, SqliteStore};

const INCLUDE_GLOBS: &[&str] = &["**/*.md", "**/*.txt", "**/*.pdf", "**/*.html", "**/*.htm"];
const EXCLUDE_GLOBS: &[&str] = &["**/.git/**", "**/target/**", "**/node_modules/**"];

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct IngestStats {
    pub files_found: usize,
    pub ingested: usize,
    pub unchanged: usize,
    pub skipped: usize,
    pub chunks_written: usize,
    pub embeddings_written: usize,
}

/// `grag ingest <dir>`: ingest into the configured SQLite database.
pub async fn run_ingest(config: &Config, root: &Path) -> Result<()> {
    let pool = db::connect(config).await?;
    migrate::migrate(&pool).await?;
    let store = SqliteStore::new(pool.clone());

    let embedder = match QueryEmbedder::from_config(&config.embedding) {
        Ok(embedder) => Some(embedder),
        Err(e) => {
            tracing::warn!(error = %e, "no embedding backend; chunks stored without embeddings");
            None
        }
    };

    let ingester = Ingester {
        store: Arc::new(store),
        embedder,
        chunking: config.chunking.clone(),
        batch_size: config.embedding.batch_size,
    };
    let stats = ingester.ingest_dir(root).await?;

    println!("ingest {}", root.display());
    println!("  files found: {}", stats.files_found);
    println!("  ingested: {}", stats.ingested);
    println!("  unchanged: {}", stats.unchanged);
    println!("  skipped: {}", stats.skipped);
    println!("  chunks written: {}", stats.chunks_written);
    println!("  embeddings written: {}", stats.embeddings_written);
    println!("ok");

    pool.close().await;
    Ok(())
}

pub struct Ingester {
    pub store: Arc<dyn ChunkStore>,
    pub embedder: Option<QueryEmbedder>,
    pub chunking: ChunkingConfig,
    pub batch_size: usize,
}

impl Ingester {
    pub async fn ingest_dir(&self, root: &Path) -> Result<IngestStats> {
        let files = scan_corpus(root)?;
        let mut stats = IngestStats {
            files_found: files.len(),
            ..IngestStats::default()
        };

        for path in &files {
            let doc_id = doc_id_for(root, path);

            let text = match extract_file(path) {
                Ok(text) => text,
                Err(e) => {
                    tracing::warn!(doc_id = %doc_id, error = %e, "extraction failed, skipping file");
                    stats.skipped += 1;
                    continue;
                }
            };

            let hash = content_hash(&text);
            if self.store.document_hash(&doc_id).await?.as_deref() == Some(hash.as_str()) {
                tracing::debug!(doc_id = %doc_id, "unchanged, skipping");
                stats.unchanged += 1;
                continue;
            }

            let pieces = chunk_words(&text, self.chunking.chunk_size, self.chunking.chunk_overlap);
            let embeddings = match self.embed_all(&pieces).await {
                Ok(embeddings) => embeddings,
                Err(e) => {
                    tracing::warn!(doc_id = %doc_id, error = %e, "embedding failed, skipping file");
                    stats.skipped += 1;
                    continue;
                }
            };

            let chunks: Vec<NewChunk> = pieces
                .into_iter()
                .enumerate()
                .map(|(i, content)| NewChunk {
                    chunk_id: i as u64,
                    content,
                    embedding: embeddings.as_ref().and_then(|e| e.get(i).cloned()),
                })
                .collect();

            let document = NewDocument {
                doc_id: doc_id.clone(),
                title: path.file_stem().map(|s| s.to_string_lossy().to_string()),
                content: text,
                content_hash: hash,
            };
            self.store.replace_document(&document, &chunks).await?;

            stats.ingested += 1;
            stats.chunks_written += chunks.len();
            stats.embeddings_written += chunks.iter().filter(|c| c.embedding.is_some()).count();
            tracing::info!(doc_id = %doc_id, chunks = chunks.len(), "ingested");
        }

        Ok(stats)
    }

    /// Embed in batches; `None` when no embedder is configured.
    async fn embed_all(&self, pieces: &[String]) -> Result<Option<Vec<Vec<f32>>>> {
        let Some(embedder) = &self.embedder else {
            return Ok(None);
        };

        let mut vectors = Vec::with_capacity(pieces.len());
        for batch in pieces.chunks(self.batch_size.max(1)) {
            let batch_vectors = embedder.embed(batch).await?;
            if batch_vectors.len() != batch.len() {
                bail!(
                    "embedder returned {} vectors for {} texts",
                    batch_vectors.len(),
                    batch.len()
                );
            }
            vectors.extend(batch_vectors);
        }
        Ok(Some(vectors))
    }
}

/// Supported files under `root`, sorted by path.
pub fn scan_corpus(root: &Path) -> Result<Vec<PathBuf>> {
    if !root.is_dir() {
        bail!("Corpus directory does not exist: {}", root.display());
    }

    let include_set = build_globset(INCLUDE_GLOBS)?;
    let exclude_set = build_globset(EXCLUDE_GLOBS)?;

    let mut files = Vec::new();
    for entry in WalkDir::new(root) {
        let entry = entry?;
        if !entry.file_type().is_file() {
            continue;
        }

        let path = entry.path();
        let relative = path.strip_prefix(root).unwrap_or(path);
        let rel_str = relative.to_string_lossy().to_lowercase();

        if exclude_set.is_match(&rel_str) || !include_set.is_match(&rel_str) {
            continue;
        }
        files.push(path.to_path_buf());
    }

    // Sort for deterministic ordering
    files.sort();
    Ok(files)
}

/// Citation-safe document id: the root-relative path with `/` separators
/// and every character outside `[A-Za-z0-9_./-]` (Unicode word characters
/// allowed) replaced by `_`.
pub fn doc_id_for(root: &Path, path: &Path) -> String {
    let relative = path.strip_prefix(root).unwrap_or(path);
    let joined = relative
        .components()
        .map(|c| c.as_os_str().to_string_lossy().to_string())
        .collect::<Vec<_>>()
        .join("/");

    joined
        .chars()
        .map(|c| {
            if c.is_alphanumeric() || matches!(c, '_' | '.' | '/' | '-') {
                c
            } else {
                '_'
            }
        })
        .collect()
}

fn build_globset(patterns: &[&str]) -> Result<GlobSet> {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        builder.add(Glob::new(pattern)?);
    }
    Ok(builder.build()?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::citations;
    use crate::store::InMemoryStore;

    #[test]
    fn test_doc_id_is_citation_safe() {
        let root = Path::new("/corpus");
        let id = doc_id_for(root, Path::new("/corpus/HR policies/leave (2024).md"));
        assert_eq!(id, "HR_policies/leave__2024_.md");

        let marker = format!("[{}:0]", id);
        assert_eq!(citations::extract(&marker).len(), 1);
    }

    #[tokio::test]
    async fn test_ingest_dir_skips_unchanged_and_unsupported() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("guides")).unwrap();
        std::fs::write(dir.path().join("guides/vpn.md"), "one two three four five").unwrap();
        std::fs::write(dir.path().join("page.html"), "<p>hello <b>world</b></p>").unwrap();
        std::fs::write(dir.path().join("image.png"), [0u8, 1, 2]).unwrap();
        std::fs::write(dir.path().join("broken.pdf"), "not a pdf").unwrap();

        let store = Arc::new(InMemoryStore::new());
        let ingester = Ingester {
            store: store.clone(),
            embedder: None,
            chunking: ChunkingConfig {
                chunk_size: 3,
                chunk_overlap: 1,
            },
            batch_size: 8,
        };

        let stats = ingester.ingest_dir(dir.path()).await.unwrap();
        assert_eq!(stats.files_found, 3);
        assert_eq!(stats.ingested, 2);
        assert_eq!(stats.skipped, 1);
        assert_eq!(stats.chunks_written, 3);
        assert_eq!(stats.embeddings_written, 0);
        assert_eq!(store.chunk_count(), 3);

        let again = ingester.ingest_dir(dir.path()).await.unwrap();
        assert_eq!(again.unchanged, 2);
        assert_eq!(again.ingested, 0);
    }

    #[test]
    fn test_scan_missing_dir_fails() {
        assert!(scan_corpus(Path::new("/definitely/not/here")).is_err());
    }
}
