//! # Grounded RAG
//!
//! Guarded retrieval-augmented question answering over a private corpus.
//!
//! A question is refused if it touches a denied topic, has its PII masked,
//! is answered from passages found by hybrid (keyword + vector) search and
//! reranking, and is refused again if the answer cites anything that was
//! not among those passages.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────┐   ┌────────────┐   ┌──────────┐
//! │  Ingest  │──▶│ Chunk+Embed│──▶│  SQLite  │
//! │ md/pdf/… │   │            │   │ FTS5+Vec │
//! └──────────┘   └────────────┘   └────┬─────┘
//!                                      │
//!   question ─▶ topic gate ─▶ PII mask ─▶ hybrid search ─▶ rerank
//!                                                             │
//!   response ◀─ citation check ◀─ PII mask ◀─ generate ◀──────┘
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! grag init                       # create database
//! grag ingest ./corpus            # ingest documents
//! grag ask "How do I request leave?"
//! grag serve                      # start HTTP server
//! grag bench eval/questions.jsonl  # p50/p95 latency and cost
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing and validation |
//! | [`models`] | Core data types |
//! | [`pii`] | PII detection and masking |
//! | [`topic`] | Denied-topic gate |
//! | [`embedding`] | Embedding backends and the query embedder choice |
//! | [`store`] | Keyword and vector search over SQLite or memory |
//! | [`retriever`] | Weighted hybrid fusion |
//! | [`rerank`] | Cross-encoder reranking |
//! | [`generate`] | Answer generation with a local fallback |
//! | [`citations`] | Citation extraction and verification |
//! | [`rate_limit`] | Per-client token bucket |
//! | [`pipeline`] | The guarded query pipeline |
//! | [`ingest`] | Corpus ingestion |
//! | [`server`] | HTTP server |
//! | [`bench`] | Latency and cost benchmark |
//! | [`db`] | Database connection |
//! | [`migrate`] | Schema migrations |

pub mod bench;
pub mod chunk;
pub mod citations;
pub mod config;
pub mod db;
pub mod embedding;
pub mod error;
pub mod extract;
pub mod generate;
pub mod ingest;
pub mod logging;
pub mod metrics;
pub mod migrate;
pub mod models;
pub mod pii;
pub mod pipeline;
pub mod rate_limit;
pub mod rerank;
pub mod retriever;
pub mod server;
pub mod store;
pub mod topic;
