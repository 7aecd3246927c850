//! HTTP transport: health, query, rate limiting and metrics over a real socket.

use anyhow::Result;
use async_trait::async_trait;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use grounded_rag::config::default_denylist;
use grounded_rag::embedding::{Embedder, QueryEmbedder};
use grounded_rag::generate::{Generator, LocalGenerator};
use grounded_rag::models::QueryResponse;
use grounded_rag::pii::PiiDetector;
use grounded_rag::pipeline::{PipelineSettings, QueryPipeline, REFUSAL_DISALLOWED_TOPIC};
use grounded_rag::rate_limit::RateLimiter;
use grounded_rag::rerank::Reranker;
use grounded_rag::retriever::{HybridRetriever, HybridWeights};
use grounded_rag::server::{self, AppState};
use grounded_rag::store::InMemoryStore;
use grounded_rag::topic::TopicGate;

/// Every text maps to the same direction.
struct ConstantEmbedder;

#[async_trait]
impl Embedder for ConstantEmbedder {
    fn model_name(&self) -> &str {
        "constant"
    }
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        Ok(texts.iter().map(|_| vec![1.0, 0.0]).collect())
    }
}

async fn spawn_server(requests: u32) -> SocketAddr {
    let store = Arc::new(InMemoryStore::new());
    store.insert(
        "it/vpn.md",
        0,
        "Reset the VPN token from the self-service portal.",
        Some(vec![1.0, 0.0]),
    );

    let embedder = QueryEmbedder::new(Some(Arc::new(ConstantEmbedder)), None).unwrap();
    let pipeline = QueryPipeline::new(
        TopicGate::new(default_denylist()),
        PiiDetector::regex(),
        HybridRetriever::new(store, embedder, HybridWeights::default()),
        Reranker::Identity,
        Generator::Fallback(LocalGenerator),
        PipelineSettings::default(),
    );
    let state = AppState::new(pipeline, RateLimiter::new(requests, Duration::from_secs(3600)));

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        server::serve(listener, state).await.unwrap();
    });
    addr
}

async fn post_query(addr: SocketAddr, body: serde_json::Value) -> reqwest::Response {
    reqwest::Client::new()
        .post(format!("http://{addr}/query"))
        .json(&body)
        .send()
        .await
        .unwrap()
}

#[tokio::test]
async fn test_healthz() {
    let addr = spawn_server(10).await;

    let resp = reqwest::get(format!("http://{addr}/healthz")).await.unwrap();
    assert_eq!(resp.status(), 200);

    let body: serde_json::Value = resp.json().await.unwrap();
    assert_eq!(body["status"], "ok");
    assert_eq!(body["version"], env!("CARGO_PKG_VERSION"));
}

#[tokio::test]
async fn test_query_returns_cited_answer() {
    let addr = spawn_server(10).await;

    let resp = post_query(addr, serde_json::json!({ "query": "How do I reset my VPN token?" })).await;
    assert_eq!(resp.status(), 200);

    let body: QueryResponse = resp.json().await.unwrap();
    assert!(body.answer.contains("[it/vpn.md:0]"));
    assert_eq!(body.citations.len(), 1);
    assert_eq!(body.citations[0].doc_id, "it/vpn.md");
    assert!(body.cost > 0.0);
    assert!(body.latency_ms >= 0.0);
}

#[tokio::test]
async fn test_denied_topic_is_a_normal_response() {
    let addr = spawn_server(10).await;

    let resp = post_query(addr, serde_json::json!({ "query": "Explain the violence policy" })).await;
    assert_eq!(resp.status(), 200);

    let body: QueryResponse = resp.json().await.unwrap();
    assert_eq!(body.answer, REFUSAL_DISALLOWED_TOPIC);
    assert!(body.citations.is_empty());
    assert_eq!(body.cost, 0.0);
}

#[tokio::test]
async fn test_empty_query_is_bad_request() {
    let addr = spawn_server(10).await;

    let resp = post_query(addr, serde_json::json!({ "query": "   " })).await;
    assert_eq!(resp.status(), 400);

    let body: serde_json::Value = resp.json().await.unwrap();
    assert_eq!(body["error"]["code"], "bad_request");
}

#[tokio::test]
async fn test_rate_limit_returns_429_and_is_counted() {
    let addr = spawn_server(2).await;
    let body = serde_json::json!({ "query": "vpn token" });

    assert_eq!(post_query(addr, body.clone()).await.status(), 200);
    assert_eq!(post_query(addr, body.clone()).await.status(), 200);

    let denied = post_query(addr, body).await;
    assert_eq!(denied.status(), 429);
    let error: serde_json::Value = denied.json().await.unwrap();
    assert_eq!(error["error"]["code"], "rate_limited");

    let metrics = reqwest::get(format!("http://{addr}/metrics"))
        .await
        .unwrap()
        .text()
        .await
        .unwrap();
    assert!(metrics.contains("rag_api_requests_total{endpoint=\"query\",outcome=\"answered\"} 2"));
    assert!(metrics.contains("rag_api_requests_total{endpoint=\"query\",outcome=\"rate_limited\"} 1"));
    assert!(metrics.contains("rag_api_request_latency_seconds_count{endpoint=\"query\"} 2"));
}
