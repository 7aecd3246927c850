//! HTTP transport for the query pipeline.
//!
//! # Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `GET`  | `/healthz` | Health check (returns version) |
//! | `POST` | `/query` | Answer a [`QueryRequest`] with a [`QueryResponse`] |
//! | `GET`  | `/metrics` | Prometheus text exposition |
//!
//! # Error Contract
//!
//! ```json
//! { "error": { "code": "rate_limited", "message": "too many requests, retry later" } }
//! ```
//!
//! Error codes: `bad_request` (400), `rate_limited` (429), `internal` (500).
//!
//! # Rate Limiting
//!
//! `POST /query` is admitted per client by a token bucket keyed on the
//! peer IP address. Denied requests never reach the pipeline.
//!
//! # CORS
//!
//! All origins, methods, and headers are permitted.

use anyhow::Context;
use axum::{
    extract::{ConnectInfo, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::Serialize;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::net::TcpListener;
use tower_http::cors::{Any, CorsLayer};

use crate::config::Config;
use crate::db;
use crate::metrics::Metrics;
use crate::migrate;
use crate::models::{QueryRequest, QueryResponse};
use crate::pipeline::QueryPipeline;
use crate::rate_limit::RateLimiter;
use crate::store::SqliteStore;

const QUERY_ENDPOINT: &str = "query";

/// Shared application state passed to all route handlers via Axum's `State` extractor.
#[derive(Clone)]
pub struct AppState {
    pipeline: Arc<QueryPipeline>,
    limiter: Arc<RateLimiter>,
    metrics: Arc<Metrics>,
}

impl AppState {
    pub fn new(pipeline: QueryPipeline, limiter: RateLimiter) -> Self {
        Self {
            pipeline: Arc::new(pipeline),
            limiter: Arc::new(limiter),
            metrics: Arc::new(Metrics::new()),
        }
    }
}

/// Starts the HTTP server on `[server].bind`.
///
/// Opens the database, builds the pipeline from configuration, and serves
/// until the process is terminated.
pub async fn run_server(config: &Config) -> anyhow::Result<()> {
    let pool = db::connect(config).await?;
    migrate::migrate(&pool).await?;
    let store = Arc::new(SqliteStore::new(pool));

    let pipeline = QueryPipeline::from_config(config, store).await?;
    let period = Duration::try_from_secs_f64(config.guardrails.rate_limit_period_secs)
        .context("invalid guardrails.rate_limit_period_secs")?;
    let limiter = RateLimiter::new(config.guardrails.rate_limit_requests, period);

    let listener = TcpListener::bind(&config.server.bind).await?;
    println!("Query server listening on http://{}", listener.local_addr()?);

    serve(listener, AppState::new(pipeline, limiter)).await
}

/// Serve `state` on an already-bound listener.
pub async fn serve(listener: TcpListener, state: AppState) -> anyhow::Result<()> {
    axum::serve(
        listener,
        router(state).into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await?;
    Ok(())
}

pub fn router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/healthz", get(handle_health))
        .route("/query", post(handle_query))
        .route("/metrics", get(handle_metrics))
        .layer(cors)
        .with_state(state)
}

// ============ Error response ============

#[derive(Serialize)]
struct ErrorBody {
    error: ErrorDetail,
}

#[derive(Serialize)]
struct ErrorDetail {
    /// Machine-readable error code (e.g., `"rate_limited"`).
    code: String,
    message: String,
}

/// Internal error type that converts into an Axum HTTP response.
struct AppError {
    status: StatusCode,
    code: String,
    message: String,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body = ErrorBody {
            error: ErrorDetail {
                code: self.code,
                message: self.message,
            },
        };
        (self.status, Json(body)).into_response()
    }
}

fn bad_request(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::BAD_REQUEST,
        code: "bad_request".to_string(),
        message: message.into(),
    }
}

fn rate_limited() -> AppError {
    AppError {
        status: StatusCode::TOO_MANY_REQUESTS,
        code: "rate_limited".to_string(),
        message: "too many requests, retry later".to_string(),
    }
}

fn internal(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::INTERNAL_SERVER_ERROR,
        code: "internal".to_string(),
        message: message.into(),
    }
}

// ============ GET /healthz ============

#[derive(Serialize)]
struct HealthResponse {
    status: String,
    version: String,
}

async fn handle_health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

// ============ POST /query ============

/// Handler for `POST /query`.
///
/// Admission runs before validation, so a throttled client is refused
/// even for malformed questions.
async fn handle_query(
    State(state): State<AppState>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    Json(request): Json<QueryRequest>,
) -> Result<Json<QueryResponse>, AppError> {
    let client_id = peer.ip().to_string();

    if !state.limiter.allow(&client_id) {
        tracing::info!(client = %client_id, "request rate limited");
        state.metrics.record_request(QUERY_ENDPOINT, "rate_limited");
        return Err(rate_limited());
    }

    if request.query.trim().is_empty() {
        state.metrics.record_request(QUERY_ENDPOINT, "bad_request");
        return Err(bad_request("query must not be empty"));
    }
    if request.top_k == Some(0) {
        state.metrics.record_request(QUERY_ENDPOINT, "bad_request");
        return Err(bad_request("top_k must be at least 1"));
    }

    let started = Instant::now();
    let result = state.pipeline.run(&request.query, request.top_k).await;
    state
        .metrics
        .observe_latency(QUERY_ENDPOINT, started.elapsed());

    match result {
        Ok(result) => {
            state
                .metrics
                .record_request(QUERY_ENDPOINT, result.outcome.as_str());
            Ok(Json(result.response))
        }
        Err(e) => {
            tracing::error!(error = %e, "query pipeline failed");
            state.metrics.record_request(QUERY_ENDPOINT, "error");
            Err(internal(e.to_string()))
        }
    }
}

// ============ GET /metrics ============

async fn handle_metrics(State(state): State<AppState>) -> impl IntoResponse {
    (
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4; charset=utf-8")],
        state.metrics.render(),
    )
}
