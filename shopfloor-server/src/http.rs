//! Shopfloor HTTP REST API
//!
//! Axum-based HTTP server exposing similarity search and question answering
//! over the manufacturing event store.
//!
//! Architecture: each endpoint has a thin axum handler that delegates to a pure
//! inner function returning `(StatusCode, serde_json::Value)`. The inner
//! functions are directly testable without axum dispatch machinery.
//!
//! Endpoints:
//! - GET  /health               — store, rate limiter and cache status
//! - GET  /version              — server version info
//! - GET  /events               — most recent events
//! - GET  /events/:id/similar   — events similar to a stored event
//! - POST /similar              — events similar to a supplied vector
//! - GET  /cosine/:a/:b         — pairwise cosine similarity
//! - POST /explain              — similarity score plus explanation
//! - POST /summary              — summary of recent events
//! - POST /ask                  — answer a question

use std::sync::Arc;
use std::time::Instant;

use anyhow::Result;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use shopfloor_core::{Event, ShopfloorError, SimilarityResult};
use tokio::net::TcpListener;
use tokio::sync::broadcast;

use crate::state::HttpState;
use crate::subsystems::similar;

/// Build the Axum router with all endpoints
pub fn build_router(state: Arc<HttpState>) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/version", get(version_handler))
        .route("/events", get(events_handler))
        .route("/events/:id/similar", get(similar_handler))
        .route("/similar", post(vector_similar_handler))
        .route("/cosine/:a/:b", get(cosine_handler))
        .route("/explain", post(explain_handler))
        .route("/summary", post(summary_handler))
        .route("/ask", post(ask_handler))
        .with_state(state)
}

/// Start the HTTP server on the configured address.
/// Gracefully shuts down when the broadcast shutdown signal fires.
pub async fn start_http_server(
    state: Arc<HttpState>,
    mut shutdown: broadcast::Receiver<()>,
) -> Result<()> {
    let addr = format!("{}:{}", state.config.http.host, state.config.http.port);

    let app = build_router(state);
    let listener = TcpListener::bind(&addr).await?;
    tracing::info!("Shopfloor HTTP API listening on http://{}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            let _ = shutdown.recv().await;
            tracing::info!("HTTP server shutting down...");
        })
        .await?;

    Ok(())
}

// ============================================================================
// Request / Response DTOs
// ============================================================================

#[derive(Debug, Deserialize, Default)]
pub struct EventsQuery {
    pub category: Option<String>,
    pub limit: Option<usize>,
}

#[derive(Debug, Deserialize, Default)]
pub struct SimilarQuery {
    pub category: Option<String>,
    pub limit: Option<usize>,
}

#[derive(Debug, Deserialize)]
pub struct VectorSimilarRequest {
    pub vector: Vec<f32>,
    pub category: Option<String>,
    pub limit: Option<usize>,
}

#[derive(Debug, Deserialize)]
pub struct ExplainRequest {
    pub id_a: i64,
    pub id_b: i64,
    #[serde(default)]
    pub local_only: bool,
}

#[derive(Debug, Deserialize, Default)]
pub struct SummaryRequest {
    pub limit: Option<usize>,
    #[serde(default)]
    pub local_only: bool,
}

#[derive(Debug, Deserialize, Default)]
pub struct AskRequest {
    pub question: Option<String>,
    #[serde(default)]
    pub local_only: bool,
}

/// Standard HTTP error response
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub status: String,
}

impl ErrorResponse {
    pub fn new(msg: impl Into<String>) -> Self {
        Self {
            error: msg.into(),
            status: "error".to_string(),
        }
    }
}

// ============================================================================
// Inner (directly testable) business logic functions
// ============================================================================

/// Inner health check: store reachability plus limiter and cache state.
pub async fn health_inner(state: &HttpState) -> (StatusCode, serde_json::Value) {
    let pipeline = &state.pipeline;
    let cache = pipeline.cache();
    let limiter = cache.limiter();

    let mut body = serde_json::json!({
        "status": "healthy",
        "version": env!("CARGO_PKG_VERSION"),
        "store": pipeline.index().store().name(),
        "dimensions": pipeline.index().store().dimensions(),
        "generation": cache.backend_name(),
        "rate_limit": {
            "available": limiter.available(),
            "max_requests": limiter.max_requests(),
            "window_seconds": limiter.window().as_secs(),
        },
        "cache": cache.stats(),
    });

    if let Some(pool) = &state.pool {
        let pg_ver = match shopfloor_core::db::health_check(pool).await {
            Ok(v) => v,
            Err(e) => {
                return (
                    StatusCode::SERVICE_UNAVAILABLE,
                    serde_json::json!({
                        "status": "unhealthy",
                        "error": e.to_string(),
                    }),
                );
            }
        };

        let pgvector_ver = match shopfloor_core::db::check_pgvector(pool).await {
            Ok(v) => v,
            Err(e) => format!("unavailable: {}", e),
        };

        body["postgresql"] = serde_json::json!(pg_ver);
        body["pgvector"] = serde_json::json!(pgvector_ver);
        if let Ok(count) = shopfloor_core::db::count_events(pool).await {
            body["events"] = serde_json::json!(count);
        }
    }

    (StatusCode::OK, body)
}

/// Inner version: returns version info (pure, no IO).
pub fn version_inner() -> serde_json::Value {
    serde_json::json!({
        "version": env!("CARGO_PKG_VERSION"),
        "service": "shopfloor",
    })
}

pub async fn events_inner(state: &HttpState, query: EventsQuery) -> (StatusCode, serde_json::Value) {
    let retrieval = state.pipeline.retrieval();
    let limit = query
        .limit
        .unwrap_or(retrieval.similar_limit)
        .clamp(1, retrieval.recent_limit.max(1));

    match state
        .pipeline
        .index()
        .store()
        .recent_events(query.category.as_deref(), limit)
        .await
    {
        Ok(events) => (
            StatusCode::OK,
            serde_json::json!({
                "events": events.iter().map(event_json).collect::<Vec<_>>(),
                "count": events.len(),
            }),
        ),
        Err(e) => error_response(e),
    }
}

pub async fn similar_inner(
    state: &HttpState,
    event_id: i64,
    query: SimilarQuery,
) -> (StatusCode, serde_json::Value) {
    let start = Instant::now();
    let result = similar::find_similar(
        state.pipeline.index(),
        event_id,
        query.category.as_deref(),
        query.limit,
        state.pipeline.retrieval(),
    )
    .await;

    match result {
        Ok(results) => (
            StatusCode::OK,
            serde_json::json!({
                "reference_id": event_id,
                "results": results.iter().map(result_json).collect::<Vec<_>>(),
                "count": results.len(),
                "took_ms": start.elapsed().as_millis() as u64,
            }),
        ),
        Err(e) => error_response(e),
    }
}

pub async fn vector_similar_inner(
    state: &HttpState,
    req: VectorSimilarRequest,
) -> (StatusCode, serde_json::Value) {
    let result = similar::similar_to_vector(
        state.pipeline.index(),
        &req.vector,
        req.category.as_deref(),
        req.limit,
        state.pipeline.retrieval(),
    )
    .await;

    match result {
        Ok(results) => (
            StatusCode::OK,
            serde_json::json!({
                "results": results.iter().map(result_json).collect::<Vec<_>>(),
                "count": results.len(),
            }),
        ),
        Err(e) => error_response(e),
    }
}

pub async fn cosine_inner(state: &HttpState, id_a: i64, id_b: i64) -> (StatusCode, serde_json::Value) {
    match similar::cosine_similarity(state.pipeline.index(), id_a, id_b).await {
        Ok(score) => (
            StatusCode::OK,
            serde_json::json!({
                "id_a": id_a,
                "id_b": id_b,
                "similarity": similar::round_score(score),
            }),
        ),
        Err(e) => error_response(e),
    }
}

pub async fn explain_inner(state: &HttpState, req: ExplainRequest) -> (StatusCode, serde_json::Value) {
    match state
        .pipeline
        .explain_similarity(req.id_a, req.id_b, req.local_only)
        .await
    {
        Ok(mut explanation) => {
            explanation.similarity = similar::round_score(explanation.similarity);
            (StatusCode::OK, serde_json::json!(explanation))
        }
        Err(e) => error_response(e),
    }
}

pub async fn summary_inner(state: &HttpState, req: SummaryRequest) -> (StatusCode, serde_json::Value) {
    match state.pipeline.summarize_recent(req.limit, req.local_only).await {
        Ok(summary) => (StatusCode::OK, serde_json::json!(summary)),
        Err(e) => error_response(e),
    }
}

/// Inner ask: validates the question and runs the answer pipeline.
pub async fn ask_inner(state: &HttpState, req: AskRequest) -> (StatusCode, serde_json::Value) {
    let question = match req.question {
        Some(q) if !q.trim().is_empty() => q,
        _ => return error_response(ShopfloorError::EmptyQuestion),
    };

    let start = Instant::now();
    match state.pipeline.answer_question(&question, req.local_only).await {
        Ok(answer) => {
            let mut body = serde_json::json!(answer);
            if let Some(obj) = body.as_object_mut() {
                obj.insert(
                    "took_ms".to_string(),
                    serde_json::json!(start.elapsed().as_millis() as u64),
                );
            }
            (StatusCode::OK, body)
        }
        Err(e) => error_response(e),
    }
}

// ============================================================================
// Axum handler wrappers (thin, delegate to inner functions)
// ============================================================================

pub async fn health_handler(State(state): State<Arc<HttpState>>) -> impl IntoResponse {
    let (status, body) = health_inner(&state).await;
    (status, Json(body))
}

pub async fn version_handler() -> impl IntoResponse {
    (StatusCode::OK, Json(version_inner()))
}

pub async fn events_handler(
    State(state): State<Arc<HttpState>>,
    Query(query): Query<EventsQuery>,
) -> impl IntoResponse {
    let (status, body) = events_inner(&state, query).await;
    (status, Json(body))
}

pub async fn similar_handler(
    State(state): State<Arc<HttpState>>,
    Path(id): Path<i64>,
    Query(query): Query<SimilarQuery>,
) -> impl IntoResponse {
    let (status, body) = similar_inner(&state, id, query).await;
    (status, Json(body))
}

pub async fn vector_similar_handler(
    State(state): State<Arc<HttpState>>,
    Json(req): Json<VectorSimilarRequest>,
) -> impl IntoResponse {
    let (status, body) = vector_similar_inner(&state, req).await;
    (status, Json(body))
}

pub async fn cosine_handler(
    State(state): State<Arc<HttpState>>,
    Path((a, b)): Path<(i64, i64)>,
) -> impl IntoResponse {
    let (status, body) = cosine_inner(&state, a, b).await;
    (status, Json(body))
}

pub async fn explain_handler(
    State(state): State<Arc<HttpState>>,
    Json(req): Json<ExplainRequest>,
) -> impl IntoResponse {
    let (status, body) = explain_inner(&state, req).await;
    (status, Json(body))
}

pub async fn summary_handler(
    State(state): State<Arc<HttpState>>,
    Json(req): Json<SummaryRequest>,
) -> impl IntoResponse {
    let (status, body) = summary_inner(&state, req).await;
    (status, Json(body))
}

pub async fn ask_handler(
    State(state): State<Arc<HttpState>>,
    Json(req): Json<AskRequest>,
) -> impl IntoResponse {
    let (status, body) = ask_inner(&state, req).await;
    (status, Json(body))
}

// ============================================================================
// Helpers
// ============================================================================

pub fn status_for(error: &ShopfloorError) -> StatusCode {
    match error {
        ShopfloorError::NotFound(_) | ShopfloorError::NoDataAvailable => StatusCode::NOT_FOUND,
        ShopfloorError::MissingEmbedding(_) => StatusCode::UNPROCESSABLE_ENTITY,
        ShopfloorError::InvalidVector { .. } | ShopfloorError::EmptyQuestion => StatusCode::BAD_REQUEST,
        ShopfloorError::ServiceUnavailable(_) | ShopfloorError::ExternalLookupFailed(_) => {
            StatusCode::SERVICE_UNAVAILABLE
        }
        ShopfloorError::Database(_) | ShopfloorError::Config(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

/// Map an error to its status code and the standard error body.
pub fn error_response(error: ShopfloorError) -> (StatusCode, serde_json::Value) {
    let status = status_for(&error);
    if error.is_client_error() {
        tracing::debug!(error = %error, "Request rejected");
    } else {
        tracing::error!(error = %error, "Request failed");
    }
    (status, serde_json::json!(ErrorResponse::new(error.to_string())))
}

/// Event as returned over HTTP: every field except the raw embedding.
pub fn event_json(event: &Event) -> serde_json::Value {
    serde_json::json!({
        "id": event.id,
        "category": event.category,
        "source": event.source,
        "notes": event.notes,
        "timestamp": event.timestamp,
        "duration_minutes": event.duration_minutes,
        "has_embedding": event.embedding.is_some(),
    })
}

fn result_json(result: &SimilarityResult) -> serde_json::Value {
    let mut value = event_json(&result.event);
    value["score"] = serde_json::json!(result.score);
    value
}

// ============================================================================
// Unit Tests: call inner functions directly
// ============================================================================
