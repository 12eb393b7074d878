//! HTTP integration tests for the Shopfloor REST API
//!
//! Most tests run against an in-memory store with a scripted generation
//! backend, through both the inner functions and the Axum `oneshot` path.
//! The PostgreSQL-backed test needs a live database and `shopfloor.toml`; it
//! skips itself when either is unavailable.

mod common;

use std::sync::Arc;

use axum::http::StatusCode;
use common::{plant_state, ScriptedGenerator};
use serde_json::json;
use shopfloor_core::ShopfloorConfig;
use shopfloor_server::http::{
    ask_inner, build_router, cosine_inner, events_inner, health_inner, similar_inner,
    summary_inner, AskRequest, EventsQuery, SimilarQuery, SummaryRequest,
};
use shopfloor_server::state::HttpState;

// For oneshot testing
use axum::body::Body;
use axum::http::Request;
use tower::ServiceExt;

fn make_http_state() -> Arc<HttpState> {
    Arc::new(plant_state(ScriptedGenerator::replying()))
}

async fn call(
    state: Arc<HttpState>,
    method: &str,
    uri: &str,
    body: Option<serde_json::Value>,
) -> (StatusCode, serde_json::Value) {
    let app = build_router(state);

    let builder = Request::builder().method(method).uri(uri);
    let req = match body {
        Some(b) => builder
            .header("content-type", "application/json")
            .body(Body::from(b.to_string()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    };

    let resp = app.oneshot(req).await.unwrap();
    let status = resp.status();
    let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX)
        .await
        .unwrap();
    let value = serde_json::from_slice(&bytes).unwrap_or(serde_json::Value::Null);
    (status, value)
}

// ===========================================================================
// Health / version
// ===========================================================================

#[tokio::test]
async fn test_health_reports_store_limiter_and_cache() {
    let state = make_http_state();
    let (status, body) = health_inner(&state).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "healthy");
    assert_eq!(body["store"], "memory");
    assert_eq!(body["dimensions"], 3);
    assert_eq!(body["generation"], "scripted");
    assert_eq!(body["rate_limit"]["max_requests"], 100);
    assert_eq!(body["rate_limit"]["available"], 100);
    assert_eq!(body["cache"]["hits"], 0);
    assert!(body.get("postgresql").is_none(), "no pool, no postgres fields");
}

#[tokio::test]
async fn test_version_endpoint_via_oneshot() {
    let (status, body) = call(make_http_state(), "GET", "/version", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["service"], "shopfloor");
    assert!(body["version"].is_string());
}

// ===========================================================================
// Events / similarity
// ===========================================================================

#[tokio::test]
async fn test_events_filtered_by_category() {
    let state = make_http_state();
    let (status, body) = events_inner(
        &state,
        EventsQuery {
            category: Some("Production".to_string()),
            limit: None,
        },
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["count"], 2);
    let events = body["events"].as_array().unwrap();
    assert!(events.iter().all(|e| e["category"] == "Production"));
    assert!(events.iter().all(|e| e.get("embedding").is_none()));
    assert!(events.iter().any(|e| e["has_embedding"] == false));
}

#[tokio::test]
async fn test_similar_excludes_reference_and_unembedded() {
    let state = make_http_state();
    let (status, body) = similar_inner(&state, 1, SimilarQuery::default()).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["reference_id"], 1);
    let ids: Vec<i64> = body["results"]
        .as_array()
        .unwrap()
        .iter()
        .map(|r| r["id"].as_i64().unwrap())
        .collect();
    assert_eq!(ids, vec![2, 3]);
    assert_eq!(body["results"][0]["score"], 1.0);
}

#[tokio::test]
async fn test_similar_endpoint_via_oneshot() {
    let (status, body) = call(make_http_state(), "GET", "/events/3/similar?limit=1", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["count"], 1);

    // a reference without an embedding has no neighbours to rank against
    let (status, body) = call(make_http_state(), "GET", "/events/4/similar", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["status"], "error");

    let (status, _) = call(make_http_state(), "GET", "/events/99/similar", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_vector_similarity_via_oneshot() {
    let (status, body) = call(
        make_http_state(),
        "POST",
        "/similar",
        Some(json!({ "vector": [0.0, 1.0, 0.0], "limit": 1 })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["results"][0]["id"], 3);

    let (status, body) = call(
        make_http_state(),
        "POST",
        "/similar",
        Some(json!({ "vector": [1.0, 0.0] })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["status"], "error");
}

#[tokio::test]
async fn test_cosine_scores_and_errors() {
    let state = make_http_state();

    let (status, body) = cosine_inner(&state, 1, 2).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["similarity"], 1.0);

    let (status, body) = cosine_inner(&state, 1, 3).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["similarity"], 0.0);

    let (status, _) = cosine_inner(&state, 1, 4).await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);

    let (status, body) = cosine_inner(&state, 1, 99).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"], "Event 99 not found");
}

#[tokio::test]
async fn test_cosine_endpoint_via_oneshot() {
    let (status, body) = call(make_http_state(), "GET", "/cosine/2/1", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["id_a"], 2);
    assert_eq!(body["id_b"], 1);
    assert_eq!(body["similarity"], 1.0);
}

// ===========================================================================
// Ask / explain / summary
// ===========================================================================

#[tokio::test]
async fn test_ask_rejects_missing_or_blank_question() {
    let state = make_http_state();

    let (status, body) = ask_inner(&state, AskRequest::default()).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["status"], "error");

    let (status, _) = ask_inner(
        &state,
        AskRequest {
            question: Some("  ".to_string()),
            local_only: false,
        },
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_ask_local_only_via_oneshot() {
    let (status, body) = call(
        make_http_state(),
        "POST",
        "/ask",
        Some(json!({ "question": "How are the machines doing?", "local_only": true })),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["stage"], "answered_local");
    assert!(body["answer"]
        .as_str()
        .unwrap()
        .starts_with("Found 4 events with 2 different types."));
    assert_eq!(body["sources"], json!([]));
    assert!(body["took_ms"].is_u64());
}

#[tokio::test]
async fn test_ask_generated_answer_counts_in_cache_stats() {
    let generator = ScriptedGenerator::replying();
    let state = Arc::new(plant_state(generator.clone()));

    for _ in 0..2 {
        let (status, _) = ask_inner(
            &state,
            AskRequest {
                question: Some("How many breakdowns?".to_string()),
                local_only: false,
            },
        )
        .await;
        assert_eq!(status, StatusCode::OK);
    }

    assert_eq!(generator.calls(), 1);
    let (_, health) = health_inner(&state).await;
    assert_eq!(health["cache"]["hits"], 1);
    assert_eq!(health["cache"]["misses"], 1);
    assert_eq!(health["rate_limit"]["available"], 99);
}

#[tokio::test]
async fn test_ask_unknown_event_is_404() {
    let (status, body) = call(
        make_http_state(),
        "POST",
        "/ask",
        Some(json!({ "question": "What happened in event 99?" })),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"], "Event 99 not found");
}

#[tokio::test]
async fn test_explain_local_only_via_oneshot() {
    let (status, body) = call(
        make_http_state(),
        "POST",
        "/explain",
        Some(json!({ "id_a": 1, "id_b": 3, "local_only": true })),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["similarity"], 0.0);
    assert_eq!(
        body["explanation"],
        "Events have a similarity score of 0.0000. These events are not very similar."
    );
}

#[tokio::test]
async fn test_summary_local_only() {
    let state = make_http_state();
    let (status, body) = summary_inner(
        &state,
        SummaryRequest {
            limit: Some(3),
            local_only: true,
        },
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["count"], 3);
    assert!(body["report"].as_str().unwrap().starts_with("Event Report Summary:"));
}

// ===========================================================================
// PostgreSQL-backed state
// ===========================================================================

#[tokio::test]
async fn test_connected_state_health_includes_postgres() {
    let config = match ShopfloorConfig::load("../shopfloor.toml") {
        Ok(c) => c,
        Err(_) => {
            eprintln!("Skipping test_connected_state_health_includes_postgres: config unavailable");
            return;
        }
    };
    let state = match HttpState::connect(config).await {
        Ok(s) => Arc::new(s),
        Err(_) => {
            eprintln!("Skipping test_connected_state_health_includes_postgres: DB unavailable");
            return;
        }
    };

    let (status, body) = health_inner(&state).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["store"], "postgres");
    assert!(body["postgresql"].is_string(), "postgresql version must be present");
}
