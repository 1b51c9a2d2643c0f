use std::sync::Arc;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use inference_broker::InMemoryBroker;
use inference_core::ModelRegistry;
use inference_gateway::app_state::AppState;
use inference_gateway::config::GatewayConfig;
use inference_gateway::idempotency::IdempotencyCache;
use inference_gateway::rate_limiter::RateLimiter;
use inference_gateway::router::build_router;
use inference_metrics::GatewayMetrics;
use serde_json::{json, Value};
use tower::ServiceExt;

async fn test_state(rate_limit_per_minute: u32) -> AppState {
    let registry = Arc::new(ModelRegistry::new());
    inference_runners::register_runners(&registry).await;

    AppState {
        registry,
        broker: InMemoryBroker::new_with_broker(),
        rate_limiter: Arc::new(RateLimiter::new(rate_limit_per_minute, 60)),
        idempotency: Arc::new(IdempotencyCache::new(3600)),
        metrics: Arc::new(GatewayMetrics::new().unwrap()),
        config: Arc::new(GatewayConfig {
            api_keys: vec!["test-key-123".to_string()],
            rate_limit_per_minute,
            rate_limit_window_secs: 60,
            idempotency_ttl_secs: 3600,
            host: "0.0.0.0".into(),
            port: 8080,
            environment: "development".into(),
        }),
    }
}

async fn body_json(response: axum::response::Response) -> Value {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

#[tokio::test]
async fn health_check_reports_healthy() {
    let app = build_router(test_state(60).await);
    let response = app.oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap()).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["status"], "healthy");
    assert_eq!(body["environment"], "development");
}

#[tokio::test]
async fn submit_without_api_key_is_unauthorized() {
    let app = build_router(test_state(60).await);
    let request = Request::builder()
        .method("POST")
        .uri("/v1/tasks")
        .header("content-type", "application/json")
        .body(Body::from(json!({ "model": "superres-x4", "input": { "image_url": "https://example.com/test.jpg" } }).to_string()))
        .unwrap();
    let response = app.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn happy_submit_returns_pending_task() {
    let app = build_router(test_state(60).await);
    let request = Request::builder()
        .method("POST")
        .uri("/v1/tasks")
        .header("content-type", "application/json")
        .header("x-api-key", "test-key-123")
        .body(Body::from(
            json!({
                "model": "superres-x4",
                "input": { "image_url": "https://example.com/test.jpg" },
                "priority": "high",
            })
            .to_string(),
        ))
        .unwrap();
    let response = app.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::ACCEPTED);
    let body = body_json(response).await;
    assert_eq!(body["status"], "PENDING");
    assert!(body["task_id"].is_string());
}

#[tokio::test]
async fn unknown_model_is_bad_request_with_detail() {
    let app = build_router(test_state(60).await);
    let request = Request::builder()
        .method("POST")
        .uri("/v1/tasks")
        .header("content-type", "application/json")
        .header("x-api-key", "test-key-123")
        .body(Body::from(json!({ "model": "invalid-model", "input": {} }).to_string()))
        .unwrap();
    let response = app.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body = body_json(response).await;
    assert!(body["detail"].as_str().unwrap().contains("not supported"));
}

#[tokio::test]
async fn status_echoes_success_timing_and_result() {
    let state = test_state(60).await;
    let task_id = uuid::Uuid::new_v4();
    let mut timing = std::collections::HashMap::new();
    timing.insert("total".to_string(), 12.5);
    let mut result = serde_json::Map::new();
    result.insert("blob_key".into(), json!("results/test.png"));
    result.insert("size".into(), json!([2048, 2048]));
    state.broker.put_result(task_id, inference_core::ResultEnvelope::success(task_id, timing, result)).await;

    let app = build_router(state);
    let request = Request::builder()
        .uri(format!("/v1/tasks/{task_id}"))
        .header("x-api-key", "test-key-123")
        .body(Body::empty())
        .unwrap();
    let response = app.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["status"], "SUCCESS");
    assert_eq!(body["timing"]["total"], 12.5);
    assert_eq!(body["result"]["blob_key"], "results/test.png");
}

#[tokio::test]
async fn idempotent_resubmit_returns_same_task_id_and_single_publish() {
    let state = test_state(60).await;
    let app = build_router(state);

    let make_request = || {
        Request::builder()
            .method("POST")
            .uri("/v1/tasks")
            .header("content-type", "application/json")
            .header("x-api-key", "test-key-123")
            .body(Body::from(
                json!({
                    "model": "superres-x4",
                    "input": { "image_url": "https://example.com/test.jpg" },
                    "client_request_id": "unique-request-123",
                })
                .to_string(),
            ))
            .unwrap()
    };

    let first = app.clone().oneshot(make_request()).await.unwrap();
    let first_body = body_json(first).await;

    let second = app.oneshot(make_request()).await.unwrap();
    let second_body = body_json(second).await;

    assert_eq!(first_body["task_id"], second_body["task_id"]);
}

#[tokio::test]
async fn oversized_client_request_id_is_bad_request() {
    let app = build_router(test_state(60).await);
    let oversized = "x".repeat(129);
    let request = Request::builder()
        .method("POST")
        .uri("/v1/tasks")
        .header("content-type", "application/json")
        .header("x-api-key", "test-key-123")
        .body(Body::from(
            json!({
                "model": "superres-x4",
                "input": { "image_url": "https://example.com/test.jpg" },
                "client_request_id": oversized,
            })
            .to_string(),
        ))
        .unwrap();
    let response = app.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn relative_callback_url_is_bad_request() {
    let app = build_router(test_state(60).await);
    let request = Request::builder()
        .method("POST")
        .uri("/v1/tasks")
        .header("content-type", "application/json")
        .header("x-api-key", "test-key-123")
        .body(Body::from(
            json!({
                "model": "superres-x4",
                "input": { "image_url": "https://example.com/test.jpg" },
                "callback_url": "/not-absolute",
            })
            .to_string(),
        ))
        .unwrap();
    let response = app.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn non_http_callback_url_scheme_is_bad_request() {
    let app = build_router(test_state(60).await);
    let request = Request::builder()
        .method("POST")
        .uri("/v1/tasks")
        .header("content-type", "application/json")
        .header("x-api-key", "test-key-123")
        .body(Body::from(
            json!({
                "model": "superres-x4",
                "input": { "image_url": "https://example.com/test.jpg" },
                "callback_url": "ftp://example.com/hook",
            })
            .to_string(),
        ))
        .unwrap();
    let response = app.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn rate_limit_at_two_per_minute_rejects_third_request_until_reset() {
    let state = test_state(2).await;
    let app = build_router(state);

    let make_request = || {
        Request::builder()
            .method("POST")
            .uri("/v1/tasks")
            .header("content-type", "application/json")
            .header("x-api-key", "test-key-123")
            .body(Body::from(json!({ "model": "superres-x4", "input": { "image_url": "https://example.com/test.jpg" } }).to_string()))
            .unwrap()
    };

    let first = app.clone().oneshot(make_request()).await.unwrap();
    assert_eq!(first.status(), StatusCode::ACCEPTED);
    let second = app.clone().oneshot(make_request()).await.unwrap();
    assert_eq!(second.status(), StatusCode::ACCEPTED);
    let third = app.oneshot(make_request()).await.unwrap();
    assert_eq!(third.status(), StatusCode::TOO_MANY_REQUESTS);
}
