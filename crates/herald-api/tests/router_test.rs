//! Control plane routes exercised through the router with `oneshot`.

#![allow(clippy::unwrap_used)]
#![allow(clippy::expect_used)]

use std::{sync::Arc, time::Duration};

use axum::{
    body::Body,
    http::{Request, StatusCode},
    Router,
};
use herald_api::{create_router, AppState};
use herald_core::{
    models::{OrganizationId, OutboxEvent, OutboxStatus, SigningSecret, WebhookConfig},
    Clock, TestClock,
};
use herald_delivery::{
    storage::mock::MockStorage, BackoffPolicy, BatchScheduler, ClientConfig, DeliveryExecutor,
    EventProcessor, SchedulerConfig,
};
use serde_json::Value;
use tower::ServiceExt;
use wiremock::{matchers::method, Mock, MockServer, ResponseTemplate};

struct TestApp {
    router: Router,
    storage: MockStorage,
    clock: TestClock,
}

fn test_app() -> TestApp {
    let storage = MockStorage::new();
    let clock = TestClock::new();
    let executor = Arc::new(
        DeliveryExecutor::new(
            ClientConfig { timeout: Duration::from_secs(2), ..ClientConfig::default() },
            Arc::new(storage.clone()),
            Arc::new(clock.clone()),
        )
        .unwrap(),
    );
    let processor = Arc::new(EventProcessor::new(
        Arc::new(storage.clone()),
        executor,
        BackoffPolicy::default(),
        Arc::new(clock.clone()),
    ));
    let scheduler = Arc::new(
        BatchScheduler::new(
            Arc::new(storage.clone()),
            processor,
            Arc::new(clock.clone()),
            SchedulerConfig::default(),
        )
        .unwrap(),
    );

    let state = AppState::new(scheduler, Arc::new(clock.clone()));
    TestApp { router: create_router(state, Duration::from_secs(30)), storage, clock }
}

async fn send(router: &Router, method: &str, uri: &str) -> (StatusCode, Value, Option<String>) {
    let request = Request::builder().method(method).uri(uri).body(Body::empty()).unwrap();
    let response = router.clone().oneshot(request).await.unwrap();

    let status = response.status();
    let request_id =
        response.headers().get("x-request-id").map(|v| v.to_str().unwrap().to_string());
    let body = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let json = if body.is_empty() { Value::Null } else { serde_json::from_slice(&body).unwrap() };
    (status, json, request_id)
}

#[tokio::test]
async fn health_reports_ok_with_request_id() {
    let app = test_app();

    let (status, body, request_id) = send(&app.router, "GET", "/health").await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");
    assert_eq!(body["version"], env!("CARGO_PKG_VERSION"));
    assert!(body["timestamp"].is_string());
    assert!(body.get("last_batch_at").is_none());
    assert!(request_id.is_some());
}

#[tokio::test]
async fn unknown_route_is_json_not_found() {
    let app = test_app();

    let (status, body, _) = send(&app.router, "GET", "/webhooks").await;

    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"], "not_found");
}

#[tokio::test]
async fn process_with_empty_queue_reports_zero() {
    let app = test_app();

    let (status, body, _) = send(&app.router, "POST", "/process").await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["message"], "Processed 0 events");
    assert_eq!(body["summary"]["claimed"], 0);
    assert!(body["timestamp"].is_string());
}

#[tokio::test]
async fn process_delivers_due_events() {
    let app = test_app();
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;

    let org = OrganizationId::new();
    let now = app.clock.now_utc();
    app.storage
        .insert_webhook(WebhookConfig::new(
            org,
            format!("{}/hook", server.uri()),
            SigningSecret::new("secret"),
            vec!["orders".to_string()],
            now,
        ))
        .await;
    let event = OutboxEvent::new(org, "orders", "SHOP.ORDER.PLACED.v1", serde_json::json!({}), now);
    app.storage.insert_event(event.clone()).await;

    let (status, body, _) = send(&app.router, "POST", "/process").await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["summary"]["claimed"], 1);
    assert_eq!(body["summary"]["delivered"], 1);
    assert_eq!(app.storage.event(event.id).await.unwrap().status, OutboxStatus::Delivered);

    let (_, health, _) = send(&app.router, "GET", "/health").await;
    assert!(health["last_batch_at"].is_string());
}

#[tokio::test]
async fn process_honours_limit_parameter() {
    let app = test_app();
    let org = OrganizationId::new();
    for _ in 0..3 {
        let event =
            OutboxEvent::new(org, "unrouted", "TEST.v1", serde_json::json!({}), app.clock.now_utc());
        app.storage.insert_event(event).await;
    }

    let (status, body, _) = send(&app.router, "POST", "/process?limit=2").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["summary"]["claimed"], 2);

    let (status, body, _) = send(&app.router, "POST", "/process?limit=0").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "invalid_limit");
}

#[tokio::test]
async fn claim_failure_is_reported_as_processing_failed() {
    let app = test_app();
    app.storage.inject_claim_error("connection refused").await;

    let (status, body, _) = send(&app.router, "POST", "/process").await;

    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(body["error"], "processing_failed");
    assert!(body["message"].as_str().unwrap().contains("connection refused"));
}

#[tokio::test]
async fn stats_expose_status_counts_and_worker_counters() {
    let app = test_app();
    let org = OrganizationId::new();
    let now = app.clock.now_utc();
    app.storage.insert_event(OutboxEvent::new(org, "a", "A.v1", serde_json::json!({}), now)).await;
    let mut dead = OutboxEvent::new(org, "b", "B.v1", serde_json::json!({}), now);
    dead.status = OutboxStatus::Dlq;
    app.storage.insert_event(dead).await;

    let (status, body, _) = send(&app.router, "GET", "/stats").await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["stats"]["pending"], 1);
    assert_eq!(body["stats"]["delivered"], 0);
    assert_eq!(body["stats"]["failed"], 0);
    assert_eq!(body["stats"]["dlq"], 1);
    assert_eq!(body["worker"]["batches_run"], 0);
    assert!(body["timestamp"].is_string());
}
