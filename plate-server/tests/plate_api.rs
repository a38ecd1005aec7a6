//! HTTP round trips against the full router (in-memory store, manual clock)

use std::sync::Arc;

use axum::body::{Body, to_bytes};
use axum::http::{Request, StatusCode, header};
use chrono::Duration;
use plate_server::api::build_app;
use plate_server::core::Config;
use plate_server::plates::ManualClock;
use plate_server::{AnyStore, MemoryStore, RetryPolicy, ServerState};
use serde_json::{Value, json};
use shared::plate::PlateDocument;
use tower::ServiceExt;

fn test_state() -> (ServerState, Arc<ManualClock>) {
    let mut config = Config::with_overrides("./target/plate-api-test", 0);
    config.discard_threshold_secs = 3600;
    config.request_timeout_ms = 5_000;
    let clock = Arc::new(ManualClock::at_timestamp(1_000));
    let store = AnyStore::Memory(MemoryStore::new(RetryPolicy::default()));
    (ServerState::new(config, store, clock.clone()), clock)
}

async fn send(state: &ServerState, request: Request<Body>) -> (StatusCode, Value) {
    let response = build_app(state.clone()).oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let body = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap()
    };
    (status, body)
}

async fn post_report(state: &ServerState, body: Value) -> (StatusCode, Value) {
    let request = Request::builder()
        .method("POST")
        .uri("/v1/plates")
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
        .unwrap();
    send(state, request).await
}

async fn get(state: &ServerState, uri: &str) -> (StatusCode, Value) {
    let request = Request::builder().uri(uri).body(Body::empty()).unwrap();
    send(state, request).await
}

fn report(qr_id: &str, pop: i16, state: u8) -> Value {
    json!({
        "qrId": qr_id,
        "shopNumber": 160,
        "popNumber": pop,
        "state": state,
        "hostname": "collector-1",
    })
}

#[tokio::test]
async fn health_reports_store_backend() {
    let (state, _) = test_state();
    let (status, body) = get(&state, "/health").await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");
    assert_eq!(body["store"], "memory");

    let (status, body) = get(&state, "/health/detailed").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["checks"]["store"]["status"], "ok");
}

#[tokio::test]
async fn closed_report_is_created_and_counted() {
    let (state, _) = test_state();
    let (status, body) = post_report(&state, report("Q1", 5, 1)).await;

    assert_eq!(status, StatusCode::CREATED);
    let doc: PlateDocument = serde_json::from_value(body.clone()).unwrap();
    assert_eq!(doc.served_timestamp, 1_000);
    assert_eq!(doc.empty_timestamp, 0);
    assert_eq!(body["discardFlag"], 0);
    assert_eq!(body["plateStates"]["qrId"], "Q1");

    let (status, body) = get(&state, "/v1/shops/160/counters/5").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({ "popNumber": 5, "count": 1 }));

    let (status, body) = get(&state, "/v1/shops/160/plates/Q1").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["servedTimestamp"], 1_000);
}

#[tokio::test]
async fn reopen_releases_counter() {
    let (state, clock) = test_state();
    post_report(&state, report("Q1", 5, 1)).await;
    clock.advance(Duration::seconds(500));
    let (status, body) = post_report(&state, report("Q1", 5, 0)).await;

    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["servedTimestamp"], 0);
    assert_eq!(body["emptyTimestamp"], 1_500);

    let (_, body) = get(&state, "/v1/shops/160/counters").await;
    assert_eq!(body, json!([{ "popNumber": 5, "count": 0 }]));
}

#[tokio::test]
async fn stale_plate_is_flagged_on_read() {
    let (state, clock) = test_state();
    post_report(&state, report("Q1", 5, 1)).await;
    clock.advance(Duration::seconds(3_601));

    let (_, body) = get(&state, "/v1/shops/160/plates").await;
    assert_eq!(body[0]["discardFlag"], 1);

    let (_, body) = post_report(&state, report("Q1", 5, 1)).await;
    assert_eq!(body["discardFlag"], 1);
    assert_eq!(body["servedTimestamp"], 1_000);

    let (_, body) = get(&state, "/v1/shops/160/counters/5").await;
    assert_eq!(body["count"], 1);
}

#[tokio::test]
async fn missing_fields_are_listed() {
    let (state, _) = test_state();
    let (status, body) = post_report(&state, json!({ "qrId": "Q1" })).await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], 7);
    assert_eq!(
        body["details"]["fields"],
        json!(["shopNumber", "popNumber", "state"])
    );

    let (_, body) = get(&state, "/v1/shops/160/plates").await;
    assert_eq!(body, json!([]));
}

#[tokio::test]
async fn invalid_state_is_rejected() {
    let (state, _) = test_state();
    let (status, body) = post_report(&state, report("Q1", 5, 3)).await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], 4002);
}

#[tokio::test]
async fn malformed_json_is_rejected() {
    let (state, _) = test_state();
    let request = Request::builder()
        .method("POST")
        .uri("/v1/plates")
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from("{not json"))
        .unwrap();
    let (status, body) = send(&state, request).await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], 6);
}

#[tokio::test]
async fn unknown_plate_is_not_found() {
    let (state, _) = test_state();
    let (status, body) = get(&state, "/v1/shops/160/plates/nope").await;

    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["code"], 4001);
}

#[tokio::test]
async fn untouched_counter_reads_zero() {
    let (state, _) = test_state();
    let (status, body) = get(&state, "/v1/shops/160/counters/42").await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({ "popNumber": 42, "count": 0 }));
}

#[tokio::test]
async fn corrupted_document_is_server_fault() {
    let (state, _) = test_state();
    let store = state.plates.store();
    plate_server::DocumentStore::run_transaction(store, |txn| {
        txn.replace("plate-states-160", "qrid-Q1", b"[]".to_vec())
    })
    .unwrap();

    let (status, body) = post_report(&state, report("Q1", 5, 1)).await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(body["code"], 4003);
    assert_eq!(body["details"]["key"], "plate-states-160/qrid-Q1");
}

#[tokio::test]
async fn request_id_is_echoed() {
    let (state, _) = test_state();
    let request = Request::builder()
        .uri("/health")
        .header("x-request-id", "abc-123")
        .body(Body::empty())
        .unwrap();
    let response = build_app(state).oneshot(request).await.unwrap();

    assert_eq!(response.headers()["x-request-id"], "abc-123");
}

#[tokio::test]
async fn updates_are_published_for_subscribers() {
    let (state, _) = test_state();
    let mut rx = state.plates.subscribe();

    post_report(&state, report("Q1", 5, 1)).await;
    let update = rx.recv().await.unwrap();

    assert_eq!(update.shop_number, 160);
    assert_eq!(update.counter_delta, 1);
    assert_eq!(update.document.qr_id(), "Q1");
}

#[tokio::test]
async fn events_endpoint_opens_sse_stream() {
    let (state, _) = test_state();
    let request = Request::builder()
        .uri("/v1/shops/160/events")
        .body(Body::empty())
        .unwrap();
    let response = build_app(state).oneshot(request).await.unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response.headers()[header::CONTENT_TYPE],
        "text/event-stream"
    );
}
