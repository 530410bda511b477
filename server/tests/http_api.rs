//! HTTP surface tests over the in-memory infrastructure.

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)] // Test code can use unwrap/expect/panic

use axum::http::{HeaderName, HeaderValue, StatusCode};
use axum_test::TestServer;
use boxoffice_core::SessionId;
use boxoffice_core::environment::Clock;
use boxoffice_core::lock::LockStore;
use boxoffice_core::outbox::OutboxStatus;
use boxoffice_runtime::lock::seat_lock_key;
use boxoffice_runtime::metrics::MetricsRecorder;
use boxoffice_runtime::{
    EngineConfig, LockManager, OutboxConfig, OutboxPublisher, ReservationEngine,
};
use boxoffice_server::{AppState, build_router};
use boxoffice_testing::mocks::{
    FixedClock, InMemoryBookingStore, InMemoryLockStore, InMemoryMessageBus, test_clock,
};
use chrono::TimeDelta;
use serde_json::{Value, json};
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

// ============================================================================
// Test Fixtures
// ============================================================================

struct Api {
    server: TestServer,
    store: Arc<InMemoryBookingStore>,
    locks: Arc<InMemoryLockStore>,
    bus: Arc<InMemoryMessageBus>,
    clock: FixedClock,
    session_id: SessionId,
}

async fn api_with(admin_api_key: Option<&str>, metrics: MetricsRecorder) -> Api {
    boxoffice_testing::init_tracing();
    let store = Arc::new(InMemoryBookingStore::new());
    let locks = Arc::new(InMemoryLockStore::new());
    let bus = Arc::new(InMemoryMessageBus::new());
    let clock = test_clock();
    let session = store.add_session("Rear Window", 1500, 12).await;

    let engine = Arc::new(ReservationEngine::new(
        store.clone(),
        LockManager::new(locks.clone()),
        bus.clone(),
        Arc::new(clock.clone()),
        EngineConfig::default(),
    ));
    let publisher = Arc::new(OutboxPublisher::new(
        store.clone(),
        bus.clone(),
        Arc::new(clock.clone()),
        OutboxConfig {
            max_attempts: 1,
            ..OutboxConfig::default()
        },
    ));

    let state = AppState::new(
        engine,
        publisher,
        Arc::new(metrics),
        admin_api_key.map(str::to_string),
    );
    let server = TestServer::new(build_router(state)).unwrap();

    Api {
        server,
        store,
        locks,
        bus,
        clock,
        session_id: session.id,
    }
}

async fn api() -> Api {
    api_with(None, MetricsRecorder::new()).await
}

fn header(name: &'static str, value: &str) -> (HeaderName, HeaderValue) {
    (HeaderName::from_static(name), HeaderValue::from_str(value).unwrap())
}

async fn reserve(api: &Api, user: &str, labels: &[&str]) -> Value {
    let response = api
        .server
        .post("/reservations")
        .json(&json!({
            "sessionId": api.session_id.get(),
            "userId": user,
            "seatLabels": labels,
        }))
        .await;
    assert_eq!(response.status_code(), StatusCode::CREATED, "{}", response.text());
    response.json::<Value>()
}

// ============================================================================
// Reservations
// ============================================================================

#[tokio::test]
async fn create_returns_the_pending_reservation() {
    let api = api().await;

    let body = reserve(&api, "alice", &["A1", "A2"]).await;

    assert_eq!(body["status"], "PENDING");
    assert_eq!(body["seatLabels"], json!(["A1", "A2"]));
    assert_eq!(body["userId"], "alice");
    let expires_at: chrono::DateTime<chrono::Utc> =
        serde_json::from_value(body["expiresAt"].clone()).unwrap();
    assert_eq!(expires_at, api.clock.now() + TimeDelta::seconds(30));

    let id = body["reservationId"].as_str().unwrap();
    let fetched = api.server.get(&format!("/reservations/{id}")).await;
    assert_eq!(fetched.status_code(), StatusCode::OK);
    assert_eq!(fetched.json::<Value>(), body);
}

#[tokio::test]
async fn malformed_requests_are_rejected() {
    let api = api().await;
    let session_id = api.session_id.get();

    for body in [
        json!({"sessionId": session_id, "userId": "alice", "seatLabels": []}),
        json!({"sessionId": session_id, "userId": "", "seatLabels": ["A1"]}),
        json!({"sessionId": session_id, "userId": "alice", "seatLabels": ["A1", "A1"]}),
        json!({"sessionId": session_id, "userId": "alice", "seatLabels": ["  "]}),
    ] {
        let response = api.server.post("/reservations").json(&body).await;
        assert_eq!(response.status_code(), StatusCode::UNPROCESSABLE_ENTITY);
        assert_eq!(response.json::<Value>()["code"], "VALIDATION_ERROR");
    }

    let response = api.server.get("/reservations/not-a-uuid").await;
    assert_eq!(response.status_code(), StatusCode::UNPROCESSABLE_ENTITY);

    assert!(api.store.outbox_events().await.is_empty());
}

#[tokio::test]
async fn unparsable_bodies_get_the_error_envelope() {
    let api = api().await;
    let session_id = api.session_id.get();

    let missing_field = api
        .server
        .post("/reservations")
        .json(&json!({"sessionId": session_id, "userId": "alice"}))
        .await;
    let wrong_type = api
        .server
        .post("/reservations")
        .json(&json!({"sessionId": "one", "userId": "alice", "seatLabels": ["A1"]}))
        .await;
    let malformed = api
        .server
        .post("/reservations")
        .text("{\"sessionId\": ")
        .content_type("application/json")
        .await;
    let no_content_type = api
        .server
        .post("/reservations")
        .bytes(json!({"sessionId": session_id, "userId": "alice", "seatLabels": ["A1"]}).to_string().into())
        .await;

    for response in [missing_field, wrong_type, malformed, no_content_type] {
        assert_eq!(response.status_code(), StatusCode::UNPROCESSABLE_ENTITY);
        let body = response.json::<Value>();
        assert_eq!(body["code"], "VALIDATION_ERROR");
        assert!(body["error"].is_string());
    }

    assert!(api.store.outbox_events().await.is_empty());
}

#[tokio::test]
async fn unknown_session_seat_or_reservation_is_not_found() {
    let api = api().await;

    let response = api
        .server
        .post("/reservations")
        .json(&json!({"sessionId": 999, "userId": "alice", "seatLabels": ["A1"]}))
        .await;
    assert_eq!(response.status_code(), StatusCode::NOT_FOUND);

    let response = api
        .server
        .post("/reservations")
        .json(&json!({"sessionId": api.session_id.get(), "userId": "alice", "seatLabels": ["Z9"]}))
        .await;
    assert_eq!(response.status_code(), StatusCode::NOT_FOUND);

    let response = api
        .server
        .get(&format!("/reservations/{}", Uuid::new_v4()))
        .await;
    assert_eq!(response.status_code(), StatusCode::NOT_FOUND);
    assert_eq!(response.json::<Value>()["code"], "NOT_FOUND");
}

#[tokio::test]
async fn taken_and_contended_seats_are_conflicts() {
    let api = api().await;
    reserve(&api, "alice", &["A1"]).await;

    let response = api
        .server
        .post("/reservations")
        .json(&json!({"sessionId": api.session_id.get(), "userId": "bob", "seatLabels": ["A2", "A1"]}))
        .await;
    assert_eq!(response.status_code(), StatusCode::CONFLICT);
    assert_eq!(response.json::<Value>()["code"], "SEAT_UNAVAILABLE");

    // another request is mid-flight on A3
    let key = seat_lock_key(api.session_id, "A3");
    assert!(api.locks.set_if_absent(&key, "other-request", Duration::from_secs(5)).await.unwrap());

    let response = api
        .server
        .post("/reservations")
        .json(&json!({"sessionId": api.session_id.get(), "userId": "bob", "seatLabels": ["A3"]}))
        .await;
    assert_eq!(response.status_code(), StatusCode::CONFLICT);
    assert_eq!(response.json::<Value>()["code"], "SEAT_CONTENTION");
}

#[tokio::test]
async fn lock_store_outage_is_service_unavailable() {
    let api = api().await;
    api.locks.set_unavailable(true);

    let response = api
        .server
        .post("/reservations")
        .json(&json!({"sessionId": api.session_id.get(), "userId": "alice", "seatLabels": ["A1"]}))
        .await;

    assert_eq!(response.status_code(), StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(response.json::<Value>()["code"], "SERVICE_UNAVAILABLE");
}

#[tokio::test]
async fn confirm_payment_creates_one_sale() {
    let api = api().await;
    let reservation = reserve(&api, "alice", &["A1", "A2"]).await;
    let id = reservation["reservationId"].as_str().unwrap();
    let path = format!("/reservations/{id}/confirm-payment");

    let first = api.server.post(&path).await;
    assert_eq!(first.status_code(), StatusCode::OK);
    let sale = first.json::<Value>();
    assert_eq!(sale["totalCents"], 3000);
    assert_eq!(sale["reservationId"], id);

    let again = api.server.post(&path).await;
    assert_eq!(again.status_code(), StatusCode::OK);
    assert_eq!(again.json::<Value>()["id"], sale["id"]);

    let status = api.server.get(&format!("/reservations/{id}")).await.json::<Value>();
    assert_eq!(status["status"], "CONFIRMED");
    assert_eq!(api.store.sales().await.len(), 1);
}

#[tokio::test]
async fn confirming_after_the_hold_is_a_conflict() {
    let api = api().await;
    let reservation = reserve(&api, "alice", &["B1"]).await;
    let id = reservation["reservationId"].as_str().unwrap();

    api.clock.advance(TimeDelta::seconds(31));

    let response = api.server.post(&format!("/reservations/{id}/confirm-payment")).await;
    assert_eq!(response.status_code(), StatusCode::CONFLICT);
    assert_eq!(response.json::<Value>()["code"], "RESERVATION_EXPIRED");

    // the seat went back on sale
    reserve(&api, "bob", &["B1"]).await;
}

#[tokio::test]
async fn purchase_history_lists_newest_first() {
    let api = api().await;

    for label in ["C1", "C2"] {
        let reservation = reserve(&api, "carol", &[label]).await;
        let id = reservation["reservationId"].as_str().unwrap();
        api.server.post(&format!("/reservations/{id}/confirm-payment")).await;
        api.clock.advance(TimeDelta::seconds(1));
    }
    reserve(&api, "dave", &["C3"]).await;

    let sales = api
        .server
        .get("/reservations/users/carol/purchases")
        .await
        .json::<Vec<Value>>();
    assert_eq!(sales.len(), 2);
    assert!(sales[0]["confirmedAt"].as_str() > sales[1]["confirmedAt"].as_str());

    let none = api
        .server
        .get("/reservations/users/erin/purchases")
        .await
        .json::<Vec<Value>>();
    assert!(none.is_empty());
}

#[tokio::test]
async fn correlation_id_is_echoed_or_generated() {
    let api = api().await;

    let (name, value) = header("x-correlation-id", "checkout-42");
    let response = api.server.get("/health").add_header(name, value).await;
    assert_eq!(response.headers()["x-correlation-id"], "checkout-42");

    let response = api.server.get("/health").await;
    let generated = response.headers()["x-correlation-id"].to_str().unwrap();
    assert!(Uuid::parse_str(generated).is_ok());
}

#[tokio::test]
async fn correlation_id_reaches_the_outbox_payload() {
    let api = api().await;

    let (name, value) = header("x-correlation-id", "checkout-7");
    let response = api
        .server
        .post("/reservations")
        .add_header(name, value)
        .json(&json!({"sessionId": api.session_id.get(), "userId": "alice", "seatLabels": ["D1"]}))
        .await;
    assert_eq!(response.status_code(), StatusCode::CREATED);

    let rows = api.store.outbox_events().await;
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].payload["correlationId"], "checkout-7");
}

// ============================================================================
// Health and metrics
// ============================================================================

#[tokio::test]
async fn health_reports_the_version() {
    let api = api().await;

    let response = api.server.get("/health").await;

    assert_eq!(response.status_code(), StatusCode::OK);
    let body = response.json::<Value>();
    assert_eq!(body["status"], "ok");
    assert_eq!(body["version"], env!("CARGO_PKG_VERSION"));
}

#[tokio::test]
async fn metrics_are_exposed_for_scraping() {
    let mut recorder = MetricsRecorder::new();
    recorder.install().unwrap();
    let api = api_with(None, recorder).await;
    reserve(&api, "alice", &["E1"]).await;

    let response = api.server.get("/metrics").await;

    assert_eq!(response.status_code(), StatusCode::OK);
    assert!(response.text().contains("boxoffice_reservations_created"));
}

// ============================================================================
// Outbox administration
// ============================================================================

#[tokio::test]
async fn admin_routes_require_the_configured_key() {
    let api = api_with(Some("s3cret"), MetricsRecorder::new()).await;

    let response = api.server.get("/admin/outbox/metrics").await;
    assert_eq!(response.status_code(), StatusCode::UNAUTHORIZED);

    let (name, value) = header("x-api-key", "wrong");
    let response = api.server.post("/admin/outbox/retry-failed").add_header(name, value).await;
    assert_eq!(response.status_code(), StatusCode::UNAUTHORIZED);

    let (name, value) = header("x-api-key", "s3cret");
    let response = api.server.get("/admin/outbox/metrics").add_header(name, value).await;
    assert_eq!(response.status_code(), StatusCode::OK);
}

#[tokio::test]
async fn retry_failed_requeues_and_flushes() {
    let api = api().await;
    reserve(&api, "alice", &["F1"]).await;

    // one attempt allowed, so a broker outage quarantines the row
    api.bus.set_unavailable(true);
    api.server.post("/admin/outbox/retry-failed").await;
    let metrics = api.server.get("/admin/outbox/metrics").await.json::<Value>();
    assert_eq!(metrics["failed"], 1);
    assert_eq!(metrics["pending"], 0);
    assert_eq!(api.store.outbox_events().await[0].status, OutboxStatus::Failed);

    api.bus.set_unavailable(false);
    let response = api.server.post("/admin/outbox/retry-failed").await;
    assert_eq!(response.status_code(), StatusCode::OK);
    assert_eq!(response.json::<Value>(), json!({"requeued": 1, "flushed": 1}));

    let metrics = api.server.get("/admin/outbox/metrics").await.json::<Value>();
    assert_eq!(metrics["published"], 1);
    assert_eq!(metrics["failed"], 0);
    assert_eq!(metrics["oldestPendingAt"], Value::Null);
}
