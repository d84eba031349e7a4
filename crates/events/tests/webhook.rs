//! Delivery against a local callback server.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use assert_matches::assert_matches;
use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::post;
use axum::{Json, Router};

use relay_events::{WebhookDelivery, WebhookError, WebhookSender};

#[derive(Clone, Default)]
struct Callback {
    bodies: Arc<Mutex<Vec<serde_json::Value>>>,
    failures: Arc<AtomicUsize>,
}

async fn accept(State(cb): State<Callback>, Json(body): Json<serde_json::Value>) -> StatusCode {
    cb.bodies.lock().unwrap().push(body);
    StatusCode::OK
}

async fn reject(State(cb): State<Callback>) -> StatusCode {
    cb.failures.fetch_add(1, Ordering::SeqCst);
    StatusCode::INTERNAL_SERVER_ERROR
}

async fn stall() -> StatusCode {
    tokio::time::sleep(Duration::from_secs(5)).await;
    StatusCode::OK
}

async fn serve() -> (String, Callback) {
    let cb = Callback::default();
    let app = Router::new()
        .route("/ok", post(accept))
        .route("/fail", post(reject))
        .route("/slow", post(stall))
        .with_state(cb.clone());

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    (format!("http://{addr}"), cb)
}

#[tokio::test]
async fn delivers_payload_verbatim() {
    let (base, cb) = serve().await;
    let delivery = WebhookDelivery::new(Duration::from_secs(5)).unwrap();
    let payload = serde_json::json!({"client_task_id": "t1", "error_code": 0});

    delivery.send(&format!("{base}/ok"), &payload).await.unwrap();

    assert_eq!(cb.bodies.lock().unwrap().as_slice(), &[payload]);
}

#[tokio::test]
async fn non_success_status_fails_after_one_attempt() {
    let (base, cb) = serve().await;
    let delivery = WebhookDelivery::new(Duration::from_secs(5)).unwrap();

    let result = delivery
        .send(&format!("{base}/fail"), &serde_json::json!({}))
        .await;

    assert_matches!(result, Err(WebhookError::HttpStatus(500)));
    assert_eq!(cb.failures.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn slow_endpoint_times_out() {
    let (base, _cb) = serve().await;
    let delivery = WebhookDelivery::new(Duration::from_millis(200)).unwrap();

    let started = std::time::Instant::now();
    let result = delivery
        .send(&format!("{base}/slow"), &serde_json::json!({}))
        .await;

    assert_matches!(result, Err(WebhookError::Request(e)) if e.is_timeout());
    assert!(started.elapsed() < Duration::from_secs(4));
}

#[tokio::test]
async fn unreachable_endpoint_is_a_request_error() {
    let delivery = WebhookDelivery::new(Duration::from_secs(2)).unwrap();
    let result = delivery
        .send("http://127.0.0.1:1/cb", &serde_json::json!({}))
        .await;
    assert_matches!(result, Err(WebhookError::Request(_)));
}
