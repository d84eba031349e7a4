#![allow(dead_code)]

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use axum::body::Body;
use axum::http::{Method, Request, Response};
use axum::Router;
use http_body_util::BodyExt;
use tokio::sync::mpsc;
use tower::ServiceExt;

use relay_api::router::build_app_router;
use relay_api::state::AppState;
use relay_cloud::{BlobStore, BlobStoreError};
use relay_comfyui::api::ComfyUIApiError;
use relay_comfyui::{BackendApi, BackendEvent, BackendHandle, BackendManager, LoadTracker, OutputRef};
use relay_db::MemoryTaskStore;
use relay_events::{WebhookError, WebhookSender};
use relay_pipeline::{Dispatcher, DispatcherConfig, Sinks};

/// Backend that accepts or rejects every prompt.
#[derive(Default)]
pub struct StubBackend {
    pub reject: AtomicBool,
}

#[async_trait]
impl BackendApi for StubBackend {
    async fn submit(&self, _workflow: &serde_json::Value, _client_id: &str) -> Result<String, ComfyUIApiError> {
        if self.reject.load(Ordering::SeqCst) {
            return Err(ComfyUIApiError::ApiError {
                status: 400,
                body: "invalid prompt".into(),
            });
        }
        Ok("prompt-1".into())
    }

    async fn push_input(&self, filename: &str, _bytes: Vec<u8>) -> Result<String, ComfyUIApiError> {
        Ok(format!("relay/{filename}"))
    }

    async fn delete_input(&self, _path: &str) -> Result<(), ComfyUIApiError> {
        Ok(())
    }

    async fn fetch_output(&self, _output: &OutputRef) -> Result<Vec<u8>, ComfyUIApiError> {
        Ok(b"png".to_vec())
    }
}

struct NullBlobs;

#[async_trait]
impl BlobStore for NullBlobs {
    async fn put(&self, key: &str, _bytes: Vec<u8>, _content_type: &str) -> Result<String, BlobStoreError> {
        Ok(key.to_string())
    }
}

struct NullWebhook;

#[async_trait]
impl WebhookSender for NullWebhook {
    async fn send(&self, _url: &str, _payload: &serde_json::Value) -> Result<(), WebhookError> {
        Ok(())
    }
}

pub struct TestApp {
    pub router: Router,
    pub tracker: LoadTracker,
    pub backend: Arc<StubBackend>,
    pub store: Arc<MemoryTaskStore>,
    /// Keeps the event channel open for the lifetime of the app.
    pub events: mpsc::Sender<BackendEvent>,
    pub fallback: tempfile::TempDir,
}

/// Build the full application router over one stub backend.
pub fn build_test_app(reachable: bool) -> TestApp {
    let tracker = LoadTracker::new(["http://gpu-0:8188"]);
    let state = tracker.state(0).unwrap();
    state.set_reachable(reachable);

    let backend = Arc::new(StubBackend::default());
    let manager = BackendManager::from_parts(
        tracker.clone(),
        vec![BackendHandle {
            id: 0,
            client_id: "client-0".into(),
            api: backend.clone(),
        }],
    );

    let store = Arc::new(MemoryTaskStore::new());
    let fallback = tempfile::tempdir().unwrap();
    let (events, rx) = mpsc::channel(16);
    let dispatcher = Dispatcher::start(
        manager,
        rx,
        Sinks {
            store: store.clone(),
            blobs: Arc::new(NullBlobs),
            webhook: Arc::new(NullWebhook),
        },
        DispatcherConfig {
            fallback_dir: fallback.path().to_path_buf(),
            ..DispatcherConfig::default()
        },
    );

    TestApp {
        router: build_app_router(AppState { dispatcher }, Duration::from_secs(30)),
        tracker,
        backend,
        store,
        events,
        fallback,
    }
}

pub async fn get(app: Router, uri: &str) -> Response<Body> {
    let request = Request::builder()
        .method(Method::GET)
        .uri(uri)
        .body(Body::empty())
        .unwrap();
    app.oneshot(request).await.unwrap()
}

pub async fn post_json(app: Router, uri: &str, body: &str) -> Response<Body> {
    let request = Request::builder()
        .method(Method::POST)
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap();
    app.oneshot(request).await.unwrap()
}

pub async fn body_json(response: Response<Body>) -> serde_json::Value {
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    serde_json::from_slice(&bytes).unwrap()
}
