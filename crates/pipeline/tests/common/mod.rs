//! Fakes and a harness for driving the dispatcher without live services.

#![allow(dead_code)]

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;

use relay_cloud::{BlobStore, BlobStoreError};
use relay_comfyui::api::ComfyUIApiError;
use relay_comfyui::{BackendApi, BackendEvent, BackendHandle, BackendManager, LoadTracker, OutputRef};
use relay_core::task::TaskStatus;
use relay_core::types::TaskId;
use relay_db::{MemoryTaskStore, StoreError, TaskRecord, TaskStore};
use relay_events::{WebhookError, WebhookSender};
use relay_pipeline::{
    Dispatcher, DispatcherConfig, FetchPolicy, Sinks, SubmitRequest, EARLY_EVENT_TTL,
    TOMBSTONE_TTL,
};

pub const ARTIFACT: &[u8] = b"\x89PNG fake artifact";

// ---------------------------------------------------------------------------
// Backend
// ---------------------------------------------------------------------------

pub struct FakeBackend {
    id: usize,
    next_job: AtomicU32,
    pub reject: AtomicBool,
    /// Fetches that fail before one succeeds; `u32::MAX` never succeeds.
    pub fetch_failures: AtomicU32,
    pub fetch_calls: AtomicU32,
    pub submitted: Mutex<Vec<(serde_json::Value, String)>>,
    pub pushed: Mutex<Vec<String>>,
    pub deleted: Mutex<Vec<String>>,
}

impl FakeBackend {
    pub fn new(id: usize) -> Self {
        Self {
            id,
            next_job: AtomicU32::new(1),
            reject: AtomicBool::new(false),
            fetch_failures: AtomicU32::new(0),
            fetch_calls: AtomicU32::new(0),
            submitted: Mutex::new(Vec::new()),
            pushed: Mutex::new(Vec::new()),
            deleted: Mutex::new(Vec::new()),
        }
    }

    /// Job id the next accepted submission will receive.
    pub fn peek_job_id(&self) -> String {
        format!("job-{}-{}", self.id, self.next_job.load(Ordering::SeqCst))
    }

    pub fn submit_count(&self) -> usize {
        self.submitted.lock().unwrap().len()
    }

    pub fn deleted(&self) -> Vec<String> {
        self.deleted.lock().unwrap().clone()
    }
}

#[async_trait]
impl BackendApi for FakeBackend {
    async fn submit(
        &self,
        workflow: &serde_json::Value,
        client_id: &str,
    ) -> Result<String, ComfyUIApiError> {
        if self.reject.load(Ordering::SeqCst) {
            return Err(ComfyUIApiError::ApiError {
                status: 400,
                body: "invalid prompt".into(),
            });
        }
        self.submitted
            .lock()
            .unwrap()
            .push((workflow.clone(), client_id.to_string()));
        let n = self.next_job.fetch_add(1, Ordering::SeqCst);
        Ok(format!("job-{}-{n}", self.id))
    }

    async fn push_input(&self, filename: &str, _bytes: Vec<u8>) -> Result<String, ComfyUIApiError> {
        let path = format!("relay/{filename}");
        self.pushed.lock().unwrap().push(path.clone());
        Ok(path)
    }

    async fn delete_input(&self, path: &str) -> Result<(), ComfyUIApiError> {
        self.deleted.lock().unwrap().push(path.to_string());
        Ok(())
    }

    async fn fetch_output(&self, _output: &OutputRef) -> Result<Vec<u8>, ComfyUIApiError> {
        let call = self.fetch_calls.fetch_add(1, Ordering::SeqCst);
        if call < self.fetch_failures.load(Ordering::SeqCst) {
            return Err(ComfyUIApiError::ApiError {
                status: 404,
                body: "not found".into(),
            });
        }
        Ok(ARTIFACT.to_vec())
    }
}

// ---------------------------------------------------------------------------
// Blob store
// ---------------------------------------------------------------------------

#[derive(Default)]
pub struct FakeBlobs {
    pub fail: AtomicBool,
    pub puts: Mutex<Vec<(String, Vec<u8>, String)>>,
}

impl FakeBlobs {
    pub fn keys(&self) -> Vec<String> {
        self.puts.lock().unwrap().iter().map(|(k, _, _)| k.clone()).collect()
    }
}

#[async_trait]
impl BlobStore for FakeBlobs {
    async fn put(
        &self,
        key: &str,
        bytes: Vec<u8>,
        content_type: &str,
    ) -> Result<String, BlobStoreError> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(BlobStoreError::Upload("bucket unavailable".into()));
        }
        self.puts
            .lock()
            .unwrap()
            .push((key.to_string(), bytes, content_type.to_string()));
        Ok(key.to_string())
    }
}

// ---------------------------------------------------------------------------
// Webhook
// ---------------------------------------------------------------------------

#[derive(Default)]
pub struct FakeWebhook {
    pub fail: AtomicBool,
    pub calls: Mutex<Vec<(String, serde_json::Value)>>,
}

impl FakeWebhook {
    pub fn bodies(&self) -> Vec<serde_json::Value> {
        self.calls.lock().unwrap().iter().map(|(_, b)| b.clone()).collect()
    }
}

#[async_trait]
impl WebhookSender for FakeWebhook {
    async fn send(&self, url: &str, payload: &serde_json::Value) -> Result<(), WebhookError> {
        self.calls
            .lock()
            .unwrap()
            .push((url.to_string(), payload.clone()));
        if self.fail.load(Ordering::SeqCst) {
            return Err(WebhookError::HttpStatus(503));
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Store
// ---------------------------------------------------------------------------

/// Memory store that can be told to fail its next few calls.
pub struct FaultyStore {
    inner: Arc<MemoryTaskStore>,
    pub failing_transitions: AtomicU32,
    pub failing_lookups: AtomicU32,
}

impl FaultyStore {
    fn new(inner: Arc<MemoryTaskStore>) -> Self {
        Self {
            inner,
            failing_transitions: AtomicU32::new(0),
            failing_lookups: AtomicU32::new(0),
        }
    }
}

fn take_failure(counter: &AtomicU32) -> Result<(), StoreError> {
    let taken = counter.fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1));
    match taken {
        Ok(_) => Err(StoreError::Database(sqlx::Error::PoolTimedOut)),
        Err(_) => Ok(()),
    }
}

#[async_trait]
impl TaskStore for FaultyStore {
    async fn upsert(&self, record: &TaskRecord) -> Result<(), StoreError> {
        self.inner.upsert(record).await
    }

    async fn transition(
        &self,
        record: &TaskRecord,
        expected: TaskStatus,
    ) -> Result<bool, StoreError> {
        take_failure(&self.failing_transitions)?;
        self.inner.transition(record, expected).await
    }

    async fn find_by_id(&self, id: TaskId) -> Result<Option<TaskRecord>, StoreError> {
        self.inner.find_by_id(id).await
    }

    async fn find_by_backend_job_id(
        &self,
        backend_job_id: &str,
    ) -> Result<Option<TaskRecord>, StoreError> {
        take_failure(&self.failing_lookups)?;
        self.inner.find_by_backend_job_id(backend_job_id).await
    }

    async fn find_by_client_task_id(
        &self,
        client_task_id: &str,
    ) -> Result<Vec<TaskRecord>, StoreError> {
        self.inner.find_by_client_task_id(client_task_id).await
    }
}

// ---------------------------------------------------------------------------
// Harness
// ---------------------------------------------------------------------------

pub struct Harness {
    pub dispatcher: Arc<Dispatcher>,
    pub events: mpsc::Sender<BackendEvent>,
    pub tracker: LoadTracker,
    pub backends: Vec<Arc<FakeBackend>>,
    pub store: Arc<MemoryTaskStore>,
    /// The store the dispatcher writes through; wraps `store`.
    pub faults: Arc<FaultyStore>,
    pub blobs: Arc<FakeBlobs>,
    pub webhook: Arc<FakeWebhook>,
    pub fallback: tempfile::TempDir,
}

/// A dispatcher over reachable fake backends with the given queue depths.
pub fn harness(depths: &[u32]) -> Harness {
    harness_with_ttl(depths, EARLY_EVENT_TTL)
}

pub fn harness_with_ttl(depths: &[u32], early_event_ttl: Duration) -> Harness {
    harness_with_ttls(depths, early_event_ttl, TOMBSTONE_TTL)
}

pub fn harness_with_ttls(
    depths: &[u32],
    early_event_ttl: Duration,
    tombstone_ttl: Duration,
) -> Harness {
    let tracker = LoadTracker::new((0..depths.len()).map(|i| format!("http://backend-{i}:8188")));
    let mut backends = Vec::new();
    let mut handles = Vec::new();
    for (id, depth) in depths.iter().enumerate() {
        let state = tracker.state(id).unwrap();
        state.set_reachable(true);
        state.set_queue_depth(*depth);

        let backend = Arc::new(FakeBackend::new(id));
        handles.push(BackendHandle {
            id,
            client_id: format!("client-{id}"),
            api: backend.clone(),
        });
        backends.push(backend);
    }
    let manager = BackendManager::from_parts(tracker.clone(), handles);

    let store = Arc::new(MemoryTaskStore::new());
    let faults = Arc::new(FaultyStore::new(store.clone()));
    let blobs = Arc::new(FakeBlobs::default());
    let webhook = Arc::new(FakeWebhook::default());
    let fallback = tempfile::tempdir().unwrap();

    let (events, rx) = mpsc::channel(64);
    let dispatcher = Dispatcher::start(
        manager,
        rx,
        Sinks {
            store: faults.clone(),
            blobs: blobs.clone(),
            webhook: webhook.clone(),
        },
        DispatcherConfig {
            key_prefix: "renders/".into(),
            fallback_dir: fallback.path().to_path_buf(),
            fetch: FetchPolicy {
                max_attempts: 3,
                initial_backoff: Duration::from_millis(10),
            },
            early_event_ttl,
            tombstone_ttl,
        },
    );

    Harness {
        dispatcher,
        events,
        tracker,
        backends,
        store,
        faults,
        blobs,
        webhook,
        fallback,
    }
}

pub fn text2img(client_task_id: &str) -> SubmitRequest {
    SubmitRequest {
        service_type: "text2img".into(),
        client_task_id: client_task_id.into(),
        client_callback_url: "http://client.test/callback".into(),
        params: serde_json::json!({"text": "a lighthouse at dusk"}),
    }
}

pub fn img2img(client_task_id: &str) -> SubmitRequest {
    use base64::Engine;
    SubmitRequest {
        service_type: "img2img".into(),
        client_task_id: client_task_id.into(),
        client_callback_url: "http://client.test/callback".into(),
        params: serde_json::json!({
            "text": "make it winter",
            "image": base64::engine::general_purpose::STANDARD.encode(b"source image"),
        }),
    }
}

pub fn completed(backend_id: usize, job_id: &str, filename: &str) -> BackendEvent {
    BackendEvent::JobCompleted {
        backend_id,
        job_id: job_id.into(),
        output: OutputRef::new(filename, ""),
    }
}

pub fn failed(backend_id: usize, job_id: &str, error: &str) -> BackendEvent {
    BackendEvent::JobFailed {
        backend_id,
        job_id: job_id.into(),
        error: error.into(),
    }
}

/// Poll until `check` holds, panicking after five seconds.
pub async fn eventually<F, Fut>(what: &str, mut check: F)
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = bool>,
{
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while !check().await {
        assert!(tokio::time::Instant::now() < deadline, "timed out waiting for {what}");
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

/// Wait until the task reaches a terminal status and return it.
pub async fn settled(store: &MemoryTaskStore, id: TaskId) -> TaskRecord {
    eventually("terminal task state", move || async move {
        matches!(store.find_by_id(id).await.unwrap(), Some(r) if r.status.is_terminal())
    })
    .await;
    store.find_by_id(id).await.unwrap().unwrap()
}

/// Wait until the webhook has been called `n` times.
pub async fn webhook_calls(webhook: &Arc<FakeWebhook>, n: usize) {
    let webhook = Arc::clone(webhook);
    eventually("webhook calls", move || {
        let webhook = Arc::clone(&webhook);
        async move { webhook.bodies().len() >= n }
    })
    .await;
}
