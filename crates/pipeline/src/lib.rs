//! Task dispatch: submission, completion correlation, result handling and
//! outcome notification.
//!
//! [`Dispatcher`] wires the stages together around a running
//! [`BackendManager`]:
//!
//! ```text
//! submit ──▶ Gateway ──▶ backend
//!                 │ register
//!                 ▼
//! backend events ──▶ Correlator ──▶ ResultPipeline ──▶ Notifier
//!                                └──────(failure)────▶ Notifier
//! ```

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use relay_cloud::BlobStore;
use relay_comfyui::{BackendEvent, BackendManager};
use relay_core::scheduling::BackendSnapshot;
use relay_core::types::TaskId;
use relay_db::{TaskRecord, TaskStore};
use relay_events::WebhookSender;
use tokio::sync::{mpsc, Mutex};
use tokio_util::sync::CancellationToken;

pub mod correlator;
pub mod error;
pub mod fallback;
pub mod gateway;
pub mod ledger;
pub mod notifier;
pub mod result;

pub use correlator::{Correlator, EARLY_EVENT_TTL, TOMBSTONE_TTL};
pub use error::DispatchError;
pub use gateway::{Gateway, SubmitReceipt, SubmitRequest};
pub use notifier::Notifier;
pub use result::{FetchPolicy, ResultPipeline};

/// Settings for the stages after submission.
#[derive(Debug, Clone)]
pub struct DispatcherConfig {
    /// Prepended to every artifact key.
    pub key_prefix: String,
    pub fallback_dir: PathBuf,
    pub fetch: FetchPolicy,
    pub early_event_ttl: Duration,
    pub tombstone_ttl: Duration,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            key_prefix: String::new(),
            fallback_dir: PathBuf::from("./fallback"),
            fetch: FetchPolicy::default(),
            early_event_ttl: EARLY_EVENT_TTL,
            tombstone_ttl: TOMBSTONE_TTL,
        }
    }
}

/// External services the dispatcher writes to.
#[derive(Clone)]
pub struct Sinks {
    pub store: Arc<dyn TaskStore>,
    pub blobs: Arc<dyn BlobStore>,
    pub webhook: Arc<dyn WebhookSender>,
}

pub struct Dispatcher {
    gateway: Gateway,
    correlator: Arc<Correlator>,
    backends: Arc<BackendManager>,
    store: Arc<dyn TaskStore>,
    cancel: CancellationToken,
    correlator_task: Mutex<Option<tokio::task::JoinHandle<()>>>,
}

impl Dispatcher {
    /// Build every stage and start consuming `events`.
    ///
    /// Must be called inside a Tokio runtime.
    pub fn start(
        backends: Arc<BackendManager>,
        events: mpsc::Receiver<BackendEvent>,
        sinks: Sinks,
        config: DispatcherConfig,
    ) -> Arc<Self> {
        let notifier = Arc::new(Notifier::new(
            sinks.webhook,
            config.fallback_dir.clone(),
        ));
        let results = Arc::new(ResultPipeline::new(
            sinks.blobs,
            Arc::clone(&notifier),
            config.key_prefix,
            config.fallback_dir,
            config.fetch,
        ));
        let correlator = Arc::new(Correlator::new(
            Arc::clone(&sinks.store),
            Arc::clone(&backends),
            results,
            notifier,
            config.early_event_ttl,
            config.tombstone_ttl,
        ));
        let gateway = Gateway::new(
            Arc::clone(&backends),
            Arc::clone(&sinks.store),
            Arc::clone(&correlator),
        );

        let cancel = CancellationToken::new();
        let task = tokio::spawn(Arc::clone(&correlator).run(events, cancel.clone()));

        Arc::new(Self {
            gateway,
            correlator,
            backends,
            store: sinks.store,
            cancel,
            correlator_task: Mutex::new(Some(task)),
        })
    }

    pub async fn submit(&self, request: SubmitRequest) -> Result<SubmitReceipt, DispatchError> {
        self.gateway.submit(request).await
    }

    pub async fn task(&self, internal_id: TaskId) -> Result<Option<TaskRecord>, DispatchError> {
        Ok(self.store.find_by_id(internal_id).await?)
    }

    pub fn backends(&self) -> Vec<BackendSnapshot> {
        self.backends.tracker().snapshot()
    }

    pub fn reachable_backends(&self) -> usize {
        self.backends.tracker().reachable_count()
    }

    pub fn correlator(&self) -> &Arc<Correlator> {
        &self.correlator
    }

    /// Stop listeners, flush queued events, then wait up to `drain` for
    /// in-flight pipelines.
    pub async fn shutdown(&self, drain: Duration) {
        self.backends.shutdown().await;

        self.cancel.cancel();
        if let Some(task) = self.correlator_task.lock().await.take() {
            if let Err(e) = task.await {
                tracing::error!(error = %e, "Correlator task panicked");
            }
        }

        if self.correlator.drain(drain).await {
            tracing::info!("Pipelines drained");
        } else {
            tracing::warn!(
                drain_secs = drain.as_secs(),
                "Drain window elapsed with pipelines still running",
            );
        }
    }
}
