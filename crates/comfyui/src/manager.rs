//! Backend fleet manager.
//!
//! [`BackendManager`] owns one connection task per configured backend
//! (connect -> process -> reconnect loop), the shared [`LoadTracker`],
//! and the per-backend API handles the dispatcher submits through.
//!
//! Terminal job events are delivered on the [`mpsc`] sender passed to
//! [`BackendManager::start`]; queue depth updates never leave the crate.

use std::sync::Arc;
use std::time::Duration;

use relay_core::types::BackendId;
use tokio::sync::{mpsc, Mutex};
use tokio_util::sync::CancellationToken;

use crate::api::ComfyUIApi;
use crate::backend::BackendApi;
use crate::client::ComfyUIClient;
use crate::connection::BackendConnection;
use crate::events::BackendEvent;
use crate::reconnect::ReconnectConfig;
use crate::state::LoadTracker;

/// Capacity of the job event queue between listeners and the correlator.
pub const EVENT_CHANNEL_CAPACITY: usize = 1024;

/// How long shutdown waits for each connection task.
const TASK_STOP_TIMEOUT: Duration = Duration::from_secs(5);

/// Addresses of one backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackendConfig {
    /// HTTP base URL, e.g. `http://host:8188`.
    pub api_url: String,
    /// WebSocket base URL, e.g. `ws://host:8188`.
    pub ws_url: String,
}

impl BackendConfig {
    /// Derive both addresses from an `http(s)://` base URL.
    pub fn from_api_url(api_url: &str) -> Result<Self, ComfyUIManagerError> {
        let api_url = api_url.trim().trim_end_matches('/');
        let ws_url = if let Some(rest) = api_url.strip_prefix("http://") {
            format!("ws://{rest}")
        } else if let Some(rest) = api_url.strip_prefix("https://") {
            format!("wss://{rest}")
        } else {
            return Err(ComfyUIManagerError::InvalidUrl(api_url.to_string()));
        };
        if ws_url.ends_with("://") {
            return Err(ComfyUIManagerError::InvalidUrl(api_url.to_string()));
        }
        Ok(Self {
            api_url: api_url.to_string(),
            ws_url,
        })
    }
}

/// What the submission and result paths need to talk to one backend.
#[derive(Clone)]
pub struct BackendHandle {
    pub id: BackendId,
    /// Identity the listener is registered under; submissions must use it.
    pub client_id: String,
    pub api: Arc<dyn BackendApi>,
}

impl std::fmt::Debug for BackendHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BackendHandle")
            .field("id", &self.id)
            .field("client_id", &self.client_id)
            .finish_non_exhaustive()
    }
}

/// Manages the backend fleet.
///
/// Created once at startup via [`BackendManager::start`]. The returned
/// `Arc` can be cloned into request handlers.
pub struct BackendManager {
    tracker: LoadTracker,
    handles: Vec<BackendHandle>,
    tasks: Mutex<Vec<tokio::task::JoinHandle<()>>>,
    /// Master cancellation token, cancelled during shutdown.
    cancel: CancellationToken,
}

impl BackendManager {
    /// Spawn a connection task per backend, in configuration order.
    ///
    /// Must be called inside a Tokio runtime.
    pub fn start(
        configs: &[BackendConfig],
        reconnect: ReconnectConfig,
        event_tx: mpsc::Sender<BackendEvent>,
    ) -> Arc<Self> {
        let tracker = LoadTracker::new(configs.iter().map(|c| c.api_url.clone()));
        let cancel = CancellationToken::new();
        let http = reqwest::Client::new();

        let mut handles = Vec::with_capacity(configs.len());
        let mut tasks = Vec::with_capacity(configs.len());

        for (id, config) in configs.iter().enumerate() {
            let client = Arc::new(ComfyUIClient::new(id, config.ws_url.clone()));
            let api = Arc::new(ComfyUIApi::with_client(http.clone(), config.api_url.clone()));
            let Some(state) = tracker.state(id) else {
                continue;
            };

            handles.push(BackendHandle {
                id,
                client_id: client.client_id().to_string(),
                api,
            });

            let connection =
                BackendConnection::new(client, state, event_tx.clone(), reconnect.clone());
            let task_cancel = cancel.child_token();
            tracing::info!(backend_id = id, api_url = %config.api_url, "Starting connection task");
            tasks.push(tokio::spawn(connection.run(task_cancel)));
        }

        Arc::new(Self {
            tracker,
            handles,
            tasks: Mutex::new(tasks),
            cancel,
        })
    }

    /// Assemble a manager around existing state without spawning listeners.
    pub fn from_parts(tracker: LoadTracker, handles: Vec<BackendHandle>) -> Arc<Self> {
        Arc::new(Self {
            tracker,
            handles,
            tasks: Mutex::new(Vec::new()),
            cancel: CancellationToken::new(),
        })
    }

    pub fn tracker(&self) -> &LoadTracker {
        &self.tracker
    }

    pub fn backend(&self, id: BackendId) -> Option<&BackendHandle> {
        self.handles.get(id)
    }

    pub fn handles(&self) -> &[BackendHandle] {
        &self.handles
    }

    /// Stop every connection task.
    ///
    /// Cancels the master token, then waits up to 5 seconds per task.
    pub async fn shutdown(&self) {
        tracing::info!("Shutting down backend manager");
        self.cancel.cancel();

        let mut tasks = self.tasks.lock().await;
        for (id, handle) in tasks.drain(..).enumerate() {
            if tokio::time::timeout(TASK_STOP_TIMEOUT, handle).await.is_err() {
                tracing::warn!(backend_id = id, "Connection task did not stop in time");
            }
        }

        tracing::info!("Backend manager shut down");
    }
}

/// Errors from building the backend fleet.
#[derive(Debug, thiserror::Error)]
pub enum ComfyUIManagerError {
    #[error("Invalid backend URL: {0:?} (expected http:// or https://)")]
    InvalidUrl(String),
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;

    #[test]
    fn ws_url_follows_scheme() {
        let plain = BackendConfig::from_api_url("http://gpu-1:8188/").unwrap();
        assert_eq!(plain.api_url, "http://gpu-1:8188");
        assert_eq!(plain.ws_url, "ws://gpu-1:8188");

        let tls = BackendConfig::from_api_url(" https://gpu-2.example.com ").unwrap();
        assert_eq!(tls.ws_url, "wss://gpu-2.example.com");
    }

    #[test]
    fn rejects_non_http_urls() {
        assert_matches!(
            BackendConfig::from_api_url("gpu-1:8188"),
            Err(ComfyUIManagerError::InvalidUrl(_))
        );
        assert_matches!(
            BackendConfig::from_api_url("http://"),
            Err(ComfyUIManagerError::InvalidUrl(_))
        );
    }

    #[tokio::test]
    async fn start_assigns_ids_and_identities_in_order() {
        let configs = vec![
            BackendConfig::from_api_url("http://127.0.0.1:1").unwrap(),
            BackendConfig::from_api_url("http://127.0.0.1:2").unwrap(),
        ];
        let (tx, _rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
        let manager = BackendManager::start(
            &configs,
            ReconnectConfig {
                initial_delay: Duration::from_millis(50),
                ..Default::default()
            },
            tx,
        );

        assert_eq!(manager.handles().len(), 2);
        assert_eq!(manager.backend(1).unwrap().id, 1);
        assert_ne!(
            manager.backend(0).unwrap().client_id,
            manager.backend(1).unwrap().client_id
        );
        assert_eq!(manager.tracker().reachable_count(), 0);
        assert!(manager.backend(2).is_none());

        tokio::time::timeout(Duration::from_secs(10), manager.shutdown())
            .await
            .expect("shutdown should finish");
    }
}
