//! Submission gateway.
//!
//! Validates a client request, picks the least-loaded backend, binds the
//! workflow and submits it. Nothing is persisted until the backend has
//! accepted the job, so a rejection leaves no record behind.

use std::sync::Arc;

use relay_comfyui::{BackendApi, BackendManager};
use relay_core::scheduling::select_backend;
use relay_core::service::ServiceType;
use relay_core::task::TaskStatus;
use relay_core::types::{BackendId, TaskId};
use relay_db::{TaskRecord, TaskStore};
use serde::{Deserialize, Serialize};

use crate::correlator::Correlator;
use crate::error::DispatchError;

/// A client's submission.
#[derive(Debug, Clone, Deserialize)]
pub struct SubmitRequest {
    pub service_type: String,
    pub client_task_id: String,
    pub client_callback_url: String,
    #[serde(default)]
    pub params: serde_json::Value,
}

/// Identifiers handed back once a backend accepted the job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SubmitReceipt {
    pub client_task_id: String,
    pub internal_id: TaskId,
    pub backend_job_id: String,
}

/// An input artifact pushed to a backend.
///
/// Deletion from the backend's input area is scheduled when the slot is
/// dropped, whichever way the submission ends.
pub struct InputSlot {
    api: Arc<dyn BackendApi>,
    backend_id: BackendId,
    path: Option<String>,
}

impl InputSlot {
    pub async fn push(
        api: Arc<dyn BackendApi>,
        backend_id: BackendId,
        filename: &str,
        bytes: Vec<u8>,
    ) -> Result<Self, DispatchError> {
        let path = api
            .push_input(filename, bytes)
            .await
            .map_err(|e| DispatchError::BackendRejected {
                backend_id,
                reason: format!("Input upload failed: {e}"),
            })?;
        tracing::debug!(backend_id, path = %path, "Input pushed");
        Ok(Self {
            api,
            backend_id,
            path: Some(path),
        })
    }

    /// Backend-local path of the input.
    pub fn path(&self) -> &str {
        self.path.as_deref().unwrap_or_default()
    }
}

impl Drop for InputSlot {
    fn drop(&mut self) {
        let Some(path) = self.path.take() else {
            return;
        };
        let backend_id = self.backend_id;
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                let api = Arc::clone(&self.api);
                handle.spawn(async move {
                    match api.delete_input(&path).await {
                        Ok(()) => tracing::debug!(backend_id, path = %path, "Input deleted"),
                        Err(e) => tracing::warn!(backend_id, path = %path, error = %e, "Input cleanup failed"),
                    }
                });
            }
            Err(_) => {
                tracing::warn!(backend_id, path = %path, "No runtime to delete input, leaving it on backend");
            }
        }
    }
}

pub struct Gateway {
    backends: Arc<BackendManager>,
    store: Arc<dyn TaskStore>,
    correlator: Arc<Correlator>,
}

impl Gateway {
    pub fn new(
        backends: Arc<BackendManager>,
        store: Arc<dyn TaskStore>,
        correlator: Arc<Correlator>,
    ) -> Self {
        Self {
            backends,
            store,
            correlator,
        }
    }

    pub async fn submit(&self, request: SubmitRequest) -> Result<SubmitReceipt, DispatchError> {
        let service = ServiceType::from_name(&request.service_type)?;
        if request.client_task_id.trim().is_empty() {
            return Err(DispatchError::BadRequest(
                "client_task_id must not be empty".into(),
            ));
        }
        validate_callback_url(&request.client_callback_url)?;
        let params = service.validate_params(&request.params)?;

        let backend_id = select_backend(&self.backends.tracker().snapshot())
            .ok_or(DispatchError::NoBackendAvailable)?;
        let backend = self
            .backends
            .backend(backend_id)
            .ok_or_else(|| DispatchError::Internal(format!("Backend {backend_id} has no handle")))?;

        let internal_id = uuid::Uuid::now_v7();
        let mut record = TaskRecord::pending(
            internal_id,
            request.client_task_id.clone(),
            service,
            request.client_callback_url.clone(),
        );

        let input = match &params.image {
            Some(bytes) => Some(
                InputSlot::push(
                    Arc::clone(&backend.api),
                    backend_id,
                    &format!("{internal_id}.png"),
                    bytes.clone(),
                )
                .await?,
            ),
            None => None,
        };

        let workflow = params.bind(input.as_ref().map(InputSlot::path), default_seed(internal_id))?;

        let submitted = backend.api.submit(&workflow, &backend.client_id).await;
        drop(input);
        let backend_job_id = submitted.map_err(|e| {
            tracing::warn!(
                backend_id,
                client_task_id = %request.client_task_id,
                error = %e,
                "Backend rejected submission",
            );
            DispatchError::BackendRejected {
                backend_id,
                reason: e.to_string(),
            }
        })?;

        record.backend_id = Some(backend_id);
        record.backend_job_id = Some(backend_job_id.clone());
        record
            .advance(TaskStatus::Submitted)
            .map_err(|e| DispatchError::Internal(e.to_string()))?;

        if let Err(e) = self.store.upsert(&record).await {
            // The job stays queued on the backend; its events will find no
            // record and expire with the early-event window.
            tracing::error!(
                internal_id = %internal_id,
                backend_job_id = %backend_job_id,
                error = %e,
                "Failed to persist submitted task",
            );
            return Err(e.into());
        }
        self.correlator.register(record).await;

        tracing::info!(
            internal_id = %internal_id,
            client_task_id = %request.client_task_id,
            service_type = %service,
            backend_id,
            backend_job_id = %backend_job_id,
            "Task submitted",
        );

        Ok(SubmitReceipt {
            client_task_id: request.client_task_id,
            internal_id,
            backend_job_id,
        })
    }
}

/// Seed used when the request does not pin one; distinct per task.
fn default_seed(internal_id: TaskId) -> u64 {
    // Low bits of a v7 id are random.
    internal_id.as_u128() as u64 & ((1 << 53) - 1)
}

/// Callback URLs must be absolute `http(s)` URLs with a host.
pub fn validate_callback_url(url: &str) -> Result<(), DispatchError> {
    let rest = url
        .strip_prefix("http://")
        .or_else(|| url.strip_prefix("https://"));
    let host = rest.and_then(|r| r.split(['/', '?', '#']).next());
    match host {
        Some(h) if !h.is_empty() && !h.contains(char::is_whitespace) => Ok(()),
        _ => Err(DispatchError::BadRequest(format!(
            "client_callback_url must be an absolute http(s) URL, got {url:?}"
        ))),
    }
}
