//! Artifact handling for completed jobs: fetch, upload, hand off.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use relay_cloud::{artifact_key, content_type_for, BlobStore};
use relay_comfyui::{BackendApi, OutputRef};
use relay_core::task::{ErrorCode, TaskStatus};
use relay_db::TaskRecord;

use crate::fallback;
use crate::ledger::{Ledger, WriteOutcome};
use crate::notifier::Notifier;

/// Retry policy for reading an artifact from its backend.
#[derive(Debug, Clone)]
pub struct FetchPolicy {
    pub max_attempts: u32,
    /// Delay after the first failed attempt; doubles after each further one.
    pub initial_backoff: Duration,
}

impl Default for FetchPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_backoff: Duration::from_millis(500),
        }
    }
}

pub struct ResultPipeline {
    blobs: Arc<dyn BlobStore>,
    notifier: Arc<Notifier>,
    key_prefix: String,
    fallback_dir: PathBuf,
    fetch: FetchPolicy,
}

impl ResultPipeline {
    pub fn new(
        blobs: Arc<dyn BlobStore>,
        notifier: Arc<Notifier>,
        key_prefix: impl Into<String>,
        fallback_dir: impl Into<PathBuf>,
        fetch: FetchPolicy,
    ) -> Self {
        Self {
            blobs,
            notifier,
            key_prefix: key_prefix.into(),
            fallback_dir: fallback_dir.into(),
            fetch,
        }
    }

    /// Carry a `completed` record through upload and notification.
    ///
    /// Returns the record as finally stored.
    pub async fn process(
        &self,
        mut record: TaskRecord,
        api: Option<Arc<dyn BackendApi>>,
        output: OutputRef,
        mut ledger: Ledger,
    ) -> TaskRecord {
        let internal_id = record.internal_id;

        let bytes = match api {
            Some(api) => self.fetch(api.as_ref(), &output, &record).await,
            None => Err(format!("Backend {:?} is not configured", record.backend_id)),
        };
        let bytes = match bytes {
            Ok(bytes) => bytes,
            Err(detail) => {
                tracing::error!(%internal_id, filename = %output.filename, error = %detail, "Artifact fetch failed");
                Self::fail(&mut ledger, &mut record, ErrorCode::FetchFailed, detail).await;
                return self.notifier.notify(record, ledger).await;
            }
        };

        let key = artifact_key(&self.key_prefix, internal_id, &output.filename);
        let size = bytes.len();
        match self
            .blobs
            .put(&key, bytes.clone(), content_type_for(&output.filename))
            .await
        {
            Ok(stored_key) => {
                tracing::info!(%internal_id, key = %stored_key, size, "Artifact uploaded");
                record.artifact_key = Some(stored_key);
                match record.advance(TaskStatus::Uploaded) {
                    Ok(prior) => Self::persist(&mut ledger, &record, prior).await,
                    Err(e) => tracing::error!(%internal_id, error = %e, "Invalid upload transition"),
                }
            }
            Err(e) => {
                tracing::error!(%internal_id, key = %key, error = %e, "Artifact upload failed");
                let mut detail = format!("Blob upload failed: {e}");
                match fallback::write_artifact(&self.fallback_dir, internal_id, &output.filename, &bytes)
                    .await
                {
                    Ok(path) => {
                        tracing::info!(%internal_id, path = %path.display(), "Artifact kept in fallback directory");
                        record.local_fallback_path = Some(path.display().to_string());
                    }
                    Err(io) => {
                        tracing::error!(%internal_id, error = %io, "Failed to write fallback artifact");
                        detail = format!("{detail}; fallback write failed: {io}");
                    }
                }
                Self::fail(&mut ledger, &mut record, ErrorCode::UploadFailed, detail).await;
            }
        }

        self.notifier.notify(record, ledger).await
    }

    async fn fetch(
        &self,
        api: &dyn BackendApi,
        output: &OutputRef,
        record: &TaskRecord,
    ) -> Result<Vec<u8>, String> {
        let attempts = self.fetch.max_attempts.max(1);
        let mut delay = self.fetch.initial_backoff;
        let mut last_error = String::new();

        for attempt in 1..=attempts {
            match api.fetch_output(output).await {
                Ok(bytes) => return Ok(bytes),
                Err(e) => {
                    tracing::warn!(
                        internal_id = %record.internal_id,
                        attempt,
                        attempts,
                        error = %e,
                        "Artifact fetch attempt failed",
                    );
                    last_error = e.to_string();
                }
            }
            if attempt < attempts {
                tokio::time::sleep(delay).await;
                delay *= 2;
            }
        }
        Err(format!("Fetch failed after {attempts} attempts: {last_error}"))
    }

    async fn fail(ledger: &mut Ledger, record: &mut TaskRecord, code: ErrorCode, detail: String) {
        match record.fail(code, detail) {
            Ok(prior) => Self::persist(ledger, record, prior).await,
            Err(e) => tracing::error!(internal_id = %record.internal_id, error = %e, "Invalid failure transition"),
        }
    }

    async fn persist(ledger: &mut Ledger, record: &TaskRecord, expected: TaskStatus) {
        if ledger.write(record, expected).await == WriteOutcome::MovedOn {
            tracing::warn!(
                internal_id = %record.internal_id,
                expected = %expected,
                "Stored record moved on, continuing with in-memory state",
            );
        }
    }
}
