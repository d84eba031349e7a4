//! Final outcome delivery.
//!
//! Every task reaches [`Notifier::notify`] exactly once, after its record
//! has settled in `uploaded` or `failed`. One delivery attempt is made; a
//! failed attempt is persisted instead of retried.

use std::path::PathBuf;
use std::sync::Arc;

use relay_core::task::TaskStatus;
use relay_db::TaskRecord;
use relay_events::{WebhookPayload, WebhookSender};

use crate::fallback;
use crate::ledger::{Ledger, WriteOutcome};

/// Build the callback body for a settled record.
pub fn payload_for(record: &TaskRecord) -> WebhookPayload {
    let success = record.error_code.is_success();
    WebhookPayload {
        client_task_id: record.client_task_id.clone(),
        backend_job_id: record.backend_job_id.clone(),
        artifact_key: if success {
            record.artifact_key.clone()
        } else {
            None
        },
        comfy_filepath: record.output_filename.clone(),
        internal_id: record.internal_id,
        error_code: record.error_code,
    }
}

pub struct Notifier {
    webhook: Arc<dyn WebhookSender>,
    fallback_dir: PathBuf,
}

impl Notifier {
    pub fn new(
        webhook: Arc<dyn WebhookSender>,
        fallback_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            webhook,
            fallback_dir: fallback_dir.into(),
        }
    }

    /// Deliver the outcome of `record` and persist the terminal state.
    ///
    /// Returns the record as finally stored.
    pub async fn notify(&self, mut record: TaskRecord, mut ledger: Ledger) -> TaskRecord {
        let payload = payload_for(&record).to_json();
        let prior = record.status;

        match self.webhook.send(&record.callback_url, &payload).await {
            Ok(()) => {
                tracing::info!(
                    internal_id = %record.internal_id,
                    client_task_id = %record.client_task_id,
                    error_code = record.error_code.code(),
                    "Outcome delivered",
                );
                if prior == TaskStatus::Uploaded {
                    if let Err(e) = record.advance(TaskStatus::Delivered) {
                        tracing::error!(internal_id = %record.internal_id, error = %e, "Invalid delivery transition");
                        return record;
                    }
                    Self::persist(&mut ledger, &record, prior).await;
                } else if ledger.is_behind() {
                    Self::persist(&mut ledger, &record, prior).await;
                }
            }
            Err(e) => {
                tracing::warn!(
                    internal_id = %record.internal_id,
                    client_task_id = %record.client_task_id,
                    url = %record.callback_url,
                    error = %e,
                    "Outcome undelivered, persisting payload",
                );
                record.error_code = record.error_code.escalate_for_delivery();
                let detail = format!("Webhook delivery failed: {e}");
                record.error_detail = Some(match record.error_detail.take() {
                    Some(earlier) => format!("{earlier}; {detail}"),
                    None => detail,
                });
                record.undelivered_payload = Some(payload.clone());
                if prior == TaskStatus::Uploaded {
                    if let Err(e) = record.advance(TaskStatus::CompletedUndelivered) {
                        tracing::error!(internal_id = %record.internal_id, error = %e, "Invalid delivery transition");
                    }
                } else {
                    record.touch();
                }
                Self::persist(&mut ledger, &record, prior).await;

                match fallback::write_undelivered(&self.fallback_dir, record.internal_id, &payload)
                    .await
                {
                    Ok(path) => tracing::info!(
                        internal_id = %record.internal_id,
                        path = %path.display(),
                        "Undelivered payload written",
                    ),
                    Err(e) => tracing::error!(
                        internal_id = %record.internal_id,
                        error = %e,
                        "Failed to write undelivered payload",
                    ),
                }
            }
        }
        record
    }

    async fn persist(ledger: &mut Ledger, record: &TaskRecord, expected: TaskStatus) {
        if ledger.write(record, expected).await == WriteOutcome::MovedOn {
            tracing::warn!(
                internal_id = %record.internal_id,
                expected = %expected,
                "Stored record moved on, final state not written",
            );
        }
    }
}
