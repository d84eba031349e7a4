//! Callback payload.

use relay_core::task::ErrorCode;
use relay_core::types::TaskId;
use serde::{Deserialize, Serialize};

/// Final outcome of one task as seen by the client.
///
/// Success and failure share this shape; failures carry a non-zero
/// `error_code` and no `artifact_key`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WebhookPayload {
    pub client_task_id: String,
    pub backend_job_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub artifact_key: Option<String>,
    /// Original filename on the backend.
    pub comfy_filepath: Option<String>,
    pub internal_id: TaskId,
    pub error_code: ErrorCode,
}

impl WebhookPayload {
    pub fn is_success(&self) -> bool {
        self.error_code.is_success()
    }

    pub fn to_json(&self) -> serde_json::Value {
        // Plain strings, ids and an integer code always serialize.
        serde_json::to_value(self).unwrap_or_default()
    }
}
