//! Task record model.
//!
//! [`TaskRecord`] is the typed in-process form; [`TaskRow`] matches the
//! `task_records` table, where status is text and the error code an integer.

use relay_core::error::CoreError;
use relay_core::service::ServiceType;
use relay_core::task::{ErrorCode, TaskStatus};
use relay_core::types::{BackendId, TaskId, Timestamp};
use serde::Serialize;
use sqlx::FromRow;

/// The dispatcher's record of one accepted submission.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TaskRecord {
    pub internal_id: TaskId,
    pub client_task_id: String,
    pub service_type: ServiceType,
    pub callback_url: String,
    pub backend_id: Option<BackendId>,
    pub backend_job_id: Option<String>,
    pub status: TaskStatus,
    /// Filename of the produced artifact on the backend.
    pub output_filename: Option<String>,
    pub artifact_key: Option<String>,
    pub local_fallback_path: Option<String>,
    pub error_code: ErrorCode,
    pub error_detail: Option<String>,
    /// Webhook body that could not be delivered, stored verbatim.
    pub undelivered_payload: Option<serde_json::Value>,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
}

impl TaskRecord {
    /// Build a new record in `pending` state.
    pub fn pending(
        internal_id: TaskId,
        client_task_id: impl Into<String>,
        service_type: ServiceType,
        callback_url: impl Into<String>,
    ) -> Self {
        let now = chrono::Utc::now();
        Self {
            internal_id,
            client_task_id: client_task_id.into(),
            service_type,
            callback_url: callback_url.into(),
            backend_id: None,
            backend_job_id: None,
            status: TaskStatus::Pending,
            output_filename: None,
            artifact_key: None,
            local_fallback_path: None,
            error_code: ErrorCode::None,
            error_detail: None,
            undelivered_payload: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Move to `to`, returning the previous status.
    ///
    /// Fails for transitions the lifecycle does not allow; the record is
    /// left untouched in that case.
    pub fn advance(&mut self, to: TaskStatus) -> Result<TaskStatus, CoreError> {
        let from = self.status;
        if !from.can_transition(to) {
            return Err(CoreError::Validation(format!(
                "Invalid task transition {from} -> {to}"
            )));
        }
        self.status = to;
        self.touch();
        Ok(from)
    }

    /// Move to `failed` with the given code and detail.
    pub fn fail(
        &mut self,
        code: ErrorCode,
        detail: impl Into<String>,
    ) -> Result<TaskStatus, CoreError> {
        let from = self.advance(TaskStatus::Failed)?;
        self.error_code = code;
        self.error_detail = Some(detail.into());
        Ok(from)
    }

    pub fn touch(&mut self) {
        self.updated_at = chrono::Utc::now();
    }
}

/// A row from the `task_records` table.
#[derive(Debug, Clone, FromRow)]
pub struct TaskRow {
    pub internal_id: uuid::Uuid,
    pub client_task_id: String,
    pub service_type: String,
    pub callback_url: String,
    pub backend_id: Option<i32>,
    pub backend_job_id: Option<String>,
    pub status: String,
    pub output_filename: Option<String>,
    pub artifact_key: Option<String>,
    pub local_fallback_path: Option<String>,
    pub error_code: i32,
    pub error_detail: Option<String>,
    pub undelivered_payload: Option<serde_json::Value>,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
}

impl TryFrom<TaskRow> for TaskRecord {
    type Error = CoreError;

    fn try_from(row: TaskRow) -> Result<Self, Self::Error> {
        let backend_id = row
            .backend_id
            .map(|id| {
                BackendId::try_from(id)
                    .map_err(|_| CoreError::Validation(format!("Negative backend id {id}")))
            })
            .transpose()?;

        Ok(Self {
            internal_id: row.internal_id,
            client_task_id: row.client_task_id,
            service_type: ServiceType::from_name(&row.service_type)?,
            callback_url: row.callback_url,
            backend_id,
            backend_job_id: row.backend_job_id,
            status: TaskStatus::from_name(&row.status)?,
            output_filename: row.output_filename,
            artifact_key: row.artifact_key,
            local_fallback_path: row.local_fallback_path,
            error_code: ErrorCode::from_code(row.error_code)?,
            error_detail: row.error_detail,
            undelivered_payload: row.undelivered_payload,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}
