use relay_core::error::CoreError;
use relay_core::types::BackendId;
use relay_db::StoreError;

/// Failures surfaced synchronously to a submitting client.
///
/// Everything that goes wrong after a backend accepted a job is recorded
/// on the task instead.
#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    #[error("{0}")]
    BadRequest(String),

    #[error("No backend is reachable")]
    NoBackendAvailable,

    #[error("Backend {backend_id} rejected the job: {reason}")]
    BackendRejected { backend_id: BackendId, reason: String },

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<CoreError> for DispatchError {
    fn from(err: CoreError) -> Self {
        match err {
            CoreError::Validation(msg) => Self::BadRequest(msg),
            other => Self::Internal(other.to_string()),
        }
    }
}
