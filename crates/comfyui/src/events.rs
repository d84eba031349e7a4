//! Normalized events emitted by a backend connection.
//!
//! Raw ComfyUI messages are reduced to these three kinds; everything else
//! is observed and dropped in the processor.

use relay_core::types::BackendId;
use serde::Serialize;

/// Location of a produced artifact on the backend.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OutputRef {
    pub filename: String,
    /// Subfolder under the backend's output directory, empty for the root.
    pub subfolder: String,
}

impl OutputRef {
    pub fn new(filename: impl Into<String>, subfolder: impl Into<String>) -> Self {
        Self {
            filename: filename.into(),
            subfolder: subfolder.into(),
        }
    }

    /// Backend-local path relative to the output directory.
    pub fn path(&self) -> String {
        if self.subfolder.is_empty() {
            self.filename.clone()
        } else {
            format!("{}/{}", self.subfolder, self.filename)
        }
    }
}

/// A normalized event from one backend.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum BackendEvent {
    /// The backend reported a new queue length.
    QueueDepthChanged { backend_id: BackendId, depth: u32 },

    /// A job finished and produced an artifact.
    JobCompleted {
        backend_id: BackendId,
        job_id: String,
        output: OutputRef,
    },

    /// A job terminated without a usable artifact.
    JobFailed {
        backend_id: BackendId,
        job_id: String,
        error: String,
    },
}

impl BackendEvent {
    pub fn backend_id(&self) -> BackendId {
        match self {
            Self::QueueDepthChanged { backend_id, .. }
            | Self::JobCompleted { backend_id, .. }
            | Self::JobFailed { backend_id, .. } => *backend_id,
        }
    }

    /// Job id for terminal events; `None` for load updates.
    pub fn job_id(&self) -> Option<&str> {
        match self {
            Self::QueueDepthChanged { .. } => None,
            Self::JobCompleted { job_id, .. } | Self::JobFailed { job_id, .. } => Some(job_id),
        }
    }
}
