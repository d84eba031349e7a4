//! Backend selection.
//!
//! The scheduler holds no state of its own. It reads a point-in-time
//! snapshot of every backend's load and picks the least-loaded reachable
//! one. Equal depths resolve to the lowest configuration index.

use serde::Serialize;

use crate::types::BackendId;

/// Read-only view of one backend's load at a point in time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BackendSnapshot {
    pub id: BackendId,
    pub endpoint: String,
    pub reachable: bool,
    /// Jobs queued or running on the backend, as last reported by it.
    pub queue_depth: u32,
}

/// Pick the reachable backend with the smallest queue depth.
///
/// Returns `None` when no backend is reachable.
pub fn select_backend(snapshots: &[BackendSnapshot]) -> Option<BackendId> {
    snapshots
        .iter()
        .filter(|b| b.reachable)
        .min_by_key(|b| (b.queue_depth, b.id))
        .map(|b| b.id)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
