//! Live per-backend load state.
//!
//! Each [`BackendState`] is written only by its own connection task and
//! read by everyone else through [`LoadTracker::snapshot`]. Fields are
//! atomics, so reads never take a lock over the fleet.

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;

use relay_core::scheduling::BackendSnapshot;
use relay_core::types::BackendId;

/// Reachability and queue depth of one backend.
#[derive(Debug)]
pub struct BackendState {
    id: BackendId,
    endpoint: String,
    reachable: AtomicBool,
    queue_depth: AtomicU32,
}

impl BackendState {
    /// New backends start unreachable until their first connection succeeds.
    pub fn new(id: BackendId, endpoint: impl Into<String>) -> Self {
        Self {
            id,
            endpoint: endpoint.into(),
            reachable: AtomicBool::new(false),
            queue_depth: AtomicU32::new(0),
        }
    }

    pub fn id(&self) -> BackendId {
        self.id
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    pub fn is_reachable(&self) -> bool {
        self.reachable.load(Ordering::Acquire)
    }

    pub fn set_reachable(&self, reachable: bool) {
        self.reachable.store(reachable, Ordering::Release);
    }

    pub fn queue_depth(&self) -> u32 {
        self.queue_depth.load(Ordering::Acquire)
    }

    pub fn set_queue_depth(&self, depth: u32) {
        self.queue_depth.store(depth, Ordering::Release);
    }

    pub fn snapshot(&self) -> BackendSnapshot {
        BackendSnapshot {
            id: self.id,
            endpoint: self.endpoint.clone(),
            reachable: self.is_reachable(),
            queue_depth: self.queue_depth(),
        }
    }
}

/// The fleet's load states in configuration order.
///
/// Cheap to clone; every clone observes the same states.
#[derive(Debug, Clone)]
pub struct LoadTracker {
    backends: Arc<Vec<Arc<BackendState>>>,
}

impl LoadTracker {
    /// Build states for `endpoints`, assigning ids in iteration order.
    pub fn new<I, S>(endpoints: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let backends = endpoints
            .into_iter()
            .enumerate()
            .map(|(id, endpoint)| Arc::new(BackendState::new(id, endpoint)))
            .collect();
        Self {
            backends: Arc::new(backends),
        }
    }

    pub fn len(&self) -> usize {
        self.backends.len()
    }

    pub fn is_empty(&self) -> bool {
        self.backends.is_empty()
    }

    /// The state object owned by backend `id`'s connection.
    pub fn state(&self, id: BackendId) -> Option<Arc<BackendState>> {
        self.backends.get(id).cloned()
    }

    /// Point-in-time view of every backend, in configuration order.
    pub fn snapshot(&self) -> Vec<BackendSnapshot> {
        self.backends.iter().map(|b| b.snapshot()).collect()
    }

    pub fn reachable_count(&self) -> usize {
        self.backends.iter().filter(|b| b.is_reachable()).count()
    }
}
