//! Completion correlation.
//!
//! Maps backend job ids to live task records and routes each terminal
//! backend event to exactly one pipeline run. Every job id moves through
//! the slot map at most once:
//!
//! ```text
//! (absent) --register--> Live --event--> Finalized
//! (absent) --event-----> Early --register--> Finalized
//! ```
//!
//! Ids unknown in memory are looked up in the durable store before an
//! event is parked, which covers restarts and the window between the
//! gateway's store write and its registration.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use relay_comfyui::{BackendEvent, BackendManager};
use relay_core::task::{ErrorCode, TaskStatus};
use relay_db::{StoreError, TaskRecord, TaskStore};
use tokio::sync::{mpsc, Mutex};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

use crate::ledger::{Ledger, WriteOutcome};
use crate::notifier::Notifier;
use crate::result::ResultPipeline;

/// How long a terminal event for a not-yet-registered job is kept.
pub const EARLY_EVENT_TTL: Duration = Duration::from_secs(60);

/// How long a finalized job id keeps absorbing duplicate events in memory.
/// Past it, the store's compare-and-set still rejects them.
pub const TOMBSTONE_TTL: Duration = Duration::from_secs(600);

const LOOKUP_ATTEMPTS: u32 = 3;
const LOOKUP_BACKOFF: Duration = Duration::from_millis(25);

/// Expiry rechecks a parked event gets while the store keeps failing.
const MAX_RECHECKS: u32 = 3;

enum Slot {
    Live(TaskRecord),
    Early {
        event: BackendEvent,
        parked_at: Instant,
        rechecks: u32,
    },
    Finalized {
        at: Instant,
    },
}

fn tombstone() -> Slot {
    Slot::Finalized { at: Instant::now() }
}

pub struct Correlator {
    slots: Mutex<HashMap<String, Slot>>,
    store: Arc<dyn TaskStore>,
    backends: Arc<BackendManager>,
    results: Arc<ResultPipeline>,
    notifier: Arc<Notifier>,
    tracker: TaskTracker,
    early_ttl: Duration,
    tombstone_ttl: Duration,
}

impl Correlator {
    pub fn new(
        store: Arc<dyn TaskStore>,
        backends: Arc<BackendManager>,
        results: Arc<ResultPipeline>,
        notifier: Arc<Notifier>,
        early_ttl: Duration,
        tombstone_ttl: Duration,
    ) -> Self {
        Self {
            slots: Mutex::new(HashMap::new()),
            store,
            backends,
            results,
            notifier,
            tracker: TaskTracker::new(),
            early_ttl,
            tombstone_ttl,
        }
    }

    /// Start tracking a submitted record.
    ///
    /// If its terminal event already arrived, the pipeline starts now.
    pub async fn register(&self, record: TaskRecord) {
        let Some(job_id) = record.backend_job_id.clone() else {
            tracing::error!(internal_id = %record.internal_id, "Cannot register a record without a backend job id");
            return;
        };

        let claimed = {
            let mut slots = self.slots.lock().await;
            match slots.remove(&job_id) {
                Some(Slot::Early { event, .. }) => {
                    slots.insert(job_id.clone(), tombstone());
                    Some((record, event))
                }
                Some(finalized @ Slot::Finalized { .. }) => {
                    slots.insert(job_id.clone(), finalized);
                    tracing::info!(%job_id, internal_id = %record.internal_id, "Job already settled from store, not registering");
                    return;
                }
                Some(Slot::Live(existing)) => {
                    tracing::warn!(%job_id, previous = %existing.internal_id, "Replacing live registration");
                    slots.insert(job_id.clone(), Slot::Live(record));
                    None
                }
                None => {
                    slots.insert(job_id.clone(), Slot::Live(record));
                    None
                }
            }
        };

        match claimed {
            Some((record, event)) => {
                tracing::info!(%job_id, internal_id = %record.internal_id, "Applying event that arrived before registration");
                self.dispatch(record, event);
            }
            None => tracing::debug!(%job_id, "Job registered"),
        }
    }

    /// Route one backend event.
    ///
    /// Unknown and already-finalized ids are logged and dropped.
    pub async fn handle_event(&self, event: BackendEvent) {
        let Some(job_id) = event.job_id().map(str::to_string) else {
            return;
        };

        if let Some(record) = self.claim_live(&job_id).await {
            self.dispatch(record, event);
            return;
        }

        // Not live in memory: finalized, or unknown to this process so far.
        {
            let slots = self.slots.lock().await;
            if matches!(slots.get(&job_id), Some(Slot::Finalized { .. })) {
                tracing::debug!(%job_id, "Dropping duplicate event for finalized job");
                return;
            }
        }

        let stored = self.lookup(&job_id).await;
        if let Err(e) = &stored {
            tracing::error!(%job_id, error = %e, "Store lookup failed, parking event for recheck");
        }
        self.resolve(job_id, event, stored, 0).await;
    }

    /// Resolve parked events older than the early-event window.
    ///
    /// Each is checked against the store once more before it is dropped,
    /// so a lookup that failed while the event was parked does not lose a
    /// recoverable job. Expired tombstones are forgotten. Returns how many
    /// events left the parking area.
    pub async fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let expired: Vec<(String, BackendEvent, u32)> = {
            let mut slots = self.slots.lock().await;
            let tombstone_ttl = self.tombstone_ttl;
            slots.retain(|_, slot| {
                !matches!(slot, Slot::Finalized { at } if now.duration_since(*at) >= tombstone_ttl)
            });

            let due: Vec<String> = slots
                .iter()
                .filter_map(|(job_id, slot)| match slot {
                    Slot::Early { parked_at, .. } if now.duration_since(*parked_at) >= self.early_ttl => {
                        Some(job_id.clone())
                    }
                    _ => None,
                })
                .collect();
            let mut taken = Vec::with_capacity(due.len());
            for job_id in due {
                match slots.remove(&job_id) {
                    Some(Slot::Early { event, rechecks, .. }) => taken.push((job_id, event, rechecks)),
                    Some(other) => {
                        slots.insert(job_id, other);
                    }
                    None => {}
                }
            }
            taken
        };

        let mut resolved = 0;
        for (job_id, event, rechecks) in expired {
            let stored = self.store.find_by_backend_job_id(&job_id).await;
            if self.resolve(job_id, event, stored, rechecks + 1).await {
                resolved += 1;
            }
        }
        resolved
    }

    /// Number of registered jobs still waiting for their terminal event.
    pub async fn live_count(&self) -> usize {
        let slots = self.slots.lock().await;
        slots.values().filter(|s| matches!(s, Slot::Live(_))).count()
    }

    pub async fn parked_count(&self) -> usize {
        let slots = self.slots.lock().await;
        slots
            .values()
            .filter(|s| matches!(s, Slot::Early { .. }))
            .count()
    }

    pub async fn tombstone_count(&self) -> usize {
        let slots = self.slots.lock().await;
        slots
            .values()
            .filter(|s| matches!(s, Slot::Finalized { .. }))
            .count()
    }

    /// Consume backend events until `cancel` fires, then drain what is
    /// already queued.
    pub async fn run(
        self: Arc<Self>,
        mut events: mpsc::Receiver<BackendEvent>,
        cancel: CancellationToken,
    ) {
        let mut purge = tokio::time::interval(self.early_ttl.max(Duration::from_secs(1)));
        tracing::info!("Correlator started");

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                event = events.recv() => match event {
                    Some(event) => self.handle_event(event).await,
                    None => break,
                },
                _ = purge.tick() => {
                    let purged = self.purge_expired().await;
                    if purged > 0 {
                        tracing::info!(purged, "Expired early events resolved");
                    }
                }
            }
        }

        events.close();
        while let Ok(event) = events.try_recv() {
            self.handle_event(event).await;
        }
        tracing::info!("Correlator stopped");
    }

    /// Wait for in-flight pipelines, up to `timeout`.
    ///
    /// Returns `false` if some were still running when the window closed.
    pub async fn drain(&self, timeout: Duration) -> bool {
        self.tracker.close();
        let pending = self.tracker.len();
        if pending > 0 {
            tracing::info!(pending, "Draining in-flight pipelines");
        }
        tokio::time::timeout(timeout, self.tracker.wait()).await.is_ok()
    }

    async fn claim_live(&self, job_id: &str) -> Option<TaskRecord> {
        let mut slots = self.slots.lock().await;
        match slots.remove(job_id) {
            Some(Slot::Live(record)) => {
                slots.insert(job_id.to_string(), tombstone());
                Some(record)
            }
            Some(other) => {
                slots.insert(job_id.to_string(), other);
                None
            }
            None => None,
        }
    }

    async fn lookup(&self, job_id: &str) -> Result<Option<TaskRecord>, StoreError> {
        let mut delay = LOOKUP_BACKOFF;
        let mut attempt = 1;
        loop {
            match self.store.find_by_backend_job_id(job_id).await {
                Ok(found) => return Ok(found),
                Err(e) if attempt < LOOKUP_ATTEMPTS => {
                    tracing::warn!(%job_id, attempt, error = %e, "Store lookup failed, retrying");
                    tokio::time::sleep(delay).await;
                    delay *= 2;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Settle an event for a job that was not live when it arrived, given
    /// what the store knows about it.
    ///
    /// `rechecks` is zero for a fresh event. Returns `false` only when the
    /// event was parked (again).
    async fn resolve(
        &self,
        job_id: String,
        event: BackendEvent,
        stored: Result<Option<TaskRecord>, StoreError>,
        rechecks: u32,
    ) -> bool {
        let mut slots = self.slots.lock().await;
        match slots.remove(&job_id) {
            // Registered while the store was being consulted.
            Some(Slot::Live(record)) => {
                slots.insert(job_id, tombstone());
                drop(slots);
                self.dispatch(record, event);
                return true;
            }
            Some(finalized @ Slot::Finalized { .. }) => {
                slots.insert(job_id.clone(), finalized);
                tracing::debug!(%job_id, "Dropping duplicate event for finalized job");
                return true;
            }
            Some(early @ Slot::Early { .. }) => {
                slots.insert(job_id.clone(), early);
                tracing::debug!(%job_id, "Dropping second early event");
                return true;
            }
            None => {}
        }

        match stored {
            Ok(Some(record)) if record.status == TaskStatus::Submitted => {
                slots.insert(job_id.clone(), tombstone());
                drop(slots);
                tracing::info!(%job_id, internal_id = %record.internal_id, "Recovered job from store");
                self.dispatch(record, event);
                true
            }
            Ok(Some(record)) => {
                slots.insert(job_id.clone(), tombstone());
                tracing::info!(
                    %job_id,
                    internal_id = %record.internal_id,
                    status = %record.status,
                    "Dropping event for job finalized earlier",
                );
                true
            }
            Ok(None) if rechecks > 0 => {
                tracing::warn!(%job_id, "Dropping event for job that was never registered");
                true
            }
            Err(e) if rechecks >= MAX_RECHECKS => {
                tracing::error!(%job_id, error = %e, rechecks, "Store still failing, dropping parked event");
                true
            }
            Ok(None) | Err(_) => {
                tracing::debug!(%job_id, rechecks, "Parking event for unregistered job");
                slots.insert(
                    job_id,
                    Slot::Early {
                        event,
                        parked_at: Instant::now(),
                        rechecks,
                    },
                );
                false
            }
        }
    }

    /// Run the pipeline for a claimed record off the event loop.
    fn dispatch(&self, record: TaskRecord, event: BackendEvent) {
        let mut ledger = Ledger::new(Arc::clone(&self.store));
        let results = Arc::clone(&self.results);
        let notifier = Arc::clone(&self.notifier);
        let api = record
            .backend_id
            .and_then(|id| self.backends.backend(id))
            .map(|handle| Arc::clone(&handle.api));

        self.tracker.spawn(async move {
            let mut record = record;
            match event {
                BackendEvent::JobCompleted { output, .. } => {
                    record.output_filename = Some(output.filename.clone());
                    if !settle(&mut ledger, &mut record, |r| {
                        r.advance(TaskStatus::Completed).map(|_| ())
                    })
                    .await
                    {
                        return;
                    }
                    tracing::info!(
                        internal_id = %record.internal_id,
                        filename = %output.filename,
                        "Job completed",
                    );
                    results.process(record, api, output, ledger).await;
                }
                BackendEvent::JobFailed { error, .. } => {
                    if !settle(&mut ledger, &mut record, |r| {
                        r.fail(ErrorCode::ExecutionFailed, error.clone()).map(|_| ())
                    })
                    .await
                    {
                        return;
                    }
                    tracing::warn!(
                        internal_id = %record.internal_id,
                        error = %error,
                        "Job failed on backend",
                    );
                    notifier.notify(record, ledger).await;
                }
                BackendEvent::QueueDepthChanged { .. } => {}
            }
        });
    }
}

/// Apply the first transition out of `submitted` and persist it.
///
/// Returns `false` when the pipeline must not continue: the transition is
/// invalid for the record, or the durable record already moved on. A write
/// that keeps failing does not stop the run; the ledger overwrites the
/// stored row at the next stage.
async fn settle<F>(ledger: &mut Ledger, record: &mut TaskRecord, apply: F) -> bool
where
    F: FnOnce(&mut TaskRecord) -> Result<(), relay_core::error::CoreError>,
{
    if let Err(e) = apply(record) {
        tracing::error!(internal_id = %record.internal_id, error = %e, "Cannot settle job");
        return false;
    }
    match ledger.write(record, TaskStatus::Submitted).await {
        WriteOutcome::Stored | WriteOutcome::Failed => true,
        WriteOutcome::MovedOn => {
            tracing::info!(
                internal_id = %record.internal_id,
                "Job already settled elsewhere, dropping event",
            );
            false
        }
    }
}
