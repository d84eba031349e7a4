//! Durable writes for a record owned by one pipeline run.
//!
//! Normally every stage persists with a compare-and-set on the status it
//! expects to replace. Once a write has failed, the stored row may hold
//! any earlier status, so the next write overwrites it instead. The run
//! holds the only in-process claim on the job, which makes the overwrite
//! safe.

use std::sync::Arc;
use std::time::Duration;

use relay_core::task::TaskStatus;
use relay_db::{TaskRecord, TaskStore};

const WRITE_ATTEMPTS: u32 = 3;
const WRITE_BACKOFF: Duration = Duration::from_millis(50);

/// Result of [`Ledger::write`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteOutcome {
    Stored,
    /// The stored status was no longer the expected one.
    MovedOn,
    /// Every attempt failed; the next write catches up.
    Failed,
}

pub struct Ledger {
    store: Arc<dyn TaskStore>,
    behind: bool,
}

impl Ledger {
    pub fn new(store: Arc<dyn TaskStore>) -> Self {
        Self {
            store,
            behind: false,
        }
    }

    /// Whether the stored row may lag behind the in-memory record.
    pub fn is_behind(&self) -> bool {
        self.behind
    }

    /// Persist `record`, which was `expected` before its latest change.
    pub async fn write(&mut self, record: &TaskRecord, expected: TaskStatus) -> WriteOutcome {
        let mut delay = WRITE_BACKOFF;
        for attempt in 1..=WRITE_ATTEMPTS {
            let result = if self.behind {
                self.store.upsert(record).await.map(|()| true)
            } else {
                self.store.transition(record, expected).await
            };
            match result {
                Ok(true) => {
                    if self.behind {
                        tracing::info!(
                            internal_id = %record.internal_id,
                            status = %record.status,
                            "Stored record caught up",
                        );
                    }
                    self.behind = false;
                    return WriteOutcome::Stored;
                }
                Ok(false) => return WriteOutcome::MovedOn,
                Err(e) => {
                    self.behind = true;
                    tracing::warn!(
                        internal_id = %record.internal_id,
                        status = %record.status,
                        attempt,
                        error = %e,
                        "Record write failed",
                    );
                }
            }
            if attempt < WRITE_ATTEMPTS {
                tokio::time::sleep(delay).await;
                delay *= 2;
            }
        }
        tracing::error!(
            internal_id = %record.internal_id,
            status = %record.status,
            "Record write failed after retries",
        );
        WriteOutcome::Failed
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};

    use async_trait::async_trait;
    use relay_core::service::ServiceType;
    use relay_core::types::TaskId;
    use relay_db::{MemoryTaskStore, StoreError};

    use super::*;

    /// Fails the first `failures` compare-and-set writes.
    struct Flaky {
        inner: MemoryTaskStore,
        failures: AtomicU32,
        upserts: AtomicU32,
    }

    #[async_trait]
    impl TaskStore for Flaky {
        async fn upsert(&self, record: &TaskRecord) -> Result<(), StoreError> {
            self.upserts.fetch_add(1, Ordering::SeqCst);
            self.inner.upsert(record).await
        }

        async fn transition(
            &self,
            record: &TaskRecord,
            expected: TaskStatus,
        ) -> Result<bool, StoreError> {
            let left = self.failures.load(Ordering::SeqCst);
            if left > 0 {
                self.failures.store(left - 1, Ordering::SeqCst);
                return Err(StoreError::Database(sqlx::Error::PoolTimedOut));
            }
            self.inner.transition(record, expected).await
        }

        async fn find_by_id(&self, id: TaskId) -> Result<Option<TaskRecord>, StoreError> {
            self.inner.find_by_id(id).await
        }

        async fn find_by_backend_job_id(&self, job: &str) -> Result<Option<TaskRecord>, StoreError> {
            self.inner.find_by_backend_job_id(job).await
        }

        async fn find_by_client_task_id(&self, id: &str) -> Result<Vec<TaskRecord>, StoreError> {
            self.inner.find_by_client_task_id(id).await
        }
    }

    async fn submitted(store: &Flaky) -> TaskRecord {
        let mut record = TaskRecord::pending(
            uuid::Uuid::now_v7(),
            "t1",
            ServiceType::Text2Img,
            "http://client/cb",
        );
        record.backend_id = Some(0);
        record.backend_job_id = Some("p1".into());
        record.advance(TaskStatus::Submitted).unwrap();
        store.inner.upsert(&record).await.unwrap();
        record
    }

    fn flaky(failures: u32) -> Arc<Flaky> {
        Arc::new(Flaky {
            inner: MemoryTaskStore::new(),
            failures: AtomicU32::new(failures),
            upserts: AtomicU32::new(0),
        })
    }

    #[tokio::test]
    async fn failed_transition_is_recovered_by_overwrite() {
        let store = flaky(1);
        let mut ledger = Ledger::new(store.clone());
        let mut record = submitted(&store).await;

        record.advance(TaskStatus::Completed).unwrap();
        assert_eq!(ledger.write(&record, TaskStatus::Submitted).await, WriteOutcome::Stored);
        assert!(!ledger.is_behind());
        assert_eq!(store.upserts.load(Ordering::SeqCst), 1);

        let stored = store.find_by_id(record.internal_id).await.unwrap().unwrap();
        assert_eq!(stored.status, TaskStatus::Completed);
    }

    #[tokio::test]
    async fn compare_and_set_still_guards_in_sync_writes() {
        let store = flaky(0);
        let mut ledger = Ledger::new(store.clone());
        let mut record = submitted(&store).await;

        record.advance(TaskStatus::Completed).unwrap();
        assert_eq!(ledger.write(&record, TaskStatus::Completed).await, WriteOutcome::MovedOn);
        assert_eq!(store.upserts.load(Ordering::SeqCst), 0);
    }
}
