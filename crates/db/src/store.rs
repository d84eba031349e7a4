//! The [`TaskStore`] seam and its PostgreSQL implementation.

use async_trait::async_trait;
use relay_core::error::CoreError;
use relay_core::task::TaskStatus;
use relay_core::types::TaskId;

use crate::models::task::{TaskRecord, TaskRow};
use crate::repositories::TaskRepo;
use crate::DbPool;

/// Errors from the durable store.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// A database query failed.
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// A stored row could not be mapped back to a task record.
    #[error("Corrupt task row: {0}")]
    Corrupt(#[from] CoreError),
}

/// Durable bookkeeping for task records.
#[async_trait]
pub trait TaskStore: Send + Sync {
    /// Insert or fully overwrite a record keyed by `internal_id`.
    async fn upsert(&self, record: &TaskRecord) -> Result<(), StoreError>;

    /// Persist `record` only if the stored status is still `expected`.
    ///
    /// Returns `false` when the record is missing or has already moved on,
    /// which callers treat as "someone else finalized it".
    async fn transition(&self, record: &TaskRecord, expected: TaskStatus)
        -> Result<bool, StoreError>;

    async fn find_by_id(&self, id: TaskId) -> Result<Option<TaskRecord>, StoreError>;

    async fn find_by_backend_job_id(
        &self,
        backend_job_id: &str,
    ) -> Result<Option<TaskRecord>, StoreError>;

    async fn find_by_client_task_id(
        &self,
        client_task_id: &str,
    ) -> Result<Vec<TaskRecord>, StoreError>;
}

/// [`TaskStore`] backed by the `task_records` table.
#[derive(Clone)]
pub struct PgTaskStore {
    pool: DbPool,
}

impl PgTaskStore {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

fn map_row(row: Option<TaskRow>) -> Result<Option<TaskRecord>, StoreError> {
    Ok(row.map(TaskRecord::try_from).transpose()?)
}

#[async_trait]
impl TaskStore for PgTaskStore {
    async fn upsert(&self, record: &TaskRecord) -> Result<(), StoreError> {
        TaskRepo::upsert(&self.pool, record).await?;
        Ok(())
    }

    async fn transition(
        &self,
        record: &TaskRecord,
        expected: TaskStatus,
    ) -> Result<bool, StoreError> {
        Ok(TaskRepo::update_if_status(&self.pool, record, expected).await?)
    }

    async fn find_by_id(&self, id: TaskId) -> Result<Option<TaskRecord>, StoreError> {
        map_row(TaskRepo::find_by_id(&self.pool, id).await?)
    }

    async fn find_by_backend_job_id(
        &self,
        backend_job_id: &str,
    ) -> Result<Option<TaskRecord>, StoreError> {
        map_row(TaskRepo::find_by_backend_job_id(&self.pool, backend_job_id).await?)
    }

    async fn find_by_client_task_id(
        &self,
        client_task_id: &str,
    ) -> Result<Vec<TaskRecord>, StoreError> {
        TaskRepo::find_by_client_task_id(&self.pool, client_task_id)
            .await?
            .into_iter()
            .map(|row| TaskRecord::try_from(row).map_err(StoreError::from))
            .collect()
    }
}
