//! In-process [`TaskStore`] used when no database is configured.
//!
//! Records live only as long as the process. Semantics match
//! [`PgTaskStore`](crate::PgTaskStore), including compare-and-set
//! transitions.

use std::collections::HashMap;

use async_trait::async_trait;
use relay_core::task::TaskStatus;
use relay_core::types::TaskId;
use tokio::sync::RwLock;

use crate::models::task::TaskRecord;
use crate::store::{StoreError, TaskStore};

#[derive(Default)]
pub struct MemoryTaskStore {
    records: RwLock<HashMap<TaskId, TaskRecord>>,
}

impl MemoryTaskStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of records held.
    pub async fn len(&self) -> usize {
        self.records.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.records.read().await.is_empty()
    }
}

#[async_trait]
impl TaskStore for MemoryTaskStore {
    async fn upsert(&self, record: &TaskRecord) -> Result<(), StoreError> {
        self.records
            .write()
            .await
            .insert(record.internal_id, record.clone());
        Ok(())
    }

    async fn transition(
        &self,
        record: &TaskRecord,
        expected: TaskStatus,
    ) -> Result<bool, StoreError> {
        let mut records = self.records.write().await;
        match records.get_mut(&record.internal_id) {
            Some(stored) if stored.status == expected => {
                *stored = record.clone();
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn find_by_id(&self, id: TaskId) -> Result<Option<TaskRecord>, StoreError> {
        Ok(self.records.read().await.get(&id).cloned())
    }

    async fn find_by_backend_job_id(
        &self,
        backend_job_id: &str,
    ) -> Result<Option<TaskRecord>, StoreError> {
        Ok(self
            .records
            .read()
            .await
            .values()
            .find(|r| r.backend_job_id.as_deref() == Some(backend_job_id))
            .cloned())
    }

    async fn find_by_client_task_id(
        &self,
        client_task_id: &str,
    ) -> Result<Vec<TaskRecord>, StoreError> {
        let mut found: Vec<TaskRecord> = self
            .records
            .read()
            .await
            .values()
            .filter(|r| r.client_task_id == client_task_id)
            .cloned()
            .collect();
        found.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(found)
    }
}
