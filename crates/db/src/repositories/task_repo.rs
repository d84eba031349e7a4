//! Repository for the `task_records` table.

use relay_core::task::TaskStatus;
use relay_core::types::TaskId;
use sqlx::PgPool;

use crate::models::task::{TaskRecord, TaskRow};

/// Column list for `task_records` queries.
const COLUMNS: &str = "\
    internal_id, client_task_id, service_type, callback_url, \
    backend_id, backend_job_id, status, output_filename, artifact_key, \
    local_fallback_path, error_code, error_detail, undelivered_payload, \
    created_at, updated_at";

/// Provides query operations for task bookkeeping.
pub struct TaskRepo;

impl TaskRepo {
    // ── Mutations ────────────────────────────────────────────────────

    /// Insert a record, or overwrite every mutable column if it exists.
    pub async fn upsert(pool: &PgPool, record: &TaskRecord) -> Result<(), sqlx::Error> {
        let query = format!(
            "INSERT INTO task_records ({COLUMNS}) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15) \
             ON CONFLICT (internal_id) DO UPDATE SET \
                backend_id = EXCLUDED.backend_id, \
                backend_job_id = EXCLUDED.backend_job_id, \
                status = EXCLUDED.status, \
                output_filename = EXCLUDED.output_filename, \
                artifact_key = EXCLUDED.artifact_key, \
                local_fallback_path = EXCLUDED.local_fallback_path, \
                error_code = EXCLUDED.error_code, \
                error_detail = EXCLUDED.error_detail, \
                undelivered_payload = EXCLUDED.undelivered_payload, \
                updated_at = EXCLUDED.updated_at"
        );
        sqlx::query(&query)
            .bind(record.internal_id)
            .bind(&record.client_task_id)
            .bind(record.service_type.as_str())
            .bind(&record.callback_url)
            .bind(record.backend_id.map(|id| id as i32))
            .bind(&record.backend_job_id)
            .bind(record.status.as_str())
            .bind(&record.output_filename)
            .bind(&record.artifact_key)
            .bind(&record.local_fallback_path)
            .bind(record.error_code.code())
            .bind(&record.error_detail)
            .bind(&record.undelivered_payload)
            .bind(record.created_at)
            .bind(record.updated_at)
            .execute(pool)
            .await?;
        Ok(())
    }

    /// Write every mutable column, but only while the stored status is
    /// still `expected`. Returns whether a row was updated.
    pub async fn update_if_status(
        pool: &PgPool,
        record: &TaskRecord,
        expected: TaskStatus,
    ) -> Result<bool, sqlx::Error> {
        let result = sqlx::query(
            "UPDATE task_records SET \
                backend_id = $3, \
                backend_job_id = $4, \
                status = $5, \
                output_filename = $6, \
                artifact_key = $7, \
                local_fallback_path = $8, \
                error_code = $9, \
                error_detail = $10, \
                undelivered_payload = $11, \
                updated_at = $12 \
             WHERE internal_id = $1 AND status = $2",
        )
        .bind(record.internal_id)
        .bind(expected.as_str())
        .bind(record.backend_id.map(|id| id as i32))
        .bind(&record.backend_job_id)
        .bind(record.status.as_str())
        .bind(&record.output_filename)
        .bind(&record.artifact_key)
        .bind(&record.local_fallback_path)
        .bind(record.error_code.code())
        .bind(&record.error_detail)
        .bind(&record.undelivered_payload)
        .bind(record.updated_at)
        .execute(pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    // ── Queries ──────────────────────────────────────────────────────

    pub async fn find_by_id(pool: &PgPool, id: TaskId) -> Result<Option<TaskRow>, sqlx::Error> {
        let query = format!("SELECT {COLUMNS} FROM task_records WHERE internal_id = $1");
        sqlx::query_as::<_, TaskRow>(&query)
            .bind(id)
            .fetch_optional(pool)
            .await
    }

    pub async fn find_by_backend_job_id(
        pool: &PgPool,
        backend_job_id: &str,
    ) -> Result<Option<TaskRow>, sqlx::Error> {
        let query = format!("SELECT {COLUMNS} FROM task_records WHERE backend_job_id = $1");
        sqlx::query_as::<_, TaskRow>(&query)
            .bind(backend_job_id)
            .fetch_optional(pool)
            .await
    }

    /// All records for a client task id, newest first.
    pub async fn find_by_client_task_id(
        pool: &PgPool,
        client_task_id: &str,
    ) -> Result<Vec<TaskRow>, sqlx::Error> {
        let query = format!(
            "SELECT {COLUMNS} FROM task_records \
             WHERE client_task_id = $1 \
             ORDER BY created_at DESC"
        );
        sqlx::query_as::<_, TaskRow>(&query)
            .bind(client_task_id)
            .fetch_all(pool)
            .await
    }
}
