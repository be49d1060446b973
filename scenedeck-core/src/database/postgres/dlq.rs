use async_trait::async_trait;
use chrono::{DateTime, Utc};
use scenedeck_model::{DlqEntry, DlqStats, DlqStatus, JobId, Phase, SceneId};
use sqlx::PgPool;
use uuid::Uuid;

use crate::database::map_db_err;
use crate::error::{ProcessError, Result};
use crate::jobs::dlq::DlqStore;

#[derive(sqlx::FromRow)]
struct DlqRow {
    job_id: Uuid,
    scene_id: i64,
    scene_title: String,
    phase: String,
    original_error: String,
    last_error: String,
    failure_count: i32,
    status: String,
    created_at: DateTime<Utc>,
}

impl TryFrom<DlqRow> for DlqEntry {
    type Error = ProcessError;

    fn try_from(row: DlqRow) -> Result<Self> {
        Ok(DlqEntry {
            job_id: JobId(row.job_id),
            scene_id: SceneId(row.scene_id),
            scene_title: row.scene_title,
            phase: row
                .phase
                .parse::<Phase>()
                .map_err(|e| ProcessError::Internal(format!("corrupt dlq row: {e}")))?,
            original_error: row.original_error,
            last_error: row.last_error,
            failure_count: row.failure_count,
            status: row
                .status
                .parse::<DlqStatus>()
                .map_err(|e| ProcessError::Internal(format!("corrupt dlq row: {e}")))?,
            created_at: row.created_at,
        })
    }
}

const DLQ_COLUMNS: &str = "job_id, scene_id, scene_title, phase, original_error, \
     last_error, failure_count, status, created_at";

#[derive(Clone)]
pub struct PostgresDlqStore {
    pool: PgPool,
}

impl std::fmt::Debug for PostgresDlqStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PostgresDlqStore").finish_non_exhaustive()
    }
}

impl PostgresDlqStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl DlqStore for PostgresDlqStore {
    async fn insert(&self, entry: &DlqEntry) -> Result<()> {
        // Re-escalation keeps the first attempt's error and creation
        // time; everything else reflects the latest failure.
        sqlx::query(
            r#"
            INSERT INTO dlq_entries (
                job_id, scene_id, scene_title, phase, original_error,
                last_error, failure_count, status, created_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            ON CONFLICT (job_id) DO UPDATE SET
                scene_title = EXCLUDED.scene_title,
                last_error = EXCLUDED.last_error,
                failure_count = EXCLUDED.failure_count,
                status = EXCLUDED.status
            "#,
        )
        .bind(entry.job_id.0)
        .bind(entry.scene_id.0)
        .bind(&entry.scene_title)
        .bind(entry.phase.as_str())
        .bind(&entry.original_error)
        .bind(&entry.last_error)
        .bind(entry.failure_count)
        .bind(entry.status.as_str())
        .bind(entry.created_at)
        .execute(&self.pool)
        .await
        .map_err(|e| map_db_err("failed to insert dlq entry", e))?;
        Ok(())
    }

    async fn get(&self, job_id: JobId) -> Result<Option<DlqEntry>> {
        let sql = format!("SELECT {DLQ_COLUMNS} FROM dlq_entries WHERE job_id = $1");
        let row: Option<DlqRow> = sqlx::query_as(&sql)
            .bind(job_id.0)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| map_db_err("failed to fetch dlq entry", e))?;
        row.map(DlqEntry::try_from).transpose()
    }

    async fn list(&self, status: Option<DlqStatus>, limit: u32) -> Result<Vec<DlqEntry>> {
        let status = status.map(|s| s.as_str().to_string());
        let sql = format!(
            "SELECT {DLQ_COLUMNS} FROM dlq_entries \
             WHERE ($1::text IS NULL OR status = $1) \
             ORDER BY created_at DESC LIMIT $2"
        );
        let rows: Vec<DlqRow> = sqlx::query_as(&sql)
            .bind(&status)
            .bind(limit as i64)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| map_db_err("failed to list dlq entries", e))?;
        rows.into_iter().map(DlqEntry::try_from).collect()
    }

    async fn update_status(&self, job_id: JobId, status: DlqStatus) -> Result<()> {
        let result = sqlx::query("UPDATE dlq_entries SET status = $2 WHERE job_id = $1")
            .bind(job_id.0)
            .bind(status.as_str())
            .execute(&self.pool)
            .await
            .map_err(|e| map_db_err("failed to update dlq status", e))?;
        if result.rows_affected() == 0 {
            return Err(ProcessError::NotFound(format!("dlq entry {job_id}")));
        }
        Ok(())
    }

    async fn delete(&self, job_id: JobId) -> Result<()> {
        sqlx::query("DELETE FROM dlq_entries WHERE job_id = $1")
            .bind(job_id.0)
            .execute(&self.pool)
            .await
            .map_err(|e| map_db_err("failed to delete dlq entry", e))?;
        Ok(())
    }

    async fn stats(&self) -> Result<DlqStats> {
        let rows: Vec<(String, i64)> =
            sqlx::query_as("SELECT status, COUNT(*) FROM dlq_entries GROUP BY status")
                .fetch_all(&self.pool)
                .await
                .map_err(|e| map_db_err("failed to compute dlq stats", e))?;
        let mut stats = DlqStats::default();
        for (status, count) in rows {
            match status.parse::<DlqStatus>() {
                Ok(DlqStatus::PendingReview) => stats.pending_review = count,
                Ok(DlqStatus::Retrying) => stats.retrying = count,
                Ok(DlqStatus::Abandoned) => stats.abandoned = count,
                Err(_) => {}
            }
        }
        Ok(stats)
    }
}
