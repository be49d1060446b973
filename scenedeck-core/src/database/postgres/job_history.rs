use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use scenedeck_model::{JobId, JobRecord, JobStatus, Phase, SceneId};
use sqlx::PgPool;
use uuid::Uuid;

use crate::database::map_db_err;
use crate::error::{ProcessError, Result};
use crate::jobs::history::{JobHistoryStore, JobPage};

const JOB_COLUMNS: &str = "job_id, scene_id, scene_title, phase, status, priority, \
     force_target, created_at, started_at, finished_at, error_message, original_error, \
     progress, retry_count, max_retries, is_retryable, next_retry_at, claimed_at";

#[derive(sqlx::FromRow)]
struct JobRow {
    job_id: Uuid,
    scene_id: i64,
    scene_title: String,
    phase: String,
    status: String,
    priority: i32,
    force_target: Option<String>,
    created_at: DateTime<Utc>,
    started_at: Option<DateTime<Utc>>,
    finished_at: Option<DateTime<Utc>>,
    error_message: Option<String>,
    original_error: Option<String>,
    progress: i16,
    retry_count: i32,
    max_retries: i32,
    is_retryable: bool,
    next_retry_at: Option<DateTime<Utc>>,
    claimed_at: Option<DateTime<Utc>>,
}

impl TryFrom<JobRow> for JobRecord {
    type Error = ProcessError;

    fn try_from(row: JobRow) -> Result<Self> {
        Ok(JobRecord {
            job_id: JobId(row.job_id),
            scene_id: SceneId(row.scene_id),
            scene_title: row.scene_title,
            phase: row
                .phase
                .parse::<Phase>()
                .map_err(|e| ProcessError::Internal(format!("corrupt job row: {e}")))?,
            status: row
                .status
                .parse::<JobStatus>()
                .map_err(|e| ProcessError::Internal(format!("corrupt job row: {e}")))?,
            priority: row.priority,
            force_target: row.force_target,
            created_at: row.created_at,
            started_at: row.started_at,
            finished_at: row.finished_at,
            error_message: row.error_message,
            original_error: row.original_error,
            progress: row.progress,
            retry_count: row.retry_count,
            max_retries: row.max_retries,
            is_retryable: row.is_retryable,
            next_retry_at: row.next_retry_at,
            claimed_at: row.claimed_at,
        })
    }
}

fn cutoff_for(threshold: Duration) -> DateTime<Utc> {
    Utc::now() - chrono::Duration::from_std(threshold).unwrap_or_else(|_| chrono::Duration::days(1))
}

/// Postgres-backed job-history store. The partial unique index on
/// `(scene_id, phase)` for live rows enforces the duplicate guard; the
/// claim query uses `FOR UPDATE SKIP LOCKED` so concurrent claimers
/// never block each other.
#[derive(Clone)]
pub struct PostgresJobHistoryStore {
    pool: PgPool,
}

impl std::fmt::Debug for PostgresJobHistoryStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PostgresJobHistoryStore")
            .field("pool_size", &self.pool.size())
            .finish()
    }
}

impl PostgresJobHistoryStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl JobHistoryStore for PostgresJobHistoryStore {
    async fn create_pending(&self, job: &JobRecord) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO job_history (
                job_id, scene_id, scene_title, phase, status, priority, force_target,
                created_at, progress, retry_count, max_retries, is_retryable, next_retry_at
            )
            VALUES ($1, $2, $3, $4, 'pending', $5, $6, $7, $8, $9, $10, $11, $12)
            "#,
        )
        .bind(job.job_id.0)
        .bind(job.scene_id.0)
        .bind(&job.scene_title)
        .bind(job.phase.as_str())
        .bind(job.priority)
        .bind(&job.force_target)
        .bind(job.created_at)
        .bind(job.progress)
        .bind(job.retry_count)
        .bind(job.max_retries)
        .bind(job.is_retryable)
        .bind(job.next_retry_at)
        .execute(&self.pool)
        .await
        .map_err(|e| map_db_err("failed to create pending job", e))?;
        Ok(())
    }

    async fn claim_pending_jobs(&self, phase: Phase, limit: usize) -> Result<Vec<JobRecord>> {
        let sql = format!(
            r#"
            UPDATE job_history
            SET status = 'running', started_at = NOW(), claimed_at = NOW()
            WHERE job_id IN (
                SELECT job_id
                FROM job_history
                WHERE phase = $1
                  AND status = 'pending'
                  AND (next_retry_at IS NULL OR next_retry_at <= NOW())
                ORDER BY priority DESC, created_at ASC
                LIMIT $2
                FOR UPDATE SKIP LOCKED
            )
            RETURNING {JOB_COLUMNS}
            "#
        );
        let rows: Vec<JobRow> = sqlx::query_as(&sql)
            .bind(phase.as_str())
            .bind(limit as i64)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| map_db_err("failed to claim pending jobs", e))?;
        let mut claimed: Vec<JobRecord> =
            rows.into_iter().map(JobRecord::try_from).collect::<Result<_>>()?;
        // RETURNING does not preserve the subquery's ordering.
        claimed.sort_by(|a, b| {
            b.priority
                .cmp(&a.priority)
                .then(a.created_at.cmp(&b.created_at))
        });
        Ok(claimed)
    }

    async fn get(&self, job_id: JobId) -> Result<Option<JobRecord>> {
        let sql = format!("SELECT {JOB_COLUMNS} FROM job_history WHERE job_id = $1");
        let row: Option<JobRow> = sqlx::query_as(&sql)
            .bind(job_id.0)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| map_db_err("failed to fetch job", e))?;
        row.map(JobRecord::try_from).transpose()
    }

    async fn update_status(
        &self,
        job_id: JobId,
        status: JobStatus,
        error_message: Option<&str>,
    ) -> Result<()> {
        let result = sqlx::query(
            r#"
            UPDATE job_history
            SET status = $2,
                error_message = COALESCE($3, error_message),
                original_error = CASE
                    WHEN $3 IS NULL THEN original_error
                    ELSE COALESCE(original_error, $3)
                END,
                finished_at = CASE
                    WHEN $2 IN ('completed', 'failed', 'cancelled', 'timed_out') THEN NOW()
                    ELSE finished_at
                END,
                progress = CASE WHEN $2 = 'completed' THEN 100 ELSE progress END
            WHERE job_id = $1
            "#,
        )
        .bind(job_id.0)
        .bind(status.as_str())
        .bind(error_message)
        .execute(&self.pool)
        .await
        .map_err(|e| map_db_err("failed to update job status", e))?;
        if result.rows_affected() == 0 {
            return Err(ProcessError::NotFound(format!("job {job_id}")));
        }
        Ok(())
    }

    async fn update_progress(&self, job_id: JobId, progress: i16) -> Result<()> {
        sqlx::query("UPDATE job_history SET progress = $2 WHERE job_id = $1")
            .bind(job_id.0)
            .bind(progress.clamp(0, 100))
            .execute(&self.pool)
            .await
            .map_err(|e| map_db_err("failed to update job progress", e))?;
        Ok(())
    }

    async fn update_retry_info(
        &self,
        job_id: JobId,
        retry_count: i32,
        next_retry_at: DateTime<Utc>,
        error_message: &str,
    ) -> Result<()> {
        let result = sqlx::query(
            r#"
            UPDATE job_history
            SET status = 'pending',
                retry_count = $2,
                next_retry_at = $3,
                error_message = $4,
                original_error = COALESCE(original_error, $4),
                started_at = NULL,
                claimed_at = NULL,
                finished_at = NULL
            WHERE job_id = $1
            "#,
        )
        .bind(job_id.0)
        .bind(retry_count)
        .bind(next_retry_at)
        .bind(error_message)
        .execute(&self.pool)
        .await
        .map_err(|e| map_db_err("failed to update retry info", e))?;
        if result.rows_affected() == 0 {
            return Err(ProcessError::NotFound(format!("job {job_id}")));
        }
        Ok(())
    }

    async fn mark_not_retryable(&self, job_id: JobId, error_message: &str) -> Result<()> {
        let result = sqlx::query(
            r#"
            UPDATE job_history
            SET status = 'failed',
                is_retryable = FALSE,
                finished_at = NOW(),
                error_message = $2,
                original_error = COALESCE(original_error, $2)
            WHERE job_id = $1
            "#,
        )
        .bind(job_id.0)
        .bind(error_message)
        .execute(&self.pool)
        .await
        .map_err(|e| map_db_err("failed to mark job not retryable", e))?;
        if result.rows_affected() == 0 {
            return Err(ProcessError::NotFound(format!("job {job_id}")));
        }
        Ok(())
    }

    async fn cancel_pending_job(&self, job_id: JobId) -> Result<()> {
        let result = sqlx::query(
            r#"
            UPDATE job_history
            SET status = 'cancelled', finished_at = NOW()
            WHERE job_id = $1 AND status = 'pending'
            "#,
        )
        .bind(job_id.0)
        .execute(&self.pool)
        .await
        .map_err(|e| map_db_err("failed to cancel pending job", e))?;
        if result.rows_affected() == 0 {
            return match self.get(job_id).await? {
                Some(job) => Err(ProcessError::Conflict(format!(
                    "job {job_id} is {} and cannot be cancelled in place",
                    job.status
                ))),
                None => Err(ProcessError::NotFound(format!("job {job_id}"))),
            };
        }
        Ok(())
    }

    async fn mark_orphaned_running_as_failed(&self, threshold: Duration) -> Result<u64> {
        let result = sqlx::query(
            r#"
            UPDATE job_history
            SET status = 'failed',
                finished_at = NOW(),
                error_message = 'orphaned on restart',
                original_error = COALESCE(original_error, 'orphaned on restart')
            WHERE status = 'running' AND started_at < $1
            "#,
        )
        .bind(cutoff_for(threshold))
        .execute(&self.pool)
        .await
        .map_err(|e| map_db_err("failed to reclassify orphaned jobs", e))?;
        Ok(result.rows_affected())
    }

    async fn mark_stuck_pending_as_failed(&self, threshold: Duration) -> Result<u64> {
        let cutoff = cutoff_for(threshold);
        let result = sqlx::query(
            r#"
            UPDATE job_history
            SET status = 'failed',
                finished_at = NOW(),
                error_message = 'stuck pending past threshold',
                original_error = COALESCE(original_error, 'stuck pending past threshold')
            WHERE status = 'pending'
              AND created_at < $1
              AND (next_retry_at IS NULL OR next_retry_at < $1)
            "#,
        )
        .bind(cutoff)
        .execute(&self.pool)
        .await
        .map_err(|e| map_db_err("failed to reclassify stuck pending jobs", e))?;
        Ok(result.rows_affected())
    }

    async fn delete_older_than(&self, cutoff: DateTime<Utc>) -> Result<u64> {
        let result = sqlx::query(
            r#"
            DELETE FROM job_history
            WHERE status IN ('completed', 'failed', 'cancelled', 'timed_out')
              AND finished_at < $1
            "#,
        )
        .bind(cutoff)
        .execute(&self.pool)
        .await
        .map_err(|e| map_db_err("failed to sweep job history", e))?;
        Ok(result.rows_affected())
    }

    async fn count_pending_by_phase(&self) -> Result<HashMap<Phase, i64>> {
        let rows: Vec<(String, i64)> = sqlx::query_as(
            "SELECT phase, COUNT(*) FROM job_history WHERE status = 'pending' GROUP BY phase",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(|e| map_db_err("failed to count pending jobs", e))?;
        Ok(rows
            .into_iter()
            .filter_map(|(phase, count)| phase.parse::<Phase>().ok().map(|p| (p, count)))
            .collect())
    }

    async fn count_recent_failed_by_phase(
        &self,
        since: DateTime<Utc>,
    ) -> Result<HashMap<Phase, i64>> {
        let rows: Vec<(String, i64)> = sqlx::query_as(
            r#"
            SELECT phase, COUNT(*)
            FROM job_history
            WHERE status = 'failed' AND finished_at >= $1
            GROUP BY phase
            "#,
        )
        .bind(since)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| map_db_err("failed to count recent failures", e))?;
        Ok(rows
            .into_iter()
            .filter_map(|(phase, count)| phase.parse::<Phase>().ok().map(|p| (p, count)))
            .collect())
    }

    async fn list_active(&self) -> Result<Vec<JobRecord>> {
        let sql = format!(
            "SELECT {JOB_COLUMNS} FROM job_history WHERE status = 'running' ORDER BY started_at ASC"
        );
        let rows: Vec<JobRow> = sqlx::query_as(&sql)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| map_db_err("failed to list active jobs", e))?;
        rows.into_iter().map(JobRecord::try_from).collect()
    }

    async fn get_failed_jobs(&self, limit: u32) -> Result<Vec<JobRecord>> {
        let sql = format!(
            "SELECT {JOB_COLUMNS} FROM job_history WHERE status = 'failed' \
             ORDER BY finished_at DESC LIMIT $1"
        );
        let rows: Vec<JobRow> = sqlx::query_as(&sql)
            .bind(limit as i64)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| map_db_err("failed to list failed jobs", e))?;
        rows.into_iter().map(JobRecord::try_from).collect()
    }

    async fn list_all(
        &self,
        page: u32,
        limit: u32,
        status: Option<JobStatus>,
    ) -> Result<JobPage> {
        let status = status.map(|s| s.as_str().to_string());
        let total: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM job_history WHERE ($1::text IS NULL OR status = $1)",
        )
        .bind(&status)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| map_db_err("failed to count job history", e))?;

        let offset = (page.max(1) as i64 - 1) * limit as i64;
        let sql = format!(
            "SELECT {JOB_COLUMNS} FROM job_history \
             WHERE ($1::text IS NULL OR status = $1) \
             ORDER BY created_at DESC LIMIT $2 OFFSET $3"
        );
        let rows: Vec<JobRow> = sqlx::query_as(&sql)
            .bind(&status)
            .bind(limit as i64)
            .bind(offset)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| map_db_err("failed to list job history", e))?;
        Ok(JobPage {
            jobs: rows.into_iter().map(JobRecord::try_from).collect::<Result<_>>()?,
            total,
            page,
            limit,
        })
    }

    async fn exists_pending_or_running(&self, scene_id: SceneId, phase: Phase) -> Result<bool> {
        let exists: bool = sqlx::query_scalar(
            r#"
            SELECT EXISTS (
                SELECT 1 FROM job_history
                WHERE scene_id = $1 AND phase = $2 AND status IN ('pending', 'running')
            )
            "#,
        )
        .bind(scene_id.0)
        .bind(phase.as_str())
        .fetch_one(&self.pool)
        .await
        .map_err(|e| map_db_err("failed to check live jobs", e))?;
        Ok(exists)
    }
}
