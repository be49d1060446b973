use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use scenedeck_model::{JobId, JobRecord, JobStatus, Phase, SceneId};

use crate::error::Result;

/// One page of job-history rows for the operator listing.
#[derive(Debug, Clone)]
pub struct JobPage {
    pub jobs: Vec<JobRecord>,
    pub total: i64,
    pub page: u32,
    pub limit: u32,
}

/// Durable record of every job's lifecycle. The rows with
/// `status = pending` are the queue itself; feeders claim them and the
/// worker callbacks write results back.
#[async_trait]
pub trait JobHistoryStore: Send + Sync {
    /// Inserts a pending row. Returns `Conflict` when a pending or
    /// running row already exists for `(scene_id, phase)`.
    async fn create_pending(&self, job: &JobRecord) -> Result<()>;

    /// Atomically claims up to `limit` due pending rows for `phase`,
    /// ordered by `priority DESC, created_at ASC`, transitioning each to
    /// running. Rows locked by a concurrent claimer are skipped, so
    /// multiple feeders stay correct.
    async fn claim_pending_jobs(&self, phase: Phase, limit: usize) -> Result<Vec<JobRecord>>;

    async fn get(&self, job_id: JobId) -> Result<Option<JobRecord>>;

    /// Writes a status transition. Terminal statuses also set
    /// `finished_at`; failures record `error_message` and keep the first
    /// failure in `original_error`.
    async fn update_status(
        &self,
        job_id: JobId,
        status: JobStatus,
        error_message: Option<&str>,
    ) -> Result<()>;

    async fn update_progress(&self, job_id: JobId, progress: i16) -> Result<()>;

    /// Re-pends the row for a scheduled retry: `status = pending`,
    /// bumped `retry_count`, future `next_retry_at`. `created_at` is
    /// left untouched so retried jobs keep their queue position within a
    /// priority class.
    async fn update_retry_info(
        &self,
        job_id: JobId,
        retry_count: i32,
        next_retry_at: DateTime<Utc>,
        error_message: &str,
    ) -> Result<()>;

    /// Terminal failure with the retry budget exhausted.
    async fn mark_not_retryable(&self, job_id: JobId, error_message: &str) -> Result<()>;

    /// Cancels a row that is still pending. Running jobs are cancelled
    /// through the worker pool instead.
    async fn cancel_pending_job(&self, job_id: JobId) -> Result<()>;

    /// Crash recovery: running rows older than `threshold` with no
    /// live claim are reclassified as failed.
    async fn mark_orphaned_running_as_failed(&self, threshold: Duration) -> Result<u64>;

    /// Pending rows stuck longer than `threshold` are reclassified as
    /// failed.
    async fn mark_stuck_pending_as_failed(&self, threshold: Duration) -> Result<u64>;

    /// Retention sweep over finished rows. Returns the number deleted.
    async fn delete_older_than(&self, cutoff: DateTime<Utc>) -> Result<u64>;

    async fn count_pending_by_phase(&self) -> Result<HashMap<Phase, i64>>;

    async fn count_recent_failed_by_phase(&self, since: DateTime<Utc>)
    -> Result<HashMap<Phase, i64>>;

    /// All rows currently marked running. Callers must intersect with
    /// the pool registries before presenting these as live.
    async fn list_active(&self) -> Result<Vec<JobRecord>>;

    async fn get_failed_jobs(&self, limit: u32) -> Result<Vec<JobRecord>>;

    async fn list_all(
        &self,
        page: u32,
        limit: u32,
        status: Option<JobStatus>,
    ) -> Result<JobPage>;

    async fn exists_pending_or_running(&self, scene_id: SceneId, phase: Phase) -> Result<bool>;
}
