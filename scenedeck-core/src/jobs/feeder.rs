use std::sync::Arc;

use scenedeck_model::{JobRecord, JobStatus};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

use crate::catalog::SceneStore;
use crate::config::FeederConfig;
use crate::error::Result;
use crate::jobs::extract::SharedExtractor;
use crate::jobs::history::JobHistoryStore;
use crate::jobs::pool::WorkerPool;
use crate::jobs::retry::{FailedAttempt, RetryScheduler};

/// Per-phase polling loop bridging the durable queue and the in-memory
/// worker channel. Claims only enough rows to keep the channel near
/// `workers * buffer_multiplier`, so the DB's running set stays an
/// honest reflection of what the pool is doing.
pub struct QueueFeeder {
    pool: Arc<WorkerPool>,
    history: Arc<dyn JobHistoryStore>,
    scenes: Arc<dyn SceneStore>,
    retry: Arc<RetryScheduler>,
    extractor: SharedExtractor,
    config: FeederConfig,
}

impl std::fmt::Debug for QueueFeeder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QueueFeeder")
            .field("phase", &self.pool.phase())
            .finish_non_exhaustive()
    }
}

impl QueueFeeder {
    pub fn new(
        pool: Arc<WorkerPool>,
        history: Arc<dyn JobHistoryStore>,
        scenes: Arc<dyn SceneStore>,
        retry: Arc<RetryScheduler>,
        extractor: SharedExtractor,
        config: FeederConfig,
    ) -> Self {
        Self {
            pool,
            history,
            scenes,
            retry,
            extractor,
            config,
        }
    }

    /// Ticker loop. Claim failures are logged and retried next tick;
    /// per-row failures are attributed to the row.
    pub async fn run(self, shutdown: CancellationToken) {
        let mut ticker = tokio::time::interval(self.config.poll_interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = ticker.tick() => {
                    if let Err(e) = self.tick().await {
                        error!(phase = %self.pool.phase(), "feeder tick failed: {e}");
                    }
                }
            }
        }
        debug!(phase = %self.pool.phase(), "feeder stopped");
    }

    pub(crate) async fn tick(&self) -> Result<()> {
        let queued = self.pool.queued();
        let threshold = self.pool.worker_count() * self.config.buffer_multiplier;
        if queued >= threshold {
            return Ok(());
        }

        let claim_limit = (threshold - queued).min(self.config.batch_size);
        let rows = self
            .history
            .claim_pending_jobs(self.pool.phase(), claim_limit)
            .await?;
        if rows.is_empty() {
            return Ok(());
        }
        debug!(phase = %self.pool.phase(), claimed = rows.len(), "claimed pending jobs");

        let scene_ids: Vec<_> = rows.iter().map(|row| row.scene_id).collect();
        let scenes = match self.scenes.get_by_ids(&scene_ids).await {
            Ok(scenes) => scenes,
            Err(e) => {
                // The whole batch is stuck without scene data; fail the
                // rows so the retry path reclaims them.
                let message = format!("scene batch fetch failed: {e}");
                warn!(phase = %self.pool.phase(), "{message}");
                for row in &rows {
                    self.fail_claimed_row(row, &message).await;
                }
                return Ok(());
            }
        };

        for row in rows {
            let Some(scene) = scenes.get(&row.scene_id) else {
                self.fail_claimed_row(&row, "scene no longer exists").await;
                continue;
            };
            if let Err(e) =
                self.pool
                    .submit(row.clone(), scene.clone(), Arc::clone(&self.extractor))
            {
                self.fail_claimed_row(&row, &format!("submit failed: {e}"))
                    .await;
            }
        }
        Ok(())
    }

    /// A claimed row that never reached a worker. Record the failure and
    /// hand it to the retry scheduler so it re-enters the claim path.
    async fn fail_claimed_row(&self, row: &JobRecord, message: &str) {
        if let Err(e) = self
            .history
            .update_status(row.job_id, JobStatus::Failed, Some(message))
            .await
        {
            error!(job = %row.job_id, "failed to record claim failure: {e}");
            return;
        }
        let attempt = FailedAttempt {
            job_id: row.job_id,
            scene_id: row.scene_id,
            scene_title: row.scene_title.clone(),
            phase: row.phase,
            retry_count: row.retry_count,
            error: message.to_string(),
        };
        if let Err(e) = self.retry.schedule_retry(&attempt).await {
            error!(job = %row.job_id, "retry scheduling after claim failure failed: {e}");
        }
    }
}

/// Startup crash recovery, run exactly once before any feeder starts:
/// running rows past the orphan threshold and pending rows stuck past
/// the stale threshold are reclassified as failed.
pub async fn recover_interrupted_jobs(
    history: &dyn JobHistoryStore,
    config: &FeederConfig,
) -> Result<()> {
    let orphaned = history
        .mark_orphaned_running_as_failed(config.orphan_timeout)
        .await?;
    if orphaned > 0 {
        warn!(count = orphaned, "reclassified orphaned running jobs as failed");
    }
    let stuck = history
        .mark_stuck_pending_as_failed(config.stuck_pending_after)
        .await?;
    if stuck > 0 {
        warn!(count = stuck, "reclassified stuck pending jobs as failed");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::jobs::dlq::DlqStore;
    use crate::jobs::extract::Extractor;
    use crate::jobs::pool::PoolConfig;
    use crate::testing::{
        MemoryDlqStore, MemoryJobStore, MemorySceneStore, StaticPolicyStore, instant_extractor,
    };
    use scenedeck_model::{NewJob, Phase, RetryPolicy, SceneId};
    use std::time::Duration;
    use tokio::sync::mpsc;

    fn feeder_config() -> FeederConfig {
        FeederConfig {
            poll_interval: Duration::from_millis(10),
            batch_size: 50,
            buffer_multiplier: 10,
            orphan_timeout: Duration::from_secs(30),
            stuck_pending_after: Duration::from_secs(600),
        }
    }

    fn build_feeder(
        history: Arc<MemoryJobStore>,
        scenes: Arc<MemorySceneStore>,
        extractor: Arc<dyn Extractor>,
    ) -> (QueueFeeder, mpsc::Receiver<crate::jobs::pool::JobOutcome>) {
        let (outcome_tx, outcome_rx) = mpsc::channel(64);
        let (progress_tx, _progress_rx) = mpsc::channel(64);
        let pool = WorkerPool::new(
            PoolConfig {
                phase: Phase::Metadata,
                workers: 2,
                capacity: 64,
                job_timeout: Duration::from_secs(5),
            },
            outcome_tx,
            progress_tx,
        );
        let retry = Arc::new(RetryScheduler::new(
            Arc::clone(&history) as Arc<dyn JobHistoryStore>,
            Arc::new(MemoryDlqStore::default()) as Arc<dyn DlqStore>,
            Arc::new(StaticPolicyStore::new(vec![])),
            RetryPolicy::default(),
        ));
        let feeder = QueueFeeder::new(
            pool,
            history as Arc<dyn JobHistoryStore>,
            scenes as Arc<dyn SceneStore>,
            retry,
            extractor,
            feeder_config(),
        );
        (feeder, outcome_rx)
    }

    fn pending_job(scene: i64) -> scenedeck_model::JobRecord {
        NewJob {
            scene_id: SceneId(scene),
            scene_title: format!("scene {scene}"),
            phase: Phase::Metadata,
            priority: 0,
            force_target: None,
            max_retries: 3,
        }
        .into_record()
    }

    #[tokio::test]
    async fn tick_claims_and_dispatches_pending_jobs() {
        let history = Arc::new(MemoryJobStore::default());
        let scenes = Arc::new(MemorySceneStore::default());
        scenes.seed(SceneId(1));
        scenes.seed(SceneId(2));
        history.create_pending(&pending_job(1)).await.unwrap();
        history.create_pending(&pending_job(2)).await.unwrap();

        let (feeder, mut outcome_rx) =
            build_feeder(Arc::clone(&history), scenes, instant_extractor());
        feeder.tick().await.unwrap();

        let first = outcome_rx.recv().await.unwrap();
        let second = outcome_rx.recv().await.unwrap();
        assert_eq!(first.status, scenedeck_model::JobStatus::Completed);
        assert_eq!(second.status, scenedeck_model::JobStatus::Completed);
        // No pending rows remain claimable.
        assert!(
            history
                .claim_pending_jobs(Phase::Metadata, 10)
                .await
                .unwrap()
                .is_empty()
        );
    }

    #[tokio::test]
    async fn missing_scene_fails_row_and_schedules_retry() {
        let history = Arc::new(MemoryJobStore::default());
        let scenes = Arc::new(MemorySceneStore::default());
        let job = pending_job(9);
        let job_id = job.job_id;
        history.create_pending(&job).await.unwrap();

        let (feeder, _outcome_rx) =
            build_feeder(Arc::clone(&history), scenes, instant_extractor());
        feeder.tick().await.unwrap();

        let row = history.get(job_id).await.unwrap().unwrap();
        // The retry scheduler re-pended it with a future attempt time.
        assert_eq!(row.status, scenedeck_model::JobStatus::Pending);
        assert_eq!(row.retry_count, 1);
        assert!(row.next_retry_at.unwrap() > chrono::Utc::now());
        assert!(row.error_message.unwrap().contains("scene no longer exists"));
    }

    #[tokio::test]
    async fn startup_recovery_reclassifies_orphans() {
        let history = Arc::new(MemoryJobStore::default());
        let job = pending_job(3);
        let job_id = job.job_id;
        history.create_pending(&job).await.unwrap();
        // Simulate a claim from a previous process that never finished.
        history
            .claim_pending_jobs(Phase::Metadata, 1)
            .await
            .unwrap();
        history.backdate_started_at(job_id, chrono::Duration::minutes(1));

        recover_interrupted_jobs(history.as_ref(), &feeder_config())
            .await
            .unwrap();

        let row = history.get(job_id).await.unwrap().unwrap();
        assert_eq!(row.status, scenedeck_model::JobStatus::Failed);
        assert!(row.error_message.unwrap().contains("orphaned"));
        // Subsequent ticks must not claim it again.
        assert!(
            history
                .claim_pending_jobs(Phase::Metadata, 10)
                .await
                .unwrap()
                .is_empty()
        );
    }
}
