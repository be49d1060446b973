use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use scenedeck_model::{JobId, JobRecord, Phase, SceneId};
use serde::Serialize;

use crate::error::Result;
use crate::jobs::history::JobHistoryStore;
use crate::jobs::pool::WorkerPool;

/// At most this many active jobs are listed; the rest collapse into
/// `more_count`.
const VISIBLE_ACTIVE_JOBS: usize = 5;

/// Failed counts cover this trailing window.
const FAILED_WINDOW_HOURS: i64 = 1;

#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct PhaseStatus {
    /// From the pool's atomic counter, not the DB.
    pub running: usize,
    pub queued: usize,
    pub pending: i64,
    pub failed: i64,
}

#[derive(Debug, Clone, Serialize)]
pub struct ActiveJobView {
    pub job_id: JobId,
    pub scene_id: SceneId,
    pub scene_title: String,
    pub phase: Phase,
    pub progress: i16,
    pub started_at: Option<DateTime<Utc>>,
}

impl From<&JobRecord> for ActiveJobView {
    fn from(job: &JobRecord) -> Self {
        Self {
            job_id: job.job_id,
            scene_id: job.scene_id,
            scene_title: job.scene_title.clone(),
            phase: job.phase,
            progress: job.progress,
            started_at: job.started_at,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct JobStatusSnapshot {
    pub phases: BTreeMap<Phase, PhaseStatus>,
    pub total_running: usize,
    pub total_queued: usize,
    pub total_pending: i64,
    pub total_failed: i64,
    pub active_jobs: Vec<ActiveJobView>,
    pub more_count: usize,
}

/// Composes the live header indicator from pool atomics plus two
/// point-in-time DB reads. Values may be momentarily inconsistent
/// during transitions, which is fine for a UI signal.
pub struct JobStatusAggregator {
    pools: HashMap<Phase, Arc<WorkerPool>>,
    history: Arc<dyn JobHistoryStore>,
}

impl std::fmt::Debug for JobStatusAggregator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JobStatusAggregator")
            .field("pools", &self.pools.len())
            .finish_non_exhaustive()
    }
}

impl JobStatusAggregator {
    pub fn new(pools: HashMap<Phase, Arc<WorkerPool>>, history: Arc<dyn JobHistoryStore>) -> Self {
        Self { pools, history }
    }

    pub async fn snapshot(&self) -> Result<JobStatusSnapshot> {
        let pending = self.history.count_pending_by_phase().await?;
        let failed_since = Utc::now() - Duration::hours(FAILED_WINDOW_HOURS);
        let failed = self.history.count_recent_failed_by_phase(failed_since).await?;

        let mut phases = BTreeMap::new();
        for phase in Phase::ALL {
            let (running, queued) = match self.pools.get(&phase) {
                Some(pool) => (pool.active(), pool.queued()),
                None => (0, 0),
            };
            phases.insert(
                phase,
                PhaseStatus {
                    running,
                    queued,
                    pending: pending.get(&phase).copied().unwrap_or(0),
                    failed: failed.get(&phase).copied().unwrap_or(0),
                },
            );
        }

        // Only rows both marked running in the DB and present in a pool
        // registry are shown. DB-only rows are claim/finish races, not
        // live work.
        let active_rows = self.history.list_active().await?;
        let mut active_jobs: Vec<ActiveJobView> = active_rows
            .iter()
            .filter(|job| {
                self.pools
                    .get(&job.phase)
                    .is_some_and(|pool| pool.contains(job.job_id))
            })
            .map(ActiveJobView::from)
            .collect();
        let more_count = active_jobs.len().saturating_sub(VISIBLE_ACTIVE_JOBS);
        active_jobs.truncate(VISIBLE_ACTIVE_JOBS);

        let totals = phases.values().fold((0usize, 0usize, 0i64, 0i64), |acc, p| {
            (
                acc.0 + p.running,
                acc.1 + p.queued,
                acc.2 + p.pending,
                acc.3 + p.failed,
            )
        });

        Ok(JobStatusSnapshot {
            phases,
            total_running: totals.0,
            total_queued: totals.1,
            total_pending: totals.2,
            total_failed: totals.3,
            active_jobs,
            more_count,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::jobs::pool::{PoolConfig, WorkerPool};
    use crate::testing::MemoryJobStore;
    use scenedeck_model::{NewJob, Scene, StoragePathId};
    use std::time::Duration;
    use tokio::sync::mpsc;

    fn record(scene: i64) -> JobRecord {
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

    fn scene(id: i64) -> Scene {
        Scene {
            id: SceneId(id),
            title: format!("scene {id}"),
            stored_path: format!("/media/{id}.mp4").into(),
            storage_path_id: StoragePathId(1),
            duration: 60.0,
            width: 1920,
            height: 1080,
            video_codec: "h264".into(),
            bit_rate: 4_000_000,
            thumbnail_width: 320,
            thumbnail_height: 180,
            created_at: Utc::now(),
        }
    }

    /// The DB says three jobs are running but only two are known to the
    /// pool; the third is a claim/finish race artifact and must not be
    /// shown.
    #[tokio::test]
    async fn active_jobs_are_intersected_with_pool_registry() {
        let history = Arc::new(MemoryJobStore::default());
        let (outcome_tx, _outcome_rx) = mpsc::channel(16);
        let (progress_tx, _progress_rx) = mpsc::channel(16);
        let pool = WorkerPool::new(
            PoolConfig {
                phase: Phase::Metadata,
                workers: 2,
                capacity: 16,
                job_timeout: Duration::from_secs(60),
            },
            outcome_tx,
            progress_tx,
        );

        let jobs = [record(1), record(2), record(3)];
        for job in &jobs {
            history.create_pending(job).await.unwrap();
        }
        // All three rows transition to running in the DB...
        let claimed = history
            .claim_pending_jobs(Phase::Metadata, 10)
            .await
            .unwrap();
        assert_eq!(claimed.len(), 3);
        // ...but only the first two reach the pool.
        let slow = Arc::new(SlowExtractor) as crate::jobs::extract::SharedExtractor;
        pool.submit(jobs[0].clone(), scene(1), Arc::clone(&slow))
            .unwrap();
        pool.submit(jobs[1].clone(), scene(2), slow).unwrap();

        let aggregator = JobStatusAggregator::new(
            HashMap::from([(Phase::Metadata, pool)]),
            history as Arc<dyn JobHistoryStore>,
        );
        let snapshot = aggregator.snapshot().await.unwrap();

        let visible: Vec<JobId> = snapshot.active_jobs.iter().map(|job| job.job_id).collect();
        assert!(visible.contains(&jobs[0].job_id));
        assert!(visible.contains(&jobs[1].job_id));
        assert!(!visible.contains(&jobs[2].job_id));
        assert_eq!(snapshot.more_count, 0);
    }

    struct SlowExtractor;

    #[async_trait::async_trait]
    impl crate::jobs::extract::Extractor for SlowExtractor {
        async fn execute(
            &self,
            _request: &crate::jobs::extract::ExtractionRequest,
            _ctx: &crate::jobs::extract::JobContext,
        ) -> crate::error::Result<serde_json::Value> {
            tokio::time::sleep(Duration::from_secs(60)).await;
            Ok(serde_json::Value::Null)
        }
    }
}
