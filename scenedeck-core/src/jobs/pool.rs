use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use dashmap::DashMap;
use scenedeck_model::{JobId, JobRecord, JobStatus, Phase, Scene, SceneId};
use serde_json::Value;
use tokio::sync::{Mutex, mpsc};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::error::{ProcessError, Result};
use crate::jobs::extract::{ExtractionRequest, JobContext, ProgressUpdate, SharedExtractor};

/// Sizing and limits for one per-phase pool.
#[derive(Debug, Clone)]
pub struct PoolConfig {
    pub phase: Phase,
    pub workers: usize,
    pub capacity: usize,
    /// Execution deadline; expiry finishes the job as `timed_out`.
    pub job_timeout: Duration,
}

/// Result of one executed (or skipped) job, drained by the processing
/// service which owns all durable-state updates.
#[derive(Debug)]
pub struct JobOutcome {
    pub job_id: JobId,
    pub scene_id: SceneId,
    pub scene_title: String,
    pub phase: Phase,
    pub retry_count: i32,
    /// `Completed`, `Failed`, `Cancelled` or `TimedOut`.
    pub status: JobStatus,
    pub error: Option<String>,
    pub result: Option<Value>,
}

/// Registry entry for an in-flight job (queued or executing).
#[derive(Debug, Clone)]
pub struct JobHandle {
    pub scene_id: SceneId,
    pub phase: Phase,
    cancel: CancellationToken,
}

struct QueuedJob {
    record: JobRecord,
    scene: Scene,
    extractor: SharedExtractor,
    cancel: CancellationToken,
}

/// Fixed-size worker set draining a bounded channel.
///
/// The `active` counter is the source of truth for "running"; the DB
/// `status = running` count races with the claimer and the finisher.
pub struct WorkerPool {
    config: PoolConfig,
    tx: mpsc::Sender<QueuedJob>,
    queued: Arc<AtomicUsize>,
    active: Arc<AtomicUsize>,
    registry: Arc<DashMap<JobId, JobHandle>>,
    shutdown: CancellationToken,
    workers: Mutex<Vec<JoinHandle<()>>>,
}

impl std::fmt::Debug for WorkerPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkerPool")
            .field("phase", &self.config.phase)
            .field("workers", &self.config.workers)
            .field("queued", &self.queued())
            .field("active", &self.active())
            .finish()
    }
}

impl WorkerPool {
    pub fn new(
        config: PoolConfig,
        outcome_tx: mpsc::Sender<JobOutcome>,
        progress_tx: mpsc::Sender<ProgressUpdate>,
    ) -> Arc<Self> {
        let (tx, rx) = mpsc::channel(config.capacity.max(1));
        let rx = Arc::new(Mutex::new(rx));

        let pool = Arc::new(Self {
            config: config.clone(),
            tx,
            queued: Arc::new(AtomicUsize::new(0)),
            active: Arc::new(AtomicUsize::new(0)),
            registry: Arc::new(DashMap::new()),
            shutdown: CancellationToken::new(),
            workers: Mutex::new(Vec::new()),
        });

        let mut handles = Vec::with_capacity(config.workers);
        for worker_id in 0..config.workers.max(1) {
            handles.push(tokio::spawn(Self::worker_loop(
                worker_id,
                config.clone(),
                Arc::clone(&rx),
                Arc::clone(&pool.queued),
                Arc::clone(&pool.active),
                Arc::clone(&pool.registry),
                pool.shutdown.clone(),
                outcome_tx.clone(),
                progress_tx.clone(),
            )));
        }
        *pool.workers.try_lock().expect("fresh pool lock") = handles;

        info!(
            phase = %config.phase,
            workers = config.workers,
            capacity = config.capacity,
            "worker pool started"
        );
        pool
    }

    pub fn phase(&self) -> Phase {
        self.config.phase
    }

    pub fn worker_count(&self) -> usize {
        self.config.workers
    }

    /// Jobs sitting in the channel, not yet picked up by a worker.
    pub fn queued(&self) -> usize {
        self.queued.load(Ordering::SeqCst)
    }

    /// Jobs currently executing inside a worker.
    pub fn active(&self) -> usize {
        self.active.load(Ordering::SeqCst)
    }

    pub fn contains(&self, job_id: JobId) -> bool {
        self.registry.contains_key(&job_id)
    }

    /// Non-blocking submit. Returns `QueueFull` when the channel is at
    /// capacity and `Cancelled` while shutting down.
    pub fn submit(
        &self,
        record: JobRecord,
        scene: Scene,
        extractor: SharedExtractor,
    ) -> Result<()> {
        if self.shutdown.is_cancelled() {
            return Err(ProcessError::Cancelled(format!(
                "{} pool is shutting down",
                self.config.phase
            )));
        }

        let cancel = CancellationToken::new();
        let job_id = record.job_id;
        self.registry.insert(
            job_id,
            JobHandle {
                scene_id: record.scene_id,
                phase: record.phase,
                cancel: cancel.clone(),
            },
        );

        let queued_job = QueuedJob {
            record,
            scene,
            extractor,
            cancel,
        };
        match self.tx.try_send(queued_job) {
            Ok(()) => {
                self.queued.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }
            Err(mpsc::error::TrySendError::Full(_)) => {
                self.registry.remove(&job_id);
                Err(ProcessError::QueueFull(format!(
                    "{} pool channel is full",
                    self.config.phase
                )))
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                self.registry.remove(&job_id);
                Err(ProcessError::Cancelled(format!(
                    "{} pool channel is closed",
                    self.config.phase
                )))
            }
        }
    }

    /// Cooperative cancellation of a queued or executing job. Returns
    /// false when the job is not in this pool.
    pub fn cancel_job(&self, job_id: JobId) -> bool {
        match self.registry.get(&job_id) {
            Some(handle) => {
                handle.cancel.cancel();
                true
            }
            None => false,
        }
    }

    /// Stops the workers after their current job. Queued rows stay
    /// marked running in the DB and are reclassified as orphaned on next
    /// startup.
    pub async fn shutdown(&self) {
        self.shutdown.cancel();
        let mut workers = self.workers.lock().await;
        for handle in workers.drain(..) {
            if let Err(e) = handle.await {
                error!(phase = %self.config.phase, "worker task panicked: {e}");
            }
        }
        info!(phase = %self.config.phase, "worker pool stopped");
    }

    #[allow(clippy::too_many_arguments)]
    async fn worker_loop(
        worker_id: usize,
        config: PoolConfig,
        rx: Arc<Mutex<mpsc::Receiver<QueuedJob>>>,
        queued: Arc<AtomicUsize>,
        active: Arc<AtomicUsize>,
        registry: Arc<DashMap<JobId, JobHandle>>,
        shutdown: CancellationToken,
        outcome_tx: mpsc::Sender<JobOutcome>,
        progress_tx: mpsc::Sender<ProgressUpdate>,
    ) {
        debug!(phase = %config.phase, worker_id, "worker started");
        loop {
            let job = tokio::select! {
                _ = shutdown.cancelled() => break,
                job = async { rx.lock().await.recv().await } => match job {
                    Some(job) => job,
                    None => break,
                },
            };
            queued.fetch_sub(1, Ordering::SeqCst);

            let job_id = job.record.job_id;
            if job.cancel.is_cancelled() {
                registry.remove(&job_id);
                Self::send_outcome(
                    &outcome_tx,
                    Self::outcome(&job.record, JobStatus::Cancelled, None, None),
                )
                .await;
                continue;
            }

            active.fetch_add(1, Ordering::SeqCst);
            let ctx = JobContext::new(
                job_id,
                job.record.scene_id,
                job.record.phase,
                job.cancel.clone(),
                progress_tx.clone(),
            );
            let request = ExtractionRequest {
                job_id,
                phase: job.record.phase,
                scene: job.scene,
                force_target: job.record.force_target.clone(),
            };

            let outcome = tokio::select! {
                _ = job.cancel.cancelled() => {
                    Self::outcome(&job.record, JobStatus::Cancelled, None, None)
                }
                result = tokio::time::timeout(
                    config.job_timeout,
                    job.extractor.execute(&request, &ctx),
                ) => match result {
                    Err(_) => Self::outcome(
                        &job.record,
                        JobStatus::TimedOut,
                        Some(format!(
                            "{} job exceeded {}s deadline",
                            config.phase,
                            config.job_timeout.as_secs()
                        )),
                        None,
                    ),
                    Ok(Ok(value)) => {
                        Self::outcome(&job.record, JobStatus::Completed, None, Some(value))
                    }
                    Ok(Err(ProcessError::Cancelled(_))) => {
                        Self::outcome(&job.record, JobStatus::Cancelled, None, None)
                    }
                    Ok(Err(e)) => {
                        Self::outcome(&job.record, JobStatus::Failed, Some(e.to_string()), None)
                    }
                },
            };

            active.fetch_sub(1, Ordering::SeqCst);
            registry.remove(&job_id);
            Self::send_outcome(&outcome_tx, outcome).await;
        }
        debug!(phase = %config.phase, worker_id, "worker stopped");
    }

    fn outcome(
        record: &JobRecord,
        status: JobStatus,
        error: Option<String>,
        result: Option<Value>,
    ) -> JobOutcome {
        JobOutcome {
            job_id: record.job_id,
            scene_id: record.scene_id,
            scene_title: record.scene_title.clone(),
            phase: record.phase,
            retry_count: record.retry_count,
            status,
            error,
            result,
        }
    }

    async fn send_outcome(outcome_tx: &mpsc::Sender<JobOutcome>, outcome: JobOutcome) {
        let job_id = outcome.job_id;
        if outcome_tx.send(outcome).await.is_err() {
            warn!(job_id = %job_id, "outcome channel closed, result dropped");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::jobs::extract::Extractor;
    use async_trait::async_trait;
    use scenedeck_model::NewJob;
    use serde_json::json;
    use std::time::Duration;

    struct SleepExtractor {
        delay: Duration,
    }

    #[async_trait]
    impl Extractor for SleepExtractor {
        async fn execute(&self, _request: &ExtractionRequest, ctx: &JobContext) -> Result<Value> {
            tokio::select! {
                _ = ctx.cancel.cancelled() => {
                    Err(ProcessError::Cancelled("extractor interrupted".into()))
                }
                _ = tokio::time::sleep(self.delay) => Ok(json!({ "ok": true })),
            }
        }
    }

    fn record(scene: i64) -> JobRecord {
        NewJob {
            scene_id: SceneId(scene),
            scene_title: format!("scene {scene}"),
            phase: Phase::Thumbnail,
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
            storage_path_id: scenedeck_model::StoragePathId(1),
            duration: 60.0,
            width: 1920,
            height: 1080,
            video_codec: "h264".into(),
            bit_rate: 4_000_000,
            thumbnail_width: 320,
            thumbnail_height: 180,
            created_at: chrono::Utc::now(),
        }
    }

    fn pool_config(workers: usize, capacity: usize, timeout: Duration) -> PoolConfig {
        PoolConfig {
            phase: Phase::Thumbnail,
            workers,
            capacity,
            job_timeout: timeout,
        }
    }

    #[tokio::test]
    async fn executes_submitted_jobs_and_reports_completion() {
        let (outcome_tx, mut outcome_rx) = mpsc::channel(16);
        let (progress_tx, _progress_rx) = mpsc::channel(16);
        let pool = WorkerPool::new(
            pool_config(2, 16, Duration::from_secs(5)),
            outcome_tx,
            progress_tx,
        );

        let extractor: SharedExtractor = Arc::new(SleepExtractor {
            delay: Duration::from_millis(10),
        });
        let job = record(1);
        let job_id = job.job_id;
        pool.submit(job, scene(1), extractor).unwrap();

        let outcome = outcome_rx.recv().await.unwrap();
        assert_eq!(outcome.job_id, job_id);
        assert_eq!(outcome.status, JobStatus::Completed);
        assert!(outcome.result.is_some());
        assert!(!pool.contains(job_id));
        assert_eq!(pool.active(), 0);
        assert_eq!(pool.queued(), 0);
    }

    #[tokio::test]
    async fn full_channel_rejects_with_queue_full() {
        let (outcome_tx, _outcome_rx) = mpsc::channel(16);
        let (progress_tx, _progress_rx) = mpsc::channel(16);
        // One slow worker and a single-slot channel: the third submit
        // must find the channel full.
        let pool = WorkerPool::new(
            pool_config(1, 1, Duration::from_secs(5)),
            outcome_tx,
            progress_tx,
        );
        let extractor: SharedExtractor = Arc::new(SleepExtractor {
            delay: Duration::from_secs(30),
        });

        pool.submit(record(1), scene(1), Arc::clone(&extractor))
            .unwrap();
        // Give the worker a moment to pick up the first job.
        tokio::time::sleep(Duration::from_millis(50)).await;
        pool.submit(record(2), scene(2), Arc::clone(&extractor))
            .unwrap();
        let err = pool
            .submit(record(3), scene(3), Arc::clone(&extractor))
            .unwrap_err();
        assert!(err.is_queue_full(), "expected QueueFull, got {err}");
    }

    #[tokio::test]
    async fn deadline_expiry_finishes_as_timed_out() {
        let (outcome_tx, mut outcome_rx) = mpsc::channel(16);
        let (progress_tx, _progress_rx) = mpsc::channel(16);
        let pool = WorkerPool::new(
            pool_config(1, 4, Duration::from_millis(20)),
            outcome_tx,
            progress_tx,
        );
        let extractor: SharedExtractor = Arc::new(SleepExtractor {
            delay: Duration::from_secs(30),
        });

        pool.submit(record(1), scene(1), extractor).unwrap();
        let outcome = outcome_rx.recv().await.unwrap();
        assert_eq!(outcome.status, JobStatus::TimedOut);
        assert!(outcome.error.unwrap().contains("deadline"));
    }

    #[tokio::test]
    async fn cancel_job_interrupts_execution() {
        let (outcome_tx, mut outcome_rx) = mpsc::channel(16);
        let (progress_tx, _progress_rx) = mpsc::channel(16);
        let pool = WorkerPool::new(
            pool_config(1, 4, Duration::from_secs(30)),
            outcome_tx,
            progress_tx,
        );
        let extractor: SharedExtractor = Arc::new(SleepExtractor {
            delay: Duration::from_secs(30),
        });

        let job = record(1);
        let job_id = job.job_id;
        pool.submit(job, scene(1), extractor).unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(pool.cancel_job(job_id));

        let outcome = outcome_rx.recv().await.unwrap();
        assert_eq!(outcome.status, JobStatus::Cancelled);
        assert!(!pool.contains(job_id));
    }

    #[tokio::test]
    async fn cancelling_unknown_job_returns_false() {
        let (outcome_tx, _outcome_rx) = mpsc::channel(16);
        let (progress_tx, _progress_rx) = mpsc::channel(16);
        let pool = WorkerPool::new(
            pool_config(1, 4, Duration::from_secs(5)),
            outcome_tx,
            progress_tx,
        );
        assert!(!pool.cancel_job(JobId::new()));
    }
}
