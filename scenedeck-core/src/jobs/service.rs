use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use scenedeck_model::{
    EventKind, JobId, JobStatus, NewJob, Phase, ProcessingEvent, SceneId,
};
use serde_json::json;
use tokio::sync::{Mutex, mpsc};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::catalog::{SceneMediaInfo, SceneStore};
use crate::config::ProcessingConfig;
use crate::error::{ProcessError, Result};
use crate::events::EventBus;
use crate::jobs::JobSubmitter;
use crate::jobs::extract::{ProgressUpdate, SharedExtractor};
use crate::jobs::feeder::{QueueFeeder, recover_interrupted_jobs};
use crate::jobs::history::JobHistoryStore;
use crate::jobs::pool::{JobOutcome, PoolConfig, WorkerPool};
use crate::jobs::retry::{FailedAttempt, RetryScheduler};
use crate::jobs::status::JobStatusAggregator;

/// How often the retention sweep deletes finished job rows.
const RETENTION_SWEEP_INTERVAL: Duration = Duration::from_secs(3600);

const OUTCOME_CHANNEL_CAPACITY: usize = 1024;
const PROGRESS_CHANNEL_CAPACITY: usize = 256;

/// Owns the per-phase worker pools and every background loop around
/// them: feeders, the completion handler, progress fan-out and the
/// retention sweep. All durable-state writes triggered by job execution
/// go through here.
pub struct ProcessingService {
    config: ProcessingConfig,
    history: Arc<dyn JobHistoryStore>,
    scenes: Arc<dyn SceneStore>,
    retry: Arc<RetryScheduler>,
    events: Arc<EventBus>,
    pools: HashMap<Phase, Arc<WorkerPool>>,
    extractors: HashMap<Phase, SharedExtractor>,
    shutdown: CancellationToken,
    tasks: Mutex<Vec<JoinHandle<()>>>,
    outcome_rx: Mutex<Option<mpsc::Receiver<JobOutcome>>>,
    progress_rx: Mutex<Option<mpsc::Receiver<ProgressUpdate>>>,
}

impl std::fmt::Debug for ProcessingService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProcessingService")
            .field("pools", &self.pools.len())
            .finish_non_exhaustive()
    }
}

impl ProcessingService {
    pub fn new(
        config: ProcessingConfig,
        history: Arc<dyn JobHistoryStore>,
        scenes: Arc<dyn SceneStore>,
        retry: Arc<RetryScheduler>,
        events: Arc<EventBus>,
        extractors: HashMap<Phase, SharedExtractor>,
    ) -> Arc<Self> {
        let (outcome_tx, outcome_rx) = mpsc::channel(OUTCOME_CHANNEL_CAPACITY);
        let (progress_tx, progress_rx) = mpsc::channel(PROGRESS_CHANNEL_CAPACITY);

        let mut pools = HashMap::new();
        for phase in Phase::ALL {
            let pool = WorkerPool::new(
                PoolConfig {
                    phase,
                    workers: config.workers.for_phase(phase),
                    capacity: config.queue_capacity,
                    job_timeout: config.timeouts.for_phase(phase),
                },
                outcome_tx.clone(),
                progress_tx.clone(),
            );
            pools.insert(phase, pool);
        }

        Arc::new(Self {
            config,
            history,
            scenes,
            retry,
            events,
            pools,
            extractors,
            shutdown: CancellationToken::new(),
            tasks: Mutex::new(Vec::new()),
            outcome_rx: Mutex::new(Some(outcome_rx)),
            progress_rx: Mutex::new(Some(progress_rx)),
        })
    }

    /// Runs crash recovery and spawns every background loop. Must be
    /// called exactly once.
    pub async fn start(self: &Arc<Self>) -> Result<()> {
        recover_interrupted_jobs(self.history.as_ref(), &self.config.feeder).await?;
        self.retry.reload_policies().await?;

        let mut tasks = self.tasks.lock().await;

        let outcome_rx = self
            .outcome_rx
            .lock()
            .await
            .take()
            .ok_or_else(|| ProcessError::Internal("processing service already started".into()))?;
        let progress_rx = self
            .progress_rx
            .lock()
            .await
            .take()
            .ok_or_else(|| ProcessError::Internal("processing service already started".into()))?;

        let service = Arc::clone(self);
        tasks.push(tokio::spawn(service.completion_loop(outcome_rx)));
        let service = Arc::clone(self);
        tasks.push(tokio::spawn(service.progress_loop(progress_rx)));

        for phase in Phase::ALL {
            let pool = Arc::clone(&self.pools[&phase]);
            let extractor = self.extractors.get(&phase).cloned().ok_or_else(|| {
                ProcessError::Internal(format!("no extractor registered for phase {phase}"))
            })?;
            let feeder = QueueFeeder::new(
                pool,
                Arc::clone(&self.history),
                Arc::clone(&self.scenes),
                Arc::clone(&self.retry),
                extractor,
                self.config.feeder.clone(),
            );
            tasks.push(tokio::spawn(feeder.run(self.shutdown.clone())));
        }

        let service = Arc::clone(self);
        tasks.push(tokio::spawn(service.retention_loop()));

        info!("processing service started");
        Ok(())
    }

    /// Stops feeders and loops, then drains the pools.
    pub async fn shutdown(&self) {
        self.shutdown.cancel();
        let mut tasks = self.tasks.lock().await;
        for task in tasks.drain(..) {
            let _ = task.await;
        }
        for pool in self.pools.values() {
            pool.shutdown().await;
        }
        info!("processing service stopped");
    }

    pub fn aggregator(&self) -> JobStatusAggregator {
        JobStatusAggregator::new(self.pools.clone(), Arc::clone(&self.history))
    }

    /// Request-initiated cancellation. In-flight jobs are cancelled
    /// through their pool; rows still pending are cancelled in place.
    pub async fn cancel_job(&self, job_id: JobId) -> Result<()> {
        for pool in self.pools.values() {
            if pool.cancel_job(job_id) {
                return Ok(());
            }
        }
        self.history.cancel_pending_job(job_id).await
    }

    async fn completion_loop(self: Arc<Self>, mut outcome_rx: mpsc::Receiver<JobOutcome>) {
        loop {
            let outcome = tokio::select! {
                _ = self.shutdown.cancelled() => break,
                outcome = outcome_rx.recv() => match outcome {
                    Some(outcome) => outcome,
                    None => break,
                },
            };
            if let Err(e) = self.handle_outcome(outcome).await {
                error!("job outcome handling failed: {e}");
            }
        }
        debug!("completion loop stopped");
    }

    async fn handle_outcome(&self, outcome: JobOutcome) -> Result<()> {
        match outcome.status {
            JobStatus::Completed => {
                self.history
                    .update_status(outcome.job_id, JobStatus::Completed, None)
                    .await?;
                if outcome.phase == Phase::Metadata {
                    self.apply_metadata_result(&outcome).await;
                }
                self.events.publish(ProcessingEvent::new(
                    EventKind::SceneCompleted,
                    outcome.scene_id,
                    json!({ "jobId": outcome.job_id, "phase": outcome.phase }),
                ));
            }
            JobStatus::Cancelled => {
                self.history
                    .update_status(outcome.job_id, JobStatus::Cancelled, None)
                    .await?;
            }
            JobStatus::Failed | JobStatus::TimedOut => {
                let error = outcome
                    .error
                    .clone()
                    .unwrap_or_else(|| "unknown failure".into());
                self.history
                    .update_status(outcome.job_id, outcome.status, Some(&error))
                    .await?;
                self.events.publish(ProcessingEvent::new(
                    EventKind::SceneFailed,
                    outcome.scene_id,
                    json!({
                        "jobId": outcome.job_id,
                        "phase": outcome.phase,
                        "error": error,
                    }),
                ));
                // Timeouts re-enter the standard retry policy.
                self.retry
                    .schedule_retry(&FailedAttempt {
                        job_id: outcome.job_id,
                        scene_id: outcome.scene_id,
                        scene_title: outcome.scene_title.clone(),
                        phase: outcome.phase,
                        retry_count: outcome.retry_count,
                        error,
                    })
                    .await?;
            }
            status => {
                warn!(job = %outcome.job_id, %status, "unexpected outcome status");
            }
        }
        Ok(())
    }

    /// Metadata extractors return the probed media details; persist them
    /// on the scene when the shape matches. Best-effort: a result the
    /// core cannot decode is logged and skipped.
    async fn apply_metadata_result(&self, outcome: &JobOutcome) {
        let Some(result) = &outcome.result else {
            return;
        };
        match serde_json::from_value::<SceneMediaInfo>(result.clone()) {
            Ok(info) => {
                if let Err(e) = self.scenes.update_media_info(outcome.scene_id, &info).await {
                    warn!(scene = %outcome.scene_id, "failed to persist media info: {e}");
                }
            }
            Err(e) => {
                debug!(scene = %outcome.scene_id, "metadata result not in probe shape: {e}");
            }
        }
    }

    async fn progress_loop(self: Arc<Self>, mut progress_rx: mpsc::Receiver<ProgressUpdate>) {
        loop {
            let update = tokio::select! {
                _ = self.shutdown.cancelled() => break,
                update = progress_rx.recv() => match update {
                    Some(update) => update,
                    None => break,
                },
            };
            if let Err(e) = self
                .history
                .update_progress(update.job_id, update.percent)
                .await
            {
                warn!(job = %update.job_id, "progress update failed: {e}");
            }
            self.events.publish(ProcessingEvent::progress(
                update.scene_id,
                update.phase.as_str(),
                update.percent,
            ));
        }
        debug!("progress loop stopped");
    }

    async fn retention_loop(self: Arc<Self>) {
        let mut ticker = tokio::time::interval(RETENTION_SWEEP_INTERVAL);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = self.shutdown.cancelled() => break,
                _ = ticker.tick() => {
                    let cutoff = Utc::now()
                        - chrono::Duration::from_std(self.config.job_history_retention)
                            .unwrap_or_else(|_| chrono::Duration::days(7));
                    match self.history.delete_older_than(cutoff).await {
                        Ok(0) => {}
                        Ok(deleted) => info!(deleted, "job history retention sweep"),
                        Err(e) => warn!("retention sweep failed: {e}"),
                    }
                }
            }
        }
        debug!("retention loop stopped");
    }
}

#[async_trait]
impl JobSubmitter for ProcessingService {
    async fn submit_phase(
        &self,
        scene_id: SceneId,
        phase: Phase,
        priority: i32,
        force_target: Option<String>,
    ) -> Result<JobId> {
        // Cheap pre-check; the partial unique index still guards races.
        if self.history.exists_pending_or_running(scene_id, phase).await? {
            return Err(ProcessError::Conflict(format!(
                "job already pending or running for scene {scene_id} phase {phase}"
            )));
        }
        let scene = self
            .scenes
            .get(scene_id)
            .await?
            .ok_or_else(|| ProcessError::NotFound(format!("scene {scene_id}")))?;
        let record = NewJob {
            scene_id,
            scene_title: scene.title,
            phase,
            priority,
            force_target,
            max_retries: self.config.retry_defaults.max_retries,
        }
        .into_record();
        let job_id = record.job_id;
        self.history.create_pending(&record).await?;
        debug!(job = %job_id, scene = %scene_id, %phase, priority, "job submitted");
        Ok(job_id)
    }
}
