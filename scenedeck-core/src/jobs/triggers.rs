use std::sync::Arc;

use async_trait::async_trait;
use scenedeck_model::{Phase, TriggerConfig, TriggerKind};
use tokio::sync::Mutex;
use tokio_cron_scheduler::{Job, JobScheduler};
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::catalog::SceneStore;
use crate::error::{ProcessError, Result};
use crate::jobs::JobSubmitter;

#[async_trait]
pub trait TriggerStore: Send + Sync {
    async fn list(&self) -> Result<Vec<TriggerConfig>>;
}

/// Scenes submitted per trigger firing. Keeps a misconfigured cron from
/// flooding the pending table in one shot; the next firing picks up the
/// remainder.
const TRIGGER_BATCH_LIMIT: usize = 500;

/// Cron-driven enqueuer for operator-defined "phase X needed" sweeps.
pub struct TriggerScheduler {
    store: Arc<dyn TriggerStore>,
    scenes: Arc<dyn SceneStore>,
    submitter: Arc<dyn JobSubmitter>,
    scheduler: Mutex<Option<JobScheduler>>,
    registered: Mutex<Vec<Uuid>>,
}

impl std::fmt::Debug for TriggerScheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TriggerScheduler").finish_non_exhaustive()
    }
}

impl TriggerScheduler {
    pub fn new(
        store: Arc<dyn TriggerStore>,
        scenes: Arc<dyn SceneStore>,
        submitter: Arc<dyn JobSubmitter>,
    ) -> Self {
        Self {
            store,
            scenes,
            submitter,
            scheduler: Mutex::new(None),
            registered: Mutex::new(Vec::new()),
        }
    }

    pub async fn start(&self) -> Result<()> {
        let scheduler = JobScheduler::new()
            .await
            .map_err(|e| ProcessError::Internal(format!("cron scheduler init failed: {e}")))?;
        let count = self.register_all(&scheduler).await?;
        scheduler
            .start()
            .await
            .map_err(|e| ProcessError::Internal(format!("cron scheduler start failed: {e}")))?;
        *self.scheduler.lock().await = Some(scheduler);
        info!(triggers = count, "trigger scheduler started");
        Ok(())
    }

    /// Drops every registered cron entry and reloads from the store.
    pub async fn refresh_schedules(&self) -> Result<()> {
        let guard = self.scheduler.lock().await;
        let Some(scheduler) = guard.as_ref() else {
            return Err(ProcessError::Internal(
                "trigger scheduler is not running".into(),
            ));
        };
        {
            let mut registered = self.registered.lock().await;
            for id in registered.drain(..) {
                if let Err(e) = scheduler.remove(&id).await {
                    warn!(entry = %id, "failed to remove cron entry: {e}");
                }
            }
        }
        let count = self.register_all(scheduler).await?;
        info!(triggers = count, "trigger schedules refreshed");
        Ok(())
    }

    pub async fn shutdown(&self) {
        if let Some(mut scheduler) = self.scheduler.lock().await.take() {
            if let Err(e) = scheduler.shutdown().await {
                warn!("cron scheduler shutdown failed: {e}");
            }
        }
    }

    async fn register_all(&self, scheduler: &JobScheduler) -> Result<usize> {
        let configs = self.store.list().await?;
        let mut registered = self.registered.lock().await;
        let mut count = 0usize;
        for config in configs {
            if config.kind != TriggerKind::Scheduled || !config.enabled {
                continue;
            }
            let Some(expression) = config.cron_expression.clone() else {
                warn!(
                    trigger = config.id,
                    "scheduled trigger has no cron expression, skipping"
                );
                continue;
            };

            let phase = config.phase;
            let scenes = Arc::clone(&self.scenes);
            let submitter = Arc::clone(&self.submitter);
            let job = Job::new_async(expression.as_str(), move |_id, _lock| {
                let scenes = Arc::clone(&scenes);
                let submitter = Arc::clone(&submitter);
                Box::pin(async move {
                    run_trigger(phase, scenes, submitter).await;
                })
            })
            .map_err(|e| {
                ProcessError::Validation(format!(
                    "invalid cron expression {expression:?} for trigger {}: {e}",
                    config.id
                ))
            })?;

            let id = scheduler
                .add(job)
                .await
                .map_err(|e| ProcessError::Internal(format!("cron entry add failed: {e}")))?;
            registered.push(id);
            count += 1;
        }
        Ok(count)
    }
}

async fn run_trigger(phase: Phase, scenes: Arc<dyn SceneStore>, submitter: Arc<dyn JobSubmitter>) {
    let candidates = match scenes.scenes_needing_phase(phase, TRIGGER_BATCH_LIMIT).await {
        Ok(candidates) => candidates,
        Err(e) => {
            error!(%phase, "trigger candidate query failed: {e}");
            return;
        }
    };
    if candidates.is_empty() {
        return;
    }
    let mut submitted = 0usize;
    for scene in candidates {
        match submitter.submit_phase(scene.id, phase, 0, None).await {
            Ok(_) => submitted += 1,
            // A pending or running row already covers this scene.
            Err(e) if e.is_conflict() => {}
            Err(e) => warn!(scene = %scene.id, %phase, "trigger submit failed: {e}"),
        }
    }
    info!(%phase, submitted, "scheduled trigger fired");
}
