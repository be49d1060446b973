use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use scenedeck_model::{
    DlqEntry, DlqStats, DlqStatus, EventKind, JobId, Phase, ProcessingEvent, SceneId,
};
use serde_json::json;
use tracing::{info, warn};

use crate::error::{ProcessError, Result};
use crate::events::EventBus;
use crate::jobs::JobSubmitter;

#[async_trait]
pub trait DlqStore: Send + Sync {
    /// Upsert keyed by `job_id`. Re-escalations keep the stored
    /// `original_error` and `created_at` but refresh everything else.
    async fn insert(&self, entry: &DlqEntry) -> Result<()>;

    async fn get(&self, job_id: JobId) -> Result<Option<DlqEntry>>;

    async fn list(&self, status: Option<DlqStatus>, limit: u32) -> Result<Vec<DlqEntry>>;

    async fn update_status(&self, job_id: JobId, status: DlqStatus) -> Result<()>;

    async fn delete(&self, job_id: JobId) -> Result<()>;

    async fn stats(&self) -> Result<DlqStats>;
}

/// Priority used when an operator re-drives a dead-lettered job; above
/// the default so triage work jumps the queue.
const DLQ_RETRY_PRIORITY: i32 = 10;

/// Operator triage over jobs whose retry budget ran out.
pub struct DlqService {
    store: Arc<dyn DlqStore>,
    submitter: Arc<dyn JobSubmitter>,
    events: Arc<EventBus>,
}

impl std::fmt::Debug for DlqService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DlqService").finish_non_exhaustive()
    }
}

impl DlqService {
    pub fn new(
        store: Arc<dyn DlqStore>,
        submitter: Arc<dyn JobSubmitter>,
        events: Arc<EventBus>,
    ) -> Self {
        Self {
            store,
            submitter,
            events,
        }
    }

    /// Builds the escalation entry for an exhausted job. Called by the
    /// retry scheduler; kept here so the shape of DLQ rows has a single
    /// owner.
    pub fn entry_for_exhausted_job(
        job_id: JobId,
        scene_id: SceneId,
        scene_title: String,
        phase: Phase,
        original_error: String,
        last_error: String,
        failure_count: i32,
    ) -> DlqEntry {
        DlqEntry {
            job_id,
            scene_id,
            scene_title,
            phase,
            original_error,
            last_error,
            failure_count,
            status: DlqStatus::PendingReview,
            created_at: Utc::now(),
        }
    }

    /// Re-drives a dead-lettered job by submitting a fresh pending row.
    /// On success the DLQ entry is deleted; on failure it reverts to
    /// `pending_review` so the operator can try again.
    pub async fn retry(&self, job_id: JobId) -> Result<JobId> {
        let entry = self
            .store
            .get(job_id)
            .await?
            .ok_or_else(|| ProcessError::NotFound(format!("dlq entry {job_id}")))?;

        self.store.update_status(job_id, DlqStatus::Retrying).await?;

        match self
            .submitter
            .submit_phase(entry.scene_id, entry.phase, DLQ_RETRY_PRIORITY, None)
            .await
        {
            Ok(new_job_id) => {
                self.store.delete(job_id).await?;
                info!(
                    old_job = %job_id,
                    new_job = %new_job_id,
                    scene = %entry.scene_id,
                    phase = %entry.phase,
                    "dlq entry re-driven"
                );
                self.events.publish(ProcessingEvent::new(
                    EventKind::SceneDlqRetry,
                    entry.scene_id,
                    json!({
                        "jobId": job_id,
                        "newJobId": new_job_id,
                        "phase": entry.phase,
                    }),
                ));
                Ok(new_job_id)
            }
            Err(e) => {
                warn!(job = %job_id, "dlq retry submit failed: {e}");
                self.store
                    .update_status(job_id, DlqStatus::PendingReview)
                    .await?;
                Err(e)
            }
        }
    }

    pub async fn abandon(&self, job_id: JobId) -> Result<()> {
        let entry = self
            .store
            .get(job_id)
            .await?
            .ok_or_else(|| ProcessError::NotFound(format!("dlq entry {job_id}")))?;
        self.store
            .update_status(job_id, DlqStatus::Abandoned)
            .await?;
        self.events.publish(ProcessingEvent::new(
            EventKind::SceneDlqAbandoned,
            entry.scene_id,
            json!({ "jobId": job_id, "phase": entry.phase }),
        ));
        Ok(())
    }

    pub async fn list(&self, status: Option<DlqStatus>, limit: u32) -> Result<Vec<DlqEntry>> {
        self.store.list(status, limit).await
    }

    pub async fn stats(&self) -> Result<DlqStats> {
        self.store.stats().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{MemoryDlqStore, RecordingSubmitter};
    use scenedeck_model::Phase;

    fn entry(job_id: JobId) -> DlqEntry {
        DlqService::entry_for_exhausted_job(
            job_id,
            SceneId(5),
            "scene 5".into(),
            Phase::Metadata,
            "boom".into(),
            "boom again".into(),
            3,
        )
    }

    #[tokio::test]
    async fn retry_deletes_entry_and_publishes_event() {
        let store = Arc::new(MemoryDlqStore::default());
        let submitter = Arc::new(RecordingSubmitter::default());
        let events = Arc::new(EventBus::new());
        let (_sub, mut rx) = events.subscribe();
        let service = DlqService::new(
            Arc::clone(&store) as Arc<dyn DlqStore>,
            Arc::clone(&submitter) as Arc<dyn JobSubmitter>,
            Arc::clone(&events),
        );

        let job_id = JobId::new();
        store.insert(&entry(job_id)).await.unwrap();

        service.retry(job_id).await.unwrap();
        assert!(store.get(job_id).await.unwrap().is_none());
        assert_eq!(submitter.submissions().len(), 1);

        let event = rx.recv().await.unwrap();
        assert_eq!(event.kind, EventKind::SceneDlqRetry);
        assert_eq!(event.scene_id, SceneId(5));
    }

    #[tokio::test]
    async fn failed_resubmit_reverts_to_pending_review() {
        let store = Arc::new(MemoryDlqStore::default());
        let submitter = Arc::new(RecordingSubmitter::failing());
        let events = Arc::new(EventBus::new());
        let service = DlqService::new(
            Arc::clone(&store) as Arc<dyn DlqStore>,
            submitter as Arc<dyn JobSubmitter>,
            events,
        );

        let job_id = JobId::new();
        store.insert(&entry(job_id)).await.unwrap();

        assert!(service.retry(job_id).await.is_err());
        let kept = store.get(job_id).await.unwrap().unwrap();
        assert_eq!(kept.status, DlqStatus::PendingReview);
    }

    #[tokio::test]
    async fn abandon_updates_status_only() {
        let store = Arc::new(MemoryDlqStore::default());
        let submitter = Arc::new(RecordingSubmitter::default());
        let events = Arc::new(EventBus::new());
        let service = DlqService::new(
            Arc::clone(&store) as Arc<dyn DlqStore>,
            submitter as Arc<dyn JobSubmitter>,
            events,
        );

        let job_id = JobId::new();
        store.insert(&entry(job_id)).await.unwrap();
        service.abandon(job_id).await.unwrap();

        let kept = store.get(job_id).await.unwrap().unwrap();
        assert_eq!(kept.status, DlqStatus::Abandoned);

        let stats = service.stats().await.unwrap();
        assert_eq!(stats.abandoned, 1);
        assert_eq!(stats.total(), 1);
    }
}
