use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rand::Rng;
use scenedeck_model::{JobId, Phase, RetryPolicy, SceneId};
use tokio::sync::RwLock;
use tracing::{info, warn};

use crate::error::Result;
use crate::jobs::dlq::{DlqService, DlqStore};
use crate::jobs::history::JobHistoryStore;

/// Jitter applied to each computed delay so synchronized failures do not
/// retry in lockstep.
const JITTER_FRACTION: f64 = 0.25;

#[async_trait]
pub trait RetryPolicyStore: Send + Sync {
    async fn list(&self) -> Result<Vec<RetryPolicy>>;
}

/// What the scheduler decided for a failed job.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum RetryDecision {
    Retried { next_retry_at: DateTime<Utc> },
    DeadLettered,
}

/// Everything the scheduler needs to know about the failure being
/// processed. Built by the completion handler from the job outcome.
#[derive(Debug, Clone)]
pub struct FailedAttempt {
    pub job_id: JobId,
    pub scene_id: SceneId,
    pub scene_title: String,
    pub phase: Phase,
    /// Retry count before this failure.
    pub retry_count: i32,
    pub error: String,
}

/// Computes retry schedules and escalates exhausted jobs to the DLQ.
pub struct RetryScheduler {
    history: Arc<dyn JobHistoryStore>,
    dlq_store: Arc<dyn DlqStore>,
    policy_store: Arc<dyn RetryPolicyStore>,
    defaults: RetryPolicy,
    cache: RwLock<HashMap<Phase, RetryPolicy>>,
}

impl std::fmt::Debug for RetryScheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RetryScheduler")
            .field("defaults", &self.defaults)
            .finish_non_exhaustive()
    }
}

impl RetryScheduler {
    pub fn new(
        history: Arc<dyn JobHistoryStore>,
        dlq_store: Arc<dyn DlqStore>,
        policy_store: Arc<dyn RetryPolicyStore>,
        defaults: RetryPolicy,
    ) -> Self {
        Self {
            history,
            dlq_store,
            policy_store,
            defaults,
            cache: RwLock::new(HashMap::new()),
        }
    }

    /// Loads all configured policies into the cache. Called at startup
    /// and whenever operators change retry settings.
    pub async fn reload_policies(&self) -> Result<()> {
        let rows = self.policy_store.list().await?;
        let mut cache = self.cache.write().await;
        cache.clear();
        for policy in rows {
            if let Some(phase) = policy.phase {
                cache.insert(phase, policy);
            }
        }
        info!(policies = cache.len(), "retry policies loaded");
        Ok(())
    }

    async fn policy_for(&self, phase: Phase) -> RetryPolicy {
        if let Some(policy) = self.cache.read().await.get(&phase) {
            return policy.clone();
        }
        self.defaults.clone()
    }

    /// `min(initial * factor^n, max)` with ±25% jitter, clamped so the
    /// result never exceeds `max_delay_seconds`.
    pub fn next_delay(policy: &RetryPolicy, retry_count: i32) -> Duration {
        let initial = policy.initial_delay_seconds.max(1) as f64;
        let max = policy.max_delay_seconds.max(1) as f64;
        // powi saturates fast; cap the exponent to keep the math finite.
        let exponent = retry_count.clamp(0, 64);
        let base = (initial * policy.backoff_factor.max(1.0).powi(exponent)).min(max);

        let jitter = rand::rng().random_range(-JITTER_FRACTION..=JITTER_FRACTION);
        let delayed = (base * (1.0 + jitter)).min(max).max(0.0);
        Duration::from_secs_f64(delayed)
    }

    /// Consults the phase policy and either re-pends the row for a
    /// future attempt or escalates it to the DLQ.
    ///
    /// DLQ escalation is best-effort: when the DLQ insert fails the row
    /// is still terminally failed and stays discoverable through the
    /// failed-jobs listing.
    pub async fn schedule_retry(&self, attempt: &FailedAttempt) -> Result<RetryDecision> {
        let policy = self.policy_for(attempt.phase).await;
        let failure_count = attempt.retry_count + 1;

        if failure_count >= policy.max_retries {
            self.history
                .mark_not_retryable(attempt.job_id, &attempt.error)
                .await?;

            let original_error = match self.history.get(attempt.job_id).await {
                Ok(Some(job)) => job.original_error.unwrap_or_else(|| attempt.error.clone()),
                _ => attempt.error.clone(),
            };
            let entry = DlqService::entry_for_exhausted_job(
                attempt.job_id,
                attempt.scene_id,
                attempt.scene_title.clone(),
                attempt.phase,
                original_error,
                attempt.error.clone(),
                failure_count,
            );
            if let Err(e) = self.dlq_store.insert(&entry).await {
                warn!(
                    job = %attempt.job_id,
                    "dlq escalation failed, job remains discoverable via failed listing: {e}"
                );
            } else {
                info!(
                    job = %attempt.job_id,
                    scene = %attempt.scene_id,
                    phase = %attempt.phase,
                    failures = failure_count,
                    "job escalated to dlq"
                );
            }
            return Ok(RetryDecision::DeadLettered);
        }

        let delay = Self::next_delay(&policy, attempt.retry_count);
        let next_retry_at = Utc::now()
            + chrono::Duration::from_std(delay)
                .unwrap_or_else(|_| chrono::Duration::seconds(policy.max_delay_seconds));
        self.history
            .update_retry_info(attempt.job_id, failure_count, next_retry_at, &attempt.error)
            .await?;
        info!(
            job = %attempt.job_id,
            phase = %attempt.phase,
            retry = failure_count,
            delay_secs = delay.as_secs(),
            "job rescheduled"
        );
        Ok(RetryDecision::Retried { next_retry_at })
    }
}
