pub mod dlq;
pub mod extract;
pub mod feeder;
pub mod history;
pub mod pool;
pub mod retry;
pub mod service;
pub mod status;
pub mod triggers;

use async_trait::async_trait;
use scenedeck_model::{JobId, Phase, SceneId};

use crate::error::Result;

/// Creates pending job rows. Implemented by the processing service and
/// consumed by the scan orchestrator, the trigger scheduler and DLQ
/// retries, which must not depend on the service type directly.
#[async_trait]
pub trait JobSubmitter: Send + Sync {
    async fn submit_phase(
        &self,
        scene_id: SceneId,
        phase: Phase,
        priority: i32,
        force_target: Option<String>,
    ) -> Result<JobId>;
}

pub use dlq::{DlqService, DlqStore};
pub use extract::{ExtractionRequest, Extractor, JobContext, ProgressUpdate, SharedExtractor};
pub use feeder::{QueueFeeder, recover_interrupted_jobs};
pub use history::{JobHistoryStore, JobPage};
pub use pool::{JobOutcome, PoolConfig, WorkerPool};
pub use retry::{FailedAttempt, RetryDecision, RetryPolicyStore, RetryScheduler};
pub use service::ProcessingService;
pub use status::{JobStatusAggregator, JobStatusSnapshot};
pub use triggers::{TriggerScheduler, TriggerStore};
