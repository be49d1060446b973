use std::sync::Arc;

use async_trait::async_trait;
use scenedeck_model::{JobId, Phase, Scene, SceneId};
use serde_json::Value;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::error::Result;

/// Inputs for one extractor invocation. The core builds this from the
/// claimed job row plus the scene record and does not interpret the
/// output beyond storing it.
#[derive(Debug, Clone)]
pub struct ExtractionRequest {
    pub job_id: JobId,
    pub phase: Phase,
    pub scene: Scene,
    /// Opaque hint (e.g. a specific artifact to regenerate).
    pub force_target: Option<String>,
}

/// Progress sample reported by a running extractor.
#[derive(Debug, Clone, Copy)]
pub struct ProgressUpdate {
    pub job_id: JobId,
    pub scene_id: SceneId,
    pub phase: Phase,
    /// 0-100.
    pub percent: i16,
}

/// Per-job execution context handed to the extractor. Cancellation is
/// cooperative: long-running extractors are expected to poll `cancel`.
#[derive(Debug, Clone)]
pub struct JobContext {
    pub cancel: CancellationToken,
    job_id: JobId,
    scene_id: SceneId,
    phase: Phase,
    progress_tx: mpsc::Sender<ProgressUpdate>,
}

impl JobContext {
    pub fn new(
        job_id: JobId,
        scene_id: SceneId,
        phase: Phase,
        cancel: CancellationToken,
        progress_tx: mpsc::Sender<ProgressUpdate>,
    ) -> Self {
        Self {
            cancel,
            job_id,
            scene_id,
            phase,
            progress_tx,
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Progress is lossy: a congested channel drops the sample rather
    /// than stalling the extractor.
    pub fn report_progress(&self, percent: i16) {
        let update = ProgressUpdate {
            job_id: self.job_id,
            scene_id: self.scene_id,
            phase: self.phase,
            percent: percent.clamp(0, 100),
        };
        let _ = self.progress_tx.try_send(update);
    }
}

/// The opaque frame-extraction capability. Implementations live outside
/// the core (ffprobe/ffmpeg invocations, test fakes); the core only
/// schedules them and records their results.
#[async_trait]
pub trait Extractor: Send + Sync {
    async fn execute(&self, request: &ExtractionRequest, ctx: &JobContext) -> Result<Value>;
}

pub type SharedExtractor = Arc<dyn Extractor>;
