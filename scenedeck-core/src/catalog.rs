use std::collections::{HashMap, HashSet};
use std::path::PathBuf;

use async_trait::async_trait;
use scenedeck_model::{
    Phase, ScanId, ScanRecord, ScanStatus, Scene, SceneId, StoragePath, StoragePathId,
};

use crate::error::Result;

/// Parameters for a scene row discovered by the scan orchestrator.
/// Media details stay zeroed until the metadata phase fills them in.
#[derive(Debug, Clone)]
pub struct NewScene {
    pub title: String,
    pub stored_path: PathBuf,
    pub storage_path_id: StoragePathId,
}

/// Technical details produced by the metadata phase.
#[derive(Debug, Clone, PartialEq, serde::Deserialize)]
pub struct SceneMediaInfo {
    pub duration: f64,
    pub width: i32,
    pub height: i32,
    pub video_codec: String,
    pub bit_rate: i64,
}

/// Read/write access to scene rows. The library side of the application
/// owns richer scene metadata; the core only touches what processing
/// needs.
#[async_trait]
pub trait SceneStore: Send + Sync {
    async fn get(&self, id: SceneId) -> Result<Option<Scene>>;

    /// Batch fetch used by the feeders to avoid per-row queries.
    async fn get_by_ids(&self, ids: &[SceneId]) -> Result<HashMap<SceneId, Scene>>;

    async fn create(&self, new_scene: NewScene) -> Result<Scene>;

    /// Stored paths already known under a storage root, for new-file
    /// detection during a scan.
    async fn known_paths(&self, storage_path_id: StoragePathId) -> Result<HashSet<PathBuf>>;

    /// Scenes with no completed, pending or running job for `phase`.
    /// Feeds the scheduled triggers.
    async fn scenes_needing_phase(&self, phase: Phase, limit: usize) -> Result<Vec<Scene>>;

    async fn update_media_info(&self, id: SceneId, info: &SceneMediaInfo) -> Result<()>;
}

#[async_trait]
pub trait StoragePathStore: Send + Sync {
    async fn list_enabled(&self) -> Result<Vec<StoragePath>>;
}

#[async_trait]
pub trait ScanHistoryStore: Send + Sync {
    async fn insert(&self, record: &ScanRecord) -> Result<()>;

    async fn finish(
        &self,
        id: ScanId,
        status: ScanStatus,
        files_seen: i64,
        videos_added: i64,
        error_message: Option<&str>,
    ) -> Result<()>;

    /// Startup recovery: scans left `running` by a previous process are
    /// reclassified as failed. Returns the number updated.
    async fn mark_running_as_failed(&self) -> Result<u64>;
}
