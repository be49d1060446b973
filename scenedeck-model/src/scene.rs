use crate::ids::{SceneId, StoragePathId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// A video file known to the system. Owned by the library side of the
/// application; the processing core reads it to build extractor inputs
/// and to score duplicate-group variants.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Scene {
    pub id: SceneId,
    pub title: String,
    pub stored_path: PathBuf,
    pub storage_path_id: StoragePathId,
    /// Seconds. Zero until the metadata phase has run.
    pub duration: f64,
    pub width: i32,
    pub height: i32,
    pub video_codec: String,
    pub bit_rate: i64,
    pub thumbnail_width: i32,
    pub thumbnail_height: i32,
    pub created_at: DateTime<Utc>,
}

/// A configured storage root walked by the scan orchestrator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoragePath {
    pub id: StoragePathId,
    pub root: PathBuf,
    pub enabled: bool,
}
