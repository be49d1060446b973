use crate::ids::SceneId;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use std::fmt;

/// Event types emitted by the processing core. The wire string is the
/// `category:action` form consumed by streaming clients.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EventKind {
    #[serde(rename = "scene:progress")]
    SceneProgress,
    #[serde(rename = "scene:completed")]
    SceneCompleted,
    #[serde(rename = "scene:failed")]
    SceneFailed,
    #[serde(rename = "scene:dlq_retry")]
    SceneDlqRetry,
    #[serde(rename = "scene:dlq_abandoned")]
    SceneDlqAbandoned,
    #[serde(rename = "scan:started")]
    ScanStarted,
    #[serde(rename = "scan:progress")]
    ScanProgress,
    #[serde(rename = "scan:video_added")]
    ScanVideoAdded,
    #[serde(rename = "scan:completed")]
    ScanCompleted,
    #[serde(rename = "scan:failed")]
    ScanFailed,
    #[serde(rename = "scan:cancelled")]
    ScanCancelled,
}

impl EventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::SceneProgress => "scene:progress",
            EventKind::SceneCompleted => "scene:completed",
            EventKind::SceneFailed => "scene:failed",
            EventKind::SceneDlqRetry => "scene:dlq_retry",
            EventKind::SceneDlqAbandoned => "scene:dlq_abandoned",
            EventKind::ScanStarted => "scan:started",
            EventKind::ScanProgress => "scan:progress",
            EventKind::ScanVideoAdded => "scan:video_added",
            EventKind::ScanCompleted => "scan:completed",
            EventKind::ScanFailed => "scan:failed",
            EventKind::ScanCancelled => "scan:cancelled",
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One event as fanned out to subscribers and serialized onto the
/// streaming surface: `{"type": ..., "sceneId": ..., "data": ...}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcessingEvent {
    #[serde(rename = "type")]
    pub kind: EventKind,
    /// `SceneId::NONE` (0) when the event has no scene subject.
    #[serde(rename = "sceneId")]
    pub scene_id: SceneId,
    pub data: Value,
}

impl ProcessingEvent {
    pub fn new(kind: EventKind, scene_id: SceneId, data: Value) -> Self {
        Self {
            kind,
            scene_id,
            data,
        }
    }

    /// Event without a scene subject (scan lifecycle, global notices).
    pub fn global(kind: EventKind, data: Value) -> Self {
        Self::new(kind, SceneId::NONE, data)
    }

    pub fn progress(scene_id: SceneId, phase: &str, progress: i16) -> Self {
        Self::new(
            EventKind::SceneProgress,
            scene_id,
            json!({ "phase": phase, "progress": progress }),
        )
    }
}
