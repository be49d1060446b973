use crate::error::ModelError;
use crate::ids::{JobId, SceneId};
use crate::phase::Phase;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DlqStatus {
    PendingReview,
    Retrying,
    Abandoned,
}

impl DlqStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            DlqStatus::PendingReview => "pending_review",
            DlqStatus::Retrying => "retrying",
            DlqStatus::Abandoned => "abandoned",
        }
    }
}

impl fmt::Display for DlqStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DlqStatus {
    type Err = ModelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending_review" => Ok(DlqStatus::PendingReview),
            "retrying" => Ok(DlqStatus::Retrying),
            "abandoned" => Ok(DlqStatus::Abandoned),
            other => Err(ModelError::InvalidValue(format!(
                "unknown dlq status: {other}"
            ))),
        }
    }
}

/// A job parked for operator attention after its retry budget ran out.
/// `original_error` is the message from the first failed attempt and is
/// preserved verbatim across retries; `last_error` tracks the most recent
/// one.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DlqEntry {
    pub job_id: JobId,
    pub scene_id: SceneId,
    pub scene_title: String,
    pub phase: Phase,
    pub original_error: String,
    pub last_error: String,
    pub failure_count: i32,
    pub status: DlqStatus,
    pub created_at: DateTime<Utc>,
}

/// Counts grouped by status for the triage dashboard.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DlqStats {
    pub pending_review: i64,
    pub retrying: i64,
    pub abandoned: i64,
}

impl DlqStats {
    pub fn total(&self) -> i64 {
        self.pending_review + self.retrying + self.abandoned
    }
}
