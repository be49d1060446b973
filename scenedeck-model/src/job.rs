use crate::error::ModelError;
use crate::ids::{JobId, SceneId};
use crate::phase::Phase;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Lifecycle states of a processing job.
///
/// `pending -> running -> (completed | failed | cancelled | timed_out)`;
/// `running -> pending` happens only through crash-recovery
/// reclassification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Cancelled,
    TimedOut,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::Running => "running",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
            JobStatus::Cancelled => "cancelled",
            JobStatus::TimedOut => "timed_out",
        }
    }

    /// Terminal states are eligible for the retention sweep.
    pub fn is_terminal(&self) -> bool {
        !matches!(self, JobStatus::Pending | JobStatus::Running)
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobStatus {
    type Err = ModelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(JobStatus::Pending),
            "running" => Ok(JobStatus::Running),
            "completed" => Ok(JobStatus::Completed),
            "failed" => Ok(JobStatus::Failed),
            "cancelled" => Ok(JobStatus::Cancelled),
            "timed_out" => Ok(JobStatus::TimedOut),
            other => Err(ModelError::InvalidValue(format!(
                "unknown job status: {other}"
            ))),
        }
    }
}

/// One durable work unit. The pending rows of the `job_history` table are
/// the queue itself; everything else is bookkeeping for operators and the
/// retry scheduler.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobRecord {
    pub job_id: JobId,
    pub scene_id: SceneId,
    /// Denormalized for display; the scene row is not joined on hot paths.
    pub scene_title: String,
    pub phase: Phase,
    pub status: JobStatus,
    /// Higher values are claimed first.
    pub priority: i32,
    /// Opaque hint forwarded to the extractor (e.g. a specific artifact
    /// to regenerate).
    pub force_target: Option<String>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub error_message: Option<String>,
    /// Message from the first failed attempt, kept verbatim while
    /// `error_message` tracks the latest one. DLQ escalation copies it.
    pub original_error: Option<String>,
    /// 0-100.
    pub progress: i16,
    pub retry_count: i32,
    pub max_retries: i32,
    pub is_retryable: bool,
    pub next_retry_at: Option<DateTime<Utc>>,
    pub claimed_at: Option<DateTime<Utc>>,
}

/// Parameters for creating a pending job row.
#[derive(Debug, Clone)]
pub struct NewJob {
    pub scene_id: SceneId,
    pub scene_title: String,
    pub phase: Phase,
    pub priority: i32,
    pub force_target: Option<String>,
    pub max_retries: i32,
}

impl NewJob {
    pub fn into_record(self) -> JobRecord {
        JobRecord {
            job_id: JobId::new(),
            scene_id: self.scene_id,
            scene_title: self.scene_title,
            phase: self.phase,
            status: JobStatus::Pending,
            priority: self.priority,
            force_target: self.force_target,
            created_at: Utc::now(),
            started_at: None,
            finished_at: None,
            error_message: None,
            original_error: None,
            progress: 0,
            retry_count: 0,
            max_retries: self.max_retries,
            is_retryable: true,
            next_retry_at: None,
            claimed_at: None,
        }
    }
}
