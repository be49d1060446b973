use thiserror::Error;

/// Error taxonomy surfaced by the processing core. Callers branch on the
/// variant, so services must map lower-level failures into the closest
/// kind instead of collapsing everything into `Internal`.
#[derive(Error, Debug)]
pub enum ProcessError {
    #[error("validation error: {0}")]
    Validation(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("forbidden: {0}")]
    Forbidden(String),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("queue full: {0}")]
    QueueFull(String),

    #[error("timed out: {0}")]
    Timeout(String),

    #[error("cancelled: {0}")]
    Cancelled(String),

    #[error("storage unavailable: {0}")]
    Storage(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("internal error: {0}")]
    Internal(String),
}

impl ProcessError {
    /// True for the duplicate-pending-job guard and other uniqueness
    /// violations.
    pub fn is_conflict(&self) -> bool {
        matches!(self, ProcessError::Conflict(_))
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, ProcessError::NotFound(_))
    }

    pub fn is_queue_full(&self) -> bool {
        matches!(self, ProcessError::QueueFull(_))
    }
}

pub type Result<T> = std::result::Result<T, ProcessError>;
