use crate::phase::Phase;
use serde::{Deserialize, Serialize};

/// Per-phase retry policy. Rows missing from `retry_configs` fall back to
/// `RetryPolicy::default()`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryPolicy {
    pub phase: Option<Phase>,
    pub max_retries: i32,
    pub initial_delay_seconds: i64,
    pub max_delay_seconds: i64,
    pub backoff_factor: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            phase: None,
            max_retries: 3,
            initial_delay_seconds: 30,
            max_delay_seconds: 3600,
            backoff_factor: 2.0,
        }
    }
}
