mod dlq;
mod fingerprints;
mod groups;
mod job_history;
mod retry_configs;
mod scan_history;
mod scenes;
mod storage_paths;
mod triggers;

pub use dlq::PostgresDlqStore;
pub use fingerprints::PostgresFingerprintStore;
pub use groups::PostgresDuplicateGroupStore;
pub use job_history::PostgresJobHistoryStore;
pub use retry_configs::PostgresRetryPolicyStore;
pub use scan_history::PostgresScanHistoryStore;
pub use scenes::PostgresSceneStore;
pub use storage_paths::PostgresStoragePathStore;
pub use triggers::PostgresTriggerStore;
