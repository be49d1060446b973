//! Core of the scenedeck media-processing backplane: the durable
//! DB-backed job queue, per-phase worker pools, retry/DLQ machinery,
//! live-status plumbing, duplicate detection and the scan orchestrator.

pub mod catalog;
pub mod config;
pub mod database;
pub mod error;
pub mod events;
pub mod jobs;
pub mod matching;
pub mod scan;

#[cfg(test)]
pub mod testing;

pub use catalog::{NewScene, ScanHistoryStore, SceneMediaInfo, SceneStore, StoragePathStore};
pub use config::{
    BloomConfig, FeederConfig, MatchingConfig, PhaseTimeouts, ProcessingConfig, WorkerCounts,
};
pub use error::{ProcessError, Result};
pub use events::EventBus;
pub use jobs::{
    DlqService, DlqStore, Extractor, JobHistoryStore, JobStatusAggregator, JobStatusSnapshot,
    JobSubmitter, ProcessingService, RetryPolicyStore, RetryScheduler, SharedExtractor,
    TriggerScheduler, TriggerStore,
};
pub use matching::{BloomFilterManager, DuplicateGroupStore, FingerprintStore, MatchingEngine};
pub use scan::ScanOrchestrator;
