use std::sync::Arc;

use scenedeck_core::jobs::{DlqService, JobHistoryStore, JobStatusAggregator, ProcessingService};
use scenedeck_core::{EventBus, MatchingEngine, ScanOrchestrator, TriggerScheduler};

#[derive(Clone)]
pub struct AppState {
    pub events: Arc<EventBus>,
    pub processing: Arc<ProcessingService>,
    pub aggregator: Arc<JobStatusAggregator>,
    pub history: Arc<dyn JobHistoryStore>,
    pub dlq: Arc<DlqService>,
    pub matching: Arc<MatchingEngine>,
    pub scans: Arc<ScanOrchestrator>,
    pub triggers: Arc<TriggerScheduler>,
}

impl std::fmt::Debug for AppState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppState").finish_non_exhaustive()
    }
}
