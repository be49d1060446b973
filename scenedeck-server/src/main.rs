mod config;
mod errors;
mod extractors;
mod routes;
mod state;

use std::net::SocketAddr;
use std::sync::Arc;

use scenedeck_core::database::{
    self, PostgresDlqStore, PostgresDuplicateGroupStore, PostgresFingerprintStore,
    PostgresJobHistoryStore, PostgresRetryPolicyStore, PostgresScanHistoryStore,
    PostgresSceneStore, PostgresStoragePathStore, PostgresTriggerStore,
};
use scenedeck_core::jobs::{DlqService, JobSubmitter, ProcessingService, RetryScheduler};
use scenedeck_core::matching::BloomFilterManager;
use scenedeck_core::{EventBus, MatchingEngine, ScanOrchestrator, TriggerScheduler};
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use config::Config;
use extractors::ExtractorConfig;
use state::AppState;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = Config::from_env()?;

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "scenedeck=info,tower_http=warn".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    config.ensure_directories()?;
    info!("configuration loaded, data dir {}", config.processing.data_dir.display());

    let pool = database::connect(&config.database_url, config.database_max_connections).await?;
    sqlx::migrate!().run(&pool).await?;
    info!("database migrations applied");

    // Repositories
    let history = Arc::new(PostgresJobHistoryStore::new(pool.clone()));
    let scenes = Arc::new(PostgresSceneStore::new(pool.clone()));
    let storage_paths = Arc::new(PostgresStoragePathStore::new(pool.clone()));
    let scan_history = Arc::new(PostgresScanHistoryStore::new(pool.clone()));
    let dlq_store = Arc::new(PostgresDlqStore::new(pool.clone()));
    let retry_policies = Arc::new(PostgresRetryPolicyStore::new(pool.clone()));
    let trigger_store = Arc::new(PostgresTriggerStore::new(pool.clone()));
    let fingerprint_store = Arc::new(PostgresFingerprintStore::new(pool.clone()));
    let group_store = Arc::new(PostgresDuplicateGroupStore::new(pool.clone()));

    let events = Arc::new(EventBus::new());

    let retry = Arc::new(RetryScheduler::new(
        history.clone(),
        dlq_store.clone(),
        retry_policies,
        config.processing.retry_defaults.clone(),
    ));

    let processing = ProcessingService::new(
        config.processing.clone(),
        history.clone(),
        scenes.clone(),
        retry,
        events.clone(),
        extractors::build_extractors(&ExtractorConfig {
            ffmpeg_path: config.ffmpeg_path.clone(),
            ffprobe_path: config.ffprobe_path.clone(),
            artifacts_dir: config.artifacts_dir.clone(),
        }),
    );
    let submitter: Arc<dyn JobSubmitter> = processing.clone();

    let dlq = Arc::new(DlqService::new(
        dlq_store,
        submitter.clone(),
        events.clone(),
    ));

    let bloom = BloomFilterManager::load_or_rebuild(
        &config.processing.data_dir,
        &config.processing.bloom,
        fingerprint_store.as_ref(),
    )
    .await?;
    let matching = Arc::new(MatchingEngine::new(
        fingerprint_store,
        group_store,
        scenes.clone(),
        bloom,
        config.processing.matching.clone(),
    ));

    let scans = Arc::new(ScanOrchestrator::new(
        scenes.clone(),
        storage_paths,
        scan_history,
        submitter.clone(),
        events.clone(),
    ));
    scans.recover_interrupted().await?;

    let triggers = Arc::new(TriggerScheduler::new(trigger_store, scenes, submitter));
    triggers.start().await?;

    processing.start().await?;

    let app_state = AppState {
        events,
        processing: processing.clone(),
        aggregator: Arc::new(processing.aggregator()),
        history,
        dlq,
        matching,
        scans,
        triggers: triggers.clone(),
    };
    let app = routes::router(app_state);

    let addr: SocketAddr = format!("{}:{}", config.server_host, config.server_port).parse()?;
    info!("scenedeck server listening on {addr}");
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("shutting down");
    triggers.shutdown().await;
    processing.shutdown().await;
    Ok(())
}

async fn shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
    info!("shutdown signal received");
}
