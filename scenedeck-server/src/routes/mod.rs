mod dlq;
mod events;
mod jobs;
mod matching;
mod scans;

use axum::Router;
use axum::routing::{get, post};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::state::AppState;

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/api/events", get(events::stream_events))
        .route("/api/jobs/status", get(jobs::job_status))
        .route("/api/jobs", get(jobs::list_jobs))
        .route("/api/jobs/failed", get(jobs::list_failed_jobs))
        .route("/api/jobs/{job_id}/cancel", post(jobs::cancel_job))
        .route(
            "/api/scenes/{scene_id}/process/{phase}",
            post(jobs::submit_phase),
        )
        .route(
            "/api/scenes/{scene_id}/fingerprints",
            post(matching::ingest_fingerprints).delete(matching::delete_fingerprints),
        )
        .route("/api/triggers/refresh", post(jobs::refresh_triggers))
        .route("/api/dlq", get(dlq::list_entries))
        .route("/api/dlq/stats", get(dlq::stats))
        .route("/api/dlq/{job_id}/retry", post(dlq::retry_entry))
        .route("/api/dlq/{job_id}/abandon", post(dlq::abandon_entry))
        .route("/api/scans", post(scans::start_scan))
        .route("/api/scans/{scan_id}/cancel", post(scans::cancel_scan))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}
