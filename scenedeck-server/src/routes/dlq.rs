use axum::Json;
use axum::extract::{Path, Query, State};
use scenedeck_core::ProcessError;
use scenedeck_model::{DlqEntry, DlqStats, DlqStatus, JobId};
use serde::Deserialize;
use serde_json::{Value, json};
use uuid::Uuid;

use crate::errors::ApiResult;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct DlqListQuery {
    status: Option<String>,
    #[serde(default = "default_limit")]
    limit: u32,
}

fn default_limit() -> u32 {
    100
}

pub async fn list_entries(
    State(state): State<AppState>,
    Query(query): Query<DlqListQuery>,
) -> ApiResult<Json<Vec<DlqEntry>>> {
    let status = query
        .status
        .as_deref()
        .map(|raw| {
            raw.parse::<DlqStatus>()
                .map_err(|e| ProcessError::Validation(e.to_string()))
        })
        .transpose()?;
    Ok(Json(state.dlq.list(status, query.limit.min(500)).await?))
}

pub async fn stats(State(state): State<AppState>) -> ApiResult<Json<DlqStats>> {
    Ok(Json(state.dlq.stats().await?))
}

pub async fn retry_entry(
    State(state): State<AppState>,
    Path(job_id): Path<Uuid>,
) -> ApiResult<Json<Value>> {
    let new_job_id = state.dlq.retry(JobId(job_id)).await?;
    Ok(Json(json!({ "jobId": new_job_id })))
}

pub async fn abandon_entry(
    State(state): State<AppState>,
    Path(job_id): Path<Uuid>,
) -> ApiResult<Json<Value>> {
    state.dlq.abandon(JobId(job_id)).await?;
    Ok(Json(json!({ "abandoned": job_id })))
}
