use axum::Json;
use axum::extract::{Path, Query, State};
use scenedeck_core::ProcessError;
use scenedeck_core::jobs::{JobStatusSnapshot, JobSubmitter};
use scenedeck_model::{JobId, JobStatus, Phase, SceneId};
use serde::Deserialize;
use serde_json::{Value, json};
use uuid::Uuid;

use crate::errors::ApiResult;
use crate::state::AppState;

pub async fn job_status(State(state): State<AppState>) -> ApiResult<Json<JobStatusSnapshot>> {
    Ok(Json(state.aggregator.snapshot().await?))
}

#[derive(Debug, Deserialize)]
pub struct JobListQuery {
    #[serde(default = "default_page")]
    page: u32,
    #[serde(default = "default_limit")]
    limit: u32,
    status: Option<String>,
}

fn default_page() -> u32 {
    1
}

fn default_limit() -> u32 {
    50
}

pub async fn list_jobs(
    State(state): State<AppState>,
    Query(query): Query<JobListQuery>,
) -> ApiResult<Json<Value>> {
    let status = query
        .status
        .as_deref()
        .map(|raw| {
            raw.parse::<JobStatus>()
                .map_err(|e| ProcessError::Validation(e.to_string()))
        })
        .transpose()?;
    let page = state
        .history
        .list_all(query.page, query.limit.min(200), status)
        .await?;
    Ok(Json(json!({
        "jobs": page.jobs,
        "total": page.total,
        "page": page.page,
        "limit": page.limit,
    })))
}

#[derive(Debug, Deserialize)]
pub struct FailedListQuery {
    #[serde(default = "default_limit")]
    limit: u32,
}

/// Recent terminal failures, including jobs whose DLQ escalation could
/// not be recorded.
pub async fn list_failed_jobs(
    State(state): State<AppState>,
    Query(query): Query<FailedListQuery>,
) -> ApiResult<Json<Value>> {
    let jobs = state.history.get_failed_jobs(query.limit.min(200)).await?;
    Ok(Json(json!({ "jobs": jobs })))
}

pub async fn refresh_triggers(State(state): State<AppState>) -> ApiResult<Json<Value>> {
    state.triggers.refresh_schedules().await?;
    Ok(Json(json!({ "refreshed": true })))
}

pub async fn cancel_job(
    State(state): State<AppState>,
    Path(job_id): Path<Uuid>,
) -> ApiResult<Json<Value>> {
    state.processing.cancel_job(JobId(job_id)).await?;
    Ok(Json(json!({ "cancelled": job_id })))
}

#[derive(Debug, Default, Deserialize)]
pub struct SubmitBody {
    #[serde(default)]
    priority: i32,
    force_target: Option<String>,
}

pub async fn submit_phase(
    State(state): State<AppState>,
    Path((scene_id, phase)): Path<(i64, String)>,
    body: Option<Json<SubmitBody>>,
) -> ApiResult<Json<Value>> {
    let phase = phase
        .parse::<Phase>()
        .map_err(|e| ProcessError::Validation(e.to_string()))?;
    let body = body.map(|Json(body)| body).unwrap_or_default();
    let job_id = state
        .processing
        .submit_phase(SceneId(scene_id), phase, body.priority, body.force_target)
        .await?;
    Ok(Json(json!({ "jobId": job_id })))
}
