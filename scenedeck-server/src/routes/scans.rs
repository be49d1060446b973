use axum::Json;
use axum::extract::{Path, State};
use scenedeck_core::ProcessError;
use scenedeck_model::ScanId;
use serde_json::{Value, json};
use uuid::Uuid;

use crate::errors::ApiResult;
use crate::state::AppState;

pub async fn start_scan(State(state): State<AppState>) -> ApiResult<Json<Value>> {
    let scan_id = state.scans.start_scan().await?;
    Ok(Json(json!({ "scanId": scan_id })))
}

pub async fn cancel_scan(
    State(state): State<AppState>,
    Path(scan_id): Path<Uuid>,
) -> ApiResult<Json<Value>> {
    if !state.scans.cancel_scan(ScanId(scan_id)) {
        return Err(ProcessError::NotFound(format!("running scan {scan_id}")).into());
    }
    Ok(Json(json!({ "cancelled": scan_id })))
}
