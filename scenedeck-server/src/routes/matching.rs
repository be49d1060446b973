use axum::Json;
use axum::extract::{Path, State};
use scenedeck_model::SceneId;
use serde::Deserialize;
use serde_json::{Value, json};

use crate::errors::ApiResult;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct FingerprintBody {
    #[serde(default)]
    audio: Vec<i32>,
    #[serde(default)]
    visual: Vec<u64>,
}

/// Ingest endpoint for the external fingerprinting tool: indexes the
/// scene's hashes, matches against the existing corpus and folds any
/// confirmed matches into duplicate groups.
pub async fn ingest_fingerprints(
    State(state): State<AppState>,
    Path(scene_id): Path<i64>,
    Json(body): Json<FingerprintBody>,
) -> ApiResult<Json<Value>> {
    let group = state
        .matching
        .process_scene(SceneId(scene_id), &body.audio, &body.visual)
        .await?;
    Ok(Json(json!({ "groupId": group })))
}

/// Removes a deleted scene's hashes from the exact index. The bloom
/// filter keeps them until its next rebuild; that only costs extra
/// confirmed-lookup work.
pub async fn delete_fingerprints(
    State(state): State<AppState>,
    Path(scene_id): Path<i64>,
) -> ApiResult<Json<Value>> {
    state
        .matching
        .delete_scene_fingerprints(SceneId(scene_id))
        .await?;
    Ok(Json(json!({ "deleted": scene_id })))
}
