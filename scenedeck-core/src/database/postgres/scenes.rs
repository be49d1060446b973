use std::collections::{HashMap, HashSet};
use std::path::PathBuf;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use scenedeck_model::{Phase, Scene, SceneId, StoragePathId};
use sqlx::PgPool;

use crate::catalog::{NewScene, SceneMediaInfo, SceneStore};
use crate::database::map_db_err;
use crate::error::{ProcessError, Result};

const SCENE_COLUMNS: &str = "id, title, stored_path, storage_path_id, duration, width, height, \
     video_codec, bit_rate, thumbnail_width, thumbnail_height, created_at";

#[derive(sqlx::FromRow)]
struct SceneRow {
    id: i64,
    title: String,
    stored_path: String,
    storage_path_id: i32,
    duration: f64,
    width: i32,
    height: i32,
    video_codec: String,
    bit_rate: i64,
    thumbnail_width: i32,
    thumbnail_height: i32,
    created_at: DateTime<Utc>,
}

impl From<SceneRow> for Scene {
    fn from(row: SceneRow) -> Self {
        Scene {
            id: SceneId(row.id),
            title: row.title,
            stored_path: PathBuf::from(row.stored_path),
            storage_path_id: StoragePathId(row.storage_path_id),
            duration: row.duration,
            width: row.width,
            height: row.height,
            video_codec: row.video_codec,
            bit_rate: row.bit_rate,
            thumbnail_width: row.thumbnail_width,
            thumbnail_height: row.thumbnail_height,
            created_at: row.created_at,
        }
    }
}

#[derive(Clone)]
pub struct PostgresSceneStore {
    pool: PgPool,
}

impl std::fmt::Debug for PostgresSceneStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PostgresSceneStore").finish_non_exhaustive()
    }
}

impl PostgresSceneStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl SceneStore for PostgresSceneStore {
    async fn get(&self, id: SceneId) -> Result<Option<Scene>> {
        let sql = format!("SELECT {SCENE_COLUMNS} FROM scenes WHERE id = $1");
        let row: Option<SceneRow> = sqlx::query_as(&sql)
            .bind(id.0)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| map_db_err("failed to fetch scene", e))?;
        Ok(row.map(Scene::from))
    }

    async fn get_by_ids(&self, ids: &[SceneId]) -> Result<HashMap<SceneId, Scene>> {
        if ids.is_empty() {
            return Ok(HashMap::new());
        }
        let raw: Vec<i64> = ids.iter().map(|id| id.0).collect();
        let sql = format!("SELECT {SCENE_COLUMNS} FROM scenes WHERE id = ANY($1)");
        let rows: Vec<SceneRow> = sqlx::query_as(&sql)
            .bind(&raw)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| map_db_err("failed to batch fetch scenes", e))?;
        Ok(rows
            .into_iter()
            .map(Scene::from)
            .map(|scene| (scene.id, scene))
            .collect())
    }

    async fn create(&self, new_scene: NewScene) -> Result<Scene> {
        let stored_path = new_scene.stored_path.to_string_lossy().into_owned();
        let sql = format!(
            r#"
            INSERT INTO scenes (title, stored_path, storage_path_id)
            VALUES ($1, $2, $3)
            RETURNING {SCENE_COLUMNS}
            "#
        );
        let row: SceneRow = sqlx::query_as(&sql)
            .bind(&new_scene.title)
            .bind(&stored_path)
            .bind(new_scene.storage_path_id.0)
            .fetch_one(&self.pool)
            .await
            .map_err(|e| map_db_err("failed to create scene", e))?;
        Ok(Scene::from(row))
    }

    async fn known_paths(&self, storage_path_id: StoragePathId) -> Result<HashSet<PathBuf>> {
        let rows: Vec<(String,)> =
            sqlx::query_as("SELECT stored_path FROM scenes WHERE storage_path_id = $1")
                .bind(storage_path_id.0)
                .fetch_all(&self.pool)
                .await
                .map_err(|e| map_db_err("failed to list known paths", e))?;
        Ok(rows.into_iter().map(|(path,)| PathBuf::from(path)).collect())
    }

    async fn scenes_needing_phase(&self, phase: Phase, limit: usize) -> Result<Vec<Scene>> {
        // A scene needs the phase when no completed run exists and
        // nothing is queued or running for it.
        let sql = format!(
            r#"
            SELECT {SCENE_COLUMNS}
            FROM scenes s
            WHERE NOT EXISTS (
                SELECT 1 FROM job_history j
                WHERE j.scene_id = s.id
                  AND j.phase = $1
                  AND j.status IN ('pending', 'running', 'completed')
            )
            ORDER BY s.id ASC
            LIMIT $2
            "#
        );
        let rows: Vec<SceneRow> = sqlx::query_as(&sql)
            .bind(phase.as_str())
            .bind(limit as i64)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| map_db_err("failed to find scenes needing phase", e))?;
        Ok(rows.into_iter().map(Scene::from).collect())
    }

    async fn update_media_info(&self, id: SceneId, info: &SceneMediaInfo) -> Result<()> {
        let result = sqlx::query(
            r#"
            UPDATE scenes
            SET duration = $2, width = $3, height = $4, video_codec = $5, bit_rate = $6
            WHERE id = $1
            "#,
        )
        .bind(id.0)
        .bind(info.duration)
        .bind(info.width)
        .bind(info.height)
        .bind(&info.video_codec)
        .bind(info.bit_rate)
        .execute(&self.pool)
        .await
        .map_err(|e| map_db_err("failed to update scene media info", e))?;
        if result.rows_affected() == 0 {
            return Err(ProcessError::NotFound(format!("scene {id}")));
        }
        Ok(())
    }
}
