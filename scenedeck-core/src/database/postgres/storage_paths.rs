use std::path::PathBuf;

use async_trait::async_trait;
use scenedeck_model::{StoragePath, StoragePathId};
use sqlx::PgPool;

use crate::catalog::StoragePathStore;
use crate::database::map_db_err;
use crate::error::Result;

#[derive(Clone)]
pub struct PostgresStoragePathStore {
    pool: PgPool,
}

impl std::fmt::Debug for PostgresStoragePathStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PostgresStoragePathStore").finish_non_exhaustive()
    }
}

impl PostgresStoragePathStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl StoragePathStore for PostgresStoragePathStore {
    async fn list_enabled(&self) -> Result<Vec<StoragePath>> {
        let rows: Vec<(i32, String, bool)> =
            sqlx::query_as("SELECT id, root, enabled FROM storage_paths WHERE enabled ORDER BY id")
                .fetch_all(&self.pool)
                .await
                .map_err(|e| map_db_err("failed to list storage paths", e))?;
        Ok(rows
            .into_iter()
            .map(|(id, root, enabled)| StoragePath {
                id: StoragePathId(id),
                root: PathBuf::from(root),
                enabled,
            })
            .collect())
    }
}
