use async_trait::async_trait;
use scenedeck_model::{ScanId, ScanRecord, ScanStatus};
use sqlx::PgPool;

use crate::catalog::ScanHistoryStore;
use crate::database::map_db_err;
use crate::error::{ProcessError, Result};

#[derive(Clone)]
pub struct PostgresScanHistoryStore {
    pool: PgPool,
}

impl std::fmt::Debug for PostgresScanHistoryStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PostgresScanHistoryStore").finish_non_exhaustive()
    }
}

impl PostgresScanHistoryStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ScanHistoryStore for PostgresScanHistoryStore {
    async fn insert(&self, record: &ScanRecord) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO scan_history (id, status, files_seen, videos_added, started_at)
            VALUES ($1, $2, $3, $4, $5)
            "#,
        )
        .bind(record.id.0)
        .bind(record.status.as_str())
        .bind(record.files_seen)
        .bind(record.videos_added)
        .bind(record.started_at)
        .execute(&self.pool)
        .await
        .map_err(|e| map_db_err("failed to insert scan record", e))?;
        Ok(())
    }

    async fn finish(
        &self,
        id: ScanId,
        status: ScanStatus,
        files_seen: i64,
        videos_added: i64,
        error_message: Option<&str>,
    ) -> Result<()> {
        let result = sqlx::query(
            r#"
            UPDATE scan_history
            SET status = $2, files_seen = $3, videos_added = $4,
                error_message = $5, finished_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(id.0)
        .bind(status.as_str())
        .bind(files_seen)
        .bind(videos_added)
        .bind(error_message)
        .execute(&self.pool)
        .await
        .map_err(|e| map_db_err("failed to finish scan record", e))?;
        if result.rows_affected() == 0 {
            return Err(ProcessError::NotFound(format!("scan {id}")));
        }
        Ok(())
    }

    async fn mark_running_as_failed(&self) -> Result<u64> {
        let result = sqlx::query(
            r#"
            UPDATE scan_history
            SET status = 'failed', error_message = 'interrupted by restart', finished_at = NOW()
            WHERE status = 'running'
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(|e| map_db_err("failed to reclassify interrupted scans", e))?;
        Ok(result.rows_affected())
    }
}
