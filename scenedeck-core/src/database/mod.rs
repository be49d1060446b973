pub mod postgres;

use sqlx::postgres::PgPoolOptions;
use sqlx::{PgPool, Pool, Postgres};
use tracing::info;

use crate::error::{ProcessError, Result};

pub use postgres::{
    PostgresDlqStore, PostgresDuplicateGroupStore, PostgresFingerprintStore,
    PostgresJobHistoryStore, PostgresRetryPolicyStore, PostgresScanHistoryStore,
    PostgresSceneStore, PostgresStoragePathStore, PostgresTriggerStore,
};

/// Connects and verifies the database is reachable.
pub async fn connect(database_url: &str, max_connections: u32) -> Result<PgPool> {
    let pool: Pool<Postgres> = PgPoolOptions::new()
        .max_connections(max_connections)
        .connect(database_url)
        .await
        .map_err(|e| ProcessError::Storage(format!("database connection failed: {e}")))?;
    sqlx::query_scalar::<_, i32>("SELECT 1")
        .fetch_one(&pool)
        .await
        .map_err(|e| ProcessError::Storage(format!("database health check failed: {e}")))?;
    info!("database connection established");
    Ok(pool)
}

/// Maps sqlx failures onto the core error taxonomy so callers can branch
/// on conflicts and outages without knowing the driver.
pub(crate) fn map_db_err(context: &str, e: sqlx::Error) -> ProcessError {
    match e {
        sqlx::Error::RowNotFound => ProcessError::NotFound(context.to_string()),
        sqlx::Error::Database(db) if db.is_unique_violation() => {
            ProcessError::Conflict(format!("{context}: {db}"))
        }
        sqlx::Error::PoolTimedOut | sqlx::Error::Io(_) => {
            ProcessError::Storage(format!("{context}: {e}"))
        }
        other => ProcessError::Internal(format!("{context}: {other}")),
    }
}
