use async_trait::async_trait;
use scenedeck_model::{Phase, RetryPolicy};
use sqlx::PgPool;
use tracing::warn;

use crate::database::map_db_err;
use crate::error::Result;
use crate::jobs::retry::RetryPolicyStore;

#[derive(Clone)]
pub struct PostgresRetryPolicyStore {
    pool: PgPool,
}

impl std::fmt::Debug for PostgresRetryPolicyStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PostgresRetryPolicyStore").finish_non_exhaustive()
    }
}

impl PostgresRetryPolicyStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl RetryPolicyStore for PostgresRetryPolicyStore {
    async fn list(&self) -> Result<Vec<RetryPolicy>> {
        let rows: Vec<(String, i32, i64, i64, f64)> = sqlx::query_as(
            r#"
            SELECT phase, max_retries, initial_delay_seconds, max_delay_seconds, backoff_factor
            FROM retry_configs
            "#,
        )
        .fetch_all(&self.pool)
        .await
        .map_err(|e| map_db_err("failed to load retry configs", e))?;

        Ok(rows
            .into_iter()
            .filter_map(|(phase, max_retries, initial, max, factor)| {
                match phase.parse::<Phase>() {
                    Ok(phase) => Some(RetryPolicy {
                        phase: Some(phase),
                        max_retries,
                        initial_delay_seconds: initial,
                        max_delay_seconds: max,
                        backoff_factor: factor,
                    }),
                    Err(e) => {
                        warn!("skipping retry config row: {e}");
                        None
                    }
                }
            })
            .collect())
    }
}
