use async_trait::async_trait;
use scenedeck_model::{Phase, TriggerConfig, TriggerKind};
use sqlx::PgPool;
use tracing::warn;

use crate::database::map_db_err;
use crate::error::Result;
use crate::jobs::triggers::TriggerStore;

#[derive(Clone)]
pub struct PostgresTriggerStore {
    pool: PgPool,
}

impl std::fmt::Debug for PostgresTriggerStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PostgresTriggerStore").finish_non_exhaustive()
    }
}

impl PostgresTriggerStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl TriggerStore for PostgresTriggerStore {
    async fn list(&self) -> Result<Vec<TriggerConfig>> {
        let rows: Vec<(i32, String, String, Option<String>, bool)> = sqlx::query_as(
            "SELECT id, phase, trigger_type, cron_expression, enabled FROM trigger_configs",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(|e| map_db_err("failed to load trigger configs", e))?;

        Ok(rows
            .into_iter()
            .filter_map(|(id, phase, kind, cron_expression, enabled)| {
                let phase = match phase.parse::<Phase>() {
                    Ok(phase) => phase,
                    Err(e) => {
                        warn!(trigger = id, "skipping trigger config: {e}");
                        return None;
                    }
                };
                let kind = match kind.parse::<TriggerKind>() {
                    Ok(kind) => kind,
                    Err(e) => {
                        warn!(trigger = id, "skipping trigger config: {e}");
                        return None;
                    }
                };
                Some(TriggerConfig {
                    id,
                    phase,
                    kind,
                    cron_expression,
                    enabled,
                })
            })
            .collect())
    }
}
