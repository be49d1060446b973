use async_trait::async_trait;
use chrono::{DateTime, Utc};
use scenedeck_model::{
    DuplicateGroup, DuplicateGroupMember, GroupId, GroupStatus, MatchType, SceneId,
};
use sqlx::{PgPool, Postgres, Transaction};

use crate::database::map_db_err;
use crate::error::{ProcessError, Result};
use crate::matching::groups::{DuplicateGroupStore, NewGroupMember};

#[derive(sqlx::FromRow)]
struct GroupRow {
    id: i64,
    status: String,
    member_count: i32,
    best_scene_id: Option<i64>,
    created_at: DateTime<Utc>,
}

impl TryFrom<GroupRow> for DuplicateGroup {
    type Error = ProcessError;

    fn try_from(row: GroupRow) -> Result<Self> {
        Ok(DuplicateGroup {
            id: GroupId(row.id),
            status: row
                .status
                .parse::<GroupStatus>()
                .map_err(|e| ProcessError::Internal(format!("corrupt group row: {e}")))?,
            member_count: row.member_count,
            best_scene_id: row.best_scene_id.map(SceneId),
            created_at: row.created_at,
        })
    }
}

#[derive(sqlx::FromRow)]
struct MemberRow {
    group_id: i64,
    scene_id: i64,
    confidence_score: f64,
    match_type: String,
}

impl TryFrom<MemberRow> for DuplicateGroupMember {
    type Error = ProcessError;

    fn try_from(row: MemberRow) -> Result<Self> {
        Ok(DuplicateGroupMember {
            group_id: GroupId(row.group_id),
            scene_id: SceneId(row.scene_id),
            confidence_score: row.confidence_score,
            match_type: row
                .match_type
                .parse::<MatchType>()
                .map_err(|e| ProcessError::Internal(format!("corrupt member row: {e}")))?,
        })
    }
}

/// Multi-row group mutations run inside one transaction; a failure rolls
/// the whole mutation back and the scene stays ungrouped until the next
/// match attempt.
#[derive(Clone)]
pub struct PostgresDuplicateGroupStore {
    pool: PgPool,
}

impl std::fmt::Debug for PostgresDuplicateGroupStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PostgresDuplicateGroupStore").finish_non_exhaustive()
    }
}

impl PostgresDuplicateGroupStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn refresh_member_count(
        tx: &mut Transaction<'_, Postgres>,
        group_id: GroupId,
    ) -> std::result::Result<(), sqlx::Error> {
        sqlx::query(
            r#"
            UPDATE duplicate_groups
            SET member_count = (
                SELECT COUNT(*) FROM duplicate_group_members WHERE group_id = $1
            )
            WHERE id = $1
            "#,
        )
        .bind(group_id.0)
        .execute(&mut **tx)
        .await?;
        Ok(())
    }
}

#[async_trait]
impl DuplicateGroupStore for PostgresDuplicateGroupStore {
    async fn groups_containing(&self, scene_ids: &[SceneId]) -> Result<Vec<DuplicateGroup>> {
        if scene_ids.is_empty() {
            return Ok(Vec::new());
        }
        let raw: Vec<i64> = scene_ids.iter().map(|id| id.0).collect();
        let rows: Vec<GroupRow> = sqlx::query_as(
            r#"
            SELECT DISTINCT g.id, g.status, g.member_count, g.best_scene_id, g.created_at
            FROM duplicate_groups g
            JOIN duplicate_group_members m ON m.group_id = g.id
            WHERE m.scene_id = ANY($1)
            ORDER BY g.id
            "#,
        )
        .bind(&raw)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| map_db_err("failed to find groups for scenes", e))?;
        rows.into_iter().map(DuplicateGroup::try_from).collect()
    }

    async fn members(&self, group_id: GroupId) -> Result<Vec<DuplicateGroupMember>> {
        let rows: Vec<MemberRow> = sqlx::query_as(
            r#"
            SELECT group_id, scene_id, confidence_score, match_type
            FROM duplicate_group_members
            WHERE group_id = $1
            ORDER BY scene_id
            "#,
        )
        .bind(group_id.0)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| map_db_err("failed to list group members", e))?;
        rows.into_iter().map(DuplicateGroupMember::try_from).collect()
    }

    async fn create_group(&self, members: &[NewGroupMember]) -> Result<GroupId> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| map_db_err("failed to open group transaction", e))?;

        let group_id: i64 = sqlx::query_scalar(
            r#"
            INSERT INTO duplicate_groups (status, member_count)
            VALUES ('unresolved', $1)
            RETURNING id
            "#,
        )
        .bind(members.len() as i32)
        .fetch_one(&mut *tx)
        .await
        .map_err(|e| map_db_err("failed to create duplicate group", e))?;

        for member in members {
            sqlx::query(
                r#"
                INSERT INTO duplicate_group_members
                    (group_id, scene_id, confidence_score, match_type)
                VALUES ($1, $2, $3, $4)
                ON CONFLICT (group_id, scene_id) DO NOTHING
                "#,
            )
            .bind(group_id)
            .bind(member.scene_id.0)
            .bind(member.confidence)
            .bind(member.match_type.as_str())
            .execute(&mut *tx)
            .await
            .map_err(|e| map_db_err("failed to insert group member", e))?;
        }

        tx.commit()
            .await
            .map_err(|e| map_db_err("failed to commit group creation", e))?;
        Ok(GroupId(group_id))
    }

    async fn add_member(&self, group_id: GroupId, member: &NewGroupMember) -> Result<bool> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| map_db_err("failed to open group transaction", e))?;

        let result = sqlx::query(
            r#"
            INSERT INTO duplicate_group_members
                (group_id, scene_id, confidence_score, match_type)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (group_id, scene_id) DO NOTHING
            "#,
        )
        .bind(group_id.0)
        .bind(member.scene_id.0)
        .bind(member.confidence)
        .bind(member.match_type.as_str())
        .execute(&mut *tx)
        .await
        .map_err(|e| map_db_err("failed to add group member", e))?;

        let inserted = result.rows_affected() > 0;
        if inserted {
            Self::refresh_member_count(&mut tx, group_id)
                .await
                .map_err(|e| map_db_err("failed to refresh member count", e))?;
        }
        tx.commit()
            .await
            .map_err(|e| map_db_err("failed to commit member addition", e))?;
        Ok(inserted)
    }

    async fn merge_groups(&self, target: GroupId, sources: &[GroupId]) -> Result<()> {
        if sources.is_empty() {
            return Ok(());
        }
        let raw: Vec<i64> = sources.iter().map(|id| id.0).collect();
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| map_db_err("failed to open merge transaction", e))?;

        // Move members not already present in the target, then drop the
        // leftovers along with the source groups.
        sqlx::query(
            r#"
            UPDATE duplicate_group_members m
            SET group_id = $1
            WHERE m.group_id = ANY($2)
              AND NOT EXISTS (
                  SELECT 1 FROM duplicate_group_members t
                  WHERE t.group_id = $1 AND t.scene_id = m.scene_id
              )
            "#,
        )
        .bind(target.0)
        .bind(&raw)
        .execute(&mut *tx)
        .await
        .map_err(|e| map_db_err("failed to move group members", e))?;

        sqlx::query("DELETE FROM duplicate_group_members WHERE group_id = ANY($1)")
            .bind(&raw)
            .execute(&mut *tx)
            .await
            .map_err(|e| map_db_err("failed to clear source members", e))?;

        sqlx::query("DELETE FROM duplicate_groups WHERE id = ANY($1)")
            .bind(&raw)
            .execute(&mut *tx)
            .await
            .map_err(|e| map_db_err("failed to delete source groups", e))?;

        Self::refresh_member_count(&mut tx, target)
            .await
            .map_err(|e| map_db_err("failed to refresh member count", e))?;

        tx.commit()
            .await
            .map_err(|e| map_db_err("failed to commit group merge", e))?;
        Ok(())
    }

    async fn set_best_scene(&self, group_id: GroupId, best: SceneId) -> Result<()> {
        let result = sqlx::query("UPDATE duplicate_groups SET best_scene_id = $2 WHERE id = $1")
            .bind(group_id.0)
            .bind(best.0)
            .execute(&self.pool)
            .await
            .map_err(|e| map_db_err("failed to set best scene", e))?;
        if result.rows_affected() == 0 {
            return Err(ProcessError::NotFound(format!("group {group_id}")));
        }
        Ok(())
    }
}
