use std::collections::HashMap;

use async_trait::async_trait;
use scenedeck_model::SceneId;
use sqlx::PgPool;

use crate::database::map_db_err;
use crate::error::{ProcessError, Result};
use crate::matching::store::{AudioHit, FingerprintStore, VisualHit, widen_audio_hash};
use crate::matching::visual::{CHUNK_COUNT, hash_chunks};

/// Postgres-backed fingerprint index. 64-bit visual hashes are stored
/// bit-cast to `BIGINT`; the four 16-bit subhashes are denormalized into
/// indexed columns so the chunked candidate lookup is a plain equality
/// scan.
#[derive(Clone)]
pub struct PostgresFingerprintStore {
    pool: PgPool,
}

impl std::fmt::Debug for PostgresFingerprintStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PostgresFingerprintStore").finish_non_exhaustive()
    }
}

impl PostgresFingerprintStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl FingerprintStore for PostgresFingerprintStore {
    async fn insert_audio(&self, scene_id: SceneId, hashes: &[i32]) -> Result<()> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| map_db_err("failed to open fingerprint transaction", e))?;

        // Idempotent re-ingest: replace the scene's previous rows.
        sqlx::query("DELETE FROM audio_fingerprints WHERE scene_id = $1")
            .bind(scene_id.0)
            .execute(&mut *tx)
            .await
            .map_err(|e| map_db_err("failed to clear audio fingerprints", e))?;

        sqlx::query(
            r#"
            INSERT INTO audio_fingerprints (scene_id, hash, hash_offset)
            SELECT $1, hash, ordinality - 1
            FROM UNNEST($2::int4[]) WITH ORDINALITY AS t(hash, ordinality)
            "#,
        )
        .bind(scene_id.0)
        .bind(hashes)
        .execute(&mut *tx)
        .await
        .map_err(|e| map_db_err("failed to insert audio fingerprints", e))?;

        tx.commit()
            .await
            .map_err(|e| map_db_err("failed to commit audio fingerprints", e))?;
        Ok(())
    }

    async fn insert_visual(&self, scene_id: SceneId, hashes: &[u64]) -> Result<()> {
        let raw: Vec<i64> = hashes.iter().map(|hash| *hash as i64).collect();
        let chunks: [Vec<i32>; CHUNK_COUNT] = {
            let mut columns: [Vec<i32>; CHUNK_COUNT] = Default::default();
            for hash in hashes {
                for (idx, chunk) in hash_chunks(*hash).into_iter().enumerate() {
                    columns[idx].push(i32::from(chunk));
                }
            }
            columns
        };

        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| map_db_err("failed to open fingerprint transaction", e))?;

        sqlx::query("DELETE FROM visual_fingerprints WHERE scene_id = $1")
            .bind(scene_id.0)
            .execute(&mut *tx)
            .await
            .map_err(|e| map_db_err("failed to clear visual fingerprints", e))?;

        sqlx::query(
            r#"
            INSERT INTO visual_fingerprints
                (scene_id, frame_offset, hash, chunk0, chunk1, chunk2, chunk3)
            SELECT $1, ordinality - 1, hash, c0, c1, c2, c3
            FROM UNNEST($2::int8[], $3::int4[], $4::int4[], $5::int4[], $6::int4[])
                WITH ORDINALITY AS t(hash, c0, c1, c2, c3, ordinality)
            "#,
        )
        .bind(scene_id.0)
        .bind(&raw)
        .bind(&chunks[0])
        .bind(&chunks[1])
        .bind(&chunks[2])
        .bind(&chunks[3])
        .execute(&mut *tx)
        .await
        .map_err(|e| map_db_err("failed to insert visual fingerprints", e))?;

        tx.commit()
            .await
            .map_err(|e| map_db_err("failed to commit visual fingerprints", e))?;
        Ok(())
    }

    async fn lookup_audio_filtered(
        &self,
        hashes: &[i32],
        max_scene_freq: usize,
    ) -> Result<HashMap<i32, Vec<AudioHit>>> {
        if hashes.is_empty() {
            return Ok(HashMap::new());
        }
        // The inner query applies the popularity cap so perceptually
        // common hashes never explode the hit set.
        let rows: Vec<(i32, i64, i64)> = sqlx::query_as(
            r#"
            SELECT hash, scene_id, hash_offset
            FROM audio_fingerprints
            WHERE hash = ANY($1)
              AND hash IN (
                  SELECT hash
                  FROM audio_fingerprints
                  WHERE hash = ANY($1)
                  GROUP BY hash
                  HAVING COUNT(DISTINCT scene_id) <= $2
              )
            "#,
        )
        .bind(hashes)
        .bind(max_scene_freq as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| map_db_err("failed to look up audio fingerprints", e))?;

        let mut hits: HashMap<i32, Vec<AudioHit>> = HashMap::new();
        for (hash, scene_id, offset) in rows {
            hits.entry(hash).or_default().push(AudioHit {
                scene_id: SceneId(scene_id),
                offset,
            });
        }
        Ok(hits)
    }

    async fn lookup_visual_chunks(
        &self,
        chunks: &[u16],
        chunk_idx: usize,
    ) -> Result<Vec<VisualHit>> {
        if chunks.is_empty() {
            return Ok(Vec::new());
        }
        if chunk_idx >= CHUNK_COUNT {
            return Err(ProcessError::Validation(format!(
                "chunk index {chunk_idx} out of range"
            )));
        }
        let raw: Vec<i32> = chunks.iter().map(|chunk| i32::from(*chunk)).collect();
        // chunk_idx is validated above; the column name is not
        // attacker-controlled.
        let sql = format!(
            "SELECT scene_id, frame_offset, hash FROM visual_fingerprints \
             WHERE chunk{chunk_idx} = ANY($1)"
        );
        let rows: Vec<(i64, i64, i64)> = sqlx::query_as(&sql)
            .bind(&raw)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| map_db_err("failed to look up visual fingerprints", e))?;
        Ok(rows
            .into_iter()
            .map(|(scene_id, frame_offset, hash)| VisualHit {
                scene_id: SceneId(scene_id),
                frame_offset,
                full_hash: hash as u64,
            })
            .collect())
    }

    async fn delete_scene(&self, scene_id: SceneId) -> Result<()> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| map_db_err("failed to open fingerprint transaction", e))?;
        sqlx::query("DELETE FROM audio_fingerprints WHERE scene_id = $1")
            .bind(scene_id.0)
            .execute(&mut *tx)
            .await
            .map_err(|e| map_db_err("failed to delete audio fingerprints", e))?;
        sqlx::query("DELETE FROM visual_fingerprints WHERE scene_id = $1")
            .bind(scene_id.0)
            .execute(&mut *tx)
            .await
            .map_err(|e| map_db_err("failed to delete visual fingerprints", e))?;
        tx.commit()
            .await
            .map_err(|e| map_db_err("failed to commit fingerprint deletion", e))?;
        Ok(())
    }

    async fn all_hashes(&self) -> Result<Vec<u64>> {
        let audio: Vec<(i32,)> = sqlx::query_as("SELECT DISTINCT hash FROM audio_fingerprints")
            .fetch_all(&self.pool)
            .await
            .map_err(|e| map_db_err("failed to stream audio hashes", e))?;
        let visual: Vec<(i64,)> = sqlx::query_as("SELECT DISTINCT hash FROM visual_fingerprints")
            .fetch_all(&self.pool)
            .await
            .map_err(|e| map_db_err("failed to stream visual hashes", e))?;

        let mut hashes = Vec::with_capacity(audio.len() + visual.len());
        hashes.extend(audio.into_iter().map(|(hash,)| widen_audio_hash(hash)));
        hashes.extend(visual.into_iter().map(|(hash,)| hash as u64));
        Ok(hashes)
    }
}
