use std::sync::Arc;

use scenedeck_model::{GroupId, GroupStatus, MatchType, SceneId, SceneMatch};
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::catalog::SceneStore;
use crate::config::MatchingConfig;
use crate::error::Result;
use crate::matching::audio::confirm_audio_matches;
use crate::matching::bloom::BloomFilterManager;
use crate::matching::groups::{DuplicateGroupStore, NewGroupMember};
use crate::matching::score::score_scene;
use crate::matching::store::{FingerprintStore, widen_audio_hash};
use crate::matching::visual::{CHUNK_COUNT, VisualAccumulator};

/// Fingerprint ingest, candidate lookup and duplicate-group management.
///
/// Group mutation is serialized behind one process-wide mutex: merges
/// read several groups and rewrite membership, and interleaving two of
/// them can split a duplicate cluster across groups. Fingerprint
/// indexing and candidate lookup stay concurrent.
pub struct MatchingEngine {
    store: Arc<dyn FingerprintStore>,
    groups: Arc<dyn DuplicateGroupStore>,
    scenes: Arc<dyn SceneStore>,
    bloom: Arc<BloomFilterManager>,
    config: MatchingConfig,
    process_lock: Mutex<()>,
}

impl std::fmt::Debug for MatchingEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MatchingEngine")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl MatchingEngine {
    pub fn new(
        store: Arc<dyn FingerprintStore>,
        groups: Arc<dyn DuplicateGroupStore>,
        scenes: Arc<dyn SceneStore>,
        bloom: Arc<BloomFilterManager>,
        config: MatchingConfig,
    ) -> Self {
        Self {
            store,
            groups,
            scenes,
            bloom,
            config,
            process_lock: Mutex::new(()),
        }
    }

    /// Indexes a scene's audio fingerprints. Idempotent per scene.
    pub async fn index_audio(&self, scene_id: SceneId, hashes: &[i32]) -> Result<()> {
        if hashes.is_empty() {
            return Ok(());
        }
        self.store.insert_audio(scene_id, hashes).await?;
        let widened: Vec<u64> = hashes.iter().map(|h| widen_audio_hash(*h)).collect();
        self.bloom.add_hashes(&widened).await
    }

    pub async fn index_visual(&self, scene_id: SceneId, hashes: &[u64]) -> Result<()> {
        if hashes.is_empty() {
            return Ok(());
        }
        self.store.insert_visual(scene_id, hashes).await?;
        self.bloom.add_hashes(hashes).await
    }

    pub async fn delete_scene_fingerprints(&self, scene_id: SceneId) -> Result<()> {
        // The bloom filter never forgets; deleted hashes fall out on the
        // next rebuild.
        self.store.delete_scene(scene_id).await
    }

    /// Confirmed audio matches against already-indexed scenes. The
    /// bloom pre-screen skips the exact lookup when no hash can be
    /// present.
    pub async fn find_audio_matches(
        &self,
        scene_id: SceneId,
        hashes: &[i32],
    ) -> Result<Vec<SceneMatch>> {
        if hashes.is_empty() {
            return Ok(Vec::new());
        }
        let widened: Vec<u64> = hashes.iter().map(|h| widen_audio_hash(*h)).collect();
        if !self.bloom.may_contain_any(&widened).await {
            return Ok(Vec::new());
        }
        let hits = self
            .store
            .lookup_audio_filtered(hashes, self.config.audio_max_hash_occurrences)
            .await?;
        Ok(confirm_audio_matches(scene_id, hashes, &hits, &self.config))
    }

    pub async fn find_visual_matches(
        &self,
        scene_id: SceneId,
        hashes: &[u64],
    ) -> Result<Vec<SceneMatch>> {
        if hashes.is_empty() {
            return Ok(Vec::new());
        }
        if !self.bloom.may_contain_any(hashes).await {
            return Ok(Vec::new());
        }
        let mut accumulator = VisualAccumulator::new(hashes);
        for chunk_idx in 0..CHUNK_COUNT {
            let chunk_values = accumulator.chunk_values(chunk_idx);
            let hits = self
                .store
                .lookup_visual_chunks(&chunk_values, chunk_idx)
                .await?;
            accumulator.absorb(chunk_idx, &hits, scene_id, self.config.visual_hamming_max);
        }
        Ok(accumulator.finish(&self.config))
    }

    /// Full ingest path for a freshly fingerprinted scene: match against
    /// the existing index, then index the scene's own hashes, then fold
    /// confirmed matches into duplicate groups. Matching runs before
    /// indexing so the pre-screen still filters scenes with no overlap.
    pub async fn process_scene(
        &self,
        scene_id: SceneId,
        audio_hashes: &[i32],
        visual_hashes: &[u64],
    ) -> Result<Option<GroupId>> {
        let mut matches = self.find_audio_matches(scene_id, audio_hashes).await?;
        matches.extend(self.find_visual_matches(scene_id, visual_hashes).await?);
        let matches = dedupe_matches(matches);

        self.index_audio(scene_id, audio_hashes).await?;
        self.index_visual(scene_id, visual_hashes).await?;

        self.process_matches(scene_id, &matches).await
    }

    /// Folds confirmed matches into group state. Touched unresolved
    /// groups are merged; resolved or dismissed groups are left alone
    /// and a fresh unresolved group is created instead, preserving the
    /// operator's earlier decision.
    pub async fn process_matches(
        &self,
        scene_id: SceneId,
        matches: &[SceneMatch],
    ) -> Result<Option<GroupId>> {
        if matches.is_empty() {
            return Ok(None);
        }
        let _guard = self.process_lock.lock().await;

        let mut touched: Vec<SceneId> = Vec::with_capacity(matches.len() + 1);
        touched.push(scene_id);
        touched.extend(matches.iter().map(|m| m.scene_id));

        let mut unresolved: Vec<_> = self
            .groups
            .groups_containing(&touched)
            .await?
            .into_iter()
            .filter(|group| group.status == GroupStatus::Unresolved)
            .collect();
        unresolved.sort_by_key(|group| group.id);
        unresolved.dedup_by_key(|group| group.id);

        let query_member = NewGroupMember {
            scene_id,
            confidence: 1.0,
            match_type: matches
                .first()
                .map(|m| m.match_type)
                .unwrap_or(MatchType::Visual),
        };

        let group_id = match unresolved.as_slice() {
            [] => {
                let mut members = vec![query_member];
                members.extend(matches.iter().map(|m| NewGroupMember {
                    scene_id: m.scene_id,
                    confidence: m.confidence,
                    match_type: m.match_type,
                }));
                let group_id = self.groups.create_group(&members).await?;
                info!(group = %group_id, scene = %scene_id, members = members.len(),
                    "duplicate group created");
                group_id
            }
            [group] => {
                let group_id = group.id;
                if self.groups.add_member(group_id, &query_member).await? {
                    debug!(group = %group_id, scene = %scene_id, "scene joined duplicate group");
                }
                group_id
            }
            [target, rest @ ..] => {
                let target_id = target.id;
                let sources: Vec<GroupId> = rest.iter().map(|group| group.id).collect();
                self.groups.merge_groups(target_id, &sources).await?;
                self.groups.add_member(target_id, &query_member).await?;
                info!(
                    group = %target_id,
                    merged = sources.len(),
                    scene = %scene_id,
                    "duplicate groups merged"
                );
                target_id
            }
        };

        self.rescore_best(group_id).await?;
        Ok(Some(group_id))
    }

    /// Re-elects the best variant across the group's members. Scene
    /// reads happen outside any group transaction; the data is stable
    /// under the process lock.
    async fn rescore_best(&self, group_id: GroupId) -> Result<()> {
        let members = self.groups.members(group_id).await?;
        let ids: Vec<SceneId> = members.iter().map(|m| m.scene_id).collect();
        let scenes = self.scenes.get_by_ids(&ids).await?;
        let best = scenes
            .values()
            .max_by_key(|scene| score_scene(scene))
            .map(|scene| scene.id);
        if let Some(best) = best {
            self.groups.set_best_scene(group_id, best).await?;
        }
        Ok(())
    }
}

/// Keeps the strongest match per scene when audio and visual both
/// confirmed it, ordered strongest-first.
fn dedupe_matches(mut matches: Vec<SceneMatch>) -> Vec<SceneMatch> {
    matches.sort_by(|a, b| {
        a.scene_id.cmp(&b.scene_id).then(
            b.confidence
                .partial_cmp(&a.confidence)
                .unwrap_or(std::cmp::Ordering::Equal),
        )
    });
    matches.dedup_by_key(|m| m.scene_id);
    matches.sort_by(|a, b| {
        b.confidence
            .partial_cmp(&a.confidence)
            .unwrap_or(std::cmp::Ordering::Equal)
    });
    matches
}
