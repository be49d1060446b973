use std::collections::{HashMap, HashSet};

use scenedeck_model::{MatchType, SceneId, SceneMatch};

use crate::config::MatchingConfig;
use crate::matching::confirm::{ConfirmParams, OffsetHit, confirm_offset_hits};
use crate::matching::store::VisualHit;

pub const CHUNK_COUNT: usize = 4;

/// Splits a 64-bit perceptual hash into four 16-bit subhashes, most
/// significant first. A frame within Hamming distance `d` of another
/// shares at least one identical chunk whenever `d < CHUNK_COUNT`, which
/// is what makes the chunked index lookup exhaustive for small
/// distances.
pub fn hash_chunks(hash: u64) -> [u16; CHUNK_COUNT] {
    [
        (hash >> 48) as u16,
        (hash >> 32) as u16,
        (hash >> 16) as u16,
        hash as u16,
    ]
}

pub fn hamming(a: u64, b: u64) -> u32 {
    (a ^ b).count_ones()
}

/// Accumulates candidate frames across the four chunk lookups, verifies
/// each by full Hamming distance, and confirms per-scene matches by
/// frame-offset delta density.
#[derive(Debug)]
pub struct VisualAccumulator {
    query_hashes: Vec<u64>,
    /// Query frame indexes keyed by chunk value, one map per chunk slot.
    by_chunk: [HashMap<u16, Vec<usize>>; CHUNK_COUNT],
    /// `(scene, query_frame, candidate_frame)` pairs already counted, so
    /// a frame pair matching on several chunks is not double-counted.
    seen: HashSet<(SceneId, i64, i64)>,
    per_scene: HashMap<SceneId, Vec<OffsetHit>>,
}

impl VisualAccumulator {
    pub fn new(query_hashes: &[u64]) -> Self {
        let mut by_chunk: [HashMap<u16, Vec<usize>>; CHUNK_COUNT] = Default::default();
        for (frame, hash) in query_hashes.iter().enumerate() {
            for (idx, chunk) in hash_chunks(*hash).into_iter().enumerate() {
                by_chunk[idx].entry(chunk).or_default().push(frame);
            }
        }
        Self {
            query_hashes: query_hashes.to_vec(),
            by_chunk,
            seen: HashSet::new(),
            per_scene: HashMap::new(),
        }
    }

    /// Chunk values to feed the store lookup for `chunk_idx`.
    pub fn chunk_values(&self, chunk_idx: usize) -> Vec<u16> {
        self.by_chunk[chunk_idx].keys().copied().collect()
    }

    /// Folds one chunk lookup's hits in, re-verifying every candidate by
    /// full 64-bit Hamming distance.
    pub fn absorb(
        &mut self,
        chunk_idx: usize,
        hits: &[VisualHit],
        query_scene: SceneId,
        hamming_max: u32,
    ) {
        for hit in hits {
            if hit.scene_id == query_scene {
                continue;
            }
            let hit_chunk = hash_chunks(hit.full_hash)[chunk_idx];
            let Some(frames) = self.by_chunk[chunk_idx].get(&hit_chunk) else {
                continue;
            };
            for &frame in frames {
                if hamming(self.query_hashes[frame], hit.full_hash) > hamming_max {
                    continue;
                }
                let key = (hit.scene_id, frame as i64, hit.frame_offset);
                if !self.seen.insert(key) {
                    continue;
                }
                self.per_scene
                    .entry(hit.scene_id)
                    .or_default()
                    .push(OffsetHit {
                        delta: frame as i64 - hit.frame_offset,
                        query_offset: frame as i64,
                    });
            }
        }
    }

    pub fn finish(self, config: &MatchingConfig) -> Vec<SceneMatch> {
        let params = ConfirmParams {
            min_hits: config.visual_min_frames,
            density_threshold: config.density_threshold,
            delta_tolerance: config.delta_tolerance,
            min_span: config.visual_min_span,
        };
        let mut matches: Vec<SceneMatch> = self
            .per_scene
            .into_iter()
            .filter_map(|(scene_id, offset_hits)| {
                confirm_offset_hits(&offset_hits, &params).map(|confidence| SceneMatch {
                    scene_id,
                    confidence,
                    match_type: MatchType::Visual,
                })
            })
            .collect();
        matches.sort_by(|a, b| {
            b.confidence
                .partial_cmp(&a.confidence)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then(a.scene_id.cmp(&b.scene_id))
        });
        matches
    }
}
