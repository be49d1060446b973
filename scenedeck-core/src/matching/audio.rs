use std::collections::HashMap;

use scenedeck_model::{MatchType, SceneId, SceneMatch};

use crate::config::MatchingConfig;
use crate::matching::confirm::{ConfirmParams, OffsetHit, confirm_offset_hits};
use crate::matching::store::AudioHit;

/// Confirms audio matches from raw inverted-index hits. The query's own
/// scene never matches itself.
pub fn confirm_audio_matches(
    query_scene: SceneId,
    query_hashes: &[i32],
    hits: &HashMap<i32, Vec<AudioHit>>,
    config: &MatchingConfig,
) -> Vec<SceneMatch> {
    let mut per_scene: HashMap<SceneId, Vec<OffsetHit>> = HashMap::new();
    for (query_offset, hash) in query_hashes.iter().enumerate() {
        let Some(scene_hits) = hits.get(hash) else {
            continue;
        };
        for hit in scene_hits {
            if hit.scene_id == query_scene {
                continue;
            }
            per_scene.entry(hit.scene_id).or_default().push(OffsetHit {
                delta: query_offset as i64 - hit.offset,
                query_offset: query_offset as i64,
            });
        }
    }

    let params = ConfirmParams {
        min_hits: config.audio_min_hashes,
        density_threshold: config.density_threshold,
        delta_tolerance: config.delta_tolerance,
        min_span: config.audio_min_span,
    };
    let mut matches: Vec<SceneMatch> = per_scene
        .into_iter()
        .filter_map(|(scene_id, offset_hits)| {
            confirm_offset_hits(&offset_hits, &params).map(|confidence| SceneMatch {
                scene_id,
                confidence,
                match_type: MatchType::Audio,
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

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> MatchingConfig {
        MatchingConfig {
            audio_min_hashes: 4,
            audio_min_span: 10,
            ..MatchingConfig::default()
        }
    }

    /// Query hashes 0..n matched one-to-one against scene 2 shifted by
    /// `shift` positions.
    fn shifted_hits(n: i32, shift: i64) -> (Vec<i32>, HashMap<i32, Vec<AudioHit>>) {
        let query: Vec<i32> = (0..n).collect();
        let mut hits = HashMap::new();
        for (i, hash) in query.iter().enumerate() {
            hits.insert(
                *hash,
                vec![AudioHit {
                    scene_id: SceneId(2),
                    offset: i as i64 - shift,
                }],
            );
        }
        (query, hits)
    }

    #[test]
    fn consistent_offset_shift_confirms_a_match() {
        let (query, hits) = shifted_hits(20, 5);
        let matches = confirm_audio_matches(SceneId(1), &query, &hits, &config());
        assert_eq!(matches.len(), 1);
        assert_eq!(matches[0].scene_id, SceneId(2));
        assert_eq!(matches[0].match_type, MatchType::Audio);
        assert!((matches[0].confidence - 1.0).abs() < 1e-9);
    }

    #[test]
    fn own_scene_hits_are_ignored() {
        let query: Vec<i32> = (0..20).collect();
        let mut hits = HashMap::new();
        for (i, hash) in query.iter().enumerate() {
            hits.insert(
                *hash,
                vec![AudioHit {
                    scene_id: SceneId(1),
                    offset: i as i64,
                }],
            );
        }
        let matches = confirm_audio_matches(SceneId(1), &query, &hits, &config());
        assert!(matches.is_empty());
    }

    #[test]
    fn sparse_hits_below_min_hashes_do_not_match() {
        let (query, mut hits) = shifted_hits(20, 5);
        hits.retain(|hash, _| *hash < 3);
        let matches = confirm_audio_matches(SceneId(1), &query, &hits, &config());
        assert!(matches.is_empty());
    }
}
