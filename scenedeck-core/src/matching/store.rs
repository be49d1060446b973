use std::collections::HashMap;

use async_trait::async_trait;
use scenedeck_model::SceneId;

use crate::error::Result;

/// One inverted-index hit for an audio hash.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AudioHit {
    pub scene_id: SceneId,
    /// Position of the hash within the owning scene's sequence.
    pub offset: i64,
}

/// One candidate frame from the chunked visual lookup. Carries the full
/// hash so the caller can verify by Hamming distance.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct VisualHit {
    pub scene_id: SceneId,
    pub frame_offset: i64,
    pub full_hash: u64,
}

/// Audio hashes are 32-bit; the bloom filter works on a single 64-bit
/// domain, so they are widened with a tag bit that keeps them disjoint
/// from visual hashes.
pub fn widen_audio_hash(hash: i32) -> u64 {
    (1u64 << 63) | (hash as u32 as u64)
}

/// The exact fingerprint store (typically a columnar analytics engine).
/// Indexing is idempotent: re-inserting a scene's fingerprints replaces
/// its previous rows.
#[async_trait]
pub trait FingerprintStore: Send + Sync {
    async fn insert_audio(&self, scene_id: SceneId, hashes: &[i32]) -> Result<()>;

    async fn insert_visual(&self, scene_id: SceneId, hashes: &[u64]) -> Result<()>;

    /// Inverted lookup with the popularity filter applied store-side:
    /// hashes indexed for more than `max_scene_freq` scenes return no
    /// hits.
    async fn lookup_audio_filtered(
        &self,
        hashes: &[i32],
        max_scene_freq: usize,
    ) -> Result<HashMap<i32, Vec<AudioHit>>>;

    /// Candidate frames whose 16-bit subhash at `chunk_idx` matches any
    /// of `chunks`.
    async fn lookup_visual_chunks(&self, chunks: &[u16], chunk_idx: usize)
    -> Result<Vec<VisualHit>>;

    async fn delete_scene(&self, scene_id: SceneId) -> Result<()>;

    /// Every stored hash in the widened 64-bit domain, for bloom
    /// rebuilds.
    async fn all_hashes(&self) -> Result<Vec<u64>>;
}
