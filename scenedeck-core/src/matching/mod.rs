pub mod audio;
pub mod bloom;
pub mod confirm;
pub mod engine;
pub mod groups;
pub mod score;
pub mod store;
pub mod visual;

pub use bloom::{BloomFilter, BloomFilterManager};
pub use engine::MatchingEngine;
pub use groups::{DuplicateGroupStore, NewGroupMember};
pub use score::score_scene;
pub use store::{AudioHit, FingerprintStore, VisualHit, widen_audio_hash};
