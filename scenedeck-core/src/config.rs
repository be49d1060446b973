use scenedeck_model::{Phase, RetryPolicy};
use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;

/// Top-level configuration for the processing backplane. Every knob has a
/// default so a bare deployment only needs storage roots and a database.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ProcessingConfig {
    /// Directory for persisted state owned by the core (bloom snapshot).
    pub data_dir: PathBuf,
    pub workers: WorkerCounts,
    /// Capacity of each per-phase worker channel.
    pub queue_capacity: usize,
    pub feeder: FeederConfig,
    /// Finished job rows older than this are swept.
    #[serde(with = "humantime_serde")]
    pub job_history_retention: Duration,
    pub retry_defaults: RetryPolicy,
    pub timeouts: PhaseTimeouts,
    pub bloom: BloomConfig,
    pub matching: MatchingConfig,
}

impl Default for ProcessingConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("./data"),
            workers: WorkerCounts::default(),
            queue_capacity: 1000,
            feeder: FeederConfig::default(),
            job_history_retention: Duration::from_secs(7 * 24 * 3600),
            retry_defaults: RetryPolicy::default(),
            timeouts: PhaseTimeouts::default(),
            bloom: BloomConfig::default(),
            matching: MatchingConfig::default(),
        }
    }
}

/// Fixed worker-pool sizes per phase.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct WorkerCounts {
    pub metadata: usize,
    pub thumbnail: usize,
    pub sprites: usize,
    pub animated_thumbnails: usize,
}

impl Default for WorkerCounts {
    fn default() -> Self {
        Self {
            metadata: 4,
            thumbnail: 4,
            sprites: 2,
            animated_thumbnails: 2,
        }
    }
}

impl WorkerCounts {
    pub fn for_phase(&self, phase: Phase) -> usize {
        match phase {
            Phase::Metadata => self.metadata,
            Phase::Thumbnail => self.thumbnail,
            Phase::Sprites => self.sprites,
            Phase::AnimatedThumbnails => self.animated_thumbnails,
        }
    }
}

/// Settings for the per-phase queue feeder loops.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct FeederConfig {
    #[serde(with = "humantime_serde")]
    pub poll_interval: Duration,
    /// Upper bound on rows claimed per tick.
    pub batch_size: usize,
    /// Claim threshold is `worker_count * buffer_multiplier`.
    pub buffer_multiplier: usize,
    /// Running rows older than this are reclassified as failed at startup.
    #[serde(with = "humantime_serde")]
    pub orphan_timeout: Duration,
    /// Pending rows older than this are reclassified as failed at startup.
    #[serde(with = "humantime_serde")]
    pub stuck_pending_after: Duration,
}

impl Default for FeederConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(2),
            batch_size: 50,
            buffer_multiplier: 10,
            orphan_timeout: Duration::from_secs(30),
            stuck_pending_after: Duration::from_secs(600),
        }
    }
}

/// Per-phase execution deadlines enforced by the worker pools.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PhaseTimeouts {
    #[serde(with = "humantime_serde")]
    pub metadata: Duration,
    #[serde(with = "humantime_serde")]
    pub thumbnail: Duration,
    #[serde(with = "humantime_serde")]
    pub sprites: Duration,
    #[serde(with = "humantime_serde")]
    pub animated_thumbnails: Duration,
}

impl Default for PhaseTimeouts {
    fn default() -> Self {
        Self {
            metadata: Duration::from_secs(120),
            thumbnail: Duration::from_secs(300),
            sprites: Duration::from_secs(1800),
            animated_thumbnails: Duration::from_secs(1800),
        }
    }
}

impl PhaseTimeouts {
    pub fn for_phase(&self, phase: Phase) -> Duration {
        match phase {
            Phase::Metadata => self.metadata,
            Phase::Thumbnail => self.thumbnail,
            Phase::Sprites => self.sprites,
            Phase::AnimatedThumbnails => self.animated_thumbnails,
        }
    }
}

/// Sizing for the fingerprint pre-screen filter.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct BloomConfig {
    /// Capacity used when no fingerprints exist yet.
    pub target_capacity: usize,
    pub false_positive_rate: f64,
    /// Floor applied when rebuilding from an existing fingerprint store.
    pub min_rebuild_capacity: usize,
}

impl Default for BloomConfig {
    fn default() -> Self {
        Self {
            target_capacity: 100_000,
            false_positive_rate: 0.01,
            min_rebuild_capacity: 10_000,
        }
    }
}

/// Thresholds for fingerprint match confirmation. Used when no
/// operator-tuned row overrides them.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct MatchingConfig {
    /// Minimum fraction of hits that must share the dominant offset delta.
    pub density_threshold: f64,
    pub audio_min_hashes: usize,
    /// Hashes seen in more scenes than this are skipped store-side.
    pub audio_max_hash_occurrences: usize,
    pub audio_min_span: i64,
    pub visual_hamming_max: u32,
    pub visual_min_frames: usize,
    pub visual_min_span: i64,
    pub delta_tolerance: i64,
}

impl Default for MatchingConfig {
    fn default() -> Self {
        Self {
            density_threshold: 0.50,
            audio_min_hashes: 80,
            audio_max_hash_occurrences: 10,
            audio_min_span: 160,
            visual_hamming_max: 5,
            visual_min_frames: 20,
            visual_min_span: 30,
            delta_tolerance: 2,
        }
    }
}

/// Serde helpers so durations read as `"2s"` / `"10m"` in config files.
mod humantime_serde {
    use serde::{Deserialize, Deserializer};
    use std::time::Duration;

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw = String::deserialize(deserializer)?;
        humantime::parse_duration(&raw).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_values() {
        let config = ProcessingConfig::default();
        assert_eq!(config.workers.metadata, 4);
        assert_eq!(config.workers.sprites, 2);
        assert_eq!(config.queue_capacity, 1000);
        assert_eq!(config.feeder.poll_interval, Duration::from_secs(2));
        assert_eq!(config.feeder.batch_size, 50);
        assert_eq!(config.feeder.buffer_multiplier, 10);
        assert_eq!(config.matching.audio_min_hashes, 80);
        assert_eq!(config.matching.visual_hamming_max, 5);
    }

    #[test]
    fn durations_parse_from_humantime_strings() {
        let feeder: FeederConfig =
            serde_json::from_str(r#"{"poll_interval": "5s", "batch_size": 10}"#).unwrap();
        assert_eq!(feeder.poll_interval, Duration::from_secs(5));
        assert_eq!(feeder.batch_size, 10);
        assert_eq!(feeder.buffer_multiplier, 10);
    }
}
