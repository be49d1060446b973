use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio::sync::Mutex;
use tracing::{info, warn};

use crate::config::BloomConfig;
use crate::error::{ProcessError, Result};
use crate::matching::store::FingerprintStore;

const SNAPSHOT_MAGIC: &[u8; 4] = b"SDBF";
const SNAPSHOT_VERSION: u16 = 1;

/// File name of the persisted snapshot inside the data directory.
pub const SNAPSHOT_FILE: &str = "bloom_filter.dat";

/// Deterministic 64-bit mixer (splitmix64). The filter must hash
/// identically across process restarts or a reloaded snapshot would
/// produce false negatives, so no per-process keyed hasher can be used
/// here.
fn mix64(mut x: u64) -> u64 {
    x = x.wrapping_add(0x9e37_79b9_7f4a_7c15);
    x = (x ^ (x >> 30)).wrapping_mul(0xbf58_476d_1ce4_e5b9);
    x = (x ^ (x >> 27)).wrapping_mul(0x94d0_49bb_1331_11eb);
    x ^ (x >> 31)
}

/// Classical k-hash Bloom filter over 64-bit fingerprint hashes.
#[derive(Debug, Clone, PartialEq)]
pub struct BloomFilter {
    k: u32,
    num_bits: u64,
    bits: Vec<u64>,
}

impl BloomFilter {
    /// Sizes the filter for `capacity` items at the given false-positive
    /// rate: `m = -n*ln(p)/ln(2)^2`, `k = m/n * ln(2)`.
    pub fn with_capacity(capacity: usize, false_positive_rate: f64) -> Self {
        let n = capacity.max(1) as f64;
        let p = false_positive_rate.clamp(1e-9, 0.5);
        let ln2 = std::f64::consts::LN_2;
        let m = (-(n * p.ln()) / (ln2 * ln2)).ceil().max(64.0) as u64;
        let k = ((m as f64 / n) * ln2).round().max(1.0) as u32;
        Self {
            k,
            num_bits: m,
            bits: vec![0u64; m.div_ceil(64) as usize],
        }
    }

    fn bit_positions(&self, hash: u64) -> impl Iterator<Item = u64> + '_ {
        // Double hashing; h2 is forced odd so the probe sequence covers
        // the table.
        let h1 = mix64(hash);
        let h2 = mix64(hash ^ 0xa076_1d64_78bd_642f) | 1;
        (0..self.k as u64).map(move |i| h1.wrapping_add(i.wrapping_mul(h2)) % self.num_bits)
    }

    pub fn insert(&mut self, hash: u64) {
        let positions: Vec<u64> = self.bit_positions(hash).collect();
        for pos in positions {
            self.bits[(pos / 64) as usize] |= 1u64 << (pos % 64);
        }
    }

    pub fn may_contain(&self, hash: u64) -> bool {
        self.bit_positions(hash)
            .all(|pos| self.bits[(pos / 64) as usize] & (1u64 << (pos % 64)) != 0)
    }

    /// Length-prefixed binary snapshot: magic, version, k, bit count,
    /// word count, then the bit words little-endian.
    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(26 + self.bits.len() * 8);
        out.extend_from_slice(SNAPSHOT_MAGIC);
        out.extend_from_slice(&SNAPSHOT_VERSION.to_le_bytes());
        out.extend_from_slice(&self.k.to_le_bytes());
        out.extend_from_slice(&self.num_bits.to_le_bytes());
        out.extend_from_slice(&(self.bits.len() as u64).to_le_bytes());
        for word in &self.bits {
            out.extend_from_slice(&word.to_le_bytes());
        }
        out
    }

    pub fn decode(bytes: &[u8]) -> Result<Self> {
        let err = |msg: &str| ProcessError::Validation(format!("bloom snapshot: {msg}"));
        if bytes.len() < 26 {
            return Err(err("truncated header"));
        }
        if &bytes[0..4] != SNAPSHOT_MAGIC {
            return Err(err("bad magic"));
        }
        let version = u16::from_le_bytes(bytes[4..6].try_into().expect("sliced"));
        if version != SNAPSHOT_VERSION {
            return Err(err(&format!("unsupported version {version}")));
        }
        let k = u32::from_le_bytes(bytes[6..10].try_into().expect("sliced"));
        let num_bits = u64::from_le_bytes(bytes[10..18].try_into().expect("sliced"));
        let word_count = u64::from_le_bytes(bytes[18..26].try_into().expect("sliced")) as usize;
        if k == 0 || num_bits == 0 || word_count != num_bits.div_ceil(64) as usize {
            return Err(err("inconsistent parameters"));
        }
        let body = &bytes[26..];
        if body.len() != word_count * 8 {
            return Err(err("truncated body"));
        }
        let bits = body
            .chunks_exact(8)
            .map(|chunk| u64::from_le_bytes(chunk.try_into().expect("chunked")))
            .collect();
        Ok(Self { k, num_bits, bits })
    }
}

/// Owns the persisted pre-screen filter. All mutation happens under one
/// mutex and every batch ends with an atomic snapshot rewrite, so the
/// file on disk is always a complete filter.
pub struct BloomFilterManager {
    path: PathBuf,
    inner: Mutex<BloomFilter>,
}

impl std::fmt::Debug for BloomFilterManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BloomFilterManager")
            .field("path", &self.path)
            .finish_non_exhaustive()
    }
}

impl BloomFilterManager {
    /// Uses the snapshot when it decodes cleanly; otherwise rebuilds
    /// from every hash in the fingerprint store and persists the result.
    pub async fn load_or_rebuild(
        data_dir: &Path,
        config: &BloomConfig,
        store: &dyn FingerprintStore,
    ) -> Result<Arc<Self>> {
        let path = data_dir.join(SNAPSHOT_FILE);
        if let Ok(bytes) = std::fs::read(&path) {
            match BloomFilter::decode(&bytes) {
                Ok(filter) => {
                    info!(path = %path.display(), "bloom snapshot loaded");
                    return Ok(Arc::new(Self {
                        path,
                        inner: Mutex::new(filter),
                    }));
                }
                Err(e) => {
                    warn!(path = %path.display(), "bloom snapshot unusable, rebuilding: {e}");
                }
            }
        }

        let hashes = store.all_hashes().await?;
        let capacity = if hashes.is_empty() {
            config.target_capacity
        } else {
            hashes.len().max(config.min_rebuild_capacity)
        };
        let mut filter = BloomFilter::with_capacity(capacity, config.false_positive_rate);
        for hash in &hashes {
            filter.insert(*hash);
        }
        info!(
            hashes = hashes.len(),
            capacity, "bloom filter rebuilt from fingerprint store"
        );

        let manager = Self {
            path,
            inner: Mutex::new(filter),
        };
        manager.persist(&*manager.inner.lock().await)?;
        Ok(Arc::new(manager))
    }

    pub async fn add_hashes(&self, hashes: &[u64]) -> Result<()> {
        if hashes.is_empty() {
            return Ok(());
        }
        let mut filter = self.inner.lock().await;
        for hash in hashes {
            filter.insert(*hash);
        }
        self.persist(&filter)
    }

    /// True when any of the hashes may be present. False positives are
    /// expected; callers confirm against the exact store.
    pub async fn may_contain_any(&self, hashes: &[u64]) -> bool {
        let filter = self.inner.lock().await;
        hashes.iter().any(|hash| filter.may_contain(*hash))
    }

    /// Temp-file-then-rename so a crash mid-write never truncates the
    /// authoritative snapshot.
    fn persist(&self, filter: &BloomFilter) -> Result<()> {
        let dir = self
            .path
            .parent()
            .ok_or_else(|| ProcessError::Internal("bloom snapshot path has no parent".into()))?;
        std::fs::create_dir_all(dir)?;
        let mut tmp = tempfile::NamedTempFile::new_in(dir)?;
        tmp.write_all(&filter.encode())?;
        tmp.flush()?;
        tmp.persist(&self.path)
            .map_err(|e| ProcessError::Internal(format!("bloom snapshot rename failed: {e}")))?;
        Ok(())
    }
}
