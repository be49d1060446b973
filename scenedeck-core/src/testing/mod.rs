//! In-memory store implementations and extractor fakes for unit tests.
//! They mirror the Postgres repositories' observable behavior (duplicate
//! guard, claim ordering, original-error preservation) closely enough to
//! exercise the services against the same contracts.

use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use scenedeck_model::{
    DlqEntry, DlqStats, DlqStatus, DuplicateGroup, DuplicateGroupMember, GroupId, GroupStatus,
    JobId, JobRecord, JobStatus, MatchType, Phase, RetryPolicy, ScanId, ScanRecord, ScanStatus,
    Scene, SceneId, StoragePath, StoragePathId, TriggerConfig,
};
use serde_json::json;
use std::sync::Arc;

use crate::catalog::{NewScene, ScanHistoryStore, SceneMediaInfo, SceneStore, StoragePathStore};
use crate::error::{ProcessError, Result};
use crate::jobs::JobSubmitter;
use crate::jobs::dlq::DlqStore;
use crate::jobs::extract::{ExtractionRequest, Extractor, JobContext, SharedExtractor};
use crate::jobs::history::{JobHistoryStore, JobPage};
use crate::jobs::retry::RetryPolicyStore;
use crate::jobs::triggers::TriggerStore;
use crate::matching::groups::{DuplicateGroupStore, NewGroupMember};
use crate::matching::store::{AudioHit, FingerprintStore, VisualHit, widen_audio_hash};

// ---------------------------------------------------------------------
// Job history

#[derive(Default)]
pub struct MemoryJobStore {
    rows: Mutex<HashMap<JobId, JobRecord>>,
}

impl MemoryJobStore {
    /// Test hook: pretend the job started `ago` in the past.
    pub fn backdate_started_at(&self, job_id: JobId, ago: chrono::Duration) {
        let mut rows = self.rows.lock();
        if let Some(row) = rows.get_mut(&job_id) {
            row.started_at = Some(Utc::now() - ago);
        }
    }

    fn with_row<T>(
        &self,
        job_id: JobId,
        apply: impl FnOnce(&mut JobRecord) -> T,
    ) -> Result<T> {
        let mut rows = self.rows.lock();
        let row = rows
            .get_mut(&job_id)
            .ok_or_else(|| ProcessError::NotFound(format!("job {job_id}")))?;
        Ok(apply(row))
    }
}

fn record_failure(row: &mut JobRecord, message: &str) {
    row.error_message = Some(message.to_string());
    if row.original_error.is_none() {
        row.original_error = Some(message.to_string());
    }
}

#[async_trait]
impl JobHistoryStore for MemoryJobStore {
    async fn create_pending(&self, job: &JobRecord) -> Result<()> {
        let mut rows = self.rows.lock();
        let duplicate = rows.values().any(|row| {
            row.scene_id == job.scene_id
                && row.phase == job.phase
                && matches!(row.status, JobStatus::Pending | JobStatus::Running)
        });
        if duplicate {
            return Err(ProcessError::Conflict(format!(
                "job already pending or running for scene {} phase {}",
                job.scene_id, job.phase
            )));
        }
        rows.insert(job.job_id, job.clone());
        Ok(())
    }

    async fn claim_pending_jobs(&self, phase: Phase, limit: usize) -> Result<Vec<JobRecord>> {
        let now = Utc::now();
        let mut rows = self.rows.lock();
        let mut due: Vec<JobId> = rows
            .values()
            .filter(|row| {
                row.phase == phase
                    && row.status == JobStatus::Pending
                    && row.next_retry_at.is_none_or(|at| at <= now)
            })
            .map(|row| row.job_id)
            .collect();
        due.sort_by_key(|id| {
            let row = &rows[id];
            (std::cmp::Reverse(row.priority), row.created_at)
        });
        due.truncate(limit);

        let mut claimed = Vec::with_capacity(due.len());
        for id in due {
            let row = rows.get_mut(&id).expect("id collected above");
            row.status = JobStatus::Running;
            row.started_at = Some(now);
            row.claimed_at = Some(now);
            claimed.push(row.clone());
        }
        Ok(claimed)
    }

    async fn get(&self, job_id: JobId) -> Result<Option<JobRecord>> {
        Ok(self.rows.lock().get(&job_id).cloned())
    }

    async fn update_status(
        &self,
        job_id: JobId,
        status: JobStatus,
        error_message: Option<&str>,
    ) -> Result<()> {
        self.with_row(job_id, |row| {
            row.status = status;
            if let Some(message) = error_message {
                record_failure(row, message);
            }
            if status.is_terminal() {
                row.finished_at = Some(Utc::now());
            }
            if status == JobStatus::Completed {
                row.progress = 100;
            }
        })
    }

    async fn update_progress(&self, job_id: JobId, progress: i16) -> Result<()> {
        self.with_row(job_id, |row| row.progress = progress.clamp(0, 100))
    }

    async fn update_retry_info(
        &self,
        job_id: JobId,
        retry_count: i32,
        next_retry_at: DateTime<Utc>,
        error_message: &str,
    ) -> Result<()> {
        self.with_row(job_id, |row| {
            row.status = JobStatus::Pending;
            row.retry_count = retry_count;
            row.next_retry_at = Some(next_retry_at);
            row.started_at = None;
            row.claimed_at = None;
            row.finished_at = None;
            record_failure(row, error_message);
        })
    }

    async fn mark_not_retryable(&self, job_id: JobId, error_message: &str) -> Result<()> {
        self.with_row(job_id, |row| {
            row.status = JobStatus::Failed;
            row.is_retryable = false;
            row.finished_at = Some(Utc::now());
            record_failure(row, error_message);
        })
    }

    async fn cancel_pending_job(&self, job_id: JobId) -> Result<()> {
        let mut rows = self.rows.lock();
        let row = rows
            .get_mut(&job_id)
            .ok_or_else(|| ProcessError::NotFound(format!("job {job_id}")))?;
        if row.status != JobStatus::Pending {
            return Err(ProcessError::Conflict(format!(
                "job {job_id} is {} and cannot be cancelled in place",
                row.status
            )));
        }
        row.status = JobStatus::Cancelled;
        row.finished_at = Some(Utc::now());
        Ok(())
    }

    async fn mark_orphaned_running_as_failed(&self, threshold: Duration) -> Result<u64> {
        let cutoff = Utc::now() - chrono::Duration::from_std(threshold).expect("small duration");
        let mut count = 0u64;
        for row in self.rows.lock().values_mut() {
            if row.status == JobStatus::Running
                && row.started_at.is_some_and(|at| at < cutoff)
            {
                row.status = JobStatus::Failed;
                row.finished_at = Some(Utc::now());
                record_failure(row, "orphaned on restart");
                count += 1;
            }
        }
        Ok(count)
    }

    async fn mark_stuck_pending_as_failed(&self, threshold: Duration) -> Result<u64> {
        let cutoff = Utc::now() - chrono::Duration::from_std(threshold).expect("small duration");
        let mut count = 0u64;
        for row in self.rows.lock().values_mut() {
            if row.status == JobStatus::Pending
                && row.created_at < cutoff
                && row.next_retry_at.is_none_or(|at| at < cutoff)
            {
                row.status = JobStatus::Failed;
                row.finished_at = Some(Utc::now());
                record_failure(row, "stuck pending past threshold");
                count += 1;
            }
        }
        Ok(count)
    }

    async fn delete_older_than(&self, cutoff: DateTime<Utc>) -> Result<u64> {
        let mut rows = self.rows.lock();
        let before = rows.len();
        rows.retain(|_, row| {
            !(row.status.is_terminal() && row.finished_at.is_some_and(|at| at < cutoff))
        });
        Ok((before - rows.len()) as u64)
    }

    async fn count_pending_by_phase(&self) -> Result<HashMap<Phase, i64>> {
        let rows = self.rows.lock();
        let mut counts = HashMap::new();
        for row in rows.values() {
            if row.status == JobStatus::Pending {
                *counts.entry(row.phase).or_insert(0) += 1;
            }
        }
        Ok(counts)
    }

    async fn count_recent_failed_by_phase(
        &self,
        since: DateTime<Utc>,
    ) -> Result<HashMap<Phase, i64>> {
        let rows = self.rows.lock();
        let mut counts = HashMap::new();
        for row in rows.values() {
            if row.status == JobStatus::Failed && row.finished_at.is_some_and(|at| at >= since) {
                *counts.entry(row.phase).or_insert(0) += 1;
            }
        }
        Ok(counts)
    }

    async fn list_active(&self) -> Result<Vec<JobRecord>> {
        let rows = self.rows.lock();
        let mut active: Vec<JobRecord> = rows
            .values()
            .filter(|row| row.status == JobStatus::Running)
            .cloned()
            .collect();
        active.sort_by_key(|row| row.started_at);
        Ok(active)
    }

    async fn get_failed_jobs(&self, limit: u32) -> Result<Vec<JobRecord>> {
        let rows = self.rows.lock();
        let mut failed: Vec<JobRecord> = rows
            .values()
            .filter(|row| row.status == JobStatus::Failed)
            .cloned()
            .collect();
        failed.sort_by_key(|row| std::cmp::Reverse(row.finished_at));
        failed.truncate(limit as usize);
        Ok(failed)
    }

    async fn list_all(
        &self,
        page: u32,
        limit: u32,
        status: Option<JobStatus>,
    ) -> Result<JobPage> {
        let rows = self.rows.lock();
        let mut filtered: Vec<JobRecord> = rows
            .values()
            .filter(|row| status.is_none_or(|wanted| row.status == wanted))
            .cloned()
            .collect();
        filtered.sort_by_key(|row| std::cmp::Reverse(row.created_at));
        let total = filtered.len() as i64;
        let start = ((page.max(1) - 1) * limit) as usize;
        let jobs = filtered.into_iter().skip(start).take(limit as usize).collect();
        Ok(JobPage {
            jobs,
            total,
            page,
            limit,
        })
    }

    async fn exists_pending_or_running(&self, scene_id: SceneId, phase: Phase) -> Result<bool> {
        let rows = self.rows.lock();
        Ok(rows.values().any(|row| {
            row.scene_id == scene_id
                && row.phase == phase
                && matches!(row.status, JobStatus::Pending | JobStatus::Running)
        }))
    }
}

// ---------------------------------------------------------------------
// DLQ

#[derive(Default)]
pub struct MemoryDlqStore {
    rows: Mutex<HashMap<JobId, DlqEntry>>,
}

#[async_trait]
impl DlqStore for MemoryDlqStore {
    async fn insert(&self, entry: &DlqEntry) -> Result<()> {
        let mut rows = self.rows.lock();
        match rows.get_mut(&entry.job_id) {
            Some(existing) => {
                let mut updated = entry.clone();
                updated.original_error = existing.original_error.clone();
                updated.created_at = existing.created_at;
                *existing = updated;
            }
            None => {
                rows.insert(entry.job_id, entry.clone());
            }
        }
        Ok(())
    }

    async fn get(&self, job_id: JobId) -> Result<Option<DlqEntry>> {
        Ok(self.rows.lock().get(&job_id).cloned())
    }

    async fn list(&self, status: Option<DlqStatus>, limit: u32) -> Result<Vec<DlqEntry>> {
        let rows = self.rows.lock();
        let mut entries: Vec<DlqEntry> = rows
            .values()
            .filter(|entry| status.is_none_or(|wanted| entry.status == wanted))
            .cloned()
            .collect();
        entries.sort_by_key(|entry| std::cmp::Reverse(entry.created_at));
        entries.truncate(limit as usize);
        Ok(entries)
    }

    async fn update_status(&self, job_id: JobId, status: DlqStatus) -> Result<()> {
        let mut rows = self.rows.lock();
        let entry = rows
            .get_mut(&job_id)
            .ok_or_else(|| ProcessError::NotFound(format!("dlq entry {job_id}")))?;
        entry.status = status;
        Ok(())
    }

    async fn delete(&self, job_id: JobId) -> Result<()> {
        self.rows.lock().remove(&job_id);
        Ok(())
    }

    async fn stats(&self) -> Result<DlqStats> {
        let rows = self.rows.lock();
        let mut stats = DlqStats::default();
        for entry in rows.values() {
            match entry.status {
                DlqStatus::PendingReview => stats.pending_review += 1,
                DlqStatus::Retrying => stats.retrying += 1,
                DlqStatus::Abandoned => stats.abandoned += 1,
            }
        }
        Ok(stats)
    }
}

// ---------------------------------------------------------------------
// Scenes / storage paths / scan history

#[derive(Default)]
pub struct MemorySceneStore {
    scenes: Mutex<HashMap<SceneId, Scene>>,
    next_id: AtomicI64,
}

impl MemorySceneStore {
    pub fn seed(&self, id: SceneId) -> Scene {
        self.seed_with(id, |_| {})
    }

    pub fn seed_with(&self, id: SceneId, customize: impl FnOnce(&mut Scene)) -> Scene {
        let mut scene = Scene {
            id,
            title: format!("scene {}", id.0),
            stored_path: PathBuf::from(format!("/media/{}.mp4", id.0)),
            storage_path_id: StoragePathId(1),
            duration: 60.0,
            width: 1920,
            height: 1080,
            video_codec: "h264".into(),
            bit_rate: 4_000_000,
            thumbnail_width: 320,
            thumbnail_height: 180,
            created_at: Utc::now(),
        };
        customize(&mut scene);
        self.scenes.lock().insert(id, scene.clone());
        scene
    }
}

#[async_trait]
impl SceneStore for MemorySceneStore {
    async fn get(&self, id: SceneId) -> Result<Option<Scene>> {
        Ok(self.scenes.lock().get(&id).cloned())
    }

    async fn get_by_ids(&self, ids: &[SceneId]) -> Result<HashMap<SceneId, Scene>> {
        let scenes = self.scenes.lock();
        Ok(ids
            .iter()
            .filter_map(|id| scenes.get(id).map(|scene| (*id, scene.clone())))
            .collect())
    }

    async fn create(&self, new_scene: NewScene) -> Result<Scene> {
        let id = SceneId(self.next_id.fetch_add(1, Ordering::Relaxed) + 1_000_000);
        let scene = Scene {
            id,
            title: new_scene.title,
            stored_path: new_scene.stored_path,
            storage_path_id: new_scene.storage_path_id,
            duration: 0.0,
            width: 0,
            height: 0,
            video_codec: String::new(),
            bit_rate: 0,
            thumbnail_width: 0,
            thumbnail_height: 0,
            created_at: Utc::now(),
        };
        self.scenes.lock().insert(id, scene.clone());
        Ok(scene)
    }

    async fn known_paths(&self, storage_path_id: StoragePathId) -> Result<HashSet<PathBuf>> {
        let scenes = self.scenes.lock();
        Ok(scenes
            .values()
            .filter(|scene| scene.storage_path_id == storage_path_id)
            .map(|scene| scene.stored_path.clone())
            .collect())
    }

    async fn scenes_needing_phase(&self, _phase: Phase, limit: usize) -> Result<Vec<Scene>> {
        // The double does not track artifact state; every scene counts
        // as needing work.
        let scenes = self.scenes.lock();
        let mut all: Vec<Scene> = scenes.values().cloned().collect();
        all.sort_by_key(|scene| scene.id);
        all.truncate(limit);
        Ok(all)
    }

    async fn update_media_info(&self, id: SceneId, info: &SceneMediaInfo) -> Result<()> {
        let mut scenes = self.scenes.lock();
        let scene = scenes
            .get_mut(&id)
            .ok_or_else(|| ProcessError::NotFound(format!("scene {id}")))?;
        scene.duration = info.duration;
        scene.width = info.width;
        scene.height = info.height;
        scene.video_codec = info.video_codec.clone();
        scene.bit_rate = info.bit_rate;
        Ok(())
    }
}

pub struct StaticStoragePathStore {
    roots: Vec<StoragePath>,
}

impl StaticStoragePathStore {
    pub fn new(roots: Vec<StoragePath>) -> Self {
        Self { roots }
    }
}

#[async_trait]
impl StoragePathStore for StaticStoragePathStore {
    async fn list_enabled(&self) -> Result<Vec<StoragePath>> {
        Ok(self.roots.iter().filter(|root| root.enabled).cloned().collect())
    }
}

#[derive(Default)]
pub struct MemoryScanHistoryStore {
    rows: Mutex<HashMap<ScanId, ScanRecord>>,
}

impl MemoryScanHistoryStore {
    pub fn get(&self, id: ScanId) -> Option<ScanRecord> {
        self.rows.lock().get(&id).cloned()
    }
}

#[async_trait]
impl ScanHistoryStore for MemoryScanHistoryStore {
    async fn insert(&self, record: &ScanRecord) -> Result<()> {
        self.rows.lock().insert(record.id, record.clone());
        Ok(())
    }

    async fn finish(
        &self,
        id: ScanId,
        status: ScanStatus,
        files_seen: i64,
        videos_added: i64,
        error_message: Option<&str>,
    ) -> Result<()> {
        let mut rows = self.rows.lock();
        let record = rows
            .get_mut(&id)
            .ok_or_else(|| ProcessError::NotFound(format!("scan {id}")))?;
        record.status = status;
        record.files_seen = files_seen;
        record.videos_added = videos_added;
        record.error_message = error_message.map(str::to_string);
        record.finished_at = Some(Utc::now());
        Ok(())
    }

    async fn mark_running_as_failed(&self) -> Result<u64> {
        let mut count = 0u64;
        for record in self.rows.lock().values_mut() {
            if record.status == ScanStatus::Running {
                record.status = ScanStatus::Failed;
                record.error_message = Some("interrupted by restart".into());
                record.finished_at = Some(Utc::now());
                count += 1;
            }
        }
        Ok(count)
    }
}

// ---------------------------------------------------------------------
// Policies / triggers

pub struct StaticPolicyStore {
    policies: Vec<RetryPolicy>,
}

impl StaticPolicyStore {
    pub fn new(policies: Vec<RetryPolicy>) -> Self {
        Self { policies }
    }
}

#[async_trait]
impl RetryPolicyStore for StaticPolicyStore {
    async fn list(&self) -> Result<Vec<RetryPolicy>> {
        Ok(self.policies.clone())
    }
}

pub struct StaticTriggerStore {
    configs: Vec<TriggerConfig>,
}

impl StaticTriggerStore {
    pub fn new(configs: Vec<TriggerConfig>) -> Self {
        Self { configs }
    }
}

#[async_trait]
impl TriggerStore for StaticTriggerStore {
    async fn list(&self) -> Result<Vec<TriggerConfig>> {
        Ok(self.configs.clone())
    }
}

// ---------------------------------------------------------------------
// Fingerprints

#[derive(Default)]
pub struct MemoryFingerprintStore {
    audio: Mutex<HashMap<SceneId, Vec<i32>>>,
    visual: Mutex<HashMap<SceneId, Vec<u64>>>,
}

#[async_trait]
impl FingerprintStore for MemoryFingerprintStore {
    async fn insert_audio(&self, scene_id: SceneId, hashes: &[i32]) -> Result<()> {
        self.audio.lock().insert(scene_id, hashes.to_vec());
        Ok(())
    }

    async fn insert_visual(&self, scene_id: SceneId, hashes: &[u64]) -> Result<()> {
        self.visual.lock().insert(scene_id, hashes.to_vec());
        Ok(())
    }

    async fn lookup_audio_filtered(
        &self,
        hashes: &[i32],
        max_scene_freq: usize,
    ) -> Result<HashMap<i32, Vec<AudioHit>>> {
        let audio = self.audio.lock();
        let wanted: HashSet<i32> = hashes.iter().copied().collect();
        let mut hits: HashMap<i32, Vec<AudioHit>> = HashMap::new();
        for (scene_id, stored) in audio.iter() {
            for (offset, hash) in stored.iter().enumerate() {
                if wanted.contains(hash) {
                    hits.entry(*hash).or_default().push(AudioHit {
                        scene_id: *scene_id,
                        offset: offset as i64,
                    });
                }
            }
        }
        // Popularity filter: drop hashes seen in too many scenes.
        hits.retain(|_, scene_hits| {
            let distinct: HashSet<SceneId> =
                scene_hits.iter().map(|hit| hit.scene_id).collect();
            distinct.len() <= max_scene_freq
        });
        Ok(hits)
    }

    async fn lookup_visual_chunks(
        &self,
        chunks: &[u16],
        chunk_idx: usize,
    ) -> Result<Vec<VisualHit>> {
        use crate::matching::visual::hash_chunks;
        let wanted: HashSet<u16> = chunks.iter().copied().collect();
        let visual = self.visual.lock();
        let mut hits = Vec::new();
        for (scene_id, stored) in visual.iter() {
            for (frame_offset, hash) in stored.iter().enumerate() {
                if wanted.contains(&hash_chunks(*hash)[chunk_idx]) {
                    hits.push(VisualHit {
                        scene_id: *scene_id,
                        frame_offset: frame_offset as i64,
                        full_hash: *hash,
                    });
                }
            }
        }
        Ok(hits)
    }

    async fn delete_scene(&self, scene_id: SceneId) -> Result<()> {
        self.audio.lock().remove(&scene_id);
        self.visual.lock().remove(&scene_id);
        Ok(())
    }

    async fn all_hashes(&self) -> Result<Vec<u64>> {
        let mut hashes = Vec::new();
        for stored in self.audio.lock().values() {
            hashes.extend(stored.iter().map(|hash| widen_audio_hash(*hash)));
        }
        for stored in self.visual.lock().values() {
            hashes.extend(stored.iter().copied());
        }
        Ok(hashes)
    }
}

// ---------------------------------------------------------------------
// Duplicate groups

#[derive(Default)]
pub struct MemoryGroupStore {
    groups: Mutex<HashMap<GroupId, DuplicateGroup>>,
    members: Mutex<HashMap<GroupId, Vec<DuplicateGroupMember>>>,
    next_id: AtomicI64,
}

impl MemoryGroupStore {
    pub fn get(&self, id: GroupId) -> Option<DuplicateGroup> {
        self.groups.lock().get(&id).cloned()
    }

    pub fn all_groups(&self) -> Vec<DuplicateGroup> {
        self.groups.lock().values().cloned().collect()
    }

    pub fn set_status(&self, id: GroupId, status: GroupStatus) {
        if let Some(group) = self.groups.lock().get_mut(&id) {
            group.status = status;
        }
    }

    pub fn seed_group(&self, members: &[(SceneId, f64)]) -> GroupId {
        let id = GroupId(self.next_id.fetch_add(1, Ordering::Relaxed) + 1);
        self.groups.lock().insert(
            id,
            DuplicateGroup {
                id,
                status: GroupStatus::Unresolved,
                member_count: members.len() as i32,
                best_scene_id: None,
                created_at: Utc::now(),
            },
        );
        self.members.lock().insert(
            id,
            members
                .iter()
                .map(|(scene_id, confidence)| DuplicateGroupMember {
                    group_id: id,
                    scene_id: *scene_id,
                    confidence_score: *confidence,
                    match_type: MatchType::Visual,
                })
                .collect(),
        );
        id
    }
}

#[async_trait]
impl DuplicateGroupStore for MemoryGroupStore {
    async fn groups_containing(&self, scene_ids: &[SceneId]) -> Result<Vec<DuplicateGroup>> {
        let wanted: HashSet<SceneId> = scene_ids.iter().copied().collect();
        let members = self.members.lock();
        let groups = self.groups.lock();
        let mut found = Vec::new();
        for (group_id, group_members) in members.iter() {
            if group_members.iter().any(|m| wanted.contains(&m.scene_id))
                && let Some(group) = groups.get(group_id)
            {
                found.push(group.clone());
            }
        }
        Ok(found)
    }

    async fn members(&self, group_id: GroupId) -> Result<Vec<DuplicateGroupMember>> {
        Ok(self.members.lock().get(&group_id).cloned().unwrap_or_default())
    }

    async fn create_group(&self, members: &[NewGroupMember]) -> Result<GroupId> {
        let id = GroupId(self.next_id.fetch_add(1, Ordering::Relaxed) + 1);
        self.groups.lock().insert(
            id,
            DuplicateGroup {
                id,
                status: GroupStatus::Unresolved,
                member_count: members.len() as i32,
                best_scene_id: None,
                created_at: Utc::now(),
            },
        );
        self.members.lock().insert(
            id,
            members
                .iter()
                .map(|member| DuplicateGroupMember {
                    group_id: id,
                    scene_id: member.scene_id,
                    confidence_score: member.confidence,
                    match_type: member.match_type,
                })
                .collect(),
        );
        Ok(id)
    }

    async fn add_member(&self, group_id: GroupId, member: &NewGroupMember) -> Result<bool> {
        let mut members = self.members.lock();
        let group_members = members
            .get_mut(&group_id)
            .ok_or_else(|| ProcessError::NotFound(format!("group {group_id}")))?;
        if group_members.iter().any(|m| m.scene_id == member.scene_id) {
            return Ok(false);
        }
        group_members.push(DuplicateGroupMember {
            group_id,
            scene_id: member.scene_id,
            confidence_score: member.confidence,
            match_type: member.match_type,
        });
        let count = group_members.len() as i32;
        drop(members);
        if let Some(group) = self.groups.lock().get_mut(&group_id) {
            group.member_count = count;
        }
        Ok(true)
    }

    async fn merge_groups(&self, target: GroupId, sources: &[GroupId]) -> Result<()> {
        let mut members = self.members.lock();
        let mut moved = Vec::new();
        for source in sources {
            if let Some(source_members) = members.remove(source) {
                moved.extend(source_members);
            }
        }
        let target_members = members
            .get_mut(&target)
            .ok_or_else(|| ProcessError::NotFound(format!("group {target}")))?;
        for mut member in moved {
            if target_members.iter().any(|m| m.scene_id == member.scene_id) {
                continue;
            }
            member.group_id = target;
            target_members.push(member);
        }
        let count = target_members.len() as i32;
        drop(members);

        let mut groups = self.groups.lock();
        for source in sources {
            groups.remove(source);
        }
        if let Some(group) = groups.get_mut(&target) {
            group.member_count = count;
        }
        Ok(())
    }

    async fn set_best_scene(&self, group_id: GroupId, best: SceneId) -> Result<()> {
        let mut groups = self.groups.lock();
        let group = groups
            .get_mut(&group_id)
            .ok_or_else(|| ProcessError::NotFound(format!("group {group_id}")))?;
        group.best_scene_id = Some(best);
        Ok(())
    }
}

// ---------------------------------------------------------------------
// Submitters and extractors

#[derive(Debug, Clone)]
pub struct Submission {
    pub scene_id: SceneId,
    pub phase: Phase,
    pub priority: i32,
    pub force_target: Option<String>,
}

#[derive(Default)]
pub struct RecordingSubmitter {
    submissions: Mutex<Vec<Submission>>,
    fail: AtomicBool,
}

impl RecordingSubmitter {
    pub fn failing() -> Self {
        let submitter = Self::default();
        submitter.fail.store(true, Ordering::Relaxed);
        submitter
    }

    pub fn submissions(&self) -> Vec<Submission> {
        self.submissions.lock().clone()
    }
}

#[async_trait]
impl JobSubmitter for RecordingSubmitter {
    async fn submit_phase(
        &self,
        scene_id: SceneId,
        phase: Phase,
        priority: i32,
        force_target: Option<String>,
    ) -> Result<JobId> {
        if self.fail.load(Ordering::Relaxed) {
            return Err(ProcessError::Internal("submitter unavailable".into()));
        }
        self.submissions.lock().push(Submission {
            scene_id,
            phase,
            priority,
            force_target,
        });
        Ok(JobId::new())
    }
}

struct InstantExtractor;

#[async_trait]
impl Extractor for InstantExtractor {
    async fn execute(
        &self,
        request: &ExtractionRequest,
        ctx: &JobContext,
    ) -> Result<serde_json::Value> {
        ctx.report_progress(100);
        Ok(json!({ "phase": request.phase, "ok": true }))
    }
}

/// Extractor that completes immediately.
pub fn instant_extractor() -> SharedExtractor {
    Arc::new(InstantExtractor)
}

struct FailingExtractor {
    message: String,
}

#[async_trait]
impl Extractor for FailingExtractor {
    async fn execute(
        &self,
        _request: &ExtractionRequest,
        _ctx: &JobContext,
    ) -> Result<serde_json::Value> {
        Err(ProcessError::Internal(self.message.clone()))
    }
}

/// Extractor that always fails with `message`.
pub fn failing_extractor(message: &str) -> SharedExtractor {
    Arc::new(FailingExtractor {
        message: message.to_string(),
    })
}
