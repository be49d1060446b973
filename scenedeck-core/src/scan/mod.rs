use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use scenedeck_model::{
    EventKind, Phase, ProcessingEvent, ScanId, ScanRecord, ScanStatus, StoragePath,
};
use serde_json::json;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use walkdir::WalkDir;

use crate::catalog::{NewScene, ScanHistoryStore, SceneStore, StoragePathStore};
use crate::error::{ProcessError, Result};
use crate::events::EventBus;
use crate::jobs::JobSubmitter;

/// Progress events fire on whichever comes first.
const PROGRESS_EVERY_FILES: i64 = 100;
const PROGRESS_EVERY: Duration = Duration::from_secs(2);

const VIDEO_EXTENSIONS: &[&str] = &[
    "mp4", "mkv", "avi", "mov", "webm", "flv", "wmv", "m4v", "mpg", "mpeg", "ts", "m2ts",
];

fn is_video_file(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| {
            let lowered = ext.to_ascii_lowercase();
            VIDEO_EXTENSIONS.contains(&lowered.as_str())
        })
}

#[derive(Debug)]
struct ActiveScan {
    id: ScanId,
    cancel: CancellationToken,
}

/// Walks the configured storage roots, creates scene rows for new video
/// files and submits their first processing phase.
///
/// Scans always run on a background task spawned here, never inside a
/// request context, so an HTTP disconnect cannot abort one. At most one
/// scan runs at a time.
pub struct ScanOrchestrator {
    scenes: Arc<dyn SceneStore>,
    storage_paths: Arc<dyn StoragePathStore>,
    scan_history: Arc<dyn ScanHistoryStore>,
    submitter: Arc<dyn JobSubmitter>,
    events: Arc<EventBus>,
    current: parking_lot::Mutex<Option<ActiveScan>>,
}

impl std::fmt::Debug for ScanOrchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScanOrchestrator").finish_non_exhaustive()
    }
}

impl ScanOrchestrator {
    pub fn new(
        scenes: Arc<dyn SceneStore>,
        storage_paths: Arc<dyn StoragePathStore>,
        scan_history: Arc<dyn ScanHistoryStore>,
        submitter: Arc<dyn JobSubmitter>,
        events: Arc<EventBus>,
    ) -> Self {
        Self {
            scenes,
            storage_paths,
            scan_history,
            submitter,
            events,
            current: parking_lot::Mutex::new(None),
        }
    }

    /// Startup recovery: scans left running by a previous process are
    /// reclassified as failed.
    pub async fn recover_interrupted(&self) -> Result<u64> {
        let recovered = self.scan_history.mark_running_as_failed().await?;
        if recovered > 0 {
            warn!(count = recovered, "reclassified interrupted scans as failed");
        }
        Ok(recovered)
    }

    pub async fn start_scan(self: &Arc<Self>) -> Result<ScanId> {
        let record = ScanRecord::started();
        let cancel = CancellationToken::new();
        {
            let mut current = self.current.lock();
            if current.as_ref().is_some_and(|scan| !scan.cancel.is_cancelled()) {
                return Err(ProcessError::Conflict("a scan is already running".into()));
            }
            *current = Some(ActiveScan {
                id: record.id,
                cancel: cancel.clone(),
            });
        }

        self.scan_history.insert(&record).await?;
        self.events.publish(ProcessingEvent::global(
            EventKind::ScanStarted,
            json!({ "scanId": record.id }),
        ));

        let orchestrator = Arc::clone(self);
        let scan_id = record.id;
        tokio::spawn(async move {
            orchestrator.run_scan(scan_id, cancel).await;
            orchestrator.current.lock().take();
        });
        Ok(scan_id)
    }

    /// Cancels the scan if it is the one currently running.
    pub fn cancel_scan(&self, id: ScanId) -> bool {
        let current = self.current.lock();
        match current.as_ref() {
            Some(scan) if scan.id == id && !scan.cancel.is_cancelled() => {
                scan.cancel.cancel();
                true
            }
            _ => false,
        }
    }

    async fn run_scan(&self, scan_id: ScanId, cancel: CancellationToken) {
        let mut progress = ScanProgress::new(scan_id);
        let status = match self.walk_roots(scan_id, &cancel, &mut progress).await {
            Ok(()) if cancel.is_cancelled() => ScanStatus::Cancelled,
            Ok(()) => ScanStatus::Completed,
            Err(e) => {
                warn!(scan = %scan_id, "scan failed: {e}");
                progress.error = Some(e.to_string());
                ScanStatus::Failed
            }
        };

        if let Err(e) = self
            .scan_history
            .finish(
                scan_id,
                status,
                progress.files_seen,
                progress.videos_added,
                progress.error.as_deref(),
            )
            .await
        {
            warn!(scan = %scan_id, "failed to persist scan result: {e}");
        }

        let kind = match status {
            ScanStatus::Completed => EventKind::ScanCompleted,
            ScanStatus::Cancelled => EventKind::ScanCancelled,
            _ => EventKind::ScanFailed,
        };
        self.events.publish(ProcessingEvent::global(
            kind,
            json!({
                "scanId": scan_id,
                "filesSeen": progress.files_seen,
                "videosAdded": progress.videos_added,
                "error": progress.error,
            }),
        ));
        info!(
            scan = %scan_id,
            %status,
            files = progress.files_seen,
            added = progress.videos_added,
            "scan finished"
        );
    }

    async fn walk_roots(
        &self,
        scan_id: ScanId,
        cancel: &CancellationToken,
        progress: &mut ScanProgress,
    ) -> Result<()> {
        let roots = self.storage_paths.list_enabled().await?;
        for root in roots {
            if cancel.is_cancelled() {
                return Ok(());
            }
            self.walk_root(scan_id, &root, cancel, progress).await?;
        }
        Ok(())
    }

    async fn walk_root(
        &self,
        scan_id: ScanId,
        root: &StoragePath,
        cancel: &CancellationToken,
        progress: &mut ScanProgress,
    ) -> Result<()> {
        let known = self.scenes.known_paths(root.id).await?;
        let files = collect_video_files(root.root.clone()).await?;

        for path in files {
            if cancel.is_cancelled() {
                return Ok(());
            }
            progress.files_seen += 1;

            if !known.contains(&path) {
                let title = path
                    .file_stem()
                    .map(|stem| stem.to_string_lossy().into_owned())
                    .unwrap_or_else(|| path.to_string_lossy().into_owned());
                let scene = self
                    .scenes
                    .create(NewScene {
                        title,
                        stored_path: path,
                        storage_path_id: root.id,
                    })
                    .await?;
                progress.videos_added += 1;

                match self
                    .submitter
                    .submit_phase(scene.id, Phase::Metadata, 0, None)
                    .await
                {
                    Ok(_) => {}
                    // Another submitter beat the scan to it; the scene
                    // is already queued.
                    Err(e) if e.is_conflict() => {}
                    Err(e) => warn!(scene = %scene.id, "metadata submit failed: {e}"),
                }
                self.events.publish(ProcessingEvent::new(
                    EventKind::ScanVideoAdded,
                    scene.id,
                    json!({
                        "scanId": scan_id,
                        "title": scene.title,
                        "path": scene.stored_path,
                    }),
                ));
            }

            if progress.due() {
                self.events.publish(progress.event());
            }
        }
        Ok(())
    }
}

/// Walks one root on the blocking pool; walkdir is synchronous.
async fn collect_video_files(root: PathBuf) -> Result<Vec<PathBuf>> {
    tokio::task::spawn_blocking(move || {
        let mut files = Vec::new();
        for entry in WalkDir::new(&root).follow_links(false) {
            match entry {
                Ok(entry) if entry.file_type().is_file() && is_video_file(entry.path()) => {
                    files.push(entry.into_path());
                }
                Ok(_) => {}
                Err(e) => warn!(root = %root.display(), "walk error: {e}"),
            }
        }
        files.sort();
        files
    })
    .await
    .map_err(|e| ProcessError::Internal(format!("directory walk task failed: {e}")))
}

struct ScanProgress {
    scan_id: ScanId,
    files_seen: i64,
    videos_added: i64,
    error: Option<String>,
    last_emit: Instant,
    files_at_last_emit: i64,
}

impl ScanProgress {
    fn new(scan_id: ScanId) -> Self {
        Self {
            scan_id,
            files_seen: 0,
            videos_added: 0,
            error: None,
            last_emit: Instant::now(),
            files_at_last_emit: 0,
        }
    }

    fn due(&mut self) -> bool {
        if self.files_seen - self.files_at_last_emit >= PROGRESS_EVERY_FILES
            || self.last_emit.elapsed() >= PROGRESS_EVERY
        {
            self.last_emit = Instant::now();
            self.files_at_last_emit = self.files_seen;
            true
        } else {
            false
        }
    }

    fn event(&self) -> ProcessingEvent {
        ProcessingEvent::global(
            EventKind::ScanProgress,
            json!({
                "scanId": self.scan_id,
                "filesSeen": self.files_seen,
                "videosAdded": self.videos_added,
            }),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{
        MemoryScanHistoryStore, MemorySceneStore, RecordingSubmitter, StaticStoragePathStore,
    };
    use scenedeck_model::StoragePathId;

    #[test]
    fn video_extension_filter_is_case_insensitive() {
        assert!(is_video_file(Path::new("/media/a.MP4")));
        assert!(is_video_file(Path::new("/media/b.mkv")));
        assert!(!is_video_file(Path::new("/media/notes.txt")));
        assert!(!is_video_file(Path::new("/media/noext")));
    }

    fn orchestrator(
        dir: &Path,
        scenes: Arc<MemorySceneStore>,
        submitter: Arc<RecordingSubmitter>,
        history: Arc<MemoryScanHistoryStore>,
        events: Arc<EventBus>,
    ) -> Arc<ScanOrchestrator> {
        let roots = vec![StoragePath {
            id: StoragePathId(1),
            root: dir.to_path_buf(),
            enabled: true,
        }];
        Arc::new(ScanOrchestrator::new(
            scenes,
            Arc::new(StaticStoragePathStore::new(roots)),
            history,
            submitter,
            events,
        ))
    }

    async fn wait_for_finish(history: &MemoryScanHistoryStore, id: ScanId) -> ScanRecord {
        for _ in 0..200 {
            if let Some(record) = history.get(id)
                && record.status != ScanStatus::Running
            {
                return record;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("scan {id} never finished");
    }

    #[tokio::test]
    async fn scan_discovers_new_videos_and_submits_metadata() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("one.mp4"), b"x").unwrap();
        std::fs::write(dir.path().join("two.mkv"), b"x").unwrap();
        std::fs::write(dir.path().join("skip.txt"), b"x").unwrap();

        let scenes = Arc::new(MemorySceneStore::default());
        let submitter = Arc::new(RecordingSubmitter::default());
        let history = Arc::new(MemoryScanHistoryStore::default());
        let events = Arc::new(EventBus::new());
        let orchestrator = orchestrator(
            dir.path(),
            Arc::clone(&scenes),
            Arc::clone(&submitter),
            Arc::clone(&history),
            events,
        );

        let scan_id = orchestrator.start_scan().await.unwrap();
        let record = wait_for_finish(&history, scan_id).await;

        assert_eq!(record.status, ScanStatus::Completed);
        assert_eq!(record.files_seen, 2);
        assert_eq!(record.videos_added, 2);
        let submissions = submitter.submissions();
        assert_eq!(submissions.len(), 2);
        assert!(submissions.iter().all(|s| s.phase == Phase::Metadata));
    }

    #[tokio::test]
    async fn second_scan_skips_known_files() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("one.mp4"), b"x").unwrap();

        let scenes = Arc::new(MemorySceneStore::default());
        let submitter = Arc::new(RecordingSubmitter::default());
        let history = Arc::new(MemoryScanHistoryStore::default());
        let events = Arc::new(EventBus::new());
        let orchestrator = orchestrator(
            dir.path(),
            Arc::clone(&scenes),
            Arc::clone(&submitter),
            Arc::clone(&history),
            events,
        );

        let first = orchestrator.start_scan().await.unwrap();
        wait_for_finish(&history, first).await;
        let second = orchestrator.start_scan().await.unwrap();
        let record = wait_for_finish(&history, second).await;

        assert_eq!(record.files_seen, 1);
        assert_eq!(record.videos_added, 0);
        assert_eq!(submitter.submissions().len(), 1);
    }

    #[tokio::test]
    async fn concurrent_scan_is_a_conflict() {
        let dir = tempfile::tempdir().unwrap();
        // Enough files that the first scan is still running when the
        // second request lands.
        for i in 0..200 {
            std::fs::write(dir.path().join(format!("f{i}.mp4")), b"x").unwrap();
        }
        let scenes = Arc::new(MemorySceneStore::default());
        let submitter = Arc::new(RecordingSubmitter::default());
        let history = Arc::new(MemoryScanHistoryStore::default());
        let events = Arc::new(EventBus::new());
        let orchestrator = orchestrator(
            dir.path(),
            scenes,
            submitter,
            Arc::clone(&history),
            events,
        );

        let first = orchestrator.start_scan().await.unwrap();
        let second = orchestrator.start_scan().await;
        assert!(matches!(second, Err(ProcessError::Conflict(_))));
        wait_for_finish(&history, first).await;
    }

    #[tokio::test]
    async fn startup_recovery_fails_interrupted_scans() {
        let history = Arc::new(MemoryScanHistoryStore::default());
        let stale = ScanRecord::started();
        history.insert(&stale).await.unwrap();

        let dir = tempfile::tempdir().unwrap();
        let orchestrator = orchestrator(
            dir.path(),
            Arc::new(MemorySceneStore::default()),
            Arc::new(RecordingSubmitter::default()),
            Arc::clone(&history),
            Arc::new(EventBus::new()),
        );
        let recovered = orchestrator.recover_interrupted().await.unwrap();
        assert_eq!(recovered, 1);
        assert_eq!(history.get(stale.id).unwrap().status, ScanStatus::Failed);
    }
}
