use std::{
    fs::Metadata,
    io::ErrorKind,
    path::{Path, PathBuf},
    sync::{Arc, Mutex},
    time::{Duration, SystemTime},
};

use chrono::{DateTime, Utc};
use itertools::Itertools;
use rand::{Rng, distributions::Alphanumeric, thread_rng};
use serde::Serialize;
use tokio::fs;

use crate::{
    constants::WORKSPACE_PREFIX,
    core::{domain::Language, errors::ExecutionError, tracker::ArtifactTracker},
};

/// Scratch directory owned by exactly one in-flight execution.
///
/// Every file written or produced inside it is tracked, and all of them are
/// removed when the workspace is released. A workspace that is dropped
/// without being released (panic, cancelled task) cleans up after itself.
#[derive(Debug)]
pub struct Workspace {
    id: String,
    language: Language,
    root: PathBuf,
    created_at: DateTime<Utc>,
    files: Mutex<Vec<PathBuf>>,
    tracker: Arc<ArtifactTracker>,
    destroyed: bool,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ReleaseReport {
    pub deleted: usize,
    pub errors: usize,
}

impl Workspace {
    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn language(&self) -> &Language {
        &self.language
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn path(&self, file_name: &str) -> PathBuf {
        self.root.join(file_name)
    }

    /// Tracked files in creation order.
    pub fn files(&self) -> Vec<PathBuf> {
        self.files
            .lock()
            .map(|files| files.clone())
            .unwrap_or_default()
    }

    pub async fn write_file(&self, file_name: &str, contents: &str) -> Result<PathBuf, ExecutionError> {
        let path = self.path(file_name);
        fs::write(&path, contents).await.map_err(|e| ExecutionError::Filesystem {
            msg: format!("failed to write {}: {}", path.display(), e),
        })?;
        self.track(&path);
        Ok(path)
    }

    /// Registers a file that a subprocess produced inside the workspace.
    pub fn track(&self, path: &Path) {
        let Ok(mut files) = self.files.lock() else {
            return;
        };
        if files.iter().any(|tracked| tracked == path) {
            return;
        }
        files.push(path.to_path_buf());
        self.tracker.record_created(path);
    }

    pub async fn track_if_exists(&self, path: &Path) -> bool {
        if fs::try_exists(path).await.unwrap_or(false) {
            self.track(path);
            true
        } else {
            false
        }
    }

    fn destroy(&mut self) -> ReleaseReport {
        let mut report = ReleaseReport::default();
        if self.destroyed {
            return report;
        }
        self.destroyed = true;

        let files = self
            .files
            .get_mut()
            .map(std::mem::take)
            .unwrap_or_default();

        for path in files {
            match std::fs::remove_file(&path) {
                Ok(()) => {
                    self.tracker.record_deleted(&path);
                    report.deleted += 1;
                }
                Err(e) if e.kind() == ErrorKind::NotFound => self.tracker.forget(&path),
                Err(e) => {
                    self.tracker.record_cleanup_error(&path, &e);
                    report.errors += 1;
                }
            }
        }

        // Anything a toolchain left behind without being tracked goes with the directory.
        match std::fs::remove_dir_all(&self.root) {
            Ok(()) => {}
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) => {
                self.tracker.record_cleanup_error(&self.root, &e);
                report.errors += 1;
            }
        }

        report
    }
}

impl Drop for Workspace {
    fn drop(&mut self) {
        if !self.destroyed {
            tracing::warn!(workspace = %self.id, "Workspace dropped without release, cleaning up");
            self.destroy();
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct SweepReport {
    pub deleted: usize,
    pub errors: usize,
    pub retained: usize,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CleanupStats {
    pub total_files_created: u64,
    pub total_files_deleted: u64,
    pub total_cleanup_errors: u64,
    pub last_cleanup: Option<DateTime<Utc>>,
    pub current_temp_files: usize,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TempFileDetails {
    pub name: String,
    pub size: u64,
    pub modified: Option<DateTime<Utc>>,
    pub age_ms: u64,
}

/// Allocates workspaces under one shared temp root and sweeps stale entries
/// out of it.
#[derive(Debug)]
pub struct WorkspaceManager {
    temp_root: PathBuf,
    tracker: Arc<ArtifactTracker>,
}

impl WorkspaceManager {
    pub fn new<T: AsRef<Path>>(temp_root: T, tracker: Arc<ArtifactTracker>) -> Self {
        Self {
            temp_root: temp_root.as_ref().into(),
            tracker,
        }
    }

    pub fn temp_root(&self) -> &Path {
        &self.temp_root
    }

    pub fn tracker(&self) -> &Arc<ArtifactTracker> {
        &self.tracker
    }

    #[tracing::instrument(skip(self))]
    pub async fn acquire(&self, language: &Language) -> Result<Workspace, ExecutionError> {
        fs::create_dir_all(&self.temp_root)
            .await
            .map_err(|e| ExecutionError::Filesystem {
                msg: format!(
                    "failed to create temp root {}: {}",
                    self.temp_root.display(),
                    e
                ),
            })?;

        let id = workspace_token();
        let root = self.temp_root.join(&id);
        // create_dir rather than create_dir_all: an existing path means a collision.
        fs::create_dir(&root)
            .await
            .map_err(|e| ExecutionError::Filesystem {
                msg: format!("failed to create workspace {}: {}", root.display(), e),
            })?;

        tracing::debug!(workspace = %id, "Workspace acquired");

        Ok(Workspace {
            id,
            language: language.clone(),
            root,
            created_at: Utc::now(),
            files: Mutex::new(Vec::new()),
            tracker: self.tracker.clone(),
            destroyed: false,
        })
    }

    /// Deletes every file of the workspace on the blocking pool. Failures are
    /// logged and counted, never returned.
    pub async fn release(&self, mut workspace: Workspace) -> ReleaseReport {
        let id = workspace.id.clone();
        let report = tokio::task::spawn_blocking(move || workspace.destroy())
            .await
            .unwrap_or_else(|e| {
                tracing::error!(workspace = %id, error = %e, "Release task failed");
                ReleaseReport {
                    deleted: 0,
                    errors: 1,
                }
            });
        if report.errors > 0 {
            tracing::warn!(
                workspace = %id,
                deleted = report.deleted,
                errors = report.errors,
                "Workspace released with cleanup errors"
            );
        } else {
            tracing::debug!(workspace = %id, deleted = report.deleted, "Workspace released");
        }
        report
    }

    /// Deletes every entry of the temp root whose age is at least `max_age`,
    /// whether or not a live workspace owns it.
    #[tracing::instrument(skip(self))]
    pub async fn sweep(&self, max_age: Duration) -> SweepReport {
        let root = self.temp_root.clone();
        let tracker = self.tracker.clone();

        let report = tokio::task::spawn_blocking(move || sweep_dir(&root, max_age, &tracker))
            .await
            .unwrap_or_else(|e| {
                tracing::error!(error = %e, "Sweep task failed");
                SweepReport::default()
            });

        tracing::info!(
            deleted = report.deleted,
            errors = report.errors,
            retained = report.retained,
            max_age_ms = max_age.as_millis() as u64,
            "Temp sweep completed"
        );
        report
    }

    pub async fn current_temp_files(&self) -> usize {
        let root = self.temp_root.clone();
        tokio::task::spawn_blocking(move || collect_files(&root).len())
            .await
            .unwrap_or(0)
    }

    pub async fn stats(&self) -> CleanupStats {
        let snapshot = self.tracker.snapshot();
        CleanupStats {
            total_files_created: snapshot.total_files_created,
            total_files_deleted: snapshot.total_files_deleted,
            total_cleanup_errors: snapshot.total_cleanup_errors,
            last_cleanup: snapshot.last_cleanup,
            current_temp_files: self.current_temp_files().await,
        }
    }

    pub async fn force_cleanup(&self) -> CleanupStats {
        self.sweep(Duration::ZERO).await;
        self.stats().await
    }

    /// Files currently under the temp root, oldest first.
    pub async fn file_details(&self) -> Vec<TempFileDetails> {
        let root = self.temp_root.clone();
        tokio::task::spawn_blocking(move || {
            let now = SystemTime::now();
            collect_files(&root)
                .into_iter()
                .map(|(path, metadata)| {
                    let modified = metadata.modified().ok();
                    TempFileDetails {
                        name: path
                            .strip_prefix(&root)
                            .unwrap_or(&path)
                            .display()
                            .to_string(),
                        size: metadata.len(),
                        modified: modified.map(DateTime::<Utc>::from),
                        age_ms: age_of(modified, now).as_millis() as u64,
                    }
                })
                .sorted_by_key(|details| std::cmp::Reverse(details.age_ms))
                .collect()
        })
        .await
        .unwrap_or_default()
    }
}

fn workspace_token() -> String {
    let suffix: String = thread_rng()
        .sample_iter(&Alphanumeric)
        .take(9)
        .map(|byte| char::from(byte).to_ascii_lowercase())
        .collect();
    format!(
        "{}_{}_{}",
        WORKSPACE_PREFIX,
        Utc::now().timestamp_micros(),
        suffix
    )
}

fn age_of(modified: Option<SystemTime>, now: SystemTime) -> Duration {
    modified
        .and_then(|modified| now.duration_since(modified).ok())
        .unwrap_or(Duration::ZERO)
}

fn sweep_dir(root: &Path, max_age: Duration, tracker: &ArtifactTracker) -> SweepReport {
    let mut report = SweepReport::default();

    let entries = match std::fs::read_dir(root) {
        Ok(entries) => entries,
        Err(e) if e.kind() == ErrorKind::NotFound => {
            tracker.mark_cleanup();
            return report;
        }
        Err(e) => {
            tracing::error!(root = %root.display(), error = %e, "Failed to read temp root");
            return report;
        }
    };

    let now = SystemTime::now();
    for entry in entries.flatten() {
        let path = entry.path();
        let metadata = match entry.metadata() {
            Ok(metadata) => metadata,
            Err(e) if e.kind() == ErrorKind::NotFound => continue,
            Err(e) => {
                tracker.record_cleanup_error(&path, &e);
                report.errors += 1;
                continue;
            }
        };

        if age_of(metadata.modified().ok(), now) < max_age {
            report.retained += 1;
            continue;
        }
        remove_entry(&path, &metadata, tracker, &mut report);
    }

    tracker.mark_cleanup();
    report
}

fn remove_entry(path: &Path, metadata: &Metadata, tracker: &ArtifactTracker, report: &mut SweepReport) {
    if metadata.is_dir() {
        if let Ok(children) = std::fs::read_dir(path) {
            for child in children.flatten() {
                if let Ok(child_metadata) = child.metadata() {
                    remove_entry(&child.path(), &child_metadata, tracker, report);
                }
            }
        }
        match std::fs::remove_dir(path) {
            Ok(()) => {}
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) => {
                tracker.record_cleanup_error(path, &e);
                report.errors += 1;
            }
        }
        return;
    }

    match std::fs::remove_file(path) {
        Ok(()) => {
            tracker.record_deleted(path);
            report.deleted += 1;
        }
        Err(e) if e.kind() == ErrorKind::NotFound => tracker.forget(path),
        Err(e) => {
            tracker.record_cleanup_error(path, &e);
            report.errors += 1;
        }
    }
}

fn collect_files(root: &Path) -> Vec<(PathBuf, Metadata)> {
    let mut files = Vec::new();
    let mut pending = vec![root.to_path_buf()];

    while let Some(dir) = pending.pop() {
        let Ok(entries) = std::fs::read_dir(&dir) else {
            continue;
        };
        for entry in entries.flatten() {
            let Ok(metadata) = entry.metadata() else {
                continue;
            };
            if metadata.is_dir() {
                pending.push(entry.path());
            } else {
                files.push((entry.path(), metadata));
            }
        }
    }

    files
}
