use std::{
    path::{Path, PathBuf},
    sync::{
        Mutex,
        atomic::{AtomicU64, Ordering},
    },
};

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use itertools::Itertools;
use serde::Serialize;

/// A temp file the tracker has seen created and not yet deleted.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ArtifactRecord {
    pub filename: String,
    pub created_at: DateTime<Utc>,
    pub age_ms: i64,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TrackerSnapshot {
    pub total_files_created: u64,
    pub total_files_deleted: u64,
    pub total_cleanup_errors: u64,
    pub last_cleanup: Option<DateTime<Utc>>,
}

/// Counts temp file creations, deletions and cleanup errors.
///
/// Purely observational: nothing in the execution path depends on these
/// numbers. Safe to share between any number of concurrent executions.
#[derive(Debug, Default)]
pub struct ArtifactTracker {
    created: AtomicU64,
    deleted: AtomicU64,
    cleanup_errors: AtomicU64,
    last_cleanup: Mutex<Option<DateTime<Utc>>>,
    live: DashMap<PathBuf, DateTime<Utc>>,
}

impl ArtifactTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_created(&self, path: &Path) {
        let total = self.created.fetch_add(1, Ordering::Relaxed) + 1;
        self.live.insert(path.to_path_buf(), Utc::now());
        tracing::debug!(file = %path.display(), total_created = total, "Created temp file");
    }

    pub fn record_deleted(&self, path: &Path) {
        let total = self.deleted.fetch_add(1, Ordering::Relaxed) + 1;
        self.live.remove(path);
        tracing::debug!(file = %path.display(), total_deleted = total, "Deleted temp file");
    }

    pub fn record_cleanup_error(&self, path: &Path, error: &dyn std::fmt::Display) {
        let total = self.cleanup_errors.fetch_add(1, Ordering::Relaxed) + 1;
        tracing::error!(
            file = %path.display(),
            error = %error,
            total_cleanup_errors = total,
            "Failed to clean up temp file"
        );
    }

    /// Drops a record for a file that vanished without us deleting it.
    pub fn forget(&self, path: &Path) {
        self.live.remove(path);
    }

    pub fn mark_cleanup(&self) {
        if let Ok(mut last_cleanup) = self.last_cleanup.lock() {
            *last_cleanup = Some(Utc::now());
        }
    }

    pub fn snapshot(&self) -> TrackerSnapshot {
        TrackerSnapshot {
            total_files_created: self.created.load(Ordering::Relaxed),
            total_files_deleted: self.deleted.load(Ordering::Relaxed),
            total_cleanup_errors: self.cleanup_errors.load(Ordering::Relaxed),
            last_cleanup: self.last_cleanup.lock().ok().and_then(|guard| *guard),
        }
    }

    /// Live artifacts, oldest first.
    pub fn live_artifacts(&self) -> Vec<ArtifactRecord> {
        let now = Utc::now();
        self.live
            .iter()
            .map(|entry| ArtifactRecord {
                filename: entry.key().display().to_string(),
                created_at: *entry.value(),
                age_ms: (now - *entry.value()).num_milliseconds(),
            })
            .sorted_by_key(|record| record.created_at)
            .collect()
    }
}
