use std::{sync::Arc, time::Duration};

use tokio::{task::JoinHandle, time::Instant};

use crate::{
    config::Config,
    constants::{HIGH_TEMP_FILE_WATERMARK, RETENTION, SWEEP_INTERVAL},
    core::workspace::WorkspaceManager,
};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SweepSchedule {
    pub interval: Duration,
    /// Entries at least this old are deleted by each sweep.
    pub retention: Duration,
    /// Live temp file count above which a warning is logged.
    pub watermark: usize,
}

impl Default for SweepSchedule {
    fn default() -> Self {
        Self {
            interval: SWEEP_INTERVAL,
            retention: RETENTION,
            watermark: HIGH_TEMP_FILE_WATERMARK,
        }
    }
}

impl From<&Config> for SweepSchedule {
    fn from(config: &Config) -> Self {
        Self {
            interval: config.sweep_interval,
            retention: config.retention,
            watermark: config.temp_file_watermark,
        }
    }
}

/// Starts the periodic stale-file sweep. The first sweep happens one
/// interval after startup, not immediately.
pub fn spawn_periodic_sweep(manager: Arc<WorkspaceManager>, schedule: SweepSchedule) -> JoinHandle<()> {
    let SweepSchedule {
        interval,
        retention,
        watermark,
    } = schedule;
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval_at(Instant::now() + interval, interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            ticker.tick().await;
            manager.sweep(retention).await;

            let stats = manager.stats().await;
            tracing::info!(
                total_files_created = stats.total_files_created,
                total_files_deleted = stats.total_files_deleted,
                total_cleanup_errors = stats.total_cleanup_errors,
                current_temp_files = stats.current_temp_files,
                "Temp file stats"
            );
            if stats.current_temp_files > watermark {
                tracing::warn!(
                    current_temp_files = stats.current_temp_files,
                    watermark,
                    "High number of temp files detected"
                );
            }
        }
    })
}

/// Owns the background sweep and performs the final cleanup on shutdown.
#[derive(Debug)]
pub struct Lifecycle {
    manager: Arc<WorkspaceManager>,
    sweeper: Option<JoinHandle<()>>,
}

impl Lifecycle {
    pub fn start(manager: Arc<WorkspaceManager>, schedule: SweepSchedule) -> Self {
        let sweeper = spawn_periodic_sweep(manager.clone(), schedule);
        tracing::info!(
            interval_secs = schedule.interval.as_secs(),
            retention_secs = schedule.retention.as_secs(),
            "Periodic temp sweep scheduled"
        );
        Self {
            manager,
            sweeper: Some(sweeper),
        }
    }

    /// Stops the periodic sweep and deletes everything left in the temp root.
    pub async fn shutdown(mut self) {
        if let Some(sweeper) = self.sweeper.take() {
            sweeper.abort();
        }
        tracing::info!("Running final temp cleanup");
        let report = self.manager.sweep(Duration::ZERO).await;
        tracing::info!(deleted = report.deleted, errors = report.errors, "Final cleanup done");
    }
}

/// Resolves on Ctrl-C, or SIGTERM on unix.
pub async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for Ctrl-C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{SignalKind, signal};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => tracing::info!("Received Ctrl-C"),
        _ = terminate => tracing::info!("Received SIGTERM"),
    }
}

#[cfg(test)]
mod tests {
    use uuid::Uuid;

    use super::*;
    use crate::core::{domain::Language, tracker::ArtifactTracker};

    fn test_manager() -> Arc<WorkspaceManager> {
        let root = std::env::temp_dir().join(format!("codeplay_sweeper_{}", Uuid::new_v4()));
        Arc::new(WorkspaceManager::new(root, Arc::new(ArtifactTracker::new())))
    }

    #[tokio::test]
    async fn test_periodic_sweep_runs_after_interval() {
        let manager = test_manager();
        let workspace = manager.acquire(&Language::Python).await.unwrap();
        workspace.write_file("main.py", "print(1)").await.unwrap();

        let handle = spawn_periodic_sweep(
            manager.clone(),
            SweepSchedule {
                interval: Duration::from_millis(50),
                retention: Duration::ZERO,
                watermark: 0,
            },
        );
        assert!(manager.stats().await.last_cleanup.is_none());

        tokio::time::sleep(Duration::from_millis(300)).await;
        handle.abort();

        let stats = manager.stats().await;
        assert!(stats.last_cleanup.is_some());
        assert_eq!(stats.current_temp_files, 0);
        drop(workspace);
        let _ = std::fs::remove_dir_all(manager.temp_root());
    }

    #[tokio::test]
    async fn test_shutdown_removes_everything() {
        let manager = test_manager();
        let workspace = manager.acquire(&Language::Cpp).await.unwrap();
        workspace.write_file("main.cpp", "int main() {}").await.unwrap();

        let lifecycle = Lifecycle::start(manager.clone(), SweepSchedule::default());
        lifecycle.shutdown().await;

        assert_eq!(manager.current_temp_files().await, 0);
        assert_eq!(manager.tracker().snapshot().total_files_deleted, 1);
        drop(workspace);
        let _ = std::fs::remove_dir_all(manager.temp_root());
    }
}
