use std::panic;
use std::sync::Arc;

use tracing_subscriber::EnvFilter;

use codeplay_runner::api::service::LineService;
use codeplay_runner::config::Config;
use codeplay_runner::core::coordinator::ExecutionCoordinator;
use codeplay_runner::core::sweeper::{Lifecycle, SweepSchedule, shutdown_signal};
use codeplay_runner::core::tracker::ArtifactTracker;
use codeplay_runner::core::workspace::WorkspaceManager;
use codeplay_runner::native::process::NativeProcessRunner;
use codeplay_runner::native::runners::native_registry;
use codeplay_runner::storage::memory::InMemoryProjectStore;

#[tokio::main]
#[tracing::instrument]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();
    set_panic_hook();

    let config = Config::from_env()?;
    tracing::info!(temp_dir = %config.temp_dir.display(), "Configuration loaded");

    let workspaces = Arc::new(WorkspaceManager::new(
        &config.temp_dir,
        Arc::new(ArtifactTracker::new()),
    ));
    let registry = native_registry(&config, Arc::new(NativeProcessRunner::new()));
    tracing::info!(languages = ?registry.languages(), "Runners registered");

    let coordinator = ExecutionCoordinator::new(registry, workspaces.clone())
        .with_store(Arc::new(InMemoryProjectStore::new()));
    let service = LineService::new(Arc::new(coordinator));
    let lifecycle = Lifecycle::start(workspaces, SweepSchedule::from(&config));

    tracing::info!("Reading requests from stdin");
    tokio::select! {
        served = service.serve(tokio::io::stdin(), tokio::io::stdout()) => {
            if let Err(e) = served {
                tracing::error!(error = %e, "Service stopped with an I/O error");
            }
        }
        _ = shutdown_signal() => {}
    }

    lifecycle.shutdown().await;
    Ok(())
}

fn set_panic_hook() {
    panic::set_hook(Box::new(|panic_info| {
        tracing::error!(
            message = "panic occurred",
            panic = %panic_info
        );
    }));
}
