use std::{path::Path, sync::Arc, time::Duration};

use tokio::sync::OnceCell;

use crate::core::{
    domain::Language,
    errors::ExecutionError,
    traits::process::{ProcessRunner, ProcessSpec},
};

const PROBE_OUTPUT_LIMIT: usize = 64 * 1024;

/// Ordered list of candidate compilers for one language.
///
/// The first candidate that answers `--version` within the probe timeout is
/// used and remembered. A failed probe is not remembered, so installing a
/// compiler later does not require a restart.
#[derive(Debug)]
pub struct Toolchain {
    language: Language,
    candidates: Vec<String>,
    probe_timeout: Duration,
    resolved: OnceCell<String>,
}

impl Toolchain {
    pub fn new(language: Language, candidates: Vec<String>, probe_timeout: Duration) -> Self {
        Self {
            language,
            candidates,
            probe_timeout,
            resolved: OnceCell::new(),
        }
    }

    pub fn candidates(&self) -> &[String] {
        &self.candidates
    }

    pub async fn resolve(
        &self,
        process: &Arc<dyn ProcessRunner>,
        cwd: &Path,
    ) -> Result<String, ExecutionError> {
        self.resolved
            .get_or_try_init(|| self.probe(process, cwd))
            .await
            .cloned()
    }

    async fn probe(&self, process: &Arc<dyn ProcessRunner>, cwd: &Path) -> Result<String, ExecutionError> {
        for candidate in &self.candidates {
            let spec = ProcessSpec::new(candidate.as_str(), cwd, self.probe_timeout)
                .arg("--version")
                .max_output_bytes(PROBE_OUTPUT_LIMIT);
            match process.run(spec).await {
                Ok(output) if output.success() => {
                    tracing::info!(language = %self.language, compiler = %candidate, "Toolchain resolved");
                    return Ok(candidate.clone());
                }
                Ok(output) => {
                    tracing::debug!(compiler = %candidate, exit_code = ?output.exit_code, "Toolchain probe failed")
                }
                Err(e) => tracing::debug!(compiler = %candidate, error = %e, "Toolchain probe failed"),
            }
        }

        tracing::warn!(language = %self.language, tried = ?self.candidates, "No toolchain available");
        Err(ExecutionError::ToolchainUnavailable {
            language: self.language.clone(),
            tried: self.candidates.clone(),
        })
    }
}
