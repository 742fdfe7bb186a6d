use std::{sync::Arc, time::Duration};

use crate::{
    config::Config,
    core::{
        domain::{Language, RunOutcome},
        errors::ExecutionError,
        traits::{
            process::{ProcessRunner, ProcessSpec},
            runner::{LanguageRunner, OutcomePolicy, RunTarget, SourceFile},
        },
        workspace::Workspace,
    },
    native::runners::{check_compile, launch_error, run_outcome},
};

const SOURCE_NAME: &str = "main.ts";
const EMITTED_NAME: &str = "main.js";

/// TypeScript: transpiled with `tsc` into the workspace, then run with node.
#[derive(Debug)]
pub struct TypeScriptRunner {
    tsc: String,
    node: String,
    timeout: Duration,
    max_output_bytes: usize,
    process: Arc<dyn ProcessRunner>,
}

impl TypeScriptRunner {
    pub fn new(config: &Config, process: Arc<dyn ProcessRunner>) -> Self {
        Self {
            tsc: config.toolchains.tsc.clone(),
            node: config.toolchains.node.clone(),
            timeout: config.compiled_timeout,
            max_output_bytes: config.max_output_bytes,
            process,
        }
    }
}

#[async_trait::async_trait]
impl LanguageRunner for TypeScriptRunner {
    fn language(&self) -> Language {
        Language::TypeScript
    }

    fn timeout(&self) -> Duration {
        self.timeout
    }

    async fn prepare(&self, workspace: &Workspace, code: &str) -> Result<SourceFile, ExecutionError> {
        let path = workspace.write_file(SOURCE_NAME, code).await?;
        Ok(SourceFile {
            path,
            policy: OutcomePolicy::Strict,
        })
    }

    #[tracing::instrument(skip_all, fields(workspace = workspace.id()))]
    async fn compile(
        &self,
        workspace: &Workspace,
        source: &SourceFile,
    ) -> Result<Option<RunTarget>, ExecutionError> {
        let spec = ProcessSpec::new(self.tsc.as_str(), workspace.root(), self.timeout)
            .arg(source.path.to_string_lossy())
            .arg("--outDir")
            .arg(workspace.root().to_string_lossy())
            .max_output_bytes(self.max_output_bytes);

        let output = self
            .process
            .run(spec)
            .await
            .map_err(|e| launch_error(&Language::TypeScript, &self.tsc, e));
        // tsc emits JavaScript even when type checking fails.
        let emitted = workspace.path(EMITTED_NAME);
        workspace.track_if_exists(&emitted).await;
        check_compile(output?, self.timeout)?;

        Ok(Some(RunTarget {
            path: emitted,
            policy: source.policy,
        }))
    }

    async fn run(
        &self,
        workspace: &Workspace,
        target: &RunTarget,
        stdin: Option<String>,
        timeout: Duration,
    ) -> Result<RunOutcome, ExecutionError> {
        let spec = ProcessSpec::new(self.node.as_str(), workspace.root(), timeout)
            .arg(target.path.to_string_lossy())
            .stdin(stdin)
            .max_output_bytes(self.max_output_bytes);

        let output = self
            .process
            .run(spec)
            .await
            .map_err(|e| launch_error(&Language::TypeScript, &self.node, e))?;
        Ok(run_outcome(output))
    }
}
