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

const SOURCE_NAME: &str = "Main.java";
const MAIN_CLASS: &str = "Main";

/// Java: `javac` inside the workspace, then `java` with the workspace as
/// class path. Submissions must declare a `Main` class.
#[derive(Debug)]
pub struct JavaRunner {
    javac: String,
    java: String,
    timeout: Duration,
    max_output_bytes: usize,
    process: Arc<dyn ProcessRunner>,
}

impl JavaRunner {
    pub fn new(config: &Config, process: Arc<dyn ProcessRunner>) -> Self {
        Self {
            javac: config.toolchains.javac.clone(),
            java: config.toolchains.java.clone(),
            timeout: config.compiled_timeout,
            max_output_bytes: config.max_output_bytes,
            process,
        }
    }

    /// Every class file javac produced, nested and anonymous classes included.
    async fn track_class_files(&self, workspace: &Workspace) {
        let Ok(mut entries) = tokio::fs::read_dir(workspace.root()).await else {
            return;
        };
        while let Ok(Some(entry)) = entries.next_entry().await {
            let path = entry.path();
            if path.extension().is_some_and(|ext| ext == "class") {
                workspace.track(&path);
            }
        }
    }
}

#[async_trait::async_trait]
impl LanguageRunner for JavaRunner {
    fn language(&self) -> Language {
        Language::Java
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
        let spec = ProcessSpec::new(self.javac.as_str(), workspace.root(), self.timeout)
            .arg(SOURCE_NAME)
            .max_output_bytes(self.max_output_bytes);

        let output = self
            .process
            .run(spec)
            .await
            .map_err(|e| launch_error(&Language::Java, &self.javac, e));
        self.track_class_files(workspace).await;
        check_compile(output?, self.timeout)?;

        Ok(Some(RunTarget {
            path: workspace.root().to_path_buf(),
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
        let spec = ProcessSpec::new(self.java.as_str(), workspace.root(), timeout)
            .arg("-cp")
            .arg(target.path.to_string_lossy())
            .arg(MAIN_CLASS)
            .stdin(stdin)
            .max_output_bytes(self.max_output_bytes);

        let output = self
            .process
            .run(spec)
            .await
            .map_err(|e| launch_error(&Language::Java, &self.java, e))?;
        Ok(run_outcome(output))
    }
}
