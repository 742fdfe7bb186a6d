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
    native::runners::{check_compile, launch_error, run_outcome, toolchain::Toolchain},
};

const BINARY_NAME: &str = "main";

/// C and C++: compiled with the first available host compiler, then the
/// binary is run from the workspace.
#[derive(Debug)]
pub struct CFamilyRunner {
    language: Language,
    source_name: &'static str,
    flags: &'static [&'static str],
    toolchain: Toolchain,
    timeout: Duration,
    max_output_bytes: usize,
    process: Arc<dyn ProcessRunner>,
}

impl CFamilyRunner {
    pub fn c(config: &Config, process: Arc<dyn ProcessRunner>) -> Self {
        Self {
            language: Language::C,
            source_name: "main.c",
            flags: &["-O2"],
            toolchain: Toolchain::new(
                Language::C,
                config.toolchains.c_compilers.clone(),
                config.probe_timeout,
            ),
            timeout: config.compiled_timeout,
            max_output_bytes: config.max_output_bytes,
            process,
        }
    }

    pub fn cpp(config: &Config, process: Arc<dyn ProcessRunner>) -> Self {
        Self {
            language: Language::Cpp,
            source_name: "main.cpp",
            flags: &["-O2", "-std=c++17"],
            toolchain: Toolchain::new(
                Language::Cpp,
                config.toolchains.cpp_compilers.clone(),
                config.probe_timeout,
            ),
            timeout: config.compiled_timeout,
            max_output_bytes: config.max_output_bytes,
            process,
        }
    }
}

#[async_trait::async_trait]
impl LanguageRunner for CFamilyRunner {
    fn language(&self) -> Language {
        self.language.clone()
    }

    fn timeout(&self) -> Duration {
        self.timeout
    }

    async fn prepare(&self, workspace: &Workspace, code: &str) -> Result<SourceFile, ExecutionError> {
        let path = workspace.write_file(self.source_name, code).await?;
        Ok(SourceFile {
            path,
            policy: OutcomePolicy::Strict,
        })
    }

    #[tracing::instrument(skip_all, fields(language = %self.language, workspace = workspace.id()))]
    async fn compile(
        &self,
        workspace: &Workspace,
        source: &SourceFile,
    ) -> Result<Option<RunTarget>, ExecutionError> {
        let compiler = self.toolchain.resolve(&self.process, workspace.root()).await?;
        let binary = workspace.path(BINARY_NAME);

        let spec = ProcessSpec::new(compiler.as_str(), workspace.root(), self.timeout)
            .arg(source.path.to_string_lossy())
            .arg("-o")
            .arg(binary.to_string_lossy())
            .args(self.flags.iter().copied())
            .max_output_bytes(self.max_output_bytes);

        let output = self
            .process
            .run(spec)
            .await
            .map_err(|e| launch_error(&self.language, &compiler, e));
        // A failed compile may still leave a partial binary behind.
        workspace.track_if_exists(&binary).await;
        check_compile(output?, self.timeout)?;

        Ok(Some(RunTarget {
            path: binary,
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
        let program = target.path.to_string_lossy().into_owned();
        let spec = ProcessSpec::new(program.as_str(), workspace.root(), timeout)
            .stdin(stdin)
            .max_output_bytes(self.max_output_bytes);

        let output = self
            .process
            .run(spec)
            .await
            .map_err(|e| launch_error(&self.language, &program, e))?;
        Ok(run_outcome(output))
    }
}
