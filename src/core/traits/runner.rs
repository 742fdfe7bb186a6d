use std::{path::PathBuf, time::Duration};

use crate::core::{
    domain::{Language, RunOutcome},
    errors::ExecutionError,
    workspace::Workspace,
};

/// How a run's raw exit status is interpreted.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum OutcomePolicy {
    Strict,
    /// The program starts a network listener on `port`; being killed at the
    /// time limit or losing the port race still counts as success.
    ServerDemo { port: u16 },
}

/// Source file written into a workspace, ready for the compile stage.
#[derive(Clone, Debug, PartialEq)]
pub struct SourceFile {
    pub path: PathBuf,
    pub policy: OutcomePolicy,
}

/// What the run stage launches: a compiled binary, a class directory or the
/// source file itself for interpreted languages.
#[derive(Clone, Debug, PartialEq)]
pub struct RunTarget {
    pub path: PathBuf,
    pub policy: OutcomePolicy,
}

impl From<SourceFile> for RunTarget {
    fn from(source: SourceFile) -> Self {
        Self {
            path: source.path,
            policy: source.policy,
        }
    }
}

/// Per-language strategy for preparing, compiling and running a submission.
#[mockall::automock]
#[async_trait::async_trait]
pub trait LanguageRunner: std::fmt::Debug + Send + Sync {
    fn language(&self) -> Language;

    /// Wall-clock bound applied to each subprocess of an execution.
    fn timeout(&self) -> Duration;

    async fn prepare(&self, workspace: &Workspace, code: &str) -> Result<SourceFile, ExecutionError>;

    /// `Ok(None)` means the language has no compile stage and the source is
    /// run directly.
    async fn compile(
        &self,
        workspace: &Workspace,
        source: &SourceFile,
    ) -> Result<Option<RunTarget>, ExecutionError>;

    async fn run(
        &self,
        workspace: &Workspace,
        target: &RunTarget,
        stdin: Option<String>,
        timeout: Duration,
    ) -> Result<RunOutcome, ExecutionError>;
}
