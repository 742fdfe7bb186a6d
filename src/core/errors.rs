use std::time::Duration;

use itertools::Itertools;

use crate::core::domain::Language;

/// Every way an execution can fail below the coordinator boundary.
///
/// None of these variants are fatal for the process: the coordinator folds
/// each of them into an [`ExecutionResult`](crate::core::result::ExecutionResult).
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ExecutionError {
    #[error("language not supported: {language}")]
    UnsupportedLanguage { language: String },

    #[error("no {language} toolchain available (tried: {})", join_programs(.tried))]
    ToolchainUnavailable {
        language: Language,
        tried: Vec<String>,
    },

    #[error("compilation failed")]
    CompileFailed { diagnostics: String },

    #[error("compilation timed out after {timeout:?}")]
    CompileTimedOut { timeout: Duration },

    #[error(
        "{}",
        describe_run_failure(.exit_code, .signal, .timed_out, .output_limit_exceeded, .timeout)
    )]
    RunFailed {
        exit_code: Option<i32>,
        signal: Option<i32>,
        timed_out: bool,
        output_limit_exceeded: bool,
        timeout: Duration,
    },

    #[error("file system error: {msg}")]
    Filesystem { msg: String },

    #[error("internal error: {msg}")]
    Internal { msg: String },
}

impl ExecutionError {
    pub fn filesystem(err: impl std::fmt::Display) -> Self {
        ExecutionError::Filesystem {
            msg: err.to_string(),
        }
    }

    pub fn internal(err: impl std::fmt::Display) -> Self {
        ExecutionError::Internal {
            msg: err.to_string(),
        }
    }

    pub fn is_timeout(&self) -> bool {
        matches!(
            self,
            ExecutionError::RunFailed {
                timed_out: true,
                ..
            } | ExecutionError::CompileTimedOut { .. }
        )
    }
}

fn join_programs(programs: &[String]) -> String {
    programs.iter().join(", ")
}

fn describe_run_failure(
    exit_code: &Option<i32>,
    signal: &Option<i32>,
    timed_out: &bool,
    output_limit_exceeded: &bool,
    timeout: &Duration,
) -> String {
    if *timed_out {
        return format!(
            "process killed after exceeding the {}s time limit",
            timeout.as_secs_f64()
        );
    }
    if *output_limit_exceeded {
        return "process killed after exceeding the output limit".to_string();
    }
    match (*exit_code, *signal) {
        (Some(code), _) => format!("process exited with code {}", code),
        (None, Some(signal)) => format!("process terminated by signal {}", signal),
        (None, None) => "process terminated abnormally".to_string(),
    }
}

/// Failures of launching or supervising a subprocess.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ProcessError {
    #[error("program not found: {program}")]
    NotFound { program: String },

    #[error("failed to spawn {program}: {msg}")]
    Spawn { program: String, msg: String },

    #[error("i/o error while supervising process: {msg}")]
    Io { msg: String },
}

/// Failures of the external project store. These are logged and never
/// reach the caller.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum StoreError {
    #[error("project not found: {project_id}")]
    NotFound { project_id: String },

    #[error("project store unavailable: {msg}")]
    Unavailable { msg: String },
}
