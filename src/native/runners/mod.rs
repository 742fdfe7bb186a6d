use std::{sync::Arc, time::Duration};

use crate::{
    config::Config,
    core::{
        coordinator::RunnerRegistry,
        domain::{Language, RunOutcome},
        errors::{ExecutionError, ProcessError},
        traits::{
            process::{ProcessOutput, ProcessRunner},
            runner::LanguageRunner,
        },
    },
};

pub mod c_family;
pub mod interpreted;
pub mod java;
pub mod toolchain;
pub mod typescript;

/// Registry with one host-toolchain runner per supported language.
pub fn native_registry(config: &Config, process: Arc<dyn ProcessRunner>) -> RunnerRegistry {
    let runners: [Arc<dyn LanguageRunner>; 6] = [
        Arc::new(interpreted::InterpretedRunner::python(config, process.clone())),
        Arc::new(interpreted::InterpretedRunner::node(config, process.clone())),
        Arc::new(java::JavaRunner::new(config, process.clone())),
        Arc::new(c_family::CFamilyRunner::c(config, process.clone())),
        Arc::new(c_family::CFamilyRunner::cpp(config, process.clone())),
        Arc::new(typescript::TypeScriptRunner::new(config, process)),
    ];
    runners
        .into_iter()
        .fold(RunnerRegistry::new(), |registry, runner| registry.with(runner))
}

/// Wall-clock bound for a language, per its class.
pub fn timeout_for(config: &Config, language: &Language) -> Duration {
    if language.is_compiled() {
        config.compiled_timeout
    } else {
        config.interpreted_timeout
    }
}

pub(crate) fn run_outcome(output: ProcessOutput) -> RunOutcome {
    RunOutcome {
        stdout: output.stdout,
        stderr: output.stderr,
        exit_code: output.exit_code,
        signal: output.signal,
        timed_out: output.timed_out,
        output_limit_exceeded: output.output_limit_exceeded,
        elapsed_ms: output.elapsed_ms,
        leniency: None,
    }
}

pub(crate) fn launch_error(language: &Language, program: &str, err: ProcessError) -> ExecutionError {
    match err {
        ProcessError::NotFound { .. } => ExecutionError::ToolchainUnavailable {
            language: language.clone(),
            tried: vec![program.to_string()],
        },
        other => ExecutionError::internal(other),
    }
}

/// Turns a finished compiler invocation into the compile stage verdict.
pub(crate) fn check_compile(output: ProcessOutput, timeout: Duration) -> Result<(), ExecutionError> {
    if output.timed_out {
        return Err(ExecutionError::CompileTimedOut { timeout });
    }
    if output.success() {
        return Ok(());
    }
    let diagnostics = if output.stderr.trim().is_empty() {
        output.stdout
    } else {
        output.stderr
    };
    Err(ExecutionError::CompileFailed { diagnostics })
}
