use std::time::Duration;

use itertools::Itertools;
use uuid::Uuid;

use crate::{
    constants::{NO_OUTPUT_MESSAGE, UNSUPPORTED_LANGUAGE_OUTPUT},
    core::{
        domain::{ExecutionRequest, ExecutionStage, Language, Leniency, RunOutcome},
        errors::ExecutionError,
    },
};

/// Structured outcome of one execution.
///
/// Exactly one of compile failure, run failure or success holds, and
/// `combined_output` is never empty.
#[derive(Clone, Debug, PartialEq)]
pub struct ExecutionResult {
    pub execution_id: Uuid,
    pub language: Language,
    pub success: bool,
    pub stage: ExecutionStage,
    pub stdout: String,
    pub stderr: String,
    pub combined_output: String,
    pub error: Option<ExecutionError>,
    pub leniency: Option<Leniency>,
}

impl ExecutionResult {
    /// Failure before any stage ran: unsupported language or a workspace
    /// that could not be prepared.
    pub fn rejected(request: &ExecutionRequest, error: ExecutionError) -> Self {
        let combined_output = match &error {
            ExecutionError::UnsupportedLanguage { .. } => UNSUPPORTED_LANGUAGE_OUTPUT.to_string(),
            other => other.to_string(),
        };
        Self::failure(request, ExecutionStage::None, error, combined_output)
    }

    pub fn compile_failed(request: &ExecutionRequest, error: ExecutionError) -> Self {
        let combined_output = match &error {
            ExecutionError::CompileFailed { diagnostics } if !diagnostics.trim().is_empty() => {
                format!(
                    "Compilation Error: {}\nCompilation Details: {}",
                    error,
                    diagnostics.trim_end()
                )
            }
            ExecutionError::ToolchainUnavailable { language, tried } => {
                toolchain_hint(&error, language, tried)
            }
            other => format!("Compilation Error: {}", other),
        };
        Self::failure(request, ExecutionStage::Compile, error, combined_output)
    }

    /// The run stage could not be started at all.
    pub fn run_error(request: &ExecutionRequest, error: ExecutionError) -> Self {
        let combined_output = match &error {
            ExecutionError::ToolchainUnavailable { language, tried } => {
                toolchain_hint(&error, language, tried)
            }
            other => format!("Execution Error: {}", other),
        };
        Self::failure(request, ExecutionStage::Run, error, combined_output)
    }

    pub fn from_run(request: &ExecutionRequest, outcome: RunOutcome, timeout: Duration) -> Self {
        if outcome.succeeded() {
            let combined_output = success_output(&outcome);
            return Self {
                execution_id: request.id,
                language: request.language.clone(),
                success: true,
                stage: ExecutionStage::Run,
                stdout: outcome.stdout,
                stderr: outcome.stderr,
                combined_output,
                error: None,
                leniency: outcome.leniency,
            };
        }

        let error = ExecutionError::RunFailed {
            exit_code: outcome.exit_code,
            signal: outcome.signal,
            timed_out: outcome.timed_out,
            output_limit_exceeded: outcome.output_limit_exceeded,
            timeout,
        };

        let mut combined_output = format!("Execution Error: {}", error);
        if !outcome.stderr.is_empty() {
            combined_output.push_str(&format!("\nError Details: {}", outcome.stderr.trim_end()));
        }
        if !outcome.stdout.is_empty() {
            combined_output.push_str(&format!(
                "\n\nOutput before error:\n{}",
                outcome.stdout.trim_end()
            ));
        }
        if let Some(code) = outcome.exit_code {
            combined_output.push_str(&format!("\n\nExit Code: {}", code));
        }
        if let Some(signal) = outcome.signal {
            combined_output.push_str(&format!("\nSignal: {}", signal_name(signal)));
        }
        if let Some(hint) = failure_hint(&outcome, timeout) {
            combined_output.push_str(&format!("\n\n{}", hint));
        }

        Self {
            execution_id: request.id,
            language: request.language.clone(),
            success: false,
            stage: ExecutionStage::Run,
            stdout: outcome.stdout,
            stderr: outcome.stderr,
            combined_output,
            error: Some(error),
            leniency: None,
        }
    }

    fn failure(
        request: &ExecutionRequest,
        stage: ExecutionStage,
        error: ExecutionError,
        combined_output: String,
    ) -> Self {
        let stderr = match &error {
            ExecutionError::CompileFailed { diagnostics } => diagnostics.clone(),
            _ => String::new(),
        };
        Self {
            execution_id: request.id,
            language: request.language.clone(),
            success: false,
            stage,
            stdout: String::new(),
            stderr,
            combined_output,
            error: Some(error),
            leniency: None,
        }
    }

    /// Compile diagnostics are surfaced verbatim; everything else uses the
    /// error's own description.
    pub fn error_message(&self) -> Option<String> {
        self.error.as_ref().map(|error| match error {
            ExecutionError::CompileFailed { diagnostics } if !diagnostics.trim().is_empty() => {
                diagnostics.clone()
            }
            other => other.to_string(),
        })
    }

    pub fn timed_out(&self) -> bool {
        self.error.as_ref().is_some_and(ExecutionError::is_timeout)
    }
}

fn success_output(outcome: &RunOutcome) -> String {
    let mut output = match &outcome.leniency {
        Some(leniency) if outcome.stdout.trim().is_empty() => leniency.note(),
        Some(leniency) => format!(
            "{}\n\nServer output:\n{}",
            leniency.note(),
            outcome.stdout.trim_end()
        ),
        None if outcome.stdout.is_empty() => NO_OUTPUT_MESSAGE.to_string(),
        None => outcome.stdout.clone(),
    };
    if !outcome.stderr.is_empty() && outcome.leniency.is_none() {
        output.push_str(&format!("\nWarnings: {}", outcome.stderr.trim_end()));
    }
    output
}

/// Pointer for the most common run failures, checked in order.
fn failure_hint(outcome: &RunOutcome, timeout: Duration) -> Option<String> {
    let hint = if outcome.stderr.contains("SyntaxError") {
        "Tip: Check for syntax errors in your code.".to_string()
    } else if outcome.stderr.contains("ReferenceError") {
        "Tip: Check for undefined variables or functions.".to_string()
    } else if outcome.stderr.contains("TypeError") {
        "Tip: Check for type-related errors (e.g., calling a non-function).".to_string()
    } else if outcome.timed_out {
        format!(
            "Note: Code execution timed out ({}s limit).",
            timeout.as_secs_f64()
        )
    } else {
        return None;
    };
    Some(hint)
}

#[cfg(unix)]
fn signal_name(signal: i32) -> String {
    nix::sys::signal::Signal::try_from(signal)
        .map(|signal| signal.as_str().to_string())
        .unwrap_or_else(|_| signal.to_string())
}

#[cfg(not(unix))]
fn signal_name(signal: i32) -> String {
    signal.to_string()
}

fn toolchain_hint(error: &ExecutionError, language: &Language, tried: &[String]) -> String {
    format!(
        "{}\n\nTo run {} code, install one of [{}] and make sure it is on PATH.",
        error,
        language,
        tried.iter().join(", ")
    )
}
