use crate::{
    api::models::{ExecuteCodeBody, ExecuteResponse},
    core::{
        domain::{ExecutionRequest, ExecutionStage, Language},
        errors::ExecutionError,
        result::ExecutionResult,
    },
};

#[derive(Debug, thiserror::Error)]
pub enum ConversionError {
    #[error("Missing required field: {field}")]
    MissingField { field: String },
}

impl TryFrom<ExecuteCodeBody> for ExecutionRequest {
    type Error = ConversionError;

    fn try_from(body: ExecuteCodeBody) -> Result<Self, ConversionError> {
        if body.language.trim().is_empty() {
            return Err(ConversionError::MissingField {
                field: "language".to_string(),
            });
        }
        if body.code.is_empty() {
            return Err(ConversionError::MissingField {
                field: "code".to_string(),
            });
        }

        let mut request = ExecutionRequest::new(Language::from(body.language.as_str()), body.code);
        if let Some(input) = body.input {
            request = request.with_stdin(input);
        }
        if let Some(proj_id) = body.proj_id.filter(|id| !id.trim().is_empty()) {
            request = request.with_project(proj_id);
        }
        Ok(request)
    }
}

impl From<ExecutionResult> for ExecuteResponse {
    fn from(result: ExecutionResult) -> Self {
        let message = message_for(&result);
        let error = result.error_message();
        Self {
            success: result.success,
            message,
            output: result.combined_output,
            error,
        }
    }
}

fn message_for(result: &ExecutionResult) -> String {
    if result.success {
        return match result.leniency {
            Some(leniency) => format!("Server code executed successfully ({})", leniency.summary()),
            None => "Code executed successfully".to_string(),
        };
    }

    let message = match (&result.error, result.stage) {
        (Some(ExecutionError::UnsupportedLanguage { .. }), _) => "Language not supported",
        (Some(ExecutionError::ToolchainUnavailable { .. }), ExecutionStage::Compile) => {
            "Compiler not available"
        }
        (Some(ExecutionError::ToolchainUnavailable { .. }), _) => "Runtime not available",
        (Some(ExecutionError::CompileFailed { .. }), _) => "Compilation failed",
        (Some(ExecutionError::CompileTimedOut { .. }), _) => "Compilation timed out",
        (Some(ExecutionError::RunFailed { timed_out: true, .. }), _) => "Execution timed out",
        (Some(ExecutionError::Filesystem { .. }), _) => "File system error",
        _ => "Execution failed",
    };
    message.to_string()
}
