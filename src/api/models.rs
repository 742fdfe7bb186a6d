use serde::{Deserialize, Serialize};

use crate::core::workspace::{CleanupStats, TempFileDetails};

/// Body of an execute request. `userId` is validated by the caller and only
/// logged here.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecuteCodeBody {
    #[serde(default)]
    pub user_id: Option<String>,
    #[serde(default)]
    pub proj_id: Option<String>,
    #[serde(default)]
    pub code: String,
    #[serde(default)]
    pub language: String,
    #[serde(default)]
    pub input: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "command", rename_all = "snake_case")]
pub enum Command {
    Execute(ExecuteCodeBody),
    CleanupStatus,
    ForceCleanup,
}

/// One request line: an optional correlation id plus the command and its
/// fields, all at the top level.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Envelope {
    #[serde(default)]
    pub request_id: Option<String>,
    #[serde(flatten)]
    pub command: Command,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ExecuteResponse {
    pub success: bool,
    pub message: String,
    pub output: String,
    pub error: Option<String>,
}

impl ExecuteResponse {
    pub fn invalid(reason: impl Into<String>) -> Self {
        Self {
            success: false,
            message: "Invalid request".to_string(),
            output: String::new(),
            error: Some(reason.into()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CleanupStatusResponse {
    pub success: bool,
    pub stats: CleanupStats,
    pub current_files: Vec<TempFileDetails>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum ReplyBody {
    Execute(ExecuteResponse),
    Cleanup(CleanupStatusResponse),
}

/// One reply line, echoing the request id when one was given.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Reply {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,
    #[serde(flatten)]
    pub body: ReplyBody,
}
