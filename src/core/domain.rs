use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum Language {
    Python,
    NodeJs,
    Java,
    Cpp,
    C,
    TypeScript,
    Other(String),
}

impl Language {
    pub const SUPPORTED: [Language; 6] = [
        Language::Python,
        Language::NodeJs,
        Language::Java,
        Language::Cpp,
        Language::C,
        Language::TypeScript,
    ];

    pub fn as_str(&self) -> &str {
        match self {
            Language::Python => "python",
            Language::NodeJs => "nodejs",
            Language::Java => "java",
            Language::Cpp => "cpp",
            Language::C => "c",
            Language::TypeScript => "typescript",
            Language::Other(name) => name,
        }
    }

    /// Languages with a compile stage get the longer wall-clock budget.
    pub fn is_compiled(&self) -> bool {
        matches!(
            self,
            Language::Java | Language::Cpp | Language::C | Language::TypeScript
        )
    }
}

impl From<&str> for Language {
    fn from(value: &str) -> Self {
        match value.trim().to_ascii_lowercase().as_str() {
            "python" => Language::Python,
            "nodejs" | "node" => Language::NodeJs,
            "java" => Language::Java,
            "cpp" | "c++" => Language::Cpp,
            "c" => Language::C,
            "typescript" => Language::TypeScript,
            _ => Language::Other(value.to_string()),
        }
    }
}

impl From<String> for Language {
    fn from(value: String) -> Self {
        Language::from(value.as_str())
    }
}

impl From<Language> for String {
    fn from(value: Language) -> Self {
        value.as_str().to_string()
    }
}

impl fmt::Display for Language {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One submission of source code. Immutable once built.
#[derive(Clone, Debug)]
pub struct ExecutionRequest {
    pub id: Uuid,
    pub language: Language,
    pub source_code: String,
    pub stdin: Option<String>,
    pub project_id: Option<String>,
}

impl ExecutionRequest {
    pub fn new(language: Language, source_code: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            language,
            source_code: source_code.into(),
            stdin: None,
            project_id: None,
        }
    }

    pub fn with_stdin(self, stdin: impl Into<String>) -> Self {
        Self {
            stdin: Some(stdin.into()),
            ..self
        }
    }

    pub fn with_project(self, project_id: impl Into<String>) -> Self {
        Self {
            project_id: Some(project_id.into()),
            ..self
        }
    }

    /// Text written to the process before its input is closed.
    ///
    /// Blank input counts as no input, and a trailing newline is added so
    /// line-oriented readers see a complete line.
    pub fn piped_input(&self) -> Option<String> {
        let stdin = self.stdin.as_deref()?;
        if stdin.trim().is_empty() {
            return None;
        }
        if stdin.ends_with('\n') {
            Some(stdin.to_string())
        } else {
            Some(format!("{}\n", stdin))
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionStage {
    Compile,
    Run,
    None,
}

/// Why a failure-looking run of a server program was accepted.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Leniency {
    /// The chosen port was taken; the program gave up on binding it.
    PortConflict { port: u16 },
    /// The server was still running when the time limit killed it.
    ServerTimedOut { port: u16 },
    /// The server ran for the demo window and was shut down cleanly.
    DemoCompleted { port: u16 },
}

impl Leniency {
    pub fn summary(&self) -> &'static str {
        match self {
            Leniency::PortConflict { .. } => "port conflict handled",
            Leniency::ServerTimedOut { .. } | Leniency::DemoCompleted { .. } => {
                "demonstration completed"
            }
        }
    }

    pub fn note(&self) -> String {
        match self {
            Leniency::PortConflict { port } => format!(
                "Server code executed successfully.\n\
                 Port {port} was already in use; in a real deployment the server would bind an available port."
            ),
            Leniency::ServerTimedOut { port } => format!(
                "Server code executed successfully.\n\
                 The server started on port {port} and kept running until the time limit, which is expected for servers."
            ),
            Leniency::DemoCompleted { port } => format!(
                "Server code executed successfully.\n\
                 The server started on port {port} and was shut down after the demonstration window."
            ),
        }
    }
}

/// Raw result of the run stage, after any leniency policy was applied.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct RunOutcome {
    pub stdout: String,
    pub stderr: String,
    pub exit_code: Option<i32>,
    pub signal: Option<i32>,
    pub timed_out: bool,
    pub output_limit_exceeded: bool,
    pub elapsed_ms: u64,
    /// Set when a leniency policy turned a failure-looking run into a
    /// success.
    pub leniency: Option<Leniency>,
}

impl RunOutcome {
    pub fn exited_cleanly(&self) -> bool {
        self.exit_code == Some(0) && !self.timed_out && !self.output_limit_exceeded
    }

    pub fn succeeded(&self) -> bool {
        self.leniency.is_some() || self.exited_cleanly()
    }
}
