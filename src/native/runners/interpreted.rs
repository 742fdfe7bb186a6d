use std::{ops::RangeInclusive, sync::Arc, time::Duration};

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
    native::{
        listener,
        runners::{launch_error, run_outcome},
    },
};

#[derive(Clone, Debug)]
struct ListenerSettings {
    ports: RangeInclusive<u16>,
    demo_window: Duration,
}

/// Runner for languages executed straight from source: Python and Node.js.
#[derive(Debug)]
pub struct InterpretedRunner {
    language: Language,
    program: String,
    file_name: &'static str,
    timeout: Duration,
    max_output_bytes: usize,
    listener: Option<ListenerSettings>,
    process: Arc<dyn ProcessRunner>,
}

impl InterpretedRunner {
    pub fn python(config: &Config, process: Arc<dyn ProcessRunner>) -> Self {
        Self {
            language: Language::Python,
            program: config.toolchains.python.clone(),
            file_name: "main.py",
            timeout: config.interpreted_timeout,
            max_output_bytes: config.max_output_bytes,
            listener: None,
            process,
        }
    }

    /// Node.js runner. Code that starts a listener is rewritten to a random
    /// port and judged under the server policy.
    pub fn node(config: &Config, process: Arc<dyn ProcessRunner>) -> Self {
        Self {
            language: Language::NodeJs,
            program: config.toolchains.node.clone(),
            file_name: "main.js",
            timeout: config.interpreted_timeout,
            max_output_bytes: config.max_output_bytes,
            listener: Some(ListenerSettings {
                ports: config.listener_ports.clone(),
                demo_window: config.listener_demo_window,
            }),
            process,
        }
    }
}

#[async_trait::async_trait]
impl LanguageRunner for InterpretedRunner {
    fn language(&self) -> Language {
        self.language.clone()
    }

    fn timeout(&self) -> Duration {
        self.timeout
    }

    async fn prepare(&self, workspace: &Workspace, code: &str) -> Result<SourceFile, ExecutionError> {
        let (code, policy) = match &self.listener {
            Some(settings) if listener::is_listener(code) => {
                let port = listener::pick_port(&settings.ports);
                tracing::info!(port, "Listener code detected, rewriting port");
                let wrapped = listener::wrap(
                    &listener::rewrite_ports(code, port),
                    port,
                    settings.demo_window,
                );
                (wrapped, OutcomePolicy::ServerDemo { port })
            }
            _ => (code.to_string(), OutcomePolicy::Strict),
        };

        let path = workspace.write_file(self.file_name, &code).await?;
        Ok(SourceFile { path, policy })
    }

    async fn compile(
        &self,
        _workspace: &Workspace,
        _source: &SourceFile,
    ) -> Result<Option<RunTarget>, ExecutionError> {
        Ok(None)
    }

    async fn run(
        &self,
        workspace: &Workspace,
        target: &RunTarget,
        stdin: Option<String>,
        timeout: Duration,
    ) -> Result<RunOutcome, ExecutionError> {
        let spec = ProcessSpec::new(self.program.as_str(), workspace.root(), timeout)
            .arg(target.path.to_string_lossy())
            .stdin(stdin)
            .max_output_bytes(self.max_output_bytes);

        let output = self
            .process
            .run(spec)
            .await
            .map_err(|e| launch_error(&self.language, &self.program, e))?;

        let mut outcome = run_outcome(output);
        listener::apply_policy(target.policy, &mut outcome);
        Ok(outcome)
    }
}

#[cfg(test)]
mod tests {
    use uuid::Uuid;

    use super::*;
    use crate::core::{
        errors::ProcessError,
        traits::process::{MockProcessRunner, ProcessOutput},
        tracker::ArtifactTracker,
        workspace::WorkspaceManager,
    };

    fn manager() -> WorkspaceManager {
        let root = std::env::temp_dir().join(format!("codeplay_interp_{}", Uuid::new_v4()));
        WorkspaceManager::new(root, Arc::new(ArtifactTracker::new()))
    }

    #[tokio::test]
    async fn test_python_runs_source_with_input() {
        let manager = manager();
        let workspace = manager.acquire(&Language::Python).await.unwrap();
        let mut process = MockProcessRunner::new();
        process
            .expect_run()
            .withf(|spec| {
                spec.program == "python3"
                    && spec.args.len() == 1
                    && spec.args[0].ends_with("main.py")
                    && spec.stdin.as_deref() == Some("7\n")
                    && spec.timeout == Duration::from_secs(10)
            })
            .times(1)
            .returning(|_| {
                Ok(ProcessOutput {
                    stdout: "49\n".to_string(),
                    exit_code: Some(0),
                    ..Default::default()
                })
            });
        let runner = InterpretedRunner::python(&Config::default(), Arc::new(process));

        let source = runner.prepare(&workspace, "n = int(input())\nprint(n * n)").await.unwrap();
        assert_eq!(source.policy, OutcomePolicy::Strict);
        assert_eq!(
            std::fs::read_to_string(&source.path).unwrap(),
            "n = int(input())\nprint(n * n)"
        );
        assert!(runner.compile(&workspace, &source).await.unwrap().is_none());

        let outcome = runner
            .run(&workspace, &source.into(), Some("7\n".to_string()), runner.timeout())
            .await
            .unwrap();

        assert_eq!(outcome.stdout, "49\n");
        assert!(outcome.succeeded());
        manager.release(workspace).await;
        let _ = std::fs::remove_dir_all(manager.temp_root());
    }

    #[tokio::test]
    async fn test_missing_interpreter_is_toolchain_unavailable() {
        let manager = manager();
        let workspace = manager.acquire(&Language::Python).await.unwrap();
        let mut process = MockProcessRunner::new();
        process.expect_run().returning(|spec| {
            Err(ProcessError::NotFound {
                program: spec.program,
            })
        });
        let runner = InterpretedRunner::python(&Config::default(), Arc::new(process));
        let source = runner.prepare(&workspace, "print(1)").await.unwrap();

        let err = runner
            .run(&workspace, &source.into(), None, runner.timeout())
            .await
            .unwrap_err();

        assert_eq!(
            err,
            ExecutionError::ToolchainUnavailable {
                language: Language::Python,
                tried: vec!["python3".to_string()],
            }
        );
        manager.release(workspace).await;
        let _ = std::fs::remove_dir_all(manager.temp_root());
    }

    #[tokio::test]
    async fn test_node_listener_is_rewritten_and_forgiven_on_timeout() {
        let manager = manager();
        let workspace = manager.acquire(&Language::NodeJs).await.unwrap();
        let mut process = MockProcessRunner::new();
        process.expect_run().returning(|_| {
            Ok(ProcessOutput {
                stdout: "Server running\n".to_string(),
                timed_out: true,
                signal: Some(9),
                ..Default::default()
            })
        });
        let runner = InterpretedRunner::node(&Config::default(), Arc::new(process));

        let source = runner
            .prepare(&workspace, "require('http').createServer().listen(3000);")
            .await
            .unwrap();
        let OutcomePolicy::ServerDemo { port } = source.policy else {
            panic!("expected server policy, got {:?}", source.policy);
        };
        assert!((4000..=9999).contains(&port));
        let written = std::fs::read_to_string(&source.path).unwrap();
        assert!(written.contains(&format!(".listen({});", port)));
        assert!(!written.contains(".listen(3000)"));

        let outcome = runner
            .run(&workspace, &source.into(), None, runner.timeout())
            .await
            .unwrap();

        assert!(outcome.timed_out);
        assert!(outcome.succeeded());
        manager.release(workspace).await;
        let _ = std::fs::remove_dir_all(manager.temp_root());
    }

    #[tokio::test]
    async fn test_plain_node_timeout_is_a_failure() {
        let manager = manager();
        let workspace = manager.acquire(&Language::NodeJs).await.unwrap();
        let mut process = MockProcessRunner::new();
        process.expect_run().returning(|_| {
            Ok(ProcessOutput {
                timed_out: true,
                ..Default::default()
            })
        });
        let runner = InterpretedRunner::node(&Config::default(), Arc::new(process));

        let source = runner.prepare(&workspace, "while (true) {}").await.unwrap();
        assert_eq!(source.policy, OutcomePolicy::Strict);

        let outcome = runner
            .run(&workspace, &source.into(), None, runner.timeout())
            .await
            .unwrap();

        assert!(!outcome.succeeded());
        manager.release(workspace).await;
        let _ = std::fs::remove_dir_all(manager.temp_root());
    }
}
