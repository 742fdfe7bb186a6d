use std::{collections::HashMap, sync::Arc};

use crate::core::{
    domain::{ExecutionRequest, Language},
    errors::ExecutionError,
    result::ExecutionResult,
    traits::{
        project_store::{ProjectStore, ProjectUpdate},
        runner::{LanguageRunner, RunTarget},
    },
    workspace::{Workspace, WorkspaceManager},
};

/// Language-keyed table of runners. An empty registry rejects everything.
#[derive(Clone, Debug, Default)]
pub struct RunnerRegistry {
    runners: HashMap<Language, Arc<dyn LanguageRunner>>,
}

impl RunnerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, runner: Arc<dyn LanguageRunner>) {
        self.runners.insert(runner.language(), runner);
    }

    pub fn with(mut self, runner: Arc<dyn LanguageRunner>) -> Self {
        self.register(runner);
        self
    }

    pub fn get(&self, language: &Language) -> Option<Arc<dyn LanguageRunner>> {
        self.runners.get(language).cloned()
    }

    pub fn languages(&self) -> Vec<Language> {
        self.runners.keys().cloned().collect()
    }
}

/// Entry point for one execution: validates the language, drives the
/// runner through its stages inside a fresh workspace, and always releases
/// that workspace before returning.
#[derive(Clone, Debug)]
pub struct ExecutionCoordinator {
    runners: RunnerRegistry,
    workspaces: Arc<WorkspaceManager>,
    store: Option<Arc<dyn ProjectStore>>,
}

impl ExecutionCoordinator {
    pub fn new(runners: RunnerRegistry, workspaces: Arc<WorkspaceManager>) -> Self {
        Self {
            runners,
            workspaces,
            store: None,
        }
    }

    pub fn with_store(self, store: Arc<dyn ProjectStore>) -> Self {
        Self {
            store: Some(store),
            ..self
        }
    }

    pub fn workspaces(&self) -> &Arc<WorkspaceManager> {
        &self.workspaces
    }

    #[tracing::instrument(skip_all, fields(execution_id = %request.id, language = %request.language))]
    pub async fn execute(&self, request: ExecutionRequest) -> ExecutionResult {
        let result = self.dispatch(&request).await;

        tracing::info!(
            success = result.success,
            stage = ?result.stage,
            timed_out = result.timed_out(),
            "Execution finished"
        );

        self.persist(&request, &result);
        result
    }

    async fn dispatch(&self, request: &ExecutionRequest) -> ExecutionResult {
        let Some(runner) = self.runners.get(&request.language) else {
            tracing::warn!("Rejecting unsupported language");
            return ExecutionResult::rejected(
                request,
                ExecutionError::UnsupportedLanguage {
                    language: request.language.to_string(),
                },
            );
        };

        let workspace = match self.workspaces.acquire(&request.language).await {
            Ok(workspace) => workspace,
            Err(err) => {
                tracing::error!(error = %err, "Failed to acquire workspace");
                return ExecutionResult::rejected(request, err);
            }
        };

        let result = self.run_stages(runner.as_ref(), &workspace, request).await;
        self.workspaces.release(workspace).await;
        result
    }

    async fn run_stages(
        &self,
        runner: &dyn LanguageRunner,
        workspace: &Workspace,
        request: &ExecutionRequest,
    ) -> ExecutionResult {
        let source = match runner.prepare(workspace, &request.source_code).await {
            Ok(source) => source,
            Err(err) => {
                tracing::error!(error = %err, "Failed to prepare source");
                return ExecutionResult::rejected(request, err);
            }
        };

        let target = match runner.compile(workspace, &source).await {
            Ok(Some(target)) => target,
            Ok(None) => RunTarget::from(source),
            Err(err) => {
                tracing::debug!(error = %err, "Compile stage failed");
                return ExecutionResult::compile_failed(request, err);
            }
        };

        let timeout = runner.timeout();
        match runner
            .run(workspace, &target, request.piped_input(), timeout)
            .await
        {
            Ok(outcome) => ExecutionResult::from_run(request, outcome, timeout),
            Err(err) => {
                tracing::error!(error = %err, "Failed to launch run stage");
                ExecutionResult::run_error(request, err)
            }
        }
    }

    /// Fire-and-forget write of the result to the project store. Never
    /// delays or alters the result returned to the caller.
    fn persist(&self, request: &ExecutionRequest, result: &ExecutionResult) {
        let (Some(store), Some(project_id)) = (self.store.clone(), request.project_id.clone())
        else {
            return;
        };

        let update = ProjectUpdate {
            language: request.language.clone(),
            code: request.source_code.clone(),
            output: result.combined_output.clone(),
            input: request.stdin.clone(),
        };

        tokio::spawn(async move {
            if let Err(err) = store.update_project(&project_id, update).await {
                tracing::warn!(project_id = %project_id, error = %err, "Failed to persist execution result");
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use std::{
        path::PathBuf,
        sync::atomic::{AtomicUsize, Ordering},
        time::Duration,
    };

    use tokio::sync::oneshot;
    use uuid::Uuid;

    use super::*;
    use crate::core::{
        domain::{ExecutionStage, RunOutcome},
        errors::StoreError,
        traits::{
            project_store::MockProjectStore,
            runner::{MockLanguageRunner, OutcomePolicy, SourceFile},
        },
        tracker::ArtifactTracker,
    };

    fn workspace_manager() -> Arc<WorkspaceManager> {
        let root = std::env::temp_dir().join(format!("codeplay_coord_{}", Uuid::new_v4()));
        Arc::new(WorkspaceManager::new(root, Arc::new(ArtifactTracker::new())))
    }

    fn mock_runner(language: Language) -> MockLanguageRunner {
        let mut runner = MockLanguageRunner::new();
        runner.expect_language().return_const(language);
        runner.expect_timeout().return_const(Duration::from_secs(10));
        runner.expect_prepare().returning(|workspace, code| {
            let path = workspace.path("main.src");
            std::fs::write(&path, code).unwrap();
            workspace.track(&path);
            Ok(SourceFile {
                path,
                policy: OutcomePolicy::Strict,
            })
        });
        runner
    }

    fn coordinator(runner: MockLanguageRunner, workspaces: Arc<WorkspaceManager>) -> ExecutionCoordinator {
        ExecutionCoordinator::new(RunnerRegistry::new().with(Arc::new(runner)), workspaces)
    }

    #[tokio::test]
    async fn test_unsupported_language_never_touches_filesystem() {
        let workspaces = workspace_manager();
        let coordinator = ExecutionCoordinator::new(RunnerRegistry::new(), workspaces.clone());

        let result = coordinator
            .execute(ExecutionRequest::new(Language::from("ruby"), "puts 1"))
            .await;

        assert!(!result.success);
        assert_eq!(result.stage, ExecutionStage::None);
        assert!(matches!(
            result.error,
            Some(ExecutionError::UnsupportedLanguage { .. })
        ));
        assert!(!workspaces.temp_root().exists());
        assert_eq!(workspaces.tracker().snapshot().total_files_created, 0);
    }

    #[tokio::test]
    async fn test_compile_failure_skips_run_and_releases_workspace() {
        let workspaces = workspace_manager();
        let mut runner = mock_runner(Language::C);
        runner.expect_compile().times(1).returning(|_, _| {
            Err(ExecutionError::CompileFailed {
                diagnostics: "main.c:1: error: expected ';'".to_string(),
            })
        });
        runner.expect_run().times(0);

        let result = coordinator(runner, workspaces.clone())
            .execute(ExecutionRequest::new(Language::C, "int main() {"))
            .await;

        assert!(!result.success);
        assert_eq!(result.stage, ExecutionStage::Compile);
        assert_eq!(
            result.error_message(),
            Some("main.c:1: error: expected ';'".to_string())
        );
        assert_eq!(workspaces.current_temp_files().await, 0);
        let snapshot = workspaces.tracker().snapshot();
        assert_eq!(snapshot.total_files_created, snapshot.total_files_deleted);
        let _ = std::fs::remove_dir_all(workspaces.temp_root());
    }

    #[tokio::test]
    async fn test_successful_run_receives_piped_input() {
        let workspaces = workspace_manager();
        let mut runner = mock_runner(Language::Python);
        runner.expect_compile().returning(|_, _| Ok(None));
        runner
            .expect_run()
            .withf(|_, target, stdin, timeout| {
                target.path.ends_with("main.src")
                    && stdin.as_deref() == Some("42\n")
                    && *timeout == Duration::from_secs(10)
            })
            .times(1)
            .returning(|_, _, stdin, _| {
                Ok(RunOutcome {
                    stdout: stdin.unwrap_or_default(),
                    exit_code: Some(0),
                    ..Default::default()
                })
            });

        let result = coordinator(runner, workspaces.clone())
            .execute(ExecutionRequest::new(Language::Python, "print(input())").with_stdin("42"))
            .await;

        assert!(result.success);
        assert_eq!(result.stage, ExecutionStage::Run);
        assert_eq!(result.stdout, "42\n");
        assert_eq!(workspaces.current_temp_files().await, 0);
        let _ = std::fs::remove_dir_all(workspaces.temp_root());
    }

    #[tokio::test]
    async fn test_run_launch_error_is_reported_at_run_stage() {
        let workspaces = workspace_manager();
        let mut runner = mock_runner(Language::Java);
        runner.expect_compile().returning(|_, source| {
            Ok(Some(RunTarget {
                path: source.path.parent().map(PathBuf::from).unwrap_or_default(),
                policy: OutcomePolicy::Strict,
            }))
        });
        runner.expect_run().returning(|_, _, _, _| {
            Err(ExecutionError::ToolchainUnavailable {
                language: Language::Java,
                tried: vec!["java".to_string()],
            })
        });

        let result = coordinator(runner, workspaces.clone())
            .execute(ExecutionRequest::new(Language::Java, "class Main {}"))
            .await;

        assert!(!result.success);
        assert_eq!(result.stage, ExecutionStage::Run);
        assert!(result.combined_output.contains("install one of [java]"));
        assert_eq!(workspaces.current_temp_files().await, 0);
        let _ = std::fs::remove_dir_all(workspaces.temp_root());
    }

    #[tokio::test]
    async fn test_result_is_persisted_for_projects() {
        let workspaces = workspace_manager();
        let mut runner = mock_runner(Language::NodeJs);
        runner.expect_compile().returning(|_, _| Ok(None));
        runner.expect_run().returning(|_, _, _, _| {
            Ok(RunOutcome {
                stdout: "hi\n".to_string(),
                exit_code: Some(0),
                ..Default::default()
            })
        });

        let (tx, rx) = oneshot::channel();
        let tx = std::sync::Mutex::new(Some(tx));
        let mut store = MockProjectStore::new();
        store
            .expect_update_project()
            .withf(|project_id, update| project_id == "proj-1" && update.code == "console.log('hi')")
            .times(1)
            .returning(move |_, update| {
                if let Some(tx) = tx.lock().unwrap().take() {
                    tx.send(update).unwrap();
                }
                Ok(())
            });

        let result = coordinator(runner, workspaces.clone())
            .with_store(Arc::new(store))
            .execute(ExecutionRequest::new(Language::NodeJs, "console.log('hi')").with_project("proj-1"))
            .await;

        let update = tokio::time::timeout(Duration::from_secs(1), rx)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(update.output, result.combined_output);
        assert_eq!(update.language, Language::NodeJs);
        let _ = std::fs::remove_dir_all(workspaces.temp_root());
    }

    #[tokio::test]
    async fn test_store_failure_does_not_affect_result() {
        let workspaces = workspace_manager();
        let mut runner = mock_runner(Language::Python);
        runner.expect_compile().returning(|_, _| Ok(None));
        runner.expect_run().returning(|_, _, _, _| {
            Ok(RunOutcome {
                stdout: "ok\n".to_string(),
                exit_code: Some(0),
                ..Default::default()
            })
        });

        let calls = Arc::new(AtomicUsize::new(0));
        let store_calls = calls.clone();
        let mut store = MockProjectStore::new();
        store.expect_update_project().returning(move |project_id, _| {
            store_calls.fetch_add(1, Ordering::SeqCst);
            Err(StoreError::NotFound {
                project_id: project_id.to_string(),
            })
        });

        let result = coordinator(runner, workspaces.clone())
            .with_store(Arc::new(store))
            .execute(ExecutionRequest::new(Language::Python, "print('ok')").with_project("missing"))
            .await;

        assert!(result.success);
        assert_eq!(result.combined_output, "ok\n");
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        let _ = std::fs::remove_dir_all(workspaces.temp_root());
    }

    #[tokio::test]
    async fn test_requests_without_project_are_not_persisted() {
        let workspaces = workspace_manager();
        let mut runner = mock_runner(Language::Python);
        runner.expect_compile().returning(|_, _| Ok(None));
        runner.expect_run().returning(|_, _, _, _| {
            Ok(RunOutcome {
                exit_code: Some(0),
                ..Default::default()
            })
        });
        let mut store = MockProjectStore::new();
        store.expect_update_project().times(0);

        let result = coordinator(runner, workspaces.clone())
            .with_store(Arc::new(store))
            .execute(ExecutionRequest::new(Language::Python, "pass"))
            .await;

        assert!(result.success);
        tokio::time::sleep(Duration::from_millis(20)).await;
        let _ = std::fs::remove_dir_all(workspaces.temp_root());
    }
}
