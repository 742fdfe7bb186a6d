use std::sync::Arc;

use tokio::{
    io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader},
    sync::mpsc::{Receiver, channel},
    task::JoinHandle,
};
use tokio_stream::{StreamExt, wrappers::LinesStream};

use crate::{
    api::models::{
        CleanupStatusResponse, Command, Envelope, ExecuteCodeBody, ExecuteResponse, Reply,
        ReplyBody,
    },
    core::{coordinator::ExecutionCoordinator, domain::ExecutionRequest},
};

const REPLY_CHANNEL_SIZE: usize = 128;

/// Line-oriented JSON front end: one request envelope per input line, one
/// reply per output line. Each request runs on its own task, so replies may
/// come back out of order; `requestId` correlates them.
#[derive(Clone, Debug)]
pub struct LineService {
    coordinator: Arc<ExecutionCoordinator>,
}

impl LineService {
    pub fn new(coordinator: Arc<ExecutionCoordinator>) -> Self {
        Self { coordinator }
    }

    /// Serves until `reader` reaches EOF, then waits for every in-flight
    /// request to be answered.
    pub async fn serve<R, W>(&self, reader: R, writer: W) -> std::io::Result<()>
    where
        R: AsyncRead + Unpin,
        W: AsyncWrite + Unpin + Send + 'static,
    {
        let (reply_tx, reply_rx) = channel::<Reply>(REPLY_CHANNEL_SIZE);
        let writer = spawn_writer(writer, reply_rx);

        let mut lines = LinesStream::new(BufReader::new(reader).lines());
        while let Some(line) = lines.next().await {
            let line = match line {
                Ok(line) => line,
                Err(e) => {
                    tracing::error!(error = %e, "Failed to read request line");
                    break;
                }
            };
            if line.trim().is_empty() {
                continue;
            }

            let service = self.clone();
            let reply_tx = reply_tx.clone();
            tokio::spawn(async move {
                let reply = service.handle_line(&line).await;
                if reply_tx.send(reply).await.is_err() {
                    tracing::warn!("Reply writer is gone, dropping reply");
                }
            });
        }

        tracing::info!("Input closed, waiting for in-flight requests");
        drop(reply_tx);
        writer
            .await
            .map_err(|e| std::io::Error::other(e.to_string()))?
    }

    pub async fn handle_line(&self, line: &str) -> Reply {
        match serde_json::from_str::<Envelope>(line) {
            Ok(envelope) => {
                let body = self.handle_command(envelope.command).await;
                Reply {
                    request_id: envelope.request_id,
                    body,
                }
            }
            Err(e) => {
                tracing::warn!(error = %e, "Malformed request line");
                Reply {
                    request_id: salvage_request_id(line),
                    body: ReplyBody::Execute(ExecuteResponse::invalid(e.to_string())),
                }
            }
        }
    }

    async fn handle_command(&self, command: Command) -> ReplyBody {
        match command {
            Command::Execute(body) => ReplyBody::Execute(self.execute(body).await),
            Command::CleanupStatus => {
                let workspaces = self.coordinator.workspaces();
                ReplyBody::Cleanup(CleanupStatusResponse {
                    success: true,
                    stats: workspaces.stats().await,
                    current_files: workspaces.file_details().await,
                    message: None,
                })
            }
            Command::ForceCleanup => {
                let workspaces = self.coordinator.workspaces();
                let stats = workspaces.force_cleanup().await;
                ReplyBody::Cleanup(CleanupStatusResponse {
                    success: true,
                    stats,
                    current_files: workspaces.file_details().await,
                    message: Some("Cleanup completed".to_string()),
                })
            }
        }
    }

    #[tracing::instrument(skip_all, fields(user_id = body.user_id.as_deref().unwrap_or("-")))]
    async fn execute(&self, body: ExecuteCodeBody) -> ExecuteResponse {
        match ExecutionRequest::try_from(body) {
            Ok(request) => self.coordinator.execute(request).await.into(),
            Err(e) => ExecuteResponse::invalid(e.to_string()),
        }
    }
}

fn spawn_writer<W>(mut writer: W, mut reply_rx: Receiver<Reply>) -> JoinHandle<std::io::Result<()>>
where
    W: AsyncWrite + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        while let Some(reply) = reply_rx.recv().await {
            let mut line = match serde_json::to_string(&reply) {
                Ok(line) => line,
                Err(e) => {
                    tracing::error!(error = %e, "Failed to serialize reply");
                    continue;
                }
            };
            line.push('\n');
            writer.write_all(line.as_bytes()).await?;
            writer.flush().await?;
        }
        Ok(())
    })
}

fn salvage_request_id(line: &str) -> Option<String> {
    serde_json::from_str::<serde_json::Value>(line)
        .ok()?
        .get("requestId")?
        .as_str()
        .map(str::to_string)
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use serde_json::Value;
    use uuid::Uuid;

    use super::*;
    use crate::core::{
        coordinator::RunnerRegistry,
        domain::{Language, RunOutcome},
        traits::runner::{MockLanguageRunner, OutcomePolicy, SourceFile},
        tracker::ArtifactTracker,
        workspace::WorkspaceManager,
    };

    fn echo_runner() -> MockLanguageRunner {
        let mut runner = MockLanguageRunner::new();
        runner.expect_language().return_const(Language::Python);
        runner.expect_timeout().return_const(Duration::from_secs(10));
        runner.expect_prepare().returning(|workspace, _| {
            Ok(SourceFile {
                path: workspace.path("main.py"),
                policy: OutcomePolicy::Strict,
            })
        });
        runner.expect_compile().returning(|_, _| Ok(None));
        runner.expect_run().returning(|_, _, stdin, _| {
            Ok(RunOutcome {
                stdout: stdin.unwrap_or_default(),
                exit_code: Some(0),
                ..Default::default()
            })
        });
        runner
    }

    fn service() -> (LineService, Arc<WorkspaceManager>) {
        let root = std::env::temp_dir().join(format!("codeplay_service_{}", Uuid::new_v4()));
        let workspaces = Arc::new(WorkspaceManager::new(root, Arc::new(ArtifactTracker::new())));
        let coordinator = ExecutionCoordinator::new(
            RunnerRegistry::new().with(Arc::new(echo_runner())),
            workspaces.clone(),
        );
        (LineService::new(Arc::new(coordinator)), workspaces)
    }

    async fn serve(service: &LineService, input: &str) -> Vec<Value> {
        let (mut client, server) = tokio::io::duplex(64 * 1024);
        service.serve(input.as_bytes(), server).await.unwrap();

        let mut output = String::new();
        tokio::io::AsyncReadExt::read_to_string(&mut client, &mut output)
            .await
            .unwrap();
        output
            .lines()
            .map(|line| serde_json::from_str(line).unwrap())
            .collect()
    }

    #[tokio::test]
    async fn test_replies_to_each_request_line() {
        let (service, workspaces) = service();
        let input = concat!(
            r#"{"requestId":"a","command":"execute","userId":"u","code":"x","language":"python","input":"hi"}"#,
            "\n\n",
            r#"{"requestId":"b","command":"execute","code":"x","language":"ruby"}"#,
            "\n",
            r#"{"requestId":"c","command":"cleanup_status"}"#,
            "\n",
        );

        let mut replies = serve(&service, input).await;
        replies.sort_by_key(|reply| reply["requestId"].as_str().map(str::to_string));

        assert_eq!(replies.len(), 3);
        assert_eq!(replies[0]["success"], true);
        assert_eq!(replies[0]["output"], "hi\n");
        assert_eq!(replies[0]["error"], Value::Null);
        assert_eq!(replies[1]["success"], false);
        assert_eq!(replies[1]["message"], "Language not supported");
        assert_eq!(replies[2]["success"], true);
        assert!(replies[2]["stats"]["totalFilesCreated"].is_u64());
        assert!(replies[2]["currentFiles"].is_array());
        assert_eq!(workspaces.current_temp_files().await, 0);
        let _ = std::fs::remove_dir_all(workspaces.temp_root());
    }

    #[tokio::test]
    async fn test_malformed_line_gets_invalid_reply_without_workspace() {
        let (service, workspaces) = service();

        let reply = service
            .handle_line(r#"{"requestId":"z","command":"execute","language":42}"#)
            .await;

        assert_eq!(reply.request_id.as_deref(), Some("z"));
        let ReplyBody::Execute(response) = reply.body else {
            panic!("expected execute-shaped reply");
        };
        assert_eq!(response.message, "Invalid request");
        assert!(!response.success);
        assert_eq!(workspaces.tracker().snapshot().total_files_created, 0);
        assert!(!workspaces.temp_root().exists());

        let reply = service.handle_line("not json").await;
        assert_eq!(reply.request_id, None);
    }

    #[tokio::test]
    async fn test_execute_without_code_is_invalid() {
        let (service, workspaces) = service();

        let reply = service
            .handle_line(r#"{"requestId":"e","command":"execute","language":"python"}"#)
            .await;

        let ReplyBody::Execute(response) = reply.body else {
            panic!("expected execute-shaped reply");
        };
        assert_eq!(response.message, "Invalid request");
        assert_eq!(
            response.error.as_deref(),
            Some("Missing required field: code")
        );
        assert!(!workspaces.temp_root().exists());
    }

    #[tokio::test]
    async fn test_force_cleanup_reports_message() {
        let (service, workspaces) = service();
        std::fs::create_dir_all(workspaces.temp_root()).unwrap();
        std::fs::write(workspaces.temp_root().join("stale.txt"), b"x").unwrap();

        let reply = service.handle_line(r#"{"command":"force_cleanup"}"#).await;

        let ReplyBody::Cleanup(response) = reply.body else {
            panic!("expected cleanup reply");
        };
        assert_eq!(response.message.as_deref(), Some("Cleanup completed"));
        assert_eq!(response.stats.current_temp_files, 0);
        assert_eq!(response.stats.total_files_deleted, 1);
        let _ = std::fs::remove_dir_all(workspaces.temp_root());
    }
}
