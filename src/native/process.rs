use std::{io::ErrorKind, process::Stdio, sync::Arc, time::Instant};

use tokio::{
    io::{AsyncRead, AsyncReadExt, AsyncWriteExt},
    process::{Child, Command},
    sync::Notify,
    task::JoinHandle,
};

use crate::{
    constants::STREAM_DRAIN_GRACE,
    core::{
        errors::ProcessError,
        traits::process::{ProcessOutput, ProcessRunner, ProcessSpec},
    },
};

/// Runs subprocesses directly on the host.
///
/// Each child leads its own process group. The whole group is killed on
/// timeout, on output overrun and after a normal exit, so background
/// descendants never outlive the call.
#[derive(Clone, Debug, Default)]
pub struct NativeProcessRunner;

impl NativeProcessRunner {
    pub fn new() -> Self {
        Self
    }
}

/// Kills the child's process group if `run` is dropped before the child was
/// supervised to the end. `kill_on_drop` only reaches the group leader.
struct GroupGuard {
    pgid: Option<u32>,
}

impl GroupGuard {
    fn kill(&mut self) {
        kill_group(self.pgid.take());
    }
}

impl Drop for GroupGuard {
    fn drop(&mut self) {
        self.kill();
    }
}

enum Finish {
    Exited(std::io::Result<std::process::ExitStatus>),
    TimedOut,
    OutputLimitExceeded,
}

#[async_trait::async_trait]
impl ProcessRunner for NativeProcessRunner {
    #[tracing::instrument(skip_all, fields(program = %spec.program))]
    async fn run(&self, spec: ProcessSpec) -> Result<ProcessOutput, ProcessError> {
        let mut command = Command::new(&spec.program);
        command
            .args(&spec.args)
            .current_dir(&spec.cwd)
            .stdin(if spec.stdin.is_some() {
                Stdio::piped()
            } else {
                Stdio::null()
            })
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        #[cfg(unix)]
        command.process_group(0);

        let started = Instant::now();
        let mut child = command.spawn().map_err(|e| match e.kind() {
            ErrorKind::NotFound => ProcessError::NotFound {
                program: spec.program.clone(),
            },
            _ => ProcessError::Spawn {
                program: spec.program.clone(),
                msg: e.to_string(),
            },
        })?;
        let pgid = child.id();
        let mut group = GroupGuard { pgid };
        tracing::debug!(pid = ?pgid, args = ?spec.args, "Spawned process");

        if let (Some(input), Some(mut pipe)) = (spec.stdin.clone(), child.stdin.take()) {
            // Written from a separate task so a child that never reads cannot
            // block supervision. Dropping the pipe closes the child's input.
            tokio::spawn(async move {
                if let Err(e) = pipe.write_all(input.as_bytes()).await {
                    tracing::debug!(error = %e, "Child closed stdin early");
                }
                let _ = pipe.shutdown().await;
            });
        }

        let limit_hit = Arc::new(Notify::new());
        let stdout = spawn_reader(child.stdout.take(), spec.max_output_bytes, &limit_hit);
        let stderr = spawn_reader(child.stderr.take(), spec.max_output_bytes, &limit_hit);

        let finish = tokio::select! {
            waited = tokio::time::timeout(spec.timeout, child.wait()) => match waited {
                Ok(status) => Finish::Exited(status),
                Err(_) => Finish::TimedOut,
            },
            _ = limit_hit.notified() => Finish::OutputLimitExceeded,
        };

        // Also reaps stragglers a normally exiting child left in its group.
        group.kill();

        let (status, timed_out, output_limit_exceeded) = match finish {
            Finish::Exited(status) => (
                status.map_err(|e| ProcessError::Io { msg: e.to_string() })?,
                false,
                false,
            ),
            Finish::TimedOut => {
                tracing::debug!(timeout = ?spec.timeout, "Process timed out, killed");
                (reap(&mut child).await?, true, false)
            }
            Finish::OutputLimitExceeded => {
                tracing::debug!(limit = spec.max_output_bytes, "Process exceeded output limit, killed");
                (reap(&mut child).await?, false, true)
            }
        };

        let (stdout, stdout_overrun) = drain(stdout).await;
        let (stderr, stderr_overrun) = drain(stderr).await;

        let output = ProcessOutput {
            stdout: String::from_utf8_lossy(&stdout).into_owned(),
            stderr: String::from_utf8_lossy(&stderr).into_owned(),
            exit_code: status.code(),
            signal: exit_signal(&status),
            timed_out,
            output_limit_exceeded: output_limit_exceeded || stdout_overrun || stderr_overrun,
            elapsed_ms: started.elapsed().as_millis() as u64,
        };
        tracing::debug!(
            exit_code = ?output.exit_code,
            signal = ?output.signal,
            elapsed_ms = output.elapsed_ms,
            "Process finished"
        );
        Ok(output)
    }
}

fn spawn_reader<R>(
    pipe: Option<R>,
    limit: usize,
    limit_hit: &Arc<Notify>,
) -> Option<JoinHandle<(Vec<u8>, bool)>>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    let limit_hit = limit_hit.clone();
    pipe.map(|pipe| tokio::spawn(read_capped(pipe, limit, limit_hit)))
}

/// Reads until EOF or until `limit` bytes were collected. The flag reports
/// an overrun.
async fn read_capped<R: AsyncRead + Unpin>(
    mut pipe: R,
    limit: usize,
    limit_hit: Arc<Notify>,
) -> (Vec<u8>, bool) {
    let mut collected = Vec::new();
    let mut chunk = [0u8; 8192];
    loop {
        match pipe.read(&mut chunk).await {
            Ok(0) | Err(_) => return (collected, false),
            Ok(n) => {
                let room = limit.saturating_sub(collected.len());
                if n > room {
                    collected.extend_from_slice(&chunk[..room]);
                    limit_hit.notify_one();
                    return (collected, true);
                }
                collected.extend_from_slice(&chunk[..n]);
            }
        }
    }
}

async fn drain(reader: Option<JoinHandle<(Vec<u8>, bool)>>) -> (Vec<u8>, bool) {
    let Some(mut reader) = reader else {
        return (Vec::new(), false);
    };
    match tokio::time::timeout(STREAM_DRAIN_GRACE, &mut reader).await {
        Ok(Ok(collected)) => collected,
        Ok(Err(e)) => {
            tracing::warn!(error = %e, "Output reader failed");
            (Vec::new(), false)
        }
        Err(_) => {
            // Some process outside the group still holds the pipe open.
            tracing::warn!("Output pipe still open after grace period, abandoning");
            reader.abort();
            (Vec::new(), false)
        }
    }
}

async fn reap(child: &mut Child) -> Result<std::process::ExitStatus, ProcessError> {
    if let Err(e) = child.start_kill() {
        tracing::debug!(error = %e, "Child already gone");
    }
    child
        .wait()
        .await
        .map_err(|e| ProcessError::Io { msg: e.to_string() })
}

#[cfg(unix)]
fn kill_group(pgid: Option<u32>) {
    use nix::{
        errno::Errno,
        sys::signal::{Signal, killpg},
        unistd::Pid,
    };

    let Some(pgid) = pgid else {
        return;
    };
    match killpg(Pid::from_raw(pgid as i32), Signal::SIGKILL) {
        Ok(()) | Err(Errno::ESRCH) => {}
        Err(e) => tracing::warn!(pgid, error = %e, "Failed to kill process group"),
    }
}

#[cfg(not(unix))]
fn kill_group(_pgid: Option<u32>) {}

#[cfg(unix)]
fn exit_signal(status: &std::process::ExitStatus) -> Option<i32> {
    use std::os::unix::process::ExitStatusExt;
    status.signal()
}

#[cfg(not(unix))]
fn exit_signal(_status: &std::process::ExitStatus) -> Option<i32> {
    None
}
