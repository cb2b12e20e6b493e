//! Shell command execution with a deadline.

use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use nix::sys::signal::{killpg, Signal};
use nix::unistd::Pid;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::Command;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use queuectl_core::{ExecutionOutcome, Job};

/// How long to keep draining pipes after the shell has exited or been killed.
///
/// A background process that inherited the pipes can hold them open forever.
const DRAIN_GRACE: Duration = Duration::from_secs(2);

/// Output and outcome of one attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Execution {
    /// Combined stdout/stderr in arrival order (lossy UTF-8).
    pub output: String,
    pub outcome: ExecutionOutcome,
}

impl Execution {
    /// Error text for `last_error` and the execution record; `None` on success.
    pub fn error_message(&self) -> Option<String> {
        self.outcome.error_message(&self.output)
    }
}

/// Runs job commands through `sh -c`.
///
/// Stateless; one attempt per call, never retries. Each command runs in its
/// own process group so a timeout kills the whole tree.
#[derive(Debug, Clone)]
pub struct ShellExecutor {
    shell: String,
}

impl Default for ShellExecutor {
    fn default() -> Self {
        Self {
            shell: "sh".to_string(),
        }
    }
}

impl ShellExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Use a different POSIX shell binary.
    pub fn with_shell(mut self, shell: impl Into<String>) -> Self {
        self.shell = shell.into();
        self
    }

    /// Run `job.command` under the job's deadline.
    pub async fn run(&self, job: &Job) -> Execution {
        self.run_command(&job.command, job.timeout()).await
    }

    pub async fn run_command(&self, command: &str, timeout: Duration) -> Execution {
        let mut cmd = Command::new(&self.shell);
        cmd.arg("-c")
            .arg(command)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .process_group(0)
            .kill_on_drop(true);

        let mut child = match cmd.spawn() {
            Ok(child) => child,
            Err(e) => {
                return Execution {
                    output: String::new(),
                    outcome: ExecutionOutcome::SpawnFailure(e.to_string()),
                };
            }
        };

        let buffer = Arc::new(Mutex::new(Vec::new()));
        let readers = [
            spawn_pump(child.stdout.take(), buffer.clone()),
            spawn_pump(child.stderr.take(), buffer.clone()),
        ];

        let outcome = match tokio::time::timeout(timeout, child.wait()).await {
            Ok(Ok(status)) => match status.code() {
                Some(0) => ExecutionOutcome::Success,
                Some(code) => ExecutionOutcome::NonZeroExit(code),
                // Terminated by a signal.
                None => ExecutionOutcome::NonZeroExit(-1),
            },
            Ok(Err(e)) => ExecutionOutcome::SpawnFailure(e.to_string()),
            Err(_) => {
                if let Some(pid) = child.id().and_then(|p| i32::try_from(p).ok()) {
                    if let Err(e) = killpg(Pid::from_raw(pid), Signal::SIGKILL) {
                        warn!(pid, error = %e, "failed to kill process group");
                    }
                }
                if let Err(e) = child.kill().await {
                    debug!(error = %e, "child already gone after timeout");
                }
                ExecutionOutcome::Timeout(timeout)
            }
        };

        for reader in readers {
            drain(reader).await;
        }

        let bytes = buffer.lock().await;
        Execution {
            output: String::from_utf8_lossy(&bytes).into_owned(),
            outcome,
        }
    }
}

fn spawn_pump<R>(reader: Option<R>, buffer: Arc<Mutex<Vec<u8>>>) -> JoinHandle<()>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let Some(mut reader) = reader else {
            return;
        };
        let mut chunk = [0u8; 4096];
        loop {
            match reader.read(&mut chunk).await {
                Ok(0) => break,
                Ok(n) => buffer.lock().await.extend_from_slice(&chunk[..n]),
                Err(e) => {
                    debug!(error = %e, "output pipe read failed");
                    break;
                }
            }
        }
    })
}

async fn drain(mut reader: JoinHandle<()>) {
    if tokio::time::timeout(DRAIN_GRACE, &mut reader).await.is_err() {
        reader.abort();
    }
}
