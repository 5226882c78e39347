//! External command runner with timeout and graceful termination.
//!
//! - Spawns the binary directly (no shell) in a fixed working directory
//! - stdout/stderr are captured and decoded lossily as UTF-8
//! - On timeout the child gets SIGTERM, then SIGKILL after a grace period
//! - Never returns `Err`: spawn failures and timeouts become a failed
//!   `CommandResult` with `exit_code == -1`

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tokio::process::{Child, Command};

/// Default per-command timeout.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(300);

/// How long a terminated child gets to exit before it is killed.
const TERMINATE_GRACE: Duration = Duration::from_secs(5);

/// Immutable record of one command invocation.
#[derive(Debug, Clone, PartialEq)]
pub struct CommandResult {
    success: bool,
    exit_code: i32,
    stdout: String,
    stderr: String,
    command_line: String,
    duration: Duration,
}

impl CommandResult {
    pub fn new(
        exit_code: i32,
        stdout: impl Into<String>,
        stderr: impl Into<String>,
        command_line: impl Into<String>,
        duration: Duration,
    ) -> Self {
        Self {
            success: exit_code == 0,
            exit_code,
            stdout: stdout.into(),
            stderr: stderr.into(),
            command_line: command_line.into(),
            duration,
        }
    }

    /// Synthetic failure for a command that never produced an exit status.
    pub fn failed(stderr: impl Into<String>, command_line: impl Into<String>, duration: Duration) -> Self {
        Self {
            success: false,
            exit_code: -1,
            stdout: String::new(),
            stderr: stderr.into(),
            command_line: command_line.into(),
            duration,
        }
    }

    pub fn timed_out(timeout: Duration, command_line: impl Into<String>) -> Self {
        Self::failed(
            format!("Command timed out after {} seconds", timeout.as_secs()),
            command_line,
            timeout,
        )
    }

    pub fn success(&self) -> bool {
        self.success
    }

    pub fn exit_code(&self) -> i32 {
        self.exit_code
    }

    pub fn stdout(&self) -> &str {
        &self.stdout
    }

    pub fn stderr(&self) -> &str {
        &self.stderr
    }

    pub fn command_line(&self) -> &str {
        &self.command_line
    }

    pub fn duration(&self) -> Duration {
        self.duration
    }
}

/// Something that can run the IaC binary with a set of arguments.
#[async_trait]
pub trait CommandRunner: Send + Sync {
    /// Directory commands run in.
    fn working_dir(&self) -> &Path;

    /// Run the binary with `args`, feeding `stdin` if given.
    async fn run(&self, args: &[String], timeout: Duration, stdin: Option<&str>) -> CommandResult;
}

/// Runs a real child process.
#[derive(Debug, Clone)]
pub struct ProcessRunner {
    binary: PathBuf,
    working_dir: PathBuf,
    grace: Duration,
}

impl ProcessRunner {
    pub fn new(binary: impl Into<PathBuf>, working_dir: impl Into<PathBuf>) -> Self {
        Self {
            binary: binary.into(),
            working_dir: working_dir.into(),
            grace: TERMINATE_GRACE,
        }
    }

    /// Override the SIGTERM → SIGKILL grace period.
    pub fn with_grace(mut self, grace: Duration) -> Self {
        self.grace = grace;
        self
    }

    pub fn binary(&self) -> &Path {
        &self.binary
    }

    fn command_line(&self, args: &[String]) -> String {
        std::iter::once(self.binary.display().to_string())
            .chain(args.iter().cloned())
            .collect::<Vec<_>>()
            .join(" ")
    }

    /// Ask the child to exit, then force it.
    async fn terminate(&self, child: &mut Child) {
        #[cfg(unix)]
        if let Some(pid) = child.id() {
            use nix::sys::signal::{Signal, kill};
            use nix::unistd::Pid;

            match kill(Pid::from_raw(pid as i32), Signal::SIGTERM) {
                Ok(()) => {
                    if tokio::time::timeout(self.grace, child.wait()).await.is_ok() {
                        return;
                    }
                    tracing::warn!(pid, "child ignored SIGTERM, killing");
                }
                Err(e) => tracing::warn!(pid, error = %e, "failed to send SIGTERM"),
            }
        }

        if let Err(e) = child.kill().await {
            tracing::warn!(error = %e, "failed to kill timed-out child");
        }
    }
}

async fn drain<R: AsyncRead + Unpin>(pipe: Option<R>) -> String {
    let mut buf = Vec::new();
    if let Some(mut pipe) = pipe {
        if let Err(e) = pipe.read_to_end(&mut buf).await {
            tracing::debug!(error = %e, "pipe read ended early");
        }
    }
    String::from_utf8_lossy(&buf).into_owned()
}

#[async_trait]
impl CommandRunner for ProcessRunner {
    fn working_dir(&self) -> &Path {
        &self.working_dir
    }

    async fn run(&self, args: &[String], timeout: Duration, stdin: Option<&str>) -> CommandResult {
        let command_line = self.command_line(args);
        let start = Instant::now();
        tracing::debug!(command = %command_line, dir = %self.working_dir.display(), "running command");

        let mut child = match Command::new(&self.binary)
            .args(args)
            .current_dir(&self.working_dir)
            .stdin(if stdin.is_some() { Stdio::piped() } else { Stdio::null() })
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            // only reached if this future is dropped; interrupts cancel between steps instead
            .kill_on_drop(true)
            .spawn()
        {
            Ok(child) => child,
            Err(e) => {
                tracing::error!(command = %command_line, error = %e, "failed to spawn command");
                return CommandResult::failed(e.to_string(), command_line, start.elapsed());
            }
        };

        if let (Some(input), Some(mut pipe)) = (stdin, child.stdin.take()) {
            if let Err(e) = pipe.write_all(input.as_bytes()).await {
                tracing::warn!(error = %e, "failed to write command stdin");
            }
            // pipe dropped here so the child sees EOF
        }

        // Drain concurrently so a chatty child can't block on a full pipe.
        let stdout_task = tokio::spawn(drain(child.stdout.take()));
        let stderr_task = tokio::spawn(drain(child.stderr.take()));

        let status = match tokio::time::timeout(timeout, child.wait()).await {
            Ok(Ok(status)) => status,
            Ok(Err(e)) => {
                stdout_task.abort();
                stderr_task.abort();
                return CommandResult::failed(e.to_string(), command_line, start.elapsed());
            }
            Err(_) => {
                tracing::error!(command = %command_line, timeout_secs = timeout.as_secs(), "command timed out");
                self.terminate(&mut child).await;
                stdout_task.abort();
                stderr_task.abort();
                return CommandResult::timed_out(timeout, command_line);
            }
        };

        let stdout = stdout_task.await.unwrap_or_default();
        let stderr = stderr_task.await.unwrap_or_default();
        let result = CommandResult::new(
            status.code().unwrap_or(-1),
            stdout,
            stderr,
            command_line,
            start.elapsed(),
        );

        if result.success() {
            tracing::debug!(duration_ms = result.duration().as_millis() as u64, "command completed");
        } else {
            tracing::warn!(exit_code = result.exit_code(), stderr = %result.stderr(), "command failed");
        }
        result
    }
}
