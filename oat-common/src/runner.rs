//! Command execution with bounded run time and captured output.
//!
//! A [`CommandRunner`] launches a command line either locally through `sh -c`
//! or on a VM through [`RemoteShell`], waits for it up to a timeout and
//! returns everything it printed. A non-zero exit is data, not an error: only
//! failing to launch the command (or the remote shell failing to connect)
//! produces [`HarnessError::Transport`].

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::Command;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::errors::{HarnessError, HarnessResult};
use crate::ssh::{RemoteShell, SSH_TRANSPORT_EXIT};

/// How long to wait for the output pipes to close after the process is gone.
/// Grandchildren that inherited the pipes can otherwise hold them open forever.
const DRAIN_GRACE: Duration = Duration::from_secs(2);

/// Shorter wait once the command has already been killed for running too long.
const TIMEOUT_DRAIN_GRACE: Duration = Duration::from_millis(250);

const REDACTED: &str = "********";

/// Where a command runs.
#[derive(Debug, Clone, Default)]
pub enum Transport {
    #[default]
    Local,
    RemoteShell(RemoteShell),
}

/// Per-invocation options.
#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    pub working_dir: Option<PathBuf>,
    /// Overrides the runner's default timeout.
    pub timeout: Option<Duration>,
    pub transport: Transport,
    pub env: Vec<(String, String)>,
    /// Strings masked in the recorded command line and captured output.
    pub redact: Vec<String>,
}

impl RunOptions {
    pub fn local() -> Self {
        Self::default()
    }

    pub fn remote(shell: RemoteShell) -> Self {
        let redact = shell.secret().map(str::to_string).into_iter().collect();
        Self {
            transport: Transport::RemoteShell(shell),
            redact,
            ..Self::default()
        }
    }

    pub fn in_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_dir = Some(dir.into());
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }

    pub fn redact(mut self, secret: impl Into<String>) -> Self {
        let secret = secret.into();
        if !secret.is_empty() {
            self.redact.push(secret);
        }
        self
    }

    fn scrub(&self, text: &str) -> String {
        self.redact
            .iter()
            .fold(text.to_string(), |acc, secret| acc.replace(secret, REDACTED))
    }
}

/// How a command ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandStatus {
    Success,
    /// Non-zero exit; `None` when terminated by a signal.
    Failed(Option<i32>),
    /// Killed after exceeding its timeout.
    TimedOut,
}

/// Captured result of a command.
#[derive(Debug, Clone)]
pub struct CommandResult {
    /// Command line as executed, with secrets masked.
    pub command: String,
    pub status: CommandStatus,
    pub stdout: String,
    pub stderr: String,
    pub duration: Duration,
}

impl CommandResult {
    pub fn success(&self) -> bool {
        self.status == CommandStatus::Success
    }

    pub fn timed_out(&self) -> bool {
        self.status == CommandStatus::TimedOut
    }

    pub fn exit_code(&self) -> Option<i32> {
        match self.status {
            CommandStatus::Success => Some(0),
            CommandStatus::Failed(code) => code,
            CommandStatus::TimedOut => None,
        }
    }

    pub fn stdout_contains(&self, needle: &str) -> bool {
        self.stdout.contains(needle)
    }

    pub fn stderr_contains(&self, needle: &str) -> bool {
        self.stderr.contains(needle)
    }
}

/// Runs command lines and captures their output.
#[derive(Debug, Clone)]
pub struct CommandRunner {
    default_timeout: Duration,
}

impl CommandRunner {
    pub fn new(default_timeout: Duration) -> Self {
        Self { default_timeout }
    }

    pub fn default_timeout(&self) -> Duration {
        self.default_timeout
    }

    /// Run `command_line` and wait for it to finish or time out.
    ///
    /// The command line is interpreted by a POSIX shell on the target.
    pub async fn run(
        &self,
        command_line: &str,
        options: &RunOptions,
    ) -> HarnessResult<CommandResult> {
        let timeout = options.timeout.unwrap_or(self.default_timeout);
        let (mut cmd, shown) = build_command(command_line, options)?;
        let shown = options.scrub(&shown);

        debug!(command = %shown, timeout_ms = timeout.as_millis() as u64, "Executing");

        cmd.stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        // Own group, so a timeout can take down whatever the shell started.
        #[cfg(unix)]
        cmd.process_group(0);
        for (key, value) in &options.env {
            cmd.env(key, value);
        }

        let start = Instant::now();
        let mut child = cmd.spawn().map_err(|e| HarnessError::Transport {
            command: shown.clone(),
            reason: e.to_string(),
        })?;

        let stdout_reader = child.stdout.take().map(OutputReader::spawn);
        let stderr_reader = child.stderr.take().map(OutputReader::spawn);

        let exit = match tokio::time::timeout(timeout, child.wait()).await {
            Ok(status) => Some(status?),
            Err(_) => {
                #[cfg(unix)]
                if let Some(pid) = child.id() {
                    kill_group(pid).await;
                }
                if let Err(e) = child.kill().await {
                    warn!(command = %shown, error = %e, "Failed to kill timed out command");
                }
                None
            }
        };
        let duration = start.elapsed();

        let grace = if exit.is_some() {
            DRAIN_GRACE
        } else {
            TIMEOUT_DRAIN_GRACE
        };
        let (stdout, stderr) = tokio::join!(
            drain(stdout_reader, grace),
            drain(stderr_reader, grace)
        );
        let stdout = options.scrub(&stdout);
        let mut stderr = options.scrub(&stderr);

        let status = match exit {
            Some(status) if status.success() => CommandStatus::Success,
            Some(status) => CommandStatus::Failed(status.code()),
            None => {
                if !stderr.is_empty() && !stderr.ends_with('\n') {
                    stderr.push('\n');
                }
                stderr.push_str(&format!("Process timed out after {timeout:?}."));
                CommandStatus::TimedOut
            }
        };

        if matches!(options.transport, Transport::RemoteShell(_))
            && status == CommandStatus::Failed(Some(SSH_TRANSPORT_EXIT))
        {
            return Err(HarnessError::Transport {
                command: shown,
                reason: stderr.trim().to_string(),
            });
        }

        match status {
            CommandStatus::TimedOut => warn!(
                command = %shown,
                duration_ms = duration.as_millis() as u64,
                "Command timed out"
            ),
            _ => info!(
                command = %shown,
                status = ?status,
                duration_ms = duration.as_millis() as u64,
                stdout_bytes = stdout.len(),
                stderr_bytes = stderr.len(),
                "Command finished"
            ),
        }

        Ok(CommandResult {
            command: shown,
            status,
            stdout,
            stderr,
            duration,
        })
    }
}

impl Default for CommandRunner {
    fn default() -> Self {
        Self::new(Duration::from_secs(600))
    }
}

fn build_command(command_line: &str, options: &RunOptions) -> HarnessResult<(Command, String)> {
    match &options.transport {
        Transport::Local => {
            let mut cmd = Command::new("sh");
            cmd.arg("-c").arg(command_line);
            if let Some(dir) = &options.working_dir {
                ensure_dir(dir, command_line)?;
                cmd.current_dir(dir);
            }
            Ok((cmd, command_line.to_string()))
        }
        Transport::RemoteShell(shell) => {
            let remote_line = match &options.working_dir {
                Some(dir) => format!(
                    "cd {} && {command_line}",
                    shell_escape::escape(dir.to_string_lossy())
                ),
                None => command_line.to_string(),
            };
            let mut cmd = Command::new(shell.program());
            cmd.args(shell.args(&remote_line));
            for (key, value) in shell.envs() {
                cmd.env(key, value);
            }
            Ok((cmd, shell.describe(&remote_line)))
        }
    }
}

fn ensure_dir(dir: &Path, command_line: &str) -> HarnessResult<()> {
    if dir.is_dir() {
        Ok(())
    } else {
        Err(HarnessError::Transport {
            command: command_line.to_string(),
            reason: format!("working directory {} does not exist", dir.display()),
        })
    }
}

/// Background copy of one output pipe into a buffer that outlives the task.
struct OutputReader {
    captured: Arc<Mutex<Vec<u8>>>,
    task: JoinHandle<()>,
}

impl OutputReader {
    fn spawn<R>(mut reader: R) -> Self
    where
        R: AsyncRead + Unpin + Send + 'static,
    {
        let captured = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&captured);
        let task = tokio::spawn(async move {
            let mut chunk = [0u8; 8192];
            loop {
                match reader.read(&mut chunk).await {
                    Ok(0) => break,
                    Ok(n) => sink
                        .lock()
                        .unwrap_or_else(PoisonError::into_inner)
                        .extend_from_slice(&chunk[..n]),
                    Err(e) => {
                        debug!(error = %e, "Output pipe closed with error");
                        break;
                    }
                }
            }
        });
        Self { captured, task }
    }

    /// Wait up to `grace` for EOF, then return whatever was read so far.
    async fn finish(mut self, grace: Duration) -> String {
        match tokio::time::timeout(grace, &mut self.task).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => debug!(error = %e, "Output reader task failed"),
            Err(_) => {
                debug!(
                    grace_ms = grace.as_millis() as u64,
                    "Output pipe still open, keeping partial output"
                );
                self.task.abort();
            }
        }
        let bytes = self.captured.lock().unwrap_or_else(PoisonError::into_inner);
        String::from_utf8_lossy(&bytes).into_owned()
    }
}

async fn drain(reader: Option<OutputReader>, grace: Duration) -> String {
    match reader {
        Some(reader) => reader.finish(grace).await,
        None => String::new(),
    }
}

/// SIGKILL the process group led by `pid`. Best effort.
#[cfg(unix)]
async fn kill_group(pid: u32) {
    let result = Command::new("kill")
        .arg("-KILL")
        .arg("--")
        .arg(format!("-{pid}"))
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .await;
    match result {
        Ok(status) if status.success() => {}
        Ok(status) => debug!(pid, status = ?status.code(), "kill of process group failed"),
        Err(e) => debug!(pid, error = %e, "Could not run kill for process group"),
    }
}
