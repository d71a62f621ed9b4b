//! External tool invocation
//!
//! Runs a program with arguments and an environment overlay under a
//! deadline, capturing stdout and stderr. The deadline covers both the
//! child's exit and the end of its output. On expiry the child's whole
//! process group is killed and the child reaped before the call returns.
//! No retries happen here; callers own their retry policy.

use crate::error::{LifecycleError, Result};
use crate::observability::LifecycleMetrics;
use async_trait::async_trait;
use std::fmt;
use std::process::Stdio;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::{Child, Command};
use tokio::time::timeout;
use tracing::{debug, warn};

/// One external command to run
#[derive(Debug, Clone)]
pub struct Invocation {
    pub program: String,
    pub args: Vec<String>,
    /// Variables added to the inherited process environment
    pub env: Vec<(String, String)>,
    pub timeout: Duration,
}

impl Invocation {
    pub fn new(program: impl Into<String>, timeout: Duration) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            env: Vec::new(),
            timeout,
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }

    /// Program name without its directory, used as a metrics label
    pub fn program_label(&self) -> &str {
        self.program
            .rsplit(std::path::MAIN_SEPARATOR)
            .next()
            .unwrap_or(&self.program)
    }
}

/// Renders the command line. Environment values are never shown.
impl fmt::Display for Invocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.program)?;
        for arg in &self.args {
            write!(f, " {}", arg)?;
        }
        Ok(())
    }
}

/// How an invocation ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitStatus {
    Succeeded,
    /// Non-zero exit; `None` when the child was terminated by a signal
    Failed(Option<i32>),
    TimedOut,
}

impl ExitStatus {
    pub fn as_label(&self) -> &'static str {
        match self {
            ExitStatus::Succeeded => "succeeded",
            ExitStatus::Failed(_) => "failed",
            ExitStatus::TimedOut => "timed_out",
        }
    }
}

/// Captured result of one invocation
#[derive(Debug, Clone)]
pub struct InvocationOutput {
    pub status: ExitStatus,
    pub stdout: String,
    pub stderr: String,
}

impl InvocationOutput {
    pub fn succeeded(stdout: impl Into<String>) -> Self {
        Self {
            status: ExitStatus::Succeeded,
            stdout: stdout.into(),
            stderr: String::new(),
        }
    }

    pub fn failed(code: i32, stderr: impl Into<String>) -> Self {
        Self {
            status: ExitStatus::Failed(Some(code)),
            stdout: String::new(),
            stderr: stderr.into(),
        }
    }

    pub fn timed_out() -> Self {
        Self {
            status: ExitStatus::TimedOut,
            stdout: String::new(),
            stderr: String::new(),
        }
    }

    /// Stdout on success, otherwise the matching error for `invocation`
    pub fn into_success(self, invocation: &Invocation) -> Result<String> {
        match self.status {
            ExitStatus::Succeeded => Ok(self.stdout),
            ExitStatus::Failed(code) => Err(LifecycleError::CommandFailed {
                command: invocation.to_string(),
                code,
                stderr: self.stderr.trim().to_string(),
            }),
            ExitStatus::TimedOut => Err(LifecycleError::CommandTimeout {
                command: invocation.to_string(),
                timeout: invocation.timeout,
            }),
        }
    }
}

/// Trait for running external commands
#[async_trait]
pub trait CommandRunner: Send + Sync {
    /// Run `invocation` to completion or until its timeout.
    ///
    /// Non-zero exits and timeouts are reported through
    /// [`InvocationOutput::status`]. `Err` is reserved for failures to
    /// start or supervise the process.
    async fn run(&self, invocation: &Invocation) -> Result<InvocationOutput>;

    /// Run and require success, returning stdout
    async fn run_checked(&self, invocation: &Invocation) -> Result<String> {
        self.run(invocation).await?.into_success(invocation)
    }
}

/// Runs commands as real child processes
#[derive(Clone, Default)]
pub struct ProcessRunner {
    metrics: LifecycleMetrics,
}

impl ProcessRunner {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CommandRunner for ProcessRunner {
    async fn run(&self, invocation: &Invocation) -> Result<InvocationOutput> {
        debug!(
            command = %invocation,
            timeout_secs = invocation.timeout.as_secs(),
            "Running external command"
        );

        let mut std_command = std::process::Command::new(&invocation.program);
        std_command
            .args(&invocation.args)
            .envs(invocation.env.iter().map(|(k, v)| (k.as_str(), v.as_str())))
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        // Own process group so a timeout can take down anything the child forked
        #[cfg(unix)]
        std::os::unix::process::CommandExt::process_group(&mut std_command, 0);

        let mut command = Command::from(std_command);
        command.kill_on_drop(true);

        let mut child = command.spawn().map_err(|source| {
            self.metrics
                .inc_invocation(invocation.program_label(), "spawn_error");
            LifecycleError::Spawn {
                command: invocation.to_string(),
                source,
            }
        })?;

        let pid = child.id();
        let stdout = child.stdout.take();
        let stderr = child.stderr.take();

        // Output pipes can outlive the child when it leaves background
        // processes behind, so draining them shares the deadline.
        let finished = timeout(invocation.timeout, async {
            let (status, stdout, stderr) =
                tokio::join!(child.wait(), read_to_string(stdout), read_to_string(stderr));
            status.map(|status| (status, stdout, stderr))
        })
        .await;

        let output = match finished {
            Ok(Ok((status, stdout, stderr))) => {
                let status = if status.success() {
                    ExitStatus::Succeeded
                } else {
                    ExitStatus::Failed(status.code())
                };
                InvocationOutput {
                    status,
                    stdout,
                    stderr,
                }
            }
            Ok(Err(source)) => {
                return Err(LifecycleError::Spawn {
                    command: invocation.to_string(),
                    source,
                });
            }
            Err(_) => {
                terminate(&mut child, pid, invocation).await;
                InvocationOutput::timed_out()
            }
        };

        self.metrics
            .inc_invocation(invocation.program_label(), output.status.as_label());

        match output.status {
            ExitStatus::Succeeded => debug!(command = %invocation, "External command succeeded"),
            ExitStatus::Failed(code) => warn!(
                command = %invocation,
                exit_code = ?code,
                stderr = %output.stderr.trim(),
                "External command failed"
            ),
            ExitStatus::TimedOut => warn!(
                command = %invocation,
                timeout_secs = invocation.timeout.as_secs(),
                "External command timed out and was killed"
            ),
        }

        Ok(output)
    }
}

/// Kill the child's process group, then kill and reap the child itself
async fn terminate(child: &mut Child, pid: Option<u32>, invocation: &Invocation) {
    #[cfg(unix)]
    if let Some(pid) = pid.and_then(|pid| i32::try_from(pid).ok()) {
        use nix::sys::signal::{killpg, Signal};
        use nix::unistd::Pid;

        if let Err(e) = killpg(Pid::from_raw(pid), Signal::SIGKILL) {
            debug!(command = %invocation, error = %e, "Process group already gone");
        }
    }
    #[cfg(not(unix))]
    let _ = pid;

    // Already reaped when only the output drain ran out of time
    if let Ok(Some(_)) = child.try_wait() {
        return;
    }
    if let Err(e) = child.kill().await {
        warn!(command = %invocation, error = %e, "Failed to kill timed out command");
    }
}

async fn read_to_string<R: AsyncRead + Unpin>(reader: Option<R>) -> String {
    let mut buf = Vec::new();
    if let Some(mut reader) = reader {
        if let Err(e) = reader.read_to_end(&mut buf).await {
            debug!(error = %e, "Stopped reading command output");
        }
    }
    String::from_utf8_lossy(&buf).into_owned()
}
