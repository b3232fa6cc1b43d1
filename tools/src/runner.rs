//! Process runner: spawn one external program under a deadline
//!
//! - Output: stdout and stderr are each capped (10 MiB by default); excess is
//!   drained and dropped and the outcome is flagged as truncated
//! - Deadline: expiry sends an interrupt first so tools can flush partial
//!   output, then force-kills after a short grace window
//! - Cancellation: a `CancellationToken` stops the run the same way

use async_trait::async_trait;
use serde::Serialize;
use std::process::{ExitStatus, Stdio};
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::{Child, Command};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::command::CommandSpec;
use crate::error::{PipelineError, PipelineResult};
use crate::platform;
use crate::registry::{ExitPolicy, Operation, OperationDef};

/// Default cap on captured stdout and stderr, each.
pub const DEFAULT_MAX_OUTPUT_BYTES: usize = 10 * 1024 * 1024;
/// Default wait between the interrupt and the force-kill.
pub const DEFAULT_KILL_GRACE: Duration = Duration::from_secs(2);

/// Absolute cutoff for one run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Deadline {
    started: Instant,
    timeout: Duration,
}

impl Deadline {
    /// Clip `requested` into `(0, max]`, using `default` when nothing usable was asked for.
    pub fn new(requested: Option<Duration>, default: Duration, max: Duration) -> Self {
        let effective = requested
            .filter(|d| !d.is_zero())
            .unwrap_or(default)
            .min(max)
            .max(Duration::from_millis(1));
        Self {
            started: Instant::now(),
            timeout: effective,
        }
    }

    pub fn for_operation(def: &OperationDef, requested: Duration) -> Self {
        Self::new(Some(requested), def.default_timeout, def.max_timeout)
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn expires_at(&self) -> Instant {
        self.started + self.timeout
    }

    pub fn remaining(&self) -> Duration {
        self.expires_at().saturating_duration_since(Instant::now())
    }

    pub fn is_expired(&self) -> bool {
        self.remaining().is_zero()
    }
}

/// Everything one process left behind.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ProcessOutcome {
    pub stdout: String,
    pub stderr: String,
    /// `None` when the process was ended by a signal
    pub exit_code: Option<i32>,
    pub timed_out: bool,
    pub cancelled: bool,
    pub truncated: bool,
    pub elapsed_ms: u64,
}

impl ProcessOutcome {
    /// Outcome of a process that exited normally.
    pub fn exited(code: i32, stdout: impl Into<String>, stderr: impl Into<String>) -> Self {
        Self {
            stdout: stdout.into(),
            stderr: stderr.into(),
            exit_code: Some(code),
            ..Default::default()
        }
    }

    /// Map the outcome onto success using the operation's declared policy.
    pub fn check(
        &self,
        operation: Operation,
        policy: &ExitPolicy,
        deadline: &Deadline,
    ) -> PipelineResult<()> {
        if self.cancelled {
            return Err(PipelineError::failure(operation, "run was cancelled"));
        }
        if self.timed_out {
            return if policy.deadline_completes {
                Ok(())
            } else {
                Err(PipelineError::ExecutionTimeout {
                    operation,
                    after: deadline.timeout(),
                })
            };
        }
        match self.exit_code {
            Some(code) if policy.accepts(code) => Ok(()),
            Some(code) if policy.is_tool_timeout(code) => Err(PipelineError::ExecutionTimeout {
                operation,
                after: deadline.timeout(),
            }),
            Some(code) => Err(PipelineError::ExecutionFailure {
                operation,
                exit_code: Some(code),
                message: format!("exited with code {code}{}", self.stderr_hint()),
            }),
            None => Err(PipelineError::ExecutionFailure {
                operation,
                exit_code: None,
                message: format!("terminated by signal{}", self.stderr_hint()),
            }),
        }
    }

    fn stderr_hint(&self) -> String {
        self.stderr
            .lines()
            .map(str::trim)
            .find(|l| !l.is_empty())
            .map(|l| format!(": {}", l.chars().take(200).collect::<String>()))
            .unwrap_or_default()
    }
}

/// Runs a synthesized command. The seam between the pipeline and the OS.
#[async_trait]
pub trait CommandRunner: Send + Sync {
    async fn run(
        &self,
        operation: Operation,
        command: &CommandSpec,
        deadline: Deadline,
        cancel: CancellationToken,
    ) -> PipelineResult<ProcessOutcome>;
}

/// Resource limits for real process execution
#[derive(Debug, Clone, Copy)]
pub struct RunnerLimits {
    pub max_output_bytes: usize,
    pub kill_grace: Duration,
}

impl Default for RunnerLimits {
    fn default() -> Self {
        Self {
            max_output_bytes: DEFAULT_MAX_OUTPUT_BYTES,
            kill_grace: DEFAULT_KILL_GRACE,
        }
    }
}

/// Spawns real processes with tokio.
pub struct ProcessRunner {
    limits: RunnerLimits,
}

enum Stop {
    Exited(std::io::Result<ExitStatus>),
    Deadline,
    Cancelled,
}

impl ProcessRunner {
    pub fn new(limits: RunnerLimits) -> Self {
        Self { limits }
    }

    pub fn limits(&self) -> RunnerLimits {
        self.limits
    }

    /// Interrupt, wait out the grace window, then force-kill.
    async fn terminate(&self, child: &mut Child) -> Option<ExitStatus> {
        if interrupt(child) {
            match tokio::time::timeout(self.limits.kill_grace, child.wait()).await {
                Ok(Ok(status)) => return Some(status),
                Ok(Err(e)) => warn!("wait after interrupt failed: {e}"),
                Err(_) => warn!(
                    "process ignored interrupt for {:?}, killing",
                    self.limits.kill_grace
                ),
            }
        }
        if let Err(e) = child.kill().await {
            warn!("force kill failed: {e}");
        }
        child.try_wait().ok().flatten()
    }
}

impl Default for ProcessRunner {
    fn default() -> Self {
        Self::new(RunnerLimits::default())
    }
}

#[async_trait]
impl CommandRunner for ProcessRunner {
    async fn run(
        &self,
        operation: Operation,
        command: &CommandSpec,
        deadline: Deadline,
        cancel: CancellationToken,
    ) -> PipelineResult<ProcessOutcome> {
        let program = command.program();
        let path = platform::locate(program).ok_or_else(|| PipelineError::ToolUnavailable {
            operation,
            binary: program.to_string(),
        })?;

        debug!(%command, timeout = ?deadline.timeout(), "spawning");

        let mut cmd = Command::new(&path);
        cmd.args(&command.args)
            .env("LC_ALL", "C")
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let start = Instant::now();
        let mut child = cmd.spawn().map_err(|e| {
            PipelineError::failure(operation, format!("failed to spawn {program}: {e}"))
        })?;

        // Readers stop on their own shortly after a kill, even if a
        // grandchild still holds the pipe open.
        let hard_stop = deadline.expires_at() + self.limits.kill_grace * 2;
        let cap = self.limits.max_output_bytes;
        let stdout_task = tokio::spawn(read_capped(child.stdout.take(), cap, hard_stop));
        let stderr_task = tokio::spawn(read_capped(child.stderr.take(), cap, hard_stop));

        let stop = tokio::select! {
            status = child.wait() => Stop::Exited(status),
            _ = tokio::time::sleep_until(deadline.expires_at()) => Stop::Deadline,
            _ = cancel.cancelled() => Stop::Cancelled,
        };

        let (status, timed_out, cancelled) = match stop {
            Stop::Exited(status) => {
                let status = status.map_err(|e| {
                    PipelineError::failure(operation, format!("failed waiting for {program}: {e}"))
                })?;
                (Some(status), false, false)
            }
            Stop::Deadline => {
                info!(%operation, timeout = ?deadline.timeout(), "deadline reached, stopping {program}");
                (self.terminate(&mut child).await, true, false)
            }
            Stop::Cancelled => {
                info!(%operation, "run cancelled, stopping {program}");
                (self.terminate(&mut child).await, false, true)
            }
        };

        let (stdout, stdout_truncated) = join_reader(stdout_task).await;
        let (stderr, stderr_truncated) = join_reader(stderr_task).await;
        let truncated = stdout_truncated || stderr_truncated;
        if truncated {
            warn!(%operation, cap, "output exceeded cap and was truncated");
        }

        let outcome = ProcessOutcome {
            stdout: String::from_utf8_lossy(&stdout).into_owned(),
            stderr: String::from_utf8_lossy(&stderr).into_owned(),
            exit_code: status.and_then(|s| s.code()),
            timed_out,
            cancelled,
            truncated,
            elapsed_ms: start.elapsed().as_millis() as u64,
        };
        debug!(
            %operation,
            exit_code = ?outcome.exit_code,
            stdout_bytes = outcome.stdout.len(),
            stderr_bytes = outcome.stderr.len(),
            elapsed_ms = outcome.elapsed_ms,
            "process finished"
        );
        Ok(outcome)
    }
}

#[cfg(unix)]
fn interrupt(child: &mut Child) -> bool {
    use nix::sys::signal::{kill, Signal};
    use nix::unistd::Pid;

    match child.id() {
        Some(pid) => kill(Pid::from_raw(pid as i32), Signal::SIGINT).is_ok(),
        None => false,
    }
}

#[cfg(not(unix))]
fn interrupt(_child: &mut Child) -> bool {
    // No portable graceful interrupt for a console child; go straight to kill.
    false
}

/// Read a pipe to EOF, keeping at most `cap` bytes.
async fn read_capped<R>(reader: Option<R>, cap: usize, hard_stop: Instant) -> (Vec<u8>, bool)
where
    R: AsyncRead + Unpin + Send + 'static,
{
    let Some(mut reader) = reader else {
        return (Vec::new(), false);
    };
    let mut buf = Vec::new();
    let mut chunk = vec![0u8; 16 * 1024];
    let mut truncated = false;
    loop {
        let n = match tokio::time::timeout_at(hard_stop, reader.read(&mut chunk)).await {
            Ok(Ok(0)) | Ok(Err(_)) | Err(_) => break,
            Ok(Ok(n)) => n,
        };
        let room = cap.saturating_sub(buf.len());
        if n > room {
            truncated = true;
        }
        buf.extend_from_slice(&chunk[..n.min(room)]);
    }
    (buf, truncated)
}

async fn join_reader(task: tokio::task::JoinHandle<(Vec<u8>, bool)>) -> (Vec<u8>, bool) {
    task.await.unwrap_or_else(|e| {
        warn!("output reader task failed: {e}");
        (Vec::new(), false)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::Registry;

    fn sh(script: &str) -> CommandSpec {
        CommandSpec {
            program: "sh",
            args: vec!["-c".into(), script.into()],
        }
    }

    fn secs(n: u64) -> Deadline {
        Deadline::new(Some(Duration::from_secs(n)), Duration::from_secs(5), Duration::from_secs(60))
    }

    #[test]
    fn test_deadline_is_clipped() {
        let max = Duration::from_secs(30);
        let def = Duration::from_secs(10);
        assert_eq!(Deadline::new(Some(Duration::from_secs(90)), def, max).timeout(), max);
        assert_eq!(Deadline::new(None, def, max).timeout(), def);
        assert_eq!(Deadline::new(Some(Duration::ZERO), def, max).timeout(), def);
        assert!(!Deadline::new(Some(Duration::from_secs(5)), def, max).is_expired());
    }

    #[test]
    fn test_outcome_check_follows_policy() {
        let reg = Registry::builtin();
        let ping = reg.get(Operation::Ping).unwrap();
        let deadline = Deadline::for_operation(ping, Duration::from_secs(10));

        assert!(ProcessOutcome::exited(1, "", "").check(Operation::Ping, &ping.exit_policy, &deadline).is_ok());
        let err = ProcessOutcome::exited(2, "", "ping: unknown host\n")
            .check(Operation::Ping, &ping.exit_policy, &deadline)
            .unwrap_err();
        assert!(err.to_string().contains("unknown host"));

        let timed_out = ProcessOutcome {
            timed_out: true,
            ..Default::default()
        };
        assert_eq!(
            timed_out.check(Operation::Ping, &ping.exit_policy, &deadline).unwrap_err().kind(),
            "timeout"
        );

        let capture = reg.get(Operation::PacketCapture).unwrap();
        assert!(timed_out
            .check(Operation::PacketCapture, &capture.exit_policy, &deadline)
            .is_ok());

        let http = reg.get(Operation::HttpProbe).unwrap();
        assert_eq!(
            ProcessOutcome::exited(28, "", "")
                .check(Operation::HttpProbe, &http.exit_policy, &deadline)
                .unwrap_err()
                .kind(),
            "timeout"
        );
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_runs_and_captures_output() {
        let runner = ProcessRunner::default();
        let out = runner
            .run(Operation::Ping, &sh("echo hello; echo oops >&2; exit 3"), secs(10), CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(out.stdout.trim(), "hello");
        assert_eq!(out.stderr.trim(), "oops");
        assert_eq!(out.exit_code, Some(3));
        assert!(!out.timed_out);
        assert!(!out.truncated);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_deadline_interrupts_and_keeps_partial_output() {
        let runner = ProcessRunner::new(RunnerLimits {
            kill_grace: Duration::from_millis(500),
            ..Default::default()
        });
        let deadline = Deadline::new(
            Some(Duration::from_millis(300)),
            Duration::from_secs(1),
            Duration::from_secs(1),
        );
        let started = std::time::Instant::now();
        let out = runner
            .run(Operation::Traceroute, &sh("echo partial; sleep 30"), deadline, CancellationToken::new())
            .await
            .unwrap();
        assert!(out.timed_out);
        assert_eq!(out.stdout.trim(), "partial");
        assert!(started.elapsed() < Duration::from_secs(10));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_ignored_interrupt_is_force_killed() {
        let runner = ProcessRunner::new(RunnerLimits {
            kill_grace: Duration::from_millis(200),
            ..Default::default()
        });
        let deadline = Deadline::new(
            Some(Duration::from_millis(200)),
            Duration::from_secs(1),
            Duration::from_secs(1),
        );
        let started = std::time::Instant::now();
        let out = runner
            .run(Operation::Traceroute, &sh("trap '' INT; sleep 30"), deadline, CancellationToken::new())
            .await
            .unwrap();
        assert!(out.timed_out);
        assert!(started.elapsed() < Duration::from_secs(10));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_output_cap_truncates() {
        let runner = ProcessRunner::new(RunnerLimits {
            max_output_bytes: 1024,
            ..Default::default()
        });
        let out = runner
            .run(Operation::Whois, &sh("head -c 100000 /dev/zero | tr '\\0' 'x'"), secs(10), CancellationToken::new())
            .await
            .unwrap();
        assert!(out.truncated);
        assert_eq!(out.stdout.len(), 1024);
        assert_eq!(out.exit_code, Some(0));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_cancellation_stops_the_process() {
        let runner = ProcessRunner::default();
        let token = CancellationToken::new();
        let trigger = token.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(100)).await;
            trigger.cancel();
        });
        let out = runner
            .run(Operation::Whois, &sh("sleep 30"), secs(30), token)
            .await
            .unwrap();
        assert!(out.cancelled);
        assert!(!out.timed_out);
    }

    #[tokio::test]
    async fn test_missing_binary_is_unavailable() {
        let runner = ProcessRunner::default();
        let cmd = CommandSpec {
            program: "netprobe-definitely-not-installed",
            args: vec![],
        };
        let err = runner
            .run(Operation::Whois, &cmd, secs(5), CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, PipelineError::ToolUnavailable { .. }));
    }
}
