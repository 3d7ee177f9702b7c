//! Generator harness: the single call-site where the external coding-agent
//! CLI is spawned and supervised.
//!
//! Every loop in the pipeline funnels its "regenerate" step through
//! [`Generator::generate`]. The concrete adapter spawns `claude -p` rooted
//! at the working copy and races completion against a wall-clock timeout
//! and the run's cancellation token; whichever side loses, cleanup goes
//! through one path, so a process that exits naturally is never killed and
//! a killed process is never killed twice.

use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::AsyncReadExt;
use tokio::process::{Child, Command};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::{PipelineError, TerminationOutcome};
use crate::exec::CommandSpec;

/// Grace period between SIGTERM and SIGKILL for a timed-out generator.
const TERM_GRACE: Duration = Duration::from_secs(5);

/// Bound on waiting for the pipe-drain tasks after the child is gone.
/// A descendant that holds the pipe write-ends open past this is abandoned
/// rather than hanging the supervision path.
const DRAIN_GRACE: Duration = Duration::from_secs(2);

/// One generator invocation.
#[derive(Debug, Clone)]
pub struct GenerateRequest {
    /// Natural-language instruction: the initial build instruction, a
    /// fix-these-issues instruction, or a reviewer revision instruction.
    pub instruction: String,
    /// Working copy the generator mutates in place.
    pub working_dir: PathBuf,
}

/// Abstraction over the external generation tool.
#[async_trait]
pub trait Generator: Send + Sync {
    /// Run the generator to completion. Success means the process exited
    /// with status 0 within the timeout; any other outcome is an error.
    async fn generate(
        &self,
        request: &GenerateRequest,
        cancel: &CancellationToken,
    ) -> Result<(), PipelineError>;
}

// ---------------------------------------------------------------------------
// Active process bookkeeping
// ---------------------------------------------------------------------------

/// Back-reference to the currently running generator process, owned by one
/// pipeline instance (never a process-wide global).
///
/// At most one pid is registered at a time; clearing is idempotent and
/// pid-checked so a stale cleanup cannot clobber a newer registration.
#[derive(Debug, Clone, Default)]
pub struct ActiveProcess {
    inner: Arc<Mutex<Option<u32>>>,
}

impl ActiveProcess {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a freshly spawned pid. Logs if a previous registration was
    /// still present; the invariant is one live generator per pipeline.
    fn register(&self, pid: u32) {
        let mut slot = self.inner.lock().expect("active process lock poisoned");
        if let Some(old) = slot.replace(pid) {
            warn!(old_pid = old, new_pid = pid, "previous generator pid was never cleared");
        }
    }

    /// Clear the registration for `pid`. A no-op if `pid` is not the
    /// registered one (already cleared, or superseded).
    fn clear(&self, pid: u32) {
        let mut slot = self.inner.lock().expect("active process lock poisoned");
        if *slot == Some(pid) {
            *slot = None;
        }
    }

    /// Pid of the in-flight generator, if any.
    pub fn current(&self) -> Option<u32> {
        *self.inner.lock().expect("active process lock poisoned")
    }
}

// ---------------------------------------------------------------------------
// Claude Code adapter
// ---------------------------------------------------------------------------

/// Adapter that spawns the Claude Code CLI in non-interactive batch mode.
#[derive(Debug, Clone)]
pub struct ClaudeCodeGenerator {
    command: CommandSpec,
    max_turns: u32,
    timeout: Duration,
    active: ActiveProcess,
}

impl ClaudeCodeGenerator {
    /// `command` carries the program and the fixed batch-mode flag set;
    /// `--max-turns` and the instruction are appended per invocation.
    pub fn new(command: CommandSpec, max_turns: u32, timeout: Duration, active: ActiveProcess) -> Self {
        Self {
            command,
            max_turns,
            timeout,
            active,
        }
    }

    /// Default flag set for `claude`: print mode, no permission prompts.
    pub fn default_command() -> CommandSpec {
        CommandSpec::new("claude", &["-p", "--dangerously-skip-permissions"])
    }

    fn build_command(&self, request: &GenerateRequest) -> Command {
        let mut cmd = Command::new(&self.command.program);
        cmd.args(&self.command.args)
            .arg("--max-turns")
            .arg(self.max_turns.to_string())
            .arg(&request.instruction)
            .current_dir(&request.working_dir)
            .stdin(std::process::Stdio::null())
            .stdout(std::process::Stdio::piped())
            .stderr(std::process::Stdio::piped())
            .kill_on_drop(true);
        // The generator runs as its own process-group leader so termination
        // signals reach any subprocesses it spawned, not just the direct
        // child.
        #[cfg(unix)]
        cmd.process_group(0);
        cmd
    }
}

enum WaitOutcome {
    Exited(std::io::Result<std::process::ExitStatus>),
    TimedOut,
    Cancelled,
}

#[async_trait]
impl Generator for ClaudeCodeGenerator {
    async fn generate(
        &self,
        request: &GenerateRequest,
        cancel: &CancellationToken,
    ) -> Result<(), PipelineError> {
        info!(
            working_dir = %request.working_dir.display(),
            timeout_secs = self.timeout.as_secs(),
            "invoking generator"
        );

        let mut child = match self.build_command(request).spawn() {
            Ok(child) => child,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(PipelineError::ToolMissing {
                    command: self.command.program.clone(),
                    reason: e.to_string(),
                });
            }
            Err(e) => {
                return Err(PipelineError::Other(
                    anyhow::Error::new(e).context("spawn generator"),
                ));
            }
        };

        let pid = child.id().unwrap_or(0);
        self.active.register(pid);

        // Drain pipes in the background so the child can never block on a
        // full pipe buffer, whichever way the race below resolves.
        let stdout_task = drain_pipe(child.stdout.take());
        let stderr_task = drain_pipe(child.stderr.take());

        let outcome = tokio::select! {
            status = child.wait() => WaitOutcome::Exited(status),
            () = tokio::time::sleep(self.timeout) => WaitOutcome::TimedOut,
            () = cancel.cancelled() => WaitOutcome::Cancelled,
        };

        let result = match outcome {
            WaitOutcome::Exited(Ok(status)) => {
                debug!(exit_code = ?status.code(), "generator exited");
                if status.success() {
                    Ok(())
                } else {
                    Err(PipelineError::GenerationFailed {
                        exit_code: status.code(),
                    })
                }
            }
            WaitOutcome::Exited(Err(e)) => Err(PipelineError::Other(
                anyhow::Error::new(e).context("wait on generator"),
            )),
            WaitOutcome::TimedOut => {
                warn!(timeout_secs = self.timeout.as_secs(), "generator timed out, terminating");
                let termination = terminate(&mut child).await;
                Err(PipelineError::GenerationTimeout {
                    timeout_secs: self.timeout.as_secs(),
                    termination,
                })
            }
            WaitOutcome::Cancelled => {
                warn!("cancellation requested, terminating generator");
                let termination = terminate(&mut child).await;
                info!(%termination, "generator terminated after cancellation");
                Err(PipelineError::Interrupted)
            }
        };

        self.active.clear(pid);

        let stderr = finish_drain(stderr_task).await;
        finish_drain(stdout_task).await;
        if result.is_err() && !stderr.trim().is_empty() {
            warn!(stderr_tail = %tail(&stderr, 2_000), "generator stderr");
        }

        result
    }
}

/// Terminate a child that lost the race: SIGTERM to its process group, a
/// grace period, then SIGKILL to the group. Safe to call on a child that
/// has already exited.
async fn terminate(child: &mut Child) -> TerminationOutcome {
    // Already reaped: nothing to do.
    if matches!(child.try_wait(), Ok(Some(_))) {
        return TerminationOutcome::AlreadyExited;
    }

    let pid = child.id();
    signal_group(pid, Sig::Term);

    match tokio::time::timeout(TERM_GRACE, child.wait()).await {
        Ok(Ok(_status)) => TerminationOutcome::Graceful,
        _ => {
            signal_group(pid, Sig::Kill);
            if let Err(e) = child.kill().await {
                // Cleanup failure is logged only, never propagated.
                warn!(error = %e, "failed to SIGKILL generator");
            }
            let _ = child.wait().await;
            TerminationOutcome::Forced
        }
    }
}

#[derive(Clone, Copy)]
enum Sig {
    Term,
    Kill,
}

/// Signal the generator's whole process group so descendants holding the
/// pipe write-ends go down with the direct child.
#[cfg(unix)]
fn signal_group(pid: Option<u32>, sig: Sig) {
    let Some(pid) = pid else { return };
    let (signo, name) = match sig {
        Sig::Term => (libc::SIGTERM, "SIGTERM"),
        Sig::Kill => (libc::SIGKILL, "SIGKILL"),
    };
    // SAFETY: pid comes from a child we spawned with process_group(0) and
    // have not reaped; the negative pid addresses its group.
    let ret = unsafe { libc::kill(-(pid as i32), signo) };
    if ret != 0 {
        warn!(pid, signal = name, "group signal failed");
    }
}

#[cfg(not(unix))]
fn signal_group(_pid: Option<u32>, _sig: Sig) {}

/// Join a drain task, but never past [`DRAIN_GRACE`]: an abandoned
/// descendant can keep the pipe open indefinitely.
async fn finish_drain(mut task: tokio::task::JoinHandle<String>) -> String {
    match tokio::time::timeout(DRAIN_GRACE, &mut task).await {
        Ok(Ok(text)) => text,
        Ok(Err(_)) => String::new(),
        Err(_) => {
            task.abort();
            String::new()
        }
    }
}

fn drain_pipe<R>(pipe: Option<R>) -> tokio::task::JoinHandle<String>
where
    R: tokio::io::AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut buf = Vec::new();
        if let Some(mut pipe) = pipe {
            let _ = pipe.read_to_end(&mut buf).await;
        }
        String::from_utf8_lossy(&buf).into_owned()
    })
}

fn tail(text: &str, limit: usize) -> &str {
    if text.len() <= limit {
        return text;
    }
    let mut start = text.len() - limit;
    while start < text.len() && !text.is_char_boundary(start) {
        start += 1;
    }
    &text[start..]
}
