//! Bounded subprocess execution shared by the preflight probe, the scaffold
//! template command, the gated build/test commands, and the oracle adapter.
//!
//! Output pipes are drained concurrently with waiting for the child so a
//! chatty process cannot deadlock on a full pipe buffer.

use std::path::Path;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use tokio::io::AsyncReadExt;
use tokio::process::Command;
use tracing::warn;

/// A command line to spawn: program plus arguments.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct CommandSpec {
    pub program: String,
    #[serde(default)]
    pub args: Vec<String>,
}

impl CommandSpec {
    pub fn new(program: impl Into<String>, args: &[&str]) -> Self {
        Self {
            program: program.into(),
            args: args.iter().map(|s| (*s).to_owned()).collect(),
        }
    }

    /// Render for log/diagnostic output.
    pub fn display(&self) -> String {
        if self.args.is_empty() {
            self.program.clone()
        } else {
            format!("{} {}", self.program, self.args.join(" "))
        }
    }
}

/// Captured result of running a command to completion (or timeout).
#[derive(Debug, Clone)]
pub struct ExecOutput {
    /// Exit code, or `None` if the process was killed (timeout or signal).
    pub exit_code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
    /// Whether the wall-clock timeout elapsed before the process exited.
    pub timed_out: bool,
    pub duration: Duration,
}

impl ExecOutput {
    pub fn success(&self) -> bool {
        !self.timed_out && self.exit_code == Some(0)
    }

    /// Combined stdout/stderr for regeneration context, truncated to
    /// `limit` bytes on a char boundary.
    pub fn combined(&self, limit: usize) -> String {
        let mut buf = String::new();
        if !self.stdout.trim().is_empty() {
            buf.push_str("=== stdout ===\n");
            buf.push_str(&self.stdout);
        }
        if !self.stderr.trim().is_empty() {
            if !buf.is_empty() {
                buf.push('\n');
            }
            buf.push_str("=== stderr ===\n");
            buf.push_str(&self.stderr);
        }
        if self.timed_out {
            if !buf.is_empty() {
                buf.push('\n');
            }
            buf.push_str("[command timed out]");
        }
        truncate_bytes(buf, limit)
    }
}

/// Truncate a string to at most `limit` bytes, noting how much was dropped.
pub fn truncate_bytes(mut text: String, limit: usize) -> String {
    if text.len() <= limit {
        return text;
    }
    let dropped = text.len() - limit;
    let mut cut = limit;
    while cut > 0 && !text.is_char_boundary(cut) {
        cut -= 1;
    }
    text.truncate(cut);
    text.push_str(&format!("\n[truncated {dropped} bytes]"));
    text
}

/// Run a command in `working_dir` with a wall-clock timeout, capturing
/// stdout and stderr.
///
/// A timed-out child is killed; this surfaces as `timed_out = true` rather
/// than an error so callers can fold it into their own failure handling.
/// Spawn failure (e.g. program not found) is an error.
pub async fn run_with_timeout(
    spec: &CommandSpec,
    working_dir: &Path,
    timeout: Duration,
) -> Result<ExecOutput> {
    let start = Instant::now();

    let mut child = Command::new(&spec.program)
        .args(&spec.args)
        .current_dir(working_dir)
        .stdin(std::process::Stdio::null())
        .stdout(std::process::Stdio::piped())
        .stderr(std::process::Stdio::piped())
        .kill_on_drop(true)
        .spawn()
        .with_context(|| format!("failed to spawn command: {}", spec.display()))?;

    let mut stdout_pipe = child.stdout.take();
    let mut stderr_pipe = child.stderr.take();

    let read_stdout = async {
        let mut buf = Vec::new();
        if let Some(ref mut pipe) = stdout_pipe {
            pipe.read_to_end(&mut buf).await.ok();
        }
        String::from_utf8_lossy(&buf).into_owned()
    };
    let read_stderr = async {
        let mut buf = Vec::new();
        if let Some(ref mut pipe) = stderr_pipe {
            pipe.read_to_end(&mut buf).await.ok();
        }
        String::from_utf8_lossy(&buf).into_owned()
    };

    match tokio::time::timeout(timeout, async {
        let (wait_result, stdout, stderr) = tokio::join!(child.wait(), read_stdout, read_stderr);
        (wait_result, stdout, stderr)
    })
    .await
    {
        Ok((Ok(status), stdout, stderr)) => Ok(ExecOutput {
            exit_code: status.code(),
            stdout,
            stderr,
            timed_out: false,
            duration: start.elapsed(),
        }),
        Ok((Err(e), _, _)) => {
            Err(e).with_context(|| format!("failed to wait on command: {}", spec.display()))
        }
        Err(_) => {
            warn!(command = %spec.display(), timeout_secs = timeout.as_secs(), "command timed out, killing");
            let _ = child.kill().await;
            Ok(ExecOutput {
                exit_code: None,
                stdout: String::new(),
                stderr: format!(
                    "command {} timed out after {}s",
                    spec.display(),
                    timeout.as_secs()
                ),
                timed_out: true,
                duration: start.elapsed(),
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;

    #[tokio::test]
    async fn true_succeeds() {
        let out = run_with_timeout(
            &CommandSpec::new("true", &[]),
            Path::new("/tmp"),
            Duration::from_secs(5),
        )
        .await
        .expect("should run");
        assert!(out.success());
        assert_eq!(out.exit_code, Some(0));
    }

    #[tokio::test]
    async fn false_fails_without_error() {
        let out = run_with_timeout(
            &CommandSpec::new("false", &[]),
            Path::new("/tmp"),
            Duration::from_secs(5),
        )
        .await
        .expect("should run");
        assert!(!out.success());
        assert_eq!(out.exit_code, Some(1));
    }

    #[tokio::test]
    async fn captures_both_streams() {
        let out = run_with_timeout(
            &CommandSpec::new("sh", &["-c", "echo out_line; echo err_line >&2"]),
            Path::new("/tmp"),
            Duration::from_secs(5),
        )
        .await
        .expect("should run");
        assert!(out.stdout.contains("out_line"));
        assert!(out.stderr.contains("err_line"));
        let combined = out.combined(10_000);
        assert!(combined.contains("out_line") && combined.contains("err_line"));
    }

    #[tokio::test]
    async fn timeout_kills_slow_command() {
        let out = run_with_timeout(
            &CommandSpec::new("sleep", &["60"]),
            Path::new("/tmp"),
            Duration::from_millis(100),
        )
        .await
        .expect("timeout is not an error");
        assert!(out.timed_out);
        assert!(out.exit_code.is_none());
        assert!(out.stderr.contains("timed out"));
    }

    #[tokio::test]
    async fn missing_program_is_an_error() {
        let result = run_with_timeout(
            &CommandSpec::new("plugforge-no-such-program", &[]),
            Path::new("/tmp"),
            Duration::from_secs(1),
        )
        .await;
        assert!(result.is_err());
    }

    #[test]
    fn truncation_reports_dropped_bytes() {
        let text = "a".repeat(100);
        let truncated = truncate_bytes(text, 10);
        assert!(truncated.starts_with("aaaaaaaaaa"));
        assert!(truncated.contains("[truncated 90 bytes]"));
    }

    #[test]
    fn truncation_is_noop_under_limit() {
        assert_eq!(truncate_bytes("short".to_owned(), 100), "short");
    }
}
