//! Validation gates: the objective pass/fail checks between generation
//! attempts.
//!
//! A gate runs one or more commands inside the working copy and reduces
//! the outcome to a [`StageResult`]. Diagnostics from a failed gate feed
//! the next fix instruction verbatim.

use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, info};

use crate::error::PipelineError;
use crate::exec::{self, CommandSpec};

/// Cap on diagnostics carried back into a fix instruction.
const DIAGNOSTIC_LIMIT: usize = 64 * 1024;

/// Outcome of one gate run.
#[derive(Debug, Clone)]
pub struct StageResult {
    pub success: bool,
    /// Combined command output of the failing command, truncated. Absent
    /// on success.
    pub diagnostics: Option<String>,
}

impl StageResult {
    pub fn passed() -> Self {
        Self {
            success: true,
            diagnostics: None,
        }
    }
}

/// A named validation stage the pipeline can run against a working copy.
#[async_trait]
pub trait Gate: Send + Sync {
    fn name(&self) -> &str;

    async fn run(&self, working_dir: &Path) -> Result<StageResult, PipelineError>;
}

/// Gate backed by a sequence of shell commands; the first failing command
/// short-circuits and its output becomes the diagnostics.
pub struct CommandGate {
    name: String,
    commands: Vec<CommandSpec>,
    timeout: Duration,
}

impl CommandGate {
    pub fn new(name: impl Into<String>, commands: Vec<CommandSpec>, timeout: Duration) -> Self {
        Self {
            name: name.into(),
            commands,
            timeout,
        }
    }

    /// The build gate: dependency install followed by compilation.
    pub fn build(timeout: Duration) -> Self {
        Self::new(
            "build",
            vec![
                CommandSpec::new("npm", &["install"]),
                CommandSpec::new("npm", &["run", "build"]),
            ],
            timeout,
        )
    }

    /// The test gate.
    pub fn test(timeout: Duration) -> Self {
        Self::new("test", vec![CommandSpec::new("npm", &["test"])], timeout)
    }
}

#[async_trait]
impl Gate for CommandGate {
    fn name(&self) -> &str {
        &self.name
    }

    async fn run(&self, working_dir: &Path) -> Result<StageResult, PipelineError> {
        for command in &self.commands {
            debug!(gate = %self.name, command = %command.display(), "running gate command");
            let output = exec::run_with_timeout(command, working_dir, self.timeout)
                .await
                .map_err(PipelineError::Other)?;

            if output.timed_out {
                info!(gate = %self.name, command = %command.display(), "gate command timed out");
                let mut diagnostics = format!(
                    "command `{}` timed out after {}s\n",
                    command.display(),
                    self.timeout.as_secs()
                );
                diagnostics.push_str(&output.combined(DIAGNOSTIC_LIMIT));
                return Ok(StageResult {
                    success: false,
                    diagnostics: Some(diagnostics),
                });
            }

            if !output.success() {
                info!(
                    gate = %self.name,
                    command = %command.display(),
                    exit_code = ?output.exit_code,
                    "gate command failed"
                );
                return Ok(StageResult {
                    success: false,
                    diagnostics: Some(output.combined(DIAGNOSTIC_LIMIT)),
                });
            }
        }
        info!(gate = %self.name, "gate passed");
        Ok(StageResult::passed())
    }
}
