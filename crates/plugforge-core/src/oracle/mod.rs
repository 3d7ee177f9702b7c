//! Read-only consultations of the agent CLI.
//!
//! Unlike the [`crate::harness`] path, an oracle call does not mutate the
//! working copy: the prompt goes in as an argument and the response comes
//! back on stdout. Specification expansion and the readiness review both
//! go through here.

use std::path::Path;
use std::time::Duration;

use anyhow::anyhow;
use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::error::PipelineError;
use crate::exec::{self, CommandSpec};

/// Answers a single prompt with a single text response.
#[async_trait]
pub trait Oracle: Send + Sync {
    async fn consult(
        &self,
        prompt: &str,
        working_dir: &Path,
        cancel: &CancellationToken,
    ) -> Result<String, PipelineError>;
}

/// Oracle backed by the Claude Code CLI in print mode.
#[derive(Debug, Clone)]
pub struct ClaudeOracle {
    command: CommandSpec,
    timeout: Duration,
}

impl ClaudeOracle {
    pub fn new(command: CommandSpec, timeout: Duration) -> Self {
        Self { command, timeout }
    }
}

#[async_trait]
impl Oracle for ClaudeOracle {
    async fn consult(
        &self,
        prompt: &str,
        working_dir: &Path,
        cancel: &CancellationToken,
    ) -> Result<String, PipelineError> {
        let mut spec = self.command.clone();
        spec.args.push(prompt.to_owned());
        debug!(program = %spec.program, prompt_bytes = prompt.len(), "consulting oracle");

        // run_with_timeout kills its child on drop, so losing the select
        // to cancellation also tears the process down.
        let output = tokio::select! {
            out = exec::run_with_timeout(&spec, working_dir, self.timeout) => {
                out.map_err(PipelineError::Other)?
            }
            () = cancel.cancelled() => return Err(PipelineError::Interrupted),
        };

        if output.timed_out {
            return Err(PipelineError::Other(anyhow!(
                "oracle `{}` timed out after {}s",
                self.command.program,
                self.timeout.as_secs()
            )));
        }
        if !output.success() {
            return Err(PipelineError::Other(anyhow!(
                "oracle `{}` exited with {:?}: {}",
                self.command.program,
                output.exit_code,
                exec::truncate_bytes(output.stderr.clone(), 2_000)
            )));
        }

        info!(response_bytes = output.stdout.len(), "oracle responded");
        Ok(output.stdout)
    }
}
