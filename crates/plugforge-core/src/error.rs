//! Pipeline error taxonomy.
//!
//! Each variant maps to a recovery policy: precondition and publish errors
//! are fatal, generation errors are recoverable by the enclosing loop's
//! retry, and loop exhaustion is fatal for the whole pipeline. Cleanup
//! failures are deliberately *not* represented here -- they are logged at
//! the point of failure and never override the error that triggered cleanup.

use std::path::PathBuf;

use thiserror::Error;

/// Errors surfaced by the pipeline to its caller.
#[derive(Debug, Error)]
pub enum PipelineError {
    /// The generator CLI could not be invoked at all (not installed or not
    /// on PATH). Fatal, checked before any mutation.
    #[error("generator command {command:?} is not invocable: {reason}")]
    ToolMissing { command: String, reason: String },

    /// The temporary-file area has less free space than the configured
    /// minimum. Fatal, checked before any mutation.
    #[error("insufficient disk space in {path}: {available_bytes} bytes available, {required_bytes} required")]
    InsufficientDiskSpace {
        path: PathBuf,
        available_bytes: u64,
        required_bytes: u64,
    },

    /// The generator process exceeded its wall-clock timeout and was
    /// terminated. Recoverable by the enclosing loop.
    #[error("generation timed out after {timeout_secs}s (termination {termination})")]
    GenerationTimeout {
        timeout_secs: u64,
        termination: TerminationOutcome,
    },

    /// The generator process exited with a non-zero status.
    /// Recoverable by the enclosing loop.
    #[error("generator exited with status {exit_code:?}")]
    GenerationFailed { exit_code: Option<i32> },

    /// The one-shot specification expansion call failed. Fatal -- no
    /// artifact can be produced without the detailed specification.
    #[error("specification expansion failed: {0}")]
    ExpansionFailed(#[source] anyhow::Error),

    /// Scaffold creation failed in both the template command and the
    /// fixed-structure fallback. Fatal.
    #[error("scaffold initialization failed: {0}")]
    ScaffoldFailed(#[source] anyhow::Error),

    /// The build loop exhausted its iteration cap without a passing build.
    #[error("build failed after {attempts} attempts: {diagnostics}")]
    BuildExhausted { attempts: u32, diagnostics: String },

    /// The test loop exhausted its iteration cap without a passing run.
    #[error("tests failed after {attempts} attempts: {diagnostics}")]
    TestExhausted { attempts: u32, diagnostics: String },

    /// The readiness loop exhausted its iteration cap without a
    /// production-ready verdict.
    #[error("plugin not production-ready after {attempts} review rounds: {last_instructions}")]
    ReadinessExhausted {
        attempts: u32,
        last_instructions: String,
    },

    /// Copying the validated working copy to the target path failed. Fatal.
    #[error("failed to publish artifact to {target}: {source}")]
    Publish {
        target: PathBuf,
        #[source]
        source: anyhow::Error,
    },

    /// The pipeline was cancelled externally (signal).
    #[error("pipeline interrupted")]
    Interrupted,

    /// Other I/O or subprocess plumbing failures.
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// What happened when a timed-out generator process was terminated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TerminationOutcome {
    /// The process exited after SIGTERM.
    Graceful,
    /// The process had to be SIGKILLed.
    Forced,
    /// The process had already exited by the time termination was attempted.
    AlreadyExited,
}

impl std::fmt::Display for TerminationOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Graceful => write!(f, "graceful"),
            Self::Forced => write!(f, "forced"),
            Self::AlreadyExited => write!(f, "already-exited"),
        }
    }
}

impl PipelineError {
    /// Whether an enclosing retry loop may treat this error as one more
    /// failed attempt (as opposed to aborting the pipeline).
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Self::GenerationTimeout { .. } | Self::GenerationFailed { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timeout_and_tool_failure_are_recoverable() {
        let timeout = PipelineError::GenerationTimeout {
            timeout_secs: 600,
            termination: TerminationOutcome::Forced,
        };
        let failed = PipelineError::GenerationFailed { exit_code: Some(1) };
        assert!(timeout.is_recoverable());
        assert!(failed.is_recoverable());
    }

    #[test]
    fn preconditions_and_exhaustion_are_fatal() {
        let missing = PipelineError::ToolMissing {
            command: "claude".into(),
            reason: "not found".into(),
        };
        let exhausted = PipelineError::BuildExhausted {
            attempts: 5,
            diagnostics: "error TS2304".into(),
        };
        assert!(!missing.is_recoverable());
        assert!(!exhausted.is_recoverable());
    }
}
