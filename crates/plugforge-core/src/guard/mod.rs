//! Run lifecycle tracking and interrupt handling.
//!
//! One [`LifecycleGuard`] exists per pipeline run. It owns the
//! cancellation token every subprocess-supervising call observes; on the
//! first Ctrl-C it cancels the token and lets the in-flight call tear its
//! own child down, on the second it exits immediately. The explicit state
//! machine keeps "did we finish, get interrupted, or fault" a single
//! answerable question at exit time.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use anyhow::anyhow;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::error::PipelineError;
use crate::harness::ActiveProcess;

/// Process exit code reported after an interrupt, matching shell
/// convention for SIGINT.
pub const INTERRUPT_EXIT_CODE: i32 = 130;

/// Lifecycle of a pipeline run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    Idle,
    Running,
    Completed,
    Interrupted,
    Faulted,
}

impl RunState {
    fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Interrupted | Self::Faulted)
    }
}

#[derive(Debug, Clone)]
pub struct LifecycleGuard {
    cancel: CancellationToken,
    state: Arc<Mutex<RunState>>,
    active: ActiveProcess,
    handler_installed: Arc<AtomicBool>,
}

impl LifecycleGuard {
    pub fn new(active: ActiveProcess) -> Self {
        Self {
            cancel: CancellationToken::new(),
            state: Arc::new(Mutex::new(RunState::Idle)),
            active,
            handler_installed: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Token to pass into every generator/oracle call.
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn state(&self) -> RunState {
        *self.state.lock().expect("lifecycle lock poisoned")
    }

    pub fn mark_running(&self) {
        self.transition(RunState::Running);
    }

    pub fn mark_completed(&self) {
        self.transition(RunState::Completed);
    }

    pub fn mark_faulted(&self) {
        self.transition(RunState::Faulted);
    }

    /// First interrupt: cancel the token so the supervised call terminates
    /// its child through its one cleanup path. Returns true only for the
    /// transition that actually took effect, so cleanup is requested
    /// exactly once no matter how many signals race in.
    pub fn on_interrupt(&self) -> bool {
        let transitioned = self.transition(RunState::Interrupted);
        if transitioned {
            if let Some(pid) = self.active.current() {
                info!(pid, "interrupt received, cancelling in-flight generator");
            } else {
                info!("interrupt received, no generator in flight");
            }
            self.cancel.cancel();
        }
        transitioned
    }

    /// Spawn the Ctrl-C listener. The second signal bypasses graceful
    /// shutdown entirely. Installing twice for the same run is an error;
    /// duplicate listeners would steal signals from each other.
    pub fn install_signal_handler(&self) -> Result<tokio::task::JoinHandle<()>, PipelineError> {
        if self.handler_installed.swap(true, Ordering::SeqCst) {
            return Err(PipelineError::Other(anyhow!(
                "signal handler already installed for this run"
            )));
        }
        let guard = self.clone();
        Ok(tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_err() {
                error!("failed to install interrupt handler");
                return;
            }
            guard.on_interrupt();
            eprintln!("\nInterrupted, waiting for the active process to stop (Ctrl-C again to force exit)");

            if tokio::signal::ctrl_c().await.is_ok() {
                eprintln!("Force exiting");
                std::process::exit(INTERRUPT_EXIT_CODE);
            }
        }))
    }

    fn transition(&self, next: RunState) -> bool {
        let mut state = self.state.lock().expect("lifecycle lock poisoned");
        let valid = match (*state, next) {
            (RunState::Idle, RunState::Running) => true,
            (RunState::Running, to) if to.is_terminal() => true,
            // Interrupt can land before the run starts.
            (RunState::Idle, RunState::Interrupted) => true,
            _ => false,
        };
        if valid {
            info!(from = ?*state, to = ?next, "lifecycle transition");
            *state = next;
        } else if *state != next {
            warn!(from = ?*state, to = ?next, "ignoring invalid lifecycle transition");
        }
        valid
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn guard() -> LifecycleGuard {
        LifecycleGuard::new(ActiveProcess::new())
    }

    #[test]
    fn happy_path_transitions() {
        let g = guard();
        assert_eq!(g.state(), RunState::Idle);
        g.mark_running();
        assert_eq!(g.state(), RunState::Running);
        g.mark_completed();
        assert_eq!(g.state(), RunState::Completed);
    }

    #[test]
    fn terminal_states_are_sticky() {
        let g = guard();
        g.mark_running();
        g.mark_completed();
        g.mark_faulted();
        assert_eq!(g.state(), RunState::Completed);
    }

    #[test]
    fn interrupt_cancels_token_exactly_once() {
        let g = guard();
        g.mark_running();

        assert!(g.on_interrupt());
        assert!(g.cancel_token().is_cancelled());
        assert_eq!(g.state(), RunState::Interrupted);

        // A racing second interrupt must not re-trigger cleanup.
        assert!(!g.on_interrupt());
        assert_eq!(g.state(), RunState::Interrupted);
    }

    #[test]
    fn interrupt_before_running_is_accepted() {
        let g = guard();
        assert!(g.on_interrupt());
        assert_eq!(g.state(), RunState::Interrupted);
    }

    #[tokio::test]
    async fn signal_handler_installs_at_most_once() {
        let g = guard();
        let task = g.install_signal_handler().expect("first install");
        assert!(g.install_signal_handler().is_err());
        task.abort();
    }

    #[test]
    fn fault_after_interrupt_does_not_mask_interrupt() {
        let g = guard();
        g.mark_running();
        g.on_interrupt();
        g.mark_faulted();
        assert_eq!(g.state(), RunState::Interrupted);
    }
}
