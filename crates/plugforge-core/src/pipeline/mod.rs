//! The pipeline: preflight, scaffold, expand, generate, then the bounded
//! build/test/readiness loops, ending in publication.
//!
//! Control flows strictly forward except for one edge: a failed readiness
//! review regenerates and re-enters the build and test loops before the
//! next review. Each loop owns its counter; exhausting a cap without
//! success is the only way a loop fails, and that failure propagates
//! unchanged to the caller.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::PipelineError;
use crate::exec::CommandSpec;
use crate::gate::{CommandGate, Gate};
use crate::guard::LifecycleGuard;
use crate::harness::{ActiveProcess, ClaudeCodeGenerator, GenerateRequest, Generator};
use crate::oracle::{ClaudeOracle, Oracle};
use crate::preflight;
use crate::prompt;
use crate::publish;
use crate::spec::PluginSpecification;
use crate::verdict::{FALLBACK_INSTRUCTIONS, ReadinessVerdict};
use crate::workspace::{self, WorkingCopy};

/// Tunable knobs for a pipeline run. [`Default`] gives the production
/// values; tests shrink the timeouts and swap the commands.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Generator CLI with its fixed batch-mode flags.
    pub generator_command: CommandSpec,
    /// `--max-turns` passed per generator invocation.
    pub max_turns: u32,
    /// Wall-clock bound on one generator invocation.
    pub generation_timeout: Duration,
    /// Wall-clock bound on one oracle consultation.
    pub oracle_timeout: Duration,
    /// Scaffold template command; the plugin name is appended.
    pub template_command: CommandSpec,
    pub template_timeout: Duration,
    /// Bound on each gate command (install, build, test).
    pub gate_timeout: Duration,
    pub build_cap: u32,
    pub test_cap: u32,
    pub revision_cap: u32,
    /// Free space the temp area must have before anything starts.
    pub required_disk_bytes: u64,
    /// Directory the finished plugin is published into.
    pub output_dir: PathBuf,
    /// Size bound on the source listing sent for readiness review.
    pub listing_limit_bytes: usize,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            generator_command: ClaudeCodeGenerator::default_command(),
            max_turns: 30,
            generation_timeout: Duration::from_secs(600),
            oracle_timeout: Duration::from_secs(300),
            template_command: CommandSpec::new("elizaos", &["create", "-t", "plugin"]),
            template_timeout: Duration::from_secs(120),
            gate_timeout: Duration::from_secs(600),
            build_cap: 5,
            test_cap: 5,
            revision_cap: 3,
            required_disk_bytes: 1024 * 1024 * 1024,
            output_dir: PathBuf::from("."),
            listing_limit_bytes: 96 * 1024,
        }
    }
}

/// Per-loop attempt counters. Each loop sets its own counter to the
/// current attempt number and never exceeds its cap; re-entering a loop
/// restarts its count.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IterationCounters {
    pub build: u32,
    pub test: u32,
    pub revision: u32,
}

/// Result of a successful run.
#[derive(Debug, Clone)]
pub struct PipelineOutcome {
    pub target: PathBuf,
    /// Where a pre-existing target directory was moved, if any.
    pub backup: Option<PathBuf>,
    pub counters: IterationCounters,
}

// ---------------------------------------------------------------------------
// Stage tracking
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Preflight,
    Scaffold,
    Expand,
    Generate,
    Build,
    Test,
    Readiness,
    Publish,
}

impl Stage {
    /// The forward chain, plus the readiness re-entry edge back to Build.
    fn may_follow(self, prev: Option<Stage>) -> bool {
        use Stage::*;
        matches!(
            (prev, self),
            (None, Preflight)
                | (Some(Preflight), Scaffold)
                | (Some(Scaffold), Expand)
                | (Some(Expand), Generate)
                | (Some(Generate), Build)
                | (Some(Build), Test)
                | (Some(Test), Readiness)
                | (Some(Readiness), Build)
                | (Some(Readiness), Publish)
        )
    }
}

/// Records which stage is executing and flags out-of-order transitions.
#[derive(Debug, Default)]
struct StageTracker {
    current: Option<Stage>,
}

impl StageTracker {
    fn enter(&mut self, stage: Stage) {
        if stage.may_follow(self.current) {
            info!(stage = ?stage, "entering stage");
        } else {
            warn!(from = ?self.current, to = ?stage, "unexpected stage transition");
        }
        self.current = Some(stage);
    }
}

// ---------------------------------------------------------------------------
// Pipeline
// ---------------------------------------------------------------------------

pub struct Pipeline {
    config: PipelineConfig,
    guard: LifecycleGuard,
    generator: Arc<dyn Generator>,
    oracle: Arc<dyn Oracle>,
    build_gate: Arc<dyn Gate>,
    test_gate: Arc<dyn Gate>,
}

impl Pipeline {
    /// Pipeline with the production components wired to `config`.
    pub fn new(config: PipelineConfig) -> Self {
        let active = ActiveProcess::new();
        let guard = LifecycleGuard::new(active.clone());
        let generator = Arc::new(ClaudeCodeGenerator::new(
            config.generator_command.clone(),
            config.max_turns,
            config.generation_timeout,
            active,
        ));
        let oracle = Arc::new(ClaudeOracle::new(
            config.generator_command.clone(),
            config.oracle_timeout,
        ));
        let build_gate = Arc::new(CommandGate::build(config.gate_timeout));
        let test_gate = Arc::new(CommandGate::test(config.gate_timeout));
        Self::with_components(config, guard, generator, oracle, build_gate, test_gate)
    }

    /// Pipeline with injected components. Tests use this to substitute
    /// scripted generators, oracles, and gates.
    pub fn with_components(
        config: PipelineConfig,
        guard: LifecycleGuard,
        generator: Arc<dyn Generator>,
        oracle: Arc<dyn Oracle>,
        build_gate: Arc<dyn Gate>,
        test_gate: Arc<dyn Gate>,
    ) -> Self {
        Self {
            config,
            guard,
            generator,
            oracle,
            build_gate,
            test_gate,
        }
    }

    pub fn guard(&self) -> &LifecycleGuard {
        &self.guard
    }

    /// Run the whole pipeline for `spec`.
    pub async fn run(&self, spec: &PluginSpecification) -> Result<PipelineOutcome, PipelineError> {
        self.guard.mark_running();
        let result = self.run_inner(spec).await;
        match &result {
            Ok(_) => self.guard.mark_completed(),
            Err(PipelineError::Interrupted) => {
                // Usually already Interrupted via the signal path; this
                // covers an externally cancelled token.
                self.guard.on_interrupt();
            }
            Err(_) => self.guard.mark_faulted(),
        }
        result
    }

    async fn run_inner(&self, spec: &PluginSpecification) -> Result<PipelineOutcome, PipelineError> {
        let cancel = self.guard.cancel_token();
        let mut tracker = StageTracker::default();
        let mut counters = IterationCounters::default();

        tracker.enter(Stage::Preflight);
        preflight::run_preflight(
            &self.config.generator_command,
            &std::env::temp_dir(),
            self.config.required_disk_bytes,
        )
        .await?;

        tracker.enter(Stage::Scaffold);
        ensure_live(&cancel)?;
        let working = workspace::initialize(
            &spec.name,
            &self.config.template_command,
            self.config.template_timeout,
        )
        .await?;

        tracker.enter(Stage::Expand);
        ensure_live(&cancel)?;
        self.expand_specification(spec, &working, &cancel).await?;

        tracker.enter(Stage::Generate);
        ensure_live(&cancel)?;
        self.regenerate(prompt::initial_instruction(spec), working.path(), &cancel)
            .await?;

        self.run_build_loop(&working, &mut counters, &mut tracker, &cancel)
            .await?;
        self.run_test_loop(&working, &mut counters, &mut tracker, &cancel)
            .await?;
        self.run_readiness_loop(&working, &mut counters, &mut tracker, &cancel)
            .await?;

        tracker.enter(Stage::Publish);
        ensure_live(&cancel)?;
        let target = self.config.output_dir.join(&spec.name);
        let report = publish::publish(working.path(), &target)?;

        info!(target = %report.target.display(), counters = ?counters, "pipeline succeeded");
        Ok(PipelineOutcome {
            target: report.target,
            backup: report.backup,
            counters,
        })
    }

    /// Produce the detailed specification once and persist it in the
    /// working copy for every later generator invocation to read.
    async fn expand_specification(
        &self,
        spec: &PluginSpecification,
        working: &WorkingCopy,
        cancel: &CancellationToken,
    ) -> Result<(), PipelineError> {
        let detailed = self
            .oracle
            .consult(&prompt::expansion_prompt(spec), working.path(), cancel)
            .await
            .map_err(|e| match e {
                PipelineError::Interrupted => PipelineError::Interrupted,
                other => PipelineError::ExpansionFailed(anyhow::anyhow!(other)),
            })?;

        if detailed.trim().is_empty() {
            return Err(PipelineError::ExpansionFailed(anyhow::anyhow!(
                "oracle returned an empty detailed specification"
            )));
        }

        std::fs::write(working.path().join(prompt::DETAILED_SPEC_FILE), &detailed)
            .map_err(|e| PipelineError::ExpansionFailed(anyhow::Error::new(e)))?;
        checkpoint(working.path(), "plugforge: detailed specification");
        info!(bytes = detailed.len(), "detailed specification written");
        Ok(())
    }

    async fn run_build_loop(
        &self,
        working: &WorkingCopy,
        counters: &mut IterationCounters,
        tracker: &mut StageTracker,
        cancel: &CancellationToken,
    ) -> Result<(), PipelineError> {
        tracker.enter(Stage::Build);
        let mut attempt = 0;
        let result = self
            .run_gate_loop(
                self.build_gate.as_ref(),
                self.config.build_cap,
                &mut attempt,
                working,
                cancel,
                |attempts, diagnostics| PipelineError::BuildExhausted {
                    attempts,
                    diagnostics,
                },
            )
            .await;
        counters.build = attempt;
        result
    }

    async fn run_test_loop(
        &self,
        working: &WorkingCopy,
        counters: &mut IterationCounters,
        tracker: &mut StageTracker,
        cancel: &CancellationToken,
    ) -> Result<(), PipelineError> {
        tracker.enter(Stage::Test);
        let mut attempt = 0;
        let result = self
            .run_gate_loop(
                self.test_gate.as_ref(),
                self.config.test_cap,
                &mut attempt,
                working,
                cancel,
                |attempts, diagnostics| PipelineError::TestExhausted {
                    attempts,
                    diagnostics,
                },
            )
            .await;
        counters.test = attempt;
        result
    }

    /// Run `gate` up to `cap` times, regenerating with the failure
    /// diagnostics after every failed run, the final one included. A loop
    /// that succeeds on run k has performed k-1 regenerations; a loop
    /// that exhausts its cap has performed cap of them before failing.
    async fn run_gate_loop(
        &self,
        gate: &dyn Gate,
        cap: u32,
        attempt_out: &mut u32,
        working: &WorkingCopy,
        cancel: &CancellationToken,
        exhausted: impl Fn(u32, String) -> PipelineError,
    ) -> Result<(), PipelineError> {
        if cap == 0 {
            return Err(exhausted(0, "iteration cap is zero".to_owned()));
        }
        for attempt in 1..=cap {
            ensure_live(cancel)?;
            *attempt_out = attempt;
            debug!(gate = gate.name(), attempt, cap, "running gate");

            let result = gate.run(working.path()).await?;
            if result.success {
                checkpoint(
                    working.path(),
                    &format!("plugforge: {} gate passed (attempt {attempt})", gate.name()),
                );
                return Ok(());
            }

            let diagnostics = result.diagnostics.unwrap_or_default();
            warn!(gate = gate.name(), attempt, cap, "gate failed");
            self.regenerate(
                prompt::fix_instruction(gate.name(), &diagnostics),
                working.path(),
                cancel,
            )
            .await?;
            if attempt == cap {
                return Err(exhausted(attempt, diagnostics));
            }
        }
        unreachable!("loop returns on success or at the cap")
    }

    async fn run_readiness_loop(
        &self,
        working: &WorkingCopy,
        counters: &mut IterationCounters,
        tracker: &mut StageTracker,
        cancel: &CancellationToken,
    ) -> Result<(), PipelineError> {
        let cap = self.config.revision_cap;
        if cap == 0 {
            return Err(PipelineError::ReadinessExhausted {
                attempts: 0,
                last_instructions: "iteration cap is zero".to_owned(),
            });
        }
        for attempt in 1..=cap {
            tracker.enter(Stage::Readiness);
            ensure_live(cancel)?;
            counters.revision = attempt;

            let listing = working
                .source_listing(self.config.listing_limit_bytes)
                .map_err(PipelineError::Other)?;
            let response = self
                .oracle
                .consult(&prompt::readiness_prompt(&listing), working.path(), cancel)
                .await?;
            let verdict = ReadinessVerdict::parse_response(&response);

            if verdict.production_ready {
                info!(attempt, "readiness review passed");
                return Ok(());
            }

            let instructions = verdict
                .revision_instructions
                .unwrap_or_else(|| FALLBACK_INSTRUCTIONS.to_owned());
            warn!(attempt, cap, "readiness review requested revisions");
            if attempt == cap {
                return Err(PipelineError::ReadinessExhausted {
                    attempts: attempt,
                    last_instructions: instructions,
                });
            }

            self.regenerate(
                prompt::revision_instruction(&instructions),
                working.path(),
                cancel,
            )
            .await?;
            // Revised code must re-pass both gates before re-review; a
            // failure here fails the whole pipeline without consuming
            // further readiness attempts.
            self.run_build_loop(working, counters, tracker, cancel).await?;
            self.run_test_loop(working, counters, tracker, cancel).await?;
            checkpoint(working.path(), &format!("plugforge: revision {attempt}"));
        }
        unreachable!("loop returns on a verdict or at the cap")
    }

    /// Invoke the generator. Recoverable generation errors are logged and
    /// swallowed; the next gate run surfaces the consequences. Fatal
    /// errors (interrupt, missing tool) propagate.
    async fn regenerate(
        &self,
        instruction: String,
        working_dir: &Path,
        cancel: &CancellationToken,
    ) -> Result<(), PipelineError> {
        let request = GenerateRequest {
            instruction,
            working_dir: working_dir.to_path_buf(),
        };
        match self.generator.generate(&request, cancel).await {
            Ok(()) => Ok(()),
            Err(e) if e.is_recoverable() => {
                warn!(error = %e, "generation attempt failed; continuing to the next gate run");
                Ok(())
            }
            Err(e) => Err(e),
        }
    }
}

fn ensure_live(cancel: &CancellationToken) -> Result<(), PipelineError> {
    if cancel.is_cancelled() {
        Err(PipelineError::Interrupted)
    } else {
        Ok(())
    }
}

/// Commit a checkpoint, logging failures instead of aborting the run.
fn checkpoint(root: &Path, message: &str) {
    match workspace::commit_checkpoint(root, message) {
        Ok(true) => debug!(message, "checkpoint committed"),
        Ok(false) => debug!(message, "nothing to checkpoint"),
        Err(e) => warn!(error = %e, message, "checkpoint commit failed"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_defaults_are_production_values() {
        let config = PipelineConfig::default();
        assert_eq!(config.build_cap, 5);
        assert_eq!(config.test_cap, 5);
        assert_eq!(config.revision_cap, 3);
        assert_eq!(config.generation_timeout, Duration::from_secs(600));
        assert_eq!(config.required_disk_bytes, 1024 * 1024 * 1024);
        assert_eq!(config.generator_command.program, "claude");
    }

    #[test]
    fn stage_ordering_allows_the_forward_chain() {
        use Stage::*;
        assert!(Preflight.may_follow(None));
        assert!(Scaffold.may_follow(Some(Preflight)));
        assert!(Expand.may_follow(Some(Scaffold)));
        assert!(Generate.may_follow(Some(Expand)));
        assert!(Build.may_follow(Some(Generate)));
        assert!(Test.may_follow(Some(Build)));
        assert!(Readiness.may_follow(Some(Test)));
        assert!(Publish.may_follow(Some(Readiness)));
    }

    #[test]
    fn stage_ordering_allows_only_the_readiness_re_entry_edge() {
        use Stage::*;
        assert!(Build.may_follow(Some(Readiness)));
        assert!(!Test.may_follow(Some(Readiness)));
        assert!(!Generate.may_follow(Some(Readiness)));
        assert!(!Publish.may_follow(Some(Test)));
        assert!(!Preflight.may_follow(Some(Publish)));
    }

    #[test]
    fn counters_start_at_zero() {
        assert_eq!(IterationCounters::default(), IterationCounters {
            build: 0,
            test: 0,
            revision: 0
        });
    }
}
