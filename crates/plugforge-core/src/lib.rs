//! Core pipeline for generating and validating runtime plugins.
//!
//! The pipeline turns a declarative [`spec::PluginSpecification`] into a
//! built, tested plugin directory by repeatedly invoking an external
//! coding-agent CLI and validating its output through bounded retry loops
//! (build, test, production-readiness review). Stages run strictly
//! sequentially; the only internal concurrency is the race between a child
//! process exiting and its timeout elapsing.
//!
//! External collaborators (the generator CLI, the review oracle, the
//! package-manager commands) sit behind traits so the loop logic can be
//! tested against scripted fakes without spawning anything.

pub mod error;
pub mod exec;
pub mod gate;
pub mod guard;
pub mod harness;
pub mod oracle;
pub mod pipeline;
pub mod preflight;
pub mod prompt;
pub mod publish;
pub mod spec;
pub mod verdict;
pub mod workspace;
