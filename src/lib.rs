//! healbox - self-healing build and deploy pipeline
//!
//! A task names a project (a git repository or a local directory). The
//! pipeline analyzes it into a [`plan::BuildPlan`], builds it in a container,
//! and when the build fails asks a [`fixer::Fixer`] for a repair. Every repair
//! produces a new immutable snapshot of the project, so attempts never see
//! each other's changes. The loop is bounded by a maximum attempt count and
//! every build by a wall-clock timeout. Successful builds can be deployed as
//! long-running containers; every outcome ends in a
//! [`pipeline::PipelineResult`], with failures classified as user or service
//! errors.
//!
//! # Structure
//!
//! - [`pipeline`]: the ANALYSIS / BUILD / DEBUG / DEPLOY state machine and
//!   the concurrent task worker
//! - [`analyzer`], [`fixer`]: heuristic and LLM-backed collaborators
//! - [`runtime`], [`deploy`]: Docker-backed execution
//! - [`snapshot`]: immutable project snapshots and patches
//! - [`classify`]: build outcome and failure classification
//! - [`task`]: task sources and result reporters
//!
//! # Example
//!
//! ```ignore
//! use healbox::analyzer::HeuristicAnalyzer;
//! use healbox::fixer::RuleFixer;
//! use healbox::pipeline::{PipelineConfig, PipelineController};
//! use healbox::runtime::DockerCliRuntime;
//! use healbox::task::Task;
//! use std::sync::Arc;
//! use tokio_util::sync::CancellationToken;
//!
//! let controller = PipelineController::new(
//!     Arc::new(HeuristicAnalyzer::new()),
//!     Arc::new(DockerCliRuntime::default()),
//!     Arc::new(RuleFixer::new()),
//!     PipelineConfig::default(),
//! );
//! let result = controller
//!     .execute(&Task::local("site", "./site"), &CancellationToken::new())
//!     .await;
//! println!("{} after {} attempt(s)", result.status, result.attempts);
//! ```

pub mod analyzer;
pub mod classify;
pub mod cli;
pub mod config;
pub mod deploy;
pub mod error;
pub mod fixer;
pub mod llm;
pub mod pipeline;
pub mod plan;
pub mod progress;
pub mod runtime;
pub mod snapshot;
pub mod task;
pub mod util;

pub use classify::{classify_failure, ErrorClass};
pub use config::{ConfigError, HealboxConfig};
pub use error::{Failure, FailureKind};
pub use pipeline::{PipelineConfig, PipelineController, PipelineResult, Status, Step};
pub use plan::BuildPlan;
pub use task::Task;
pub use util::{init_from_env, init_logging, LoggingConfig};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Library name
pub const NAME: &str = env!("CARGO_PKG_NAME");
