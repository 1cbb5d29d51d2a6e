//! The self-healing build pipeline: controller, loop state, results, worker

mod config;
mod controller;
mod result;
mod state;
mod worker;
mod workspace;

pub use config::{
    PipelineConfig, DEFAULT_BUILD_TIMEOUT, DEFAULT_COLLABORATOR_TIMEOUT, DEFAULT_MAX_ATTEMPTS,
};
pub use controller::PipelineController;
pub use result::{AttemptOutcome, AttemptRecord, PipelineResult, Status};
pub use state::{PipelineState, Step, Transition};
pub use worker::{Worker, WorkerConfig, WorkerError, WorkerSummary};
pub use workspace::RunWorkspace;
