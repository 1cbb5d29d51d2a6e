//! Progress handler trait and events

use std::time::Duration;

use crate::pipeline::{Status, Step};
use crate::snapshot::SnapshotId;

/// Events emitted while a pipeline runs
#[derive(Debug, Clone)]
pub enum ProgressEvent {
    /// Pipeline started for a task
    Started { task_id: String, run_id: String },

    /// The controller entered a step
    StepEntered {
        step: Step,
        attempt: u32,
        elapsed: Duration,
    },

    /// Analysis produced a plan
    PlanReady {
        attempt: u32,
        project_type: String,
        command: String,
    },

    /// Analysis failed; the previous plan, if any, is reused
    AnalysisFailed { attempt: u32, error: String },

    /// One build attempt finished
    BuildFinished {
        attempt: u32,
        success: bool,
        duration: Duration,
    },

    /// A repair produced a new snapshot
    RepairApplied {
        attempt: u32,
        from: SnapshotId,
        to: SnapshotId,
        patches: usize,
    },

    /// The fixer raised; the current snapshot is retried
    RepairFailed { attempt: u32, error: String },

    /// The service is running
    Deployed { url: String },

    /// Terminal result reached
    Completed {
        status: Status,
        attempts: u32,
        total_time: Duration,
    },
}

/// Trait for handling progress events during a pipeline run
pub trait ProgressHandler: Send + Sync {
    /// Called when a progress event occurs
    fn on_progress(&self, event: &ProgressEvent);
}

/// No-op handler that ignores all events
#[derive(Debug, Default, Clone, Copy)]
pub struct NoOpHandler;

impl ProgressHandler for NoOpHandler {
    fn on_progress(&self, _event: &ProgressEvent) {}
}
