//! Logging-based progress handler

use super::{ProgressEvent, ProgressHandler};
use crate::pipeline::Status;
use tracing::{debug, info, warn};

/// Handler that logs progress events using tracing
#[derive(Debug, Default, Clone, Copy)]
pub struct LoggingHandler;

impl ProgressHandler for LoggingHandler {
    fn on_progress(&self, event: &ProgressEvent) {
        match event {
            ProgressEvent::Started { task_id, run_id } => {
                info!(task = %task_id, run = %run_id, "Starting pipeline");
            }
            ProgressEvent::StepEntered {
                step,
                attempt,
                elapsed,
            } => {
                debug!(
                    step = %step,
                    attempt,
                    elapsed_ms = elapsed.as_millis(),
                    "Entering step"
                );
            }
            ProgressEvent::PlanReady {
                attempt,
                project_type,
                command,
            } => {
                info!(attempt, project_type = %project_type, command = %command, "Plan ready");
            }
            ProgressEvent::AnalysisFailed { attempt, error } => {
                warn!(attempt, error = %error, "Analysis failed");
            }
            ProgressEvent::BuildFinished {
                attempt,
                success,
                duration,
            } => {
                if *success {
                    info!(attempt, duration_ms = duration.as_millis(), "Build succeeded");
                } else {
                    warn!(attempt, duration_ms = duration.as_millis(), "Build failed");
                }
            }
            ProgressEvent::RepairApplied {
                attempt,
                from,
                to,
                patches,
            } => {
                info!(attempt, from = %from, to = %to, patches, "Repair applied");
            }
            ProgressEvent::RepairFailed { attempt, error } => {
                warn!(attempt, error = %error, "Repair failed, retrying current snapshot");
            }
            ProgressEvent::Deployed { url } => {
                info!(url = %url, "Deployed");
            }
            ProgressEvent::Completed {
                status,
                attempts,
                total_time,
            } => match status {
                Status::Success => info!(
                    attempts,
                    total_time_ms = total_time.as_millis(),
                    "Pipeline succeeded"
                ),
                Status::Failed => warn!(
                    attempts,
                    total_time_ms = total_time.as_millis(),
                    "Pipeline failed"
                ),
            },
        }
    }
}
