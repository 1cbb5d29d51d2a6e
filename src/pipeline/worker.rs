//! Task polling and concurrent pipeline execution
//!
//! The worker takes tasks from a [`TaskSource`], runs up to `concurrency`
//! pipelines at once and reports each result. On shutdown it stops taking
//! work, cancels in-flight pipelines so they end with a FAILED result, and
//! drains them before returning.

use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::Semaphore;
use tokio::task::{JoinError, JoinSet};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use super::controller::PipelineController;
use super::result::Status;
use crate::task::{Reporter, TaskSource, TaskSourceError};

#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Pipelines running at the same time
    pub concurrency: usize,
    /// Wait between polls when the source is empty
    pub poll_interval: Duration,
    /// Stop once the source reports no more work
    pub once: bool,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            concurrency: 1,
            poll_interval: Duration::from_secs(10),
            once: false,
        }
    }
}

#[derive(Debug, Error)]
pub enum WorkerError {
    #[error("Task source failed: {0}")]
    Source(#[from] TaskSourceError),

    #[error("{0} pipeline(s) ended without a result")]
    Lost(usize),
}

/// Counters over one worker session
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WorkerSummary {
    pub succeeded: usize,
    pub failed: usize,
    pub report_errors: usize,
    pub lost: usize,
}

impl WorkerSummary {
    pub fn completed(&self) -> usize {
        self.succeeded + self.failed
    }
}

#[derive(Debug)]
struct Finished {
    task_id: String,
    status: Status,
    reported: bool,
}

pub struct Worker {
    controller: Arc<PipelineController>,
    source: Arc<dyn TaskSource>,
    reporter: Arc<dyn Reporter>,
    config: WorkerConfig,
}

impl Worker {
    pub fn new(
        controller: Arc<PipelineController>,
        source: Arc<dyn TaskSource>,
        reporter: Arc<dyn Reporter>,
        config: WorkerConfig,
    ) -> Self {
        Self {
            controller,
            source,
            reporter,
            config,
        }
    }

    /// Runs until shutdown, until the source fails, or (in once mode) until
    /// the source is empty. In-flight pipelines are always drained first.
    pub async fn run(&self, shutdown: CancellationToken) -> Result<WorkerSummary, WorkerError> {
        let slots = Arc::new(Semaphore::new(self.config.concurrency.max(1)));
        let pipelines = shutdown.child_token();
        let mut join_set: JoinSet<Finished> = JoinSet::new();
        let mut summary = WorkerSummary::default();
        let mut fatal: Option<TaskSourceError> = None;

        info!(
            source = self.source.name(),
            concurrency = self.config.concurrency,
            once = self.config.once,
            "Worker started"
        );

        loop {
            if shutdown.is_cancelled() {
                info!("Shutdown requested, stopping dispatch");
                break;
            }

            while let Some(joined) = join_set.try_join_next() {
                reap(joined, &mut summary);
            }

            let permit = tokio::select! {
                _ = shutdown.cancelled() => break,
                permit = slots.clone().acquire_owned() => match permit {
                    Ok(permit) => permit,
                    Err(_) => break,
                },
            };

            let polled = tokio::select! {
                _ = shutdown.cancelled() => break,
                polled = self.source.next() => polled,
            };

            match polled {
                Ok(Some(task)) => {
                    let controller = self.controller.clone();
                    let reporter = self.reporter.clone();
                    let cancel = pipelines.clone();
                    join_set.spawn(async move {
                        let _permit = permit;
                        let result = controller.execute(&task, &cancel).await;
                        let reported = match reporter.submit(&task, &result).await {
                            Ok(()) => true,
                            Err(e) => {
                                error!(task = %task.id, error = %e, "Failed to report result");
                                false
                            }
                        };
                        Finished {
                            task_id: task.id,
                            status: result.status,
                            reported,
                        }
                    });
                }
                Ok(None) => {
                    drop(permit);
                    if self.config.once {
                        info!("No more tasks");
                        break;
                    }
                    tokio::select! {
                        _ = shutdown.cancelled() => break,
                        Some(joined) = join_set.join_next() => reap(joined, &mut summary),
                        _ = tokio::time::sleep(self.config.poll_interval) => {}
                    }
                }
                Err(e) => {
                    error!(error = %e, "Task source failed");
                    fatal = Some(e);
                    break;
                }
            }
        }

        if shutdown.is_cancelled() {
            pipelines.cancel();
        }
        if !join_set.is_empty() {
            info!(count = join_set.len(), "Waiting for in-flight pipelines");
        }
        while let Some(joined) = join_set.join_next().await {
            reap(joined, &mut summary);
        }

        info!(
            succeeded = summary.succeeded,
            failed = summary.failed,
            report_errors = summary.report_errors,
            "Worker stopped"
        );

        if let Some(e) = fatal {
            return Err(WorkerError::Source(e));
        }
        if summary.lost > 0 {
            return Err(WorkerError::Lost(summary.lost));
        }
        Ok(summary)
    }
}

fn reap(joined: Result<Finished, JoinError>, summary: &mut WorkerSummary) {
    match joined {
        Ok(finished) => {
            match finished.status {
                Status::Success => summary.succeeded += 1,
                Status::Failed => summary.failed += 1,
            }
            if !finished.reported {
                summary.report_errors += 1;
            }
            info!(task = %finished.task_id, status = %finished.status, "Task finished");
        }
        Err(e) => {
            warn!(error = %e, "Pipeline task panicked or was aborted");
            summary.lost += 1;
        }
    }
}
