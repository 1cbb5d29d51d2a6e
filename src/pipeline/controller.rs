//! The self-healing control loop
//!
//! ```text
//! ANALYSIS -> BUILD -> DEPLOY -> SUCCESS
//!    ^          |
//!    |          v
//!    +------- DEBUG            (attempt bound hit -> FAILED)
//! ```
//!
//! Every collaborator error is absorbed into a [`Failure`] and fed back into
//! the loop. Only an exhausted attempt bound, a deploy error, or cancellation
//! end a task early, and every task ends in exactly one [`PipelineResult`].

use chrono::{DateTime, Utc};
use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use uuid::Uuid;

use super::config::PipelineConfig;
use super::result::{elapsed_ms, AttemptOutcome, AttemptRecord, PipelineResult, Status};
use super::state::{PipelineState, Step};
use super::workspace::RunWorkspace;
use crate::analyzer::Analyzer;
use crate::classify::{classify_build, classify_failure, Artifact, BuildObservation, BuildVerdict};
use crate::deploy::{Deployer, Deployment};
use crate::error::{excerpt, Failure, FailureKind};
use crate::fixer::{self, Fixer};
use crate::plan::{BuildPlan, ProjectType, DEFAULT_NODE_IMAGE};
use crate::progress::{NoOpHandler, ProgressEvent, ProgressHandler};
use crate::runtime::{ContainerRuntime, RunContext, RunExit, RuntimeError};
use crate::snapshot::SnapshotStore;
use crate::task::{fetch_source, CheckoutError, Task};

const RECORD_EXCERPT_CHARS: usize = 2000;
const DETAIL_EXCERPT_CHARS: usize = 8000;

/// How the loop ended
#[derive(Debug)]
enum Terminal {
    Succeeded {
        artifact: Option<Artifact>,
        deployment: Option<Deployment>,
    },
    Failed {
        step: Step,
        failure: Failure,
        artifact: Option<Artifact>,
    },
    Cancelled {
        step: Step,
    },
}

/// A successful build waiting for deployment
#[derive(Debug)]
struct Built {
    artifact: Option<Artifact>,
    workspace: PathBuf,
}

pub struct PipelineController {
    analyzer: Arc<dyn Analyzer>,
    runtime: Arc<dyn ContainerRuntime>,
    fixer: Arc<dyn Fixer>,
    deployer: Option<Arc<dyn Deployer>>,
    progress: Arc<dyn ProgressHandler>,
    config: PipelineConfig,
}

impl PipelineController {
    pub fn new(
        analyzer: Arc<dyn Analyzer>,
        runtime: Arc<dyn ContainerRuntime>,
        fixer: Arc<dyn Fixer>,
        config: PipelineConfig,
    ) -> Self {
        Self {
            analyzer,
            runtime,
            fixer,
            deployer: None,
            progress: Arc::new(NoOpHandler),
            config,
        }
    }

    pub fn with_deployer(mut self, deployer: Arc<dyn Deployer>) -> Self {
        self.deployer = Some(deployer);
        self
    }

    pub fn with_progress(mut self, progress: Arc<dyn ProgressHandler>) -> Self {
        self.progress = progress;
        self
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Runs one task from checkout to terminal result.
    pub async fn execute(&self, task: &Task, cancel: &CancellationToken) -> PipelineResult {
        let run_id = Uuid::new_v4();
        let started_at = Utc::now();

        self.progress.on_progress(&ProgressEvent::Started {
            task_id: task.id.clone(),
            run_id: run_id.to_string(),
        });

        let run = match RunWorkspace::create(&self.config.work_dir, run_id) {
            Ok(run) => run,
            Err(e) => {
                let detail = format!(
                    "failed to create run directory under {}: {}",
                    self.config.work_dir.display(),
                    e
                );
                return self.not_started(task, run_id, started_at, Some(detail.as_str()), detail.clone());
            }
        };

        let source = match fetch_source(
            task,
            &run.source_dir(),
            self.config.checkout_timeout,
            cancel,
        )
        .await
        {
            Ok(source) => source,
            Err(CheckoutError::Cancelled) => {
                return self.not_started(task, run_id, started_at, None, "cancelled during checkout")
            }
            Err(e) => {
                let detail = e.to_string();
                return self.not_started(task, run_id, started_at, Some(detail.as_str()), detail.clone());
            }
        };

        self.run(&task.id, &source, &run, started_at, cancel).await
    }

    /// Runs the loop over an already available project directory.
    pub async fn run(
        &self,
        task_id: &str,
        source: &Path,
        run: &RunWorkspace,
        started_at: DateTime<Utc>,
        cancel: &CancellationToken,
    ) -> PipelineResult {
        let store = match SnapshotStore::new(run.snapshots_dir()) {
            Ok(store) => store,
            Err(e) => {
                let detail = e.to_string();
                return self.finish_not_started(task_id, run, started_at, &detail);
            }
        };
        let initial = match store.import(source) {
            Ok(snapshot) => snapshot,
            Err(e) => {
                let detail = e.to_string();
                return self.finish_not_started(task_id, run, started_at, &detail);
            }
        };

        let mut state = PipelineState::new(initial);
        let terminal = self.drive(&mut state, &store, run, cancel).await;
        let result = self.finish(task_id, run, started_at, state, terminal);

        if !self.config.keep_snapshots {
            let preserve = result
                .deployment
                .as_ref()
                .and(result.attempt_records.last())
                .map(|record| run.attempt_dir(record.index));
            run.cleanup(preserve.as_deref());
        }

        result
    }

    async fn drive(
        &self,
        state: &mut PipelineState,
        store: &SnapshotStore,
        run: &RunWorkspace,
        cancel: &CancellationToken,
    ) -> Terminal {
        let max_attempts = self.config.max_attempts;
        let mut step = Step::Analysis;
        let mut built: Option<Built> = None;

        loop {
            if cancel.is_cancelled() {
                state.log(step, "cancelled");
                return Terminal::Cancelled { step };
            }

            self.progress.on_progress(&ProgressEvent::StepEntered {
                step,
                attempt: state.attempt,
                elapsed: state.elapsed(),
            });

            match step {
                Step::Analysis => {
                    let analyzed = self
                        .bounded("analysis", self.analyzer.analyze(&state.current), cancel)
                        .await;
                    match analyzed {
                        None => {
                            state.log(step, "cancelled");
                            return Terminal::Cancelled { step };
                        }
                        Some(Ok(mut plan)) => {
                            plan.source_snapshot = state.current.id;
                            state.log(
                                step,
                                format!(
                                    "{} plan for {}: {}",
                                    plan.project_type,
                                    state.current.id,
                                    plan.command_line()
                                ),
                            );
                            self.progress.on_progress(&ProgressEvent::PlanReady {
                                attempt: state.attempt,
                                project_type: plan.project_type.to_string(),
                                command: plan.command_line(),
                            });
                            state.plan = Some(plan);
                            step = Step::Build;
                        }
                        Some(Err(message)) => {
                            self.progress.on_progress(&ProgressEvent::AnalysisFailed {
                                attempt: state.attempt,
                                error: message.clone(),
                            });
                            let failure = Failure::new(FailureKind::Analysis, message);

                            if state.plan.is_some() {
                                state.log(step, format!("{}; keeping previous plan", failure.excerpt(200)));
                                step = Step::Build;
                            } else if state.attempt >= max_attempts {
                                state.log(step, format!("{}; attempts exhausted", failure.excerpt(200)));
                                return Terminal::Failed {
                                    step,
                                    failure,
                                    artifact: None,
                                };
                            } else {
                                state.log(step, format!("{}; no plan to fall back on", failure.excerpt(200)));
                                state.last_failure = Some(failure);
                                step = Step::Debug;
                            }
                        }
                    }
                }

                Step::Build => {
                    let Some(plan) = state.plan.as_mut() else {
                        step = Step::Analysis;
                        continue;
                    };
                    plan.normalize(
                        &state.current.root,
                        state.last_failure.as_ref().map(|f| f.message.as_str()),
                    );
                    plan.source_snapshot = state.current.id;
                    let plan = plan.clone();

                    let started = Instant::now();
                    let (verdict, output, workspace) = match self.build(&plan, state, run, cancel).await {
                        Some(observed) => observed,
                        None => {
                            state.log(step, "cancelled");
                            return Terminal::Cancelled { step };
                        }
                    };
                    let duration = started.elapsed();

                    let outcome = match &verdict {
                        BuildVerdict::Success { .. } => AttemptOutcome::Success,
                        BuildVerdict::Failure(f) if f.is_timeout() => AttemptOutcome::Timeout,
                        BuildVerdict::Failure(_) => AttemptOutcome::Failure,
                    };
                    state.records.push(AttemptRecord {
                        index: state.attempt,
                        snapshot_ref: state.current.id,
                        raw_output_excerpt: excerpt(&output, RECORD_EXCERPT_CHARS),
                        outcome,
                        duration_ms: duration.as_millis() as u64,
                    });
                    self.progress.on_progress(&ProgressEvent::BuildFinished {
                        attempt: state.attempt,
                        success: verdict.is_success(),
                        duration,
                    });

                    match verdict {
                        BuildVerdict::Success { artifact } => {
                            let note = match &artifact {
                                Some(a) if a.via_fallback => {
                                    format!("succeeded, artifact collected from fallback '{}'", a.collected_from)
                                }
                                Some(a) => format!("succeeded, artifact collected from '{}'", a.collected_from),
                                None => "succeeded without artifact".to_string(),
                            };
                            state.log(step, note);
                            built = Some(Built {
                                artifact,
                                workspace: workspace.unwrap_or_else(|| state.current.root.clone()),
                            });
                            step = Step::Deploy;
                        }
                        BuildVerdict::Failure(failure) => {
                            if state.attempt >= max_attempts {
                                state.log(step, format!("{} failure; attempts exhausted", failure.kind.as_str()));
                                return Terminal::Failed {
                                    step,
                                    failure,
                                    artifact: None,
                                };
                            }
                            state.log(step, format!("{} failure", failure.kind.as_str()));
                            state.last_failure = Some(failure);
                            step = Step::Debug;
                        }
                    }
                }

                Step::Debug => {
                    let failure = state
                        .last_failure
                        .clone()
                        .unwrap_or_else(|| Failure::build("build failed without a report"));
                    let plan = state.plan.clone().unwrap_or_else(|| self.placeholder_plan(state));

                    let fixed = self
                        .bounded(
                            "repair",
                            fixer::fix(store, self.fixer.as_ref(), &state.current, &failure, &plan),
                            cancel,
                        )
                        .await;

                    match fixed {
                        None => {
                            state.log(step, "cancelled");
                            return Terminal::Cancelled { step };
                        }
                        Some(Ok(outcome)) => {
                            self.progress.on_progress(&ProgressEvent::RepairApplied {
                                attempt: state.attempt,
                                from: state.current.id,
                                to: outcome.snapshot.id,
                                patches: outcome.applied,
                            });
                            state.log(
                                step,
                                format!(
                                    "{} -> {} with {} change(s): {}",
                                    state.current.id,
                                    outcome.snapshot.id,
                                    outcome.applied,
                                    outcome.rationale
                                ),
                            );
                            state.advance(Some(outcome.snapshot));
                            step = Step::Analysis;
                        }
                        Some(Err(message)) => {
                            self.progress.on_progress(&ProgressEvent::RepairFailed {
                                attempt: state.attempt,
                                error: message.clone(),
                            });
                            state.log(step, format!("repair failed: {}", excerpt(&message, 200)));
                            state.advance(None);
                            step = if state.plan.is_some() {
                                Step::Build
                            } else {
                                Step::Analysis
                            };
                        }
                    }
                }

                Step::Deploy => {
                    let Some(built) = built.take() else {
                        step = Step::Build;
                        continue;
                    };
                    let Some(deployer) = &self.deployer else {
                        state.log(Step::Build, "deployment disabled");
                        return Terminal::Succeeded {
                            artifact: built.artifact,
                            deployment: None,
                        };
                    };
                    let plan = match &state.plan {
                        Some(plan) => plan.clone(),
                        None => self.placeholder_plan(state),
                    };
                    let target = deploy_source(&built, &plan);

                    let deployed = tokio::select! {
                        _ = cancel.cancelled() => {
                            state.log(step, "cancelled");
                            return Terminal::Cancelled { step };
                        }
                        deployed = deployer.deploy(&target, &plan, run.run_id()) => deployed,
                    };

                    match deployed {
                        Ok(deployment) => {
                            state.log(step, format!("serving at {}", deployment.url));
                            self.progress.on_progress(&ProgressEvent::Deployed {
                                url: deployment.url.clone(),
                            });
                            return Terminal::Succeeded {
                                artifact: built.artifact,
                                deployment: Some(deployment),
                            };
                        }
                        Err(e) => {
                            state.log(step, format!("deploy failed: {}", e));
                            // The build itself succeeded; keep the artifact reachable.
                            if let Some(artifact) = &built.artifact {
                                info!(artifact = %artifact.path.display(), "Build artifact kept");
                            }
                            return Terminal::Failed {
                                step,
                                failure: Failure::new(FailureKind::Deploy, e.to_string()),
                                artifact: built.artifact,
                            };
                        }
                    }
                }
            }
        }
    }

    /// Runs one BUILD and classifies it. `None` when cancelled.
    async fn build(
        &self,
        plan: &BuildPlan,
        state: &PipelineState,
        run: &RunWorkspace,
        cancel: &CancellationToken,
    ) -> Option<(BuildVerdict, String, Option<PathBuf>)> {
        let context = RunContext {
            run_id: run.run_id(),
            attempt: state.attempt,
            workspace: run.attempt_workspace(state.attempt),
            timeout: self.config.build_timeout,
            cancel: cancel.clone(),
        };

        match self.runtime.run(plan, &state.current, &context).await {
            Ok(output) => {
                let exit = output.exit;
                let project_dir = output.workspace.join(&plan.working_dir);
                let canonical = run.artifact_dir();
                let observed_plan = plan.clone();
                // Artifact collection copies whole trees.
                let classified = tokio::task::spawn_blocking(move || {
                    let verdict = classify_build(&BuildObservation {
                        exit: &exit,
                        output: &output.output,
                        plan: &observed_plan,
                        project_dir: &project_dir,
                        canonical_output: &canonical,
                    });
                    (verdict, output.output, output.workspace)
                })
                .await;
                let (verdict, text, workspace) = match classified {
                    Ok(classified) => classified,
                    Err(e) => {
                        let message = format!("build classification failed: {}", e);
                        warn!(attempt = state.attempt, error = %message, "Classifier task failed");
                        return Some((
                            BuildVerdict::Failure(Failure::new(FailureKind::Runtime, message.clone())),
                            message,
                            None,
                        ));
                    }
                };
                if let (RunExit::TimedOut { seconds }, false) = (exit, verdict.is_success()) {
                    warn!(attempt = state.attempt, seconds, "Build timed out");
                }
                Some((verdict, text, Some(workspace)))
            }
            Err(RuntimeError::Cancelled) => None,
            Err(e) => {
                let message = e.to_string();
                warn!(attempt = state.attempt, error = %message, "Container runtime failed");
                Some((
                    BuildVerdict::Failure(Failure::new(FailureKind::Runtime, message.clone())),
                    message,
                    None,
                ))
            }
        }
    }

    /// Awaits a collaborator call under the collaborator timeout. `None` when
    /// cancelled; errors and timeouts come back as text.
    async fn bounded<T, E, F>(
        &self,
        what: &str,
        call: F,
        cancel: &CancellationToken,
    ) -> Option<Result<T, String>>
    where
        E: std::fmt::Display,
        F: Future<Output = Result<T, E>>,
    {
        let timeout = self.config.effective_collaborator_timeout();
        tokio::select! {
            _ = cancel.cancelled() => None,
            result = tokio::time::timeout(timeout, call) => Some(match result {
                Ok(Ok(value)) => Ok(value),
                Ok(Err(e)) => Err(e.to_string()),
                Err(_) => Err(format!("{} timed out after {}s", what, timeout.as_secs())),
            }),
        }
    }

    /// Stand-in handed to the fixer when analysis never produced a plan.
    fn placeholder_plan(&self, state: &PipelineState) -> BuildPlan {
        BuildPlan {
            project_type: ProjectType::static_site(),
            container_image: DEFAULT_NODE_IMAGE.to_string(),
            install_command: String::new(),
            build_command: String::new(),
            declared_artifact_dir: String::new(),
            expects_artifact: false,
            container_definition: String::new(),
            needs_install: false,
            needs_build: false,
            working_dir: String::new(),
            start_command: None,
            source_snapshot: state.current.id,
        }
    }

    fn finish(
        &self,
        task_id: &str,
        run: &RunWorkspace,
        started_at: DateTime<Utc>,
        mut state: PipelineState,
        terminal: Terminal,
    ) -> PipelineResult {
        let (status, step, classification, artifact_path, deployment, error_detail) = match terminal {
            Terminal::Succeeded {
                artifact,
                deployment,
            } => {
                let step = if deployment.is_some() {
                    Step::Deploy
                } else {
                    Step::Build
                };
                state.log(step, "SUCCESS");
                (
                    Status::Success,
                    step,
                    None,
                    artifact.map(|a| a.path),
                    deployment,
                    None,
                )
            }
            Terminal::Failed {
                step,
                failure,
                artifact,
            } => {
                let class = classify_failure(&failure.message);
                state.log(step, format!("FAILED ({})", class));
                (
                    Status::Failed,
                    step,
                    Some(class),
                    artifact.map(|a| a.path),
                    None,
                    Some(failure.excerpt(DETAIL_EXCERPT_CHARS)),
                )
            }
            Terminal::Cancelled { step } => {
                state.log(step, "FAILED (pipeline cancelled)");
                (
                    Status::Failed,
                    step,
                    None,
                    None,
                    None,
                    Some("pipeline was cancelled".to_string()),
                )
            }
        };

        self.progress.on_progress(&ProgressEvent::Completed {
            status,
            attempts: state.attempt,
            total_time: state.elapsed(),
        });

        let finished_at = Utc::now();
        PipelineResult {
            task_id: task_id.to_string(),
            run_id: run.run_id(),
            status,
            step,
            attempts: state.attempt,
            classification,
            artifact_path,
            deployment,
            summary: state.summary(),
            error_detail,
            attempt_records: std::mem::take(&mut state.records),
            started_at,
            finished_at,
            duration_ms: elapsed_ms(started_at, finished_at),
        }
    }

    fn not_started(
        &self,
        task: &Task,
        run_id: Uuid,
        started_at: DateTime<Utc>,
        classify: Option<&str>,
        detail: impl Into<String>,
    ) -> PipelineResult {
        let detail = detail.into();
        warn!(task = %task.id, error = %detail, "Task failed before the pipeline started");
        let result = PipelineResult::not_started(
            task.id.clone(),
            run_id,
            started_at,
            classify.map(classify_failure),
            detail,
        );
        self.progress.on_progress(&ProgressEvent::Completed {
            status: Status::Failed,
            attempts: result.attempts,
            total_time: std::time::Duration::from_millis(result.duration_ms),
        });
        result
    }

    fn finish_not_started(
        &self,
        task_id: &str,
        run: &RunWorkspace,
        started_at: DateTime<Utc>,
        detail: &str,
    ) -> PipelineResult {
        warn!(task = %task_id, error = %detail, "Could not import project");
        let result = PipelineResult::not_started(
            task_id,
            run.run_id(),
            started_at,
            Some(classify_failure(detail)),
            detail,
        );
        self.progress.on_progress(&ProgressEvent::Completed {
            status: Status::Failed,
            attempts: result.attempts,
            total_time: std::time::Duration::from_millis(result.duration_ms),
        });
        result
    }
}

/// What the deployer serves: the collected artifact when there is one,
/// otherwise the built tree.
fn deploy_source(built: &Built, plan: &BuildPlan) -> PathBuf {
    match &built.artifact {
        Some(artifact) => artifact.path.clone(),
        None if plan.project_type.serves_static_files() => built.workspace.join(&plan.working_dir),
        None => built.workspace.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plan::ProjectKind;
    use crate::snapshot::SnapshotId;

    fn plan(kind: ProjectKind) -> BuildPlan {
        BuildPlan {
            project_type: ProjectType::new(kind, None),
            container_image: "node:20-alpine".to_string(),
            install_command: "npm install".to_string(),
            build_command: String::new(),
            declared_artifact_dir: String::new(),
            expects_artifact: false,
            container_definition: String::new(),
            needs_install: true,
            needs_build: false,
            working_dir: "web".to_string(),
            start_command: None,
            source_snapshot: SnapshotId(0),
        }
    }

    #[test]
    fn test_deploy_source_prefers_artifact() {
        let built = Built {
            artifact: Some(Artifact {
                path: PathBuf::from("/run/artifact"),
                collected_from: "dist".to_string(),
                via_fallback: false,
            }),
            workspace: PathBuf::from("/run/attempt-1/workspace"),
        };
        assert_eq!(
            deploy_source(&built, &plan(ProjectKind::Frontend)),
            PathBuf::from("/run/artifact")
        );
    }

    #[test]
    fn test_deploy_source_without_artifact() {
        let built = Built {
            artifact: None,
            workspace: PathBuf::from("/ws"),
        };
        assert_eq!(
            deploy_source(&built, &plan(ProjectKind::Static)),
            PathBuf::from("/ws/web")
        );
        assert_eq!(
            deploy_source(&built, &plan(ProjectKind::Backend)),
            PathBuf::from("/ws")
        );
    }
}
