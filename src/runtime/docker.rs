use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use tokio::process::Command;
use tracing::{debug, info, warn};

use super::process::run_command;
use super::{ContainerRuntime, RunContext, RunExit, RunOutput, RuntimeError};
use crate::plan::BuildPlan;
use crate::snapshot::{copy_tree, ProjectSnapshot};

const DEFINITION_FILE: &str = "Containerfile.healbox";
const MOUNT_POINT: &str = "/app";
const CLEANUP_TIMEOUT: Duration = Duration::from_secs(30);

/// Runs attempts through the `docker` command line.
///
/// Per attempt the snapshot is copied into a scratch workspace, an image is
/// built from the plan's container definition, and the install and build
/// commands run in a named container with the workspace mounted at `/app`.
#[derive(Debug, Clone)]
pub struct DockerCliRuntime {
    docker: String,
}

impl Default for DockerCliRuntime {
    fn default() -> Self {
        Self::new("docker")
    }
}

impl DockerCliRuntime {
    pub fn new(docker: impl Into<String>) -> Self {
        Self {
            docker: docker.into(),
        }
    }

    fn command(&self) -> Command {
        Command::new(&self.docker)
    }

    async fn prepare_workspace(
        snapshot: &ProjectSnapshot,
        workspace: &Path,
    ) -> Result<(), RuntimeError> {
        let source = snapshot.root.clone();
        let target = workspace.to_path_buf();
        tokio::task::spawn_blocking(move || {
            if target.exists() {
                std::fs::remove_dir_all(&target)?;
            }
            copy_tree(&source, &target, &[]).map(|_| ())
        })
        .await
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e))?
        .map_err(|source| RuntimeError::Workspace {
            path: workspace.to_path_buf(),
            source,
        })
    }

    fn definition_path(workspace: &Path) -> PathBuf {
        workspace
            .parent()
            .unwrap_or(workspace)
            .join(DEFINITION_FILE)
    }

    /// Best-effort removal of a container left behind by a killed attempt.
    async fn force_remove(&self, container: &str) {
        let mut cmd = self.command();
        cmd.args(["rm", "-f", container]);
        match tokio::time::timeout(CLEANUP_TIMEOUT, cmd.output()).await {
            Ok(Ok(out)) if out.status.success() => {
                info!(container, "Force-removed build container")
            }
            Ok(Ok(out)) => debug!(
                container,
                stderr = %String::from_utf8_lossy(&out.stderr).trim(),
                "docker rm -f reported an error"
            ),
            Ok(Err(e)) => warn!(container, error = %e, "Failed to run docker rm -f"),
            Err(_) => warn!(container, "docker rm -f timed out"),
        }
    }

    async fn remove_image(&self, tag: &str) {
        let mut cmd = self.command();
        cmd.args(["rmi", "-f", tag]);
        if let Ok(Ok(out)) = tokio::time::timeout(CLEANUP_TIMEOUT, cmd.output()).await {
            if !out.status.success() {
                debug!(tag, "Could not remove build image");
            }
        }
    }
}

#[async_trait]
impl ContainerRuntime for DockerCliRuntime {
    async fn run(
        &self,
        plan: &BuildPlan,
        snapshot: &ProjectSnapshot,
        context: &RunContext,
    ) -> Result<RunOutput, RuntimeError> {
        let started = Instant::now();
        let workspace = context.workspace.clone();
        Self::prepare_workspace(snapshot, &workspace).await?;

        let definition = Self::definition_path(&workspace);
        tokio::fs::write(&definition, &plan.container_definition)
            .await
            .map_err(|source| RuntimeError::Workspace {
                path: definition.clone(),
                source,
            })?;

        let tag = context.image_tag();
        let container = context.container_name();

        let mut build = self.command();
        build
            .arg("build")
            .arg("-t")
            .arg(&tag)
            .arg("-f")
            .arg(&definition)
            .arg(&workspace);

        debug!(tag = %tag, "Building container image");
        let image = run_command(build, context.timeout, &context.cancel).await?;
        match image.exit {
            RunExit::Code(0) => {}
            exit => {
                warn!(tag = %tag, ?exit, "Container image build failed");
                return Ok(RunOutput {
                    exit,
                    output: format!("container image build failed\n{}", image.output),
                    workspace,
                });
            }
        }

        let remaining = context.timeout.saturating_sub(started.elapsed());
        let workdir = if plan.working_dir.is_empty() {
            MOUNT_POINT.to_string()
        } else {
            format!("{}/{}", MOUNT_POINT, plan.working_dir)
        };

        let mut run = self.command();
        run.arg("run")
            .arg("--rm")
            .arg("--name")
            .arg(&container)
            .arg("-v")
            .arg(format!("{}:{}", workspace.display(), MOUNT_POINT))
            .arg("-w")
            .arg(&workdir)
            .arg(&tag)
            .arg("sh")
            .arg("-c")
            .arg(plan.command_line());

        info!(
            container = %container,
            command = %plan.command_line(),
            budget_secs = remaining.as_secs(),
            "Running build"
        );

        let result = run_command(run, remaining, &context.cancel).await;

        let killed = matches!(
            result,
            Err(RuntimeError::Cancelled)
                | Ok(super::ProcessOutcome {
                    exit: RunExit::TimedOut { .. },
                    ..
                })
        );
        if killed {
            self.force_remove(&container).await;
        }
        self.remove_image(&tag).await;

        let outcome = result?;
        let exit = match outcome.exit {
            RunExit::TimedOut { .. } => RunExit::TimedOut {
                seconds: context.timeout.as_secs(),
            },
            other => other,
        };

        Ok(RunOutput {
            exit,
            output: outcome.output,
            workspace,
        })
    }

    fn name(&self) -> &str {
        "docker"
    }
}
