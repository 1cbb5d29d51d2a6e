use async_trait::async_trait;
use std::path::Path;
use std::time::Duration;
use tokio::process::Command;
use tracing::{debug, info};
use uuid::Uuid;

use super::{DeployError, Deployer, Deployment};
use crate::plan::{BuildPlan, STATIC_IMAGE};

pub const DEFAULT_CONTAINER_NAME: &str = "healbox-web";

const BACKEND_PORT: u16 = 3000;
const COMMAND_TIMEOUT: Duration = Duration::from_secs(120);

/// Publishes builds as long-running Docker containers.
///
/// Static and frontend builds are served by nginx with the artifact mounted
/// read-only; backends run their start command in the plan's image. A previous
/// container of the same name is replaced.
#[derive(Debug, Clone)]
pub struct DockerDeployer {
    docker: String,
    host_port: u16,
    container_name: String,
}

impl DockerDeployer {
    pub fn new(host_port: u16) -> Self {
        Self {
            docker: "docker".to_string(),
            host_port,
            container_name: DEFAULT_CONTAINER_NAME.to_string(),
        }
    }

    pub fn with_container_name(mut self, name: impl Into<String>) -> Self {
        self.container_name = name.into();
        self
    }

    /// Arguments for `docker run`, without the program name
    fn run_args(&self, source: &Path, plan: &BuildPlan, run_id: Uuid) -> Result<(String, Vec<String>), DeployError> {
        let mut args = vec![
            "run".to_string(),
            "-d".to_string(),
            "--name".to_string(),
            self.container_name.clone(),
            "--label".to_string(),
            format!("healbox.run-id={}", run_id),
        ];

        if plan.project_type.serves_static_files() {
            args.extend([
                "-p".to_string(),
                format!("{}:80", self.host_port),
                "-v".to_string(),
                format!("{}:/usr/share/nginx/html:ro", source.display()),
                STATIC_IMAGE.to_string(),
            ]);
            return Ok((STATIC_IMAGE.to_string(), args));
        }

        let start = plan
            .start_command
            .as_deref()
            .filter(|s| !s.trim().is_empty())
            .ok_or(DeployError::MissingStartCommand)?;
        let workdir = if plan.working_dir.is_empty() {
            "/app".to_string()
        } else {
            format!("/app/{}", plan.working_dir)
        };

        args.extend([
            "-p".to_string(),
            format!("{}:{}", self.host_port, BACKEND_PORT),
            "-e".to_string(),
            format!("PORT={}", BACKEND_PORT),
            "-v".to_string(),
            format!("{}:/app", source.display()),
            "-w".to_string(),
            workdir,
            plan.container_image.clone(),
            "sh".to_string(),
            "-c".to_string(),
            start.to_string(),
        ]);
        Ok((plan.container_image.clone(), args))
    }

    async fn docker(&self, args: &[String]) -> Result<String, DeployError> {
        let rendered = format!("{} {}", self.docker, args.join(" "));
        let mut cmd = Command::new(&self.docker);
        cmd.args(args).kill_on_drop(true);

        let output = tokio::time::timeout(COMMAND_TIMEOUT, cmd.output())
            .await
            .map_err(|_| DeployError::Timeout {
                command: rendered.clone(),
                seconds: COMMAND_TIMEOUT.as_secs(),
            })?
            .map_err(|source| DeployError::Spawn {
                command: rendered.clone(),
                source,
            })?;

        if !output.status.success() {
            return Err(DeployError::Command {
                command: rendered,
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }
        Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
    }
}

#[async_trait]
impl Deployer for DockerDeployer {
    async fn deploy(
        &self,
        source: &Path,
        plan: &BuildPlan,
        run_id: Uuid,
    ) -> Result<Deployment, DeployError> {
        if !source.is_dir() {
            return Err(DeployError::SourceMissing(source.to_path_buf()));
        }

        let (image, args) = self.run_args(source, plan, run_id)?;

        // A missing previous container is fine.
        if let Err(e) = self
            .docker(&["rm".to_string(), "-f".to_string(), self.container_name.clone()])
            .await
        {
            debug!(error = %e, "No previous container removed");
        }

        let id = self.docker(&args).await?;
        let deployment = Deployment {
            url: format!("http://localhost:{}", self.host_port),
            container: self.container_name.clone(),
            image,
        };
        info!(
            container = %deployment.container,
            id = %id.chars().take(12).collect::<String>(),
            url = %deployment.url,
            project_type = %plan.project_type,
            "Deployed"
        );
        Ok(deployment)
    }

    fn name(&self) -> &str {
        "docker"
    }
}
