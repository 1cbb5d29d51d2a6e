//! Deployment of successful builds

mod docker;

pub use docker::{DockerDeployer, DEFAULT_CONTAINER_NAME};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;
use uuid::Uuid;

use crate::plan::BuildPlan;

#[derive(Debug, Error)]
pub enum DeployError {
    #[error("Nothing to deploy at {0}")]
    SourceMissing(PathBuf),

    #[error("Backend plan has no start command")]
    MissingStartCommand,

    #[error("Failed to run '{command}': {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },

    #[error("'{command}' failed: {stderr}")]
    Command { command: String, stderr: String },

    #[error("'{command}' timed out after {seconds}s")]
    Timeout { command: String, seconds: u64 },
}

/// A running service
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Deployment {
    pub url: String,
    pub container: String,
    pub image: String,
}

#[async_trait]
pub trait Deployer: Send + Sync {
    /// Starts a service from `source`: the collected artifact for builds
    /// that produce one, otherwise the built project tree.
    async fn deploy(
        &self,
        source: &Path,
        plan: &BuildPlan,
        run_id: Uuid,
    ) -> Result<Deployment, DeployError>;

    fn name(&self) -> &str;
}
