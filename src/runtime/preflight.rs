use anyhow::{Context, Result};
use bollard::Docker;
use serde::Serialize;
use tracing::debug;

/// What the local Docker daemon reported about itself
#[derive(Debug, Clone, Serialize)]
pub struct DockerInfo {
    pub version: String,
    pub api_version: String,
    pub os: String,
    pub arch: String,
}

/// Connects to the local daemon and pings it. An unreachable daemon is an
/// error: nothing can be built without it.
pub async fn check_docker() -> Result<DockerInfo> {
    let docker =
        Docker::connect_with_local_defaults().context("Failed to connect to Docker daemon")?;

    docker
        .ping()
        .await
        .context("Docker daemon did not answer ping")?;

    let version = docker
        .version()
        .await
        .context("Failed to query Docker version")?;

    let info = DockerInfo {
        version: version.version.unwrap_or_else(|| "unknown".to_string()),
        api_version: version.api_version.unwrap_or_else(|| "0.0".to_string()),
        os: version.os.unwrap_or_default(),
        arch: version.arch.unwrap_or_default(),
    };
    debug!(version = %info.version, api = %info.api_version, "Docker daemon reachable");
    Ok(info)
}
