//! Isolated execution of build commands
//!
//! A [`ContainerRuntime`] runs one attempt of a plan against a snapshot and
//! reports the exit status together with stdout and stderr combined in arrival
//! order. Timeouts and cancellation are reported as outcomes, not errors, so
//! the outcome classifier sees every attempt that actually ran.

mod docker;
mod preflight;
mod process;

pub use docker::DockerCliRuntime;
pub use preflight::{check_docker, DockerInfo};
pub use process::{run_command, ProcessOutcome, MAX_OUTPUT_BYTES};

use async_trait::async_trait;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::plan::BuildPlan;
use crate::snapshot::ProjectSnapshot;

/// How an attempt's process ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunExit {
    /// Exited on its own with this status code
    Code(i32),
    /// Killed after exceeding its wall-clock budget
    TimedOut { seconds: u64 },
    /// Terminated by a signal that did not come from the runtime
    Signaled,
}

impl RunExit {
    pub fn is_success(&self) -> bool {
        matches!(self, RunExit::Code(0))
    }
}

#[derive(Debug, Error)]
pub enum RuntimeError {
    #[error("Failed to start '{program}': {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to prepare workspace {path}: {source}")]
    Workspace {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("I/O error while running build: {0}")]
    Io(#[from] std::io::Error),

    #[error("Build was cancelled")]
    Cancelled,
}

/// Per-attempt parameters
#[derive(Debug, Clone)]
pub struct RunContext {
    pub run_id: Uuid,
    pub attempt: u32,
    /// Scratch directory the snapshot is copied into for this attempt
    pub workspace: PathBuf,
    pub timeout: Duration,
    pub cancel: CancellationToken,
}

impl RunContext {
    /// Container name unique to this run and attempt
    pub fn container_name(&self) -> String {
        format!("healbox-{}-a{}", short_id(&self.run_id), self.attempt)
    }

    /// Image tag unique to this run and attempt
    pub fn image_tag(&self) -> String {
        format!("healbox-build-{}:a{}", short_id(&self.run_id), self.attempt)
    }
}

/// First 12 hex digits of a run id
pub fn short_id(run_id: &Uuid) -> String {
    run_id.simple().to_string().chars().take(12).collect()
}

#[derive(Debug, Clone)]
pub struct RunOutput {
    pub exit: RunExit,
    /// stdout and stderr interleaved as they arrived
    pub output: String,
    /// Directory the build ran in; the classifier looks for artifacts here
    pub workspace: PathBuf,
}

#[async_trait]
pub trait ContainerRuntime: Send + Sync {
    async fn run(
        &self,
        plan: &BuildPlan,
        snapshot: &ProjectSnapshot,
        context: &RunContext,
    ) -> Result<RunOutput, RuntimeError>;

    fn name(&self) -> &str;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_names_derive_from_run_id() {
        let ctx = RunContext {
            run_id: Uuid::parse_str("0123456789abcdef0123456789abcdef").unwrap(),
            attempt: 3,
            workspace: PathBuf::from("/tmp/ws"),
            timeout: Duration::from_secs(1),
            cancel: CancellationToken::new(),
        };
        assert_eq!(ctx.container_name(), "healbox-0123456789ab-a3");
        assert_eq!(ctx.image_tag(), "healbox-build-0123456789ab:a3");
    }

    #[test]
    fn test_exit_success() {
        assert!(RunExit::Code(0).is_success());
        assert!(!RunExit::Code(2).is_success());
        assert!(!RunExit::TimedOut { seconds: 1 }.is_success());
    }
}
