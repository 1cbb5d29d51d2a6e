//! Snapshot analysis: turns a project tree into a [`BuildPlan`]

mod context;
mod heuristic;
mod llm;

pub use context::{find_project_root, BuildTool, LockFile, ProjectContext};
pub use heuristic::{heuristic_plan, HeuristicAnalyzer};
pub use llm::LlmAnalyzer;

use async_trait::async_trait;
use std::path::PathBuf;
use thiserror::Error;

use crate::plan::BuildPlan;
use crate::snapshot::ProjectSnapshot;

#[derive(Debug, Error)]
pub enum AnalysisError {
    #[error("Snapshot directory does not exist: {0}")]
    SnapshotMissing(PathBuf),

    #[error("Failed to scan project: {0}")]
    Scan(String),

    #[error("Invalid package manifest {path}: {message}")]
    InvalidManifest { path: PathBuf, message: String },

    #[error("Analyzer produced an unusable plan: {0}")]
    InvalidPlan(String),
}

/// Produces a build plan for a snapshot.
///
/// Failures are advisory: the pipeline keeps its previous plan when one
/// exists.
#[async_trait]
pub trait Analyzer: Send + Sync {
    async fn analyze(&self, snapshot: &ProjectSnapshot) -> Result<BuildPlan, AnalysisError>;

    fn name(&self) -> &str;
}
