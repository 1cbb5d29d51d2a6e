//! Work items and where they come from
//!
//! A [`TaskSource`] hands out [`Task`]s; a [`Reporter`] receives exactly one
//! [`PipelineResult`] per task. The HTTP pair talks to the build agent API,
//! the local pair backs the command line.

mod git;
mod http;
mod local;

pub use git::{authenticated_url, fetch_source, redact, CheckoutError};
pub use http::HttpTaskApi;
pub use local::{DirReporter, LocalTaskSource, StdoutReporter};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use thiserror::Error;

use crate::pipeline::PipelineResult;

/// Where a task's project comes from
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ProjectSource {
    Git {
        url: String,
        #[serde(default, skip_serializing)]
        token: Option<String>,
    },
    Local { path: PathBuf },
}

/// Caller-supplied fields echoed back in the report
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskMetadata {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_id: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hosting_id: Option<serde_json::Value>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Task {
    pub id: String,
    pub source: ProjectSource,
    #[serde(default)]
    pub metadata: TaskMetadata,
}

impl Task {
    pub fn local(id: impl Into<String>, path: impl Into<PathBuf>) -> Self {
        Self {
            id: id.into(),
            source: ProjectSource::Local { path: path.into() },
            metadata: TaskMetadata::default(),
        }
    }

    /// Short label for logs; never includes credentials
    pub fn describe(&self) -> String {
        match &self.source {
            ProjectSource::Git { url, .. } => redact(url),
            ProjectSource::Local { path } => path.display().to_string(),
        }
    }
}

#[derive(Debug, Error)]
pub enum TaskSourceError {
    #[error("Task API request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("Task API returned HTTP {status}")]
    Status { status: u16 },

    #[error("Malformed task payload: {0}")]
    InvalidPayload(String),

    #[error("Task source misconfigured: {0}")]
    Configuration(String),
}

#[derive(Debug, Error)]
pub enum ReportError {
    #[error("Report request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("Report rejected with HTTP {status}: {body}")]
    Rejected { status: u16, body: String },

    #[error("Failed to serialize report: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("Failed to write report: {0}")]
    Io(#[from] std::io::Error),
}

#[async_trait]
pub trait TaskSource: Send + Sync {
    /// Next task, or `None` when nothing is waiting right now
    async fn next(&self) -> Result<Option<Task>, TaskSourceError>;

    fn name(&self) -> &str;
}

#[async_trait]
pub trait Reporter: Send + Sync {
    async fn submit(&self, task: &Task, result: &PipelineResult) -> Result<(), ReportError>;
}
