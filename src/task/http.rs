//! Build agent task API
//!
//! Tasks are fetched with `GET {base}/api/sys_build_agent_task/task/get`; the
//! task object sits three `data` levels deep in the response envelope and is
//! `null` when the queue is empty. Results go to
//! `POST {base}/api/log_build_agent_task/report`.

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde_json::{json, Value};
use std::time::Duration;
use tracing::{debug, info, warn};

use super::{
    ProjectSource, ReportError, Reporter, Task, TaskMetadata, TaskSource, TaskSourceError,
};
use crate::pipeline::PipelineResult;

const TASK_PATH: &str = "/api/sys_build_agent_task/task/get";
const REPORT_PATH: &str = "/api/log_build_agent_task/report";

#[derive(Debug, Deserialize)]
struct RawTask {
    id: Value,
    #[serde(default)]
    repo_url: Option<String>,
    #[serde(default)]
    token: Option<String>,
    #[serde(default)]
    user_id: Option<Value>,
    #[serde(default)]
    hosting_id: Option<Value>,
}

/// Client for the build agent API, acting as both task source and reporter
#[derive(Debug, Clone)]
pub struct HttpTaskApi {
    base_url: String,
    http_client: Client,
}

impl HttpTaskApi {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self, TaskSourceError> {
        let base_url = base_url.into().trim_end_matches('/').to_string();
        if base_url.is_empty() {
            return Err(TaskSourceError::Configuration(
                "API base URL is empty".to_string(),
            ));
        }
        let http_client = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            base_url,
            http_client,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }
}

/// Extracts the task from the response envelope. `Ok(None)` when the queue
/// is empty or the task has no repository to build.
fn parse_task(body: &Value) -> Result<Option<Task>, TaskSourceError> {
    let data = &body["data"]["data"]["data"];
    if data.is_null() {
        return Ok(None);
    }

    let raw: RawTask = serde_json::from_value(data.clone())
        .map_err(|e| TaskSourceError::InvalidPayload(e.to_string()))?;

    let Some(url) = raw.repo_url.filter(|u| !u.trim().is_empty()) else {
        warn!(task = %raw.id, "Task has no repository URL, skipping");
        return Ok(None);
    };

    let id = match raw.id {
        Value::String(s) => s,
        other => other.to_string(),
    };

    Ok(Some(Task {
        id,
        source: ProjectSource::Git {
            url,
            token: raw.token,
        },
        metadata: TaskMetadata {
            user_id: raw.user_id,
            hosting_id: raw.hosting_id,
        },
    }))
}

/// Report body: the result fields plus the task identifiers
fn report_payload(task: &Task, result: &PipelineResult) -> Result<Value, ReportError> {
    let mut payload = serde_json::to_value(result)?;
    if let Value::Object(map) = &mut payload {
        map.insert("task_id".to_string(), json!(task.id));
        map.insert(
            "user_id".to_string(),
            task.metadata.user_id.clone().unwrap_or(Value::Null),
        );
        map.insert(
            "hosting_id".to_string(),
            task.metadata.hosting_id.clone().unwrap_or(Value::Null),
        );
        map.insert("duration_ms".to_string(), json!(result.duration_ms));
    }
    Ok(payload)
}

#[async_trait]
impl TaskSource for HttpTaskApi {
    async fn next(&self) -> Result<Option<Task>, TaskSourceError> {
        let url = format!("{}{}", self.base_url, TASK_PATH);
        debug!(url = %url, "Polling for task");

        let response = self.http_client.get(&url).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(TaskSourceError::Status {
                status: status.as_u16(),
            });
        }

        let body: Value = response.json().await?;
        let task = parse_task(&body)?;
        if let Some(task) = &task {
            info!(task = %task.id, repo = %task.describe(), "Received task");
        }
        Ok(task)
    }

    fn name(&self) -> &str {
        "http"
    }
}

#[async_trait]
impl Reporter for HttpTaskApi {
    async fn submit(&self, task: &Task, result: &PipelineResult) -> Result<(), ReportError> {
        let url = format!("{}{}", self.base_url, REPORT_PATH);
        let payload = report_payload(task, result)?;

        let response = self.http_client.post(&url).json(&payload).send().await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ReportError::Rejected {
                status: status.as_u16(),
                body,
            });
        }

        info!(task = %task.id, status = %result.status, "Reported result");
        Ok(())
    }
}
