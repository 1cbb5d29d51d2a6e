use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use uuid::Uuid;

use super::state::Step;
use crate::classify::ErrorClass;
use crate::deploy::Deployment;
use crate::snapshot::SnapshotId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Status {
    Success,
    Failed,
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Status::Success => f.write_str("SUCCESS"),
            Status::Failed => f.write_str("FAILED"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AttemptOutcome {
    Success,
    Failure,
    Timeout,
}

/// One BUILD execution
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AttemptRecord {
    pub index: u32,
    pub snapshot_ref: SnapshotId,
    pub raw_output_excerpt: String,
    pub outcome: AttemptOutcome,
    pub duration_ms: u64,
}

/// Terminal result of one task
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PipelineResult {
    pub task_id: String,
    pub run_id: Uuid,
    pub status: Status,
    pub step: Step,
    pub attempts: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub classification: Option<ErrorClass>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub artifact_path: Option<PathBuf>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub deployment: Option<Deployment>,
    pub summary: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_detail: Option<String>,
    #[serde(default)]
    pub attempt_records: Vec<AttemptRecord>,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub duration_ms: u64,
}

impl PipelineResult {
    pub fn is_success(&self) -> bool {
        self.status == Status::Success
    }

    /// Result for a task that failed before the loop started.
    pub fn not_started(
        task_id: impl Into<String>,
        run_id: Uuid,
        started_at: DateTime<Utc>,
        classification: Option<ErrorClass>,
        detail: impl Into<String>,
    ) -> Self {
        let detail = detail.into();
        let finished_at = Utc::now();
        Self {
            task_id: task_id.into(),
            run_id,
            status: Status::Failed,
            step: Step::Analysis,
            attempts: 1,
            classification,
            artifact_path: None,
            deployment: None,
            summary: format!("pipeline did not start: {}", first_line(&detail)),
            error_detail: Some(detail),
            attempt_records: Vec::new(),
            started_at,
            finished_at,
            duration_ms: elapsed_ms(started_at, finished_at),
        }
    }
}

pub(crate) fn elapsed_ms(from: DateTime<Utc>, to: DateTime<Utc>) -> u64 {
    (to - from).num_milliseconds().max(0) as u64
}

fn first_line(text: &str) -> &str {
    text.lines().next().unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::Value;

    #[test]
    fn test_wire_shape() {
        let result = PipelineResult::not_started(
            "t-1",
            Uuid::nil(),
            Utc::now(),
            Some(ErrorClass::ServiceError),
            "git clone failed\nfatal: unable to access",
        );
        let json: Value = serde_json::to_value(&result).unwrap();

        assert_eq!(json["status"], "FAILED");
        assert_eq!(json["step"], "ANALYSIS");
        assert_eq!(json["attempts"], 1);
        assert_eq!(json["classification"], "SERVICE_ERROR");
        assert_eq!(json["summary"], "pipeline did not start: git clone failed");
        assert!(json.get("artifactPath").is_none());
        assert!(json["errorDetail"].as_str().unwrap().contains("fatal"));
        assert!(json.get("taskId").is_some());
    }

    #[test]
    fn test_attempt_record_shape() {
        let record = AttemptRecord {
            index: 2,
            snapshot_ref: SnapshotId(1),
            raw_output_excerpt: "ok".to_string(),
            outcome: AttemptOutcome::Timeout,
            duration_ms: 12,
        };
        let json: Value = serde_json::to_value(&record).unwrap();
        assert_eq!(json["snapshotRef"], 1);
        assert_eq!(json["outcome"], "TIMEOUT");
        assert_eq!(json["rawOutputExcerpt"], "ok");
    }
}
