//! Output formatting for pipeline results, classifications, health checks
//! and configuration.
//!
//! JSON and YAML serialize the same structures the task API receives; the
//! human format is meant for terminals.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::classify::ErrorClass;
use crate::config::HealboxConfig;
use crate::pipeline::{AttemptOutcome, PipelineResult, Status};

const RULE: &str = "\u{2501}\u{2501}\u{2501}\u{2501}\u{2501}\u{2501}\u{2501}\u{2501}\u{2501}\u{2501}\u{2501}\u{2501}\u{2501}\u{2501}\u{2501}\u{2501}\u{2501}\u{2501}\u{2501}\u{2501}\u{2501}\u{2501}\u{2501}\u{2501}\u{2501}\u{2501}\u{2501}\u{2501}\u{2501}\u{2501}\u{2501}\u{2501}\u{2501}\u{2501}\u{2501}\u{2501}\u{2501}\u{2501}\u{2501}\u{2501}";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    /// JSON format (machine-readable)
    Json,
    /// YAML format
    Yaml,
    /// Human-readable formatted text
    Human,
}

/// Result of one `classify` invocation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Classification {
    pub classification: ErrorClass,
    pub message: String,
}

pub struct OutputFormatter {
    format: OutputFormat,
}

impl OutputFormatter {
    pub fn new(format: OutputFormat) -> Self {
        Self { format }
    }

    pub fn format_result(&self, result: &PipelineResult) -> Result<String> {
        match self.format {
            OutputFormat::Json => serde_json::to_string_pretty(result)
                .context("Failed to serialize pipeline result to JSON"),
            OutputFormat::Yaml => {
                serde_yaml::to_string(result).context("Failed to serialize pipeline result to YAML")
            }
            OutputFormat::Human => Ok(self.format_result_human(result)),
        }
    }

    pub fn format_classification(&self, classification: &Classification) -> Result<String> {
        match self.format {
            OutputFormat::Json => serde_json::to_string_pretty(classification)
                .context("Failed to serialize classification to JSON"),
            OutputFormat::Yaml => serde_yaml::to_string(classification)
                .context("Failed to serialize classification to YAML"),
            OutputFormat::Human => Ok(format!("{}\n", classification.classification)),
        }
    }

    pub fn format_health(&self, health: &BTreeMap<String, HealthStatus>) -> Result<String> {
        match self.format {
            OutputFormat::Json => serde_json::to_string_pretty(health)
                .context("Failed to serialize health status to JSON"),
            OutputFormat::Yaml => {
                serde_yaml::to_string(health).context("Failed to serialize health status to YAML")
            }
            OutputFormat::Human => Ok(self.format_health_human(health)),
        }
    }

    pub fn format_health_with_config(
        &self,
        health: &BTreeMap<String, HealthStatus>,
        config: &HealboxConfig,
    ) -> Result<String> {
        match self.format {
            OutputFormat::Json => {
                let output = serde_json::json!({
                    "health_status": health,
                    "configuration": config.to_display_map(),
                });
                serde_json::to_string_pretty(&output)
                    .context("Failed to serialize health status with config to JSON")
            }
            OutputFormat::Yaml => {
                let output = serde_json::json!({
                    "health_status": health,
                    "configuration": config.to_display_map(),
                });
                serde_yaml::to_string(&output)
                    .context("Failed to serialize health status with config to YAML")
            }
            OutputFormat::Human => {
                let mut output = self.format_health_human(health);
                output.push('\n');
                output.push_str(&self.format_config_human(config));
                Ok(output)
            }
        }
    }

    fn format_result_human(&self, result: &PipelineResult) -> String {
        let mut output = String::new();

        match result.status {
            Status::Success => output.push_str("\u{2713} Pipeline succeeded\n"),
            Status::Failed => output.push_str("\u{2717} Pipeline failed\n"),
        }
        output.push_str(RULE);
        output.push_str("\n\n");

        output.push_str(&format!("Task:      {}\n", result.task_id));
        output.push_str(&format!("Run:       {}\n", result.run_id));
        output.push_str(&format!("Status:    {}\n", result.status));
        output.push_str(&format!("Step:      {}\n", result.step));
        output.push_str(&format!("Attempts:  {}\n", result.attempts));
        if let Some(class) = result.classification {
            output.push_str(&format!("Class:     {}\n", class));
        }
        output.push('\n');

        if !result.attempt_records.is_empty() {
            output.push_str("Attempts:\n");
            let last = result.attempt_records.len() - 1;
            for (i, record) in result.attempt_records.iter().enumerate() {
                let connector = if i == last { "\u{2514}" } else { "\u{251C}" };
                let symbol = match record.outcome {
                    AttemptOutcome::Success => "\u{2713}",
                    AttemptOutcome::Failure => "\u{2717}",
                    AttemptOutcome::Timeout => "\u{29D6}",
                };
                output.push_str(&format!(
                    "{}\u{2500} #{} {} {} ({}ms)\n",
                    connector, record.index, symbol, record.snapshot_ref, record.duration_ms
                ));
            }
            output.push('\n');
        }

        if let Some(path) = &result.artifact_path {
            output.push_str(&format!("Artifact:  {}\n", path.display()));
        }
        if let Some(deployment) = &result.deployment {
            output.push_str(&format!(
                "Deployed:  {} ({})\n",
                deployment.url, deployment.container
            ));
        }

        output.push_str(&format!("\n{}\n", result.summary));

        if let Some(detail) = &result.error_detail {
            output.push_str("\nError detail:\n");
            for line in detail.lines().take(20) {
                output.push_str(&format!("  {}\n", line));
            }
        }

        output.push_str(&format!("\nFinished in {}ms\n", result.duration_ms));
        output
    }

    fn format_health_human(&self, health: &BTreeMap<String, HealthStatus>) -> String {
        let mut output = String::new();

        output.push_str("Health Status\n");
        output.push_str(RULE);
        output.push_str("\n\n");

        for (name, status) in health {
            let symbol = if status.available {
                "\u{2713}"
            } else {
                "\u{2717}"
            };
            output.push_str(&format!("{} {}\n", symbol, name));
            output.push_str(&format!("  {}\n", status.message));
            if let Some(details) = &status.details {
                output.push_str(&format!("  {}\n", details));
            }
            output.push('\n');
        }

        let available = health.values().filter(|s| s.available).count();
        output.push_str(&format!("Summary: {}/{} available\n", available, health.len()));
        output
    }

    fn format_config_human(&self, config: &HealboxConfig) -> String {
        let mut output = String::new();
        output.push_str("Configuration\n");
        output.push_str(RULE);
        output.push_str("\n\n");
        for (key, value) in config.to_display_map() {
            output.push_str(&format!("  {:<20} {}\n", key, value));
        }
        output
    }
}

/// Availability of one external dependency
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthStatus {
    pub available: bool,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
}

impl HealthStatus {
    pub fn available(message: String) -> Self {
        Self {
            available: true,
            message,
            details: None,
        }
    }

    pub fn unavailable(message: String) -> Self {
        Self {
            available: false,
            message,
            details: None,
        }
    }

    pub fn with_details(mut self, details: String) -> Self {
        self.details = Some(details);
        self
    }
}
