//! Failure reports carried through the pipeline loop
//!
//! Every collaborator error that the controller absorbs is converted into a
//! single tagged [`Failure`] so that reporting and the error classifier never
//! need to probe error types at runtime.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Marker placed at the start of every timeout report.
pub const TIMEOUT_MARKER: &str = "[timeout]";

/// Which stage of the pipeline produced a failure
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// Analysis produced no usable plan
    Analysis,
    /// The build command ran and the outcome classifier rejected it
    Build,
    /// The build exceeded its wall-clock budget
    Timeout,
    /// The container runtime could not execute the attempt at all
    Runtime,
    /// The repair step failed
    Fixer,
    /// Deployment failed after a successful build
    Deploy,
    /// The project could not be fetched or imported
    Checkout,
    /// The task was cancelled by an operator
    Cancelled,
}

impl FailureKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            FailureKind::Analysis => "analysis",
            FailureKind::Build => "build",
            FailureKind::Timeout => "timeout",
            FailureKind::Runtime => "runtime",
            FailureKind::Fixer => "fixer",
            FailureKind::Deploy => "deploy",
            FailureKind::Checkout => "checkout",
            FailureKind::Cancelled => "cancelled",
        }
    }
}

/// A failure report: structured kind plus the free text used for repair and
/// post-mortem classification.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Failure {
    pub kind: FailureKind,
    pub message: String,
}

impl Failure {
    pub fn new(kind: FailureKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn build(message: impl Into<String>) -> Self {
        Self::new(FailureKind::Build, message)
    }

    pub fn timeout(seconds: u64, output: &str) -> Self {
        let mut message = format!("{} build exceeded its {}s budget", TIMEOUT_MARKER, seconds);
        if !output.trim().is_empty() {
            message.push('\n');
            message.push_str(output);
        }
        Self::new(FailureKind::Timeout, message)
    }

    pub fn is_timeout(&self) -> bool {
        self.kind == FailureKind::Timeout
    }

    /// Shortened message for logs and attempt records.
    pub fn excerpt(&self, max_chars: usize) -> String {
        excerpt(&self.message, max_chars)
    }
}

impl fmt::Display for Failure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} failure: {}", self.kind.as_str(), self.message)
    }
}

impl std::error::Error for Failure {}

/// Keeps the head and the tail of long text, where build tools put the
/// interesting lines.
pub fn excerpt(text: &str, max_chars: usize) -> String {
    let count = text.chars().count();
    if count <= max_chars {
        return text.to_string();
    }
    let head_len = max_chars * 2 / 3;
    let tail_len = max_chars - head_len;
    let head: String = text.chars().take(head_len).collect();
    let tail: String = text.chars().skip(count - tail_len).collect();
    format!("{}\n...\n{}", head, tail)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_timeout_failure_carries_marker() {
        let failure = Failure::timeout(120, "partial output");
        assert!(failure.is_timeout());
        assert!(failure.message.starts_with(TIMEOUT_MARKER));
        assert!(failure.message.contains("120s"));
        assert!(failure.message.contains("partial output"));
    }

    #[test]
    fn test_excerpt_short_text_unchanged() {
        assert_eq!(excerpt("short", 100), "short");
    }

    #[test]
    fn test_excerpt_keeps_head_and_tail() {
        let text = format!("{}{}", "a".repeat(500), "z".repeat(500));
        let out = excerpt(&text, 90);
        assert!(out.starts_with("aaaa"));
        assert!(out.ends_with("zzzz"));
        assert!(out.contains("..."));
    }

    #[test]
    fn test_display_includes_kind() {
        let failure = Failure::new(FailureKind::Fixer, "boom");
        assert_eq!(failure.to_string(), "fixer failure: boom");
    }

    #[test]
    fn test_failure_kind_serializes_snake_case() {
        let json = serde_json::to_string(&FailureKind::Timeout).unwrap();
        assert_eq!(json, "\"timeout\"");
    }
}
