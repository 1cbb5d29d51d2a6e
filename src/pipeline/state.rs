//! Owned loop state threaded through the controller

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::{Duration, Instant};

use super::result::AttemptRecord;
use crate::error::Failure;
use crate::plan::BuildPlan;
use crate::snapshot::ProjectSnapshot;

/// Controller step, as reported in results
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Step {
    Analysis,
    Build,
    Debug,
    Deploy,
}

impl Step {
    pub fn as_str(&self) -> &'static str {
        match self {
            Step::Analysis => "ANALYSIS",
            Step::Build => "BUILD",
            Step::Debug => "DEBUG",
            Step::Deploy => "DEPLOY",
        }
    }
}

impl fmt::Display for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One line of the transition log
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transition {
    pub step: Step,
    pub attempt: u32,
    pub elapsed: Duration,
    pub note: String,
}

impl fmt::Display for Transition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[{:>7.1}s] #{} {}",
            self.elapsed.as_secs_f64(),
            self.attempt,
            self.step
        )?;
        if !self.note.is_empty() {
            write!(f, ": {}", self.note)?;
        }
        Ok(())
    }
}

/// Everything the loop knows about one task.
///
/// `current` is the only live snapshot; replacing it is the only way the
/// controller moves to another tree.
#[derive(Debug)]
pub struct PipelineState {
    pub attempt: u32,
    pub current: ProjectSnapshot,
    pub plan: Option<BuildPlan>,
    pub last_failure: Option<Failure>,
    pub records: Vec<AttemptRecord>,
    log: Vec<Transition>,
    started: Instant,
}

impl PipelineState {
    pub fn new(snapshot: ProjectSnapshot) -> Self {
        Self {
            attempt: 1,
            current: snapshot,
            plan: None,
            last_failure: None,
            records: Vec::new(),
            log: Vec::new(),
            started: Instant::now(),
        }
    }

    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }

    /// Appends a log line for `step` at the current attempt.
    pub fn log(&mut self, step: Step, note: impl Into<String>) {
        let transition = Transition {
            step,
            attempt: self.attempt,
            elapsed: self.elapsed(),
            note: note.into(),
        };
        tracing::debug!(
            step = %transition.step,
            attempt = transition.attempt,
            elapsed_ms = transition.elapsed.as_millis(),
            note = %transition.note,
            "Transition"
        );
        self.log.push(transition);
    }

    pub fn transitions(&self) -> &[Transition] {
        &self.log
    }

    /// Replaces the current snapshot and moves to the next attempt.
    pub fn advance(&mut self, snapshot: Option<ProjectSnapshot>) {
        if let Some(snapshot) = snapshot {
            self.current = snapshot;
        }
        self.attempt += 1;
    }

    /// The transition log rendered one line per entry
    pub fn summary(&self) -> String {
        self.log
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join("\n")
    }
}
