//! Automatic repair of failed builds
//!
//! A [`Fixer`] only proposes patches. [`fix`] turns a proposal into a new
//! snapshot: the current snapshot is forked and the patches land on the fork,
//! so the snapshot the runtime last built is never written to.

mod llm;
mod rules;

pub use llm::LlmFixer;
pub use rules::RuleFixer;

use async_trait::async_trait;
use std::path::Path;
use thiserror::Error;
use tracing::info;

use crate::error::Failure;
use crate::plan::BuildPlan;
use crate::snapshot::{FilePatch, ProjectSnapshot, SnapshotError, SnapshotStore};

#[derive(Debug, Error)]
pub enum FixerError {
    #[error("Fixer backend failed: {0}")]
    Backend(String),

    #[error("Failed to inspect snapshot: {0}")]
    Inspect(String),

    #[error(transparent)]
    Snapshot(#[from] SnapshotError),

    #[error("Repair task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

/// Patches a fixer wants applied, plus a human-readable reason
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Repair {
    pub patches: Vec<FilePatch>,
    pub rationale: String,
}

impl Repair {
    pub fn new(patches: Vec<FilePatch>, rationale: impl Into<String>) -> Self {
        Self {
            patches,
            rationale: rationale.into(),
        }
    }

    /// No applicable change. A normal outcome, not an error.
    pub fn none(rationale: impl Into<String>) -> Self {
        Self::new(Vec::new(), rationale)
    }

    pub fn is_empty(&self) -> bool {
        self.patches.is_empty()
    }
}

#[async_trait]
pub trait Fixer: Send + Sync {
    async fn propose(
        &self,
        snapshot: &ProjectSnapshot,
        failure: &Failure,
        plan: &BuildPlan,
    ) -> Result<Repair, FixerError>;

    fn name(&self) -> &str;
}

/// Result of one DEBUG step
#[derive(Debug, Clone)]
pub struct FixOutcome {
    /// Always a fresh snapshot, even when nothing was patched
    pub snapshot: ProjectSnapshot,
    pub applied: usize,
    pub rationale: String,
}

/// Asks `fixer` for a repair, forks `snapshot` and applies the repair to the
/// fork. On error the caller's snapshot is untouched and stays current, and
/// no partially patched fork is left in the store.
pub async fn fix(
    store: &SnapshotStore,
    fixer: &dyn Fixer,
    snapshot: &ProjectSnapshot,
    failure: &Failure,
    plan: &BuildPlan,
) -> Result<FixOutcome, FixerError> {
    let repair = fixer.propose(snapshot, failure, plan).await?;

    let (forked, applied) = {
        let store = store.clone();
        let source = snapshot.clone();
        let patches = repair.patches.clone();
        tokio::task::spawn_blocking(move || fork_and_apply(&store, &source, &patches)).await??
    };

    info!(
        fixer = fixer.name(),
        from = %snapshot.id,
        to = %forked.id,
        proposed = repair.patches.len(),
        applied,
        rationale = %repair.rationale,
        "Repair applied to forked snapshot"
    );

    Ok(FixOutcome {
        snapshot: forked,
        applied,
        rationale: repair.rationale,
    })
}

fn fork_and_apply(
    store: &SnapshotStore,
    snapshot: &ProjectSnapshot,
    patches: &[FilePatch],
) -> Result<(ProjectSnapshot, usize), SnapshotError> {
    let forked = store.fork(snapshot)?;
    match store.apply(&forked, patches) {
        Ok(applied) => Ok((forked, applied)),
        Err(e) => {
            store.discard(&forked);
            Err(e)
        }
    }
}

/// Relative path of `file` inside the snapshot, given the plan's project root
pub(crate) fn project_path(plan: &BuildPlan, file: &str) -> String {
    if plan.working_dir.is_empty() {
        file.to_string()
    } else {
        Path::new(&plan.working_dir)
            .join(file)
            .to_string_lossy()
            .replace('\\', "/")
    }
}
