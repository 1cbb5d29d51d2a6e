//! Test doubles for the pipeline collaborators.
//!
//! Each integration test binary pulls in what it needs; the rest is dead
//! code from that binary's point of view.
#![allow(dead_code)]

use async_trait::async_trait;
use healbox::analyzer::{AnalysisError, Analyzer};
use healbox::deploy::{DeployError, Deployer, Deployment};
use healbox::error::Failure;
use healbox::fixer::{Fixer, FixerError, Repair};
use healbox::plan::{BuildPlan, ProjectKind, ProjectType};
use healbox::runtime::{ContainerRuntime, RunContext, RunExit, RunOutput, RuntimeError};
use healbox::snapshot::{copy_tree, FilePatch, ProjectSnapshot, SnapshotId};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use uuid::Uuid;

pub fn plan(kind: ProjectKind) -> BuildPlan {
    BuildPlan {
        project_type: ProjectType::new(kind, None),
        container_image: "node:20-alpine".to_string(),
        install_command: "npm install".to_string(),
        build_command: "npm run build".to_string(),
        declared_artifact_dir: String::new(),
        expects_artifact: false,
        container_definition: "FROM node:20-alpine\n".to_string(),
        needs_install: true,
        needs_build: true,
        working_dir: String::new(),
        start_command: None,
        source_snapshot: SnapshotId(0),
    }
}

/// Writes a small project tree into `dir`
pub fn write_project(dir: &Path) {
    std::fs::write(
        dir.join("package.json"),
        r#"{"name":"site","scripts":{"build":"vite build"}}"#,
    )
    .unwrap();
    std::fs::write(dir.join("index.html"), "<html></html>").unwrap();
}

/// Always returns the same plan
pub struct FixedAnalyzer {
    pub plan: BuildPlan,
    pub calls: AtomicUsize,
}

impl FixedAnalyzer {
    pub fn new(plan: BuildPlan) -> Self {
        Self {
            plan,
            calls: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl Analyzer for FixedAnalyzer {
    async fn analyze(&self, _snapshot: &ProjectSnapshot) -> Result<BuildPlan, AnalysisError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.plan.clone())
    }

    fn name(&self) -> &str {
        "fixed"
    }
}

pub struct FailingAnalyzer(pub String);

#[async_trait]
impl Analyzer for FailingAnalyzer {
    async fn analyze(&self, _snapshot: &ProjectSnapshot) -> Result<BuildPlan, AnalysisError> {
        Err(AnalysisError::Scan(self.0.clone()))
    }

    fn name(&self) -> &str {
        "failing"
    }
}

/// What a scripted attempt does
#[derive(Debug, Clone)]
pub struct Step {
    pub exit: RunExit,
    pub output: String,
    /// Files created in the workspace after the snapshot is copied
    pub creates: Vec<(String, String)>,
}

impl Step {
    pub fn fail(output: &str) -> Self {
        Self {
            exit: RunExit::Code(1),
            output: output.to_string(),
            creates: Vec::new(),
        }
    }

    pub fn ok(output: &str) -> Self {
        Self {
            exit: RunExit::Code(0),
            output: output.to_string(),
            creates: Vec::new(),
        }
    }

    pub fn timed_out(seconds: u64) -> Self {
        Self {
            exit: RunExit::TimedOut { seconds },
            output: "still building...".to_string(),
            creates: Vec::new(),
        }
    }

    pub fn creating(mut self, path: &str, contents: &str) -> Self {
        self.creates.push((path.to_string(), contents.to_string()));
        self
    }
}

/// Plays back one step per attempt; the last step repeats.
///
/// When `succeed_with` is set, any snapshot containing that file succeeds.
pub struct ScriptedRuntime {
    steps: Vec<Step>,
    succeed_with: Option<String>,
    pub seen: Mutex<Vec<(u32, SnapshotId, PathBuf)>>,
}

impl ScriptedRuntime {
    pub fn new(steps: Vec<Step>) -> Self {
        Self {
            steps,
            succeed_with: None,
            seen: Mutex::new(Vec::new()),
        }
    }

    pub fn always(step: Step) -> Self {
        Self::new(vec![step])
    }

    pub fn succeed_when_present(mut self, file: &str) -> Self {
        self.succeed_with = Some(file.to_string());
        self
    }

    pub fn snapshots(&self) -> Vec<SnapshotId> {
        self.seen.lock().unwrap().iter().map(|(_, id, _)| *id).collect()
    }

    pub fn attempts(&self) -> Vec<u32> {
        self.seen.lock().unwrap().iter().map(|(a, _, _)| *a).collect()
    }
}

#[async_trait]
impl ContainerRuntime for ScriptedRuntime {
    async fn run(
        &self,
        _plan: &BuildPlan,
        snapshot: &ProjectSnapshot,
        context: &RunContext,
    ) -> Result<RunOutput, RuntimeError> {
        let index = {
            let mut seen = self.seen.lock().unwrap();
            seen.push((context.attempt, snapshot.id, snapshot.root.clone()));
            seen.len() - 1
        };

        copy_tree(&snapshot.root, &context.workspace, &[])?;

        let mut step = self.steps[index.min(self.steps.len() - 1)].clone();
        if let Some(file) = &self.succeed_with {
            if snapshot.root.join(file).exists() {
                step = Step::ok("build complete");
            }
        }
        for (path, contents) in &step.creates {
            let target = context.workspace.join(path);
            if let Some(parent) = target.parent() {
                std::fs::create_dir_all(parent)?;
            }
            std::fs::write(target, contents)?;
        }

        Ok(RunOutput {
            exit: step.exit,
            output: step.output,
            workspace: context.workspace.clone(),
        })
    }

    fn name(&self) -> &str {
        "scripted"
    }
}

/// Never finishes on its own; only cancellation ends it
pub struct HangingRuntime;

#[async_trait]
impl ContainerRuntime for HangingRuntime {
    async fn run(
        &self,
        _plan: &BuildPlan,
        _snapshot: &ProjectSnapshot,
        context: &RunContext,
    ) -> Result<RunOutput, RuntimeError> {
        context.cancel.cancelled().await;
        Err(RuntimeError::Cancelled)
    }

    fn name(&self) -> &str {
        "hanging"
    }
}

/// Proposes nothing
pub struct NoopFixer;

#[async_trait]
impl Fixer for NoopFixer {
    async fn propose(
        &self,
        _snapshot: &ProjectSnapshot,
        _failure: &Failure,
        _plan: &BuildPlan,
    ) -> Result<Repair, FixerError> {
        Ok(Repair::none("nothing to change"))
    }

    fn name(&self) -> &str {
        "noop"
    }
}

/// Writes one file, recording every failure it was shown
pub struct WritingFixer {
    pub path: String,
    pub failures: Mutex<Vec<String>>,
}

impl WritingFixer {
    pub fn new(path: &str) -> Self {
        Self {
            path: path.to_string(),
            failures: Mutex::new(Vec::new()),
        }
    }
}

#[async_trait]
impl Fixer for WritingFixer {
    async fn propose(
        &self,
        _snapshot: &ProjectSnapshot,
        failure: &Failure,
        _plan: &BuildPlan,
    ) -> Result<Repair, FixerError> {
        self.failures.lock().unwrap().push(failure.message.clone());
        Ok(Repair::new(
            vec![FilePatch::WriteFile {
                path: self.path.clone(),
                contents: "patched\n".to_string(),
            }],
            format!("write {}", self.path),
        ))
    }

    fn name(&self) -> &str {
        "writing"
    }
}

pub struct BrokenFixer;

#[async_trait]
impl Fixer for BrokenFixer {
    async fn propose(
        &self,
        _snapshot: &ProjectSnapshot,
        _failure: &Failure,
        _plan: &BuildPlan,
    ) -> Result<Repair, FixerError> {
        Err(FixerError::Backend("model returned garbage".to_string()))
    }

    fn name(&self) -> &str {
        "broken"
    }
}

/// Records what it was asked to serve
#[derive(Default)]
pub struct RecordingDeployer {
    pub sources: Mutex<Vec<PathBuf>>,
    pub fail_with: Option<String>,
}

impl RecordingDeployer {
    pub fn failing(stderr: &str) -> Self {
        Self {
            sources: Mutex::new(Vec::new()),
            fail_with: Some(stderr.to_string()),
        }
    }
}

#[async_trait]
impl Deployer for RecordingDeployer {
    async fn deploy(
        &self,
        source: &Path,
        _plan: &BuildPlan,
        _run_id: Uuid,
    ) -> Result<Deployment, DeployError> {
        self.sources.lock().unwrap().push(source.to_path_buf());
        if let Some(stderr) = &self.fail_with {
            return Err(DeployError::Command {
                command: "docker run".to_string(),
                stderr: stderr.clone(),
            });
        }
        Ok(Deployment {
            url: "http://localhost:8080".to_string(),
            container: "healbox-web".to_string(),
            image: "nginx:alpine".to_string(),
        })
    }

    fn name(&self) -> &str {
        "recording"
    }
}
