//! Build outcome classifier
//!
//! Decides from the exit status, the combined output and the workspace left
//! behind whether a build attempt succeeded. Rules are evaluated in order and
//! the first match wins:
//!
//! 1. A non-zero exit (or a timeout) is a failure.
//! 2. When the plan expects an artifact, the declared directory and then the
//!    conventional fallback directories are probed; the first non-empty one is
//!    copied to the canonical output location.
//! 3. Otherwise the lowercased output is scanned for failure phrases. With no
//!    failure phrase the attempt is a success (fail-open).

use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use crate::error::{Failure, FailureKind};
use crate::plan::BuildPlan;
use crate::runtime::RunExit;
use crate::snapshot::{copy_tree, is_non_empty_dir};

/// Conventional output directories, probed in this order when the declared
/// artifact directory turns out empty.
pub const FALLBACK_ARTIFACT_DIRS: &[&str] = &[
    "dist",
    "build",
    "out",
    ".next",
    ".output/public",
    "_site",
    "www",
];

/// Phrases that indicate a build tool finished its work.
pub const SUCCESS_PHRASES: &[&str] = &[
    "compiled successfully",
    "build complete",
    "build completed",
    "build succeeded",
    "build successful",
    "successfully built",
    "built in",
    "the build folder is ready",
    "export successful",
    "done in",
];

/// Phrases that indicate a build went wrong even though it exited with 0.
pub const FAILURE_PHRASES: &[&str] = &[
    "npm err!",
    "build failed",
    "failed to compile",
    "compilation failed",
    "cannot find module",
    "module not found",
    "command not found",
    "syntaxerror",
    "fatal error",
    "error: script",
    "exited with code",
];

/// Everything the classifier looks at for one attempt
#[derive(Debug, Clone)]
pub struct BuildObservation<'a> {
    pub exit: &'a RunExit,
    pub output: &'a str,
    pub plan: &'a BuildPlan,
    /// Project root inside the workspace the build ran in
    pub project_dir: &'a Path,
    /// Where a found artifact is copied to
    pub canonical_output: &'a Path,
}

/// Output of a successful build, relocated to the canonical location
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Artifact {
    pub path: PathBuf,
    /// Relative directory the artifact was collected from
    pub collected_from: String,
    /// True when a fallback directory was used instead of the declared one
    pub via_fallback: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BuildVerdict {
    Success { artifact: Option<Artifact> },
    Failure(Failure),
}

impl BuildVerdict {
    pub fn is_success(&self) -> bool {
        matches!(self, BuildVerdict::Success { .. })
    }
}

/// Classifies one attempt. Running it twice on the same inputs yields the
/// same verdict: the canonical output is replaced, never merged.
pub fn classify_build(observation: &BuildObservation<'_>) -> BuildVerdict {
    match observation.exit {
        RunExit::Code(0) => {}
        RunExit::Code(code) => {
            return BuildVerdict::Failure(Failure::build(format!(
                "build command exited with code {}\n{}",
                code, observation.output
            )));
        }
        RunExit::TimedOut { seconds } => {
            return BuildVerdict::Failure(Failure::timeout(*seconds, observation.output));
        }
        RunExit::Signaled => {
            return BuildVerdict::Failure(Failure::build(format!(
                "build process was terminated by a signal\n{}",
                observation.output
            )));
        }
    }

    if observation.plan.expects_artifact {
        match locate_artifact(observation) {
            Ok(Some(artifact)) => {
                return BuildVerdict::Success {
                    artifact: Some(artifact),
                }
            }
            Ok(None) => debug!("No artifact directory found, falling back to output heuristics"),
            Err(failure) => return BuildVerdict::Failure(failure),
        }
    }

    classify_text(observation.output)
}

fn locate_artifact(observation: &BuildObservation<'_>) -> Result<Option<Artifact>, Failure> {
    let declared = observation.plan.declared_artifact_dir.as_str();

    let candidates = std::iter::once((declared, false))
        .filter(|(dir, _)| !dir.is_empty())
        .chain(
            FALLBACK_ARTIFACT_DIRS
                .iter()
                .filter(|dir| **dir != declared)
                .map(|dir| (*dir, true)),
        );

    for (dir, via_fallback) in candidates {
        let source = observation.project_dir.join(dir);
        if !is_non_empty_dir(&source) {
            continue;
        }
        if via_fallback {
            info!(
                declared = %declared,
                found = %dir,
                "Declared artifact directory empty, using fallback"
            );
        }
        collect(&source, observation.canonical_output)?;
        return Ok(Some(Artifact {
            path: observation.canonical_output.to_path_buf(),
            collected_from: dir.to_string(),
            via_fallback,
        }));
    }

    Ok(None)
}

fn collect(source: &Path, destination: &Path) -> Result<(), Failure> {
    let io_failure = |e: std::io::Error| {
        Failure::new(
            FailureKind::Runtime,
            format!(
                "failed to collect artifact from {} into {}: {}",
                source.display(),
                destination.display(),
                e
            ),
        )
    };

    if destination.exists() {
        fs::remove_dir_all(destination).map_err(io_failure)?;
    }
    copy_tree(source, destination, &[]).map_err(io_failure)?;
    Ok(())
}

fn classify_text(output: &str) -> BuildVerdict {
    let lower = output.to_lowercase();

    if let Some(phrase) = FAILURE_PHRASES.iter().find(|p| lower.contains(*p)) {
        debug!(phrase, "Failure phrase found in output of a zero exit");
        return BuildVerdict::Failure(Failure::build(format!(
            "build exited with code 0 but reported failure ('{}')\n{}",
            phrase, output
        )));
    }

    if let Some(phrase) = SUCCESS_PHRASES.iter().find(|p| lower.contains(*p)) {
        debug!(phrase, "Success phrase found in output");
    } else {
        debug!("No success or failure phrase, treating zero exit as success");
    }
    BuildVerdict::Success { artifact: None }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plan::{ProjectKind, ProjectType};
    use crate::snapshot::SnapshotId;
    use tempfile::TempDir;

    fn plan(declared: &str, expects_artifact: bool) -> BuildPlan {
        BuildPlan {
            project_type: ProjectType::new(ProjectKind::Frontend, None),
            container_image: "node:20-alpine".to_string(),
            install_command: "npm install".to_string(),
            build_command: "npm run build".to_string(),
            declared_artifact_dir: declared.to_string(),
            expects_artifact,
            container_definition: String::new(),
            needs_install: true,
            needs_build: true,
            working_dir: String::new(),
            start_command: None,
            source_snapshot: SnapshotId(0),
        }
    }

    fn classify(
        exit: RunExit,
        output: &str,
        plan: &BuildPlan,
        workspace: &TempDir,
    ) -> BuildVerdict {
        let canonical = workspace.path().join("artifact");
        classify_build(&BuildObservation {
            exit: &exit,
            output,
            plan,
            project_dir: &workspace.path().join("project"),
            canonical_output: &canonical,
        })
    }

    #[test]
    fn test_zero_exit_empty_output_no_artifact_is_success() {
        let ws = TempDir::new().unwrap();
        let verdict = classify(RunExit::Code(0), "", &plan("", false), &ws);
        assert_eq!(verdict, BuildVerdict::Success { artifact: None });
    }

    #[test]
    fn test_non_zero_exit_is_failure() {
        let ws = TempDir::new().unwrap();
        let verdict = classify(
            RunExit::Code(1),
            "Error: Cannot find module 'react'",
            &plan("build", true),
            &ws,
        );
        match verdict {
            BuildVerdict::Failure(f) => {
                assert_eq!(f.kind, FailureKind::Build);
                assert!(f.message.contains("Cannot find module"));
                assert!(f.message.contains("exited with code 1"));
            }
            other => panic!("expected failure, got {:?}", other),
        }
    }

    #[test]
    fn test_timeout_is_failure_with_marker() {
        let ws = TempDir::new().unwrap();
        let verdict = classify(
            RunExit::TimedOut { seconds: 5 },
            "",
            &plan("", false),
            &ws,
        );
        match verdict {
            BuildVerdict::Failure(f) => {
                assert!(f.is_timeout());
                assert!(f.message.contains(crate::error::TIMEOUT_MARKER));
            }
            other => panic!("expected failure, got {:?}", other),
        }
    }

    #[test]
    fn test_declared_dir_non_empty_is_collected() {
        let ws = TempDir::new().unwrap();
        let build = ws.path().join("project/build");
        fs::create_dir_all(&build).unwrap();
        fs::write(build.join("index.html"), "<html>").unwrap();

        let verdict = classify(RunExit::Code(0), "", &plan("build", true), &ws);
        match verdict {
            BuildVerdict::Success {
                artifact: Some(artifact),
            } => {
                assert_eq!(artifact.collected_from, "build");
                assert!(!artifact.via_fallback);
                assert!(artifact.path.join("index.html").exists());
            }
            other => panic!("expected artifact, got {:?}", other),
        }
    }

    #[test]
    fn test_empty_declared_dir_uses_fallback() {
        let ws = TempDir::new().unwrap();
        fs::create_dir_all(ws.path().join("project/build")).unwrap();
        let dist = ws.path().join("project/dist");
        fs::create_dir_all(&dist).unwrap();
        fs::write(dist.join("index.html"), "<html>").unwrap();

        let verdict = classify(RunExit::Code(0), "", &plan("build", true), &ws);
        match verdict {
            BuildVerdict::Success {
                artifact: Some(artifact),
            } => {
                assert_eq!(artifact.collected_from, "dist");
                assert!(artifact.via_fallback);
                let names: Vec<String> = fs::read_dir(&artifact.path)
                    .unwrap()
                    .map(|e| e.unwrap().file_name().to_string_lossy().to_string())
                    .collect();
                assert_eq!(names, vec!["index.html".to_string()]);
            }
            other => panic!("expected artifact, got {:?}", other),
        }
    }

    #[test]
    fn test_no_artifact_falls_through_to_text() {
        let ws = TempDir::new().unwrap();
        let verdict = classify(
            RunExit::Code(0),
            "Failed to compile.\n./src/App.js",
            &plan("build", true),
            &ws,
        );
        assert!(!verdict.is_success());

        let verdict = classify(RunExit::Code(0), "nothing to see", &plan("build", true), &ws);
        assert_eq!(verdict, BuildVerdict::Success { artifact: None });
    }

    #[test]
    fn test_success_phrase_is_success() {
        let ws = TempDir::new().unwrap();
        let verdict = classify(
            RunExit::Code(0),
            "vite v5.0.0 building for production...\n✓ built in 1.2s",
            &plan("", false),
            &ws,
        );
        assert_eq!(verdict, BuildVerdict::Success { artifact: None });
    }

    #[test]
    fn test_failure_phrase_beats_success_phrase() {
        let ws = TempDir::new().unwrap();
        let verdict = classify(
            RunExit::Code(0),
            "Compiled successfully\nnpm ERR! missing script: build",
            &plan("", false),
            &ws,
        );
        assert!(!verdict.is_success());
    }

    #[test]
    fn test_classification_is_idempotent() {
        let ws = TempDir::new().unwrap();
        let dist = ws.path().join("project/dist");
        fs::create_dir_all(&dist).unwrap();
        fs::write(dist.join("app.js"), "x").unwrap();

        let p = plan("build", true);
        let first = classify(RunExit::Code(0), "done", &p, &ws);
        let second = classify(RunExit::Code(0), "done", &p, &ws);
        assert_eq!(first, second);
    }

    #[test]
    fn test_phrase_tables_are_lowercase() {
        for phrase in SUCCESS_PHRASES.iter().chain(FAILURE_PHRASES) {
            assert_eq!(*phrase, phrase.to_lowercase());
        }
    }

    #[test]
    fn test_phrase_tables_are_disjoint() {
        for phrase in SUCCESS_PHRASES {
            assert!(!FAILURE_PHRASES.contains(phrase));
        }
    }
}
