//! Build plans produced by analyzers
//!
//! A [`BuildPlan`] describes how to build one snapshot: which image to use,
//! which commands to run, and where output artifacts are expected to appear.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Component, Path};
use tracing::debug;

use crate::snapshot::SnapshotId;

pub const DEFAULT_NODE_IMAGE: &str = "node:20-alpine";
pub const STATIC_IMAGE: &str = "nginx:alpine";

/// Lock manifests that make a reproducible install possible
pub const LOCK_MANIFESTS: &[&str] = &[
    "package-lock.json",
    "npm-shrinkwrap.json",
    "yarn.lock",
    "pnpm-lock.yaml",
];

const REPRODUCIBLE_INSTALL: &str = "npm ci";
const RESOLVING_INSTALL: &str = "npm install";

/// Broad category of project, decides how it gets deployed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProjectKind {
    /// Plain HTML/CSS/JS served as-is
    Static,
    /// Built into static assets
    Frontend,
    /// Long-running server process
    Backend,
}

/// Project type as reported in plans and results, e.g. `Frontend (React)`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProjectType {
    pub kind: ProjectKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub framework: Option<String>,
}

impl ProjectType {
    pub fn new(kind: ProjectKind, framework: Option<&str>) -> Self {
        Self {
            kind,
            framework: framework.map(str::to_string),
        }
    }

    pub fn static_site() -> Self {
        Self::new(ProjectKind::Static, Some("HTML5"))
    }

    /// Parses free-form labels such as `Frontend (React)` or `Node.js (Backend)`.
    pub fn from_label(label: &str) -> Self {
        let lower = label.to_lowercase();
        let framework = ["react", "vue", "next", "angular", "svelte", "vite", "express"]
            .iter()
            .find(|name| lower.contains(*name))
            .map(|name| capitalize(name));

        let kind = if lower.contains("html") || lower.contains("static") {
            ProjectKind::Static
        } else if lower.contains("backend") || lower.contains("server") || lower.contains("express")
        {
            ProjectKind::Backend
        } else if lower.contains("frontend") || framework.is_some() {
            ProjectKind::Frontend
        } else {
            ProjectKind::Backend
        };

        let framework = match kind {
            ProjectKind::Static => Some("HTML5".to_string()),
            _ => framework,
        };
        Self { kind, framework }
    }

    /// Whether the deployed service serves static files
    pub fn serves_static_files(&self) -> bool {
        matches!(self.kind, ProjectKind::Static | ProjectKind::Frontend)
    }
}

impl fmt::Display for ProjectType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kind = match self.kind {
            ProjectKind::Static => "Static",
            ProjectKind::Frontend => "Frontend",
            ProjectKind::Backend => "Backend",
        };
        match &self.framework {
            Some(framework) => write!(f, "{} ({})", kind, framework),
            None => write!(f, "{}", kind),
        }
    }
}

fn capitalize(s: &str) -> String {
    let mut chars = s.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BuildPlan {
    pub project_type: ProjectType,
    pub container_image: String,
    pub install_command: String,
    pub build_command: String,
    /// Relative directory where the build is expected to write its output.
    pub declared_artifact_dir: String,
    /// Whether an artifact is expected at all. Kept separate from the path so
    /// an empty path never has to be interpreted.
    pub expects_artifact: bool,
    pub container_definition: String,
    pub needs_install: bool,
    pub needs_build: bool,
    /// Relative directory inside the snapshot holding the project root.
    #[serde(default)]
    pub working_dir: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_command: Option<String>,
    pub source_snapshot: SnapshotId,
}

impl BuildPlan {
    /// Shell command executed inside the build container.
    pub fn command_line(&self) -> String {
        let mut parts = Vec::new();
        if self.needs_install && !self.install_command.trim().is_empty() {
            parts.push(self.install_command.trim());
        }
        if self.needs_build && !self.build_command.trim().is_empty() {
            parts.push(self.build_command.trim());
        }
        if parts.is_empty() {
            "true".to_string()
        } else {
            parts.join(" && ")
        }
    }

    /// Brings the plan in line with the snapshot it is about to build.
    ///
    /// Degrades a reproducible install to a resolving one when no lock
    /// manifest exists or when the last failure reported the lock manifest out
    /// of sync, and clears artifact directories that are not plain relative
    /// paths. Applying it twice yields the same plan.
    pub fn normalize(&mut self, snapshot_root: &Path, last_failure: Option<&str>) {
        let project_root = snapshot_root.join(&self.working_dir);
        let lock_mismatch = last_failure.map(reports_lock_mismatch).unwrap_or(false);

        if !has_lock_manifest(&project_root) || lock_mismatch {
            for command in [&mut self.install_command, &mut self.build_command] {
                if command.contains(REPRODUCIBLE_INSTALL) {
                    *command = command.replace(REPRODUCIBLE_INSTALL, RESOLVING_INSTALL);
                    debug!("Degraded '{}' to '{}'", REPRODUCIBLE_INSTALL, RESOLVING_INSTALL);
                }
            }
        }

        if !is_safe_relative(&self.declared_artifact_dir) {
            debug!(
                dir = %self.declared_artifact_dir,
                "Clearing artifact directory that is not a relative path"
            );
            self.declared_artifact_dir.clear();
        }
        self.declared_artifact_dir = self.declared_artifact_dir.trim_matches('/').to_string();

        if !is_safe_relative(&self.working_dir) {
            self.working_dir.clear();
        }
    }
}

/// Whether the directory contains any lock manifest
pub fn has_lock_manifest(project_root: &Path) -> bool {
    LOCK_MANIFESTS
        .iter()
        .any(|name| project_root.join(name).is_file())
}

fn reports_lock_mismatch(report: &str) -> bool {
    let lower = report.to_lowercase();
    lower.contains(REPRODUCIBLE_INSTALL)
        && (lower.contains("in sync") || lower.contains("does not satisfy"))
}

/// True for empty strings and relative paths without `..` components.
pub fn is_safe_relative(path: &str) -> bool {
    Path::new(path)
        .components()
        .all(|c| matches!(c, Component::Normal(_) | Component::CurDir))
}

/// Minimal container definition for a build image.
pub fn default_container_definition(image: &str, project_type: &ProjectType) -> String {
    let mut lines = vec![format!("FROM {}", image), "WORKDIR /app".to_string()];
    if project_type.kind == ProjectKind::Frontend && image.starts_with("node") {
        lines.push("RUN npm install -g serve".to_string());
    }
    lines.join("\n") + "\n"
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn sample_plan() -> BuildPlan {
        BuildPlan {
            project_type: ProjectType::new(ProjectKind::Frontend, Some("React")),
            container_image: DEFAULT_NODE_IMAGE.to_string(),
            install_command: "npm ci".to_string(),
            build_command: "npm run build".to_string(),
            declared_artifact_dir: "build".to_string(),
            expects_artifact: true,
            container_definition: String::new(),
            needs_install: true,
            needs_build: true,
            working_dir: String::new(),
            start_command: None,
            source_snapshot: SnapshotId(0),
        }
    }

    #[test]
    fn test_command_line_joins_enabled_steps() {
        let mut plan = sample_plan();
        assert_eq!(plan.command_line(), "npm ci && npm run build");

        plan.needs_install = false;
        assert_eq!(plan.command_line(), "npm run build");

        plan.needs_build = false;
        assert_eq!(plan.command_line(), "true");
    }

    #[test]
    fn test_normalize_degrades_without_lockfile() {
        let dir = TempDir::new().unwrap();
        let mut plan = sample_plan();
        plan.normalize(dir.path(), None);
        assert_eq!(plan.install_command, "npm install");

        let once = plan.clone();
        plan.normalize(dir.path(), None);
        assert_eq!(plan, once);
    }

    #[test]
    fn test_normalize_keeps_ci_with_lockfile() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("package-lock.json"), "{}").unwrap();
        let mut plan = sample_plan();
        plan.normalize(dir.path(), None);
        assert_eq!(plan.install_command, "npm ci");
    }

    #[test]
    fn test_normalize_degrades_on_lock_mismatch_report() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("package-lock.json"), "{}").unwrap();
        let mut plan = sample_plan();
        plan.normalize(
            dir.path(),
            Some("npm ERR! `npm ci` can only install packages when your package.json and package-lock.json are in sync"),
        );
        assert_eq!(plan.install_command, "npm install");
    }

    #[test]
    fn test_normalize_clears_escaping_artifact_dir() {
        let dir = TempDir::new().unwrap();
        let mut plan = sample_plan();
        plan.declared_artifact_dir = "../outside".to_string();
        plan.normalize(dir.path(), None);
        assert!(plan.declared_artifact_dir.is_empty());

        plan.declared_artifact_dir = "/abs".to_string();
        plan.normalize(dir.path(), None);
        assert!(plan.declared_artifact_dir.is_empty());
    }

    #[test]
    fn test_project_type_from_label() {
        let react = ProjectType::from_label("Frontend (React)");
        assert_eq!(react.kind, ProjectKind::Frontend);
        assert_eq!(react.framework.as_deref(), Some("React"));

        assert_eq!(ProjectType::from_label("HTML5").kind, ProjectKind::Static);
        assert_eq!(
            ProjectType::from_label("Node.js (Backend)").kind,
            ProjectKind::Backend
        );
        assert_eq!(ProjectType::from_label("something").kind, ProjectKind::Backend);
    }

    #[test]
    fn test_project_type_display() {
        let t = ProjectType::new(ProjectKind::Frontend, Some("Vue"));
        assert_eq!(t.to_string(), "Frontend (Vue)");
        assert_eq!(ProjectType::new(ProjectKind::Backend, None).to_string(), "Backend");
    }

    #[test]
    fn test_default_container_definition() {
        let def = default_container_definition(
            "node:18-alpine",
            &ProjectType::new(ProjectKind::Frontend, None),
        );
        assert!(def.starts_with("FROM node:18-alpine"));
        assert!(def.contains("WORKDIR /app"));
    }
}
