//! Static inspection of a snapshot
//!
//! Collects the facts both analyzers work from: where the real project root
//! is, which lock manifest and build tools are present, the package scripts,
//! and short previews of the configuration files.

use ignore::{overrides::OverrideBuilder, WalkBuilder};
use serde_json::Value;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

use super::AnalysisError;

/// Directories never descended into while scanning
const EXCLUDED_DIRS: &[&str] = &["node_modules", "dist", "build"];

const MAX_FILES: usize = 2000;
const PREVIEW_CHARS: usize = 1000;

const CONFIG_FILES: &[&str] = &[
    "vite.config.js",
    "vite.config.ts",
    "webpack.config.js",
    "webpack.config.ts",
    "next.config.js",
    "next.config.ts",
    "rollup.config.js",
    "rollup.config.ts",
    "tsconfig.json",
    "Dockerfile",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockFile {
    Npm,
    Shrinkwrap,
    Yarn,
    Pnpm,
}

impl LockFile {
    fn from_file_name(name: &str) -> Option<Self> {
        match name {
            "package-lock.json" => Some(LockFile::Npm),
            "npm-shrinkwrap.json" => Some(LockFile::Shrinkwrap),
            "yarn.lock" => Some(LockFile::Yarn),
            "pnpm-lock.yaml" => Some(LockFile::Pnpm),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            LockFile::Npm => "npm",
            LockFile::Shrinkwrap => "npm-shrinkwrap",
            LockFile::Yarn => "yarn",
            LockFile::Pnpm => "pnpm",
        }
    }

    /// Install command that honours this lock manifest
    pub fn install_command(&self) -> &'static str {
        match self {
            LockFile::Npm | LockFile::Shrinkwrap => "npm ci",
            LockFile::Yarn => "yarn install --frozen-lockfile",
            LockFile::Pnpm => "corepack enable && pnpm install --frozen-lockfile",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BuildTool {
    Vite,
    Webpack,
    Next,
    Rollup,
}

impl BuildTool {
    fn from_file_name(name: &str) -> Option<Self> {
        let stem = name
            .strip_suffix(".js")
            .or_else(|| name.strip_suffix(".ts"))
            .or_else(|| name.strip_suffix(".mjs"))?;
        match stem {
            "vite.config" => Some(BuildTool::Vite),
            "webpack.config" => Some(BuildTool::Webpack),
            "next.config" => Some(BuildTool::Next),
            "rollup.config" => Some(BuildTool::Rollup),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            BuildTool::Vite => "vite",
            BuildTool::Webpack => "webpack",
            BuildTool::Next => "nextjs",
            BuildTool::Rollup => "rollup",
        }
    }
}

#[derive(Debug, Clone)]
pub struct ConfigPreview {
    pub path: String,
    pub content: String,
}

#[derive(Debug, Clone)]
pub struct ProjectContext {
    /// Absolute path of the directory holding the project manifest
    pub project_root: PathBuf,
    /// `project_root` relative to the snapshot root, empty when equal
    pub working_dir: String,
    pub package_json: Option<Value>,
    /// Relative paths of scanned entries, directories end with `/`
    pub structure: Vec<String>,
    pub lock_file: Option<LockFile>,
    pub build_tools: Vec<BuildTool>,
    /// Artifact directory guessed from the build script
    pub artifact_hint: Option<String>,
    pub config_files: Vec<ConfigPreview>,
}

impl ProjectContext {
    /// Scans the snapshot rooted at `snapshot_root`.
    pub fn gather(snapshot_root: &Path) -> Result<Self, AnalysisError> {
        if !snapshot_root.is_dir() {
            return Err(AnalysisError::SnapshotMissing(snapshot_root.to_path_buf()));
        }

        let (project_root, working_dir) = find_project_root(snapshot_root);
        if !working_dir.is_empty() {
            debug!(working_dir = %working_dir, "Project root found one level down");
        }

        let mut context = ProjectContext {
            package_json: read_package_json(&project_root)?,
            project_root,
            working_dir,
            structure: Vec::new(),
            lock_file: None,
            build_tools: Vec::new(),
            artifact_hint: None,
            config_files: Vec::new(),
        };
        context.artifact_hint = context.script("build").and_then(guess_artifact_dir);
        context.scan()?;

        Ok(context)
    }

    fn scan(&mut self) -> Result<(), AnalysisError> {
        let mut overrides = OverrideBuilder::new(&self.project_root);
        for excluded in EXCLUDED_DIRS {
            overrides
                .add(&format!("!{}/", excluded))
                .map_err(|e| AnalysisError::Scan(e.to_string()))?;
        }
        let overrides = overrides
            .build()
            .map_err(|e| AnalysisError::Scan(e.to_string()))?;

        let walker = WalkBuilder::new(&self.project_root)
            .hidden(true)
            .git_ignore(false)
            .git_global(false)
            .git_exclude(false)
            .sort_by_file_path(|a, b| a.cmp(b))
            .overrides(overrides)
            .build();

        for result in walker {
            let entry = match result {
                Ok(e) => e,
                Err(err) => {
                    warn!(error = %err, "Failed to read directory entry");
                    continue;
                }
            };
            let path = entry.path();
            if path == self.project_root {
                continue;
            }
            if self.structure.len() >= MAX_FILES {
                warn!(max_files = MAX_FILES, "Reached file limit, stopping scan");
                break;
            }

            let rel = path
                .strip_prefix(&self.project_root)
                .unwrap_or(path)
                .to_string_lossy()
                .replace('\\', "/");

            if entry.file_type().map(|t| t.is_dir()).unwrap_or(false) {
                self.structure.push(format!("{}/", rel));
                continue;
            }
            self.structure.push(rel.clone());

            let name = entry.file_name().to_string_lossy();
            if self.lock_file.is_none() {
                self.lock_file = LockFile::from_file_name(&name);
            }
            if let Some(tool) = BuildTool::from_file_name(&name) {
                if !self.build_tools.contains(&tool) {
                    self.build_tools.push(tool);
                }
            }
            if CONFIG_FILES.contains(&name.as_ref()) {
                if let Ok(content) = fs::read_to_string(path) {
                    self.config_files.push(ConfigPreview {
                        path: rel,
                        content: content.chars().take(PREVIEW_CHARS).collect(),
                    });
                }
            }
        }

        Ok(())
    }

    pub fn has_package_json(&self) -> bool {
        self.package_json.is_some()
    }

    pub fn script(&self, name: &str) -> Option<&str> {
        self.package_json
            .as_ref()?
            .get("scripts")?
            .get(name)?
            .as_str()
    }

    /// True when `name` appears in dependencies or devDependencies
    pub fn depends_on(&self, name: &str) -> bool {
        let Some(manifest) = self.package_json.as_ref() else {
            return false;
        };
        ["dependencies", "devDependencies"].iter().any(|section| {
            manifest
                .get(section)
                .and_then(|deps| deps.get(name))
                .is_some()
        })
    }

    pub fn dependency_names(&self, limit: usize) -> Vec<String> {
        self.package_json
            .as_ref()
            .and_then(|m| m.get("dependencies"))
            .and_then(|d| d.as_object())
            .map(|deps| deps.keys().take(limit).cloned().collect())
            .unwrap_or_default()
    }

    /// Major version from `engines.node`, e.g. `>=18.2` gives `18`
    pub fn node_major_version(&self) -> Option<String> {
        let spec = self
            .package_json
            .as_ref()?
            .get("engines")?
            .get("node")?
            .as_str()?;
        let digits: String = spec
            .chars()
            .skip_while(|c| !c.is_ascii_digit())
            .take_while(|c| c.is_ascii_digit())
            .collect();
        if digits.is_empty() {
            None
        } else {
            Some(digits)
        }
    }
}

/// Locates the directory holding `package.json`: the snapshot root itself, or
/// the first qualifying child directory. Falls back to the root.
pub fn find_project_root(snapshot_root: &Path) -> (PathBuf, String) {
    if snapshot_root.join("package.json").is_file() {
        return (snapshot_root.to_path_buf(), String::new());
    }

    let mut children: Vec<PathBuf> = match fs::read_dir(snapshot_root) {
        Ok(entries) => entries
            .filter_map(|e| e.ok())
            .filter(|e| e.file_type().map(|t| t.is_dir()).unwrap_or(false))
            .filter(|e| {
                let name = e.file_name().to_string_lossy().to_string();
                !name.starts_with('.') && !EXCLUDED_DIRS.contains(&name.as_str())
            })
            .map(|e| e.path())
            .collect(),
        Err(_) => Vec::new(),
    };
    children.sort();

    for child in children {
        if child.join("package.json").is_file() {
            let name = child
                .file_name()
                .map(|n| n.to_string_lossy().to_string())
                .unwrap_or_default();
            return (child, name);
        }
    }

    (snapshot_root.to_path_buf(), String::new())
}

fn read_package_json(project_root: &Path) -> Result<Option<Value>, AnalysisError> {
    let path = project_root.join("package.json");
    if !path.is_file() {
        return Ok(None);
    }
    let content = fs::read_to_string(&path).map_err(|e| AnalysisError::Scan(e.to_string()))?;
    serde_json::from_str(&content)
        .map(Some)
        .map_err(|e| AnalysisError::InvalidManifest {
            path,
            message: e.to_string(),
        })
}

fn guess_artifact_dir(build_script: &str) -> Option<String> {
    let dir = if build_script.contains("react-scripts") {
        "build"
    } else if build_script.contains("vite") {
        "dist"
    } else if build_script.contains("next") {
        ".next"
    } else {
        return None;
    };
    Some(dir.to_string())
}
