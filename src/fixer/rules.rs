use async_trait::async_trait;
use regex::Regex;
use serde_json::{json, Value};
use std::fs;
use std::sync::OnceLock;
use tracing::debug;

use super::{project_path, Fixer, FixerError, Repair};
use crate::error::Failure;
use crate::plan::BuildPlan;
use crate::snapshot::{FilePatch, ProjectSnapshot};

const MANIFEST: &str = "package.json";
const NPM_LOCK: &str = "package-lock.json";

fn missing_module_pattern() -> Option<&'static Regex> {
    static RE: OnceLock<Option<Regex>> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r#"(?i)(?:cannot find module|can't resolve)\s+['"]([^'"]+)['"]"#).ok()
    })
    .as_ref()
}

/// Deterministic repairs for the failures seen most often.
///
/// Rules are tried in order and the first that produces a patch wins. When no
/// rule applies the repair is empty.
#[derive(Debug, Default, Clone)]
pub struct RuleFixer;

impl RuleFixer {
    pub fn new() -> Self {
        Self
    }

    /// Pure core, also used as the LLM fixer's fallback.
    pub fn repair(
        &self,
        snapshot: &ProjectSnapshot,
        failure: &Failure,
        plan: &BuildPlan,
    ) -> Result<Repair, FixerError> {
        let manifest_rel = project_path(plan, MANIFEST);
        let manifest_path = snapshot.root.join(&manifest_rel);
        let manifest = if manifest_path.is_file() {
            let content = fs::read_to_string(&manifest_path)
                .map_err(|e| FixerError::Inspect(e.to_string()))?;
            serde_json::from_str::<Value>(&content).ok()
        } else {
            None
        };

        let report = failure.message.as_str();
        let lower = report.to_lowercase();

        if lower.contains(MANIFEST) && lower.contains("enoent") && !manifest_path.exists() {
            return Ok(Repair::new(
                vec![FilePatch::WriteFile {
                    path: manifest_rel,
                    contents: default_manifest(),
                }],
                "package.json was missing, created a default one",
            ));
        }

        let Some(manifest) = manifest else {
            return Ok(Repair::none("no readable package.json to repair"));
        };

        if let Some(module) = missing_module(report) {
            if !declares_dependency(&manifest, &module) {
                return Ok(Repair::new(
                    vec![FilePatch::AddDependency {
                        manifest: manifest_rel,
                        name: module.clone(),
                        version: "latest".to_string(),
                    }],
                    format!("module '{}' was missing, added it as a dependency", module),
                ));
            }
            debug!(module = %module, "Missing module already declared");
        }

        if lower.contains("missing script") && lower.contains("build") && script(&manifest, "build").is_none() {
            let command = default_build_script(&manifest);
            return Ok(Repair::new(
                vec![FilePatch::SetScript {
                    manifest: manifest_rel,
                    name: "build".to_string(),
                    command: command.to_string(),
                }],
                format!("build script was missing, set it to '{}'", command),
            ));
        }

        if lower.contains("npm ci")
            && ["package-lock.json", "lockfile", "in sync", "does not satisfy"]
                .iter()
                .any(|k| lower.contains(k))
        {
            let lock_rel = project_path(plan, NPM_LOCK);
            if snapshot.root.join(&lock_rel).is_file() {
                return Ok(Repair::new(
                    vec![FilePatch::DeleteFile { path: lock_rel }],
                    "lock manifest out of sync, removed it so it gets regenerated",
                ));
            }

            let patches: Vec<FilePatch> = scripts(&manifest)
                .filter(|(_, command)| command.contains("npm ci"))
                .map(|(name, command)| FilePatch::SetScript {
                    manifest: manifest_rel.clone(),
                    name: name.to_string(),
                    command: command.replace("npm ci", "npm install"),
                })
                .collect();
            if !patches.is_empty() {
                return Ok(Repair::new(
                    patches,
                    "scripts used 'npm ci' without a usable lock manifest",
                ));
            }
        }

        Ok(Repair::none("no rule matched the failure"))
    }
}

#[async_trait]
impl Fixer for RuleFixer {
    async fn propose(
        &self,
        snapshot: &ProjectSnapshot,
        failure: &Failure,
        plan: &BuildPlan,
    ) -> Result<Repair, FixerError> {
        self.repair(snapshot, failure, plan)
    }

    fn name(&self) -> &str {
        "rules"
    }
}

/// Package named in a "Cannot find module" report. Relative imports, absolute
/// paths and node builtins yield nothing; scoped names keep their scope.
fn missing_module(report: &str) -> Option<String> {
    let raw = missing_module_pattern()?.captures(report)?.get(1)?.as_str();
    if raw.starts_with('.') || raw.starts_with('/') || raw.starts_with("node:") {
        return None;
    }

    let mut segments = raw.split('/');
    let first = segments.next()?;
    let name = if first.starts_with('@') {
        format!("{}/{}", first, segments.next()?)
    } else {
        first.to_string()
    };
    Some(name)
}

fn declares_dependency(manifest: &Value, name: &str) -> bool {
    ["dependencies", "devDependencies"]
        .iter()
        .any(|section| manifest.get(section).and_then(|d| d.get(name)).is_some())
}

fn script<'a>(manifest: &'a Value, name: &str) -> Option<&'a str> {
    manifest.get("scripts")?.get(name)?.as_str()
}

fn scripts(manifest: &Value) -> impl Iterator<Item = (&str, &str)> {
    manifest
        .get("scripts")
        .and_then(|s| s.as_object())
        .into_iter()
        .flat_map(|map| map.iter())
        .filter_map(|(k, v)| v.as_str().map(|v| (k.as_str(), v)))
}

fn default_build_script(manifest: &Value) -> &'static str {
    if declares_dependency(manifest, "react") {
        "react-scripts build"
    } else if declares_dependency(manifest, "vue") {
        "vite build"
    } else if declares_dependency(manifest, "next") {
        "next build"
    } else {
        "echo \"Build completed\""
    }
}

fn default_manifest() -> String {
    let manifest = json!({
        "name": "project",
        "version": "1.0.0",
        "description": "Auto-generated project",
        "scripts": { "start": "node index.js" },
        "dependencies": {}
    });
    serde_json::to_string_pretty(&manifest).unwrap_or_default() + "\n"
}
