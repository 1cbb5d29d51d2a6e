use async_trait::async_trait;
use ignore::WalkBuilder;
use regex::Regex;
use serde::Deserialize;
use serde_json::Value;
use std::fs;
use std::path::Path;
use std::sync::{Arc, OnceLock};
use tracing::{debug, info, warn};

use super::rules::RuleFixer;
use super::{project_path, Fixer, FixerError, Repair};
use crate::error::Failure;
use crate::llm::{query_json, LLMClient};
use crate::plan::{is_safe_relative, BuildPlan};
use crate::snapshot::{FilePatch, ProjectSnapshot};

const SYSTEM_PROMPT: &str = "You are a debugging expert. Find the cause of the build error and \
fix it with the smallest possible change. Reply with a single JSON object.";

const MAX_TOKENS: u32 = 4000;
const MAX_SCANNED_FILES: usize = 10;
const MAX_RELEVANT_FILES: usize = 5;

fn mentioned_file_pattern() -> Option<&'static Regex> {
    static RE: OnceLock<Option<Regex>> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"([a-zA-Z0-9_\-./]+\.(?:js|ts|jsx|tsx|json|vue|html|css|mjs|cjs))").ok()
    })
    .as_ref()
}

#[derive(Debug, Deserialize)]
struct FixReply {
    #[serde(default)]
    analysis: String,
    #[serde(default)]
    fixes: Vec<ProposedFix>,
}

#[derive(Debug, Deserialize)]
struct ProposedFix {
    file: String,
    #[serde(default)]
    action: String,
    #[serde(default)]
    description: String,
    #[serde(default)]
    code: String,
}

#[derive(Debug, Clone)]
struct FileExcerpt {
    path: String,
    content: String,
}

/// Fixer backed by an LLM, with the rule fixer as fallback whenever the model
/// fails or proposes nothing usable.
pub struct LlmFixer {
    client: Arc<dyn LLMClient>,
    rules: RuleFixer,
}

impl LlmFixer {
    pub fn new(client: Arc<dyn LLMClient>) -> Self {
        Self {
            client,
            rules: RuleFixer::new(),
        }
    }

    async fn ask(
        &self,
        snapshot: &ProjectSnapshot,
        failure: &Failure,
        plan: &BuildPlan,
    ) -> Result<Repair, FixerError> {
        let project_root = snapshot.root.join(&plan.working_dir);
        let files = tokio::task::spawn_blocking(move || gather_files(&project_root))
            .await
            .map_err(|e| FixerError::Inspect(e.to_string()))?;

        let prompt = build_prompt(failure, plan, &relevant_files(&files, &failure.message));
        let reply: FixReply = query_json(
            self.client.as_ref(),
            SYSTEM_PROMPT,
            prompt,
            MAX_TOKENS,
            "repair",
        )
        .await
        .map_err(|e| FixerError::Backend(e.to_string()))?;

        let patches: Vec<FilePatch> = reply
            .fixes
            .iter()
            .flat_map(|fix| to_patches(fix, plan))
            .collect();

        Ok(Repair::new(patches, reply.analysis))
    }
}

#[async_trait]
impl Fixer for LlmFixer {
    async fn propose(
        &self,
        snapshot: &ProjectSnapshot,
        failure: &Failure,
        plan: &BuildPlan,
    ) -> Result<Repair, FixerError> {
        match self.ask(snapshot, failure, plan).await {
            Ok(repair) if !repair.is_empty() => {
                info!(
                    backend = self.client.name(),
                    patches = repair.patches.len(),
                    "LLM proposed a repair"
                );
                return Ok(repair);
            }
            Ok(_) => warn!("LLM proposed no usable change, falling back to rules"),
            Err(e) => warn!(error = %e, "LLM repair failed, falling back to rules"),
        }
        self.rules.repair(snapshot, failure, plan)
    }

    fn name(&self) -> &str {
        "llm"
    }
}

fn to_patches(fix: &ProposedFix, plan: &BuildPlan) -> Vec<FilePatch> {
    let file = fix.file.trim().trim_start_matches("./");
    if file.is_empty() || !is_safe_relative(file) {
        warn!(file = %fix.file, "Ignoring proposed fix outside the project");
        return Vec::new();
    }
    let path = project_path(plan, file);
    debug!(file = %path, action = %fix.action, description = %fix.description, "Proposed fix");

    match fix.action.as_str() {
        "add_dependency" => match serde_json::from_str::<Value>(&fix.code) {
            Ok(Value::Object(deps)) => deps
                .into_iter()
                .map(|(name, version)| FilePatch::AddDependency {
                    manifest: path.clone(),
                    name,
                    version: version.as_str().unwrap_or("latest").to_string(),
                })
                .collect(),
            _ => {
                warn!(code = %fix.code, "add_dependency fix without a dependency object");
                Vec::new()
            }
        },
        "delete_file" => vec![FilePatch::DeleteFile { path }],
        _ if fix.code.is_empty() => Vec::new(),
        _ => vec![FilePatch::WriteFile {
            path,
            contents: fix.code.clone(),
        }],
    }
}

fn gather_files(project_root: &Path) -> Vec<FileExcerpt> {
    let mut files = Vec::new();
    let walker = WalkBuilder::new(project_root)
        .hidden(true)
        .git_ignore(false)
        .filter_entry(|e| {
            let name = e.file_name().to_string_lossy();
            !matches!(name.as_ref(), "node_modules" | "dist" | "build")
        })
        .sort_by_file_path(|a, b| a.cmp(b))
        .build();

    for entry in walker.flatten() {
        if files.len() >= MAX_SCANNED_FILES {
            break;
        }
        if !entry.file_type().map(|t| t.is_file()).unwrap_or(false) {
            continue;
        }
        let name = entry.file_name().to_string_lossy().to_string();
        let is_config = name == "package.json"
            || name == "Dockerfile"
            || ["config", "vite", "webpack", "tsconfig"]
                .iter()
                .any(|k| name.contains(k));
        let is_source = [".js", ".ts", ".json"].iter().any(|ext| name.ends_with(ext));

        if is_config || (files.len() < 5 && is_source) {
            if let Ok(content) = fs::read_to_string(entry.path()) {
                let rel = entry
                    .path()
                    .strip_prefix(project_root)
                    .unwrap_or(entry.path())
                    .to_string_lossy()
                    .replace('\\', "/");
                files.push(FileExcerpt {
                    path: rel,
                    content: content.chars().take(1500).collect(),
                });
            }
        }
    }
    files
}

/// Files named in the error first, then the manifest and container
/// definition.
fn relevant_files(files: &[FileExcerpt], report: &str) -> Vec<FileExcerpt> {
    let lower = report.to_lowercase();
    let mentioned: Vec<String> = mentioned_file_pattern()
        .map(|re| {
            re.find_iter(report)
                .take(5)
                .map(|m| m.as_str().to_lowercase())
                .collect()
        })
        .unwrap_or_default();

    let is_key = |f: &FileExcerpt| f.path.ends_with("package.json") || f.path.ends_with("Dockerfile");

    let mut relevant: Vec<FileExcerpt> = files
        .iter()
        .filter(|f| {
            let path = f.path.to_lowercase();
            mentioned.iter().any(|m| path.contains(m.as_str()) || m.ends_with(&path))
                || lower.contains(&path)
                || is_key(f)
        })
        .take(MAX_RELEVANT_FILES)
        .cloned()
        .collect();

    if relevant.is_empty() {
        relevant = files.iter().filter(|f| is_key(f)).take(3).cloned().collect();
    }
    for file in &mut relevant {
        file.content = file.content.chars().take(1000).collect();
    }
    relevant
}

fn error_summary(report: &str) -> String {
    let count = report.chars().count();
    if count <= 700 {
        return report.to_string();
    }
    let head: String = report.chars().take(500).collect();
    let tail: String = report.chars().skip(count - 200).collect();
    format!("{}\n...\n{}", head, tail)
}

fn build_prompt(failure: &Failure, plan: &BuildPlan, files: &[FileExcerpt]) -> String {
    let files_context = if files.is_empty() {
        "no file information".to_string()
    } else {
        files
            .iter()
            .map(|f| format!("{}:\n{}", f.path, f.content))
            .collect::<Vec<_>>()
            .join("\n\n")
    };

    format!(
        r#"Analyze and fix this build error.

Error:
{error}

Project: {project_type}
Build command: {command}

Relevant files:
{files}

Reply with JSON:
{{
  "analysis": "root cause",
  "fixes": [{{
    "file": "path relative to the project root",
    "action": "replace_file | create_file | add_dependency | delete_file",
    "description": "what the change does",
    "code": "full new file content, or a JSON object of dependencies for add_dependency"
  }}]
}}"#,
        error = error_summary(&failure.message),
        project_type = plan.project_type,
        command = plan.command_line(),
        files = files_context,
    )
}
