//! LLM-assisted analysis
//!
//! The model is shown the inspected context plus the heuristic defaults and
//! asked for a JSON plan. Any field it leaves out keeps the heuristic value;
//! any backend or parse failure falls back to the heuristic plan entirely.

use async_trait::async_trait;
use serde::Deserialize;
use std::sync::Arc;
use tracing::{info, warn};

use super::context::ProjectContext;
use super::heuristic::heuristic_plan;
use super::{AnalysisError, Analyzer};
use crate::llm::{query_json, BackendError, LLMClient};
use crate::plan::{default_container_definition, BuildPlan, ProjectKind, ProjectType};
use crate::snapshot::ProjectSnapshot;

const SYSTEM_PROMPT: &str = "You are a DevOps engineer. Analyze the project and reply with a \
build plan as a single JSON object. Do not add commentary.";

const MAX_TOKENS: u32 = 1500;

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct PlanReply {
    #[serde(rename = "type")]
    project_type: Option<String>,
    #[serde(alias = "dockerImage")]
    container_image: Option<String>,
    install_command: Option<String>,
    build_command: Option<String>,
    artifact_dir: Option<String>,
    #[serde(alias = "dockerfile")]
    container_definition: Option<String>,
    needs_install: Option<bool>,
    needs_build: Option<bool>,
    start_command: Option<String>,
}

pub struct LlmAnalyzer {
    client: Arc<dyn LLMClient>,
}

impl LlmAnalyzer {
    pub fn new(client: Arc<dyn LLMClient>) -> Self {
        Self { client }
    }

    async fn ask(&self, context: &ProjectContext, defaults: &BuildPlan) -> Result<PlanReply, BackendError> {
        query_json(
            self.client.as_ref(),
            SYSTEM_PROMPT,
            build_prompt(context, defaults),
            MAX_TOKENS,
            "analysis",
        )
        .await
    }
}

#[async_trait]
impl Analyzer for LlmAnalyzer {
    async fn analyze(&self, snapshot: &ProjectSnapshot) -> Result<BuildPlan, AnalysisError> {
        let root = snapshot.root.clone();
        let context = tokio::task::spawn_blocking(move || ProjectContext::gather(&root))
            .await
            .map_err(|e| AnalysisError::Scan(e.to_string()))??;

        let defaults = heuristic_plan(&context, snapshot.id);

        let plan = match self.ask(&context, &defaults).await {
            Ok(reply) => merge(reply, defaults),
            Err(e) => {
                warn!(
                    backend = self.client.name(),
                    error = %e,
                    "LLM analysis failed, using heuristic plan"
                );
                defaults
            }
        };

        info!(
            snapshot = %snapshot.id,
            project_type = %plan.project_type,
            image = %plan.container_image,
            command = %plan.command_line(),
            artifact_dir = %plan.declared_artifact_dir,
            "Build plan ready"
        );
        Ok(plan)
    }

    fn name(&self) -> &str {
        "llm"
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}

fn merge(reply: PlanReply, defaults: BuildPlan) -> BuildPlan {
    let project_type = non_empty(reply.project_type)
        .map(|label| ProjectType::from_label(&label))
        .unwrap_or(defaults.project_type);
    let container_image = non_empty(reply.container_image).unwrap_or(defaults.container_image);

    let container_definition = match non_empty(reply.container_definition) {
        Some(def) if def.contains("FROM") => def,
        _ => default_container_definition(&container_image, &project_type),
    };

    let declared_artifact_dir = reply
        .artifact_dir
        .map(|d| d.trim().trim_matches('/').to_string())
        .filter(|d| !d.is_empty())
        .unwrap_or(defaults.declared_artifact_dir);

    let start_command = match project_type.kind {
        ProjectKind::Backend => non_empty(reply.start_command)
            .or(defaults.start_command)
            .or_else(|| Some("npm start".to_string())),
        _ => None,
    };

    BuildPlan {
        expects_artifact: project_type.kind == ProjectKind::Frontend,
        project_type,
        container_image,
        install_command: non_empty(reply.install_command).unwrap_or(defaults.install_command),
        build_command: non_empty(reply.build_command).unwrap_or(defaults.build_command),
        declared_artifact_dir,
        container_definition,
        needs_install: reply.needs_install.unwrap_or(defaults.needs_install),
        needs_build: reply.needs_build.unwrap_or(defaults.needs_build),
        working_dir: defaults.working_dir,
        start_command,
        source_snapshot: defaults.source_snapshot,
    }
}

fn build_prompt(context: &ProjectContext, defaults: &BuildPlan) -> String {
    let mut prompt = String::from("Project facts:\n");

    if context.has_package_json() {
        let scripts = context
            .package_json
            .as_ref()
            .and_then(|m| m.get("scripts"))
            .map(|s| s.to_string())
            .unwrap_or_else(|| "{}".to_string());
        prompt.push_str(&format!("- package.json scripts: {}\n", scripts));
        prompt.push_str(&format!(
            "- main dependencies: {}\n",
            context.dependency_names(10).join(", ")
        ));
        if let Some(major) = context.node_major_version() {
            prompt.push_str(&format!("- node version: {}\n", major));
        }
        prompt.push_str(&format!(
            "- lock file: {}\n",
            context.lock_file.map(|l| l.as_str()).unwrap_or("none")
        ));
        let tools: Vec<&str> = context.build_tools.iter().map(|t| t.as_str()).collect();
        prompt.push_str(&format!(
            "- build tools: {}\n",
            if tools.is_empty() {
                "none".to_string()
            } else {
                tools.join(", ")
            }
        ));
    } else {
        prompt.push_str("- no package.json (static project)\n");
    }
    prompt.push_str(&format!("- files scanned: {}\n", context.structure.len()));

    let key_files: Vec<_> = context
        .config_files
        .iter()
        .filter(|f| f.path != "Dockerfile")
        .take(3)
        .collect();
    if !key_files.is_empty() {
        prompt.push_str("\nKey files:\n");
        for file in key_files {
            let preview: String = file.content.chars().take(500).collect();
            prompt.push_str(&format!("{}:\n{}\n", file.path, preview));
        }
    }

    prompt.push_str(&format!(
        r#"
Reply with JSON:
{{
  "type": "project type, e.g. Frontend (React), Backend, HTML5",
  "containerImage": "build image (default: {image})",
  "installCommand": "install step (default: {install})",
  "buildCommand": "build step without install (default: {build})",
  "artifactDir": "output directory relative to the project (default: {artifact})",
  "containerDefinition": "complete Dockerfile",
  "needsInstall": {needs_install},
  "needsBuild": {needs_build},
  "startCommand": "only for backends"
}}"#,
        image = defaults.container_image,
        install = defaults.install_command,
        build = defaults.build_command,
        artifact = defaults.declared_artifact_dir,
        needs_install = defaults.needs_install,
        needs_build = defaults.needs_build,
    ));

    prompt
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::{MockLLMClient, MockResponse};
    use crate::snapshot::SnapshotStore;
    use std::fs;
    use tempfile::TempDir;

    fn snapshot_with(manifest: &str) -> (TempDir, ProjectSnapshot) {
        let source = TempDir::new().unwrap();
        fs::write(source.path().join("package.json"), manifest).unwrap();
        let work = TempDir::new().unwrap();
        let store = SnapshotStore::new(work.path().join("snaps")).unwrap();
        let snapshot = store.import(source.path()).unwrap();
        (work, snapshot)
    }

    #[tokio::test]
    async fn test_llm_fields_override_heuristics() {
        let (_work, snapshot) = snapshot_with(r#"{"dependencies":{"react":"18"}}"#);
        let client = Arc::new(MockLLMClient::new());
        client.add_response(MockResponse::text(
            "```json\n{\"type\":\"Frontend (React)\",\"containerImage\":\"node:18-alpine\",\"artifactDir\":\"/build/\"}\n```",
        ));

        let plan = LlmAnalyzer::new(client.clone()).analyze(&snapshot).await.unwrap();
        assert_eq!(plan.container_image, "node:18-alpine");
        assert_eq!(plan.declared_artifact_dir, "build");
        assert_eq!(plan.install_command, "npm install");
        assert!(plan.container_definition.starts_with("FROM node:18-alpine"));
        assert_eq!(client.requests().len(), 1);
    }

    #[tokio::test]
    async fn test_backend_failure_falls_back() {
        let (_work, snapshot) = snapshot_with(r#"{"dependencies":{"vue":"3"}}"#);
        let client = Arc::new(MockLLMClient::new());
        client.add_response(MockResponse::error(BackendError::TimeoutError { seconds: 60 }));

        let plan = LlmAnalyzer::new(client).analyze(&snapshot).await.unwrap();
        assert_eq!(plan.project_type.to_string(), "Frontend (Vue)");
        assert_eq!(plan.declared_artifact_dir, "dist");
    }

    #[tokio::test]
    async fn test_unparseable_reply_falls_back() {
        let (_work, snapshot) = snapshot_with(r#"{"scripts":{"start":"node app.js"}}"#);
        let client = Arc::new(MockLLMClient::new());
        client.add_response(MockResponse::text("I think this is a node app."));

        let plan = LlmAnalyzer::new(client).analyze(&snapshot).await.unwrap();
        assert_eq!(plan.project_type.kind, ProjectKind::Backend);
        assert_eq!(plan.start_command.as_deref(), Some("node app.js"));
    }

    #[test]
    fn test_prompt_mentions_defaults() {
        let dir = TempDir::new().unwrap();
        fs::write(
            dir.path().join("package.json"),
            r#"{"scripts":{"build":"vite build"}}"#,
        )
        .unwrap();
        let ctx = ProjectContext::gather(dir.path()).unwrap();
        let defaults = heuristic_plan(&ctx, crate::snapshot::SnapshotId(0));
        let prompt = build_prompt(&ctx, &defaults);
        assert!(prompt.contains("vite build"));
        assert!(prompt.contains("default: dist"));
    }
}
