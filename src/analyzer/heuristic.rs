use async_trait::async_trait;
use tracing::{debug, info};

use super::context::ProjectContext;
use super::{AnalysisError, Analyzer};
use crate::plan::{
    default_container_definition, BuildPlan, ProjectKind, ProjectType, DEFAULT_NODE_IMAGE,
    STATIC_IMAGE,
};
use crate::snapshot::{ProjectSnapshot, SnapshotId};

const RESOLVING_INSTALL: &str = "npm install";
const BUILD_SCRIPT: &str = "npm run build";

/// Rule-based analyzer working from static inspection alone
#[derive(Debug, Default, Clone)]
pub struct HeuristicAnalyzer;

impl HeuristicAnalyzer {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Analyzer for HeuristicAnalyzer {
    async fn analyze(&self, snapshot: &ProjectSnapshot) -> Result<BuildPlan, AnalysisError> {
        let root = snapshot.root.clone();
        let context = tokio::task::spawn_blocking(move || ProjectContext::gather(&root))
            .await
            .map_err(|e| AnalysisError::Scan(e.to_string()))??;

        let plan = heuristic_plan(&context, snapshot.id);
        info!(
            snapshot = %snapshot.id,
            project_type = %plan.project_type,
            image = %plan.container_image,
            command = %plan.command_line(),
            "Heuristic plan ready"
        );
        Ok(plan)
    }

    fn name(&self) -> &str {
        "heuristic"
    }
}

/// Derives a plan from the inspected context. Also the fallback for the LLM
/// analyzer.
pub fn heuristic_plan(context: &ProjectContext, snapshot: SnapshotId) -> BuildPlan {
    if !context.has_package_json() {
        debug!("No package.json, planning a static site");
        let project_type = ProjectType::static_site();
        return BuildPlan {
            container_definition: default_container_definition(STATIC_IMAGE, &project_type),
            project_type,
            container_image: STATIC_IMAGE.to_string(),
            install_command: String::new(),
            build_command: String::new(),
            declared_artifact_dir: String::new(),
            expects_artifact: false,
            needs_install: false,
            needs_build: false,
            working_dir: context.working_dir.clone(),
            start_command: None,
            source_snapshot: snapshot,
        };
    }

    let image = context
        .node_major_version()
        .map(|major| format!("node:{}-alpine", major))
        .unwrap_or_else(|| DEFAULT_NODE_IMAGE.to_string());

    let install = context
        .lock_file
        .map(|lock| lock.install_command())
        .unwrap_or(RESOLVING_INSTALL)
        .to_string();

    let build_script = context.script("build");
    let hint = context.artifact_hint.clone();

    let (project_type, artifact_dir, needs_build, start_command) = if context.depends_on("react")
    {
        (
            ProjectType::new(ProjectKind::Frontend, Some("React")),
            hint.unwrap_or_else(|| "build".to_string()),
            true,
            None,
        )
    } else if context.depends_on("vue") {
        (
            ProjectType::new(ProjectKind::Frontend, Some("Vue")),
            hint.unwrap_or_else(|| "dist".to_string()),
            true,
            None,
        )
    } else if let Some(script) = build_script {
        let dir = hint.unwrap_or_else(|| {
            if script.contains("dist") {
                "dist".to_string()
            } else if script.contains("build") {
                "build".to_string()
            } else {
                String::new()
            }
        });
        (
            ProjectType::new(ProjectKind::Frontend, Some("Generic")),
            dir,
            true,
            None,
        )
    } else {
        let start = match context.script("start") {
            Some(script) if script.trim_start().starts_with("node ") => script.to_string(),
            _ => "npm start".to_string(),
        };
        (
            ProjectType::new(ProjectKind::Backend, Some("Node.js")),
            String::new(),
            false,
            Some(start),
        )
    };

    let expects_artifact = project_type.kind == ProjectKind::Frontend;

    BuildPlan {
        container_definition: default_container_definition(&image, &project_type),
        project_type,
        container_image: image,
        install_command: install,
        build_command: if needs_build {
            BUILD_SCRIPT.to_string()
        } else {
            String::new()
        },
        declared_artifact_dir: artifact_dir,
        expects_artifact,
        needs_install: true,
        needs_build,
        working_dir: context.working_dir.clone(),
        start_command,
        source_snapshot: snapshot,
    }
}
