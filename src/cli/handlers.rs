use std::collections::BTreeMap;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::commands::{ClassifyArgs, HealthArgs, PipelineArgs, ProviderArg, RunArgs, WorkerArgs};
use super::output::{Classification, HealthStatus, OutputFormat, OutputFormatter};
use crate::analyzer::{Analyzer, HeuristicAnalyzer, LlmAnalyzer};
use crate::classify::classify_failure;
use crate::config::{default_model, ConfigError, HealboxConfig};
use crate::deploy::DockerDeployer;
use crate::fixer::{Fixer, LlmFixer, RuleFixer};
use crate::llm::{ChatMessage, LLMRequest};
use crate::pipeline::{PipelineController, Worker};
use crate::progress::LoggingHandler;
use crate::runtime::{check_docker, DockerCliRuntime};
use crate::task::{
    DirReporter, HttpTaskApi, LocalTaskSource, Reporter, StdoutReporter, Task, TaskSource,
};

const API_TIMEOUT: Duration = Duration::from_secs(30);

pub async fn handle_run(args: &RunArgs) -> i32 {
    let config = match load_config(&args.pipeline) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Configuration error: {}", e);
            return 2;
        }
    };

    let path = args.path.clone().unwrap_or_else(|| PathBuf::from("."));
    let path = match path.canonicalize() {
        Ok(p) => p,
        Err(e) => {
            eprintln!("Cannot access {}: {}", path.display(), e);
            return 2;
        }
    };
    if !path.is_dir() {
        eprintln!("Not a directory: {}", path.display());
        return 2;
    }

    let controller = match build_controller(&config, !args.pipeline.no_deploy) {
        Ok(controller) => controller,
        Err(e) => {
            eprintln!("Failed to initialize pipeline: {}", e);
            return 2;
        }
    };

    let cancel = CancellationToken::new();
    spawn_ctrl_c(cancel.clone());

    let task = Task::local(project_name(&path), path);
    info!(task = %task.describe(), "Running pipeline");
    let result = controller.execute(&task, &cancel).await;

    let formatter = OutputFormatter::new(OutputFormat::from(args.format));
    let rendered = match formatter.format_result(&result) {
        Ok(s) => s,
        Err(e) => {
            eprintln!("Failed to format output: {}", e);
            return 1;
        }
    };

    if let Some(output) = &args.output {
        if let Err(e) = std::fs::write(output, &rendered) {
            eprintln!("Failed to write {}: {}", output.display(), e);
            return 1;
        }
        info!(path = %output.display(), "Result written");
    } else {
        print!("{}", rendered);
    }

    if result.is_success() {
        0
    } else {
        1
    }
}

pub async fn handle_worker(args: &WorkerArgs) -> i32 {
    let mut config = match load_config(&args.pipeline) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Configuration error: {}", e);
            return 2;
        }
    };
    if let Some(concurrency) = args.concurrency {
        config.concurrency = concurrency;
    }
    if let Some(url) = &args.api_url {
        config.api_base_url = url.clone();
    }
    if let Err(e) = config.validate() {
        eprintln!("Configuration error: {}", e);
        return 2;
    }

    match check_docker().await {
        Ok(info) => debug!(version = %info.version, "Docker available"),
        Err(e) => {
            error!(error = %format!("{:#}", e), "Container runtime unreachable");
            return 1;
        }
    }

    let controller = match build_controller(&config, !args.pipeline.no_deploy) {
        Ok(controller) => Arc::new(controller),
        Err(e) => {
            eprintln!("Failed to initialize pipeline: {}", e);
            return 2;
        }
    };

    let (source, reporter, once): (Arc<dyn TaskSource>, Arc<dyn Reporter>, bool) =
        if args.projects.is_empty() {
            match HttpTaskApi::new(config.api_base_url.clone(), API_TIMEOUT) {
                Ok(api) => {
                    let api = Arc::new(api);
                    (api.clone(), api, args.once)
                }
                Err(e) => {
                    eprintln!("Invalid task API: {}", e);
                    return 2;
                }
            }
        } else {
            let mut dirs = Vec::with_capacity(args.projects.len());
            for project in &args.projects {
                match project.canonicalize() {
                    Ok(dir) => dirs.push(dir),
                    Err(e) => {
                        eprintln!("Cannot access {}: {}", project.display(), e);
                        return 2;
                    }
                }
            }
            let reporter: Arc<dyn Reporter> = match &args.results_dir {
                Some(dir) => Arc::new(DirReporter::new(dir.clone())),
                None => Arc::new(StdoutReporter),
            };
            // A fixed list never refills, so the worker stops once it is drained.
            (Arc::new(LocalTaskSource::from_dirs(dirs)), reporter, true)
        };

    let worker = Worker::new(controller, source, reporter, config.worker_config(once));
    let shutdown = CancellationToken::new();
    spawn_ctrl_c(shutdown.clone());

    match worker.run(shutdown).await {
        Ok(summary) => {
            info!(
                completed = summary.completed(),
                failed = summary.failed,
                "All tasks handled"
            );
            0
        }
        Err(e) => {
            error!(error = %e, "Worker failed");
            1
        }
    }
}

pub async fn handle_classify(args: &ClassifyArgs) -> i32 {
    let message = if args.message == "-" {
        let mut buf = String::new();
        if let Err(e) = std::io::stdin().read_to_string(&mut buf) {
            eprintln!("Failed to read stdin: {}", e);
            return 2;
        }
        buf
    } else {
        args.message.clone()
    };

    let classification = Classification {
        classification: classify_failure(&message),
        message,
    };

    match OutputFormatter::new(OutputFormat::from(args.format)).format_classification(&classification) {
        Ok(s) => {
            print!("{}", s);
            0
        }
        Err(e) => {
            eprintln!("Failed to format output: {}", e);
            1
        }
    }
}

pub async fn handle_health(args: &HealthArgs) -> i32 {
    let config = match HealboxConfig::load() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Configuration error: {}", e);
            return 2;
        }
    };

    let mut health = BTreeMap::new();

    let docker = match check_docker().await {
        Ok(info) => HealthStatus::available(format!("Docker {} (API {})", info.version, info.api_version))
            .with_details(format!("{}/{}", info.os, info.arch)),
        Err(e) => HealthStatus::unavailable(format!("{:#}", e))
            .with_details("Builds and deployments need a reachable Docker daemon".to_string()),
    };
    health.insert("docker".to_string(), docker);
    health.insert("llm".to_string(), llm_health(&config, args.probe_llm).await);

    let all_available = health.values().all(|s| s.available);
    let formatter = OutputFormatter::new(OutputFormat::from(args.format));
    match formatter.format_health_with_config(&health, &config) {
        Ok(s) => print!("{}", s),
        Err(e) => {
            eprintln!("Failed to format output: {}", e);
            return 1;
        }
    }

    if all_available {
        0
    } else {
        1
    }
}

async fn llm_health(config: &HealboxConfig, probe: bool) -> HealthStatus {
    let client = match config.create_llm_client() {
        Ok(Some(client)) => client,
        Ok(None) => {
            return HealthStatus::available("LLM disabled".to_string())
                .with_details("Heuristic analyzer and rule fixer in use".to_string())
        }
        Err(e) => return HealthStatus::unavailable(e.to_string()),
    };

    let label = client.label();
    if !probe {
        return HealthStatus::available(format!("Configured: {}", label))
            .with_details("Use --probe-llm to send a test request".to_string());
    }

    let request = LLMRequest::new(vec![ChatMessage::user("Reply with the word OK.")])
        .with_max_tokens(8);
    match client.chat(request).await {
        Ok(response) => HealthStatus::available(format!("Reachable: {}", label)).with_details(
            format!("Answered in {}ms", response.response_time.as_millis()),
        ),
        Err(e) => HealthStatus::unavailable(format!("{} did not answer", label))
            .with_details(e.to_string()),
    }
}

/// Environment configuration with command-line overrides applied
fn load_config(args: &PipelineArgs) -> Result<HealboxConfig, ConfigError> {
    let mut config = HealboxConfig::load()?;
    apply_overrides(&mut config, args);
    config.validate()?;
    debug!(config = %config, "Configuration loaded");
    Ok(config)
}

fn apply_overrides(config: &mut HealboxConfig, args: &PipelineArgs) {
    match args.provider {
        Some(ProviderArg::Disabled) => config.provider = None,
        Some(ProviderArg::Llm(kind)) => {
            if config.provider != Some(kind) && args.model.is_none() {
                config.model = default_model(kind).to_string();
            }
            config.provider = Some(kind);
        }
        None => {}
    }
    if let Some(model) = &args.model {
        config.model = model.clone();
    }
    if let Some(n) = args.max_attempts {
        config.max_attempts = n;
    }
    if let Some(secs) = args.build_timeout {
        config.build_timeout_secs = secs;
    }
    if let Some(dir) = &args.work_dir {
        config.work_dir = dir.clone();
    }
    if args.discard_snapshots {
        config.keep_snapshots = false;
    }
    if let Some(port) = args.port {
        config.deploy_port = port;
    }
}

/// Wires the LLM-backed collaborators when a provider is configured, the
/// heuristic analyzer and rule fixer otherwise.
pub fn build_controller(
    config: &HealboxConfig,
    deploy: bool,
) -> Result<PipelineController, ConfigError> {
    let (analyzer, fixer): (Arc<dyn Analyzer>, Arc<dyn Fixer>) = match config.create_llm_client()? {
        Some(client) => {
            info!(backend = %client.label(), "Using LLM collaborators");
            (
                Arc::new(LlmAnalyzer::new(client.clone())),
                Arc::new(LlmFixer::new(client)),
            )
        }
        None => {
            info!("No LLM provider configured, using heuristic collaborators");
            (Arc::new(HeuristicAnalyzer::new()), Arc::new(RuleFixer::new()))
        }
    };

    let mut controller = PipelineController::new(
        analyzer,
        Arc::new(DockerCliRuntime::default()),
        fixer,
        config.pipeline_config(),
    )
    .with_progress(Arc::new(LoggingHandler));

    if deploy {
        controller = controller.with_deployer(Arc::new(
            DockerDeployer::new(config.deploy_port)
                .with_container_name(config.deploy_container.clone()),
        ));
    } else {
        debug!("Deployment disabled");
    }
    Ok(controller)
}

fn spawn_ctrl_c(token: CancellationToken) {
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                warn!("Interrupt received, cancelling");
                token.cancel();
            }
            Err(e) => debug!(error = %e, "Could not listen for Ctrl-C"),
        }
    });
}

fn project_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| "project".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use genai::adapter::AdapterKind;

    #[test]
    fn test_overrides_apply_over_config() {
        let mut config = HealboxConfig::default();
        let args = PipelineArgs {
            provider: Some(ProviderArg::Llm(AdapterKind::Ollama)),
            max_attempts: Some(3),
            build_timeout: Some(45),
            discard_snapshots: true,
            port: Some(9090),
            ..Default::default()
        };
        apply_overrides(&mut config, &args);

        assert_eq!(config.provider, Some(AdapterKind::Ollama));
        assert_eq!(config.model, default_model(AdapterKind::Ollama));
        assert_eq!(config.max_attempts, 3);
        assert_eq!(config.build_timeout_secs, 45);
        assert!(!config.keep_snapshots);
        assert_eq!(config.deploy_port, 9090);
    }

    #[test]
    fn test_explicit_model_wins() {
        let mut config = HealboxConfig::default();
        let args = PipelineArgs {
            provider: Some(ProviderArg::Llm(AdapterKind::Anthropic)),
            model: Some("claude-custom".to_string()),
            ..Default::default()
        };
        apply_overrides(&mut config, &args);
        assert_eq!(config.model, "claude-custom");
    }

    #[test]
    fn test_provider_can_be_disabled() {
        let mut config = HealboxConfig {
            provider: Some(AdapterKind::OpenAI),
            ..Default::default()
        };
        let args = PipelineArgs {
            provider: Some(ProviderArg::Disabled),
            ..Default::default()
        };
        apply_overrides(&mut config, &args);
        assert!(config.provider.is_none());
    }

    #[test]
    fn test_build_controller_without_llm() {
        let config = HealboxConfig::default();
        let controller = build_controller(&config, false).unwrap();
        assert_eq!(controller.config().max_attempts, config.max_attempts);
    }

    #[test]
    fn test_project_name() {
        assert_eq!(project_name(Path::new("/tmp/my-site")), "my-site");
        assert_eq!(project_name(Path::new("/")), "project");
    }

    #[tokio::test]
    async fn test_llm_health_when_disabled() {
        let status = llm_health(&HealboxConfig::default(), true).await;
        assert!(status.available);
        assert_eq!(status.message, "LLM disabled");
    }
}
