use clap::{Parser, Subcommand, ValueEnum};
use genai::adapter::AdapterKind;
use std::path::PathBuf;

/// Self-healing build and deploy pipeline
#[derive(Parser, Debug)]
#[command(
    name = "healbox",
    about = "Self-healing build and deploy pipeline for web projects",
    version,
    long_about = "healbox analyzes a project, builds it in a container, repairs failing builds \
                  automatically and deploys the result. Repairs come from deterministic rules or \
                  from an LLM (Ollama, OpenAI, Anthropic, Gemini, xAI, Groq)."
)]
pub struct CliArgs {
    #[command(subcommand)]
    pub command: Commands,

    #[arg(long, global = true, value_name = "LEVEL", help = "Set logging level")]
    pub log_level: Option<String>,

    #[arg(long, global = true, help = "Emit logs as JSON lines")]
    pub log_json: bool,

    #[arg(short = 'v', long, global = true, help = "Verbose logging")]
    pub verbose: bool,

    #[arg(
        short = 'q',
        long,
        global = true,
        conflicts_with = "verbose",
        help = "Quiet mode - only errors are logged"
    )]
    pub quiet: bool,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    #[command(
        about = "Build, repair and deploy one local project",
        long_about = "Runs the pipeline once over a project directory and prints the result.\n\n\
                      Examples:\n  \
                      healbox run ./my-site\n  \
                      healbox run ./api --no-deploy --format json\n  \
                      healbox run . --provider ollama --model qwen2.5-coder:7b"
    )]
    Run(RunArgs),

    #[command(
        about = "Process tasks from the build agent API",
        long_about = "Polls the task API, runs pipelines concurrently and reports every result.\n\n\
                      Examples:\n  \
                      healbox worker\n  \
                      healbox worker --once --concurrency 2\n  \
                      healbox worker --project ./a --project ./b --results-dir ./results"
    )]
    Worker(WorkerArgs),

    #[command(about = "Classify a failure message as USER_ERROR or SERVICE_ERROR")]
    Classify(ClassifyArgs),

    #[command(about = "Check Docker and LLM availability and show configuration")]
    Health(HealthArgs),
}

/// Options shared by commands that run pipelines
#[derive(Parser, Debug, Clone, Default)]
pub struct PipelineArgs {
    #[arg(
        short = 'p',
        long,
        value_parser = parse_provider_arg,
        help = "LLM provider ('none' disables LLM use)"
    )]
    pub provider: Option<ProviderArg>,

    #[arg(short = 'm', long, value_name = "MODEL", help = "Model name")]
    pub model: Option<String>,

    #[arg(long, value_name = "N", help = "Maximum build attempts per task")]
    pub max_attempts: Option<u32>,

    #[arg(long, value_name = "SECONDS", help = "Budget of one build attempt")]
    pub build_timeout: Option<u64>,

    #[arg(long, value_name = "DIR", help = "Directory for run data")]
    pub work_dir: Option<PathBuf>,

    #[arg(long, help = "Remove snapshots and attempt workspaces after the run")]
    pub discard_snapshots: bool,

    #[arg(long, help = "Build only, do not start a service")]
    pub no_deploy: bool,

    #[arg(long, value_name = "PORT", help = "Host port of the deployed service")]
    pub port: Option<u16>,
}

#[derive(Parser, Debug, Clone)]
pub struct RunArgs {
    #[arg(value_name = "PATH", help = "Project directory (defaults to current directory)")]
    pub path: Option<PathBuf>,

    #[command(flatten)]
    pub pipeline: PipelineArgs,

    #[arg(short = 'f', long, value_enum, default_value = "human", help = "Output format")]
    pub format: OutputFormatArg,

    #[arg(short = 'o', long, value_name = "FILE", help = "Write the result to a file")]
    pub output: Option<PathBuf>,
}

#[derive(Parser, Debug, Clone)]
pub struct WorkerArgs {
    #[command(flatten)]
    pub pipeline: PipelineArgs,

    #[arg(long, help = "Exit once no task is waiting")]
    pub once: bool,

    #[arg(short = 'c', long, value_name = "N", help = "Pipelines running at the same time")]
    pub concurrency: Option<usize>,

    #[arg(long, value_name = "URL", help = "Build agent API base URL")]
    pub api_url: Option<String>,

    #[arg(
        long = "project",
        value_name = "PATH",
        help = "Process local directories instead of polling the API (repeatable)"
    )]
    pub projects: Vec<PathBuf>,

    #[arg(
        long,
        value_name = "DIR",
        requires = "projects",
        help = "Write local results to DIR instead of stdout"
    )]
    pub results_dir: Option<PathBuf>,
}

#[derive(Parser, Debug, Clone)]
pub struct ClassifyArgs {
    #[arg(value_name = "MESSAGE", help = "Failure text ('-' reads stdin)")]
    pub message: String,

    #[arg(short = 'f', long, value_enum, default_value = "human", help = "Output format")]
    pub format: OutputFormatArg,
}

#[derive(Parser, Debug, Clone)]
pub struct HealthArgs {
    #[arg(long, help = "Send a short request to the configured LLM")]
    pub probe_llm: bool,

    #[arg(short = 'f', long, value_enum, default_value = "human", help = "Output format")]
    pub format: OutputFormatArg,
}

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormatArg {
    Json,
    Yaml,
    Human,
}

impl From<OutputFormatArg> for super::output::OutputFormat {
    fn from(arg: OutputFormatArg) -> Self {
        match arg {
            OutputFormatArg::Json => super::output::OutputFormat::Json,
            OutputFormatArg::Yaml => super::output::OutputFormat::Yaml,
            OutputFormatArg::Human => super::output::OutputFormat::Human,
        }
    }
}

/// Provider choice on the command line; `Disabled` is `--provider none`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProviderArg {
    Disabled,
    Llm(AdapterKind),
}

fn parse_provider_arg(s: &str) -> Result<ProviderArg, String> {
    let lower = s.to_lowercase();
    if lower == "none" || lower == "off" {
        return Ok(ProviderArg::Disabled);
    }
    AdapterKind::from_lower_str(&lower)
        .map(ProviderArg::Llm)
        .ok_or_else(|| {
            format!(
                "Invalid provider: {}. Valid options: ollama, openai, anthropic, gemini, xai, groq, none",
                s
            )
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_args_verify() {
        CliArgs::command().debug_assert();
    }

    #[test]
    fn test_run_defaults() {
        let args = CliArgs::parse_from(["healbox", "run"]);
        match args.command {
            Commands::Run(run) => {
                assert!(run.path.is_none());
                assert_eq!(run.format, OutputFormatArg::Human);
                assert!(run.pipeline.provider.is_none());
                assert!(!run.pipeline.no_deploy);
                assert!(run.output.is_none());
            }
            _ => panic!("Expected Run command"),
        }
    }

    #[test]
    fn test_run_with_options() {
        let args = CliArgs::parse_from([
            "healbox",
            "run",
            "/tmp/site",
            "--provider",
            "ollama",
            "--model",
            "qwen:14b",
            "--max-attempts",
            "3",
            "--build-timeout",
            "300",
            "--no-deploy",
            "--format",
            "json",
        ]);
        match args.command {
            Commands::Run(run) => {
                assert_eq!(run.path, Some(PathBuf::from("/tmp/site")));
                assert_eq!(
                    run.pipeline.provider,
                    Some(ProviderArg::Llm(AdapterKind::Ollama))
                );
                assert_eq!(run.pipeline.model.as_deref(), Some("qwen:14b"));
                assert_eq!(run.pipeline.max_attempts, Some(3));
                assert_eq!(run.pipeline.build_timeout, Some(300));
                assert!(run.pipeline.no_deploy);
                assert_eq!(run.format, OutputFormatArg::Json);
            }
            _ => panic!("Expected Run command"),
        }
    }

    #[test]
    fn test_worker_with_local_projects() {
        let args = CliArgs::parse_from([
            "healbox",
            "worker",
            "--once",
            "--project",
            "/a",
            "--project",
            "/b",
            "--results-dir",
            "/out",
        ]);
        match args.command {
            Commands::Worker(worker) => {
                assert!(worker.once);
                assert_eq!(worker.projects.len(), 2);
                assert_eq!(worker.results_dir, Some(PathBuf::from("/out")));
            }
            _ => panic!("Expected Worker command"),
        }
    }

    #[test]
    fn test_results_dir_requires_projects() {
        let result = CliArgs::try_parse_from(["healbox", "worker", "--results-dir", "/out"]);
        assert!(result.is_err());
    }

    #[test]
    fn test_classify_command() {
        let args = CliArgs::parse_from(["healbox", "classify", "Cannot find module 'x'"]);
        match args.command {
            Commands::Classify(classify) => assert_eq!(classify.message, "Cannot find module 'x'"),
            _ => panic!("Expected Classify command"),
        }
    }

    #[test]
    fn test_global_flags() {
        let args = CliArgs::parse_from(["healbox", "-v", "--log-json", "health"]);
        assert!(args.verbose);
        assert!(args.log_json);

        let args = CliArgs::parse_from(["healbox", "--log-level", "debug", "health"]);
        assert_eq!(args.log_level.as_deref(), Some("debug"));
    }

    #[test]
    fn test_provider_parsing() {
        assert_eq!(parse_provider_arg("none"), Ok(ProviderArg::Disabled));
        assert_eq!(
            parse_provider_arg("Anthropic"),
            Ok(ProviderArg::Llm(AdapterKind::Anthropic))
        );
        assert!(parse_provider_arg("invalid").is_err());
    }
}
