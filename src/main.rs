use healbox::cli::commands::{CliArgs, Commands};
use healbox::cli::handlers::{handle_classify, handle_health, handle_run, handle_worker};
use healbox::util::logging::{init_logging, parse_level, LoggingConfig};
use healbox::VERSION;

use clap::Parser;
use std::env;
use tracing::{debug, Level};

#[tokio::main]
async fn main() {
    let _ = dotenvy::dotenv();
    let args = CliArgs::parse();
    init_logging_from_args(&args);

    debug!("healbox v{} starting", VERSION);
    debug!("Arguments: {:?}", args);

    let exit_code = match &args.command {
        Commands::Run(run_args) => handle_run(run_args).await,
        Commands::Worker(worker_args) => handle_worker(worker_args).await,
        Commands::Classify(classify_args) => handle_classify(classify_args).await,
        Commands::Health(health_args) => handle_health(health_args).await,
    };

    std::process::exit(exit_code);
}

fn init_logging_from_args(args: &CliArgs) {
    let level = if let Some(level_str) = &args.log_level {
        parse_level(level_str)
    } else if args.verbose {
        Level::DEBUG
    } else if args.quiet {
        Level::ERROR
    } else {
        parse_level(&env::var("HEALBOX_LOG_LEVEL").unwrap_or_else(|_| "info".to_string()))
    };

    let use_json = args.log_json
        || env::var("HEALBOX_LOG_JSON")
            .ok()
            .and_then(|v| v.parse::<bool>().ok())
            .unwrap_or(false);

    init_logging(LoggingConfig::with_level(level).json(use_json));
}
