pub mod commands;
pub mod handlers;
pub mod output;

pub use commands::{CliArgs, ClassifyArgs, Commands, HealthArgs, RunArgs, WorkerArgs};
pub use handlers::{build_controller, handle_classify, handle_health, handle_run, handle_worker};
pub use output::{Classification, HealthStatus, OutputFormat, OutputFormatter};
