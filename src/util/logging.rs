//! Structured logging setup
//!
//! Logs go to stderr so that command output on stdout stays machine
//! readable. `RUST_LOG` takes precedence over everything configured here.
//!
//! ```no_run
//! use healbox::util::logging::{init_logging, LoggingConfig};
//! use tracing::Level;
//!
//! init_logging(LoggingConfig::with_level(Level::DEBUG));
//! tracing::info!(task = "42", "Pipeline started");
//! ```

use std::env;
use std::sync::Once;
use tracing::Level;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

static INIT: Once = Once::new();

/// Noisy dependencies kept at warn unless `RUST_LOG` says otherwise
const QUIET_TARGETS: &[&str] = &["h2", "hyper", "hyper_util", "reqwest", "bollard", "genai"];

#[derive(Debug, Clone)]
pub struct LoggingConfig {
    /// Minimum level for healbox's own events
    pub level: Level,

    /// One JSON object per line, for log shippers
    pub use_json: bool,

    /// Include the module target (e.g. healbox::pipeline)
    pub include_target: bool,

    /// Include file and line number
    pub include_location: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: Level::INFO,
            use_json: false,
            include_target: true,
            include_location: false,
        }
    }
}

impl LoggingConfig {
    pub fn with_level(level: Level) -> Self {
        Self {
            level,
            ..Default::default()
        }
    }

    /// JSON output with source locations, for the long-running worker
    pub fn production() -> Self {
        Self {
            level: Level::INFO,
            use_json: true,
            include_target: true,
            include_location: true,
        }
    }

    pub fn json(mut self, use_json: bool) -> Self {
        self.use_json = use_json;
        self
    }
}

/// Parses a level name, case-insensitively. Unknown names fall back to INFO.
pub fn parse_level(level_str: &str) -> Level {
    match level_str.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => {
            eprintln!(
                "Invalid log level '{}', defaulting to INFO. Valid levels: trace, debug, info, warn, error",
                level_str
            );
            Level::INFO
        }
    }
}

fn build_filter(level: Level) -> EnvFilter {
    if env::var("RUST_LOG").is_ok() {
        return EnvFilter::from_default_env();
    }

    let mut filter = EnvFilter::new(Level::WARN.to_string());
    if let Ok(directive) = format!("healbox={}", level).parse() {
        filter = filter.add_directive(directive);
    }
    for target in QUIET_TARGETS {
        if let Ok(directive) = format!("{}=warn", target).parse() {
            filter = filter.add_directive(directive);
        }
    }
    filter
}

/// Installs the global subscriber. Only the first call has any effect.
pub fn init_logging(config: LoggingConfig) {
    INIT.call_once(|| {
        let filter = build_filter(config.level);

        if config.use_json {
            tracing_subscriber::registry()
                .with(filter)
                .with(
                    fmt::layer()
                        .json()
                        .with_writer(std::io::stderr)
                        .with_target(config.include_target)
                        .with_file(config.include_location)
                        .with_line_number(config.include_location),
                )
                .init();
        } else {
            tracing_subscriber::registry()
                .with(filter)
                .with(
                    fmt::layer()
                        .with_writer(std::io::stderr)
                        .with_target(config.include_target)
                        .with_file(config.include_location)
                        .with_line_number(config.include_location),
                )
                .init();
        }
    });
}

/// Reads `HEALBOX_LOG_LEVEL` and `HEALBOX_LOG_JSON`.
pub fn init_from_env() {
    let level = parse_level(&env::var("HEALBOX_LOG_LEVEL").unwrap_or_else(|_| "info".to_string()));
    let use_json = env::var("HEALBOX_LOG_JSON")
        .ok()
        .and_then(|v| v.parse::<bool>().ok())
        .unwrap_or(false);

    init_logging(LoggingConfig::with_level(level).json(use_json));
}
