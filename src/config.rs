//! Configuration management for healbox
//!
//! Settings come from environment variables (a `.env` file in the working
//! directory is loaded first) with defaults for everything. Command-line
//! flags override individual values after loading.
//!
//! # Environment Variables
//!
//! - `HEALBOX_PROVIDER`: LLM provider (ollama|openai|anthropic|gemini|xai|groq|none) - default: none
//! - `HEALBOX_MODEL`: model name - default depends on the provider
//! - `HEALBOX_LLM_BASE_URL`: custom endpoint for the provider
//! - `HEALBOX_LLM_TIMEOUT`: seconds per LLM call - default: 60
//! - `HEALBOX_WORK_DIR`: parent of run directories - default: user cache dir + `healbox`
//! - `HEALBOX_MAX_ATTEMPTS`: attempt bound per task - default: 10
//! - `HEALBOX_BUILD_TIMEOUT`: seconds per build attempt - default: 120
//! - `HEALBOX_KEEP_SNAPSHOTS`: keep snapshots after a run (true|false) - default: true
//! - `HEALBOX_API_BASE_URL` (or `API_BASE_URL`): build agent API - default: http://localhost:3000
//! - `HEALBOX_DEPLOY_PORT`: host port of deployed services - default: 8080
//! - `HEALBOX_DEPLOY_CONTAINER`: deployed container name - default: healbox-web
//! - `HEALBOX_CONCURRENCY`: pipelines per worker - default: 1
//! - `HEALBOX_POLL_INTERVAL`: seconds between polls of an empty queue - default: 10
//! - `HEALBOX_LOG_LEVEL`: logging level - default: info
//!
//! Provider credentials are read by genai itself (`OPENAI_API_KEY`,
//! `ANTHROPIC_API_KEY`, `OLLAMA_HOST`, ...).

use genai::adapter::AdapterKind;
use std::collections::BTreeMap;
use std::env;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

use crate::deploy::DEFAULT_CONTAINER_NAME;
use crate::llm::{parse_provider, BackendError, GenAIClient, LLMClient};
use crate::pipeline::{PipelineConfig, WorkerConfig};

const DEFAULT_LOG_LEVEL: &str = "info";
const DEFAULT_API_BASE_URL: &str = "http://localhost:3000";
const DEFAULT_MAX_ATTEMPTS: u32 = 10;
const DEFAULT_BUILD_TIMEOUT_SECS: u64 = 120;
const DEFAULT_LLM_TIMEOUT_SECS: u64 = 60;
const DEFAULT_DEPLOY_PORT: u16 = 8080;
const DEFAULT_CONCURRENCY: usize = 1;
const DEFAULT_POLL_INTERVAL_SECS: u64 = 10;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Invalid provider: {0}. Valid options: ollama, openai, anthropic, gemini, xai, groq, none")]
    InvalidProvider(String),

    #[error("Configuration validation failed: {0}")]
    ValidationFailed(String),

    #[error("Failed to parse {field}: {error}")]
    ParseError { field: String, error: String },

    #[error("LLM client initialization failed: {0}")]
    BackendInitError(#[from] BackendError),
}

#[derive(Debug, Clone)]
pub struct HealboxConfig {
    /// LLM provider; `None` runs the heuristic analyzer and rule fixer only
    pub provider: Option<AdapterKind>,
    pub model: String,
    pub llm_base_url: Option<String>,
    pub llm_timeout_secs: u64,
    pub work_dir: PathBuf,
    pub max_attempts: u32,
    pub build_timeout_secs: u64,
    pub keep_snapshots: bool,
    pub api_base_url: String,
    pub deploy_port: u16,
    pub deploy_container: String,
    pub concurrency: usize,
    pub poll_interval_secs: u64,
    pub log_level: String,
}

impl Default for HealboxConfig {
    fn default() -> Self {
        Self {
            provider: None,
            model: String::new(),
            llm_base_url: None,
            llm_timeout_secs: DEFAULT_LLM_TIMEOUT_SECS,
            work_dir: default_work_dir(),
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            build_timeout_secs: DEFAULT_BUILD_TIMEOUT_SECS,
            keep_snapshots: true,
            api_base_url: DEFAULT_API_BASE_URL.to_string(),
            deploy_port: DEFAULT_DEPLOY_PORT,
            deploy_container: DEFAULT_CONTAINER_NAME.to_string(),
            concurrency: DEFAULT_CONCURRENCY,
            poll_interval_secs: DEFAULT_POLL_INTERVAL_SECS,
            log_level: DEFAULT_LOG_LEVEL.to_string(),
        }
    }
}

fn default_work_dir() -> PathBuf {
    dirs::cache_dir()
        .unwrap_or_else(env::temp_dir)
        .join("healbox")
}

/// Default model for a provider
pub fn default_model(provider: AdapterKind) -> &'static str {
    match provider {
        AdapterKind::Ollama => "qwen2.5-coder:7b",
        AdapterKind::Anthropic => "claude-3-haiku-20240307",
        AdapterKind::Gemini => "gemini-1.5-flash",
        AdapterKind::Groq => "llama-3.1-8b-instant",
        AdapterKind::Xai => "grok-beta",
        _ => "gpt-4o-mini",
    }
}

fn env_value(key: &str) -> Option<String> {
    env::var(key).ok().filter(|v| !v.trim().is_empty())
}

fn env_parse<T>(key: &str) -> Result<Option<T>, ConfigError>
where
    T: FromStr,
    T::Err: fmt::Display,
{
    match env_value(key) {
        Some(raw) => raw
            .trim()
            .parse::<T>()
            .map(Some)
            .map_err(|e| ConfigError::ParseError {
                field: key.to_string(),
                error: e.to_string(),
            }),
        None => Ok(None),
    }
}

impl HealboxConfig {
    /// Loads `.env` if present, then reads the environment.
    pub fn load() -> Result<Self, ConfigError> {
        let _ = dotenvy::dotenv();
        Self::from_env()
    }

    /// Reads `HEALBOX_*` variables over the defaults.
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = Self::default();

        if let Some(name) = env_value("HEALBOX_PROVIDER") {
            config.provider = match name.to_lowercase().as_str() {
                "none" | "off" => None,
                other => Some(
                    parse_provider(other).map_err(|_| ConfigError::InvalidProvider(name.clone()))?,
                ),
            };
        }
        config.model = env_value("HEALBOX_MODEL").unwrap_or_else(|| {
            config
                .provider
                .map(|p| default_model(p).to_string())
                .unwrap_or_default()
        });
        config.llm_base_url = env_value("HEALBOX_LLM_BASE_URL");

        if let Some(v) = env_parse("HEALBOX_LLM_TIMEOUT")? {
            config.llm_timeout_secs = v;
        }
        if let Some(dir) = env_value("HEALBOX_WORK_DIR") {
            config.work_dir = PathBuf::from(dir);
        }
        if let Some(v) = env_parse("HEALBOX_MAX_ATTEMPTS")? {
            config.max_attempts = v;
        }
        if let Some(v) = env_parse("HEALBOX_BUILD_TIMEOUT")? {
            config.build_timeout_secs = v;
        }
        if let Some(v) = env_parse("HEALBOX_KEEP_SNAPSHOTS")? {
            config.keep_snapshots = v;
        }
        if let Some(url) = env_value("HEALBOX_API_BASE_URL").or_else(|| env_value("API_BASE_URL")) {
            config.api_base_url = url;
        }
        if let Some(v) = env_parse("HEALBOX_DEPLOY_PORT")? {
            config.deploy_port = v;
        }
        if let Some(name) = env_value("HEALBOX_DEPLOY_CONTAINER") {
            config.deploy_container = name;
        }
        if let Some(v) = env_parse("HEALBOX_CONCURRENCY")? {
            config.concurrency = v;
        }
        if let Some(v) = env_parse("HEALBOX_POLL_INTERVAL")? {
            config.poll_interval_secs = v;
        }
        if let Some(level) = env_value("HEALBOX_LOG_LEVEL") {
            config.log_level = level.to_lowercase();
        }

        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_attempts == 0 {
            return Err(ConfigError::ValidationFailed(
                "Max attempts must be at least 1".to_string(),
            ));
        }
        if self.build_timeout_secs == 0 {
            return Err(ConfigError::ValidationFailed(
                "Build timeout must be at least 1 second".to_string(),
            ));
        }
        if self.llm_timeout_secs == 0 || self.llm_timeout_secs > 600 {
            return Err(ConfigError::ValidationFailed(
                "LLM timeout must be between 1 second and 10 minutes".to_string(),
            ));
        }
        if self.concurrency == 0 {
            return Err(ConfigError::ValidationFailed(
                "Concurrency must be at least 1".to_string(),
            ));
        }
        if self.deploy_port == 0 {
            return Err(ConfigError::ValidationFailed(
                "Deploy port must not be 0".to_string(),
            ));
        }
        if self.provider.is_some() && self.model.trim().is_empty() {
            return Err(ConfigError::ValidationFailed(
                "A model is required when a provider is set".to_string(),
            ));
        }
        if !self.api_base_url.starts_with("http://") && !self.api_base_url.starts_with("https://") {
            return Err(ConfigError::ValidationFailed(format!(
                "API base URL must be http(s): {}",
                self.api_base_url
            )));
        }

        match self.log_level.as_str() {
            "trace" | "debug" | "info" | "warn" | "error" => {}
            _ => {
                return Err(ConfigError::ValidationFailed(format!(
                    "Invalid log level: {}. Valid options: trace, debug, info, warn, error",
                    self.log_level
                )))
            }
        }

        Ok(())
    }

    pub fn build_timeout(&self) -> Duration {
        Duration::from_secs(self.build_timeout_secs)
    }

    pub fn llm_timeout(&self) -> Duration {
        Duration::from_secs(self.llm_timeout_secs)
    }

    pub fn pipeline_config(&self) -> PipelineConfig {
        PipelineConfig::new()
            .with_max_attempts(self.max_attempts)
            .with_build_timeout(self.build_timeout())
            .with_collaborator_timeout(self.llm_timeout())
            .with_work_dir(self.work_dir.clone())
            .with_keep_snapshots(self.keep_snapshots)
    }

    pub fn worker_config(&self, once: bool) -> WorkerConfig {
        WorkerConfig {
            concurrency: self.concurrency,
            poll_interval: Duration::from_secs(self.poll_interval_secs),
            once,
        }
    }

    /// LLM client for the configured provider, `None` when LLM use is off.
    /// The client's own timeout never exceeds the build budget.
    pub fn create_llm_client(&self) -> Result<Option<Arc<dyn LLMClient>>, ConfigError> {
        let Some(provider) = self.provider else {
            return Ok(None);
        };
        let timeout = self.llm_timeout().min(self.build_timeout());
        let client = GenAIClient::new(
            provider,
            self.model.clone(),
            timeout,
            self.llm_base_url.clone(),
        );
        Ok(Some(Arc::new(client)))
    }

    pub fn to_display_map(&self) -> BTreeMap<String, String> {
        let mut map = BTreeMap::new();

        map.insert(
            "provider".to_string(),
            self.provider
                .map(|p| p.as_str().to_string())
                .unwrap_or_else(|| "none".to_string()),
        );
        if self.provider.is_some() {
            map.insert("model".to_string(), self.model.clone());
        }
        if let Some(url) = &self.llm_base_url {
            map.insert("llm_base_url".to_string(), url.clone());
        }
        map.insert("llm_timeout_secs".to_string(), self.llm_timeout_secs.to_string());
        map.insert("work_dir".to_string(), self.work_dir.display().to_string());
        map.insert("max_attempts".to_string(), self.max_attempts.to_string());
        map.insert(
            "build_timeout_secs".to_string(),
            self.build_timeout_secs.to_string(),
        );
        map.insert("keep_snapshots".to_string(), self.keep_snapshots.to_string());
        map.insert("api_base_url".to_string(), self.api_base_url.clone());
        map.insert("deploy_port".to_string(), self.deploy_port.to_string());
        map.insert("deploy_container".to_string(), self.deploy_container.clone());
        map.insert("concurrency".to_string(), self.concurrency.to_string());
        map.insert(
            "poll_interval_secs".to_string(),
            self.poll_interval_secs.to_string(),
        );
        map.insert("log_level".to_string(), self.log_level.clone());

        map
    }
}

impl fmt::Display for HealboxConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Healbox Configuration:")?;
        for (key, value) in self.to_display_map() {
            writeln!(f, "  {}: {}", key, value)?;
        }
        Ok(())
    }
}
