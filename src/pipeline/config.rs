use std::path::PathBuf;
use std::time::Duration;

pub const DEFAULT_MAX_ATTEMPTS: u32 = 10;
pub const DEFAULT_BUILD_TIMEOUT: Duration = Duration::from_secs(120);
pub const DEFAULT_COLLABORATOR_TIMEOUT: Duration = Duration::from_secs(60);

#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Upper bound on BUILD attempts per task
    pub max_attempts: u32,
    /// Wall-clock budget of one BUILD
    pub build_timeout: Duration,
    /// Budget of one analyzer or fixer call
    pub collaborator_timeout: Duration,
    /// Budget of a git checkout
    pub checkout_timeout: Duration,
    /// Parent of every run directory
    pub work_dir: PathBuf,
    /// Keep snapshots and attempt workspaces after the run
    pub keep_snapshots: bool,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            build_timeout: DEFAULT_BUILD_TIMEOUT,
            collaborator_timeout: DEFAULT_COLLABORATOR_TIMEOUT,
            checkout_timeout: Duration::from_secs(300),
            work_dir: std::env::temp_dir().join("healbox"),
            keep_snapshots: true,
        }
    }
}

impl PipelineConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts.max(1);
        self
    }

    pub fn with_build_timeout(mut self, timeout: Duration) -> Self {
        self.build_timeout = timeout;
        self
    }

    pub fn with_collaborator_timeout(mut self, timeout: Duration) -> Self {
        self.collaborator_timeout = timeout;
        self
    }

    pub fn with_checkout_timeout(mut self, timeout: Duration) -> Self {
        self.checkout_timeout = timeout;
        self
    }

    pub fn with_work_dir(mut self, work_dir: impl Into<PathBuf>) -> Self {
        self.work_dir = work_dir.into();
        self
    }

    pub fn with_keep_snapshots(mut self, keep: bool) -> Self {
        self.keep_snapshots = keep;
        self
    }

    /// Analyzer and fixer calls never get more time than a build.
    pub fn effective_collaborator_timeout(&self) -> Duration {
        self.collaborator_timeout.min(self.build_timeout)
    }
}
