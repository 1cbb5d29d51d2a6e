use async_trait::async_trait;
use std::collections::VecDeque;
use std::path::PathBuf;
use std::sync::Mutex;
use tracing::info;

use super::{ReportError, Reporter, Task, TaskSource, TaskSourceError};
use crate::pipeline::PipelineResult;

/// Fixed list of tasks, handed out once each
#[derive(Debug, Default)]
pub struct LocalTaskSource {
    tasks: Mutex<VecDeque<Task>>,
}

impl LocalTaskSource {
    pub fn new(tasks: Vec<Task>) -> Self {
        Self {
            tasks: Mutex::new(tasks.into()),
        }
    }

    /// One task per directory, named after the directory
    pub fn from_dirs(dirs: impl IntoIterator<Item = PathBuf>) -> Self {
        let tasks = dirs
            .into_iter()
            .map(|dir| {
                let name = dir
                    .file_name()
                    .map(|n| n.to_string_lossy().to_string())
                    .unwrap_or_else(|| "project".to_string());
                Task::local(name, dir)
            })
            .collect();
        Self::new(tasks)
    }

    pub fn remaining(&self) -> usize {
        self.tasks.lock().map(|q| q.len()).unwrap_or(0)
    }
}

#[async_trait]
impl TaskSource for LocalTaskSource {
    async fn next(&self) -> Result<Option<Task>, TaskSourceError> {
        let mut tasks = self
            .tasks
            .lock()
            .map_err(|_| TaskSourceError::Configuration("task queue poisoned".to_string()))?;
        Ok(tasks.pop_front())
    }

    fn name(&self) -> &str {
        "local"
    }
}

/// Prints each result as one JSON line on stdout
#[derive(Debug, Default, Clone, Copy)]
pub struct StdoutReporter;

#[async_trait]
impl Reporter for StdoutReporter {
    async fn submit(&self, _task: &Task, result: &PipelineResult) -> Result<(), ReportError> {
        println!("{}", serde_json::to_string(result)?);
        Ok(())
    }
}

/// Writes `<task id>.json` per result into a directory
#[derive(Debug, Clone)]
pub struct DirReporter {
    dir: PathBuf,
}

impl DirReporter {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }
}

#[async_trait]
impl Reporter for DirReporter {
    async fn submit(&self, task: &Task, result: &PipelineResult) -> Result<(), ReportError> {
        tokio::fs::create_dir_all(&self.dir).await?;
        let file_name: String = task
            .id
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
            .collect();
        let path = self.dir.join(format!("{}.json", file_name));
        tokio::fs::write(&path, serde_json::to_vec_pretty(result)?).await?;
        info!(task = %task.id, path = %path.display(), "Wrote result");
        Ok(())
    }
}
