use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};
use uuid::Uuid;

/// Directory layout of one pipeline run, derived from its run id:
///
/// ```text
/// <work_dir>/runs/<run_id>/
///     source/            checkout of the task's repository
///     snapshots/         snapshot store
///     attempt-<n>/       scratch workspace and container definition
///     artifact/          canonical output location
/// ```
#[derive(Debug, Clone)]
pub struct RunWorkspace {
    run_id: Uuid,
    root: PathBuf,
}

impl RunWorkspace {
    pub fn create(work_dir: &Path, run_id: Uuid) -> io::Result<Self> {
        let root = work_dir.join("runs").join(run_id.to_string());
        fs::create_dir_all(&root)?;
        Ok(Self { run_id, root })
    }

    pub fn run_id(&self) -> Uuid {
        self.run_id
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn source_dir(&self) -> PathBuf {
        self.root.join("source")
    }

    pub fn snapshots_dir(&self) -> PathBuf {
        self.root.join("snapshots")
    }

    pub fn attempt_dir(&self, attempt: u32) -> PathBuf {
        self.root.join(format!("attempt-{}", attempt))
    }

    pub fn attempt_workspace(&self, attempt: u32) -> PathBuf {
        self.attempt_dir(attempt).join("workspace")
    }

    pub fn artifact_dir(&self) -> PathBuf {
        self.root.join("artifact")
    }

    /// Removes checkouts, snapshots and attempt directories. The artifact and
    /// anything under `preserve` stay; a deployed service may be reading them.
    pub fn cleanup(&self, preserve: Option<&Path>) {
        let entries = match fs::read_dir(&self.root) {
            Ok(entries) => entries,
            Err(e) => {
                debug!(root = %self.root.display(), error = %e, "Nothing to clean up");
                return;
            }
        };

        let artifact = self.artifact_dir();
        for entry in entries.flatten() {
            let path = entry.path();
            if path == artifact {
                continue;
            }
            if let Some(keep) = preserve {
                if keep.starts_with(&path) {
                    continue;
                }
            }
            let result = if path.is_dir() {
                fs::remove_dir_all(&path)
            } else {
                fs::remove_file(&path)
            };
            if let Err(e) = result {
                warn!(path = %path.display(), error = %e, "Failed to remove run directory");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_layout_derives_from_run_id() {
        let dir = TempDir::new().unwrap();
        let id = Uuid::new_v4();
        let run = RunWorkspace::create(dir.path(), id).unwrap();

        assert!(run.root().ends_with(id.to_string()));
        assert_eq!(run.attempt_workspace(3), run.root().join("attempt-3/workspace"));
        assert_ne!(
            RunWorkspace::create(dir.path(), Uuid::new_v4()).unwrap().root(),
            run.root()
        );
    }

    #[test]
    fn test_cleanup_keeps_artifact_and_preserved_workspace() {
        let dir = TempDir::new().unwrap();
        let run = RunWorkspace::create(dir.path(), Uuid::new_v4()).unwrap();
        for path in [
            run.snapshots_dir(),
            run.artifact_dir(),
            run.attempt_workspace(1),
            run.attempt_workspace(2),
        ] {
            fs::create_dir_all(&path).unwrap();
        }

        let keep = run.attempt_workspace(2);
        run.cleanup(Some(&keep));

        assert!(run.artifact_dir().exists());
        assert!(keep.exists());
        assert!(!run.snapshots_dir().exists());
        assert!(!run.attempt_dir(1).exists());
    }
}
