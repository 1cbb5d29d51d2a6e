use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info, warn};

use super::copy::copy_tree;
use super::patch::FilePatch;

/// Entries never carried into a snapshot
const IMPORT_SKIP: &[&str] = &[".git"];

#[derive(Debug, Error)]
pub enum SnapshotError {
    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Source directory not found: {0}")]
    SourceNotFound(PathBuf),

    #[error("Patch path escapes the snapshot: {0}")]
    PathEscape(String),

    #[error("Cannot edit manifest {path}: {message}")]
    InvalidManifest { path: PathBuf, message: String },
}

impl SnapshotError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: io::Error) -> Self {
        SnapshotError::Io {
            path: path.into(),
            source,
        }
    }
}

/// Version number of a snapshot inside one store
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SnapshotId(pub u32);

impl fmt::Display for SnapshotId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "snap-{:03}", self.0)
    }
}

/// Reference to one immutable project tree
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProjectSnapshot {
    pub id: SnapshotId,
    pub root: PathBuf,
    pub parent: Option<SnapshotId>,
}

impl ProjectSnapshot {
    pub fn path(&self) -> &Path {
        &self.root
    }
}

/// Owns the physical storage of one pipeline's snapshots.
///
/// Each pipeline run gets its own store rooted in its own directory, so
/// concurrent runs never share snapshot paths. Clones share the id counter.
#[derive(Debug, Clone)]
pub struct SnapshotStore {
    root: PathBuf,
    next_id: Arc<AtomicU32>,
}

impl SnapshotStore {
    pub fn new(root: impl Into<PathBuf>) -> Result<Self, SnapshotError> {
        let root = root.into();
        fs::create_dir_all(&root).map_err(|e| SnapshotError::io(&root, e))?;
        Ok(Self {
            root,
            next_id: Arc::new(AtomicU32::new(0)),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Copies a task's source tree in as the first snapshot.
    pub fn import(&self, source: &Path) -> Result<ProjectSnapshot, SnapshotError> {
        if !source.is_dir() {
            return Err(SnapshotError::SourceNotFound(source.to_path_buf()));
        }
        let snapshot = self.materialize(source, None)?;
        info!(
            snapshot = %snapshot.id,
            source = %source.display(),
            "Imported project snapshot"
        );
        Ok(snapshot)
    }

    /// Deep-copies `snapshot` to a fresh location.
    ///
    /// The copy lands in a staging directory first and is renamed into place,
    /// so a failed fork never leaves a half-written snapshot behind.
    pub fn fork(&self, snapshot: &ProjectSnapshot) -> Result<ProjectSnapshot, SnapshotError> {
        let forked = self.materialize(&snapshot.root, Some(snapshot.id))?;
        debug!(from = %snapshot.id, to = %forked.id, "Forked snapshot");
        Ok(forked)
    }

    /// Applies patches to a freshly forked snapshot. Returns how many patches
    /// changed something.
    pub fn apply(
        &self,
        snapshot: &ProjectSnapshot,
        patches: &[FilePatch],
    ) -> Result<usize, SnapshotError> {
        let mut applied = 0;
        for patch in patches {
            if patch.apply(&snapshot.root)? {
                applied += 1;
            }
        }
        debug!(snapshot = %snapshot.id, applied, total = patches.len(), "Applied patches");
        Ok(applied)
    }

    /// Removes a snapshot that never became current, such as a fork whose
    /// patches failed to apply.
    pub fn discard(&self, snapshot: &ProjectSnapshot) {
        if !snapshot.root.starts_with(&self.root) {
            return;
        }
        if let Err(e) = fs::remove_dir_all(&snapshot.root) {
            if e.kind() != io::ErrorKind::NotFound {
                warn!(snapshot = %snapshot.id, error = %e, "Failed to discard snapshot");
            }
        }
    }

    /// Removes every snapshot owned by this store.
    pub fn cleanup(&self) {
        if let Err(e) = fs::remove_dir_all(&self.root) {
            if e.kind() != io::ErrorKind::NotFound {
                warn!(root = %self.root.display(), error = %e, "Failed to remove snapshots");
            }
        }
    }

    fn materialize(
        &self,
        source: &Path,
        parent: Option<SnapshotId>,
    ) -> Result<ProjectSnapshot, SnapshotError> {
        let id = SnapshotId(self.next_id.fetch_add(1, Ordering::SeqCst));
        let staging = self.root.join(format!(".staging-{}", id));
        let target = self.root.join(id.to_string());

        let result = copy_tree(source, &staging, IMPORT_SKIP)
            .and_then(|_| fs::rename(&staging, &target));

        if let Err(e) = result {
            let _ = fs::remove_dir_all(&staging);
            return Err(SnapshotError::io(&target, e));
        }

        Ok(ProjectSnapshot {
            id,
            root: target,
            parent,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn project() -> TempDir {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("package.json"), r#"{"name":"app"}"#).unwrap();
        fs::create_dir_all(dir.path().join("src")).unwrap();
        fs::write(dir.path().join("src/index.js"), "console.log(1)").unwrap();
        dir
    }

    #[test]
    fn test_import_copies_tree() {
        let source = project();
        let work = TempDir::new().unwrap();
        let store = SnapshotStore::new(work.path().join("snapshots")).unwrap();

        let snap = store.import(source.path()).unwrap();
        assert_eq!(snap.id, SnapshotId(0));
        assert!(snap.parent.is_none());
        assert!(snap.root.join("src/index.js").exists());
        assert_ne!(snap.root, source.path());
    }

    #[test]
    fn test_import_missing_source() {
        let work = TempDir::new().unwrap();
        let store = SnapshotStore::new(work.path()).unwrap();
        let result = store.import(&work.path().join("nope"));
        assert!(matches!(result, Err(SnapshotError::SourceNotFound(_))));
    }

    #[test]
    fn test_fork_yields_distinct_reference() {
        let source = project();
        let work = TempDir::new().unwrap();
        let store = SnapshotStore::new(work.path()).unwrap();

        let first = store.import(source.path()).unwrap();
        let second = store.fork(&first).unwrap();

        assert_ne!(first.id, second.id);
        assert_ne!(first.root, second.root);
        assert_eq!(second.parent, Some(first.id));
        assert_eq!(
            fs::read_to_string(second.root.join("package.json")).unwrap(),
            r#"{"name":"app"}"#
        );
    }

    #[test]
    fn test_apply_does_not_touch_parent() {
        let source = project();
        let work = TempDir::new().unwrap();
        let store = SnapshotStore::new(work.path()).unwrap();

        let first = store.import(source.path()).unwrap();
        let second = store.fork(&first).unwrap();
        let applied = store
            .apply(
                &second,
                &[FilePatch::WriteFile {
                    path: "src/index.js".to_string(),
                    contents: "fixed".to_string(),
                }],
            )
            .unwrap();

        assert_eq!(applied, 1);
        assert_eq!(
            fs::read_to_string(second.root.join("src/index.js")).unwrap(),
            "fixed"
        );
        assert_eq!(
            fs::read_to_string(first.root.join("src/index.js")).unwrap(),
            "console.log(1)"
        );
    }

    #[test]
    fn test_no_staging_left_behind() {
        let source = project();
        let work = TempDir::new().unwrap();
        let store = SnapshotStore::new(work.path()).unwrap();
        let snap = store.import(source.path()).unwrap();
        store.fork(&snap).unwrap();

        let leftovers: Vec<_> = fs::read_dir(work.path())
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_name().to_string_lossy().starts_with(".staging"))
            .collect();
        assert!(leftovers.is_empty());
    }

    #[test]
    fn test_cleanup_removes_root() {
        let source = project();
        let work = TempDir::new().unwrap();
        let root = work.path().join("snapshots");
        let store = SnapshotStore::new(&root).unwrap();
        store.import(source.path()).unwrap();
        store.cleanup();
        assert!(!root.exists());
    }

    #[test]
    fn test_snapshot_id_display() {
        assert_eq!(SnapshotId(7).to_string(), "snap-007");
    }
}
