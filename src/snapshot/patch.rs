use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fs;
use std::path::{Path, PathBuf};

use super::store::SnapshotError;
use crate::plan::is_safe_relative;

fn default_manifest() -> String {
    "package.json".to_string()
}

/// One change a fixer wants made to a snapshot
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum FilePatch {
    /// Create or overwrite a file
    WriteFile { path: String, contents: String },
    /// Remove a file if present
    DeleteFile { path: String },
    /// Add an entry to `dependencies` of a package manifest
    AddDependency {
        #[serde(default = "default_manifest")]
        manifest: String,
        name: String,
        version: String,
    },
    /// Set an entry of `scripts` in a package manifest
    SetScript {
        #[serde(default = "default_manifest")]
        manifest: String,
        name: String,
        command: String,
    },
}

impl FilePatch {
    /// Relative path this patch touches
    pub fn target(&self) -> &str {
        match self {
            FilePatch::WriteFile { path, .. } | FilePatch::DeleteFile { path } => path,
            FilePatch::AddDependency { manifest, .. } | FilePatch::SetScript { manifest, .. } => {
                manifest
            }
        }
    }

    pub fn describe(&self) -> String {
        match self {
            FilePatch::WriteFile { path, .. } => format!("write {}", path),
            FilePatch::DeleteFile { path } => format!("delete {}", path),
            FilePatch::AddDependency {
                manifest,
                name,
                version,
            } => format!("add dependency {}@{} to {}", name, version, manifest),
            FilePatch::SetScript {
                manifest,
                name,
                command,
            } => format!("set script '{}' = '{}' in {}", name, command, manifest),
        }
    }

    /// Applies the patch below `root`. Returns false when it was a no-op.
    pub(crate) fn apply(&self, root: &Path) -> Result<bool, SnapshotError> {
        let path = resolve(root, self.target())?;
        match self {
            FilePatch::WriteFile { contents, .. } => {
                if let Some(parent) = path.parent() {
                    fs::create_dir_all(parent).map_err(|e| SnapshotError::io(parent, e))?;
                }
                fs::write(&path, contents).map_err(|e| SnapshotError::io(&path, e))?;
                Ok(true)
            }
            FilePatch::DeleteFile { .. } => match fs::remove_file(&path) {
                Ok(()) => Ok(true),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
                Err(e) => Err(SnapshotError::io(&path, e)),
            },
            FilePatch::AddDependency { name, version, .. } => {
                edit_manifest(&path, "dependencies", |deps| {
                    if deps.contains_key(name) {
                        false
                    } else {
                        deps.insert(name.clone(), Value::String(version.clone()));
                        true
                    }
                })
            }
            FilePatch::SetScript { name, command, .. } => {
                edit_manifest(&path, "scripts", |scripts| {
                    let new = Value::String(command.clone());
                    if scripts.get(name) == Some(&new) {
                        false
                    } else {
                        scripts.insert(name.clone(), new);
                        true
                    }
                })
            }
        }
    }
}

fn resolve(root: &Path, relative: &str) -> Result<PathBuf, SnapshotError> {
    if relative.trim().is_empty() || !is_safe_relative(relative) {
        return Err(SnapshotError::PathEscape(relative.to_string()));
    }
    Ok(root.join(relative))
}

fn edit_manifest(
    path: &Path,
    section: &str,
    edit: impl FnOnce(&mut Map<String, Value>) -> bool,
) -> Result<bool, SnapshotError> {
    let invalid = |message: String| SnapshotError::InvalidManifest {
        path: path.to_path_buf(),
        message,
    };

    let content = fs::read_to_string(path).map_err(|e| SnapshotError::io(path, e))?;
    let mut manifest: Value =
        serde_json::from_str(&content).map_err(|e| invalid(e.to_string()))?;
    let object = manifest
        .as_object_mut()
        .ok_or_else(|| invalid("manifest is not a JSON object".to_string()))?;

    let entry = object
        .entry(section.to_string())
        .or_insert_with(|| Value::Object(Map::new()));
    let map = entry
        .as_object_mut()
        .ok_or_else(|| invalid(format!("'{}' is not an object", section)))?;

    if !edit(map) {
        return Ok(false);
    }

    let rendered = serde_json::to_string_pretty(&manifest).map_err(|e| invalid(e.to_string()))?;
    fs::write(path, rendered + "\n").map_err(|e| SnapshotError::io(path, e))?;
    Ok(true)
}
