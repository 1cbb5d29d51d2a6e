//! Recursive directory copy used for forks, build workspaces and artifacts

use std::fs;
use std::io;
use std::path::Path;
use walkdir::WalkDir;

/// Copies `src` into `dst` (created if missing), skipping any entry whose
/// file name is listed in `skip`. Symlinks are recreated, not followed.
pub fn copy_tree(src: &Path, dst: &Path, skip: &[&str]) -> io::Result<u64> {
    fs::create_dir_all(dst)?;
    let mut copied = 0;

    let walker = WalkDir::new(src)
        .follow_links(false)
        .min_depth(1)
        .into_iter()
        .filter_entry(|entry| {
            let name = entry.file_name().to_string_lossy();
            !skip.iter().any(|s| *s == name)
        });

    for entry in walker {
        let entry = entry.map_err(io::Error::other)?;
        let relative = entry
            .path()
            .strip_prefix(src)
            .map_err(io::Error::other)?;
        let target = dst.join(relative);
        let file_type = entry.file_type();

        if file_type.is_dir() {
            fs::create_dir_all(&target)?;
        } else if file_type.is_symlink() {
            copy_symlink(entry.path(), &target)?;
        } else {
            if let Some(parent) = target.parent() {
                fs::create_dir_all(parent)?;
            }
            fs::copy(entry.path(), &target)?;
            copied += 1;
        }
    }

    Ok(copied)
}

#[cfg(unix)]
fn copy_symlink(link: &Path, target: &Path) -> io::Result<()> {
    let pointee = fs::read_link(link)?;
    if let Some(parent) = target.parent() {
        fs::create_dir_all(parent)?;
    }
    std::os::unix::fs::symlink(pointee, target)
}

#[cfg(not(unix))]
fn copy_symlink(link: &Path, target: &Path) -> io::Result<()> {
    if link.is_file() {
        fs::copy(link, target)?;
    }
    Ok(())
}

/// True when the path is a directory with at least one entry.
pub fn is_non_empty_dir(path: &Path) -> bool {
    fs::read_dir(path)
        .map(|mut entries| entries.next().is_some())
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_copy_tree_nested() {
        let src = TempDir::new().unwrap();
        let dst = TempDir::new().unwrap();
        fs::create_dir_all(src.path().join("a/b")).unwrap();
        fs::write(src.path().join("a/b/file.txt"), "hello").unwrap();
        fs::write(src.path().join("top.txt"), "top").unwrap();

        let copied = copy_tree(src.path(), &dst.path().join("out"), &[]).unwrap();
        assert_eq!(copied, 2);
        assert_eq!(
            fs::read_to_string(dst.path().join("out/a/b/file.txt")).unwrap(),
            "hello"
        );
    }

    #[test]
    fn test_copy_tree_skips_names() {
        let src = TempDir::new().unwrap();
        let dst = TempDir::new().unwrap();
        fs::create_dir_all(src.path().join(".git")).unwrap();
        fs::write(src.path().join(".git/HEAD"), "ref").unwrap();
        fs::write(src.path().join("index.html"), "<html>").unwrap();

        copy_tree(src.path(), dst.path(), &[".git"]).unwrap();
        assert!(!dst.path().join(".git").exists());
        assert!(dst.path().join("index.html").exists());
    }

    #[test]
    fn test_is_non_empty_dir() {
        let dir = TempDir::new().unwrap();
        assert!(!is_non_empty_dir(dir.path()));
        assert!(!is_non_empty_dir(&dir.path().join("missing")));
        fs::write(dir.path().join("x"), "").unwrap();
        assert!(is_non_empty_dir(dir.path()));
    }
}
