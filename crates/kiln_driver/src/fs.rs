//! Filesystem helpers used while synchronizing output directories.

use std::collections::BTreeSet;
use std::io;
use std::path::{Path, PathBuf};

/// Every regular file below `root`, sorted. A missing root yields nothing.
pub(crate) fn walk_files(root: &Path) -> io::Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    if root.is_file() {
        files.push(root.to_path_buf());
    } else if root.is_dir() {
        walk_dir(root, &mut files)?;
    }
    files.sort();
    Ok(files)
}

fn walk_dir(dir: &Path, files: &mut Vec<PathBuf>) -> io::Result<()> {
    for entry in std::fs::read_dir(dir)? {
        let path = entry?.path();
        if path.is_dir() {
            walk_dir(&path, files)?;
        } else {
            files.push(path);
        }
    }
    Ok(())
}

/// Deletes a file. Returns `false` if it could not be deleted; a file that is
/// already gone counts as deleted.
pub(crate) fn delete_file(path: &Path) -> bool {
    match std::fs::remove_file(path) {
        Ok(()) => true,
        Err(e) if e.kind() == io::ErrorKind::NotFound => true,
        Err(e) => {
            tracing::warn!(path = %path.display(), error = %e, "could not delete file");
            false
        }
    }
}

/// Removes everything inside `dir`, keeping `dir` itself.
pub(crate) fn clear_dir(dir: &Path) -> io::Result<()> {
    let entries = match std::fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(()),
        Err(e) => return Err(e),
    };
    for entry in entries {
        let path = entry?.path();
        if path.is_dir() {
            std::fs::remove_dir_all(&path)?;
        } else {
            std::fs::remove_file(&path)?;
        }
    }
    Ok(())
}

/// Removes empty directories below each root. The roots themselves are kept.
pub(crate) fn prune_empty_dirs(roots: &BTreeSet<PathBuf>) {
    for root in roots {
        prune(root, roots);
    }
}

/// Returns `true` if `dir` was removed.
fn prune(dir: &Path, keep: &BTreeSet<PathBuf>) -> bool {
    let Ok(entries) = std::fs::read_dir(dir) else {
        return false;
    };
    let mut empty = true;
    for entry in entries.flatten() {
        let path = entry.path();
        if path.is_dir() {
            if !prune(&path, keep) {
                empty = false;
            }
        } else {
            empty = false;
        }
    }
    empty && !keep.contains(dir) && std::fs::remove_dir(dir).is_ok()
}
