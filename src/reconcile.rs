//! Install reconciliation: merging extracted content into the live game
//! directory.
//!
//! Directories replace same-named directories wholesale (the freshly
//! extracted package is always the complete latest version, so the old
//! subtree is removed, never merged). Files overwrite. The operation is
//! not transactional: a failure partway leaves the target in a mixed
//! state, which is an accepted limitation.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use tracing::debug;

/// A filesystem move/replace failure during reconciliation.
#[derive(Debug, thiserror::Error)]
#[error("Failed to install {path}: {source}")]
pub struct ReconcileError {
    pub path: PathBuf,
    #[source]
    pub source: io::Error,
}

/// Merge every top-level entry of `extracted_dir` into `target_dir`.
pub fn merge(extracted_dir: &Path, target_dir: &Path) -> Result<(), ReconcileError> {
    let wrap = |path: &Path| {
        let path = path.to_path_buf();
        move |source| ReconcileError { path, source }
    };

    fs::create_dir_all(target_dir).map_err(wrap(target_dir))?;

    let entries = fs::read_dir(extracted_dir).map_err(wrap(extracted_dir))?;
    for entry in entries {
        let entry = entry.map_err(wrap(extracted_dir))?;
        let src = entry.path();
        let dst = target_dir.join(entry.file_name());

        if src.is_dir() && dst.is_dir() {
            // Replace wholesale, never merge-recursive.
            debug!("Replacing existing directory {}", dst.display());
            fs::remove_dir_all(&dst).map_err(wrap(&dst))?;
        }

        move_entry(&src, &dst).map_err(wrap(&src))?;
    }

    Ok(())
}

/// Move one entry, falling back to copy-and-delete when the rename
/// crosses filesystems (temp workspaces usually live on a different
/// mount than the game directory).
fn move_entry(src: &Path, dst: &Path) -> io::Result<()> {
    match fs::rename(src, dst) {
        Ok(()) => Ok(()),
        Err(_) => {
            if src.is_dir() {
                copy_dir_recursive(src, dst)?;
                fs::remove_dir_all(src)
            } else {
                fs::copy(src, dst)?;
                fs::remove_file(src)
            }
        }
    }
}

fn copy_dir_recursive(src: &Path, dst: &Path) -> io::Result<()> {
    fs::create_dir_all(dst)?;
    for entry in fs::read_dir(src)? {
        let entry = entry?;
        let from = entry.path();
        let to = dst.join(entry.file_name());
        if from.is_dir() {
            copy_dir_recursive(&from, &to)?;
        } else {
            fs::copy(&from, &to)?;
        }
    }
    Ok(())
}
