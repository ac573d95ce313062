//! Archive expansion.
//!
//! Single archives are extracted natively with the zip crate. Multi-volume
//! sets (and nested archives found inside them) are delegated to the
//! external 7-Zip binary, which the zip crate cannot handle; see
//! [`sevenzip`].

pub mod sevenzip;

pub use sevenzip::{expand_volume_set, locate_archiver};

use std::fs::File;
use std::path::{Path, PathBuf};

/// Extensions treated as nested archives inside an extracted volume set.
const ARCHIVE_EXTENSIONS: &[&str] = &["zip", "rar", "7z", "tar", "gz"];

/// Extensionless files above this size are assumed to be archives that
/// lost their extension in packaging (100 MB).
pub const NESTED_SIZE_THRESHOLD: u64 = 100_000_000;

/// Archive expansion failures.
#[derive(Debug, thiserror::Error)]
pub enum ExtractError {
    #[error(
        "7-Zip not found. Install 7-Zip (https://7-zip.org) or place the \
         7zz binary next to the application."
    )]
    ArchiverNotFound,

    #[error("Archiver exited with code {code}: {stderr}")]
    Tool { code: i32, stderr: String },

    #[error("Archiver timed out and was killed")]
    Timeout,

    #[error("Corrupt ZIP archive: {0}")]
    ZipCorrupt(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Extract a single ZIP archive into `output_dir` using the native
/// extractor. Multi-volume sets must go through [`expand_volume_set`].
pub fn expand_simple(archive_path: &Path, output_dir: &Path) -> Result<(), ExtractError> {
    std::fs::create_dir_all(output_dir)?;

    let file = File::open(archive_path)?;
    let mut archive =
        zip::ZipArchive::new(file).map_err(|e| ExtractError::ZipCorrupt(e.to_string()))?;

    archive
        .extract(output_dir)
        .map_err(|e| ExtractError::ZipCorrupt(e.to_string()))
}

/// Find nested archives among the top-level files of an extracted tree.
///
/// A file counts as a nested archive if its extension is a known archive
/// format, or if it has no extension but exceeds the size threshold.
/// Directories are never nested archives.
pub fn find_nested_archives(dir: &Path) -> Result<Vec<PathBuf>, ExtractError> {
    find_nested_archives_with_threshold(dir, NESTED_SIZE_THRESHOLD)
}

pub(crate) fn find_nested_archives_with_threshold(
    dir: &Path,
    size_threshold: u64,
) -> Result<Vec<PathBuf>, ExtractError> {
    let mut nested = Vec::new();

    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        let path = entry.path();
        if !path.is_file() {
            continue;
        }

        match path.extension().and_then(|e| e.to_str()) {
            Some(ext) => {
                if ARCHIVE_EXTENSIONS.contains(&ext.to_ascii_lowercase().as_str()) {
                    nested.push(path);
                }
            }
            None => {
                if entry.metadata()?.len() > size_threshold {
                    nested.push(path);
                }
            }
        }
    }

    nested.sort();
    Ok(nested)
}
