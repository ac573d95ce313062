//! External 7-Zip integration for multi-volume archives.
//!
//! Split archives (`.part1.bin` + `.part2.zip` style bundles) cannot be
//! reassembled by the native extractor, so the primary volume is handed
//! to the 7-Zip binary with overwrite-all semantics:
//!
//! `7z x <archive> -o<outputDir> -y -aoa`
//!
//! The binary is located by checking, in order: a copy bundled next to
//! the running executable, well-known install directories, and finally
//! the PATH.

use super::ExtractError;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;
use tracing::{debug, warn};

/// Hard wall-clock limit for one archiver invocation; the process is
/// killed once it elapses.
pub const ARCHIVER_TIMEOUT: Duration = Duration::from_secs(600);

/// Candidate binary names, bundled or installed.
const ARCHIVER_NAMES: &[&str] = &["7zz", "7za", "7z"];

/// Well-known install locations checked after the bundled copy.
fn well_known_dirs() -> Vec<PathBuf> {
    let mut dirs = vec![
        PathBuf::from("/usr/bin"),
        PathBuf::from("/usr/local/bin"),
        PathBuf::from("/opt/homebrew/bin"),
    ];
    for var in ["ProgramFiles", "ProgramFiles(x86)", "ProgramW6432"] {
        if let Ok(root) = std::env::var(var) {
            dirs.push(PathBuf::from(root).join("7-Zip"));
        }
    }
    dirs
}

/// Locate the external archiver binary.
pub fn locate_archiver() -> Result<PathBuf, ExtractError> {
    // Bundled copy next to the running application first.
    if let Ok(exe_path) = std::env::current_exe() {
        if let Some(exe_dir) = exe_path.parent() {
            for name in ARCHIVER_NAMES {
                for candidate in [exe_dir.join(name), exe_dir.join("bin").join(name)] {
                    if candidate.is_file() {
                        return Ok(candidate);
                    }
                }
            }
        }
    }

    for dir in well_known_dirs() {
        for name in ARCHIVER_NAMES {
            let candidate = dir.join(name);
            if candidate.is_file() {
                return Ok(candidate);
            }
            let candidate = dir.join(format!("{}.exe", name));
            if candidate.is_file() {
                return Ok(candidate);
            }
        }
    }

    for name in ARCHIVER_NAMES {
        if let Ok(path) = which::which(name) {
            return Ok(path);
        }
    }

    Err(ExtractError::ArchiverNotFound)
}

/// Extract a multi-volume archive set via its primary volume.
///
/// 7-Zip follows the remaining volumes automatically as long as they sit
/// next to the primary. Existing files in `output_dir` are overwritten.
pub async fn expand_volume_set(
    primary_archive: &Path,
    output_dir: &Path,
) -> Result<(), ExtractError> {
    let tool = locate_archiver()?;
    debug!(
        "Extracting {} -> {} via {}",
        primary_archive.display(),
        output_dir.display(),
        tool.display()
    );
    run_archiver(&tool, primary_archive, output_dir).await
}

async fn run_archiver(tool: &Path, archive: &Path, output_dir: &Path) -> Result<(), ExtractError> {
    tokio::fs::create_dir_all(output_dir).await?;

    let child = Command::new(tool)
        .arg("x")
        .arg(archive)
        .arg(format!("-o{}", output_dir.display()))
        .arg("-y")
        .arg("-aoa")
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()?;

    let output = match tokio::time::timeout(ARCHIVER_TIMEOUT, child.wait_with_output()).await {
        Ok(result) => result?,
        Err(_) => {
            // kill_on_drop reaps the stuck process.
            warn!(
                "Archiver exceeded {}s on {}, killing",
                ARCHIVER_TIMEOUT.as_secs(),
                archive.display()
            );
            return Err(ExtractError::Timeout);
        }
    };

    if output.status.success() {
        return Ok(());
    }

    let stderr = String::from_utf8_lossy(&output.stderr);
    let diagnostic = if stderr.trim().is_empty() {
        String::from_utf8_lossy(&output.stdout).trim().to_string()
    } else {
        stderr.trim().to_string()
    };

    Err(ExtractError::Tool {
        code: output.status.code().unwrap_or(-1),
        stderr: diagnostic,
    })
}
