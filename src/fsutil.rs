//! Small filesystem helpers for listing and sizing installed packages.

use std::path::Path;
use walkdir::WalkDir;

/// Total size in bytes of all regular files under `dir`, symlinks
/// excluded. Unreadable entries are skipped rather than failing the
/// whole walk.
pub fn folder_size(dir: &Path) -> u64 {
    WalkDir::new(dir)
        .into_iter()
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.file_type().is_file())
        .filter_map(|entry| entry.metadata().ok())
        .map(|meta| meta.len())
        .sum()
}

/// Human-readable size: `0 B`, `1.50 KB`, `2.00 GB`, ...
pub fn format_size(size_bytes: u64) -> String {
    const UNITS: [&str; 5] = ["B", "KB", "MB", "GB", "TB"];

    if size_bytes == 0 {
        return "0 B".to_string();
    }

    let mut size = size_bytes as f64;
    let mut unit = 0;
    while size >= 1024.0 && unit < UNITS.len() - 1 {
        size /= 1024.0;
        unit += 1;
    }

    if unit == 0 {
        format!("{} {}", size_bytes, UNITS[unit])
    } else {
        format!("{:.2} {}", size, UNITS[unit])
    }
}

/// Whether `dir` exists and contains at least one entry.
pub fn dir_non_empty(dir: &Path) -> bool {
    std::fs::read_dir(dir)
        .map(|mut entries| entries.next().is_some())
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn test_folder_size_sums_nested_files() {
        let tmp = TempDir::new().unwrap();
        fs::write(tmp.path().join("a.bin"), vec![0u8; 100]).unwrap();
        fs::create_dir(tmp.path().join("sub")).unwrap();
        fs::write(tmp.path().join("sub/b.bin"), vec![0u8; 50]).unwrap();

        assert_eq!(folder_size(tmp.path()), 150);
        assert_eq!(folder_size(&tmp.path().join("missing")), 0);
    }

    #[test]
    fn test_format_size() {
        assert_eq!(format_size(0), "0 B");
        assert_eq!(format_size(512), "512 B");
        assert_eq!(format_size(1536), "1.50 KB");
        assert_eq!(format_size(2 * 1024 * 1024 * 1024), "2.00 GB");
    }

    #[test]
    fn test_dir_non_empty() {
        let tmp = TempDir::new().unwrap();
        assert!(!dir_non_empty(&tmp.path().join("missing")));

        let dir = tmp.path().join("pkg");
        fs::create_dir(&dir).unwrap();
        assert!(!dir_non_empty(&dir));

        fs::write(dir.join("f"), b"x").unwrap();
        assert!(dir_non_empty(&dir));
    }
}
