//! Last-resort crash reporting.
//!
//! Pipeline failures are handled per job and never bring the process
//! down. Anything that escapes to the outermost boundary (a panic, or
//! an error bubbling out of main) gets its full diagnostic context
//! written to a timestamped crash log before the process exits; that is
//! the only fatal path.

use std::backtrace::Backtrace;
use std::fs;
use std::path::{Path, PathBuf};

/// Directory for crash and install-failure logs, relative to the
/// working directory.
pub const LOG_DIR: &str = "logs";

/// Write a crash log and return its path. Best effort: returns None if
/// even the log write fails.
pub fn write_crash_log(log_dir: &Path, detail: &str) -> Option<PathBuf> {
    let timestamp = chrono::Local::now().format("%Y-%m-%d_%H-%M-%S");
    let path = log_dir.join(format!("crash_log_{}.txt", timestamp));

    let record = format!(
        "dlcforge v{} crash log - {}\nOS: {} {}\n{}\n{}\n",
        env!("CARGO_PKG_VERSION"),
        timestamp,
        std::env::consts::OS,
        std::env::consts::ARCH,
        "-".repeat(50),
        detail,
    );

    fs::create_dir_all(log_dir).ok()?;
    fs::write(&path, record).ok()?;
    Some(path)
}

/// Install a panic hook that persists the panic message, location and
/// backtrace before the default hook runs.
pub fn install_panic_hook(log_dir: PathBuf) {
    let default_hook = std::panic::take_hook();
    std::panic::set_hook(Box::new(move |info| {
        let message = info
            .payload()
            .downcast_ref::<&str>()
            .map(|s| s.to_string())
            .or_else(|| info.payload().downcast_ref::<String>().cloned())
            .unwrap_or_else(|| "unknown panic payload".to_string());
        let location = info
            .location()
            .map(|l| l.to_string())
            .unwrap_or_else(|| "unknown location".to_string());

        let detail = format!(
            "panic at {}: {}\n\nBacktrace:\n{}",
            location,
            message,
            Backtrace::force_capture()
        );

        if let Some(path) = write_crash_log(&log_dir, &detail) {
            eprintln!("Crash log written to {}", path.display());
        }
        default_hook(info);
    }));
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_write_crash_log_records_context() {
        let tmp = TempDir::new().unwrap();
        let log_dir = tmp.path().join("logs");

        let path = write_crash_log(&log_dir, "something went sideways").unwrap();
        let record = fs::read_to_string(&path).unwrap();

        assert!(record.contains("crash log"));
        assert!(record.contains(std::env::consts::OS));
        assert!(record.contains("something went sideways"));
    }
}
