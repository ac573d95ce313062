//! Package installation pipeline.
//!
//! One [`PackageInstallJob`] runs one package through
//! download -> extract -> reconcile:
//!
//! - Single-part packages download to a temp file and extract natively
//!   straight into the game directory.
//! - Multi-part packages download every volume into a per-package temp
//!   workspace, drive the external archiver off the primary `.zip`
//!   volume, expand any nested archives directly into the game
//!   directory, and otherwise reconcile the extracted tree in.
//!
//! Every failure path produces a structured error record (package id,
//! stage, detail) on the event bus and in a durable per-failure log
//! file, and the job emits its terminal `Completed` event exactly once
//! so the queue can release its one-at-a-time slot.

pub mod queue;

pub use queue::InstallQueue;

use crate::archive;
use crate::catalog::PackageDescriptor;
use crate::events::{EventBus, PipelineEvent};
use crate::reconcile;
use crate::transport::{self, CancelFlag, HttpClient, ProgressFn, TransferError};
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, warn};

/// Pipeline stage of an install job. Any stage can fail; cancellation
/// only lands while pending or downloading.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobStage {
    Pending,
    Downloading,
    Extracting,
    Reconciling,
    Done,
    Failed,
    Cancelled,
}

impl fmt::Display for JobStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            JobStage::Pending => "pending",
            JobStage::Downloading => "downloading",
            JobStage::Extracting => "extracting",
            JobStage::Reconciling => "reconciling",
            JobStage::Done => "done",
            JobStage::Failed => "failed",
            JobStage::Cancelled => "cancelled",
        };
        f.write_str(label)
    }
}

/// Internal failure record carried to the reporting boundary.
struct JobFailure {
    stage: JobStage,
    detail: String,
    cancelled: bool,
}

impl JobFailure {
    fn new(stage: JobStage, detail: impl Into<String>) -> Self {
        Self {
            stage,
            detail: detail.into(),
            cancelled: false,
        }
    }

    fn cancelled() -> Self {
        Self {
            stage: JobStage::Cancelled,
            detail: "cancelled".into(),
            cancelled: true,
        }
    }

    fn from_transfer(e: TransferError, detail: String) -> Self {
        if matches!(e, TransferError::Cancelled) {
            Self::cancelled()
        } else {
            Self::new(JobStage::Downloading, detail)
        }
    }
}

/// One package installation attempt.
pub struct PackageInstallJob {
    descriptor: PackageDescriptor,
    game_path: PathBuf,
    client: Arc<HttpClient>,
    bus: Arc<EventBus>,
    log_dir: PathBuf,
    temp_root: PathBuf,
}

impl PackageInstallJob {
    pub fn new(
        descriptor: PackageDescriptor,
        game_path: PathBuf,
        client: Arc<HttpClient>,
        bus: Arc<EventBus>,
        log_dir: PathBuf,
    ) -> Self {
        Self {
            descriptor,
            game_path,
            client,
            bus,
            log_dir,
            temp_root: std::env::temp_dir(),
        }
    }

    /// Override the temp root (used by tests).
    pub fn with_temp_root(mut self, temp_root: PathBuf) -> Self {
        self.temp_root = temp_root;
        self
    }

    /// Run the job to completion. Emits `Completed` exactly once,
    /// regardless of outcome, and returns whether the install succeeded.
    pub async fn run(&self, cancel: &CancelFlag) -> bool {
        let dlc_id = self.descriptor.dlc_id.clone();
        info!("Installing {} ({})", dlc_id, self.descriptor.name);

        let result = if self.descriptor.is_multi_part() {
            self.install_multi_part(cancel).await
        } else {
            self.install_single_part(cancel).await
        };

        let success = match result {
            Ok(()) => {
                info!("Installed {}", dlc_id);
                true
            }
            Err(failure) if failure.cancelled => {
                info!("Install of {} cancelled", dlc_id);
                false
            }
            Err(failure) => {
                let message = format!(
                    "[{}] {} failed: {}",
                    dlc_id, failure.stage, failure.detail
                );
                warn!("{}", message);
                self.write_failure_log(failure.stage, &failure.detail);
                self.bus.emit(PipelineEvent::Error {
                    dlc_id: dlc_id.clone(),
                    message,
                });
                false
            }
        };

        self.bus.emit(PipelineEvent::Completed { dlc_id, success });
        success
    }

    fn progress_fn(&self, part_index: usize, total_parts: usize) -> ProgressFn {
        let bus = self.bus.clone();
        let dlc_id = self.descriptor.dlc_id.clone();
        Box::new(move |percent, bytes, total| {
            bus.emit(PipelineEvent::Progress {
                dlc_id: dlc_id.clone(),
                percent: overall_percent(part_index, total_parts, percent),
                bytes_downloaded: bytes,
                total_bytes: total,
            });
        })
    }

    /// Single source: download to a temp file, extract natively straight
    /// into the game directory, drop the temp file.
    async fn install_single_part(&self, cancel: &CancelFlag) -> Result<(), JobFailure> {
        let url = self
            .descriptor
            .urls
            .first()
            .ok_or_else(|| JobFailure::new(JobStage::Pending, "no source URL in catalog"))?;

        let temp_path = self
            .temp_root
            .join(format!("{}.zip", self.descriptor.dlc_id));

        let progress = self.progress_fn(0, 1);
        transport::fetch(&self.client, url, &temp_path, true, cancel, Some(&progress))
            .await
            .map_err(|e| {
                let detail = format!("download failed: {}", e);
                JobFailure::from_transfer(e, detail)
            })?;

        archive::expand_simple(&temp_path, &self.game_path)
            .map_err(|e| JobFailure::new(JobStage::Extracting, e.to_string()))?;

        if let Err(e) = fs::remove_file(&temp_path) {
            warn!("Failed to remove temp file {}: {}", temp_path.display(), e);
        }

        Ok(())
    }

    /// Multi-volume bundle: sequential part downloads into a dedicated
    /// workspace, external archiver on the primary volume, nested-archive
    /// expansion or reconcile into the game directory.
    ///
    /// Cleanup is asymmetric: a failed part download keeps the workspace
    /// so cached parts survive a manual retry, while an extraction
    /// failure deletes it entirely.
    async fn install_multi_part(&self, cancel: &CancelFlag) -> Result<(), JobFailure> {
        let workspace = self.workspace_dir();
        fs::create_dir_all(&workspace)
            .map_err(|e| JobFailure::new(JobStage::Downloading, e.to_string()))?;

        let total_parts = self.descriptor.urls.len();
        let mut parts = Vec::with_capacity(total_parts);

        for (index, url) in self.descriptor.urls.iter().enumerate() {
            let part_path = workspace.join(part_filename(url));
            let progress = self.progress_fn(index, total_parts);

            transport::fetch(&self.client, url, &part_path, true, cancel, Some(&progress))
                .await
                .map_err(|e| {
                    let detail = format!("part {}/{} failed: {}", index + 1, total_parts, e);
                    JobFailure::from_transfer(e, detail)
                })?;

            parts.push(part_path);
        }

        let primary = primary_volume(&parts).ok_or_else(|| {
            self.discard_workspace(&workspace);
            JobFailure::new(JobStage::Extracting, "primary .zip volume not found")
        })?;

        let extract_dir = workspace.join("_extracted");
        if let Err(e) = archive::expand_volume_set(primary, &extract_dir).await {
            self.discard_workspace(&workspace);
            return Err(JobFailure::new(JobStage::Extracting, e.to_string()));
        }

        let nested = archive::find_nested_archives(&extract_dir)
            .map_err(|e| JobFailure::new(JobStage::Extracting, e.to_string()))?;

        if nested.is_empty() {
            reconcile::merge(&extract_dir, &self.game_path)
                .map_err(|e| JobFailure::new(JobStage::Reconciling, e.to_string()))?;
        } else {
            for archive_path in &nested {
                if let Err(e) = archive::expand_volume_set(archive_path, &self.game_path).await {
                    self.discard_workspace(&workspace);
                    return Err(JobFailure::new(JobStage::Extracting, e.to_string()));
                }
            }
        }

        self.discard_workspace(&workspace);
        Ok(())
    }

    fn workspace_dir(&self) -> PathBuf {
        self.temp_root
            .join(format!("dlcforge_{}", self.descriptor.dlc_id))
    }

    fn discard_workspace(&self, workspace: &Path) {
        if let Err(e) = fs::remove_dir_all(workspace) {
            warn!(
                "Failed to remove workspace {}: {}",
                workspace.display(),
                e
            );
        }
    }

    /// Durable per-failure record for postmortems. Best effort: a
    /// logging failure must not mask the install failure.
    fn write_failure_log(&self, stage: JobStage, detail: &str) {
        let timestamp = chrono::Local::now().format("%Y-%m-%d_%H-%M-%S");
        let path = self.log_dir.join(format!("install_error_{}.txt", timestamp));

        let record = format!(
            "dlcforge v{} install error - {}\nDLC: {} ({})\nStage: {}\n{}\n{}\n",
            env!("CARGO_PKG_VERSION"),
            timestamp,
            self.descriptor.dlc_id,
            self.descriptor.name,
            stage,
            "-".repeat(50),
            detail,
        );

        let result = fs::create_dir_all(&self.log_dir).and_then(|_| fs::write(&path, record));
        if let Err(e) = result {
            warn!("Failed to write failure log {}: {}", path.display(), e);
        }
    }
}

/// Overall progress for part `part_index` of `total_parts` at
/// `part_percent`. Each part contributes an equal 1/N share regardless
/// of its byte size; an approximation, not byte-weighted truth.
pub(crate) fn overall_percent(part_index: usize, total_parts: usize, part_percent: f64) -> f64 {
    if total_parts == 0 {
        return 0.0;
    }
    ((part_index as f64 * 100.0) + part_percent) / total_parts as f64
}

/// The primary volume of a multi-part set: the one part named `*.zip`.
fn primary_volume(parts: &[PathBuf]) -> Option<&PathBuf> {
    parts.iter().find(|p| {
        p.extension()
            .and_then(|e| e.to_str())
            .is_some_and(|e| e.eq_ignore_ascii_case("zip"))
    })
}

/// Local filename for a source URL: the last path segment, query
/// stripped.
fn part_filename(url: &str) -> String {
    let tail = url.rsplit('/').next().unwrap_or(url);
    tail.split('?').next().unwrap_or(tail).to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::spawn_origin;
    use std::io::Write;
    use tempfile::TempDir;
    use zip::write::SimpleFileOptions;

    #[test]
    fn test_overall_percent_equal_share() {
        assert_eq!(overall_percent(0, 1, 50.0), 50.0);
        assert_eq!(overall_percent(0, 2, 0.0), 0.0);
        assert_eq!(overall_percent(0, 2, 100.0), 50.0);
        assert_eq!(overall_percent(1, 2, 50.0), 75.0);
        assert_eq!(overall_percent(2, 4, 100.0), 75.0);
        assert_eq!(overall_percent(0, 0, 42.0), 0.0);
    }

    #[test]
    fn test_primary_volume_selection() {
        let parts = vec![
            PathBuf::from("/tmp/pkg.part1.bin"),
            PathBuf::from("/tmp/pkg.part2.zip"),
        ];
        assert_eq!(primary_volume(&parts), Some(&parts[1]));

        let no_zip = vec![PathBuf::from("/tmp/pkg.part1.bin")];
        assert_eq!(primary_volume(&no_zip), None);
    }

    #[test]
    fn test_part_filename() {
        assert_eq!(part_filename("https://cdn.example/d/part1.bin"), "part1.bin");
        assert_eq!(
            part_filename("https://cdn.example/d/part2.zip?token=abc"),
            "part2.zip"
        );
    }

    fn zip_bytes(entries: &[(&str, &[u8])]) -> Vec<u8> {
        let mut cursor = std::io::Cursor::new(Vec::new());
        {
            let mut writer = zip::ZipWriter::new(&mut cursor);
            for (name, data) in entries {
                writer
                    .start_file(*name, SimpleFileOptions::default())
                    .unwrap();
                writer.write_all(data).unwrap();
            }
            writer.finish().unwrap();
        }
        cursor.into_inner()
    }

    fn descriptor(dlc_id: &str, urls: Vec<String>) -> PackageDescriptor {
        PackageDescriptor {
            dlc_id: dlc_id.to_string(),
            name: format!("{} test package", dlc_id),
            urls,
            size: None,
        }
    }

    #[tokio::test]
    async fn test_single_part_install_end_to_end() {
        let payload = zip_bytes(&[("EP90/data/file.pkg", b"contents")]);
        let base = spawn_origin(vec![("/ep90.zip", payload)]).await;

        let tmp = TempDir::new().unwrap();
        let game = tmp.path().join("game");
        fs::create_dir_all(&game).unwrap();

        let bus = Arc::new(EventBus::new());
        let mut rx = bus.subscribe();

        let job = PackageInstallJob::new(
            descriptor("EP90", vec![format!("{}/ep90.zip", base)]),
            game.clone(),
            Arc::new(HttpClient::new().unwrap()),
            bus,
            tmp.path().join("logs"),
        )
        .with_temp_root(tmp.path().join("tmp"));

        assert!(job.run(&CancelFlag::new()).await);

        assert_eq!(
            fs::read(game.join("EP90/data/file.pkg")).unwrap(),
            b"contents"
        );
        // Temp download removed on success.
        assert!(!tmp.path().join("tmp/EP90.zip").exists());

        // Final event is the terminal Completed signal.
        let mut last = None;
        while let Ok(event) = rx.try_recv() {
            last = Some(event);
        }
        assert_eq!(
            last,
            Some(PipelineEvent::Completed {
                dlc_id: "EP90".into(),
                success: true
            })
        );
    }

    #[tokio::test]
    async fn test_multi_part_download_failure_keeps_cached_parts() {
        // Part 1 downloads, part 2 404s: job fails at the download stage
        // and the workspace survives for a manual retry.
        let base = spawn_origin(vec![("/gp90.part1.bin", vec![9u8; 512])]).await;

        let tmp = TempDir::new().unwrap();
        let game = tmp.path().join("game");
        fs::create_dir_all(&game).unwrap();

        let bus = Arc::new(EventBus::new());
        let mut rx = bus.subscribe();

        let job = PackageInstallJob::new(
            descriptor(
                "GP90",
                vec![
                    format!("{}/gp90.part1.bin", base),
                    format!("{}/gp90.part2.zip", base),
                ],
            ),
            game,
            Arc::new(HttpClient::new().unwrap()),
            bus,
            tmp.path().join("logs"),
        )
        .with_temp_root(tmp.path().join("tmp"));

        assert!(!job.run(&CancelFlag::new()).await);

        let workspace = tmp.path().join("tmp/dlcforge_GP90");
        assert!(workspace.join("gp90.part1.bin").exists());

        // A durable failure record was written.
        let logs: Vec<_> = fs::read_dir(tmp.path().join("logs"))
            .unwrap()
            .map(|e| e.unwrap().path())
            .collect();
        assert_eq!(logs.len(), 1);
        let record = fs::read_to_string(&logs[0]).unwrap();
        assert!(record.contains("GP90"));
        assert!(record.contains("downloading"));

        // Error event precedes the terminal Completed event.
        let mut events = Vec::new();
        while let Ok(event) = rx.try_recv() {
            events.push(event);
        }
        assert!(matches!(
            events[events.len() - 2],
            PipelineEvent::Error { .. }
        ));
        assert_eq!(
            events[events.len() - 1],
            PipelineEvent::Completed {
                dlc_id: "GP90".into(),
                success: false
            }
        );
    }

    #[tokio::test]
    async fn test_multi_part_install_via_external_archiver() {
        // Requires a 7-Zip binary; skip quietly where none is installed.
        if archive::locate_archiver().is_err() {
            eprintln!("skipping: no 7-Zip binary available");
            return;
        }

        let payload = zip_bytes(&[("data/file.pkg", b"pkg-bytes")]);
        let base = spawn_origin(vec![
            ("/sp90.part1.bin", vec![1u8; 128]),
            ("/sp90.part2.zip", payload),
        ])
        .await;

        let tmp = TempDir::new().unwrap();
        let game = tmp.path().join("game");
        fs::create_dir_all(&game).unwrap();

        let job = PackageInstallJob::new(
            descriptor(
                "SP90",
                vec![
                    format!("{}/sp90.part1.bin", base),
                    format!("{}/sp90.part2.zip", base),
                ],
            ),
            game.clone(),
            Arc::new(HttpClient::new().unwrap()),
            Arc::new(EventBus::new()),
            tmp.path().join("logs"),
        )
        .with_temp_root(tmp.path().join("tmp"));

        assert!(job.run(&CancelFlag::new()).await);

        assert_eq!(fs::read(game.join("data/file.pkg")).unwrap(), b"pkg-bytes");
        // Workspace deleted on success.
        assert!(!tmp.path().join("tmp/dlcforge_SP90").exists());
    }
}
