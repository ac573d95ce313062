//! Installed-package verification against the reference manifest.
//!
//! A package directory is classified as OK, MISSING, or CORRUPT. When
//! the manifest has no entry for a package, a non-empty install
//! directory alone counts as OK; content is only checked when reference
//! digests exist. Verification is read-only and may run while an
//! install job is active; a check racing a live install can observe a
//! stale mix, which is accepted.

use crate::events::{EventBus, PipelineEvent};
use crate::hash;
use crate::transport::CancelFlag;
use serde::Deserialize;
use std::collections::HashMap;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Verification outcome for one package.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VerifyState {
    /// Installed and matching the manifest (or no manifest entry exists).
    Ok,
    /// Install directory absent or empty.
    Missing,
    /// A manifest-listed file is absent or its digest mismatches.
    Corrupt,
    /// Check in progress; always followed by a terminal state.
    Pending,
}

impl fmt::Display for VerifyState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            VerifyState::Ok => "OK",
            VerifyState::Missing => "MISSING",
            VerifyState::Corrupt => "CORRUPT",
            VerifyState::Pending => "PENDING",
        };
        f.write_str(label)
    }
}

/// Expected files for one package: relative path -> hex digest.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ManifestEntry {
    #[serde(default)]
    pub files: HashMap<String, String>,
}

/// Reference manifest mapping package ids to expected file digests.
///
/// Loaded once at startup; read-only afterwards.
#[derive(Debug, Default)]
pub struct ReferenceManifest {
    entries: HashMap<String, ManifestEntry>,
}

impl ReferenceManifest {
    pub fn empty() -> Self {
        Self::default()
    }

    /// Load the manifest file. An absent or unparsable file yields an
    /// empty manifest; verification then only checks presence.
    pub fn load(path: &Path) -> Self {
        let data = match fs::read_to_string(path) {
            Ok(data) => data,
            Err(_) => {
                debug!("No manifest at {}, using empty manifest", path.display());
                return Self::empty();
            }
        };

        match serde_json::from_str(&data) {
            Ok(entries) => Self { entries },
            Err(e) => {
                warn!("Ignoring unparsable manifest {}: {}", path.display(), e);
                Self::empty()
            }
        }
    }

    pub fn entry(&self, dlc_id: &str) -> Option<&ManifestEntry> {
        self.entries.get(dlc_id)
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Classifies installed packages by comparing the install tree against
/// the reference manifest.
pub struct HashVerifier {
    game_path: PathBuf,
    manifest: ReferenceManifest,
}

impl HashVerifier {
    pub fn new(game_path: PathBuf, manifest: ReferenceManifest) -> Self {
        Self {
            game_path,
            manifest,
        }
    }

    /// Verify a single package. Never errors: unreadable files count as
    /// corrupt, an unreadable directory as missing.
    pub fn verify(&self, dlc_id: &str) -> VerifyState {
        let target = self.game_path.join(dlc_id);

        let non_empty = fs::read_dir(&target)
            .map(|mut entries| entries.next().is_some())
            .unwrap_or(false);
        if !non_empty {
            return VerifyState::Missing;
        }

        if let Some(entry) = self.manifest.entry(dlc_id) {
            for (relative, expected) in &entry.files {
                let file = target.join(relative);
                if !file.is_file() {
                    debug!("{}: manifest file {} absent", dlc_id, relative);
                    return VerifyState::Corrupt;
                }
                match hash::verify_file_hash(&file, expected) {
                    Ok(true) => {}
                    Ok(false) => {
                        debug!("{}: digest mismatch on {}", dlc_id, relative);
                        return VerifyState::Corrupt;
                    }
                    Err(e) => {
                        warn!("{}: failed to hash {}: {}", dlc_id, relative, e);
                        return VerifyState::Corrupt;
                    }
                }
            }
        }

        VerifyState::Ok
    }

    /// Verify a batch of packages, emitting PENDING before each terminal
    /// state. The cancel flag is honored between items.
    pub fn verify_batch(
        &self,
        dlc_ids: &[String],
        bus: &EventBus,
        cancel: &CancelFlag,
    ) -> Vec<(String, VerifyState)> {
        let mut results = Vec::with_capacity(dlc_ids.len());

        for dlc_id in dlc_ids {
            if cancel.is_cancelled() {
                break;
            }

            bus.emit(PipelineEvent::VerificationStatus {
                dlc_id: dlc_id.clone(),
                state: VerifyState::Pending,
            });

            let state = self.verify(dlc_id);
            bus.emit(PipelineEvent::VerificationStatus {
                dlc_id: dlc_id.clone(),
                state,
            });
            results.push((dlc_id.clone(), state));
        }

        results
    }
}
