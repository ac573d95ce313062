//! Application configuration.
//!
//! A small JSON file holding the game install path and the locations of
//! the catalog and manifest files. Loaded once and passed explicitly to
//! the components that need it; there is no process-wide mutable state.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::warn;

/// Default config file name, resolved against the current directory.
pub const CONFIG_FILE: &str = "config.json";

/// Default reference-manifest file name.
pub const MANIFEST_FILE: &str = "integrity.json";

/// Default catalog file name.
pub const CATALOG_FILE: &str = "catalog.json";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// Game install directory. Supplied externally (CLI flag or a prior
    /// `save`); this tool does not scan for it.
    #[serde(default)]
    pub game_path: Option<PathBuf>,

    /// Catalog file location, when not the default.
    #[serde(default)]
    pub catalog_path: Option<PathBuf>,

    /// Reference-manifest file location, when not the default.
    #[serde(default)]
    pub manifest_path: Option<PathBuf>,
}

impl AppConfig {
    /// Load the config file, returning defaults if it is absent or
    /// unparsable. A bad config file must never prevent startup.
    pub fn load(path: &Path) -> Self {
        match fs::read_to_string(path) {
            Ok(data) => match serde_json::from_str(&data) {
                Ok(config) => config,
                Err(e) => {
                    warn!("Ignoring unparsable config {}: {}", path.display(), e);
                    Self::default()
                }
            },
            Err(_) => Self::default(),
        }
    }

    /// Persist the config as pretty-printed JSON.
    pub fn save(&self, path: &Path) -> Result<()> {
        let data = serde_json::to_string_pretty(self)?;
        fs::write(path, data)
            .with_context(|| format!("Failed to write config: {}", path.display()))?;
        Ok(())
    }

    pub fn catalog_path(&self) -> PathBuf {
        self.catalog_path
            .clone()
            .unwrap_or_else(|| PathBuf::from(CATALOG_FILE))
    }

    pub fn manifest_path(&self) -> PathBuf {
        self.manifest_path
            .clone()
            .unwrap_or_else(|| PathBuf::from(MANIFEST_FILE))
    }
}
