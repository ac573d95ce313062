//! Companion-application patch ("unlocker") management.
//!
//! The unlocker is a DLL dropped into the companion launcher's install
//! directory plus a config file copied into the unlocker's per-user
//! config directory. There is no interesting logic here beyond
//! copy/remove with a writability precondition: patching a launcher
//! under Program Files typically needs elevated rights, which this tool
//! does not acquire on its own.

use anyhow::{bail, Context, Result};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::info;

/// Name of the proxy DLL the launcher loads.
pub const PATCH_DLL: &str = "version.dll";

/// Unlocker config file shipped with the payload.
pub const UNLOCKER_CONFIG: &str = "config.ini";

/// Per-user directory name for the unlocker's own config files.
const CONFIG_DIR_NAME: &str = "dlc-unlocker";

/// Resolved locations for one patch operation.
#[derive(Debug, Clone)]
pub struct UnlockerPaths {
    /// Companion launcher install directory (externally supplied).
    pub companion_dir: PathBuf,
    /// Bundled payload directory holding the DLL and config files.
    pub assets_dir: PathBuf,
    /// Per-user unlocker config directory.
    pub config_dir: PathBuf,
}

impl UnlockerPaths {
    /// Resolve default asset and config locations for a companion dir:
    /// payload in `unlocker/` next to the running executable, config
    /// under the OS per-user config root.
    pub fn resolve(companion_dir: PathBuf) -> Result<Self> {
        let exe = std::env::current_exe().context("Failed to locate running executable")?;
        let assets_dir = exe
            .parent()
            .map(|dir| dir.join("unlocker"))
            .context("Executable has no parent directory")?;

        let config_dir = dirs::config_dir()
            .context("No per-user config directory on this platform")?
            .join(CONFIG_DIR_NAME);

        Ok(Self {
            companion_dir,
            assets_dir,
            config_dir,
        })
    }

    fn installed_dll(&self) -> PathBuf {
        self.companion_dir.join(PATCH_DLL)
    }

    /// The launcher's staged-update sibling: `Staged<Name>/<Name>` next
    /// to the install dir. Updates swap this in wholesale, so the DLL
    /// must land there too or the next launcher update removes it.
    fn staged_dir(&self) -> Option<PathBuf> {
        let name = self.companion_dir.file_name()?;
        let parent = self.companion_dir.parent()?;
        let staged = parent
            .join(format!("Staged{}", name.to_string_lossy()))
            .join(name);
        staged.is_dir().then_some(staged)
    }
}

/// Whether the patch DLL is currently present.
pub fn is_installed(paths: &UnlockerPaths) -> bool {
    paths.installed_dll().is_file()
}

/// Probe whether the current process can write into `dir`.
pub fn dir_writable(dir: &Path) -> bool {
    let probe = dir.join(".write_probe");
    match fs::write(&probe, b"probe") {
        Ok(()) => {
            let _ = fs::remove_file(&probe);
            true
        }
        Err(_) => false,
    }
}

/// Install the patch: copy the DLL into the companion dir (and its
/// staged sibling when present) and the unlocker config into the
/// per-user config dir.
pub fn install(paths: &UnlockerPaths) -> Result<()> {
    if !paths.companion_dir.is_dir() {
        bail!(
            "Companion application not found at {}",
            paths.companion_dir.display()
        );
    }
    if !dir_writable(&paths.companion_dir) {
        bail!(
            "Cannot write to {} - administrator rights required, restart elevated",
            paths.companion_dir.display()
        );
    }

    let src_dll = paths.assets_dir.join(PATCH_DLL);
    if !src_dll.is_file() {
        bail!("Patch DLL not found at {}", src_dll.display());
    }

    let dst_dll = paths.installed_dll();
    fs::copy(&src_dll, &dst_dll)
        .with_context(|| format!("Failed to copy {} to {}", PATCH_DLL, dst_dll.display()))?;
    info!("Copied {} to {}", PATCH_DLL, dst_dll.display());

    if let Some(staged) = paths.staged_dir() {
        let staged_dll = staged.join(PATCH_DLL);
        fs::copy(&src_dll, &staged_dll)
            .with_context(|| format!("Failed to copy {} to {}", PATCH_DLL, staged_dll.display()))?;
        info!("Copied {} to staged dir {}", PATCH_DLL, staged.display());
    }

    let src_config = paths.assets_dir.join(UNLOCKER_CONFIG);
    if src_config.is_file() {
        fs::create_dir_all(&paths.config_dir)
            .with_context(|| format!("Failed to create {}", paths.config_dir.display()))?;
        fs::copy(&src_config, paths.config_dir.join(UNLOCKER_CONFIG))
            .context("Failed to copy unlocker config")?;
        info!("Copied {}", UNLOCKER_CONFIG);
    }

    Ok(())
}

/// Copy an updated per-game config into the unlocker config dir. Run
/// after installing new DLC so the unlocker picks the content up.
pub fn update_game_config(paths: &UnlockerPaths, config_name: &str) -> Result<()> {
    let src = paths.assets_dir.join(config_name);
    if !src.is_file() {
        bail!("Game config not found at {}", src.display());
    }

    fs::create_dir_all(&paths.config_dir)
        .with_context(|| format!("Failed to create {}", paths.config_dir.display()))?;
    let dst = paths.config_dir.join(config_name);
    fs::copy(&src, &dst)
        .with_context(|| format!("Failed to copy game config to {}", dst.display()))?;
    info!("Updated game config {}", dst.display());
    Ok(())
}

/// Remove the patch DLL and its staged copy. Removing an uninstalled
/// patch is not an error.
pub fn uninstall(paths: &UnlockerPaths) -> Result<()> {
    let dll = paths.installed_dll();
    if !dll.is_file() {
        info!("Patch was not installed ({} absent)", dll.display());
        return Ok(());
    }

    fs::remove_file(&dll).with_context(|| format!("Failed to remove {}", dll.display()))?;
    info!("Removed {}", dll.display());

    if let Some(staged) = paths.staged_dir() {
        let staged_dll = staged.join(PATCH_DLL);
        if staged_dll.is_file() {
            fs::remove_file(&staged_dll)
                .with_context(|| format!("Failed to remove {}", staged_dll.display()))?;
            info!("Removed {}", staged_dll.display());
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn paths(root: &Path) -> UnlockerPaths {
        let companion_dir = root.join("Launcher");
        let assets_dir = root.join("assets");
        fs::create_dir_all(&companion_dir).unwrap();
        fs::create_dir_all(&assets_dir).unwrap();
        UnlockerPaths {
            companion_dir,
            assets_dir,
            config_dir: root.join("config"),
        }
    }

    #[test]
    fn test_install_copies_dll_and_config() {
        let tmp = TempDir::new().unwrap();
        let paths = paths(tmp.path());
        fs::write(paths.assets_dir.join(PATCH_DLL), b"dll-bytes").unwrap();
        fs::write(paths.assets_dir.join(UNLOCKER_CONFIG), b"[cfg]").unwrap();

        assert!(!is_installed(&paths));
        install(&paths).unwrap();
        assert!(is_installed(&paths));

        assert_eq!(
            fs::read(paths.companion_dir.join(PATCH_DLL)).unwrap(),
            b"dll-bytes"
        );
        assert_eq!(
            fs::read(paths.config_dir.join(UNLOCKER_CONFIG)).unwrap(),
            b"[cfg]"
        );
    }

    #[test]
    fn test_install_copies_to_staged_sibling() {
        let tmp = TempDir::new().unwrap();
        let paths = paths(tmp.path());
        fs::write(paths.assets_dir.join(PATCH_DLL), b"dll").unwrap();

        let staged = tmp.path().join("StagedLauncher/Launcher");
        fs::create_dir_all(&staged).unwrap();

        install(&paths).unwrap();
        assert!(staged.join(PATCH_DLL).is_file());

        uninstall(&paths).unwrap();
        assert!(!is_installed(&paths));
        assert!(!staged.join(PATCH_DLL).exists());
    }

    #[test]
    fn test_install_without_payload_fails() {
        let tmp = TempDir::new().unwrap();
        let paths = paths(tmp.path());
        assert!(install(&paths).is_err());
    }

    #[test]
    fn test_uninstall_when_not_installed_is_ok() {
        let tmp = TempDir::new().unwrap();
        let paths = paths(tmp.path());
        uninstall(&paths).unwrap();
    }

    #[test]
    fn test_dir_writable_probe() {
        let tmp = TempDir::new().unwrap();
        assert!(dir_writable(tmp.path()));
        assert!(!dir_writable(&tmp.path().join("missing")));
    }
}
