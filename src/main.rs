//! dlcforge - DLC download and install manager
//!
//! Command-line front end: parses arguments, wires the install queue and
//! event bus together, and renders pipeline events. All state mutation
//! happens in the library; this file is presentation only.

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use dlcforge::catalog::{self, Catalog};
use dlcforge::config::{AppConfig, CONFIG_FILE};
use dlcforge::crash;
use dlcforge::events::{EventBus, PipelineEvent};
use dlcforge::fsutil;
use dlcforge::installer::queue::JobRunner;
use dlcforge::installer::{InstallQueue, PackageInstallJob};
use dlcforge::transport::HttpClient;
use dlcforge::unlocker::{self, UnlockerPaths};
use dlcforge::verify::{HashVerifier, ReferenceManifest, VerifyState};
use futures::FutureExt;
use indicatif::{MultiProgress, ProgressBar, ProgressStyle};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::mpsc::UnboundedReceiver;
use tokio::task::JoinHandle;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "dlcforge")]
#[command(version)]
#[command(about = "DLC download, install and verification manager")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging (use RUST_LOG=debug for more detail)
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Download and install one or more packages
    Install {
        /// Package ids to install
        #[arg(required = true)]
        dlc_ids: Vec<String>,

        /// Game install directory (persisted for later runs)
        #[arg(short, long)]
        game: Option<PathBuf>,

        /// Catalog file location
        #[arg(long)]
        catalog: Option<PathBuf>,
    },

    /// Verify installed packages against the reference manifest
    Verify {
        /// Package ids to verify (all catalog packages when omitted)
        dlc_ids: Vec<String>,

        /// Game install directory
        #[arg(short, long)]
        game: Option<PathBuf>,

        /// Reference manifest location
        #[arg(long)]
        manifest: Option<PathBuf>,

        /// Catalog file location
        #[arg(long)]
        catalog: Option<PathBuf>,
    },

    /// List catalog packages with install state and size
    List {
        /// Game install directory
        #[arg(short, long)]
        game: Option<PathBuf>,

        /// Catalog file location
        #[arg(long)]
        catalog: Option<PathBuf>,
    },

    /// Remove installed packages
    Uninstall {
        /// Package ids to remove
        #[arg(required = true)]
        dlc_ids: Vec<String>,

        /// Game install directory
        #[arg(short, long)]
        game: Option<PathBuf>,
    },

    /// Manage the companion-application patch
    Unlocker {
        #[command(subcommand)]
        action: UnlockerAction,
    },
}

#[derive(Subcommand)]
enum UnlockerAction {
    /// Report whether the patch DLL is installed
    Status {
        /// Companion application install directory
        #[arg(long)]
        companion_dir: PathBuf,
    },
    /// Install the patch DLL and unlocker config
    Install {
        #[arg(long)]
        companion_dir: PathBuf,
    },
    /// Remove the patch DLL
    Uninstall {
        #[arg(long)]
        companion_dir: PathBuf,
    },
    /// Copy an updated per-game config into the unlocker config dir
    UpdateConfig {
        #[arg(long)]
        companion_dir: PathBuf,

        /// Config file name within the payload directory
        #[arg(long)]
        config_name: String,
    },
}

#[tokio::main]
async fn main() {
    crash::install_panic_hook(PathBuf::from(crash::LOG_DIR));

    let cli = Cli::parse();

    // Only initialize logging if verbose or RUST_LOG is set
    if cli.verbose || std::env::var("RUST_LOG").is_ok() {
        tracing_subscriber::fmt()
            .with_env_filter(
                EnvFilter::from_default_env().add_directive("dlcforge=debug".parse().unwrap()),
            )
            .init();
    }

    if let Err(e) = run(cli).await {
        let detail = format!("{:?}", e);
        match crash::write_crash_log(&PathBuf::from(crash::LOG_DIR), &detail) {
            Some(path) => eprintln!("Error: {:#}\nDetails written to {}", e, path.display()),
            None => eprintln!("Error: {:#}", e),
        }
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> Result<()> {
    let config_path = PathBuf::from(CONFIG_FILE);
    let mut config = AppConfig::load(&config_path);

    match cli.command {
        Commands::Install {
            dlc_ids,
            game,
            catalog,
        } => {
            let game_path = resolve_game_path(game, &mut config, &config_path)?;
            let catalog_path = catalog.unwrap_or_else(|| config.catalog_path());
            let catalog = Catalog::load(&catalog_path)?;
            install(&catalog, dlc_ids, game_path).await
        }

        Commands::Verify {
            dlc_ids,
            game,
            manifest,
            catalog,
        } => {
            let game_path = resolve_game_path(game, &mut config, &config_path)?;
            let manifest_path = manifest.unwrap_or_else(|| config.manifest_path());
            let dlc_ids = if dlc_ids.is_empty() {
                let catalog_path = catalog.unwrap_or_else(|| config.catalog_path());
                Catalog::load(&catalog_path)?
                    .iter()
                    .map(|d| d.dlc_id.clone())
                    .collect()
            } else {
                dlc_ids
            };
            verify(game_path, &manifest_path, dlc_ids).await
        }

        Commands::List { game, catalog } => {
            let game_path = resolve_game_path(game, &mut config, &config_path)?;
            let catalog_path = catalog.unwrap_or_else(|| config.catalog_path());
            list(&Catalog::load(&catalog_path)?, &game_path)
        }

        Commands::Uninstall { dlc_ids, game } => {
            let game_path = resolve_game_path(game, &mut config, &config_path)?;
            uninstall(&game_path, &dlc_ids)
        }

        Commands::Unlocker { action } => unlocker_command(action),
    }
}

/// Resolve the game directory from the flag or the persisted config,
/// saving a newly supplied path for later runs.
fn resolve_game_path(
    flag: Option<PathBuf>,
    config: &mut AppConfig,
    config_path: &Path,
) -> Result<PathBuf> {
    let game_path = match flag {
        Some(path) => {
            if config.game_path.as_ref() != Some(&path) {
                config.game_path = Some(path.clone());
                config.save(config_path)?;
            }
            path
        }
        None => config
            .game_path
            .clone()
            .context("No game directory configured; pass --game once to set it")?,
    };

    if !game_path.is_dir() {
        bail!("Game directory not found: {}", game_path.display());
    }
    Ok(game_path)
}

async fn install(catalog: &Catalog, dlc_ids: Vec<String>, game_path: PathBuf) -> Result<()> {
    let bus = Arc::new(EventBus::new());
    let renderer = spawn_event_renderer(bus.subscribe());
    let client = Arc::new(HttpClient::new()?);

    let runner: JobRunner = {
        let game_path = game_path.clone();
        let bus = bus.clone();
        Arc::new(move |descriptor, cancel| {
            let job = PackageInstallJob::new(
                descriptor,
                game_path.clone(),
                client.clone(),
                bus.clone(),
                PathBuf::from(crash::LOG_DIR),
            );
            async move { job.run(&cancel).await }.boxed()
        })
    };

    let queue = Arc::new(InstallQueue::new(runner));

    // Ctrl-C drains the queue and stops the active transfer at the next
    // chunk boundary.
    let ctrlc = {
        let queue = queue.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                eprintln!("\nCancelling...");
                queue.cancel_all();
            }
        })
    };

    let mut requested = 0usize;
    for dlc_id in &dlc_ids {
        match catalog.get(dlc_id) {
            Some(descriptor) => {
                if queue.enqueue(descriptor.clone()) {
                    requested += 1;
                }
            }
            None => eprintln!("Unknown package id: {}", dlc_id),
        }
    }

    if requested == 0 {
        ctrlc.abort();
        drop(queue);
        drop(bus);
        let _ = renderer.await;
        bail!("Nothing to install");
    }

    queue.wait_idle().await;
    ctrlc.abort();
    drop(queue);
    drop(bus);

    let (ok, failed) = renderer.await.unwrap_or((0, 0));
    println!("\n{} installed, {} failed", ok, failed);
    if failed > 0 {
        bail!("{} install(s) failed, see {}/", failed, crash::LOG_DIR);
    }
    Ok(())
}

/// Render pipeline events; returns (succeeded, failed) counts once the
/// bus closes. The single consumer of worker events.
fn spawn_event_renderer(mut rx: UnboundedReceiver<PipelineEvent>) -> JoinHandle<(usize, usize)> {
    tokio::spawn(async move {
        let multi = MultiProgress::new();
        let mut bars: HashMap<String, ProgressBar> = HashMap::new();
        let mut ok = 0usize;
        let mut failed = 0usize;

        while let Some(event) = rx.recv().await {
            match event {
                PipelineEvent::Progress {
                    dlc_id,
                    percent,
                    bytes_downloaded,
                    ..
                } => {
                    let bar = bars.entry(dlc_id.clone()).or_insert_with(|| {
                        let pb = multi.add(ProgressBar::new(100));
                        pb.set_style(
                            ProgressStyle::default_bar()
                                .template("{msg:24} [{bar:40.cyan/blue}] {pos:>3}%")
                                .unwrap()
                                .progress_chars("=>-"),
                        );
                        pb
                    });
                    bar.set_position(percent.clamp(0.0, 100.0) as u64);
                    bar.set_message(format!(
                        "{} ({})",
                        dlc_id,
                        fsutil::format_size(bytes_downloaded)
                    ));
                }
                PipelineEvent::Completed { dlc_id, success } => {
                    if success {
                        ok += 1;
                    } else {
                        failed += 1;
                    }
                    if let Some(bar) = bars.remove(&dlc_id) {
                        if success {
                            bar.finish_with_message(format!("{} installed", dlc_id));
                        } else {
                            bar.abandon_with_message(format!("{} failed", dlc_id));
                        }
                    }
                }
                PipelineEvent::Error { message, .. } => {
                    let _ = multi.println(&message);
                }
                PipelineEvent::VerificationStatus { dlc_id, state } => {
                    let _ = multi.println(format!("{:8} {}", dlc_id, state));
                }
            }
        }

        (ok, failed)
    })
}

async fn verify(game_path: PathBuf, manifest_path: &Path, dlc_ids: Vec<String>) -> Result<()> {
    let manifest = ReferenceManifest::load(manifest_path);
    if manifest.is_empty() {
        println!("No manifest loaded; checking presence only\n");
    }

    let bus = Arc::new(EventBus::new());
    let renderer = spawn_event_renderer(bus.subscribe());

    let verifier = HashVerifier::new(game_path, manifest);
    let results = {
        let bus = bus.clone();
        tokio::task::spawn_blocking(move || {
            verifier.verify_batch(&dlc_ids, &bus, &Default::default())
        })
        .await
        .context("Verification worker panicked")?
    };

    drop(bus);
    let _ = renderer.await;

    let corrupt = results
        .iter()
        .filter(|(_, state)| *state == VerifyState::Corrupt)
        .count();
    let missing = results
        .iter()
        .filter(|(_, state)| *state == VerifyState::Missing)
        .count();
    println!(
        "\n{} checked: {} ok, {} missing, {} corrupt",
        results.len(),
        results.len() - corrupt - missing,
        missing,
        corrupt
    );
    Ok(())
}

fn list(catalog: &Catalog, game_path: &Path) -> Result<()> {
    println!("{:8} {:12} {:>10}  {}", "ID", "KIND", "SIZE", "NAME");
    for descriptor in catalog.iter() {
        let kind = catalog::classify(&descriptor.dlc_id);
        let target = game_path.join(&descriptor.dlc_id);
        let size = if fsutil::dir_non_empty(&target) {
            fsutil::format_size(fsutil::folder_size(&target))
        } else {
            "-".to_string()
        };
        println!(
            "{:8} {:12} {:>10}  {}",
            descriptor.dlc_id,
            kind.label(),
            size,
            descriptor.name
        );
    }
    Ok(())
}

fn uninstall(game_path: &Path, dlc_ids: &[String]) -> Result<()> {
    let mut removed = 0usize;
    for dlc_id in dlc_ids {
        let target = game_path.join(dlc_id);
        if target.is_dir() {
            std::fs::remove_dir_all(&target)
                .with_context(|| format!("Failed to remove {}", target.display()))?;
            println!("Removed {}", dlc_id);
            removed += 1;
        } else {
            println!("{} is not installed", dlc_id);
        }
    }
    println!("{} package(s) removed", removed);
    Ok(())
}

fn unlocker_command(action: UnlockerAction) -> Result<()> {
    match action {
        UnlockerAction::Status { companion_dir } => {
            let paths = UnlockerPaths::resolve(companion_dir)?;
            if unlocker::is_installed(&paths) {
                println!("Patch installed at {}", paths.companion_dir.display());
            } else {
                println!("Patch not installed");
            }
            Ok(())
        }
        UnlockerAction::Install { companion_dir } => {
            let paths = UnlockerPaths::resolve(companion_dir)?;
            unlocker::install(&paths)?;
            println!("Unlocker installed");
            Ok(())
        }
        UnlockerAction::Uninstall { companion_dir } => {
            let paths = UnlockerPaths::resolve(companion_dir)?;
            unlocker::uninstall(&paths)?;
            println!("Unlocker removed");
            Ok(())
        }
        UnlockerAction::UpdateConfig {
            companion_dir,
            config_name,
        } => {
            let paths = UnlockerPaths::resolve(companion_dir)?;
            unlocker::update_game_config(&paths, &config_name)?;
            println!("Game config updated");
            Ok(())
        }
    }
}
