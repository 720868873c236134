//! Command-line front end for the preset downloader
//!
//! ```text
//! presets-cli install --id 7 --name "Analog Drums" --url https://example.com/7.zip --version 1.2
//! presets-cli install --catalog presets.json
//! presets-cli status --id 7 --version 1.2
//! presets-cli clean
//! ```

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use presets::{DownloadEventListener, DownloadRequest, PresetConfig, PresetId, PresetManager, PresetStatus};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::Level;

#[derive(Debug, Parser)]
#[command(name = "presets-cli", version, about = "Download and install presets")]
struct Cli {
    /// Directory presets are installed into
    #[arg(long, global = true)]
    download_root: Option<PathBuf>,

    /// Directory archives are staged in while downloading
    #[arg(long, global = true)]
    temp_dir: Option<PathBuf>,

    /// Log debug output
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Download and install one preset or every preset in a catalog file
    Install {
        #[arg(long, required_unless_present = "catalog", requires_all = ["name", "url"])]
        id: Option<PresetId>,
        #[arg(long)]
        name: Option<String>,
        #[arg(long)]
        url: Option<String>,
        #[arg(long)]
        version: Option<String>,
        /// JSON array of {"id", "name", "url", "version"} objects
        #[arg(long, conflicts_with = "id")]
        catalog: Option<PathBuf>,
    },
    /// Show whether a preset is installed and whether its version matches
    Status {
        #[arg(long)]
        id: PresetId,
        #[arg(long)]
        version: Option<String>,
    },
    /// Empty the staging directory
    Clean,
}

/// Prints outcomes and counts failures
#[derive(Default)]
struct ReportingListener {
    completed: AtomicUsize,
    failed: AtomicUsize,
}

impl ReportingListener {
    /// Every queued preset has reported, or a failure dropped the rest
    ///
    /// Callbacks run after the queue has gone idle, so idleness alone does not
    /// mean the outcome has been counted yet.
    fn settled(&self, expected: usize) -> bool {
        self.failed.load(Ordering::SeqCst) > 0 || self.completed.load(Ordering::SeqCst) >= expected
    }
}

impl DownloadEventListener for ReportingListener {
    fn on_download_completed(&self, id: PresetId) {
        self.completed.fetch_add(1, Ordering::SeqCst);
        println!("✅ Preset {} installed", id);
    }

    fn on_download_failed(&self, id: PresetId) {
        self.failed.fetch_add(1, Ordering::SeqCst);
        println!("❌ Preset {} failed, pending downloads were dropped", id);
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_max_level(if cli.verbose { Level::DEBUG } else { Level::INFO })
        .with_target(false)
        .init();

    let mut config = PresetConfig::from_env().context("Failed to load configuration")?;
    if let Some(root) = cli.download_root {
        config.download_root = root;
    }
    if let Some(temp_dir) = cli.temp_dir {
        config.temp_dir = temp_dir;
    }

    let manager = PresetManager::new(config).context("Failed to start preset manager")?;

    match cli.command {
        Command::Install {
            id,
            name,
            url,
            version,
            catalog,
        } => {
            let requests = match catalog {
                Some(path) => read_catalog(&path)?,
                None => match (id, name, url) {
                    (Some(id), Some(name), Some(url)) => {
                        let mut request = DownloadRequest::new(id, name, url);
                        request.version = version;
                        vec![request]
                    }
                    _ => bail!("install needs --catalog or all of --id, --name and --url"),
                },
            };
            install(&manager, requests).await
        }
        Command::Status { id, version } => {
            print_status(&manager, id, version.as_deref())?;
            Ok(())
        }
        Command::Clean => {
            if manager.clean_staging_dir()? {
                println!("🧹 Cleaned {}", manager.config().temp_dir.display());
            } else {
                println!("A download is running, nothing cleaned");
            }
            Ok(())
        }
    }
}

fn read_catalog(path: &Path) -> Result<Vec<DownloadRequest>> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read catalog {}", path.display()))?;
    let requests: Vec<DownloadRequest> = serde_json::from_str(&content)
        .with_context(|| format!("Failed to parse catalog {}", path.display()))?;
    if requests.is_empty() {
        bail!("Catalog {} lists no presets", path.display());
    }
    Ok(requests)
}

async fn install(manager: &PresetManager, requests: Vec<DownloadRequest>) -> Result<()> {
    let listener = Arc::new(ReportingListener::default());
    manager.add_listener(listener.clone());

    let mut skipped = 0;
    let mut queued = HashSet::new();
    for request in requests {
        if manager.is_installed(request.id)
            && manager.installed_version_matches(request.id, request.version.as_deref())
        {
            println!("⏭️  {} is already installed", request.display_name);
            skipped += 1;
            continue;
        }
        if !queued.insert(request.id) {
            continue;
        }
        println!("📥 Queued {} from {}", request.display_name, request.remote_url);
        manager.enqueue(request);
    }

    let mut ticker = tokio::time::interval(Duration::from_millis(250));
    let mut last_reported = None;
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                println!("🛑 Interrupted, cancelling downloads");
                manager.shutdown();
                bail!("Interrupted");
            }
            _ = ticker.tick() => {}
        }

        if manager.queue().is_idle() && listener.settled(queued.len()) {
            break;
        }
        if let Some(id) = manager.current_active_id() {
            if let PresetStatus::Active(percent) = manager.progress_for(id) {
                if last_reported != Some((id, percent)) {
                    println!("   Preset {}: {}%", id, percent);
                    last_reported = Some((id, percent));
                }
            }
        }
    }

    let completed = listener.completed.load(Ordering::SeqCst);
    let failed = listener.failed.load(Ordering::SeqCst);
    println!("📊 {} installed, {} already present, {} failed", completed, skipped, failed);
    if failed > 0 {
        bail!("Preset download failed");
    }
    Ok(())
}

fn print_status(manager: &PresetManager, id: PresetId, version: Option<&str>) -> Result<()> {
    let installed = manager.is_installed(id);
    println!("Preset {}", id);
    match manager.preset_dir(id) {
        Some(dir) => println!("  directory: {}", dir.display()),
        None => println!("  directory: (none)"),
    }
    println!("  installed: {}", installed);
    let recorded = manager.installed_version(id)?;
    println!("  version:   {}", recorded.as_deref().unwrap_or("(none)"));
    if installed {
        let matches = manager.installed_version_matches(id, version);
        println!("  up to date: {}", matches);
    }
    Ok(())
}
