//! Example demonstrating how to install a preset with the manager
//!
//! Run this example with:
//! ```
//! cargo run --example download_example -- https://example.com/presets/1.zip
//! ```

use presets::{
    CountingTelemetry, DownloadEventListener, DownloadRequest, PresetConfig, PresetId,
    PresetManager, PresetStatus,
};
use std::sync::Arc;
use std::time::Duration;
use tempfile::tempdir;
use tokio::sync::mpsc;

struct ChannelListener(mpsc::UnboundedSender<Result<PresetId, PresetId>>);

impl DownloadEventListener for ChannelListener {
    fn on_download_completed(&self, id: PresetId) {
        let _ = self.0.send(Ok(id));
    }

    fn on_download_failed(&self, id: PresetId) {
        let _ = self.0.send(Err(id));
    }
}

#[tokio::main]
async fn main() -> presets::Result<()> {
    tracing_subscriber::fmt::init();

    let url = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "https://example.com/presets/1.zip".to_string());

    let temp_dir = tempdir().unwrap();
    let config = PresetConfig::new(temp_dir.path().join("presets"), temp_dir.path().join("staging"));
    println!("📁 Installing into {}", config.download_root.display());

    let telemetry = Arc::new(CountingTelemetry::default());
    let manager = PresetManager::builder(config)
        .with_telemetry(telemetry.clone())
        .build()?;

    let (sender, mut outcomes) = mpsc::unbounded_channel();
    manager.add_listener(Arc::new(ChannelListener(sender)));

    manager.enqueue(DownloadRequest::new(1, "Example preset", url).with_version("1.0"));

    let mut ticker = tokio::time::interval(Duration::from_millis(200));
    let outcome = loop {
        tokio::select! {
            outcome = outcomes.recv() => break outcome,
            _ = ticker.tick() => {
                if let PresetStatus::Active(percent) = manager.progress_for(1) {
                    println!("   Progress: {}%", percent);
                }
            }
        }
    };

    match outcome {
        Some(Ok(id)) => {
            println!("✅ Preset {} installed", id);
            println!("   Version matches: {}", manager.installed_version_matches(id, Some("1.0")));
        }
        Some(Err(id)) => println!("❌ Preset {} failed", id),
        None => println!("Listener channel closed"),
    }
    println!("📊 Telemetry: {:?}", telemetry.snapshot());

    Ok(())
}
