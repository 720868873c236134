//! Preset Download Library
//!
//! This library downloads zip-packaged presets, installs them into per-preset
//! directories and records what was installed. Downloads run one at a time
//! from a FIFO queue; a preset directory is only trusted once its completion
//! marker has been written.
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use presets::{DownloadEventListener, DownloadRequest, PresetConfig, PresetId, PresetManager, PresetStatus};
//! use std::sync::Arc;
//!
//! struct PrintListener;
//!
//! impl DownloadEventListener for PrintListener {
//!     fn on_download_completed(&self, id: PresetId) {
//!         println!("Preset {} installed", id);
//!     }
//!
//!     fn on_download_failed(&self, id: PresetId) {
//!         println!("Preset {} failed", id);
//!     }
//! }
//!
//! # async fn example() -> presets::Result<()> {
//! // Configuration from defaults, `.env` and PRESETS_* variables
//! let config = PresetConfig::from_env()?;
//!
//! // The manager must be built inside a Tokio runtime
//! let manager = PresetManager::new(config)?;
//! manager.add_listener(Arc::new(PrintListener));
//!
//! if !manager.installed_version_matches(7, Some("1.2")) {
//!     manager.enqueue(
//!         DownloadRequest::new(7, "Analog Drums", "https://example.com/presets/7.zip")
//!             .with_version("1.2"),
//!     );
//! }
//!
//! if let PresetStatus::Active(percent) = manager.progress_for(7) {
//!     println!("Progress: {}%", percent);
//! }
//! # Ok(())
//! # }
//! ```
//!
//! # Features
//!
//! - **Single-flight queue**: one download at a time, deduplicated by preset id
//! - **Weighted progress**: fetching covers 0-75%, extraction 75-100%
//! - **Cooperative cancellation**: checked before every chunk written
//! - **Install markers**: version and completion markers, legacy names still read
//! - **Free space probing**: failures carry the space that was available

pub mod config;
pub mod core;
pub mod download;
pub mod install;
pub mod manager;
pub mod queue;

// Re-export commonly used types for convenience
pub use config::PresetConfig;
pub use crate::core::{
    DownloadProgress, DownloadRequest, ErrorSeverity, FileOperation, PresetError, PresetId,
    PresetStatus, Result, DOWNLOAD_PERCENT_IN_OVERALL_PROGRESS,
};
pub use download::{PresetWorker, WorkerOutcome, WorkerState};
pub use manager::{PresetManager, PresetManagerBuilder};
pub use queue::{
    CompositeTelemetry, CountingTelemetry, DownloadEventListener, DownloadQueue, Notifier,
    NullNotifier, NullTelemetry, QueueHooks, Telemetry, TelemetrySnapshot, TracingNotifier,
    TracingTelemetry,
};

#[cfg(test)]
mod tests;
