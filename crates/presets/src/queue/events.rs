//! Listener, notification and telemetry hooks for the download queue
//!
//! All hooks are invoked from the queue after its internal lock has been
//! released. Implementations must return quickly; telemetry in particular is
//! fire-and-forget and must never block or fail the download flow.

use std::sync::atomic::{AtomicU64, Ordering};
use tracing::{debug, info, warn};

use crate::core::PresetId;

/// Observer of per-preset download outcomes
pub trait DownloadEventListener: Send + Sync {
    fn on_download_completed(&self, _id: PresetId) {}
    fn on_download_failed(&self, _id: PresetId) {}
}

/// User-facing notification surface
pub trait Notifier: Send + Sync {
    /// A preset finished installing
    fn preset_installed(&self, _name: &str) {}
    /// The queue failed; `names` lists every preset that was queued at that moment
    fn presets_failed(&self, _names: &[String]) {}
}

/// Analytics sink for download lifecycle events
pub trait Telemetry: Send + Sync {
    fn download_started(&self, _name: &str) {}
    fn download_succeeded(&self, _name: &str) {}
    fn download_failed(&self, _name: &str, _message: &str) {}
}

/// Notifier that writes to the tracing log
#[derive(Debug, Default)]
pub struct TracingNotifier;

impl Notifier for TracingNotifier {
    fn preset_installed(&self, name: &str) {
        info!("Preset downloaded: {}", name);
    }

    fn presets_failed(&self, names: &[String]) {
        warn!("Error downloading presets: {}. Please try again", names.join(", "));
    }
}

/// Null notifier that does nothing
#[derive(Debug, Default)]
pub struct NullNotifier;

impl Notifier for NullNotifier {}

/// Telemetry that records events in the tracing log
#[derive(Debug, Default)]
pub struct TracingTelemetry;

impl Telemetry for TracingTelemetry {
    fn download_started(&self, name: &str) {
        debug!(event = "download_started", preset = name);
    }

    fn download_succeeded(&self, name: &str) {
        debug!(event = "download_succeeded", preset = name);
    }

    fn download_failed(&self, name: &str, message: &str) {
        debug!(event = "download_failed", preset = name, reason = message);
    }
}

/// Null telemetry that does nothing
#[derive(Debug, Default)]
pub struct NullTelemetry;

impl Telemetry for NullTelemetry {}

/// Telemetry that counts lifecycle events with atomic counters
#[derive(Debug, Default)]
pub struct CountingTelemetry {
    pub started: AtomicU64,
    pub succeeded: AtomicU64,
    pub failed: AtomicU64,
}

impl CountingTelemetry {
    /// Get a snapshot of current counters
    pub fn snapshot(&self) -> TelemetrySnapshot {
        TelemetrySnapshot {
            started: self.started.load(Ordering::Relaxed),
            succeeded: self.succeeded.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
        }
    }
}

impl Telemetry for CountingTelemetry {
    fn download_started(&self, _name: &str) {
        self.started.fetch_add(1, Ordering::Relaxed);
    }

    fn download_succeeded(&self, _name: &str) {
        self.succeeded.fetch_add(1, Ordering::Relaxed);
    }

    fn download_failed(&self, _name: &str, _message: &str) {
        self.failed.fetch_add(1, Ordering::Relaxed);
    }
}

/// Immutable snapshot of telemetry counters
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TelemetrySnapshot {
    pub started: u64,
    pub succeeded: u64,
    pub failed: u64,
}

impl TelemetrySnapshot {
    /// Downloads started that have not reached success or failure
    pub fn unfinished(&self) -> u64 {
        self.started.saturating_sub(self.succeeded + self.failed)
    }
}

/// Telemetry that forwards events to multiple sinks
#[derive(Default)]
pub struct CompositeTelemetry {
    sinks: Vec<Box<dyn Telemetry>>,
}

impl std::fmt::Debug for CompositeTelemetry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CompositeTelemetry")
            .field("sinks_count", &self.sinks.len())
            .finish()
    }
}

impl CompositeTelemetry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_sink<T: Telemetry + 'static>(mut self, sink: T) -> Self {
        self.sinks.push(Box::new(sink));
        self
    }
}

impl Telemetry for CompositeTelemetry {
    fn download_started(&self, name: &str) {
        for sink in &self.sinks {
            sink.download_started(name);
        }
    }

    fn download_succeeded(&self, name: &str) {
        for sink in &self.sinks {
            sink.download_succeeded(name);
        }
    }

    fn download_failed(&self, name: &str, message: &str) {
        for sink in &self.sinks {
            sink.download_failed(name, message);
        }
    }
}
