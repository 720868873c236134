//! Application-facing entry point
//!
//! [`PresetManager`] is built once at startup and handed around by reference.
//! It owns the download queue and answers install-state questions about the
//! configured download root.

use std::path::PathBuf;
use std::sync::Arc;
use tracing::debug;

use crate::config::PresetConfig;
use crate::core::{DownloadRequest, PresetId, PresetStatus, Result};
use crate::install::state;
use crate::queue::{DownloadEventListener, DownloadQueue, Notifier, QueueHooks, Telemetry};

/// Builder for [`PresetManager`]
#[derive(Debug)]
pub struct PresetManagerBuilder {
    config: PresetConfig,
    hooks: QueueHooks,
}

impl PresetManagerBuilder {
    pub fn with_notifier(mut self, notifier: Arc<dyn Notifier>) -> Self {
        self.hooks = self.hooks.with_notifier(notifier);
        self
    }

    pub fn with_telemetry(mut self, telemetry: Arc<dyn Telemetry>) -> Self {
        self.hooks = self.hooks.with_telemetry(telemetry);
        self
    }

    /// Validate the configuration and start the queue on the current runtime
    pub fn build(self) -> Result<PresetManager> {
        let queue = DownloadQueue::with_hooks(self.config, self.hooks)?;
        debug!(
            download_root = %queue.config().download_root.display(),
            "Preset manager ready"
        );
        Ok(PresetManager { queue })
    }
}

/// Owner of the download queue and the install-state queries
#[derive(Debug, Clone)]
pub struct PresetManager {
    queue: DownloadQueue,
}

impl PresetManager {
    /// Manager with tracing-backed notifier and telemetry
    pub fn new(config: PresetConfig) -> Result<Self> {
        Self::builder(config).build()
    }

    pub fn builder(config: PresetConfig) -> PresetManagerBuilder {
        PresetManagerBuilder {
            config,
            hooks: QueueHooks::default(),
        }
    }

    pub fn config(&self) -> &PresetConfig {
        self.queue.config()
    }

    pub fn queue(&self) -> &DownloadQueue {
        &self.queue
    }

    pub fn enqueue(&self, request: DownloadRequest) {
        self.queue.enqueue(request);
    }

    pub fn cancel(&self, id: PresetId) {
        self.queue.cancel(id);
    }

    pub fn progress_for(&self, id: PresetId) -> PresetStatus {
        self.queue.progress_for(id)
    }

    pub fn current_active_id(&self) -> Option<PresetId> {
        self.queue.current_active_id()
    }

    /// Whether the preset directory exists and carries a completion marker
    pub fn is_installed(&self, id: PresetId) -> bool {
        state::is_installed(&self.config().preset_dir(id))
    }

    /// Compare the installed version of `id` against `version`
    ///
    /// An unversioned install matches a missing, empty or `"0"` version.
    pub fn installed_version_matches(&self, id: PresetId, version: Option<&str>) -> bool {
        state::version_matches(&self.config().preset_dir(id), version)
    }

    /// Installed version string, if one was recorded
    pub fn installed_version(&self, id: PresetId) -> Result<Option<String>> {
        state::read_version(&self.config().preset_dir(id))
    }

    /// Directory of `id`, only if it exists on disk
    pub fn preset_dir(&self, id: PresetId) -> Option<PathBuf> {
        let dir = self.config().preset_dir(id);
        dir.is_dir().then_some(dir)
    }

    /// Empty the staging directory
    ///
    /// Returns `false` without touching anything while a download is running,
    /// since the active worker stages its archive there.
    pub fn clean_staging_dir(&self) -> Result<bool> {
        self.queue.clean_staging_dir()
    }

    pub fn add_listener(&self, listener: Arc<dyn DownloadEventListener>) {
        self.queue.add_listener(listener);
    }

    pub fn remove_listener(&self, listener: &Arc<dyn DownloadEventListener>) {
        self.queue.remove_listener(listener);
    }

    /// Cancel the running download and forget the pending ones
    pub fn shutdown(&self) {
        self.queue.shutdown();
    }
}
