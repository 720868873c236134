//! Single-flight download queue
//!
//! The queue keeps pending requests in FIFO order and runs exactly one
//! [`PresetWorker`] at a time. Completion of the head starts the next request;
//! a failure fails the whole pending batch and clears the queue, on the premise
//! that whatever broke one download (no network, full disk) breaks the rest.
//! Nothing is retried; callers re-enqueue if they want another attempt.

pub mod events;

pub use events::{
    CompositeTelemetry, CountingTelemetry, DownloadEventListener, Notifier, NullNotifier,
    NullTelemetry, Telemetry, TelemetrySnapshot, TracingNotifier, TracingTelemetry,
};

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use tokio::runtime::Handle;
use tracing::{debug, warn};

use crate::config::PresetConfig;
use crate::core::{DownloadRequest, PresetError, PresetId, PresetStatus, Result};
use crate::download::http::HttpFetcher;
use crate::download::storage;
use crate::download::worker::{InstallLayout, PresetWorker, WorkerOutcome};

/// Collaborators the queue reports to
#[derive(Clone)]
pub struct QueueHooks {
    pub notifier: Arc<dyn Notifier>,
    pub telemetry: Arc<dyn Telemetry>,
}

impl QueueHooks {
    pub fn with_notifier(mut self, notifier: Arc<dyn Notifier>) -> Self {
        self.notifier = notifier;
        self
    }

    pub fn with_telemetry(mut self, telemetry: Arc<dyn Telemetry>) -> Self {
        self.telemetry = telemetry;
        self
    }
}

impl Default for QueueHooks {
    fn default() -> Self {
        Self {
            notifier: Arc::new(TracingNotifier),
            telemetry: Arc::new(TracingTelemetry),
        }
    }
}

impl std::fmt::Debug for QueueHooks {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QueueHooks").finish_non_exhaustive()
    }
}

/// Coordinator that serializes preset downloads
///
/// Cloning yields another handle to the same queue.
#[derive(Clone)]
pub struct DownloadQueue {
    inner: Arc<QueueInner>,
}

struct QueueInner {
    config: PresetConfig,
    fetcher: HttpFetcher,
    runtime: Handle,
    hooks: QueueHooks,
    state: Mutex<QueueState>,
    listeners: Mutex<Vec<Arc<dyn DownloadEventListener>>>,
}

#[derive(Default)]
struct QueueState {
    entries: VecDeque<DownloadRequest>,
    active: Option<ActiveDownload>,
    next_generation: u64,
}

/// The running worker together with the ticket its outcome must present
struct ActiveDownload {
    generation: u64,
    worker: PresetWorker,
}

/// Side effects collected under the lock and delivered after releasing it
enum Dispatch {
    Started {
        name: String,
    },
    Completed {
        id: PresetId,
        name: String,
    },
    Failed {
        id: PresetId,
        name: String,
        queued_names: Vec<String>,
        message: String,
    },
}

impl DownloadQueue {
    /// Create a queue with the default tracing-backed hooks
    ///
    /// Must be called from within a Tokio runtime; workers are spawned on it.
    pub fn new(config: PresetConfig) -> Result<Self> {
        Self::with_hooks(config, QueueHooks::default())
    }

    pub fn with_hooks(config: PresetConfig, hooks: QueueHooks) -> Result<Self> {
        config.validate()?;
        let runtime = Handle::try_current().map_err(|e| PresetError::Configuration {
            message: format!("download queue must be created inside a Tokio runtime: {}", e),
            field: None,
        })?;
        let fetcher = HttpFetcher::from_config(&config)?;

        Ok(Self {
            inner: Arc::new(QueueInner {
                config,
                fetcher,
                runtime,
                hooks,
                state: Mutex::new(QueueState::default()),
                listeners: Mutex::new(Vec::new()),
            }),
        })
    }

    pub fn config(&self) -> &PresetConfig {
        &self.inner.config
    }

    /// Add a request to the tail of the queue
    ///
    /// A request whose id is already queued is ignored. If nothing is running
    /// the new head starts immediately.
    pub fn enqueue(&self, request: DownloadRequest) {
        debug!(
            "Adding preset {} id: {} to download queue",
            request.display_name, request.id
        );
        let mut dispatch = Vec::new();
        {
            let mut state = self.inner.lock_state();
            if state.entries.iter().any(|queued| queued.id == request.id) {
                debug!("Preset {} is already in queue", request.id);
                log_queue(&state);
                return;
            }
            state.entries.push_back(request);
            log_queue(&state);

            if state.active.is_none() {
                debug!("No download running, starting immediately");
                self.inner.advance(&mut state, &mut dispatch);
            }
        }
        self.inner.dispatch(dispatch);
    }

    /// Cancel a queued or running download
    ///
    /// Cancelling the running download starts the next one; no listener hears
    /// about the cancelled id.
    pub fn cancel(&self, id: PresetId) {
        let mut dispatch = Vec::new();
        {
            let mut state = self.inner.lock_state();
            let is_head = match state.entries.front() {
                None => {
                    debug!("Can't cancel preset {} download: queue empty", id);
                    return;
                }
                Some(head) => head.id == id,
            };

            if is_head {
                if let Some(mut active) = state.active.take() {
                    active.worker.recycle();
                }
                state.entries.pop_front();
                self.inner.advance(&mut state, &mut dispatch);
            } else {
                state.entries.retain(|queued| queued.id != id);
            }
            debug!("Download of preset {} removed from queue", id);
            log_queue(&state);
        }
        self.inner.dispatch(dispatch);
    }

    /// Progress of `id`: running, waiting, or no longer queued
    pub fn progress_for(&self, id: PresetId) -> PresetStatus {
        let state = self.inner.lock_state();
        let Some(head) = state.entries.front() else {
            return PresetStatus::Completed;
        };
        if state.entries.iter().skip(1).any(|queued| queued.id == id) {
            return PresetStatus::InQueue;
        }
        if head.id == id {
            let percent = state
                .active
                .as_ref()
                .map(|active| active.worker.progress())
                .unwrap_or(0);
            return PresetStatus::Active(percent);
        }
        PresetStatus::Completed
    }

    /// Progress of whatever is running, 0 when idle
    pub fn current_progress(&self) -> u8 {
        self.inner
            .lock_state()
            .active
            .as_ref()
            .map(|active| active.worker.progress())
            .unwrap_or(0)
    }

    /// Id of the running download, `None` when idle
    pub fn current_active_id(&self) -> Option<PresetId> {
        self.inner
            .lock_state()
            .active
            .as_ref()
            .map(|active| active.worker.request().id)
    }

    pub fn queued_ids(&self) -> Vec<PresetId> {
        self.inner.lock_state().entries.iter().map(|queued| queued.id).collect()
    }

    pub fn is_idle(&self) -> bool {
        self.inner.lock_state().active.is_none()
    }

    pub fn add_listener(&self, listener: Arc<dyn DownloadEventListener>) {
        self.inner.lock_listeners().push(listener);
    }

    pub fn remove_listener(&self, listener: &Arc<dyn DownloadEventListener>) {
        self.inner
            .lock_listeners()
            .retain(|registered| !Arc::ptr_eq(registered, listener));
    }

    /// Empty the staging directory unless a download is running
    ///
    /// The queue lock is held throughout so no worker can start staging an
    /// archive while the directory is being emptied.
    pub fn clean_staging_dir(&self) -> Result<bool> {
        let state = self.inner.lock_state();
        if state.active.is_some() {
            warn!("Not cleaning staging directory while a download is running");
            return Ok(false);
        }
        storage::clean_directory(&self.inner.config.temp_dir)?;
        Ok(true)
    }

    /// Stop the running download and drop everything pending
    pub fn shutdown(&self) {
        let mut state = self.inner.lock_state();
        if let Some(mut active) = state.active.take() {
            active.worker.recycle();
            debug!("Current download is recycled");
        }
        state.entries.clear();
    }
}

impl std::fmt::Debug for DownloadQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DownloadQueue")
            .field("queued", &self.queued_ids())
            .finish()
    }
}

impl QueueInner {
    fn lock_state(&self) -> MutexGuard<'_, QueueState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn lock_listeners(&self) -> MutexGuard<'_, Vec<Arc<dyn DownloadEventListener>>> {
        self.listeners.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Discard the current worker and start one for the head, if any
    fn advance(self: &Arc<Self>, state: &mut QueueState, dispatch: &mut Vec<Dispatch>) {
        if let Some(mut active) = state.active.take() {
            active.worker.recycle();
        }

        let Some(head) = state.entries.front().cloned() else {
            debug!("All downloads have completed");
            return;
        };

        let generation = state.next_generation;
        state.next_generation += 1;

        let layout = InstallLayout::for_request(&self.config, &head);
        let mut worker = PresetWorker::new(head.clone());
        if let Some(receiver) = worker.start(&self.runtime, self.fetcher.clone(), layout) {
            let queue: Weak<QueueInner> = Arc::downgrade(self);
            self.runtime.spawn(async move {
                // An aborted worker drops its sender; there is nothing to report then
                if let Ok(outcome) = receiver.await {
                    if let Some(queue) = queue.upgrade() {
                        queue.on_worker_completed(generation, outcome);
                    }
                }
            });
        }

        debug!("Started download of preset {} ({})", head.id, head.display_name);
        state.active = Some(ActiveDownload { generation, worker });
        dispatch.push(Dispatch::Started {
            name: head.display_name,
        });
    }

    fn on_worker_completed(self: &Arc<Self>, generation: u64, outcome: WorkerOutcome) {
        let mut dispatch = Vec::new();
        {
            let mut state = self.lock_state();
            let request = match &state.active {
                Some(active) if active.generation == generation => active.worker.request().clone(),
                _ => {
                    debug!("Ignoring outcome of a discarded download");
                    return;
                }
            };

            match outcome {
                WorkerOutcome::Completed => {
                    if let Some(position) = state.entries.iter().position(|queued| queued.id == request.id) {
                        state.entries.remove(position);
                    }
                    debug!("Preset downloaded: {}", request.display_name);
                    dispatch.push(Dispatch::Completed {
                        id: request.id,
                        name: request.display_name,
                    });
                    self.advance(&mut state, &mut dispatch);
                }
                WorkerOutcome::Failed(error) => {
                    let queued_names = state
                        .entries
                        .iter()
                        .map(|queued| queued.display_name.clone())
                        .collect();
                    state.entries.clear();
                    if let Some(mut active) = state.active.take() {
                        active.worker.recycle();
                    }
                    debug!("Download queue is cleared");
                    dispatch.push(Dispatch::Failed {
                        id: request.id,
                        name: request.display_name,
                        queued_names,
                        message: error.detailed_message(),
                    });
                }
                WorkerOutcome::Cancelled => {
                    debug!("Preset {} reported cancellation", request.id);
                }
            }
        }
        self.dispatch(dispatch);
    }

    fn dispatch(&self, events: Vec<Dispatch>) {
        if events.is_empty() {
            return;
        }
        let listeners = self.lock_listeners().clone();

        for event in events {
            match event {
                Dispatch::Started { name } => {
                    self.hooks.telemetry.download_started(&name);
                }
                Dispatch::Completed { id, name } => {
                    self.hooks.telemetry.download_succeeded(&name);
                    self.hooks.notifier.preset_installed(&name);
                    for listener in &listeners {
                        listener.on_download_completed(id);
                    }
                }
                Dispatch::Failed {
                    id,
                    name,
                    queued_names,
                    message,
                } => {
                    self.hooks.telemetry.download_failed(&name, &message);
                    self.hooks.notifier.presets_failed(&queued_names);
                    for listener in &listeners {
                        listener.on_download_failed(id);
                    }
                }
            }
        }
    }
}

fn log_queue(state: &QueueState) {
    let ids: Vec<PresetId> = state.entries.iter().map(|queued| queued.id).collect();
    debug!("Presets download queue: {:?}", ids);
}
