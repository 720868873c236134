//! Fetch-and-install worker
//!
//! A worker owns one request for its whole life: it prepares the staging and
//! target directories, checks free space, streams the archive, extracts it and
//! finally writes the version and completion markers. The run happens on a
//! spawned task and reports its outcome exactly once over a oneshot channel.
//!
//! Control flow:
//!
//! Idle → Preparing → CheckingSpace → Fetching → Extracting
//! → WritingVersion → WritingMarker → Completed
//!
//! with an exit to `Failed` or `Cancelled` from every non-terminal state.

use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicU8, Ordering};
use tokio::runtime::Handle;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::config::PresetConfig;
use crate::core::{DownloadProgress, DownloadRequest, PresetError, Result};
use crate::download::http::HttpFetcher;
use crate::download::storage;
use crate::install::{archive, state};

/// Stage of a worker run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum WorkerState {
    Idle = 0,
    Preparing,
    CheckingSpace,
    Fetching,
    Extracting,
    WritingVersion,
    WritingMarker,
    Completed,
    Failed,
    Cancelled,
}

impl WorkerState {
    pub fn is_terminal(self) -> bool {
        matches!(self, WorkerState::Completed | WorkerState::Failed | WorkerState::Cancelled)
    }

    fn from_u8(value: u8) -> Self {
        match value {
            1 => WorkerState::Preparing,
            2 => WorkerState::CheckingSpace,
            3 => WorkerState::Fetching,
            4 => WorkerState::Extracting,
            5 => WorkerState::WritingVersion,
            6 => WorkerState::WritingMarker,
            7 => WorkerState::Completed,
            8 => WorkerState::Failed,
            9 => WorkerState::Cancelled,
            _ => WorkerState::Idle,
        }
    }
}

/// Atomic holder for the current stage; never leaves a terminal state
#[derive(Debug, Default)]
struct StateCell(AtomicU8);

impl StateCell {
    fn get(&self) -> WorkerState {
        WorkerState::from_u8(self.0.load(Ordering::Acquire))
    }

    fn transition(&self, next: WorkerState) -> bool {
        self.0
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |current| {
                if WorkerState::from_u8(current).is_terminal() {
                    None
                } else {
                    Some(next as u8)
                }
            })
            .is_ok()
    }
}

/// Terminal result of a worker run
#[derive(Debug)]
pub enum WorkerOutcome {
    Completed,
    Failed(PresetError),
    Cancelled,
}

impl WorkerOutcome {
    pub fn state(&self) -> WorkerState {
        match self {
            WorkerOutcome::Completed => WorkerState::Completed,
            WorkerOutcome::Failed(_) => WorkerState::Failed,
            WorkerOutcome::Cancelled => WorkerState::Cancelled,
        }
    }
}

/// Where one run stages and installs its files
#[derive(Debug, Clone)]
pub struct InstallLayout {
    pub temp_dir: PathBuf,
    pub staging_path: PathBuf,
    pub target_dir: PathBuf,
    pub chunk_size: usize,
}

impl InstallLayout {
    pub fn for_request(config: &PresetConfig, request: &DownloadRequest) -> Self {
        Self {
            temp_dir: config.temp_dir.clone(),
            staging_path: config.staging_path(),
            target_dir: config.preset_dir(request.id),
            chunk_size: config.chunk_size,
        }
    }
}

/// Runs a single request through the fetch-and-install pipeline
pub struct PresetWorker {
    request: DownloadRequest,
    cancel: CancellationToken,
    state: Arc<StateCell>,
    progress: DownloadProgress,
    task: Option<JoinHandle<()>>,
    started: bool,
}

impl PresetWorker {
    pub fn new(request: DownloadRequest) -> Self {
        Self {
            request,
            cancel: CancellationToken::new(),
            state: Arc::new(StateCell::default()),
            progress: DownloadProgress::new(),
            task: None,
            started: false,
        }
    }

    pub fn request(&self) -> &DownloadRequest {
        &self.request
    }

    pub fn state(&self) -> WorkerState {
        self.state.get()
    }

    /// Current weighted progress in percent
    pub fn progress(&self) -> u8 {
        self.progress.get()
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Spawn the run on `runtime`
    ///
    /// Returns the channel the single outcome arrives on, or `None` if the
    /// worker was already started. The sender is dropped without a value when
    /// the task is aborted by `recycle`.
    pub fn start(
        &mut self,
        runtime: &Handle,
        fetcher: HttpFetcher,
        layout: InstallLayout,
    ) -> Option<oneshot::Receiver<WorkerOutcome>> {
        if self.started {
            return None;
        }
        self.started = true;

        let (sender, receiver) = oneshot::channel();
        let run = self.run(fetcher, layout);
        self.task = Some(runtime.spawn(async move {
            let outcome = run.await;
            // Receiver may already be gone if the queue discarded us
            let _ = sender.send(outcome);
        }));
        Some(receiver)
    }

    /// Build the run future without spawning it
    pub fn run(
        &self,
        fetcher: HttpFetcher,
        layout: InstallLayout,
    ) -> impl std::future::Future<Output = WorkerOutcome> + Send + use<> {
        let run = Run {
            request: self.request.clone(),
            fetcher,
            layout,
            cancel: self.cancel.clone(),
            state: self.state.clone(),
            progress: self.progress.clone(),
        };
        async move { run.execute().await }
    }

    /// Request cancellation and stop the background task
    ///
    /// Cancellation is cooperative: blocking extraction notices it at the
    /// next chunk, the async fetch stops at its next await point.
    pub fn recycle(&mut self) {
        self.cancel.cancel();
        // An aborted run never reaches its own terminal transition
        self.state.transition(WorkerState::Cancelled);
        if let Some(task) = self.task.take() {
            task.abort();
            debug!("Recycled worker for preset {}", self.request.id);
        }
    }
}

impl Drop for PresetWorker {
    fn drop(&mut self) {
        self.recycle();
    }
}

struct Run {
    request: DownloadRequest,
    fetcher: HttpFetcher,
    layout: InstallLayout,
    cancel: CancellationToken,
    state: Arc<StateCell>,
    progress: DownloadProgress,
}

impl Run {
    async fn execute(self) -> WorkerOutcome {
        let id = self.request.id;
        match self.pipeline().await {
            Ok(()) => {
                self.progress.complete();
                self.state.transition(WorkerState::Completed);
                info!(preset_id = id, "Preset '{}' installed", self.request.display_name);
                WorkerOutcome::Completed
            }
            Err(e) if e.is_cancelled() => {
                self.state.transition(WorkerState::Cancelled);
                debug!(preset_id = id, "Preset download cancelled: {}", e);
                WorkerOutcome::Cancelled
            }
            Err(e) => {
                let stage = self.state.get();
                self.state.transition(WorkerState::Failed);
                error!(preset_id = id, ?stage, "Preset download failed: {}", e.detailed_message());
                WorkerOutcome::Failed(e)
            }
        }
    }

    async fn pipeline(&self) -> Result<()> {
        let url = self.request.parsed_url()?;
        let layout = self.layout.clone();

        self.enter(WorkerState::Preparing)?;
        {
            let layout = layout.clone();
            blocking(move || {
                storage::clean_directory(&layout.temp_dir)?;
                storage::remove_dir_if_present(&layout.target_dir)
            })
            .await?;
        }

        self.enter(WorkerState::CheckingSpace)?;
        let free_space = {
            let staging = layout.staging_path.clone();
            blocking(move || storage::free_space(&staging)).await?
        };
        if free_space == 0 {
            return Err(PresetError::InsufficientSpace {
                path: layout.staging_path.clone(),
                available: free_space,
            });
        }

        self.enter(WorkerState::Fetching)?;
        info!(preset_id = self.request.id, url = %url, "Fetching preset");
        self.fetcher
            .fetch_to_file(url.as_str(), &layout.staging_path, &self.cancel, &self.progress, free_space)
            .await?;

        self.enter(WorkerState::Extracting)?;
        {
            let layout = layout.clone();
            let cancel = self.cancel.clone();
            let progress = self.progress.clone();
            blocking(move || {
                archive::install(&layout.staging_path, &layout.target_dir, &cancel, &progress, layout.chunk_size)
            })
            .await?;
        }

        // Marker failures leave the extracted content in place; without the
        // completion marker the directory is not trusted anyway
        self.enter(WorkerState::WritingVersion)?;
        {
            let target = layout.target_dir.clone();
            let version = self.request.version_or_empty().to_string();
            blocking(move || state::write_version(&target, &version)).await?;
        }

        self.enter(WorkerState::WritingMarker)?;
        {
            let target = layout.target_dir.clone();
            blocking(move || state::write_completion_marker(&target)).await?;
        }

        Ok(())
    }

    fn enter(&self, next: WorkerState) -> Result<()> {
        if self.cancel.is_cancelled() {
            return Err(PresetError::cancelled(format!("cancelled before {:?}", next)));
        }
        self.state.transition(next);
        debug!(preset_id = self.request.id, "Worker entered {:?}", next);
        Ok(())
    }
}

async fn blocking<T, F>(f: F) -> Result<T>
where
    F: FnOnce() -> Result<T> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| PresetError::WorkerTask {
            reason: e.to_string(),
        })?
}
