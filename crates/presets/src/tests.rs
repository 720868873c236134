//! Queue and worker tests against a local HTTP server

use super::*;
use crate::install::archive::tests::build_zip;
use crate::install::state;
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::{tempdir, TempDir};
use tokio::sync::mpsc;
use wiremock::{
    matchers::{method, path},
    Mock, MockServer, ResponseTemplate,
};

/// Outcome seen by a listener
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Event {
    Completed(PresetId),
    Failed(PresetId),
}

/// Listener that forwards every callback to a channel
struct ChannelListener {
    sender: mpsc::UnboundedSender<Event>,
}

impl ChannelListener {
    fn new() -> (Arc<Self>, mpsc::UnboundedReceiver<Event>) {
        let (sender, receiver) = mpsc::unbounded_channel();
        (Arc::new(Self { sender }), receiver)
    }
}

impl DownloadEventListener for ChannelListener {
    fn on_download_completed(&self, id: PresetId) {
        let _ = self.sender.send(Event::Completed(id));
    }

    fn on_download_failed(&self, id: PresetId) {
        let _ = self.sender.send(Event::Failed(id));
    }
}

/// Notifier that records what users would have been told
#[derive(Debug, Default)]
struct RecordingNotifier {
    installed: Mutex<Vec<String>>,
    failed: Mutex<Vec<Vec<String>>>,
}

impl Notifier for RecordingNotifier {
    fn preset_installed(&self, name: &str) {
        self.installed.lock().unwrap().push(name.to_string());
    }

    fn presets_failed(&self, names: &[String]) {
        self.failed.lock().unwrap().push(names.to_vec());
    }
}

fn test_config(root: &Path) -> PresetConfig {
    let mut config = PresetConfig::new(root.join("download"), root.join("temp"));
    config.chunk_size = 64;
    config
}

fn preset_archive(id: PresetId) -> Vec<u8> {
    let readme = format!("preset {}", id);
    build_zip(&[
        ("samples/", b""),
        ("samples/kick.wav", &[id as u8; 300]),
        ("readme.txt", readme.as_bytes()),
    ])
}

/// Serve `body` at `/presets/<id>.zip`, optionally after `delay`
async fn serve(server: &MockServer, id: PresetId, status: u16, body: Vec<u8>, delay: Option<Duration>) -> String {
    let mut response = ResponseTemplate::new(status).set_body_bytes(body);
    if let Some(delay) = delay {
        response = response.set_delay(delay);
    }
    let route = format!("/presets/{}.zip", id);
    Mock::given(method("GET"))
        .and(path(route.as_str()))
        .respond_with(response)
        .mount(server)
        .await;
    format!("{}{}", server.uri(), route)
}

async fn serve_preset(server: &MockServer, id: PresetId, delay: Option<Duration>) -> DownloadRequest {
    let url = serve(server, id, 200, preset_archive(id), delay).await;
    DownloadRequest::new(id, format!("Preset {}", id), url)
}

async fn next_event(receiver: &mut mpsc::UnboundedReceiver<Event>) -> Event {
    tokio::time::timeout(Duration::from_secs(10), receiver.recv())
        .await
        .expect("timed out waiting for a listener event")
        .expect("listener channel closed")
}

/// Give stray callbacks a chance to show up, then assert none did
async fn assert_no_more_events(receiver: &mut mpsc::UnboundedReceiver<Event>) {
    tokio::time::sleep(Duration::from_millis(300)).await;
    assert_eq!(receiver.try_recv().ok(), None);
}

struct Fixture {
    _temp_dir: TempDir,
    manager: PresetManager,
    telemetry: Arc<CountingTelemetry>,
    notifier: Arc<RecordingNotifier>,
    events: mpsc::UnboundedReceiver<Event>,
}

fn fixture() -> Fixture {
    let temp_dir = tempdir().unwrap();
    let telemetry = Arc::new(CountingTelemetry::default());
    let notifier = Arc::new(RecordingNotifier::default());
    let manager = PresetManager::builder(test_config(temp_dir.path()))
        .with_telemetry(telemetry.clone())
        .with_notifier(notifier.clone())
        .build()
        .unwrap();
    let (listener, events) = ChannelListener::new();
    manager.add_listener(listener);

    Fixture {
        _temp_dir: temp_dir,
        manager,
        telemetry,
        notifier,
        events,
    }
}

#[cfg(test)]
mod queue_tests {
    use super::*;

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_completions_arrive_in_fifo_order() {
        let server = MockServer::start().await;
        let mut fx = fixture();

        for id in 1..=3 {
            let request = serve_preset(&server, id, None).await;
            fx.manager.enqueue(request);
        }

        assert_eq!(next_event(&mut fx.events).await, Event::Completed(1));
        assert_eq!(next_event(&mut fx.events).await, Event::Completed(2));
        assert_eq!(next_event(&mut fx.events).await, Event::Completed(3));

        assert!(fx.manager.queue().queued_ids().is_empty());
        assert!(fx.manager.queue().is_idle());
        assert_eq!(fx.manager.current_active_id(), None);
        for id in 1..=3 {
            assert!(fx.manager.is_installed(id));
            assert_eq!(fx.manager.progress_for(id), PresetStatus::Completed);
        }

        let snapshot = fx.telemetry.snapshot();
        assert_eq!(snapshot.started, 3);
        assert_eq!(snapshot.succeeded, 3);
        assert_eq!(snapshot.failed, 0);
        assert_eq!(
            *fx.notifier.installed.lock().unwrap(),
            vec!["Preset 1", "Preset 2", "Preset 3"]
        );
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_duplicate_enqueue_is_ignored() {
        let server = MockServer::start().await;
        let mut fx = fixture();
        let first = serve_preset(&server, 1, Some(Duration::from_millis(300))).await;
        let second = serve_preset(&server, 2, None).await;

        fx.manager.enqueue(first.clone());
        fx.manager.enqueue(first.clone());
        fx.manager.enqueue(second);
        fx.manager.enqueue(first);

        assert_eq!(fx.manager.queue().queued_ids(), vec![1, 2]);

        assert_eq!(next_event(&mut fx.events).await, Event::Completed(1));
        assert_eq!(next_event(&mut fx.events).await, Event::Completed(2));
        assert_no_more_events(&mut fx.events).await;
        assert_eq!(fx.telemetry.snapshot().started, 2);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_waiting_presets_report_in_queue() {
        let server = MockServer::start().await;
        let mut fx = fixture();
        let first = serve_preset(&server, 1, Some(Duration::from_millis(500))).await;
        let second = serve_preset(&server, 2, None).await;

        fx.manager.enqueue(first);
        fx.manager.enqueue(second);

        assert_eq!(fx.manager.current_active_id(), Some(1));
        assert!(matches!(fx.manager.progress_for(1), PresetStatus::Active(p) if p < 100));
        assert_eq!(fx.manager.progress_for(2), PresetStatus::InQueue);
        assert_eq!(fx.manager.progress_for(99), PresetStatus::Completed);

        assert_eq!(next_event(&mut fx.events).await, Event::Completed(1));
        assert_eq!(next_event(&mut fx.events).await, Event::Completed(2));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_progress_never_moves_backwards() {
        let server = MockServer::start().await;
        let mut fx = fixture();
        let request = serve_preset(&server, 1, Some(Duration::from_millis(100))).await;

        fx.manager.enqueue(request);

        let mut last = 0u8;
        while let PresetStatus::Active(percent) = fx.manager.progress_for(1) {
            assert!(percent >= last, "progress went from {} to {}", last, percent);
            assert!(percent <= 100);
            last = percent;
            tokio::time::sleep(Duration::from_millis(5)).await;
        }

        assert_eq!(next_event(&mut fx.events).await, Event::Completed(1));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_failure_clears_queue_and_reports_once() {
        let server = MockServer::start().await;
        let mut fx = fixture();
        let broken_url = serve(&server, 1, 404, b"gone".to_vec(), Some(Duration::from_millis(300))).await;
        let second = serve_preset(&server, 2, None).await;

        fx.manager.enqueue(DownloadRequest::new(1, "A", broken_url));
        fx.manager.enqueue(DownloadRequest::new(2, "B", second.remote_url));

        assert_eq!(next_event(&mut fx.events).await, Event::Failed(1));
        assert_eq!(fx.manager.progress_for(2), PresetStatus::Completed);
        assert!(fx.manager.queue().queued_ids().is_empty());
        assert!(fx.manager.queue().is_idle());
        assert_no_more_events(&mut fx.events).await;

        assert!(!fx.manager.is_installed(1));
        assert!(!fx.manager.is_installed(2));
        assert_eq!(
            *fx.notifier.failed.lock().unwrap(),
            vec![vec!["A".to_string(), "B".to_string()]]
        );
        let snapshot = fx.telemetry.snapshot();
        assert_eq!(snapshot.started, 1);
        assert_eq!(snapshot.failed, 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_queue_accepts_work_again_after_failure() {
        let server = MockServer::start().await;
        let mut fx = fixture();
        let broken_url = serve(&server, 1, 500, b"oops".to_vec(), None).await;

        fx.manager.enqueue(DownloadRequest::new(1, "A", broken_url));
        assert_eq!(next_event(&mut fx.events).await, Event::Failed(1));

        let retry = serve_preset(&server, 2, None).await;
        fx.manager.enqueue(retry);
        assert_eq!(next_event(&mut fx.events).await, Event::Completed(2));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_cancel_head_starts_next_without_events() {
        let server = MockServer::start().await;
        let mut fx = fixture();
        let first = serve_preset(&server, 1, Some(Duration::from_secs(3))).await;
        let second = serve_preset(&server, 2, None).await;

        fx.manager.enqueue(first);
        fx.manager.enqueue(second);
        // Let the first worker get as far as waiting on the response
        tokio::time::sleep(Duration::from_millis(200)).await;
        fx.manager.cancel(1);

        assert_eq!(fx.manager.progress_for(1), PresetStatus::Completed);
        assert_eq!(next_event(&mut fx.events).await, Event::Completed(2));
        assert_no_more_events(&mut fx.events).await;
        assert!(!fx.manager.is_installed(1));
        assert!(fx.manager.is_installed(2));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_cancel_waiting_preset_leaves_active_alone() {
        let server = MockServer::start().await;
        let mut fx = fixture();
        let first = serve_preset(&server, 1, Some(Duration::from_millis(300))).await;
        let second = serve_preset(&server, 2, None).await;
        let third = serve_preset(&server, 3, None).await;

        fx.manager.enqueue(first);
        fx.manager.enqueue(second);
        fx.manager.enqueue(third);
        fx.manager.cancel(2);

        assert_eq!(fx.manager.queue().queued_ids(), vec![1, 3]);
        assert_eq!(fx.manager.current_active_id(), Some(1));

        assert_eq!(next_event(&mut fx.events).await, Event::Completed(1));
        assert_eq!(next_event(&mut fx.events).await, Event::Completed(3));
        assert_no_more_events(&mut fx.events).await;
        assert!(!fx.manager.is_installed(2));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_fresh_install_replaces_stale_directory() {
        let server = MockServer::start().await;
        let mut fx = fixture();
        let stale_dir = fx.manager.config().preset_dir(5);
        std::fs::create_dir_all(&stale_dir).unwrap();
        std::fs::write(stale_dir.join("stale.wav"), b"old").unwrap();
        std::fs::write(stale_dir.join(state::VERSION_FILE_NAME), b"0.9").unwrap();

        let request = serve_preset(&server, 5, None).await.with_version("1.0");
        fx.manager.enqueue(request);

        assert_eq!(next_event(&mut fx.events).await, Event::Completed(5));
        assert!(!stale_dir.join("stale.wav").exists());
        assert!(!stale_dir.join(state::VERSION_FILE_NAME).exists());
        assert_eq!(std::fs::read(stale_dir.join("samples/kick.wav")).unwrap(), vec![5u8; 300]);
        assert!(fx.manager.installed_version_matches(5, Some("1.0")));
        assert!(!fx.manager.installed_version_matches(5, Some("0.9")));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_removed_listener_hears_nothing() {
        let server = MockServer::start().await;
        let mut fx = fixture();
        let (listener, mut removed_events) = ChannelListener::new();
        let listener: Arc<dyn DownloadEventListener> = listener;
        fx.manager.add_listener(listener.clone());
        fx.manager.remove_listener(&listener);

        let request = serve_preset(&server, 1, None).await;
        fx.manager.enqueue(request);

        assert_eq!(next_event(&mut fx.events).await, Event::Completed(1));
        assert_eq!(removed_events.try_recv().ok(), None);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_listener_may_query_queue_from_callback() {
        struct QueryingListener {
            queue: DownloadQueue,
            sender: mpsc::UnboundedSender<(PresetId, PresetStatus)>,
        }

        impl DownloadEventListener for QueryingListener {
            fn on_download_completed(&self, id: PresetId) {
                let _ = self.sender.send((id, self.queue.progress_for(id)));
            }
        }

        let server = MockServer::start().await;
        let fx = fixture();
        let (sender, mut receiver) = mpsc::unbounded_channel();
        fx.manager.add_listener(Arc::new(QueryingListener {
            queue: fx.manager.queue().clone(),
            sender,
        }));

        let request = serve_preset(&server, 1, None).await;
        fx.manager.enqueue(request);

        let (id, status) = tokio::time::timeout(Duration::from_secs(10), receiver.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(id, 1);
        assert_eq!(status, PresetStatus::Completed);
        fx.manager.shutdown();
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_staging_dir_is_left_alone_while_downloading() {
        let server = MockServer::start().await;
        let mut fx = fixture();
        let request = serve_preset(&server, 1, Some(Duration::from_millis(500))).await;

        fx.manager.enqueue(request);
        // The worker has emptied the staging directory and waits on the response
        tokio::time::sleep(Duration::from_millis(150)).await;
        let marker = fx.manager.config().temp_dir.join("keep.me");
        std::fs::write(&marker, b"in use").unwrap();

        assert!(!fx.manager.clean_staging_dir().unwrap());
        assert!(marker.exists());

        assert_eq!(next_event(&mut fx.events).await, Event::Completed(1));
        assert!(fx.manager.clean_staging_dir().unwrap());
        assert!(!marker.exists());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_shutdown_stops_active_download() {
        let server = MockServer::start().await;
        let mut fx = fixture();
        let request = serve_preset(&server, 1, Some(Duration::from_secs(3))).await;

        fx.manager.enqueue(request);
        tokio::time::sleep(Duration::from_millis(100)).await;
        fx.manager.shutdown();

        assert!(fx.manager.queue().is_idle());
        assert_eq!(fx.manager.progress_for(1), PresetStatus::Completed);
        assert_no_more_events(&mut fx.events).await;
        assert!(!fx.manager.is_installed(1));
    }
}

#[cfg(test)]
mod worker_tests {
    use super::*;
    use crate::download::{HttpFetcher, InstallLayout};
    use tokio::runtime::Handle;

    fn worker_setup(root: &Path, request: &DownloadRequest) -> (HttpFetcher, InstallLayout) {
        let config = test_config(root);
        let fetcher = HttpFetcher::from_config(&config).unwrap();
        (fetcher, InstallLayout::for_request(&config, request))
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_worker_completes_with_full_progress() {
        let server = MockServer::start().await;
        let temp_dir = tempdir().unwrap();
        let request = serve_preset(&server, 1, None).await.with_version("3");
        let (fetcher, layout) = worker_setup(temp_dir.path(), &request);
        let target = layout.target_dir.clone();

        let mut worker = PresetWorker::new(request);
        let receiver = worker.start(&Handle::current(), fetcher.clone(), layout.clone()).unwrap();
        assert!(worker.start(&Handle::current(), fetcher, layout).is_none());

        let outcome = receiver.await.unwrap();

        assert!(matches!(outcome, WorkerOutcome::Completed));
        assert_eq!(worker.progress(), 100);
        assert_eq!(worker.state(), WorkerState::Completed);
        assert!(state::is_installed(&target));
        assert_eq!(state::read_version(&target).unwrap().as_deref(), Some("3"));
        assert!(target.join(state::VERSION_FILE_NAME_EXT).exists());
        assert!(target.join(state::INSURANCE_FILE_NAME_EXT).exists());
    }

    #[tokio::test]
    async fn test_worker_fails_on_invalid_url() {
        let temp_dir = tempdir().unwrap();
        let request = DownloadRequest::new(1, "Broken", "not a url");
        let (fetcher, layout) = worker_setup(temp_dir.path(), &request);
        let worker = PresetWorker::new(request);

        let outcome = worker.run(fetcher, layout).await;

        assert!(matches!(outcome, WorkerOutcome::Failed(PresetError::InvalidUrl { .. })));
        assert_eq!(worker.state(), WorkerState::Failed);
    }

    #[tokio::test]
    async fn test_worker_fails_on_empty_body_without_marker() {
        let server = MockServer::start().await;
        let temp_dir = tempdir().unwrap();
        let url = serve(&server, 1, 200, Vec::new(), None).await;
        let request = DownloadRequest::new(1, "Empty", url);
        let (fetcher, layout) = worker_setup(temp_dir.path(), &request);
        let target = layout.target_dir.clone();
        let worker = PresetWorker::new(request);

        let outcome = worker.run(fetcher, layout).await;

        assert!(matches!(outcome, WorkerOutcome::Failed(PresetError::NetworkOrStream { .. })));
        assert!(!state::is_installed(&target));
        assert!(worker.progress() < 100);
    }

    #[tokio::test]
    async fn test_worker_fails_on_corrupt_archive() {
        let server = MockServer::start().await;
        let temp_dir = tempdir().unwrap();
        let url = serve(&server, 1, 200, b"this is not a zip archive".to_vec(), None).await;
        let request = DownloadRequest::new(1, "Corrupt", url);
        let (fetcher, layout) = worker_setup(temp_dir.path(), &request);
        let target = layout.target_dir.clone();
        let worker = PresetWorker::new(request);

        let outcome = worker.run(fetcher, layout).await;

        match outcome {
            WorkerOutcome::Failed(error) => {
                assert!(matches!(error, PresetError::ArchiveRead { .. }));
                assert_eq!(worker.state(), WorkerState::Failed);
            }
            other => panic!("Expected a failed outcome, got {:?}", other),
        }
        assert!(!state::is_installed(&target));
    }

    #[tokio::test]
    async fn test_worker_installs_empty_archive() {
        let server = MockServer::start().await;
        let temp_dir = tempdir().unwrap();
        let url = serve(&server, 1, 200, build_zip(&[]), None).await;
        let request = DownloadRequest::new(1, "Empty archive", url);
        let (fetcher, layout) = worker_setup(temp_dir.path(), &request);
        let target = layout.target_dir.clone();
        let worker = PresetWorker::new(request);

        let outcome = worker.run(fetcher, layout).await;

        assert!(matches!(outcome, WorkerOutcome::Completed), "got {:?}", outcome);
        assert_eq!(worker.progress(), 100);
        assert!(state::is_installed(&target));
    }

    #[tokio::test]
    async fn test_worker_fails_when_version_marker_cannot_be_written() {
        let server = MockServer::start().await;
        let temp_dir = tempdir().unwrap();
        // A directory squatting on the version marker name
        let squatter = format!("{}/", state::VERSION_FILE_NAME_EXT);
        let archive = build_zip(&[("samples/kick.wav", b"kick"), (squatter.as_str(), b"")]);
        let url = serve(&server, 1, 200, archive, None).await;
        let request = DownloadRequest::new(1, "Squatted", url).with_version("2");
        let (fetcher, layout) = worker_setup(temp_dir.path(), &request);
        let target = layout.target_dir.clone();
        let worker = PresetWorker::new(request);

        let outcome = worker.run(fetcher, layout).await;

        assert!(
            matches!(outcome, WorkerOutcome::Failed(PresetError::MarkerWrite { .. })),
            "got {:?}",
            outcome
        );
        assert_eq!(worker.state(), WorkerState::Failed);
        assert_eq!(std::fs::read(target.join("samples/kick.wav")).unwrap(), b"kick");
        assert!(!target.join(state::INSURANCE_FILE_NAME_EXT).exists());
        assert!(!state::is_installed(&target));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_recycled_worker_delivers_no_outcome() {
        let server = MockServer::start().await;
        let temp_dir = tempdir().unwrap();
        let request = serve_preset(&server, 1, Some(Duration::from_secs(3))).await;
        let (fetcher, layout) = worker_setup(temp_dir.path(), &request);
        let target = layout.target_dir.clone();

        let mut worker = PresetWorker::new(request);
        let receiver = worker.start(&Handle::current(), fetcher, layout).unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(worker.state(), WorkerState::Fetching);
        worker.recycle();

        let delivered = tokio::time::timeout(Duration::from_secs(5), receiver).await.unwrap();
        assert!(delivered.is_err());
        assert!(worker.is_cancelled());
        assert_eq!(worker.state(), WorkerState::Cancelled);
        assert!(!state::is_installed(&target));
    }

    #[tokio::test]
    async fn test_cancelled_worker_reports_cancelled() {
        let server = MockServer::start().await;
        let temp_dir = tempdir().unwrap();
        let request = serve_preset(&server, 1, None).await;
        let (fetcher, layout) = worker_setup(temp_dir.path(), &request);
        let mut worker = PresetWorker::new(request);
        let run = worker.run(fetcher, layout);

        worker.recycle();
        let outcome = run.await;

        assert!(matches!(outcome, WorkerOutcome::Cancelled));
        assert_eq!(worker.state(), WorkerState::Cancelled);
    }
}
