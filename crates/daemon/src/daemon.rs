//! Daemon startup and watch loop for riparr
//!
//! Ties the disc watcher, the scheduler and the optional status endpoint
//! together.

use crate::config::{Config, ConfigError};
use crate::detect::{DiscEventHandler, DiscWatcher, WatchError};
use crate::jobs::JobStatus;
use crate::metadata::MetadataError;
use crate::queue::{Collaborators, ProcessOptions, QueueManager};
use crate::ripper::MakeMkvRipper;
use crate::startup::{run_startup_checks, StartupError};
use crate::status::{SharedStatus, StatusTracker};
use crate::status_server::run_status_server;
use async_trait::async_trait;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

/// Error type for daemon operations
#[derive(Debug, Error)]
pub enum DaemonError {
    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Startup check failed
    #[error("Startup check failed: {0}")]
    Startup(#[from] StartupError),

    /// Metadata clients could not be built
    #[error("Metadata client error: {0}")]
    Metadata(#[from] MetadataError),

    /// Disc watcher failed
    #[error("Disc watcher error: {0}")]
    Watch(#[from] WatchError),
}

/// Runs every inserted disc through the scheduler.
struct RipOnInsert {
    queue: Arc<QueueManager>,
}

#[async_trait]
impl DiscEventHandler for RipOnInsert {
    async fn on_insert(&self, device: &str) {
        info!(device, "disc inserted");
        let job = self
            .queue
            .process_disc(device, &ProcessOptions::default())
            .await;
        match job.status {
            JobStatus::Complete => info!(
                device,
                job_id = %job.id,
                files = job.output_files.len(),
                "disc processed"
            ),
            status => error!(
                device,
                job_id = %job.id,
                status = %status,
                error = job.last_error().unwrap_or("unknown"),
                "disc processing did not complete"
            ),
        }
    }

    async fn on_remove(&self, device: &str) {
        info!(device, "disc removed");
    }
}

/// Daemon state containing all runtime components
pub struct Daemon {
    /// Effective configuration (file plus environment)
    pub config: Arc<Config>,
    /// Rip scheduler and encode queue
    pub queue: Arc<QueueManager>,
    /// Live status, present when the status endpoint is enabled
    pub tracker: Option<Arc<StatusTracker>>,
}

impl Daemon {
    /// Initialize the daemon with configuration from file
    ///
    /// 1. Load config from file (defaults when absent) and apply env overrides
    /// 2. Run startup checks (makemkvcon, HandBrakeCLI, directories)
    /// 3. Register the MakeMKV license key when one is configured
    pub async fn new(config_path: Option<&Path>) -> Result<Self, DaemonError> {
        let config = Config::load_or_default(config_path)?;
        Self::with_config(config).await
    }

    /// Initialize the daemon with an already loaded configuration
    pub async fn with_config(config: Config) -> Result<Self, DaemonError> {
        run_startup_checks(&config)?;

        if let Some(key) = config.makemkv.license_key.as_deref() {
            let ripper = MakeMkvRipper::new(config.makemkv.path.clone());
            if let Err(e) = ripper.register_license(key).await {
                warn!(error = %e, "failed to register MakeMKV license key");
            }
        }

        Self::new_without_checks(config)
    }

    /// Initialize without startup checks or license registration.
    pub fn new_without_checks(config: Config) -> Result<Self, DaemonError> {
        let collab = Collaborators::from_config(&config)?;
        Ok(Self::with_collaborators(config, collab))
    }

    /// Build a daemon around explicit collaborators.
    pub fn with_collaborators(config: Config, collab: Collaborators) -> Self {
        let config = Arc::new(config);
        let tracker = config
            .status
            .enabled
            .then(|| Arc::new(StatusTracker::new()));
        let status = tracker.clone().map(|t| t as SharedStatus);
        let queue = Arc::new(QueueManager::new(config.clone(), collab, status));

        Self {
            config,
            queue,
            tracker,
        }
    }

    /// Watcher for `devices` (auto-detected when `None`) using the drive settings.
    pub fn watcher(&self, devices: Option<Vec<String>>) -> DiscWatcher {
        DiscWatcher::from_config(&self.config.drive, devices)
    }

    /// Start the status server in a background task
    ///
    /// Returns `None` when the status endpoint is disabled.
    pub fn start_status_server(&self, shutdown: CancellationToken) -> Option<JoinHandle<()>> {
        let tracker = self.tracker.clone()?;
        let bind = self.config.status.bind.clone();

        Some(tokio::spawn(async move {
            if let Err(e) = run_status_server(tracker, &bind, shutdown).await {
                error!(bind = %bind, error = %e, "status server error");
            }
        }))
    }

    /// Periodically refresh the queue listing shown by the status endpoint.
    pub fn start_queue_refresher(&self, shutdown: CancellationToken) -> Option<JoinHandle<()>> {
        self.tracker.as_ref()?;
        let queue = self.queue.clone();
        let period = Duration::from_secs(self.config.queue.poll_interval_secs.max(1));

        Some(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = ticker.tick() => queue.publish_queue().await,
                }
            }
        }))
    }

    /// Watch for discs until `watcher` stops.
    ///
    /// Interrupted encodes are requeued first. The drain loop runs alongside
    /// the watcher when encoding is enabled and is stopped once the watcher
    /// returns. The scheduler cannot be restarted afterwards.
    pub async fn run_watch(&self, watcher: &DiscWatcher, once: bool) -> Result<(), DaemonError> {
        let recovered = self.queue.recover_interrupted().await;
        if recovered > 0 {
            info!(recovered, "requeued interrupted encodes");
        }

        let shutdown = CancellationToken::new();
        let background: Vec<JoinHandle<()>> = [
            self.start_status_server(shutdown.clone()),
            self.start_queue_refresher(shutdown.clone()),
        ]
        .into_iter()
        .flatten()
        .collect();

        let drain = if self.config.encode.enabled {
            let queue = self.queue.clone();
            Some(tokio::spawn(async move { queue.process_queue().await }))
        } else {
            info!("encoding disabled, ripped files stay queued");
            None
        };

        let handler = RipOnInsert {
            queue: self.queue.clone(),
        };
        let result = watcher.start(&handler, once).await;

        self.queue.stop();
        if let Some(drain) = drain {
            if let Err(e) = drain.await {
                warn!(error = %e, "queue processor task failed");
            }
        }

        shutdown.cancel();
        for handle in background {
            let _ = handle.await;
        }

        result.map_err(DaemonError::from)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DetectionMethod;
    use crate::detect::{CommandEjector, DiscProbe};
    use crate::disc::{Disc, Title};
    use crate::encode::{EncodeError, EncodeOptions, EncodeProgressFn, Encoder};
    use crate::markers::MarkerStatus;
    use crate::metadata::{DiscIdError, DiscIdentifier, DiscLookup, TitleSearch};
    use crate::disc::DiscMetadata;
    use crate::ripper::{RipError, RipProgressFn, Ripper};
    use parking_lot::Mutex;
    use std::collections::VecDeque;
    use std::fs;
    use std::path::PathBuf;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tempfile::TempDir;

    /// One 2 hour title per disc, written straight to disk.
    struct OneTitleRipper;

    #[async_trait]
    impl Ripper for OneTitleRipper {
        async fn scan_disc(&self, device: &str) -> Result<Disc, RipError> {
            let mut disc = Disc::new(device);
            disc.name = "HOME_MOVIE".to_string();
            disc.titles = vec![Title::new(0, 7200)];
            Ok(disc)
        }

        async fn rip_title(
            &self,
            _device: &str,
            title_index: u32,
            out_dir: &Path,
            _on_progress: Option<RipProgressFn>,
        ) -> Result<PathBuf, RipError> {
            let path = out_dir.join(format!("title_t{:02}.mkv", title_index));
            fs::write(&path, b"matroska")?;
            Ok(path)
        }
    }

    #[derive(Default)]
    struct CountingEncoder {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl Encoder for CountingEncoder {
        async fn encode(
            &self,
            _input: &Path,
            output: &Path,
            _options: &EncodeOptions,
            _on_progress: Option<EncodeProgressFn>,
        ) -> Result<PathBuf, EncodeError> {
            if let Some(parent) = output.parent() {
                fs::create_dir_all(parent)?;
            }
            fs::write(output, b"encoded")?;
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(output.to_path_buf())
        }
    }

    struct Unidentified;

    impl DiscIdentifier for Unidentified {
        fn compute_disc_id(&self, _device: &str) -> Result<String, DiscIdError> {
            Err(DiscIdError::NoVideoTs(PathBuf::from("/mnt")))
        }
    }

    #[async_trait]
    impl DiscLookup for Unidentified {
        async fn lookup(&self, _disc_id: &str) -> Result<Option<DiscMetadata>, MetadataError> {
            Ok(None)
        }
    }

    #[async_trait]
    impl TitleSearch for Unidentified {
        async fn search(
            &self,
            _title: &str,
            _year: Option<u16>,
        ) -> Result<Option<DiscMetadata>, MetadataError> {
            Ok(None)
        }
    }

    /// Replays presence states; stays on the last one.
    struct Presence(Mutex<VecDeque<bool>>);

    impl DiscProbe for Presence {
        fn has_disc(&self, _device: &str) -> bool {
            let mut states = self.0.lock();
            if states.len() > 1 {
                states.pop_front().unwrap_or(false)
            } else {
                states.front().copied().unwrap_or(false)
            }
        }
    }

    fn create_test_daemon(encode: bool) -> (TempDir, Daemon, Arc<CountingEncoder>) {
        let tmp = tempfile::tempdir().unwrap();
        let mut config = Config::default();
        config.paths.raw_dir = tmp.path().join("raw");
        config.paths.output_dir = tmp.path().join("media");
        config.drive.eject_after_rip = false;
        config.drive.detection_method = DetectionMethod::Polling;
        config.encode.enabled = encode;
        config.queue.poll_interval_secs = 1;
        fs::create_dir_all(&config.paths.raw_dir).unwrap();

        let encoder = Arc::new(CountingEncoder::default());
        let collab = Collaborators {
            ripper: Arc::new(OneTitleRipper),
            encoder: encoder.clone(),
            identifier: Arc::new(Unidentified),
            disc_lookup: Arc::new(Unidentified),
            title_search: Arc::new(Unidentified),
            ejector: Arc::new(CommandEjector::default()),
        };
        (tmp, Daemon::with_collaborators(config, collab), encoder)
    }

    fn test_watcher(states: &[bool]) -> DiscWatcher {
        DiscWatcher::new(
            Some(vec!["/dev/sr0".to_string()]),
            DetectionMethod::Polling,
            Duration::from_secs(1),
        )
        .with_probe(Arc::new(Presence(Mutex::new(states.iter().copied().collect()))))
        .with_poll_interval(Duration::from_millis(5))
    }

    #[test]
    fn test_daemon_initialization_without_checks() {
        let mut config = Config::default();
        config.status.enabled = true;
        let daemon = Daemon::new_without_checks(config).unwrap();
        assert!(daemon.tracker.is_some());

        let daemon = Daemon::new_without_checks(Config::default()).unwrap();
        assert!(daemon.tracker.is_none());
    }

    #[tokio::test]
    async fn test_status_tasks_only_when_enabled() {
        let (_tmp, daemon, _) = create_test_daemon(true);
        let shutdown = CancellationToken::new();
        assert!(daemon.start_status_server(shutdown.clone()).is_none());
        assert!(daemon.start_queue_refresher(shutdown).is_none());
    }

    #[tokio::test]
    async fn test_watch_once_rips_inserted_disc() {
        let (tmp, daemon, _) = create_test_daemon(false);
        let watcher = test_watcher(&[false, true]);

        tokio::time::timeout(Duration::from_secs(10), daemon.run_watch(&watcher, true))
            .await
            .expect("watcher stops after the first disc")
            .unwrap();

        let ready = daemon.queue.markers().list_jobs(Some(MarkerStatus::Ready));
        assert_eq!(ready.len(), 1);
        assert!(ready[0].path.starts_with(tmp.path().join("raw").join("HOME MOVIE")));
    }

    #[tokio::test]
    async fn test_watch_recovers_and_drains_interrupted_encode() {
        let (tmp, daemon, encoder) = create_test_daemon(true);
        let dir = tmp.path().join("raw").join("Old Disc");
        fs::create_dir_all(&dir).unwrap();
        let file = dir.join("title_t00.mkv");
        fs::write(&file, b"matroska").unwrap();
        daemon
            .queue
            .markers()
            .create_marker(&file, MarkerStatus::Transcoding, None, None)
            .unwrap();

        let watcher = test_watcher(&[false]);
        let stop = watcher.stop_token();
        let watched = encoder.clone();
        tokio::spawn(async move {
            while watched.calls.load(Ordering::SeqCst) == 0 {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
            stop.cancel();
        });

        tokio::time::timeout(Duration::from_secs(10), daemon.run_watch(&watcher, false))
            .await
            .expect("watch loop ends once the queue is drained")
            .unwrap();

        assert_eq!(encoder.calls.load(Ordering::SeqCst), 1);
        assert!(!file.exists());
        assert!(daemon.queue.markers().list_jobs(None).is_empty());
    }
}
