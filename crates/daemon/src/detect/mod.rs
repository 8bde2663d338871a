//! Disc insertion and removal detection.
//!
//! [`DiscWatcher`] hides two backends behind one event stream: kernel uevents
//! relayed by udev ([`udev::UdevMonitor`]) and periodic device probing
//! ([`poller::DevicePoller`]). The backend is chosen once per `start`.

pub mod eject;
pub mod poller;
pub mod udev;

pub use eject::{CommandEjector, Ejector};
pub use poller::{scan_for_drives, DevicePoller, SystemProbe};
pub use udev::UdevMonitor;

use crate::config::{DetectionMethod, DriveConfig};
use async_trait::async_trait;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Shortest polling interval the watcher accepts.
pub const MIN_POLL_INTERVAL: Duration = Duration::from_secs(1);

#[derive(Debug, Error)]
pub enum WatchError {
    #[error("udev monitoring is not available on this system")]
    UdevUnavailable,

    #[error("No disc inserted within {0:?}")]
    Timeout(Duration),

    #[error("No optical drives found")]
    NoDrives,

    #[error("Netlink socket error: {0}")]
    Socket(#[from] nix::errno::Errno),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Receives disc events. Each call is awaited before the next event is read.
#[async_trait]
pub trait DiscEventHandler: Send + Sync {
    async fn on_insert(&self, device: &str);
    async fn on_remove(&self, device: &str);
}

/// Synchronous presence check for one device.
///
/// Implementations may block on device IO; the watcher always calls them on
/// the blocking pool.
pub trait DiscProbe: Send + Sync {
    fn has_disc(&self, device: &str) -> bool;
}

/// An optical drive and what is known about it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DriveInfo {
    pub device: String,
    pub model: String,
    pub vendor: String,
    pub has_disc: bool,
    pub capabilities: Vec<String>,
}

impl DriveInfo {
    /// Drive found by device-name scan, with no udev details.
    pub fn bare(device: impl Into<String>, has_disc: bool) -> Self {
        Self {
            device: device.into(),
            model: "Unknown".to_string(),
            vendor: "Unknown".to_string(),
            has_disc,
            capabilities: Vec::new(),
        }
    }
}

enum Backend {
    EventDriven(UdevMonitor),
    Polling(DevicePoller),
}

impl Backend {
    fn name(&self) -> &'static str {
        match self {
            Backend::EventDriven(_) => "udev",
            Backend::Polling(_) => "polling",
        }
    }
}

/// Watches one or more drives for disc insertion and removal.
pub struct DiscWatcher {
    devices: Option<Vec<String>>,
    method: DetectionMethod,
    poll_interval: Duration,
    cancel: CancellationToken,
    probe: Arc<dyn DiscProbe>,
}

impl DiscWatcher {
    /// `devices: None` auto-detects drives when the watcher starts.
    pub fn new(devices: Option<Vec<String>>, method: DetectionMethod, poll_interval: Duration) -> Self {
        Self {
            devices: devices.filter(|d| !d.is_empty()),
            method,
            poll_interval: poll_interval.max(MIN_POLL_INTERVAL),
            cancel: CancellationToken::new(),
            probe: Arc::new(SystemProbe),
        }
    }

    pub fn from_config(cfg: &DriveConfig, devices: Option<Vec<String>>) -> Self {
        let secs = if cfg.poll_interval_secs.is_finite() {
            cfg.poll_interval_secs.max(MIN_POLL_INTERVAL.as_secs_f64())
        } else {
            MIN_POLL_INTERVAL.as_secs_f64()
        };
        Self::new(devices, cfg.detection_method, Duration::from_secs_f64(secs))
    }

    /// Replace the presence probe used by polling, `check_disc` and `wait_for_disc`.
    pub fn with_probe(mut self, probe: Arc<dyn DiscProbe>) -> Self {
        self.probe = probe;
        self
    }

    /// Interval used for polling (test hook; bypasses the minimum).
    #[cfg(test)]
    pub(crate) fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn poll_interval(&self) -> Duration {
        self.poll_interval
    }

    /// Stop the watcher at its next check point. Safe from any task.
    ///
    /// Stopping is permanent: later calls to `start` return immediately.
    pub fn stop(&self) {
        self.cancel.cancel();
    }

    /// Token cancelled by [`stop`](Self::stop), for callers that stop from elsewhere.
    pub fn stop_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Configured devices, or the auto-detected drives.
    pub async fn resolve_devices(&self) -> Vec<String> {
        if let Some(devices) = &self.devices {
            return devices.clone();
        }

        if UdevMonitor::is_available() {
            let drives = tokio::task::spawn_blocking(udev::detect_optical_drives)
                .await
                .unwrap_or_default();
            if !drives.is_empty() {
                return drives.into_iter().map(|d| d.device).collect();
            }
        }

        tokio::task::spawn_blocking(scan_for_drives)
            .await
            .unwrap_or_default()
    }

    fn select_backend(&self, devices: Vec<String>) -> Result<Backend, WatchError> {
        match self.method {
            DetectionMethod::Udev => {
                if !UdevMonitor::is_available() {
                    return Err(WatchError::UdevUnavailable);
                }
                Ok(Backend::EventDriven(UdevMonitor::new(devices)))
            }
            DetectionMethod::Polling => Ok(Backend::Polling(self.poller(devices))),
            DetectionMethod::Auto => {
                if UdevMonitor::is_available() {
                    Ok(Backend::EventDriven(UdevMonitor::new(devices)))
                } else {
                    info!(
                        interval_secs = self.poll_interval.as_secs_f64(),
                        "udev not available, using polling fallback"
                    );
                    Ok(Backend::Polling(self.poller(devices)))
                }
            }
        }
    }

    fn poller(&self, devices: Vec<String>) -> DevicePoller {
        DevicePoller::new(devices, self.poll_interval, self.probe.clone())
    }

    /// Deliver disc events to `handler` until stopped.
    ///
    /// With `once`, returns after the first insertion has been handled.
    pub async fn start(&self, handler: &dyn DiscEventHandler, once: bool) -> Result<(), WatchError> {
        if self.cancel.is_cancelled() {
            return Ok(());
        }

        let devices = self.resolve_devices().await;
        if devices.is_empty() {
            warn!("No optical drives found");
            return Ok(());
        }

        let backend = self.select_backend(devices.clone())?;
        info!(method = backend.name(), devices = ?devices, "starting disc watcher");

        let result = match backend {
            Backend::EventDriven(monitor) => monitor.monitor(handler, once, &self.cancel).await,
            Backend::Polling(mut poller) => poller.poll(handler, once, &self.cancel).await,
        };

        if let Err(e) = &result {
            warn!(error = %e, "disc watcher error");
        }
        debug!("disc watcher stopped");
        result
    }

    /// Probe a single device for a disc.
    pub async fn check_disc(&self, device: &str) -> bool {
        poller::probe_off_thread(&self.probe, device).await
    }

    /// Available optical drives, with udev details when udev is reachable.
    pub async fn get_drives(&self) -> Vec<DriveInfo> {
        if UdevMonitor::is_available() {
            return tokio::task::spawn_blocking(udev::detect_optical_drives)
                .await
                .unwrap_or_default();
        }

        let devices = tokio::task::spawn_blocking(scan_for_drives)
            .await
            .unwrap_or_default();
        let mut drives = Vec::with_capacity(devices.len());
        for device in devices {
            let has_disc = self.check_disc(&device).await;
            drives.push(DriveInfo::bare(device, has_disc));
        }
        drives
    }

    /// Wait until a disc is present in `device` (or any drive when `None`).
    ///
    /// Returns the device holding the disc.
    pub async fn wait_for_disc(
        &self,
        device: Option<&str>,
        timeout: Option<Duration>,
    ) -> Result<String, WatchError> {
        let devices = match device {
            Some(d) => vec![d.to_string()],
            None => self.resolve_devices().await,
        };
        if devices.is_empty() {
            return Err(WatchError::NoDrives);
        }

        let wait = async {
            loop {
                for device in &devices {
                    if self.check_disc(device).await {
                        return Some(device.clone());
                    }
                }
                tokio::select! {
                    _ = self.cancel.cancelled() => return None,
                    _ = tokio::time::sleep(self.poll_interval) => {}
                }
            }
        };

        let found = match timeout {
            Some(limit) => tokio::time::timeout(limit, wait)
                .await
                .map_err(|_| WatchError::Timeout(limit))?,
            None => wait.await,
        };
        // A stop while waiting reads the same as running out of time.
        found.ok_or(WatchError::Timeout(timeout.unwrap_or_default()))
    }
}
