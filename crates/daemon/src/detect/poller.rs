//! Polling fallback for hosts without udev (containers, minimal systems).

use super::{DiscEventHandler, DiscProbe, WatchError};
use crate::metadata::dvdid::find_mount_point;
use nix::fcntl::OFlag;
use std::collections::HashMap;
use std::fs::{self, File, OpenOptions};
use std::os::unix::fs::OpenOptionsExt;
use std::os::unix::io::AsRawFd;
use std::path::Path;
use std::process::{Command, Stdio};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

const CDS_DISC_OK: i32 = 4;
/// Slot argument meaning "the current disc" for changer-aware ioctls.
const CDSL_CURRENT: i32 = i32::MAX;
const BLKID_TIMEOUT: Duration = Duration::from_secs(5);

mod ioctl {
    nix::ioctl_write_int_bad!(cdrom_drive_status, 0x5326);
}

/// Device names probed when no drive list is available.
pub const WELL_KNOWN_DEVICES: &[&str] = &[
    "/dev/sr0",
    "/dev/sr1",
    "/dev/sr2",
    "/dev/sr3",
    "/dev/cdrom",
    "/dev/dvd",
];

/// A change in disc presence.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    Inserted,
    Removed,
}

/// Event implied by moving from `previous` to `current` presence.
pub fn transition(previous: bool, current: bool) -> Option<Transition> {
    match (previous, current) {
        (false, true) => Some(Transition::Inserted),
        (true, false) => Some(Transition::Removed),
        _ => None,
    }
}

/// Existing drives among `candidates`, with symlinks resolved and duplicates dropped.
pub fn scan_candidates<I, P>(candidates: I) -> Vec<String>
where
    I: IntoIterator<Item = P>,
    P: AsRef<Path>,
{
    let mut drives: Vec<String> = Vec::new();
    for candidate in candidates {
        let Ok(real) = fs::canonicalize(candidate.as_ref()) else {
            continue;
        };
        let real = real.to_string_lossy().into_owned();
        if !drives.contains(&real) {
            drives.push(real);
        }
    }
    drives
}

/// Optical drives found under their usual device names.
pub fn scan_for_drives() -> Vec<String> {
    scan_candidates(WELL_KNOWN_DEVICES)
}

/// `CDROM_DRIVE_STATUS` result; `None` when the device does not answer it.
fn drive_status(file: &File) -> Option<bool> {
    // SAFETY: the descriptor is owned by `file` and stays open for the call;
    // the request takes an integer argument, no pointers.
    match unsafe { ioctl::cdrom_drive_status(file.as_raw_fd(), CDSL_CURRENT) } {
        Ok(status) => Some(status == CDS_DISC_OK),
        Err(e) => {
            debug!(error = %e, "CDROM_DRIVE_STATUS not supported");
            None
        }
    }
}

fn has_disc_structure(root: &Path) -> bool {
    root.join("VIDEO_TS").is_dir() || root.join("BDMV").is_dir()
}

/// `blkid -p` finds a filesystem on the device.
fn blkid_detects(device: &str) -> bool {
    let mut child = match Command::new("blkid")
        .args(["-p", device])
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .spawn()
    {
        Ok(child) => child,
        Err(e) => {
            debug!(error = %e, "blkid unavailable");
            return false;
        }
    };

    let deadline = Instant::now() + BLKID_TIMEOUT;
    loop {
        match child.try_wait() {
            Ok(Some(status)) => {
                if !status.success() {
                    return false;
                }
                let mut out = String::new();
                if let Some(mut stdout) = child.stdout.take() {
                    let _ = std::io::Read::read_to_string(&mut stdout, &mut out);
                }
                return !out.trim().is_empty();
            }
            Ok(None) if Instant::now() < deadline => std::thread::sleep(Duration::from_millis(50)),
            Ok(None) => {
                warn!(device, "blkid timed out");
                let _ = child.kill();
                let _ = child.wait();
                return false;
            }
            Err(_) => return false,
        }
    }
}

/// Blocking presence check.
///
/// The device must open; after that the first source that gives an answer
/// wins: the drive status ioctl, a mounted disc layout, then `blkid`.
pub fn check_disc_sync(device: &str) -> bool {
    let file = match OpenOptions::new()
        .read(true)
        .custom_flags(OFlag::O_NONBLOCK.bits())
        .open(device)
    {
        Ok(file) => file,
        Err(e) => {
            debug!(device, error = %e, "cannot open device");
            return false;
        }
    };

    if let Some(present) = drive_status(&file) {
        return present;
    }
    drop(file);

    if find_mount_point(device).is_some_and(|root| has_disc_structure(&root)) {
        return true;
    }

    blkid_detects(device)
}

/// Probe chain used on real hardware.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemProbe;

impl DiscProbe for SystemProbe {
    fn has_disc(&self, device: &str) -> bool {
        check_disc_sync(device)
    }
}

/// Run `probe` on the blocking pool.
pub(crate) async fn probe_off_thread(probe: &Arc<dyn DiscProbe>, device: &str) -> bool {
    let probe = probe.clone();
    let owned = device.to_string();
    match tokio::task::spawn_blocking(move || probe.has_disc(&owned)).await {
        Ok(present) => present,
        Err(e) => {
            warn!(device, error = %e, "disc probe panicked");
            false
        }
    }
}

/// Polls devices and reports presence transitions.
pub struct DevicePoller {
    devices: Vec<String>,
    interval: Duration,
    probe: Arc<dyn DiscProbe>,
    states: HashMap<String, bool>,
}

impl DevicePoller {
    pub fn new(devices: Vec<String>, interval: Duration, probe: Arc<dyn DiscProbe>) -> Self {
        let devices = if devices.is_empty() {
            vec!["/dev/sr0".to_string()]
        } else {
            devices
        };
        Self {
            devices,
            interval,
            probe,
            states: HashMap::new(),
        }
    }

    pub fn devices(&self) -> &[String] {
        &self.devices
    }

    /// Poll until `cancel` fires, or after the first insertion with `once`.
    ///
    /// A disc already present when polling starts is recorded, not reported.
    pub async fn poll(
        &mut self,
        handler: &dyn DiscEventHandler,
        once: bool,
        cancel: &CancellationToken,
    ) -> Result<(), WatchError> {
        for device in &self.devices {
            let present = probe_off_thread(&self.probe, device).await;
            if present {
                info!(device = %device, "disc already present");
            }
            self.states.insert(device.clone(), present);
        }

        info!(
            devices = ?self.devices,
            interval_secs = self.interval.as_secs_f64(),
            "starting polling monitor"
        );

        loop {
            tokio::select! {
                _ = cancel.cancelled() => return Ok(()),
                _ = tokio::time::sleep(self.interval) => {}
            }

            for device in &self.devices {
                if cancel.is_cancelled() {
                    return Ok(());
                }

                let current = probe_off_thread(&self.probe, device).await;
                let previous = self.states.get(device).copied().unwrap_or(false);
                match transition(previous, current) {
                    Some(Transition::Inserted) => {
                        debug!(device = %device, "disc detected (poll)");
                        self.states.insert(device.clone(), true);
                        handler.on_insert(device).await;
                        if once {
                            return Ok(());
                        }
                    }
                    Some(Transition::Removed) => {
                        debug!(device = %device, "disc removed (poll)");
                        self.states.insert(device.clone(), false);
                        handler.on_remove(device).await;
                    }
                    None => {}
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct Counter {
        inserts: AtomicUsize,
        removes: AtomicUsize,
    }

    #[async_trait]
    impl DiscEventHandler for Counter {
        async fn on_insert(&self, _device: &str) {
            self.inserts.fetch_add(1, Ordering::SeqCst);
        }

        async fn on_remove(&self, _device: &str) {
            self.removes.fetch_add(1, Ordering::SeqCst);
        }
    }

    /// Replays states, then cancels the poller once the script runs out.
    struct Script {
        states: Mutex<VecDeque<bool>>,
        done: CancellationToken,
    }

    impl DiscProbe for Script {
        fn has_disc(&self, _device: &str) -> bool {
            let mut states = self.states.lock();
            let state = states.pop_front().unwrap_or(false);
            if states.is_empty() {
                self.done.cancel();
            }
            state
        }
    }

    #[test]
    fn test_transition_table() {
        assert_eq!(transition(false, true), Some(Transition::Inserted));
        assert_eq!(transition(true, false), Some(Transition::Removed));
        assert_eq!(transition(true, true), None);
        assert_eq!(transition(false, false), None);
    }

    #[tokio::test]
    async fn test_state_sequence_fires_each_transition_once() {
        let cancel = CancellationToken::new();
        let probe = Arc::new(Script {
            states: Mutex::new(VecDeque::from(vec![false, false, true, true, false])),
            done: cancel.clone(),
        });
        let mut poller = DevicePoller::new(
            vec!["/dev/sr0".to_string()],
            Duration::from_millis(2),
            probe,
        );
        let counter = Counter::default();

        tokio::time::timeout(Duration::from_secs(5), poller.poll(&counter, false, &cancel))
            .await
            .expect("poller stops when the script ends")
            .unwrap();

        assert_eq!(counter.inserts.load(Ordering::SeqCst), 1);
        assert_eq!(counter.removes.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_disc_present_at_start_is_not_an_insert() {
        let cancel = CancellationToken::new();
        let probe = Arc::new(Script {
            states: Mutex::new(VecDeque::from(vec![true, true, true])),
            done: cancel.clone(),
        });
        let mut poller = DevicePoller::new(vec![], Duration::from_millis(2), probe);
        assert_eq!(poller.devices(), ["/dev/sr0".to_string()]);

        let counter = Counter::default();
        poller.poll(&counter, false, &cancel).await.unwrap();
        assert_eq!(counter.inserts.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_scan_candidates_resolves_symlinks() {
        let tmp = tempfile::tempdir().unwrap();
        let sr0 = tmp.path().join("sr0");
        fs::write(&sr0, b"").unwrap();
        std::os::unix::fs::symlink(&sr0, tmp.path().join("cdrom")).unwrap();

        let drives = scan_candidates([
            sr0.clone(),
            tmp.path().join("sr1"),
            tmp.path().join("cdrom"),
        ]);
        let expected = fs::canonicalize(&sr0).unwrap().to_string_lossy().into_owned();
        assert_eq!(drives, vec![expected]);
    }

    #[test]
    fn test_missing_device_has_no_disc() {
        assert!(!check_disc_sync("/nonexistent/riparr/sr9"));
    }

    #[test]
    fn test_mounted_disc_layout_counts_as_present() {
        let tmp = tempfile::tempdir().unwrap();
        fs::create_dir(tmp.path().join("BDMV")).unwrap();
        assert!(check_disc_sync(&tmp.path().to_string_lossy()));
    }
}
