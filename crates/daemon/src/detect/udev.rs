//! udev-backed detection: netlink uevents and the udev device database.

use super::{DiscEventHandler, DriveInfo, WatchError};
use nix::errno::Errno;
use nix::sys::socket::{
    bind, recv, setsockopt, socket, sockopt, AddressFamily, MsgFlags, NetlinkAddr, SockFlag,
    SockProtocol, SockType,
};
use nix::sys::time::{TimeVal, TimeValLike};
use std::collections::HashMap;
use std::fs;
use std::os::fd::{AsRawFd, OwnedFd};
use std::path::Path;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Present while udevd is running.
pub const UDEV_CONTROL_SOCKET: &str = "/run/udev/control";
const SYS_CLASS_BLOCK: &str = "/sys/class/block";
const UDEV_DATA_DIR: &str = "/run/udev/data";

/// Multicast group udevd republishes processed events on.
const UDEV_MONITOR_GROUP: u32 = 2;
const LIBUDEV_PREFIX: &[u8] = b"libudev\0";
const LIBUDEV_MAGIC: u32 = 0xfeed_cafe;
const RECV_BUFFER: usize = 8192;
const EVENT_CHANNEL_CAPACITY: usize = 16;

/// One parsed uevent.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Uevent {
    pub properties: HashMap<String, String>,
}

impl Uevent {
    pub fn get(&self, key: &str) -> Option<&str> {
        self.properties.get(key).map(String::as_str)
    }

    pub fn action(&self) -> Option<&str> {
        self.get("ACTION")
    }

    /// `/dev` path of the device, if the event names one.
    pub fn device_node(&self) -> Option<String> {
        let name = self.get("DEVNAME").filter(|n| !n.is_empty())?;
        if name.starts_with('/') {
            Some(name.to_string())
        } else {
            Some(format!("/dev/{}", name))
        }
    }

    /// Whole-disk block device change, the only kind that signals media changes.
    pub fn is_block_disk_change(&self) -> bool {
        self.get("SUBSYSTEM") == Some("block")
            && self.get("DEVTYPE") == Some("disk")
            && self.action() == Some("change")
    }

    pub fn is_optical(&self) -> bool {
        if self.get("ID_TYPE") == Some("cd") {
            return true;
        }
        let node = self.device_node().unwrap_or_default();
        if node.contains("/sr") || node.contains("/cdrom") {
            return true;
        }
        self.get("ID_CDROM") == Some("1")
    }

    pub fn has_media(&self) -> bool {
        self.get("ID_CDROM_MEDIA") == Some("1")
    }
}

fn parse_properties(data: &[u8], properties: &mut HashMap<String, String>) {
    for field in data.split(|&b| b == 0) {
        let field = String::from_utf8_lossy(field);
        if let Some((key, value)) = field.split_once('=') {
            properties.insert(key.to_string(), value.to_string());
        }
    }
}

fn read_u32(buf: &[u8], offset: usize) -> Option<[u8; 4]> {
    buf.get(offset..offset + 4)?.try_into().ok()
}

/// Parse a netlink uevent in either libudev or raw kernel framing.
pub fn parse_uevent(buf: &[u8]) -> Option<Uevent> {
    let mut properties = HashMap::new();

    if buf.starts_with(LIBUDEV_PREFIX) {
        let magic = u32::from_be_bytes(read_u32(buf, 8)?);
        if magic != LIBUDEV_MAGIC {
            return None;
        }
        let offset = u32::from_ne_bytes(read_u32(buf, 16)?) as usize;
        let len = u32::from_ne_bytes(read_u32(buf, 20)?) as usize;
        let data = buf.get(offset..offset.checked_add(len)?)?;
        parse_properties(data, &mut properties);
    } else {
        // "<action>@<devpath>\0KEY=VALUE\0..."
        let header_end = buf.iter().position(|&b| b == 0).unwrap_or(buf.len());
        if !buf[..header_end].contains(&b'@') {
            return None;
        }
        parse_properties(buf.get(header_end + 1..).unwrap_or_default(), &mut properties);
    }

    (!properties.is_empty()).then_some(Uevent { properties })
}

fn open_socket() -> Result<OwnedFd, WatchError> {
    let fd = socket(
        AddressFamily::Netlink,
        SockType::Raw,
        SockFlag::SOCK_CLOEXEC,
        SockProtocol::NetlinkKObjectUEvent,
    )?;
    bind(fd.as_raw_fd(), &NetlinkAddr::new(0, UDEV_MONITOR_GROUP))?;
    // Bounded receive so the reader notices cancellation.
    setsockopt(&fd, sockopt::ReceiveTimeout, &TimeVal::seconds(1))?;
    Ok(fd)
}

/// Blocking reader: forwards block disk changes until cancelled or the
/// receiver goes away.
fn read_events(
    fd: OwnedFd,
    tx: mpsc::Sender<Uevent>,
    cancel: CancellationToken,
) -> Result<(), WatchError> {
    let mut buf = vec![0u8; RECV_BUFFER];
    while !cancel.is_cancelled() {
        match recv(fd.as_raw_fd(), &mut buf, MsgFlags::empty()) {
            Ok(n) => {
                let Some(event) = parse_uevent(&buf[..n]) else {
                    continue;
                };
                if event.is_block_disk_change() && tx.blocking_send(event).is_err() {
                    break;
                }
            }
            Err(Errno::EAGAIN) | Err(Errno::EINTR) => continue,
            Err(e) => return Err(e.into()),
        }
    }
    Ok(())
}

/// Watches udev change events for optical media.
pub struct UdevMonitor {
    devices: Vec<String>,
}

impl UdevMonitor {
    /// `devices` empty means every optical drive.
    pub fn new(devices: Vec<String>) -> Self {
        Self { devices }
    }

    pub fn is_available() -> bool {
        if !Path::new(UDEV_CONTROL_SOCKET).exists() {
            return false;
        }
        match open_socket() {
            Ok(_) => true,
            Err(e) => {
                debug!(error = %e, "udev not available");
                false
            }
        }
    }

    /// Device node for an event we should report, if any.
    fn accept(&self, event: &Uevent) -> Option<String> {
        let device = event.device_node()?;
        if !event.is_optical() {
            return None;
        }
        if !self.devices.is_empty() && !self.devices.contains(&device) {
            return None;
        }
        Some(device)
    }

    pub async fn monitor(
        &self,
        handler: &dyn DiscEventHandler,
        once: bool,
        cancel: &CancellationToken,
    ) -> Result<(), WatchError> {
        let fd = open_socket()?;
        let (tx, mut rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);

        let reader_token = cancel.child_token();
        let reader = tokio::task::spawn_blocking({
            let token = reader_token.clone();
            move || read_events(fd, tx, token)
        });
        // Stops the reader on every exit path below.
        let guard = reader_token.drop_guard();

        info!(devices = ?self.devices, "starting udev monitor");

        loop {
            let event = tokio::select! {
                _ = cancel.cancelled() => break,
                event = rx.recv() => event,
            };
            let Some(event) = event else {
                break;
            };
            let Some(device) = self.accept(&event) else {
                continue;
            };

            if event.has_media() {
                debug!(device = %device, "disc inserted event");
                handler.on_insert(&device).await;
                if once {
                    break;
                }
            } else {
                debug!(device = %device, "disc removed event");
                handler.on_remove(&device).await;
            }
        }

        drop(rx);
        drop(guard);
        match reader.await {
            Ok(result) => result,
            Err(e) => {
                warn!(error = %e, "udev reader task failed");
                Ok(())
            }
        }
    }
}

/// `E:KEY=VALUE` properties from a udev database entry.
pub fn parse_udev_db(content: &str) -> HashMap<String, String> {
    content
        .lines()
        .filter_map(|line| line.strip_prefix("E:"))
        .filter_map(|kv| kv.split_once('='))
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
}

/// Drive description from udev properties; `None` unless it is a CD-ROM class device.
pub fn drive_from_properties(device: String, props: &HashMap<String, String>) -> Option<DriveInfo> {
    let flag = |key: &str| props.get(key).map(String::as_str) == Some("1");
    if !flag("ID_CDROM") {
        return None;
    }

    let capabilities = [
        ("ID_CDROM_DVD", "DVD"),
        ("ID_CDROM_BD", "Blu-ray"),
        ("ID_CDROM_MRW", "MRW"),
    ]
    .into_iter()
    .filter(|(key, _)| flag(key))
    .map(|(_, name)| name.to_string())
    .collect();

    let text = |key: &str| {
        props
            .get(key)
            .cloned()
            .unwrap_or_else(|| "Unknown".to_string())
    };

    Some(DriveInfo {
        device,
        model: text("ID_MODEL"),
        vendor: text("ID_VENDOR"),
        has_disc: flag("ID_CDROM_MEDIA"),
        capabilities,
    })
}

/// Walk `sys_root` block devices and look each whole disk up in `db_root`.
pub fn enumerate_drives(sys_root: &Path, db_root: &Path) -> Vec<DriveInfo> {
    let Ok(entries) = fs::read_dir(sys_root) else {
        return Vec::new();
    };

    let mut drives: Vec<DriveInfo> = entries
        .filter_map(|e| e.ok())
        .filter_map(|entry| {
            let path = entry.path();
            if path.join("partition").exists() {
                return None;
            }
            let dev = fs::read_to_string(path.join("dev")).ok()?;
            let db = fs::read_to_string(db_root.join(format!("b{}", dev.trim()))).ok()?;
            let name = entry.file_name().to_string_lossy().into_owned();
            drive_from_properties(format!("/dev/{}", name), &parse_udev_db(&db))
        })
        .collect();

    drives.sort_by(|a, b| a.device.cmp(&b.device));
    for drive in &drives {
        debug!(
            device = %drive.device,
            model = %drive.model,
            vendor = %drive.vendor,
            has_disc = drive.has_disc,
            "found optical drive"
        );
    }
    drives
}

/// Optical drives known to udev on this host.
pub fn detect_optical_drives() -> Vec<DriveInfo> {
    enumerate_drives(Path::new(SYS_CLASS_BLOCK), Path::new(UDEV_DATA_DIR))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kernel_message(fields: &[&str]) -> Vec<u8> {
        let mut buf = b"change@/devices/pci0000:00/ata2/host1/block/sr0".to_vec();
        for field in fields {
            buf.push(0);
            buf.extend_from_slice(field.as_bytes());
        }
        buf.push(0);
        buf
    }

    fn libudev_message(fields: &[&str]) -> Vec<u8> {
        let mut props = Vec::new();
        for field in fields {
            props.extend_from_slice(field.as_bytes());
            props.push(0);
        }
        let header_len = 40u32;
        let mut buf = LIBUDEV_PREFIX.to_vec();
        buf.extend_from_slice(&LIBUDEV_MAGIC.to_be_bytes());
        buf.extend_from_slice(&header_len.to_ne_bytes());
        buf.extend_from_slice(&header_len.to_ne_bytes());
        buf.extend_from_slice(&(props.len() as u32).to_ne_bytes());
        buf.resize(header_len as usize, 0);
        buf.extend_from_slice(&props);
        buf
    }

    const INSERT_FIELDS: &[&str] = &[
        "ACTION=change",
        "SUBSYSTEM=block",
        "DEVTYPE=disk",
        "DEVNAME=/dev/sr0",
        "ID_CDROM=1",
        "ID_CDROM_MEDIA=1",
    ];

    #[test]
    fn test_parse_kernel_message() {
        let event = parse_uevent(&kernel_message(&[
            "ACTION=change",
            "SUBSYSTEM=block",
            "DEVTYPE=disk",
            "DEVNAME=sr0",
        ]))
        .unwrap();
        assert!(event.is_block_disk_change());
        assert_eq!(event.device_node().as_deref(), Some("/dev/sr0"));
        assert!(event.is_optical());
        assert!(!event.has_media());
    }

    #[test]
    fn test_parse_libudev_message() {
        let event = parse_uevent(&libudev_message(INSERT_FIELDS)).unwrap();
        assert!(event.is_block_disk_change());
        assert!(event.has_media());
        assert_eq!(event.get("ID_CDROM"), Some("1"));
    }

    #[test]
    fn test_rejects_bad_magic_and_garbage() {
        let mut buf = libudev_message(INSERT_FIELDS);
        buf[8] ^= 0xff;
        assert!(parse_uevent(&buf).is_none());
        assert!(parse_uevent(b"no header here").is_none());

        // Properties window past the end of the buffer.
        let mut short = libudev_message(INSERT_FIELDS);
        short.truncate(44);
        assert!(parse_uevent(&short).is_none());
    }

    #[test]
    fn test_optical_detection() {
        let mut event = Uevent::default();
        event.properties.insert("DEVNAME".into(), "/dev/sdb".into());
        assert!(!event.is_optical());
        event.properties.insert("ID_TYPE".into(), "cd".into());
        assert!(event.is_optical());
    }

    #[test]
    fn test_accept_respects_allow_list() {
        let event = parse_uevent(&libudev_message(INSERT_FIELDS)).unwrap();
        assert_eq!(
            UdevMonitor::new(vec![]).accept(&event).as_deref(),
            Some("/dev/sr0")
        );
        assert_eq!(
            UdevMonitor::new(vec!["/dev/sr1".to_string()]).accept(&event),
            None
        );
    }

    #[test]
    fn test_parse_udev_db() {
        let props = parse_udev_db("S:cdrom\nE:ID_CDROM=1\nE:ID_MODEL=BD-RE_BH16NS40\nG:systemd\n");
        assert_eq!(props.len(), 2);
        assert_eq!(props["ID_MODEL"], "BD-RE_BH16NS40");
    }

    #[test]
    fn test_enumerate_drives_from_sysfs_and_db() {
        let sys = tempfile::tempdir().unwrap();
        let db = tempfile::tempdir().unwrap();

        let sr0 = sys.path().join("sr0");
        fs::create_dir(&sr0).unwrap();
        fs::write(sr0.join("dev"), "11:0\n").unwrap();
        fs::write(
            db.path().join("b11:0"),
            "E:ID_CDROM=1\nE:ID_CDROM_DVD=1\nE:ID_CDROM_BD=1\nE:ID_CDROM_MEDIA=1\nE:ID_VENDOR=HL-DT-ST\n",
        )
        .unwrap();

        let sda = sys.path().join("sda");
        fs::create_dir(&sda).unwrap();
        fs::write(sda.join("dev"), "8:0\n").unwrap();
        fs::write(db.path().join("b8:0"), "E:ID_TYPE=disk\n").unwrap();

        let sda1 = sys.path().join("sda1");
        fs::create_dir(&sda1).unwrap();
        fs::write(sda1.join("partition"), "1\n").unwrap();

        let drives = enumerate_drives(sys.path(), db.path());
        assert_eq!(drives.len(), 1);
        let drive = &drives[0];
        assert_eq!(drive.device, "/dev/sr0");
        assert_eq!(drive.vendor, "HL-DT-ST");
        assert_eq!(drive.model, "Unknown");
        assert!(drive.has_disc);
        assert_eq!(drive.capabilities, vec!["DVD", "Blu-ray"]);
    }
}
