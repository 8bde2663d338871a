//! DVD content identifier.
//!
//! A CRC-64 over the `VIDEO_TS` directory listing and the leading bytes of
//! the main IFO files. The value is stable across copies of the same release
//! and is the key used by the ARM disc database.

use super::DiscIdentifier;
use crc::{Algorithm, Crc, Digest};
use std::fs::{self, File};
use std::io::{self, Read};
use std::os::unix::fs::MetadataExt;
use std::path::{Path, PathBuf};
use std::process::Command;
use tempfile::TempDir;
use thiserror::Error;

const IFO_PREFIX_LEN: u64 = 65_536;
/// Seconds between 1601-01-01 and 1970-01-01.
const FILETIME_EPOCH_OFFSET: i64 = 11_644_473_600;

/// Reflected CRC-64 used by dvdid: polynomial `0x92c64265d32139a4` in its
/// reflected form, all-ones seed and final xor.
pub const CRC_64_DVDID: Algorithm<u64> = Algorithm {
    width: 64,
    poly: 0x259c_84cb_a642_6349,
    init: 0xffff_ffff_ffff_ffff,
    refin: true,
    refout: true,
    xorout: 0xffff_ffff_ffff_ffff,
    check: 0x8a2b_48b0_fdb1_3115,
    residue: 0x45af_cbb9_f396_ac4a,
};

static DVDID_CRC: Crc<u64> = Crc::<u64>::new(&CRC_64_DVDID);

#[derive(Debug, Error)]
pub enum DiscIdError {
    #[error("No VIDEO_TS directory under {}", .0.display())]
    NoVideoTs(PathBuf),

    #[error("Could not mount {device}: {message}")]
    Mount { device: String, message: String },

    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

/// Unix seconds to a Windows FILETIME (100 ns ticks since 1601).
fn filetime(unix_secs: i64) -> u64 {
    ((unix_secs + FILETIME_EPOCH_OFFSET).max(0) as u64) * 10_000_000
}

fn hash_prefix(crc: &mut Digest<'_, u64>, path: &Path) -> io::Result<()> {
    let mut buf = Vec::new();
    File::open(path)?.take(IFO_PREFIX_LEN).read_to_end(&mut buf)?;
    crc.update(&buf);
    Ok(())
}

/// Compute the identifier for a disc mounted (or copied) at `root`.
pub fn compute_from_root(root: &Path) -> Result<String, DiscIdError> {
    let video_ts = root.join("VIDEO_TS");
    if !video_ts.is_dir() {
        return Err(DiscIdError::NoVideoTs(root.to_path_buf()));
    }

    let mut entries: Vec<(String, fs::Metadata)> = fs::read_dir(&video_ts)?
        .filter_map(|e| e.ok())
        .filter_map(|e| {
            let meta = e.metadata().ok()?;
            meta.is_file()
                .then(|| (e.file_name().to_string_lossy().into_owned(), meta))
        })
        .collect();
    entries.sort_by(|a, b| a.0.cmp(&b.0));

    let mut crc = DVDID_CRC.digest();
    for (name, meta) in &entries {
        crc.update(&filetime(meta.ctime()).to_le_bytes());
        crc.update(&(meta.len() as u32).to_le_bytes());
        crc.update(name.as_bytes());
        crc.update(&[0]);
    }

    hash_prefix(&mut crc, &video_ts.join("VIDEO_TS.IFO"))?;
    let vts = video_ts.join("VTS_01_0.IFO");
    if vts.exists() {
        hash_prefix(&mut crc, &vts)?;
    }

    Ok(format!("{:016x}", crc.finalize()))
}

/// Undo the octal escapes `/proc/mounts` uses for spaces and tabs.
fn unescape_mount_field(field: &str) -> String {
    let bytes = field.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'\\' && i + 3 < bytes.len() {
            let code = std::str::from_utf8(&bytes[i + 1..i + 4])
                .ok()
                .and_then(|digits| u8::from_str_radix(digits, 8).ok());
            if let Some(v) = code {
                out.push(v);
                i += 4;
                continue;
            }
        }
        out.push(bytes[i]);
        i += 1;
    }
    String::from_utf8_lossy(&out).into_owned()
}

/// Mount point of `device` in a `/proc/mounts` style listing.
///
/// `resolved` is the canonical device path, used to match symlinks such as
/// `/dev/cdrom`.
pub fn mount_point_in(mounts: &str, device: &str, resolved: Option<&Path>) -> Option<PathBuf> {
    mounts.lines().find_map(|line| {
        let mut parts = line.split_whitespace();
        let source = unescape_mount_field(parts.next()?);
        let target = unescape_mount_field(parts.next()?);
        let matches = source == device
            || resolved.is_some_and(|r| fs::canonicalize(&source).ok().as_deref() == Some(r));
        matches.then(|| PathBuf::from(target))
    })
}

/// Existing mount point for a device, or the path itself when it is a directory.
pub fn find_mount_point(device: &str) -> Option<PathBuf> {
    let path = Path::new(device);
    if path.is_dir() {
        return Some(path.to_path_buf());
    }
    let mounts = fs::read_to_string("/proc/mounts").ok()?;
    let resolved = fs::canonicalize(path).ok();
    mount_point_in(&mounts, device, resolved.as_deref())
}

/// Read-only mount in a temporary directory, unmounted on drop.
struct TempMount {
    dir: TempDir,
}

impl TempMount {
    fn mount(device: &str) -> Result<Self, DiscIdError> {
        let dir = tempfile::Builder::new().prefix("riparr_mount_").tempdir()?;
        tracing::debug!(device, mount_point = %dir.path().display(), "mounting disc temporarily");

        let output = Command::new("mount")
            .args(["-o", "ro", device])
            .arg(dir.path())
            .output()?;
        if !output.status.success() {
            return Err(DiscIdError::Mount {
                device: device.to_string(),
                message: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }
        Ok(Self { dir })
    }

    fn path(&self) -> &Path {
        self.dir.path()
    }
}

impl Drop for TempMount {
    fn drop(&mut self) {
        match Command::new("umount").arg(self.dir.path()).output() {
            Ok(out) if out.status.success() => {}
            Ok(out) => tracing::warn!(
                mount_point = %self.dir.path().display(),
                stderr = %String::from_utf8_lossy(&out.stderr).trim(),
                "failed to unmount"
            ),
            Err(e) => tracing::warn!(error = %e, "failed to run umount"),
        }
    }
}

/// [`DiscIdentifier`] for DVDs, mounting the disc when necessary.
#[derive(Debug, Clone, Default)]
pub struct DvdIdIdentifier;

impl DiscIdentifier for DvdIdIdentifier {
    fn compute_disc_id(&self, device: &str) -> Result<String, DiscIdError> {
        let id = match find_mount_point(device) {
            Some(root) => compute_from_root(&root)?,
            None => {
                let mount = TempMount::mount(device)?;
                compute_from_root(mount.path())?
            }
        };
        tracing::info!(device, disc_id = %id, "computed disc id");
        Ok(id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_crc64_empty_and_incremental() {
        assert_eq!(DVDID_CRC.checksum(b""), 0);
        assert_eq!(DVDID_CRC.checksum(b"123456789"), CRC_64_DVDID.check);

        let mut split = DVDID_CRC.digest();
        split.update(b"12345");
        split.update(b"6789");
        assert_eq!(split.finalize(), CRC_64_DVDID.check);
    }

    #[test]
    fn test_filetime_conversion() {
        assert_eq!(filetime(0), 116_444_736_000_000_000);
        assert_eq!(filetime(-FILETIME_EPOCH_OFFSET - 5), 0);
    }

    #[test]
    fn test_mount_point_lookup() {
        let mounts = "sysfs /sys sysfs rw 0 0\n\
                      /dev/sr0 /media/user/MY\\040DISC udf ro 0 0\n";
        assert_eq!(
            mount_point_in(mounts, "/dev/sr0", None),
            Some(PathBuf::from("/media/user/MY DISC"))
        );
        assert_eq!(mount_point_in(mounts, "/dev/sr1", None), None);
    }

    #[test]
    fn test_unescape_mount_field() {
        assert_eq!(unescape_mount_field("a\\040b"), "a b");
        assert_eq!(unescape_mount_field("tab\\011"), "tab\t");
        assert_eq!(unescape_mount_field("trailing\\"), "trailing\\");
        assert_eq!(unescape_mount_field("plain"), "plain");
    }

    #[test]
    fn test_compute_from_root_requires_video_ts() {
        let tmp = tempfile::tempdir().unwrap();
        assert!(matches!(
            compute_from_root(tmp.path()),
            Err(DiscIdError::NoVideoTs(_))
        ));
    }

    #[test]
    fn test_compute_from_root_is_deterministic_and_content_sensitive() {
        let tmp = tempfile::tempdir().unwrap();
        let video_ts = tmp.path().join("VIDEO_TS");
        fs::create_dir(&video_ts).unwrap();
        fs::write(video_ts.join("VIDEO_TS.IFO"), vec![1u8; 1000]).unwrap();
        fs::write(video_ts.join("VTS_01_0.IFO"), vec![2u8; 1000]).unwrap();
        fs::write(video_ts.join("VTS_01_1.VOB"), vec![3u8; 10]).unwrap();

        let first = compute_from_root(tmp.path()).unwrap();
        assert_eq!(first.len(), 16);
        assert!(first.chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase()));
        assert_eq!(compute_from_root(tmp.path()).unwrap(), first);

        fs::write(video_ts.join("VTS_01_0.IFO"), vec![9u8; 1000]).unwrap();
        assert_ne!(compute_from_root(tmp.path()).unwrap(), first);
    }

    #[test]
    fn test_directory_device_is_its_own_mount_point() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().to_string_lossy().into_owned();
        assert_eq!(find_mount_point(&path), Some(tmp.path().to_path_buf()));
    }
}
