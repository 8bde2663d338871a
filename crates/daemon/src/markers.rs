//! Marker store: per-file queue status persisted as sidecar files.
//!
//! Each ripped MKV carries at most one marker next to it, named after the
//! media file plus a status suffix (`movie.mkv.ready`, `movie.mkv.failed`, ...).
//! The marker body is a small JSON record. Rescanning markers under the raw
//! directory reconstructs the whole queue after a restart.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use thiserror::Error;
use tracing::{debug, warn};
use walkdir::WalkDir;

/// Extension of media files tracked by the queue.
pub const MEDIA_EXTENSION: &str = "mkv";

/// Suffix of the scratch file used while swapping markers.
const TEMP_SUFFIX: &str = ".marker-tmp";

/// Free-form metadata stored with a marker (disc name, disc id, title, year, imdb id).
pub type MarkerMetadata = BTreeMap<String, serde_json::Value>;

/// Queue status of a media file, one per marker suffix.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MarkerStatus {
    Ready,
    Transcoding,
    Failed,
    Complete,
}

impl MarkerStatus {
    /// Every status, in the order markers are probed.
    pub const ALL: [MarkerStatus; 4] = [
        MarkerStatus::Ready,
        MarkerStatus::Transcoding,
        MarkerStatus::Failed,
        MarkerStatus::Complete,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            MarkerStatus::Ready => "ready",
            MarkerStatus::Transcoding => "transcoding",
            MarkerStatus::Failed => "failed",
            MarkerStatus::Complete => "complete",
        }
    }

    /// File name suffix, including the leading dot.
    pub fn suffix(&self) -> &'static str {
        match self {
            MarkerStatus::Ready => ".ready",
            MarkerStatus::Transcoding => ".transcoding",
            MarkerStatus::Failed => ".failed",
            MarkerStatus::Complete => ".complete",
        }
    }
}

impl std::fmt::Display for MarkerStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MarkerStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        MarkerStatus::ALL
            .into_iter()
            .find(|status| status.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| format!("unknown status '{}'", s))
    }
}

/// On-disk marker body.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Marker {
    pub status: MarkerStatus,
    pub created_at: DateTime<Utc>,
    pub mkv_path: PathBuf,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<MarkerMetadata>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Error type for marker operations
#[derive(Debug, Error)]
pub enum MarkerError {
    /// The file has no marker, so there is nothing to transition
    #[error("No marker found for {}", .0.display())]
    NotFound(PathBuf),

    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("Failed to encode marker: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// One queue entry, as reported by [`MarkerStore::list_jobs`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueuedFile {
    /// File stem of the media file.
    pub name: String,
    pub path: PathBuf,
    pub status: MarkerStatus,
    pub size_bytes: u64,
    pub created_at: DateTime<Utc>,
    pub error: Option<String>,
    pub metadata: Option<MarkerMetadata>,
}

/// Constructs the marker path for a media file and status.
///
/// The suffix is appended to the full file name:
/// `/raw/movie.mkv` + ready -> `/raw/movie.mkv.ready`
pub fn marker_path(media_path: &Path, status: MarkerStatus) -> PathBuf {
    let mut path = media_path.as_os_str().to_owned();
    path.push(status.suffix());
    PathBuf::from(path)
}

fn temp_marker_path(media_path: &Path) -> PathBuf {
    let mut path = media_path.as_os_str().to_owned();
    path.push(TEMP_SUFFIX);
    PathBuf::from(path)
}

/// Ripped media files are Matroska, matched case-insensitively.
pub fn is_media_file(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| ext.eq_ignore_ascii_case(MEDIA_EXTENSION))
        .unwrap_or(false)
}

fn remove_if_exists(path: &Path) -> io::Result<()> {
    match fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e),
    }
}

/// File-backed job store rooted at the raw rip directory.
#[derive(Debug, Clone)]
pub struct MarkerStore {
    root: PathBuf,
}

impl MarkerStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Write a marker for `file`, replacing whichever marker it had.
    ///
    /// The new body is written to a scratch file and renamed into place after
    /// the other suffixes are removed, so no reader ever sees two markers.
    pub fn create_marker(
        &self,
        file: &Path,
        status: MarkerStatus,
        metadata: Option<MarkerMetadata>,
        error: Option<&str>,
    ) -> Result<PathBuf, MarkerError> {
        let marker = Marker {
            status,
            created_at: Utc::now(),
            mkv_path: file.to_path_buf(),
            metadata,
            error: error.map(str::to_string),
        };

        let temp_path = temp_marker_path(file);
        fs::write(&temp_path, serde_json::to_vec_pretty(&marker)?)?;

        for other in MarkerStatus::ALL.into_iter().filter(|s| *s != status) {
            if let Err(e) = remove_if_exists(&marker_path(file, other)) {
                let _ = fs::remove_file(&temp_path);
                return Err(e.into());
            }
        }

        let target = marker_path(file, status);
        fs::rename(&temp_path, &target)?;
        debug!(file = %file.display(), status = %status, "marker written");
        Ok(target)
    }

    /// Status implied by whichever marker exists, or `None`.
    pub fn get_status(&self, file: &Path) -> Option<MarkerStatus> {
        MarkerStatus::ALL
            .into_iter()
            .find(|status| marker_path(file, *status).exists())
    }

    /// Read the marker body, if one exists and parses.
    pub fn read_marker(&self, file: &Path) -> Option<Marker> {
        let status = self.get_status(file)?;
        let content = fs::read(marker_path(file, status)).ok()?;
        serde_json::from_slice(&content).ok()
    }

    /// Transition `file` to `status`, keeping its stored metadata.
    ///
    /// Returns [`MarkerError::NotFound`] when the file has no marker.
    pub fn update_status(
        &self,
        file: &Path,
        status: MarkerStatus,
        error: Option<&str>,
    ) -> Result<PathBuf, MarkerError> {
        if self.get_status(file).is_none() {
            return Err(MarkerError::NotFound(file.to_path_buf()));
        }
        let metadata = self.read_marker(file).and_then(|m| m.metadata);
        self.create_marker(file, status, metadata, error)
    }

    /// Every marked media file under the root, oldest first.
    ///
    /// Files without a marker are skipped. An unreadable marker body falls
    /// back to the file's modification time and carries no metadata or error.
    pub fn list_jobs(&self, filter: Option<MarkerStatus>) -> Vec<QueuedFile> {
        if !self.root.exists() {
            return Vec::new();
        }

        let mut jobs: Vec<QueuedFile> = WalkDir::new(&self.root)
            .follow_links(false)
            .into_iter()
            .filter_map(|entry| match entry {
                Ok(e) => Some(e),
                Err(e) => {
                    warn!("Failed to read queue entry: {}", e);
                    None
                }
            })
            .filter(|e| e.file_type().is_file() && is_media_file(e.path()))
            .filter_map(|e| self.queued_file(e.path()))
            .filter(|job| filter.map_or(true, |f| job.status == f))
            .collect();

        jobs.sort_by(|a, b| {
            a.created_at
                .cmp(&b.created_at)
                .then_with(|| a.path.cmp(&b.path))
        });
        jobs
    }

    fn queued_file(&self, path: &Path) -> Option<QueuedFile> {
        let status = self.get_status(path)?;
        let size_bytes = fs::metadata(path).map(|m| m.len()).unwrap_or(0);
        let name = path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default();

        let marker_file = marker_path(path, status);
        let parsed = fs::read(&marker_file)
            .ok()
            .and_then(|content| serde_json::from_slice::<Marker>(&content).ok());

        let (created_at, error, metadata) = match parsed {
            Some(marker) => (marker.created_at, marker.error, marker.metadata),
            None => {
                warn!(marker = %marker_file.display(), "Unreadable marker, using file time");
                let created_at = fs::metadata(&marker_file)
                    .and_then(|m| m.modified())
                    .map(DateTime::<Utc>::from)
                    .unwrap_or_else(|_| Utc::now());
                (created_at, None, None)
            }
        };

        Some(QueuedFile {
            name,
            path: path.to_path_buf(),
            status,
            size_bytes,
            created_at,
            error,
            metadata,
        })
    }

    /// Oldest file waiting to be encoded.
    pub fn get_next_ready(&self) -> Option<QueuedFile> {
        self.list_jobs(Some(MarkerStatus::Ready)).into_iter().next()
    }

    /// Move the failed file named `name` back to ready.
    pub fn retry_job(&self, name: &str) -> Result<bool, MarkerError> {
        let Some(job) = self
            .list_jobs(Some(MarkerStatus::Failed))
            .into_iter()
            .find(|job| job.name == name)
        else {
            return Ok(false);
        };
        self.update_status(&job.path, MarkerStatus::Ready, None)?;
        Ok(true)
    }

    /// Move every failed file back to ready; returns how many moved.
    pub fn retry_all_failed(&self) -> Result<usize, MarkerError> {
        let failed = self.list_jobs(Some(MarkerStatus::Failed));
        for job in &failed {
            self.update_status(&job.path, MarkerStatus::Ready, None)?;
        }
        Ok(failed.len())
    }

    /// Delete markers (never media) for matching files; returns how many.
    pub fn clear_jobs(&self, filter: Option<MarkerStatus>) -> Result<usize, MarkerError> {
        let jobs = self.list_jobs(filter);
        for job in &jobs {
            self.remove_markers(&job.path)?;
        }
        Ok(jobs.len())
    }

    /// Delete every marker suffix for `file`. Idempotent.
    pub fn remove_markers(&self, file: &Path) -> io::Result<()> {
        for status in MarkerStatus::ALL {
            remove_if_exists(&marker_path(file, status))?;
        }
        remove_if_exists(&temp_marker_path(file))
    }
}
