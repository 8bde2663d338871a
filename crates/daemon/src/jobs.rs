//! In-memory job model for one disc-to-output pipeline run.
//!
//! Jobs are owned by the queue manager for the duration of `process_disc`
//! and are never persisted; per-file markers carry state across restarts.

use crate::disc::{Disc, Title};
use chrono::{DateTime, Local, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::atomic::{AtomicU32, Ordering};

/// Status of a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    #[default]
    Pending,
    Scanning,
    Ripping,
    Ripped,
    Encoding,
    Complete,
    Failed,
    Cancelled,
}

impl JobStatus {
    /// Complete, failed and cancelled jobs never change again.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobStatus::Complete | JobStatus::Failed | JobStatus::Cancelled
        )
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            JobStatus::Pending => write!(f, "pending"),
            JobStatus::Scanning => write!(f, "scanning"),
            JobStatus::Ripping => write!(f, "ripping"),
            JobStatus::Ripped => write!(f, "ripped"),
            JobStatus::Encoding => write!(f, "encoding"),
            JobStatus::Complete => write!(f, "complete"),
            JobStatus::Failed => write!(f, "failed"),
            JobStatus::Cancelled => write!(f, "cancelled"),
        }
    }
}

/// An error recorded against a job, tagged with the pipeline stage it came from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobErrorRecord {
    pub message: String,
    pub stage: String,
    pub timestamp: DateTime<Utc>,
    pub details: Option<String>,
}

static JOB_SEQUENCE: AtomicU32 = AtomicU32::new(0);

/// Timestamp-derived identifier, suffixed with a per-process counter so two
/// jobs created in the same second stay distinct.
fn next_job_id() -> String {
    let seq = JOB_SEQUENCE.fetch_add(1, Ordering::Relaxed);
    format!("{}_{:03}", Local::now().format("%Y%m%d_%H%M%S"), seq % 1000)
}

/// A disc processing job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    pub id: String,
    pub disc: Disc,
    pub titles: Vec<Title>,
    pub output_dir: PathBuf,
    pub status: JobStatus,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    /// Index of the title currently being ripped.
    pub current_title: Option<u32>,
    /// Overall progress, 0-100.
    pub progress: f32,
    pub errors: Vec<JobErrorRecord>,
    pub output_files: Vec<PathBuf>,
}

impl Job {
    /// Create a pending job for a disc.
    pub fn new(disc: Disc, output_dir: PathBuf) -> Self {
        Self {
            id: next_job_id(),
            disc,
            titles: Vec::new(),
            output_dir,
            status: JobStatus::Pending,
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
            current_title: None,
            progress: 0.0,
            errors: Vec::new(),
            output_files: Vec::new(),
        }
    }

    /// Move to scanning and stamp the start time.
    pub fn start(&mut self) {
        if self.is_terminal() {
            return;
        }
        self.started_at = Some(Utc::now());
        self.status = JobStatus::Scanning;
    }

    /// Set a non-terminal status. Terminal transitions go through
    /// [`Job::complete`], [`Job::fail`] or [`Job::cancel`].
    pub fn set_status(&mut self, status: JobStatus) {
        if self.is_terminal() {
            return;
        }
        debug_assert!(!status.is_terminal());
        self.status = status;
    }

    pub fn complete(&mut self) {
        if self.is_terminal() {
            return;
        }
        self.status = JobStatus::Complete;
        self.progress = 100.0;
        self.completed_at = Some(Utc::now());
    }

    /// Mark the job failed and record the error against `stage`.
    pub fn fail(&mut self, message: impl Into<String>, stage: &str, details: Option<String>) {
        self.errors.push(JobErrorRecord {
            message: message.into(),
            stage: stage.to_string(),
            timestamp: Utc::now(),
            details,
        });
        if self.is_terminal() {
            return;
        }
        self.status = JobStatus::Failed;
        self.completed_at = Some(Utc::now());
    }

    pub fn cancel(&mut self) {
        if self.is_terminal() {
            return;
        }
        self.status = JobStatus::Cancelled;
        self.completed_at = Some(Utc::now());
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Only failed jobs may be retried.
    pub fn can_retry(&self) -> bool {
        self.status == JobStatus::Failed
    }

    /// Most recent error message, if any.
    pub fn last_error(&self) -> Option<&str> {
        self.errors.last().map(|e| e.message.as_str())
    }

    /// Wall-clock time between start and completion (or now, while running).
    pub fn duration(&self) -> Option<chrono::Duration> {
        let started = self.started_at?;
        let end = self.completed_at.unwrap_or_else(Utc::now);
        Some(end - started)
    }
}
