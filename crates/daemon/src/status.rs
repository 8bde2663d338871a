//! Live status tracking for the rip and encode pipelines.
//!
//! The scheduler reports through the [`StatusSink`] trait; [`StatusTracker`]
//! is the implementation served by the status endpoint.

use crate::encode::EncodeProgress;
use crate::markers::QueuedFile;
use chrono::{DateTime, Local, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::Arc;

/// Number of recent events kept in the snapshot.
pub const RECENT_EVENT_LIMIT: usize = 10;

/// Lifecycle notifications emitted by the scheduler.
#[derive(Debug, Clone, PartialEq)]
pub enum StatusEvent {
    RipStarted {
        device: String,
        disc_name: String,
        total_titles: usize,
    },
    RipCompleted,
    RipFailed(String),
    EncodeStarted(String),
    EncodeCompleted,
    EncodeFailed(String),
    QueueChanged(Vec<QueuedFile>),
    Message(String),
}

/// Fire-and-forget receiver of scheduler notifications.
///
/// Implementations must not block; they are called from inside the rip and
/// encode paths.
pub trait StatusSink: Send + Sync {
    fn on_event(&self, event: StatusEvent);

    /// Progress of the title currently being ripped, `title` of `total`.
    fn on_rip_progress(&self, title: usize, total: usize, percent: f32);

    fn on_encode_progress(&self, progress: &EncodeProgress);
}

/// Shared handle to a status sink.
pub type SharedStatus = Arc<dyn StatusSink>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum TaskState {
    #[default]
    Idle,
    Active,
    Complete,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct RipStatus {
    pub state: TaskState,
    pub device: String,
    pub disc_name: String,
    pub current_title: usize,
    pub total_titles: usize,
    pub progress: f32,
    pub started_at: Option<DateTime<Utc>>,
    pub error: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct EncodeStatus {
    pub state: TaskState,
    pub filename: String,
    pub progress: f32,
    pub fps: f32,
    pub eta: Option<String>,
    pub started_at: Option<DateTime<Utc>>,
    pub error: Option<String>,
}

/// Point-in-time view of both pipelines, serialized for the status endpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct StatusSnapshot {
    pub timestamp: Option<DateTime<Utc>>,
    pub rip: RipStatus,
    pub encode: EncodeStatus,
    pub queue: Vec<QueuedFile>,
    pub recent_events: VecDeque<String>,
}

impl StatusSnapshot {
    fn push_event(&mut self, message: String) {
        let stamped = format!("{} {}", Local::now().format("%H:%M:%S"), message);
        self.recent_events.push_back(stamped);
        while self.recent_events.len() > RECENT_EVENT_LIMIT {
            self.recent_events.pop_front();
        }
    }

    fn apply(&mut self, event: StatusEvent) {
        match event {
            StatusEvent::RipStarted {
                device,
                disc_name,
                total_titles,
            } => {
                self.push_event(format!("Started ripping {}", disc_name));
                self.rip = RipStatus {
                    state: TaskState::Active,
                    device,
                    disc_name,
                    total_titles,
                    started_at: Some(Utc::now()),
                    ..RipStatus::default()
                };
            }
            StatusEvent::RipCompleted => {
                self.rip.state = TaskState::Complete;
                self.rip.progress = 100.0;
                let name = self.rip.disc_name.clone();
                self.push_event(format!("Completed ripping {}", name));
            }
            StatusEvent::RipFailed(error) => {
                self.rip.state = TaskState::Failed;
                self.push_event(format!("Rip failed: {}", error));
                self.rip.error = Some(error);
            }
            StatusEvent::EncodeStarted(filename) => {
                self.push_event(format!("Started encoding {}", filename));
                self.encode = EncodeStatus {
                    state: TaskState::Active,
                    filename,
                    started_at: Some(Utc::now()),
                    ..EncodeStatus::default()
                };
            }
            StatusEvent::EncodeCompleted => {
                self.encode.state = TaskState::Complete;
                self.encode.progress = 100.0;
                let name = self.encode.filename.clone();
                self.push_event(format!("Completed encoding {}", name));
            }
            StatusEvent::EncodeFailed(error) => {
                self.encode.state = TaskState::Failed;
                self.push_event(format!("Encode failed: {}", error));
                self.encode.error = Some(error);
            }
            StatusEvent::QueueChanged(queue) => self.queue = queue,
            StatusEvent::Message(message) => self.push_event(message),
        }
        self.timestamp = Some(Utc::now());
    }
}

/// Lock-protected [`StatusSnapshot`] that implements [`StatusSink`].
#[derive(Debug, Default)]
pub struct StatusTracker {
    snapshot: RwLock<StatusSnapshot>,
}

impl StatusTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn snapshot(&self) -> StatusSnapshot {
        self.snapshot.read().clone()
    }
}

impl StatusSink for StatusTracker {
    fn on_event(&self, event: StatusEvent) {
        self.snapshot.write().apply(event);
    }

    fn on_rip_progress(&self, title: usize, total: usize, percent: f32) {
        let mut snapshot = self.snapshot.write();
        snapshot.rip.current_title = title;
        snapshot.rip.total_titles = total;
        snapshot.rip.progress = percent.clamp(0.0, 100.0);
        snapshot.timestamp = Some(Utc::now());
    }

    fn on_encode_progress(&self, progress: &EncodeProgress) {
        let mut snapshot = self.snapshot.write();
        snapshot.encode.progress = progress.percent.clamp(0.0, 100.0);
        snapshot.encode.fps = progress.fps.unwrap_or(0.0);
        snapshot.encode.eta = progress.eta.clone();
        snapshot.timestamp = Some(Utc::now());
    }
}
