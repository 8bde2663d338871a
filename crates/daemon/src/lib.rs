//! riparr
//!
//! Optical disc ingestion: watches drives for inserted discs, rips them with
//! MakeMKV, identifies them against metadata services and drains the ripped
//! files through HandBrake. Queue state lives in marker files next to the
//! ripped media, so an interrupted run resumes where it stopped.

pub mod concurrency;
pub mod daemon;
pub mod detect;
pub mod disc;
pub mod encode;
pub mod jobs;
pub mod markers;
pub mod metadata;
pub mod naming;
pub mod queue;
pub mod ripper;
pub mod select;
pub mod startup;
pub mod status;
pub mod status_server;

pub use riparr_config as config;
pub use riparr_config::Config;
pub use concurrency::{derive_plan, ConcurrencyPlan, Slots};
pub use daemon::{Daemon, DaemonError};
pub use detect::{CommandEjector, DiscEventHandler, DiscWatcher, DriveInfo, Ejector, WatchError};
pub use disc::{Disc, DiscMetadata, DiscType, MediaType, Title};
pub use encode::{EncodeError, EncodeOptions, EncodeProgress, Encoder, HandBrakeEncoder};
pub use jobs::{Job, JobStatus};
pub use markers::{MarkerError, MarkerStatus, MarkerStore, QueuedFile};
pub use metadata::{ArmClient, DiscIdError, DvdIdIdentifier, MetadataError, TmdbClient};
pub use queue::{Collaborators, ProcessOptions, QueueError, QueueManager};
pub use ripper::{MakeMkvRipper, RipError, Ripper};
pub use select::{DiscClassification, TitleSelector};
pub use startup::{run_startup_checks, StartupError};
pub use status::{StatusEvent, StatusSink, StatusSnapshot, StatusTracker};
pub use status_server::{create_status_router, run_status_server, ServerError};
