//! Rip and encode orchestration.
//!
//! [`QueueManager::process_disc`] runs one disc through scan, identification,
//! title selection and ripping, leaving a `ready` marker next to every ripped
//! file. [`QueueManager::process_queue`] independently drains those markers
//! through the encoder. Markers are the only state shared between the two,
//! so a restart picks the queue up by rescanning the raw directory.

use crate::concurrency::{ConcurrencyPlan, Slots};
use crate::config::Config;
use crate::detect::{CommandEjector, Ejector};
use crate::disc::{Disc, DiscMetadata, MediaType, Title};
use crate::encode::{
    EncodeError, EncodeOptions, EncodeProgress, EncodeProgressFn, Encoder, HandBrakeEncoder,
};
use crate::jobs::{Job, JobStatus};
use crate::markers::{
    is_media_file, MarkerError, MarkerMetadata, MarkerStatus, MarkerStore, QueuedFile,
};
use crate::metadata::{
    ArmClient, DiscIdentifier, DiscLookup, DvdIdIdentifier, MetadataError, TitleSearch,
    TmdbClient,
};
use crate::naming::{
    clean_label, dedup_candidates, disc_directory_name, placeholder_directory_name, OutputNamer,
};
use crate::ripper::{MakeMkvRipper, RipError, RipProgressFn, Ripper};
use crate::select::TitleSelector;
use crate::status::{SharedStatus, StatusEvent};
use serde_json::Value;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::AcquireError;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

#[derive(Debug, Error)]
pub enum QueueError {
    #[error(transparent)]
    Rip(#[from] RipError),

    #[error(transparent)]
    Encode(#[from] EncodeError),

    #[error("Marker error: {0}")]
    Marker(#[from] MarkerError),

    #[error("Concurrency slot unavailable: {0}")]
    Slot(#[from] AcquireError),

    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

/// External tools and services the scheduler drives.
#[derive(Clone)]
pub struct Collaborators {
    pub ripper: Arc<dyn Ripper>,
    pub encoder: Arc<dyn Encoder>,
    pub identifier: Arc<dyn DiscIdentifier>,
    /// Lookup by content identifier, tried first.
    pub disc_lookup: Arc<dyn DiscLookup>,
    /// Search by cleaned disc label, tried when the lookup finds nothing.
    pub title_search: Arc<dyn TitleSearch>,
    pub ejector: Arc<dyn Ejector>,
}

impl Collaborators {
    /// MakeMKV, HandBrake, the DVD content id, ARM and TMDB.
    pub fn from_config(cfg: &Config) -> Result<Self, MetadataError> {
        Ok(Self {
            ripper: Arc::new(MakeMkvRipper::new(cfg.makemkv.path.clone())),
            encoder: Arc::new(HandBrakeEncoder::new(cfg.encode.handbrake_path.clone())),
            identifier: Arc::new(DvdIdIdentifier),
            disc_lookup: Arc::new(ArmClient::new(cfg.metadata.arm_api_url.clone())?),
            title_search: Arc::new(TmdbClient::new(cfg.metadata.tmdb_api_key.clone())?),
            ejector: Arc::new(CommandEjector::default()),
        })
    }
}

/// Per-call overrides for [`QueueManager::process_disc`].
#[derive(Debug, Clone, Default)]
pub struct ProcessOptions {
    /// Encode the ripped files before returning instead of leaving them to
    /// the drain loop.
    pub encode_inline: bool,
    /// Rip only this title index, bypassing selection.
    pub only_title: Option<u32>,
    /// Minimum title duration in seconds, overriding the classification default.
    pub min_duration: Option<u64>,
}

/// Marker key set on the file ripped from the disc's main feature.
pub const MAIN_FEATURE_KEY: &str = "main_feature";

/// Marker metadata recorded for a file ripped from `disc`.
pub fn marker_metadata(disc: &Disc, main_feature: bool) -> MarkerMetadata {
    let meta = disc.metadata.as_ref();
    let mut map = MarkerMetadata::new();
    map.insert("disc_name".into(), Value::from(disc.name.clone()));
    map.insert("disc_id".into(), disc.disc_id.clone().map_or(Value::Null, Value::from));
    map.insert("title".into(), meta.map_or(Value::Null, |m| Value::from(m.title.clone())));
    map.insert("year".into(), meta.and_then(|m| m.year).map_or(Value::Null, Value::from));
    map.insert(
        "imdb_id".into(),
        meta.and_then(|m| m.imdb_id.clone()).map_or(Value::Null, Value::from),
    );
    if let Some(meta) = meta {
        if let Ok(media_type) = serde_json::to_value(meta.media_type) {
            map.insert("media_type".into(), media_type);
        }
    }
    map.insert(MAIN_FEATURE_KEY.into(), Value::Bool(main_feature));
    map
}

/// Whether marker metadata names its file as the main feature. Markers
/// written without the key are treated as extras.
pub fn is_main_feature(meta: Option<&MarkerMetadata>) -> bool {
    meta.and_then(|m| m.get(MAIN_FEATURE_KEY))
        .and_then(Value::as_bool)
        .unwrap_or(false)
}

/// Rebuild enough of a [`Disc`] from a queue entry to name its output.
pub fn disc_from_marker(entry: &QueuedFile) -> Disc {
    let meta = entry.metadata.clone().unwrap_or_default();
    let text = |key: &str| meta.get(key).and_then(Value::as_str).map(str::to_string);

    let mut disc = Disc::new("");
    disc.name = text("disc_name").unwrap_or_else(|| entry.name.clone());
    disc.disc_id = text("disc_id");

    if let Some(title) = text("title").filter(|t| !t.is_empty()) {
        let mut found = DiscMetadata::new(title);
        found.year = meta
            .get("year")
            .and_then(Value::as_u64)
            .and_then(|y| u16::try_from(y).ok());
        found.imdb_id = text("imdb_id");
        found.media_type = meta
            .get("media_type")
            .cloned()
            .and_then(|v| serde_json::from_value::<MediaType>(v).ok())
            .unwrap_or(MediaType::Movie);
        disc.metadata = Some(found);
    }
    disc
}

fn contains_media(dir: &Path) -> bool {
    fs::read_dir(dir)
        .map(|entries| {
            entries
                .filter_map(|e| e.ok())
                .any(|e| e.path().is_file() && is_media_file(&e.path()))
        })
        .unwrap_or(false)
}

fn remove_dir_if_empty(dir: &Path) -> io::Result<bool> {
    if dir.is_dir() && fs::read_dir(dir)?.next().is_none() {
        fs::remove_dir(dir)?;
        return Ok(true);
    }
    Ok(false)
}

/// Schedules disc rips and the encode queue.
pub struct QueueManager {
    config: Arc<Config>,
    collab: Collaborators,
    markers: MarkerStore,
    selector: TitleSelector,
    namer: OutputNamer,
    slots: Slots,
    encode_options: EncodeOptions,
    status: Option<SharedStatus>,
    poll_interval: Duration,
    cancel: CancellationToken,
}

impl QueueManager {
    pub fn new(config: Arc<Config>, collab: Collaborators, status: Option<SharedStatus>) -> Self {
        Self {
            markers: MarkerStore::new(config.paths.raw_dir.clone()),
            selector: TitleSelector::new(&config.selection),
            namer: OutputNamer::new(config.paths.output_dir.clone()),
            slots: Slots::new(ConcurrencyPlan::derive(&config)),
            encode_options: EncodeOptions::from_config(&config.encode),
            poll_interval: Duration::from_secs(config.queue.poll_interval_secs.max(1)),
            cancel: CancellationToken::new(),
            status,
            collab,
            config,
        }
    }

    pub fn markers(&self) -> &MarkerStore {
        &self.markers
    }

    pub fn slots(&self) -> &Slots {
        &self.slots
    }

    fn emit(&self, event: StatusEvent) {
        if let Some(status) = &self.status {
            status.on_event(event);
        }
    }

    fn notify(&self, message: impl Into<String>) {
        self.emit(StatusEvent::Message(message.into()));
    }

    /// Walk the marker tree off the runtime threads.
    async fn list_markers(&self, filter: Option<MarkerStatus>) -> Vec<QueuedFile> {
        let markers = self.markers.clone();
        tokio::task::spawn_blocking(move || markers.list_jobs(filter))
            .await
            .unwrap_or_else(|e| {
                warn!(error = %e, "marker listing task failed");
                Vec::new()
            })
    }

    async fn next_ready(&self) -> Option<QueuedFile> {
        let markers = self.markers.clone();
        match tokio::task::spawn_blocking(move || markers.get_next_ready()).await {
            Ok(entry) => entry,
            Err(e) => {
                warn!(error = %e, "marker listing task failed");
                None
            }
        }
    }

    /// Push the current marker listing to the status sink.
    pub async fn publish_queue(&self) {
        if self.status.is_some() {
            let jobs = self.list_markers(None).await;
            self.emit(StatusEvent::QueueChanged(jobs));
        }
    }

    /// Scan a disc and resolve its metadata without ripping anything.
    pub async fn identify_disc(&self, device: &str) -> Result<Disc, RipError> {
        let mut disc = self.collab.ripper.scan_disc(device).await?;
        disc.device = device.to_string();
        self.resolve_metadata(&mut disc).await;
        Ok(disc)
    }

    /// Fill `disc.disc_id` and `disc.metadata` where possible.
    ///
    /// Every failure here is logged and swallowed; an unidentified disc is
    /// still ripped.
    async fn resolve_metadata(&self, disc: &mut Disc) {
        let identifier = self.collab.identifier.clone();
        let device = disc.device.clone();
        match tokio::task::spawn_blocking(move || identifier.compute_disc_id(&device)).await {
            Ok(Ok(disc_id)) => {
                disc.disc_id = Some(disc_id.clone());
                match self.collab.disc_lookup.lookup(&disc_id).await {
                    Ok(Some(meta)) => {
                        self.found_metadata(&meta, "disc database");
                        disc.metadata = Some(meta);
                        return;
                    }
                    Ok(None) => debug!(disc_id = %disc_id, "disc not in database"),
                    Err(e) => debug!(error = %e, "disc database lookup failed"),
                }
            }
            Ok(Err(e)) => debug!(error = %e, "disc id lookup failed"),
            Err(e) => warn!(error = %e, "disc id task failed"),
        }

        let search_title = clean_label(disc.raw_label());
        if !search_title.is_empty() {
            info!(title = %search_title, "searching by disc name");
            match self.collab.title_search.search(&search_title, None).await {
                Ok(Some(meta)) => {
                    self.found_metadata(&meta, "title search");
                    disc.metadata = Some(meta);
                    return;
                }
                Ok(None) => debug!(title = %search_title, "title search found nothing"),
                Err(e) => debug!(error = %e, "title search failed"),
            }
        }

        warn!(disc_name = %disc.name, "all metadata lookup methods failed");
    }

    fn found_metadata(&self, meta: &DiscMetadata, source: &str) {
        info!(title = %meta.title, year = ?meta.year, source, "found metadata");
        self.notify(format!("Found: {}", meta.display_name()));
    }

    /// An earlier run already left ripped or encoded files for this title.
    fn is_already_processed(&self, disc: &Disc) -> bool {
        let Some(meta) = disc.metadata.as_ref() else {
            return false;
        };
        let raw = &self.config.paths.raw_dir;
        let movies = self.config.paths.output_dir.join("Movies");

        dedup_candidates(meta).iter().any(|name| {
            [raw.join(name), movies.join(name)].iter().any(|dir| {
                let hit = contains_media(dir);
                if hit {
                    debug!(path = %dir.display(), "found earlier output");
                }
                hit
            })
        })
    }

    /// Run one disc through the whole pipeline.
    ///
    /// Never returns an error: failures end up in the job's status and
    /// error list.
    pub async fn process_disc(&self, device: &str, opts: &ProcessOptions) -> Job {
        info!(device, "processing disc");
        let placeholder = self
            .config
            .paths
            .raw_dir
            .join(placeholder_directory_name(device));
        let mut job = Job::new(Disc::new(device), placeholder);

        if let Err(e) = self.rip_phase(&mut job, opts).await {
            error!(device, error = %e, "disc processing failed");
            job.fail(e.to_string(), "processing", None);
            self.emit(StatusEvent::RipFailed(e.to_string()));
        }

        if self.config.drive.eject_after_rip {
            self.eject_disc(device).await;
        }

        if job.status == JobStatus::Ripped {
            if opts.encode_inline && self.config.encode.enabled {
                job.set_status(JobStatus::Encoding);
                let disc = job.disc.clone();
                for file in job.output_files.clone() {
                    if file.exists() {
                        let main = is_main_feature(
                            self.markers
                                .read_marker(&file)
                                .and_then(|m| m.metadata)
                                .as_ref(),
                        );
                        self.encode_file(&file, &disc, main).await;
                    }
                }
            }
            job.complete();
            info!(device, files = job.output_files.len(), "disc processing complete");
        }
        job
    }

    /// Scan, identify, select and rip. Leaves the job `Ripped` on success,
    /// or terminal when there is nothing more to do.
    async fn rip_phase(&self, job: &mut Job, opts: &ProcessOptions) -> Result<(), QueueError> {
        let device = job.disc.device.clone();
        let placeholder = job.output_dir.clone();
        tokio::fs::create_dir_all(&placeholder).await?;

        job.start();
        self.notify("Scanning disc...");
        let mut disc = self.collab.ripper.scan_disc(&device).await?;
        disc.device = device.clone();
        self.resolve_metadata(&mut disc).await;
        job.disc = disc;

        if self.is_already_processed(&job.disc) {
            let name = job.disc.display_name();
            info!(disc = %name, "disc already processed, skipping");
            self.notify(format!("Already processed: {}", name));
            if let Err(e) = remove_dir_if_empty(&placeholder) {
                debug!(path = %placeholder.display(), error = %e, "could not remove placeholder");
            }
            job.complete();
            return Ok(());
        }

        let disc_dir = self
            .config
            .paths
            .raw_dir
            .join(disc_directory_name(&job.disc, &device));
        if disc_dir != placeholder {
            tokio::fs::create_dir_all(&disc_dir).await?;
            if let Err(e) = remove_dir_if_empty(&placeholder) {
                debug!(path = %placeholder.display(), error = %e, "could not remove placeholder");
            }
            job.output_dir = disc_dir;
        }

        let selected: Vec<Title> = match opts.only_title {
            Some(index) => job
                .disc
                .titles
                .iter()
                .filter(|t| t.index == index)
                .cloned()
                .collect(),
            None => self.selector.select_titles(&job.disc.titles, opts.min_duration),
        };
        if selected.is_empty() {
            warn!(device = %device, "no titles selected for ripping");
            job.fail("No titles selected", "selection", None);
            self.emit(StatusEvent::RipFailed("No titles selected".to_string()));
            return Ok(());
        }
        job.titles = selected;

        self.emit(StatusEvent::RipStarted {
            device: device.clone(),
            disc_name: job.disc.display_name(),
            total_titles: job.titles.len(),
        });
        let main_index = match job.titles.as_slice() {
            [only] => Some(only.index),
            titles => self.selector.main_feature(titles).map(|t| t.index),
        };

        job.set_status(JobStatus::Ripping);
        let ripped = self.rip_titles(job).await?;

        if ripped.is_empty() {
            job.fail("No files ripped", "ripping", None);
            self.emit(StatusEvent::RipFailed("No files ripped".to_string()));
            return Ok(());
        }

        job.set_status(JobStatus::Ripped);
        self.emit(StatusEvent::RipCompleted);

        for (index, file) in &ripped {
            let metadata = marker_metadata(&job.disc, Some(*index) == main_index);
            self.markers
                .create_marker(file, MarkerStatus::Ready, Some(metadata), None)?;
        }
        job.output_files = ripped.into_iter().map(|(_, file)| file).collect();
        self.publish_queue().await;
        Ok(())
    }

    fn rip_progress(&self, position: usize, total: usize) -> Option<RipProgressFn> {
        let status = self.status.clone()?;
        Some(Arc::new(move |percent: f32| {
            let base = (position - 1) as f32 / total as f32 * 100.0;
            status.on_rip_progress(position, total, base + percent / total as f32);
        }))
    }

    /// Rip the selected titles in order while holding one rip slot.
    ///
    /// A failed title is skipped; only errors that would fail every title
    /// (missing tool, license) abort the loop.
    async fn rip_titles(&self, job: &mut Job) -> Result<Vec<(u32, PathBuf)>, QueueError> {
        let _permit = self.slots.acquire_rip().await?;

        let indices: Vec<u32> = job.titles.iter().map(|t| t.index).collect();
        let total = indices.len();
        let mut files = Vec::with_capacity(total);

        for (i, index) in indices.into_iter().enumerate() {
            job.current_title = Some(index);
            job.progress = i as f32 / total as f32 * 100.0;
            info!(index, progress = %format!("{}/{}", i + 1, total), "ripping title");

            let result = self
                .collab
                .ripper
                .rip_title(
                    &job.disc.device,
                    index,
                    &job.output_dir,
                    self.rip_progress(i + 1, total),
                )
                .await;
            match result {
                Ok(path) => files.push((index, path)),
                // Missing tool or license: every remaining title would fail the same way.
                Err(e) if e.is_fatal() => return Err(e.into()),
                Err(e) => error!(index, error = %e, "failed to rip title"),
            }
        }
        job.progress = 100.0;
        Ok(files)
    }

    /// Eject the disc; failures are only logged.
    pub async fn eject_disc(&self, device: &str) {
        match self.collab.ejector.eject(device).await {
            Ok(()) => {
                info!(device, "disc ejected");
                self.notify("Disc ejected");
            }
            Err(e) => warn!(device, error = %e, "failed to eject disc"),
        }
    }

    async fn run_encode(&self, file: &Path, output: &Path) -> Result<PathBuf, QueueError> {
        let progress: Option<EncodeProgressFn> = self.status.clone().map(|status| {
            Arc::new(move |p: &EncodeProgress| status.on_encode_progress(p))
                as EncodeProgressFn
        });

        let _permit = self.slots.acquire_encode().await?;
        Ok(self
            .collab
            .encoder
            .encode(file, output, &self.encode_options, progress)
            .await?)
    }

    fn set_marker(&self, file: &Path, status: MarkerStatus, error: Option<&str>) -> bool {
        match self.markers.update_status(file, status, error) {
            Ok(_) => true,
            Err(MarkerError::NotFound(_)) => {
                warn!(file = %file.display(), status = %status, "file has no marker");
                false
            }
            Err(e) => {
                warn!(file = %file.display(), status = %status, error = %e, "failed to update marker");
                false
            }
        }
    }

    /// Encode one marked file and record the outcome in its marker.
    ///
    /// Returns `false` when the file could not be claimed for encoding.
    async fn encode_file(&self, file: &Path, disc: &Disc, main_feature: bool) -> bool {
        if !self.set_marker(file, MarkerStatus::Transcoding, None) {
            return false;
        }

        let name = file
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        self.emit(StatusEvent::EncodeStarted(name.clone()));
        self.publish_queue().await;

        let output = self.namer.output_path(disc, file, main_feature);
        match self.run_encode(file, &output).await {
            Ok(produced) => {
                self.set_marker(file, MarkerStatus::Complete, None);
                info!(input = %name, output = %produced.display(), "encoding complete");
                if self.config.encode.delete_raw_after_encode {
                    self.cleanup_raw_file(file);
                }
                self.emit(StatusEvent::EncodeCompleted);
            }
            Err(e) => {
                let message = e.to_string();
                error!(file = %name, error = %message, "encoding failed");
                self.set_marker(file, MarkerStatus::Failed, Some(&message));
                self.emit(StatusEvent::EncodeFailed(message));
            }
        }
        self.publish_queue().await;
        true
    }

    /// Delete a raw file, its markers and its directory once empty.
    fn remove_raw_file(&self, file: &Path) -> io::Result<()> {
        if file.exists() {
            fs::remove_file(file)?;
            info!(file = %file.display(), "deleted raw file");
        }
        self.markers.remove_markers(file)?;
        if let Some(parent) = file.parent() {
            if parent != self.markers.root() && remove_dir_if_empty(parent)? {
                info!(dir = %parent.display(), "removed empty directory");
            }
        }
        Ok(())
    }

    fn cleanup_raw_file(&self, file: &Path) {
        if let Err(e) = self.remove_raw_file(file) {
            warn!(file = %file.display(), error = %e, "failed to clean up raw file");
        }
    }

    /// Encode the oldest `ready` file, if there is one.
    ///
    /// Returns whether a file was taken from the queue.
    pub async fn process_next(&self) -> bool {
        let Some(entry) = self.next_ready().await else {
            return false;
        };
        info!(name = %entry.name, "processing queued file");
        let disc = disc_from_marker(&entry);
        let main = is_main_feature(entry.metadata.as_ref());
        self.encode_file(&entry.path, &disc, main).await
    }

    /// Drain the encode queue until [`stop`](Self::stop) is called.
    pub async fn process_queue(&self) {
        info!("starting queue processor");
        while !self.cancel.is_cancelled() {
            if self.process_next().await {
                continue;
            }
            tokio::select! {
                _ = self.cancel.cancelled() => break,
                _ = tokio::time::sleep(self.poll_interval) => {}
            }
        }
        info!("queue processor stopped");
    }

    /// Stop the drain loop after the current file. Permanent.
    pub fn stop(&self) {
        self.cancel.cancel();
    }

    /// Return files left `transcoding` by an interrupted run to `ready`.
    pub async fn recover_interrupted(&self) -> usize {
        let mut count = 0;
        for entry in self.list_markers(Some(MarkerStatus::Transcoding)).await {
            info!(name = %entry.name, "recovering interrupted job");
            if self.set_marker(&entry.path, MarkerStatus::Ready, None) {
                count += 1;
            }
        }
        if count > 0 {
            info!(count, "recovered interrupted jobs");
            self.notify(format!("Recovered {} interrupted job(s)", count));
            self.publish_queue().await;
        }
        count
    }
}
