//! Disc, title and metadata model.
//!
//! A [`Disc`] is produced by the ripper's scan step and then enriched in place
//! as identification succeeds. Titles are immutable once scanned.

use serde::{Deserialize, Serialize};

/// Physical disc format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum DiscType {
    Dvd,
    Bluray,
    Uhd,
    #[default]
    Unknown,
}

impl DiscType {
    /// Infer the disc type from a free-form description such as "Blu-ray disc".
    pub fn from_description(value: &str) -> Self {
        let value = value.to_lowercase();
        if value.contains("uhd") || value.contains("4k") {
            DiscType::Uhd
        } else if value.contains("blu-ray") || value.contains("bluray") {
            DiscType::Bluray
        } else if value.contains("dvd") {
            DiscType::Dvd
        } else {
            DiscType::Unknown
        }
    }
}

impl std::fmt::Display for DiscType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DiscType::Dvd => write!(f, "dvd"),
            DiscType::Bluray => write!(f, "bluray"),
            DiscType::Uhd => write!(f, "uhd"),
            DiscType::Unknown => write!(f, "unknown"),
        }
    }
}

/// Whether the disc holds a film or episodic content.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum MediaType {
    Movie,
    Tv,
    #[default]
    Unknown,
}

/// Identification result from a metadata service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct DiscMetadata {
    pub title: String,
    pub year: Option<u16>,
    pub media_type: MediaType,
    pub imdb_id: Option<String>,
    pub tmdb_id: Option<u64>,
    pub poster_url: Option<String>,
    pub overview: Option<String>,
    /// Season number for TV discs.
    pub season: Option<u32>,
    pub episode_count: Option<u32>,
}

impl DiscMetadata {
    pub fn new(title: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            ..Default::default()
        }
    }

    /// "Title (Year)", or just the title when the year is unknown.
    pub fn display_name(&self) -> String {
        match self.year {
            Some(year) => format!("{} ({})", self.title, year),
            None => self.title.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct AudioTrack {
    pub index: u32,
    pub codec: String,
    pub channels: u32,
    pub language: String,
    pub name: String,
    pub default: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct SubtitleTrack {
    pub index: u32,
    pub codec: String,
    pub language: String,
    pub name: String,
    pub forced: bool,
    pub default: bool,
}

/// One extractable stream on a disc.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct Title {
    pub index: u32,
    /// Duration in seconds.
    pub duration: u64,
    pub chapters: u32,
    pub size_bytes: u64,
    pub video_codec: String,
    pub resolution: String,
    pub frame_rate: Option<f32>,
    pub audio_tracks: Vec<AudioTrack>,
    pub subtitle_tracks: Vec<SubtitleTrack>,
    pub segment_count: u32,
    pub segment_map: String,
    pub source_file: String,
    pub output_file: String,
}

impl Title {
    pub fn new(index: u32, duration: u64) -> Self {
        Self {
            index,
            duration,
            segment_count: 1,
            ..Default::default()
        }
    }

    /// Duration as H:MM:SS.
    pub fn duration_str(&self) -> String {
        let h = self.duration / 3600;
        let m = (self.duration % 3600) / 60;
        let s = self.duration % 60;
        format!("{}:{:02}:{:02}", h, m, s)
    }
}

/// Scan result for one physical disc.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct Disc {
    pub name: String,
    pub device: String,
    pub disc_type: DiscType,
    /// Content identifier hash, when it could be computed.
    pub disc_id: Option<String>,
    pub label: Option<String>,
    pub titles: Vec<Title>,
    pub metadata: Option<DiscMetadata>,
}

impl Disc {
    pub fn new(device: impl Into<String>) -> Self {
        Self {
            device: device.into(),
            ..Default::default()
        }
    }

    /// Volume label if present, otherwise the scanned name.
    pub fn raw_label(&self) -> &str {
        self.label
            .as_deref()
            .filter(|l| !l.is_empty())
            .unwrap_or(&self.name)
    }

    pub fn total_duration(&self) -> u64 {
        self.titles.iter().map(|t| t.duration).sum()
    }

    /// Human-facing name: metadata title if identified, else label.
    pub fn display_name(&self) -> String {
        match &self.metadata {
            Some(meta) if !meta.title.is_empty() => meta.display_name(),
            _ => self.raw_label().to_string(),
        }
    }
}
