//! Output path generation for movies and TV shows.
//!
//! Produces Plex/Jellyfin compatible layouts:
//! - `Movies/Title (Year) {imdb-tt…}/Title (Year).mkv`
//! - `TV/Series {imdb-tt…}/Season NN/Series - SNNEMM.mkv`
//! - `Unknown/<disc name>/<source stem>.mkv` when the disc was not identified

use crate::disc::{Disc, DiscMetadata, MediaType};
use regex::Regex;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

const INVALID_CHARS: &[char] = &['<', '>', ':', '"', '/', '\\', '|', '?', '*'];
const MAX_NAME_LEN: usize = 200;

/// Remove characters that are invalid on common filesystems, collapse
/// whitespace and trim surrounding spaces and dots.
pub fn sanitize_filename(name: &str) -> String {
    let stripped: String = name.chars().filter(|c| !INVALID_CHARS.contains(c)).collect();
    let collapsed = stripped.split_whitespace().collect::<Vec<_>>().join(" ");
    collapsed
        .trim_matches(|c: char| c == ' ' || c == '.')
        .chars()
        .take(MAX_NAME_LEN)
        .collect()
}

/// Turn a raw volume label like `THE_MATRIX.1999` into `THE MATRIX 1999`.
pub fn clean_label(label: &str) -> String {
    let spaced: String = sanitize_filename(label)
        .chars()
        .map(|c| if c == '.' || c == '_' { ' ' } else { c })
        .collect();
    spaced.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// `Title (Year) {imdb-id}` with the year and id parts present only when known.
pub fn folder_name(meta: &DiscMetadata) -> String {
    let mut name = sanitize_filename(&meta.title);
    if let Some(year) = meta.year {
        name.push_str(&format!(" ({})", year));
    }
    if let Some(imdb) = meta.imdb_id.as_deref().filter(|id| !id.is_empty()) {
        name.push_str(&format!(" {{imdb-{}}}", imdb));
    }
    name
}

/// Directory name under the raw root for a disc's rips.
///
/// Metadata wins, then the cleaned disc label, then a device-derived name.
pub fn disc_directory_name(disc: &Disc, device: &str) -> String {
    if let Some(meta) = disc.metadata.as_ref().filter(|m| !m.title.is_empty()) {
        return folder_name(meta);
    }
    let label = clean_label(disc.raw_label());
    if !label.is_empty() {
        return label;
    }
    placeholder_directory_name(device)
}

/// `disc__dev_sr0` for `/dev/sr0`.
pub fn placeholder_directory_name(device: &str) -> String {
    format!("disc_{}", device.replace('/', "_"))
}

/// Folder names an earlier run may have used for this title, most specific first.
pub fn dedup_candidates(meta: &DiscMetadata) -> Vec<String> {
    let title = sanitize_filename(&meta.title);
    let mut names = Vec::new();
    if let (Some(year), Some(imdb)) = (meta.year, meta.imdb_id.as_deref()) {
        names.push(format!("{} ({}) {{imdb-{}}}", title, year, imdb));
    }
    if let Some(year) = meta.year {
        names.push(format!("{} ({})", title, year));
    }
    names.push(title);
    names
}

fn episode_patterns() -> &'static [Regex] {
    static PATTERNS: OnceLock<Vec<Regex>> = OnceLock::new();
    PATTERNS.get_or_init(|| {
        [
            r"[Ee](\d{1,2})",
            r"[Xx](\d{1,2})",
            r"_(\d{1,2})(?:_|\.|$)",
            r"[Tt](\d{1,2})",
            r"(\d{1,2})(?:of|OF)\d+",
        ]
        .iter()
        .filter_map(|p| Regex::new(p).ok())
        .collect()
    })
}

/// Episode number from names like `S01E03`, `1x03`, `title_t03`; else `fallback`, else 1.
pub fn episode_number(source_file: &Path, fallback: Option<u32>) -> u32 {
    let stem = source_file
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();

    episode_patterns()
        .iter()
        .find_map(|re| re.captures(&stem)?.get(1)?.as_str().parse().ok())
        .or(fallback)
        .unwrap_or(1)
}

fn file_stem(path: &Path) -> String {
    path.file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "title".to_string())
}

/// Maps a ripped file to its final library location.
#[derive(Debug, Clone)]
pub struct OutputNamer {
    output_dir: PathBuf,
}

impl OutputNamer {
    pub fn new(output_dir: impl Into<PathBuf>) -> Self {
        Self {
            output_dir: output_dir.into(),
        }
    }

    pub fn output_dir(&self) -> &Path {
        &self.output_dir
    }

    /// Library path for `source_file` ripped from `disc`.
    ///
    /// Only the main feature of a movie gets the canonical `Title (Year).mkv`
    /// name; every other title of the disc goes to `Extras/` under its own
    /// file stem.
    pub fn output_path(&self, disc: &Disc, source_file: &Path, main_feature: bool) -> PathBuf {
        match disc.metadata.as_ref().filter(|m| !m.title.is_empty()) {
            Some(meta) if meta.media_type == MediaType::Tv => self.tv_path(meta, source_file),
            Some(meta) if main_feature => self.movie_path(meta),
            Some(meta) => self.extra_path(meta, source_file),
            None => self.unknown_path(disc, source_file),
        }
    }

    fn movie_path(&self, meta: &DiscMetadata) -> PathBuf {
        let title = sanitize_filename(&meta.title);
        let file_name = match meta.year {
            Some(year) => format!("{} ({}).mkv", title, year),
            None => format!("{}.mkv", title),
        };
        self.output_dir
            .join("Movies")
            .join(folder_name(meta))
            .join(file_name)
    }

    fn extra_path(&self, meta: &DiscMetadata, source_file: &Path) -> PathBuf {
        self.output_dir
            .join("Movies")
            .join(folder_name(meta))
            .join("Extras")
            .join(format!("{}.mkv", file_stem(source_file)))
    }

    fn tv_path(&self, meta: &DiscMetadata, source_file: &Path) -> PathBuf {
        let title = sanitize_filename(&meta.title);
        let mut series = title.clone();
        if let Some(imdb) = meta.imdb_id.as_deref() {
            series.push_str(&format!(" {{imdb-{}}}", imdb));
        }
        let season = meta.season.unwrap_or(1);
        let episode = episode_number(source_file, None);

        self.output_dir
            .join("TV")
            .join(series)
            .join(format!("Season {:02}", season))
            .join(format!("{} - S{:02}E{:02}.mkv", title, season, episode))
    }

    fn unknown_path(&self, disc: &Disc, source_file: &Path) -> PathBuf {
        let stem = file_stem(source_file);
        let mut folder = clean_label(disc.raw_label());
        if folder.is_empty() {
            folder = clean_label(&stem);
        }
        self.output_dir
            .join("Unknown")
            .join(folder)
            .join(format!("{}.mkv", stem))
    }
}
