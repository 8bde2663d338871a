//! Parser for MakeMKV robot-mode (`-r`) output.
//!
//! Robot mode prints one record per line:
//! - `MSG:code,flags,count,message,format,param...`
//! - `PRGV:current,total,max`
//! - `CINFO:attr,code,value` (disc)
//! - `TINFO:title,attr,code,value` (title)
//! - `SINFO:title,stream,attr,code,value` (stream)
//! - `DRV:index,visible,enabled,flags,drive_name,disc_name[,device]`

use crate::disc::{AudioTrack, Disc, DiscType, SubtitleTrack, Title};
use std::collections::BTreeMap;

/// Attribute ids from MakeMKV's `apdefs.h`.
pub mod attr {
    pub const TYPE: u32 = 1;
    pub const NAME: u32 = 2;
    pub const LANG_CODE: u32 = 3;
    pub const CODEC_SHORT: u32 = 6;
    pub const CODEC_LONG: u32 = 7;
    pub const CHAPTER_COUNT: u32 = 8;
    pub const DURATION: u32 = 9;
    pub const DISK_SIZE_BYTES: u32 = 11;
    pub const AUDIO_CHANNELS_COUNT: u32 = 14;
    pub const SOURCE_FILE_NAME: u32 = 16;
    pub const VIDEO_SIZE: u32 = 19;
    pub const VIDEO_FRAME_RATE: u32 = 21;
    pub const STREAM_FLAGS: u32 = 22;
    pub const SEGMENTS_COUNT: u32 = 25;
    pub const SEGMENTS_MAP: u32 = 26;
    pub const OUTPUT_FILE_NAME: u32 = 27;
    pub const VOLUME_NAME: u32 = 32;
}

const STREAM_FLAG_FORCED_SUBTITLES: u32 = 4096;

/// One parsed robot-mode line.
#[derive(Debug, Clone, PartialEq)]
pub enum RobotRecord {
    Message {
        code: u32,
        flags: u32,
        text: String,
    },
    Progress {
        current: u64,
        total: u64,
        max: u64,
    },
    DiscInfo {
        attr: u32,
        value: String,
    },
    TitleInfo {
        title: u32,
        attr: u32,
        value: String,
    },
    StreamInfo {
        title: u32,
        stream: u32,
        attr: u32,
        value: String,
    },
    Drive {
        index: u32,
        visible: u32,
        drive_name: String,
        disc_name: String,
        device: Option<String>,
    },
}

impl RobotRecord {
    /// Progress of the current operation as a percentage, for `PRGV` records.
    pub fn percent(&self) -> Option<f32> {
        match self {
            RobotRecord::Progress { current, max, .. } if *max > 0 => {
                Some((*current as f64 / *max as f64 * 100.0) as f32)
            }
            _ => None,
        }
    }
}

/// Split a robot-mode field list on commas outside double quotes.
pub fn split_fields(content: &str) -> Vec<String> {
    let mut fields = Vec::new();
    let mut current = String::new();
    let mut in_quotes = false;

    for c in content.chars() {
        match c {
            '"' => in_quotes = !in_quotes,
            ',' if !in_quotes => fields.push(std::mem::take(&mut current)),
            _ => current.push(c),
        }
    }
    fields.push(current);
    fields
}

/// Parse one line; unknown or malformed lines yield `None`.
pub fn parse_record(line: &str) -> Option<RobotRecord> {
    let (kind, content) = line.trim().split_once(':')?;
    let fields = split_fields(content);
    let num = |i: usize| fields.get(i)?.trim().parse::<u32>().ok();
    let text = |i: usize| fields.get(i).cloned().unwrap_or_default();

    let record = match kind {
        "MSG" => RobotRecord::Message {
            code: num(0)?,
            flags: num(1).unwrap_or(0),
            text: text(3),
        },
        "PRGV" => {
            let big = |i: usize| fields.get(i)?.trim().parse::<u64>().ok();
            RobotRecord::Progress {
                current: big(0)?,
                total: big(1)?,
                max: big(2)?,
            }
        }
        "CINFO" => RobotRecord::DiscInfo {
            attr: num(0)?,
            value: text(2),
        },
        "TINFO" => RobotRecord::TitleInfo {
            title: num(0)?,
            attr: num(1)?,
            value: text(3),
        },
        "SINFO" => RobotRecord::StreamInfo {
            title: num(0)?,
            stream: num(1)?,
            attr: num(2)?,
            value: text(4),
        },
        "DRV" if fields.len() >= 6 => RobotRecord::Drive {
            index: num(0)?,
            visible: num(1).unwrap_or(0),
            drive_name: text(4),
            disc_name: text(5),
            device: fields.get(6).filter(|d| !d.is_empty()).cloned(),
        },
        _ => return None,
    };
    Some(record)
}

/// Parse `H:MM:SS` or `M:SS` into seconds; anything else is zero.
pub fn parse_duration(value: &str) -> u64 {
    let parts: Vec<u64> = match value.split(':').map(|p| p.trim().parse()).collect() {
        Ok(parts) => parts,
        Err(_) => return 0,
    };
    match parts.as_slice() {
        [h, m, s] => h * 3600 + m * 60 + s,
        [m, s] => m * 60 + s,
        _ => 0,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum StreamKind {
    Video,
    Audio,
    Subtitle,
}

/// Accumulates scan records into a [`Disc`].
#[derive(Debug, Default)]
pub struct ScanState {
    disc: Disc,
    titles: BTreeMap<u32, Title>,
    streams: BTreeMap<(u32, u32), StreamKind>,
    audio: BTreeMap<(u32, u32), AudioTrack>,
    subtitles: BTreeMap<(u32, u32), SubtitleTrack>,
    /// First video stream of each title
    video_stream: BTreeMap<u32, u32>,
    errors: Vec<String>,
}

impl ScanState {
    pub fn new(device: &str) -> Self {
        Self {
            disc: Disc::new(device),
            ..Default::default()
        }
    }

    /// Error-flagged `MSG` texts seen so far.
    pub fn errors(&self) -> &[String] {
        &self.errors
    }

    pub fn apply(&mut self, record: RobotRecord) {
        match record {
            RobotRecord::Message { flags, text, .. } => {
                // MSG flag bit 0x0004 marks errors
                if flags & 0x4 != 0 {
                    self.errors.push(text);
                }
            }
            RobotRecord::Progress { .. } => {}
            RobotRecord::DiscInfo { attr, value } => self.apply_disc(attr, value),
            RobotRecord::TitleInfo { title, attr, value } => self.apply_title(title, attr, value),
            RobotRecord::StreamInfo {
                title,
                stream,
                attr,
                value,
            } => self.apply_stream(title, stream, attr, value),
            RobotRecord::Drive { disc_name, .. } => {
                if self.disc.name.is_empty() && !disc_name.is_empty() {
                    self.disc.name = disc_name;
                }
            }
        }
    }

    fn apply_disc(&mut self, attr: u32, value: String) {
        match attr {
            attr::TYPE => self.disc.disc_type = DiscType::from_description(&value),
            attr::NAME => self.disc.name = value,
            attr::VOLUME_NAME => self.disc.label = Some(value),
            _ => {}
        }
    }

    fn apply_title(&mut self, index: u32, attr: u32, value: String) {
        let title = self
            .titles
            .entry(index)
            .or_insert_with(|| Title::new(index, 0));
        match attr {
            attr::DURATION => title.duration = parse_duration(&value),
            attr::CHAPTER_COUNT => title.chapters = value.trim().parse().unwrap_or(0),
            attr::DISK_SIZE_BYTES => title.size_bytes = value.trim().parse().unwrap_or(0),
            attr::SEGMENTS_COUNT => title.segment_count = value.trim().parse().unwrap_or(1),
            attr::SEGMENTS_MAP => title.segment_map = value,
            attr::SOURCE_FILE_NAME => title.source_file = value,
            attr::OUTPUT_FILE_NAME => title.output_file = value,
            _ => {}
        }
    }

    fn apply_stream(&mut self, title_idx: u32, stream: u32, attr: u32, value: String) {
        let key = (title_idx, stream);

        if attr == attr::TYPE {
            let lower = value.to_lowercase();
            let kind = if lower.contains("video") {
                StreamKind::Video
            } else if lower.contains("audio") {
                StreamKind::Audio
            } else if lower.contains("subtitle") {
                StreamKind::Subtitle
            } else {
                return;
            };
            self.streams.insert(key, kind);
            match kind {
                StreamKind::Audio => {
                    self.audio.entry(key).or_insert_with(|| AudioTrack {
                        index: stream,
                        channels: 2,
                        ..Default::default()
                    });
                }
                StreamKind::Subtitle => {
                    self.subtitles.entry(key).or_insert_with(|| SubtitleTrack {
                        index: stream,
                        ..Default::default()
                    });
                }
                StreamKind::Video => {}
            }
            return;
        }

        match self.streams.get(&key).copied() {
            Some(StreamKind::Audio) => {
                if let Some(track) = self.audio.get_mut(&key) {
                    match attr {
                        attr::NAME => track.name = value,
                        attr::LANG_CODE => track.language = value,
                        attr::CODEC_SHORT => track.codec = value,
                        attr::AUDIO_CHANNELS_COUNT => {
                            track.channels = value.trim().parse().unwrap_or(2)
                        }
                        _ => {}
                    }
                }
            }
            Some(StreamKind::Subtitle) => {
                if let Some(track) = self.subtitles.get_mut(&key) {
                    match attr {
                        attr::NAME => track.name = value,
                        attr::LANG_CODE => track.language = value,
                        attr::CODEC_SHORT => track.codec = value,
                        attr::STREAM_FLAGS => {
                            let flags: u32 = value.trim().parse().unwrap_or(0);
                            track.forced = flags & STREAM_FLAG_FORCED_SUBTITLES != 0;
                        }
                        _ => {}
                    }
                }
            }
            Some(StreamKind::Video) => {
                if *self.video_stream.entry(title_idx).or_insert(stream) != stream {
                    return;
                }
                let Some(title) = self.titles.get_mut(&title_idx) else {
                    return;
                };
                match attr {
                    attr::CODEC_SHORT => title.video_codec = value,
                    attr::CODEC_LONG if title.video_codec.is_empty() => title.video_codec = value,
                    attr::VIDEO_SIZE => title.resolution = value,
                    attr::VIDEO_FRAME_RATE => title.frame_rate = parse_frame_rate(&value),
                    _ => {}
                }
            }
            None => {}
        }
    }

    /// Attach streams to their titles and return the disc, titles ordered by index.
    pub fn finish(mut self) -> Disc {
        for (&(title_idx, _), track) in &self.audio {
            if let Some(title) = self.titles.get_mut(&title_idx) {
                title.audio_tracks.push(track.clone());
            }
        }
        for (&(title_idx, _), track) in &self.subtitles {
            if let Some(title) = self.titles.get_mut(&title_idx) {
                title.subtitle_tracks.push(track.clone());
            }
        }
        self.disc.titles = self.titles.into_values().collect();
        self.disc
    }
}

/// `23.976 (24000/1001)` -> 23.976
fn parse_frame_rate(value: &str) -> Option<f32> {
    value.split_whitespace().next()?.parse().ok()
}
