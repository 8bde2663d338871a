//! Encoding modules for riparr
//!
//! The scheduler depends on the [`Encoder`] trait; [`HandBrakeEncoder`] is the
//! production implementation.

pub mod handbrake;

pub use handbrake::{
    build_handbrake_command, parse_progress_line, HandBrakeEncoder, HandBrakeParams,
};

use crate::config::{EncodeConfig, VideoCodec};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;

/// Error type for encoding operations
#[derive(Debug, Error)]
pub enum EncodeError {
    /// The encoder executable could not be started
    #[error("{0} not found; install HandBrake and make sure HandBrakeCLI is on PATH")]
    ToolMissing(String),

    #[error("Input file not found: {}", .0.display())]
    InputMissing(PathBuf),

    /// Encoder exited with non-zero status
    #[error("HandBrake failed with exit code {code}: {stderr}")]
    Failed { code: i32, stderr: String },

    /// Encoder process was terminated by signal
    #[error("HandBrake process was terminated by signal")]
    Terminated,

    #[error("Output file not created: {}", .0.display())]
    NoOutput(PathBuf),

    /// IO error during encoding
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum EncodeStage {
    #[default]
    Encoding,
    Muxing,
}

/// One progress report from the encoder.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct EncodeProgress {
    pub stage: EncodeStage,
    pub task: u32,
    pub total_tasks: u32,
    /// 0-100
    pub percent: f32,
    pub fps: Option<f32>,
    pub avg_fps: Option<f32>,
    /// As printed by the encoder, e.g. `00h12m34s`.
    pub eta: Option<String>,
}

/// Progress callback handed to [`Encoder::encode`].
pub type EncodeProgressFn = Arc<dyn Fn(&EncodeProgress) + Send + Sync>;

/// Quality and filter settings for one encode.
#[derive(Debug, Clone, PartialEq)]
pub struct EncodeOptions {
    pub preset: String,
    pub video_codec: VideoCodec,
    pub quality: u8,
    pub encoder_preset: String,
    pub deinterlace: bool,
    pub subtitle_scan: bool,
}

impl EncodeOptions {
    pub fn from_config(cfg: &EncodeConfig) -> Self {
        Self {
            preset: cfg.preset.clone(),
            video_codec: cfg.video_codec,
            quality: cfg.quality,
            encoder_preset: cfg.encoder_preset.clone(),
            deinterlace: cfg.deinterlace,
            subtitle_scan: cfg.subtitle_scan,
        }
    }
}

impl Default for EncodeOptions {
    fn default() -> Self {
        Self::from_config(&EncodeConfig::default())
    }
}

/// Transcodes one ripped file.
#[async_trait]
pub trait Encoder: Send + Sync {
    /// Encode `input` into `output`, returning the path of the produced file.
    ///
    /// Fails when the input is missing, the encoder exits non-zero, or no
    /// output file exists afterwards.
    async fn encode(
        &self,
        input: &Path,
        output: &Path,
        options: &EncodeOptions,
        on_progress: Option<EncodeProgressFn>,
    ) -> Result<PathBuf, EncodeError>;
}
