//! Disc ripping for riparr
//!
//! The scheduler depends on the [`Ripper`] trait; [`MakeMkvRipper`] drives
//! `makemkvcon` in robot mode.

pub mod makemkv;
pub mod robot;

pub use makemkv::MakeMkvRipper;

use crate::disc::Disc;
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;

/// Error type for rip operations
#[derive(Debug, Error)]
pub enum RipError {
    /// The ripper executable could not be started
    #[error("{0} not found; install MakeMKV and make sure makemkvcon is on PATH")]
    ToolMissing(String),

    /// Exit code 253: expired beta key or missing license
    #[error("MakeMKV license problem (exit code 253); set RIPARR_MAKEMKV_KEY")]
    License,

    /// Exit code 2
    #[error("No disc in drive {0}")]
    NoDisc(String),

    #[error("MakeMKV failed with exit code {code}: {stderr}")]
    Failed { code: i32, stderr: String },

    #[error("MakeMKV was terminated by signal")]
    Terminated,

    #[error("No output file found after ripping title {0}")]
    NoOutput(u32),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl RipError {
    /// Errors that will fail every subsequent title as well.
    pub fn is_fatal(&self) -> bool {
        matches!(self, RipError::ToolMissing(_) | RipError::License)
    }
}

/// Progress callback for a single title, 0-100.
pub type RipProgressFn = Arc<dyn Fn(f32) + Send + Sync>;

/// Reads disc structure and extracts titles.
#[async_trait]
pub trait Ripper: Send + Sync {
    /// Scan the disc in `device` and return its titles.
    async fn scan_disc(&self, device: &str) -> Result<Disc, RipError>;

    /// Extract one title into `out_dir`, returning the produced file.
    async fn rip_title(
        &self,
        device: &str,
        title_index: u32,
        out_dir: &Path,
        on_progress: Option<RipProgressFn>,
    ) -> Result<PathBuf, RipError>;
}
