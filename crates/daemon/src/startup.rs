//! Startup checks module for riparr
//!
//! Verifies the external tools the pipeline shells out to before any disc is
//! touched:
//! - MakeMKV (`makemkvcon`), always required
//! - HandBrake (`HandBrakeCLI`), required when encoding is enabled
//! - `eject`, optional

use crate::config::Config;
use std::path::PathBuf;
use thiserror::Error;

/// Error types for startup checks
#[derive(Debug, Error)]
pub enum StartupError {
    #[error("{tool} not found: {hint}")]
    ToolMissing { tool: String, hint: &'static str },

    #[error("Failed to create directory {}: {source}", path.display())]
    Directory {
        path: PathBuf,
        source: std::io::Error,
    },
}

const MAKEMKV_HINT: &str = "install MakeMKV or set makemkv.path / RIPARR_MAKEMKV_PATH";
const HANDBRAKE_HINT: &str =
    "install HandBrakeCLI, set encode.handbrake_path, or disable encoding";

/// Resolve a configured tool name or path.
///
/// Bare names are searched on `PATH`; anything containing a separator is
/// checked as a path.
pub fn locate_tool(tool: &str) -> Option<PathBuf> {
    which::which(tool).ok()
}

fn require_tool(tool: &str, hint: &'static str) -> Result<PathBuf, StartupError> {
    locate_tool(tool).ok_or_else(|| StartupError::ToolMissing {
        tool: tool.to_string(),
        hint,
    })
}

/// Check that MakeMKV is available
pub fn check_makemkv_available(cfg: &Config) -> Result<PathBuf, StartupError> {
    require_tool(&cfg.makemkv.path, MAKEMKV_HINT)
}

/// Check that HandBrake is available; skipped when encoding is disabled
pub fn check_handbrake_available(cfg: &Config) -> Result<Option<PathBuf>, StartupError> {
    if !cfg.encode.enabled {
        return Ok(None);
    }
    require_tool(&cfg.encode.handbrake_path, HANDBRAKE_HINT).map(Some)
}

/// Create the raw, output and temp directories if they do not exist.
pub fn ensure_directories(cfg: &Config) -> Result<(), StartupError> {
    for dir in [&cfg.paths.raw_dir, &cfg.paths.output_dir, &cfg.paths.temp_dir] {
        std::fs::create_dir_all(dir).map_err(|source| StartupError::Directory {
            path: dir.clone(),
            source,
        })?;
    }
    Ok(())
}

/// Run all startup checks in order
///
/// 1. MakeMKV availability
/// 2. HandBrake availability (when encoding)
/// 3. `eject` availability (warning only)
/// 4. Working directories
pub fn run_startup_checks(cfg: &Config) -> Result<(), StartupError> {
    let makemkv = check_makemkv_available(cfg)?;
    tracing::debug!(path = %makemkv.display(), "found makemkvcon");

    if let Some(handbrake) = check_handbrake_available(cfg)? {
        tracing::debug!(path = %handbrake.display(), "found HandBrakeCLI");
    }

    if cfg.drive.eject_after_rip && locate_tool("eject").is_none() {
        tracing::warn!("eject not found on PATH; discs will stay in the drive");
    }

    ensure_directories(cfg)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn config_with_tools(makemkv: &str, handbrake: &str, encode: bool) -> Config {
        let mut cfg = Config::default();
        cfg.makemkv.path = makemkv.to_string();
        cfg.encode.handbrake_path = handbrake.to_string();
        cfg.encode.enabled = encode;
        cfg
    }

    #[test]
    fn test_missing_makemkv_is_fatal() {
        let cfg = config_with_tools("definitely-not-a-real-makemkvcon", "sh", true);
        let err = check_makemkv_available(&cfg).unwrap_err();
        match err {
            StartupError::ToolMissing { tool, hint } => {
                assert_eq!(tool, "definitely-not-a-real-makemkvcon");
                assert!(hint.contains("RIPARR_MAKEMKV_PATH"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_handbrake_skipped_when_encoding_disabled() {
        let cfg = config_with_tools("sh", "definitely-not-a-real-handbrake", false);
        assert!(check_handbrake_available(&cfg).unwrap().is_none());
    }

    #[test]
    fn test_handbrake_required_when_encoding_enabled() {
        let cfg = config_with_tools("sh", "definitely-not-a-real-handbrake", true);
        assert!(matches!(
            check_handbrake_available(&cfg),
            Err(StartupError::ToolMissing { .. })
        ));
    }

    #[test]
    fn test_run_startup_checks_creates_directories() {
        let tmp = TempDir::new().unwrap();
        let mut cfg = config_with_tools("sh", "sh", true);
        cfg.drive.eject_after_rip = false;
        cfg.paths.raw_dir = tmp.path().join("raw");
        cfg.paths.output_dir = tmp.path().join("out");
        cfg.paths.temp_dir = tmp.path().join("tmp");

        run_startup_checks(&cfg).unwrap();

        assert!(cfg.paths.raw_dir.is_dir());
        assert!(cfg.paths.output_dir.is_dir());
        assert!(cfg.paths.temp_dir.is_dir());
    }
}
