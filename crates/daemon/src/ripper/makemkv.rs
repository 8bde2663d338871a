//! MakeMKV ripper
//!
//! Runs `makemkvcon -r` and feeds its output through the robot parser.

use super::robot::{parse_record, RobotRecord, ScanState};
use super::{RipError, RipProgressFn, Ripper};
use crate::disc::Disc;
use async_trait::async_trait;
use std::io;
use std::path::{Path, PathBuf};
use std::process::{ExitStatus, Stdio};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, BufReader};
use tokio::process::Command;

const EXIT_NO_DISC: i32 = 2;
const EXIT_LICENSE: i32 = 253;
const REGISTER_TIMEOUT: Duration = Duration::from_secs(30);

/// `/dev/sr0` -> `dev:/dev/sr0`; `disc:N` passes through.
pub fn source_arg(device: &str) -> String {
    if device.starts_with("disc:") || device.starts_with("dev:") {
        device.to_string()
    } else {
        format!("dev:{}", device)
    }
}

fn exit_hint(code: Option<i32>) -> Option<&'static str> {
    match code {
        Some(EXIT_LICENSE) => Some("beta key expired or license issue; set RIPARR_MAKEMKV_KEY"),
        Some(EXIT_NO_DISC) => Some("no disc in drive"),
        _ => None,
    }
}

/// [`Ripper`] backed by `makemkvcon`
#[derive(Debug, Clone)]
pub struct MakeMkvRipper {
    executable: String,
}

impl MakeMkvRipper {
    pub fn new(executable: impl Into<String>) -> Self {
        Self {
            executable: executable.into(),
        }
    }

    fn spawn_error(&self, e: io::Error) -> RipError {
        match e.kind() {
            io::ErrorKind::NotFound => RipError::ToolMissing(self.executable.clone()),
            _ => RipError::Io(e),
        }
    }

    /// Register a license key with `makemkvcon reg`.
    pub async fn register_license(&self, key: &str) -> Result<(), RipError> {
        let mut cmd = Command::new(&self.executable);
        cmd.arg("reg").arg(key).kill_on_drop(true);

        let output = tokio::time::timeout(REGISTER_TIMEOUT, cmd.output())
            .await
            .map_err(|_| RipError::Io(io::Error::new(io::ErrorKind::TimedOut, "makemkvcon reg")))?
            .map_err(|e| self.spawn_error(e))?;

        if output.status.success() {
            tracing::debug!("registered MakeMKV license key");
            Ok(())
        } else {
            Err(RipError::Failed {
                code: output.status.code().unwrap_or(-1),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            })
        }
    }

    fn map_exit(&self, status: ExitStatus, device: &str, stderr: String) -> RipError {
        match status.code() {
            Some(EXIT_LICENSE) => RipError::License,
            Some(EXIT_NO_DISC) => RipError::NoDisc(device.to_string()),
            Some(code) => RipError::Failed { code, stderr },
            None => RipError::Terminated,
        }
    }
}

/// Locate the file produced for `title_index` in `out_dir`.
///
/// Prefers the name MakeMKV announced, then `*_tNN.mkv`, then the newest
/// `.mkv` in the directory.
pub fn find_output_file(out_dir: &Path, title_index: u32, announced: Option<&str>) -> Option<PathBuf> {
    if let Some(name) = announced.filter(|n| !n.is_empty()) {
        let path = out_dir.join(name);
        if path.exists() {
            return Some(path);
        }
    }

    let suffix = format!("_t{:02}.mkv", title_index);
    let mut mkvs: Vec<(PathBuf, std::time::SystemTime)> = std::fs::read_dir(out_dir)
        .ok()?
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.path())
        .filter(|path| {
            path.extension()
                .is_some_and(|ext| ext.eq_ignore_ascii_case("mkv"))
        })
        .filter_map(|path| {
            let modified = path.metadata().and_then(|m| m.modified()).ok()?;
            Some((path, modified))
        })
        .collect();

    if let Some((path, _)) = mkvs.iter().find(|(path, _)| {
        path.file_name()
            .and_then(|n| n.to_str())
            .is_some_and(|n| n.ends_with(&suffix))
    }) {
        return Some(path.clone());
    }

    mkvs.sort_by_key(|(_, modified)| *modified);
    mkvs.pop().map(|(path, _)| path)
}

#[async_trait]
impl Ripper for MakeMkvRipper {
    async fn scan_disc(&self, device: &str) -> Result<Disc, RipError> {
        let source = source_arg(device);
        tracing::info!(device, source = %source, "scanning disc");

        let output = Command::new(&self.executable)
            .args(["-r", "info"])
            .arg(&source)
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| self.spawn_error(e))?;

        let mut state = ScanState::new(device);
        for line in String::from_utf8_lossy(&output.stdout).lines() {
            if let Some(record) = parse_record(line) {
                state.apply(record);
            }
        }

        // A failing scan can still have printed usable title information.
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
            tracing::error!(
                device,
                code = ?output.status.code(),
                hint = exit_hint(output.status.code()),
                errors = ?state.errors(),
                stderr = %stderr,
                "MakeMKV scan failed"
            );
        }

        let disc = state.finish();
        tracing::info!(
            device,
            name = %disc.name,
            titles = disc.titles.len(),
            disc_type = %disc.disc_type,
            "disc scan complete"
        );
        Ok(disc)
    }

    async fn rip_title(
        &self,
        device: &str,
        title_index: u32,
        out_dir: &Path,
        on_progress: Option<RipProgressFn>,
    ) -> Result<PathBuf, RipError> {
        tokio::fs::create_dir_all(out_dir).await?;

        let mut cmd = Command::new(&self.executable);
        cmd.args(["-r", "--progress=-same", "mkv"])
            .arg(source_arg(device))
            .arg(title_index.to_string())
            .arg(out_dir)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        tracing::info!(device, title = title_index, out_dir = %out_dir.display(), "ripping title");

        let mut child = cmd.spawn().map_err(|e| self.spawn_error(e))?;

        let stderr_task = child.stderr.take().map(|mut stderr| {
            tokio::spawn(async move {
                let mut buf = String::new();
                let _ = stderr.read_to_string(&mut buf).await;
                buf
            })
        });

        let mut announced: Option<String> = None;
        if let Some(stdout) = child.stdout.take() {
            let mut lines = BufReader::new(stdout).lines();
            while let Some(line) = lines.next_line().await? {
                match parse_record(&line) {
                    Some(record @ RobotRecord::Progress { .. }) => {
                        if let (Some(cb), Some(percent)) = (&on_progress, record.percent()) {
                            cb(percent);
                        }
                    }
                    Some(RobotRecord::TitleInfo { title, attr, value })
                        if title == title_index && attr == super::robot::attr::OUTPUT_FILE_NAME =>
                    {
                        announced = Some(value);
                    }
                    Some(RobotRecord::Message { text, .. }) => {
                        tracing::debug!(title = title_index, "makemkv: {}", text);
                    }
                    _ => {}
                }
            }
        }

        let status = child.wait().await?;
        let stderr = match stderr_task {
            Some(task) => task.await.unwrap_or_default(),
            None => String::new(),
        };

        if !status.success() {
            return Err(self.map_exit(status, device, stderr.trim().to_string()));
        }

        let output = find_output_file(out_dir, title_index, announced.as_deref())
            .ok_or(RipError::NoOutput(title_index))?;
        tracing::info!(title = title_index, output = %output.display(), "title ripped");
        Ok(output)
    }
}
