//! HandBrake encoder module for riparr
//!
//! Builds and runs `HandBrakeCLI`, streaming its progress output to the
//! caller while the encode runs.

use super::{EncodeError, EncodeOptions, EncodeProgress, EncodeProgressFn, EncodeStage, Encoder};
use async_trait::async_trait;
use regex::Regex;
use std::collections::VecDeque;
use std::io;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::OnceLock;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, BufReader};
use tokio::process::Command;

/// Lines of stderr kept for error reports
const STDERR_TAIL_LINES: usize = 20;

/// Minimum progress delta between two callback invocations
const PROGRESS_STEP: f32 = 0.5;

/// Parameters for one HandBrake run
#[derive(Debug, Clone)]
pub struct HandBrakeParams {
    /// Executable name or path
    pub executable: String,
    pub input_path: PathBuf,
    pub output_path: PathBuf,
    pub options: EncodeOptions,
}

/// Build a HandBrakeCLI command
///
/// Creates a Command configured with:
/// - Input and output paths
/// - Preset, encoder, constant quality and encoder preset
/// - Decomb filtering when deinterlacing
/// - Forced-subtitle scan when enabled
/// - First English (or undetermined) audio track, passed through
pub fn build_handbrake_command(params: &HandBrakeParams) -> Command {
    let opts = &params.options;
    let mut cmd = Command::new(&params.executable);

    cmd.arg("-i").arg(&params.input_path);
    cmd.arg("-o").arg(&params.output_path);
    cmd.arg("--preset").arg(&opts.preset);
    cmd.arg("--encoder").arg(opts.video_codec.as_str());
    cmd.arg("--quality").arg(opts.quality.to_string());
    cmd.arg("--encoder-preset").arg(&opts.encoder_preset);

    if opts.deinterlace {
        cmd.arg("--comb-detect").arg("--decomb");
    }

    if opts.subtitle_scan {
        cmd.args(["--subtitle", "scan", "--subtitle-forced", "--subtitle-burned"]);
    }

    cmd.args(["--audio-lang-list", "eng,und", "--first-audio", "--aencoder", "copy"]);

    cmd
}

fn encoding_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(
            r"Encoding: task (\d+) of (\d+), ([\d.]+) %(?: \(([\d.]+) fps, avg ([\d.]+) fps, ETA (\S+)\))?",
        )
        .expect("encoding progress pattern is valid")
    })
}

fn muxing_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"Muxing: ([\d.]+) %").expect("muxing pattern is valid"))
}

/// Parse a HandBrake progress line
///
/// Recognizes:
/// - `Encoding: task 1 of 1, 45.23 % (148.34 fps, avg 152.11 fps, ETA 00h12m34s)`
/// - `Encoding: task 1 of 1, 0.52 %`
/// - `Muxing: 98.5 %`
pub fn parse_progress_line(line: &str) -> Option<EncodeProgress> {
    if let Some(caps) = encoding_regex().captures(line) {
        let float = |i: usize| caps.get(i).and_then(|m| m.as_str().parse::<f32>().ok());
        return Some(EncodeProgress {
            stage: EncodeStage::Encoding,
            task: caps[1].parse().ok()?,
            total_tasks: caps[2].parse().ok()?,
            percent: float(3)?,
            fps: float(4),
            avg_fps: float(5),
            eta: caps.get(6).map(|m| m.as_str().to_string()),
        });
    }

    let caps = muxing_regex().captures(line)?;
    Some(EncodeProgress {
        stage: EncodeStage::Muxing,
        percent: caps[1].parse().ok()?,
        ..EncodeProgress::default()
    })
}

/// Read `reader` to the end, calling `on_line` for each `\r` or `\n`
/// terminated segment. HandBrake rewrites its progress line with `\r`.
async fn for_each_segment<R, F>(reader: R, mut on_line: F) -> io::Result<()>
where
    R: AsyncRead + Unpin,
    F: FnMut(&str),
{
    let mut reader = BufReader::new(reader);
    let mut pending = Vec::new();
    let mut buf = [0u8; 4096];

    loop {
        let n = reader.read(&mut buf).await?;
        if n == 0 {
            break;
        }
        for &byte in &buf[..n] {
            if byte == b'\r' || byte == b'\n' {
                if !pending.is_empty() {
                    on_line(String::from_utf8_lossy(&pending).trim());
                    pending.clear();
                }
            } else {
                pending.push(byte);
            }
        }
    }
    if !pending.is_empty() {
        on_line(String::from_utf8_lossy(&pending).trim());
    }
    Ok(())
}

async fn stderr_tail<R: AsyncRead + Unpin>(reader: R) -> String {
    let mut lines = BufReader::new(reader).lines();
    let mut tail = VecDeque::with_capacity(STDERR_TAIL_LINES);
    while let Ok(Some(line)) = lines.next_line().await {
        if tail.len() == STDERR_TAIL_LINES {
            tail.pop_front();
        }
        tail.push_back(line);
    }
    Vec::from(tail).join("\n")
}

/// Execute a HandBrake encode
///
/// # Errors
/// Returns an error if:
/// - The input file does not exist
/// - HandBrakeCLI cannot be started
/// - HandBrakeCLI exits with non-zero status or is killed
/// - No output file exists after a successful exit
pub async fn run_handbrake(
    params: &HandBrakeParams,
    on_progress: Option<EncodeProgressFn>,
) -> Result<PathBuf, EncodeError> {
    if !params.input_path.exists() {
        return Err(EncodeError::InputMissing(params.input_path.clone()));
    }
    if let Some(parent) = params.output_path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }

    let mut cmd = build_handbrake_command(params);
    cmd.stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    tracing::info!(
        input = %params.input_path.display(),
        output = %params.output_path.display(),
        encoder = params.options.video_codec.as_str(),
        quality = params.options.quality,
        "starting encode"
    );

    let mut child = cmd.spawn().map_err(|e| match e.kind() {
        io::ErrorKind::NotFound => EncodeError::ToolMissing(params.executable.clone()),
        _ => EncodeError::Io(e),
    })?;

    let stderr_task = child.stderr.take().map(|stderr| tokio::spawn(stderr_tail(stderr)));

    if let Some(stdout) = child.stdout.take() {
        let mut last_reported = f32::NEG_INFINITY;
        let mut last_stage = None;
        for_each_segment(stdout, |line| {
            let Some(progress) = parse_progress_line(line) else {
                return;
            };
            let stage_changed = last_stage != Some(progress.stage);
            if stage_changed || progress.percent - last_reported >= PROGRESS_STEP {
                last_reported = progress.percent;
                last_stage = Some(progress.stage);
                if let Some(cb) = &on_progress {
                    cb(&progress);
                }
            }
        })
        .await?;
    }

    let status = child.wait().await?;
    let stderr = match stderr_task {
        Some(task) => task.await.unwrap_or_default(),
        None => String::new(),
    };

    if !status.success() {
        return Err(match status.code() {
            Some(code) => EncodeError::Failed { code, stderr },
            None => EncodeError::Terminated,
        });
    }

    if !params.output_path.exists() {
        return Err(EncodeError::NoOutput(params.output_path.clone()));
    }

    let size_mb = std::fs::metadata(&params.output_path)
        .map(|m| m.len() as f64 / (1024.0 * 1024.0))
        .unwrap_or(0.0);
    tracing::info!(output = %params.output_path.display(), size_mb, "encode complete");

    Ok(params.output_path.clone())
}

/// [`Encoder`] backed by HandBrakeCLI
#[derive(Debug, Clone)]
pub struct HandBrakeEncoder {
    executable: String,
}

impl HandBrakeEncoder {
    pub fn new(executable: impl Into<String>) -> Self {
        Self {
            executable: executable.into(),
        }
    }
}

#[async_trait]
impl Encoder for HandBrakeEncoder {
    async fn encode(
        &self,
        input: &Path,
        output: &Path,
        options: &EncodeOptions,
        on_progress: Option<EncodeProgressFn>,
    ) -> Result<PathBuf, EncodeError> {
        let params = HandBrakeParams {
            executable: self.executable.clone(),
            input_path: input.to_path_buf(),
            output_path: output.to_path_buf(),
            options: options.clone(),
        };
        run_handbrake(&params, on_progress).await
    }
}
