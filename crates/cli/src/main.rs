//! CLI entry point for riparr
//!
//! Loads configuration, installs logging and dispatches subcommands.

mod cli;

use anyhow::{bail, Context, Result};
use clap::Parser;
use cli::{Cli, Commands, QueueCommand};
use riparr::config::LoggingConfig;
use riparr::markers::is_media_file;
use riparr::{
    Config, Daemon, DiscWatcher, JobStatus, MarkerStatus, MarkerStore, ProcessOptions, Title,
    TitleSelector,
};
use std::io::{self, BufRead, Write};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use tracing_subscriber::EnvFilter;

fn init_logging(cfg: &LoggingConfig) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("riparr={}", cfg.level)));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr);
    if cfg.json {
        builder.json().init();
    } else {
        builder.init();
    }
}

/// Daemon with startup checks, unless `--skip-checks` was given.
async fn build_daemon(config: Config, skip_checks: bool) -> Result<Daemon> {
    if skip_checks {
        tracing::warn!("skipping startup checks (--skip-checks enabled)");
        return Daemon::new_without_checks(config).context("failed to initialize riparr");
    }
    Daemon::with_config(config)
        .await
        .context("failed to initialize riparr")
}

fn format_size(bytes: u64) -> String {
    const UNITS: [&str; 5] = ["B", "KB", "MB", "GB", "TB"];
    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    if unit == 0 {
        format!("{} {}", bytes, UNITS[0])
    } else {
        format!("{:.1} {}", value, UNITS[unit])
    }
}

fn print_titles(titles: &[Title]) {
    println!("{:>4}  {:>8}  {:>8}  {:>10}  {:<20}  Audio", "#", "Duration", "Chapters", "Size", "Video");
    for title in titles {
        let mut audio: Vec<String> = title
            .audio_tracks
            .iter()
            .take(2)
            .map(|a| format!("{} ({})", a.language, a.codec))
            .collect();
        if title.audio_tracks.len() > 2 {
            audio.push(format!("+{}", title.audio_tracks.len() - 2));
        }
        println!(
            "{:>4}  {:>8}  {:>8}  {:>10}  {:<20}  {}",
            title.index,
            title.duration_str(),
            title.chapters,
            format_size(title.size_bytes),
            format!("{} {}", title.video_codec, title.resolution).trim(),
            if audio.is_empty() { "N/A".to_string() } else { audio.join(", ") }
        );
    }
}

async fn cmd_rip(
    daemon: Daemon,
    device: String,
    opts: ProcessOptions,
    dry_run: bool,
) -> Result<ExitCode> {
    if dry_run {
        println!("Dry run: scanning {} without ripping", device);
        let disc = daemon.queue.identify_disc(&device).await?;
        let selected: Vec<Title> = match opts.only_title {
            Some(index) => disc.titles.iter().filter(|t| t.index == index).cloned().collect(),
            None => TitleSelector::new(&daemon.config.selection)
                .select_titles(&disc.titles, opts.min_duration),
        };
        println!("Disc: {} ({})", disc.display_name(), disc.disc_type);
        println!("Selected {} title(s) for ripping", selected.len());
        print_titles(&selected);
        return Ok(ExitCode::SUCCESS);
    }

    let job = daemon.queue.process_disc(&device, &opts).await;
    match job.status {
        JobStatus::Complete => {
            println!("Job {} complete: {}", job.id, job.disc.display_name());
            for file in &job.output_files {
                println!("  {}", file.display());
            }
            Ok(ExitCode::SUCCESS)
        }
        status => {
            eprintln!(
                "Job {} {}: {}",
                job.id,
                status,
                job.last_error().unwrap_or("unknown error")
            );
            Ok(ExitCode::FAILURE)
        }
    }
}

async fn cmd_watch(daemon: Daemon, devices: Vec<String>, once: bool) -> Result<ExitCode> {
    let devices = (!devices.is_empty()).then_some(devices);
    let watcher = daemon.watcher(devices);

    let stop = watcher.stop_token();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("interrupt received, stopping watcher");
            stop.cancel();
        }
    });

    daemon.run_watch(&watcher, once).await?;
    Ok(ExitCode::SUCCESS)
}

async fn cmd_info(daemon: Daemon, device: String, json: bool) -> Result<ExitCode> {
    let disc = daemon.queue.identify_disc(&device).await?;
    if disc.titles.is_empty() {
        eprintln!("No titles found on disc. Is there a disc in the drive?");
        return Ok(ExitCode::FAILURE);
    }

    if json {
        println!("{}", serde_json::to_string_pretty(&disc)?);
        return Ok(ExitCode::SUCCESS);
    }

    println!("Name:    {}", if disc.name.is_empty() { "Unknown" } else { &disc.name });
    println!("Type:    {}", disc.disc_type);
    println!("Disc ID: {}", disc.disc_id.as_deref().unwrap_or("N/A"));
    println!("Titles:  {}", disc.titles.len());
    if let Some(meta) = &disc.metadata {
        println!();
        println!("Metadata:");
        println!("  Title: {}", meta.title);
        println!("  Year:  {}", meta.year.map_or("N/A".to_string(), |y| y.to_string()));
        println!("  Type:  {:?}", meta.media_type);
        println!("  IMDb:  {}", meta.imdb_id.as_deref().unwrap_or("N/A"));
    }
    println!();
    print_titles(&disc.titles);

    let selector = TitleSelector::new(&daemon.config.selection);
    let selected = selector.select_titles(&disc.titles, None);
    if !selected.is_empty() {
        let indices: Vec<String> = selected.iter().map(|t| t.index.to_string()).collect();
        println!();
        println!("Suggested titles to rip: {}", indices.join(", "));
        println!("Disc classified as: {}", selector.classify(&disc.titles));
    }
    Ok(ExitCode::SUCCESS)
}

async fn cmd_drives(config: &Config) -> Result<ExitCode> {
    let drives = DiscWatcher::from_config(&config.drive, None).get_drives().await;
    if drives.is_empty() {
        println!("No optical drives found");
        return Ok(ExitCode::SUCCESS);
    }
    for drive in drives {
        println!(
            "{}  {} {}  disc: {}  [{}]",
            drive.device,
            drive.vendor,
            drive.model,
            if drive.has_disc { "yes" } else { "no" },
            drive.capabilities.join(", ")
        );
    }
    Ok(ExitCode::SUCCESS)
}

/// Media files named by `path`: the file itself or the media files in a directory.
fn collect_media_files(path: &Path) -> Result<Vec<PathBuf>> {
    if path.is_file() {
        if !is_media_file(path) {
            bail!("{} is not an MKV file", path.display());
        }
        return Ok(vec![path.to_path_buf()]);
    }
    if !path.is_dir() {
        bail!("path not found: {}", path.display());
    }

    let mut files: Vec<PathBuf> = std::fs::read_dir(path)
        .with_context(|| format!("failed to read {}", path.display()))?
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|p| p.is_file() && is_media_file(p))
        .collect();
    files.sort();
    Ok(files)
}

fn is_yes(answer: &str) -> bool {
    matches!(answer.trim().to_lowercase().as_str(), "y" | "yes")
}

fn confirm(prompt: &str) -> Result<bool> {
    print!("{} [y/N] ", prompt);
    io::stdout().flush()?;
    let mut answer = String::new();
    io::stdin().lock().read_line(&mut answer)?;
    Ok(is_yes(&answer))
}

fn cmd_queue(config: &Config, command: QueueCommand) -> Result<ExitCode> {
    let markers = MarkerStore::new(config.paths.raw_dir.clone());

    match command {
        QueueCommand::List { status } => {
            let jobs = markers.list_jobs(status);
            if jobs.is_empty() {
                println!("No items in queue");
                return Ok(ExitCode::SUCCESS);
            }
            println!("{:<40}  {:<12}  {:>10}  Created", "Name", "Status", "Size");
            for job in jobs {
                println!(
                    "{:<40}  {:<12}  {:>10}  {}",
                    job.name,
                    job.status,
                    format_size(job.size_bytes),
                    job.created_at
                        .with_timezone(&chrono::Local)
                        .format("%Y-%m-%d %H:%M")
                );
                if let Some(error) = &job.error {
                    println!("    error: {}", error);
                }
            }
        }
        QueueCommand::Retry { name } if name == "all" => {
            let count = markers.retry_all_failed()?;
            println!("Marked {} job(s) for retry", count);
        }
        QueueCommand::Retry { name } => {
            if markers.retry_job(&name)? {
                println!("Job '{}' marked for retry", name);
            } else {
                eprintln!("Job '{}' not found or not in failed state", name);
                return Ok(ExitCode::FAILURE);
            }
        }
        QueueCommand::Clear { status, force } => {
            let pending = markers.list_jobs(status).len();
            if pending == 0 {
                println!("No items to clear");
                return Ok(ExitCode::SUCCESS);
            }
            if !force && !confirm(&format!("Clear {} item(s) from queue?", pending))? {
                println!("Aborted");
                return Ok(ExitCode::FAILURE);
            }
            let count = markers.clear_jobs(status)?;
            println!("Cleared {} item(s) from queue", count);
        }
        QueueCommand::Add { path } => {
            let files = collect_media_files(&path)?;
            for file in &files {
                markers.create_marker(file, MarkerStatus::Ready, None, None)?;
                println!("Added to queue: {}", file.display());
            }
            println!("Added {} file(s) to queue", files.len());
        }
    }
    Ok(ExitCode::SUCCESS)
}

async fn run(cli: Cli, config: Config) -> Result<ExitCode> {
    let default_device = config.drive.default_device.clone();

    match cli.command {
        Commands::Rip {
            device,
            no_encode,
            title,
            min_duration,
            dry_run,
        } => {
            let opts = ProcessOptions {
                encode_inline: !no_encode,
                only_title: title,
                min_duration,
            };
            let daemon = build_daemon(config, cli.skip_checks).await?;
            cmd_rip(daemon, device.unwrap_or(default_device), opts, dry_run).await
        }
        Commands::Watch { devices, once } => {
            let daemon = build_daemon(config, cli.skip_checks).await?;
            cmd_watch(daemon, devices, once).await
        }
        Commands::Info { device, json } => {
            let daemon = build_daemon(config, cli.skip_checks).await?;
            cmd_info(daemon, device.unwrap_or(default_device), json).await
        }
        Commands::Drives => cmd_drives(&config).await,
        Commands::Queue(command) => cmd_queue(&config, command),
        Commands::Config => {
            print!("{}", config.to_masked_toml()?);
            Ok(ExitCode::SUCCESS)
        }
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let config = match Config::load_or_default(cli.config.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Failed to load configuration: {}", e);
            return ExitCode::FAILURE;
        }
    };
    init_logging(&config.logging);

    match run(cli, config).await {
        Ok(code) => code,
        Err(e) => {
            eprintln!("Error: {:#}", e);
            ExitCode::FAILURE
        }
    }
}
