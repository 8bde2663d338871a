use clap::{Parser, Subcommand};
use riparr::MarkerStatus;
use std::path::PathBuf;

/// riparr - automated DVD/Blu-ray ripping and encoding
#[derive(Parser, Debug)]
#[command(name = "riparr")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Path to the configuration file (defaults plus RIPARR_* env when omitted)
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Skip startup checks (makemkvcon, HandBrakeCLI). For testing only.
    #[arg(long, global = true)]
    pub skip_checks: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Rip the disc in a drive now
    Rip {
        /// Device path, e.g. /dev/sr0 (defaults to drive.default_device)
        device: Option<String>,

        /// Leave the ripped files queued instead of encoding them
        #[arg(long)]
        no_encode: bool,

        /// Rip only this title number
        #[arg(short, long)]
        title: Option<u32>,

        /// Minimum title duration in seconds
        #[arg(short, long)]
        min_duration: Option<u64>,

        /// Scan, identify and show the selected titles without ripping
        #[arg(short = 'n', long)]
        dry_run: bool,
    },

    /// Watch drives and rip every inserted disc
    Watch {
        /// Devices to watch (auto-detected when omitted)
        devices: Vec<String>,

        /// Stop after the first disc
        #[arg(long)]
        once: bool,
    },

    /// Show the titles and metadata of a disc
    Info {
        /// Device path (defaults to drive.default_device)
        device: Option<String>,

        /// Output as JSON
        #[arg(short, long)]
        json: bool,
    },

    /// List optical drives
    Drives,

    /// Manage the encoding queue
    #[command(subcommand)]
    Queue(QueueCommand),

    /// Print the effective configuration with secrets masked
    Config,
}

#[derive(Subcommand, Debug)]
pub enum QueueCommand {
    /// List queued files
    List {
        /// Only files with this status (ready, transcoding, failed, complete)
        #[arg(short, long)]
        status: Option<MarkerStatus>,
    },

    /// Move failed files back to ready
    Retry {
        /// File name, or `all` for every failed file
        name: String,
    },

    /// Remove queue markers (media files are kept)
    Clear {
        /// Only clear files with this status
        #[arg(short, long)]
        status: Option<MarkerStatus>,

        /// Skip the confirmation prompt
        #[arg(short, long)]
        force: bool,
    },

    /// Queue an existing .mkv file, or every .mkv in a directory
    Add { path: PathBuf },
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_rip_options() {
        let cli = Cli::parse_from([
            "riparr", "-c", "riparr.toml", "rip", "/dev/sr1", "--no-encode", "--title", "3",
        ]);
        assert_eq!(cli.config, Some(PathBuf::from("riparr.toml")));
        match cli.command {
            Commands::Rip {
                device,
                no_encode,
                title,
                min_duration,
                dry_run,
            } => {
                assert_eq!(device.as_deref(), Some("/dev/sr1"));
                assert!(no_encode);
                assert_eq!(title, Some(3));
                assert_eq!(min_duration, None);
                assert!(!dry_run);
            }
            other => panic!("unexpected command {:?}", other),
        }
    }

    #[test]
    fn test_parse_queue_status_filter() {
        let cli = Cli::parse_from(["riparr", "queue", "list", "--status", "failed"]);
        match cli.command {
            Commands::Queue(QueueCommand::List { status }) => {
                assert_eq!(status, Some(MarkerStatus::Failed));
            }
            other => panic!("unexpected command {:?}", other),
        }

        assert!(Cli::try_parse_from(["riparr", "queue", "list", "--status", "bogus"]).is_err());
    }

    #[test]
    fn test_parse_watch_devices() {
        let cli = Cli::parse_from(["riparr", "watch", "/dev/sr0", "/dev/sr1", "--once"]);
        match cli.command {
            Commands::Watch { devices, once } => {
                assert_eq!(devices, vec!["/dev/sr0", "/dev/sr1"]);
                assert!(once);
            }
            other => panic!("unexpected command {:?}", other),
        }
    }
}
