//! Core configuration structures and loading logic

use serde::{Deserialize, Serialize};
use std::env;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;

/// Error type for configuration operations
#[derive(Debug)]
pub enum ConfigError {
    /// IO error reading config file
    Io(std::io::Error),
    /// TOML parsing error
    Parse(toml::de::Error),
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::Io(e) => write!(f, "Failed to read config file: {}", e),
            ConfigError::Parse(e) => write!(f, "Failed to parse config: {}", e),
        }
    }
}

impl std::error::Error for ConfigError {}

impl From<std::io::Error> for ConfigError {
    fn from(e: std::io::Error) -> Self {
        ConfigError::Io(e)
    }
}

impl From<toml::de::Error> for ConfigError {
    fn from(e: toml::de::Error) -> Self {
        ConfigError::Parse(e)
    }
}

/// How disc insertion is detected
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum DetectionMethod {
    /// Prefer udev events, fall back to polling
    #[default]
    Auto,
    /// Kernel uevents only
    Udev,
    /// Periodic device probing
    Polling,
}

impl FromStr for DetectionMethod {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "auto" => Ok(Self::Auto),
            "udev" => Ok(Self::Udev),
            "polling" | "poll" => Ok(Self::Polling),
            other => Err(format!("unknown detection method '{}'", other)),
        }
    }
}

impl fmt::Display for DetectionMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DetectionMethod::Auto => write!(f, "auto"),
            DetectionMethod::Udev => write!(f, "udev"),
            DetectionMethod::Polling => write!(f, "polling"),
        }
    }
}

/// Video encoder handed to HandBrake
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum VideoCodec {
    X264,
    #[default]
    X265,
    NvencH264,
    NvencH265,
}

impl VideoCodec {
    /// Encoder name as HandBrakeCLI expects it
    pub fn as_str(&self) -> &'static str {
        match self {
            VideoCodec::X264 => "x264",
            VideoCodec::X265 => "x265",
            VideoCodec::NvencH264 => "nvenc_h264",
            VideoCodec::NvencH265 => "nvenc_h265",
        }
    }
}

impl FromStr for VideoCodec {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "x264" => Ok(Self::X264),
            "x265" => Ok(Self::X265),
            "nvenc_h264" => Ok(Self::NvencH264),
            "nvenc_h265" => Ok(Self::NvencH265),
            other => Err(format!("unknown video codec '{}'", other)),
        }
    }
}

impl fmt::Display for VideoCodec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Directory layout
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct PathsConfig {
    /// Where ripped MKV files and their markers live
    pub raw_dir: PathBuf,
    /// Library root for encoded output
    pub output_dir: PathBuf,
    /// Scratch space
    pub temp_dir: PathBuf,
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            raw_dir: PathBuf::from("/data/raw"),
            output_dir: PathBuf::from("/data/media"),
            temp_dir: PathBuf::from("/tmp/riparr"),
        }
    }
}

/// Optical drive handling
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct DriveConfig {
    /// Device used when none is given on the command line
    pub default_device: String,
    /// Eject the disc once ripping finishes
    pub eject_after_rip: bool,
    /// Detection backend selection
    pub detection_method: DetectionMethod,
    /// Polling interval in seconds (values below 1.0 are raised to 1.0)
    pub poll_interval_secs: f64,
}

impl Default for DriveConfig {
    fn default() -> Self {
        Self {
            default_device: "/dev/sr0".to_string(),
            eject_after_rip: true,
            detection_method: DetectionMethod::Auto,
            poll_interval_secs: 5.0,
        }
    }
}

/// MakeMKV settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct MakeMkvConfig {
    /// Path or name of the makemkvcon executable
    pub path: String,
    /// Registration key applied at startup
    pub license_key: Option<String>,
}

impl Default for MakeMkvConfig {
    fn default() -> Self {
        Self {
            path: "makemkvcon".to_string(),
            license_key: None,
        }
    }
}

/// Title selection thresholds, in seconds
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SelectionConfig {
    pub min_movie_duration: u32,
    pub min_tv_duration: u32,
    /// Upper bound on titles ripped from one disc
    pub max_titles: u32,
}

impl Default for SelectionConfig {
    fn default() -> Self {
        Self {
            min_movie_duration: 600,
            min_tv_duration: 300,
            max_titles: 50,
        }
    }
}

/// HandBrake settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct EncodeConfig {
    /// Encode ripped files at all
    pub enabled: bool,
    /// Remove the raw MKV (and its markers) after a successful encode
    pub delete_raw_after_encode: bool,
    pub handbrake_path: String,
    pub preset: String,
    pub video_codec: VideoCodec,
    /// Constant quality, 0-51 (lower is better)
    pub quality: u8,
    pub encoder_preset: String,
    pub deinterlace: bool,
    pub subtitle_scan: bool,
}

impl Default for EncodeConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            delete_raw_after_encode: true,
            handbrake_path: "HandBrakeCLI".to_string(),
            preset: "HQ 576p25 Surround".to_string(),
            video_codec: VideoCodec::X265,
            quality: 19,
            encoder_preset: "slow".to_string(),
            deinterlace: true,
            subtitle_scan: true,
        }
    }
}

/// Metadata service settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct MetadataConfig {
    pub tmdb_api_key: Option<String>,
    pub arm_api_url: String,
}

impl Default for MetadataConfig {
    fn default() -> Self {
        Self {
            tmdb_api_key: None,
            arm_api_url: "https://1337server.pythonanywhere.com".to_string(),
        }
    }
}

/// Scheduler limits
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct QueueConfig {
    /// Concurrent rip slots (0 is treated as 1)
    pub max_concurrent_rips: u32,
    /// Concurrent encode slots (0 is treated as 1)
    pub max_concurrent_encodes: u32,
    /// Drain loop sleep when nothing is ready, in seconds
    pub poll_interval_secs: u64,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            max_concurrent_rips: 1,
            max_concurrent_encodes: 2,
            poll_interval_secs: 5,
        }
    }
}

/// Log output
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct LoggingConfig {
    /// Default filter directive when RUST_LOG is unset
    pub level: String,
    /// Emit JSON lines instead of human-readable output
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
        }
    }
}

/// HTTP status endpoint
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct StatusConfig {
    pub enabled: bool,
    pub bind: String,
}

impl Default for StatusConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            bind: "127.0.0.1:7878".to_string(),
        }
    }
}

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct Config {
    #[serde(default)]
    pub paths: PathsConfig,
    #[serde(default)]
    pub drive: DriveConfig,
    #[serde(default)]
    pub makemkv: MakeMkvConfig,
    #[serde(default)]
    pub selection: SelectionConfig,
    #[serde(default)]
    pub encode: EncodeConfig,
    #[serde(default)]
    pub metadata: MetadataConfig,
    #[serde(default)]
    pub queue: QueueConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub status: StatusConfig,
}

fn parse_bool(val: &str) -> Option<bool> {
    match val.to_lowercase().as_str() {
        "true" | "1" | "yes" => Some(true),
        "false" | "0" | "no" => Some(false),
        _ => None,
    }
}

fn env_parsed<T: FromStr>(name: &str) -> Option<T> {
    env::var(name).ok().and_then(|v| v.trim().parse().ok())
}

fn env_bool(name: &str) -> Option<bool> {
    env::var(name).ok().and_then(|v| parse_bool(v.trim()))
}

fn env_string(name: &str) -> Option<String> {
    env::var(name).ok().filter(|v| !v.is_empty())
}

impl Config {
    /// Load configuration from a TOML file
    ///
    /// Missing sections and keys take their defaults.
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path)?;
        Self::parse_toml(&content)
    }

    /// Parse configuration from a TOML string
    pub fn parse_toml(content: &str) -> Result<Self, ConfigError> {
        let config: Config = toml::from_str(content)?;
        Ok(config)
    }

    /// Apply `RIPARR_*` environment variable overrides
    ///
    /// Values that fail to parse leave the existing setting untouched.
    pub fn apply_env_overrides(&mut self) {
        if let Some(v) = env_string("RIPARR_RAW_DIR") {
            self.paths.raw_dir = PathBuf::from(v);
        }
        if let Some(v) = env_string("RIPARR_OUTPUT_DIR") {
            self.paths.output_dir = PathBuf::from(v);
        }
        if let Some(v) = env_string("RIPARR_TEMP_DIR") {
            self.paths.temp_dir = PathBuf::from(v);
        }

        if let Some(v) = env_string("RIPARR_DEFAULT_DEVICE") {
            self.drive.default_device = v;
        }
        if let Some(v) = env_bool("RIPARR_EJECT_AFTER_RIP") {
            self.drive.eject_after_rip = v;
        }
        if let Some(v) = env_parsed("RIPARR_DETECTION_METHOD") {
            self.drive.detection_method = v;
        }
        if let Some(v) = env_parsed("RIPARR_POLL_INTERVAL") {
            self.drive.poll_interval_secs = v;
        }

        if let Some(v) = env_string("RIPARR_MAKEMKV_PATH") {
            self.makemkv.path = v;
        }
        if let Some(v) = env_string("RIPARR_MAKEMKV_KEY") {
            self.makemkv.license_key = Some(v);
        }

        if let Some(v) = env_parsed("RIPARR_MIN_MOVIE_DURATION") {
            self.selection.min_movie_duration = v;
        }
        if let Some(v) = env_parsed("RIPARR_MIN_TV_DURATION") {
            self.selection.min_tv_duration = v;
        }
        if let Some(v) = env_parsed("RIPARR_MAX_TITLES") {
            self.selection.max_titles = v;
        }

        if let Some(v) = env_bool("RIPARR_ENCODE_ENABLED") {
            self.encode.enabled = v;
        }
        if let Some(v) = env_bool("RIPARR_DELETE_RAW_AFTER_ENCODE") {
            self.encode.delete_raw_after_encode = v;
        }
        if let Some(v) = env_string("RIPARR_HANDBRAKE_PATH") {
            self.encode.handbrake_path = v;
        }
        if let Some(v) = env_string("RIPARR_HANDBRAKE_PRESET") {
            self.encode.preset = v;
        }
        if let Some(v) = env_parsed("RIPARR_VIDEO_CODEC") {
            self.encode.video_codec = v;
        }
        if let Some(v) = env_parsed::<u8>("RIPARR_VIDEO_QUALITY") {
            if v <= 51 {
                self.encode.quality = v;
            }
        }
        if let Some(v) = env_string("RIPARR_ENCODER_PRESET") {
            self.encode.encoder_preset = v;
        }
        if let Some(v) = env_bool("RIPARR_DEINTERLACE") {
            self.encode.deinterlace = v;
        }
        if let Some(v) = env_bool("RIPARR_SUBTITLE_SCAN") {
            self.encode.subtitle_scan = v;
        }

        if let Some(v) = env_string("RIPARR_TMDB_API_KEY") {
            self.metadata.tmdb_api_key = Some(v);
        }
        if let Some(v) = env_string("RIPARR_ARM_API_URL") {
            self.metadata.arm_api_url = v;
        }

        if let Some(v) = env_parsed("RIPARR_MAX_CONCURRENT_RIPS") {
            self.queue.max_concurrent_rips = v;
        }
        if let Some(v) = env_parsed("RIPARR_MAX_CONCURRENT_ENCODES") {
            self.queue.max_concurrent_encodes = v;
        }
        if let Some(v) = env_parsed("RIPARR_QUEUE_POLL_INTERVAL") {
            self.queue.poll_interval_secs = v;
        }

        if let Some(v) = env_string("RIPARR_LOG_LEVEL") {
            self.logging.level = v;
        }
        if let Some(v) = env_bool("RIPARR_LOG_JSON") {
            self.logging.json = v;
        }

        if let Some(v) = env_bool("RIPARR_STATUS_ENABLED") {
            self.status.enabled = v;
        }
        if let Some(v) = env_string("RIPARR_STATUS_BIND") {
            self.status.bind = v;
        }
    }

    /// Load configuration from file and apply environment overrides
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let mut config = Self::load_from_file(path)?;
        config.apply_env_overrides();
        Ok(config)
    }

    /// Like [`Config::load`], but a missing (or unspecified) file yields defaults
    pub fn load_or_default(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut config = match path {
            Some(p) if p.exists() => Self::load_from_file(p)?,
            _ => Self::default(),
        };
        config.apply_env_overrides();
        Ok(config)
    }

    /// Render the configuration as TOML with secrets masked
    pub fn to_masked_toml(&self) -> Result<String, toml::ser::Error> {
        let mut masked = self.clone();
        masked.makemkv.license_key = masked.makemkv.license_key.as_deref().map(mask_secret);
        masked.metadata.tmdb_api_key = masked.metadata.tmdb_api_key.as_deref().map(mask_secret);
        toml::to_string_pretty(&masked)
    }
}

/// Keep the first four characters of a secret and hide the rest
pub fn mask_secret(secret: &str) -> String {
    let visible: String = secret.chars().take(4).collect();
    format!("{}****", visible)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::sync::Mutex;

    // Env var tests mutate process state; serialize them
    static ENV_MUTEX: Mutex<()> = Mutex::new(());

    const ENV_VARS: &[&str] = &[
        "RIPARR_RAW_DIR",
        "RIPARR_OUTPUT_DIR",
        "RIPARR_TEMP_DIR",
        "RIPARR_DEFAULT_DEVICE",
        "RIPARR_EJECT_AFTER_RIP",
        "RIPARR_DETECTION_METHOD",
        "RIPARR_POLL_INTERVAL",
        "RIPARR_MAKEMKV_PATH",
        "RIPARR_MAKEMKV_KEY",
        "RIPARR_MIN_MOVIE_DURATION",
        "RIPARR_MIN_TV_DURATION",
        "RIPARR_MAX_TITLES",
        "RIPARR_ENCODE_ENABLED",
        "RIPARR_DELETE_RAW_AFTER_ENCODE",
        "RIPARR_HANDBRAKE_PATH",
        "RIPARR_HANDBRAKE_PRESET",
        "RIPARR_VIDEO_CODEC",
        "RIPARR_VIDEO_QUALITY",
        "RIPARR_ENCODER_PRESET",
        "RIPARR_DEINTERLACE",
        "RIPARR_SUBTITLE_SCAN",
        "RIPARR_TMDB_API_KEY",
        "RIPARR_ARM_API_URL",
        "RIPARR_MAX_CONCURRENT_RIPS",
        "RIPARR_MAX_CONCURRENT_ENCODES",
        "RIPARR_QUEUE_POLL_INTERVAL",
        "RIPARR_LOG_LEVEL",
        "RIPARR_LOG_JSON",
        "RIPARR_STATUS_ENABLED",
        "RIPARR_STATUS_BIND",
    ];

    fn clear_env_vars() {
        for var in ENV_VARS {
            env::remove_var(var);
        }
    }

    fn codec_strategy() -> impl Strategy<Value = VideoCodec> {
        prop_oneof![
            Just(VideoCodec::X264),
            Just(VideoCodec::X265),
            Just(VideoCodec::NvencH264),
            Just(VideoCodec::NvencH265),
        ]
    }

    fn method_strategy() -> impl Strategy<Value = DetectionMethod> {
        prop_oneof![
            Just(DetectionMethod::Auto),
            Just(DetectionMethod::Udev),
            Just(DetectionMethod::Polling),
        ]
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(100))]

        #[test]
        fn prop_config_parses_all_sections(
            eject in proptest::bool::ANY,
            method in method_strategy(),
            min_movie in 0u32..10_000,
            min_tv in 0u32..10_000,
            max_titles in 1u32..200,
            codec in codec_strategy(),
            quality in 0u8..=51,
            rips in 0u32..8,
            encodes in 0u32..8,
            json in proptest::bool::ANY,
        ) {
            let toml_str = format!(
                r#"
[paths]
raw_dir = "/srv/raw"

[drive]
eject_after_rip = {}
detection_method = "{}"

[selection]
min_movie_duration = {}
min_tv_duration = {}
max_titles = {}

[encode]
video_codec = "{}"
quality = {}

[queue]
max_concurrent_rips = {}
max_concurrent_encodes = {}

[logging]
json = {}
"#,
                eject, method, min_movie, min_tv, max_titles, codec, quality, rips, encodes, json
            );

            let config = Config::parse_toml(&toml_str).expect("Valid TOML should parse");

            prop_assert_eq!(config.paths.raw_dir, PathBuf::from("/srv/raw"));
            prop_assert_eq!(config.paths.output_dir, PathBuf::from("/data/media"));
            prop_assert_eq!(config.drive.eject_after_rip, eject);
            prop_assert_eq!(config.drive.detection_method, method);
            prop_assert_eq!(config.selection.min_movie_duration, min_movie);
            prop_assert_eq!(config.selection.min_tv_duration, min_tv);
            prop_assert_eq!(config.selection.max_titles, max_titles);
            prop_assert_eq!(config.encode.video_codec, codec);
            prop_assert_eq!(config.encode.quality, quality);
            prop_assert_eq!(config.queue.max_concurrent_rips, rips);
            prop_assert_eq!(config.queue.max_concurrent_encodes, encodes);
            prop_assert_eq!(config.logging.json, json);
        }

        #[test]
        fn prop_env_overrides_concurrency(
            initial in 0u32..8,
            rips in 0u32..16,
            encodes in 0u32..16,
        ) {
            let _guard = ENV_MUTEX.lock().unwrap();
            clear_env_vars();

            let toml_str = format!("[queue]\nmax_concurrent_rips = {}\nmax_concurrent_encodes = {}\n", initial, initial);
            let mut config = Config::parse_toml(&toml_str).expect("Valid TOML");

            env::set_var("RIPARR_MAX_CONCURRENT_RIPS", rips.to_string());
            env::set_var("RIPARR_MAX_CONCURRENT_ENCODES", encodes.to_string());
            config.apply_env_overrides();
            clear_env_vars();

            prop_assert_eq!(config.queue.max_concurrent_rips, rips);
            prop_assert_eq!(config.queue.max_concurrent_encodes, encodes);
        }

        #[test]
        fn prop_env_overrides_booleans(
            initial in proptest::bool::ANY,
            eject in proptest::bool::ANY,
            encode in proptest::bool::ANY,
        ) {
            let _guard = ENV_MUTEX.lock().unwrap();
            clear_env_vars();

            let toml_str = format!("[drive]\neject_after_rip = {}\n[encode]\nenabled = {}\n", initial, initial);
            let mut config = Config::parse_toml(&toml_str).expect("Valid TOML");

            env::set_var("RIPARR_EJECT_AFTER_RIP", if eject { "yes" } else { "no" });
            env::set_var("RIPARR_ENCODE_ENABLED", if encode { "1" } else { "0" });
            config.apply_env_overrides();
            clear_env_vars();

            prop_assert_eq!(config.drive.eject_after_rip, eject);
            prop_assert_eq!(config.encode.enabled, encode);
        }

        #[test]
        fn prop_env_overrides_quality_within_range(
            initial in 0u8..=51,
            requested in 0u8..=255,
        ) {
            let _guard = ENV_MUTEX.lock().unwrap();
            clear_env_vars();

            let mut config = Config::parse_toml(&format!("[encode]\nquality = {}\n", initial)).expect("Valid TOML");

            env::set_var("RIPARR_VIDEO_QUALITY", requested.to_string());
            config.apply_env_overrides();
            clear_env_vars();

            let expected = if requested <= 51 { requested } else { initial };
            prop_assert_eq!(config.encode.quality, expected);
        }
    }

    #[test]
    fn test_empty_config_uses_defaults() {
        let config = Config::parse_toml("").expect("Empty TOML should parse");

        assert_eq!(config.paths.raw_dir, PathBuf::from("/data/raw"));
        assert_eq!(config.drive.default_device, "/dev/sr0");
        assert!(config.drive.eject_after_rip);
        assert_eq!(config.drive.detection_method, DetectionMethod::Auto);
        assert!((config.drive.poll_interval_secs - 5.0).abs() < f64::EPSILON);
        assert_eq!(config.selection.min_movie_duration, 600);
        assert_eq!(config.selection.min_tv_duration, 300);
        assert_eq!(config.encode.handbrake_path, "HandBrakeCLI");
        assert_eq!(config.encode.video_codec, VideoCodec::X265);
        assert_eq!(config.encode.quality, 19);
        assert_eq!(config.queue.max_concurrent_rips, 1);
        assert_eq!(config.queue.max_concurrent_encodes, 2);
        assert!(!config.status.enabled);
    }

    #[test]
    fn test_partial_section_keeps_other_defaults() {
        let config = Config::parse_toml("[encode]\npreset = \"Fast 1080p30\"\n").expect("Partial TOML");

        assert_eq!(config.encode.preset, "Fast 1080p30");
        assert!(config.encode.enabled);
        assert!(config.encode.delete_raw_after_encode);
        assert_eq!(config.encode.encoder_preset, "slow");
    }

    #[test]
    fn test_invalid_env_values_are_ignored() {
        let _guard = ENV_MUTEX.lock().unwrap();
        clear_env_vars();

        let mut config = Config::default();
        env::set_var("RIPARR_DETECTION_METHOD", "carrier-pigeon");
        env::set_var("RIPARR_MAX_TITLES", "lots");
        env::set_var("RIPARR_EJECT_AFTER_RIP", "maybe");
        config.apply_env_overrides();
        clear_env_vars();

        assert_eq!(config, Config::default());
    }

    #[test]
    fn test_load_or_default_without_file() {
        let _guard = ENV_MUTEX.lock().unwrap();
        clear_env_vars();

        env::set_var("RIPARR_RAW_DIR", "/mnt/rips");
        let config =
            Config::load_or_default(Some(Path::new("/nonexistent/riparr.toml"))).expect("defaults");
        clear_env_vars();

        assert_eq!(config.paths.raw_dir, PathBuf::from("/mnt/rips"));
        assert_eq!(config.paths.output_dir, PathBuf::from("/data/media"));
    }

    #[test]
    fn test_masked_toml_hides_secrets() {
        let mut config = Config::default();
        config.metadata.tmdb_api_key = Some("abcdef123456".to_string());
        config.makemkv.license_key = Some("T-secretkey".to_string());

        let rendered = config.to_masked_toml().expect("serializes");

        assert!(rendered.contains("abcd****"));
        assert!(rendered.contains("T-se****"));
        assert!(!rendered.contains("abcdef123456"));
    }
}
