//! Core configuration structures and loading logic

use crate::settings::{PosterSettings, PreviewSettings, ProcessingSettings, SettingsError};
use serde::{Deserialize, Serialize};
use std::env;
use std::fs;
use std::path::{Path, PathBuf};

/// Error type for configuration operations
#[derive(Debug)]
pub enum ConfigError {
    /// IO error reading config file
    Io(std::io::Error),
    /// TOML parsing error
    Parse(toml::de::Error),
    /// A value parsed but is out of range
    Invalid(String),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::Io(e) => write!(f, "Failed to read config file: {}", e),
            ConfigError::Parse(e) => write!(f, "Failed to parse config: {}", e),
            ConfigError::Invalid(msg) => write!(f, "Invalid config: {}", msg),
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

impl From<SettingsError> for ConfigError {
    fn from(e: SettingsError) -> Self {
        ConfigError::Invalid(e.to_string())
    }
}

/// Worker pool configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct WorkersConfig {
    /// Number of logical cores (auto-detected if None)
    pub logical_cores: Option<u32>,
    /// Maximum concurrent runs (0 = auto-derive)
    #[serde(default)]
    pub max_concurrent_jobs: u32,
    /// Capacity of the submission channel
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,
}

fn default_queue_capacity() -> usize {
    100
}

impl Default for WorkersConfig {
    fn default() -> Self {
        Self {
            logical_cores: None,
            max_concurrent_jobs: 0,
            queue_capacity: default_queue_capacity(),
        }
    }
}

/// External tool locations and timeouts
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ToolsConfig {
    #[serde(default = "default_ffmpeg_path")]
    pub ffmpeg_path: String,
    #[serde(default = "default_ffprobe_path")]
    pub ffprobe_path: String,
    #[serde(default = "default_probe_timeout_secs")]
    pub probe_timeout_secs: u64,
    #[serde(default = "default_poster_timeout_secs")]
    pub poster_timeout_secs: u64,
    #[serde(default = "default_preview_timeout_secs")]
    pub preview_timeout_secs: u64,
}

fn default_ffmpeg_path() -> String {
    "ffmpeg".to_string()
}

fn default_ffprobe_path() -> String {
    "ffprobe".to_string()
}

fn default_probe_timeout_secs() -> u64 {
    30
}

fn default_poster_timeout_secs() -> u64 {
    60
}

fn default_preview_timeout_secs() -> u64 {
    300
}

impl Default for ToolsConfig {
    fn default() -> Self {
        Self {
            ffmpeg_path: default_ffmpeg_path(),
            ffprobe_path: default_ffprobe_path(),
            probe_timeout_secs: default_probe_timeout_secs(),
            poster_timeout_secs: default_poster_timeout_secs(),
            preview_timeout_secs: default_preview_timeout_secs(),
        }
    }
}

/// Filesystem locations
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StorageConfig {
    /// Root under which `posters/` and `previews/` are created
    #[serde(default = "default_media_root")]
    pub media_root: PathBuf,
    /// Base directory for per-run working areas
    #[serde(default = "default_temp_dir")]
    pub temp_dir: PathBuf,
    /// Directory for persisted job records (no persistence if None)
    pub state_dir: Option<PathBuf>,
}

fn default_media_root() -> PathBuf {
    PathBuf::from("media")
}

fn default_temp_dir() -> PathBuf {
    PathBuf::from("/tmp/vidprep")
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            media_root: default_media_root(),
            temp_dir: default_temp_dir(),
            state_dir: None,
        }
    }
}

/// Status API configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ServerConfig {
    #[serde(default = "default_bind")]
    pub bind: String,
}

fn default_bind() -> String {
    "127.0.0.1:7878".to_string()
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
        }
    }
}

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct Config {
    #[serde(default)]
    pub workers: WorkersConfig,
    #[serde(default)]
    pub tools: ToolsConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub server: ServerConfig,
    /// Default poster settings for runs submitted without their own
    #[serde(default)]
    pub poster: PosterSettings,
    /// Default preview settings for runs submitted without their own
    #[serde(default)]
    pub preview: PreviewSettings,
}

impl Config {
    /// Load configuration from a TOML file
    ///
    /// Parses the config.toml file and handles missing optional fields with defaults.
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path)?;
        Self::parse_toml(&content)
    }

    /// Parse configuration from a TOML string
    pub fn parse_toml(content: &str) -> Result<Self, ConfigError> {
        let config: Config = toml::from_str(content)?;
        Ok(config)
    }

    /// Apply environment variable overrides to the configuration
    ///
    /// Overrides the following values if environment variables are set:
    /// - VIDPREP_LOGICAL_CORES -> workers.logical_cores
    /// - VIDPREP_MAX_CONCURRENT_JOBS -> workers.max_concurrent_jobs
    /// - VIDPREP_QUEUE_CAPACITY -> workers.queue_capacity
    /// - VIDPREP_FFMPEG_PATH -> tools.ffmpeg_path
    /// - VIDPREP_FFPROBE_PATH -> tools.ffprobe_path
    /// - VIDPREP_MEDIA_ROOT -> storage.media_root
    /// - VIDPREP_TEMP_DIR -> storage.temp_dir
    /// - VIDPREP_STATE_DIR -> storage.state_dir
    /// - VIDPREP_BIND -> server.bind
    pub fn apply_env_overrides(&mut self) {
        if let Ok(val) = env::var("VIDPREP_LOGICAL_CORES") {
            if let Ok(cores) = val.parse::<u32>() {
                self.workers.logical_cores = Some(cores);
            }
        }

        if let Ok(val) = env::var("VIDPREP_MAX_CONCURRENT_JOBS") {
            if let Ok(jobs) = val.parse::<u32>() {
                self.workers.max_concurrent_jobs = jobs;
            }
        }

        if let Ok(val) = env::var("VIDPREP_QUEUE_CAPACITY") {
            if let Ok(capacity) = val.parse::<usize>() {
                self.workers.queue_capacity = capacity;
            }
        }

        if let Ok(val) = env::var("VIDPREP_FFMPEG_PATH") {
            if !val.is_empty() {
                self.tools.ffmpeg_path = val;
            }
        }

        if let Ok(val) = env::var("VIDPREP_FFPROBE_PATH") {
            if !val.is_empty() {
                self.tools.ffprobe_path = val;
            }
        }

        if let Ok(val) = env::var("VIDPREP_MEDIA_ROOT") {
            if !val.is_empty() {
                self.storage.media_root = PathBuf::from(val);
            }
        }

        if let Ok(val) = env::var("VIDPREP_TEMP_DIR") {
            if !val.is_empty() {
                self.storage.temp_dir = PathBuf::from(val);
            }
        }

        if let Ok(val) = env::var("VIDPREP_STATE_DIR") {
            if !val.is_empty() {
                self.storage.state_dir = Some(PathBuf::from(val));
            }
        }

        if let Ok(val) = env::var("VIDPREP_BIND") {
            if !val.is_empty() {
                self.server.bind = val;
            }
        }
    }

    /// Reject values the daemon cannot run with
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.workers.queue_capacity == 0 {
            return Err(ConfigError::Invalid(
                "workers.queue_capacity must be greater than 0".to_string(),
            ));
        }
        for (name, secs) in [
            ("tools.probe_timeout_secs", self.tools.probe_timeout_secs),
            ("tools.poster_timeout_secs", self.tools.poster_timeout_secs),
            ("tools.preview_timeout_secs", self.tools.preview_timeout_secs),
        ] {
            if secs == 0 {
                return Err(ConfigError::Invalid(format!(
                    "{} must be greater than 0",
                    name
                )));
            }
        }
        self.processing_settings().validate()?;
        Ok(())
    }

    /// Default settings record for runs submitted without explicit settings
    pub fn processing_settings(&self) -> ProcessingSettings {
        ProcessingSettings {
            poster: self.poster.clone(),
            preview: self.preview.clone(),
        }
    }

    /// Load configuration from file, apply environment overrides and validate
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let mut config = Self::load_from_file(path)?;
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }
}
