use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Main application configuration
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case")]
pub struct Config {
    #[serde(default)]
    pub capture: CaptureConfig,

    #[serde(default)]
    pub event_loop: EventLoopConfig,

    #[serde(default)]
    pub snapshot: SnapshotConfig,
}

/// Capture format negotiation
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case")]
pub struct CaptureConfig {
    #[serde(default = "default_primary_width")]
    pub primary_width: u32,

    #[serde(default = "default_primary_height")]
    pub primary_height: u32,

    #[serde(default = "default_fallback_width")]
    pub fallback_width: u32,

    #[serde(default = "default_fallback_height")]
    pub fallback_height: u32,

    /// Four-character code of the compressed stream, "MJPG" for motion JPEG
    #[serde(default = "default_fourcc")]
    pub fourcc: String,
}

/// Readiness wait bounds
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case")]
pub struct EventLoopConfig {
    #[serde(default = "default_poll_timeout_ms")]
    pub poll_timeout_ms: u64,

    /// How long a snapshot request waits for a fresh frame
    #[serde(default = "default_snapshot_wait_ms")]
    pub snapshot_wait_ms: u64,
}

/// Snapshot file naming
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case")]
pub struct SnapshotConfig {
    #[serde(default = "default_directory")]
    pub directory: PathBuf,

    #[serde(default = "default_prefix")]
    pub prefix: String,

    #[serde(default = "default_extension")]
    pub extension: String,
}

// Default value functions
fn default_primary_width() -> u32 {
    640
}
fn default_primary_height() -> u32 {
    480
}
fn default_fallback_width() -> u32 {
    1280
}
fn default_fallback_height() -> u32 {
    1024
}
fn default_fourcc() -> String {
    "MJPG".to_string()
}
fn default_poll_timeout_ms() -> u64 {
    2000
}
fn default_snapshot_wait_ms() -> u64 {
    1000
}
fn default_directory() -> PathBuf {
    PathBuf::from(".")
}
fn default_prefix() -> String {
    "capture".to_string()
}
fn default_extension() -> String {
    "jpg".to_string()
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            primary_width: default_primary_width(),
            primary_height: default_primary_height(),
            fallback_width: default_fallback_width(),
            fallback_height: default_fallback_height(),
            fourcc: default_fourcc(),
        }
    }
}

impl CaptureConfig {
    /// Primary and fallback resolutions, in the order they are requested
    pub fn resolutions(&self) -> [(u32, u32); 2] {
        [
            (self.primary_width, self.primary_height),
            (self.fallback_width, self.fallback_height),
        ]
    }

    pub fn fourcc_bytes(&self) -> [u8; 4] {
        let mut repr = [b' '; 4];
        for (dst, src) in repr.iter_mut().zip(self.fourcc.bytes()) {
            *dst = src;
        }
        repr
    }
}

impl Default for EventLoopConfig {
    fn default() -> Self {
        Self {
            poll_timeout_ms: default_poll_timeout_ms(),
            snapshot_wait_ms: default_snapshot_wait_ms(),
        }
    }
}

impl EventLoopConfig {
    pub fn poll_timeout(&self) -> Duration {
        Duration::from_millis(self.poll_timeout_ms)
    }

    pub fn snapshot_wait(&self) -> Duration {
        Duration::from_millis(self.snapshot_wait_ms)
    }
}

impl Default for SnapshotConfig {
    fn default() -> Self {
        Self {
            directory: default_directory(),
            prefix: default_prefix(),
            extension: default_extension(),
        }
    }
}

impl Config {
    /// Load configuration from a TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path.as_ref())?;
        Self::from_toml(&content)
    }

    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        let config: Config = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        for (width, height) in self.capture.resolutions() {
            if width == 0 || height == 0 {
                return Err(ConfigError::Invalid(format!(
                    "capture resolution {}x{} must be non-zero",
                    width, height
                )));
            }
        }

        if self.capture.fourcc.len() != 4 || !self.capture.fourcc.is_ascii() {
            return Err(ConfigError::Invalid(format!(
                "fourcc '{}' must be exactly four ASCII characters",
                self.capture.fourcc
            )));
        }

        if self.event_loop.poll_timeout_ms == 0 || self.event_loop.snapshot_wait_ms == 0 {
            return Err(ConfigError::Invalid("timeouts must be non-zero".to_string()));
        }

        if self.snapshot.prefix.is_empty() {
            return Err(ConfigError::Invalid("snapshot prefix must not be empty".to_string()));
        }

        Ok(())
    }
}
