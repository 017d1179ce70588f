//! Configuration file handling for plate-console.
//!
//! Loads configuration from `~/.config/plate-console/config.toml` or a custom path.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::buffer::DEFAULT_CAPACITY;
use crate::capture::{
    CaptureSource, FfmpegInput, FfmpegSource, Resolution, StillSource, DEFAULT_ATTACH_TIMEOUT,
};
use crate::channel::{DEFAULT_CONNECT_TIMEOUT, DEFAULT_ENDPOINT};
use crate::sampler::{DEFAULT_INTERVAL, DEFAULT_JPEG_QUALITY};
use crate::session::{
    ReconnectPolicy, SessionConfig, DEFAULT_BACKOFF_BASE, DEFAULT_BACKOFF_MAX,
    DEFAULT_MAX_ATTEMPTS,
};
use crate::store::DEFAULT_BASE_URL;

/// Configuration file structure for plate-console.
/// Loaded from ~/.config/plate-console/config.toml (or custom path via --config).
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub detection: DetectionConfig,
    #[serde(default)]
    pub sampler: SamplerConfig,
    #[serde(default)]
    pub buffer: BufferConfig,
    #[serde(default)]
    pub capture: CaptureConfig,
    #[serde(default)]
    pub reconnect: ReconnectConfig,
    #[serde(default)]
    pub store: StoreConfig,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct DetectionConfig {
    pub endpoint: String,
    pub connect_timeout_ms: u64,
}

impl Default for DetectionConfig {
    fn default() -> Self {
        Self {
            endpoint: DEFAULT_ENDPOINT.to_string(),
            connect_timeout_ms: DEFAULT_CONNECT_TIMEOUT.as_millis() as u64,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct SamplerConfig {
    pub interval_ms: u64,
    pub jpeg_quality: u8,
}

impl Default for SamplerConfig {
    fn default() -> Self {
        Self {
            interval_ms: DEFAULT_INTERVAL.as_millis() as u64,
            jpeg_quality: DEFAULT_JPEG_QUALITY,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct BufferConfig {
    pub capacity: usize,
}

impl Default for BufferConfig {
    fn default() -> Self {
        Self {
            capacity: DEFAULT_CAPACITY,
        }
    }
}

/// Where frames come from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceKind {
    /// Live camera through FFmpeg.
    #[default]
    Camera,
    /// Looping video file through FFmpeg.
    Sample,
    /// A single image file.
    Still,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct CaptureConfig {
    pub source: SourceKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub device: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sample_path: Option<PathBuf>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub input_format: Option<String>,
    pub width: u32,
    pub height: u32,
    /// How long to wait for FFmpeg's first frame.
    pub attach_timeout_ms: u64,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            source: SourceKind::default(),
            device: None,
            sample_path: None,
            input_format: None,
            width: Resolution::PREVIEW.width,
            height: Resolution::PREVIEW.height,
            attach_timeout_ms: DEFAULT_ATTACH_TIMEOUT.as_millis() as u64,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct ReconnectConfig {
    pub enabled: bool,
    pub max_attempts: u32,
    pub backoff_base_ms: u64,
    pub backoff_max_ms: u64,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            backoff_base_ms: DEFAULT_BACKOFF_BASE.as_millis() as u64,
            backoff_max_ms: DEFAULT_BACKOFF_MAX.as_millis() as u64,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct StoreConfig {
    pub base_url: String,
    /// Environment variable holding the API token.
    pub token_env: String,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            token_env: crate::store::API_TOKEN_ENV.to_string(),
        }
    }
}

impl Config {
    /// Load configuration from a file path.
    /// Returns default config if the file doesn't exist.
    /// Returns an error if the file exists but cannot be parsed or is invalid.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let path = path.map(PathBuf::from).unwrap_or_else(default_path);

        if !path.exists() {
            log::debug!("No config file at {}, using defaults", path.display());
            return Ok(Config::default());
        }

        let content = std::fs::read_to_string(&path).map_err(|e| ConfigError::IoError {
            path: path.clone(),
            source: e,
        })?;
        let config: Config = toml::from_str(&content).map_err(|e| ConfigError::ParseError {
            path: path.clone(),
            source: e,
        })?;
        config.validate()?;
        log::debug!("Loaded config from {}", path.display());
        Ok(config)
    }

    /// Reject values the session cannot run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.buffer.capacity == 0 {
            return Err(ConfigError::Invalid(
                "buffer.capacity must be at least 1".to_string(),
            ));
        }
        if self.sampler.interval_ms == 0 {
            return Err(ConfigError::Invalid(
                "sampler.interval_ms must be at least 1".to_string(),
            ));
        }
        if !(1..=100).contains(&self.sampler.jpeg_quality) {
            return Err(ConfigError::Invalid(format!(
                "sampler.jpeg_quality must be between 1 and 100, got {}",
                self.sampler.jpeg_quality
            )));
        }
        if self.capture.width == 0 || self.capture.height == 0 {
            return Err(ConfigError::Invalid(
                "capture.width and capture.height must be non-zero".to_string(),
            ));
        }
        if self.capture.attach_timeout_ms == 0 {
            return Err(ConfigError::Invalid(
                "capture.attach_timeout_ms must be greater than 0".to_string(),
            ));
        }
        if !self.detection.endpoint.starts_with("ws://")
            && !self.detection.endpoint.starts_with("wss://")
        {
            return Err(ConfigError::Invalid(format!(
                "detection.endpoint must be a ws:// or wss:// URL, got '{}'",
                self.detection.endpoint
            )));
        }
        Ok(())
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.detection.connect_timeout_ms)
    }

    pub fn resolution(&self) -> Resolution {
        Resolution {
            width: self.capture.width,
            height: self.capture.height,
        }
    }

    pub fn attach_timeout(&self) -> Duration {
        Duration::from_millis(self.capture.attach_timeout_ms)
    }

    pub fn reconnect_policy(&self) -> ReconnectPolicy {
        ReconnectPolicy {
            enabled: self.reconnect.enabled,
            max_attempts: self.reconnect.max_attempts,
            backoff_base: Duration::from_millis(self.reconnect.backoff_base_ms),
            backoff_max: Duration::from_millis(self.reconnect.backoff_max_ms),
        }
    }

    pub fn to_session_config(&self) -> SessionConfig {
        SessionConfig {
            endpoint: self.detection.endpoint.clone(),
            sample_interval: Duration::from_millis(self.sampler.interval_ms),
            jpeg_quality: self.sampler.jpeg_quality,
            buffer_capacity: self.buffer.capacity,
            reconnect: self.reconnect_policy(),
        }
    }

    /// Build the capture source described by `[capture]`.
    pub fn build_source(&self) -> Result<Box<dyn CaptureSource>, ConfigError> {
        let resolution = self.resolution();
        match self.capture.source {
            SourceKind::Camera => {
                let format = self
                    .capture
                    .input_format
                    .clone()
                    .unwrap_or_else(|| crate::capture::default_input_format().to_string());
                Ok(Box::new(
                    FfmpegSource::new(
                        FfmpegInput::Camera {
                            format,
                            default_device: self.capture.device.clone(),
                        },
                        resolution,
                    )
                    .with_attach_timeout(self.attach_timeout()),
                ))
            }
            SourceKind::Sample => {
                let path = self.capture.sample_path.clone().ok_or_else(|| {
                    ConfigError::Invalid("capture.sample_path is required for source = \"sample\"".to_string())
                })?;
                Ok(Box::new(
                    FfmpegSource::sample_video(path, resolution)
                        .with_attach_timeout(self.attach_timeout()),
                ))
            }
            SourceKind::Still => {
                let path = self.capture.sample_path.clone().ok_or_else(|| {
                    ConfigError::Invalid("capture.sample_path is required for source = \"still\"".to_string())
                })?;
                Ok(Box::new(StillSource::new(path)))
            }
        }
    }
}

/// Errors that can occur when loading configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file '{}': {source}", .path.display())]
    IoError {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to parse config file '{}': {source}", .path.display())]
    ParseError {
        path: PathBuf,
        source: toml::de::Error,
    },

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Get the default config file path.
pub fn default_path() -> PathBuf {
    dirs::config_dir()
        .map(|d| d.join("plate-console").join("config.toml"))
        .unwrap_or_else(|| {
            let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
            PathBuf::from(home).join(".config/plate-console/config.toml")
        })
}

/// Contents written by `config init`.
pub fn default_config_toml() -> &'static str {
    r#"# plate-console configuration

[detection]
# Detector websocket endpoint
endpoint = "ws://localhost/detection"
# Handshake timeout
connect_timeout_ms = 10000

[sampler]
# Time between sampled frames
interval_ms = 1500
# JPEG quality (1-100)
jpeg_quality = 80

[buffer]
# Number of recent detections kept on screen
capacity = 15

[capture]
# Source: camera, sample, still
source = "camera"
# Camera device (default: first camera)
# device = "/dev/video0"
# Video or image file for source = "sample" / "still"
# sample_path = "sample.mp4"
# FFmpeg input format (default: v4l2, avfoundation or dshow)
# input_format = "v4l2"
width = 600
height = 460
# Give up if FFmpeg produces no frame within this time
attach_timeout_ms = 5000

[reconnect]
# Restart the session when the detector drops the connection
enabled = false
max_attempts = 3
backoff_base_ms = 1000
backoff_max_ms = 60000

[store]
# Saved-plate API
base_url = "http://localhost/api/v1"
# Environment variable holding the API token
token_env = "PLATE_CONSOLE_API_TOKEN"
"#
}
