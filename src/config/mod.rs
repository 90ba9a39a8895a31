//! Configuration module for eegbridge
//!
//! This module handles acquisition configuration:
//! - Polling board settings (ring buffer size, serial timeouts)
//! - Streaming settings (discovery timeout, readiness, recent-window margin)
//! - Recording defaults (data directory, session-start marker)
//!
//! Configuration is stored as TOML. Every field has a default, so a partial
//! file (or no file at all) is valid.
//!
//! # App Data Location
//!
//! Recordings default to the platform-appropriate data directory:
//! - **Linux**: `~/.local/share/dev.hxyulin.eegbridge-rs/data/`
//! - **macOS**: `~/Library/Application Support/dev.hxyulin.eegbridge-rs/data/`
//! - **Windows**: `%APPDATA%\dev.hxyulin.eegbridge-rs\data\`
//!
//! # Example
//!
//! ```ignore
//! use eegbridge_rs::config::{AcquisitionConfig, generate_save_path};
//!
//! let config = AcquisitionConfig::load_or_default("eegbridge.toml");
//! let path = generate_save_path(&config.recording.data_dir(), "museS", "visual_p300", "local", 1, 1);
//! ```

use crate::error::{DeviceError, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Application identifier for data directories
pub const APP_ID: &str = "dev.hxyulin.eegbridge-rs";

/// Default number of samples a polling board keeps in its ring buffer
pub const DEFAULT_RING_BUFFER_SAMPLES: usize = 450_000;

/// Default stream discovery timeout in milliseconds
pub const DEFAULT_DISCOVERY_TIMEOUT_MS: u64 = 5_000;

/// Default extra time allowed on top of `n / sample_rate` for `get_recent`
pub const DEFAULT_RECENT_MARGIN_MS: u64 = 500;

/// Default time to wait for publisher/recorder readiness acknowledgments
pub const DEFAULT_READY_TIMEOUT_MS: u64 = 5_000;

/// Default marker pushed once a streaming session is ready
pub const DEFAULT_SESSION_START_MARKER: i32 = 99;

// ==================== App Data Directory ====================

/// Get the application data directory path
pub fn app_data_dir() -> Option<PathBuf> {
    dirs_next::data_dir().map(|p| p.join(APP_ID))
}

/// Ensure the app data directory exists
pub fn ensure_app_data_dir() -> Result<PathBuf> {
    let dir = app_data_dir().ok_or_else(|| {
        DeviceError::Config("Could not determine app data directory".to_string())
    })?;

    if !dir.exists() {
        std::fs::create_dir_all(&dir).map_err(|e| {
            DeviceError::Config(format!("Failed to create app data directory: {}", e))
        })?;
    }

    Ok(dir)
}

/// Build a recording path following the experiment/site/device/subject/session layout
///
/// `<data_dir>/<experiment>/<site>/<device>/subjectNNNN/sessionNNN/recording_<stamp>.csv`
pub fn generate_save_path(
    data_dir: &Path,
    device: &str,
    experiment: &str,
    site: &str,
    subject_id: u32,
    session_nb: u32,
) -> PathBuf {
    let stamp = chrono::Local::now().format("%Y-%m-%d-%H.%M.%S");
    data_dir
        .join(experiment)
        .join(site)
        .join(device)
        .join(format!("subject{:04}", subject_id))
        .join(format!("session{:03}", session_nb))
        .join(format!("recording_{}.csv", stamp))
}

// ==================== Acquisition Config ====================

/// Complete acquisition configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AcquisitionConfig {
    /// Polling board configuration
    #[serde(default)]
    pub polling: PollingConfig,

    /// Streaming peripheral configuration
    #[serde(default)]
    pub streaming: StreamingConfig,

    /// Recording defaults
    #[serde(default)]
    pub recording: RecordingConfig,
}

impl AcquisitionConfig {
    /// Create a default configuration
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse configuration from TOML text
    pub fn from_toml_str(content: &str) -> Result<Self> {
        toml::from_str(content)
            .map_err(|e| DeviceError::Config(format!("Failed to parse configuration: {}", e)))
    }

    /// Load configuration from a TOML file
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            DeviceError::Config(format!("Failed to read config file {:?}: {}", path, e))
        })?;
        Self::from_toml_str(&content)
            .map_err(|e| e.with_context(format!("Invalid config file {:?}", path)))
    }

    /// Load configuration, returning defaults if any error occurs
    pub fn load_or_default(path: impl AsRef<Path>) -> Self {
        match Self::load(path) {
            Ok(config) => config,
            Err(e) => {
                tracing::warn!("Using default acquisition config: {}", e);
                Self::default()
            }
        }
    }

    /// Save configuration to disk as TOML
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                DeviceError::Config(format!("Failed to create config directory: {}", e))
            })?;
        }

        let content = toml::to_string_pretty(self)
            .map_err(|e| DeviceError::Serialization(format!("Failed to serialize config: {}", e)))?;

        std::fs::write(path, content).map_err(|e| {
            DeviceError::Config(format!("Failed to write config file {:?}: {}", path, e))
        })
    }
}

// ==================== Polling Config ====================

/// Configuration for polling boards
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PollingConfig {
    /// Samples kept by the board's internal ring buffer
    #[serde(default = "default_ring_buffer_samples")]
    pub ring_buffer_samples: usize,

    /// Serial read timeout in milliseconds
    #[serde(default = "default_serial_timeout_ms")]
    pub serial_timeout_ms: u64,

    /// How long to wait for a board to answer its reset handshake
    #[serde(default = "default_handshake_timeout_ms")]
    pub handshake_timeout_ms: u64,
}

fn default_ring_buffer_samples() -> usize {
    DEFAULT_RING_BUFFER_SAMPLES
}

fn default_serial_timeout_ms() -> u64 {
    100
}

fn default_handshake_timeout_ms() -> u64 {
    3_000
}

impl Default for PollingConfig {
    fn default() -> Self {
        Self {
            ring_buffer_samples: DEFAULT_RING_BUFFER_SAMPLES,
            serial_timeout_ms: default_serial_timeout_ms(),
            handshake_timeout_ms: default_handshake_timeout_ms(),
        }
    }
}

impl PollingConfig {
    pub fn serial_timeout(&self) -> Duration {
        Duration::from_millis(self.serial_timeout_ms)
    }

    pub fn handshake_timeout(&self) -> Duration {
        Duration::from_millis(self.handshake_timeout_ms)
    }
}

// ==================== Streaming Config ====================

/// Configuration for streaming peripherals and the channel bus
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StreamingConfig {
    /// Hard timeout for peripheral discovery and stream resolution
    #[serde(default = "default_discovery_timeout_ms")]
    pub discovery_timeout_ms: u64,

    /// Margin added to `n / sample_rate` when pulling a recent window
    #[serde(default = "default_recent_margin_ms")]
    pub recent_margin_ms: u64,

    /// Whether `start` waits for publisher/recorder readiness
    #[serde(default = "default_true")]
    pub await_ready_on_start: bool,

    /// Maximum time to wait for readiness acknowledgments
    #[serde(default = "default_ready_timeout_ms")]
    pub ready_timeout_ms: u64,

    /// Maximum time `stop` waits for background tasks to exit
    #[serde(default = "default_shutdown_timeout_ms")]
    pub shutdown_timeout_ms: u64,

    /// Samples buffered per subscriber before the oldest are dropped
    #[serde(default = "default_inlet_buffer_samples")]
    pub inlet_buffer_samples: usize,

    /// Advertised type of the sample stream
    #[serde(default = "default_eeg_stream_type")]
    pub eeg_stream_type: String,

    /// Advertised name of the marker stream
    #[serde(default = "default_marker_stream_name")]
    pub marker_stream_name: String,

    /// Source id of the marker stream
    #[serde(default = "default_marker_source_id")]
    pub marker_source_id: String,

    /// Marker pushed once the session is ready (None to disable)
    #[serde(default = "default_session_start_marker")]
    pub session_start_marker: Option<i32>,
}

fn default_true() -> bool {
    true
}

fn default_discovery_timeout_ms() -> u64 {
    DEFAULT_DISCOVERY_TIMEOUT_MS
}

fn default_recent_margin_ms() -> u64 {
    DEFAULT_RECENT_MARGIN_MS
}

fn default_ready_timeout_ms() -> u64 {
    DEFAULT_READY_TIMEOUT_MS
}

fn default_shutdown_timeout_ms() -> u64 {
    2_000
}

fn default_inlet_buffer_samples() -> usize {
    // 6 minutes at 256 Hz
    92_160
}

fn default_eeg_stream_type() -> String {
    "EEG".to_string()
}

fn default_marker_stream_name() -> String {
    "Markers".to_string()
}

fn default_marker_source_id() -> String {
    "eegbridge-markers".to_string()
}

fn default_session_start_marker() -> Option<i32> {
    Some(DEFAULT_SESSION_START_MARKER)
}

impl Default for StreamingConfig {
    fn default() -> Self {
        Self {
            discovery_timeout_ms: DEFAULT_DISCOVERY_TIMEOUT_MS,
            recent_margin_ms: DEFAULT_RECENT_MARGIN_MS,
            await_ready_on_start: true,
            ready_timeout_ms: DEFAULT_READY_TIMEOUT_MS,
            shutdown_timeout_ms: default_shutdown_timeout_ms(),
            inlet_buffer_samples: default_inlet_buffer_samples(),
            eeg_stream_type: default_eeg_stream_type(),
            marker_stream_name: default_marker_stream_name(),
            marker_source_id: default_marker_source_id(),
            session_start_marker: default_session_start_marker(),
        }
    }
}

impl StreamingConfig {
    pub fn discovery_timeout(&self) -> Duration {
        Duration::from_millis(self.discovery_timeout_ms)
    }

    pub fn recent_margin(&self) -> Duration {
        Duration::from_millis(self.recent_margin_ms)
    }

    pub fn ready_timeout(&self) -> Duration {
        Duration::from_millis(self.ready_timeout_ms)
    }

    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_millis(self.shutdown_timeout_ms)
    }

    /// Time budget for pulling `n_samples` at `sample_rate`
    pub fn recent_timeout(&self, n_samples: usize, sample_rate: f64) -> Duration {
        let pull = if sample_rate > 0.0 {
            Duration::try_from_secs_f64(n_samples as f64 / sample_rate).unwrap_or(Duration::MAX)
        } else {
            Duration::ZERO
        };
        pull.saturating_add(self.recent_margin())
    }
}

// ==================== Recording Config ====================

/// Defaults for recorded sessions
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RecordingConfig {
    /// Root directory for generated recording paths
    #[serde(default)]
    pub data_dir: Option<PathBuf>,
}

impl RecordingConfig {
    /// Configured data directory, falling back to the app data directory
    pub fn data_dir(&self) -> PathBuf {
        self.data_dir
            .clone()
            .or_else(|| app_data_dir().map(|p| p.join("data")))
            .unwrap_or_else(|| PathBuf::from("data"))
    }
}
