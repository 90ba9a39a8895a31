//! Core data types for eegbridge
//!
//! This module contains the fundamental data structures shared by the
//! resolver, both backends and the device facade.
//!
//! # Main Types
//!
//! - [`BackendKind`] - Which acquisition paradigm a device uses (polling or streaming)
//! - [`ConnectionHints`] - Optional transport hints (serial port, MAC, IP, ...)
//! - [`DeviceDescriptor`] - Immutable description of a resolved device
//! - [`MarkerEvent`] - A timestamped event code pushed by experiment code
//! - [`RecentWindow`] - On-demand snapshot of the most recent samples
//!
//! # Timestamps
//!
//! All timestamps are wall-clock seconds since the Unix epoch as `f64`
//! (see [`unix_time`]). Markers and streamed samples are stamped from the
//! same clock, which is what makes nearest-timestamp alignment meaningful.

use serde::{Deserialize, Serialize};

/// Marker value meaning "no event at this sample"
pub const NO_EVENT: i32 = 0;

/// Current wall-clock time in seconds since the Unix epoch
pub fn unix_time() -> f64 {
    let now = chrono::Utc::now();
    now.timestamp() as f64 + f64::from(now.timestamp_subsec_nanos()) * 1e-9
}

/// Acquisition paradigm of a device
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    /// The caller synchronously asks a board driver for its latest buffered samples
    Polling,
    /// Samples are pushed by a background publisher onto a named channel
    Streaming,
}

impl std::fmt::Display for BackendKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BackendKind::Polling => write!(f, "polling"),
            BackendKind::Streaming => write!(f, "streaming"),
        }
    }
}

/// Operations exposed by the device facade
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    Start,
    PushSample,
    Stop,
    GetRecent,
}

impl std::fmt::Display for Operation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Operation::Start => write!(f, "start"),
            Operation::PushSample => write!(f, "push_sample"),
            Operation::Stop => write!(f, "stop"),
            Operation::GetRecent => write!(f, "get_recent"),
        }
    }
}

/// Optional connection hints supplied at construction
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionHints {
    /// Serial port path (e.g. `/dev/ttyUSB0`, `COM3`)
    #[serde(default)]
    pub serial_port: Option<String>,
    /// Device serial number (Unicorn, BrainBit)
    #[serde(default)]
    pub serial_number: Option<String>,
    /// Bluetooth hardware address
    #[serde(default)]
    pub mac_address: Option<String>,
    /// Network address for WiFi shields
    #[serde(default)]
    pub ip_address: Option<String>,
    /// Network port for WiFi shields
    #[serde(default)]
    pub ip_port: Option<u16>,
    /// Free-form driver specific value
    #[serde(default)]
    pub other: Option<String>,
}

impl ConnectionHints {
    /// Hints with only a serial port set
    pub fn serial(port: impl Into<String>) -> Self {
        Self {
            serial_port: Some(port.into()),
            ..Default::default()
        }
    }

    /// Hints with only a hardware address set
    pub fn mac(address: impl Into<String>) -> Self {
        Self {
            mac_address: Some(address.into()),
            ..Default::default()
        }
    }
}

/// Immutable description of a resolved device
///
/// Built once by the facade from the device catalog and never changed
/// afterwards; backends receive clones.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DeviceDescriptor {
    identifier: String,
    kind: BackendKind,
    board_id: Option<i32>,
    channel_names: Vec<String>,
    sample_rate: f64,
    hints: ConnectionHints,
}

impl DeviceDescriptor {
    pub fn new(
        identifier: impl Into<String>,
        kind: BackendKind,
        board_id: Option<i32>,
        channel_names: Vec<String>,
        sample_rate: f64,
        hints: ConnectionHints,
    ) -> Self {
        Self {
            identifier: identifier.into(),
            kind,
            board_id,
            channel_names,
            sample_rate,
            hints,
        }
    }

    pub fn identifier(&self) -> &str {
        &self.identifier
    }

    pub fn kind(&self) -> BackendKind {
        self.kind
    }

    /// BrainFlow-compatible board id (polling devices only)
    pub fn board_id(&self) -> Option<i32> {
        self.board_id
    }

    pub fn channel_names(&self) -> &[String] {
        &self.channel_names
    }

    pub fn channel_count(&self) -> usize {
        self.channel_names.len()
    }

    /// Nominal sample rate in Hz
    pub fn sample_rate(&self) -> f64 {
        self.sample_rate
    }

    pub fn hints(&self) -> &ConnectionHints {
        &self.hints
    }
}

/// A timestamped event code
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MarkerEvent {
    /// Experimental meaning of the moment (e.g. 1 = non-target, 2 = target)
    pub code: i32,
    /// Seconds since the Unix epoch
    pub timestamp: f64,
}

impl MarkerEvent {
    pub fn new(code: i32, timestamp: f64) -> Self {
        Self { code, timestamp }
    }

    /// Marker stamped with the current wall-clock time
    pub fn now(code: i32) -> Self {
        Self::new(code, unix_time())
    }
}

/// A bounded snapshot of the most recent samples
///
/// Rows are samples in acquisition order, columns follow `channel_names`.
/// The caller owns the copy; no backend keeps a reference to it.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct RecentWindow {
    pub channel_names: Vec<String>,
    pub sample_rate: f64,
    pub timestamps: Vec<f64>,
    pub samples: Vec<Vec<f64>>,
}

impl RecentWindow {
    /// An empty window carrying only metadata
    pub fn empty(channel_names: Vec<String>, sample_rate: f64) -> Self {
        Self {
            channel_names,
            sample_rate,
            timestamps: Vec::new(),
            samples: Vec::new(),
        }
    }

    /// Number of sample rows
    pub fn len(&self) -> usize {
        self.timestamps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.timestamps.is_empty()
    }

    /// Append one row; the row must have one value per channel
    pub fn push_row(&mut self, timestamp: f64, values: Vec<f64>) {
        debug_assert_eq!(values.len(), self.channel_names.len());
        self.timestamps.push(timestamp);
        self.samples.push(values);
    }

    /// All values of a named channel, in row order
    pub fn column(&self, name: &str) -> Option<Vec<f64>> {
        let idx = self.channel_names.iter().position(|c| c == name)?;
        Some(self.samples.iter().map(|row| row[idx]).collect())
    }

    /// Time span covered by the window in seconds
    pub fn span_secs(&self) -> f64 {
        match (self.timestamps.first(), self.timestamps.last()) {
            (Some(first), Some(last)) => last - first,
            _ => 0.0,
        }
    }
}
