//! Device catalog and backend resolution
//!
//! Maps a device identifier to its acquisition paradigm and the static
//! metadata (board id, channel montage, nominal sample rate) needed to build
//! a [`DeviceDescriptor`]. Resolution is pure and case-sensitive.

use crate::error::{DeviceError, Result};
use crate::types::{BackendKind, ConnectionHints, DeviceDescriptor};

/// Static catalog entry for one supported device
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DeviceSpec {
    pub identifier: &'static str,
    pub kind: BackendKind,
    /// BrainFlow board id for polling devices
    pub board_id: Option<i32>,
    pub sample_rate: f64,
    pub channels: &'static [&'static str],
}

impl DeviceSpec {
    /// Build the immutable descriptor for this device
    pub fn describe(&self, hints: ConnectionHints) -> DeviceDescriptor {
        DeviceDescriptor::new(
            self.identifier,
            self.kind,
            self.board_id,
            self.channels.iter().map(|c| c.to_string()).collect(),
            self.sample_rate,
            hints,
        )
    }
}

const MUSE_CHANNELS: &[&str] = &["TP9", "AF7", "AF8", "TP10", "Right AUX"];
const GANGLION_CHANNELS: &[&str] = &["fp1", "fp2", "tp7", "tp8"];
const CYTON_CHANNELS: &[&str] = &["Fp1", "Fp2", "C3", "C4", "P7", "P8", "O1", "O2"];
const CYTON_DAISY_CHANNELS: &[&str] = &[
    "Fp1", "Fp2", "C3", "C4", "P7", "P8", "O1", "O2", "F7", "F8", "F3", "F4", "T7", "T8", "P3",
    "P4",
];
const BRAINBIT_CHANNELS: &[&str] = &["T3", "T4", "O1", "O2"];
const UNICORN_CHANNELS: &[&str] = &["Fz", "C3", "Cz", "C4", "Pz", "PO7", "Oz", "PO8"];
const SYNTHETIC_CHANNELS: &[&str] = &[
    "Fz", "C3", "Cz", "C4", "Pz", "PO7", "Oz", "PO8", "F5", "F7", "F3", "F1", "F2", "F4", "F6",
    "F8",
];
const NOTION_CHANNELS: &[&str] = &["CP6", "F6", "C4", "CP4", "CP3", "F5", "C3", "CP5"];
const CROWN_CHANNELS: &[&str] = &["CP3", "C3", "F5", "PO3", "PO4", "F6", "C4", "CP4"];
const FREEEEG32_CHANNELS: &[&str] = &[
    "1", "2", "3", "4", "5", "6", "7", "8", "9", "10", "11", "12", "13", "14", "15", "16", "17",
    "18", "19", "20", "21", "22", "23", "24", "25", "26", "27", "28", "29", "30", "31", "32",
];

const fn polling(
    identifier: &'static str,
    board_id: i32,
    sample_rate: f64,
    channels: &'static [&'static str],
) -> DeviceSpec {
    DeviceSpec {
        identifier,
        kind: BackendKind::Polling,
        board_id: Some(board_id),
        sample_rate,
        channels,
    }
}

const fn streaming(identifier: &'static str) -> DeviceSpec {
    DeviceSpec {
        identifier,
        kind: BackendKind::Streaming,
        board_id: None,
        sample_rate: 256.0,
        channels: MUSE_CHANNELS,
    }
}

/// Every device the crate knows how to drive
pub const CATALOG: &[DeviceSpec] = &[
    polling("synthetic", -1, 256.0, SYNTHETIC_CHANNELS),
    polling("cyton", 0, 250.0, CYTON_CHANNELS),
    polling("ganglion", 1, 200.0, GANGLION_CHANNELS),
    polling("cyton_daisy", 2, 125.0, CYTON_DAISY_CHANNELS),
    polling("ganglion_wifi", 4, 1600.0, GANGLION_CHANNELS),
    polling("cyton_wifi", 5, 1000.0, CYTON_CHANNELS),
    polling("cyton_daisy_wifi", 6, 1000.0, CYTON_DAISY_CHANNELS),
    polling("brainbit", 7, 250.0, BRAINBIT_CHANNELS),
    polling("unicorn", 8, 250.0, UNICORN_CHANNELS),
    polling("notion1", 13, 250.0, NOTION_CHANNELS),
    polling("notion2", 14, 250.0, NOTION_CHANNELS),
    polling("freeeeg32", 17, 512.0, FREEEEG32_CHANNELS),
    polling("crown", 23, 256.0, CROWN_CHANNELS),
    streaming("muse2016"),
    streaming("muse2"),
    streaming("museS"),
];

/// Find the catalog entry for an identifier
pub fn lookup(identifier: &str) -> Result<&'static DeviceSpec> {
    CATALOG
        .iter()
        .find(|spec| spec.identifier == identifier)
        .ok_or_else(|| DeviceError::UnknownDevice(identifier.to_string()))
}

/// Resolve which backend drives a device
pub fn resolve(identifier: &str) -> Result<BackendKind> {
    lookup(identifier).map(|spec| spec.kind)
}

/// Identifiers of all supported devices, in catalog order
pub fn supported_devices() -> impl Iterator<Item = &'static str> {
    CATALOG.iter().map(|spec| spec.identifier)
}
