//! # eegbridge-rs: EEG device abstraction
//!
//! One operation set (`start`, `push_sample`, `stop`, `get_recent`) over two
//! kinds of EEG hardware:
//!
//! - **Polling boards** (OpenBCI-style) buffer samples internally and answer
//!   synchronous "latest samples" queries. Markers land in the board's own
//!   marker channel.
//! - **Streaming headsets** (Muse-style) are discovered over a scanner, their
//!   samples republished on an in-process stream bus by a publisher thread
//!   and recorded by a recorder thread. Markers travel on their own stream
//!   and are merged into the recording by nearest timestamp.
//!
//! ## Architecture
//!
//! - **Devices**: Static catalog mapping identifiers to backend kinds
//! - **Backend**: `PollingBackend` and `StreamingBackend` behind the
//!   `AcquisitionBackend` trait
//! - **Stream**: Named, typed, multi-consumer channels with drop-oldest queues
//! - **Session**: Recording, marker merge and CSV persistence
//! - **Communication**: Crossbeam channels between the caller and background threads
//!
//! ## Configuration
//!
//! Settings are loaded from TOML (`AcquisitionConfig`). Recordings default to
//! the platform data directory under `dev.hxyulin.eegbridge-rs`:
//!
//! - **Linux**: `~/.local/share/dev.hxyulin.eegbridge-rs/data/`
//! - **macOS**: `~/Library/Application Support/dev.hxyulin.eegbridge-rs/data/`
//! - **Windows**: `%APPDATA%\dev.hxyulin.eegbridge-rs\data\`
//!
//! ## Example
//!
//! ```ignore
//! use eegbridge_rs::{unix_time, Device};
//! use std::time::Duration;
//!
//! fn main() -> eegbridge_rs::Result<()> {
//!     let mut device = Device::new("cyton")?;
//!     device.start(Some("cyton.csv".as_ref()), Some(Duration::from_secs(60)))?;
//!     for _ in 0..3 {
//!         device.push_sample(7, Some(unix_time()))?;
//!     }
//!     let window = device.get_recent(250)?;
//!     println!("{} samples over {:.2}s", window.len(), window.span_secs());
//!     device.stop();
//!     Ok(())
//! }
//! ```

pub mod backend;
pub mod config;
pub mod device;
pub mod devices;
pub mod error;
pub mod session;
pub mod stream;
pub mod types;

// Re-export commonly used types
pub use backend::{AcquisitionBackend, BoardFactory, InletPolicy, StopHandle};
pub use config::AcquisitionConfig;
pub use device::{Device, DeviceBuilder};
pub use error::{DeviceError, Result, ResultExt};
pub use session::{RecordedSession, SessionTable};
pub use stream::{StreamBus, StreamSample};
pub use types::{
    unix_time, BackendKind, ConnectionHints, DeviceDescriptor, MarkerEvent, Operation,
    RecentWindow, NO_EVENT,
};
