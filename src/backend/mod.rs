//! Acquisition backends
//!
//! This module holds the two acquisition paradigms behind one trait:
//!
//! - [`PollingBackend`] - Drives a [`BoardDriver`] that buffers samples
//!   internally and answers synchronous "latest samples" queries
//! - [`StreamingBackend`] - Discovers a peripheral, republishes its samples on
//!   the [`StreamBus`](crate::stream::StreamBus) from a publisher thread and
//!   records them from a recorder thread
//!
//! # Components
//!
//! - [`AcquisitionBackend`] - Operation set dispatched by the device facade
//! - [`BoardFactory`] - Creates board drivers for polling devices
//! - [`SyntheticBoard`] / [`CytonBoard`] - Built-in board drivers
//! - [`StopHandle`] - Cross-thread cancellation of discovery and `get_recent`
//!
//! # Example
//!
//! ```ignore
//! use eegbridge_rs::backend::{AcquisitionBackend, InletPolicy};
//!
//! fn snapshot(backend: &mut dyn AcquisitionBackend) -> eegbridge_rs::Result<usize> {
//!     Ok(backend.get_recent(256, InletPolicy::Reuse)?.len())
//! }
//! ```

pub mod board;
pub mod cyton;
pub mod polling;
pub mod streaming;
pub mod synthetic;

pub use board::{BoardData, BoardDriver, BoardLayout, BoardStats, SampleRing};
pub use cyton::{CytonBoard, CytonPacket, DaisyPairer, PacketDecoder};
pub use polling::PollingBackend;
pub use streaming::{StreamState, StreamingBackend};
pub use synthetic::{SignalPattern, SyntheticBoard};

use crate::config::PollingConfig;
use crate::error::{DeviceError, Result};
use crate::session::RecordedSession;
use crate::types::{BackendKind, DeviceDescriptor, Operation, RecentWindow};
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// How `get_recent` treats the backend's sample subscription
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum InletPolicy {
    /// Keep using the existing subscription (and its buffered samples)
    #[default]
    Reuse,
    /// Drop the existing subscription and resolve a fresh one
    Reconnect,
}

/// Cancellation flag shared with other threads
///
/// `cancel` aborts whatever discovery or `get_recent` call is in flight on
/// the owning device; that call returns [`DeviceError::Cancelled`]. Each new
/// operation re-arms the handle, so a cancellation never outlives the call
/// it was aimed at.
#[derive(Debug, Clone, Default)]
pub struct StopHandle {
    cancelled: Arc<AtomicBool>,
}

impl StopHandle {
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation of the in-flight operation
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    /// Clear any stale request before a new operation
    pub(crate) fn arm(&self) {
        self.cancelled.store(false, Ordering::SeqCst);
    }

    /// Error out if cancellation was requested
    pub(crate) fn check(&self, what: &str) -> Result<()> {
        if self.is_cancelled() {
            Err(DeviceError::Cancelled(what.to_string()))
        } else {
            Ok(())
        }
    }
}

/// Operation set shared by both acquisition paradigms
///
/// Backends may decline an operation with
/// [`DeviceError::UnsupportedOperation`]; the default implementations do
/// exactly that.
pub trait AcquisitionBackend: Send {
    /// Which paradigm this backend implements
    fn kind(&self) -> BackendKind;

    /// Open a recording session
    ///
    /// # Arguments
    /// * `destination` - Where to write the session table on stop (optional)
    /// * `duration` - Requested recording length (optional)
    fn start(&mut self, destination: Option<&Path>, duration: Option<Duration>) -> Result<()>;

    /// Inject an event marker
    fn push_sample(&mut self, marker: i32, timestamp: Option<f64>) -> Result<()> {
        let _ = (marker, timestamp);
        Err(DeviceError::UnsupportedOperation {
            backend: self.kind(),
            operation: Operation::PushSample,
        })
    }

    /// Tear the session down; safe in any state and idempotent
    fn stop(&mut self);

    /// Copy of up to `n` most recent samples
    fn get_recent(&mut self, n: usize, policy: InletPolicy) -> Result<RecentWindow> {
        let _ = (n, policy);
        Err(DeviceError::UnsupportedOperation {
            backend: self.kind(),
            operation: Operation::GetRecent,
        })
    }

    /// Whether a recording session is open
    fn is_active(&self) -> bool;

    /// Wait until background tasks acknowledged readiness
    ///
    /// Returns `Ok(false)` on timeout.
    fn wait_until_ready(&mut self, timeout: Duration) -> Result<bool> {
        let _ = timeout;
        Ok(self.is_active())
    }

    /// Table produced by the last stopped session
    fn last_session(&self) -> Option<&RecordedSession>;
}

/// Creates board drivers for polling devices
pub trait BoardFactory: Send + Sync {
    fn create(
        &self,
        descriptor: &DeviceDescriptor,
        config: &PollingConfig,
    ) -> Result<Box<dyn BoardDriver>>;
}

impl<F> BoardFactory for F
where
    F: Fn(&DeviceDescriptor, &PollingConfig) -> Result<Box<dyn BoardDriver>> + Send + Sync,
{
    fn create(
        &self,
        descriptor: &DeviceDescriptor,
        config: &PollingConfig,
    ) -> Result<Box<dyn BoardDriver>> {
        self(descriptor, config)
    }
}

/// Factory for the drivers that ship with the crate
///
/// `synthetic` gets a [`SyntheticBoard`], `cyton` and `cyton_daisy` get a
/// [`CytonBoard`]. Every other board fails with a connection error naming
/// the board, since no native transport exists for it.
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultBoardFactory;

impl BoardFactory for DefaultBoardFactory {
    fn create(
        &self,
        descriptor: &DeviceDescriptor,
        config: &PollingConfig,
    ) -> Result<Box<dyn BoardDriver>> {
        match descriptor.identifier() {
            "synthetic" => Ok(Box::new(SyntheticBoard::new(
                descriptor.channel_count(),
                descriptor.sample_rate(),
            ))),
            "cyton" => Ok(Box::new(CytonBoard::new(config.clone()))),
            "cyton_daisy" => Ok(Box::new(CytonBoard::daisy(config.clone()))),
            other => Err(DeviceError::Connection(format!(
                "No native driver for board '{}' (board id {:?})",
                other,
                descriptor.board_id()
            ))),
        }
    }
}
