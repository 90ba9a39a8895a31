//! Device facade
//!
//! [`Device`] is the one object experiment code talks to. It resolves the
//! identifier against the catalog once, builds the matching backend and
//! dispatches every operation to it.
//!
//! # Example
//!
//! ```ignore
//! use eegbridge_rs::{unix_time, Device};
//!
//! let mut device = Device::new("museS")?;
//! device.start(Some("session.csv".as_ref()), None)?;
//! device.push_sample(1, Some(unix_time()))?;
//! let window = device.get_recent(256)?;
//! device.stop();
//! ```

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use crate::backend::{
    AcquisitionBackend, BoardFactory, DefaultBoardFactory, InletPolicy, PollingBackend,
    StopHandle, StreamingBackend,
};
use crate::config::AcquisitionConfig;
use crate::devices;
use crate::error::Result;
use crate::session::RecordedSession;
use crate::stream::{default_scanner, PeripheralScanner, StreamBus};
use crate::types::{BackendKind, ConnectionHints, DeviceDescriptor, RecentWindow};

/// An EEG device behind a uniform operation set
pub struct Device {
    descriptor: DeviceDescriptor,
    backend: Box<dyn AcquisitionBackend>,
    stop_handle: StopHandle,
}

impl std::fmt::Debug for Device {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Device")
            .field("descriptor", &self.descriptor)
            .field("active", &self.backend.is_active())
            .finish()
    }
}

impl Device {
    /// Device with default hints and configuration
    ///
    /// Fails with `UnknownDevice` for identifiers outside the catalog.
    pub fn new(identifier: &str) -> Result<Self> {
        Self::builder(identifier).build()
    }

    pub fn with_hints(identifier: &str, hints: ConnectionHints) -> Result<Self> {
        Self::builder(identifier).hints(hints).build()
    }

    pub fn builder(identifier: &str) -> DeviceBuilder {
        DeviceBuilder::new(identifier)
    }

    /// Open a recording session
    ///
    /// The session table is written to `destination` on [`stop`](Self::stop).
    pub fn start(&mut self, destination: Option<&Path>, duration: Option<Duration>) -> Result<()> {
        self.stop_handle.arm();
        self.backend.start(destination, duration)
    }

    /// Inject a marker
    ///
    /// Polling boards stamp the marker themselves and ignore `timestamp`;
    /// streaming devices require it.
    pub fn push_sample(&mut self, marker: i32, timestamp: Option<f64>) -> Result<()> {
        self.backend.push_sample(marker, timestamp)
    }

    /// Tear the session down. Safe in any state.
    pub fn stop(&mut self) {
        self.backend.stop();
    }

    /// Up to `n` most recent samples, reusing the existing subscription
    pub fn get_recent(&mut self, n: usize) -> Result<RecentWindow> {
        self.get_recent_with(n, InletPolicy::Reuse)
    }

    pub fn get_recent_with(&mut self, n: usize, policy: InletPolicy) -> Result<RecentWindow> {
        self.stop_handle.arm();
        self.backend.get_recent(n, policy)
    }

    pub fn descriptor(&self) -> &DeviceDescriptor {
        &self.descriptor
    }

    pub fn kind(&self) -> BackendKind {
        self.descriptor.kind()
    }

    pub fn channel_names(&self) -> &[String] {
        self.descriptor.channel_names()
    }

    pub fn sample_rate(&self) -> f64 {
        self.descriptor.sample_rate()
    }

    pub fn is_active(&self) -> bool {
        self.backend.is_active()
    }

    /// Wait for the background tasks of a streaming session
    pub fn wait_until_ready(&mut self, timeout: Duration) -> Result<bool> {
        self.backend.wait_until_ready(timeout)
    }

    /// Outcome of the last stopped session
    pub fn last_session(&self) -> Option<&RecordedSession> {
        self.backend.last_session()
    }

    /// Handle for cancelling an in-flight discovery or `get_recent` from
    /// another thread
    pub fn stop_handle(&self) -> StopHandle {
        self.stop_handle.clone()
    }
}

impl Drop for Device {
    fn drop(&mut self) {
        self.backend.stop();
    }
}

/// Builder for [`Device`] with injectable collaborators
pub struct DeviceBuilder {
    identifier: String,
    hints: ConnectionHints,
    config: AcquisitionConfig,
    board_factory: Option<Arc<dyn BoardFactory>>,
    scanner: Option<Arc<dyn PeripheralScanner>>,
    bus: Option<StreamBus>,
}

impl DeviceBuilder {
    pub fn new(identifier: impl Into<String>) -> Self {
        Self {
            identifier: identifier.into(),
            hints: ConnectionHints::default(),
            config: AcquisitionConfig::default(),
            board_factory: None,
            scanner: None,
            bus: None,
        }
    }

    pub fn hints(mut self, hints: ConnectionHints) -> Self {
        self.hints = hints;
        self
    }

    pub fn config(mut self, config: AcquisitionConfig) -> Self {
        self.config = config;
        self
    }

    /// Factory used by polling devices (defaults to the built-in drivers)
    pub fn board_factory(mut self, factory: Arc<dyn BoardFactory>) -> Self {
        self.board_factory = Some(factory);
        self
    }

    /// Scanner used by streaming devices (defaults to [`default_scanner`])
    pub fn scanner(mut self, scanner: Arc<dyn PeripheralScanner>) -> Self {
        self.scanner = Some(scanner);
        self
    }

    /// Bus used by streaming devices (defaults to the process-wide bus)
    pub fn bus(mut self, bus: StreamBus) -> Self {
        self.bus = Some(bus);
        self
    }

    pub fn build(self) -> Result<Device> {
        let spec = devices::lookup(&self.identifier)?;
        let descriptor = spec.describe(self.hints);
        let stop_handle = StopHandle::new();
        let scanner = self
            .scanner
            .unwrap_or_else(|| default_scanner(&self.config.streaming));

        let backend: Box<dyn AcquisitionBackend> = match descriptor.kind() {
            BackendKind::Polling => Box::new(PollingBackend::new(
                descriptor.clone(),
                self.config.polling,
                self.board_factory
                    .unwrap_or_else(|| Arc::new(DefaultBoardFactory)),
            )),
            BackendKind::Streaming => Box::new(StreamingBackend::new(
                descriptor.clone(),
                self.config.streaming,
                scanner,
                self.bus.unwrap_or_else(StreamBus::global),
                stop_handle.clone(),
            )),
        };

        tracing::debug!(
            "Device '{}' resolved to {} backend ({} channels @ {} Hz)",
            descriptor.identifier(),
            descriptor.kind(),
            descriptor.channel_count(),
            descriptor.sample_rate()
        );

        Ok(Device {
            descriptor,
            backend,
            stop_handle,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::DeviceError;

    #[test]
    fn test_unknown_device() {
        assert!(matches!(
            Device::new("muse3000"),
            Err(DeviceError::UnknownDevice(_))
        ));
        assert!(matches!(
            Device::new("MUSES"),
            Err(DeviceError::UnknownDevice(_))
        ));
    }

    #[test]
    fn test_metadata_from_catalog() {
        let device = Device::new("museS").unwrap();
        assert_eq!(device.kind(), BackendKind::Streaming);
        assert_eq!(device.sample_rate(), 256.0);
        assert_eq!(device.channel_names().len(), 5);
        assert!(!device.is_active());

        let device = Device::with_hints("cyton", ConnectionHints::serial("/dev/ttyUSB0")).unwrap();
        assert_eq!(device.kind(), BackendKind::Polling);
        assert_eq!(
            device.descriptor().hints().serial_port.as_deref(),
            Some("/dev/ttyUSB0")
        );
    }

    #[test]
    fn test_stop_before_start_is_noop() {
        let mut device = Device::new("cyton").unwrap();
        device.stop();
        device.stop();
        assert!(!device.is_active());
        assert!(device.last_session().is_none());
    }

    #[test]
    fn test_push_sample_before_start() {
        for id in ["cyton", "museS"] {
            let mut device = Device::new(id).unwrap();
            assert!(matches!(
                device.push_sample(7, Some(1.0)),
                Err(DeviceError::NotStarted(_))
            ));
        }
    }

    #[test]
    fn test_cancelled_discovery() {
        let mut config = AcquisitionConfig::default();
        config.streaming.discovery_timeout_ms = 10_000;
        let mut device = Device::builder("muse2")
            .config(config)
            .bus(StreamBus::new())
            .build()
            .unwrap();

        let handle = device.stop_handle();
        let canceller = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(150));
            handle.cancel();
        });
        let begun = std::time::Instant::now();
        let err = device.start(None, None).unwrap_err();
        canceller.join().unwrap();

        assert!(matches!(err, DeviceError::Cancelled(_)));
        assert!(begun.elapsed() < Duration::from_secs(5));
    }
}
