//! Mock construction helpers

use eegbridge_rs::backend::{BoardDriver, SyntheticBoard};
use eegbridge_rs::config::PollingConfig;
use eegbridge_rs::stream::SimulatedScanner;
use eegbridge_rs::{BoardFactory, DeviceDescriptor, DeviceError, Result};
use std::sync::Arc;
use std::time::Duration;

pub const MUSE_NAME: &str = "MuseS-3C4D";
pub const MUSE_ADDRESS: &str = "00:55:DA:B3:3C:4D";

/// Factory standing in for real hardware: a noise-free synthetic board
/// shaped like the requested device
pub fn synthetic_factory() -> Arc<dyn BoardFactory> {
    Arc::new(
        |descriptor: &DeviceDescriptor, _: &PollingConfig| -> Result<Box<dyn BoardDriver>> {
            Ok(Box::new(
                SyntheticBoard::new(descriptor.channel_count(), descriptor.sample_rate())
                    .with_noise(0.0),
            ))
        },
    )
}

/// Factory whose boards refuse to connect
pub fn unreachable_factory(reason: &'static str) -> Arc<dyn BoardFactory> {
    Arc::new(
        move |descriptor: &DeviceDescriptor, _: &PollingConfig| -> Result<Box<dyn BoardDriver>> {
            Ok(Box::new(
                SyntheticBoard::new(descriptor.channel_count(), descriptor.sample_rate())
                    .with_connect_failure(reason),
            ))
        },
    )
}

/// Factory that fails before any board exists
pub fn missing_driver_factory() -> Arc<dyn BoardFactory> {
    Arc::new(
        |descriptor: &DeviceDescriptor, _: &PollingConfig| -> Result<Box<dyn BoardDriver>> {
            Err(DeviceError::Connection(format!(
                "{} is not plugged in",
                descriptor.identifier()
            )))
        },
    )
}

pub fn simulated_muse() -> SimulatedScanner {
    SimulatedScanner::muse(MUSE_NAME, MUSE_ADDRESS)
}

/// Headset that drops its link shortly after connecting
pub fn flaky_muse(after: Duration) -> SimulatedScanner {
    simulated_muse().disconnect_after(after)
}
