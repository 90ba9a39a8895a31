//! Test data builders for creating test objects

use eegbridge_rs::config::AcquisitionConfig;
use eegbridge_rs::stream::{NullScanner, PeripheralScanner, StreamBus};
use eegbridge_rs::{ConnectionHints, Device, MarkerEvent, SessionTable, NO_EVENT};
use std::sync::Arc;

use super::mock_helpers::{simulated_muse, synthetic_factory};

/// Configuration with timeouts short enough for tests
pub fn fast_config() -> AcquisitionConfig {
    let mut config = AcquisitionConfig::default();
    config.streaming.discovery_timeout_ms = 400;
    config.streaming.ready_timeout_ms = 2000;
    config.streaming.shutdown_timeout_ms = 2000;
    config.polling.ring_buffer_samples = 10_000;
    config
}

/// Builder for devices wired to simulated hardware
pub struct TestDeviceBuilder {
    identifier: String,
    hints: ConnectionHints,
    config: AcquisitionConfig,
    scanner: Arc<dyn PeripheralScanner>,
    bus: StreamBus,
}

impl TestDeviceBuilder {
    pub fn new(identifier: &str) -> Self {
        Self {
            identifier: identifier.to_string(),
            hints: ConnectionHints::default(),
            config: fast_config(),
            scanner: Arc::new(simulated_muse()),
            bus: StreamBus::new(),
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

    pub fn scanner(mut self, scanner: impl PeripheralScanner + 'static) -> Self {
        self.scanner = Arc::new(scanner);
        self
    }

    /// No headset anywhere in range
    pub fn no_peripheral(mut self) -> Self {
        self.scanner = Arc::new(NullScanner);
        self
    }

    pub fn bus(mut self, bus: &StreamBus) -> Self {
        self.bus = bus.clone();
        self
    }

    pub fn build(self) -> Device {
        Device::builder(&self.identifier)
            .hints(self.hints)
            .config(self.config)
            .board_factory(synthetic_factory())
            .scanner(self.scanner)
            .bus(self.bus)
            .build()
            .expect("identifier should be in the catalog")
    }
}

/// Table with evenly spaced rows and no markers
pub fn table_with_rows(channels: &[&str], rows: usize, rate: f64) -> SessionTable {
    let mut table = SessionTable::new(channels.iter().map(|c| c.to_string()).collect());
    for i in 0..rows {
        table.push_row(
            1_700_000_000.0 + i as f64 / rate,
            vec![i as f64; channels.len()],
            NO_EVENT,
        );
    }
    table
}

/// Markers every `every` seconds starting at the first row
pub fn markers_every(count: usize, every: f64, code: i32) -> Vec<MarkerEvent> {
    (0..count)
        .map(|i| MarkerEvent::new(code, 1_700_000_000.0 + i as f64 * every))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_table_builder() {
        let table = table_with_rows(&["AF7", "AF8"], 10, 256.0);
        assert_eq!(table.len(), 10);
        assert_eq!(table.channel_names().len(), 2);
        assert!(table.marker_codes().is_empty());
    }
}
