//! Test to verify test infrastructure works correctly

mod common;

use common::assert_float_eq;
use common::builders::{fast_config, markers_every, table_with_rows, TestDeviceBuilder};
use eegbridge_rs::config::{generate_save_path, AcquisitionConfig};
use eegbridge_rs::devices;
use eegbridge_rs::BackendKind;
use std::path::Path;
use std::time::Duration;

#[test]
fn test_infrastructure_setup() {
    // Test that builders work
    let device = TestDeviceBuilder::new("cyton_daisy").build();
    assert_eq!(device.kind(), BackendKind::Polling);
    assert_eq!(device.channel_names().len(), 16);

    let mut table = table_with_rows(&["Fz", "Cz"], 100, 100.0);
    assert_eq!(table.merge_markers(&markers_every(5, 0.2, 3)), 5);
    assert_eq!(table.marker_codes(), vec![3; 5]);
}

#[test]
fn test_every_catalog_entry_builds() {
    for id in devices::supported_devices() {
        let device = TestDeviceBuilder::new(id).build();
        assert_eq!(device.descriptor().identifier(), id);
        assert_eq!(device.kind(), devices::resolve(id).unwrap());
    }
}

#[test]
fn test_fast_config_survives_toml() {
    let config = fast_config();
    let text = toml::to_string(&config).unwrap();
    let loaded = AcquisitionConfig::from_toml_str(&text).unwrap();
    assert_eq!(loaded.streaming.discovery_timeout_ms, 400);
    assert_eq!(loaded.polling.ring_buffer_samples, 10_000);
    assert_eq!(
        loaded.streaming.recent_timeout(usize::MAX, 256.0),
        Duration::MAX
    );
}

#[test]
fn test_save_path_and_window_span() {
    let path = generate_save_path(Path::new("/tmp/eeg"), "museS", "n170", "local", 3, 1);
    assert!(path.starts_with("/tmp/eeg/n170/local/museS/subject0003/session001"));

    let mut device = TestDeviceBuilder::new("synthetic").build();
    device.start(None, None).unwrap();
    common::let_it_run(60);
    let window = device.get_recent(10).unwrap();
    device.stop();

    // Consecutive synthetic samples are exactly one period apart
    assert_eq!(window.len(), 10);
    assert_float_eq(window.span_secs(), 9.0 / window.sample_rate, 1e-5);
}
