//! Integration tests for the polling lifecycle
//!
//! These tests validate the complete board workflow through the facade:
//! - Session open, marker injection and teardown
//! - Recent-window retrieval while acquiring
//! - Connection failures and misuse before start

mod common;

use common::builders::TestDeviceBuilder;
use common::let_it_run;
use common::mock_helpers::{missing_driver_factory, unreachable_factory};
use eegbridge_rs::{BackendKind, Device, DeviceError, SessionTable, NO_EVENT};
use serial_test::serial;
use std::time::Duration;

#[test]
#[serial]
fn test_cyton_three_markers() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("cyton.csv");
    let mut device = TestDeviceBuilder::new("cyton").build();
    assert_eq!(device.kind(), BackendKind::Polling);

    device.start(Some(&path), None).unwrap();
    assert!(device.is_active());
    for _ in 0..3 {
        let_it_run(30);
        device.push_sample(7, None).unwrap();
    }
    let_it_run(50);
    device.stop();
    assert!(!device.is_active());

    let table = SessionTable::read_csv(&path).unwrap();
    assert_eq!(table.channel_names().len(), 8);
    let stim = table.stim();
    assert_eq!(stim.iter().filter(|&&s| s == 7).count(), 3);
    assert_eq!(
        stim.iter().filter(|&&s| s == NO_EVENT).count(),
        stim.len() - 3
    );
}

#[test]
#[serial]
fn test_cyton_markers_right_before_stop() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("cyton_burst.csv");
    let mut device = TestDeviceBuilder::new("cyton").build();

    device.start(Some(&path), None).unwrap();
    for _ in 0..3 {
        device.push_sample(7, None).unwrap();
    }
    device.stop();

    let table = SessionTable::read_csv(&path).unwrap();
    assert_eq!(table.stim().iter().filter(|&&s| s == 7).count(), 3);
}

#[test]
#[serial]
fn test_stop_twice_is_identical() {
    let mut device = TestDeviceBuilder::new("cyton").build();
    device.start(None, None).unwrap();
    let_it_run(40);
    device.stop();

    let first = device.last_session().unwrap().table.clone();
    device.stop();
    let second = &device.last_session().unwrap().table;
    assert_eq!(&first, second);
    assert!(!device.is_active());
}

#[test]
#[serial]
fn test_restart_after_stop() {
    let mut device = TestDeviceBuilder::new("ganglion").build();
    device.start(None, None).unwrap();
    assert!(matches!(
        device.start(None, None),
        Err(DeviceError::AlreadyStarted)
    ));
    device.stop();
    device.start(None, None).unwrap();
    device.stop();
}

#[test]
fn test_operations_before_start() {
    let mut device = TestDeviceBuilder::new("cyton").build();
    assert!(matches!(
        device.push_sample(7, None),
        Err(DeviceError::NotStarted(_))
    ));
    assert!(matches!(
        device.get_recent(10),
        Err(DeviceError::NotStarted(_))
    ));
    device.stop();
    assert!(device.last_session().is_none());
}

#[test]
#[serial]
fn test_get_recent_bounds() {
    let mut device = TestDeviceBuilder::new("cyton").build();
    device.start(None, None).unwrap();
    let_it_run(100);

    // About 25 samples exist; asking for more returns what is there
    let everything = device.get_recent(10_000).unwrap();
    assert!(!everything.is_empty());
    assert!(everything.len() < 10_000);
    assert_eq!(everything.channel_names, device.channel_names());
    assert_eq!(everything.sample_rate, 250.0);

    let few = device.get_recent(4).unwrap();
    assert_eq!(few.len(), 4);
    assert!(few.timestamps.windows(2).all(|w| w[0] < w[1]));

    // Not consumed: the full buffer is still there
    let again = device.get_recent(10_000).unwrap();
    assert!(again.len() >= everything.len());
    device.stop();
    assert!(device.last_session().unwrap().table.len() >= again.len());
}

#[test]
fn test_connection_failure_on_prepare() {
    let mut device = Device::builder("cyton")
        .board_factory(unreachable_factory("dongle unplugged"))
        .build()
        .unwrap();
    let err = device.start(None, None).unwrap_err();
    assert!(matches!(err, DeviceError::Connection(_)));
    assert!(err.to_string().contains("cyton"));
    assert!(err.to_string().contains("dongle unplugged"));
    assert!(!device.is_active());
}

#[test]
fn test_connection_failure_from_factory() {
    let mut device = Device::builder("unicorn")
        .board_factory(missing_driver_factory())
        .build()
        .unwrap();
    assert!(matches!(
        device.start(None, None),
        Err(DeviceError::Connection(_))
    ));
}

#[test]
fn test_board_without_driver() {
    let mut device = Device::new("freeeeg32").unwrap();
    match device.start(None, None) {
        Err(DeviceError::Connection(msg)) => assert!(msg.contains("freeeeg32")),
        other => panic!("expected connection error, got {:?}", other),
    }
}

#[test]
#[serial]
fn test_unwritable_destination_is_retained() {
    let dir = tempfile::tempdir().unwrap();
    let mut device = TestDeviceBuilder::new("synthetic").build();
    device.start(Some(dir.path()), Some(Duration::from_secs(5))).unwrap();
    let_it_run(20);
    device.stop();

    let session = device.last_session().unwrap();
    assert!(!session.is_saved());
    assert!(session.save_error.is_some());
    assert!(!session.table.is_empty());
}
