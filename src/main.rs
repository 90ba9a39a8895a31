//! EEG bridge demo - Main Entry Point
//!
//! Runs a short oddball-style session against one device and logs what was
//! recorded.
//!
//! Environment:
//! - `EEGBRIDGE_DEVICE` - device identifier (default `synthetic`)
//! - `EEGBRIDGE_CONFIG` - path to a TOML configuration
//! - `EEGBRIDGE_SIMULATE=1` - use a simulated headset for streaming devices
//!   (otherwise headsets are discovered over LSL when built with `lsl-support`)

use anyhow::Context;
use eegbridge_rs::{
    config::{generate_save_path, AcquisitionConfig},
    stream::SimulatedScanner,
    unix_time, BackendKind, Device,
};
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

const TRIALS: usize = 20;
const TARGET: i32 = 2;
const NON_TARGET: i32 = 1;
const TARGET_PROBABILITY: f64 = 0.2;
const TRIAL_INTERVAL: Duration = Duration::from_millis(250);

fn main() -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,eegbridge_rs=debug")),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let identifier = std::env::var("EEGBRIDGE_DEVICE").unwrap_or_else(|_| "synthetic".to_string());
    let config = match std::env::var("EEGBRIDGE_CONFIG") {
        Ok(path) => AcquisitionConfig::load_or_default(path),
        Err(_) => AcquisitionConfig::default(),
    };
    let simulate = std::env::var("EEGBRIDGE_SIMULATE").is_ok_and(|v| v == "1");

    tracing::info!("Starting EEG bridge demo on '{}'", identifier);

    let save_path = generate_save_path(
        &config.recording.data_dir(),
        &identifier,
        "visual_p300",
        "local",
        1,
        1,
    );

    let mut builder = Device::builder(&identifier).config(config);
    if simulate {
        builder = builder.scanner(Arc::new(SimulatedScanner::muse(
            "MuseS-Simulated",
            "00:55:DA:00:00:01",
        )));
    }
    let mut device = builder
        .build()
        .with_context(|| format!("Unsupported device '{}'", identifier))?;

    device
        .start(Some(&save_path), None)
        .with_context(|| format!("Failed to start '{}'", identifier))?;

    let mut rng = Oddball::new(unix_time().to_bits());
    for trial in 0..TRIALS {
        std::thread::sleep(TRIAL_INTERVAL);
        let code = if rng.next_unit() < TARGET_PROBABILITY {
            TARGET
        } else {
            NON_TARGET
        };
        if let Err(e) = device.push_sample(code, Some(unix_time())) {
            tracing::error!("Trial {} marker rejected: {}", trial, e);
            break;
        }
    }

    match device.get_recent(device.sample_rate() as usize) {
        Ok(window) => tracing::info!(
            "Last {} samples span {:.3}s across {} channels",
            window.len(),
            window.span_secs(),
            window.channel_names.len()
        ),
        Err(e) => tracing::warn!("No recent window: {}", e),
    }

    // Let the recorder pick up the last marker's neighbourhood
    if device.kind() == BackendKind::Streaming {
        std::thread::sleep(Duration::from_millis(200));
    }

    tracing::info!("Shutting down...");
    device.stop();

    if let Some(session) = device.last_session() {
        let codes = session.table.marker_codes();
        tracing::info!(
            "Recorded {} samples with {} markers ({} targets)",
            session.table.len(),
            codes.len(),
            codes.iter().filter(|&&c| c == TARGET).count()
        );
        match (&session.destination, &session.save_error) {
            (Some(path), None) => tracing::info!("Saved to {:?}", path),
            (_, Some(err)) => tracing::warn!("Recording not saved: {}", err),
            (None, None) => {}
        }
    }

    Ok(())
}

/// Xorshift generator for the trial sequence
struct Oddball(u64);

impl Oddball {
    fn new(seed: u64) -> Self {
        Self(seed.max(1))
    }

    fn next_unit(&mut self) -> f64 {
        let mut s = self.0;
        s ^= s << 13;
        s ^= s >> 7;
        s ^= s << 17;
        self.0 = s;
        (s as f64) / (u64::MAX as f64)
    }
}
