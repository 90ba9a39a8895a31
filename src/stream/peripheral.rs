//! Peripheral discovery and links
//!
//! Streaming headsets are found by a [`PeripheralScanner`] and read through a
//! [`PeripheralLink`]. [`default_scanner`] picks the production path: LSL
//! stream discovery when the `lsl-support` feature is enabled, otherwise
//! [`NullScanner`], which never finds anything. [`SimulatedScanner`]
//! produces a Muse-like headset for demos and tests.

use crate::config::StreamingConfig;
use crate::error::{DeviceError, Result};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// An advertising peripheral
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeripheralInfo {
    pub name: String,
    /// Hardware (MAC) address
    pub address: String,
}

impl PeripheralInfo {
    pub fn new(name: impl Into<String>, address: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            address: address.into(),
        }
    }
}

/// Finds and connects to advertising peripherals
pub trait PeripheralScanner: Send + Sync {
    /// Scan for up to `window`, returning whatever was seen
    fn scan(&self, window: Duration) -> Result<Vec<PeripheralInfo>>;

    /// Open a link to a discovered peripheral
    fn connect(&self, peripheral: &PeripheralInfo) -> Result<Box<dyn PeripheralLink>>;
}

/// Live connection to a streaming peripheral
pub trait PeripheralLink: Send {
    /// Channel labels in sample order
    fn channel_labels(&self) -> Vec<String>;

    /// Nominal sample rate in Hz
    fn sample_rate(&self) -> f64;

    /// Wait up to `timeout` for the next chunk of samples
    ///
    /// An empty chunk means nothing arrived in time. An error means the
    /// link is gone.
    fn read_chunk(&mut self, timeout: Duration) -> Result<Vec<Vec<f32>>>;

    /// Close the link
    fn disconnect(&mut self);
}

/// Scanner used when a device is built without one
#[cfg(feature = "lsl")]
pub fn default_scanner(config: &StreamingConfig) -> Arc<dyn PeripheralScanner> {
    Arc::new(super::LslScanner::new(config.eeg_stream_type.clone()))
}

/// Scanner used when a device is built without one
#[cfg(not(feature = "lsl"))]
pub fn default_scanner(_config: &StreamingConfig) -> Arc<dyn PeripheralScanner> {
    tracing::debug!("Built without `lsl-support`, streaming devices cannot be discovered");
    Arc::new(NullScanner)
}

/// Scanner that never finds a peripheral
#[derive(Debug, Clone, Copy, Default)]
pub struct NullScanner;

impl PeripheralScanner for NullScanner {
    fn scan(&self, window: Duration) -> Result<Vec<PeripheralInfo>> {
        std::thread::sleep(window);
        Ok(Vec::new())
    }

    fn connect(&self, peripheral: &PeripheralInfo) -> Result<Box<dyn PeripheralLink>> {
        Err(DeviceError::DeviceNotFound(peripheral.name.clone()))
    }
}

/// Scanner producing one simulated headset
#[derive(Debug, Clone)]
pub struct SimulatedScanner {
    info: PeripheralInfo,
    created: Instant,
    appear_after: Duration,
    disconnect_after: Option<Duration>,
    sample_rate: f64,
    channel_labels: Vec<String>,
    chunk_len: usize,
    silent: bool,
}

impl SimulatedScanner {
    /// A Muse-like headset: 5 channels at 256 Hz, 12-sample chunks
    pub fn muse(name: impl Into<String>, address: impl Into<String>) -> Self {
        Self {
            info: PeripheralInfo::new(name, address),
            created: Instant::now(),
            appear_after: Duration::ZERO,
            disconnect_after: None,
            sample_rate: 256.0,
            channel_labels: ["TP9", "AF7", "AF8", "TP10", "Right AUX"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
            chunk_len: 12,
            silent: false,
        }
    }

    /// Only advertise once this much time has passed since creation
    pub fn appear_after(mut self, delay: Duration) -> Self {
        self.appear_after = delay;
        self
    }

    /// Drop the link this long after connecting
    pub fn disconnect_after(mut self, delay: Duration) -> Self {
        self.disconnect_after = Some(delay);
        self
    }

    pub fn with_sample_rate(mut self, sample_rate: f64) -> Self {
        self.sample_rate = sample_rate;
        self
    }

    /// Connect normally but never deliver a sample
    pub fn silent(mut self) -> Self {
        self.silent = true;
        self
    }

    pub fn info(&self) -> &PeripheralInfo {
        &self.info
    }
}

impl PeripheralScanner for SimulatedScanner {
    fn scan(&self, window: Duration) -> Result<Vec<PeripheralInfo>> {
        let visible_at = self.created + self.appear_after;
        let now = Instant::now();
        if now >= visible_at {
            return Ok(vec![self.info.clone()]);
        }
        std::thread::sleep(window.min(visible_at - now));
        if Instant::now() >= visible_at {
            Ok(vec![self.info.clone()])
        } else {
            Ok(Vec::new())
        }
    }

    fn connect(&self, peripheral: &PeripheralInfo) -> Result<Box<dyn PeripheralLink>> {
        if *peripheral != self.info {
            return Err(DeviceError::DeviceNotFound(peripheral.address.clone()));
        }
        tracing::info!("Connected to simulated peripheral {}", peripheral.address);
        let mut link = SimulatedPeripheral::new(
            self.channel_labels.clone(),
            self.sample_rate,
            self.chunk_len,
            self.disconnect_after,
        );
        link.silent = self.silent;
        Ok(Box::new(link))
    }
}

/// Clock-paced simulated headset link
#[derive(Debug)]
pub struct SimulatedPeripheral {
    channel_labels: Vec<String>,
    sample_rate: f64,
    chunk_len: usize,
    connected_at: Instant,
    disconnect_after: Option<Duration>,
    produced: u64,
    connected: bool,
    silent: bool,
}

impl SimulatedPeripheral {
    pub fn new(
        channel_labels: Vec<String>,
        sample_rate: f64,
        chunk_len: usize,
        disconnect_after: Option<Duration>,
    ) -> Self {
        Self {
            channel_labels,
            sample_rate,
            chunk_len: chunk_len.max(1),
            connected_at: Instant::now(),
            disconnect_after,
            produced: 0,
            connected: true,
            silent: false,
        }
    }

    fn sample(&self, index: u64) -> Vec<f32> {
        let t = index as f64 / self.sample_rate;
        (0..self.channel_labels.len())
            .map(|ch| {
                let freq = 10.0 + ch as f64;
                (50.0 * (2.0 * std::f64::consts::PI * freq * t).sin()) as f32
            })
            .collect()
    }
}

impl PeripheralLink for SimulatedPeripheral {
    fn channel_labels(&self) -> Vec<String> {
        self.channel_labels.clone()
    }

    fn sample_rate(&self) -> f64 {
        self.sample_rate
    }

    fn read_chunk(&mut self, timeout: Duration) -> Result<Vec<Vec<f32>>> {
        if !self.connected {
            return Err(DeviceError::StreamLost("Peripheral link closed".to_string()));
        }
        if let Some(limit) = self.disconnect_after {
            if self.connected_at.elapsed() >= limit {
                self.connected = false;
                return Err(DeviceError::StreamLost(
                    "Peripheral stopped responding".to_string(),
                ));
            }
        }

        if self.silent {
            std::thread::sleep(timeout);
            return Ok(Vec::new());
        }

        // Wait until a full chunk is due, bounded by the timeout
        let chunk_end = self.produced + self.chunk_len as u64;
        let due_at = self.connected_at + Duration::from_secs_f64(chunk_end as f64 / self.sample_rate);
        let now = Instant::now();
        if due_at > now {
            let wait = due_at - now;
            if wait > timeout {
                std::thread::sleep(timeout);
                return Ok(Vec::new());
            }
            std::thread::sleep(wait);
        }

        let chunk = (self.produced..chunk_end).map(|i| self.sample(i)).collect();
        self.produced = chunk_end;
        Ok(chunk)
    }

    fn disconnect(&mut self) {
        self.connected = false;
    }
}
