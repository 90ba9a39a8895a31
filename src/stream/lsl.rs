//! Lab Streaming Layer discovery
//!
//! Headset bridges such as muselsl or BlueMuse publish an LSL stream of type
//! `EEG` per connected headset. With the `lsl-support` feature enabled,
//! [`LslScanner`] resolves those streams as peripherals and [`LslLink`]
//! pulls their samples, so the streaming backend can republish them on the
//! bus like any other headset.
//!
//! Bridges encode the headset address in the stream's source id (muselsl
//! uses `Muse<MAC>`); [`peripheral_address`] recovers it so MAC hints keep
//! working.

/// Headset address carried by a bridge's source id
///
/// Strips a leading `Muse` prefix when what follows looks like a MAC or a
/// platform device id; otherwise the source id is returned unchanged.
pub fn peripheral_address(source_id: &str) -> &str {
    match source_id.strip_prefix("Muse") {
        Some(rest) if rest.len() >= 12 && rest.contains(|c| c == ':' || c == '-') => rest,
        _ => source_id,
    }
}

/// Channel labels from a stream's XML description
///
/// Falls back to `Ch1..ChN` when the description does not label every
/// channel.
pub fn channel_labels_from_xml(xml: &str, channel_count: usize) -> Vec<String> {
    let labels: Vec<String> = xml
        .split("<label>")
        .skip(1)
        .filter_map(|rest| rest.split_once("</label>"))
        .map(|(label, _)| label.trim().to_string())
        .collect();

    if labels.len() == channel_count {
        labels
    } else {
        (1..=channel_count).map(|i| format!("Ch{}", i)).collect()
    }
}

#[cfg(feature = "lsl")]
pub use self::bridge::{LslLink, LslScanner};

#[cfg(feature = "lsl")]
mod bridge {
    use super::{channel_labels_from_xml, peripheral_address};
    use crate::error::{DeviceError, Result};
    use crate::stream::{PeripheralInfo, PeripheralLink, PeripheralScanner};
    use ::lsl::{Pullable, StreamInfo, StreamInlet};
    use std::time::Duration;

    /// Seconds of samples LSL buffers for a slow reader
    const INLET_BUFFER_SECS: i32 = 360;
    /// How long `connect` may spend re-resolving the chosen stream
    const CONNECT_TIMEOUT_SECS: f64 = 2.0;

    /// Resolves LSL streams of one type as peripherals
    #[derive(Debug, Clone)]
    pub struct LslScanner {
        stream_type: String,
    }

    impl LslScanner {
        pub fn new(stream_type: impl Into<String>) -> Self {
            Self {
                stream_type: stream_type.into(),
            }
        }
    }

    impl Default for LslScanner {
        fn default() -> Self {
            Self::new("EEG")
        }
    }

    impl PeripheralScanner for LslScanner {
        fn scan(&self, window: Duration) -> Result<Vec<PeripheralInfo>> {
            let streams =
                ::lsl::resolve_byprop("type", &self.stream_type, 1, window.as_secs_f64())
                    .map_err(|e| DeviceError::Connection(format!("LSL resolve failed: {:?}", e)))?;

            Ok(streams
                .iter()
                .map(|info| {
                    PeripheralInfo::new(info.stream_name(), peripheral_address(&info.source_id()))
                })
                .collect())
        }

        fn connect(&self, peripheral: &PeripheralInfo) -> Result<Box<dyn PeripheralLink>> {
            let streams = ::lsl::resolve_byprop("type", &self.stream_type, 1, CONNECT_TIMEOUT_SECS)
                .map_err(|e| DeviceError::Connection(format!("LSL resolve failed: {:?}", e)))?;
            let info = streams
                .into_iter()
                .find(|info| peripheral_address(&info.source_id()) == peripheral.address)
                .ok_or_else(|| DeviceError::DeviceNotFound(peripheral.address.clone()))?;

            tracing::info!(
                "Opening LSL stream '{}' ({})",
                info.stream_name(),
                info.source_id()
            );
            LslLink::open(&info).map(|link| Box::new(link) as Box<dyn PeripheralLink>)
        }
    }

    /// Pulls float samples from one LSL stream
    pub struct LslLink {
        inlet: StreamInlet,
        channel_labels: Vec<String>,
        sample_rate: f64,
    }

    impl LslLink {
        pub fn open(info: &StreamInfo) -> Result<Self> {
            let channel_count = usize::try_from(info.channel_count()).unwrap_or(0);
            let channel_labels = match info.to_xml() {
                Ok(xml) => channel_labels_from_xml(&xml, channel_count),
                Err(_) => channel_labels_from_xml("", channel_count),
            };
            let inlet = StreamInlet::new(info, INLET_BUFFER_SECS, 0, true).map_err(|e| {
                DeviceError::Connection(format!("Failed to open LSL inlet: {:?}", e))
            })?;

            Ok(Self {
                inlet,
                channel_labels,
                sample_rate: info.nominal_srate(),
            })
        }
    }

    impl PeripheralLink for LslLink {
        fn channel_labels(&self) -> Vec<String> {
            self.channel_labels.clone()
        }

        fn sample_rate(&self) -> f64 {
            self.sample_rate
        }

        fn read_chunk(&mut self, timeout: Duration) -> Result<Vec<Vec<f32>>> {
            let lost =
                |e: ::lsl::Error| DeviceError::StreamLost(format!("LSL pull failed: {:?}", e));

            let (first, _): (Vec<f32>, f64) =
                self.inlet.pull_sample(timeout.as_secs_f64()).map_err(lost)?;
            if first.is_empty() {
                return Ok(Vec::new());
            }
            let (rest, _): (Vec<Vec<f32>>, Vec<f64>) = self.inlet.pull_chunk().map_err(lost)?;

            let mut chunk = Vec::with_capacity(rest.len() + 1);
            chunk.push(first);
            chunk.extend(rest);
            Ok(chunk)
        }

        fn disconnect(&mut self) {
            self.inlet.close_stream();
        }
    }
}
