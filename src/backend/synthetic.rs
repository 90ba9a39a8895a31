//! Synthetic board implementation
//!
//! A simulated polling board for running sessions without hardware. Samples
//! are generated lazily from the wall clock at the nominal sample rate, so
//! the board behaves like a real buffered device: the longer you wait, the
//! more data is available.
//!
//! # Signal patterns
//!
//! Each EEG channel follows a [`SignalPattern`]:
//!
//! - [`SignalPattern::Constant`] - Fixed value
//! - [`SignalPattern::Sine`] - Sinusoid with configurable frequency/amplitude
//! - [`SignalPattern::Square`] - Square wave alternating between +/- amplitude
//! - [`SignalPattern::Triangle`] - Triangle wave
//!
//! The default montage gives channel `i` a sine at `8 + i` Hz so channels are
//! distinguishable in plots.
//!
//! # Markers
//!
//! Inserted markers queue up and are attached one per sample to the next
//! samples generated after the insertion, the same way a hardware board
//! writes its marker channel.

use crate::error::{DeviceError, Result};
use crate::types::{unix_time, ConnectionHints, NO_EVENT};
use std::collections::VecDeque;
use std::time::Instant;

use super::board::{BoardData, BoardDriver, BoardLayout, BoardStats, SampleRing};

/// Pattern for generating synthetic channel data
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum SignalPattern {
    /// Constant value
    Constant(f64),
    /// Sine wave with frequency and amplitude
    Sine {
        frequency: f64,
        amplitude: f64,
        offset: f64,
    },
    /// Square wave
    Square { period: f64, amplitude: f64 },
    /// Triangle wave
    Triangle { period: f64, amplitude: f64 },
}

impl Default for SignalPattern {
    fn default() -> Self {
        SignalPattern::Sine {
            frequency: 10.0,
            amplitude: 20.0,
            offset: 0.0,
        }
    }
}

impl SignalPattern {
    /// Value of the pattern at `t` seconds
    pub fn value_at(&self, t: f64) -> f64 {
        match *self {
            SignalPattern::Constant(v) => v,
            SignalPattern::Sine {
                frequency,
                amplitude,
                offset,
            } => offset + amplitude * (2.0 * std::f64::consts::PI * frequency * t).sin(),
            SignalPattern::Square { period, amplitude } => {
                if t % period < period / 2.0 {
                    amplitude
                } else {
                    -amplitude
                }
            }
            SignalPattern::Triangle { period, amplitude } => {
                let t = t % period;
                let half = period / 2.0;
                if t < half {
                    amplitude * (2.0 * t / half - 1.0)
                } else {
                    amplitude * (1.0 - 2.0 * (t - half) / half)
                }
            }
        }
    }
}

/// Xorshift noise source, seeded per board
#[derive(Debug, Clone)]
struct Noise(u64);

impl Noise {
    fn next_unit(&mut self) -> f64 {
        let mut s = self.0;
        s ^= s << 13;
        s ^= s >> 7;
        s ^= s << 17;
        self.0 = s;
        (s as f64) / (u64::MAX as f64)
    }

    /// Uniform value in `[-amplitude, amplitude]`
    fn sample(&mut self, amplitude: f64) -> f64 {
        (self.next_unit() - 0.5) * 2.0 * amplitude
    }
}

/// Clock-paced simulated board
pub struct SyntheticBoard {
    layout: BoardLayout,
    patterns: Vec<SignalPattern>,
    noise_amplitude: f64,
    noise: Noise,
    /// Connection failure to report from `prepare_session`
    connect_failure: Option<String>,
    prepared: bool,
    /// Stream start as (monotonic, unix) pair
    stream_origin: Option<(Instant, f64)>,
    /// Samples generated since the stream started
    generated: u64,
    ring: SampleRing,
    pending_markers: VecDeque<f64>,
    stats: BoardStats,
}

impl SyntheticBoard {
    /// Create a synthetic board with `eeg_count` channels at `sample_rate` Hz
    pub fn new(eeg_count: usize, sample_rate: f64) -> Self {
        let layout = BoardLayout::standard(eeg_count, sample_rate);
        let patterns = (0..eeg_count)
            .map(|i| SignalPattern::Sine {
                frequency: 8.0 + i as f64,
                amplitude: 20.0,
                offset: 0.0,
            })
            .collect();
        let ring = SampleRing::new(layout.num_rows, 1);

        Self {
            layout,
            patterns,
            noise_amplitude: 2.0,
            noise: Noise(0x2545_F491_4F6C_DD1D),
            connect_failure: None,
            prepared: false,
            stream_origin: None,
            generated: 0,
            ring,
            pending_markers: VecDeque::new(),
            stats: BoardStats::default(),
        }
    }

    /// Use the same pattern on every channel
    pub fn with_pattern(mut self, pattern: SignalPattern) -> Self {
        self.patterns.iter_mut().for_each(|p| *p = pattern);
        self
    }

    /// Set the pattern of one channel
    pub fn with_channel_pattern(mut self, channel: usize, pattern: SignalPattern) -> Self {
        if let Some(p) = self.patterns.get_mut(channel) {
            *p = pattern;
        }
        self
    }

    /// Set the noise amplitude (0.0 = no noise)
    pub fn with_noise(mut self, amplitude: f64) -> Self {
        self.noise_amplitude = amplitude;
        self
    }

    /// Make `prepare_session` fail as if the transport could not be opened
    pub fn with_connect_failure(mut self, message: impl Into<String>) -> Self {
        self.connect_failure = Some(message.into());
        self
    }

    /// Markers inserted but not yet attached to a sample
    pub fn pending_markers(&self) -> usize {
        self.pending_markers.len()
    }

    fn is_streaming(&self) -> bool {
        self.stream_origin.is_some()
    }

    /// Generate every sample that is due by now
    fn catch_up(&mut self) {
        let Some((origin, _)) = self.stream_origin else {
            return;
        };
        let due = (origin.elapsed().as_secs_f64() * self.layout.sample_rate).floor() as u64;
        while self.generated < due {
            self.generate_next();
        }
    }

    /// Produce one sample per marker still waiting, ahead of the clock
    fn flush_markers(&mut self) {
        if !self.pending_markers.is_empty() {
            tracing::debug!(
                "Flushing {} pending markers onto final samples",
                self.pending_markers.len()
            );
        }
        while !self.pending_markers.is_empty() && self.is_streaming() {
            self.generate_next();
        }
    }

    fn generate_next(&mut self) {
        let Some((_, unix_origin)) = self.stream_origin else {
            return;
        };
        let t = self.generated as f64 / self.layout.sample_rate;
        let mut eeg = Vec::with_capacity(self.patterns.len());
        for pattern in &self.patterns {
            eeg.push(pattern.value_at(t) + self.noise.sample(self.noise_amplitude));
        }
        let marker = self
            .pending_markers
            .pop_front()
            .unwrap_or(f64::from(NO_EVENT));
        let timestamp = unix_origin + t;
        let row = self
            .layout
            .row((self.generated % 256) as f64, &eeg, timestamp, marker);

        let dropped = self.ring.push(row);
        self.stats.record_sample(timestamp, dropped);
        self.generated += 1;
    }
}

impl BoardDriver for SyntheticBoard {
    fn prepare_session(&mut self, _hints: &ConnectionHints) -> Result<()> {
        if let Some(message) = &self.connect_failure {
            return Err(DeviceError::Connection(message.clone()));
        }
        self.prepared = true;
        tracing::debug!(
            "Synthetic board prepared ({} channels @ {} Hz)",
            self.layout.eeg_channels.len(),
            self.layout.sample_rate
        );
        Ok(())
    }

    fn release_session(&mut self) {
        if self.is_streaming() {
            let _ = self.stop_stream();
        }
        self.prepared = false;
        self.ring.clear();
        self.pending_markers.clear();
    }

    fn is_prepared(&self) -> bool {
        self.prepared
    }

    fn start_stream(&mut self, buffer_size: usize) -> Result<()> {
        if !self.prepared {
            return Err(DeviceError::Board(
                "Synthetic board session is not prepared".to_string(),
            ));
        }
        self.ring = SampleRing::new(self.layout.num_rows, buffer_size);
        self.stats.reset();
        self.generated = 0;
        self.stream_origin = Some((Instant::now(), unix_time()));
        Ok(())
    }

    fn stop_stream(&mut self) -> Result<()> {
        self.catch_up();
        self.flush_markers();
        self.stream_origin = None;
        Ok(())
    }

    fn insert_marker(&mut self, value: f64) -> Result<()> {
        if !self.is_streaming() {
            return Err(DeviceError::Board(
                "Cannot insert a marker while the stream is stopped".to_string(),
            ));
        }
        // Samples already due belong before the marker
        self.catch_up();
        self.pending_markers.push_back(value);
        self.stats.record_marker();
        Ok(())
    }

    fn current_board_data(&mut self, n: usize) -> Result<BoardData> {
        self.catch_up();
        Ok(self.ring.latest(n))
    }

    fn board_data(&mut self) -> Result<BoardData> {
        self.catch_up();
        Ok(self.ring.drain())
    }

    fn layout(&self) -> BoardLayout {
        self.layout.clone()
    }

    fn stats(&self) -> BoardStats {
        self.stats.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread::sleep;
    use std::time::Duration;

    fn streaming_board() -> SyntheticBoard {
        let mut board = SyntheticBoard::new(4, 500.0).with_noise(0.0);
        board.prepare_session(&ConnectionHints::default()).unwrap();
        board.start_stream(10_000).unwrap();
        board
    }

    #[test]
    fn test_patterns() {
        assert_eq!(SignalPattern::Constant(3.0).value_at(12.0), 3.0);
        let square = SignalPattern::Square {
            period: 1.0,
            amplitude: 2.0,
        };
        assert_eq!(square.value_at(0.25), 2.0);
        assert_eq!(square.value_at(0.75), -2.0);
        let triangle = SignalPattern::Triangle {
            period: 2.0,
            amplitude: 1.0,
        };
        assert!((triangle.value_at(0.0) + 1.0).abs() < 1e-12);
        assert!((triangle.value_at(1.0) - 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_connect_failure() {
        let mut board = SyntheticBoard::new(4, 250.0).with_connect_failure("no dongle");
        let err = board.prepare_session(&ConnectionHints::default()).unwrap_err();
        assert!(matches!(err, DeviceError::Connection(_)));
        assert!(!board.is_prepared());
    }

    #[test]
    fn test_start_requires_prepare() {
        let mut board = SyntheticBoard::new(4, 250.0);
        assert!(board.start_stream(100).is_err());
    }

    #[test]
    fn test_samples_accumulate_with_time() {
        let mut board = streaming_board();
        sleep(Duration::from_millis(60));
        let data = board.current_board_data(1_000).unwrap();
        assert!(data.num_samples() >= 20, "got {}", data.num_samples());

        let layout = board.layout();
        let timestamps = data.row(layout.timestamp_channel);
        assert!(timestamps.windows(2).all(|w| w[1] > w[0]));
    }

    #[test]
    fn test_markers_attach_to_following_samples() {
        let mut board = streaming_board();
        sleep(Duration::from_millis(10));
        board.insert_marker(7.0).unwrap();
        board.insert_marker(7.0).unwrap();
        sleep(Duration::from_millis(20));

        let data = board.board_data().unwrap();
        let markers = data.row(board.layout().marker_channel);
        assert_eq!(markers.iter().filter(|&&m| m == 7.0).count(), 2);
        assert_eq!(board.pending_markers(), 0);
        assert_eq!(board.stats().markers_inserted, 2);
    }

    #[test]
    fn test_stop_flushes_pending_markers() {
        let mut board = SyntheticBoard::new(4, 250.0).with_noise(0.0);
        board.prepare_session(&ConnectionHints::default()).unwrap();
        board.start_stream(1_000).unwrap();
        for _ in 0..3 {
            board.insert_marker(7.0).unwrap();
        }
        board.stop_stream().unwrap();

        assert_eq!(board.pending_markers(), 0);
        let data = board.board_data().unwrap();
        let markers = data.row(board.layout().marker_channel);
        assert_eq!(markers.iter().filter(|&&m| m == 7.0).count(), 3);
        let timestamps = data.row(board.layout().timestamp_channel);
        assert!(timestamps.windows(2).all(|w| w[1] > w[0]));
    }

    #[test]
    fn test_constant_pattern_without_noise() {
        let mut board = SyntheticBoard::new(2, 500.0)
            .with_noise(0.0)
            .with_pattern(SignalPattern::Constant(5.0));
        board.prepare_session(&ConnectionHints::default()).unwrap();
        board.start_stream(100).unwrap();
        sleep(Duration::from_millis(20));

        let data = board.current_board_data(4).unwrap();
        let layout = board.layout();
        for i in 0..data.num_samples() {
            assert_eq!(data.sample(i, &layout.eeg_channels), vec![5.0, 5.0]);
        }
    }

    #[test]
    fn test_release_clears_buffer() {
        let mut board = streaming_board();
        sleep(Duration::from_millis(10));
        board.release_session();
        assert!(!board.is_prepared());
        assert!(board.board_data().unwrap().is_empty());
    }
}
