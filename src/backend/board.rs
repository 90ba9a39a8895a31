//! BoardDriver trait for polling acquisition boards
//!
//! This module provides the common interface for every board the polling
//! backend can drive, plus the shared pieces drivers build on: the row
//! layout of a data block, a bounded sample ring and driver statistics.
//!
//! # Data layout
//!
//! Board data is channel-major: `rows[r][i]` is row `r` of sample `i`.
//! A [`BoardLayout`] names which rows hold EEG values, the timestamp and the
//! marker channel. The standard layout is
//!
//! ```text
//! row 0            package number
//! rows 1..=n       EEG channels
//! row n + 1        timestamp (unix seconds)
//! row n + 2        marker
//! ```

use crate::error::Result;
use crate::types::ConnectionHints;
use std::collections::VecDeque;

/// Size of the rolling window used for inter-sample jitter
const RECENT_WINDOW_SIZE: usize = 256;

/// Row assignment of a board's data block
#[derive(Debug, Clone, PartialEq)]
pub struct BoardLayout {
    /// Row index of each EEG channel, in montage order
    pub eeg_channels: Vec<usize>,
    /// Row holding the package/sample counter
    pub package_channel: usize,
    /// Row holding per-sample timestamps
    pub timestamp_channel: usize,
    /// Row holding inserted markers
    pub marker_channel: usize,
    /// Total number of rows per sample
    pub num_rows: usize,
    /// Nominal sample rate in Hz
    pub sample_rate: f64,
}

impl BoardLayout {
    /// Standard layout for `eeg_count` channels
    pub fn standard(eeg_count: usize, sample_rate: f64) -> Self {
        Self {
            eeg_channels: (1..=eeg_count).collect(),
            package_channel: 0,
            timestamp_channel: eeg_count + 1,
            marker_channel: eeg_count + 2,
            num_rows: eeg_count + 3,
            sample_rate,
        }
    }

    /// Build one sample row in this layout
    pub fn row(&self, package: f64, eeg: &[f64], timestamp: f64, marker: f64) -> Vec<f64> {
        let mut row = vec![0.0; self.num_rows];
        row[self.package_channel] = package;
        for (value, &idx) in eeg.iter().zip(&self.eeg_channels) {
            row[idx] = *value;
        }
        row[self.timestamp_channel] = timestamp;
        row[self.marker_channel] = marker;
        row
    }
}

/// A block of board data in channel-major order
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BoardData {
    rows: Vec<Vec<f64>>,
}

impl BoardData {
    /// An empty block with `num_rows` rows
    pub fn with_rows(num_rows: usize) -> Self {
        Self {
            rows: vec![Vec::new(); num_rows],
        }
    }

    /// Transpose sample rows (sample-major) into a block
    pub fn from_samples<'a>(num_rows: usize, samples: impl IntoIterator<Item = &'a Vec<f64>>) -> Self {
        let mut data = Self::with_rows(num_rows);
        for sample in samples {
            data.push_sample(sample);
        }
        data
    }

    /// Append one sample; extra values are ignored, missing ones are zero
    pub fn push_sample(&mut self, sample: &[f64]) {
        for (r, row) in self.rows.iter_mut().enumerate() {
            row.push(sample.get(r).copied().unwrap_or(0.0));
        }
    }

    pub fn num_rows(&self) -> usize {
        self.rows.len()
    }

    /// Number of samples (columns)
    pub fn num_samples(&self) -> usize {
        self.rows.first().map(Vec::len).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.num_samples() == 0
    }

    /// One row of the block
    pub fn row(&self, idx: usize) -> &[f64] {
        self.rows.get(idx).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Values of one sample across the given rows
    pub fn sample(&self, idx: usize, rows: &[usize]) -> Vec<f64> {
        rows.iter().map(|&r| self.rows[r][idx]).collect()
    }
}

/// Bounded ring of sample rows, oldest dropped first
#[derive(Debug)]
pub struct SampleRing {
    samples: VecDeque<Vec<f64>>,
    capacity: usize,
    num_rows: usize,
    dropped: u64,
}

impl SampleRing {
    pub fn new(num_rows: usize, capacity: usize) -> Self {
        Self {
            samples: VecDeque::new(),
            capacity: capacity.max(1),
            num_rows,
            dropped: 0,
        }
    }

    /// Push one row; returns true if the oldest row was dropped
    pub fn push(&mut self, sample: Vec<f64>) -> bool {
        let overflow = self.samples.len() >= self.capacity;
        if overflow {
            self.samples.pop_front();
            self.dropped += 1;
        }
        self.samples.push_back(sample);
        overflow
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Rows dropped because the ring was full
    pub fn dropped(&self) -> u64 {
        self.dropped
    }

    /// Copy of the most recent `n` rows without consuming them
    pub fn latest(&self, n: usize) -> BoardData {
        let skip = self.samples.len().saturating_sub(n);
        BoardData::from_samples(self.num_rows, self.samples.iter().skip(skip))
    }

    /// Remove and return every buffered row
    pub fn drain(&mut self) -> BoardData {
        let data = BoardData::from_samples(self.num_rows, self.samples.iter());
        self.samples.clear();
        data
    }

    pub fn clear(&mut self) {
        self.samples.clear();
        self.dropped = 0;
    }

    /// Write queued markers onto the newest rows that carry none yet
    ///
    /// Only the trailing run of unmarked rows is used, so markers keep their
    /// order relative to ones already attached. Returns how many were written;
    /// the rest stay in `pending`.
    pub fn attach_markers(
        &mut self,
        marker_channel: usize,
        pending: &mut VecDeque<f64>,
        no_event: f64,
    ) -> usize {
        let free = self
            .samples
            .iter()
            .rev()
            .take_while(|row| row.get(marker_channel).is_some_and(|&m| m == no_event))
            .count();
        let count = free.min(pending.len());
        let first = self.samples.len() - count;
        for row in self.samples.range_mut(first..) {
            if let Some(marker) = pending.pop_front() {
                row[marker_channel] = marker;
            }
        }
        count
    }
}

/// Statistics for board operations
#[derive(Debug, Clone, Default)]
pub struct BoardStats {
    /// Samples written into the ring
    pub samples_acquired: u64,
    /// Samples lost to ring overflow
    pub samples_dropped: u64,
    /// Malformed or out-of-sync packets discarded
    pub packets_rejected: u64,
    /// Markers inserted by the caller
    pub markers_inserted: u64,
    /// Markers that never found a sample to land on
    pub markers_dropped: u64,
    /// Unix time of the last acquired sample
    pub last_sample_time: Option<f64>,
    /// Recent inter-sample intervals in seconds
    recent_intervals: VecDeque<f64>,
}

impl BoardStats {
    /// Record an acquired sample and its timestamp
    pub fn record_sample(&mut self, timestamp: f64, dropped_oldest: bool) {
        self.samples_acquired += 1;
        if dropped_oldest {
            self.samples_dropped += 1;
        }
        if let Some(last) = self.last_sample_time {
            self.recent_intervals.push_back(timestamp - last);
            if self.recent_intervals.len() > RECENT_WINDOW_SIZE {
                self.recent_intervals.pop_front();
            }
        }
        self.last_sample_time = Some(timestamp);
    }

    pub fn record_rejected_packet(&mut self) {
        self.packets_rejected += 1;
    }

    pub fn record_marker(&mut self) {
        self.markers_inserted += 1;
    }

    pub fn record_dropped_markers(&mut self, count: usize) {
        self.markers_dropped += count as u64;
    }

    /// Effective sample rate over the recent window
    pub fn effective_rate(&self) -> f64 {
        if self.recent_intervals.is_empty() {
            return 0.0;
        }
        let mean = self.recent_intervals.iter().sum::<f64>() / self.recent_intervals.len() as f64;
        if mean > 0.0 {
            1.0 / mean
        } else {
            0.0
        }
    }

    /// Jitter (max - min interval) over the recent window in seconds
    pub fn jitter_secs(&self) -> f64 {
        let min = self.recent_intervals.iter().copied().fold(f64::INFINITY, f64::min);
        let max = self.recent_intervals.iter().copied().fold(f64::NEG_INFINITY, f64::max);
        if min.is_finite() && max.is_finite() {
            max - min
        } else {
            0.0
        }
    }

    pub fn reset(&mut self) {
        *self = Self::default();
    }
}

/// Unified interface for polling boards
///
/// Boards buffer samples internally once their stream is started and answer
/// synchronous queries for the latest data. Implementations must be `Send`
/// so a device can move between threads.
///
/// # Example
///
/// ```ignore
/// fn snapshot(board: &mut dyn BoardDriver) -> Result<BoardData> {
///     board.current_board_data(256)
/// }
/// ```
#[cfg_attr(test, mockall::automock)]
pub trait BoardDriver: Send {
    /// Open the transport and prepare a session
    fn prepare_session(&mut self, hints: &ConnectionHints) -> Result<()>;

    /// Release the session and close the transport
    ///
    /// Safe to call on an unprepared board.
    fn release_session(&mut self);

    /// Check if a session is prepared
    fn is_prepared(&self) -> bool;

    /// Start acquisition into a ring of `buffer_size` samples
    fn start_stream(&mut self, buffer_size: usize) -> Result<()>;

    /// Stop acquisition; buffered samples stay available
    fn stop_stream(&mut self) -> Result<()>;

    /// Insert a marker at the next acquired sample
    fn insert_marker(&mut self, value: f64) -> Result<()>;

    /// Copy of the most recent `n` samples without consuming them
    fn current_board_data(&mut self, n: usize) -> Result<BoardData>;

    /// Remove and return everything buffered
    fn board_data(&mut self) -> Result<BoardData>;

    /// Row layout of this board's data
    fn layout(&self) -> BoardLayout;

    /// Get board statistics
    fn stats(&self) -> BoardStats;
}
