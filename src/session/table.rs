//! Session table: the persisted output of a recording
//!
//! One row per sample with columns `timestamps`, the channel names in fixed
//! order, and `stim`. `stim` is [`NO_EVENT`] except at the rows nearest to
//! each marker's timestamp.

use crate::error::{DeviceError, Result};
use crate::types::{MarkerEvent, NO_EVENT};
use std::path::Path;

const TIMESTAMP_COLUMN: &str = "timestamps";
const STIM_COLUMN: &str = "stim";

/// Tabular recording with a marker column
#[derive(Debug, Clone, PartialEq, Default)]
pub struct SessionTable {
    channel_names: Vec<String>,
    timestamps: Vec<f64>,
    samples: Vec<Vec<f64>>,
    stim: Vec<i32>,
}

impl SessionTable {
    /// Empty table for the given channels
    pub fn new(channel_names: Vec<String>) -> Self {
        Self {
            channel_names,
            ..Default::default()
        }
    }

    /// Append one row
    pub fn push_row(&mut self, timestamp: f64, values: Vec<f64>, stim: i32) {
        debug_assert_eq!(values.len(), self.channel_names.len());
        self.timestamps.push(timestamp);
        self.samples.push(values);
        self.stim.push(stim);
    }

    pub fn channel_names(&self) -> &[String] {
        &self.channel_names
    }

    pub fn timestamps(&self) -> &[f64] {
        &self.timestamps
    }

    pub fn samples(&self) -> &[Vec<f64>] {
        &self.samples
    }

    pub fn stim(&self) -> &[i32] {
        &self.stim
    }

    pub fn len(&self) -> usize {
        self.timestamps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.timestamps.is_empty()
    }

    /// Non-zero stim values in row order
    pub fn marker_codes(&self) -> Vec<i32> {
        self.stim.iter().copied().filter(|&s| s != NO_EVENT).collect()
    }

    /// Index of the row whose timestamp is nearest to `timestamp`
    ///
    /// Rows must be in ascending timestamp order. Ties go to the earlier row.
    pub fn nearest_index(&self, timestamp: f64) -> Option<usize> {
        if self.timestamps.is_empty() {
            return None;
        }
        let upper = self.timestamps.partition_point(|&t| t < timestamp);
        if upper == 0 {
            return Some(0);
        }
        if upper == self.timestamps.len() {
            return Some(upper - 1);
        }
        let before = timestamp - self.timestamps[upper - 1];
        let after = self.timestamps[upper] - timestamp;
        Some(if after < before { upper } else { upper - 1 })
    }

    /// Write each marker's code at its nearest row
    ///
    /// A later marker landing on an already marked row overwrites it.
    /// Returns the number of markers placed (zero for an empty table).
    pub fn merge_markers(&mut self, markers: &[MarkerEvent]) -> usize {
        let mut placed = 0;
        for marker in markers {
            let Some(idx) = self.nearest_index(marker.timestamp) else {
                break;
            };
            if self.stim[idx] != NO_EVENT {
                tracing::warn!(
                    "Marker {} at {:.4} overwrites marker {} on the same sample",
                    marker.code,
                    marker.timestamp,
                    self.stim[idx]
                );
            }
            self.stim[idx] = marker.code;
            placed += 1;
        }
        placed
    }

    /// Write the table as CSV, creating parent directories as needed
    pub fn write_csv(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let mut writer = csv::Writer::from_path(path)?;
        let mut header = Vec::with_capacity(self.channel_names.len() + 2);
        header.push(TIMESTAMP_COLUMN.to_string());
        header.extend(self.channel_names.iter().cloned());
        header.push(STIM_COLUMN.to_string());
        writer.write_record(&header)?;

        let mut record = Vec::with_capacity(header.len());
        for ((timestamp, values), stim) in self.timestamps.iter().zip(&self.samples).zip(&self.stim) {
            record.clear();
            record.push(timestamp.to_string());
            record.extend(values.iter().map(|v| v.to_string()));
            record.push(stim.to_string());
            writer.write_record(&record)?;
        }

        writer.flush()?;
        Ok(())
    }

    /// Read a table previously written by [`write_csv`](Self::write_csv)
    pub fn read_csv(path: &Path) -> Result<Self> {
        let mut reader = csv::Reader::from_path(path)?;
        let headers = reader.headers()?.clone();
        let columns: Vec<&str> = headers.iter().collect();

        if columns.len() < 2
            || columns.first() != Some(&TIMESTAMP_COLUMN)
            || columns.last() != Some(&STIM_COLUMN)
        {
            return Err(DeviceError::Serialization(format!(
                "Unexpected session table header in {:?}",
                path
            )));
        }

        let channel_names = columns[1..columns.len() - 1]
            .iter()
            .map(|s| s.to_string())
            .collect();
        let mut table = Self::new(channel_names);

        for record in reader.records() {
            let record = record?;
            let parse = |field: &str| {
                field.parse::<f64>().map_err(|e| {
                    DeviceError::Serialization(format!("Bad value '{}' in {:?}: {}", field, path, e))
                })
            };
            let n = record.len();
            let timestamp = parse(&record[0])?;
            let values = (1..n - 1)
                .map(|i| parse(&record[i]))
                .collect::<Result<Vec<_>>>()?;
            let stim = parse(&record[n - 1])? as i32;
            table.push_row(timestamp, values, stim);
        }

        Ok(table)
    }
}
