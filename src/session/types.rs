//! Session data types

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use super::table::SessionTable;

/// State of a session recorder
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SessionState {
    /// No active session
    #[default]
    Idle,
    /// Currently recording a session
    Recording,
    /// Session recorded, table available
    Stopped,
}

impl SessionState {
    /// Check if currently recording
    pub fn is_recording(&self) -> bool {
        matches!(self, SessionState::Recording)
    }

    /// Check if has recorded data
    pub fn has_recording(&self) -> bool {
        !matches!(self, SessionState::Idle)
    }

    /// Display name for the state
    pub fn display_name(&self) -> &'static str {
        match self {
            SessionState::Idle => "Idle",
            SessionState::Recording => "Recording",
            SessionState::Stopped => "Stopped",
        }
    }
}

/// Metadata for a recorded session
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionMetadata {
    /// Device identifier the session was recorded from
    pub device: String,
    /// When the session was started
    pub recorded_at: chrono::DateTime<chrono::Utc>,
    /// Wall time between start and stop
    pub duration: Duration,
    /// Duration requested at start, if any
    pub requested_duration: Option<Duration>,
    /// Nominal sample rate (Hz)
    pub sample_rate: f64,
    /// Number of sample rows
    pub total_samples: usize,
    /// Number of markers placed in the stim column
    pub total_markers: usize,
}

impl SessionMetadata {
    /// Create new metadata for a device
    pub fn new(device: impl Into<String>, sample_rate: f64) -> Self {
        Self {
            device: device.into(),
            recorded_at: chrono::Utc::now(),
            duration: Duration::ZERO,
            requested_duration: None,
            sample_rate,
            total_samples: 0,
            total_markers: 0,
        }
    }

    /// Set the requested duration
    pub fn with_requested_duration(mut self, duration: Option<Duration>) -> Self {
        self.requested_duration = duration;
        self
    }
}

/// Outcome of a stopped session
///
/// Retained by the backend after `stop` so callers can inspect what was
/// (or failed to be) written.
#[derive(Debug, Clone)]
pub struct RecordedSession {
    pub metadata: SessionMetadata,
    pub table: SessionTable,
    /// Where the table was written
    pub destination: Option<PathBuf>,
    /// Why writing failed, if it did
    pub save_error: Option<String>,
}

impl RecordedSession {
    /// Build the outcome and write the table if a destination is set
    ///
    /// Save failures are logged and retained, never returned.
    pub fn finalize(
        mut metadata: SessionMetadata,
        table: SessionTable,
        destination: Option<PathBuf>,
    ) -> Self {
        metadata.total_samples = table.len();
        metadata.total_markers = table.marker_codes().len();

        let save_error = destination.as_ref().and_then(|path| {
            match table.write_csv(path) {
                Ok(()) => {
                    tracing::info!("Saved {} samples to {:?}", table.len(), path);
                    None
                }
                Err(e) => {
                    tracing::warn!("Failed to save session to {:?}: {}", path, e);
                    Some(e.to_string())
                }
            }
        });

        Self {
            metadata,
            table,
            destination,
            save_error,
        }
    }

    /// Whether the table reached its destination
    pub fn is_saved(&self) -> bool {
        self.destination.is_some() && self.save_error.is_none()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::NO_EVENT;

    fn small_table() -> SessionTable {
        let mut table = SessionTable::new(vec!["Fz".into()]);
        table.push_row(1.0, vec![0.5], NO_EVENT);
        table.push_row(2.0, vec![0.25], 3);
        table
    }

    #[test]
    fn test_session_state() {
        assert!(SessionState::Recording.is_recording());
        assert!(SessionState::Stopped.has_recording());
        assert!(!SessionState::Idle.has_recording());
        assert_eq!(SessionState::Stopped.display_name(), "Stopped");
    }

    #[test]
    fn test_finalize_without_destination() {
        let session = RecordedSession::finalize(
            SessionMetadata::new("synthetic", 256.0),
            small_table(),
            None,
        );
        assert!(!session.is_saved());
        assert!(session.save_error.is_none());
        assert_eq!(session.metadata.total_samples, 2);
        assert_eq!(session.metadata.total_markers, 1);
    }

    #[test]
    fn test_finalize_records_save_error() {
        let dir = tempfile::tempdir().unwrap();
        // A directory cannot be opened as a file
        let session = RecordedSession::finalize(
            SessionMetadata::new("synthetic", 256.0),
            small_table(),
            Some(dir.path().to_path_buf()),
        );
        assert!(session.save_error.is_some());
        assert!(!session.is_saved());
    }

    #[test]
    fn test_metadata_serializes() {
        let metadata = SessionMetadata::new("museS", 256.0)
            .with_requested_duration(Some(Duration::from_secs(120)));
        let json = serde_json::to_string(&metadata).unwrap();
        assert!(json.contains("\"device\":\"museS\""));
    }
}
