//! Polling backend
//!
//! Drives a [`BoardDriver`] synchronously from the caller's thread. The board
//! buffers samples on its own; this backend opens and closes the session,
//! forwards markers into the board's marker channel and turns board data
//! into [`RecentWindow`]s and session tables.
//!
//! Stopping the stream before draining lets the board place markers that
//! are still waiting for a sample, so nothing pushed right before `stop` is
//! lost.
//!
//! # Lifecycle
//!
//! ```text
//! start  -> factory.create -> prepare_session -> start_stream
//! stop   -> stop_stream -> board_data (drain) -> release_session -> save
//! ```

use crate::config::PollingConfig;
use crate::error::{DeviceError, Result};
use crate::session::{RecordedSession, SessionMetadata, SessionTable};
use crate::types::{BackendKind, DeviceDescriptor, RecentWindow};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use super::board::{BoardData, BoardDriver, BoardLayout};
use super::{AcquisitionBackend, BoardFactory, InletPolicy};

/// An open board session
struct BoardSession {
    board: Box<dyn BoardDriver>,
    layout: BoardLayout,
    destination: Option<PathBuf>,
    metadata: SessionMetadata,
    started_at: Instant,
}

/// Backend for boards that answer synchronous queries
pub struct PollingBackend {
    descriptor: DeviceDescriptor,
    config: PollingConfig,
    factory: Arc<dyn BoardFactory>,
    session: Option<BoardSession>,
    last_session: Option<RecordedSession>,
}

impl PollingBackend {
    pub fn new(
        descriptor: DeviceDescriptor,
        config: PollingConfig,
        factory: Arc<dyn BoardFactory>,
    ) -> Self {
        Self {
            descriptor,
            config,
            factory,
            session: None,
            last_session: None,
        }
    }

    /// Build a table from a drained data block
    fn to_table(&self, data: &BoardData, layout: &BoardLayout) -> SessionTable {
        let mut table = SessionTable::new(self.descriptor.channel_names().to_vec());
        let timestamps = data.row(layout.timestamp_channel);
        let markers = data.row(layout.marker_channel);
        for i in 0..data.num_samples() {
            table.push_row(
                timestamps[i],
                eeg_values(data, layout, i, self.descriptor.channel_count()),
                markers[i].round() as i32,
            );
        }
        table
    }
}

fn not_started(descriptor: &DeviceDescriptor, what: &str) -> DeviceError {
    DeviceError::NotStarted(format!(
        "{} requires an open session on '{}'",
        what,
        descriptor.identifier()
    ))
}

/// Add context to a board failure without hiding a connection error
fn board_failure(error: DeviceError, context: String) -> DeviceError {
    match error {
        DeviceError::Connection(message) => {
            DeviceError::Connection(format!("{}: {}", context, message))
        }
        other => other.with_context(context),
    }
}

/// EEG values of one sample, padded or cut to the descriptor's montage
fn eeg_values(data: &BoardData, layout: &BoardLayout, idx: usize, channel_count: usize) -> Vec<f64> {
    let mut values = data.sample(idx, &layout.eeg_channels);
    values.resize(channel_count, 0.0);
    values
}

impl AcquisitionBackend for PollingBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Polling
    }

    fn start(&mut self, destination: Option<&Path>, duration: Option<Duration>) -> Result<()> {
        if self.session.is_some() {
            return Err(DeviceError::AlreadyStarted);
        }

        let identifier = self.descriptor.identifier().to_string();
        let mut board = self.factory.create(&self.descriptor, &self.config)?;

        board.prepare_session(self.descriptor.hints()).map_err(|e| {
            board_failure(e, format!("Failed to prepare session on '{}'", identifier))
        })?;

        if let Err(e) = board.start_stream(self.config.ring_buffer_samples) {
            board.release_session();
            return Err(board_failure(
                e,
                format!("Failed to start stream on '{}'", identifier),
            ));
        }

        let layout = board.layout();
        if layout.eeg_channels.len() != self.descriptor.channel_count() {
            tracing::warn!(
                "Board reports {} EEG channels, '{}' expects {}",
                layout.eeg_channels.len(),
                identifier,
                self.descriptor.channel_count()
            );
        }

        tracing::info!(
            "Polling session started on '{}' ({} channels @ {} Hz)",
            identifier,
            self.descriptor.channel_count(),
            layout.sample_rate
        );

        self.session = Some(BoardSession {
            board,
            layout,
            destination: destination.map(Path::to_path_buf),
            metadata: SessionMetadata::new(identifier, self.descriptor.sample_rate())
                .with_requested_duration(duration),
            started_at: Instant::now(),
        });
        Ok(())
    }

    fn push_sample(&mut self, marker: i32, timestamp: Option<f64>) -> Result<()> {
        let Some(session) = self.session.as_mut() else {
            return Err(not_started(&self.descriptor, "push_sample"));
        };
        if let Some(ts) = timestamp {
            tracing::trace!("Board stamps markers itself, ignoring timestamp {:.4}", ts);
        }
        session.board.insert_marker(f64::from(marker))
    }

    fn stop(&mut self) {
        let Some(mut session) = self.session.take() else {
            return;
        };

        if let Err(e) = session.board.stop_stream() {
            tracing::warn!("Failed to stop board stream: {}", e);
        }
        let data = match session.board.board_data() {
            Ok(data) => data,
            Err(e) => {
                tracing::warn!("Failed to drain board buffer: {}", e);
                BoardData::with_rows(session.layout.num_rows)
            }
        };
        let stats = session.board.stats();
        session.board.release_session();

        tracing::info!(
            "Polling session on '{}' stopped: {} samples, {} markers, {} dropped",
            self.descriptor.identifier(),
            data.num_samples(),
            stats.markers_inserted,
            stats.samples_dropped
        );
        if stats.markers_dropped > 0 {
            tracing::warn!(
                "{} markers on '{}' had no sample to land on",
                stats.markers_dropped,
                self.descriptor.identifier()
            );
        }

        let table = self.to_table(&data, &session.layout);
        let mut metadata = session.metadata;
        metadata.duration = session.started_at.elapsed();
        self.last_session = Some(RecordedSession::finalize(
            metadata,
            table,
            session.destination,
        ));
    }

    fn get_recent(&mut self, n: usize, _policy: InletPolicy) -> Result<RecentWindow> {
        let Some(session) = self.session.as_mut() else {
            return Err(not_started(&self.descriptor, "get_recent"));
        };
        let data = session.board.current_board_data(n)?;
        let layout = &session.layout;

        let channel_count = self.descriptor.channel_count();
        let mut window = RecentWindow::empty(
            self.descriptor.channel_names().to_vec(),
            self.descriptor.sample_rate(),
        );
        for (i, &ts) in data.row(layout.timestamp_channel).iter().enumerate() {
            window.push_row(ts, eeg_values(&data, layout, i, channel_count));
        }
        Ok(window)
    }

    fn is_active(&self) -> bool {
        self.session.is_some()
    }

    fn last_session(&self) -> Option<&RecordedSession> {
        self.last_session.as_ref()
    }
}

impl Drop for PollingBackend {
    fn drop(&mut self) {
        self.stop();
    }
}
