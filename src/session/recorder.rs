//! Session recorder for capturing streamed sessions
//!
//! [`SessionRecorder`] accumulates samples and markers and produces the
//! merged [`SessionTable`]. [`spawn_recorder`] runs one on a background
//! thread subscribed to the sample and marker streams of a bus.

use std::path::PathBuf;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender};

use crate::backend::StopHandle;
use crate::error::{DeviceError, Result};
use crate::stream::{Inlet, StreamBus, StreamQuery, StreamSample, TaskEvent, TaskKind};
use crate::types::{MarkerEvent, NO_EVENT};

use super::table::SessionTable;
use super::types::{RecordedSession, SessionMetadata, SessionState};

/// How long the recorder thread waits on shutdown between drains
const POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Session recorder for capturing streamed sessions
#[derive(Debug)]
pub struct SessionRecorder {
    /// Current recording state
    state: SessionState,
    /// Start time of recording
    start_time: Option<Instant>,
    metadata: Option<SessionMetadata>,
    /// Samples recorded so far (stim column filled on finish)
    table: SessionTable,
    markers: Vec<MarkerEvent>,
    /// Stop accepting data after this long
    duration: Option<Duration>,
}

impl SessionRecorder {
    /// Create a new session recorder for the given channels
    pub fn new(channel_names: Vec<String>) -> Self {
        Self {
            state: SessionState::Idle,
            start_time: None,
            metadata: None,
            table: SessionTable::new(channel_names),
            markers: Vec::new(),
            duration: None,
        }
    }

    /// Get current state
    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Check if recording
    pub fn is_recording(&self) -> bool {
        self.state.is_recording()
    }

    /// Start a new recording
    pub fn start_recording(&mut self, metadata: SessionMetadata) {
        self.duration = metadata.requested_duration;
        self.metadata = Some(metadata);
        self.table = SessionTable::new(self.table.channel_names().to_vec());
        self.markers.clear();
        self.start_time = Some(Instant::now());
        self.state = SessionState::Recording;
    }

    /// Record one sample
    pub fn record_sample(&mut self, sample: &StreamSample) {
        if !self.is_recording() {
            return;
        }
        let width = self.table.channel_names().len();
        let mut values: Vec<f64> = sample.values.iter().map(|&v| f64::from(v)).collect();
        values.resize(width, 0.0);
        self.table.push_row(sample.timestamp, values, NO_EVENT);
    }

    /// Record one marker
    pub fn record_marker(&mut self, marker: MarkerEvent) {
        if self.is_recording() {
            self.markers.push(marker);
        }
    }

    /// Whether the requested duration has elapsed
    pub fn is_expired(&self) -> bool {
        match (self.start_time, self.duration) {
            (Some(start), Some(limit)) => start.elapsed() >= limit,
            _ => false,
        }
    }

    /// Stop recording
    pub fn stop_recording(&mut self) {
        if self.state == SessionState::Recording {
            self.state = SessionState::Stopped;
        }
    }

    /// Get recording duration
    pub fn recording_duration(&self) -> Duration {
        self.start_time
            .map(|t| t.elapsed())
            .unwrap_or(Duration::ZERO)
    }

    pub fn sample_count(&self) -> usize {
        self.table.len()
    }

    pub fn marker_count(&self) -> usize {
        self.markers.len()
    }

    /// Merge markers into the table and save it
    pub fn finish(&mut self, destination: Option<PathBuf>) -> RecordedSession {
        self.stop_recording();
        let mut metadata = self
            .metadata
            .take()
            .unwrap_or_else(|| SessionMetadata::new("unknown", 0.0));
        metadata.duration = self.recording_duration();

        let fresh = SessionTable::new(self.table.channel_names().to_vec());
        let mut table = std::mem::replace(&mut self.table, fresh);
        let placed = table.merge_markers(&self.markers);
        if placed < self.markers.len() {
            tracing::warn!(
                "{} markers could not be placed (no samples recorded)",
                self.markers.len() - placed
            );
        }
        self.markers.clear();
        self.start_time = None;
        self.state = SessionState::Idle;

        RecordedSession::finalize(metadata, table, destination)
    }
}

/// Everything the recorder thread needs
#[derive(Debug, Clone)]
pub struct RecorderTask {
    pub bus: StreamBus,
    pub sample_query: StreamQuery,
    pub marker_query: StreamQuery,
    pub inlet_capacity: usize,
    /// How long to wait for both streams to appear
    pub resolve_timeout: Duration,
    pub destination: PathBuf,
    pub metadata: SessionMetadata,
}

/// Spawn the recorder thread
///
/// The thread returns the recorded session once it stops, which happens
/// when the shutdown channel disconnects, the requested duration elapses,
/// or the sample stream closes.
pub fn spawn_recorder(
    task: RecorderTask,
    shutdown: Receiver<()>,
    events: Sender<TaskEvent>,
) -> Result<JoinHandle<Option<RecordedSession>>> {
    std::thread::Builder::new()
        .name("session-recorder".to_string())
        .spawn(move || {
            let session = run_recorder(task, &shutdown, &events);
            let _ = events.send(TaskEvent::Exited(TaskKind::Recorder));
            session
        })
        .map_err(|e| DeviceError::Channel(format!("Failed to spawn recorder: {}", e)))
}

fn run_recorder(
    task: RecorderTask,
    shutdown: &Receiver<()>,
    events: &Sender<TaskEvent>,
) -> Option<RecordedSession> {
    let never = StopHandle::new();
    let inlets = task
        .bus
        .resolve_inlet::<StreamSample>(
            &task.sample_query,
            task.inlet_capacity,
            task.resolve_timeout,
            &never,
        )
        .and_then(|samples| {
            task.bus
                .resolve_inlet::<MarkerEvent>(
                    &task.marker_query,
                    task.inlet_capacity,
                    task.resolve_timeout,
                    &never,
                )
                .map(|markers| (samples, markers))
        });
    let (samples, markers) = match inlets {
        Ok(inlets) => inlets,
        Err(e) => {
            tracing::error!("Recorder could not subscribe: {}", e);
            let _ = events.send(TaskEvent::Failed {
                task: TaskKind::Recorder,
                message: e.to_string(),
            });
            return None;
        }
    };

    let mut recorder = SessionRecorder::new(samples.info().channel_labels.clone());
    recorder.start_recording(task.metadata);
    tracing::info!("Recording to {:?}", task.destination);
    let _ = events.send(TaskEvent::Ready(TaskKind::Recorder));

    loop {
        let sample_closed = drain(&mut recorder, &samples, &markers);
        if recorder.is_expired() {
            tracing::info!("Requested recording duration reached");
            break;
        }
        if sample_closed {
            tracing::warn!("Sample stream closed while recording");
            break;
        }
        match shutdown.recv_timeout(POLL_INTERVAL) {
            Err(RecvTimeoutError::Timeout) => continue,
            _ => break,
        }
    }

    // Pick up anything that arrived while shutting down
    drain(&mut recorder, &samples, &markers);
    tracing::debug!(
        "Recorder captured {} samples and {} markers",
        recorder.sample_count(),
        recorder.marker_count()
    );
    Some(recorder.finish(Some(task.destination)))
}

/// Move everything queued into the recorder; true if the sample stream closed
fn drain(
    recorder: &mut SessionRecorder,
    samples: &Inlet<StreamSample>,
    markers: &Inlet<MarkerEvent>,
) -> bool {
    let (batch, closed) = samples.pull_chunk(usize::MAX);
    for sample in &batch {
        recorder.record_sample(sample);
    }
    let (marks, _) = markers.pull_chunk(usize::MAX);
    for marker in marks {
        recorder.record_marker(marker);
    }
    closed
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stream::StreamInfo;
    use crossbeam_channel::{bounded, unbounded};

    fn labels() -> Vec<String> {
        vec!["AF7".into(), "AF8".into()]
    }

    #[test]
    fn test_recorder_lifecycle() {
        let mut recorder = SessionRecorder::new(labels());
        assert_eq!(recorder.state(), SessionState::Idle);

        recorder.start_recording(SessionMetadata::new("museS", 256.0));
        assert!(recorder.is_recording());

        recorder.stop_recording();
        assert_eq!(recorder.state(), SessionState::Stopped);
        assert!(!recorder.is_recording());
    }

    #[test]
    fn test_ignores_data_when_idle() {
        let mut recorder = SessionRecorder::new(labels());
        recorder.record_sample(&StreamSample::new(1.0, vec![1.0, 2.0]));
        recorder.record_marker(MarkerEvent::new(1, 1.0));
        assert_eq!(recorder.sample_count(), 0);
        assert_eq!(recorder.marker_count(), 0);
    }

    #[test]
    fn test_finish_merges_markers() {
        let mut recorder = SessionRecorder::new(labels());
        recorder.start_recording(SessionMetadata::new("museS", 256.0));
        for i in 0..10 {
            recorder.record_sample(&StreamSample::new(100.0 + i as f64 * 0.1, vec![0.0, 1.0]));
        }
        recorder.record_marker(MarkerEvent::new(2, 100.31));
        recorder.record_marker(MarkerEvent::new(1, 100.69));

        let session = recorder.finish(None);
        assert_eq!(session.table.len(), 10);
        assert_eq!(session.table.stim()[3], 2);
        assert_eq!(session.table.stim()[7], 1);
        assert_eq!(session.metadata.total_markers, 2);
        assert_eq!(recorder.state(), SessionState::Idle);
    }

    #[test]
    fn test_expiry() {
        let mut recorder = SessionRecorder::new(labels());
        recorder.start_recording(
            SessionMetadata::new("museS", 256.0).with_requested_duration(Some(Duration::ZERO)),
        );
        assert!(recorder.is_expired());
    }

    #[test]
    fn test_recorder_thread_writes_csv() {
        let dir = tempfile::tempdir().unwrap();
        let destination = dir.path().join("session.csv");
        let bus = StreamBus::new();
        let sample_outlet =
            bus.create_outlet::<StreamSample>(StreamInfo::new("Muse", "EEG", labels(), 256.0, "m"));
        let marker_outlet =
            bus.create_outlet::<MarkerEvent>(StreamInfo::new("Markers", "Markers", vec!["m".into()], 0.0, "k"));

        let (shutdown_tx, shutdown_rx) = bounded::<()>(0);
        let (events_tx, events_rx) = unbounded();
        let handle = spawn_recorder(
            RecorderTask {
                bus: bus.clone(),
                sample_query: StreamQuery::by_type("EEG"),
                marker_query: StreamQuery::by_name("Markers"),
                inlet_capacity: 1024,
                resolve_timeout: Duration::from_secs(1),
                destination: destination.clone(),
                metadata: SessionMetadata::new("museS", 256.0),
            },
            shutdown_rx,
            events_tx,
        )
        .unwrap();

        assert_eq!(
            events_rx.recv_timeout(Duration::from_secs(1)).unwrap(),
            TaskEvent::Ready(TaskKind::Recorder)
        );
        for i in 0..5 {
            sample_outlet.push(StreamSample::new(10.0 + i as f64, vec![1.0, 2.0]));
        }
        marker_outlet.push(MarkerEvent::new(7, 12.1));
        std::thread::sleep(Duration::from_millis(30));
        drop(shutdown_tx);

        let session = handle.join().unwrap().unwrap();
        assert!(session.is_saved());
        assert_eq!(session.table.stim(), &[0, 0, 7, 0, 0]);
        let loaded = SessionTable::read_csv(&destination).unwrap();
        assert_eq!(loaded.len(), 5);
        assert_eq!(
            events_rx.recv_timeout(Duration::from_secs(1)).unwrap(),
            TaskEvent::Exited(TaskKind::Recorder)
        );
    }

    #[test]
    fn test_recorder_fails_without_streams() {
        let dir = tempfile::tempdir().unwrap();
        let (_shutdown_tx, shutdown_rx) = bounded::<()>(0);
        let (events_tx, events_rx) = unbounded();
        let handle = spawn_recorder(
            RecorderTask {
                bus: StreamBus::new(),
                sample_query: StreamQuery::by_type("EEG"),
                marker_query: StreamQuery::by_name("Markers"),
                inlet_capacity: 16,
                resolve_timeout: Duration::from_millis(20),
                destination: dir.path().join("never.csv"),
                metadata: SessionMetadata::new("museS", 256.0),
            },
            shutdown_rx,
            events_tx,
        )
        .unwrap();

        assert!(handle.join().unwrap().is_none());
        let events: Vec<_> = events_rx.try_iter().collect();
        assert!(matches!(events[0], TaskEvent::Failed { task: TaskKind::Recorder, .. }));
        assert_eq!(events[1], TaskEvent::Exited(TaskKind::Recorder));
    }
}
