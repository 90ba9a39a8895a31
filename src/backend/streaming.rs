//! Streaming backend
//!
//! Discovers an advertising peripheral, republishes its samples on the
//! [`StreamBus`] from a publisher thread and, when a save destination is
//! given, records the sample and marker streams from a recorder thread.
//!
//! ```text
//!  peripheral ──► publisher ──► "EEG" stream ──┬──► recorder ──► CSV
//!                                              └──► get_recent inlet
//!  push_sample ──────────────► "Markers" stream ──► recorder
//! ```
//!
//! Threads talk to the backend only through channels: a zero-capacity
//! shutdown channel (closed by dropping the sender) and an event channel
//! carrying readiness, failure and exit notifications.

use std::collections::HashSet;
use std::path::Path;
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use crossbeam_channel::{bounded, unbounded, Receiver, RecvTimeoutError, Sender};

use crate::config::StreamingConfig;
use crate::error::{DeviceError, Result};
use crate::session::{spawn_recorder, RecordedSession, RecorderTask, SessionMetadata};
use crate::stream::{
    spawn_publisher, Inlet, Outlet, PeripheralInfo, PeripheralScanner, StreamBus, StreamInfo,
    StreamQuery, StreamSample, TaskEvent, TaskKind,
};
use crate::types::{BackendKind, DeviceDescriptor, MarkerEvent, RecentWindow};

use super::{AcquisitionBackend, InletPolicy, StopHandle};

/// Length of one scan window during discovery
const SCAN_SLICE: Duration = Duration::from_millis(100);

/// Pause between scans that found nothing matching
const RESCAN_PAUSE: Duration = Duration::from_millis(10);

/// Stream type advertised by the marker outlet
const MARKER_STREAM_TYPE: &str = "Markers";

/// Lifecycle of a streaming backend
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StreamState {
    #[default]
    Uninitialized,
    /// Scanning for the peripheral
    Discovering,
    /// Publisher running, nothing being recorded
    Streaming,
    /// Publisher and recorder running
    Recording,
    /// Session torn down or peripheral lost
    Stopped,
}

impl StreamState {
    pub fn display_name(&self) -> &'static str {
        match self {
            StreamState::Uninitialized => "Uninitialized",
            StreamState::Discovering => "Discovering",
            StreamState::Streaming => "Streaming",
            StreamState::Recording => "Recording",
            StreamState::Stopped => "Stopped",
        }
    }
}

/// Handles of a running session
struct StreamSession {
    peripheral: PeripheralInfo,
    sample_query: StreamQuery,
    marker_outlet: Outlet<MarkerEvent>,
    /// Dropped to signal shutdown
    shutdown: Option<Sender<()>>,
    events: Receiver<TaskEvent>,
    publisher: Option<JoinHandle<()>>,
    recorder: Option<JoinHandle<Option<RecordedSession>>>,
    /// Tasks that have not acknowledged readiness yet
    pending_ready: HashSet<TaskKind>,
    exited: HashSet<TaskKind>,
    /// Pushed once every task is ready
    start_marker: Option<i32>,
}

impl StreamSession {
    fn is_ready(&self) -> bool {
        self.pending_ready.is_empty()
    }

    fn spawned(&self) -> Vec<TaskKind> {
        let mut tasks = Vec::with_capacity(2);
        if self.publisher.is_some() {
            tasks.push(TaskKind::Publisher);
        }
        if self.recorder.is_some() {
            tasks.push(TaskKind::Recorder);
        }
        tasks
    }

    fn all_exited(&self) -> bool {
        self.spawned().iter().all(|t| self.exited.contains(t))
    }
}

/// Backend for push-based streaming peripherals
pub struct StreamingBackend {
    descriptor: DeviceDescriptor,
    config: StreamingConfig,
    scanner: Arc<dyn PeripheralScanner>,
    bus: StreamBus,
    stop_handle: StopHandle,
    state: StreamState,
    session: Option<StreamSession>,
    /// Subscription reused across `get_recent` calls
    recent_inlet: Option<Inlet<StreamSample>>,
    /// Why the peripheral was lost, until the next stop
    lost: Option<String>,
    last_session: Option<RecordedSession>,
}

impl StreamingBackend {
    pub fn new(
        descriptor: DeviceDescriptor,
        config: StreamingConfig,
        scanner: Arc<dyn PeripheralScanner>,
        bus: StreamBus,
        stop_handle: StopHandle,
    ) -> Self {
        Self {
            descriptor,
            config,
            scanner,
            bus,
            stop_handle,
            state: StreamState::Uninitialized,
            session: None,
            recent_inlet: None,
            lost: None,
            last_session: None,
        }
    }

    pub fn state(&self) -> StreamState {
        self.state
    }

    /// Peripheral of the running session
    pub fn peripheral(&self) -> Option<&PeripheralInfo> {
        self.session.as_ref().map(|s| &s.peripheral)
    }

    /// Background tasks that have not exited yet
    pub fn running_tasks(&mut self) -> Vec<TaskKind> {
        self.pump_events();
        match &self.session {
            Some(session) => session
                .spawned()
                .into_iter()
                .filter(|t| !session.exited.contains(t))
                .collect(),
            None => Vec::new(),
        }
    }

    /// Scan until a matching peripheral shows up or the timeout runs out
    fn discover(&self) -> Result<PeripheralInfo> {
        let timeout = self.config.discovery_timeout();
        let deadline = Instant::now() + timeout;
        let wanted = self.descriptor.hints().mac_address.as_deref();

        tracing::info!(
            "Searching for '{}'{}",
            self.descriptor.identifier(),
            wanted.map(|mac| format!(" at {}", mac)).unwrap_or_default()
        );

        loop {
            self.stop_handle.check("discovery")?;
            let now = Instant::now();
            if now >= deadline {
                return Err(DeviceError::DeviceNotFound(format!(
                    "No '{}' peripheral found within {:?}",
                    self.descriptor.identifier(),
                    timeout
                )));
            }

            let found = self.scanner.scan(SCAN_SLICE.min(deadline - now))?;
            if let Some(peripheral) = found
                .into_iter()
                .find(|p| wanted.map_or(true, |mac| p.address.eq_ignore_ascii_case(mac)))
            {
                tracing::info!("Found {} ({})", peripheral.name, peripheral.address);
                return Ok(peripheral);
            }
            // Scanners that answer from a cache return immediately
            std::thread::sleep(RESCAN_PAUSE.min(deadline.saturating_duration_since(Instant::now())));
        }
    }

    /// Connect, advertise both streams and spawn the background tasks
    fn launch(
        &self,
        peripheral: PeripheralInfo,
        destination: Option<&Path>,
        duration: Option<Duration>,
    ) -> Result<StreamSession> {
        let link = self.scanner.connect(&peripheral)?;
        let sample_rate = link.sample_rate();

        let sample_info = StreamInfo::new(
            peripheral.name.clone(),
            self.config.eeg_stream_type.clone(),
            link.channel_labels(),
            sample_rate,
            peripheral.address.clone(),
        );
        let sample_query = StreamQuery::by_type(self.config.eeg_stream_type.clone())
            .with_source_id(peripheral.address.clone());
        let outlet = self.bus.create_outlet::<StreamSample>(sample_info);

        let marker_outlet = self.bus.create_outlet::<MarkerEvent>(StreamInfo::new(
            self.config.marker_stream_name.clone(),
            MARKER_STREAM_TYPE,
            vec![self.config.marker_stream_name.clone()],
            0.0,
            self.config.marker_source_id.clone(),
        ));

        let (shutdown_tx, shutdown_rx) = bounded::<()>(0);
        let (events_tx, events_rx) = unbounded();

        let publisher = spawn_publisher(link, outlet, shutdown_rx.clone(), events_tx.clone())?;

        let mut session = StreamSession {
            peripheral,
            sample_query: sample_query.clone(),
            marker_outlet,
            shutdown: Some(shutdown_tx),
            events: events_rx,
            publisher: Some(publisher),
            recorder: None,
            pending_ready: HashSet::from([TaskKind::Publisher]),
            exited: HashSet::new(),
            start_marker: self.config.session_start_marker,
        };

        if let Some(destination) = destination {
            let task = RecorderTask {
                bus: self.bus.clone(),
                sample_query,
                marker_query: StreamQuery::by_name(self.config.marker_stream_name.clone())
                    .with_source_id(self.config.marker_source_id.clone()),
                inlet_capacity: self.config.inlet_buffer_samples,
                resolve_timeout: self.config.discovery_timeout(),
                destination: destination.to_path_buf(),
                metadata: SessionMetadata::new(self.descriptor.identifier(), sample_rate)
                    .with_requested_duration(duration),
            };
            // On failure the session is dropped here, which closes the
            // shutdown channel and lets the publisher wind down.
            session.recorder = Some(spawn_recorder(task, shutdown_rx, events_tx)?);
            session.pending_ready.insert(TaskKind::Recorder);
        }

        Ok(session)
    }

    /// Apply everything the background tasks reported so far
    fn pump_events(&mut self) {
        let Some(events) = self.session.as_ref().map(|s| s.events.clone()) else {
            return;
        };
        while let Ok(event) = events.try_recv() {
            self.apply_event(event);
        }
        self.push_start_marker_if_ready();
    }

    fn apply_event(&mut self, event: TaskEvent) {
        let Some(session) = self.session.as_mut() else {
            return;
        };
        match event {
            TaskEvent::Ready(task) => {
                tracing::debug!("{} ready", task);
                session.pending_ready.remove(&task);
            }
            TaskEvent::Failed {
                task: TaskKind::Publisher,
                message,
            } => {
                tracing::error!("Stream from {} lost: {}", session.peripheral.name, message);
                self.lost = Some(message);
                self.state = StreamState::Stopped;
            }
            TaskEvent::Failed {
                task: TaskKind::Recorder,
                message,
            } => {
                tracing::warn!("Session will not be recorded: {}", message);
                session.pending_ready.remove(&TaskKind::Recorder);
            }
            TaskEvent::Exited(task) => {
                tracing::debug!("{} exited", task);
                session.exited.insert(task);
                if task == TaskKind::Recorder && self.state == StreamState::Recording {
                    self.state = StreamState::Streaming;
                }
            }
        }
    }

    fn push_start_marker_if_ready(&mut self) {
        let Some(session) = self.session.as_mut() else {
            return;
        };
        if !session.is_ready() || self.lost.is_some() {
            return;
        }
        if let Some(code) = session.start_marker.take() {
            tracing::info!("Session ready, pushing start marker {}", code);
            session.marker_outlet.push(MarkerEvent::now(code));
        }
    }

    fn lost_error(&self) -> Option<DeviceError> {
        self.lost.as_ref().map(|reason| {
            DeviceError::StreamLost(format!(
                "'{}' stream lost: {}",
                self.descriptor.identifier(),
                reason
            ))
        })
    }

    /// Wait for every spawned task to report its exit
    fn await_exits(session: &mut StreamSession, timeout: Duration) {
        let deadline = Instant::now() + timeout;
        while !session.all_exited() {
            let now = Instant::now();
            if now >= deadline {
                break;
            }
            match session.events.recv_timeout(deadline - now) {
                Ok(TaskEvent::Exited(task)) => {
                    session.exited.insert(task);
                }
                Ok(TaskEvent::Failed { task, message }) => {
                    tracing::warn!("{} failed while stopping: {}", task, message);
                }
                Ok(TaskEvent::Ready(_)) => {}
                Err(RecvTimeoutError::Timeout) | Err(RecvTimeoutError::Disconnected) => break,
            }
        }
    }
}

impl AcquisitionBackend for StreamingBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Streaming
    }

    fn start(&mut self, destination: Option<&Path>, duration: Option<Duration>) -> Result<()> {
        self.pump_events();
        if self.session.is_some() {
            if self.lost.is_none() {
                return Err(DeviceError::AlreadyStarted);
            }
            tracing::info!("Clearing lost session before restarting");
            self.stop();
        }

        let previous = self.state;
        self.state = StreamState::Discovering;
        let session = match self
            .discover()
            .and_then(|peripheral| self.launch(peripheral, destination, duration))
        {
            Ok(session) => session,
            Err(e) => {
                tracing::warn!("Failed to start '{}': {}", self.descriptor.identifier(), e);
                self.state = previous;
                return Err(e);
            }
        };

        let recording = session.recorder.is_some();
        self.state = if recording {
            StreamState::Recording
        } else {
            StreamState::Streaming
        };
        self.session = Some(session);
        self.lost = None;
        self.last_session = None;
        tracing::info!(
            "Streaming session started on '{}'{}",
            self.descriptor.identifier(),
            destination
                .map(|d| format!(", recording to {:?}", d))
                .unwrap_or_default()
        );

        if self.config.await_ready_on_start {
            let timeout = self.config.ready_timeout();
            match self.wait_until_ready(timeout) {
                Ok(true) => {}
                Ok(false) => tracing::warn!("Background tasks not ready after {:?}", timeout),
                Err(e) => {
                    self.stop();
                    return Err(e);
                }
            }
        }
        Ok(())
    }

    fn push_sample(&mut self, marker: i32, timestamp: Option<f64>) -> Result<()> {
        self.pump_events();
        if self.session.is_none() {
            return Err(DeviceError::NotStarted(format!(
                "push_sample requires a started session on '{}'",
                self.descriptor.identifier()
            )));
        }
        if let Some(e) = self.lost_error() {
            return Err(e);
        }
        let timestamp = timestamp.ok_or(DeviceError::MissingTimestamp(marker))?;

        let Some(session) = self.session.as_ref() else {
            return Ok(());
        };
        if !session.is_ready() {
            tracing::debug!("Marker {} pushed before the session is ready", marker);
        }
        session
            .marker_outlet
            .push(MarkerEvent::new(marker, timestamp));
        Ok(())
    }

    fn stop(&mut self) {
        self.pump_events();
        self.recent_inlet = None;
        let Some(mut session) = self.session.take() else {
            return;
        };

        tracing::info!("Stopping streaming session on '{}'", self.descriptor.identifier());
        drop(session.shutdown.take());
        let timeout = self.config.shutdown_timeout();
        Self::await_exits(&mut session, timeout);

        if let Some(handle) = session.publisher.take() {
            if session.exited.contains(&TaskKind::Publisher) {
                let _ = handle.join();
            } else {
                tracing::warn!("Publisher did not exit within {:?}, detaching", timeout);
            }
        }
        if let Some(handle) = session.recorder.take() {
            if session.exited.contains(&TaskKind::Recorder) {
                match handle.join() {
                    Ok(recorded) => self.last_session = recorded,
                    Err(_) => tracing::error!("Recorder thread panicked"),
                }
            } else {
                tracing::warn!(
                    "Recorder did not flush within {:?}, detaching",
                    timeout
                );
            }
        }

        self.lost = None;
        self.state = StreamState::Stopped;
    }

    fn get_recent(&mut self, n: usize, policy: InletPolicy) -> Result<RecentWindow> {
        self.pump_events();
        if let Some(e) = self.lost_error() {
            return Err(e);
        }

        if policy == InletPolicy::Reconnect {
            self.recent_inlet = None;
        }
        let inlet = match self.recent_inlet.take() {
            Some(inlet) => inlet,
            None => {
                let query = match &self.session {
                    Some(session) => session.sample_query.clone(),
                    None => StreamQuery::by_type(self.config.eeg_stream_type.clone()),
                };
                let inlet = self.bus.resolve_inlet::<StreamSample>(
                    &query,
                    self.config.inlet_buffer_samples,
                    self.config.discovery_timeout(),
                    &self.stop_handle,
                )?;
                tracing::debug!("Subscribed to '{}' for recent samples", inlet.info().name);
                inlet
            }
        };

        let info = inlet.info().clone();
        let sample_rate = if info.nominal_rate > 0.0 {
            info.nominal_rate
        } else {
            self.descriptor.sample_rate()
        };
        // The subscription never holds more history than its queue
        let wanted = n.min(inlet.capacity());
        if wanted < n {
            tracing::debug!("get_recent({}) capped at the {}-sample inlet buffer", n, wanted);
        }
        let timeout = self.config.recent_timeout(wanted, sample_rate);

        match inlet.pull_recent(wanted, timeout, &self.stop_handle) {
            Ok(samples) => {
                self.recent_inlet = Some(inlet);
                let mut window = RecentWindow::empty(info.channel_labels, sample_rate);
                for sample in samples {
                    window.push_row(
                        sample.timestamp,
                        sample.values.iter().map(|&v| f64::from(v)).collect(),
                    );
                }
                if window.len() < n {
                    tracing::debug!("get_recent({}) returned {} samples", n, window.len());
                }
                Ok(window)
            }
            Err(DeviceError::StreamLost(reason)) => {
                if self.session.is_some() {
                    self.lost = Some(reason.clone());
                    self.state = StreamState::Stopped;
                }
                Err(DeviceError::StreamLost(reason))
            }
            Err(e) => {
                self.recent_inlet = Some(inlet);
                Err(e)
            }
        }
    }

    fn is_active(&self) -> bool {
        self.session.is_some() && self.lost.is_none()
    }

    fn wait_until_ready(&mut self, timeout: Duration) -> Result<bool> {
        self.pump_events();
        if let Some(e) = self.lost_error() {
            return Err(e);
        }
        let Some(events) = self.session.as_ref().map(|s| s.events.clone()) else {
            return Ok(false);
        };

        let deadline = Instant::now() + timeout;
        loop {
            if self.session.as_ref().is_some_and(StreamSession::is_ready) {
                self.push_start_marker_if_ready();
                return Ok(true);
            }
            let now = Instant::now();
            if now >= deadline {
                return Ok(false);
            }
            match events.recv_timeout(deadline - now) {
                Ok(event) => {
                    self.apply_event(event);
                    if let Some(e) = self.lost_error() {
                        return Err(e);
                    }
                }
                Err(RecvTimeoutError::Timeout) => return Ok(false),
                Err(RecvTimeoutError::Disconnected) => {
                    return Err(DeviceError::StreamLost(
                        "Background tasks exited before becoming ready".to_string(),
                    ))
                }
            }
        }
    }

    fn last_session(&self) -> Option<&RecordedSession> {
        self.last_session.as_ref()
    }
}

impl Drop for StreamingBackend {
    fn drop(&mut self) {
        self.stop();
    }
}
