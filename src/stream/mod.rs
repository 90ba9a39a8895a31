//! In-process stream bus
//!
//! A registry of named, typed, multi-consumer streams. A publisher creates an
//! [`Outlet`] advertising a [`StreamInfo`]; any number of consumers resolve
//! it with a [`StreamQuery`] and open an [`Inlet`].
//!
//! # Delivery
//!
//! Every inlet owns a bounded queue. When a queue is full the oldest item is
//! dropped, so one slow reader never blocks the publisher or another reader.
//! When the outlet is dropped the stream disappears from the registry and
//! every inlet observes disconnection once it has drained its queue.
//!
//! # Example
//!
//! ```ignore
//! use eegbridge_rs::stream::{StreamBus, StreamInfo, StreamQuery, StreamSample};
//!
//! let bus = StreamBus::new();
//! let outlet = bus.create_outlet::<StreamSample>(StreamInfo::new("Muse", "EEG", labels, 256.0, "00:55"));
//! let mut inlet = bus.open_inlet::<StreamSample>(&StreamQuery::by_type("EEG"), 1024).unwrap();
//! outlet.push(StreamSample::now(vec![0.0; 5]));
//! ```

pub mod lsl;
pub mod peripheral;
pub mod publisher;

#[cfg(feature = "lsl")]
pub use lsl::{LslLink, LslScanner};
pub use peripheral::{
    default_scanner, NullScanner, PeripheralInfo, PeripheralLink, PeripheralScanner,
    SimulatedPeripheral, SimulatedScanner,
};
pub use publisher::{spawn_publisher, TaskEvent, TaskKind};

use crate::backend::StopHandle;
use crate::error::{DeviceError, Result};
use crate::types::unix_time;
use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, Sender, TryRecvError, TrySendError};
use parking_lot::Mutex;
use std::any::Any;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, OnceLock, Weak};
use std::time::{Duration, Instant};

/// Interval between registry scans while resolving
const RESOLVE_POLL_INTERVAL: Duration = Duration::from_millis(10);
/// Longest single wait inside `pull_recent` before `stop` is re-checked
const PULL_SLICE: Duration = Duration::from_millis(50);

/// Advertised metadata of a stream
#[derive(Debug, Clone, PartialEq)]
pub struct StreamInfo {
    pub name: String,
    pub stream_type: String,
    pub channel_labels: Vec<String>,
    /// Nominal rate in Hz, 0.0 for irregular streams
    pub nominal_rate: f64,
    pub source_id: String,
}

impl StreamInfo {
    pub fn new(
        name: impl Into<String>,
        stream_type: impl Into<String>,
        channel_labels: Vec<String>,
        nominal_rate: f64,
        source_id: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            stream_type: stream_type.into(),
            channel_labels,
            nominal_rate,
            source_id: source_id.into(),
        }
    }

    pub fn channel_count(&self) -> usize {
        self.channel_labels.len()
    }
}

/// Predicate used to resolve streams; unset fields match anything
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StreamQuery {
    pub name: Option<String>,
    pub stream_type: Option<String>,
    pub source_id: Option<String>,
}

impl StreamQuery {
    /// Match any stream
    pub fn any() -> Self {
        Self::default()
    }

    pub fn by_type(stream_type: impl Into<String>) -> Self {
        Self {
            stream_type: Some(stream_type.into()),
            ..Default::default()
        }
    }

    pub fn by_name(name: impl Into<String>) -> Self {
        Self {
            name: Some(name.into()),
            ..Default::default()
        }
    }

    pub fn with_source_id(mut self, source_id: impl Into<String>) -> Self {
        self.source_id = Some(source_id.into());
        self
    }

    pub fn matches(&self, info: &StreamInfo) -> bool {
        self.name.as_ref().map_or(true, |n| *n == info.name)
            && self
                .stream_type
                .as_ref()
                .map_or(true, |t| *t == info.stream_type)
            && self
                .source_id
                .as_ref()
                .map_or(true, |s| *s == info.source_id)
    }
}

/// One multichannel sample with its acquisition timestamp
#[derive(Debug, Clone, PartialEq)]
pub struct StreamSample {
    /// Unix seconds
    pub timestamp: f64,
    pub values: Vec<f32>,
}

impl StreamSample {
    pub fn new(timestamp: f64, values: Vec<f32>) -> Self {
        Self { timestamp, values }
    }

    pub fn now(values: Vec<f32>) -> Self {
        Self::new(unix_time(), values)
    }
}

/// Per-inlet queue held by the outlet
struct Subscriber<T> {
    tx: Sender<T>,
    /// Second handle on the queue so the outlet can evict the oldest item
    evict: Receiver<T>,
    /// Dead once the inlet is dropped
    alive: Weak<()>,
}

type Subscribers<T> = Mutex<Vec<Subscriber<T>>>;

struct Registration {
    id: u64,
    info: StreamInfo,
    /// Type-erased `Subscribers<T>`, owned by the outlet
    subscribers: Weak<dyn Any + Send + Sync>,
}

#[derive(Default)]
struct Registry {
    next_id: u64,
    streams: Vec<Registration>,
}

/// Registry of live streams
///
/// Cheap to clone; clones share the same registry.
#[derive(Clone, Default)]
pub struct StreamBus {
    registry: Arc<Mutex<Registry>>,
}

impl std::fmt::Debug for StreamBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamBus")
            .field("streams", &self.resolve(&StreamQuery::any()).len())
            .finish()
    }
}

impl StreamBus {
    /// A new, empty bus
    pub fn new() -> Self {
        Self::default()
    }

    /// Process-wide bus shared by devices that were not given their own
    pub fn global() -> Self {
        static GLOBAL: OnceLock<StreamBus> = OnceLock::new();
        GLOBAL.get_or_init(StreamBus::new).clone()
    }

    /// Advertise a new stream
    pub fn create_outlet<T: Clone + Send + 'static>(&self, info: StreamInfo) -> Outlet<T> {
        let subscribers: Arc<Subscribers<T>> = Arc::new(Mutex::new(Vec::new()));
        let erased: Arc<dyn Any + Send + Sync> = subscribers.clone();

        let mut registry = self.registry.lock();
        let id = registry.next_id;
        registry.next_id += 1;
        registry.streams.push(Registration {
            id,
            info: info.clone(),
            subscribers: Arc::downgrade(&erased),
        });
        drop(registry);

        tracing::debug!(
            "Stream '{}' ({}) advertised with {} channels",
            info.name,
            info.stream_type,
            info.channel_count()
        );

        Outlet {
            id,
            info,
            subscribers,
            registry: Arc::downgrade(&self.registry),
            dropped: AtomicU64::new(0),
        }
    }

    /// Metadata of every live stream matching `query`, oldest first
    pub fn resolve(&self, query: &StreamQuery) -> Vec<StreamInfo> {
        self.registry
            .lock()
            .streams
            .iter()
            .filter(|r| r.subscribers.strong_count() > 0 && query.matches(&r.info))
            .map(|r| r.info.clone())
            .collect()
    }

    /// Subscribe to the first live stream of type `T` matching `query`
    pub fn open_inlet<T: Clone + Send + 'static>(
        &self,
        query: &StreamQuery,
        capacity: usize,
    ) -> Option<Inlet<T>> {
        let registry = self.registry.lock();
        registry.streams.iter().find_map(|r| {
            if !query.matches(&r.info) {
                return None;
            }
            let subscribers = r.subscribers.upgrade()?.downcast::<Subscribers<T>>().ok()?;

            let (tx, rx) = bounded(capacity.max(1));
            let token = Arc::new(());
            subscribers.lock().push(Subscriber {
                tx,
                evict: rx.clone(),
                alive: Arc::downgrade(&token),
            });
            Some(Inlet {
                info: r.info.clone(),
                rx,
                _token: token,
            })
        })
    }

    /// Keep trying [`open_inlet`](Self::open_inlet) until `timeout`
    ///
    /// Fails with `StreamUnavailable` on timeout or `Cancelled` when `stop`
    /// is triggered.
    pub fn resolve_inlet<T: Clone + Send + 'static>(
        &self,
        query: &StreamQuery,
        capacity: usize,
        timeout: Duration,
        stop: &StopHandle,
    ) -> Result<Inlet<T>> {
        let deadline = Instant::now() + timeout;
        loop {
            if let Some(inlet) = self.open_inlet(query, capacity) {
                return Ok(inlet);
            }
            stop.check("stream resolution")?;
            let now = Instant::now();
            if now >= deadline {
                return Err(DeviceError::StreamUnavailable(format!(
                    "No stream matching {:?} within {:?}",
                    query, timeout
                )));
            }
            std::thread::sleep(RESOLVE_POLL_INTERVAL.min(deadline - now));
        }
    }
}

/// Publishing end of a stream
///
/// Dropping the outlet withdraws the stream and disconnects its inlets.
pub struct Outlet<T: Clone + Send + 'static> {
    id: u64,
    info: StreamInfo,
    subscribers: Arc<Subscribers<T>>,
    registry: Weak<Mutex<Registry>>,
    dropped: AtomicU64,
}

impl<T: Clone + Send + 'static> Outlet<T> {
    pub fn info(&self) -> &StreamInfo {
        &self.info
    }

    /// Deliver one item to every live inlet
    pub fn push(&self, item: T) {
        let mut subscribers = self.subscribers.lock();
        subscribers.retain(|s| s.alive.strong_count() > 0);

        for subscriber in subscribers.iter() {
            let mut pending = item.clone();
            loop {
                match subscriber.tx.try_send(pending) {
                    Ok(()) => break,
                    Err(TrySendError::Full(back)) => {
                        let _ = subscriber.evict.try_recv();
                        self.dropped.fetch_add(1, Ordering::Relaxed);
                        pending = back;
                    }
                    Err(TrySendError::Disconnected(_)) => break,
                }
            }
        }
    }

    /// Deliver a chunk of items in order
    pub fn push_chunk(&self, items: impl IntoIterator<Item = T>) {
        for item in items {
            self.push(item);
        }
    }

    /// Number of live inlets
    pub fn subscriber_count(&self) -> usize {
        self.subscribers
            .lock()
            .iter()
            .filter(|s| s.alive.strong_count() > 0)
            .count()
    }

    /// Items evicted from full inlet queues
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

impl<T: Clone + Send + 'static> Drop for Outlet<T> {
    fn drop(&mut self) {
        if let Some(registry) = self.registry.upgrade() {
            registry.lock().streams.retain(|r| r.id != self.id);
        }
        self.subscribers.lock().clear();
        tracing::debug!("Stream '{}' withdrawn", self.info.name);
    }
}

/// Consuming end of a stream
pub struct Inlet<T> {
    info: StreamInfo,
    rx: Receiver<T>,
    _token: Arc<()>,
}

impl<T> Inlet<T> {
    /// Metadata advertised by the outlet
    pub fn info(&self) -> &StreamInfo {
        &self.info
    }

    /// How many items the queue holds before evicting the oldest
    pub fn capacity(&self) -> usize {
        self.rx.capacity().unwrap_or(usize::MAX)
    }

    /// Wait up to `timeout` for the next item
    ///
    /// `Ok(None)` on timeout, `StreamLost` once the outlet is gone and the
    /// queue is drained.
    pub fn pull(&self, timeout: Duration) -> Result<Option<T>> {
        match self.rx.recv_timeout(timeout) {
            Ok(item) => Ok(Some(item)),
            Err(RecvTimeoutError::Timeout) => Ok(None),
            Err(RecvTimeoutError::Disconnected) => Err(self.lost()),
        }
    }

    /// Everything queued right now, up to `max` items
    ///
    /// The flag is true when the outlet is gone.
    pub fn pull_chunk(&self, max: usize) -> (Vec<T>, bool) {
        let mut items = Vec::new();
        while items.len() < max {
            match self.rx.try_recv() {
                Ok(item) => items.push(item),
                Err(TryRecvError::Empty) => return (items, false),
                Err(TryRecvError::Disconnected) => return (items, true),
            }
        }
        (items, false)
    }

    /// The `n` most recent items, waiting up to `timeout` for enough to arrive
    ///
    /// Anything already queued is consumed first and only the newest `n`
    /// are kept. Returns early once `n` items are in hand; on timeout the
    /// items collected so far are returned. A timeout too large to represent
    /// waits until `n` items arrive or `stop` is cancelled.
    pub fn pull_recent(&self, n: usize, timeout: Duration, stop: &StopHandle) -> Result<Vec<T>> {
        if n == 0 {
            return Ok(Vec::new());
        }

        let keep = |item: T, window: &mut VecDeque<T>| {
            if window.len() == n {
                window.pop_front();
            }
            window.push_back(item);
        };

        let (queued, disconnected) = self.pull_chunk(usize::MAX);
        let reserve = n.min(queued.len().saturating_add(self.capacity()));
        let mut window = VecDeque::with_capacity(reserve);
        for item in queued {
            keep(item, &mut window);
        }
        if disconnected {
            return Err(self.lost());
        }

        let deadline = Instant::now().checked_add(timeout);
        while window.len() < n {
            stop.check("get_recent")?;
            let now = Instant::now();
            let slice = match deadline {
                Some(deadline) if now >= deadline => break,
                Some(deadline) => (deadline - now).min(PULL_SLICE),
                None => PULL_SLICE,
            };
            if let Some(item) = self.pull(slice)? {
                keep(item, &mut window);
            }
        }

        Ok(window.into())
    }

    fn lost(&self) -> DeviceError {
        DeviceError::StreamLost(format!("Stream '{}' was closed", self.info.name))
    }
}
