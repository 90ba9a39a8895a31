//! Stream publisher thread
//!
//! Reads chunks from a [`PeripheralLink`] and republishes them as
//! timestamped [`StreamSample`]s on an [`Outlet`]. Lifecycle changes are
//! reported on the task-event channel; the thread exits when the shutdown
//! channel disconnects or the link fails.
//!
//! `Ready` is only sent once the first chunk has been published, so a
//! session waiting on it knows data is actually flowing.

use crate::error::{DeviceError, Result};
use crate::types::unix_time;
use crossbeam_channel::{Receiver, Sender, TryRecvError};
use std::thread::JoinHandle;
use std::time::Duration;

use super::{Outlet, PeripheralLink, StreamSample};

/// How long one link read may block before shutdown is re-checked
const READ_SLICE: Duration = Duration::from_millis(50);

/// Background tasks of a streaming session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TaskKind {
    Publisher,
    Recorder,
}

impl std::fmt::Display for TaskKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TaskKind::Publisher => write!(f, "publisher"),
            TaskKind::Recorder => write!(f, "recorder"),
        }
    }
}

/// Lifecycle events sent by background tasks
#[derive(Debug, Clone, PartialEq)]
pub enum TaskEvent {
    /// The task has moved its first data
    Ready(TaskKind),
    /// The task hit an unrecoverable error and is exiting
    Failed { task: TaskKind, message: String },
    /// The task has returned
    Exited(TaskKind),
}

/// Spawn the publisher thread
pub fn spawn_publisher(
    link: Box<dyn PeripheralLink>,
    outlet: Outlet<StreamSample>,
    shutdown: Receiver<()>,
    events: Sender<TaskEvent>,
) -> Result<JoinHandle<()>> {
    std::thread::Builder::new()
        .name("stream-publisher".to_string())
        .spawn(move || run_publisher(link, outlet, shutdown, events))
        .map_err(|e| DeviceError::Channel(format!("Failed to spawn publisher: {}", e)))
}

fn run_publisher(
    mut link: Box<dyn PeripheralLink>,
    outlet: Outlet<StreamSample>,
    shutdown: Receiver<()>,
    events: Sender<TaskEvent>,
) {
    let period = 1.0 / link.sample_rate().max(f64::MIN_POSITIVE);
    tracing::info!("Publishing stream '{}'", outlet.info().name);

    let mut published: u64 = 0;
    let mut last_timestamp = f64::NEG_INFINITY;
    loop {
        match shutdown.try_recv() {
            Err(TryRecvError::Empty) => {}
            _ => break,
        }

        match link.read_chunk(READ_SLICE) {
            Ok(chunk) if chunk.is_empty() => continue,
            Ok(chunk) => {
                // The newest sample is stamped now, earlier ones one period apart.
                // A chunk never starts before the previous one ended.
                let count = chunk.len();
                let first =
                    (unix_time() - (count - 1) as f64 * period).max(last_timestamp + period);
                outlet.push_chunk(
                    chunk
                        .into_iter()
                        .enumerate()
                        .map(|(i, values)| StreamSample::new(first + i as f64 * period, values)),
                );
                last_timestamp = first + (count - 1) as f64 * period;
                if published == 0 {
                    tracing::debug!("First {} samples published", count);
                    let _ = events.send(TaskEvent::Ready(TaskKind::Publisher));
                }
                published += count as u64;
            }
            Err(e) => {
                tracing::error!("Publisher lost its peripheral: {}", e);
                let _ = events.send(TaskEvent::Failed {
                    task: TaskKind::Publisher,
                    message: e.to_string(),
                });
                break;
            }
        }
    }

    link.disconnect();
    tracing::info!(
        "Publisher stopped after {} samples ({} dropped by slow readers)",
        published,
        outlet.dropped()
    );
    // Withdraw the stream before announcing exit
    drop(outlet);
    let _ = events.send(TaskEvent::Exited(TaskKind::Publisher));
}
