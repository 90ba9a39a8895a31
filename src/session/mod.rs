//! Session recording module
//!
//! This module turns an acquisition session into its persisted form: a
//! table with one row per sample and a `stim` column carrying the markers
//! pushed during the session.
//!
//! # Features
//!
//! - Accumulate streamed samples and markers on a background thread
//! - Merge markers into the table by nearest timestamp
//! - Save and load the table as CSV
//! - Keep the last session's outcome (including save errors) for inspection

pub mod recorder;
pub mod table;
pub mod types;

pub use recorder::{spawn_recorder, RecorderTask, SessionRecorder};
pub use table::SessionTable;
pub use types::{RecordedSession, SessionMetadata, SessionState};
