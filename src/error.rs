//! Error handling for eegbridge
//!
//! This module defines the error taxonomy shared by the resolver, both
//! acquisition backends and the device facade, plus a Result alias.
//!
//! Every failure is returned to the caller explicitly. Nothing in the crate
//! retries on its own; [`DeviceError::is_recoverable`] tells the caller
//! whether a retry has a chance of succeeding.

use crate::types::{BackendKind, Operation};
use thiserror::Error;

/// Main error type for eegbridge operations
#[derive(Error, Debug)]
pub enum DeviceError {
    /// The identifier is not in the supported device catalog
    #[error("Unknown device: {0}")]
    UnknownDevice(String),

    /// A board transport (serial/USB/network) could not be opened
    #[error("Connection error: {0}")]
    Connection(String),

    /// Peripheral discovery timed out without finding a device
    #[error("Device not found: {0}")]
    DeviceNotFound(String),

    /// No sample stream could be resolved on the channel bus
    #[error("Stream unavailable: {0}")]
    StreamUnavailable(String),

    /// The stream publisher died mid-session
    #[error("Stream lost: {0}")]
    StreamLost(String),

    /// Operation requires an active recording session
    #[error("Not started: {0}")]
    NotStarted(String),

    /// `start` called while a session is already active
    #[error("A recording session is already active")]
    AlreadyStarted,

    /// The active backend declines this operation
    #[error("Operation '{operation}' is not supported by the {backend} backend")]
    UnsupportedOperation {
        backend: BackendKind,
        operation: Operation,
    },

    /// Streaming markers must carry a caller-supplied timestamp
    #[error("Marker {0} requires a timestamp on this backend")]
    MissingTimestamp(i32),

    /// An in-flight operation was aborted through a stop handle
    #[error("Cancelled: {0}")]
    Cancelled(String),

    /// Errors reported by a board driver after the session was opened
    #[error("Board error: {0}")]
    Board(String),

    /// Errors related to configuration loading/saving
    #[error("Configuration error: {0}")]
    Config(String),

    /// Errors related to channel communication
    #[error("Channel error: {0}")]
    Channel(String),

    /// IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// CSV encoding/decoding errors
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    /// Serialization errors
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Generic errors with context
    #[error("{context}: {source}")]
    WithContext {
        context: String,
        #[source]
        source: Box<DeviceError>,
    },
}

impl DeviceError {
    /// Add context to an error
    pub fn with_context(self, context: impl Into<String>) -> Self {
        DeviceError::WithContext {
            context: context.into(),
            source: Box::new(self),
        }
    }

    /// The innermost error, skipping any context wrappers
    pub fn root(&self) -> &DeviceError {
        match self {
            DeviceError::WithContext { source, .. } => source.root(),
            other => other,
        }
    }

    /// Whether retrying the same operation later may succeed
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self.root(),
            DeviceError::Connection(_)
                | DeviceError::DeviceNotFound(_)
                | DeviceError::StreamUnavailable(_)
                | DeviceError::StreamLost(_)
                | DeviceError::Cancelled(_)
        )
    }
}

impl From<serialport::Error> for DeviceError {
    fn from(err: serialport::Error) -> Self {
        DeviceError::Connection(err.to_string())
    }
}

/// Result type alias for eegbridge operations
pub type Result<T> = std::result::Result<T, DeviceError>;

/// Extension trait for adding context to Results
pub trait ResultExt<T> {
    /// Add context to an error result
    fn context(self, context: impl Into<String>) -> Result<T>;

    /// Add context lazily to an error result
    fn with_context<F>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> String;
}

impl<T> ResultExt<T> for Result<T> {
    fn context(self, context: impl Into<String>) -> Result<T> {
        self.map_err(|e| e.with_context(context))
    }

    fn with_context<F>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> String,
    {
        self.map_err(|e| e.with_context(f()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = DeviceError::UnknownDevice("muse3".to_string());
        assert_eq!(err.to_string(), "Unknown device: muse3");
    }

    #[test]
    fn test_error_with_context() {
        let err = DeviceError::Connection("/dev/ttyUSB0 missing".to_string());
        let with_ctx = err.with_context("Failed to open cyton");
        assert!(with_ctx.to_string().contains("Failed to open cyton"));
        assert!(matches!(with_ctx.root(), DeviceError::Connection(_)));
    }

    #[test]
    fn test_unsupported_operation_names_both_sides() {
        let err = DeviceError::UnsupportedOperation {
            backend: BackendKind::Polling,
            operation: Operation::GetRecent,
        };
        let text = err.to_string();
        assert!(text.contains("get_recent"));
        assert!(text.contains("polling"));
    }

    #[test]
    fn test_recoverable_classification() {
        assert!(DeviceError::DeviceNotFound("x".into()).is_recoverable());
        assert!(DeviceError::Connection("x".into())
            .with_context("start")
            .is_recoverable());
        assert!(!DeviceError::UnknownDevice("x".into()).is_recoverable());
        assert!(!DeviceError::NotStarted("x".into()).is_recoverable());
    }
}
