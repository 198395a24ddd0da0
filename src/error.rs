//! Error types for the firehose.

use crate::types::Sequence;
use thiserror::Error;

/// Main error type for firehose operations.
#[derive(Debug, Error)]
pub enum FirehoseError {
    /// The event manager no longer accepts commands.
    #[error("event manager shut down")]
    Shutdown,

    /// Returned from a playback callback to stop replay early.
    ///
    /// Persisters treat this as a clean abort and hand it back unchanged.
    #[error("playback shutting down")]
    PlaybackShutdown,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Deserialization error: {0}")]
    Deserialization(String),

    #[error("Corruption detected: {0}")]
    Corruption(String),

    #[error("Invalid log format: {0}")]
    InvalidFormat(String),

    #[error("Checksum mismatch: expected {expected}, got {got}")]
    ChecksumMismatch { expected: u32, got: u32 },

    #[error("Invalid sequence: {0:?} (last is {1:?})")]
    InvalidSequence(Sequence, Sequence),

    #[error("Event log is locked by another process")]
    Locked,

    /// Failure reported by a persistence backend that has no richer variant.
    #[error("Persistence error: {0}")]
    Persistence(String),

    #[error("Failed to spawn {0} thread: {1}")]
    Spawn(&'static str, std::io::Error),
}

impl FirehoseError {
    /// True for the conditions that mean "stop, nothing is wrong".
    pub fn is_shutdown(&self) -> bool {
        matches!(self, FirehoseError::Shutdown | FirehoseError::PlaybackShutdown)
    }
}

impl From<serde_json::Error> for FirehoseError {
    fn from(e: serde_json::Error) -> Self {
        FirehoseError::Serialization(e.to_string())
    }
}

impl From<rmp_serde::encode::Error> for FirehoseError {
    fn from(e: rmp_serde::encode::Error) -> Self {
        FirehoseError::Serialization(e.to_string())
    }
}

impl From<rmp_serde::decode::Error> for FirehoseError {
    fn from(e: rmp_serde::decode::Error) -> Self {
        FirehoseError::Deserialization(e.to_string())
    }
}

/// Result type for firehose operations.
pub type Result<T> = std::result::Result<T, FirehoseError>;
