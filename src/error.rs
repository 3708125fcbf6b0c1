//! Error types for telepanel.
//!
//! Errors are strongly typed with thiserror and split by phase:
//! configuration validation, wire decode, and runtime submission.
//! Pipeline-level failures (bad JSON, failed numeric coercion, rejected
//! playback) are deliberately *not* errors — they degrade in place so the
//! panel keeps rendering the best available data.

use thiserror::Error;

/// Configuration errors detected when subscriptions are built.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Subscription topic cannot be empty")]
    EmptyTopic,

    #[error("Server address cannot be empty")]
    EmptyServerAddress,
}

/// Errors decoding payloads delivered by the bus collaborator.
#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("Malformed update batch: {message}")]
    MalformedBatch {
        message: String,
    },

    #[error("Update timestamp {millis}ms is out of range")]
    TimestampOutOfRange {
        millis: i64,
    },
}

/// Errors submitting work to the serialized panel worker.
#[derive(Debug, Error)]
pub enum RuntimeError {
    #[error("Worker inbox is full (capacity: {capacity})")]
    QueueFull {
        capacity: usize,
    },

    #[error("Worker channel disconnected: {path}")]
    Disconnected {
        path: String,
    },

    #[error("Operation timed out after {duration_ms}ms")]
    Timeout {
        duration_ms: u64,
    },
}

/// Top-level error type for telepanel.
#[derive(Debug, Error)]
pub enum PanelError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Decode error: {0}")]
    Decode(#[from] DecodeError),

    #[error("Runtime error: {0}")]
    Runtime(#[from] RuntimeError),
}

/// Result alias used throughout the crate.
pub type PanelResult<T> = Result<T, PanelError>;
