//! Error types for the agent pool.

use uuid::Uuid;

use crate::registry::state::WorkerState;

/// Top-level error type for the pool.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Registry error: {0}")]
    Registry(#[from] RegistryError),

    #[error("Permission error: {0}")]
    Permission(#[from] PermissionError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Configuration-related errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid configuration value for {key}: {message}")]
    InvalidValue { key: String, message: String },

    #[error("Missing required configuration: {key}. {hint}")]
    MissingRequired { key: String, hint: String },
}

/// Registry-level misuse, surfaced synchronously to the caller.
///
/// Per-worker failures (timeout, non-zero exit, malformed output) are *not*
/// errors — they are `WorkerOutcome::Failure` data reported by `wait`.
#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error("Maximum active workers ({max}) exceeded")]
    CapacityExceeded { max: usize },

    #[error("No active workers to wait for")]
    NoActiveWorkers,

    #[error("Worker {id} not found")]
    NotFound { id: Uuid },

    #[error("Worker {id} is {state}, expected {expected}")]
    InvalidState {
        id: Uuid,
        state: WorkerState,
        expected: WorkerState,
    },

    #[error("Worker {id} has no continuation token to resume from")]
    MissingContinuation { id: Uuid },

    #[error("Registry event channel closed")]
    ChannelClosed,
}

/// Permission-gate errors (gated variant).
#[derive(Debug, thiserror::Error)]
pub enum PermissionError {
    #[error("Permission request {request_id} not found or already decided")]
    NotFound { request_id: Uuid },

    #[error("Permission socket for worker {worker_id} failed: {reason}")]
    Socket { worker_id: Uuid, reason: String },
}

/// Result type alias for the pool.
pub type Result<T> = std::result::Result<T, Error>;
