//! Error types for field-collect
//!
//! Every failure a caller can act on is a distinct variant so the capture UI
//! can render a specific message per kind.

use std::time::Duration;

use thiserror::Error;

/// Form input rejected before anything touches storage or location.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("Amount must be greater than zero, got {0}")]
    NonPositiveAmount(i64),

    #[error("Client reference is required")]
    MissingClient,

    #[error("Unknown payment method: {0}")]
    UnknownPaymentMethod(String),
}

/// Why a location fix could not be obtained.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LocationError {
    #[error("Location permission denied")]
    PermissionDenied,

    #[error("Position unavailable")]
    PositionUnavailable,

    #[error("No location fix within {0:?}")]
    Timeout(Duration),

    #[error("Positioning is not supported on this device")]
    Unsupported,
}

/// Local durable queue failures.
#[derive(Error, Debug)]
pub enum StoreError {
    /// The store could not be opened or written (disk full, read-only, locked).
    #[error("Could not save locally: {0}")]
    Unavailable(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    /// The record broke a table constraint. Retrying the same write cannot succeed.
    #[error("Record refused by the queue: {0}")]
    Invalid(String),

    #[error("Queue database schema v{found} is newer than supported v{supported}")]
    SchemaTooNew { found: i32, supported: i32 },

    #[error("Storage task failed: {0}")]
    Task(String),
}

impl From<rusqlite::Error> for StoreError {
    fn from(e: rusqlite::Error) -> Self {
        match e {
            rusqlite::Error::SqliteFailure(ref err, _)
                if err.code == rusqlite::ErrorCode::ConstraintViolation =>
            {
                StoreError::Invalid(e.to_string())
            }
            e => StoreError::Unavailable(e.to_string()),
        }
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(e: serde_json::Error) -> Self {
        StoreError::Serialization(e.to_string())
    }
}

impl From<tokio::task::JoinError> for StoreError {
    fn from(e: tokio::task::JoinError) -> Self {
        StoreError::Task(e.to_string())
    }
}

/// Proof attachment storage failures.
#[derive(Error, Debug)]
pub enum ProofError {
    #[error("Invalid proof reference: {0}")]
    InvalidRef(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Ambiguous submission outcome. The record stays queued.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransientError {
    #[error("Ledger unreachable: {0}")]
    Connection(String),

    #[error("Submission timed out after {0:?}")]
    Timeout(Duration),

    #[error("Ledger error {status}: {message}")]
    Server { status: u16, message: String },
}

/// A drain pass could not run at all.
#[derive(Error, Debug)]
pub enum SyncError {
    #[error("Queue unavailable: {0}")]
    Store(#[from] StoreError),

    #[error("Drain task failed: {0}")]
    Task(String),
}

impl From<tokio::task::JoinError> for SyncError {
    fn from(e: tokio::task::JoinError) -> Self {
        SyncError::Task(e.to_string())
    }
}

/// Failure of one user submission.
#[derive(Error, Debug)]
pub enum CaptureError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error(transparent)]
    Location(#[from] LocationError),

    #[error(transparent)]
    Storage(#[from] StoreError),
}

/// Configuration loading failures.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Could not serialize config: {0}")]
    Serialize(#[from] toml::ser::Error),

    #[error("Configuration error: {0}")]
    Invalid(String),
}
