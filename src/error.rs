//! Error types for hoops-sync
//!
//! Each concern gets its own `thiserror` enum; `AppError` aggregates them for
//! the binary and for callers that do not care which layer failed.

use crate::config::ConfigError;
use thiserror::Error;

/// Errors returned by the external statistics provider
#[derive(Debug, Error, Clone, PartialEq)]
pub enum FetchError {
    /// Request timed out
    #[error("Provider timeout")]
    Timeout,

    /// Provider throttled the request
    #[error("Rate limited, retry after {0} seconds")]
    RateLimited(u64),

    /// Could not reach the provider
    #[error("Connection failed: {0}")]
    Connection(String),

    /// Provider answered with an error status
    #[error("Server error: HTTP {0}")]
    Server(u16),

    /// Payload could not be parsed or failed validation
    #[error("Invalid data: {0}")]
    InvalidData(String),

    /// Entity does not exist upstream
    #[error("Resource not found")]
    NotFound,

    /// Credentials rejected
    #[error("Unauthorized")]
    Unauthorized,

    /// A transient error persisted through every attempt
    #[error("Gave up after {attempts} attempts: {last}")]
    RetriesExhausted { attempts: u32, last: Box<FetchError> },
}

impl FetchError {
    /// The error as the provider reported it, without retry annotation
    pub fn root(&self) -> &FetchError {
        match self {
            FetchError::RetriesExhausted { last, .. } => last.root(),
            other => other,
        }
    }
}

/// Classification of a failure for retry purposes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// Worth retrying after a backoff
    Transient,
    /// Retrying cannot help
    Permanent,
}

/// Trait for determining if an error is retryable
pub trait RetryableError {
    /// Classify the error
    fn class(&self) -> ErrorClass;

    /// Returns true if the error is retryable
    fn is_retryable(&self) -> bool {
        self.class() == ErrorClass::Transient
    }
}

impl RetryableError for FetchError {
    fn class(&self) -> ErrorClass {
        match self {
            FetchError::Timeout => ErrorClass::Transient,
            FetchError::RateLimited(_) => ErrorClass::Transient,
            FetchError::Connection(_) => ErrorClass::Transient,

            FetchError::Server(_) => ErrorClass::Permanent,
            FetchError::InvalidData(_) => ErrorClass::Permanent,
            FetchError::NotFound => ErrorClass::Permanent,
            FetchError::Unauthorized => ErrorClass::Permanent,
            // Already retried; retrying again would multiply the budget
            FetchError::RetriesExhausted { .. } => ErrorClass::Permanent,
        }
    }
}

/// Persistence-layer errors
#[derive(Debug, Error)]
pub enum PersistenceError {
    /// SQLite error
    #[error("Database error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// Row could not be encoded or decoded
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Row lacks a value for one of the conflict keys
    #[error("Row is missing conflict key '{0}'")]
    MissingKey(String),

    /// Store refused the write
    #[error("Write rejected: {0}")]
    Rejected(String),

    /// Background connection thread is gone
    #[error("Database connection closed")]
    ConnectionClosed,
}

impl From<tokio_rusqlite::Error> for PersistenceError {
    fn from(err: tokio_rusqlite::Error) -> Self {
        match err {
            tokio_rusqlite::Error::Rusqlite(e) => PersistenceError::Sqlite(e),
            tokio_rusqlite::Error::Close((_, e)) => PersistenceError::Sqlite(e),
            _ => PersistenceError::ConnectionClosed,
        }
    }
}

impl From<serde_json::Error> for PersistenceError {
    fn from(err: serde_json::Error) -> Self {
        PersistenceError::Serialization(err.to_string())
    }
}

/// Failure of one unit of sync work
#[derive(Debug, Error)]
pub enum SyncError {
    /// Provider call failed
    #[error(transparent)]
    Fetch(#[from] FetchError),

    /// Foreign-key lookup against the store failed
    #[error(transparent)]
    Persistence(#[from] PersistenceError),

    /// Entity could not be turned into a row
    #[error("Transform failed: {0}")]
    Transform(String),
}

/// Job orchestration errors
#[derive(Debug, Error)]
pub enum JobError {
    /// No pipeline registered for the requested job type
    #[error("Unknown job type: {0}")]
    UnknownJobType(String),

    /// Work could not be planned
    #[error("Failed to plan work: {0}")]
    Planning(#[from] SyncError),

    /// Store failed outside a batch flush
    #[error("Persistence failure: {0}")]
    Persistence(#[from] PersistenceError),

    /// Too many units failed for the job to count as a success
    #[error("{failed} of {total} items failed")]
    FailureThreshold { failed: u64, total: u64 },

    /// One or more stages of a composite job failed
    #[error("Stages failed: {}", .0.join(", "))]
    StagesFailed(Vec<String>),

    /// Supervisor task panicked
    #[error("Supervisor panicked: {0}")]
    Panicked(String),
}

/// Application-level error type
#[derive(Debug, Error)]
pub enum AppError {
    /// Provider error
    #[error("Fetch error: {0}")]
    Fetch(#[from] FetchError),

    /// Unit of sync work failed
    #[error("Sync error: {0}")]
    Sync(#[from] SyncError),

    /// Persistence error
    #[error("Persistence error: {0}")]
    Persistence(#[from] PersistenceError),

    /// Job error
    #[error("Job error: {0}")]
    Job(#[from] JobError),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),
}
