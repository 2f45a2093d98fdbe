//! Scheduler error types.

use taskhive_core::{DomainError, JobId};
use thiserror::Error;

/// Errors returned synchronously by the scheduler API.
#[derive(Debug, Error)]
pub enum SchedulerError {
    /// Submission rejected at enqueue (unknown tier, payload too large).
    #[error("validation error: {0}")]
    Validation(DomainError),

    /// A state-machine violation inside the core.
    #[error(transparent)]
    Domain(#[from] DomainError),

    #[error("job not found: {0}")]
    NotFound(JobId),

    /// The job belongs to another owner.
    #[error("job {0} belongs to another owner")]
    OwnerMismatch(JobId),

    /// The operation is not allowed while workers are running.
    #[error("scheduler is already running")]
    AlreadyRunning,

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// A background thread could not be spawned.
    #[error("failed to spawn {name}: {source}")]
    Spawn {
        name: String,
        #[source]
        source: std::io::Error,
    },
}

/// Error returned by a processor.
///
/// Errors are retryable unless built with [`ProcessorError::permanent`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message}")]
pub struct ProcessorError {
    pub message: String,
    pub retryable: bool,
}

impl ProcessorError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            retryable: true,
        }
    }

    /// A failure that retrying cannot fix.
    pub fn permanent(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            retryable: false,
        }
    }
}

/// Invalid configuration input.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("{key}={value:?}: {reason}")]
    Invalid {
        key: String,
        value: String,
        reason: String,
    },

    #[error("invalid tier table: {0}")]
    Tiers(#[from] DomainError),
}
