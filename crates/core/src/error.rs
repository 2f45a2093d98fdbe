//! Domain error model.

use thiserror::Error;

use crate::job::{JobEvent, JobStatus};

/// Result type used across the domain layer.
pub type DomainResult<T> = Result<T, DomainError>;

/// Domain-level error.
///
/// Deterministic failures only: validation of submitted work and violations
/// of the job state machine. Runtime concerns live in the scheduler crate.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DomainError {
    /// A value failed validation (e.g. malformed input).
    #[error("validation failed: {0}")]
    Validation(String),

    /// The requested tier is not present in the tier table.
    #[error("unknown tier: {0}")]
    UnknownTier(String),

    /// The payload exceeds the tier's size limit.
    #[error("payload of {size} bytes exceeds the {limit} byte limit of tier '{tier}'")]
    PayloadTooLarge { tier: String, size: usize, limit: usize },

    /// The state machine does not allow this event in the current state.
    #[error("illegal transition: {event:?} from {from:?}")]
    IllegalTransition { from: JobStatus, event: JobEvent },

    /// An identifier was invalid (e.g. parse failure).
    #[error("invalid identifier: {0}")]
    InvalidId(String),
}

impl DomainError {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn invalid_id(msg: impl Into<String>) -> Self {
        Self::InvalidId(msg.into())
    }

    /// Whether this error was raised while validating a submission.
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            Self::Validation(_) | Self::UnknownTier(_) | Self::PayloadTooLarge { .. }
        )
    }
}
