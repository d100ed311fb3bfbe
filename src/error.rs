//! Error types for KyroLog.
//!
//! All errors in KyroLog are strongly typed using thiserror.
//! Unification failure is deliberately absent: a failed unification is an
//! ordinary search outcome and only ever shows up as "no more results".

use thiserror::Error;

use crate::clause::ClauseId;
use crate::conflict::ConflictId;

/// Validation errors raised before anything touches the store.
#[derive(Debug, Error)]
#[allow(missing_docs)]
pub enum ValidationError {
    #[error("Malformed term: {reason}")]
    MalformedTerm {
        reason: String,
    },

    #[error("Certainty value {value} is out of range [0.0, 1.0]")]
    CertaintyOutOfRange {
        value: f32,
    },

    #[error("Functor cannot be empty")]
    EmptyFunctor,

    #[error("Rule body cannot be empty")]
    EmptyBody,

    #[error("Required field '{field}' is missing")]
    MissingField {
        field: String,
    },

    #[error("Field '{field}' exceeds maximum length of {max_length}")]
    FieldTooLong {
        field: String,
        max_length: usize,
    },

    #[error("Invalid configuration for '{field}': {reason}")]
    InvalidConfig {
        field: String,
        reason: String,
    },
}

/// Execution errors that occur while running an operation.
#[derive(Debug, Error)]
#[allow(missing_docs)]
pub enum ExecutionError {
    #[error("Depth limit {limit} exceeded while proving {goal}")]
    DepthExceeded {
        goal: String,
        limit: usize,
    },

    #[error("Conflict {conflict_id} could not be resolved: {reason}")]
    ConflictUnresolved {
        conflict_id: ConflictId,
        reason: String,
    },

    #[error("Clause {id} does not exist or is already retracted")]
    RetractionOfUnknownClause {
        id: ClauseId,
    },

    #[error("Operation cancelled during {during}")]
    Cancelled {
        during: String,
    },

    #[error("Storage error: {message}")]
    Storage {
        message: String,
    },

    #[error("Execution path '{path}' disconnected")]
    Disconnected {
        path: String,
    },

    #[error("Execution path '{path}' queue is full (capacity {capacity})")]
    QueueFull {
        path: String,
        capacity: usize,
    },

    #[error("Operation timed out after {duration_ms}ms")]
    Timeout {
        duration_ms: u64,
    },
}

/// Top-level error type for KyroLog.
#[derive(Debug, Error)]
#[allow(missing_docs)]
pub enum KyroError {
    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    #[error("Execution error: {0}")]
    Execution(#[from] ExecutionError),

    /// The justification graph is internally inconsistent (a cycle or an
    /// edge to a node that does not exist). This is a core bug; the
    /// operation is aborted and the diagnostic dump is returned verbatim.
    #[error("Justification graph corrupted: {reason}")]
    GraphCorruption {
        reason: String,
        diagnostics: String,
    },

    #[error("Internal error: {message}")]
    Internal {
        message: String,
    },
}

impl KyroError {
    /// Creates an internal error.
    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Creates a graph corruption error with a diagnostic dump.
    #[must_use]
    pub fn graph_corruption(reason: impl Into<String>, diagnostics: impl Into<String>) -> Self {
        Self::GraphCorruption {
            reason: reason.into(),
            diagnostics: diagnostics.into(),
        }
    }

    /// Creates a storage execution error.
    #[must_use]
    pub fn storage(message: impl Into<String>) -> Self {
        Self::Execution(ExecutionError::Storage {
            message: message.into(),
        })
    }

    /// Returns true if this is a validation error.
    #[must_use]
    pub const fn is_validation(&self) -> bool {
        matches!(self, Self::Validation(_))
    }

    /// Returns true if this is an execution error.
    #[must_use]
    pub const fn is_execution(&self) -> bool {
        matches!(self, Self::Execution(_))
    }

    /// Returns true if the proof search was cut off by the depth guard.
    #[must_use]
    pub const fn is_depth_exceeded(&self) -> bool {
        matches!(self, Self::Execution(ExecutionError::DepthExceeded { .. }))
    }

    /// Returns true if this error indicates a bug in the core.
    #[must_use]
    pub const fn is_internal(&self) -> bool {
        matches!(self, Self::Internal { .. } | Self::GraphCorruption { .. })
    }

    /// Returns true if this error is retryable.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        match self {
            Self::Validation(_) => false,
            Self::Execution(e) => matches!(
                e,
                ExecutionError::Timeout { .. } | ExecutionError::QueueFull { .. }
            ),
            Self::GraphCorruption { .. } | Self::Internal { .. } => false,
        }
    }
}

/// Result type alias for KyroLog operations.
pub type KyroResult<T> = Result<T, KyroError>;
