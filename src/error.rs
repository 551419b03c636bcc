//! Error types for linereply.
//!
//! Errors are strongly typed using thiserror. Routine outcomes (a timeout, a
//! line that matches nothing, an unparsable caller pattern) are not errors at
//! the public call boundary; they resolve to the "no reply" sentinel. What
//! remains here are validation failures and programming errors.

use thiserror::Error;

use crate::query::QueryId;

/// Validation errors that occur during input validation.
#[allow(missing_docs)]
#[derive(Debug, Error)]
pub enum ValidationError {
    #[error("Invalid pattern '{pattern}': {reason}")]
    InvalidPattern {
        pattern: String,
        reason: String,
    },

    #[error("Invalid config field '{field}': {reason}")]
    InvalidConfig {
        field: String,
        reason: String,
    },
}

/// Execution errors that occur while registering, correlating or waiting.
#[allow(missing_docs)]
#[derive(Debug, Error)]
pub enum ExecutionError {
    #[error("await_reply called from the line delivery context {context}; this would deadlock")]
    ReentrantCall {
        context: String,
    },

    #[error("Query {id} is already registered")]
    DuplicateQuery {
        id: QueryId,
    },

    #[error("Poisoned lock: {context}")]
    LockPoisoned {
        context: &'static str,
    },

    #[error("Failed to spawn worker '{name}': {message}")]
    Spawn {
        name: String,
        message: String,
    },
}

/// Top-level error type for linereply.
#[allow(missing_docs)]
#[derive(Debug, Error)]
pub enum ReplyError {
    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    #[error("Execution error: {0}")]
    Execution(#[from] ExecutionError),
}

impl ReplyError {
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

    /// Returns true if the caller invoked a blocking wait from the delivery context.
    ///
    /// This is a programming error: the call can never succeed from that context.
    #[must_use]
    pub const fn is_reentrant_call(&self) -> bool {
        matches!(self, Self::Execution(ExecutionError::ReentrantCall { .. }))
    }
}

/// Result type alias for linereply operations.
pub type ReplyResult<T> = Result<T, ReplyError>;

pub(crate) const fn lock_err(context: &'static str) -> ReplyError {
    ReplyError::Execution(ExecutionError::LockPoisoned { context })
}
