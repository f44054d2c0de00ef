//! Error types for the unit of work
//!
//! This module defines all error types used throughout the system.
//! We use `thiserror` for automatic `Display` and `Error` trait implementations.
//!
//! - `BackendError` is what storage backends and transaction providers return.
//! - `UowError` is what the unit of work surfaces to callers; backend errors
//!   are wrapped with the context or transaction they came from.

use crate::types::{ContextKey, ScopeId};
use std::fmt;
use thiserror::Error;

/// Result type alias for unit-of-work operations
pub type UowResult<T> = std::result::Result<T, UowError>;

/// Result type alias for backend capability calls
pub type BackendResult<T> = std::result::Result<T, BackendError>;

/// Classification of a backend failure
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BackendErrorKind {
    /// The operation failed
    Failed,
    /// The operation observed a cancellation request
    Cancelled,
    /// The operation exceeded its timeout
    Timeout,
    /// The context or transaction was already released
    Released,
    /// The backend does not support the operation
    Unsupported,
}

impl fmt::Display for BackendErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BackendErrorKind::Failed => write!(f, "failed"),
            BackendErrorKind::Cancelled => write!(f, "cancelled"),
            BackendErrorKind::Timeout => write!(f, "timeout"),
            BackendErrorKind::Released => write!(f, "released"),
            BackendErrorKind::Unsupported => write!(f, "unsupported"),
        }
    }
}

/// Error reported by a storage backend or transaction provider
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{kind}: {message}")]
pub struct BackendError {
    /// Failure class
    pub kind: BackendErrorKind,
    /// Human-readable detail
    pub message: String,
}

impl BackendError {
    /// Create an error of the given kind
    pub fn new(kind: BackendErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    /// Generic failure
    pub fn failed(message: impl Into<String>) -> Self {
        Self::new(BackendErrorKind::Failed, message)
    }

    /// Cancellation observed
    pub fn cancelled(message: impl Into<String>) -> Self {
        Self::new(BackendErrorKind::Cancelled, message)
    }

    /// Timeout exceeded
    pub fn timeout(message: impl Into<String>) -> Self {
        Self::new(BackendErrorKind::Timeout, message)
    }

    /// Resource already released
    pub fn released(message: impl Into<String>) -> Self {
        Self::new(BackendErrorKind::Released, message)
    }

    /// Operation not supported
    pub fn unsupported(message: impl Into<String>) -> Self {
        Self::new(BackendErrorKind::Unsupported, message)
    }
}

/// A resource that could not be released during teardown
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DisposalFailure {
    /// Context key or transaction id of the resource
    pub resource: String,
    /// Backend error raised while releasing it
    pub error: BackendError,
}

impl DisposalFailure {
    /// Create a disposal failure record
    pub fn new(resource: impl Into<String>, error: BackendError) -> Self {
        Self {
            resource: resource.into(),
            error,
        }
    }
}

impl fmt::Display for DisposalFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.resource, self.error)
    }
}

/// Error types surfaced by the unit of work
#[derive(Debug, Error)]
pub enum UowError {
    /// A connection string or type mapping could not be determined
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// `begin` was called on a scope that already began
    #[error("Unit of work {scope} has already begun")]
    DuplicateBegin {
        /// Scope that received the second begin
        scope: ScopeId,
    },

    /// Operation not valid in the current state
    #[error("Invalid operation: {0}")]
    InvalidOperation(String),

    /// The backend failed to create a context
    #[error("Failed to create context {key}: {source}")]
    ContextCreation {
        /// Key of the context being created
        key: ContextKey,
        /// Backend failure
        #[source]
        source: BackendError,
    },

    /// The ambient transaction could not be started or joined
    #[error("Transaction error: {source}")]
    Transaction {
        /// Backend failure
        #[source]
        source: BackendError,
    },

    /// A pooled context failed to persist its changes
    #[error("Failed to save changes in {key}: {source}")]
    Flush {
        /// Key of the failing context
        key: ContextKey,
        /// Backend failure
        #[source]
        source: BackendError,
    },

    /// The ambient transaction failed to commit after every flush succeeded
    #[error("Transaction commit failed: {source}")]
    Commit {
        /// Backend failure
        #[source]
        source: BackendError,
    },

    /// One or more resources failed to release during teardown
    #[error("{} resource(s) failed to release: {}", .0.len(), join_failures(.0))]
    Disposal(Vec<DisposalFailure>),

    /// A cancellation request was observed between flushes
    #[error("Operation cancelled")]
    Cancelled,
}

impl UowError {
    /// Create a configuration error
    pub fn configuration(message: impl Into<String>) -> Self {
        UowError::Configuration(message.into())
    }

    /// Create an invalid operation error
    pub fn invalid_operation(message: impl Into<String>) -> Self {
        UowError::InvalidOperation(message.into())
    }

    /// True for `Flush` errors
    pub fn is_flush(&self) -> bool {
        matches!(self, UowError::Flush { .. })
    }

    /// True for `Commit` errors
    pub fn is_commit(&self) -> bool {
        matches!(self, UowError::Commit { .. })
    }
}

fn join_failures(failures: &[DisposalFailure]) -> String {
    failures
        .iter()
        .map(|f| f.to_string())
        .collect::<Vec<_>>()
        .join("; ")
}
