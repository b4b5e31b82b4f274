//! Application error model.
//!
//! Use-cases wrap failures with the operation name but preserve the underlying
//! kind, so transports can map them to coarse user-visible outcomes (validation,
//! not-found, conflict-with-retry-hint, forbidden, internal). Internal details
//! stay in logs.

use thiserror::Error;

use flowra_core::{ContextError, DomainError, ValidationErrors};
use flowra_infra::repository::RepositoryError;

#[derive(Debug, Error)]
pub enum AppError {
    /// Field-keyed validation failures, surfaced without wrapping.
    #[error("validation failed: {0}")]
    Validation(#[from] ValidationErrors),

    /// A domain rule rejected the command; the kind is preserved.
    #[error("{operation}: {source}")]
    Domain {
        operation: &'static str,
        source: DomainError,
    },

    /// No such aggregate/document at this boundary.
    #[error("{operation}: not found")]
    NotFound { operation: &'static str },

    /// Optimistic concurrency conflict; retriable, the caller decides.
    #[error("{operation}: concurrent update, reload and retry")]
    ConcurrentUpdate { operation: &'static str },

    /// No authenticated user in the request context.
    #[error("{operation}: unauthorized")]
    Unauthorized { operation: &'static str },

    /// The caller is authenticated but not allowed to see/do this.
    #[error("{operation}: forbidden")]
    Forbidden { operation: &'static str },

    /// The request context was cancelled or timed out.
    #[error("request aborted: {0}")]
    Aborted(#[from] ContextError),

    /// A dependency (store, bus, directory) failed.
    #[error("{operation}: dependency failure: {message}")]
    Dependency {
        operation: &'static str,
        message: String,
    },
}

impl AppError {
    /// Retriable errors may succeed on a fresh attempt without operator action.
    pub fn is_retriable(&self) -> bool {
        matches!(self, AppError::ConcurrentUpdate { .. })
    }

    pub(crate) fn domain(operation: &'static str, source: DomainError) -> Self {
        Self::Domain { operation, source }
    }

    pub(crate) fn from_repository(operation: &'static str, err: RepositoryError) -> Self {
        match err {
            RepositoryError::AggregateNotFound(_) => AppError::NotFound { operation },
            RepositoryError::Concurrency(_) => AppError::ConcurrentUpdate { operation },
            other => AppError::Dependency {
                operation,
                message: other.to_string(),
            },
        }
    }
}
