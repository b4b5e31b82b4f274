//! Request-scoped ambient state.
//!
//! Every request carries its actor, workspace and correlation identifiers in a
//! single context object with typed getters; no thread-local or singleton
//! state. The context also propagates cancellation and an optional deadline,
//! which long-running operations check at I/O boundaries.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use chrono::{DateTime, Utc};
use thiserror::Error;
use uuid::Uuid;

use crate::id::{UserId, WorkspaceId};

/// Error raised when reading absent context values or using a dead context.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ContextError {
    #[error("user id not found in context")]
    UserIdNotFound,

    #[error("workspace id not found in context")]
    WorkspaceIdNotFound,

    /// The request was cancelled; abort the current step.
    #[error("request cancelled")]
    Cancelled,

    #[error("request deadline exceeded")]
    DeadlineExceeded,
}

#[derive(Debug, Default)]
struct ContextState {
    cancelled: AtomicBool,
}

/// Immutable request context, cheap to clone across workers.
///
/// `correlation_id` spans the whole logical request; `causation_id` is the id
/// of the message that directly caused this one (equal to the correlation id
/// at the request edge).
#[derive(Debug, Clone)]
pub struct RequestContext {
    user_id: Option<UserId>,
    workspace_id: Option<WorkspaceId>,
    correlation_id: Uuid,
    causation_id: Uuid,
    deadline: Option<DateTime<Utc>>,
    state: Arc<ContextState>,
}

impl RequestContext {
    /// Fresh context with a new correlation id and no identity attached.
    pub fn new() -> Self {
        let correlation_id = Uuid::now_v7();
        Self {
            user_id: None,
            workspace_id: None,
            correlation_id,
            causation_id: correlation_id,
            deadline: None,
            state: Arc::new(ContextState::default()),
        }
    }

    pub fn with_user(mut self, user_id: UserId) -> Self {
        self.user_id = Some(user_id);
        self
    }

    pub fn with_workspace(mut self, workspace_id: WorkspaceId) -> Self {
        self.workspace_id = Some(workspace_id);
        self
    }

    pub fn with_correlation(mut self, correlation_id: Uuid) -> Self {
        self.correlation_id = correlation_id;
        self
    }

    pub fn with_causation(mut self, causation_id: Uuid) -> Self {
        self.causation_id = causation_id;
        self
    }

    pub fn with_deadline(mut self, deadline: DateTime<Utc>) -> Self {
        self.deadline = Some(deadline);
        self
    }

    /// Actor identity; absent on anonymous/internal requests.
    pub fn user_id(&self) -> Result<UserId, ContextError> {
        self.user_id.ok_or(ContextError::UserIdNotFound)
    }

    pub fn workspace_id(&self) -> Result<WorkspaceId, ContextError> {
        self.workspace_id.ok_or(ContextError::WorkspaceIdNotFound)
    }

    pub fn correlation_id(&self) -> Uuid {
        self.correlation_id
    }

    pub fn causation_id(&self) -> Uuid {
        self.causation_id
    }

    pub fn deadline(&self) -> Option<DateTime<Utc>> {
        self.deadline
    }

    /// Cancel the request. All clones observe the flag.
    pub fn cancel(&self) {
        self.state.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.state.cancelled.load(Ordering::SeqCst)
    }

    /// Check cancellation and deadline; call before every I/O step and again
    /// before committing.
    pub fn ensure_active(&self) -> Result<(), ContextError> {
        if self.is_cancelled() {
            return Err(ContextError::Cancelled);
        }
        if let Some(deadline) = self.deadline {
            if Utc::now() >= deadline {
                return Err(ContextError::DeadlineExceeded);
            }
        }
        Ok(())
    }
}

impl Default for RequestContext {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn typed_getters_fail_when_absent() {
        let ctx = RequestContext::new();
        assert_eq!(ctx.user_id().unwrap_err(), ContextError::UserIdNotFound);
        assert_eq!(
            ctx.workspace_id().unwrap_err(),
            ContextError::WorkspaceIdNotFound
        );
    }

    #[test]
    fn typed_getters_return_attached_values() {
        let user = UserId::new();
        let ws = WorkspaceId::new();
        let ctx = RequestContext::new().with_user(user).with_workspace(ws);

        assert_eq!(ctx.user_id().unwrap(), user);
        assert_eq!(ctx.workspace_id().unwrap(), ws);
    }

    #[test]
    fn causation_defaults_to_correlation() {
        let ctx = RequestContext::new();
        assert_eq!(ctx.correlation_id(), ctx.causation_id());
    }

    #[test]
    fn cancellation_is_shared_across_clones() {
        let ctx = RequestContext::new();
        let clone = ctx.clone();

        assert!(ctx.ensure_active().is_ok());
        clone.cancel();
        assert_eq!(ctx.ensure_active().unwrap_err(), ContextError::Cancelled);
    }

    #[test]
    fn expired_deadline_fails_ensure_active() {
        let ctx = RequestContext::new().with_deadline(Utc::now() - Duration::seconds(1));
        assert_eq!(
            ctx.ensure_active().unwrap_err(),
            ContextError::DeadlineExceeded
        );
    }
}
