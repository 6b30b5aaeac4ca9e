//! Cancellation scopes for outbound calls
//!
//! A [`CallContext`] is a cloneable cancellation scope with an optional
//! deadline, the cause of its cancellation, and an optional execution id used
//! to correlate tracing spans. Children are cancelled with their parent.
//! [`merge`] joins two unrelated scopes so that either one can abort the work.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::error::{catalog, CanonicalError};

/// Why a context finished
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CancelCause {
    Canceled,
    DeadlineExceeded,
}

impl CancelCause {
    pub fn to_canonical(self) -> Arc<CanonicalError> {
        match self {
            CancelCause::Canceled => catalog::canceled(),
            CancelCause::DeadlineExceeded => catalog::deadline_exceeded(),
        }
    }
}

impl fmt::Display for CancelCause {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CancelCause::Canceled => write!(f, "context canceled"),
            CancelCause::DeadlineExceeded => write!(f, "context deadline exceeded"),
        }
    }
}

struct ContextInner {
    token: CancellationToken,
    deadline: Option<Instant>,
    cause: Mutex<Option<CancelCause>>,
    parent: Option<CallContext>,
    execution_id: Option<Uuid>,
}

impl ContextInner {
    /// First cause wins
    fn record(&self, cause: CancelCause) -> CancelCause {
        *self.cause.lock().get_or_insert(cause)
    }
}

/// Cancellation scope handed to every attempt of an outbound call
///
/// The background context (`inner == None`) is never cancelled and has no
/// deadline.
#[derive(Clone)]
pub struct CallContext {
    inner: Option<Arc<ContextInner>>,
}

impl CallContext {
    /// The root context
    pub fn background() -> Self {
        Self { inner: None }
    }

    pub fn is_background(&self) -> bool {
        self.inner.is_none()
    }

    fn derive(&self, deadline: Option<Instant>, execution_id: Option<Uuid>) -> Self {
        let token = match &self.inner {
            Some(inner) => inner.token.child_token(),
            None => CancellationToken::new(),
        };
        let deadline = match (self.deadline(), deadline) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        };
        Self {
            inner: Some(Arc::new(ContextInner {
                token,
                deadline,
                cause: Mutex::new(None),
                parent: self.inner.as_ref().map(|_| self.clone()),
                execution_id: execution_id.or_else(|| self.execution_id()),
            })),
        }
    }

    /// Cancellable child scope
    pub fn child(&self) -> Self {
        self.derive(None, None)
    }

    /// Child scope that expires at `deadline` (or earlier if the parent does)
    pub fn with_deadline(&self, deadline: Instant) -> Self {
        self.derive(Some(deadline), None)
    }

    /// Child scope that expires after `timeout`
    pub fn with_timeout(&self, timeout: Duration) -> Self {
        self.with_deadline(Instant::now() + timeout)
    }

    /// Child scope tagged with an execution id
    pub fn with_execution_id(&self, execution_id: Uuid) -> Self {
        self.derive(None, Some(execution_id))
    }

    pub fn execution_id(&self) -> Option<Uuid> {
        self.inner.as_ref().and_then(|inner| inner.execution_id)
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.inner.as_ref().and_then(|inner| inner.deadline)
    }

    /// Time left before the deadline, `None` when there is no deadline
    pub fn remaining(&self) -> Option<Duration> {
        self.deadline()
            .map(|deadline| deadline.saturating_duration_since(Instant::now()))
    }

    /// Cancel this scope and all of its children. No-op on background.
    pub fn cancel(&self) {
        self.cancel_with(CancelCause::Canceled);
    }

    pub(crate) fn cancel_with(&self, cause: CancelCause) {
        if let Some(inner) = &self.inner {
            inner.record(cause);
            inner.token.cancel();
        }
    }

    /// Why this scope finished, or `None` while it is still live
    pub fn err(&self) -> Option<CancelCause> {
        let inner = self.inner.as_ref()?;
        if let Some(cause) = *inner.cause.lock() {
            return Some(cause);
        }
        if let Some(cause) = inner.parent.as_ref().and_then(CallContext::err) {
            let cause = inner.record(cause);
            inner.token.cancel();
            return Some(cause);
        }
        if inner.deadline.is_some_and(|deadline| Instant::now() >= deadline) {
            let cause = inner.record(CancelCause::DeadlineExceeded);
            inner.token.cancel();
            return Some(cause);
        }
        if inner.token.is_cancelled() {
            return Some(inner.record(CancelCause::Canceled));
        }
        None
    }

    pub fn is_done(&self) -> bool {
        self.err().is_some()
    }

    /// Resolve once this scope is cancelled or its deadline passes
    ///
    /// Never resolves for the background context.
    pub async fn done(&self) -> CancelCause {
        let Some(inner) = &self.inner else {
            return std::future::pending().await;
        };

        match inner.deadline {
            Some(deadline) => {
                tokio::select! {
                    _ = inner.token.cancelled() => {}
                    _ = tokio::time::sleep_until(deadline) => {
                        self.cancel_with(CancelCause::DeadlineExceeded);
                    }
                }
            }
            None => inner.token.cancelled().await,
        }

        self.err().unwrap_or(CancelCause::Canceled)
    }

    /// Propagate the remaining time budget as the `grpc-timeout` header
    pub fn apply_to_request<T>(&self, request: &mut tonic::Request<T>) {
        if let Some(remaining) = self.remaining() {
            request.set_timeout(remaining);
        }
    }

    fn same_scope(&self, other: &CallContext) -> bool {
        match (&self.inner, &other.inner) {
            (Some(a), Some(b)) => Arc::ptr_eq(a, b),
            (None, None) => true,
            _ => false,
        }
    }
}

impl Default for CallContext {
    fn default() -> Self {
        Self::background()
    }
}

impl fmt::Debug for CallContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.inner {
            None => f.write_str("CallContext::background"),
            Some(inner) => f
                .debug_struct("CallContext")
                .field("deadline", &inner.deadline)
                .field("cause", &*inner.cause.lock())
                .field("execution_id", &inner.execution_id)
                .finish(),
        }
    }
}

/// Cancels a merged context when dropped or when [`CancelGuard::cancel`] is called
#[must_use = "dropping the guard cancels the merged context"]
pub struct CancelGuard {
    context: Option<CallContext>,
}

impl CancelGuard {
    fn noop() -> Self {
        Self { context: None }
    }

    pub fn cancel(mut self) {
        if let Some(context) = self.context.take() {
            context.cancel();
        }
    }
}

impl Drop for CancelGuard {
    fn drop(&mut self) {
        if let Some(context) = self.context.take() {
            context.cancel();
        }
    }
}

/// Join two scopes: the result finishes as soon as either parent does
///
/// The cause of whichever parent finished first is kept. If either parent is
/// the background context the other one is returned as is and the guard does
/// nothing. Otherwise a watcher task is spawned on the current tokio runtime;
/// it exits as soon as either parent finishes or the merged scope is
/// cancelled.
pub fn merge(a: &CallContext, b: &CallContext) -> (CallContext, CancelGuard) {
    if a.is_background() {
        return (b.clone(), CancelGuard::noop());
    }
    if b.is_background() || a.same_scope(b) {
        return (a.clone(), CancelGuard::noop());
    }

    let deadline = match (a.deadline(), b.deadline()) {
        (Some(x), Some(y)) => Some(x.min(y)),
        (x, y) => x.or(y),
    };
    let merged = CallContext {
        inner: Some(Arc::new(ContextInner {
            token: CancellationToken::new(),
            deadline,
            cause: Mutex::new(None),
            parent: None,
            execution_id: a.execution_id().or_else(|| b.execution_id()),
        })),
    };

    if let Some(cause) = a.err().or_else(|| b.err()) {
        merged.cancel_with(cause);
        return (merged.clone(), CancelGuard { context: Some(merged) });
    }

    let (left, right, watched) = (a.clone(), b.clone(), merged.clone());
    tokio::spawn(async move {
        let Some(token) = watched.inner.as_ref().map(|inner| inner.token.clone()) else {
            return;
        };
        tokio::select! {
            cause = left.done() => watched.cancel_with(cause),
            cause = right.done() => watched.cancel_with(cause),
            _ = token.cancelled() => {}
        }
    });

    (merged.clone(), CancelGuard { context: Some(merged) })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn strong_count(ctx: &CallContext) -> usize {
        ctx.inner.as_ref().map(Arc::strong_count).unwrap_or(0)
    }

    #[test]
    fn test_background_is_never_done() {
        let ctx = CallContext::background();
        ctx.cancel();
        assert!(ctx.err().is_none());
        assert!(ctx.remaining().is_none());
    }

    #[tokio::test]
    async fn test_child_is_cancelled_with_parent() {
        let parent = CallContext::background().child();
        let child = parent.with_timeout(Duration::from_secs(60));

        parent.cancel();
        assert_eq!(child.err(), Some(CancelCause::Canceled));
        assert_eq!(child.done().await, CancelCause::Canceled);
    }

    #[tokio::test(start_paused = true)]
    async fn test_deadline_expires() {
        let ctx = CallContext::background().with_timeout(Duration::from_millis(100));
        assert!(ctx.err().is_none());

        let cause = ctx.done().await;
        assert_eq!(cause, CancelCause::DeadlineExceeded);
        assert_eq!(ctx.err(), Some(CancelCause::DeadlineExceeded));
    }

    #[test]
    fn test_child_deadline_never_outlives_parent() {
        let parent = CallContext::background().with_timeout(Duration::from_millis(10));
        let child = parent.with_timeout(Duration::from_secs(10));
        assert_eq!(child.deadline(), parent.deadline());
    }

    #[test]
    fn test_first_cause_wins() {
        let ctx = CallContext::background().child();
        ctx.cancel_with(CancelCause::DeadlineExceeded);
        ctx.cancel();
        assert_eq!(ctx.err(), Some(CancelCause::DeadlineExceeded));
    }

    #[test]
    fn test_merge_with_background_returns_other_parent() {
        let live = CallContext::background().child();

        let (merged, _guard) = merge(&CallContext::background(), &live);
        assert!(merged.same_scope(&live));

        let (merged, guard) = merge(&live, &CallContext::background());
        assert!(merged.same_scope(&live));
        drop(guard);
        assert!(live.err().is_none());
    }

    #[tokio::test]
    async fn test_merge_cancelled_by_either_parent() {
        let caller = CallContext::background().child();
        let internal = CallContext::background().with_execution_id(Uuid::new_v4());

        let (merged, _guard) = merge(&caller, &internal);
        assert_eq!(merged.execution_id(), internal.execution_id());

        internal.cancel();
        assert_eq!(merged.done().await, CancelCause::Canceled);
        assert!(caller.err().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_merge_keeps_cause_of_first_parent() {
        let caller = CallContext::background().with_timeout(Duration::from_millis(50));
        let internal = CallContext::background().child();

        let (merged, _guard) = merge(&caller, &internal);
        let cause = merged.done().await;
        internal.cancel();

        assert_eq!(cause, CancelCause::DeadlineExceeded);
        assert_eq!(merged.err(), Some(CancelCause::DeadlineExceeded));
    }

    #[tokio::test]
    async fn test_merge_of_finished_parent_is_finished() {
        let caller = CallContext::background().child();
        caller.cancel();
        let internal = CallContext::background().child();

        let (merged, _guard) = merge(&caller, &internal);
        assert_eq!(merged.err(), Some(CancelCause::Canceled));
        assert_eq!(strong_count(&internal), 1);
    }

    #[tokio::test]
    async fn test_watcher_released_when_guard_drops() {
        let caller = CallContext::background().child();
        let internal = CallContext::background().child();

        let (merged, guard) = merge(&caller, &internal);
        assert_eq!(strong_count(&caller), 2);

        drop(guard);
        for _ in 0..10 {
            if strong_count(&caller) == 1 {
                break;
            }
            tokio::task::yield_now().await;
        }

        assert_eq!(strong_count(&caller), 1);
        assert_eq!(merged.err(), Some(CancelCause::Canceled));
        assert!(caller.err().is_none());
    }
}
