//! Per-attempt timeout

use std::future::Future;
use std::time::Duration;

use tokio::time::timeout;

use crate::config::defaults::*;
use crate::context::CallContext;
use crate::error::{catalog, ServiceError};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeoutPolicy {
    pub per_attempt: Duration,
}

impl Default for TimeoutPolicy {
    fn default() -> Self {
        Self {
            per_attempt: duration_millis(DEFAULT_ATTEMPT_TIMEOUT_MS),
        }
    }
}

impl TimeoutPolicy {
    pub fn new(per_attempt: Duration) -> Self {
        Self { per_attempt }
    }

    /// Run one attempt bounded by `per_attempt`
    ///
    /// `invoke` receives a child of `ctx` carrying the attempt deadline so the
    /// callee can forward it. When the time is up the invocation future is
    /// dropped and `DEADLINE_EXCEEDED` is returned.
    pub async fn run<T, E, F, Fut>(&self, ctx: &CallContext, invoke: F) -> Result<T, ServiceError>
    where
        F: FnOnce(CallContext) -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: Into<ServiceError>,
    {
        let attempt_ctx = ctx.with_timeout(self.per_attempt);
        let outcome = timeout(self.per_attempt, invoke(attempt_ctx.clone())).await;
        // Tear down the attempt scope so nothing keeps running under it
        attempt_ctx.cancel();

        match outcome {
            Ok(result) => result.map_err(Into::into),
            Err(_) => Err(ServiceError::Canonical(catalog::deadline_exceeded())),
        }
    }
}
