//! Resilient executor for outbound calls
//!
//! Policies compose from the outside in: retry, then circuit breaker, then
//! per-attempt timeout around the invocation. Every attempt runs under the
//! caller's context merged with an execution scope, so cancelling either one
//! aborts the attempt in flight as well as any retry still to come.

use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use tokio::time::{sleep, Instant};
use tracing::{debug, warn, Instrument};
use uuid::Uuid;

use super::circuit_breaker::{CircuitBreaker, CircuitBreakerPolicy, Permit};
use super::retry::{RetryDecision, RetryPolicy};
use super::telemetry::{self, ExecutionAttempt, ExecutionObserver, TracingObserver};
use super::timeout::TimeoutPolicy;
use crate::context::{self, CallContext};
use crate::error::{CanonicalError, ErrorMapper, ServiceError};

/// Resilience settings for one downstream dependency
#[derive(Debug, Clone, Default)]
pub struct ExecutionPolicy {
    pub retry: RetryPolicy,
    pub circuit_breaker: CircuitBreakerPolicy,
    pub timeout: TimeoutPolicy,
}

/// A typed outbound call, for clients that prefer one type per RPC
///
/// ```rust,no_run
/// use async_trait::async_trait;
/// use marquee_core::context::CallContext;
/// use marquee_core::error::ServiceError;
/// use marquee_core::resilience::RemoteCall;
///
/// struct GetShowtimes {
///     theater_id: String,
/// }
///
/// #[async_trait]
/// impl RemoteCall for GetShowtimes {
///     type Output = Vec<String>;
///
///     fn method(&self) -> &str {
///         "theater.v1.TheaterService/GetShowtimes"
///     }
///
///     async fn call(&self, _ctx: CallContext) -> Result<Vec<String>, ServiceError> {
///         Ok(vec![format!("{}: 19:30", self.theater_id)])
///     }
/// }
/// ```
#[async_trait]
pub trait RemoteCall: Send + Sync {
    type Output: Send;

    /// Fully qualified RPC method, used for spans and telemetry
    fn method(&self) -> &str;

    /// Perform one attempt; `ctx` carries the attempt deadline
    async fn call(&self, ctx: CallContext) -> Result<Self::Output, ServiceError>;
}

/// Runs outbound calls to one dependency under its [`ExecutionPolicy`]
///
/// Share one executor (usually through
/// [`ExecutorRegistry`](super::ExecutorRegistry)) between every caller of a
/// dependency so that they also share its circuit breaker.
pub struct ResilientExecutor {
    target: String,
    policy: ExecutionPolicy,
    breaker: CircuitBreaker,
    mapper: ErrorMapper,
    observer: Arc<dyn ExecutionObserver>,
}

impl ResilientExecutor {
    pub fn new(target: impl Into<String>, policy: ExecutionPolicy, mapper: ErrorMapper) -> Self {
        Self::with_observer(target, policy, mapper, Arc::new(TracingObserver))
    }

    pub fn with_observer(
        target: impl Into<String>,
        policy: ExecutionPolicy,
        mapper: ErrorMapper,
        observer: Arc<dyn ExecutionObserver>,
    ) -> Self {
        let target = target.into();
        let breaker = CircuitBreaker::with_observer(
            target.clone(),
            policy.circuit_breaker.clone(),
            Arc::clone(&observer),
        );
        Self {
            target,
            policy,
            breaker,
            mapper,
            observer,
        }
    }

    pub fn target(&self) -> &str {
        &self.target
    }

    pub fn policy(&self) -> &ExecutionPolicy {
        &self.policy
    }

    pub fn breaker(&self) -> &CircuitBreaker {
        &self.breaker
    }

    /// Run `invoke` until it succeeds or the policy gives up
    ///
    /// `invoke` is called once per attempt with a context that carries the
    /// attempt deadline. The error is always classified: callers see the
    /// canonical error of the last attempt, `CIRCUIT_OPEN` when the breaker
    /// refused the call, or `CANCELED` / `DEADLINE_EXCEEDED` when `ctx`
    /// finished first.
    pub async fn execute<T, E, F, Fut>(
        &self,
        ctx: &CallContext,
        method: &str,
        mut invoke: F,
    ) -> Result<T, Arc<CanonicalError>>
    where
        F: FnMut(CallContext) -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: Into<ServiceError>,
    {
        let execution_id = Uuid::new_v4();
        let internal = CallContext::background().with_execution_id(execution_id);
        let (merged, guard) = context::merge(ctx, &internal);

        let span = telemetry::execution_span(method, &self.target, execution_id);
        let result = self
            .run_attempts(&merged, method, execution_id, &mut invoke)
            .instrument(span.clone())
            .await;
        guard.cancel();

        if let Err(error) = &result {
            span.record("error", error.code());
        }
        result
    }

    /// Run a [`RemoteCall`] under the policy
    pub async fn execute_call<C>(
        &self,
        ctx: &CallContext,
        call: &C,
    ) -> Result<C::Output, Arc<CanonicalError>>
    where
        C: RemoteCall,
    {
        self.execute(ctx, call.method(), |attempt_ctx| call.call(attempt_ctx))
            .await
    }

    async fn run_attempts<T, E, F, Fut>(
        &self,
        merged: &CallContext,
        method: &str,
        execution_id: Uuid,
        invoke: &mut F,
    ) -> Result<T, Arc<CanonicalError>>
    where
        F: FnMut(CallContext) -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: Into<ServiceError>,
    {
        let retry = &self.policy.retry;
        let mut attempt = 0u32;

        loop {
            attempt += 1;
            tracing::Span::current().record("attempts", attempt);

            if let Some(cause) = merged.err() {
                debug!(%cause, attempt, "Execution aborted before attempt");
                return Err(cause.to_canonical());
            }

            let error = match self.breaker.try_acquire() {
                Err(rejected) => rejected,
                Ok(permit) => {
                    let start_time = Utc::now();
                    let started = Instant::now();
                    let attempt_span = telemetry::attempt_span(method, &self.target, attempt, start_time);

                    let outcome = tokio::select! {
                        biased;
                        cause = merged.done() => {
                            self.breaker.release(permit);
                            debug!(%cause, attempt, "Execution aborted during attempt");
                            return Err(cause.to_canonical());
                        }
                        outcome = self
                            .policy
                            .timeout
                            .run(merged, &mut *invoke)
                            .instrument(attempt_span.clone()) => outcome,
                    };

                    let finished = |last_error: Option<Arc<CanonicalError>>| ExecutionAttempt {
                        execution_id,
                        method: method.to_string(),
                        target: self.target.clone(),
                        attempt_number: attempt,
                        start_time,
                        elapsed: started.elapsed(),
                        is_first_attempt: attempt == 1,
                        is_retry: attempt > 1,
                        is_hedge: false,
                        last_error,
                    };

                    match outcome {
                        Ok(value) => {
                            self.finish_attempt(permit, &attempt_span, finished(None));
                            return Ok(value);
                        }
                        Err(err) => {
                            let (error, _known) = self.mapper.classify(&err);
                            self.finish_attempt(
                                permit,
                                &attempt_span,
                                finished(Some(Arc::clone(&error))),
                            );
                            error
                        }
                    }
                }
            };

            match retry.decide(&error, attempt) {
                RetryDecision::Retry => {
                    let delay = retry.delay(attempt);
                    warn!(
                        attempt,
                        max_attempts = retry.max_attempts,
                        error = %error,
                        delay_ms = delay.as_millis() as u64,
                        "Retrying {} on {}",
                        method,
                        self.target
                    );
                    tokio::select! {
                        biased;
                        cause = merged.done() => {
                            debug!(%cause, attempt, "Execution aborted during backoff");
                            return Err(cause.to_canonical());
                        }
                        _ = sleep(delay) => {}
                    }
                }
                RetryDecision::Exhausted => {
                    warn!(
                        attempts = attempt,
                        error = %error,
                        "Retry attempts exhausted for {} on {}",
                        method,
                        self.target
                    );
                    return Err(error);
                }
                RetryDecision::Abort | RetryDecision::NotRetryable => {
                    debug!(attempt, error = %error, "Not retrying");
                    return Err(error);
                }
            }
        }
    }
}

impl ResilientExecutor {
    fn finish_attempt(&self, permit: Permit<'_>, span: &tracing::Span, attempt: ExecutionAttempt) {
        self.breaker.record(permit, attempt.last_error.as_deref());
        telemetry::record_attempt(span, &attempt);
        self.observer.on_attempt(&attempt);
    }
}

impl std::fmt::Debug for ResilientExecutor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResilientExecutor")
            .field("target", &self.target)
            .field("policy", &self.policy)
            .field("breaker", &self.breaker)
            .finish()
    }
}
