//! Execution telemetry: per-attempt records, breaker transitions and spans

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use tracing::{info, warn};
use uuid::Uuid;

use super::circuit_breaker::CircuitBreakerState;
use crate::error::CanonicalError;

/// One attempt of an execution, handed to observers once it finishes
#[derive(Debug, Clone)]
pub struct ExecutionAttempt {
    pub execution_id: Uuid,
    pub method: String,
    pub target: String,
    /// 1-based
    pub attempt_number: u32,
    pub start_time: DateTime<Utc>,
    pub elapsed: Duration,
    pub is_first_attempt: bool,
    pub is_retry: bool,
    /// Always false; hedged attempts are never launched
    pub is_hedge: bool,
    /// Classified failure of this attempt, `None` on success
    pub last_error: Option<Arc<CanonicalError>>,
}

impl ExecutionAttempt {
    pub fn succeeded(&self) -> bool {
        self.last_error.is_none()
    }
}

/// A circuit breaker changed state
#[derive(Debug, Clone, PartialEq)]
pub struct StateTransition {
    pub target: String,
    pub from: CircuitBreakerState,
    pub to: CircuitBreakerState,
    /// Outcomes observed in the state being left
    pub executions: u64,
    pub failures: u64,
    pub successes: u64,
    pub failure_rate: f64,
    pub success_rate: f64,
}

impl StateTransition {
    pub(crate) fn new(
        target: &str,
        from: CircuitBreakerState,
        to: CircuitBreakerState,
        failures: u64,
        successes: u64,
    ) -> Self {
        let executions = failures + successes;
        let (failure_rate, success_rate) = if executions == 0 {
            (0.0, 0.0)
        } else {
            (
                failures as f64 / executions as f64,
                successes as f64 / executions as f64,
            )
        };
        Self {
            target: target.to_string(),
            from,
            to,
            executions,
            failures,
            successes,
            failure_rate,
            success_rate,
        }
    }
}

/// Hook receiving execution telemetry
///
/// Callbacks run synchronously on the calling task and must not block.
pub trait ExecutionObserver: Send + Sync {
    fn on_attempt(&self, _attempt: &ExecutionAttempt) {}

    fn on_state_change(&self, _transition: &StateTransition) {}
}

/// Observer that writes telemetry to the `tracing` pipeline
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingObserver;

impl ExecutionObserver for TracingObserver {
    fn on_attempt(&self, attempt: &ExecutionAttempt) {
        match &attempt.last_error {
            None => tracing::debug!(
                execution_id = %attempt.execution_id,
                method = %attempt.method,
                target_service = %attempt.target,
                attempt = attempt.attempt_number,
                elapsed_ms = attempt.elapsed.as_millis() as u64,
                "Attempt succeeded"
            ),
            Some(error) => tracing::debug!(
                execution_id = %attempt.execution_id,
                method = %attempt.method,
                target_service = %attempt.target,
                attempt = attempt.attempt_number,
                elapsed_ms = attempt.elapsed.as_millis() as u64,
                error = %error,
                "Attempt failed"
            ),
        }
    }

    fn on_state_change(&self, t: &StateTransition) {
        if t.to == CircuitBreakerState::Open {
            warn!(
                target_service = %t.target,
                from = %t.from,
                to = %t.to,
                executions = t.executions,
                failures = t.failures,
                failure_rate = t.failure_rate,
                "Circuit breaker opened"
            );
        } else {
            info!(
                target_service = %t.target,
                from = %t.from,
                to = %t.to,
                executions = t.executions,
                successes = t.successes,
                success_rate = t.success_rate,
                "Circuit breaker state changed"
            );
        }
    }
}

/// Observer that keeps everything it sees, for assertions in tests
#[derive(Debug, Default)]
pub struct RecordingObserver {
    attempts: Mutex<Vec<ExecutionAttempt>>,
    transitions: Mutex<Vec<StateTransition>>,
}

impl RecordingObserver {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn attempts(&self) -> Vec<ExecutionAttempt> {
        self.attempts.lock().clone()
    }

    pub fn transitions(&self) -> Vec<StateTransition> {
        self.transitions.lock().clone()
    }
}

impl ExecutionObserver for RecordingObserver {
    fn on_attempt(&self, attempt: &ExecutionAttempt) {
        self.attempts.lock().push(attempt.clone());
    }

    fn on_state_change(&self, transition: &StateTransition) {
        self.transitions.lock().push(transition.clone());
    }
}

/// Span covering one execution, all of its attempts and backoff sleeps
pub fn execution_span(method: &str, target: &str, execution_id: Uuid) -> tracing::Span {
    tracing::info_span!(
        "rpc.execution",
        otel.name = method,
        rpc.system = "grpc",
        rpc.method = method,
        peer.service = target,
        execution.id = %execution_id,
        attempts = tracing::field::Empty,
        error = tracing::field::Empty,
    )
}

/// Span covering a single attempt
///
/// `attempt.elapsed_ms`, `error`, `error.message` and `otel.status_code` are
/// filled in by [`record_attempt`] once the attempt finishes.
pub fn attempt_span(
    method: &str,
    target: &str,
    attempt_number: u32,
    start_time: DateTime<Utc>,
) -> tracing::Span {
    tracing::info_span!(
        "rpc.attempt",
        otel.name = method,
        rpc.method = method,
        peer.service = target,
        attempt = attempt_number,
        attempt.first = attempt_number == 1,
        attempt.retry = attempt_number > 1,
        attempt.hedge = false,
        attempt.start = %start_time.to_rfc3339(),
        attempt.elapsed_ms = tracing::field::Empty,
        error = tracing::field::Empty,
        error.message = tracing::field::Empty,
        otel.status_code = tracing::field::Empty,
    )
}

pub fn record_attempt(span: &tracing::Span, attempt: &ExecutionAttempt) {
    span.record("attempt.elapsed_ms", attempt.elapsed.as_millis() as u64);
    match &attempt.last_error {
        None => {
            span.record("otel.status_code", "OK");
        }
        Some(error) => {
            span.record("otel.status_code", "ERROR");
            span.record("error", error.code());
            span.record("error.message", error.message());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tracing_test::traced_test;

    #[test]
    fn test_transition_rates() {
        let t = StateTransition::new(
            "theater",
            CircuitBreakerState::Closed,
            CircuitBreakerState::Open,
            3,
            1,
        );
        assert_eq!(t.executions, 4);
        assert_eq!(t.failure_rate, 0.75);
        assert_eq!(t.success_rate, 0.25);

        let empty = StateTransition::new(
            "theater",
            CircuitBreakerState::Open,
            CircuitBreakerState::HalfOpen,
            0,
            0,
        );
        assert_eq!(empty.failure_rate, 0.0);
    }

    #[test]
    #[traced_test]
    fn test_tracing_observer_warns_on_open() {
        let t = StateTransition::new(
            "user",
            CircuitBreakerState::Closed,
            CircuitBreakerState::Open,
            5,
            5,
        );
        TracingObserver.on_state_change(&t);
        assert!(logs_contain("Circuit breaker opened"));
        assert!(logs_contain("WARN"));
    }

    #[test]
    #[traced_test]
    fn test_failed_attempt_span_carries_error() {
        let span = attempt_span("theater.v1.TheaterService/GetShowtimes", "theater", 2, Utc::now());
        let attempt = ExecutionAttempt {
            execution_id: Uuid::new_v4(),
            method: "theater.v1.TheaterService/GetShowtimes".to_string(),
            target: "theater".to_string(),
            attempt_number: 2,
            start_time: Utc::now(),
            elapsed: Duration::from_millis(12),
            is_first_attempt: false,
            is_retry: true,
            is_hedge: false,
            last_error: Some(crate::error::catalog::unavailable()),
        };

        record_attempt(&span, &attempt);
        span.in_scope(|| info!("attempt finished"));

        assert!(logs_contain("otel.status_code=\"ERROR\""));
        assert!(logs_contain("error=\"UNAVAILABLE\""));
        assert!(logs_contain(&format!(
            "error.message={:?}",
            crate::error::catalog::unavailable().message()
        )));
    }

    #[test]
    fn test_recording_observer_keeps_order() {
        let observer = RecordingObserver::new();
        for to in [CircuitBreakerState::Open, CircuitBreakerState::HalfOpen] {
            observer.on_state_change(&StateTransition::new(
                "search",
                CircuitBreakerState::Closed,
                to,
                0,
                0,
            ));
        }
        let seen: Vec<_> = observer.transitions().into_iter().map(|t| t.to).collect();
        assert_eq!(
            seen,
            vec![CircuitBreakerState::Open, CircuitBreakerState::HalfOpen]
        );
    }
}
