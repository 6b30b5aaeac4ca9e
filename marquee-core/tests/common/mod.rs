//! Shared helpers for marquee-core integration tests

#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use marquee_core::context::CallContext;
use marquee_core::error::{CanonicalError, ErrorMapper, ErrorRegistry, ServiceError};
use marquee_core::resilience::{
    CircuitBreakerPolicy, ExecutionPolicy, RecordingObserver, ResilientExecutor, RetryPolicy,
    TimeoutPolicy,
};
use parking_lot::Mutex;
use tokio::time::Instant;

/// What a scripted call does
#[derive(Clone)]
pub enum Step {
    Ok(&'static str),
    Fail(Arc<CanonicalError>),
    Status(tonic::Status),
    Hang,
}

/// Downstream dependency that replays a script, then keeps succeeding
pub struct MockService {
    script: Mutex<VecDeque<Step>>,
    call_count: AtomicU32,
    call_times: Mutex<Vec<Instant>>,
    latency: Duration,
}

impl MockService {
    pub fn new(script: impl IntoIterator<Item = Step>) -> Arc<Self> {
        Self::with_latency(script, Duration::ZERO)
    }

    pub fn with_latency(script: impl IntoIterator<Item = Step>, latency: Duration) -> Arc<Self> {
        Arc::new(Self {
            script: Mutex::new(script.into_iter().collect()),
            call_count: AtomicU32::new(0),
            call_times: Mutex::new(Vec::new()),
            latency,
        })
    }

    pub fn call_count(&self) -> u32 {
        self.call_count.load(Ordering::SeqCst)
    }

    /// When each call started, on the tokio clock
    pub fn call_times(&self) -> Vec<Instant> {
        self.call_times.lock().clone()
    }

    pub async fn call(&self, _ctx: CallContext) -> Result<String, ServiceError> {
        let n = self.call_count.fetch_add(1, Ordering::SeqCst) + 1;
        self.call_times.lock().push(Instant::now());
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }

        let step = self.script.lock().pop_front();
        match step {
            None => Ok(format!("showtimes #{n}")),
            Some(Step::Ok(body)) => Ok(body.to_string()),
            Some(Step::Fail(err)) => Err(ServiceError::Canonical(err)),
            Some(Step::Status(status)) => Err(ServiceError::Rpc(status)),
            Some(Step::Hang) => std::future::pending().await,
        }
    }
}

pub fn mapper() -> ErrorMapper {
    ErrorMapper::new(Arc::new(ErrorRegistry::with_catalog()))
}

/// Policy with short, jitter-free delays
pub fn fast_policy(max_attempts: u32) -> ExecutionPolicy {
    ExecutionPolicy {
        retry: RetryPolicy::exponential(
            max_attempts,
            Duration::from_millis(10),
            Duration::from_millis(80),
        )
        .with_jitter(0.0),
        circuit_breaker: CircuitBreakerPolicy::default()
            .with_failure_threshold(5, 10)
            .with_success_threshold(1, 1)
            .with_open_duration(Duration::from_secs(30)),
        timeout: TimeoutPolicy::new(Duration::from_millis(500)),
    }
}

pub fn executor(policy: ExecutionPolicy) -> (ResilientExecutor, Arc<RecordingObserver>) {
    let observer = RecordingObserver::new();
    let executor = ResilientExecutor::with_observer("theater", policy, mapper(), observer.clone());
    (executor, observer)
}
