//! Resilience policies for outbound calls
//!
//! This module provides the retry, circuit breaker and timeout policies and
//! the [`ResilientExecutor`] that composes them around a remote call.
//!
//! ## Composition
//!
//! ```text
//! ┌──────────────────────────────────────────┐
//! │ Retry (backoff + jitter, abort codes)    │
//! │  ┌────────────────────────────────────┐  │
//! │  │ CircuitBreaker (m of n window)     │  │
//! │  │  ┌──────────────────────────────┐  │  │
//! │  │  │ Timeout (per attempt)        │  │  │
//! │  │  │  invoke(attempt context)     │  │  │
//! │  │  └──────────────────────────────┘  │  │
//! │  └────────────────────────────────────┘  │
//! └──────────────────────────────────────────┘
//! ```

pub mod circuit_breaker;
pub mod executor;
pub mod registry;
pub mod retry;
pub mod telemetry;
pub mod timeout;

pub use circuit_breaker::{
    CircuitBreaker, CircuitBreakerPolicy, CircuitBreakerState, CircuitBreakerStats,
    ParseRatioError, Permit, ThresholdRatio,
};
pub use executor::{ExecutionPolicy, RemoteCall, ResilientExecutor};
pub use registry::ExecutorRegistry;
pub use retry::{RetryDecision, RetryPolicy};
pub use telemetry::{
    ExecutionAttempt, ExecutionObserver, RecordingObserver, StateTransition, TracingObserver,
};
pub use timeout::TimeoutPolicy;
