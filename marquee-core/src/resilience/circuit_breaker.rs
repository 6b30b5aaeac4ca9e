//! Circuit Breaker for outbound calls
//!
//! The breaker keeps the outcomes of the last `n` calls to a dependency and
//! stops calling it once `m` of them failed. Three states:
//! - **Closed**: calls pass through, outcomes feed the rolling window
//! - **Open**: calls are rejected with `CIRCUIT_OPEN` until `open_duration`
//!   has elapsed
//! - **Half-Open**: at most `n` probe calls are admitted; `m` successes close
//!   the breaker, any handled failure opens it again
//!
//! The Open to Half-Open move has no timer task. It is evaluated whenever the
//! breaker is observed (admission, recording, `state()`).
//!
//! Every state change bumps a generation counter. A [`Permit`] remembers the
//! generation it was issued under, so the outcome of a call that straddled a
//! transition is ignored rather than counted against the new state. A permit
//! dropped without an outcome gives its Half-Open probe slot back.
//!
//! ## Usage
//!
//! ```rust,no_run
//! use marquee_core::error::ServiceError;
//! use marquee_core::resilience::{CircuitBreaker, CircuitBreakerPolicy};
//!
//! # async fn example() -> Result<(), ServiceError> {
//! let breaker = CircuitBreaker::new("theater", CircuitBreakerPolicy::default());
//!
//! let permit = breaker.try_acquire()?;
//! let outcome = fetch_showtimes().await;
//! breaker.record(permit, outcome.as_ref().err());
//! # Ok(())
//! # }
//! # async fn fetch_showtimes() -> Result<(), marquee_core::error::CanonicalError> { Ok(()) }
//! ```

use std::collections::VecDeque;
use std::fmt;
use std::str::FromStr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::time::Instant;
use tracing::debug;

use super::telemetry::{ExecutionObserver, StateTransition, TracingObserver};
use crate::config::defaults::*;
use crate::error::{catalog, CanonicalError};

/// `threshold` out of the last `window` outcomes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ThresholdRatio {
    pub threshold: u32,
    pub window: u32,
}

impl ThresholdRatio {
    pub const fn new(threshold: u32, window: u32) -> Self {
        Self { threshold, window }
    }

    pub fn is_valid(&self) -> bool {
        self.threshold >= 1 && self.threshold <= self.window
    }
}

impl fmt::Display for ThresholdRatio {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.threshold, self.window)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid threshold ratio '{0}', expected 'threshold/window'")]
pub struct ParseRatioError(String);

impl FromStr for ThresholdRatio {
    type Err = ParseRatioError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || ParseRatioError(s.to_string());
        let (threshold, window) = s.split_once('/').ok_or_else(invalid)?;
        let ratio = ThresholdRatio {
            threshold: threshold.trim().parse().map_err(|_| invalid())?,
            window: window.trim().parse().map_err(|_| invalid())?,
        };
        if ratio.is_valid() {
            Ok(ratio)
        } else {
            Err(invalid())
        }
    }
}

/// Circuit breaker states
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitBreakerState {
    /// Normal operation - requests pass through
    Closed,
    /// Failing fast - requests are rejected immediately
    Open,
    /// Testing if the dependency has recovered - limited requests allowed
    HalfOpen,
}

impl fmt::Display for CircuitBreakerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CircuitBreakerState::Closed => write!(f, "closed"),
            CircuitBreakerState::Open => write!(f, "open"),
            CircuitBreakerState::HalfOpen => write!(f, "half-open"),
        }
    }
}

/// Configuration for circuit breaker behavior
#[derive(Debug, Clone)]
pub struct CircuitBreakerPolicy {
    /// Failures out of the last outcomes that open the breaker
    pub failure_threshold: ThresholdRatio,
    /// Successes out of the admitted probes that close it again
    pub success_threshold: ThresholdRatio,
    /// Time spent Open before probing
    pub open_duration: Duration,
    /// Which failures count against the dependency
    pub handled: fn(&CanonicalError) -> bool,
}

impl Default for CircuitBreakerPolicy {
    fn default() -> Self {
        Self {
            failure_threshold: ThresholdRatio::new(DEFAULT_FAILURE_THRESHOLD, DEFAULT_FAILURE_WINDOW),
            success_threshold: ThresholdRatio::new(DEFAULT_SUCCESS_THRESHOLD, DEFAULT_SUCCESS_WINDOW),
            open_duration: duration_secs(DEFAULT_OPEN_DURATION_SECS),
            handled: catalog::is_transient,
        }
    }
}

impl CircuitBreakerPolicy {
    pub fn with_failure_threshold(mut self, threshold: u32, window: u32) -> Self {
        self.failure_threshold = ThresholdRatio::new(threshold, window);
        self
    }

    pub fn with_success_threshold(mut self, threshold: u32, window: u32) -> Self {
        self.success_threshold = ThresholdRatio::new(threshold, window);
        self
    }

    pub fn with_open_duration(mut self, open_duration: Duration) -> Self {
        self.open_duration = open_duration;
        self
    }

    pub fn with_handled(mut self, handled: fn(&CanonicalError) -> bool) -> Self {
        self.handled = handled;
        self
    }
}

/// Statistics for circuit breaker operation
#[derive(Debug, Clone)]
pub struct CircuitBreakerStats {
    pub state: CircuitBreakerState,
    /// Outcomes recorded under a current generation
    pub total_calls: u64,
    pub successful_calls: u64,
    pub failed_calls: u64,
    /// Calls refused while Open or while Half-Open was saturated
    pub rejected_calls: u64,
    /// Failures currently in the rolling window
    pub window_failures: u32,
    pub last_opened_at: Option<Instant>,
    pub last_closed_at: Option<Instant>,
    pub failure_rate: f64,
}

/// Admission to call the dependency once
///
/// Hand it back through [`CircuitBreaker::record`] with the outcome. Dropping
/// it unrecorded (or passing it to [`CircuitBreaker::release`]) treats the
/// call as abandoned and returns its probe slot.
#[must_use = "a permit must be recorded or released"]
pub struct Permit<'a> {
    breaker: &'a CircuitBreaker,
    generation: u64,
    recorded: bool,
}

impl Permit<'_> {
    pub fn generation(&self) -> u64 {
        self.generation
    }
}

impl Drop for Permit<'_> {
    fn drop(&mut self) {
        if !self.recorded {
            self.breaker.return_probe(self.generation);
        }
    }
}

impl fmt::Debug for Permit<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Permit")
            .field("target", &self.breaker.target)
            .field("generation", &self.generation)
            .field("recorded", &self.recorded)
            .finish()
    }
}

/// Outcomes of the last `capacity` calls, `true` meaning failure
struct RollingWindow {
    outcomes: VecDeque<bool>,
    capacity: usize,
    failures: u32,
}

impl RollingWindow {
    fn new(capacity: u32) -> Self {
        let capacity = capacity.max(1) as usize;
        Self {
            outcomes: VecDeque::with_capacity(capacity),
            capacity,
            failures: 0,
        }
    }

    fn push(&mut self, failed: bool) {
        if self.outcomes.len() == self.capacity {
            if let Some(true) = self.outcomes.pop_front() {
                self.failures -= 1;
            }
        }
        self.outcomes.push_back(failed);
        if failed {
            self.failures += 1;
        }
    }

    fn failures(&self) -> u32 {
        self.failures
    }

    fn successes(&self) -> u32 {
        self.outcomes.len() as u32 - self.failures
    }

    fn clear(&mut self) {
        self.outcomes.clear();
        self.failures = 0;
    }
}

struct BreakerCore {
    state: CircuitBreakerState,
    generation: u64,
    window: RollingWindow,
    opened_at: Option<Instant>,
    closed_at: Option<Instant>,
    probes_admitted: u32,
    probe_successes: u32,
    probe_failures: u32,
}

impl BreakerCore {
    /// Failures and successes observed in the current state
    fn tally(&self) -> (u64, u64) {
        match self.state {
            CircuitBreakerState::Closed => (
                self.window.failures() as u64,
                self.window.successes() as u64,
            ),
            CircuitBreakerState::HalfOpen => {
                (self.probe_failures as u64, self.probe_successes as u64)
            }
            CircuitBreakerState::Open => (0, 0),
        }
    }

    fn transition(&mut self, target: &str, to: CircuitBreakerState) -> StateTransition {
        let (failures, successes) = self.tally();
        let event = StateTransition::new(target, self.state, to, failures, successes);

        let now = Instant::now();
        self.state = to;
        self.generation += 1;
        self.probes_admitted = 0;
        self.probe_successes = 0;
        self.probe_failures = 0;
        match to {
            CircuitBreakerState::Open => self.opened_at = Some(now),
            CircuitBreakerState::Closed => {
                self.window.clear();
                self.closed_at = Some(now);
            }
            CircuitBreakerState::HalfOpen => {}
        }
        event
    }

    /// Move Open to Half-Open once the open duration has elapsed
    fn observe(&mut self, target: &str, open_duration: Duration) -> Option<StateTransition> {
        if self.state != CircuitBreakerState::Open {
            return None;
        }
        let elapsed = self.opened_at.map(|at| at.elapsed()).unwrap_or(Duration::MAX);
        (elapsed >= open_duration).then(|| self.transition(target, CircuitBreakerState::HalfOpen))
    }
}

/// Circuit breaker shared by every caller of one dependency
pub struct CircuitBreaker {
    target: String,
    policy: CircuitBreakerPolicy,
    core: Mutex<BreakerCore>,
    observer: Arc<dyn ExecutionObserver>,

    // Lifetime counters
    total_calls: AtomicU64,
    successful_calls: AtomicU64,
    failed_calls: AtomicU64,
    rejected_calls: AtomicU64,
}

impl CircuitBreaker {
    pub fn new(target: impl Into<String>, policy: CircuitBreakerPolicy) -> Self {
        Self::with_observer(target, policy, Arc::new(TracingObserver))
    }

    pub fn with_observer(
        target: impl Into<String>,
        policy: CircuitBreakerPolicy,
        observer: Arc<dyn ExecutionObserver>,
    ) -> Self {
        let window = RollingWindow::new(policy.failure_threshold.window);
        Self {
            target: target.into(),
            policy,
            core: Mutex::new(BreakerCore {
                state: CircuitBreakerState::Closed,
                generation: 0,
                window,
                opened_at: None,
                closed_at: None,
                probes_admitted: 0,
                probe_successes: 0,
                probe_failures: 0,
            }),
            observer,
            total_calls: AtomicU64::new(0),
            successful_calls: AtomicU64::new(0),
            failed_calls: AtomicU64::new(0),
            rejected_calls: AtomicU64::new(0),
        }
    }

    pub fn target(&self) -> &str {
        &self.target
    }

    pub fn policy(&self) -> &CircuitBreakerPolicy {
        &self.policy
    }

    /// Ask for permission to call the dependency
    ///
    /// Fails with `CIRCUIT_OPEN` while the breaker is Open or while every
    /// Half-Open probe slot is taken. Rejections never count as failures.
    pub fn try_acquire(&self) -> Result<Permit<'_>, Arc<CanonicalError>> {
        let (admitted, transition) = {
            let mut core = self.core.lock();
            let transition = core.observe(&self.target, self.policy.open_duration);
            let admitted = match core.state {
                CircuitBreakerState::Closed => true,
                CircuitBreakerState::Open => false,
                CircuitBreakerState::HalfOpen => {
                    if core.probes_admitted < self.policy.success_threshold.window {
                        core.probes_admitted += 1;
                        true
                    } else {
                        false
                    }
                }
            };
            let permit = admitted.then(|| Permit {
                breaker: self,
                generation: core.generation,
                recorded: false,
            });
            (permit, transition)
        };
        self.emit(transition);

        match admitted {
            Some(permit) => Ok(permit),
            None => {
                self.rejected_calls.fetch_add(1, Ordering::Relaxed);
                debug!(target_service = %self.target, "Circuit breaker rejected call");
                Err(catalog::circuit_open())
            }
        }
    }

    /// Record the outcome of a permitted call; `None` is a success
    pub fn record(&self, mut permit: Permit<'_>, outcome: Option<&CanonicalError>) {
        permit.recorded = true;
        let failed = outcome.is_some_and(|err| (self.policy.handled)(err));

        let transitions = {
            let mut core = self.core.lock();
            let mut transitions = Vec::with_capacity(2);
            transitions.extend(core.observe(&self.target, self.policy.open_duration));

            if permit.generation != core.generation {
                debug!(
                    target_service = %self.target,
                    permit_generation = permit.generation,
                    generation = core.generation,
                    "Discarding outcome from an earlier breaker state"
                );
                drop(core);
                for transition in transitions {
                    self.observer.on_state_change(&transition);
                }
                return;
            }

            self.total_calls.fetch_add(1, Ordering::Relaxed);
            if failed {
                self.failed_calls.fetch_add(1, Ordering::Relaxed);
            } else {
                self.successful_calls.fetch_add(1, Ordering::Relaxed);
            }

            match core.state {
                CircuitBreakerState::Closed => {
                    core.window.push(failed);
                    if core.window.failures() >= self.policy.failure_threshold.threshold {
                        transitions.push(core.transition(&self.target, CircuitBreakerState::Open));
                    }
                }
                CircuitBreakerState::HalfOpen => {
                    if failed {
                        core.probe_failures += 1;
                        transitions.push(core.transition(&self.target, CircuitBreakerState::Open));
                    } else {
                        core.probe_successes += 1;
                        if core.probe_successes >= self.policy.success_threshold.threshold {
                            transitions
                                .push(core.transition(&self.target, CircuitBreakerState::Closed));
                        }
                    }
                }
                // Permits are never issued while Open
                CircuitBreakerState::Open => {}
            }
            transitions
        };

        for transition in transitions {
            self.observer.on_state_change(&transition);
        }
    }

    /// Give back a permit whose call was abandoned before it finished
    pub fn release(&self, permit: Permit<'_>) {
        debug_assert!(std::ptr::eq(permit.breaker, self));
        drop(permit);
    }

    fn return_probe(&self, generation: u64) {
        let mut core = self.core.lock();
        if generation == core.generation
            && core.state == CircuitBreakerState::HalfOpen
            && core.probes_admitted > 0
        {
            core.probes_admitted -= 1;
            debug!(target_service = %self.target, "Returned abandoned probe slot");
        }
    }

    /// Current state, after applying any pending Open to Half-Open move
    pub fn state(&self) -> CircuitBreakerState {
        let (state, transition) = {
            let mut core = self.core.lock();
            let transition = core.observe(&self.target, self.policy.open_duration);
            (core.state, transition)
        };
        self.emit(transition);
        state
    }

    pub fn stats(&self) -> CircuitBreakerStats {
        let state = self.state();
        let core = self.core.lock();
        let total = self.total_calls.load(Ordering::Relaxed);
        let failed = self.failed_calls.load(Ordering::Relaxed);

        CircuitBreakerStats {
            state,
            total_calls: total,
            successful_calls: self.successful_calls.load(Ordering::Relaxed),
            failed_calls: failed,
            rejected_calls: self.rejected_calls.load(Ordering::Relaxed),
            window_failures: core.window.failures(),
            last_opened_at: core.opened_at,
            last_closed_at: core.closed_at,
            failure_rate: if total > 0 {
                failed as f64 / total as f64
            } else {
                0.0
            },
        }
    }

    /// Force the breaker open (for operators or tests)
    pub fn force_open(&self) {
        let transition = {
            let mut core = self.core.lock();
            core.transition(&self.target, CircuitBreakerState::Open)
        };
        self.observer.on_state_change(&transition);
    }

    /// Force the breaker closed with an empty window
    pub fn force_close(&self) {
        let transition = {
            let mut core = self.core.lock();
            core.transition(&self.target, CircuitBreakerState::Closed)
        };
        self.observer.on_state_change(&transition);
    }

    fn emit(&self, transition: Option<StateTransition>) {
        if let Some(transition) = transition {
            self.observer.on_state_change(&transition);
        }
    }
}

impl fmt::Debug for CircuitBreaker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CircuitBreaker")
            .field("target", &self.target)
            .field("policy", &self.policy)
            .field("state", &self.core.lock().state)
            .finish()
    }
}
