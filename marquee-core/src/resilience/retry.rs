//! Retry policy: which failures are retried and how long to wait in between
//!
//! Delays grow exponentially from `backoff_min` and are capped at
//! `backoff_max`; each delay is then scaled by a random factor drawn from
//! `[1 - jitter_factor, 1 + jitter_factor]` so that callers of a recovering
//! dependency do not retry in lockstep.

use std::collections::HashSet;
use std::time::Duration;

use rand::Rng;

use crate::config::defaults::*;
use crate::error::catalog::{self, codes};
use crate::error::CanonicalError;

/// What to do after a failed attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    /// Try again after the backoff delay
    Retry,
    /// The failure is an explicit abort condition
    Abort,
    /// The failure is not transient
    NotRetryable,
    /// The attempt budget is spent
    Exhausted,
}

/// Configuration for retry behavior
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Maximum number of attempts (including the initial attempt)
    pub max_attempts: u32,
    /// Delay after the first failed attempt
    pub backoff_min: Duration,
    /// Upper bound for the un-jittered delay
    pub backoff_max: Duration,
    /// Relative jitter in `[0, 1]`
    pub jitter_factor: f64,
    /// Codes that stop retrying immediately
    pub abort_codes: HashSet<String>,
    /// Codes worth another attempt
    pub retryable_codes: HashSet<String>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            backoff_min: duration_millis(DEFAULT_BACKOFF_MIN_MS),
            backoff_max: duration_millis(DEFAULT_BACKOFF_MAX_MS),
            jitter_factor: DEFAULT_JITTER_FACTOR,
            abort_codes: [codes::CIRCUIT_OPEN, codes::CANCELED]
                .into_iter()
                .map(String::from)
                .collect(),
            retryable_codes: catalog::TRANSIENT_CODES
                .into_iter()
                .map(String::from)
                .collect(),
        }
    }
}

impl RetryPolicy {
    /// Exponential backoff between `backoff_min` and `backoff_max`
    pub fn exponential(max_attempts: u32, backoff_min: Duration, backoff_max: Duration) -> Self {
        Self {
            max_attempts,
            backoff_min,
            backoff_max,
            ..Default::default()
        }
    }

    /// Disable retries entirely
    pub fn no_retry() -> Self {
        Self {
            max_attempts: 1,
            ..Default::default()
        }
    }

    pub fn with_jitter(mut self, jitter_factor: f64) -> Self {
        self.jitter_factor = jitter_factor.clamp(0.0, 1.0);
        self
    }

    pub fn with_abort_code(mut self, code: impl Into<String>) -> Self {
        self.abort_codes.insert(code.into());
        self
    }

    pub fn with_retryable_code(mut self, code: impl Into<String>) -> Self {
        self.retryable_codes.insert(code.into());
        self
    }

    pub fn is_abort(&self, error: &CanonicalError) -> bool {
        self.abort_codes.contains(error.code())
    }

    pub fn is_retryable(&self, error: &CanonicalError) -> bool {
        !self.is_abort(error) && self.retryable_codes.contains(error.code())
    }

    /// Decide what follows failed attempt number `attempt` (1-based)
    pub fn decide(&self, error: &CanonicalError, attempt: u32) -> RetryDecision {
        if self.is_abort(error) {
            RetryDecision::Abort
        } else if !self.retryable_codes.contains(error.code()) {
            RetryDecision::NotRetryable
        } else if attempt >= self.max_attempts {
            RetryDecision::Exhausted
        } else {
            RetryDecision::Retry
        }
    }

    /// Un-jittered delay after failed attempt number `attempt` (1-based)
    pub fn base_delay(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(i32::MAX as u32) as i32;
        let factor = DEFAULT_BACKOFF_MULTIPLIER.powi(exponent);
        let max = self.backoff_max.as_secs_f64();
        let secs = (self.backoff_min.as_secs_f64() * factor).min(max);
        Duration::try_from_secs_f64(secs).unwrap_or(self.backoff_max)
    }

    /// Jittered delay after failed attempt number `attempt`
    pub fn delay(&self, attempt: u32) -> Duration {
        self.delay_with_rng(attempt, &mut rand::thread_rng())
    }

    pub fn delay_with_rng<R: Rng + ?Sized>(&self, attempt: u32, rng: &mut R) -> Duration {
        let base = self.base_delay(attempt);
        let jitter = self.jitter_factor.clamp(0.0, 1.0);
        if jitter == 0.0 || base.is_zero() {
            return base;
        }
        let scale = 1.0 + rng.gen_range(-jitter..=jitter);
        saturating_scale(base, scale.max(0.0))
    }

    /// Shortest and longest delay `delay` can ever produce
    pub fn delay_bounds(&self) -> (Duration, Duration) {
        let jitter = self.jitter_factor.clamp(0.0, 1.0);
        let low = saturating_scale(self.backoff_min.min(self.backoff_max), 1.0 - jitter);
        let high = saturating_scale(self.backoff_max, 1.0 + jitter);
        (low, high)
    }
}

/// `duration * factor`, clamped to `Duration::MAX` instead of panicking
fn saturating_scale(duration: Duration, factor: f64) -> Duration {
    Duration::try_from_secs_f64(duration.as_secs_f64() * factor).unwrap_or(Duration::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::catalog;
    use rand::rngs::StdRng;
    use rand::SeedableRng;
    use rstest::rstest;

    fn policy() -> RetryPolicy {
        RetryPolicy::exponential(5, Duration::from_millis(10), Duration::from_millis(50))
    }

    #[test]
    fn test_exponential_growth_is_capped() {
        let policy = policy();
        assert_eq!(policy.base_delay(1), Duration::from_millis(10));
        assert_eq!(policy.base_delay(2), Duration::from_millis(20));
        assert_eq!(policy.base_delay(3), Duration::from_millis(40));
        assert_eq!(policy.base_delay(4), Duration::from_millis(50));
        assert_eq!(policy.base_delay(u32::MAX), Duration::from_millis(50));
    }

    #[test]
    fn test_jitter_stays_in_bounds() {
        let policy = policy().with_jitter(0.5);
        let (low, high) = policy.delay_bounds();
        let mut rng = StdRng::seed_from_u64(7);

        for attempt in 1..=8 {
            for _ in 0..100 {
                let delay = policy.delay_with_rng(attempt, &mut rng);
                assert!(delay >= low && delay <= high, "{delay:?} outside {low:?}..{high:?}");
            }
        }
    }

    #[test]
    fn test_huge_backoff_saturates() {
        let policy = RetryPolicy::exponential(3, Duration::from_secs(1), Duration::MAX).with_jitter(1.0);
        let mut rng = StdRng::seed_from_u64(11);

        assert_eq!(policy.base_delay(u32::MAX), Duration::MAX);
        for attempt in [1, 2, 64, u32::MAX] {
            policy.delay_with_rng(attempt, &mut rng);
        }
        assert_eq!(policy.delay_bounds().1, Duration::MAX);
    }

    #[test]
    fn test_zero_jitter_is_deterministic() {
        let policy = policy().with_jitter(0.0);
        assert_eq!(policy.delay(2), Duration::from_millis(20));
    }

    #[rstest]
    #[case(catalog::unavailable(), 1, RetryDecision::Retry)]
    #[case(catalog::service_unavailable(), 2, RetryDecision::Retry)]
    #[case(catalog::deadline_exceeded(), 4, RetryDecision::Retry)]
    #[case(catalog::resource_exhausted(), 5, RetryDecision::Exhausted)]
    #[case(catalog::not_found(), 1, RetryDecision::NotRetryable)]
    #[case(catalog::invalid_argument(), 1, RetryDecision::NotRetryable)]
    #[case(catalog::permission_denied(), 1, RetryDecision::NotRetryable)]
    #[case(catalog::circuit_open(), 1, RetryDecision::Abort)]
    #[case(catalog::canceled(), 1, RetryDecision::Abort)]
    fn test_decisions(
        #[case] error: std::sync::Arc<CanonicalError>,
        #[case] attempt: u32,
        #[case] expected: RetryDecision,
    ) {
        assert_eq!(policy().decide(&error, attempt), expected);
    }

    #[test]
    fn test_abort_beats_retryable() {
        let policy = policy().with_abort_code(codes::UNAVAILABLE);
        assert_eq!(
            policy.decide(&catalog::unavailable(), 1),
            RetryDecision::Abort
        );
        assert!(!policy.is_retryable(&catalog::unavailable()));
    }
}
