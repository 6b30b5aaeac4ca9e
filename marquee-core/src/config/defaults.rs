//! Default configuration values for Marquee
//!
//! This module centralizes all default values to make them easy to find and modify.

use std::time::Duration;

// Retry defaults
pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;
pub const DEFAULT_BACKOFF_MIN_MS: u64 = 100;
pub const DEFAULT_BACKOFF_MAX_MS: u64 = 2_000;
pub const DEFAULT_BACKOFF_MULTIPLIER: f64 = 2.0;
pub const DEFAULT_JITTER_FACTOR: f64 = 0.2;

// Circuit breaker defaults
pub const DEFAULT_FAILURE_THRESHOLD: u32 = 5;
pub const DEFAULT_FAILURE_WINDOW: u32 = 10;
pub const DEFAULT_SUCCESS_THRESHOLD: u32 = 3;
pub const DEFAULT_SUCCESS_WINDOW: u32 = 5;
pub const DEFAULT_OPEN_DURATION_SECS: u64 = 30;

// Timeout defaults
pub const DEFAULT_ATTEMPT_TIMEOUT_MS: u64 = 5_000;

// Logging defaults
pub const DEFAULT_LOG_LEVEL: &str = "info";

// Environment variable prefix
pub const ENV_PREFIX: &str = "MARQUEE";

/// Helper function to create Duration from milliseconds
pub const fn duration_millis(millis: u64) -> Duration {
    Duration::from_millis(millis)
}

/// Helper function to create Duration from seconds
pub const fn duration_secs(secs: u64) -> Duration {
    Duration::from_secs(secs)
}
