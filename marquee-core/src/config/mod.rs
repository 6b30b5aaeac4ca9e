//! Resilience configuration for outbound dependencies
//!
//! Configuration comes from a TOML document, from `MARQUEE_*` environment
//! variables, or both (file first, then environment overrides). Every field
//! falls back to the constants in [`defaults`].
//!
//! ```toml
//! log_level = "info"
//!
//! [defaults]
//! max_attempts = 3
//! backoff_min = "100ms"
//! backoff_max = "2s"
//! jitter_factor = 0.2
//! failure_threshold = { threshold = 5, window = 10 }
//! success_threshold = { threshold = 3, window = 5 }
//! open_duration = "30s"
//! per_attempt_timeout = "5s"
//!
//! [dependencies.theater]
//! max_attempts = 4
//! per_attempt_timeout = "750ms"
//! ```
//!
//! A `[dependencies.<name>]` section only needs the keys it changes; the rest
//! are taken from `[defaults]`.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use crate::resilience::{
    CircuitBreakerPolicy, ExecutionPolicy, RetryPolicy, ThresholdRatio, TimeoutPolicy,
};

pub mod defaults;

use defaults::*;

/// Configuration errors
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to parse configuration: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Failed to read configuration file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid configuration for {field}: {message}")]
    Invalid { field: String, message: String },

    #[error("Invalid value '{value}' for environment variable {var}")]
    Env { var: String, value: String },
}

pub type ConfigResult<T> = Result<T, ConfigError>;

/// Resilience settings of a single dependency
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DependencyConfig {
    /// Total attempts, including the first one
    pub max_attempts: u32,

    #[serde(with = "humantime_serde")]
    pub backoff_min: Duration,

    #[serde(with = "humantime_serde")]
    pub backoff_max: Duration,

    pub jitter_factor: f64,

    pub failure_threshold: ThresholdRatio,

    pub success_threshold: ThresholdRatio,

    #[serde(with = "humantime_serde")]
    pub open_duration: Duration,

    #[serde(with = "humantime_serde")]
    pub per_attempt_timeout: Duration,
}

impl Default for DependencyConfig {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            backoff_min: duration_millis(DEFAULT_BACKOFF_MIN_MS),
            backoff_max: duration_millis(DEFAULT_BACKOFF_MAX_MS),
            jitter_factor: DEFAULT_JITTER_FACTOR,
            failure_threshold: ThresholdRatio::new(DEFAULT_FAILURE_THRESHOLD, DEFAULT_FAILURE_WINDOW),
            success_threshold: ThresholdRatio::new(DEFAULT_SUCCESS_THRESHOLD, DEFAULT_SUCCESS_WINDOW),
            open_duration: duration_secs(DEFAULT_OPEN_DURATION_SECS),
            per_attempt_timeout: duration_millis(DEFAULT_ATTEMPT_TIMEOUT_MS),
        }
    }
}

impl DependencyConfig {
    /// Check the values; `scope` prefixes field names in errors
    pub fn validate(&self, scope: &str) -> ConfigResult<()> {
        let invalid = |field: &str, message: String| ConfigError::Invalid {
            field: format!("{scope}.{field}"),
            message,
        };

        if self.max_attempts < 1 {
            return Err(invalid("max_attempts", "must be at least 1".to_string()));
        }
        if self.backoff_min > self.backoff_max {
            return Err(invalid(
                "backoff_min",
                format!(
                    "{:?} is greater than backoff_max {:?}",
                    self.backoff_min, self.backoff_max
                ),
            ));
        }
        if !(0.0..=1.0).contains(&self.jitter_factor) {
            return Err(invalid(
                "jitter_factor",
                format!("{} is outside [0, 1]", self.jitter_factor),
            ));
        }
        for (field, ratio) in [
            ("failure_threshold", self.failure_threshold),
            ("success_threshold", self.success_threshold),
        ] {
            if !ratio.is_valid() {
                return Err(invalid(
                    field,
                    format!("{ratio} must satisfy 1 <= threshold <= window"),
                ));
            }
        }
        if self.per_attempt_timeout.is_zero() {
            return Err(invalid("per_attempt_timeout", "must be positive".to_string()));
        }
        Ok(())
    }

    pub fn to_policy(&self) -> ExecutionPolicy {
        ExecutionPolicy {
            retry: RetryPolicy::exponential(self.max_attempts, self.backoff_min, self.backoff_max)
                .with_jitter(self.jitter_factor),
            circuit_breaker: CircuitBreakerPolicy::default()
                .with_failure_threshold(self.failure_threshold.threshold, self.failure_threshold.window)
                .with_success_threshold(self.success_threshold.threshold, self.success_threshold.window)
                .with_open_duration(self.open_duration),
            timeout: TimeoutPolicy::new(self.per_attempt_timeout),
        }
    }

    /// Apply `MARQUEE_*` overrides read through `lookup`
    fn apply_env<L>(&mut self, lookup: &L) -> ConfigResult<()>
    where
        L: Fn(&str) -> Option<String>,
    {
        if let Some(v) = env_parse(lookup, "RETRY_MAX_ATTEMPTS")? {
            self.max_attempts = v;
        }
        if let Some(ms) = env_parse(lookup, "RETRY_BACKOFF_MIN_MS")? {
            self.backoff_min = duration_millis(ms);
        }
        if let Some(ms) = env_parse(lookup, "RETRY_BACKOFF_MAX_MS")? {
            self.backoff_max = duration_millis(ms);
        }
        if let Some(v) = env_parse(lookup, "RETRY_JITTER_FACTOR")? {
            self.jitter_factor = v;
        }
        if let Some(v) = env_parse(lookup, "BREAKER_FAILURE_THRESHOLD")? {
            self.failure_threshold = v;
        }
        if let Some(v) = env_parse(lookup, "BREAKER_SUCCESS_THRESHOLD")? {
            self.success_threshold = v;
        }
        if let Some(ms) = env_parse(lookup, "BREAKER_OPEN_DURATION_MS")? {
            self.open_duration = duration_millis(ms);
        }
        if let Some(ms) = env_parse(lookup, "ATTEMPT_TIMEOUT_MS")? {
            self.per_attempt_timeout = duration_millis(ms);
        }
        Ok(())
    }
}

/// Root configuration: defaults plus per-dependency sections
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ResilienceConfig {
    /// Filter directive used by [`crate::logging::init`]
    pub log_level: String,

    /// Settings for dependencies without a section of their own
    pub defaults: DependencyConfig,

    /// Per-dependency settings, keyed by dependency name
    pub dependencies: HashMap<String, DependencyConfig>,
}

impl Default for ResilienceConfig {
    fn default() -> Self {
        Self {
            log_level: DEFAULT_LOG_LEVEL.to_string(),
            defaults: DependencyConfig::default(),
            dependencies: HashMap::new(),
        }
    }
}

impl ResilienceConfig {
    /// Parse and validate a TOML document
    pub fn from_toml_str(s: &str) -> ConfigResult<Self> {
        let mut raw: toml::Table = s.parse()?;
        inherit_defaults(&mut raw);

        let config: Self = toml::Value::Table(raw).try_into()?;
        config.validate()?;
        Ok(config)
    }

    /// Load and validate a TOML file
    pub fn from_file(path: impl AsRef<Path>) -> ConfigResult<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        debug!(path = %path.display(), "Loaded resilience configuration");
        Self::from_toml_str(&contents)
    }

    /// Defaults overridden by the process environment
    pub fn from_env() -> ConfigResult<Self> {
        Self::default().with_env_overrides(|key| std::env::var(key).ok())
    }

    /// Apply environment overrides to the `defaults` section
    ///
    /// `lookup` resolves a variable name; tests pass a map instead of the
    /// process environment.
    pub fn with_env_overrides<L>(mut self, lookup: L) -> ConfigResult<Self>
    where
        L: Fn(&str) -> Option<String>,
    {
        if let Some(level) = lookup(&format!("{ENV_PREFIX}_LOG_LEVEL")) {
            self.log_level = level;
        }
        self.defaults.apply_env(&lookup)?;
        self.validate()?;
        Ok(self)
    }

    pub fn validate(&self) -> ConfigResult<()> {
        self.defaults.validate("defaults")?;
        for (name, dependency) in &self.dependencies {
            dependency.validate(&format!("dependencies.{name}"))?;
        }
        Ok(())
    }

    /// Settings for `dependency`, falling back to the defaults
    pub fn dependency(&self, dependency: &str) -> &DependencyConfig {
        self.dependencies.get(dependency).unwrap_or(&self.defaults)
    }

    pub fn policy_for(&self, dependency: &str) -> ExecutionPolicy {
        self.dependency(dependency).to_policy()
    }
}

/// Fill missing keys of every `[dependencies.*]` table from `[defaults]`
fn inherit_defaults(raw: &mut toml::Table) {
    let Some(toml::Value::Table(defaults)) = raw.get("defaults").cloned() else {
        return;
    };
    let Some(toml::Value::Table(dependencies)) = raw.get_mut("dependencies") else {
        return;
    };
    for (_, section) in dependencies.iter_mut() {
        if let toml::Value::Table(section) = section {
            for (key, value) in &defaults {
                if !section.contains_key(key) {
                    section.insert(key.clone(), value.clone());
                }
            }
        }
    }
}

fn env_parse<T, L>(lookup: &L, suffix: &str) -> ConfigResult<Option<T>>
where
    T: std::str::FromStr,
    L: Fn(&str) -> Option<String>,
{
    let var = format!("{ENV_PREFIX}_{suffix}");
    match lookup(&var) {
        None => Ok(None),
        Some(value) => value
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| ConfigError::Env { var, value }),
    }
}
