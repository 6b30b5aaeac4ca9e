//! Logging bootstrap
//!
//! Installs a `tracing` subscriber with an env-filter and a formatting
//! layer. `RUST_LOG` wins over the configured level when it is set.

use tracing_subscriber::filter::ParseError;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

use crate::config::defaults::{DEFAULT_LOG_LEVEL, ENV_PREFIX};

pub type InitResult = Result<(), Box<dyn std::error::Error + Send + Sync>>;

/// Install the global subscriber with `level` as the fallback filter
///
/// Fails instead of panicking when a global subscriber already exists.
pub fn init(level: &str) -> InitResult {
    tracing_subscriber::registry()
        .with(filter(level)?)
        .with(tracing_subscriber::fmt::layer().with_target(true))
        .try_init()?;

    tracing::debug!(level, "Logging initialized");
    Ok(())
}

/// Install the global subscriber using `MARQUEE_LOG_LEVEL`
pub fn init_from_env() -> InitResult {
    let level = std::env::var(format!("{ENV_PREFIX}_LOG_LEVEL"))
        .unwrap_or_else(|_| DEFAULT_LOG_LEVEL.to_string());
    init(&level)
}

fn filter(level: &str) -> Result<EnvFilter, ParseError> {
    match EnvFilter::try_from_default_env() {
        Ok(filter) => Ok(filter),
        Err(_) => EnvFilter::try_new(level),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_level_directives() {
        assert!(EnvFilter::try_new("info").is_ok());
        assert!(EnvFilter::try_new("marquee_core=debug,tonic=warn").is_ok());
        assert!(EnvFilter::try_new("marquee_core=notalevel").is_err());
    }
}
