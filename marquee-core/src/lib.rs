//! Marquee core: resilient outbound calls and a canonical error taxonomy
//!
//! Services of the Marquee backend call each other through a
//! [`ResilientExecutor`](resilience::ResilientExecutor) and report failures as
//! [`CanonicalError`](error::CanonicalError) values that keep their identity
//! across gRPC hops.

pub mod config;
pub mod context;
pub mod error;
pub mod logging;
pub mod resilience;

pub use config::{ConfigError, ConfigResult, DependencyConfig, ResilienceConfig};
pub use context::{merge, CallContext, CancelCause, CancelGuard};
pub use error::{CanonicalError, ErrorMapper, ErrorRegistry, ServiceError, ServiceResult};
pub use resilience::{ExecutionPolicy, ExecutorRegistry, RemoteCall, ResilientExecutor};
