//! One shared executor per downstream dependency

use std::sync::Arc;

use dashmap::DashMap;
use tracing::{debug, info};

use super::executor::ResilientExecutor;
use super::telemetry::{ExecutionObserver, TracingObserver};
use crate::config::ResilienceConfig;
use crate::error::ErrorMapper;

/// Hands out the executor of a dependency, creating it on first use
///
/// Executors are built from the dependency's section of [`ResilienceConfig`],
/// or from its defaults when the dependency has no section.
pub struct ExecutorRegistry {
    executors: DashMap<String, Arc<ResilientExecutor>>,
    config: ResilienceConfig,
    mapper: ErrorMapper,
    observer: Arc<dyn ExecutionObserver>,
}

impl ExecutorRegistry {
    pub fn new(config: ResilienceConfig, mapper: ErrorMapper) -> Self {
        Self::with_observer(config, mapper, Arc::new(TracingObserver))
    }

    pub fn with_observer(
        config: ResilienceConfig,
        mapper: ErrorMapper,
        observer: Arc<dyn ExecutionObserver>,
    ) -> Self {
        info!(
            dependencies = config.dependencies.len(),
            "Initializing executor registry"
        );
        Self {
            executors: DashMap::new(),
            config,
            mapper,
            observer,
        }
    }

    /// Executor for `dependency`; every caller gets the same instance
    pub fn get(&self, dependency: &str) -> Arc<ResilientExecutor> {
        if let Some(existing) = self.executors.get(dependency) {
            return Arc::clone(existing.value());
        }

        let entry = self
            .executors
            .entry(dependency.to_string())
            .or_insert_with(|| {
                debug!(dependency, "Creating executor");
                Arc::new(ResilientExecutor::with_observer(
                    dependency,
                    self.config.policy_for(dependency),
                    self.mapper.clone(),
                    Arc::clone(&self.observer),
                ))
            });
        Arc::clone(entry.value())
    }

    /// Names of the dependencies that have an executor
    pub fn dependencies(&self) -> Vec<String> {
        self.executors.iter().map(|e| e.key().clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.executors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.executors.is_empty()
    }
}

impl std::fmt::Debug for ExecutorRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExecutorRegistry")
            .field("dependencies", &self.dependencies())
            .finish()
    }
}
