// Shared executors built from configuration

use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use marquee_core::config::ResilienceConfig;
use marquee_core::context::CallContext;
use marquee_core::error::catalog::{self, codes};
use marquee_core::resilience::{CircuitBreakerState, ExecutorRegistry, RecordingObserver};

mod common;
use common::{mapper, MockService, Step};

const CONFIG: &str = r#"
[defaults]
max_attempts = 1
backoff_min = "10ms"
backoff_max = "10ms"
jitter_factor = 0.0
failure_threshold = { threshold = 2, window = 4 }
success_threshold = { threshold = 1, window = 1 }
open_duration = "5s"
per_attempt_timeout = "200ms"

[dependencies.search]
max_attempts = 3
"#;

#[tokio::test(start_paused = true)]
async fn test_callers_share_one_breaker() {
    let config = ResilienceConfig::from_toml_str(CONFIG).unwrap();
    let observer = RecordingObserver::new();
    let registry = Arc::new(ExecutorRegistry::with_observer(config, mapper(), observer.clone()));
    let service = MockService::new(std::iter::repeat(Step::Fail(catalog::unavailable())).take(2));

    let mut handles = Vec::new();
    for _ in 0..2 {
        let registry = Arc::clone(&registry);
        let service = Arc::clone(&service);
        handles.push(tokio::spawn(async move {
            let executor = registry.get("user");
            let result = executor
                .execute(&CallContext::background(), "user.v1.UserService/GetUser", |ctx| {
                    let service = Arc::clone(&service);
                    async move { service.call(ctx).await }
                })
                .await;
            result
        }));
    }
    for joined in join_all(handles).await {
        let err = joined.unwrap().unwrap_err();
        assert_eq!(err.code(), codes::UNAVAILABLE);
    }

    let user = registry.get("user");
    assert_eq!(user.breaker().state(), CircuitBreakerState::Open);
    assert_eq!(observer.transitions().len(), 1);

    // A third caller is rejected without reaching the dependency
    let err = user
        .execute(&CallContext::background(), "user.v1.UserService/GetUser", |ctx| {
            let service = Arc::clone(&service);
            async move { service.call(ctx).await }
        })
        .await
        .unwrap_err();
    assert_eq!(err.code(), codes::CIRCUIT_OPEN);
    assert_eq!(service.call_count(), 2);

    // After the open duration one probe closes the breaker again
    tokio::time::advance(Duration::from_secs(5)).await;
    let body = user
        .execute(&CallContext::background(), "user.v1.UserService/GetUser", |ctx| {
            let service = Arc::clone(&service);
            async move { service.call(ctx).await }
        })
        .await
        .unwrap();
    assert_eq!(body, "showtimes #3");
    assert_eq!(user.breaker().state(), CircuitBreakerState::Closed);
}

#[tokio::test]
async fn test_dependency_sections_apply() {
    let config = ResilienceConfig::from_toml_str(CONFIG).unwrap();
    let registry = ExecutorRegistry::new(config, mapper());

    let search = registry.get("search");
    assert_eq!(search.policy().retry.max_attempts, 3);
    assert_eq!(search.policy().timeout.per_attempt, Duration::from_millis(200));
    assert_eq!(registry.get("theater").policy().retry.max_attempts, 1);
    assert_eq!(registry.len(), 2);
}
