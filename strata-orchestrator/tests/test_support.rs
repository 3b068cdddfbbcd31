#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use strata_orchestrator::{CircuitBreakerConfig, Orchestrator, OrchestratorConfig};
use strata_test_utils::fixtures::{content_pool, small_cache};
use strata_test_utils::{CapabilityExecutor, CapabilityRegistry, MockExecutor, StaticContentProvider};

/// Small pool, quick scaling ticks and a rate limit tests never hit.
pub fn fast_config() -> OrchestratorConfig {
    OrchestratorConfig::default()
        .with_workers(2, 4)
        .with_queue_capacity(64)
        .with_scaling(Duration::from_millis(50), 0.8, 0.2, 2)
        .with_rate_limit(10_000, 10_000)
        .with_breaker(
            CircuitBreakerConfig::default()
                .with_failure_threshold(3)
                .with_open_timeout(Duration::from_millis(200)),
        )
        .with_deadline(Duration::from_secs(30), 3.0)
}

/// Build and start an orchestrator serving `agents`.
pub fn start_orchestrator(config: OrchestratorConfig, agents: &[Arc<MockExecutor>]) -> Arc<Orchestrator> {
    let registry = Arc::new(CapabilityRegistry::new());
    for agent in agents {
        let executor: Arc<dyn CapabilityExecutor> = agent.clone();
        registry
            .register_agent(executor)
            .expect("Failed to register mock agent");
    }

    let orchestrator = Orchestrator::builder(registry, Arc::new(small_cache()))
        .config(config)
        .content_provider(Arc::new(StaticContentProvider::new(content_pool())))
        .build()
        .expect("Failed to build orchestrator");
    orchestrator.start();
    Arc::new(orchestrator)
}

/// Poll `condition` every 5ms until it holds or `limit` passes.
pub async fn wait_until(limit: Duration, mut condition: impl FnMut() -> bool) -> bool {
    let deadline = tokio::time::Instant::now() + limit;
    while tokio::time::Instant::now() < deadline {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    condition()
}
