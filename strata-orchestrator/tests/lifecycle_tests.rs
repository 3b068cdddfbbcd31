//! Cancellation, shutdown and worker pool scaling.

mod test_support;

use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use strata_core::{ErrorKind, HealthStatus, Permission, Request, RequestStatus, Role};
use strata_test_utils::assertions::{assert_completed, assert_error};
use strata_test_utils::MockExecutor;
use test_support::{fast_config, start_orchestrator, wait_until};

fn slow_agent(latency: Duration) -> Arc<MockExecutor> {
    Arc::new(
        MockExecutor::new("slow")
            .with_capability("crunch", Permission::ReadOnly)
            .with_latency(latency),
    )
}

#[tokio::test]
async fn cancel_stops_running_request_without_tripping_breaker() {
    let agent = slow_agent(Duration::from_secs(5));
    let orchestrator = start_orchestrator(fast_config(), &[agent.clone()]);

    let request = Request::new("alice", Role::Analyst, "crunch");
    let request_id = request.id;
    let handle = {
        let orchestrator = Arc::clone(&orchestrator);
        tokio::spawn(async move { orchestrator.submit(request).await })
    };

    assert!(wait_until(Duration::from_secs(2), || agent.running() == 1).await);
    assert!(orchestrator.cancel(request_id));

    let response = handle.await.unwrap();
    assert_error(&response, RequestStatus::Cancelled, ErrorKind::Cancelled);
    assert_eq!(orchestrator.breaker("slow").unwrap().failure_count(), 0);
    assert!(wait_until(Duration::from_secs(1), || agent.running() == 0).await);
    assert_eq!(orchestrator.active_requests(), 0);
    assert!(!orchestrator.cancel(request_id));

    orchestrator.shutdown().await;
}

#[tokio::test]
async fn cancelled_result_is_not_cached() {
    let agent = slow_agent(Duration::from_secs(5));
    let orchestrator = start_orchestrator(fast_config(), &[agent.clone()]);

    let request = Request::new("alice", Role::Analyst, "crunch");
    let request_id = request.id;
    let handle = {
        let orchestrator = Arc::clone(&orchestrator);
        tokio::spawn(async move { orchestrator.submit(request).await })
    };
    assert!(wait_until(Duration::from_secs(2), || agent.running() == 1).await);
    orchestrator.cancel(request_id);
    handle.await.unwrap();

    agent.set_latency(Duration::ZERO);
    let retry = orchestrator.submit(Request::new("alice", Role::Analyst, "crunch")).await;
    assert_completed(&retry);
    assert!(!retry.cache_hit);
    assert_eq!(agent.invocations(), 2);

    orchestrator.shutdown().await;
}

#[tokio::test]
async fn submissions_after_shutdown_are_cancelled() {
    let agent = slow_agent(Duration::ZERO);
    let orchestrator = start_orchestrator(fast_config(), &[agent.clone()]);
    orchestrator.shutdown().await;

    let response = orchestrator.submit(Request::new("alice", Role::Analyst, "crunch")).await;
    assert_error(&response, RequestStatus::Cancelled, ErrorKind::Cancelled);
    assert_eq!(agent.invocations(), 0);

    // Restarting a stopped orchestrator does nothing.
    orchestrator.start();
    assert_eq!(orchestrator.pool_stats().workers, 0);
}

#[tokio::test]
async fn pool_grows_under_sustained_load_and_shrinks_when_idle() {
    let agent = slow_agent(Duration::from_millis(400));
    let config = fast_config().with_workers(1, 4);
    let orchestrator = start_orchestrator(config, &[agent.clone()]);
    assert_eq!(orchestrator.pool_stats().workers, 1);

    let handles: Vec<_> = (0..12)
        .map(|n| {
            let orchestrator = Arc::clone(&orchestrator);
            tokio::spawn(async move {
                orchestrator
                    .submit(Request::new("alice", Role::Analyst, "crunch").with_param("n", json!(n)))
                    .await
            })
        })
        .collect();

    assert!(wait_until(Duration::from_secs(2), || orchestrator.pool_stats().workers == 4).await);

    for handle in handles {
        assert_completed(&handle.await.unwrap());
    }
    assert!(wait_until(Duration::from_secs(3), || orchestrator.pool_stats().workers == 1).await);

    orchestrator.shutdown().await;
}

#[tokio::test]
async fn health_reports_pool_and_cache() {
    let orchestrator = start_orchestrator(fast_config(), &[slow_agent(Duration::ZERO)]);

    let checks = orchestrator.health();
    let components: Vec<&str> = checks.iter().map(|c| c.component.as_str()).collect();
    assert_eq!(components, vec!["worker_pool", "cache"]);
    assert!(checks.iter().all(|c| c.status == HealthStatus::Healthy));

    orchestrator.submit(Request::new("alice", Role::Analyst, "crunch")).await;
    let checks = orchestrator.health();
    assert_eq!(checks[0].component, "breaker:slow");
    assert_eq!(checks[0].status, HealthStatus::Healthy);

    orchestrator.shutdown().await;
}

#[tokio::test]
async fn metrics_are_exposed_in_text_format() {
    let orchestrator = start_orchestrator(fast_config(), &[slow_agent(Duration::ZERO)]);
    assert_completed(&orchestrator.submit(Request::new("alice", Role::Analyst, "crunch")).await);

    let text = orchestrator.metrics_text().unwrap();
    assert!(text.contains("strata_requests_submitted_total 1"));
    assert!(text.contains("strata_requests_total"));
    assert!(text.contains("strata_execution_duration_seconds_count 1"));
    assert!(text.contains("strata_workers 2"));
    assert!(text.contains("strata_in_flight_keys 0"));
    assert!(!orchestrator.metrics_registry().gather().is_empty());

    orchestrator.shutdown().await;
}
