//! Requests sharing one computation: shared outcomes, per-request
//! cancellation and admission ahead of the in-flight claim.

mod test_support;

use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use strata_core::{Capability, ErrorKind, Permission, Request, RequestStatus, Response, Role};
use strata_orchestrator::Orchestrator;
use strata_test_utils::assertions::{assert_completed, assert_error, assert_retryable_rejection};
use strata_test_utils::MockExecutor;
use test_support::{fast_config, start_orchestrator, wait_until};
use tokio::task::JoinHandle;

fn forecast(caller: &str, symbol: &str) -> Request {
    Request::new(caller, Role::Analyst, "forecast").with_param("symbol", json!(symbol))
}

fn forecaster(latency: Duration) -> Arc<MockExecutor> {
    Arc::new(
        MockExecutor::new("forecaster")
            .with_capability("forecast", Permission::ReadOnly)
            .with_latency(latency),
    )
}

fn spawn_submit(orchestrator: &Arc<Orchestrator>, request: Request) -> JoinHandle<Response> {
    let orchestrator = Arc::clone(orchestrator);
    tokio::spawn(async move { orchestrator.submit(request).await })
}

fn spawn_identical(orchestrator: &Arc<Orchestrator>, count: usize, action: &str) -> Vec<JoinHandle<Response>> {
    (0..count)
        .map(|n| spawn_submit(orchestrator, Request::new(format!("caller-{}", n), Role::Analyst, action)))
        .collect()
}

// ============================================================================
// SHARED OUTCOMES
// ============================================================================

#[tokio::test]
async fn failed_computation_fails_every_waiter_once() {
    let agent = Arc::new(
        MockExecutor::new("fragile")
            .with_capability("compute", Permission::ReadOnly)
            .failing("boom")
            .with_latency(Duration::from_millis(150)),
    );
    let orchestrator = start_orchestrator(fast_config(), &[agent.clone()]);

    for handle in spawn_identical(&orchestrator, 10, "compute") {
        let response = handle.await.unwrap();
        assert_error(&response, RequestStatus::Failed, ErrorKind::ExecutionError);
    }

    assert_eq!(agent.invocations(), 1);
    assert_eq!(orchestrator.breaker("fragile").unwrap().failure_count(), 1);
    let metrics = orchestrator.metrics();
    assert_eq!(metrics.failed, 10);
    assert_eq!(metrics.coalesced, 9);
    assert_eq!(metrics.executions, 1);
    assert_eq!(orchestrator.in_flight_keys(), 0);

    orchestrator.shutdown().await;
}

#[tokio::test]
async fn timed_out_computation_times_out_every_waiter_once() {
    let capability = Capability::new("quick", "sluggish", Permission::ReadExecute).with_estimated_duration_ms(10);
    let agent = Arc::new(
        MockExecutor::new("sluggish")
            .with_declared(capability)
            .with_latency(Duration::from_secs(2)),
    );
    let orchestrator = start_orchestrator(fast_config(), &[agent.clone()]);

    let started = std::time::Instant::now();
    for handle in spawn_identical(&orchestrator, 10, "quick") {
        let response = handle.await.unwrap();
        assert_error(&response, RequestStatus::TimedOut, ErrorKind::TimedOut);
    }

    assert!(started.elapsed() < Duration::from_secs(1));
    assert_eq!(agent.invocations(), 1);
    assert_eq!(orchestrator.breaker("sluggish").unwrap().failure_count(), 1);
    assert_eq!(orchestrator.metrics().timed_out, 10);
    assert_eq!(orchestrator.in_flight_keys(), 0);

    orchestrator.shutdown().await;
}

// ============================================================================
// ADMISSION
// ============================================================================

#[tokio::test]
async fn exhausted_caller_cannot_join_another_callers_computation() {
    let agent = forecaster(Duration::from_millis(300));
    let orchestrator = start_orchestrator(fast_config().with_rate_limit(1, 1), &[agent.clone()]);

    // Bob spends his only token on a different key.
    assert_completed(&orchestrator.submit(forecast("bob", "OTHER")).await);

    let alice = spawn_submit(&orchestrator, forecast("alice", "ACME"));
    assert!(wait_until(Duration::from_secs(2), || agent.running() == 1).await);

    let bob = orchestrator.submit(forecast("bob", "ACME")).await;
    assert_retryable_rejection(&bob, ErrorKind::RateLimited);
    assert_eq!(orchestrator.metrics().coalesced, 0);

    assert_completed(&alice.await.unwrap());
    assert_eq!(agent.invocations(), 2);

    // Cached results do not spend tokens.
    let cached = orchestrator.submit(forecast("bob", "ACME")).await;
    assert_completed(&cached);
    assert!(cached.cache_hit);

    orchestrator.shutdown().await;
}

// ============================================================================
// CANCELLATION
// ============================================================================

#[tokio::test]
async fn cancelling_a_follower_leaves_the_leader_running() {
    let agent = forecaster(Duration::from_millis(300));
    let orchestrator = start_orchestrator(fast_config(), &[agent.clone()]);

    let alice = spawn_submit(&orchestrator, forecast("alice", "ACME"));
    assert!(wait_until(Duration::from_secs(2), || agent.running() == 1).await);

    let bob_request = forecast("bob", "ACME");
    let bob_id = bob_request.id;
    let bob = spawn_submit(&orchestrator, bob_request);
    assert!(wait_until(Duration::from_secs(2), || orchestrator.metrics().coalesced == 1).await);
    assert_eq!(orchestrator.active_requests(), 2);

    assert!(orchestrator.cancel(bob_id));
    assert_error(&bob.await.unwrap(), RequestStatus::Cancelled, ErrorKind::Cancelled);

    assert_completed(&alice.await.unwrap());
    assert_eq!(agent.invocations(), 1);
    assert_eq!(agent.cancellations(), 0);
    assert_eq!(orchestrator.breaker("forecaster").unwrap().failure_count(), 0);

    orchestrator.shutdown().await;
}

#[tokio::test]
async fn cancelling_the_leader_leaves_followers_waiting() {
    let agent = forecaster(Duration::from_millis(300));
    let orchestrator = start_orchestrator(fast_config(), &[agent.clone()]);

    let alice_request = forecast("alice", "ACME");
    let alice_id = alice_request.id;
    let alice = spawn_submit(&orchestrator, alice_request);
    assert!(wait_until(Duration::from_secs(2), || agent.running() == 1).await);

    let bob = spawn_submit(&orchestrator, forecast("bob", "ACME"));
    assert!(wait_until(Duration::from_secs(2), || orchestrator.metrics().coalesced == 1).await);

    assert!(orchestrator.cancel(alice_id));
    assert_error(&alice.await.unwrap(), RequestStatus::Cancelled, ErrorKind::Cancelled);

    assert_completed(&bob.await.unwrap());
    assert_eq!(agent.invocations(), 1);
    assert_eq!(agent.cancellations(), 0);

    // The surviving result was cached for later callers.
    let later = orchestrator.submit(forecast("carol", "ACME")).await;
    assert_completed(&later);
    assert!(later.cache_hit);

    orchestrator.shutdown().await;
}

#[tokio::test]
async fn computation_stops_when_every_waiter_cancels() {
    let agent = forecaster(Duration::from_secs(5));
    let orchestrator = start_orchestrator(fast_config(), &[agent.clone()]);

    let alice_request = forecast("alice", "ACME");
    let alice_id = alice_request.id;
    let alice = spawn_submit(&orchestrator, alice_request);
    assert!(wait_until(Duration::from_secs(2), || agent.running() == 1).await);

    let bob_request = forecast("bob", "ACME");
    let bob_id = bob_request.id;
    let bob = spawn_submit(&orchestrator, bob_request);
    assert!(wait_until(Duration::from_secs(2), || orchestrator.metrics().coalesced == 1).await);

    assert!(orchestrator.cancel(alice_id));
    assert_error(&alice.await.unwrap(), RequestStatus::Cancelled, ErrorKind::Cancelled);
    assert_eq!(agent.running(), 1);

    assert!(orchestrator.cancel(bob_id));
    assert_error(&bob.await.unwrap(), RequestStatus::Cancelled, ErrorKind::Cancelled);
    assert!(wait_until(Duration::from_secs(1), || agent.running() == 0).await);
    assert_eq!(orchestrator.in_flight_keys(), 0);
    assert_eq!(orchestrator.breaker("forecaster").unwrap().failure_count(), 0);

    // The key is free again: the next request starts a fresh computation.
    agent.set_latency(Duration::ZERO);
    let retry = orchestrator.submit(forecast("carol", "ACME")).await;
    assert_completed(&retry);
    assert!(!retry.cache_hit);
    assert_eq!(agent.invocations(), 2);

    orchestrator.shutdown().await;
}

#[tokio::test]
async fn shutdown_cancels_leaders_and_followers() {
    let agent = forecaster(Duration::from_secs(5));
    let orchestrator = start_orchestrator(fast_config(), &[agent.clone()]);

    let handles: Vec<_> = ["alice", "bob", "carol"]
        .iter()
        .map(|caller| spawn_submit(&orchestrator, forecast(caller, "ACME")))
        .collect();
    assert!(wait_until(Duration::from_secs(2), || orchestrator.metrics().coalesced == 2).await);

    orchestrator.shutdown().await;
    for handle in handles {
        assert_error(&handle.await.unwrap(), RequestStatus::Cancelled, ErrorKind::Cancelled);
    }
    assert_eq!(agent.running(), 0);
    assert_eq!(orchestrator.active_requests(), 0);
}
