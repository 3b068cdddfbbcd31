//! Request lifecycle.
//!
//! ```text
//! Submitted -> resolve -> authorize -> validate parameters
//!           -> cache lookup ----------------------------> Completed (hit)
//!           -> rate limit ------------------------------> Rejected
//!           -> in-flight claim -- follower -------------> computation's outcome
//!           -> circuit breaker -> queue ----------------> Rejected
//!           -> worker: execute with deadline ------------> Completed | Failed | TimedOut | Cancelled
//! ```
//!
//! No lock is held across an executor call. A computation writes its result
//! to the cache before releasing its waiters. Cancelling a request ends only
//! that request; the computation stops once nobody waits on it.

use bytes::Bytes;
use dashmap::DashMap;
use serde_json::Value;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};
use strata_agents::{CapabilityExecutor, CapabilityRegistry, ExecutionContext, ExecutorError};
use strata_cache::{cache_maintenance_task, CacheEngine, CacheStats, LoaderRegistry, PreloadLoader};
use strata_context::{
    selection_input_hash, ContentItem, ContentProvider, ContextConfig, ContextOptimizer,
    RoleProfile, RoleProfiles,
};
use strata_core::{
    authorize, content_hash_hex, Capability, CircuitState, DispatchError, HealthCheck,
    HealthReport, Parameters, Request, RequestId, Response, Role, StrataResult,
};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::breaker::{BreakerPermit, BreakerRegistry, CircuitBreaker};
use crate::config::OrchestratorConfig;
use crate::inflight::{Claim, InFlightGuard, InFlightTable};
use crate::metrics::{MetricsSnapshot, OrchestratorMetrics};
use crate::pool::{PoolStats, QueueSlot, WorkerPool};
use crate::rate_limit::{rate_limit_cleanup_task, CallerRateLimiter};

// ============================================================================
// CACHE KEYS
// ============================================================================

/// Cache key for a request: `action:role:digest`.
///
/// The digest covers the canonical parameters and the context selection
/// input hash. The action prefix doubles as the preload namespace.
pub fn cache_key(action: &str, parameters: &Parameters, role: Role, selection_hash: &str) -> String {
    let canonical = serde_json::json!({
        "parameters": parameters,
        "selection": selection_hash,
    });
    format!(
        "{}:{}:{}",
        action,
        role.as_str(),
        content_hash_hex(canonical.to_string().as_bytes())
    )
}

fn millis(duration: Duration) -> u64 {
    duration.as_millis().max(1) as u64
}

// ============================================================================
// BUILDER
// ============================================================================

struct NoContent;

#[async_trait::async_trait]
impl ContentProvider for NoContent {
    async fn content_for(&self, _role: Role, _intent: &str) -> Vec<ContentItem> {
        Vec::new()
    }
}

/// Assembles an [`Orchestrator`] from its collaborators.
pub struct OrchestratorBuilder {
    config: OrchestratorConfig,
    registry: Arc<CapabilityRegistry>,
    cache: Arc<CacheEngine>,
    optimizer: Option<ContextOptimizer>,
    profiles: RoleProfiles,
    content: Arc<dyn ContentProvider>,
    preload_loader: Arc<dyn PreloadLoader>,
}

impl OrchestratorBuilder {
    pub fn config(mut self, config: OrchestratorConfig) -> Self {
        self.config = config;
        self
    }

    pub fn optimizer(mut self, optimizer: ContextOptimizer) -> Self {
        self.optimizer = Some(optimizer);
        self
    }

    pub fn profiles(mut self, profiles: RoleProfiles) -> Self {
        self.profiles = profiles;
        self
    }

    pub fn content_provider(mut self, content: Arc<dyn ContentProvider>) -> Self {
        self.content = content;
        self
    }

    pub fn preload_loader(mut self, loader: Arc<dyn PreloadLoader>) -> Self {
        self.preload_loader = loader;
        self
    }

    pub fn build(self) -> StrataResult<Orchestrator> {
        self.config.validate()?;
        let optimizer = match self.optimizer {
            Some(optimizer) => optimizer,
            None => ContextOptimizer::with_default_ranker(ContextConfig::default())?,
        };
        let (shutdown_tx, _) = watch::channel(false);

        Ok(Orchestrator {
            breakers: BreakerRegistry::new(self.config.breaker.clone()),
            rate_limiter: Arc::new(CallerRateLimiter::new(
                self.config.rate_limit_per_minute,
                self.config.rate_limit_burst,
            )),
            pool: WorkerPool::new(self.config.pool_config()),
            inflight: Arc::new(InFlightTable::new()),
            active: DashMap::new(),
            metrics: Arc::new(OrchestratorMetrics::new()?),
            background: Mutex::new(Vec::new()),
            shutdown_tx,
            config: self.config,
            registry: self.registry,
            cache: self.cache,
            optimizer,
            profiles: self.profiles,
            content: self.content,
            preload_loader: self.preload_loader,
        })
    }
}

// ============================================================================
// ORCHESTRATOR
// ============================================================================

/// Successful result plus where it came from.
struct Served {
    value: Value,
    cache_hit: bool,
}

/// Entry in the active-request table, removed on drop.
struct ActiveRequest<'a> {
    active: &'a DashMap<RequestId, CancellationToken>,
    id: RequestId,
}

impl Drop for ActiveRequest<'_> {
    fn drop(&mut self) {
        self.active.remove(&self.id);
    }
}

/// Admits, coalesces, schedules and answers capability requests.
pub struct Orchestrator {
    config: OrchestratorConfig,
    registry: Arc<CapabilityRegistry>,
    cache: Arc<CacheEngine>,
    optimizer: ContextOptimizer,
    profiles: RoleProfiles,
    content: Arc<dyn ContentProvider>,
    preload_loader: Arc<dyn PreloadLoader>,
    breakers: BreakerRegistry,
    rate_limiter: Arc<CallerRateLimiter>,
    inflight: Arc<InFlightTable>,
    pool: WorkerPool,
    /// Cancellation tokens of requests past rate limiting and not yet answered.
    active: DashMap<RequestId, CancellationToken>,
    metrics: Arc<OrchestratorMetrics>,
    shutdown_tx: watch::Sender<bool>,
    background: Mutex<Vec<JoinHandle<()>>>,
}

impl std::fmt::Debug for Orchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Orchestrator")
            .field("config", &self.config)
            .field("registry", &self.registry)
            .field("pool", &self.pool)
            .field("active_requests", &self.active.len())
            .finish_non_exhaustive()
    }
}

impl Orchestrator {
    pub fn builder(registry: Arc<CapabilityRegistry>, cache: Arc<CacheEngine>) -> OrchestratorBuilder {
        OrchestratorBuilder {
            config: OrchestratorConfig::default(),
            registry,
            cache,
            optimizer: None,
            profiles: RoleProfiles::default(),
            content: Arc::new(NoContent),
            preload_loader: Arc::new(LoaderRegistry::new()),
        }
    }

    pub fn config(&self) -> &OrchestratorConfig {
        &self.config
    }

    pub fn registry(&self) -> &Arc<CapabilityRegistry> {
        &self.registry
    }

    pub fn cache(&self) -> &Arc<CacheEngine> {
        &self.cache
    }

    pub fn profiles(&self) -> &RoleProfiles {
        &self.profiles
    }

    fn background(&self) -> MutexGuard<'_, Vec<JoinHandle<()>>> {
        self.background.lock().unwrap_or_else(PoisonError::into_inner)
    }

    // ========================================================================
    // LIFECYCLE
    // ========================================================================

    /// Spawn the workers, the scaling controller, cache maintenance and
    /// rate limiter cleanup.
    ///
    /// Must be called from within a tokio runtime. Calling it again, or after
    /// [`shutdown`](Self::shutdown), is a no-op.
    pub fn start(&self) {
        let mut background = self.background();
        if !background.is_empty() || self.is_shutting_down() {
            return;
        }

        self.pool.start();
        background.push(tokio::spawn(self.pool.scaling_task(self.shutdown_tx.subscribe())));

        let maintenance = cache_maintenance_task(
            Arc::clone(&self.cache),
            Arc::clone(&self.preload_loader),
            self.cache.config().clone(),
            self.shutdown_tx.subscribe(),
        );
        background.push(tokio::spawn(async move {
            let _ = maintenance.await;
        }));
        background.push(tokio::spawn(rate_limit_cleanup_task(
            Arc::clone(&self.rate_limiter),
            self.config.rate_limit_cleanup_interval,
            self.shutdown_tx.subscribe(),
        )));

        tracing::info!(
            capabilities = self.registry.len(),
            min_workers = self.config.min_workers,
            max_workers = self.config.max_workers,
            "Orchestrator started"
        );
    }

    /// Stop background tasks, cancel outstanding requests and wait for the
    /// workers to exit. New submissions resolve `Cancelled` afterwards.
    pub async fn shutdown(&self) {
        tracing::info!(active_requests = self.active.len(), "Orchestrator shutting down");
        self.shutdown_tx.send_replace(true);
        for entry in self.active.iter() {
            entry.value().cancel();
        }

        let handles: Vec<JoinHandle<()>> = self.background().drain(..).collect();
        for handle in handles {
            if let Err(e) = handle.await {
                tracing::warn!(error = %e, "Background task ended abnormally");
            }
        }
        self.pool.shutdown().await;
        tracing::info!("Orchestrator stopped");
    }

    fn is_shutting_down(&self) -> bool {
        *self.shutdown_tx.borrow()
    }

    // ========================================================================
    // SUBMISSION
    // ========================================================================

    /// Run a request to a terminal status. Never panics on bad input; every
    /// failure becomes a `Rejected`, `Failed`, `TimedOut` or `Cancelled`
    /// response.
    pub async fn submit(&self, request: Request) -> Response {
        let started = Instant::now();
        self.metrics.record_submitted();
        tracing::debug!(
            request_id = %request.id,
            caller_id = %request.caller_id,
            role = %request.role,
            action = %request.action,
            "Request submitted"
        );

        let outcome = self.process(&request).await;
        let elapsed_ms = started.elapsed().as_millis() as u64;

        let response = match outcome {
            Ok(served) => Response::completed(request.id, served.value, served.cache_hit, elapsed_ms),
            Err(err) => {
                tracing::warn!(
                    request_id = %request.id,
                    caller_id = %request.caller_id,
                    action = %request.action,
                    kind = ?err.kind(),
                    error = %err,
                    "Request did not complete"
                );
                Response::from_error(request.id, &err, elapsed_ms)
            }
        };
        self.metrics.record_response(&response);
        response
    }

    /// Cancel one request that is waiting on a computation. Returns `false`
    /// when no such request is in progress.
    ///
    /// Other requests sharing the computation are unaffected. The computation
    /// itself is cancelled once its last waiter is gone.
    pub fn cancel(&self, request_id: RequestId) -> bool {
        match self.active.get(&request_id) {
            Some(token) => {
                token.cancel();
                tracing::info!(request_id = %request_id, "Request cancelled");
                true
            }
            None => false,
        }
    }

    async fn process(&self, request: &Request) -> Result<Served, DispatchError> {
        let capability = self
            .registry
            .resolve(&request.action)
            .ok_or_else(|| DispatchError::UnknownAction {
                action: request.action.clone(),
            })?;

        let profile = self.profiles.get(request.role);
        if !authorize(profile.permission, capability.required_permission) {
            return Err(DispatchError::PermissionDenied {
                action: request.action.clone(),
                required: capability.required_permission,
                actual: profile.permission,
            });
        }

        capability
            .parameters
            .validate(&request.parameters)
            .map_err(|e| DispatchError::InvalidParameters {
                action: request.action.clone(),
                reason: e.to_string(),
            })?;

        let intent = request.intent();
        let pool = self.content.content_for(request.role, intent).await;
        let budget = self.optimizer.budget_for(profile);
        let selection_hash = selection_input_hash(profile, intent, &pool, budget);
        let key = cache_key(&request.action, &request.parameters, request.role, &selection_hash);

        if let Some(value) = self.cached(&key) {
            return Ok(Served {
                value,
                cache_hit: true,
            });
        }

        self.rate_limiter
            .check(&request.caller_id)
            .map_err(|wait| DispatchError::RateLimited {
                caller_id: request.caller_id.clone(),
                retry_after_ms: millis(wait),
            })?;

        let cancel = CancellationToken::new();
        let _active = ActiveRequest {
            active: &self.active,
            id: request.id,
        };
        self.active.insert(request.id, cancel.clone());
        // Shutdown may have swept the table before this entry landed.
        if self.is_shutting_down() {
            cancel.cancel();
        }

        let mut waiter = match self.inflight.claim(&key) {
            Claim::Follower(waiter) => {
                self.metrics.record_coalesced();
                tracing::debug!(request_id = %request.id, key = %key, "Waiting on in-flight computation");
                waiter
            }
            Claim::Leader(guard, waiter) => {
                // The previous computation may have published between the lookup and the claim.
                if let Some(value) = self.cached(&key) {
                    guard.publish(Ok(value.clone()));
                    return Ok(Served {
                        value,
                        cache_hit: true,
                    });
                }
                self.schedule(request, &capability, profile, intent, &pool, budget, guard);
                waiter
            }
        };

        let outcome = tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(DispatchError::Cancelled {
                action: request.action.clone(),
            }),
            outcome = waiter.outcome(&request.action) => outcome,
        };
        outcome.map(|value| Served {
            value,
            cache_hit: false,
        })
    }

    /// Queue the computation for `guard`'s key, or publish why it was not queued.
    #[allow(clippy::too_many_arguments)]
    fn schedule(
        &self,
        request: &Request,
        capability: &Capability,
        profile: &RoleProfile,
        intent: &str,
        pool: &[ContentItem],
        budget: u32,
        guard: InFlightGuard,
    ) {
        let (executor, permit, slot) = match self.admit(request, capability) {
            Ok(admitted) => admitted,
            Err(err) => {
                guard.publish(Err(err));
                return;
            }
        };

        let selection = self.optimizer.optimize(profile, intent, pool, budget);
        let timeout = self.config.deadline_for(capability.estimated_duration_ms);
        let computation = Computation {
            guard,
            cache: Arc::clone(&self.cache),
            metrics: Arc::clone(&self.metrics),
            executor,
            permit,
            action: request.action.clone(),
            parameters: request.parameters.clone(),
            request_id: request.id,
            caller_id: request.caller_id.clone(),
            role: request.role,
            intent: intent.to_string(),
            context_items: Arc::new(selection.items),
            timeout,
            priority: profile.cache_priority,
        };
        slot.submit(Box::pin(computation.run()));

        tracing::debug!(
            request_id = %request.id,
            agent_id = %capability.owner_agent_id,
            timeout_ms = millis(timeout),
            "Request queued"
        );
    }

    /// Executor, breaker permit and queue room for a new computation.
    fn admit(
        &self,
        request: &Request,
        capability: &Capability,
    ) -> Result<(Arc<dyn CapabilityExecutor>, BreakerPermit, QueueSlot<'_>), DispatchError> {
        let executor = self
            .registry
            .executor(&capability.owner_agent_id)
            .ok_or_else(|| DispatchError::UnknownAction {
                action: request.action.clone(),
            })?;

        let breaker = self.breakers.get_or_create(&capability.owner_agent_id);
        let permit = breaker.try_acquire().map_err(|wait| DispatchError::CircuitOpen {
            agent_id: capability.owner_agent_id.clone(),
            retry_after_ms: millis(wait),
        })?;

        if self.is_shutting_down() {
            return Err(DispatchError::Cancelled {
                action: request.action.clone(),
            });
        }

        let slot = self.pool.try_reserve().map_err(|_| {
            if self.is_shutting_down() {
                DispatchError::Cancelled {
                    action: request.action.clone(),
                }
            } else {
                DispatchError::Overloaded {
                    queue_capacity: self.config.queue_capacity,
                    retry_after_ms: millis(self.config.overloaded_retry_after),
                }
            }
        })?;
        Ok((executor, permit, slot))
    }

    fn cached(&self, key: &str) -> Option<Value> {
        let bytes = self.cache.get(key)?;
        match serde_json::from_slice(&bytes) {
            Ok(value) => Some(value),
            Err(e) => {
                tracing::warn!(key = %key, error = %e, "Dropping undecodable cached result");
                self.cache.invalidate(key);
                None
            }
        }
    }

    // ========================================================================
    // OBSERVABILITY
    // ========================================================================

    fn refresh_gauges(&self) {
        self.metrics.set_pool(&self.pool.stats());
        self.metrics.set_in_flight(self.inflight.len());
    }

    pub fn metrics(&self) -> MetricsSnapshot {
        self.refresh_gauges();
        self.metrics.snapshot()
    }

    /// Prometheus registry holding this orchestrator's metrics.
    pub fn metrics_registry(&self) -> &prometheus::Registry {
        self.metrics.registry()
    }

    /// Current metrics in the Prometheus text format.
    pub fn metrics_text(&self) -> StrataResult<String> {
        self.refresh_gauges();
        self.metrics.encode_text()
    }

    pub fn pool_stats(&self) -> PoolStats {
        self.pool.stats()
    }

    pub fn cache_stats(&self) -> CacheStats {
        self.cache.stats()
    }

    pub fn breaker(&self, agent_id: &str) -> Option<Arc<CircuitBreaker>> {
        self.breakers.get(agent_id)
    }

    /// Requests past rate limiting and not yet answered.
    pub fn active_requests(&self) -> usize {
        self.active.len()
    }

    /// Cache keys with a computation running.
    pub fn in_flight_keys(&self) -> usize {
        self.inflight.len()
    }

    /// One check per circuit breaker, then the worker pool, then the cache.
    pub fn health(&self) -> Vec<HealthCheck> {
        let mut checks: Vec<HealthCheck> = self.breakers.all().iter().map(|b| breaker_check(b)).collect();
        checks.push(pool_check(&self.pool.stats()));
        checks.push(cache_check(&self.cache.stats()));
        checks
    }

    pub fn health_report(&self) -> HealthReport {
        HealthReport::from_checks(self.health())
    }
}

// ============================================================================
// HEALTH CHECKS
// ============================================================================

fn breaker_check(breaker: &CircuitBreaker) -> HealthCheck {
    let component = format!("breaker:{}", breaker.agent_id());
    let check = match breaker.state() {
        CircuitState::Closed => HealthCheck::healthy(component),
        CircuitState::HalfOpen => HealthCheck::degraded(component, "circuit half-open, trial in progress"),
        CircuitState::Open => HealthCheck::unhealthy(component, "circuit open"),
    };
    check
        .with_metadata("state", Value::from(breaker.state().to_string()))
        .with_metadata("failures", Value::from(breaker.failure_count()))
}

fn pool_check(stats: &PoolStats) -> HealthCheck {
    let check = if stats.workers == 0 {
        HealthCheck::unhealthy("worker_pool", "no workers running")
    } else if stats.queued >= stats.queue_capacity {
        HealthCheck::degraded("worker_pool", "work queue full")
    } else {
        HealthCheck::healthy("worker_pool")
    };
    check
        .with_metadata("workers", Value::from(stats.workers))
        .with_metadata("busy", Value::from(stats.busy))
        .with_metadata("queued", Value::from(stats.queued))
        .with_metadata("queue_capacity", Value::from(stats.queue_capacity))
}

fn cache_check(stats: &CacheStats) -> HealthCheck {
    HealthCheck::healthy("cache")
        .with_metadata("entries", Value::from(stats.entry_count()))
        .with_metadata("hit_rate", Value::from(stats.hit_rate()))
        .with_metadata("evictions", Value::from(stats.evictions))
        .with_metadata("corrupt_drops", Value::from(stats.corrupt_drops))
}

// ============================================================================
// EXECUTION
// ============================================================================

fn store_result(
    cache: &CacheEngine,
    metrics: &OrchestratorMetrics,
    key: &str,
    value: &Value,
    priority: u32,
    elapsed_ms: u64,
) {
    let bytes = match serde_json::to_vec(value) {
        Ok(bytes) => Bytes::from(bytes),
        Err(e) => {
            tracing::warn!(key = %key, error = %e, "Result not serializable, skipping cache");
            metrics.record_cache_write_failure();
            return;
        }
    };
    let cost = elapsed_ms.max(1) as f64;
    match cache.put(key, bytes, priority, cost) {
        Ok(tier) => {
            tracing::debug!(key = %key, tier = %tier, priority, cost, "Cached result");
        }
        Err(e) => {
            tracing::warn!(key = %key, error = %e, "Result not cached");
            metrics.record_cache_write_failure();
        }
    }
}

/// One execution for one cache key, shared by every request waiting on it.
struct Computation {
    guard: InFlightGuard,
    cache: Arc<CacheEngine>,
    metrics: Arc<OrchestratorMetrics>,
    executor: Arc<dyn CapabilityExecutor>,
    permit: BreakerPermit,
    action: String,
    parameters: Parameters,
    /// The request that started the computation.
    request_id: RequestId,
    caller_id: String,
    role: Role,
    intent: String,
    context_items: Arc<Vec<ContentItem>>,
    timeout: Duration,
    /// Profile cache priority, before the demand bonus.
    priority: u32,
}

impl Computation {
    /// Execute under the deadline, cache a success, report to the breaker
    /// and publish to the waiters.
    ///
    /// Cancellation is not a breaker failure; the permit is dropped
    /// unrecorded.
    async fn run(self) {
        let Computation {
            guard,
            cache,
            metrics,
            executor,
            permit,
            action,
            parameters,
            request_id,
            caller_id,
            role,
            intent,
            context_items,
            timeout,
            priority,
        } = self;

        let cancel = guard.cancellation();
        if cancel.is_cancelled() {
            guard.publish(Err(DispatchError::Cancelled { action }));
            return;
        }

        let started = Instant::now();
        // Child token: the deadline stops the executor without cancelling
        // the computation.
        let execution_token = cancel.child_token();
        let ctx = ExecutionContext::new(
            request_id,
            caller_id,
            role,
            intent,
            context_items,
            tokio::time::Instant::now() + timeout,
            execution_token.clone(),
        );

        let result = tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(DispatchError::Cancelled { action: action.clone() }),
            finished = tokio::time::timeout(timeout, executor.execute(&action, &parameters, ctx)) => {
                match finished {
                    Ok(Ok(value)) => Ok(value),
                    Ok(Err(ExecutorError::Failed { message })) => Err(DispatchError::Execution {
                        action: action.clone(),
                        message,
                    }),
                    Ok(Err(ExecutorError::Cancelled)) => Err(DispatchError::Cancelled {
                        action: action.clone(),
                    }),
                    Err(_) => {
                        execution_token.cancel();
                        Err(DispatchError::TimedOut {
                            action: action.clone(),
                            timeout_ms: millis(timeout),
                        })
                    }
                }
            }
        };

        match &result {
            Ok(_) => permit.record_success(),
            Err(err) if err.counts_against_breaker() => permit.record_failure(),
            Err(_) => drop(permit),
        }

        let elapsed = started.elapsed();
        metrics.observe_execution(elapsed);
        tracing::debug!(
            request_id = %request_id,
            action = %action,
            elapsed_ms = elapsed.as_millis() as u64,
            waiters = guard.waiter_count(),
            ok = result.is_ok(),
            "Execution finished"
        );

        if let Ok(value) = &result {
            // Every waiter beyond the first is demand the cache should keep.
            let demand = guard.waiter_count().saturating_sub(1) as u32;
            store_result(
                &cache,
                &metrics,
                guard.key(),
                value,
                priority.saturating_add(demand),
                elapsed.as_millis() as u64,
            );
        }
        guard.publish(result);
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_cache_key_is_canonical() {
        let mut a = Parameters::new();
        a.insert("symbol".to_string(), json!("ACME"));
        a.insert("horizon".to_string(), json!(30));
        let mut b = Parameters::new();
        b.insert("horizon".to_string(), json!(30));
        b.insert("symbol".to_string(), json!("ACME"));

        let ka = cache_key("forecast", &a, Role::Analyst, "h1");
        let kb = cache_key("forecast", &b, Role::Analyst, "h1");
        assert_eq!(ka, kb);
        assert!(ka.starts_with("forecast:analyst:"));
    }

    #[test]
    fn test_cache_key_varies_by_role_and_selection() {
        let params = Parameters::new();
        let base = cache_key("forecast", &params, Role::Analyst, "h1");
        assert_ne!(base, cache_key("forecast", &params, Role::Production, "h1"));
        assert_ne!(base, cache_key("forecast", &params, Role::Analyst, "h2"));
        assert_ne!(base, cache_key("report", &params, Role::Analyst, "h1"));
    }

    #[test]
    fn test_millis_has_floor_of_one() {
        assert_eq!(millis(Duration::ZERO), 1);
        assert_eq!(millis(Duration::from_millis(250)), 250);
    }

    #[test]
    fn test_pool_check_states() {
        let idle = PoolStats {
            workers: 0,
            busy: 0,
            queued: 0,
            queue_capacity: 4,
            jobs_completed: 0,
            jobs_rejected: 0,
        };
        assert_eq!(pool_check(&idle).status, strata_core::HealthStatus::Unhealthy);

        let full = PoolStats {
            workers: 2,
            queued: 4,
            ..idle
        };
        assert_eq!(pool_check(&full).status, strata_core::HealthStatus::Degraded);

        let fine = PoolStats { workers: 2, ..idle };
        assert_eq!(pool_check(&fine).status, strata_core::HealthStatus::Healthy);
    }
}
