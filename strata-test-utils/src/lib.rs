//! Strata Test Utilities
//!
//! Shared test infrastructure for the Strata workspace:
//! - Mock executors and content/preload collaborators
//! - Proptest generators for content items and parameter maps
//! - Fixtures for configs and capabilities
//! - Assertions on responses

pub use strata_agents::{CapabilityExecutor, CapabilityRegistry, ExecutionContext, ExecutorError};
pub use strata_cache::{CacheConfig, CacheEngine, PreloadLoader};
pub use strata_context::{ContentItem, ContentProvider};
pub use strata_core::{
    Capability, CacheError, ErrorKind, ParamKind, ParameterSchema, ParameterSpec, Parameters,
    Permission, Request, RequestStatus, Response, Role,
};

use async_trait::async_trait;
use bytes::Bytes;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

// ============================================================================
// MOCK EXECUTOR
// ============================================================================

/// What a [`MockExecutor`] does once its latency has elapsed.
#[derive(Debug, Clone, PartialEq)]
pub enum MockBehavior {
    /// Return this value.
    Succeed(Value),
    /// Return `ExecutorError::Failed` with this message.
    Fail(String),
    /// Return the capability name, parameters and selected context item ids.
    Echo,
}

/// Agent whose behavior and latency can be changed mid-test.
///
/// Honours cancellation: if the context is cancelled while the simulated
/// latency runs, it returns `ExecutorError::Cancelled` immediately.
#[derive(Debug)]
pub struct MockExecutor {
    agent_id: String,
    capabilities: Vec<Capability>,
    behavior: Mutex<MockBehavior>,
    latency: Mutex<Duration>,
    invocations: AtomicUsize,
    running: AtomicUsize,
    cancellations: AtomicUsize,
}

impl MockExecutor {
    pub fn new(agent_id: impl Into<String>) -> Self {
        Self {
            agent_id: agent_id.into(),
            capabilities: Vec::new(),
            behavior: Mutex::new(MockBehavior::Echo),
            latency: Mutex::new(Duration::ZERO),
            invocations: AtomicUsize::new(0),
            running: AtomicUsize::new(0),
            cancellations: AtomicUsize::new(0),
        }
    }

    /// Declare a capability owned by this agent with an open schema.
    pub fn with_capability(mut self, name: &str, permission: Permission) -> Self {
        let capability = Capability::new(name, self.agent_id.clone(), permission);
        self.capabilities.push(capability);
        self
    }

    /// Declare a fully specified capability. Its owner is forced to this agent.
    pub fn with_declared(mut self, mut capability: Capability) -> Self {
        capability.owner_agent_id = self.agent_id.clone();
        self.capabilities.push(capability);
        self
    }

    pub fn with_behavior(self, behavior: MockBehavior) -> Self {
        self.set_behavior(behavior);
        self
    }

    pub fn succeeding(self, value: Value) -> Self {
        self.with_behavior(MockBehavior::Succeed(value))
    }

    pub fn failing(self, message: impl Into<String>) -> Self {
        self.with_behavior(MockBehavior::Fail(message.into()))
    }

    pub fn with_latency(self, latency: Duration) -> Self {
        self.set_latency(latency);
        self
    }

    pub fn set_behavior(&self, behavior: MockBehavior) {
        *self.behavior.lock().unwrap_or_else(PoisonError::into_inner) = behavior;
    }

    pub fn set_latency(&self, latency: Duration) {
        *self.latency.lock().unwrap_or_else(PoisonError::into_inner) = latency;
    }

    /// Calls to `execute` so far.
    pub fn invocations(&self) -> usize {
        self.invocations.load(Ordering::SeqCst)
    }

    /// Calls currently inside `execute`.
    pub fn running(&self) -> usize {
        self.running.load(Ordering::SeqCst)
    }

    /// Calls that stopped early because their context was cancelled.
    pub fn cancellations(&self) -> usize {
        self.cancellations.load(Ordering::SeqCst)
    }

    fn behavior(&self) -> MockBehavior {
        self.behavior.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    fn latency(&self) -> Duration {
        *self.latency.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

struct RunningGuard<'a>(&'a AtomicUsize);

impl Drop for RunningGuard<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl CapabilityExecutor for MockExecutor {
    fn agent_id(&self) -> &str {
        &self.agent_id
    }

    fn capabilities(&self) -> Vec<Capability> {
        self.capabilities.clone()
    }

    async fn execute(
        &self,
        capability: &str,
        parameters: &Parameters,
        ctx: ExecutionContext,
    ) -> Result<Value, ExecutorError> {
        self.invocations.fetch_add(1, Ordering::SeqCst);
        self.running.fetch_add(1, Ordering::SeqCst);
        let _running = RunningGuard(&self.running);

        let latency = self.latency();
        if !latency.is_zero() {
            tokio::select! {
                _ = tokio::time::sleep(latency) => {}
                _ = ctx.cancelled() => {
                    self.cancellations.fetch_add(1, Ordering::SeqCst);
                    return Err(ExecutorError::Cancelled);
                }
            }
        }

        match self.behavior() {
            MockBehavior::Succeed(value) => Ok(value),
            MockBehavior::Fail(message) => Err(ExecutorError::failed(message)),
            MockBehavior::Echo => {
                let context: Vec<&str> = ctx.context_items.iter().map(|i| i.id.as_str()).collect();
                Ok(json!({
                    "capability": capability,
                    "agent_id": self.agent_id,
                    "parameters": parameters,
                    "context": context,
                }))
            }
        }
    }
}

// ============================================================================
// CONTENT AND PRELOAD COLLABORATORS
// ============================================================================

/// Content provider returning the same pool for every role and intent.
#[derive(Debug, Clone, Default)]
pub struct StaticContentProvider {
    items: Vec<ContentItem>,
}

impl StaticContentProvider {
    pub fn new(items: Vec<ContentItem>) -> Self {
        Self { items }
    }
}

#[async_trait]
impl ContentProvider for StaticContentProvider {
    async fn content_for(&self, _role: Role, _intent: &str) -> Vec<ContentItem> {
        self.items.clone()
    }
}

/// Preload loader backed by a fixed map. Counts calls.
#[derive(Debug, Default)]
pub struct MapPreloadLoader {
    values: HashMap<String, Bytes>,
    failing: Vec<String>,
    calls: AtomicUsize,
}

impl MapPreloadLoader {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_value(mut self, key: impl Into<String>, value: impl Into<Bytes>) -> Self {
        self.values.insert(key.into(), value.into());
        self
    }

    /// Make loads of `key` fail.
    pub fn with_failure(mut self, key: impl Into<String>) -> Self {
        self.failing.push(key.into());
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl PreloadLoader for MapPreloadLoader {
    async fn load(&self, key: &str) -> Result<Option<Bytes>, CacheError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.failing.iter().any(|k| k == key) {
            return Err(CacheError::PreloadFailed {
                key: key.to_string(),
                reason: "loader unavailable".to_string(),
            });
        }
        Ok(self.values.get(key).cloned())
    }
}

// ============================================================================
// PROPTEST GENERATORS
// ============================================================================

pub mod generators {
    //! Proptest strategies for Strata inputs.

    use super::*;
    use proptest::prelude::*;

    /// Tags drawn from the default role profiles plus a few unknown ones.
    pub const TAGS: [&str; 10] = [
        "summary",
        "trend",
        "chart",
        "methodology",
        "model",
        "statistics",
        "schema",
        "status",
        "appendix",
        "raw",
    ];

    /// Generate a Role variant.
    pub fn arb_role() -> impl Strategy<Value = Role> {
        prop_oneof![
            Just(Role::Analyst),
            Just(Role::DataScientist),
            Just(Role::Production),
        ]
    }

    /// Generate a Permission variant.
    pub fn arb_permission() -> impl Strategy<Value = Permission> {
        prop::sample::select(Permission::ALL.to_vec())
    }

    /// Generate a ContentItem with 0-3 known tags.
    pub fn arb_content_item() -> impl Strategy<Value = ContentItem> {
        (
            "[a-z]{1,8}",
            prop::collection::vec(prop::sample::select(TAGS.to_vec()), 0..3),
            1u32..800,
            0.0f64..=1.0,
        )
            .prop_map(|(id, tags, cost, relevance)| {
                ContentItem::new(id, &tags, cost).with_base_relevance(relevance)
            })
    }

    /// Generate a content pool of up to `max` items.
    pub fn arb_content_pool(max: usize) -> impl Strategy<Value = Vec<ContentItem>> {
        prop::collection::vec(arb_content_item(), 0..=max)
    }

    /// Generate a scalar JSON value.
    pub fn arb_scalar_value() -> impl Strategy<Value = Value> {
        prop_oneof![
            Just(Value::Null),
            any::<bool>().prop_map(Value::from),
            any::<i64>().prop_map(Value::from),
            "[a-zA-Z0-9 ]{0,16}".prop_map(Value::from),
        ]
    }

    /// Generate a parameter map with up to five scalar entries.
    pub fn arb_parameters() -> impl Strategy<Value = Parameters> {
        prop::collection::btree_map("[a-z_]{1,10}", arb_scalar_value(), 0..5)
    }

    /// Generate cache payloads of 1-512 bytes.
    pub fn arb_payload() -> impl Strategy<Value = Bytes> {
        prop::collection::vec(any::<u8>(), 1..512).prop_map(Bytes::from)
    }
}

// ============================================================================
// TEST FIXTURES
// ============================================================================

pub mod fixtures {
    //! Pre-built fixtures for common scenarios.

    use super::*;

    /// Small cache with no expiry and long maintenance intervals.
    pub fn small_cache_config() -> CacheConfig {
        CacheConfig::default()
            .with_capacities(64 * 1024, 256 * 1024, 32 * 1024)
            .with_default_ttl(None)
            .with_intervals(Duration::from_secs(3600), Duration::from_secs(3600))
    }

    /// A cache engine built from [`small_cache_config`].
    pub fn small_cache() -> CacheEngine {
        match CacheEngine::new(small_cache_config()) {
            Ok(engine) => engine,
            Err(e) => panic!("small cache fixture must be valid: {}", e),
        }
    }

    /// Capability requiring a string `symbol`, with an optional integer `horizon`.
    pub fn forecast_capability(agent_id: &str) -> Capability {
        Capability::new("forecast", agent_id, Permission::ReadExecute)
            .with_estimated_duration_ms(100)
            .with_parameters(
                ParameterSchema::strict()
                    .with_param(ParameterSpec::required("symbol", ParamKind::String))
                    .with_param(ParameterSpec::optional("horizon", ParamKind::Integer))
                    .with_param(ParameterSpec::optional("intent", ParamKind::String)),
            )
    }

    /// A small content pool covering each default profile's top tags.
    pub fn content_pool() -> Vec<ContentItem> {
        vec![
            ContentItem::new("exec-summary", &["summary"], 200).with_base_relevance(0.9),
            ContentItem::new("q3-trend", &["trend", "chart"], 350).with_base_relevance(0.7),
            ContentItem::new("model-card", &["model", "methodology"], 600).with_base_relevance(0.6),
            ContentItem::new("feature-stats", &["statistics"], 400).with_base_relevance(0.5),
            ContentItem::new("table-schema", &["schema"], 150).with_base_relevance(0.4),
            ContentItem::new("raw-dump", &["raw"], 3000).with_base_relevance(0.1),
        ]
    }

    /// Request from `caller` with a single parameter.
    pub fn request(caller: &str, role: Role, action: &str, key: &str, value: Value) -> Request {
        Request::new(caller, role, action).with_param(key, value)
    }
}

// ============================================================================
// CUSTOM ASSERTIONS
// ============================================================================

pub mod assertions {
    //! Assertions on orchestrator responses.

    use super::*;

    /// Assert that a response completed.
    #[track_caller]
    pub fn assert_completed(response: &Response) {
        assert_eq!(
            response.status,
            RequestStatus::Completed,
            "Expected Completed, got: {:?}",
            response
        );
        assert!(response.result.is_some() && response.error.is_none());
    }

    /// Assert a terminal status and error kind.
    #[track_caller]
    pub fn assert_error(response: &Response, status: RequestStatus, kind: ErrorKind) {
        assert_eq!(response.status, status, "Wrong status in: {:?}", response);
        assert_eq!(response.error_kind(), Some(kind), "Wrong error kind in: {:?}", response);
        assert!(response.result.is_none());
    }

    /// Assert a retryable rejection with a positive retry hint.
    #[track_caller]
    pub fn assert_retryable_rejection(response: &Response, kind: ErrorKind) {
        assert_error(response, RequestStatus::Rejected, kind);
        let error = response.error.as_ref();
        assert!(error.is_some_and(|e| e.retryable), "Expected retryable: {:?}", response);
        assert!(
            error.and_then(|e| e.retry_after_ms).is_some_and(|ms| ms > 0),
            "Expected retry hint: {:?}",
            response
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use strata_core::new_request_id;
    use tokio::time::Instant;
    use tokio_util::sync::CancellationToken;

    fn context(cancel: CancellationToken) -> ExecutionContext {
        ExecutionContext::new(
            new_request_id(),
            "tester",
            Role::Analyst,
            "",
            Arc::new(vec![ContentItem::new("a", &["summary"], 10)]),
            Instant::now() + Duration::from_secs(5),
            cancel,
        )
    }

    #[tokio::test]
    async fn test_echo_reports_selected_context() {
        let agent = MockExecutor::new("echo").with_capability("ping", Permission::ReadOnly);
        let params = Parameters::from([("x".to_string(), json!(1))]);

        let value = agent
            .execute("ping", &params, context(CancellationToken::new()))
            .await
            .unwrap();

        assert_eq!(value["capability"], "ping");
        assert_eq!(value["context"], json!(["a"]));
        assert_eq!(agent.invocations(), 1);
        assert_eq!(agent.running(), 0);
    }

    #[tokio::test]
    async fn test_latency_is_interrupted_by_cancellation() {
        let agent = MockExecutor::new("slow").with_latency(Duration::from_secs(30));
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            trigger.cancel();
        });

        let result = agent.execute("ping", &Parameters::new(), context(cancel)).await;

        assert_eq!(result, Err(ExecutorError::Cancelled));
        assert_eq!(agent.cancellations(), 1);
    }

    #[tokio::test]
    async fn test_behavior_switches_at_runtime() {
        let agent = MockExecutor::new("flaky").failing("boom");
        let first = agent.execute("x", &Parameters::new(), context(CancellationToken::new())).await;
        assert!(matches!(first, Err(ExecutorError::Failed { .. })));

        agent.set_behavior(MockBehavior::Succeed(json!("ok")));
        let second = agent.execute("x", &Parameters::new(), context(CancellationToken::new())).await;
        assert_eq!(second, Ok(json!("ok")));
    }

    #[tokio::test]
    async fn test_map_loader_counts_and_fails() {
        let loader = MapPreloadLoader::new()
            .with_value("k", "v")
            .with_failure("bad");
        assert_eq!(loader.load("k").await.unwrap(), Some(Bytes::from("v")));
        assert_eq!(loader.load("missing").await.unwrap(), None);
        assert!(loader.load("bad").await.is_err());
        assert_eq!(loader.calls(), 3);
    }
}
