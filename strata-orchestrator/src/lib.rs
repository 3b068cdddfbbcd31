//! Strata Orchestrator - Request Serving Core
//!
//! Takes [`Request`](strata_core::Request)s from callers and drives each one
//! to a terminal [`Response`](strata_core::Response): capability lookup,
//! permission check, cache lookup, per-caller rate limiting, coalescing of
//! identical in-flight work, per-agent circuit breaking, and execution on a
//! bounded, self-scaling worker pool. Metrics are kept in a per-orchestrator
//! Prometheus registry.
//!
//! ```ignore
//! let orchestrator = Orchestrator::builder(registry, cache)
//!     .config(OrchestratorConfig::from_env())
//!     .content_provider(content)
//!     .build()?;
//! orchestrator.start();
//! let response = orchestrator.submit(request).await;
//! orchestrator.shutdown().await;
//! ```

pub mod breaker;
pub mod config;
pub mod constants;
pub mod inflight;
pub mod metrics;
pub mod orchestrator;
pub mod pool;
pub mod rate_limit;
pub mod telemetry;

pub use breaker::{BreakerPermit, BreakerRegistry, CircuitBreaker, CircuitBreakerConfig};
pub use config::OrchestratorConfig;
pub use metrics::{MetricsSnapshot, OrchestratorMetrics};
pub use orchestrator::{cache_key, Orchestrator, OrchestratorBuilder};
pub use pool::{PoolConfig, PoolStats, QueueSlot, ScaleDecision, ScalingController, WorkerPool};
pub use rate_limit::{rate_limit_cleanup_task, CallerRateLimiter};
pub use telemetry::{init_tracing, LogFormat, TelemetryConfig};
