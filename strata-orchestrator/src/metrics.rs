//! Prometheus metrics for the orchestrator.
//!
//! Each [`OrchestratorMetrics`] owns its own [`Registry`], so several
//! orchestrators can live in one process. [`MetricsSnapshot`] is a plain
//! view of the same counters for callers that do not scrape.

use prometheus::{
    Encoder, Histogram, HistogramOpts, IntCounter, IntCounterVec, IntGauge, Opts, Registry,
    TextEncoder,
};
use serde::Serialize;
use std::time::Duration;
use strata_core::{ConfigError, RequestStatus, Response, StrataResult};

use crate::pool::PoolStats;

/// Executor latency buckets (seconds)
/// Covers: 1ms, 5ms, 10ms, 25ms, 50ms, 100ms, 250ms, 500ms, 1s, 2.5s, 5s, 10s, 30s
const EXECUTION_LATENCY_BUCKETS: &[f64] = &[
    0.001, 0.005, 0.010, 0.025, 0.050, 0.100, 0.250, 0.500, 1.0, 2.5, 5.0, 10.0, 30.0,
];

/// `error_kind` label for completed requests.
const NO_ERROR: &str = "none";

/// Every `(status, error_kind)` pair a response can carry.
const REQUEST_LABELS: &[(RequestStatus, &[&str])] = &[
    (RequestStatus::Completed, &[NO_ERROR]),
    (
        RequestStatus::Rejected,
        &[
            "unknown_action",
            "permission_denied",
            "invalid_parameters",
            "rate_limited",
            "circuit_open",
            "overloaded",
            "cache_entry_too_large",
        ],
    ),
    (RequestStatus::Failed, &["execution_error"]),
    (RequestStatus::TimedOut, &["timed_out"]),
    (RequestStatus::Cancelled, &["cancelled"]),
];

fn register<C>(registry: &Registry, name: &str, collector: prometheus::Result<C>) -> StrataResult<C>
where
    C: prometheus::core::Collector + Clone + 'static,
{
    let collector = collector.map_err(|e| ConfigError::invalid(name, e, "failed to create metric"))?;
    registry
        .register(Box::new(collector.clone()))
        .map_err(|e| ConfigError::invalid(name, e, "failed to register metric"))?;
    Ok(collector)
}

/// Request, execution and pool metrics for one orchestrator.
#[derive(Clone)]
pub struct OrchestratorMetrics {
    registry: Registry,

    /// Terminal responses - labels: status, error_kind
    pub requests_total: IntCounterVec,

    /// Requests accepted by `submit`
    pub submitted_total: IntCounter,

    /// Responses served from the cache
    pub cache_hits_total: IntCounter,

    /// Requests that waited on another request's computation
    pub coalesced_total: IntCounter,

    /// Results that could not be written to the cache
    pub cache_write_failures_total: IntCounter,

    /// Executor run time, one sample per computation
    pub execution_duration_seconds: Histogram,

    /// Jobs waiting for a worker
    pub queue_depth: IntGauge,

    /// Workers currently running a job
    pub busy_workers: IntGauge,

    /// Live workers
    pub workers: IntGauge,

    /// Cache keys with a computation running
    pub in_flight_keys: IntGauge,
}

impl OrchestratorMetrics {
    /// Create all metrics in a fresh registry.
    pub fn new() -> StrataResult<Self> {
        let registry = Registry::new();

        let requests_total = register(
            &registry,
            "strata_requests_total",
            IntCounterVec::new(
                Opts::new("strata_requests_total", "Requests by terminal status"),
                &["status", "error_kind"],
            ),
        )?;
        for (status, kinds) in REQUEST_LABELS {
            for kind in *kinds {
                requests_total.with_label_values(&[status.as_str(), *kind]);
            }
        }

        Ok(Self {
            requests_total,
            submitted_total: register(
                &registry,
                "strata_requests_submitted_total",
                IntCounter::new("strata_requests_submitted_total", "Requests submitted"),
            )?,
            cache_hits_total: register(
                &registry,
                "strata_cache_hits_total",
                IntCounter::new("strata_cache_hits_total", "Responses served from the cache"),
            )?,
            coalesced_total: register(
                &registry,
                "strata_coalesced_total",
                IntCounter::new(
                    "strata_coalesced_total",
                    "Requests that joined an in-flight computation",
                ),
            )?,
            cache_write_failures_total: register(
                &registry,
                "strata_cache_write_failures_total",
                IntCounter::new(
                    "strata_cache_write_failures_total",
                    "Results that could not be cached",
                ),
            )?,
            execution_duration_seconds: register(
                &registry,
                "strata_execution_duration_seconds",
                Histogram::with_opts(
                    HistogramOpts::new(
                        "strata_execution_duration_seconds",
                        "Executor run time in seconds",
                    )
                    .buckets(EXECUTION_LATENCY_BUCKETS.to_vec()),
                ),
            )?,
            queue_depth: register(
                &registry,
                "strata_queue_depth",
                IntGauge::new("strata_queue_depth", "Jobs waiting for a worker"),
            )?,
            busy_workers: register(
                &registry,
                "strata_busy_workers",
                IntGauge::new("strata_busy_workers", "Workers running a job"),
            )?,
            workers: register(
                &registry,
                "strata_workers",
                IntGauge::new("strata_workers", "Live workers"),
            )?,
            in_flight_keys: register(
                &registry,
                "strata_in_flight_keys",
                IntGauge::new("strata_in_flight_keys", "Cache keys with a computation running"),
            )?,
            registry,
        })
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub(crate) fn record_submitted(&self) {
        self.submitted_total.inc();
    }

    pub(crate) fn record_response(&self, response: &Response) {
        let kind = response
            .error
            .as_ref()
            .map(|e| e.kind.as_str())
            .unwrap_or(NO_ERROR);
        self.requests_total
            .with_label_values(&[response.status.as_str(), kind])
            .inc();
        if response.cache_hit {
            self.cache_hits_total.inc();
        }
    }

    pub(crate) fn record_coalesced(&self) {
        self.coalesced_total.inc();
    }

    pub(crate) fn record_cache_write_failure(&self) {
        self.cache_write_failures_total.inc();
    }

    pub(crate) fn observe_execution(&self, elapsed: Duration) {
        self.execution_duration_seconds.observe(elapsed.as_secs_f64());
    }

    pub(crate) fn set_pool(&self, stats: &PoolStats) {
        self.queue_depth.set(stats.queued as i64);
        self.busy_workers.set(stats.busy as i64);
        self.workers.set(stats.workers as i64);
    }

    pub(crate) fn set_in_flight(&self, keys: usize) {
        self.in_flight_keys.set(keys as i64);
    }

    fn status_total(&self, status: RequestStatus) -> u64 {
        REQUEST_LABELS
            .iter()
            .filter(|(s, _)| *s == status)
            .flat_map(|(s, kinds)| {
                kinds
                    .iter()
                    .map(move |kind| self.requests_total.with_label_values(&[s.as_str(), *kind]).get())
            })
            .sum()
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            submitted: self.submitted_total.get(),
            completed: self.status_total(RequestStatus::Completed),
            failed: self.status_total(RequestStatus::Failed),
            rejected: self.status_total(RequestStatus::Rejected),
            timed_out: self.status_total(RequestStatus::TimedOut),
            cancelled: self.status_total(RequestStatus::Cancelled),
            cache_hits: self.cache_hits_total.get(),
            coalesced: self.coalesced_total.get(),
            cache_write_failures: self.cache_write_failures_total.get(),
            executions: self.execution_duration_seconds.get_sample_count(),
        }
    }

    /// Render the registry in the Prometheus text exposition format.
    pub fn encode_text(&self) -> StrataResult<String> {
        let encoder = TextEncoder::new();
        let families = self.registry.gather();
        let mut buffer = Vec::new();
        encoder
            .encode(&families, &mut buffer)
            .map_err(|e| ConfigError::invalid("metrics", e, "failed to encode"))?;
        String::from_utf8(buffer)
            .map_err(|e| ConfigError::invalid("metrics", e, "encoded metrics are not UTF-8").into())
    }
}

impl std::fmt::Debug for OrchestratorMetrics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OrchestratorMetrics")
            .field("snapshot", &self.snapshot())
            .finish_non_exhaustive()
    }
}

/// Point-in-time view of [`OrchestratorMetrics`] counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct MetricsSnapshot {
    pub submitted: u64,
    pub completed: u64,
    pub failed: u64,
    pub rejected: u64,
    pub timed_out: u64,
    pub cancelled: u64,
    pub cache_hits: u64,
    pub coalesced: u64,
    pub cache_write_failures: u64,
    /// Computations that reached an executor.
    pub executions: u64,
}

impl MetricsSnapshot {
    /// Requests that reached a terminal status.
    pub fn finished(&self) -> u64 {
        self.completed + self.failed + self.rejected + self.timed_out + self.cancelled
    }
}
