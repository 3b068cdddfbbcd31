//! Orchestrator configuration
//!
//! Loaded from `STRATA_*` environment variables with defaults from
//! [`constants`](crate::constants).

use std::time::Duration;
use strata_core::{ConfigError, StrataResult};

use crate::breaker::CircuitBreakerConfig;
use crate::constants::*;
use crate::pool::PoolConfig;

// ============================================================================
// ORCHESTRATOR CONFIGURATION
// ============================================================================

/// Admission control, pool sizing and deadline settings.
#[derive(Debug, Clone, PartialEq)]
pub struct OrchestratorConfig {
    // ========================================================================
    // Worker pool
    // ========================================================================
    pub min_workers: usize,
    pub max_workers: usize,
    /// Jobs that may wait for a worker before new ones are rejected.
    pub queue_capacity: usize,
    pub scale_tick: Duration,
    pub high_watermark: f64,
    pub low_watermark: f64,
    pub scale_consecutive_samples: u32,
    /// Retry hint returned with `Overloaded`.
    pub overloaded_retry_after: Duration,

    // ========================================================================
    // Rate limiting
    // ========================================================================
    pub rate_limit_per_minute: u32,
    pub rate_limit_burst: u32,
    /// How often idle caller buckets are dropped.
    pub rate_limit_cleanup_interval: Duration,

    // ========================================================================
    // Circuit breaker
    // ========================================================================
    pub breaker: CircuitBreakerConfig,

    // ========================================================================
    // Deadlines
    // ========================================================================
    /// Used when a capability has no duration estimate.
    pub default_deadline: Duration,
    /// Multiplier on `Capability::estimated_duration_ms`.
    pub deadline_safety_factor: f64,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            min_workers: DEFAULT_MIN_WORKERS,
            max_workers: DEFAULT_MAX_WORKERS,
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            scale_tick: Duration::from_millis(DEFAULT_SCALE_TICK_MS),
            high_watermark: DEFAULT_HIGH_WATERMARK,
            low_watermark: DEFAULT_LOW_WATERMARK,
            scale_consecutive_samples: DEFAULT_SCALE_CONSECUTIVE_SAMPLES,
            overloaded_retry_after: Duration::from_millis(DEFAULT_OVERLOADED_RETRY_AFTER_MS),
            rate_limit_per_minute: DEFAULT_RATE_LIMIT_PER_MINUTE,
            rate_limit_burst: DEFAULT_RATE_LIMIT_BURST,
            rate_limit_cleanup_interval: Duration::from_secs(DEFAULT_RATE_LIMIT_CLEANUP_SECS),
            breaker: CircuitBreakerConfig::default(),
            default_deadline: Duration::from_millis(DEFAULT_DEADLINE_MS),
            deadline_safety_factor: DEFAULT_DEADLINE_SAFETY_FACTOR,
        }
    }
}

fn env_or<T: std::str::FromStr>(name: &str, default: T) -> T {
    std::env::var(name)
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(default)
}

impl OrchestratorConfig {
    /// Create OrchestratorConfig from environment variables.
    ///
    /// Environment variables:
    /// - `STRATA_MIN_WORKERS` / `STRATA_MAX_WORKERS`: Pool bounds (default: 2 / 16)
    /// - `STRATA_QUEUE_CAPACITY`: Bounded queue size (default: 256)
    /// - `STRATA_SCALE_TICK_MS`: Scaling sample interval (default: 1000)
    /// - `STRATA_HIGH_WATERMARK` / `STRATA_LOW_WATERMARK`: Load thresholds (default: 0.8 / 0.2)
    /// - `STRATA_SCALE_CONSECUTIVE_SAMPLES`: Samples before resizing (default: 3)
    /// - `STRATA_OVERLOADED_RETRY_AFTER_MS`: Retry hint for `Overloaded` (default: 1000)
    /// - `STRATA_RATE_LIMIT_PER_MINUTE`: Requests per caller per minute (default: 100)
    /// - `STRATA_RATE_LIMIT_BURST`: Burst capacity per caller (default: 100)
    /// - `STRATA_RATE_LIMIT_CLEANUP_SECS`: Idle bucket sweep interval (default: 60)
    /// - `STRATA_DEFAULT_DEADLINE_MS`: Deadline without an estimate (default: 30000)
    /// - `STRATA_DEADLINE_SAFETY_FACTOR`: Multiplier on estimates (default: 3.0)
    /// - `STRATA_CIRCUIT_*`: See [`CircuitBreakerConfig::from_env`]
    pub fn from_env() -> Self {
        Self {
            min_workers: env_or("STRATA_MIN_WORKERS", DEFAULT_MIN_WORKERS),
            max_workers: env_or("STRATA_MAX_WORKERS", DEFAULT_MAX_WORKERS),
            queue_capacity: env_or("STRATA_QUEUE_CAPACITY", DEFAULT_QUEUE_CAPACITY),
            scale_tick: Duration::from_millis(env_or("STRATA_SCALE_TICK_MS", DEFAULT_SCALE_TICK_MS)),
            high_watermark: env_or("STRATA_HIGH_WATERMARK", DEFAULT_HIGH_WATERMARK),
            low_watermark: env_or("STRATA_LOW_WATERMARK", DEFAULT_LOW_WATERMARK),
            scale_consecutive_samples: env_or(
                "STRATA_SCALE_CONSECUTIVE_SAMPLES",
                DEFAULT_SCALE_CONSECUTIVE_SAMPLES,
            ),
            overloaded_retry_after: Duration::from_millis(env_or(
                "STRATA_OVERLOADED_RETRY_AFTER_MS",
                DEFAULT_OVERLOADED_RETRY_AFTER_MS,
            )),
            rate_limit_per_minute: env_or("STRATA_RATE_LIMIT_PER_MINUTE", DEFAULT_RATE_LIMIT_PER_MINUTE),
            rate_limit_burst: env_or("STRATA_RATE_LIMIT_BURST", DEFAULT_RATE_LIMIT_BURST),
            rate_limit_cleanup_interval: Duration::from_secs(env_or(
                "STRATA_RATE_LIMIT_CLEANUP_SECS",
                DEFAULT_RATE_LIMIT_CLEANUP_SECS,
            )),
            breaker: CircuitBreakerConfig::from_env(),
            default_deadline: Duration::from_millis(env_or("STRATA_DEFAULT_DEADLINE_MS", DEFAULT_DEADLINE_MS)),
            deadline_safety_factor: env_or("STRATA_DEADLINE_SAFETY_FACTOR", DEFAULT_DEADLINE_SAFETY_FACTOR),
        }
    }

    pub fn with_workers(mut self, min: usize, max: usize) -> Self {
        self.min_workers = min;
        self.max_workers = max;
        self
    }

    pub fn with_queue_capacity(mut self, capacity: usize) -> Self {
        self.queue_capacity = capacity;
        self
    }

    pub fn with_scaling(mut self, tick: Duration, high: f64, low: f64, samples: u32) -> Self {
        self.scale_tick = tick;
        self.high_watermark = high;
        self.low_watermark = low;
        self.scale_consecutive_samples = samples;
        self
    }

    pub fn with_rate_limit(mut self, per_minute: u32, burst: u32) -> Self {
        self.rate_limit_per_minute = per_minute;
        self.rate_limit_burst = burst;
        self
    }

    pub fn with_rate_limit_cleanup(mut self, every: Duration) -> Self {
        self.rate_limit_cleanup_interval = every;
        self
    }

    pub fn with_breaker(mut self, breaker: CircuitBreakerConfig) -> Self {
        self.breaker = breaker;
        self
    }

    pub fn with_deadline(mut self, default_deadline: Duration, safety_factor: f64) -> Self {
        self.default_deadline = default_deadline;
        self.deadline_safety_factor = safety_factor;
        self
    }

    pub fn pool_config(&self) -> PoolConfig {
        PoolConfig {
            min_workers: self.min_workers,
            max_workers: self.max_workers,
            queue_capacity: self.queue_capacity,
            scale_tick: self.scale_tick,
            high_watermark: self.high_watermark,
            low_watermark: self.low_watermark,
            consecutive_samples: self.scale_consecutive_samples,
        }
    }

    /// Deadline for a capability with the given estimate, measured from dispatch.
    pub fn deadline_for(&self, estimated_duration_ms: u64) -> Duration {
        if estimated_duration_ms == 0 {
            return self.default_deadline;
        }
        let scaled = (estimated_duration_ms as f64 * self.deadline_safety_factor).ceil();
        Duration::from_millis(scaled.max(1.0) as u64)
    }

    /// Validate the configuration.
    pub fn validate(&self) -> StrataResult<()> {
        if self.max_workers == 0 {
            return Err(ConfigError::invalid("max_workers", self.max_workers, "must be positive").into());
        }
        if self.min_workers > self.max_workers {
            return Err(ConfigError::invalid(
                "min_workers",
                self.min_workers,
                "must not exceed max_workers",
            )
            .into());
        }
        if self.queue_capacity == 0 {
            return Err(ConfigError::invalid("queue_capacity", self.queue_capacity, "must be positive").into());
        }
        if self.scale_tick.is_zero() {
            return Err(ConfigError::invalid("scale_tick", "0ms", "must be positive").into());
        }
        if !(self.low_watermark >= 0.0 && self.low_watermark < self.high_watermark) {
            return Err(ConfigError::invalid(
                "low_watermark",
                self.low_watermark,
                "must be non-negative and below high_watermark",
            )
            .into());
        }
        if self.rate_limit_per_minute == 0 {
            return Err(ConfigError::invalid(
                "rate_limit_per_minute",
                self.rate_limit_per_minute,
                "must be positive",
            )
            .into());
        }
        if self.rate_limit_cleanup_interval.is_zero() {
            return Err(ConfigError::invalid("rate_limit_cleanup_interval", "0s", "must be positive").into());
        }
        if self.default_deadline.is_zero() {
            return Err(ConfigError::invalid("default_deadline", "0ms", "must be positive").into());
        }
        if !self.deadline_safety_factor.is_finite() || self.deadline_safety_factor <= 0.0 {
            return Err(ConfigError::invalid(
                "deadline_safety_factor",
                self.deadline_safety_factor,
                "must be a positive number",
            )
            .into());
        }
        self.breaker.validate()
    }
}
