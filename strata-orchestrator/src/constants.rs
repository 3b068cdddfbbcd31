//! Constants for the Strata orchestrator
//!
//! Defaults for every `OrchestratorConfig` and `CircuitBreakerConfig` field.
//! Each can be overridden through the matching `STRATA_*` environment variable.

// ============================================================================
// WORKER POOL
// ============================================================================

/// Workers kept alive even when idle
pub const DEFAULT_MIN_WORKERS: usize = 2;

/// Upper bound the scaling controller may grow the pool to
pub const DEFAULT_MAX_WORKERS: usize = 16;

/// Bounded work queue capacity; a full queue rejects with `Overloaded`
pub const DEFAULT_QUEUE_CAPACITY: usize = 256;

/// Retry hint attached to `Overloaded` rejections (milliseconds)
pub const DEFAULT_OVERLOADED_RETRY_AFTER_MS: u64 = 1000;

// ============================================================================
// SCALING CONTROLLER
// ============================================================================

/// Interval between load samples (milliseconds)
pub const DEFAULT_SCALE_TICK_MS: u64 = 1000;

/// Load above which a sample counts toward growing the pool
pub const DEFAULT_HIGH_WATERMARK: f64 = 0.8;

/// Load below which a sample counts toward shrinking the pool
pub const DEFAULT_LOW_WATERMARK: f64 = 0.2;

/// Consecutive samples past a watermark before the pool is resized
pub const DEFAULT_SCALE_CONSECUTIVE_SAMPLES: u32 = 3;

// ============================================================================
// RATE LIMITING
// ============================================================================

/// Requests per minute allowed for each caller
pub const DEFAULT_RATE_LIMIT_PER_MINUTE: u32 = 100;

/// Burst size for each caller (a full minute's allowance)
pub const DEFAULT_RATE_LIMIT_BURST: u32 = 100;

/// Interval between sweeps that drop fully refilled caller buckets (seconds)
pub const DEFAULT_RATE_LIMIT_CLEANUP_SECS: u64 = 60;

// ============================================================================
// CIRCUIT BREAKER
// ============================================================================

/// Failures within the window that open the circuit
pub const DEFAULT_CIRCUIT_FAILURE_THRESHOLD: u32 = 5;

/// Rolling window for counting failures (seconds)
pub const DEFAULT_CIRCUIT_WINDOW_SECS: u64 = 60;

/// How long the circuit stays open before a trial (milliseconds)
pub const DEFAULT_CIRCUIT_OPEN_TIMEOUT_MS: u64 = 30_000;

/// Open timeout multiplier applied after a failed trial
pub const DEFAULT_CIRCUIT_BACKOFF_MULTIPLIER: f64 = 2.0;

/// Cap on the backed-off open timeout (milliseconds)
pub const DEFAULT_CIRCUIT_MAX_OPEN_TIMEOUT_MS: u64 = 300_000;

// ============================================================================
// DEADLINES
// ============================================================================

/// Deadline for capabilities without a duration estimate (milliseconds)
pub const DEFAULT_DEADLINE_MS: u64 = 30_000;

/// Multiplier applied to a capability's estimated duration
pub const DEFAULT_DEADLINE_SAFETY_FACTOR: f64 = 3.0;

