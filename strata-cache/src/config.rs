//! Cache engine configuration.

use std::time::Duration;
use strata_core::{ConfigError, StrataResult};

// ============================================================================
// DEFAULTS
// ============================================================================

/// Default Hot tier capacity (64 MiB).
pub const DEFAULT_HOT_CAPACITY_BYTES: usize = 64 * 1024 * 1024;

/// Default Compressed tier capacity, measured in compressed bytes (256 MiB).
pub const DEFAULT_COMPRESSED_CAPACITY_BYTES: usize = 256 * 1024 * 1024;

/// Default Predictive tier capacity (32 MiB).
pub const DEFAULT_PREDICTIVE_CAPACITY_BYTES: usize = 32 * 1024 * 1024;

/// Default TTL for entries written by `put` (1 hour).
pub const DEFAULT_ENTRY_TTL_SECS: u64 = 3600;

/// Default TTL for preloaded entries (10 minutes).
pub const DEFAULT_PREDICTIVE_TTL_SECS: u64 = 600;

/// Default interval between expiry sweeps.
pub const DEFAULT_SWEEP_INTERVAL_SECS: u64 = 30;

/// Default interval between preload passes.
pub const DEFAULT_PRELOAD_INTERVAL_SECS: u64 = 60;

/// Default number of keys fetched per preload pass.
pub const DEFAULT_PRELOAD_TOP_N: usize = 16;

/// Default minimum preload score for a key to be fetched.
pub const DEFAULT_PRELOAD_MIN_SCORE: f64 = 0.1;

/// Default idle time (seconds) at which an entry's retention halves.
pub const DEFAULT_RECENCY_SCALE_SECS: f64 = 300.0;

pub const DEFAULT_RECENCY_WEIGHT: f64 = 0.4;
pub const DEFAULT_FREQUENCY_WEIGHT: f64 = 0.4;
pub const DEFAULT_COST_WEIGHT: f64 = 0.2;

/// Default window over which accesses count towards frequency (1 hour).
pub const DEFAULT_HISTORY_WINDOW_SECS: u64 = 3600;

/// Default cap on retained access timestamps per key.
pub const DEFAULT_HISTORY_MAX_SAMPLES: usize = 64;

pub const DEFAULT_SHARD_COUNT: usize = 16;

pub const DEFAULT_COMPRESSION_LEVEL: i32 = 3;

/// Default cap on keys with tracked access patterns.
pub const DEFAULT_MAX_TRACKED_PATTERNS: usize = 100_000;

// ============================================================================
// CONFIG
// ============================================================================

/// Configuration for [`CacheEngine`](crate::CacheEngine).
#[derive(Debug, Clone, PartialEq)]
pub struct CacheConfig {
    pub hot_capacity_bytes: usize,
    pub compressed_capacity_bytes: usize,
    pub predictive_capacity_bytes: usize,
    /// TTL applied by `put`. `None` disables expiry.
    pub default_ttl: Option<Duration>,
    pub predictive_ttl: Duration,
    pub sweep_interval: Duration,
    pub preload_interval: Duration,
    pub preload_top_n: usize,
    pub preload_min_score: f64,
    pub recency_scale_secs: f64,
    pub recency_weight: f64,
    pub frequency_weight: f64,
    pub cost_weight: f64,
    pub history_window: Duration,
    pub history_max_samples: usize,
    pub shard_count: usize,
    pub compression_level: i32,
    pub max_tracked_patterns: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            hot_capacity_bytes: DEFAULT_HOT_CAPACITY_BYTES,
            compressed_capacity_bytes: DEFAULT_COMPRESSED_CAPACITY_BYTES,
            predictive_capacity_bytes: DEFAULT_PREDICTIVE_CAPACITY_BYTES,
            default_ttl: Some(Duration::from_secs(DEFAULT_ENTRY_TTL_SECS)),
            predictive_ttl: Duration::from_secs(DEFAULT_PREDICTIVE_TTL_SECS),
            sweep_interval: Duration::from_secs(DEFAULT_SWEEP_INTERVAL_SECS),
            preload_interval: Duration::from_secs(DEFAULT_PRELOAD_INTERVAL_SECS),
            preload_top_n: DEFAULT_PRELOAD_TOP_N,
            preload_min_score: DEFAULT_PRELOAD_MIN_SCORE,
            recency_scale_secs: DEFAULT_RECENCY_SCALE_SECS,
            recency_weight: DEFAULT_RECENCY_WEIGHT,
            frequency_weight: DEFAULT_FREQUENCY_WEIGHT,
            cost_weight: DEFAULT_COST_WEIGHT,
            history_window: Duration::from_secs(DEFAULT_HISTORY_WINDOW_SECS),
            history_max_samples: DEFAULT_HISTORY_MAX_SAMPLES,
            shard_count: DEFAULT_SHARD_COUNT,
            compression_level: DEFAULT_COMPRESSION_LEVEL,
            max_tracked_patterns: DEFAULT_MAX_TRACKED_PATTERNS,
        }
    }
}

fn env_or<T: std::str::FromStr>(name: &str, default: T) -> T {
    std::env::var(name)
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(default)
}

impl CacheConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create CacheConfig from environment variables.
    ///
    /// # Environment Variables
    /// - `STRATA_CACHE_HOT_BYTES`, `STRATA_CACHE_COMPRESSED_BYTES`,
    ///   `STRATA_CACHE_PREDICTIVE_BYTES`: tier capacities
    /// - `STRATA_CACHE_TTL_SECS`: default TTL, `0` disables expiry (default: 3600)
    /// - `STRATA_CACHE_PREDICTIVE_TTL_SECS`: TTL of preloaded entries (default: 600)
    /// - `STRATA_CACHE_SWEEP_INTERVAL_SECS` (default: 30)
    /// - `STRATA_CACHE_PRELOAD_INTERVAL_SECS` (default: 60)
    /// - `STRATA_CACHE_PRELOAD_TOP_N` (default: 16)
    /// - `STRATA_CACHE_PRELOAD_MIN_SCORE` (default: 0.1)
    /// - `STRATA_CACHE_RECENCY_SCALE_SECS` (default: 300)
    /// - `STRATA_CACHE_RECENCY_WEIGHT`, `STRATA_CACHE_FREQUENCY_WEIGHT`,
    ///   `STRATA_CACHE_COST_WEIGHT`: preload score weights
    /// - `STRATA_CACHE_SHARDS` (default: 16)
    /// - `STRATA_CACHE_COMPRESSION_LEVEL` (default: 3)
    pub fn from_env() -> Self {
        let ttl_secs = env_or("STRATA_CACHE_TTL_SECS", DEFAULT_ENTRY_TTL_SECS);

        Self {
            hot_capacity_bytes: env_or("STRATA_CACHE_HOT_BYTES", DEFAULT_HOT_CAPACITY_BYTES),
            compressed_capacity_bytes: env_or(
                "STRATA_CACHE_COMPRESSED_BYTES",
                DEFAULT_COMPRESSED_CAPACITY_BYTES,
            ),
            predictive_capacity_bytes: env_or(
                "STRATA_CACHE_PREDICTIVE_BYTES",
                DEFAULT_PREDICTIVE_CAPACITY_BYTES,
            ),
            default_ttl: (ttl_secs > 0).then(|| Duration::from_secs(ttl_secs)),
            predictive_ttl: Duration::from_secs(env_or(
                "STRATA_CACHE_PREDICTIVE_TTL_SECS",
                DEFAULT_PREDICTIVE_TTL_SECS,
            )),
            sweep_interval: Duration::from_secs(env_or(
                "STRATA_CACHE_SWEEP_INTERVAL_SECS",
                DEFAULT_SWEEP_INTERVAL_SECS,
            )),
            preload_interval: Duration::from_secs(env_or(
                "STRATA_CACHE_PRELOAD_INTERVAL_SECS",
                DEFAULT_PRELOAD_INTERVAL_SECS,
            )),
            preload_top_n: env_or("STRATA_CACHE_PRELOAD_TOP_N", DEFAULT_PRELOAD_TOP_N),
            preload_min_score: env_or("STRATA_CACHE_PRELOAD_MIN_SCORE", DEFAULT_PRELOAD_MIN_SCORE),
            recency_scale_secs: env_or(
                "STRATA_CACHE_RECENCY_SCALE_SECS",
                DEFAULT_RECENCY_SCALE_SECS,
            ),
            recency_weight: env_or("STRATA_CACHE_RECENCY_WEIGHT", DEFAULT_RECENCY_WEIGHT),
            frequency_weight: env_or("STRATA_CACHE_FREQUENCY_WEIGHT", DEFAULT_FREQUENCY_WEIGHT),
            cost_weight: env_or("STRATA_CACHE_COST_WEIGHT", DEFAULT_COST_WEIGHT),
            shard_count: env_or("STRATA_CACHE_SHARDS", DEFAULT_SHARD_COUNT),
            compression_level: env_or("STRATA_CACHE_COMPRESSION_LEVEL", DEFAULT_COMPRESSION_LEVEL),
            ..Self::default()
        }
    }

    /// Set all three tier capacities.
    pub fn with_capacities(mut self, hot: usize, compressed: usize, predictive: usize) -> Self {
        self.hot_capacity_bytes = hot;
        self.compressed_capacity_bytes = compressed;
        self.predictive_capacity_bytes = predictive;
        self
    }

    pub fn with_default_ttl(mut self, ttl: Option<Duration>) -> Self {
        self.default_ttl = ttl;
        self
    }

    pub fn with_predictive_ttl(mut self, ttl: Duration) -> Self {
        self.predictive_ttl = ttl;
        self
    }

    pub fn with_intervals(mut self, sweep: Duration, preload: Duration) -> Self {
        self.sweep_interval = sweep;
        self.preload_interval = preload;
        self
    }

    pub fn with_preload(mut self, top_n: usize, min_score: f64) -> Self {
        self.preload_top_n = top_n;
        self.preload_min_score = min_score;
        self
    }

    pub fn with_shards(mut self, shard_count: usize) -> Self {
        self.shard_count = shard_count;
        self
    }

    /// Capacity of a tier by dense index (see [`Tier::index`](strata_core::Tier::index)).
    pub(crate) fn capacities(&self) -> [usize; 3] {
        [
            self.hot_capacity_bytes,
            self.compressed_capacity_bytes,
            self.predictive_capacity_bytes,
        ]
    }

    pub fn validate(&self) -> StrataResult<()> {
        if self.shard_count == 0 {
            return Err(ConfigError::invalid("shard_count", self.shard_count, "must be at least 1").into());
        }
        if self.hot_capacity_bytes == 0 {
            return Err(ConfigError::invalid(
                "hot_capacity_bytes",
                self.hot_capacity_bytes,
                "must be positive",
            )
            .into());
        }
        if !(self.recency_scale_secs.is_finite() && self.recency_scale_secs > 0.0) {
            return Err(ConfigError::invalid(
                "recency_scale_secs",
                self.recency_scale_secs,
                "must be a positive finite number",
            )
            .into());
        }
        for (field, weight) in [
            ("recency_weight", self.recency_weight),
            ("frequency_weight", self.frequency_weight),
            ("cost_weight", self.cost_weight),
        ] {
            if !(weight.is_finite() && weight >= 0.0) {
                return Err(ConfigError::invalid(field, weight, "must be non-negative").into());
            }
        }
        if self.history_max_samples == 0 {
            return Err(ConfigError::invalid(
                "history_max_samples",
                self.history_max_samples,
                "must be at least 1",
            )
            .into());
        }
        if !(1..=22).contains(&self.compression_level) {
            return Err(ConfigError::invalid(
                "compression_level",
                self.compression_level,
                "zstd level must be within 1..=22",
            )
            .into());
        }
        if self.sweep_interval.is_zero() || self.preload_interval.is_zero() {
            return Err(ConfigError::invalid(
                "sweep_interval/preload_interval",
                format!("{:?}/{:?}", self.sweep_interval, self.preload_interval),
                "intervals must be non-zero",
            )
            .into());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        assert!(CacheConfig::default().validate().is_ok());
    }

    #[test]
    fn test_zero_shards_rejected() {
        let err = CacheConfig::default().with_shards(0).validate().unwrap_err();
        assert!(err.to_string().contains("shard_count"));
    }

    #[test]
    fn test_negative_weight_rejected() {
        let config = CacheConfig {
            cost_weight: -1.0,
            ..CacheConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_builders() {
        let config = CacheConfig::new()
            .with_capacities(10, 20, 30)
            .with_default_ttl(None)
            .with_preload(4, 0.5);
        assert_eq!(config.capacities(), [10, 20, 30]);
        assert_eq!(config.default_ttl, None);
        assert_eq!(config.preload_top_n, 4);
    }
}
