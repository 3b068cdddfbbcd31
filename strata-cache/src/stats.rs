//! Cache counters and point-in-time statistics.

use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use strata_core::Tier;

/// Live counters, updated with relaxed atomics.
#[derive(Debug, Default)]
pub(crate) struct CacheMetrics {
    pub hits: [AtomicU64; 3],
    pub misses: AtomicU64,
    pub promotions: AtomicU64,
    pub demotions: AtomicU64,
    pub evictions: AtomicU64,
    pub expirations: AtomicU64,
    pub corrupt_drops: AtomicU64,
    pub preloads: AtomicU64,
    pub rejections: AtomicU64,
}

impl CacheMetrics {
    pub fn hit(&self, tier: Tier) {
        self.hits[tier.index()].fetch_add(1, Ordering::Relaxed);
    }

    pub fn incr(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn add(counter: &AtomicU64, n: u64) {
        counter.fetch_add(n, Ordering::Relaxed);
    }
}

/// Usage of one tier.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct TierUsage {
    pub bytes: usize,
    pub entries: usize,
    pub capacity: usize,
}

/// Snapshot of cache statistics.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct CacheStats {
    /// Hits per tier, indexed by [`Tier::index`].
    pub hits: [u64; 3],
    pub misses: u64,
    pub promotions: u64,
    pub demotions: u64,
    pub evictions: u64,
    pub expirations: u64,
    /// Compressed entries dropped because they failed to decompress.
    pub corrupt_drops: u64,
    pub preloads: u64,
    /// `put` calls rejected as too large.
    pub rejections: u64,
    pub tiers: [TierUsage; 3],
}

impl CacheStats {
    pub(crate) fn from_metrics(metrics: &CacheMetrics, tiers: [TierUsage; 3]) -> Self {
        let load = |c: &AtomicU64| c.load(Ordering::Relaxed);
        Self {
            hits: [
                load(&metrics.hits[0]),
                load(&metrics.hits[1]),
                load(&metrics.hits[2]),
            ],
            misses: load(&metrics.misses),
            promotions: load(&metrics.promotions),
            demotions: load(&metrics.demotions),
            evictions: load(&metrics.evictions),
            expirations: load(&metrics.expirations),
            corrupt_drops: load(&metrics.corrupt_drops),
            preloads: load(&metrics.preloads),
            rejections: load(&metrics.rejections),
            tiers,
        }
    }

    pub fn total_hits(&self) -> u64 {
        self.hits.iter().sum()
    }

    /// Calculate the hit rate (0.0 to 1.0).
    pub fn hit_rate(&self) -> f64 {
        let hits = self.total_hits();
        let total = hits + self.misses;
        if total == 0 {
            0.0
        } else {
            hits as f64 / total as f64
        }
    }

    pub fn tier(&self, tier: Tier) -> TierUsage {
        self.tiers[tier.index()]
    }

    pub fn entry_count(&self) -> usize {
        self.tiers.iter().map(|t| t.entries).sum()
    }
}
