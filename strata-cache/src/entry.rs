//! Cache entries and the retention score used for eviction.

use bytes::Bytes;
use serde::Serialize;
use std::time::{Duration, Instant};
use strata_core::Tier;

/// Stored form of a value.
#[derive(Debug, Clone)]
pub(crate) enum Payload {
    Raw(Bytes),
    /// zstd frame; decompresses to `CacheEntry::size` bytes.
    Compressed(Bytes),
}

/// A single cached value. Owned by its shard; callers only see [`EntryInfo`].
#[derive(Debug, Clone)]
pub(crate) struct CacheEntry {
    pub payload: Payload,
    pub tier: Tier,
    /// Estimated recompute cost (milliseconds of execution).
    pub cost: f64,
    pub priority: u32,
    /// Uncompressed value length.
    pub size: usize,
    /// Bytes charged against the tier budget.
    pub stored_size: usize,
    pub created_at: Instant,
    pub last_accessed_at: Instant,
    pub access_count: u64,
    pub ttl: Option<Duration>,
    /// Unique per insertion; lets a victim be re-identified after its shard lock was dropped.
    pub generation: u64,
}

impl CacheEntry {
    pub fn is_expired(&self, now: Instant) -> bool {
        self.ttl
            .is_some_and(|ttl| now.saturating_duration_since(self.created_at) >= ttl)
    }

    pub fn touch(&mut self, now: Instant) {
        self.last_accessed_at = now;
        self.access_count += 1;
    }

    /// Higher means more worth keeping. Expired entries score negative infinity.
    pub fn retention_score(&self, now: Instant, recency_scale_secs: f64) -> f64 {
        if self.is_expired(now) {
            return f64::NEG_INFINITY;
        }
        let idle = now.saturating_duration_since(self.last_accessed_at).as_secs_f64();
        retention_score(self.priority, self.cost, idle, recency_scale_secs)
    }

    pub fn info(&self, key: &str) -> EntryInfo {
        EntryInfo {
            key: key.to_string(),
            tier: self.tier,
            size: self.size,
            stored_size: self.stored_size,
            cost: self.cost,
            priority: self.priority,
            access_count: self.access_count,
        }
    }
}

/// `priority * cost / (1 + idle / scale)`.
///
/// Cheap, low-priority, stale entries score lowest and are evicted first.
pub fn retention_score(priority: u32, cost: f64, idle_secs: f64, recency_scale_secs: f64) -> f64 {
    let cost = if cost.is_finite() { cost.max(0.0) } else { 0.0 };
    let decay = 1.0 + idle_secs.max(0.0) / recency_scale_secs;
    f64::from(priority) * cost / decay
}

/// Read-only view of an entry's metadata.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EntryInfo {
    pub key: String,
    pub tier: Tier,
    pub size: usize,
    pub stored_size: usize,
    pub cost: f64,
    pub priority: u32,
    pub access_count: u64,
}
