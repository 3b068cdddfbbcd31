//! The tiered cache engine.
//!
//! Entries live in key-sharded maps. Each key maps to at most one entry, and
//! the entry records its tier, so a key can never be resident in two tiers.
//! Promotion and demotion rewrite the entry in place under its shard lock.
//!
//! Tier capacity is enforced by byte reservations taken before an entry is
//! inserted (see [`budget`](crate::budget)). Eviction scans shards one at a
//! time and never holds two shard locks at once.

use std::collections::hash_map::DefaultHasher;
use std::collections::HashMap;
use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use bytes::Bytes;
use strata_core::{CacheError, StrataResult, Tier};

use crate::budget::{Reservation, TierBudget};
use crate::compression;
use crate::config::CacheConfig;
use crate::entry::{retention_score, CacheEntry, EntryInfo, Payload};
use crate::loader::PreloadLoader;
use crate::pattern::{rank_candidates, AccessPattern, PreloadCandidate, PreloadWeights};
use crate::stats::{CacheMetrics, CacheStats, TierUsage};

/// Priority given to entries filled by the preloader.
const PREDICTIVE_PRIORITY: u32 = 1;

#[derive(Debug, Default)]
struct Shard {
    entries: HashMap<String, CacheEntry>,
    patterns: HashMap<String, AccessPattern>,
}

/// Eviction candidate found by a scan.
#[derive(Debug)]
struct Victim {
    shard: usize,
    key: String,
    generation: u64,
    score: f64,
    last_accessed_at: Instant,
}

impl Victim {
    /// Lower score first, then oldest access, then key.
    fn precedes(&self, other: &Victim) -> bool {
        self.score
            .total_cmp(&other.score)
            .then_with(|| self.last_accessed_at.cmp(&other.last_accessed_at))
            .then_with(|| self.key.cmp(&other.key))
            .is_lt()
    }
}

/// Outcome of one preload pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PreloadReport {
    /// Keys that passed the score threshold and were attempted.
    pub attempted: usize,
    pub loaded: usize,
    /// Loader had nothing, or the key appeared before insertion.
    pub skipped: usize,
    pub failed: usize,
}

/// Multi-tier key-value cache with cost-aware eviction.
pub struct CacheEngine {
    shards: Box<[Mutex<Shard>]>,
    budgets: [TierBudget; 3],
    metrics: CacheMetrics,
    config: CacheConfig,
    generation: AtomicU64,
}

impl std::fmt::Debug for CacheEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CacheEngine")
            .field("shards", &self.shards.len())
            .field("hot_bytes", &self.budget(Tier::Hot).used())
            .field("compressed_bytes", &self.budget(Tier::Compressed).used())
            .field("predictive_bytes", &self.budget(Tier::Predictive).used())
            .finish()
    }
}

impl CacheEngine {
    /// Create an engine after validating `config`.
    pub fn new(config: CacheConfig) -> StrataResult<Self> {
        config.validate()?;
        let [hot, compressed, predictive] = config.capacities();
        let shards = (0..config.shard_count)
            .map(|_| Mutex::new(Shard::default()))
            .collect::<Vec<_>>()
            .into_boxed_slice();

        Ok(Self {
            shards,
            budgets: [
                TierBudget::new(hot),
                TierBudget::new(compressed),
                TierBudget::new(predictive),
            ],
            metrics: CacheMetrics::default(),
            config,
            generation: AtomicU64::new(0),
        })
    }

    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    // ========================================================================
    // READ PATH
    // ========================================================================

    /// Look up `key` in Hot, Compressed, then Predictive.
    ///
    /// A hit below Hot is promoted when Hot has room, or when room can be made
    /// by evicting Hot entries that are worth less than the hit entry. An entry
    /// that fails to decompress is dropped and reported as a miss.
    pub fn get(&self, key: &str) -> Option<Bytes> {
        let now = Instant::now();
        let idx = self.shard_index(key);

        let (value, generation, score) = {
            let mut shard = self.lock(idx);
            self.record_access(&mut shard, key, now, None);

            let Some(entry) = shard.entries.get_mut(key) else {
                CacheMetrics::incr(&self.metrics.misses);
                return None;
            };

            if entry.is_expired(now) {
                if let Some(expired) = shard.entries.remove(key) {
                    self.release(&expired);
                }
                CacheMetrics::incr(&self.metrics.expirations);
                CacheMetrics::incr(&self.metrics.misses);
                return None;
            }

            entry.touch(now);
            let tier = entry.tier;
            let decoded = match &entry.payload {
                Payload::Raw(bytes) => Ok(bytes.clone()),
                Payload::Compressed(frame) => compression::decompress(key, frame, entry.size),
            };

            let raw = match decoded {
                Ok(raw) => raw,
                Err(e) => {
                    tracing::warn!(key = %key, error = %e, "Dropping corrupt cache entry");
                    if let Some(corrupt) = shard.entries.remove(key) {
                        self.release(&corrupt);
                    }
                    CacheMetrics::incr(&self.metrics.corrupt_drops);
                    CacheMetrics::incr(&self.metrics.misses);
                    return None;
                }
            };

            self.metrics.hit(tier);
            if tier == Tier::Hot {
                return Some(raw);
            }

            if let Some(reservation) = self.budget(Tier::Hot).try_reserve(raw.len()) {
                self.move_to_hot(entry, raw.clone(), reservation);
                return Some(raw);
            }

            let score = entry.retention_score(now, self.config.recency_scale_secs);
            (raw, entry.generation, score)
        };

        self.promote_with_eviction(key, idx, generation, score, value.clone());
        Some(value)
    }

    /// Whether `key` is resident in any tier. No bookkeeping.
    pub fn contains(&self, key: &str) -> bool {
        self.lock(self.shard_index(key)).entries.contains_key(key)
    }

    /// Tier currently holding `key`. No bookkeeping.
    pub fn tier_of(&self, key: &str) -> Option<Tier> {
        self.lock(self.shard_index(key))
            .entries
            .get(key)
            .map(|e| e.tier)
    }

    /// Metadata of `key`'s entry. No bookkeeping.
    pub fn entry_info(&self, key: &str) -> Option<EntryInfo> {
        self.lock(self.shard_index(key))
            .entries
            .get(key)
            .map(|e| e.info(key))
    }

    // ========================================================================
    // WRITE PATH
    // ========================================================================

    /// Insert with the configured default TTL. Returns the tier written to.
    pub fn put(&self, key: &str, value: Bytes, priority: u32, cost: f64) -> Result<Tier, CacheError> {
        self.put_with_ttl(key, value, priority, cost, self.config.default_ttl)
    }

    /// Insert `value`, replacing any existing entry for `key`.
    ///
    /// The new entry goes to Hot if it fits, evicting Hot entries whose
    /// retention score does not exceed its own. Otherwise it is compressed into
    /// the Compressed tier, evicting there as needed. Fails with
    /// [`CacheError::EntryTooLarge`] when neither tier can hold it.
    pub fn put_with_ttl(
        &self,
        key: &str,
        value: Bytes,
        priority: u32,
        cost: f64,
        ttl: Option<Duration>,
    ) -> Result<Tier, CacheError> {
        let now = Instant::now();
        let idx = self.shard_index(key);
        let size = value.len();

        {
            let mut shard = self.lock(idx);
            self.record_access(&mut shard, key, now, Some(cost));
            if let Some(old) = shard.entries.remove(key) {
                self.release(&old);
            }
        }

        let score = retention_score(priority, cost, 0.0, self.config.recency_scale_secs);
        let hot = self.budget(Tier::Hot);
        if size <= hot.capacity() {
            loop {
                if let Some(reservation) = hot.try_reserve(size) {
                    let entry = self.new_entry(Payload::Raw(value), Tier::Hot, priority, cost, size, size, ttl, now);
                    self.insert(idx, key, entry, reservation);
                    return Ok(Tier::Hot);
                }
                if !self.evict_one(Tier::Hot, Some(score)) {
                    break;
                }
            }
        }

        let frame = compression::compress(key, &value, self.config.compression_level).inspect_err(|_| {
            CacheMetrics::incr(&self.metrics.rejections);
        })?;
        let stored = frame.len();
        let Some(reservation) = self.reserve_evicting(Tier::Compressed, stored) else {
            CacheMetrics::incr(&self.metrics.rejections);
            tracing::warn!(key = %key, size, "Cache entry too large for any tier");
            return Err(CacheError::EntryTooLarge {
                key: key.to_string(),
                size,
                capacity: hot.capacity().max(self.budget(Tier::Compressed).capacity()),
            });
        };

        let entry = self.new_entry(Payload::Compressed(frame), Tier::Compressed, priority, cost, size, stored, ttl, now);
        self.insert(idx, key, entry, reservation);
        Ok(Tier::Compressed)
    }

    /// Remove `key` from whichever tier holds it.
    pub fn invalidate(&self, key: &str) -> bool {
        let mut shard = self.lock(self.shard_index(key));
        match shard.entries.remove(key) {
            Some(entry) => {
                self.release(&entry);
                true
            }
            None => false,
        }
    }

    /// Remove every entry whose key starts with `prefix`. Returns the count removed.
    pub fn invalidate_prefix(&self, prefix: &str) -> usize {
        self.remove_where(|key, _| key.starts_with(prefix))
    }

    /// Remove every expired entry. Returns the count removed.
    pub fn sweep_expired(&self) -> usize {
        let now = Instant::now();
        let removed = self.remove_where(|_, entry| entry.is_expired(now));
        CacheMetrics::add(&self.metrics.expirations, removed as u64);
        if removed > 0 {
            tracing::debug!(removed, "Swept expired cache entries");
        }
        removed
    }

    // ========================================================================
    // PRELOAD
    // ========================================================================

    /// Score absent keys with access history and load the best into the
    /// Predictive tier.
    ///
    /// Shard locks are only held while collecting candidates and while
    /// inserting each loaded value, never across a loader call.
    pub async fn preload(&self, loader: &dyn PreloadLoader) -> PreloadReport {
        let ranked = {
            let candidates = self.collect_preload_candidates(Instant::now());
            let weights = PreloadWeights {
                recency: self.config.recency_weight,
                frequency: self.config.frequency_weight,
                cost: self.config.cost_weight,
            };
            rank_candidates(
                candidates,
                weights,
                self.config.preload_min_score,
                self.config.preload_top_n,
            )
        };

        let mut report = PreloadReport {
            attempted: ranked.len(),
            ..Default::default()
        };

        for (key, score) in ranked {
            match loader.load(&key).await {
                Ok(Some(value)) => match self.insert_predictive(&key, value) {
                    Ok(true) => report.loaded += 1,
                    Ok(false) => report.skipped += 1,
                    Err(e) => {
                        tracing::debug!(key = %key, error = %e, "Preloaded value rejected");
                        report.failed += 1;
                    }
                },
                Ok(None) => report.skipped += 1,
                Err(e) => {
                    tracing::warn!(key = %key, score, error = %e, "Preload loader failed");
                    report.failed += 1;
                }
            }
        }

        if report.attempted > 0 {
            tracing::info!(
                attempted = report.attempted,
                loaded = report.loaded,
                skipped = report.skipped,
                failed = report.failed,
                "Cache preload pass completed"
            );
        }
        report
    }

    fn collect_preload_candidates(&self, now: Instant) -> Vec<PreloadCandidate> {
        let window = self.config.history_window;
        let max_samples = self.config.history_max_samples as f64;
        let scale = self.config.recency_scale_secs;

        let mut candidates = Vec::new();
        for idx in 0..self.shards.len() {
            let shard = self.lock(idx);
            for (key, pattern) in &shard.patterns {
                if shard.entries.contains_key(key) {
                    continue;
                }
                let frequency = pattern.frequency(now, window);
                if frequency == 0 {
                    continue;
                }
                let idle = now.saturating_duration_since(pattern.last_access).as_secs_f64();
                candidates.push(PreloadCandidate {
                    key: key.clone(),
                    recency: 1.0 / (1.0 + idle / scale),
                    frequency: (frequency as f64 / max_samples).min(1.0),
                    cost: pattern.last_cost,
                });
            }
        }
        candidates
    }

    /// Insert a preloaded value unless the key became resident meanwhile.
    fn insert_predictive(&self, key: &str, value: Bytes) -> Result<bool, CacheError> {
        let idx = self.shard_index(key);
        let size = value.len();
        let cost = {
            let shard = self.lock(idx);
            if shard.entries.contains_key(key) {
                return Ok(false);
            }
            shard.patterns.get(key).map_or(0.0, |p| p.last_cost)
        };

        let reservation = self
            .reserve_evicting(Tier::Predictive, size)
            .ok_or_else(|| CacheError::EntryTooLarge {
                key: key.to_string(),
                size,
                capacity: self.budget(Tier::Predictive).capacity(),
            })?;

        let now = Instant::now();
        let mut shard = self.lock(idx);
        if shard.entries.contains_key(key) {
            return Ok(false);
        }
        let entry = self.new_entry(
            Payload::Raw(value),
            Tier::Predictive,
            PREDICTIVE_PRIORITY,
            cost,
            size,
            size,
            Some(self.config.predictive_ttl),
            now,
        );
        shard.entries.insert(key.to_string(), entry);
        reservation.commit();
        CacheMetrics::incr(&self.metrics.preloads);
        Ok(true)
    }

    // ========================================================================
    // EVICTION
    // ========================================================================

    /// Reserve `size` bytes in `tier`, evicting its least valuable entries
    /// until the reservation succeeds or the tier has nothing left to evict.
    fn reserve_evicting(&self, tier: Tier, size: usize) -> Option<Reservation<'_>> {
        let budget = self.budget(tier);
        if size > budget.capacity() {
            return None;
        }
        loop {
            if let Some(reservation) = budget.try_reserve(size) {
                return Some(reservation);
            }
            if !self.evict_one(tier, None) {
                return None;
            }
        }
    }

    /// Evict the lowest-scoring entry of `tier`.
    ///
    /// With `max_score`, only an entry scoring at or below it is eligible.
    /// Hot victims are demoted to Compressed when possible; other victims are
    /// deleted. Expired entries are always eligible and always deleted.
    /// Returns `false` when no eligible entry exists.
    fn evict_one(&self, tier: Tier, max_score: Option<f64>) -> bool {
        let now = Instant::now();
        let Some(victim) = self.find_victim(tier, now) else {
            return false;
        };
        if max_score.is_some_and(|limit| victim.score > limit) {
            return false;
        }

        let mut shard = self.lock(victim.shard);
        let current = shard
            .entries
            .get(&victim.key)
            .is_some_and(|e| e.generation == victim.generation && e.tier == tier);
        if !current {
            // Changed since the scan; the caller retries its reservation.
            return true;
        }

        let expired = shard
            .entries
            .get(&victim.key)
            .is_some_and(|e| e.is_expired(now));
        if expired || tier != Tier::Hot {
            if let Some(entry) = shard.entries.remove(&victim.key) {
                self.release(&entry);
            }
            let counter = if expired {
                &self.metrics.expirations
            } else {
                &self.metrics.evictions
            };
            CacheMetrics::incr(counter);
            tracing::debug!(key = %victim.key, tier = %tier, score = victim.score, "Evicted cache entry");
            return true;
        }

        let Some(entry) = shard.entries.get_mut(&victim.key) else {
            return true;
        };
        let Payload::Raw(raw) = &entry.payload else {
            return true;
        };
        let frame = match compression::compress(&victim.key, raw, self.config.compression_level) {
            Ok(frame) => frame,
            Err(e) => {
                tracing::warn!(key = %victim.key, error = %e, "Demotion failed, deleting entry");
                if let Some(entry) = shard.entries.remove(&victim.key) {
                    self.release(&entry);
                }
                CacheMetrics::incr(&self.metrics.evictions);
                return true;
            }
        };

        if let Some(reservation) = self.budget(Tier::Compressed).try_reserve(frame.len()) {
            self.move_to_compressed(entry, frame, reservation);
            tracing::debug!(key = %victim.key, score = victim.score, "Demoted cache entry to compressed tier");
            return true;
        }

        // Compressed tier is full: take the entry out, make room without
        // holding this shard's lock, then put it back if the key is still free.
        let Some(mut entry) = shard.entries.remove(&victim.key) else {
            return true;
        };
        self.release(&entry);
        drop(shard);

        let stored = frame.len();
        let Some(reservation) = self.reserve_evicting(Tier::Compressed, stored) else {
            CacheMetrics::incr(&self.metrics.evictions);
            return true;
        };
        entry.payload = Payload::Compressed(frame);
        entry.tier = Tier::Compressed;
        entry.stored_size = stored;

        let mut shard = self.lock(victim.shard);
        if shard.entries.contains_key(&victim.key) {
            CacheMetrics::incr(&self.metrics.evictions);
            return true;
        }
        shard.entries.insert(victim.key.clone(), entry);
        reservation.commit();
        CacheMetrics::incr(&self.metrics.demotions);
        true
    }

    fn find_victim(&self, tier: Tier, now: Instant) -> Option<Victim> {
        let scale = self.config.recency_scale_secs;
        let mut best: Option<Victim> = None;
        for idx in 0..self.shards.len() {
            let shard = self.lock(idx);
            for (key, entry) in shard.entries.iter().filter(|(_, e)| e.tier == tier) {
                let candidate = Victim {
                    shard: idx,
                    key: key.clone(),
                    generation: entry.generation,
                    score: entry.retention_score(now, scale),
                    last_accessed_at: entry.last_accessed_at,
                };
                if best.as_ref().map_or(true, |b| candidate.precedes(b)) {
                    best = Some(candidate);
                }
            }
        }
        best
    }

    /// Promote after making room in Hot, when the entry outranks what it displaces.
    fn promote_with_eviction(&self, key: &str, idx: usize, generation: u64, score: f64, raw: Bytes) {
        let hot = self.budget(Tier::Hot);
        if raw.len() > hot.capacity() {
            return;
        }
        let reservation = loop {
            if let Some(reservation) = hot.try_reserve(raw.len()) {
                break reservation;
            }
            if !self.evict_one(Tier::Hot, Some(score)) {
                return;
            }
        };

        let mut shard = self.lock(idx);
        if let Some(entry) = shard.entries.get_mut(key) {
            if entry.generation == generation && entry.tier != Tier::Hot {
                self.move_to_hot(entry, raw, reservation);
            }
        }
    }

    // ========================================================================
    // HELPERS
    // ========================================================================

    fn move_to_hot(&self, entry: &mut CacheEntry, raw: Bytes, reservation: Reservation<'_>) {
        let (old_tier, old_stored) = (entry.tier, entry.stored_size);
        entry.stored_size = raw.len();
        entry.payload = Payload::Raw(raw);
        entry.tier = Tier::Hot;
        reservation.commit();
        self.budget(old_tier).release(old_stored);
        CacheMetrics::incr(&self.metrics.promotions);
    }

    fn move_to_compressed(&self, entry: &mut CacheEntry, frame: Bytes, reservation: Reservation<'_>) {
        let old_stored = entry.stored_size;
        entry.stored_size = frame.len();
        entry.payload = Payload::Compressed(frame);
        entry.tier = Tier::Compressed;
        reservation.commit();
        self.budget(Tier::Hot).release(old_stored);
        CacheMetrics::incr(&self.metrics.demotions);
    }

    #[allow(clippy::too_many_arguments)]
    fn new_entry(
        &self,
        payload: Payload,
        tier: Tier,
        priority: u32,
        cost: f64,
        size: usize,
        stored_size: usize,
        ttl: Option<Duration>,
        now: Instant,
    ) -> CacheEntry {
        CacheEntry {
            payload,
            tier,
            cost,
            priority,
            size,
            stored_size,
            created_at: now,
            last_accessed_at: now,
            access_count: 0,
            ttl,
            generation: self.generation.fetch_add(1, Ordering::Relaxed),
        }
    }

    /// Insert under the shard lock. A concurrent writer's entry for the same
    /// key is replaced (last writer wins).
    fn insert(&self, idx: usize, key: &str, entry: CacheEntry, reservation: Reservation<'_>) {
        let mut shard = self.lock(idx);
        if let Some(old) = shard.entries.insert(key.to_string(), entry) {
            self.release(&old);
        }
        reservation.commit();
    }

    fn remove_where(&self, mut predicate: impl FnMut(&str, &CacheEntry) -> bool) -> usize {
        let mut removed = 0;
        for idx in 0..self.shards.len() {
            let mut shard = self.lock(idx);
            shard.entries.retain(|key, entry| {
                if predicate(key.as_str(), &*entry) {
                    self.release(&*entry);
                    removed += 1;
                    false
                } else {
                    true
                }
            });
        }
        removed
    }

    fn record_access(&self, shard: &mut Shard, key: &str, now: Instant, cost: Option<f64>) {
        let per_shard_cap = (self.config.max_tracked_patterns / self.shards.len()).max(1);
        if !shard.patterns.contains_key(key) && shard.patterns.len() >= per_shard_cap {
            let stalest = shard
                .patterns
                .iter()
                .min_by_key(|(_, p)| p.last_access)
                .map(|(k, _)| k.clone());
            if let Some(stalest) = stalest {
                shard.patterns.remove(&stalest);
            }
        }

        let pattern = shard
            .patterns
            .entry(key.to_string())
            .or_insert_with(|| AccessPattern::new(now));
        pattern.record(now, self.config.history_window, self.config.history_max_samples);
        if let Some(cost) = cost {
            pattern.last_cost = cost;
        }
    }

    fn release(&self, entry: &CacheEntry) {
        self.budget(entry.tier).release(entry.stored_size);
    }

    fn budget(&self, tier: Tier) -> &TierBudget {
        &self.budgets[tier.index()]
    }

    fn shard_index(&self, key: &str) -> usize {
        let mut hasher = DefaultHasher::new();
        key.hash(&mut hasher);
        (hasher.finish() % self.shards.len() as u64) as usize
    }

    fn lock(&self, idx: usize) -> MutexGuard<'_, Shard> {
        self.shards[idx].lock().unwrap_or_else(PoisonError::into_inner)
    }

    // ========================================================================
    // STATS
    // ========================================================================

    pub fn stats(&self) -> CacheStats {
        let usage = |tier: Tier| {
            let budget = self.budget(tier);
            TierUsage {
                bytes: budget.used(),
                entries: budget.entries(),
                capacity: budget.capacity(),
            }
        };
        CacheStats::from_metrics(
            &self.metrics,
            [usage(Tier::Hot), usage(Tier::Compressed), usage(Tier::Predictive)],
        )
    }

    /// Number of resident entries across all tiers.
    pub fn len(&self) -> usize {
        self.budgets.iter().map(TierBudget::entries).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Recompute per-tier bytes from the entries themselves.
    #[cfg(test)]
    fn recount(&self) -> [usize; 3] {
        let mut bytes = [0usize; 3];
        for idx in 0..self.shards.len() {
            for entry in self.lock(idx).entries.values() {
                bytes[entry.tier.index()] += entry.stored_size;
            }
        }
        bytes
    }
}

// ============================================================================
// TESTS
// ============================================================================
