//! Per-caller token bucket rate limiting.
//!
//! Buckets live in a governor keyed limiter. Callers whose bucket has fully
//! refilled are indistinguishable from new callers, so
//! [`rate_limit_cleanup_task`] drops them periodically and the key set stays
//! bounded by the callers active within one refill period.

use governor::clock::{Clock, DefaultClock};
use governor::{DefaultKeyedRateLimiter, Quota, RateLimiter};
use std::num::NonZeroU32;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::{interval, MissedTickBehavior};

/// One token bucket per caller id, created on first request.
pub struct CallerRateLimiter {
    per_minute: u32,
    burst: u32,
    limiter: DefaultKeyedRateLimiter<String>,
}

impl CallerRateLimiter {
    /// Zero rates fall back to one request per minute.
    pub fn new(per_minute: u32, burst: u32) -> Self {
        let quota = Quota::per_minute(NonZeroU32::new(per_minute).unwrap_or(NonZeroU32::MIN))
            .allow_burst(NonZeroU32::new(burst).unwrap_or(NonZeroU32::MIN));
        Self {
            per_minute,
            burst,
            limiter: RateLimiter::dashmap(quota),
        }
    }

    /// Take one token for `caller_id`, or return how long until one is available.
    pub fn check(&self, caller_id: &str) -> Result<(), Duration> {
        match self.limiter.check_key(&caller_id.to_string()) {
            Ok(()) => Ok(()),
            Err(not_until) => {
                let wait = not_until.wait_time_from(DefaultClock::default().now());
                // Minimum 1 millisecond
                Err(wait.max(Duration::from_millis(1)))
            }
        }
    }

    /// Number of callers with a live bucket.
    pub fn tracked_callers(&self) -> usize {
        self.limiter.len()
    }

    /// Drop buckets that have fully refilled. Returns how many were dropped.
    pub fn retain_recent(&self) -> usize {
        let before = self.limiter.len();
        self.limiter.retain_recent();
        self.limiter.shrink_to_fit();
        before.saturating_sub(self.limiter.len())
    }
}

impl std::fmt::Debug for CallerRateLimiter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CallerRateLimiter")
            .field("per_minute", &self.per_minute)
            .field("burst", &self.burst)
            .field("tracked_callers", &self.limiter.len())
            .finish()
    }
}

/// Prune idle caller buckets every `every` until `shutdown_rx` flips to `true`.
pub async fn rate_limit_cleanup_task(
    limiter: Arc<CallerRateLimiter>,
    every: Duration,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    let mut tick = interval(every);
    tick.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            changed = shutdown_rx.changed() => {
                if changed.is_err() || *shutdown_rx.borrow() {
                    break;
                }
            }

            _ = tick.tick() => {
                let dropped = limiter.retain_recent();
                if dropped > 0 {
                    tracing::debug!(
                        dropped,
                        tracked = limiter.tracked_callers(),
                        "Pruned idle rate limit buckets"
                    );
                }
            }
        }
    }
}
