//! Per-key access history feeding the preload score.

use std::collections::VecDeque;
use std::time::{Duration, Instant};

/// Rolling access history for one key. Survives eviction of the entry so
/// absent keys can still be scored for preloading.
#[derive(Debug, Clone)]
pub(crate) struct AccessPattern {
    history: VecDeque<Instant>,
    pub last_access: Instant,
    /// Most recent recompute cost observed on `put`.
    pub last_cost: f64,
}

impl AccessPattern {
    pub fn new(now: Instant) -> Self {
        Self {
            history: VecDeque::new(),
            last_access: now,
            last_cost: 0.0,
        }
    }

    /// Record an access and trim samples outside the window.
    pub fn record(&mut self, now: Instant, window: Duration, max_samples: usize) {
        self.history.push_back(now);
        self.last_access = now;
        self.trim(now, window, max_samples);
    }

    fn trim(&mut self, now: Instant, window: Duration, max_samples: usize) {
        while self
            .history
            .front()
            .is_some_and(|t| now.saturating_duration_since(*t) > window)
        {
            self.history.pop_front();
        }
        while self.history.len() > max_samples {
            self.history.pop_front();
        }
    }

    /// Accesses within `window` of `now`.
    pub fn frequency(&self, now: Instant, window: Duration) -> usize {
        self.history
            .iter()
            .filter(|t| now.saturating_duration_since(**t) <= window)
            .count()
    }
}

/// Weights for `recency * w_r + frequency * w_f + cost * w_c`.
#[derive(Debug, Clone, Copy)]
pub(crate) struct PreloadWeights {
    pub recency: f64,
    pub frequency: f64,
    pub cost: f64,
}

/// Candidate key collected during a preload pass.
#[derive(Debug, Clone)]
pub(crate) struct PreloadCandidate {
    pub key: String,
    pub recency: f64,
    pub frequency: f64,
    pub cost: f64,
}

/// Score candidates and return the top `n` with score at least `min_score`,
/// highest first, ties by key.
///
/// Factors are normalised to `[0, 1]`: recency as `1 / (1 + idle / scale)`,
/// frequency as a fraction of the sample cap, cost relative to the most
/// expensive candidate.
pub(crate) fn rank_candidates(
    mut candidates: Vec<PreloadCandidate>,
    weights: PreloadWeights,
    min_score: f64,
    n: usize,
) -> Vec<(String, f64)> {
    let max_cost = candidates.iter().map(|c| c.cost).fold(0.0_f64, f64::max);
    let mut scored: Vec<(String, f64)> = candidates
        .drain(..)
        .map(|c| {
            let cost_factor = if max_cost > 0.0 { c.cost / max_cost } else { 0.0 };
            let score = weights.recency * c.recency
                + weights.frequency * c.frequency
                + weights.cost * cost_factor;
            (c.key, score)
        })
        .filter(|(_, score)| *score >= min_score)
        .collect();

    scored.sort_by(|a, b| b.1.total_cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
    scored.truncate(n);
    scored
}

#[cfg(test)]
mod tests {
    use super::*;

    const WEIGHTS: PreloadWeights = PreloadWeights {
        recency: 0.4,
        frequency: 0.4,
        cost: 0.2,
    };

    fn candidate(key: &str, recency: f64, frequency: f64, cost: f64) -> PreloadCandidate {
        PreloadCandidate {
            key: key.to_string(),
            recency,
            frequency,
            cost,
        }
    }

    #[test]
    fn test_history_trims_to_max_samples() {
        let now = Instant::now();
        let mut pattern = AccessPattern::new(now);
        for _ in 0..10 {
            pattern.record(now, Duration::from_secs(60), 4);
        }
        assert_eq!(pattern.frequency(now, Duration::from_secs(60)), 4);
    }

    #[test]
    fn test_rank_orders_by_score_then_key() {
        let ranked = rank_candidates(
            vec![
                candidate("b", 1.0, 1.0, 10.0),
                candidate("a", 1.0, 1.0, 10.0),
                candidate("c", 0.1, 0.0, 0.0),
            ],
            WEIGHTS,
            0.0,
            10,
        );
        let keys: Vec<&str> = ranked.iter().map(|(k, _)| k.as_str()).collect();
        assert_eq!(keys, vec!["a", "b", "c"]);
    }

    #[test]
    fn test_rank_applies_min_score_and_top_n() {
        let ranked = rank_candidates(
            vec![
                candidate("hot", 1.0, 1.0, 5.0),
                candidate("warm", 0.5, 0.5, 5.0),
                candidate("cold", 0.0, 0.0, 0.0),
            ],
            WEIGHTS,
            0.1,
            1,
        );
        assert_eq!(ranked.len(), 1);
        assert_eq!(ranked[0].0, "hot");
    }
}
