//! Per-agent circuit breakers.
//!
//! A breaker counts execution failures for one agent inside a rolling
//! window. Once the count reaches the threshold it opens and rejects
//! dispatch until its open timeout elapses; then exactly one trial request
//! is admitted. A successful trial closes the breaker, a failed one reopens
//! it with a longer (capped) timeout.

use dashmap::DashMap;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};
use strata_core::{CircuitState, ConfigError, StrataResult};

use crate::constants::{
    DEFAULT_CIRCUIT_BACKOFF_MULTIPLIER, DEFAULT_CIRCUIT_FAILURE_THRESHOLD,
    DEFAULT_CIRCUIT_MAX_OPEN_TIMEOUT_MS, DEFAULT_CIRCUIT_OPEN_TIMEOUT_MS,
    DEFAULT_CIRCUIT_WINDOW_SECS,
};

// ============================================================================
// CONFIG
// ============================================================================

/// Configuration for circuit breaker.
#[derive(Debug, Clone, PartialEq)]
pub struct CircuitBreakerConfig {
    pub failure_threshold: u32,
    /// Failures older than this no longer count toward the threshold.
    pub window: Duration,
    pub open_timeout: Duration,
    pub backoff_multiplier: f64,
    pub max_open_timeout: Duration,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: DEFAULT_CIRCUIT_FAILURE_THRESHOLD,
            window: Duration::from_secs(DEFAULT_CIRCUIT_WINDOW_SECS),
            open_timeout: Duration::from_millis(DEFAULT_CIRCUIT_OPEN_TIMEOUT_MS),
            backoff_multiplier: DEFAULT_CIRCUIT_BACKOFF_MULTIPLIER,
            max_open_timeout: Duration::from_millis(DEFAULT_CIRCUIT_MAX_OPEN_TIMEOUT_MS),
        }
    }
}

impl CircuitBreakerConfig {
    /// Create CircuitBreakerConfig from environment variables.
    ///
    /// # Environment Variables
    /// - `STRATA_CIRCUIT_FAILURE_THRESHOLD`: Failures before opening (default: 5)
    /// - `STRATA_CIRCUIT_WINDOW_SECS`: Rolling failure window (default: 60)
    /// - `STRATA_CIRCUIT_OPEN_TIMEOUT_MS`: How long the circuit stays open (default: 30000)
    /// - `STRATA_CIRCUIT_BACKOFF_MULTIPLIER`: Growth after a failed trial (default: 2.0)
    /// - `STRATA_CIRCUIT_MAX_OPEN_TIMEOUT_MS`: Cap on the open timeout (default: 300000)
    pub fn from_env() -> Self {
        let failure_threshold = std::env::var("STRATA_CIRCUIT_FAILURE_THRESHOLD")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(DEFAULT_CIRCUIT_FAILURE_THRESHOLD);

        let window = Duration::from_secs(
            std::env::var("STRATA_CIRCUIT_WINDOW_SECS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(DEFAULT_CIRCUIT_WINDOW_SECS),
        );

        let open_timeout = Duration::from_millis(
            std::env::var("STRATA_CIRCUIT_OPEN_TIMEOUT_MS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(DEFAULT_CIRCUIT_OPEN_TIMEOUT_MS),
        );

        let backoff_multiplier = std::env::var("STRATA_CIRCUIT_BACKOFF_MULTIPLIER")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(DEFAULT_CIRCUIT_BACKOFF_MULTIPLIER);

        let max_open_timeout = Duration::from_millis(
            std::env::var("STRATA_CIRCUIT_MAX_OPEN_TIMEOUT_MS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(DEFAULT_CIRCUIT_MAX_OPEN_TIMEOUT_MS),
        );

        Self {
            failure_threshold,
            window,
            open_timeout,
            backoff_multiplier,
            max_open_timeout,
        }
    }

    pub fn with_failure_threshold(mut self, threshold: u32) -> Self {
        self.failure_threshold = threshold;
        self
    }

    pub fn with_window(mut self, window: Duration) -> Self {
        self.window = window;
        self
    }

    pub fn with_open_timeout(mut self, open_timeout: Duration) -> Self {
        self.open_timeout = open_timeout;
        self.max_open_timeout = self.max_open_timeout.max(open_timeout);
        self
    }

    pub fn with_backoff(mut self, multiplier: f64, max_open_timeout: Duration) -> Self {
        self.backoff_multiplier = multiplier;
        self.max_open_timeout = max_open_timeout;
        self
    }

    pub fn validate(&self) -> StrataResult<()> {
        if self.failure_threshold == 0 {
            return Err(ConfigError::invalid(
                "circuit_failure_threshold",
                self.failure_threshold,
                "must be positive",
            )
            .into());
        }
        if self.window.is_zero() {
            return Err(ConfigError::invalid("circuit_window", "0s", "must be positive").into());
        }
        if !self.backoff_multiplier.is_finite() || self.backoff_multiplier < 1.0 {
            return Err(ConfigError::invalid(
                "circuit_backoff_multiplier",
                self.backoff_multiplier,
                "must be at least 1.0",
            )
            .into());
        }
        if self.max_open_timeout < self.open_timeout {
            return Err(ConfigError::invalid(
                "circuit_max_open_timeout",
                format!("{:?}", self.max_open_timeout),
                "must not be shorter than circuit_open_timeout",
            )
            .into());
        }
        Ok(())
    }
}

// ============================================================================
// CIRCUIT BREAKER
// ============================================================================

#[derive(Debug)]
struct BreakerInner {
    failures: VecDeque<Instant>,
    opened_at: Option<Instant>,
    /// Current open timeout; grows after failed trials.
    open_timeout: Duration,
    trial_in_flight: bool,
}

/// Circuit breaker guarding dispatch to one agent.
///
/// `state` mirrors the locked state so health reads never contend with
/// dispatch.
pub struct CircuitBreaker {
    agent_id: String,
    state: AtomicU8,
    inner: Mutex<BreakerInner>,
    config: CircuitBreakerConfig,
}

impl CircuitBreaker {
    pub fn new(agent_id: impl Into<String>, config: CircuitBreakerConfig) -> Self {
        Self {
            agent_id: agent_id.into(),
            state: AtomicU8::new(CircuitState::Closed as u8),
            inner: Mutex::new(BreakerInner {
                failures: VecDeque::new(),
                opened_at: None,
                open_timeout: config.open_timeout,
                trial_in_flight: false,
            }),
            config,
        }
    }

    pub fn agent_id(&self) -> &str {
        &self.agent_id
    }

    pub fn state(&self) -> CircuitState {
        CircuitState::from(self.state.load(Ordering::SeqCst))
    }

    /// Failures currently inside the rolling window.
    pub fn failure_count(&self) -> usize {
        let mut inner = self.lock();
        prune(&mut inner.failures, Instant::now(), self.config.window);
        inner.failures.len()
    }

    /// Open timeout that applies the next time the breaker opens or is open now.
    pub fn current_open_timeout(&self) -> Duration {
        self.lock().open_timeout
    }

    fn lock(&self) -> MutexGuard<'_, BreakerInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn set_state(&self, state: CircuitState) {
        let previous = CircuitState::from(self.state.swap(state as u8, Ordering::SeqCst));
        if previous != state {
            tracing::debug!(
                agent_id = %self.agent_id,
                from = %previous,
                to = %state,
                "Circuit breaker transition"
            );
        }
    }

    /// Ask to dispatch one request.
    ///
    /// Returns a permit when the request may proceed, or the time to wait
    /// before retrying. While half-open only one permit is outstanding.
    pub fn try_acquire(self: &Arc<Self>) -> Result<BreakerPermit, Duration> {
        let now = Instant::now();
        let mut inner = self.lock();

        match self.state() {
            CircuitState::Closed => Ok(BreakerPermit::new(Arc::clone(self), false)),
            CircuitState::Open => {
                let opened_at = inner.opened_at.unwrap_or(now);
                let elapsed = now.saturating_duration_since(opened_at);
                if elapsed >= inner.open_timeout {
                    inner.trial_in_flight = true;
                    self.set_state(CircuitState::HalfOpen);
                    tracing::info!(agent_id = %self.agent_id, "Circuit half-open, admitting trial request");
                    Ok(BreakerPermit::new(Arc::clone(self), true))
                } else {
                    Err(inner.open_timeout - elapsed)
                }
            }
            CircuitState::HalfOpen => {
                if inner.trial_in_flight {
                    Err(self.config.open_timeout)
                } else {
                    inner.trial_in_flight = true;
                    Ok(BreakerPermit::new(Arc::clone(self), true))
                }
            }
        }
    }

    fn on_success(&self, trial: bool) {
        let mut inner = self.lock();
        match self.state() {
            CircuitState::Closed => inner.failures.clear(),
            CircuitState::HalfOpen if trial => {
                inner.failures.clear();
                inner.opened_at = None;
                inner.open_timeout = self.config.open_timeout;
                inner.trial_in_flight = false;
                self.set_state(CircuitState::Closed);
                tracing::info!(agent_id = %self.agent_id, "Circuit closed after successful trial");
            }
            // Late results from requests admitted before the circuit opened.
            _ => {}
        }
    }

    fn on_failure(&self, trial: bool) {
        let now = Instant::now();
        let mut inner = self.lock();
        match self.state() {
            CircuitState::Closed => {
                inner.failures.push_back(now);
                prune(&mut inner.failures, now, self.config.window);
                if inner.failures.len() >= self.config.failure_threshold as usize {
                    inner.opened_at = Some(now);
                    inner.open_timeout = self.config.open_timeout;
                    self.set_state(CircuitState::Open);
                    tracing::warn!(
                        agent_id = %self.agent_id,
                        failures = inner.failures.len(),
                        open_timeout_ms = inner.open_timeout.as_millis() as u64,
                        "Circuit opened"
                    );
                }
            }
            CircuitState::HalfOpen if trial => {
                let extended = inner.open_timeout.mul_f64(self.config.backoff_multiplier);
                inner.open_timeout = extended.min(self.config.max_open_timeout);
                inner.opened_at = Some(now);
                inner.trial_in_flight = false;
                self.set_state(CircuitState::Open);
                tracing::warn!(
                    agent_id = %self.agent_id,
                    open_timeout_ms = inner.open_timeout.as_millis() as u64,
                    "Trial request failed, circuit reopened"
                );
            }
            _ => {}
        }
    }

    fn release_trial(&self) {
        let mut inner = self.lock();
        if self.state() == CircuitState::HalfOpen {
            inner.trial_in_flight = false;
        }
    }

    pub fn reset(&self) {
        let mut inner = self.lock();
        inner.failures.clear();
        inner.opened_at = None;
        inner.open_timeout = self.config.open_timeout;
        inner.trial_in_flight = false;
        self.set_state(CircuitState::Closed);
    }
}

impl std::fmt::Debug for CircuitBreaker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CircuitBreaker")
            .field("agent_id", &self.agent_id)
            .field("state", &self.state())
            .field("failure_count", &self.failure_count())
            .finish()
    }
}

fn prune(failures: &mut VecDeque<Instant>, now: Instant, window: Duration) {
    while let Some(&oldest) = failures.front() {
        if now.saturating_duration_since(oldest) > window {
            failures.pop_front();
        } else {
            break;
        }
    }
}

// ============================================================================
// PERMIT
// ============================================================================

/// Admission granted by [`CircuitBreaker::try_acquire`].
///
/// Report the outcome with [`record_success`](Self::record_success) or
/// [`record_failure`](Self::record_failure). Dropping it unrecorded (a
/// cancelled request) counts as neither and frees the half-open trial slot.
#[derive(Debug)]
pub struct BreakerPermit {
    breaker: Arc<CircuitBreaker>,
    trial: bool,
    recorded: bool,
}

impl BreakerPermit {
    fn new(breaker: Arc<CircuitBreaker>, trial: bool) -> Self {
        Self {
            breaker,
            trial,
            recorded: false,
        }
    }

    pub fn is_trial(&self) -> bool {
        self.trial
    }

    pub fn record_success(mut self) {
        self.recorded = true;
        self.breaker.on_success(self.trial);
    }

    pub fn record_failure(mut self) {
        self.recorded = true;
        self.breaker.on_failure(self.trial);
    }
}

impl Drop for BreakerPermit {
    fn drop(&mut self) {
        if !self.recorded && self.trial {
            self.breaker.release_trial();
        }
    }
}

// ============================================================================
// BREAKER REGISTRY
// ============================================================================

/// One breaker per agent, created on first use.
#[derive(Debug)]
pub struct BreakerRegistry {
    config: CircuitBreakerConfig,
    breakers: DashMap<String, Arc<CircuitBreaker>>,
}

impl BreakerRegistry {
    pub fn new(config: CircuitBreakerConfig) -> Self {
        Self {
            config,
            breakers: DashMap::new(),
        }
    }

    pub fn get_or_create(&self, agent_id: &str) -> Arc<CircuitBreaker> {
        if let Some(existing) = self.breakers.get(agent_id) {
            return Arc::clone(existing.value());
        }
        self.breakers
            .entry(agent_id.to_string())
            .or_insert_with(|| Arc::new(CircuitBreaker::new(agent_id, self.config.clone())))
            .clone()
    }

    pub fn get(&self, agent_id: &str) -> Option<Arc<CircuitBreaker>> {
        self.breakers.get(agent_id).map(|b| Arc::clone(b.value()))
    }

    /// All breakers, sorted by agent id.
    pub fn all(&self) -> Vec<Arc<CircuitBreaker>> {
        let mut all: Vec<Arc<CircuitBreaker>> =
            self.breakers.iter().map(|b| Arc::clone(b.value())).collect();
        all.sort_by(|a, b| a.agent_id().cmp(b.agent_id()));
        all
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn breaker(threshold: u32, open_timeout: Duration) -> Arc<CircuitBreaker> {
        let config = CircuitBreakerConfig::default()
            .with_failure_threshold(threshold)
            .with_open_timeout(open_timeout)
            .with_backoff(2.0, Duration::from_millis(200).max(open_timeout));
        Arc::new(CircuitBreaker::new("forecaster", config))
    }

    fn fail(b: &Arc<CircuitBreaker>) {
        if let Ok(permit) = b.try_acquire() {
            permit.record_failure();
        }
    }

    fn succeed(b: &Arc<CircuitBreaker>) {
        if let Ok(permit) = b.try_acquire() {
            permit.record_success();
        }
    }

    #[test]
    fn test_opens_after_threshold() {
        let b = breaker(3, Duration::from_secs(30));
        fail(&b);
        fail(&b);
        assert_eq!(b.state(), CircuitState::Closed);

        fail(&b);
        assert_eq!(b.state(), CircuitState::Open);

        let retry = b.try_acquire().err();
        assert!(retry.is_some_and(|d| d <= Duration::from_secs(30)));
    }

    #[test]
    fn test_success_resets_consecutive_failures() {
        let b = breaker(3, Duration::from_secs(30));
        fail(&b);
        fail(&b);
        succeed(&b);
        fail(&b);
        assert_eq!(b.state(), CircuitState::Closed);
        assert_eq!(b.failure_count(), 1);
    }

    #[test]
    fn test_half_open_admits_exactly_one_trial() {
        let b = breaker(1, Duration::from_millis(20));
        fail(&b);
        assert_eq!(b.state(), CircuitState::Open);

        std::thread::sleep(Duration::from_millis(30));
        let trial = b.try_acquire();
        assert!(trial.as_ref().is_ok_and(BreakerPermit::is_trial));
        assert_eq!(b.state(), CircuitState::HalfOpen);
        assert!(b.try_acquire().is_err());

        if let Ok(permit) = trial {
            permit.record_success();
        }
        assert_eq!(b.state(), CircuitState::Closed);
        assert_eq!(b.failure_count(), 0);
    }

    #[test]
    fn test_failed_trial_extends_open_timeout() {
        let b = breaker(1, Duration::from_millis(20));
        fail(&b);
        std::thread::sleep(Duration::from_millis(30));

        fail(&b);
        assert_eq!(b.state(), CircuitState::Open);
        assert_eq!(b.current_open_timeout(), Duration::from_millis(40));
    }

    #[test]
    fn test_open_timeout_backoff_is_capped() {
        let b = breaker(1, Duration::from_millis(20));
        fail(&b);
        for _ in 0..5 {
            let wait = b.current_open_timeout() + Duration::from_millis(5);
            std::thread::sleep(wait);
            fail(&b);
        }
        assert_eq!(b.current_open_timeout(), Duration::from_millis(200));
    }

    #[test]
    fn test_dropped_trial_frees_slot() {
        let b = breaker(1, Duration::from_millis(10));
        fail(&b);
        std::thread::sleep(Duration::from_millis(20));

        let trial = b.try_acquire();
        assert!(trial.is_ok());
        drop(trial);
        assert_eq!(b.state(), CircuitState::HalfOpen);
        assert!(b.try_acquire().is_ok_and(|p| p.is_trial()));
    }

    #[test]
    fn test_failures_outside_window_expire() {
        let config = CircuitBreakerConfig::default()
            .with_failure_threshold(2)
            .with_window(Duration::from_millis(20));
        let b = Arc::new(CircuitBreaker::new("agent", config));
        fail(&b);
        std::thread::sleep(Duration::from_millis(40));
        fail(&b);
        assert_eq!(b.state(), CircuitState::Closed);
    }

    #[test]
    fn test_registry_reuses_breakers() {
        let registry = BreakerRegistry::new(CircuitBreakerConfig::default());
        let a = registry.get_or_create("alpha");
        let again = registry.get_or_create("alpha");
        assert!(Arc::ptr_eq(&a, &again));
        registry.get_or_create("beta");
        let ids: Vec<String> = registry.all().iter().map(|b| b.agent_id().to_string()).collect();
        assert_eq!(ids, vec!["alpha", "beta"]);
    }

    #[test]
    fn test_config_validation() {
        assert!(CircuitBreakerConfig::default().validate().is_ok());
        assert!(CircuitBreakerConfig::default()
            .with_failure_threshold(0)
            .validate()
            .is_err());
        assert!(CircuitBreakerConfig::default()
            .with_backoff(0.5, Duration::from_secs(60))
            .validate()
            .is_err());
    }
}
