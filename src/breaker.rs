//! Per-destination circuit breaker.
//!
//! Consecutive-failure model (no sliding-window error-rate variant), keyed
//! per destination name via [`BreakerRegistry`].

use std::collections::HashMap;
use std::sync::RwLock;
use std::time::{Duration, Instant};

use crate::config::CircuitBreakerConfig;

/// The three breaker states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BreakerState {
    /// Requests flow normally.
    Closed,
    /// Requests are pre-empted; the engine treats the call as transient.
    Open,
    /// A single probe is in flight to test recovery.
    HalfOpen,
}

/// A single destination's breaker. All mutation is serialized under one
/// lock; reads may take a shared lock.
pub struct CircuitBreaker {
    config: CircuitBreakerConfig,
    inner: RwLock<Inner>,
}

struct Inner {
    state: BreakerState,
    consecutive_failures: u32,
    consecutive_successes: u32,
    opened_at: Option<Instant>,
}

impl CircuitBreaker {
    /// Construct a new breaker in `Closed` state.
    pub fn new(config: CircuitBreakerConfig) -> Self {
        Self {
            config,
            inner: RwLock::new(Inner {
                state: BreakerState::Closed,
                consecutive_failures: 0,
                consecutive_successes: 0,
                opened_at: None,
            }),
        }
    }

    /// Current state, with the `Open -> HalfOpen` cooldown transition
    /// evaluated as a side effect of the read: `Open` becomes `HalfOpen`
    /// once `now - opened_at >= CooldownTimeout`.
    pub fn state(&self) -> BreakerState {
        self.maybe_transition_to_half_open();
        self.inner.read().unwrap_or_else(|e| e.into_inner()).state
    }

    /// `can_attempt()` is called before every wire send. In
    /// `Open` it returns `false` and does not call the publisher.
    pub fn can_attempt(&self) -> bool {
        !matches!(self.state(), BreakerState::Open)
    }

    fn maybe_transition_to_half_open(&self) {
        let should_transition = {
            let inner = self.inner.read().unwrap_or_else(|e| e.into_inner());
            inner.state == BreakerState::Open
                && inner
                    .opened_at
                    .is_some_and(|t| t.elapsed() >= self.config.cooldown_timeout)
        };
        if should_transition {
            let mut inner = self.inner.write().unwrap_or_else(|e| e.into_inner());
            if inner.state == BreakerState::Open
                && inner
                    .opened_at
                    .is_some_and(|t| t.elapsed() >= self.config.cooldown_timeout)
            {
                inner.state = BreakerState::HalfOpen;
                inner.consecutive_successes = 0;
            }
        }
    }

    /// Record a successful publisher call.
    pub fn record_success(&self) {
        self.maybe_transition_to_half_open();
        let mut inner = self.inner.write().unwrap_or_else(|e| e.into_inner());
        match inner.state {
            BreakerState::Closed => {
                inner.consecutive_failures = 0;
            }
            BreakerState::HalfOpen => {
                inner.consecutive_successes += 1;
                if inner.consecutive_successes >= self.config.success_threshold {
                    inner.state = BreakerState::Closed;
                    inner.consecutive_failures = 0;
                    inner.consecutive_successes = 0;
                    inner.opened_at = None;
                }
            }
            BreakerState::Open => {}
        }
    }

    /// Record a failed publisher call. Only call this when the publisher was
    /// actually invoked — pre-empted (breaker-open) calls must not count
    /// toward the breaker's own tally.
    pub fn record_failure(&self) {
        self.maybe_transition_to_half_open();
        let mut inner = self.inner.write().unwrap_or_else(|e| e.into_inner());
        match inner.state {
            BreakerState::Closed => {
                inner.consecutive_failures += 1;
                if inner.consecutive_failures >= self.config.failure_threshold {
                    inner.state = BreakerState::Open;
                    inner.opened_at = Some(Instant::now());
                }
            }
            BreakerState::HalfOpen => {
                inner.state = BreakerState::Open;
                inner.opened_at = Some(Instant::now());
                inner.consecutive_successes = 0;
            }
            BreakerState::Open => {}
        }
    }

    /// Snapshot counters for `Stats()`.
    pub fn snapshot(&self) -> BreakerSnapshot {
        let inner = self.inner.read().unwrap_or_else(|e| e.into_inner());
        BreakerSnapshot {
            state: inner.state,
            consecutive_failures: inner.consecutive_failures,
            consecutive_successes: inner.consecutive_successes,
        }
    }
}

/// A read-only copy of a breaker's counters, safe to hand out of the lock.
#[derive(Debug, Clone, Copy)]
pub struct BreakerSnapshot {
    pub state: BreakerState,
    pub consecutive_failures: u32,
    pub consecutive_successes: u32,
}

/// Lazily-populated map of destination name -> breaker, guarded by a
/// reader/writer lock.
pub struct BreakerRegistry {
    config: CircuitBreakerConfig,
    breakers: RwLock<HashMap<String, std::sync::Arc<CircuitBreaker>>>,
}

impl BreakerRegistry {
    /// Construct an empty registry sharing one threshold config across all
    /// destinations.
    pub fn new(config: CircuitBreakerConfig) -> Self {
        Self {
            config,
            breakers: RwLock::new(HashMap::new()),
        }
    }

    /// Fetch the breaker for `destination`, creating it lazily under a write
    /// lock on first use.
    pub fn get_or_create(&self, destination: &str) -> std::sync::Arc<CircuitBreaker> {
        if let Some(b) = self.breakers.read().unwrap_or_else(|e| e.into_inner()).get(destination) {
            return b.clone();
        }
        let mut writer = self.breakers.write().unwrap_or_else(|e| e.into_inner());
        writer
            .entry(destination.to_string())
            .or_insert_with(|| std::sync::Arc::new(CircuitBreaker::new(self.config)))
            .clone()
    }

    /// Snapshot every known breaker by destination name, for `Stats()`.
    pub fn snapshot_all(&self) -> HashMap<String, BreakerSnapshot> {
        self.breakers
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .map(|(name, breaker)| (name.clone(), breaker.snapshot()))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cfg() -> CircuitBreakerConfig {
        CircuitBreakerConfig {
            failure_threshold: 5,
            success_threshold: 2,
            cooldown_timeout: Duration::from_millis(30),
        }
    }

    #[test]
    fn opens_after_threshold_consecutive_failures() {
        let b = CircuitBreaker::new(cfg());
        for _ in 0..4 {
            b.record_failure();
            assert!(b.can_attempt());
        }
        b.record_failure();
        assert!(!b.can_attempt());
        assert_eq!(b.state(), BreakerState::Open);
    }

    #[test]
    fn success_resets_failure_count_in_closed() {
        let b = CircuitBreaker::new(cfg());
        for _ in 0..4 {
            b.record_failure();
        }
        b.record_success();
        for _ in 0..4 {
            b.record_failure();
        }
        // Still closed: the success reset the streak.
        assert!(b.can_attempt());
    }

    #[test]
    fn half_open_closes_after_success_threshold() {
        let b = CircuitBreaker::new(cfg());
        for _ in 0..5 {
            b.record_failure();
        }
        assert_eq!(b.state(), BreakerState::Open);
        std::thread::sleep(Duration::from_millis(40));
        assert_eq!(b.state(), BreakerState::HalfOpen);
        b.record_success();
        assert_eq!(b.state(), BreakerState::HalfOpen);
        b.record_success();
        assert_eq!(b.state(), BreakerState::Closed);
    }

    #[test]
    fn half_open_failure_reopens() {
        let b = CircuitBreaker::new(cfg());
        for _ in 0..5 {
            b.record_failure();
        }
        std::thread::sleep(Duration::from_millis(40));
        assert_eq!(b.state(), BreakerState::HalfOpen);
        b.record_failure();
        assert_eq!(b.state(), BreakerState::Open);
    }

    #[test]
    fn registry_creates_independent_breakers_per_destination() {
        let registry = BreakerRegistry::new(cfg());
        let a = registry.get_or_create("a");
        for _ in 0..5 {
            a.record_failure();
        }
        let b = registry.get_or_create("b");
        assert!(!a.can_attempt());
        assert!(b.can_attempt());
    }

    #[test]
    fn registry_get_or_create_is_stable() {
        let registry = BreakerRegistry::new(cfg());
        let a1 = registry.get_or_create("x");
        a1.record_failure();
        let a2 = registry.get_or_create("x");
        assert_eq!(a2.snapshot().consecutive_failures, 1);
    }
}
