//! Circuit breaker guarding the engine's run loop against cascading failures.
//!
//! Three states: `Closed` (normal), `Open` (reject new runs), `HalfOpen`
//! (allow a bounded number of trial runs). The `Open -> HalfOpen` transition
//! is lazy: it only happens when the state is observed, not on a timer.

use serde::{Deserialize, Serialize};
use std::sync::RwLock;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// Observable circuit state. `Open` carries no data of its own; the
/// transition to `HalfOpen` is computed on read from `last_failure`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

struct Inner {
    state: CircuitState,
    failure_count: u32,
    last_failure: Option<Instant>,
    half_open_calls: u32,
}

/// Guards the engine's run loop: once `failure_threshold` consecutive
/// failures accumulate, the circuit opens and `can_execute` returns `false`
/// until `recovery_timeout` has elapsed, at which point a bounded number of
/// trial calls (`half_open_max_calls`) are allowed through to probe recovery.
pub struct CircuitBreaker {
    failure_threshold: u32,
    recovery_timeout: Duration,
    half_open_max_calls: u32,
    inner: RwLock<Inner>,
}

impl CircuitBreaker {
    pub fn new(failure_threshold: u32, recovery_timeout: Duration, half_open_max_calls: u32) -> Self {
        Self {
            failure_threshold,
            recovery_timeout,
            half_open_max_calls,
            inner: RwLock::new(Inner {
                state: CircuitState::Closed,
                failure_count: 0,
                last_failure: None,
                half_open_calls: 0,
            }),
        }
    }

    /// Current state, lazily transitioning `Open -> HalfOpen` once the
    /// recovery timeout has elapsed since the last recorded failure.
    pub fn state(&self) -> CircuitState {
        let mut inner = self.inner.write().expect("circuit breaker lock poisoned");
        if inner.state == CircuitState::Open {
            if let Some(last_failure) = inner.last_failure {
                if last_failure.elapsed() >= self.recovery_timeout {
                    debug!("circuit breaker recovery timeout elapsed, moving to half-open");
                    inner.state = CircuitState::HalfOpen;
                    inner.half_open_calls = 0;
                }
            }
        }
        inner.state
    }

    /// Whether a new run may start right now.
    pub fn can_execute(&self) -> bool {
        match self.state() {
            CircuitState::Closed => true,
            CircuitState::HalfOpen => {
                let inner = self.inner.read().expect("circuit breaker lock poisoned");
                inner.half_open_calls < self.half_open_max_calls
            }
            CircuitState::Open => false,
        }
    }

    pub fn record_success(&self) {
        let state = self.state();
        let mut inner = self.inner.write().expect("circuit breaker lock poisoned");
        match state {
            CircuitState::HalfOpen => {
                inner.half_open_calls += 1;
                if inner.half_open_calls >= self.half_open_max_calls {
                    debug!("circuit breaker closing after successful half-open trial calls");
                    inner.state = CircuitState::Closed;
                    inner.failure_count = 0;
                }
            }
            CircuitState::Closed => {
                inner.failure_count = 0;
            }
            CircuitState::Open => {}
        }
    }

    pub fn record_failure(&self) {
        let state = self.state();
        let mut inner = self.inner.write().expect("circuit breaker lock poisoned");
        inner.failure_count += 1;
        inner.last_failure = Some(Instant::now());

        if state == CircuitState::HalfOpen {
            warn!("circuit breaker reopening after failure during half-open trial");
            inner.state = CircuitState::Open;
        } else if inner.failure_count >= self.failure_threshold {
            warn!(
                failure_count = inner.failure_count,
                threshold = self.failure_threshold,
                "circuit breaker opening after reaching failure threshold"
            );
            inner.state = CircuitState::Open;
        }
    }

    pub fn reset(&self) {
        let mut inner = self.inner.write().expect("circuit breaker lock poisoned");
        debug!("circuit breaker reset");
        inner.state = CircuitState::Closed;
        inner.failure_count = 0;
        inner.last_failure = None;
        inner.half_open_calls = 0;
    }
}

impl Default for CircuitBreaker {
    fn default() -> Self {
        Self::new(5, Duration::from_secs(30), 3)
    }
}

/// Serializable snapshot of a circuit breaker's configuration, used by
/// `EngineConfig` and by the execution logger.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CircuitBreakerConfig {
    pub failure_threshold: u32,
    #[serde(with = "humantime_serde")]
    pub recovery_timeout: Duration,
    pub half_open_max_calls: u32,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            recovery_timeout: Duration::from_secs(30),
            half_open_max_calls: 3,
        }
    }
}

impl From<&CircuitBreakerConfig> for CircuitBreaker {
    fn from(config: &CircuitBreakerConfig) -> Self {
        CircuitBreaker::new(
            config.failure_threshold,
            config.recovery_timeout,
            config.half_open_max_calls,
        )
    }
}
