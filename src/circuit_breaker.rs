//! Circuit breaker for failing dependencies.
//!
//! - `Closed`: calls pass through; consecutive failures are counted and a
//!   success resets the count
//! - `Open`: calls are rejected without running; after `recovery_timeout`
//!   the next call becomes a trial
//! - `HalfOpen`: exactly one trial call in flight; success closes the
//!   circuit, failure reopens it
//!
//! The breaker does not look at error kinds. Any `Err` from the protected
//! operation counts as a failure.

use crate::error::{ApiError, ApiResult};
use crate::logging::{log_debug, log_info, log_warn};

use std::fmt;
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

/// Monotonic time source, swappable in tests.
#[cfg_attr(test, mockall::automock)]
pub trait Clock: Send + Sync + 'static {
    fn now(&self) -> Instant;
}

/// Real system clock
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }
}

/// Circuit breaker states
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

/// Circuit breaker thresholds
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(default)]
pub struct CircuitBreakerConfig {
    /// Consecutive failures that open the circuit
    pub failure_threshold: u32,
    /// How long the circuit stays open before allowing a trial call
    pub recovery_timeout: Duration,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            recovery_timeout: Duration::from_millis(60_000),
        }
    }
}

#[derive(Debug)]
struct BreakerState {
    state: CircuitState,
    failure_count: u32,
    last_failure_time: Option<Instant>,
    trial_in_flight: bool,
}

impl BreakerState {
    fn closed() -> Self {
        Self {
            state: CircuitState::Closed,
            failure_count: 0,
            last_failure_time: None,
            trial_in_flight: false,
        }
    }
}

/// Guards a dependency by failing fast after repeated failures.
///
/// Share it behind an `Arc` between callers of the same dependency. State
/// updates are serialized by an internal mutex that is never held across
/// an await.
pub struct CircuitBreaker {
    config: CircuitBreakerConfig,
    clock: Arc<dyn Clock>,
    inner: Mutex<BreakerState>,
}

impl fmt::Debug for CircuitBreaker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CircuitBreaker")
            .field("config", &self.config)
            .field("state", &self.state())
            .field("failure_count", &self.failure_count())
            .finish()
    }
}

impl Default for CircuitBreaker {
    fn default() -> Self {
        Self::new(CircuitBreakerConfig::default())
    }
}

impl CircuitBreaker {
    pub fn new(config: CircuitBreakerConfig) -> Self {
        Self::with_clock(config, Arc::new(SystemClock))
    }

    /// A threshold of zero is treated as one.
    pub fn with_clock(mut config: CircuitBreakerConfig, clock: Arc<dyn Clock>) -> Self {
        config.failure_threshold = config.failure_threshold.max(1);
        Self {
            config,
            clock,
            inner: Mutex::new(BreakerState::closed()),
        }
    }

    pub fn config(&self) -> &CircuitBreakerConfig {
        &self.config
    }

    pub fn state(&self) -> CircuitState {
        self.lock().state
    }

    pub fn failure_count(&self) -> u32 {
        self.lock().failure_count
    }

    /// Force the circuit closed and forget past failures.
    pub fn reset(&self) {
        *self.lock() = BreakerState::closed();
        log_info!(circuit_breaker = "reset", "Circuit breaker manually reset");
    }

    /// Run `operation` if the circuit allows it.
    ///
    /// Returns a circuit-open [`ApiError`] without calling `operation` while
    /// the circuit is open or a half-open trial is already running.
    pub async fn execute<T, F, Fut>(&self, operation: F) -> ApiResult<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = ApiResult<T>>,
    {
        let mut permit = self.acquire()?;
        let result = operation().await;
        match &result {
            Ok(_) => permit.settle(true),
            Err(_) => permit.settle(false),
        }
        result
    }

    fn lock(&self) -> MutexGuard<'_, BreakerState> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn acquire(&self) -> ApiResult<Permit<'_>> {
        let mut inner = self.lock();
        let state = inner.state;
        match state {
            CircuitState::Closed => Ok(Permit::new(self, false)),
            CircuitState::Open => {
                let elapsed = inner
                    .last_failure_time
                    .map(|at| self.clock.now().saturating_duration_since(at));

                match elapsed {
                    Some(elapsed) if elapsed <= self.config.recovery_timeout => {
                        Err(ApiError::circuit_open(self.config.recovery_timeout - elapsed))
                    }
                    _ => {
                        log_debug!(
                            circuit_breaker = "transitioning_to_half_open",
                            recovery_timeout_ms = self.config.recovery_timeout.as_millis(),
                            "Circuit breaker attempting recovery"
                        );
                        inner.state = CircuitState::HalfOpen;
                        inner.trial_in_flight = true;
                        Ok(Permit::new(self, true))
                    }
                }
            }
            CircuitState::HalfOpen => {
                if inner.trial_in_flight {
                    Err(ApiError::circuit_open(Duration::ZERO))
                } else {
                    inner.trial_in_flight = true;
                    Ok(Permit::new(self, true))
                }
            }
        }
    }

    fn record_success(&self) {
        let mut inner = self.lock();
        let state = inner.state;
        match state {
            CircuitState::HalfOpen => {
                log_info!(
                    circuit_breaker = "recovered",
                    "Circuit breaker recovered, returning to closed state"
                );
                *inner = BreakerState::closed();
            }
            CircuitState::Closed => inner.failure_count = 0,
            // A call admitted before the circuit opened; the open window stands.
            CircuitState::Open => {}
        }
    }

    fn record_failure(&self) {
        let now = self.clock.now();
        let mut inner = self.lock();
        inner.failure_count = inner.failure_count.saturating_add(1);
        inner.last_failure_time = Some(now);

        let state = inner.state;
        match state {
            CircuitState::Closed if inner.failure_count >= self.config.failure_threshold => {
                log_warn!(
                    circuit_breaker = "opened",
                    failure_count = inner.failure_count,
                    failure_threshold = self.config.failure_threshold,
                    recovery_timeout_ms = self.config.recovery_timeout.as_millis(),
                    "Circuit breaker opened due to repeated failures"
                );
                inner.state = CircuitState::Open;
            }
            CircuitState::HalfOpen => {
                log_warn!(
                    circuit_breaker = "reopened",
                    failure_count = inner.failure_count,
                    "Circuit breaker trial call failed, reopening"
                );
                inner.state = CircuitState::Open;
                inner.trial_in_flight = false;
            }
            _ => {}
        }
    }
}

/// Admission to run one call. A trial permit dropped without an outcome
/// (the caller's future was cancelled) frees the half-open slot.
struct Permit<'a> {
    breaker: &'a CircuitBreaker,
    trial: bool,
    settled: bool,
}

impl<'a> Permit<'a> {
    fn new(breaker: &'a CircuitBreaker, trial: bool) -> Self {
        Self {
            breaker,
            trial,
            settled: false,
        }
    }

    fn settle(&mut self, success: bool) {
        self.settled = true;
        if success {
            self.breaker.record_success();
        } else {
            self.breaker.record_failure();
        }
    }
}

impl Drop for Permit<'_> {
    fn drop(&mut self) {
        if self.trial && !self.settled {
            let mut inner = self.breaker.lock();
            if inner.state == CircuitState::HalfOpen {
                inner.trial_in_flight = false;
            }
        }
    }
}
