//! Circuit breaker guarding external extractor calls.
//!
//! One breaker instance protects each extractor service (embedding, tag,
//! proposition). States:
//!
//! - **Closed**: normal operation, calls pass through
//! - **Open**: too many consecutive failures, calls fail immediately
//! - **Half-open**: probing recovery with a limited success quota

use crate::config::BreakerConfig;
use crate::error::{Error, Result};
use parking_lot::Mutex;
use std::future::Future;
use std::time::Instant;
use tracing::{debug, info, warn};

/// Circuit breaker state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    /// Normal operation - calls pass through
    Closed,
    /// Failing fast - calls rejected until the reset timeout elapses
    Open,
    /// Testing recovery - a quota of consecutive successes closes the circuit
    HalfOpen,
}

/// Circuit breaker statistics
#[derive(Debug, Clone, Default)]
pub struct BreakerStats {
    /// Total calls attempted
    pub total_calls: u64,
    /// Successful calls
    pub successful_calls: u64,
    /// Failed calls
    pub failed_calls: u64,
    /// Calls rejected while the circuit was open
    pub rejected_calls: u64,
    /// Current consecutive failure count
    pub consecutive_failures: u32,
    /// Number of times the circuit opened
    pub circuit_opened_count: u32,
}

struct BreakerState {
    state: CircuitState,
    stats: BreakerStats,
    last_failure_time: Option<Instant>,
    half_open_successes: u32,
}

impl Default for BreakerState {
    fn default() -> Self {
        Self {
            state: CircuitState::Closed,
            stats: BreakerStats::default(),
            last_failure_time: None,
            half_open_successes: 0,
        }
    }
}

/// Three-state failure isolator in front of an external service.
///
/// Fails fast while the protected service is down and automatically
/// probes recovery after the reset timeout.
pub struct CircuitBreaker {
    name: String,
    config: BreakerConfig,
    state: Mutex<BreakerState>,
}

impl CircuitBreaker {
    /// Create a named breaker with the given configuration.
    #[must_use]
    pub fn new(name: impl Into<String>, config: BreakerConfig) -> Self {
        let name = name.into();
        info!(
            "Initializing circuit breaker '{}': threshold={}, reset={:?}, half_open_quota={}",
            name,
            config.failure_threshold,
            config.reset_timeout(),
            config.half_open_max_calls
        );
        Self {
            name,
            config,
            state: Mutex::new(BreakerState::default()),
        }
    }

    /// Breaker name, used in logs and `CircuitOpen` errors.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Execute an operation under breaker protection.
    ///
    /// Rejects immediately with [`Error::CircuitOpen`] while the circuit
    /// is open and the reset timeout has not elapsed. Otherwise the
    /// operation runs, its outcome is recorded, and the error (if any)
    /// is returned unchanged.
    pub async fn call<F, Fut, T>(&self, operation: F) -> Result<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        if !self.should_allow_request() {
            let mut state = self.state.lock();
            state.stats.rejected_calls += 1;
            debug!("Circuit breaker '{}' rejecting call - open", self.name);
            return Err(Error::CircuitOpen(self.name.clone()));
        }

        self.state.lock().stats.total_calls += 1;

        let result = operation().await;
        match &result {
            Ok(_) => self.record_success(),
            Err(e) => self.record_failure(e),
        }
        result
    }

    /// Check whether a call should be allowed, transitioning from open
    /// to half-open when the reset timeout has elapsed.
    fn should_allow_request(&self) -> bool {
        let mut state = self.state.lock();
        match state.state {
            CircuitState::Closed | CircuitState::HalfOpen => true,
            CircuitState::Open => {
                let elapsed = state
                    .last_failure_time
                    .map(|t| t.elapsed() >= self.config.reset_timeout());
                if elapsed == Some(true) {
                    info!("Circuit breaker '{}' transitioning to half-open", self.name);
                    state.state = CircuitState::HalfOpen;
                    state.half_open_successes = 0;
                    true
                } else {
                    false
                }
            }
        }
    }

    /// Record a successful call.
    pub fn record_success(&self) {
        let mut state = self.state.lock();
        state.stats.successful_calls += 1;
        match state.state {
            CircuitState::Closed => {
                state.stats.consecutive_failures = 0;
            }
            CircuitState::HalfOpen => {
                state.half_open_successes += 1;
                if state.half_open_successes >= self.config.half_open_max_calls {
                    info!(
                        "Circuit breaker '{}' closing after {} successful recovery calls",
                        self.name, state.half_open_successes
                    );
                    state.state = CircuitState::Closed;
                    state.stats.consecutive_failures = 0;
                    state.half_open_successes = 0;
                    state.last_failure_time = None;
                }
            }
            CircuitState::Open => {
                warn!("Circuit breaker '{}': unexpected success while open", self.name);
            }
        }
    }

    /// Record a failed call. Only recoverable errors count toward the
    /// failure threshold; validation-class errors pass through without
    /// affecting circuit state.
    pub fn record_failure(&self, error: &Error) {
        if !error.is_recoverable() {
            debug!(
                "Circuit breaker '{}': non-recoverable error, not counted: {}",
                self.name, error
            );
            return;
        }

        let mut state = self.state.lock();
        state.stats.failed_calls += 1;
        state.stats.consecutive_failures += 1;
        state.last_failure_time = Some(Instant::now());

        debug!(
            "Circuit breaker '{}' recorded failure {}/{}",
            self.name, state.stats.consecutive_failures, self.config.failure_threshold
        );

        match state.state {
            CircuitState::Closed => {
                if state.stats.consecutive_failures >= self.config.failure_threshold {
                    warn!(
                        "Circuit breaker '{}' opening after {} consecutive failures",
                        self.name, state.stats.consecutive_failures
                    );
                    state.state = CircuitState::Open;
                    state.stats.circuit_opened_count += 1;
                }
            }
            CircuitState::HalfOpen => {
                warn!(
                    "Circuit breaker '{}' reopening after failure in half-open state",
                    self.name
                );
                state.state = CircuitState::Open;
                state.stats.circuit_opened_count += 1;
                state.half_open_successes = 0;
            }
            CircuitState::Open => {}
        }
    }

    /// Current circuit state.
    #[must_use]
    pub fn state(&self) -> CircuitState {
        self.state.lock().state
    }

    /// Current statistics snapshot.
    #[must_use]
    pub fn stats(&self) -> BreakerStats {
        self.state.lock().stats.clone()
    }

    /// Force the breaker back to closed. Intended for tests and manual
    /// intervention.
    pub fn reset(&self) {
        let mut state = self.state.lock();
        info!("Circuit breaker '{}' reset to closed", self.name);
        *state = BreakerState::default();
    }
}
