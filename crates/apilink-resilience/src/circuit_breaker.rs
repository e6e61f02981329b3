//! Circuit breaker pattern implementation.
//!
//! The circuit breaker prevents cascading failures by stopping requests
//! to a failing upstream and allowing it time to recover. Failures are
//! counted consecutively; the half-open state admits exactly one trial call.

use apilink_core::GatewayError;
use parking_lot::Mutex;
use serde::Deserialize;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, AtomicU8, Ordering};
use std::time::Duration;
use tracing::{debug, info, warn};

/// Circuit breaker states
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum CircuitState {
    /// Circuit is closed, requests flow normally
    Closed = 0,
    /// Circuit is open, requests are rejected without touching the transport
    Open = 1,
    /// Circuit is half-open, a single trial call is in flight
    HalfOpen = 2,
}

impl From<u8> for CircuitState {
    fn from(value: u8) -> Self {
        match value {
            1 => Self::Open,
            2 => Self::HalfOpen,
            _ => Self::Closed,
        }
    }
}

/// Circuit breaker configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CircuitBreakerConfig {
    /// Consecutive failures before opening the circuit
    pub failure_threshold: u32,
    /// Cooldown before a half-open trial is permitted
    #[serde(with = "humantime_serde")]
    pub reset_timeout: Duration,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            reset_timeout: Duration::from_secs(30),
        }
    }
}

/// Circuit breaker for a single connection.
///
/// State is kept in atomics for lock-free reads; transitions take a small
/// mutex so concurrent completions cannot interleave a transition.
pub struct CircuitBreaker {
    /// Connection identifier (for logs and errors)
    connection_id: String,
    /// Configuration
    config: CircuitBreakerConfig,
    /// Current state
    state: AtomicU8,
    /// Consecutive failure count
    consecutive_failures: AtomicU32,
    /// Timestamp of the last recorded failure (ms since epoch, 0 = never)
    last_failure_at: AtomicU64,
    /// Timestamp after which a half-open trial is permitted (ms since epoch)
    next_attempt_at: AtomicU64,
    /// Whether the single half-open trial slot is taken
    trial_in_flight: AtomicBool,
    /// Lock for state transitions
    transition_lock: Mutex<()>,
}

fn now_millis() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

impl CircuitBreaker {
    /// Create a new circuit breaker
    #[must_use]
    pub fn new(connection_id: impl Into<String>, config: CircuitBreakerConfig) -> Self {
        Self {
            connection_id: connection_id.into(),
            config,
            state: AtomicU8::new(CircuitState::Closed as u8),
            consecutive_failures: AtomicU32::new(0),
            last_failure_at: AtomicU64::new(0),
            next_attempt_at: AtomicU64::new(0),
            trial_in_flight: AtomicBool::new(false),
            transition_lock: Mutex::new(()),
        }
    }

    /// Create with default configuration
    #[must_use]
    pub fn with_defaults(connection_id: impl Into<String>) -> Self {
        Self::new(connection_id, CircuitBreakerConfig::default())
    }

    /// Get the current state
    #[must_use]
    pub fn state(&self) -> CircuitState {
        CircuitState::from(self.state.load(Ordering::Acquire))
    }

    /// Check whether a request may proceed.
    ///
    /// While open, fails fast with `CircuitOpen` until the cooldown elapses;
    /// the first check at or after `next_attempt_at` claims the single
    /// half-open trial slot.
    ///
    /// # Errors
    /// Returns [`GatewayError::CircuitOpen`] while the circuit rejects calls.
    pub fn check(&self) -> Result<(), GatewayError> {
        match self.state() {
            CircuitState::Closed => Ok(()),
            CircuitState::Open => {
                let next_at = self.next_attempt_at.load(Ordering::Acquire);
                let now = now_millis();
                if now >= next_at && self.try_claim_trial() {
                    Ok(())
                } else {
                    Err(GatewayError::circuit_open(
                        &self.connection_id,
                        Some(Duration::from_millis(next_at.saturating_sub(now))),
                    ))
                }
            }
            CircuitState::HalfOpen => {
                if self.try_claim_trial() {
                    Ok(())
                } else {
                    Err(GatewayError::circuit_open(&self.connection_id, None))
                }
            }
        }
    }

    /// Claim the single half-open trial slot, transitioning out of open if
    /// this caller gets there first. Exactly one concurrent caller wins.
    fn try_claim_trial(&self) -> bool {
        let _guard = self.transition_lock.lock();

        match self.state() {
            CircuitState::Open => {
                self.state
                    .store(CircuitState::HalfOpen as u8, Ordering::Release);
                self.trial_in_flight.store(true, Ordering::Release);
                info!(connection = %self.connection_id, "circuit half-open, trial permitted");
                true
            }
            CircuitState::HalfOpen => self
                .trial_in_flight
                .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
                .is_ok(),
            // Closed again while we waited for the lock.
            CircuitState::Closed => true,
        }
    }

    /// Record the collapsed outcome of one logical request.
    ///
    /// A multi-attempt retry sequence must be reported as a single outcome.
    pub fn record_outcome(&self, success: bool) {
        if success {
            self.record_success();
        } else {
            self.record_failure();
        }
    }

    fn record_success(&self) {
        match self.state() {
            CircuitState::Closed => {
                self.consecutive_failures.store(0, Ordering::Relaxed);
            }
            CircuitState::HalfOpen => {
                debug!(connection = %self.connection_id, "half-open trial succeeded");
                self.transition_to_closed();
            }
            CircuitState::Open => {
                // A late completion from before the circuit opened; the
                // cooldown stays authoritative.
            }
        }
    }

    fn record_failure(&self) {
        self.last_failure_at.store(now_millis(), Ordering::Release);
        let failures = self.consecutive_failures.fetch_add(1, Ordering::AcqRel) + 1;

        match self.state() {
            CircuitState::Closed => {
                if failures >= self.config.failure_threshold {
                    debug!(
                        connection = %self.connection_id,
                        failures = failures,
                        threshold = self.config.failure_threshold,
                        "failure threshold reached"
                    );
                    self.transition_to_open();
                }
            }
            CircuitState::HalfOpen => {
                debug!(connection = %self.connection_id, "half-open trial failed, reopening");
                self.transition_to_open();
            }
            CircuitState::Open => {}
        }
    }

    /// Transition to open state
    fn transition_to_open(&self) {
        let _guard = self.transition_lock.lock();

        let prev = self.state.swap(CircuitState::Open as u8, Ordering::Release);
        // Last writer wins on the cooldown deadline.
        self.next_attempt_at
            .store(now_millis() + self.config.reset_timeout.as_millis() as u64, Ordering::Release);
        self.trial_in_flight.store(false, Ordering::Release);

        if prev != CircuitState::Open as u8 {
            warn!(
                connection = %self.connection_id,
                reset_timeout_ms = self.config.reset_timeout.as_millis() as u64,
                "circuit opened"
            );
        }
    }

    /// Transition to closed state
    fn transition_to_closed(&self) {
        let _guard = self.transition_lock.lock();

        self.state.store(CircuitState::Closed as u8, Ordering::Release);
        self.consecutive_failures.store(0, Ordering::Relaxed);
        self.trial_in_flight.store(false, Ordering::Release);
        self.next_attempt_at.store(0, Ordering::Release);

        info!(connection = %self.connection_id, "circuit closed");
    }

    /// Reset the circuit breaker to closed state
    pub fn reset(&self) {
        self.transition_to_closed();
    }

    /// Get current statistics
    #[must_use]
    pub fn stats(&self) -> CircuitBreakerStats {
        CircuitBreakerStats {
            state: self.state(),
            consecutive_failures: self.consecutive_failures.load(Ordering::Relaxed),
            last_failure_at_ms: match self.last_failure_at.load(Ordering::Acquire) {
                0 => None,
                ts => Some(ts),
            },
        }
    }
}

/// Circuit breaker statistics
#[derive(Debug, Clone)]
pub struct CircuitBreakerStats {
    /// Current state
    pub state: CircuitState,
    /// Consecutive failure count
    pub consecutive_failures: u32,
    /// Last failure timestamp (ms since epoch)
    pub last_failure_at_ms: Option<u64>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn breaker(threshold: u32, reset_timeout: Duration) -> CircuitBreaker {
        CircuitBreaker::new(
            "test-connection",
            CircuitBreakerConfig {
                failure_threshold: threshold,
                reset_timeout,
            },
        )
    }

    #[test]
    fn test_initial_state() {
        let cb = CircuitBreaker::with_defaults("test-connection");
        assert_eq!(cb.state(), CircuitState::Closed);
        assert!(cb.check().is_ok());
    }

    #[test]
    fn test_opens_after_consecutive_failures() {
        let cb = breaker(3, Duration::from_secs(30));

        cb.record_outcome(false);
        cb.record_outcome(false);
        assert_eq!(cb.state(), CircuitState::Closed);

        cb.record_outcome(false);
        assert_eq!(cb.state(), CircuitState::Open);

        let err = cb.check().unwrap_err();
        assert!(matches!(err, GatewayError::CircuitOpen { .. }));
        assert!(err.retry_after().is_some());
    }

    #[test]
    fn test_success_resets_consecutive_count() {
        let cb = breaker(3, Duration::from_secs(30));

        cb.record_outcome(false);
        cb.record_outcome(false);
        cb.record_outcome(true);
        cb.record_outcome(false);
        cb.record_outcome(false);

        // Never three in a row, so still closed.
        assert_eq!(cb.state(), CircuitState::Closed);
    }

    #[test]
    fn test_half_open_single_trial() {
        let cb = breaker(2, Duration::from_millis(10));

        cb.record_outcome(false);
        cb.record_outcome(false);
        assert_eq!(cb.state(), CircuitState::Open);

        std::thread::sleep(Duration::from_millis(20));

        // First check claims the trial slot.
        assert!(cb.check().is_ok());
        assert_eq!(cb.state(), CircuitState::HalfOpen);

        // Second concurrent check is rejected: exactly one trial.
        assert!(cb.check().is_err());
    }

    #[test]
    fn test_half_open_success_closes() {
        let cb = breaker(2, Duration::from_millis(10));

        cb.record_outcome(false);
        cb.record_outcome(false);
        std::thread::sleep(Duration::from_millis(20));
        assert!(cb.check().is_ok());

        cb.record_outcome(true);
        assert_eq!(cb.state(), CircuitState::Closed);
        assert_eq!(cb.stats().consecutive_failures, 0);
        assert!(cb.check().is_ok());
    }

    #[test]
    fn test_half_open_failure_reopens() {
        let cb = breaker(2, Duration::from_millis(10));

        cb.record_outcome(false);
        cb.record_outcome(false);
        std::thread::sleep(Duration::from_millis(20));
        assert!(cb.check().is_ok());

        cb.record_outcome(false);
        assert_eq!(cb.state(), CircuitState::Open);
        assert!(cb.check().is_err());
    }

    #[test]
    fn test_reset() {
        let cb = breaker(1, Duration::from_secs(30));

        cb.record_outcome(false);
        assert_eq!(cb.state(), CircuitState::Open);

        cb.reset();
        assert_eq!(cb.state(), CircuitState::Closed);
        assert!(cb.check().is_ok());
    }

    #[test]
    fn test_open_ignores_late_success() {
        let cb = breaker(1, Duration::from_secs(30));

        cb.record_outcome(false);
        assert_eq!(cb.state(), CircuitState::Open);

        // A request that was in flight before the circuit opened completes.
        cb.record_outcome(true);
        assert_eq!(cb.state(), CircuitState::Open);
    }
}
