//! Retry policy with exponential backoff.
//!
//! Wraps a single authenticated transport call with bounded retry. The delay
//! before attempt `n` (n >= 2) is `min(base_delay * backoff_factor^(n-2),
//! max_delay)`; backoff is awaited, never blocking other in-flight requests.

use apilink_core::GatewayError;
use serde::Deserialize;
use std::future::Future;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Default retryable status codes: request timeout, throttling, and the
/// transient 5xx family.
pub const DEFAULT_RETRY_STATUS: [u16; 6] = [408, 429, 500, 502, 503, 504];

/// Retry configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RetryConfig {
    /// Whether retries are enabled at all
    pub enabled: bool,
    /// Maximum number of attempts, including the first
    pub max_attempts: u32,
    /// Base delay before the second attempt
    #[serde(with = "humantime_serde")]
    pub base_delay: Duration,
    /// Upper bound on any single delay
    #[serde(with = "humantime_serde")]
    pub max_delay: Duration,
    /// Backoff multiplier
    pub backoff_factor: f64,
    /// HTTP status codes considered retryable
    pub status_codes: Vec<u16>,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_attempts: 3,
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(10),
            backoff_factor: 2.0,
            status_codes: DEFAULT_RETRY_STATUS.to_vec(),
        }
    }
}

/// Retry policy scoped to one connection.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    connection_id: String,
    config: RetryConfig,
}

impl RetryPolicy {
    /// Create a new retry policy
    #[must_use]
    pub fn new(connection_id: impl Into<String>, config: RetryConfig) -> Self {
        Self {
            connection_id: connection_id.into(),
            config,
        }
    }

    /// Create with default configuration
    #[must_use]
    pub fn with_defaults(connection_id: impl Into<String>) -> Self {
        Self::new(connection_id, RetryConfig::default())
    }

    /// Get the configuration
    #[must_use]
    pub fn config(&self) -> &RetryConfig {
        &self.config
    }

    /// Effective attempt budget (1 when retries are disabled).
    #[must_use]
    pub fn max_attempts(&self) -> u32 {
        if self.config.enabled {
            self.config.max_attempts.max(1)
        } else {
            1
        }
    }

    /// Whether a status code is in the retryable set.
    #[must_use]
    pub fn is_retryable_status(&self, status: u16) -> bool {
        self.config.status_codes.contains(&status)
    }

    /// Check whether an error is retryable under this policy.
    ///
    /// Connection-level transport failures always are; upstream errors only
    /// when their status is in the configured set.
    #[must_use]
    pub fn is_retryable(&self, error: &GatewayError) -> bool {
        match error {
            GatewayError::Transport { kind, .. } => kind.is_retryable(),
            GatewayError::Upstream { status, .. } => self.is_retryable_status(*status),
            _ => false,
        }
    }

    /// Delay before the given 1-based attempt. Zero for the first attempt.
    #[must_use]
    pub fn delay_before_attempt(&self, attempt: u32) -> Duration {
        if attempt < 2 {
            return Duration::ZERO;
        }
        let base = self.config.base_delay.as_millis() as f64;
        let delay = base * self.config.backoff_factor.powi(attempt as i32 - 2);
        let delay = delay.min(self.config.max_delay.as_millis() as f64);
        Duration::from_millis(delay as u64)
    }

    /// Execute an operation with retry and backoff.
    ///
    /// The closure receives the 1-based attempt number. Cancellation stops
    /// further attempts (including a pending backoff sleep) immediately.
    ///
    /// # Errors
    /// Returns the first non-retryable error as-is; when the attempt budget
    /// is exhausted, the last error is wrapped in
    /// [`GatewayError::RetryExhausted`] with the attempt count.
    pub async fn execute<F, Fut, T>(
        &self,
        cancel: &CancellationToken,
        operation: F,
    ) -> Result<T, GatewayError>
    where
        F: Fn(u32) -> Fut,
        Fut: Future<Output = Result<T, GatewayError>>,
    {
        let max_attempts = self.max_attempts();

        for attempt in 1..=max_attempts {
            if attempt > 1 {
                let delay = self.delay_before_attempt(attempt);
                tokio::select! {
                    () = tokio::time::sleep(delay) => {}
                    () = cancel.cancelled() => {
                        return Err(GatewayError::cancelled(&self.connection_id));
                    }
                }
            }

            if cancel.is_cancelled() {
                return Err(GatewayError::cancelled(&self.connection_id));
            }

            match operation(attempt).await {
                Ok(result) => {
                    if attempt > 1 {
                        debug!(
                            connection = %self.connection_id,
                            attempt = attempt,
                            "retry succeeded"
                        );
                    }
                    return Ok(result);
                }
                Err(error) => {
                    if matches!(error, GatewayError::Cancelled { .. }) {
                        return Err(error);
                    }
                    if !self.is_retryable(&error) {
                        return Err(error);
                    }
                    if attempt == max_attempts {
                        if max_attempts > 1 {
                            return Err(GatewayError::retry_exhausted(max_attempts, error));
                        }
                        return Err(error);
                    }

                    warn!(
                        connection = %self.connection_id,
                        attempt = attempt,
                        max_attempts = max_attempts,
                        next_delay_ms = self.delay_before_attempt(attempt + 1).as_millis() as u64,
                        error = %error,
                        "attempt failed, retrying"
                    );
                }
            }
        }

        Err(GatewayError::internal("retry loop exited without outcome"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use apilink_core::TransportFailure;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    fn policy(config: RetryConfig) -> RetryPolicy {
        RetryPolicy::new("test-connection", config)
    }

    fn fast_config(max_attempts: u32) -> RetryConfig {
        RetryConfig {
            max_attempts,
            base_delay: Duration::from_millis(1),
            ..Default::default()
        }
    }

    #[test]
    fn test_delay_calculation() {
        let policy = policy(RetryConfig {
            base_delay: Duration::from_millis(100),
            backoff_factor: 2.0,
            ..Default::default()
        });

        assert_eq!(policy.delay_before_attempt(1), Duration::ZERO);
        assert_eq!(policy.delay_before_attempt(2), Duration::from_millis(100));
        assert_eq!(policy.delay_before_attempt(3), Duration::from_millis(200));
        assert_eq!(policy.delay_before_attempt(4), Duration::from_millis(400));
    }

    #[test]
    fn test_delay_capped_at_max() {
        let policy = policy(RetryConfig {
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_millis(300),
            backoff_factor: 2.0,
            ..Default::default()
        });

        assert_eq!(policy.delay_before_attempt(3), Duration::from_millis(200));
        assert_eq!(policy.delay_before_attempt(4), Duration::from_millis(300)); // Capped
        assert_eq!(policy.delay_before_attempt(9), Duration::from_millis(300)); // Still capped
    }

    #[test]
    fn test_delays_non_decreasing() {
        let policy = policy(RetryConfig::default());
        let mut last = Duration::ZERO;
        for attempt in 1..10 {
            let delay = policy.delay_before_attempt(attempt);
            assert!(delay >= last);
            assert!(delay <= policy.config().max_delay);
            last = delay;
        }
    }

    #[test]
    fn test_is_retryable() {
        let policy = policy(RetryConfig::default());

        assert!(policy.is_retryable(&GatewayError::transport(
            "c",
            TransportFailure::Timeout,
            "deadline"
        )));
        assert!(policy.is_retryable(&GatewayError::upstream("c", 503, "unavailable", true)));
        assert!(policy.is_retryable(&GatewayError::upstream("c", 408, "timeout", true)));
        assert!(!policy.is_retryable(&GatewayError::upstream("c", 404, "not found", false)));
        assert!(!policy.is_retryable(&GatewayError::auth("c", "denied")));
        assert!(!policy.is_retryable(&GatewayError::cancelled("c")));
    }

    #[test]
    fn test_custom_status_set() {
        let policy = policy(RetryConfig {
            status_codes: vec![503],
            ..Default::default()
        });

        assert!(policy.is_retryable_status(503));
        assert!(!policy.is_retryable_status(429));
    }

    #[test]
    fn test_disabled_means_single_attempt() {
        let policy = policy(RetryConfig {
            enabled: false,
            max_attempts: 5,
            ..Default::default()
        });
        assert_eq!(policy.max_attempts(), 1);
    }

    #[tokio::test]
    async fn test_success_on_first_attempt() {
        let policy = policy(fast_config(3));
        let calls = Arc::new(AtomicU32::new(0));
        let calls_clone = Arc::clone(&calls);

        let result: Result<u32, GatewayError> = policy
            .execute(&CancellationToken::new(), |_attempt| {
                let calls = Arc::clone(&calls_clone);
                async move {
                    calls.fetch_add(1, Ordering::Relaxed);
                    Ok(42)
                }
            })
            .await;

        assert_eq!(result.unwrap(), 42);
        assert_eq!(calls.load(Ordering::Relaxed), 1);
    }

    #[tokio::test]
    async fn test_succeeds_on_third_attempt() {
        let policy = policy(fast_config(3));
        let calls = Arc::new(AtomicU32::new(0));
        let calls_clone = Arc::clone(&calls);

        let result: Result<u32, GatewayError> = policy
            .execute(&CancellationToken::new(), |_attempt| {
                let calls = Arc::clone(&calls_clone);
                async move {
                    let n = calls.fetch_add(1, Ordering::Relaxed);
                    if n < 2 {
                        Err(GatewayError::upstream("c", 503, "unavailable", true))
                    } else {
                        Ok(42)
                    }
                }
            })
            .await;

        assert_eq!(result.unwrap(), 42);
        assert_eq!(calls.load(Ordering::Relaxed), 3);
    }

    #[tokio::test]
    async fn test_exhaustion_annotates_attempt_count() {
        let policy = policy(fast_config(2));
        let calls = Arc::new(AtomicU32::new(0));
        let calls_clone = Arc::clone(&calls);

        let result: Result<u32, GatewayError> = policy
            .execute(&CancellationToken::new(), |_attempt| {
                let calls = Arc::clone(&calls_clone);
                async move {
                    calls.fetch_add(1, Ordering::Relaxed);
                    Err(GatewayError::upstream("c", 502, "bad gateway", true))
                }
            })
            .await;

        let err = result.unwrap_err();
        assert_eq!(calls.load(Ordering::Relaxed), 2);
        match err {
            GatewayError::RetryExhausted { attempts, last_error } => {
                assert_eq!(attempts, 2);
                assert_eq!(last_error.status_code(), Some(502));
            }
            other => panic!("expected RetryExhausted, got {other}"),
        }
    }

    #[tokio::test]
    async fn test_non_retryable_surfaces_immediately() {
        let policy = policy(fast_config(3));
        let calls = Arc::new(AtomicU32::new(0));
        let calls_clone = Arc::clone(&calls);

        let result: Result<u32, GatewayError> = policy
            .execute(&CancellationToken::new(), |_attempt| {
                let calls = Arc::clone(&calls_clone);
                async move {
                    calls.fetch_add(1, Ordering::Relaxed);
                    Err(GatewayError::upstream("c", 400, "bad request", false))
                }
            })
            .await;

        assert!(matches!(result, Err(GatewayError::Upstream { status: 400, .. })));
        assert_eq!(calls.load(Ordering::Relaxed), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancellation_stops_pending_retry() {
        let policy = policy(RetryConfig {
            max_attempts: 3,
            base_delay: Duration::from_secs(60),
            ..Default::default()
        });
        let cancel = CancellationToken::new();
        let calls = Arc::new(AtomicU32::new(0));

        let task = {
            let policy = policy.clone();
            let cancel = cancel.clone();
            let calls = Arc::clone(&calls);
            tokio::spawn(async move {
                policy
                    .execute(&cancel, move |_attempt| {
                        let calls = Arc::clone(&calls);
                        async move {
                            calls.fetch_add(1, Ordering::Relaxed);
                            Err::<u32, _>(GatewayError::upstream("c", 503, "unavailable", true))
                        }
                    })
                    .await
            })
        };

        // Let the first attempt fail and the backoff sleep begin.
        tokio::time::sleep(Duration::from_millis(10)).await;
        cancel.cancel();

        let result = task.await.unwrap_or_else(|_| Err(GatewayError::internal("join")));
        assert!(matches!(result, Err(GatewayError::Cancelled { .. })));
        assert_eq!(calls.load(Ordering::Relaxed), 1);
    }
}
