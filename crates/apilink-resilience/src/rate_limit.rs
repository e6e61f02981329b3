//! Per-connection request admission control.
//!
//! Supports two counting disciplines over a configurable window: a fixed
//! window (counter reset at each boundary) and a sliding window (admission
//! timestamps aged out of a trailing window). State is independent per
//! connection and optionally keyed further by a caller identity for
//! multi-tenant admission control.

use apilink_core::GatewayError;
use dashmap::DashMap;
use serde::Deserialize;
use std::collections::VecDeque;
use std::time::{Duration, Instant};
use tracing::debug;

/// Counting discipline for the admission window
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RateLimitDiscipline {
    /// Counter reset at every window boundary
    Fixed,
    /// Trailing window over individual admission timestamps
    #[default]
    Sliding,
}

/// Rate limiter configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RateLimitConfig {
    /// Whether admission control is enforced. Disabling it is an explicit,
    /// valid configuration: `admit` then always succeeds.
    pub enabled: bool,
    /// Admissions allowed per window
    pub requests: u32,
    /// Window length
    #[serde(with = "humantime_serde")]
    pub window: Duration,
    /// Counting discipline
    pub discipline: RateLimitDiscipline,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            requests: 60,
            window: Duration::from_secs(60),
            discipline: RateLimitDiscipline::Sliding,
        }
    }
}

enum WindowState {
    Fixed { window_start: Instant, count: u32 },
    Sliding { admissions: VecDeque<Instant> },
}

/// Admission controller for a single connection.
///
/// Windows are kept per caller key in a `DashMap`; requests without a caller
/// key share one default window.
pub struct RateLimiter {
    connection_id: String,
    config: RateLimitConfig,
    windows: DashMap<String, WindowState>,
}

impl RateLimiter {
    /// Create a new rate limiter
    #[must_use]
    pub fn new(connection_id: impl Into<String>, config: RateLimitConfig) -> Self {
        Self {
            connection_id: connection_id.into(),
            config,
            windows: DashMap::new(),
        }
    }

    /// Create with default configuration
    #[must_use]
    pub fn with_defaults(connection_id: impl Into<String>) -> Self {
        Self::new(connection_id, RateLimitConfig::default())
    }

    /// Whether admission control is enforced.
    #[must_use]
    pub fn is_enabled(&self) -> bool {
        self.config.enabled
    }

    /// Admit one request, or fail with the time until admission is possible.
    ///
    /// # Errors
    /// Returns [`GatewayError::RateLimitExceeded`] carrying `retry_after`
    /// when the window is exhausted.
    pub fn admit(&self, caller_key: Option<&str>) -> Result<(), GatewayError> {
        if !self.config.enabled {
            return Ok(());
        }

        let key = caller_key.unwrap_or("");
        let now = Instant::now();

        let mut entry = self.windows.entry(key.to_string()).or_insert_with(|| {
            match self.config.discipline {
                RateLimitDiscipline::Fixed => WindowState::Fixed {
                    window_start: now,
                    count: 0,
                },
                RateLimitDiscipline::Sliding => WindowState::Sliding {
                    admissions: VecDeque::new(),
                },
            }
        });

        let outcome = match entry.value_mut() {
            WindowState::Fixed { window_start, count } => {
                if now.duration_since(*window_start) >= self.config.window {
                    *window_start = now;
                    *count = 0;
                }
                if *count < self.config.requests {
                    *count += 1;
                    Ok(())
                } else {
                    let retry_after = self
                        .config
                        .window
                        .saturating_sub(now.duration_since(*window_start));
                    Err(retry_after)
                }
            }
            WindowState::Sliding { admissions } => {
                while let Some(front) = admissions.front() {
                    if now.duration_since(*front) >= self.config.window {
                        admissions.pop_front();
                    } else {
                        break;
                    }
                }
                if admissions.len() < self.config.requests as usize {
                    admissions.push_back(now);
                    Ok(())
                } else {
                    // Admission opens when the oldest counted timestamp
                    // leaves the trailing window.
                    let oldest = admissions.front().copied().unwrap_or(now);
                    let retry_after = self
                        .config
                        .window
                        .saturating_sub(now.duration_since(oldest));
                    Err(retry_after)
                }
            }
        };

        outcome.map_err(|retry_after| {
            debug!(
                connection = %self.connection_id,
                caller = key,
                retry_after_ms = retry_after.as_millis() as u64,
                "rate limit exceeded"
            );
            GatewayError::rate_limited(&self.connection_id, retry_after)
        })
    }
}
