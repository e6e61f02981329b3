//! A registered external API target and its scoped state.

use crate::config::ConnectionConfig;
use apilink_core::{GatewayError, RequestOptions};
use apilink_auth::Authenticator;
use apilink_resilience::{CircuitBreaker, RateLimiter, ResponseCache, RetryPolicy};
use chrono::{DateTime, TimeZone, Utc};
use http::Method;
use serde::Serialize;
use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Duration;
use url::Url;

/// Administrative status of a connection, driven by health checks.
///
/// Independent of the circuit breaker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
#[repr(u8)]
pub enum ConnectionStatus {
    /// The last health probe succeeded (or none ran yet).
    Active = 0,
    /// The last health probe failed.
    Unhealthy = 1,
}

impl From<u8> for ConnectionStatus {
    fn from(value: u8) -> Self {
        if value == 1 {
            Self::Unhealthy
        } else {
            Self::Active
        }
    }
}

fn now_millis() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

fn millis_to_datetime(ms: u64) -> Option<DateTime<Utc>> {
    if ms == 0 {
        None
    } else {
        Utc.timestamp_millis_opt(ms as i64).single()
    }
}

/// Mutable per-connection counters, updated on every request.
#[derive(Debug, Default)]
pub(crate) struct ConnectionStats {
    requests: AtomicU64,
    successes: AtomicU64,
    failures: AtomicU64,
    latency_total_ms: AtomicU64,
    last_request_at: AtomicU64,
    last_success_at: AtomicU64,
    last_failure_at: AtomicU64,
}

impl ConnectionStats {
    pub(crate) fn record_request(&self) {
        self.requests.fetch_add(1, Ordering::Relaxed);
        self.last_request_at.store(now_millis(), Ordering::Relaxed);
    }

    pub(crate) fn record_success(&self, latency: Duration) {
        self.successes.fetch_add(1, Ordering::Relaxed);
        self.latency_total_ms
            .fetch_add(latency.as_millis() as u64, Ordering::Relaxed);
        self.last_success_at.store(now_millis(), Ordering::Relaxed);
    }

    pub(crate) fn record_failure(&self) {
        self.failures.fetch_add(1, Ordering::Relaxed);
        self.last_failure_at.store(now_millis(), Ordering::Relaxed);
    }

    fn snapshot(&self) -> StatsSnapshot {
        let successes = self.successes.load(Ordering::Relaxed);
        let latency_total = self.latency_total_ms.load(Ordering::Relaxed);
        StatsSnapshot {
            requests: self.requests.load(Ordering::Relaxed),
            successes,
            failures: self.failures.load(Ordering::Relaxed),
            avg_latency_ms: if successes == 0 {
                0.0
            } else {
                latency_total as f64 / successes as f64
            },
            last_request_at: millis_to_datetime(self.last_request_at.load(Ordering::Relaxed)),
            last_success_at: millis_to_datetime(self.last_success_at.load(Ordering::Relaxed)),
            last_failure_at: millis_to_datetime(self.last_failure_at.load(Ordering::Relaxed)),
        }
    }
}

/// Point-in-time view of a connection's counters.
#[derive(Debug, Clone, Serialize)]
pub struct StatsSnapshot {
    /// Total requests issued.
    pub requests: u64,
    /// Requests that returned a result (including cache hits).
    pub successes: u64,
    /// Requests that surfaced an error.
    pub failures: u64,
    /// Mean wall-clock latency of successful requests, in milliseconds.
    pub avg_latency_ms: f64,
    /// Timestamp of the most recent request.
    pub last_request_at: Option<DateTime<Utc>>,
    /// Timestamp of the most recent success.
    pub last_success_at: Option<DateTime<Utc>>,
    /// Timestamp of the most recent failure.
    pub last_failure_at: Option<DateTime<Utc>>,
}

/// A registered external API target: configuration plus the collaborator
/// instances scoped to it.
///
/// Requests hold an `Arc<Connection>` snapshot, so deleting or updating a
/// connection never disturbs calls already past admission.
pub struct Connection {
    id: String,
    config: ConnectionConfig,
    authenticator: Arc<dyn Authenticator>,
    breaker: CircuitBreaker,
    limiter: RateLimiter,
    cache: ResponseCache,
    retry: RetryPolicy,
    stats: ConnectionStats,
    status: AtomicU8,
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.id)
            .field("auth", &self.authenticator.scheme())
            .field("status", &self.status())
            .finish_non_exhaustive()
    }
}

impl Connection {
    /// Wire a connection from validated configuration.
    pub(crate) fn new(
        id: String,
        config: ConnectionConfig,
        authenticator: Arc<dyn Authenticator>,
    ) -> Self {
        let breaker = CircuitBreaker::new(id.clone(), config.circuit_breaker.clone());
        let limiter = RateLimiter::new(id.clone(), config.rate_limit.clone());
        let cache = ResponseCache::new(config.cache.clone());
        let retry = RetryPolicy::new(id.clone(), config.retry.clone());
        Self {
            id,
            config,
            authenticator,
            breaker,
            limiter,
            cache,
            retry,
            stats: ConnectionStats::default(),
            status: AtomicU8::new(ConnectionStatus::Active as u8),
        }
    }

    /// Connection identifier.
    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    /// The configuration the connection was wired from.
    #[must_use]
    pub fn config(&self) -> &ConnectionConfig {
        &self.config
    }

    /// Current administrative status.
    #[must_use]
    pub fn status(&self) -> ConnectionStatus {
        ConnectionStatus::from(self.status.load(Ordering::Acquire))
    }

    pub(crate) fn set_status(&self, status: ConnectionStatus) {
        self.status.store(status as u8, Ordering::Release);
    }

    /// Point-in-time counters for this connection.
    #[must_use]
    pub fn stats(&self) -> StatsSnapshot {
        self.stats.snapshot()
    }

    /// The connection's circuit breaker.
    #[must_use]
    pub fn breaker(&self) -> &CircuitBreaker {
        &self.breaker
    }

    /// The connection's rate limiter.
    #[must_use]
    pub fn limiter(&self) -> &RateLimiter {
        &self.limiter
    }

    /// The connection's response cache.
    #[must_use]
    pub fn cache(&self) -> &ResponseCache {
        &self.cache
    }

    /// The connection's retry policy.
    #[must_use]
    pub fn retry(&self) -> &RetryPolicy {
        &self.retry
    }

    /// The connection's authenticator.
    #[must_use]
    pub fn authenticator(&self) -> &Arc<dyn Authenticator> {
        &self.authenticator
    }

    /// The connection's transform pipeline.
    #[must_use]
    pub fn transforms(&self) -> &crate::transform::TransformPipeline {
        &self.config.transformers
    }

    pub(crate) fn record_request(&self) {
        self.stats.record_request();
    }

    pub(crate) fn record_success(&self, latency: Duration) {
        self.stats.record_success(latency);
    }

    pub(crate) fn record_failure(&self) {
        self.stats.record_failure();
    }

    /// Resolve method and path from explicit overrides or the endpoint map.
    ///
    /// # Errors
    /// Returns [`GatewayError::EndpointNotFound`] when neither an override
    /// path nor a mapped endpoint exists.
    pub fn resolve_endpoint(
        &self,
        endpoint: &str,
        options: &RequestOptions,
    ) -> Result<(Method, String), GatewayError> {
        if let Some(path) = &options.path {
            let method = options.method.clone().unwrap_or(Method::GET);
            return Ok((method, path.clone()));
        }

        let def = self.config.endpoints.get(endpoint).ok_or_else(|| {
            GatewayError::EndpointNotFound {
                connection: self.id.clone(),
                endpoint: endpoint.to_string(),
            }
        })?;
        let method = match &options.method {
            Some(m) => m.clone(),
            // Validated at registration, so this parse cannot fail.
            None => def
                .method
                .parse::<Method>()
                .map_err(|_| GatewayError::internal("endpoint method invalid post-validation"))?,
        };
        Ok((method, def.path.clone()))
    }

    /// Build the absolute URL for a resolved path and query.
    ///
    /// # Errors
    /// Returns [`GatewayError::Configuration`] when the base URL is missing
    /// (impossible after validation).
    pub fn build_url(&self, path: &str, query: &[(String, String)]) -> Result<Url, GatewayError> {
        let base = self
            .config
            .base_url
            .as_ref()
            .ok_or_else(|| GatewayError::configuration("connection has no base_url"))?;

        let mut url = base.clone();
        let joined = format!("{}{}", base.path().trim_end_matches('/'), path);
        url.set_path(&joined);
        if !query.is_empty() {
            url.query_pairs_mut().extend_pairs(query.iter().map(|(k, v)| (k, v)));
        }
        Ok(url)
    }
}
