//! Connection and gateway configuration.

use crate::transform::TransformPipeline;
use apilink_auth::{AuthConfig, CustomAuthHandler};
use apilink_core::GatewayError;
use apilink_resilience::{CacheConfig, CircuitBreakerConfig, RateLimitConfig, RetryConfig};
use http::Method;
use serde::Deserialize;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use url::Url;

/// A named endpoint: method plus path template relative to the base URL.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct EndpointDef {
    /// HTTP method, e.g. `GET`
    pub method: String,
    /// Path starting with `/`
    pub path: String,
}

impl EndpointDef {
    /// Create an endpoint definition.
    #[must_use]
    pub fn new(method: impl Into<String>, path: impl Into<String>) -> Self {
        Self {
            method: method.into(),
            path: path.into(),
        }
    }
}

/// Configuration for one registered external API target.
///
/// Deserializable from JSON/YAML; transformers and custom auth handlers are
/// code and attach programmatically.
#[derive(Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ConnectionConfig {
    /// Connection identifier; generated when absent.
    pub id: Option<String>,
    /// Base URL of the target API. Mandatory, must be absolute.
    pub base_url: Option<Url>,
    /// Authentication scheme.
    pub auth: AuthConfig,
    /// Admission control.
    pub rate_limit: RateLimitConfig,
    /// Response caching.
    pub cache: CacheConfig,
    /// Retry policy.
    pub retry: RetryConfig,
    /// Circuit breaker.
    pub circuit_breaker: CircuitBreakerConfig,
    /// Named endpoints: `name -> {method, path}`.
    pub endpoints: HashMap<String, EndpointDef>,
    /// Default timeout for each transport attempt.
    #[serde(with = "humantime_serde")]
    pub timeout: Duration,
    /// Path probed by `health_check`. Defaults to `/health`.
    pub health_endpoint: Option<String>,
    /// Request/response transformers, applied in order.
    #[serde(skip)]
    pub transformers: TransformPipeline,
    /// Handler backing `auth.type = custom`.
    #[serde(skip)]
    pub custom_auth: Option<Arc<dyn CustomAuthHandler>>,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            id: None,
            base_url: None,
            auth: AuthConfig::default(),
            rate_limit: RateLimitConfig::default(),
            cache: CacheConfig::default(),
            retry: RetryConfig::default(),
            circuit_breaker: CircuitBreakerConfig::default(),
            endpoints: HashMap::new(),
            timeout: Duration::from_secs(30),
            health_endpoint: None,
            transformers: TransformPipeline::default(),
            custom_auth: None,
        }
    }
}

impl std::fmt::Debug for ConnectionConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionConfig")
            .field("id", &self.id)
            .field("base_url", &self.base_url.as_ref().map(Url::as_str))
            .field("auth", &self.auth.scheme_name())
            .field("endpoints", &self.endpoints.keys().collect::<Vec<_>>())
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}

impl ConnectionConfig {
    /// Start building a configuration for the given base URL.
    pub fn for_base_url(base_url: &str) -> Result<Self, GatewayError> {
        let url = Url::parse(base_url).map_err(|e| {
            GatewayError::configuration(format!("base_url '{base_url}' is not a valid absolute URL: {e}"))
        })?;
        Ok(Self {
            base_url: Some(url),
            ..Default::default()
        })
    }

    /// Validate everything that must hold before a connection is wired.
    ///
    /// # Errors
    /// Returns [`GatewayError::Configuration`] naming the first violation.
    pub fn validate(&self) -> Result<(), GatewayError> {
        let base_url = self
            .base_url
            .as_ref()
            .ok_or_else(|| GatewayError::configuration("base_url is required"))?;
        if base_url.cannot_be_a_base() || base_url.host_str().is_none() {
            return Err(GatewayError::configuration(format!(
                "base_url '{base_url}' is not an absolute http(s) URL"
            )));
        }
        match base_url.scheme() {
            "http" | "https" => {}
            other => {
                return Err(GatewayError::configuration(format!(
                    "base_url scheme '{other}' is not supported"
                )));
            }
        }

        if let Some(id) = &self.id {
            if id.is_empty() {
                return Err(GatewayError::configuration("id must not be empty"));
            }
        }

        for (name, endpoint) in &self.endpoints {
            endpoint.method.parse::<Method>().map_err(|_| {
                GatewayError::configuration(format!(
                    "endpoint '{name}' has invalid method '{}'",
                    endpoint.method
                ))
            })?;
            if !endpoint.path.starts_with('/') {
                return Err(GatewayError::configuration(format!(
                    "endpoint '{name}' path must start with '/'"
                )));
            }
        }

        if let Some(path) = &self.health_endpoint {
            if !path.starts_with('/') {
                return Err(GatewayError::configuration(
                    "health_endpoint must start with '/'",
                ));
            }
        }

        if self.retry.enabled && self.retry.max_attempts == 0 {
            return Err(GatewayError::configuration(
                "retry.max_attempts must be at least 1",
            ));
        }
        if self.rate_limit.enabled && self.rate_limit.requests == 0 {
            return Err(GatewayError::configuration(
                "rate_limit.requests must be at least 1 when enabled",
            ));
        }
        if self.rate_limit.enabled && self.rate_limit.window.is_zero() {
            return Err(GatewayError::configuration(
                "rate_limit.window must be positive when enabled",
            ));
        }
        if self.cache.enabled && self.cache.max_entries == 0 {
            return Err(GatewayError::configuration(
                "cache.max_entries must be at least 1 when enabled",
            ));
        }
        if self.circuit_breaker.failure_threshold == 0 {
            return Err(GatewayError::configuration(
                "circuit_breaker.failure_threshold must be at least 1",
            ));
        }
        if self.timeout.is_zero() {
            return Err(GatewayError::configuration("timeout must be positive"));
        }

        // Custom auth needs its handler wired at registration, not later.
        if matches!(self.auth, AuthConfig::Custom) && self.custom_auth.is_none() {
            return Err(GatewayError::configuration(
                "auth.type = custom requires a registered handler",
            ));
        }

        Ok(())
    }
}

/// Gateway-wide configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct GatewayConfig {
    /// Maximum number of registered connections.
    pub max_connections: usize,
    /// Timeout for health-check probes.
    #[serde(with = "humantime_serde")]
    pub health_check_timeout: Duration,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            max_connections: 100,
            health_check_timeout: Duration::from_secs(5),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_valid_minimal_config() {
        let config = ConnectionConfig::for_base_url("https://api.example.com")
            .unwrap_or_else(|e| panic!("{e}"));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_missing_base_url_rejected() {
        let config = ConnectionConfig::default();
        let err = config.validate().unwrap_err();
        assert!(matches!(err, GatewayError::Configuration { .. }));
        assert!(err.to_string().contains("base_url"));
    }

    #[test]
    fn test_relative_base_url_rejected() {
        assert!(ConnectionConfig::for_base_url("/just/a/path").is_err());
        assert!(ConnectionConfig::for_base_url("not a url").is_err());
    }

    #[test]
    fn test_non_http_scheme_rejected() {
        let config = ConnectionConfig::for_base_url("ftp://files.example.com")
            .unwrap_or_else(|e| panic!("{e}"));
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_endpoint_validation() {
        let mut config = ConnectionConfig::for_base_url("https://api.example.com")
            .unwrap_or_else(|e| panic!("{e}"));
        config
            .endpoints
            .insert("list".to_string(), EndpointDef::new("GET", "users"));
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("must start with '/'"));

        config
            .endpoints
            .insert("list".to_string(), EndpointDef::new("FETCH!", "/users"));
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_zero_limits_rejected() {
        let mut config = ConnectionConfig::for_base_url("https://api.example.com")
            .unwrap_or_else(|e| panic!("{e}"));
        config.rate_limit.requests = 0;
        assert!(config.validate().is_err());

        // Disabled rate limiting makes the zero irrelevant.
        config.rate_limit.enabled = false;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_custom_auth_requires_handler() {
        let mut config = ConnectionConfig::for_base_url("https://api.example.com")
            .unwrap_or_else(|e| panic!("{e}"));
        config.auth = AuthConfig::Custom;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_deserialize_full_config() {
        let config: ConnectionConfig = serde_json::from_value(serde_json::json!({
            "id": "crm",
            "base_url": "https://crm.example.com/api",
            "auth": { "type": "bearer", "token": "tok" },
            "rate_limit": { "enabled": true, "requests": 10, "window": "1m" },
            "cache": { "enabled": true, "ttl": "5m", "methods": ["GET"] },
            "retry": { "max_attempts": 2, "status_codes": [503] },
            "circuit_breaker": { "failure_threshold": 3, "reset_timeout": "30s" },
            "endpoints": { "list_users": { "method": "GET", "path": "/users" } },
            "timeout": "10s"
        }))
        .unwrap_or_else(|e| panic!("deserialize failed: {e}"));

        assert!(config.validate().is_ok());
        assert_eq!(config.id.as_deref(), Some("crm"));
        assert_eq!(config.retry.max_attempts, 2);
        assert_eq!(config.rate_limit.window, Duration::from_secs(60));
        assert!(config.endpoints.contains_key("list_users"));
    }

    #[test]
    fn test_unknown_config_key_rejected() {
        let result: Result<ConnectionConfig, _> = serde_json::from_value(serde_json::json!({
            "base_url": "https://api.example.com",
            "rate_limti": { "enabled": true }
        }));
        assert!(result.is_err());
    }
}
