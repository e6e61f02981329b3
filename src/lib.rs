//! # apilink
//!
//! A resilient client-side gateway for third-party HTTP APIs. Each
//! registered connection carries its own authentication scheme, rate limit,
//! response cache, retry policy, and circuit breaker, composed into one
//! request lifecycle with fixed ordering.
//!
//! # Example
//!
//! ```rust,no_run
//! use apilink::{ConnectionConfig, EndpointDef, Gateway, ReqwestTransport, RequestOptions};
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), apilink::GatewayError> {
//!     let gateway = Gateway::with_transport(Arc::new(ReqwestTransport::new()?));
//!
//!     let mut config = ConnectionConfig::for_base_url("https://api.example.com")?;
//!     config.id = Some("crm".to_string());
//!     config
//!         .endpoints
//!         .insert("list_users".to_string(), EndpointDef::new("GET", "/users"));
//!     gateway.register_connection(config)?;
//!
//!     let response = gateway
//!         .request("crm", "list_users", RequestOptions::new())
//!         .await?;
//!     println!("{} ({} ms)", response.status, response.response_time.as_millis());
//!     Ok(())
//! }
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub use apilink_auth::{
    ApiKeyPlacement, AuthConfig, Authenticator, CustomAuthHandler, OAuth2Auth,
};
pub use apilink_client::{
    Connection, ConnectionConfig, ConnectionStatus, EndpointDef, EventHandler, Gateway,
    GatewayConfig, GatewayEvent, GatewayStats, ReqwestTransport, RequestTransform,
    ResponseTransform, StatsSnapshot, TransformPipeline,
};
pub use apilink_core::{
    GatewayError, GatewayResponse, GatewayResult, HttpTransport, RequestContext, RequestOptions,
    TransportFailure, TransportRequest, TransportResponse,
};
pub use apilink_resilience::{
    CacheConfig, CachedResponse, CircuitBreaker, CircuitBreakerConfig, CircuitState,
    RateLimitConfig, RateLimitDiscipline, RateLimiter, ResponseCache, RetryConfig, RetryPolicy,
};
