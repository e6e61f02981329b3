//! The HTTP transport capability consumed by the gateway.
//!
//! The orchestrator never talks to an HTTP library directly; it is written
//! against [`HttpTransport`] so tests can substitute a deterministic stub and
//! applications can bring their own client.

use crate::error::GatewayError;
use async_trait::async_trait;
use http::Method;
use serde_json::Value;
use std::collections::HashMap;
use std::time::Duration;
use url::Url;

/// A fully-resolved outgoing HTTP exchange.
#[derive(Debug, Clone)]
pub struct TransportRequest {
    /// HTTP method.
    pub method: Method,
    /// Absolute URL including query string.
    pub url: Url,
    /// Outgoing headers.
    pub headers: HashMap<String, String>,
    /// JSON body, if any.
    pub body: Option<Value>,
    /// Hard deadline for this single attempt.
    pub timeout: Duration,
}

/// Raw upstream response, body already decoded.
#[derive(Debug, Clone)]
pub struct TransportResponse {
    /// HTTP status code.
    pub status: u16,
    /// Response headers, keys lowercased.
    pub headers: HashMap<String, String>,
    /// Decoded body. `Value::Null` when the body was empty.
    pub body: Value,
}

impl TransportResponse {
    /// Whether the status is in the 2xx range.
    #[must_use]
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// Capability to execute a single HTTP exchange.
///
/// Implementations must honor `request.timeout` for the whole attempt and map
/// timeouts, connect failures, and resets to
/// [`GatewayError::Transport`] with the matching
/// [`TransportFailure`](crate::error::TransportFailure) kind so the retry
/// executor can classify them. A non-2xx response is NOT an error at this
/// layer; classification happens in the orchestrator.
#[async_trait]
pub trait HttpTransport: Send + Sync {
    /// Execute one HTTP exchange.
    async fn execute(&self, request: TransportRequest) -> Result<TransportResponse, GatewayError>;
}
