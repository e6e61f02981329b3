//! Default `reqwest`-backed implementation of the transport capability.

use apilink_core::{GatewayError, HttpTransport, TransportFailure, TransportRequest, TransportResponse};
use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use std::time::Duration;
use tracing::trace;

/// Default connect timeout for the underlying client.
const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// HTTP transport backed by a shared `reqwest` client.
///
/// Per-attempt timeouts come from each [`TransportRequest`]; on timeout the
/// in-flight connection is dropped by the client, nothing leaks. Transport
/// errors carry no connection identifier — the orchestrator stamps it.
#[derive(Debug, Clone)]
pub struct ReqwestTransport {
    client: reqwest::Client,
}

impl ReqwestTransport {
    /// Create a transport with its own client.
    ///
    /// # Errors
    /// Returns [`GatewayError::Configuration`] when the client cannot be
    /// constructed.
    pub fn new() -> Result<Self, GatewayError> {
        let client = reqwest::Client::builder()
            .connect_timeout(DEFAULT_CONNECT_TIMEOUT)
            .build()
            .map_err(|e| {
                GatewayError::configuration(format!("failed to build HTTP client: {e}"))
            })?;
        Ok(Self { client })
    }

    /// Wrap an existing client (connection pool reuse).
    #[must_use]
    pub fn with_client(client: reqwest::Client) -> Self {
        Self { client }
    }
}

fn map_reqwest_error(error: &reqwest::Error) -> GatewayError {
    let kind = if error.is_timeout() {
        TransportFailure::Timeout
    } else if error.is_connect() {
        TransportFailure::Connect
    } else if error.is_body() || error.is_decode() {
        TransportFailure::Reset
    } else {
        TransportFailure::Other
    };
    GatewayError::transport(String::new(), kind, error.to_string())
}

#[async_trait]
impl HttpTransport for ReqwestTransport {
    async fn execute(&self, request: TransportRequest) -> Result<TransportResponse, GatewayError> {
        trace!(method = %request.method, url = %request.url, "transport exchange");

        let mut builder = self
            .client
            .request(request.method, request.url)
            .timeout(request.timeout);
        for (name, value) in &request.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }
        if let Some(body) = &request.body {
            builder = builder.json(body);
        }

        let response = builder.send().await.map_err(|e| map_reqwest_error(&e))?;

        let status = response.status().as_u16();
        let headers: HashMap<String, String> = response
            .headers()
            .iter()
            .filter_map(|(name, value)| {
                value
                    .to_str()
                    .ok()
                    .map(|v| (name.as_str().to_ascii_lowercase(), v.to_string()))
            })
            .collect();

        let text = response.text().await.map_err(|e| map_reqwest_error(&e))?;
        let body = if text.is_empty() {
            Value::Null
        } else {
            serde_json::from_str(&text).unwrap_or(Value::String(text))
        };

        Ok(TransportResponse {
            status,
            headers,
            body,
        })
    }
}
