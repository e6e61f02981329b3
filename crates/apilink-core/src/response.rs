//! The result returned to callers of the gateway.

use serde_json::Value;
use std::collections::HashMap;
use std::time::Duration;

/// Successful outcome of a gateway request.
#[derive(Debug, Clone)]
pub struct GatewayResponse {
    /// Decoded response body after response transforms.
    pub data: Value,
    /// HTTP status code of the upstream response.
    pub status: u16,
    /// Response headers, keys lowercased.
    pub headers: HashMap<String, String>,
    /// Wall-clock time for the whole logical request.
    pub response_time: Duration,
    /// Whether the response was served from the cache.
    pub cached: bool,
    /// Number of transport attempts made (0 for a cache hit).
    pub attempts: u32,
}

impl GatewayResponse {
    /// Get a response header by name (case-insensitive).
    #[must_use]
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(&name.to_ascii_lowercase()).map(String::as_str)
    }

    /// Whether the status is in the 2xx range.
    #[must_use]
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}
