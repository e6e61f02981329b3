//! Per-request context and caller-supplied options.

use http::Method;
use serde_json::Value;
use std::collections::HashMap;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

/// One in-flight call through the gateway. Transient, never persisted.
///
/// Built by the orchestrator after endpoint resolution and threaded through
/// transforms, credential injection, and the transport call.
#[derive(Debug, Clone)]
pub struct RequestContext {
    /// Identifier of the connection being called.
    pub connection_id: String,
    /// The logical endpoint name the caller asked for.
    pub endpoint: String,
    /// Resolved HTTP method.
    pub method: Method,
    /// Resolved path relative to the connection's base URL.
    pub path: String,
    /// Outgoing headers. Credential injection mutates these.
    pub headers: HashMap<String, String>,
    /// Outgoing query parameters. Credential injection may append here.
    pub query: Vec<(String, String)>,
    /// Outgoing body, if any. Request transforms mutate this.
    pub body: Option<Value>,
    /// 1-based attempt counter, bumped by the retry executor.
    pub attempt: u32,
    /// When the logical request started.
    pub started_at: Instant,
    /// Correlation identifier for tracing.
    pub correlation_id: Uuid,
    /// Whether a one-shot re-authentication has already been used.
    pub reauthenticated: bool,
}

impl RequestContext {
    /// Create a fresh context for a resolved endpoint.
    #[must_use]
    pub fn new(
        connection_id: impl Into<String>,
        endpoint: impl Into<String>,
        method: Method,
        path: impl Into<String>,
    ) -> Self {
        Self {
            connection_id: connection_id.into(),
            endpoint: endpoint.into(),
            method,
            path: path.into(),
            headers: HashMap::new(),
            query: Vec::new(),
            body: None,
            attempt: 0,
            started_at: Instant::now(),
            correlation_id: Uuid::new_v4(),
            reauthenticated: false,
        }
    }

    /// Set a header, replacing any existing value.
    pub fn set_header(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.headers.insert(name.into(), value.into());
    }

    /// Append a query parameter.
    pub fn push_query(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.query.push((name.into(), value.into()));
    }

    /// Elapsed time since the logical request started.
    #[must_use]
    pub fn elapsed(&self) -> Duration {
        self.started_at.elapsed()
    }
}

/// Caller-supplied options for a single gateway request.
///
/// Everything is optional; unset fields fall back to the connection's
/// configuration (endpoint map, default timeout).
#[derive(Debug, Clone, Default)]
pub struct RequestOptions {
    /// Explicit method override.
    pub method: Option<Method>,
    /// Explicit path override (used instead of the endpoint map).
    pub path: Option<String>,
    /// Extra headers merged over the connection defaults.
    pub headers: HashMap<String, String>,
    /// Query parameters.
    pub query: Vec<(String, String)>,
    /// Request body.
    pub body: Option<Value>,
    /// Per-request timeout override.
    pub timeout: Option<Duration>,
    /// Caller identity for multi-tenant rate-limit scoping.
    pub caller_key: Option<String>,
    /// Bypass the response cache for this request.
    pub skip_cache: bool,
    /// Cancels the request (including pending retries) when triggered.
    pub cancellation: Option<CancellationToken>,
}

impl RequestOptions {
    /// Create empty options.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Override the HTTP method.
    #[must_use]
    pub fn method(mut self, method: Method) -> Self {
        self.method = Some(method);
        self
    }

    /// Override the request path.
    #[must_use]
    pub fn path(mut self, path: impl Into<String>) -> Self {
        self.path = Some(path.into());
        self
    }

    /// Add a header.
    #[must_use]
    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }

    /// Add a query parameter.
    #[must_use]
    pub fn query(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.query.push((name.into(), value.into()));
        self
    }

    /// Set the request body.
    #[must_use]
    pub fn body(mut self, body: Value) -> Self {
        self.body = Some(body);
        self
    }

    /// Set a per-request timeout.
    #[must_use]
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Scope rate limiting to a caller identity.
    #[must_use]
    pub fn caller_key(mut self, key: impl Into<String>) -> Self {
        self.caller_key = Some(key.into());
        self
    }

    /// Skip the response cache for this request.
    #[must_use]
    pub fn skip_cache(mut self) -> Self {
        self.skip_cache = true;
        self
    }

    /// Attach a cancellation token.
    #[must_use]
    pub fn cancellation(mut self, token: CancellationToken) -> Self {
        self.cancellation = Some(token);
        self
    }
}
