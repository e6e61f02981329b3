//! The gateway orchestrator: connection registry plus the fixed request
//! lifecycle.
//!
//! Per request, the composition order is: circuit-breaker check, rate-limit
//! admission, cache lookup, request transforms, authenticated transport call
//! under the retry policy (with a one-shot re-auth on upstream credential
//! rejection), response transforms, cache store, circuit-breaker outcome,
//! stats update, event emission. A retry sequence collapses to a single
//! breaker outcome; caller cancellation records none.

use crate::config::{ConnectionConfig, GatewayConfig};
use crate::connection::{Connection, ConnectionStatus, StatsSnapshot};
use crate::events::{EventHandler, GatewayEvent};
use apilink_auth::build_authenticator;
use apilink_core::{
    GatewayError, GatewayResponse, HttpTransport, RequestContext, RequestOptions,
    TransportRequest, TransportResponse,
};
use apilink_resilience::{CachedResponse, ResponseCache};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use http::Method;
use parking_lot::RwLock;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn, Instrument};
use uuid::Uuid;

/// Aggregated view over every registered connection.
#[derive(Debug, Clone, Serialize)]
pub struct GatewayStats {
    /// Per-connection counters.
    pub connections: HashMap<String, StatsSnapshot>,
    /// Sum of requests across connections.
    pub total_requests: u64,
    /// Sum of successes across connections.
    pub total_successes: u64,
    /// Sum of failures across connections.
    pub total_failures: u64,
}

/// Client-side gateway managing many independently-configured connections to
/// third-party HTTP APIs.
///
/// There is no global lock: the registry is a concurrent map and all
/// per-connection state is synchronized per connection, so requests to
/// unrelated connections never serialize on each other.
pub struct Gateway {
    config: GatewayConfig,
    transport: Arc<dyn HttpTransport>,
    connections: DashMap<String, Arc<Connection>>,
    observers: RwLock<Vec<EventHandler>>,
}

impl std::fmt::Debug for Gateway {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Gateway")
            .field("connections", &self.connections.len())
            .field("max_connections", &self.config.max_connections)
            .finish_non_exhaustive()
    }
}

impl Gateway {
    /// Create a gateway over the given transport.
    #[must_use]
    pub fn new(config: GatewayConfig, transport: Arc<dyn HttpTransport>) -> Self {
        Self {
            config,
            transport,
            connections: DashMap::new(),
            observers: RwLock::new(Vec::new()),
        }
    }

    /// Create with default configuration.
    #[must_use]
    pub fn with_transport(transport: Arc<dyn HttpTransport>) -> Self {
        Self::new(GatewayConfig::default(), transport)
    }

    /// Register an observer for lifecycle events on this instance.
    pub fn subscribe(&self, handler: EventHandler) {
        self.observers.write().push(handler);
    }

    fn emit(&self, event: &GatewayEvent) {
        for handler in self.observers.read().iter() {
            handler(event);
        }
    }

    /// Register a connection, wiring its scoped collaborators.
    ///
    /// # Errors
    /// Returns [`GatewayError::Configuration`] for invalid input or a
    /// duplicate identifier, and [`GatewayError::ConnectionLimitExceeded`]
    /// when the registry is full.
    pub fn register_connection(
        &self,
        config: ConnectionConfig,
    ) -> Result<Arc<Connection>, GatewayError> {
        config.validate()?;

        if self.connections.len() >= self.config.max_connections {
            return Err(GatewayError::ConnectionLimitExceeded {
                max: self.config.max_connections,
            });
        }

        let id = config
            .id
            .clone()
            .unwrap_or_else(|| Uuid::new_v4().to_string());

        let authenticator = build_authenticator(
            &id,
            &config.auth,
            config.custom_auth.clone(),
            Arc::clone(&self.transport),
        )?;
        let connection = Arc::new(Connection::new(id.clone(), config, authenticator));

        match self.connections.entry(id.clone()) {
            Entry::Occupied(_) => {
                return Err(GatewayError::configuration(format!(
                    "connection '{id}' is already registered"
                )));
            }
            Entry::Vacant(slot) => {
                slot.insert(Arc::clone(&connection));
            }
        }

        info!(connection = %id, auth = connection.authenticator().scheme(), "connection registered");
        self.emit(&GatewayEvent::ConnectionRegistered { connection: id });
        Ok(connection)
    }

    /// Replace a connection's configuration, resetting its scoped state.
    ///
    /// Requests already in flight complete against the previous snapshot.
    ///
    /// # Errors
    /// Returns [`GatewayError::ConnectionNotFound`] for unknown identifiers
    /// and [`GatewayError::Configuration`] for invalid input.
    pub fn update_connection(
        &self,
        id: &str,
        mut config: ConnectionConfig,
    ) -> Result<Arc<Connection>, GatewayError> {
        config.id = Some(id.to_string());
        config.validate()?;

        if !self.connections.contains_key(id) {
            return Err(GatewayError::ConnectionNotFound { id: id.to_string() });
        }

        let authenticator = build_authenticator(
            id,
            &config.auth,
            config.custom_auth.clone(),
            Arc::clone(&self.transport),
        )?;
        let connection = Arc::new(Connection::new(id.to_string(), config, authenticator));
        self.connections
            .insert(id.to_string(), Arc::clone(&connection));

        info!(connection = %id, "connection updated");
        self.emit(&GatewayEvent::ConnectionUpdated {
            connection: id.to_string(),
        });
        Ok(connection)
    }

    /// Delete a connection and its scoped state.
    ///
    /// Requests already past admission complete against their snapshot.
    ///
    /// # Errors
    /// Returns [`GatewayError::ConnectionNotFound`] for unknown identifiers.
    pub fn delete_connection(&self, id: &str) -> Result<(), GatewayError> {
        self.connections
            .remove(id)
            .ok_or_else(|| GatewayError::ConnectionNotFound { id: id.to_string() })?;

        info!(connection = %id, "connection deleted");
        self.emit(&GatewayEvent::ConnectionRemoved {
            connection: id.to_string(),
        });
        Ok(())
    }

    /// Look up a registered connection.
    #[must_use]
    pub fn connection(&self, id: &str) -> Option<Arc<Connection>> {
        self.connections.get(id).map(|e| Arc::clone(e.value()))
    }

    /// Identifiers of every registered connection.
    #[must_use]
    pub fn connection_ids(&self) -> Vec<String> {
        self.connections.iter().map(|e| e.key().clone()).collect()
    }

    /// Execute a request against a registered connection.
    ///
    /// # Errors
    /// Any variant of [`GatewayError`]; stats (and, when a transport attempt
    /// occurred, breaker state) are updated exactly once before propagation.
    pub async fn request(
        &self,
        connection_id: &str,
        endpoint: &str,
        options: RequestOptions,
    ) -> Result<GatewayResponse, GatewayError> {
        let connection = self
            .connection(connection_id)
            .ok_or_else(|| GatewayError::ConnectionNotFound {
                id: connection_id.to_string(),
            })?;

        let started = Instant::now();
        let (method, path) = connection.resolve_endpoint(endpoint, &options)?;
        let mut ctx = RequestContext::new(connection_id, endpoint, method, path);
        ctx.headers.extend(options.headers.clone());
        ctx.query.extend(options.query.iter().cloned());
        ctx.body = options.body.clone();

        let span = tracing::debug_span!(
            "gateway_request",
            connection = %connection_id,
            endpoint = %endpoint,
            correlation_id = %ctx.correlation_id,
        );

        connection.record_request();
        let result = self
            .execute(&connection, ctx, &options, started)
            .instrument(span)
            .await;

        match &result {
            Ok(response) => {
                connection.record_success(response.response_time);
                self.emit(&GatewayEvent::RequestSucceeded {
                    connection: connection_id.to_string(),
                    endpoint: endpoint.to_string(),
                    status: response.status,
                    cached: response.cached,
                    attempts: response.attempts,
                    duration: response.response_time,
                });
            }
            Err(error) => {
                connection.record_failure();
                self.emit(&GatewayEvent::RequestFailed {
                    connection: connection_id.to_string(),
                    endpoint: endpoint.to_string(),
                    error: error.to_string(),
                });
            }
        }
        result
    }

    /// The composed pipeline, minus stats/events handled by `request`.
    async fn execute(
        &self,
        connection: &Arc<Connection>,
        mut ctx: RequestContext,
        options: &RequestOptions,
        started: Instant,
    ) -> Result<GatewayResponse, GatewayError> {
        connection.breaker().check()?;
        connection.limiter().admit(options.caller_key.as_deref())?;

        let cacheable =
            !options.skip_cache && connection.cache().is_cacheable(ctx.method.as_str(), &ctx.path);
        let signature = cacheable.then(|| {
            ResponseCache::signature(
                &ctx.connection_id,
                ctx.method.as_str(),
                &ctx.path,
                &ctx.query,
                ctx.body.as_ref(),
            )
        });

        if let Some(sig) = &signature {
            if let Some(hit) = connection.cache().lookup(sig) {
                debug!(connection = %ctx.connection_id, endpoint = %ctx.endpoint, "cache hit");
                return Ok(GatewayResponse {
                    data: hit.data,
                    status: hit.status,
                    headers: hit.headers,
                    response_time: started.elapsed(),
                    cached: true,
                    attempts: 0,
                });
            }
        }

        connection.transforms().apply_request(&mut ctx).await?;

        let timeout = options.timeout.unwrap_or(connection.config().timeout);
        let cancel = options
            .cancellation
            .clone()
            .unwrap_or_else(CancellationToken::new);

        let ctx_cell = Arc::new(tokio::sync::Mutex::new(ctx));
        let attempt_result = connection
            .retry()
            .execute(&cancel, |attempt| {
                let ctx_cell = Arc::clone(&ctx_cell);
                let connection = Arc::clone(connection);
                let transport = Arc::clone(&self.transport);
                async move {
                    let mut ctx = ctx_cell.lock().await;
                    ctx.attempt = attempt;
                    attempt_once(&connection, &transport, &mut ctx, timeout).await
                }
            })
            .await;

        let ctx = match Arc::try_unwrap(ctx_cell) {
            Ok(cell) => cell.into_inner(),
            Err(shared) => shared.lock().await.clone(),
        };

        let response = match attempt_result {
            Ok(response) => response,
            Err(error) => {
                // Cancellation is not a dependency failure.
                if !matches!(error, GatewayError::Cancelled { .. }) {
                    connection.breaker().record_outcome(false);
                }
                return Err(error);
            }
        };

        let transform_result = connection
            .transforms()
            .apply_response(response.body, &ctx)
            .await;

        // The upstream itself succeeded, whatever the local transforms did.
        let data = match transform_result {
            Ok(data) => data,
            Err(error) => {
                connection.breaker().record_outcome(true);
                return Err(error);
            }
        };

        if let Some(sig) = &signature {
            connection.cache().store(
                sig,
                CachedResponse {
                    data: data.clone(),
                    status: response.status,
                    headers: response.headers.clone(),
                },
            );
        }

        connection.breaker().record_outcome(true);

        Ok(GatewayResponse {
            data,
            status: response.status,
            headers: response.headers,
            response_time: started.elapsed(),
            cached: false,
            attempts: ctx.attempt,
        })
    }

    /// Probe the connection's health endpoint and update its status.
    ///
    /// Independent of the circuit breaker: no outcome is recorded.
    ///
    /// # Errors
    /// Returns [`GatewayError::ConnectionNotFound`] for unknown identifiers.
    pub async fn health_check(&self, connection_id: &str) -> Result<bool, GatewayError> {
        let connection = self
            .connection(connection_id)
            .ok_or_else(|| GatewayError::ConnectionNotFound {
                id: connection_id.to_string(),
            })?;

        let path = connection
            .config()
            .health_endpoint
            .clone()
            .unwrap_or_else(|| "/health".to_string());
        let url = connection.build_url(&path, &[])?;

        let probe = TransportRequest {
            method: Method::GET,
            url,
            headers: HashMap::new(),
            body: None,
            timeout: self.config.health_check_timeout,
        };

        let healthy = match self.transport.execute(probe).await {
            Ok(response) => response.is_success(),
            Err(error) => {
                warn!(connection = %connection_id, error = %error, "health probe failed");
                false
            }
        };

        connection.set_status(if healthy {
            ConnectionStatus::Active
        } else {
            ConnectionStatus::Unhealthy
        });

        info!(connection = %connection_id, healthy = healthy, "health check completed");
        self.emit(&GatewayEvent::HealthChecked {
            connection: connection_id.to_string(),
            healthy,
        });
        Ok(healthy)
    }

    /// Aggregated counters across every connection.
    #[must_use]
    pub fn stats(&self) -> GatewayStats {
        let mut connections = HashMap::new();
        let mut total_requests = 0;
        let mut total_successes = 0;
        let mut total_failures = 0;

        for entry in &self.connections {
            let snapshot = entry.value().stats();
            total_requests += snapshot.requests;
            total_successes += snapshot.successes;
            total_failures += snapshot.failures;
            connections.insert(entry.key().clone(), snapshot);
        }

        GatewayStats {
            connections,
            total_requests,
            total_successes,
            total_failures,
        }
    }

    /// Administrative status per connection.
    #[must_use]
    pub fn health_status(&self) -> HashMap<String, ConnectionStatus> {
        self.connections
            .iter()
            .map(|e| (e.key().clone(), e.value().status()))
            .collect()
    }
}

/// One authenticated transport attempt, with a one-shot re-auth on upstream
/// credential rejection.
async fn attempt_once(
    connection: &Connection,
    transport: &Arc<dyn HttpTransport>,
    ctx: &mut RequestContext,
    timeout: Duration,
) -> Result<TransportResponse, GatewayError> {
    connection.authenticator().attach(ctx).await?;
    let response = send(connection, transport, ctx, timeout).await?;

    if response.status != 401 {
        return finish_attempt(connection, ctx, response);
    }

    if !ctx.reauthenticated {
        ctx.reauthenticated = true;
        if connection.authenticator().handle_rejection().await? {
            debug!(connection = %ctx.connection_id, "retrying once with refreshed credentials");
            connection.authenticator().attach(ctx).await?;
            let retried = send(connection, transport, ctx, timeout).await?;
            if retried.status != 401 {
                return finish_attempt(connection, ctx, retried);
            }
        }
    }

    Err(GatewayError::auth(
        &ctx.connection_id,
        "credentials rejected by upstream (status 401)",
    ))
}

async fn send(
    connection: &Connection,
    transport: &Arc<dyn HttpTransport>,
    ctx: &RequestContext,
    timeout: Duration,
) -> Result<TransportResponse, GatewayError> {
    let url = connection.build_url(&ctx.path, &ctx.query)?;
    let request = TransportRequest {
        method: ctx.method.clone(),
        url,
        headers: ctx.headers.clone(),
        body: ctx.body.clone(),
        timeout,
    };
    transport
        .execute(request)
        .await
        .map_err(|e| e.with_connection(&ctx.connection_id))
}

fn finish_attempt(
    connection: &Connection,
    ctx: &RequestContext,
    response: TransportResponse,
) -> Result<TransportResponse, GatewayError> {
    if response.is_success() {
        return Ok(response);
    }
    Err(upstream_error(connection, ctx, &response))
}

fn upstream_error(
    connection: &Connection,
    ctx: &RequestContext,
    response: &TransportResponse,
) -> GatewayError {
    let mut message = match &response.body {
        serde_json::Value::Null => String::new(),
        serde_json::Value::String(s) => s.clone(),
        other => other
            .get("message")
            .or_else(|| other.get("error"))
            .and_then(|v| v.as_str())
            .map_or_else(|| other.to_string(), ToString::to_string),
    };
    if message.is_empty() {
        message = format!("HTTP {}", response.status);
    }
    if message.len() > 200 {
        message = message.chars().take(200).collect();
    }

    GatewayError::upstream(
        &ctx.connection_id,
        response.status,
        message,
        connection.retry().is_retryable_status(response.status),
    )
}
