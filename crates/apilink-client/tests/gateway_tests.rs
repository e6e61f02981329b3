//! End-to-end tests of the composed request lifecycle against a scripted
//! transport stub.

use apilink_auth::AuthConfig;
use apilink_client::{
    ConnectionConfig, EndpointDef, Gateway, GatewayEvent, RequestTransform,
};
use apilink_core::{
    GatewayError, HttpTransport, RequestContext, RequestOptions, TransportFailure,
    TransportRequest, TransportResponse,
};
use apilink_resilience::CircuitState;
use async_trait::async_trait;
use http::Method;
use parking_lot::Mutex;
use secrecy::SecretString;
use serde_json::{json, Value};
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Transport stub that serves scripted outcomes in order and records every
/// request it receives.
struct MockTransport {
    script: Mutex<VecDeque<Result<TransportResponse, GatewayError>>>,
    calls: Mutex<Vec<TransportRequest>>,
}

impl MockTransport {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            script: Mutex::new(VecDeque::new()),
            calls: Mutex::new(Vec::new()),
        })
    }

    fn push_status(&self, status: u16, body: Value) {
        self.script.lock().push_back(Ok(TransportResponse {
            status,
            headers: HashMap::new(),
            body,
        }));
    }

    fn push_error(&self, error: GatewayError) {
        self.script.lock().push_back(Err(error));
    }

    fn call_count(&self) -> usize {
        self.calls.lock().len()
    }

    fn call(&self, index: usize) -> TransportRequest {
        self.calls.lock()[index].clone()
    }
}

#[async_trait]
impl HttpTransport for MockTransport {
    async fn execute(&self, request: TransportRequest) -> Result<TransportResponse, GatewayError> {
        self.calls.lock().push(request);
        self.script.lock().pop_front().unwrap_or_else(|| {
            Ok(TransportResponse {
                status: 200,
                headers: HashMap::new(),
                body: json!({}),
            })
        })
    }
}

fn base_config(id: &str) -> ConnectionConfig {
    let mut config = ConnectionConfig::for_base_url("https://api.example.com")
        .unwrap_or_else(|e| panic!("{e}"));
    config.id = Some(id.to_string());
    config
        .endpoints
        .insert("list".to_string(), EndpointDef::new("GET", "/items"));
    config
        .endpoints
        .insert("create".to_string(), EndpointDef::new("POST", "/items"));
    config
}

fn gateway(transport: Arc<MockTransport>) -> Gateway {
    Gateway::with_transport(transport)
}

#[tokio::test]
async fn cached_get_hits_transport_once() {
    let transport = MockTransport::new();
    let gw = gateway(transport.clone());

    let mut config = base_config("crm");
    config.cache.enabled = true;
    config.cache.methods = vec!["GET".to_string()];
    config.cache.ttl = Duration::from_secs(60);
    gw.register_connection(config).unwrap_or_else(|e| panic!("{e}"));

    transport.push_status(200, json!({ "items": [1, 2] }));

    let first = gw
        .request("crm", "list", RequestOptions::new())
        .await
        .unwrap_or_else(|e| panic!("{e}"));
    assert!(!first.cached);
    assert_eq!(first.attempts, 1);

    let second = gw
        .request("crm", "list", RequestOptions::new())
        .await
        .unwrap_or_else(|e| panic!("{e}"));
    assert!(second.cached);
    assert_eq!(second.attempts, 0);
    assert_eq!(second.data, first.data);

    // The transport was invoked exactly once across both requests.
    assert_eq!(transport.call_count(), 1);
}

#[tokio::test]
async fn retry_on_503_succeeds_with_no_breaker_failures() {
    let transport = MockTransport::new();
    let gw = gateway(transport.clone());

    let mut config = base_config("crm");
    config.retry.max_attempts = 2;
    config.retry.status_codes = vec![503];
    config.retry.base_delay = Duration::from_millis(1);
    let connection = gw.register_connection(config).unwrap_or_else(|e| panic!("{e}"));

    transport.push_status(503, json!({ "error": "unavailable" }));
    transport.push_status(200, json!({ "ok": true }));

    let response = gw
        .request("crm", "list", RequestOptions::new())
        .await
        .unwrap_or_else(|e| panic!("{e}"));

    assert_eq!(response.status, 200);
    assert_eq!(response.attempts, 2);
    assert_eq!(transport.call_count(), 2);

    // The retry sequence collapsed to one successful outcome.
    let breaker = connection.breaker().stats();
    assert_eq!(breaker.state, CircuitState::Closed);
    assert_eq!(breaker.consecutive_failures, 0);
}

#[tokio::test]
async fn non_retryable_status_surfaces_immediately() {
    let transport = MockTransport::new();
    let gw = gateway(transport.clone());

    let mut config = base_config("crm");
    config.retry.max_attempts = 3;
    config.retry.base_delay = Duration::from_millis(1);
    let connection = gw.register_connection(config).unwrap_or_else(|e| panic!("{e}"));

    transport.push_status(404, json!({ "message": "no such item" }));

    let err = gw
        .request("crm", "list", RequestOptions::new())
        .await
        .unwrap_err();

    match err {
        GatewayError::Upstream { status, retryable, .. } => {
            assert_eq!(status, 404);
            assert!(!retryable);
        }
        other => panic!("expected Upstream, got {other}"),
    }
    assert_eq!(transport.call_count(), 1);
    assert_eq!(connection.breaker().stats().consecutive_failures, 1);
}

#[tokio::test]
async fn circuit_opens_and_fails_fast() {
    let transport = MockTransport::new();
    let gw = gateway(transport.clone());

    let mut config = base_config("crm");
    config.circuit_breaker.failure_threshold = 2;
    config.circuit_breaker.reset_timeout = Duration::from_secs(60);
    config.retry.enabled = false;
    gw.register_connection(config).unwrap_or_else(|e| panic!("{e}"));

    for _ in 0..2 {
        transport.push_error(GatewayError::transport(
            "",
            TransportFailure::Connect,
            "connection refused",
        ));
        let _ = gw.request("crm", "list", RequestOptions::new()).await;
    }
    assert_eq!(transport.call_count(), 2);

    // Circuit is now open: fail fast, transport untouched.
    let err = gw
        .request("crm", "list", RequestOptions::new())
        .await
        .unwrap_err();
    assert!(matches!(err, GatewayError::CircuitOpen { .. }));
    assert_eq!(transport.call_count(), 2);
}

#[tokio::test]
async fn rate_limit_rejects_with_retry_after() {
    let transport = MockTransport::new();
    let gw = gateway(transport.clone());

    let mut config = base_config("crm");
    config.rate_limit.enabled = true;
    config.rate_limit.requests = 2;
    config.rate_limit.window = Duration::from_secs(60);
    gw.register_connection(config).unwrap_or_else(|e| panic!("{e}"));

    for _ in 0..2 {
        gw.request("crm", "list", RequestOptions::new())
            .await
            .unwrap_or_else(|e| panic!("{e}"));
    }

    let err = gw
        .request("crm", "list", RequestOptions::new())
        .await
        .unwrap_err();
    match err {
        GatewayError::RateLimitExceeded { retry_after, .. } => {
            assert!(retry_after > Duration::ZERO);
        }
        other => panic!("expected RateLimitExceeded, got {other}"),
    }
    assert_eq!(transport.call_count(), 2);
}

#[tokio::test]
async fn disabled_rate_limit_always_admits() {
    let transport = MockTransport::new();
    let gw = gateway(transport.clone());

    let mut config = base_config("crm");
    config.rate_limit.enabled = false;
    config.rate_limit.requests = 1;
    gw.register_connection(config).unwrap_or_else(|e| panic!("{e}"));

    for _ in 0..20 {
        gw.request("crm", "list", RequestOptions::new())
            .await
            .unwrap_or_else(|e| panic!("{e}"));
    }
    assert_eq!(transport.call_count(), 20);
}

#[tokio::test]
async fn registration_validates_and_bounds() {
    let transport = MockTransport::new();
    let gw = Gateway::new(
        apilink_client::GatewayConfig {
            max_connections: 2,
            ..Default::default()
        },
        transport,
    );

    // Missing base_url is rejected before any wiring happens.
    let err = gw.register_connection(ConnectionConfig::default()).unwrap_err();
    assert!(matches!(err, GatewayError::Configuration { .. }));

    gw.register_connection(base_config("first"))
        .unwrap_or_else(|e| panic!("{e}"));

    // Duplicate identifiers are rejected...
    let err = gw.register_connection(base_config("first")).unwrap_err();
    assert!(matches!(err, GatewayError::Configuration { .. }));

    gw.register_connection(base_config("second"))
        .unwrap_or_else(|e| panic!("{e}"));

    // ...and so is exceeding the registry bound.
    let err = gw.register_connection(base_config("third")).unwrap_err();
    assert!(matches!(err, GatewayError::ConnectionLimitExceeded { max: 2 }));
}

#[tokio::test]
async fn missing_auth_fields_rejected_at_registration() {
    let transport = MockTransport::new();
    let gw = gateway(transport);

    let mut config = base_config("crm");
    config.auth = AuthConfig::Bearer {
        token: SecretString::new(String::new()),
    };
    let err = gw.register_connection(config).unwrap_err();
    assert!(matches!(err, GatewayError::Configuration { .. }));
}

#[tokio::test]
async fn deleted_connection_is_gone() {
    let transport = MockTransport::new();
    let gw = gateway(transport);

    gw.register_connection(base_config("crm"))
        .unwrap_or_else(|e| panic!("{e}"));
    gw.delete_connection("crm").unwrap_or_else(|e| panic!("{e}"));

    let err = gw
        .request("crm", "list", RequestOptions::new())
        .await
        .unwrap_err();
    assert!(matches!(err, GatewayError::ConnectionNotFound { .. }));

    let err = gw.delete_connection("crm").unwrap_err();
    assert!(matches!(err, GatewayError::ConnectionNotFound { .. }));
}

#[tokio::test]
async fn request_transform_failure_aborts_before_transport() {
    struct Reject;

    #[async_trait]
    impl RequestTransform for Reject {
        async fn transform(
            &self,
            _body: Value,
            _ctx: &RequestContext,
        ) -> Result<Value, GatewayError> {
            Err(GatewayError::validation("payload rejected", None))
        }
    }

    let transport = MockTransport::new();
    let gw = gateway(transport.clone());

    let mut config = base_config("crm");
    config.transformers = config.transformers.with_request(Arc::new(Reject));
    gw.register_connection(config).unwrap_or_else(|e| panic!("{e}"));

    let err = gw
        .request(
            "crm",
            "create",
            RequestOptions::new().body(json!({ "sku": "A-1" })),
        )
        .await
        .unwrap_err();

    assert!(matches!(err, GatewayError::Validation { .. }));
    assert_eq!(transport.call_count(), 0);
}

#[tokio::test]
async fn oauth2_exchanges_token_before_first_request() {
    let transport = MockTransport::new();
    let gw = gateway(transport.clone());

    let mut config = base_config("crm");
    config.auth = AuthConfig::OAuth2 {
        client_id: "client-1".to_string(),
        client_secret: SecretString::new("secret".to_string()),
        token_endpoint: url::Url::parse("https://auth.example.com/token")
            .unwrap_or_else(|e| panic!("{e}")),
        refresh_endpoint: None,
        scopes: vec![],
    };
    gw.register_connection(config).unwrap_or_else(|e| panic!("{e}"));

    transport.push_status(200, json!({ "access_token": "tok-1", "expires_in": 3600 }));
    transport.push_status(200, json!({ "ok": true }));

    let response = gw
        .request("crm", "list", RequestOptions::new())
        .await
        .unwrap_or_else(|e| panic!("{e}"));
    assert_eq!(response.status, 200);
    assert_eq!(transport.call_count(), 2);

    // First call went to the token endpoint, second carried the token.
    assert_eq!(transport.call(0).url.as_str(), "https://auth.example.com/token");
    let api_call = transport.call(1);
    assert_eq!(
        api_call.headers.get("Authorization").map(String::as_str),
        Some("Bearer tok-1")
    );
}

#[tokio::test]
async fn oauth2_refresh_failure_never_reaches_endpoint() {
    let transport = MockTransport::new();
    let gw = gateway(transport.clone());

    let mut config = base_config("crm");
    config.auth = AuthConfig::OAuth2 {
        client_id: "client-1".to_string(),
        client_secret: SecretString::new("secret".to_string()),
        token_endpoint: url::Url::parse("https://auth.example.com/token")
            .unwrap_or_else(|e| panic!("{e}")),
        refresh_endpoint: None,
        scopes: vec![],
    };
    gw.register_connection(config).unwrap_or_else(|e| panic!("{e}"));

    transport.push_status(400, json!({ "error": "invalid_client" }));

    let err = gw
        .request("crm", "list", RequestOptions::new())
        .await
        .unwrap_err();
    assert!(matches!(err, GatewayError::Auth { .. }));

    // Only the token endpoint was contacted; the target API never was.
    assert_eq!(transport.call_count(), 1);
    assert_eq!(transport.call(0).url.as_str(), "https://auth.example.com/token");
}

#[tokio::test]
async fn upstream_401_triggers_one_reauth_for_oauth2() {
    let transport = MockTransport::new();
    let gw = gateway(transport.clone());

    let mut config = base_config("crm");
    config.auth = AuthConfig::OAuth2 {
        client_id: "client-1".to_string(),
        client_secret: SecretString::new("secret".to_string()),
        token_endpoint: url::Url::parse("https://auth.example.com/token")
            .unwrap_or_else(|e| panic!("{e}")),
        refresh_endpoint: None,
        scopes: vec![],
    };
    gw.register_connection(config).unwrap_or_else(|e| panic!("{e}"));

    transport.push_status(200, json!({ "access_token": "tok-1", "expires_in": 3600 }));
    transport.push_status(401, json!({ "error": "expired token" }));
    transport.push_status(200, json!({ "access_token": "tok-2", "expires_in": 3600 }));
    transport.push_status(200, json!({ "ok": true }));

    let response = gw
        .request("crm", "list", RequestOptions::new())
        .await
        .unwrap_or_else(|e| panic!("{e}"));

    assert_eq!(response.status, 200);
    assert_eq!(transport.call_count(), 4);
    let retried = transport.call(3);
    assert_eq!(
        retried.headers.get("Authorization").map(String::as_str),
        Some("Bearer tok-2")
    );
}

#[tokio::test]
async fn upstream_401_with_static_scheme_is_auth_error() {
    let transport = MockTransport::new();
    let gw = gateway(transport.clone());

    let mut config = base_config("crm");
    config.auth = AuthConfig::Bearer {
        token: SecretString::new("stale".to_string()),
    };
    gw.register_connection(config).unwrap_or_else(|e| panic!("{e}"));

    transport.push_status(401, json!({ "error": "bad token" }));

    let err = gw
        .request("crm", "list", RequestOptions::new())
        .await
        .unwrap_err();
    assert!(matches!(err, GatewayError::Auth { .. }));
    // Nothing to refresh, so exactly one transport call.
    assert_eq!(transport.call_count(), 1);
}

#[tokio::test]
async fn cancellation_skips_breaker_and_transport() {
    let transport = MockTransport::new();
    let gw = gateway(transport.clone());

    let connection = gw
        .register_connection(base_config("crm"))
        .unwrap_or_else(|e| panic!("{e}"));

    let token = CancellationToken::new();
    token.cancel();

    let err = gw
        .request(
            "crm",
            "list",
            RequestOptions::new().cancellation(token),
        )
        .await
        .unwrap_err();

    assert!(matches!(err, GatewayError::Cancelled { .. }));
    assert_eq!(transport.call_count(), 0);
    // Cancellation is not a dependency failure.
    assert_eq!(connection.breaker().stats().consecutive_failures, 0);
    // But the request still counts in the stats block.
    let stats = connection.stats();
    assert_eq!(stats.requests, 1);
    assert_eq!(stats.failures, 1);
}

#[tokio::test]
async fn health_check_updates_status() {
    let transport = MockTransport::new();
    let gw = gateway(transport.clone());

    let mut config = base_config("crm");
    config.health_endpoint = Some("/status".to_string());
    gw.register_connection(config).unwrap_or_else(|e| panic!("{e}"));

    transport.push_status(200, json!({ "status": "ok" }));
    let healthy = gw.health_check("crm").await.unwrap_or_else(|e| panic!("{e}"));
    assert!(healthy);
    assert_eq!(transport.call(0).url.as_str(), "https://api.example.com/status");

    transport.push_status(500, json!({ "status": "down" }));
    let healthy = gw.health_check("crm").await.unwrap_or_else(|e| panic!("{e}"));
    assert!(!healthy);

    let status = gw.health_status();
    assert_eq!(
        status.get("crm").copied(),
        Some(apilink_client::ConnectionStatus::Unhealthy)
    );
}

#[tokio::test]
async fn stats_aggregate_across_connections() {
    let transport = MockTransport::new();
    let gw = gateway(transport.clone());

    gw.register_connection(base_config("crm"))
        .unwrap_or_else(|e| panic!("{e}"));
    let mut billing = base_config("billing");
    billing.retry.enabled = false;
    gw.register_connection(billing)
        .unwrap_or_else(|e| panic!("{e}"));

    gw.request("crm", "list", RequestOptions::new())
        .await
        .unwrap_or_else(|e| panic!("{e}"));
    transport.push_status(500, json!({}));
    let _ = gw.request("billing", "list", RequestOptions::new()).await;

    let stats = gw.stats();
    assert_eq!(stats.total_requests, 2);
    assert_eq!(stats.total_successes, 1);
    assert_eq!(stats.total_failures, 1);
    assert_eq!(stats.connections.len(), 2);
}

#[tokio::test]
async fn observers_receive_lifecycle_events() {
    let transport = MockTransport::new();
    let gw = gateway(transport.clone());

    let events: Arc<Mutex<Vec<String>>> = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&events);
    gw.subscribe(Arc::new(move |event: &GatewayEvent| {
        let tag = match event {
            GatewayEvent::ConnectionRegistered { .. } => "registered",
            GatewayEvent::ConnectionUpdated { .. } => "updated",
            GatewayEvent::ConnectionRemoved { .. } => "removed",
            GatewayEvent::RequestSucceeded { .. } => "succeeded",
            GatewayEvent::RequestFailed { .. } => "failed",
            GatewayEvent::HealthChecked { .. } => "health",
        };
        sink.lock().push(tag.to_string());
    }));

    gw.register_connection(base_config("crm"))
        .unwrap_or_else(|e| panic!("{e}"));
    gw.request("crm", "list", RequestOptions::new())
        .await
        .unwrap_or_else(|e| panic!("{e}"));
    gw.delete_connection("crm").unwrap_or_else(|e| panic!("{e}"));

    let seen = events.lock().clone();
    assert_eq!(seen, vec!["registered", "succeeded", "removed"]);
}

#[tokio::test]
async fn explicit_overrides_bypass_endpoint_map() {
    let transport = MockTransport::new();
    let gw = gateway(transport.clone());

    gw.register_connection(base_config("crm"))
        .unwrap_or_else(|e| panic!("{e}"));

    gw.request(
        "crm",
        "adhoc",
        RequestOptions::new()
            .method(Method::PUT)
            .path("/items/9")
            .query("force", "true"),
    )
    .await
    .unwrap_or_else(|e| panic!("{e}"));

    let call = transport.call(0);
    assert_eq!(call.method, Method::PUT);
    assert_eq!(
        call.url.as_str(),
        "https://api.example.com/items/9?force=true"
    );
}

#[tokio::test]
async fn unknown_endpoint_is_typed_error() {
    let transport = MockTransport::new();
    let gw = gateway(transport.clone());
    gw.register_connection(base_config("crm"))
        .unwrap_or_else(|e| panic!("{e}"));

    let err = gw
        .request("crm", "nope", RequestOptions::new())
        .await
        .unwrap_err();
    assert!(matches!(err, GatewayError::EndpointNotFound { .. }));
    assert_eq!(transport.call_count(), 0);
}

#[tokio::test]
async fn update_connection_resets_scoped_state() {
    let transport = MockTransport::new();
    let gw = gateway(transport.clone());

    let mut config = base_config("crm");
    config.circuit_breaker.failure_threshold = 1;
    config.retry.enabled = false;
    gw.register_connection(config).unwrap_or_else(|e| panic!("{e}"));

    transport.push_error(GatewayError::transport(
        "",
        TransportFailure::Connect,
        "refused",
    ));
    let _ = gw.request("crm", "list", RequestOptions::new()).await;

    let err = gw
        .request("crm", "list", RequestOptions::new())
        .await
        .unwrap_err();
    assert!(matches!(err, GatewayError::CircuitOpen { .. }));

    // Replacing the connection starts from a closed circuit.
    let mut fresh = base_config("crm");
    fresh.circuit_breaker.failure_threshold = 1;
    gw.update_connection("crm", fresh)
        .unwrap_or_else(|e| panic!("{e}"));

    gw.request("crm", "list", RequestOptions::new())
        .await
        .unwrap_or_else(|e| panic!("{e}"));
}
