//! OAuth2 client-credentials authentication with proactive refresh.
//!
//! The token state lives behind an async mutex so concurrent requests to the
//! same connection serialize on at most one token exchange; the exchange
//! itself goes through the gateway's transport capability.

use crate::authenticator::Authenticator;
use apilink_core::{GatewayError, HttpTransport, RequestContext, TransportRequest};
use async_trait::async_trait;
use http::Method;
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tracing::{debug, warn};
use url::Url;

/// Timeout for token and refresh exchanges.
const TOKEN_EXCHANGE_TIMEOUT: Duration = Duration::from_secs(30);

/// Successful payload from a token or refresh endpoint.
#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    refresh_token: Option<String>,
    #[serde(default)]
    expires_in: Option<u64>,
}

#[derive(Default)]
struct TokenState {
    access_token: Option<SecretString>,
    refresh_token: Option<SecretString>,
    expires_at: Option<Instant>,
}

impl TokenState {
    fn is_expired(&self) -> bool {
        self.expires_at.is_some_and(|at| Instant::now() >= at)
    }
}

/// OAuth2 client-credentials authenticator for one connection.
///
/// Obtains `{access_token, refresh_token, expires_in}` from the configured
/// token endpoint and stores `expires_at = now + expires_in`. Before each
/// request, an expired token is refreshed synchronously — via the refresh
/// grant when a refresh token exists, otherwise by a fresh exchange. Refresh
/// failures propagate as authentication errors; they are never swallowed.
pub struct OAuth2Auth {
    connection_id: String,
    client_id: String,
    client_secret: SecretString,
    token_endpoint: Url,
    refresh_endpoint: Option<Url>,
    scopes: Vec<String>,
    transport: Arc<dyn HttpTransport>,
    state: Mutex<TokenState>,
}

impl OAuth2Auth {
    /// Create a new OAuth2 authenticator. No exchange happens until the
    /// first `attach`.
    #[must_use]
    pub fn new(
        connection_id: impl Into<String>,
        client_id: String,
        client_secret: SecretString,
        token_endpoint: Url,
        refresh_endpoint: Option<Url>,
        scopes: Vec<String>,
        transport: Arc<dyn HttpTransport>,
    ) -> Self {
        Self {
            connection_id: connection_id.into(),
            client_id,
            client_secret,
            token_endpoint,
            refresh_endpoint,
            scopes,
            transport,
            state: Mutex::new(TokenState::default()),
        }
    }

    /// Execute one exchange against the given endpoint and update state.
    async fn exchange(
        &self,
        state: &mut TokenState,
        endpoint: &Url,
        body: serde_json::Value,
    ) -> Result<(), GatewayError> {
        let request = TransportRequest {
            method: Method::POST,
            url: endpoint.clone(),
            headers: HashMap::from([(
                "Content-Type".to_string(),
                "application/json".to_string(),
            )]),
            body: Some(body),
            timeout: TOKEN_EXCHANGE_TIMEOUT,
        };

        let response = self.transport.execute(request).await.map_err(|e| {
            GatewayError::auth(
                &self.connection_id,
                format!("token endpoint unreachable: {e}"),
            )
        })?;

        if !response.is_success() {
            return Err(GatewayError::auth(
                &self.connection_id,
                format!("token endpoint returned status {}", response.status),
            ));
        }

        let token: TokenResponse = serde_json::from_value(response.body).map_err(|e| {
            GatewayError::auth(
                &self.connection_id,
                format!("malformed token response: {e}"),
            )
        })?;

        state.access_token = Some(SecretString::new(token.access_token));
        if let Some(refresh) = token.refresh_token {
            state.refresh_token = Some(SecretString::new(refresh));
        }
        state.expires_at = token
            .expires_in
            .map(|secs| Instant::now() + Duration::from_secs(secs));

        debug!(
            connection = %self.connection_id,
            expires_in_secs = token.expires_in,
            "oauth2 token obtained"
        );
        Ok(())
    }

    /// Client-credentials exchange against the token endpoint.
    async fn fetch_initial(&self, state: &mut TokenState) -> Result<(), GatewayError> {
        let mut body = serde_json::json!({
            "grant_type": "client_credentials",
            "client_id": self.client_id,
            "client_secret": self.client_secret.expose_secret(),
        });
        if !self.scopes.is_empty() {
            body["scope"] = serde_json::Value::String(self.scopes.join(" "));
        }
        let endpoint = self.token_endpoint.clone();
        self.exchange(state, &endpoint, body).await
    }

    /// Refresh grant, or a fresh exchange when no refresh token exists.
    async fn refresh(&self, state: &mut TokenState) -> Result<(), GatewayError> {
        match state.refresh_token.as_ref() {
            Some(refresh_token) => {
                let endpoint = self
                    .refresh_endpoint
                    .clone()
                    .unwrap_or_else(|| self.token_endpoint.clone());
                let body = serde_json::json!({
                    "grant_type": "refresh_token",
                    "client_id": self.client_id,
                    "client_secret": self.client_secret.expose_secret(),
                    "refresh_token": refresh_token.expose_secret(),
                });
                debug!(connection = %self.connection_id, "refreshing oauth2 token");
                self.exchange(state, &endpoint, body).await
            }
            None => {
                debug!(
                    connection = %self.connection_id,
                    "no refresh token, performing fresh exchange"
                );
                self.fetch_initial(state).await
            }
        }
    }
}

#[async_trait]
impl Authenticator for OAuth2Auth {
    fn scheme(&self) -> &'static str {
        "oauth2"
    }

    async fn attach(&self, ctx: &mut RequestContext) -> Result<(), GatewayError> {
        let mut state = self.state.lock().await;

        if state.access_token.is_none() {
            self.fetch_initial(&mut state).await?;
        } else if state.is_expired() {
            self.refresh(&mut state).await?;
        }

        let token = state.access_token.as_ref().ok_or_else(|| {
            GatewayError::auth(&self.connection_id, "token exchange yielded no token")
        })?;
        ctx.set_header(
            "Authorization",
            format!("Bearer {}", token.expose_secret()),
        );
        Ok(())
    }

    async fn handle_rejection(&self) -> Result<bool, GatewayError> {
        warn!(
            connection = %self.connection_id,
            "credentials rejected upstream, forcing token refresh"
        );
        let mut state = self.state.lock().await;
        state.access_token = None;
        state.expires_at = None;
        self.refresh(&mut state).await?;
        Ok(true)
    }
}
