//! The `Authenticator` trait and the static credential schemes.

use crate::config::{ApiKeyPlacement, AuthConfig};
use crate::oauth2::OAuth2Auth;
use apilink_core::{GatewayError, HttpTransport, RequestContext};
use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use secrecy::{ExposeSecret, SecretString};
use std::sync::Arc;

/// Credential injection for one connection.
///
/// `attach` mutates the outgoing request to carry valid credentials,
/// performing a token refresh first when required. `handle_rejection` is
/// invoked after an upstream authentication rejection and returns whether
/// fresh credentials were obtained and the call should be retried (once).
#[async_trait]
pub trait Authenticator: Send + Sync {
    /// Short tag naming the scheme, for logs.
    fn scheme(&self) -> &'static str;

    /// Inject valid credentials into the outgoing request.
    async fn attach(&self, ctx: &mut RequestContext) -> Result<(), GatewayError>;

    /// React to an upstream authentication rejection.
    ///
    /// Returns `Ok(true)` when credentials were refreshed and one retry is
    /// warranted. Static schemes have nothing to refresh and return
    /// `Ok(false)`.
    async fn handle_rejection(&self) -> Result<bool, GatewayError> {
        Ok(false)
    }
}

/// Caller-supplied authentication logic for schemes not otherwise enumerated.
#[async_trait]
pub trait CustomAuthHandler: Send + Sync {
    /// Mutate the outgoing request to carry credentials.
    async fn apply(&self, ctx: &mut RequestContext) -> Result<(), GatewayError>;
}

/// No credentials attached.
pub struct NoAuth;

#[async_trait]
impl Authenticator for NoAuth {
    fn scheme(&self) -> &'static str {
        "none"
    }

    async fn attach(&self, _ctx: &mut RequestContext) -> Result<(), GatewayError> {
        Ok(())
    }
}

/// Static bearer token. No refresh.
pub struct BearerAuth {
    token: SecretString,
}

impl BearerAuth {
    /// Create from a static token.
    #[must_use]
    pub fn new(token: SecretString) -> Self {
        Self { token }
    }
}

#[async_trait]
impl Authenticator for BearerAuth {
    fn scheme(&self) -> &'static str {
        "bearer"
    }

    async fn attach(&self, ctx: &mut RequestContext) -> Result<(), GatewayError> {
        ctx.set_header(
            "Authorization",
            format!("Bearer {}", self.token.expose_secret()),
        );
        Ok(())
    }
}

/// HTTP Basic: base64-encoded `username:password`.
pub struct BasicAuth {
    username: String,
    password: SecretString,
}

impl BasicAuth {
    /// Create from a username/password pair.
    #[must_use]
    pub fn new(username: impl Into<String>, password: SecretString) -> Self {
        Self {
            username: username.into(),
            password,
        }
    }
}

#[async_trait]
impl Authenticator for BasicAuth {
    fn scheme(&self) -> &'static str {
        "basic"
    }

    async fn attach(&self, ctx: &mut RequestContext) -> Result<(), GatewayError> {
        let encoded = BASE64.encode(format!(
            "{}:{}",
            self.username,
            self.password.expose_secret()
        ));
        ctx.set_header("Authorization", format!("Basic {encoded}"));
        Ok(())
    }
}

/// Named header or query parameter carrying a static key.
pub struct ApiKeyAuth {
    key: SecretString,
    name: String,
    placement: ApiKeyPlacement,
}

impl ApiKeyAuth {
    /// Create from a key and its injection point.
    #[must_use]
    pub fn new(key: SecretString, name: impl Into<String>, placement: ApiKeyPlacement) -> Self {
        Self {
            key,
            name: name.into(),
            placement,
        }
    }
}

#[async_trait]
impl Authenticator for ApiKeyAuth {
    fn scheme(&self) -> &'static str {
        "apikey"
    }

    async fn attach(&self, ctx: &mut RequestContext) -> Result<(), GatewayError> {
        match self.placement {
            ApiKeyPlacement::Header => {
                ctx.set_header(self.name.clone(), self.key.expose_secret().clone());
            }
            ApiKeyPlacement::Query => {
                ctx.push_query(self.name.clone(), self.key.expose_secret().clone());
            }
        }
        Ok(())
    }
}

/// Defers entirely to a caller-supplied handler.
pub struct CustomAuth {
    handler: Arc<dyn CustomAuthHandler>,
}

impl CustomAuth {
    /// Wrap a caller-supplied handler.
    #[must_use]
    pub fn new(handler: Arc<dyn CustomAuthHandler>) -> Self {
        Self { handler }
    }
}

#[async_trait]
impl Authenticator for CustomAuth {
    fn scheme(&self) -> &'static str {
        "custom"
    }

    async fn attach(&self, ctx: &mut RequestContext) -> Result<(), GatewayError> {
        self.handler.apply(ctx).await
    }
}

/// Build the authenticator for a connection, validating credential fields.
///
/// Missing required fields are a configuration error here, at registration —
/// never at request time.
///
/// # Errors
/// Returns [`GatewayError::Configuration`] on missing or empty credential
/// fields, or when `type = custom` was configured without a handler.
pub fn build_authenticator(
    connection_id: &str,
    config: &AuthConfig,
    custom_handler: Option<Arc<dyn CustomAuthHandler>>,
    transport: Arc<dyn HttpTransport>,
) -> Result<Arc<dyn Authenticator>, GatewayError> {
    match config {
        AuthConfig::None => Ok(Arc::new(NoAuth)),
        AuthConfig::Bearer { token } => {
            if token.expose_secret().is_empty() {
                return Err(GatewayError::configuration(
                    "bearer auth requires a non-empty token",
                ));
            }
            Ok(Arc::new(BearerAuth::new(token.clone())))
        }
        AuthConfig::Basic { username, password } => {
            if username.is_empty() {
                return Err(GatewayError::configuration(
                    "basic auth requires a username",
                ));
            }
            Ok(Arc::new(BasicAuth::new(username.clone(), password.clone())))
        }
        AuthConfig::ApiKey {
            key,
            name,
            placement,
        } => {
            if key.expose_secret().is_empty() {
                return Err(GatewayError::configuration(
                    "apikey auth requires a non-empty key",
                ));
            }
            if name.is_empty() {
                return Err(GatewayError::configuration(
                    "apikey auth requires the header or parameter name",
                ));
            }
            Ok(Arc::new(ApiKeyAuth::new(key.clone(), name.clone(), *placement)))
        }
        AuthConfig::OAuth2 {
            client_id,
            client_secret,
            token_endpoint,
            refresh_endpoint,
            scopes,
        } => {
            if client_id.is_empty() {
                return Err(GatewayError::configuration(
                    "oauth2 auth requires a client_id",
                ));
            }
            if client_secret.expose_secret().is_empty() {
                return Err(GatewayError::configuration(
                    "oauth2 auth requires a client_secret",
                ));
            }
            Ok(Arc::new(OAuth2Auth::new(
                connection_id,
                client_id.clone(),
                client_secret.clone(),
                token_endpoint.clone(),
                refresh_endpoint.clone(),
                scopes.clone(),
                transport,
            )))
        }
        AuthConfig::Custom => custom_handler.map_or_else(
            || {
                Err(GatewayError::configuration(
                    "custom auth requires a registered handler",
                ))
            },
            |handler| Ok(Arc::new(CustomAuth::new(handler)) as Arc<dyn Authenticator>),
        ),
    }
}
