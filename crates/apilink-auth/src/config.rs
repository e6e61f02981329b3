//! Authentication configuration per connection.

use secrecy::SecretString;
use serde::Deserialize;
use url::Url;

/// Where an API key is injected into the outgoing request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApiKeyPlacement {
    /// A named request header carries the key
    #[default]
    Header,
    /// A named query parameter carries the key
    Query,
}

/// Authentication scheme configuration for one connection.
///
/// The scheme is a tagged variant so an unknown `type` fails deserialization
/// instead of silently falling through to an unauthenticated request.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AuthConfig {
    /// No credentials attached
    #[default]
    None,
    /// Static bearer token in the Authorization header
    Bearer {
        /// The token value
        token: SecretString,
    },
    /// Base64-encoded `username:password` in the Authorization header
    Basic {
        /// Username
        username: String,
        /// Password
        password: SecretString,
    },
    /// Named header or query parameter carrying a static key
    #[serde(rename = "apikey")]
    ApiKey {
        /// The key value
        key: SecretString,
        /// Header or query-parameter name carrying the key
        name: String,
        /// Where the key is injected
        #[serde(default)]
        placement: ApiKeyPlacement,
    },
    /// OAuth2 client-credentials with optional refresh
    #[serde(rename = "oauth2")]
    OAuth2 {
        /// OAuth2 client identifier
        client_id: String,
        /// OAuth2 client secret
        client_secret: SecretString,
        /// Endpoint for the client-credentials exchange
        token_endpoint: Url,
        /// Endpoint for the refresh grant; falls back to `token_endpoint`
        #[serde(default)]
        refresh_endpoint: Option<Url>,
        /// Scopes requested during the exchange
        #[serde(default)]
        scopes: Vec<String>,
    },
    /// Caller-supplied handler registered alongside the connection
    Custom,
}

impl AuthConfig {
    /// Short tag naming the scheme, for logs and errors.
    #[must_use]
    pub fn scheme_name(&self) -> &'static str {
        match self {
            Self::None => "none",
            Self::Bearer { .. } => "bearer",
            Self::Basic { .. } => "basic",
            Self::ApiKey { .. } => "apikey",
            Self::OAuth2 { .. } => "oauth2",
            Self::Custom => "custom",
        }
    }
}
