//! # apilink Auth
//!
//! Per-connection authentication for the apilink gateway client.
//!
//! Each connection carries one authentication scheme, modeled as an
//! [`Authenticator`] trait object selected once at registration time:
//! bearer, basic, API key, OAuth2 client-credentials (with refresh), or a
//! caller-supplied custom handler. Missing credential fields are rejected at
//! registration, never at request time.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod authenticator;
pub mod config;
pub mod oauth2;

// Re-export main types
pub use authenticator::{
    build_authenticator, ApiKeyAuth, Authenticator, BasicAuth, BearerAuth, CustomAuth,
    CustomAuthHandler, NoAuth,
};
pub use config::{ApiKeyPlacement, AuthConfig};
pub use oauth2::OAuth2Auth;
