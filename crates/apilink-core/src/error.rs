//! Error types for the apilink gateway client.

use std::time::Duration;
use thiserror::Error;

/// Result type for gateway operations.
pub type GatewayResult<T> = std::result::Result<T, GatewayError>;

/// Classification of a transport-level failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportFailure {
    /// The attempt exceeded its timeout.
    Timeout,
    /// The connection could not be established (DNS, refused, TLS).
    Connect,
    /// The connection was reset or closed mid-exchange.
    Reset,
    /// Any other transport-level failure.
    Other,
}

impl TransportFailure {
    /// Whether this failure class is safe to retry.
    #[must_use]
    pub fn is_retryable(self) -> bool {
        matches!(self, Self::Timeout | Self::Connect | Self::Reset)
    }
}

impl std::fmt::Display for TransportFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Timeout => "timeout",
            Self::Connect => "connect",
            Self::Reset => "reset",
            Self::Other => "other",
        };
        f.write_str(s)
    }
}

/// Errors that can occur when registering connections or executing requests.
#[derive(Error, Debug)]
pub enum GatewayError {
    /// Bad registration input. Fatal, surfaced immediately, never retried.
    #[error("Configuration error: {message}")]
    Configuration {
        /// What was wrong with the supplied configuration.
        message: String,
    },

    /// Credential or token-refresh failure.
    #[error("Authentication failed for connection '{connection}': {message}")]
    Auth {
        /// Connection the credentials belong to.
        connection: String,
        /// What went wrong.
        message: String,
    },

    /// The connection's admission window is exhausted.
    #[error("Rate limit exceeded for connection '{connection}', retry after {retry_after:?}")]
    RateLimitExceeded {
        /// Connection whose limit was hit.
        connection: String,
        /// Time until the next admission becomes possible.
        retry_after: Duration,
    },

    /// The circuit breaker is open; the transport was not called.
    #[error("Circuit open for connection '{connection}'")]
    CircuitOpen {
        /// Connection whose breaker is open.
        connection: String,
        /// Time until a half-open trial is permitted, if known.
        retry_after: Option<Duration>,
    },

    /// Network-level failure while talking to the upstream.
    #[error("Transport error ({kind}) for connection '{connection}': {message}")]
    Transport {
        /// Connection the attempt belonged to.
        connection: String,
        /// Failure classification.
        kind: TransportFailure,
        /// Underlying error description.
        message: String,
    },

    /// Non-2xx response from the remote API.
    #[error("Upstream error {status} from connection '{connection}': {message}")]
    Upstream {
        /// Connection that produced the response.
        connection: String,
        /// HTTP status code returned by the upstream.
        status: u16,
        /// Response body excerpt or status text.
        message: String,
        /// Whether the status is in the connection's retryable set.
        retryable: bool,
    },

    /// Request or response failed a schema/shape check. Not retried.
    #[error("Validation error: {message}")]
    Validation {
        /// What failed to validate.
        message: String,
        /// The offending field, when known.
        field: Option<String>,
    },

    /// The gateway's connection registry is full.
    #[error("Connection limit of {max} reached")]
    ConnectionLimitExceeded {
        /// Maximum number of registered connections.
        max: usize,
    },

    /// No connection is registered under the given identifier.
    #[error("Connection '{id}' not found")]
    ConnectionNotFound {
        /// The identifier that was looked up.
        id: String,
    },

    /// The named endpoint is not in the connection's endpoint map.
    #[error("Endpoint '{endpoint}' not defined for connection '{connection}'")]
    EndpointNotFound {
        /// Connection that was asked.
        connection: String,
        /// The endpoint name that was looked up.
        endpoint: String,
    },

    /// All retry attempts were consumed.
    #[error("Retries exhausted after {attempts} attempts")]
    RetryExhausted {
        /// Number of attempts made.
        attempts: u32,
        /// The last error encountered.
        last_error: Box<GatewayError>,
    },

    /// The caller cancelled the request.
    #[error("Request cancelled for connection '{connection}'")]
    Cancelled {
        /// Connection the cancelled request targeted.
        connection: String,
    },

    /// Internal invariant violation.
    #[error("Internal error: {message}")]
    Internal {
        /// Description of the violated invariant.
        message: String,
    },
}

impl GatewayError {
    /// Create a configuration error.
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }

    /// Create an authentication error.
    pub fn auth(connection: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Auth {
            connection: connection.into(),
            message: message.into(),
        }
    }

    /// Create a rate-limit error carrying the wait hint.
    pub fn rate_limited(connection: impl Into<String>, retry_after: Duration) -> Self {
        Self::RateLimitExceeded {
            connection: connection.into(),
            retry_after,
        }
    }

    /// Create a circuit-open error.
    pub fn circuit_open(connection: impl Into<String>, retry_after: Option<Duration>) -> Self {
        Self::CircuitOpen {
            connection: connection.into(),
            retry_after,
        }
    }

    /// Create a transport error.
    pub fn transport(
        connection: impl Into<String>,
        kind: TransportFailure,
        message: impl Into<String>,
    ) -> Self {
        Self::Transport {
            connection: connection.into(),
            kind,
            message: message.into(),
        }
    }

    /// Create an upstream (non-2xx) error.
    pub fn upstream(
        connection: impl Into<String>,
        status: u16,
        message: impl Into<String>,
        retryable: bool,
    ) -> Self {
        Self::Upstream {
            connection: connection.into(),
            status,
            message: message.into(),
            retryable,
        }
    }

    /// Create a validation error.
    pub fn validation(message: impl Into<String>, field: Option<String>) -> Self {
        Self::Validation {
            message: message.into(),
            field,
        }
    }

    /// Create a retry-exhausted error wrapping the last failure.
    pub fn retry_exhausted(attempts: u32, last_error: GatewayError) -> Self {
        Self::RetryExhausted {
            attempts,
            last_error: Box::new(last_error),
        }
    }

    /// Create a cancellation error.
    pub fn cancelled(connection: impl Into<String>) -> Self {
        Self::Cancelled {
            connection: connection.into(),
        }
    }

    /// Create an internal error.
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Check whether the error is retryable under default policy.
    ///
    /// Connection-level transport failures are retryable; upstream errors are
    /// retryable only when their status was stamped as such. Everything else
    /// surfaces on first occurrence.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Transport { kind, .. } => kind.is_retryable(),
            Self::Upstream { retryable, .. } => *retryable,
            _ => false,
        }
    }

    /// Get the HTTP status code associated with the error, if any.
    #[must_use]
    pub fn status_code(&self) -> Option<u16> {
        match self {
            Self::Upstream { status, .. } => Some(*status),
            Self::RateLimitExceeded { .. } => Some(429),
            Self::Auth { .. } => Some(401),
            _ => None,
        }
    }

    /// Get the suggested wait before retrying, if the error carries one.
    #[must_use]
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            Self::RateLimitExceeded { retry_after, .. } => Some(*retry_after),
            Self::CircuitOpen { retry_after, .. } => *retry_after,
            _ => None,
        }
    }

    /// The connection identifier the error is scoped to, if any.
    #[must_use]
    pub fn connection_id(&self) -> Option<&str> {
        match self {
            Self::Auth { connection, .. }
            | Self::RateLimitExceeded { connection, .. }
            | Self::CircuitOpen { connection, .. }
            | Self::Transport { connection, .. }
            | Self::Upstream { connection, .. }
            | Self::EndpointNotFound { connection, .. }
            | Self::Cancelled { connection } => Some(connection),
            Self::ConnectionNotFound { id } => Some(id),
            Self::RetryExhausted { last_error, .. } => last_error.connection_id(),
            _ => None,
        }
    }

    /// Number of attempts behind this error (1 unless retries were consumed).
    #[must_use]
    pub fn attempts(&self) -> u32 {
        match self {
            Self::RetryExhausted { attempts, .. } => *attempts,
            _ => 1,
        }
    }

    /// Stamp the owning connection onto a transport error produced by a
    /// connection-agnostic transport implementation.
    #[must_use]
    pub fn with_connection(self, id: &str) -> Self {
        match self {
            Self::Transport {
                connection,
                kind,
                message,
            } if connection.is_empty() => Self::Transport {
                connection: id.to_string(),
                kind,
                message,
            },
            other => other,
        }
    }
}
