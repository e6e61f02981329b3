//! Lifecycle events, scoped to a `Gateway` instance.
//!
//! Observers register on the gateway they care about; there is no
//! process-wide listener state.

use std::sync::Arc;
use std::time::Duration;

/// A lifecycle notification emitted by a gateway instance.
#[derive(Debug, Clone)]
pub enum GatewayEvent {
    /// A connection was registered.
    ConnectionRegistered {
        /// Connection identifier
        connection: String,
    },
    /// A connection's configuration was replaced.
    ConnectionUpdated {
        /// Connection identifier
        connection: String,
    },
    /// A connection was deleted.
    ConnectionRemoved {
        /// Connection identifier
        connection: String,
    },
    /// A request completed successfully (possibly from cache).
    RequestSucceeded {
        /// Connection identifier
        connection: String,
        /// Logical endpoint name
        endpoint: String,
        /// Upstream status code
        status: u16,
        /// Whether the response was served from cache
        cached: bool,
        /// Transport attempts made (0 for a cache hit)
        attempts: u32,
        /// Wall-clock duration of the logical request
        duration: Duration,
    },
    /// A request failed after exhausting its local handling.
    RequestFailed {
        /// Connection identifier
        connection: String,
        /// Logical endpoint name
        endpoint: String,
        /// Rendered error
        error: String,
    },
    /// A health-check probe completed.
    HealthChecked {
        /// Connection identifier
        connection: String,
        /// Whether the probe succeeded
        healthy: bool,
    },
}

impl GatewayEvent {
    /// The connection this event concerns.
    #[must_use]
    pub fn connection(&self) -> &str {
        match self {
            Self::ConnectionRegistered { connection }
            | Self::ConnectionUpdated { connection }
            | Self::ConnectionRemoved { connection }
            | Self::RequestSucceeded { connection, .. }
            | Self::RequestFailed { connection, .. }
            | Self::HealthChecked { connection, .. } => connection,
        }
    }
}

/// Callback invoked synchronously for every emitted event.
pub type EventHandler = Arc<dyn Fn(&GatewayEvent) + Send + Sync>;
