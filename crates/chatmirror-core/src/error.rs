//! Error types shared by the relay and every endpoint adapter.
//!
//! The taxonomy follows the lifecycle of a relay:
//!
//! - [`ConnectionError`]: an endpoint could not establish its backend session.
//! - [`SendError`]: one outbound message could not be delivered.
//! - [`DisconnectError`]: an endpoint failed while releasing its resources.
//! - [`StartupError`] / [`ShutdownError`]: what the [`Relay`](crate::Relay)
//!   surfaces from `start()` and `stop()`.

use std::fmt;

use thiserror::Error;

use crate::message::EndpointId;

// =============================================================================
// Endpoint Errors
// =============================================================================

/// Errors raised while an endpoint establishes its backend session.
#[derive(Debug, Clone, Error)]
pub enum ConnectionError {
    /// The backend rejected the supplied credentials.
    #[error("authentication failed: {reason}")]
    Authentication {
        /// Reason reported by the backend.
        reason: String,
    },

    /// The backend could not be reached.
    #[error("network error: {reason}")]
    Network {
        /// Underlying failure.
        reason: String,
    },

    /// The handshake did not complete in time.
    #[error("handshake timed out after {secs}s")]
    Timeout {
        /// Elapsed handshake budget in seconds.
        secs: u64,
    },

    /// The backend answered with something we could not make sense of.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// The attempt was aborted by a concurrent disconnect.
    #[error("connection attempt cancelled")]
    Cancelled,
}

impl ConnectionError {
    /// Creates an authentication error.
    pub fn authentication(reason: impl Into<String>) -> Self {
        Self::Authentication {
            reason: reason.into(),
        }
    }

    /// Creates a network error.
    pub fn network(reason: impl Into<String>) -> Self {
        Self::Network {
            reason: reason.into(),
        }
    }
}

/// Whether a failed send may succeed if tried again.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendErrorKind {
    /// Network hiccup, rate limit, backend overload.
    Transient,
    /// The message itself is unacceptable or the endpoint is gone.
    Permanent,
}

impl fmt::Display for SendErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Transient => f.write_str("transient"),
            Self::Permanent => f.write_str("permanent"),
        }
    }
}

/// Failure to deliver one message to a backend.
#[derive(Debug, Clone, Error)]
#[error("{kind} send failure: {reason}")]
pub struct SendError {
    kind: SendErrorKind,
    reason: String,
}

impl SendError {
    /// Creates a retryable send error.
    pub fn transient(reason: impl Into<String>) -> Self {
        Self {
            kind: SendErrorKind::Transient,
            reason: reason.into(),
        }
    }

    /// Creates a non-retryable send error.
    pub fn permanent(reason: impl Into<String>) -> Self {
        Self {
            kind: SendErrorKind::Permanent,
            reason: reason.into(),
        }
    }

    /// Error for a send attempted while the endpoint is not connected.
    pub fn not_connected() -> Self {
        Self::permanent("endpoint is not connected")
    }

    /// Returns the failure kind.
    pub fn kind(&self) -> SendErrorKind {
        self.kind
    }

    /// Returns true if the send may be retried.
    pub fn is_transient(&self) -> bool {
        self.kind == SendErrorKind::Transient
    }

    /// Returns the human readable reason.
    pub fn reason(&self) -> &str {
        &self.reason
    }
}

/// Failure while an endpoint releases its backend resources.
#[derive(Debug, Clone, Error)]
#[error("disconnect failed: {0}")]
pub struct DisconnectError(pub String);

/// Failure to register an inbound message sink.
#[derive(Debug, Clone, Error)]
pub enum SubscribeError {
    /// A sink was already registered on this endpoint.
    #[error("a message sink is already registered")]
    AlreadySubscribed,
}

/// Failure to hand an inbound message to the relay.
#[derive(Debug, Clone, Error)]
pub enum DeliveryError {
    /// The relay stopped consuming this endpoint's messages.
    #[error("message sink closed")]
    Closed,

    /// The relay did not accept the message within the delivery timeout.
    #[error("message sink stalled for {0:?}, message dropped")]
    Stalled(std::time::Duration),
}

// =============================================================================
// Relay Errors
// =============================================================================

/// Errors returned by [`Relay::start`](crate::Relay::start).
#[derive(Debug, Error)]
pub enum StartupError {
    /// One of the endpoints failed to connect.
    #[error("endpoint {endpoint} ({backend}) failed to connect: {source}")]
    Connection {
        /// Which side failed.
        endpoint: EndpointId,
        /// Backend name reported by the endpoint.
        backend: String,
        /// The adapter's failure.
        #[source]
        source: ConnectionError,
    },

    /// One of the endpoints refused the message sink.
    #[error("endpoint {endpoint} rejected its message sink: {source}")]
    Subscribe {
        /// Which side failed.
        endpoint: EndpointId,
        /// The adapter's failure.
        #[source]
        source: SubscribeError,
    },

    /// `stop()` was called while the relay was starting.
    #[error("relay start cancelled")]
    Cancelled,

    /// `start()` was called on a relay that is not idle.
    #[error("relay cannot start from state {0}")]
    InvalidState(crate::relay::RelayState),
}

/// Aggregated disconnect failures collected by [`Relay::stop`](crate::Relay::stop).
#[derive(Debug, Error)]
pub struct ShutdownError {
    /// Every endpoint that failed to disconnect, with its error.
    pub failures: Vec<(EndpointId, DisconnectError)>,
}

impl fmt::Display for ShutdownError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} endpoint(s) failed to disconnect", self.failures.len())?;
        for (endpoint, error) in &self.failures {
            write!(f, "; {endpoint}: {error}")?;
        }
        Ok(())
    }
}

// =============================================================================
// Result Type Aliases
// =============================================================================

/// Result type for `ChatEndpoint::connect`.
pub type ConnectResult<T> = Result<T, ConnectionError>;

/// Result type for `ChatEndpoint::send`.
pub type SendResult<T> = Result<T, SendError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_send_error_kind() {
        assert!(SendError::transient("timeout").is_transient());
        assert!(!SendError::permanent("too long").is_transient());
        assert_eq!(
            SendError::permanent("too long").to_string(),
            "permanent send failure: too long"
        );
    }

    #[test]
    fn test_shutdown_error_lists_every_failure() {
        let err = ShutdownError {
            failures: vec![
                (EndpointId::A, DisconnectError("socket reset".into())),
                (EndpointId::B, DisconnectError("http 500".into())),
            ],
        };
        let text = err.to_string();
        assert!(text.starts_with("2 endpoint(s)"));
        assert!(text.contains("A: disconnect failed: socket reset"));
        assert!(text.contains("B: disconnect failed: http 500"));
    }
}
