//! Transport error types.

use thiserror::Error;

/// Errors that can occur in transport operations.
#[derive(Debug, Clone, Error)]
pub enum TransportError {
    /// Connection failed.
    #[error("connection failed: {url} - {reason}")]
    ConnectionFailed {
        /// The URL that failed to connect.
        url: String,
        /// Reason for failure.
        reason: String,
    },

    /// Connection closed.
    #[error("connection closed: {reason}")]
    ConnectionClosed {
        /// Reason for closure.
        reason: String,
    },

    /// Message send failed.
    #[error("failed to send message: {0}")]
    SendFailed(String),

    /// The server answered with a non-success HTTP status.
    #[error("HTTP {status}: {body}")]
    Http {
        /// Status code.
        status: u16,
        /// Response body, possibly truncated.
        body: String,
    },

    /// The operation did not complete in time.
    #[error("operation timed out")]
    Timeout,

    /// A response could not be decoded.
    #[error("failed to decode response: {0}")]
    Decode(String),

    /// The operation was aborted by shutdown.
    #[error("operation cancelled")]
    Cancelled,

    /// Invalid configuration.
    #[error("invalid transport configuration: {0}")]
    InvalidConfig(String),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(String),
}

impl TransportError {
    /// Returns true if retrying the same operation may succeed.
    ///
    /// Rate limiting (429) and server errors (5xx) are transient, any other
    /// HTTP status is not.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::ConnectionFailed { .. }
            | Self::ConnectionClosed { .. }
            | Self::SendFailed(_)
            | Self::Timeout
            | Self::Io(_) => true,
            Self::Http { status, .. } => *status == 429 || *status >= 500,
            Self::Decode(_) | Self::Cancelled | Self::InvalidConfig(_) => false,
        }
    }

    /// Returns the HTTP status, if this is an HTTP error.
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Http { status, .. } => Some(*status),
            _ => None,
        }
    }
}

impl From<std::io::Error> for TransportError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err.to_string())
    }
}

impl From<serde_json::Error> for TransportError {
    fn from(err: serde_json::Error) -> Self {
        Self::Decode(err.to_string())
    }
}

/// Result type for transport operations.
pub type TransportResult<T> = Result<T, TransportError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_http_status_classification() {
        let status = |status| TransportError::Http {
            status,
            body: String::new(),
        };
        assert!(status(429).is_transient());
        assert!(status(503).is_transient());
        assert!(!status(400).is_transient());
        assert!(!status(403).is_transient());
        assert_eq!(status(404).status(), Some(404));
    }

    #[test]
    fn test_network_errors_are_transient() {
        assert!(TransportError::Timeout.is_transient());
        assert!(TransportError::Io("reset".into()).is_transient());
        assert!(!TransportError::Cancelled.is_transient());
        assert!(!TransportError::Decode("eof".into()).is_transient());
    }
}
