//! Transport error types.

use thiserror::Error;

/// Errors raised while opening or using a connection.
#[derive(Debug, Error)]
pub enum TransportError {
    /// The hostname could not be turned into a connectable URL.
    #[error("invalid endpoint '{target}': {reason}")]
    InvalidEndpoint {
        /// Hostname or URL as given.
        target: String,
        /// Why it was rejected.
        reason: String,
    },

    /// The remote refused or could not be reached.
    #[error("connect to {target} failed: {reason}")]
    Connect {
        /// URL or hostname that was dialed.
        target: String,
        /// Underlying failure.
        reason: String,
    },

    /// The connect attempt did not finish in time.
    #[error("connect to {target} timed out after {timeout_ms}ms")]
    Timeout {
        /// URL or hostname that was dialed.
        target: String,
        /// How long we waited.
        timeout_ms: u64,
    },

    /// The connection is no longer open.
    #[error("connection closed")]
    Closed,
}

impl TransportError {
    /// Whether a later attempt may succeed without a config change.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Connect { .. } | Self::Timeout { .. } | Self::Closed)
    }

    /// Short classification string for logging.
    pub fn category(&self) -> &'static str {
        match self {
            Self::InvalidEndpoint { .. } => "invalid_endpoint",
            Self::Connect { .. } => "connect",
            Self::Timeout { .. } => "timeout",
            Self::Closed => "closed",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn connect_errors_are_retryable() {
        let err = TransportError::Connect {
            target: "wss://h/websocket".into(),
            reason: "refused".into(),
        };
        assert!(err.is_retryable());
        assert_eq!(err.category(), "connect");
        assert_eq!(err.to_string(), "connect to wss://h/websocket failed: refused");
    }

    #[test]
    fn invalid_endpoint_is_not_retryable() {
        let err = TransportError::InvalidEndpoint {
            target: String::new(),
            reason: "empty hostname".into(),
        };
        assert!(!err.is_retryable());
        assert_eq!(err.category(), "invalid_endpoint");
    }

    #[test]
    fn timeout_display() {
        let err = TransportError::Timeout {
            target: "h".into(),
            timeout_ms: 250,
        };
        assert_eq!(err.to_string(), "connect to h timed out after 250ms");
    }
}
