//! Error types and handling for the replmock library

use thiserror::Error;

/// Result type alias for replmock operations
pub type Result<T> = std::result::Result<T, MockError>;

/// Main error type for the replmock library
#[derive(Error, Debug)]
pub enum MockError {
    /// I/O errors from network operations
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Listener or connection socket errors
    #[error("Socket error: {message}")]
    Socket {
        /// Error message describing the socket issue
        message: String,
    },

    /// Malformed or oversized wire message
    #[error("Protocol error: {message}")]
    Protocol {
        /// Reason why the message could not be decoded
        message: String,
    },

    /// Document encode/decode errors
    #[error("Document error: {0}")]
    Document(#[from] serde_json::Error),

    /// Bounded wait elapsed with no request available
    #[error("Operation timed out")]
    Timeout,

    /// Operation attempted in the wrong lifecycle state
    #[error("Invalid state: {message}")]
    State {
        /// Which contract the caller violated
        message: String,
    },
}

impl MockError {
    /// Create a new socket error
    pub fn socket(message: impl Into<String>) -> Self {
        Self::Socket {
            message: message.into(),
        }
    }

    /// Create a new protocol error
    pub fn protocol(message: impl Into<String>) -> Self {
        Self::Protocol {
            message: message.into(),
        }
    }

    /// Create a new invalid-state error
    pub fn state(message: impl Into<String>) -> Self {
        Self::State {
            message: message.into(),
        }
    }

    /// Check if this error is an expected, non-fatal outcome for a test
    /// (a bounded wait expiring is everyday test traffic, not a fault).
    pub fn is_recoverable(&self) -> bool {
        matches!(self, Self::Timeout)
    }

    /// Check if this error is related to network operations
    pub fn is_network_error(&self) -> bool {
        matches!(self, Self::Socket { .. } | Self::Io(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_creation() {
        let err = MockError::socket("bind failed");
        assert!(matches!(err, MockError::Socket { .. }));
        assert!(err.is_network_error());
        assert!(!err.is_recoverable());
    }

    #[test]
    fn test_error_classification() {
        assert!(MockError::Timeout.is_recoverable());
        assert!(!MockError::Timeout.is_network_error());

        let proto = MockError::protocol("short header");
        assert!(!proto.is_recoverable());
        assert!(!proto.is_network_error());
    }
}
