//! Transport error types.

use thiserror::Error;

/// A specialized `Result` type for transport operations.
pub type TransportResult<T> = std::result::Result<T, TransportError>;

/// Represents errors that can occur during transport operations.
#[derive(Error, Debug, Clone)]
#[non_exhaustive]
pub enum TransportError {
    /// Failed to establish a connection.
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    /// An established connection was lost.
    #[error("Connection lost: {0}")]
    ConnectionLost(String),

    /// The binding is closed or was never opened.
    #[error("Transport not connected")]
    NotConnected,

    /// Failed to send a message.
    #[error("Send failed: {0}")]
    SendFailed(String),

    /// Failed to receive a message.
    #[error("Receive failed: {0}")]
    ReceiveFailed(String),

    /// Failed to serialize or deserialize a message.
    #[error("Serialization failed: {0}")]
    SerializationFailed(String),

    /// The peer sent something that is not a valid protocol message.
    #[error("Protocol error: {0}")]
    ProtocolError(String),

    /// The operation did not complete within the specified timeout.
    #[error("Operation timed out")]
    Timeout,

    /// An HTTP exchange failed or returned a non-success status.
    #[error("HTTP error: {0}")]
    Http(String),

    /// The requested operation is not supported by this binding.
    #[error("Transport not available: {0}")]
    NotAvailable(String),

    /// The transport was configured with invalid parameters.
    #[error("Configuration error: {0}")]
    ConfigurationError(String),
}

impl TransportError {
    /// Whether the failure is worth retrying on a fresh connection or the next cycle.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::ConnectionFailed(_)
                | Self::ConnectionLost(_)
                | Self::NotConnected
                | Self::SendFailed(_)
                | Self::ReceiveFailed(_)
                | Self::Timeout
                | Self::Http(_)
        )
    }
}

impl From<serde_json::Error> for TransportError {
    fn from(err: serde_json::Error) -> Self {
        Self::SerializationFailed(err.to_string())
    }
}

impl From<reqwest::Error> for TransportError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            Self::Timeout
        } else if err.is_connect() {
            Self::ConnectionFailed(err.to_string())
        } else {
            Self::Http(err.to_string())
        }
    }
}

impl From<tokio_tungstenite::tungstenite::Error> for TransportError {
    fn from(err: tokio_tungstenite::tungstenite::Error) -> Self {
        use tokio_tungstenite::tungstenite::Error as WsError;

        match err {
            WsError::ConnectionClosed | WsError::AlreadyClosed => {
                Self::ConnectionLost(err.to_string())
            }
            WsError::Io(e) => Self::ConnectionLost(e.to_string()),
            WsError::Url(e) => Self::ConfigurationError(e.to_string()),
            other => Self::SendFailed(other.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_classification() {
        assert!(TransportError::ConnectionLost("reset".into()).is_retryable());
        assert!(TransportError::NotConnected.is_retryable());
        assert!(TransportError::Timeout.is_retryable());
        assert!(!TransportError::ProtocolError("bad tag".into()).is_retryable());
        assert!(!TransportError::ConfigurationError("no url".into()).is_retryable());
    }

    #[test]
    fn test_serde_error_conversion() {
        let err = serde_json::from_str::<serde_json::Value>("{not json").unwrap_err();
        let transport_err: TransportError = err.into();
        assert!(matches!(
            transport_err,
            TransportError::SerializationFailed(_)
        ));
    }
}
