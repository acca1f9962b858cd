//! Core transport types.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Enumerates the transport bindings a client can run on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransportType {
    /// Persistent websocket connection with server-initiated push.
    #[default]
    WebSocket,
    /// Client-initiated HTTP inbox fetch and respond cycle.
    Polling,
}

impl fmt::Display for TransportType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::WebSocket => write!(f, "websocket"),
            Self::Polling => write!(f, "polling"),
        }
    }
}

/// Credentials presented when a binding is opened.
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    /// Toolkit or client API key.
    pub api_key: String,
}

impl Credentials {
    /// Create credentials from an API key.
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
        }
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("api_key", &"<redacted>")
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_credentials_debug_redacts_key() {
        let creds = Credentials::new("sk-secret");
        let rendered = format!("{creds:?}");
        assert!(!rendered.contains("sk-secret"));
        assert!(rendered.contains("redacted"));
    }

    #[test]
    fn test_transport_type_display() {
        assert_eq!(TransportType::WebSocket.to_string(), "websocket");
        assert_eq!(TransportType::Polling.to_string(), "polling");
    }
}
