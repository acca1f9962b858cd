//! Error types for the toolkit and caller clients.

use std::path::PathBuf;
use std::time::Duration;

use atp_transport::TransportError;
use thiserror::Error;

/// A specialized `Result` type for client operations.
pub type Result<T> = std::result::Result<T, AtpError>;

/// Errors surfaced by the client.
///
/// Failures local to one inbound invocation or one outbound call are reported
/// only to that call's originator. Connection-level failures are also recorded
/// on the lifecycle manager.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum AtpError {
    /// The transport binding failed.
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// The handshake was rejected or did not complete in time.
    #[error("Authentication failed: {0}")]
    Authentication(String),

    /// No correlated response arrived before the deadline.
    #[error("No response to request {request_id} within {timeout:?}")]
    CorrelationTimeout {
        /// Id of the abandoned request.
        request_id: String,
        /// The deadline that elapsed.
        timeout: Duration,
    },

    /// An id is already awaiting a response.
    #[error("Request id already pending: {0}")]
    DuplicateRequest(String),

    /// No tool is registered under the name.
    #[error("Tool not found: {0}")]
    ToolNotFound(String),

    /// No live session exists under the id.
    #[error("Session not found: {0}")]
    SessionNotFound(String),

    /// User tool code returned an error or panicked.
    #[error("Tool '{tool}' failed: {message}")]
    ToolExecution {
        /// Tool that failed.
        tool: String,
        /// Failure description.
        message: String,
    },

    /// The tool requires an auth token and none was supplied.
    #[error("Tool '{0}' requires an auth token")]
    MissingAuthToken(String),

    /// The invocation did not satisfy the tool's declared parameters.
    #[error("Invalid arguments for '{tool}': {message}")]
    InvalidArguments {
        /// Tool that was invoked.
        tool: String,
        /// What was wrong.
        message: String,
    },

    /// Registering with the remote server failed. The tool stays usable locally.
    #[error("Registration of '{tool}' failed: {message}")]
    Registration {
        /// Tool being registered.
        tool: String,
        /// Failure description.
        message: String,
    },

    /// The tool definition itself is invalid.
    #[error("Invalid tool definition '{tool}': {message}")]
    InvalidRegistration {
        /// Tool being registered.
        tool: String,
        /// What was wrong.
        message: String,
    },

    /// A provider name with no known schema.
    #[error("Unknown provider: {0}")]
    UnknownProvider(String),

    /// Invalid client configuration.
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// An HTTP exchange with the server failed.
    #[error("HTTP error: {0}")]
    Http(String),

    /// A payload could not be encoded or decoded.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// The client is not running or was stopped while the call was in flight.
    #[error("Client is not running")]
    NotRunning,
}

impl AtpError {
    /// Create a tool execution error.
    pub fn tool_execution(tool: impl Into<String>, message: impl Into<String>) -> Self {
        Self::ToolExecution {
            tool: tool.into(),
            message: message.into(),
        }
    }

    /// Create a registration error.
    pub fn registration(tool: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Registration {
            tool: tool.into(),
            message: message.into(),
        }
    }

    /// Create an invalid registration error.
    pub fn invalid_registration(tool: impl Into<String>, message: impl Into<String>) -> Self {
        Self::InvalidRegistration {
            tool: tool.into(),
            message: message.into(),
        }
    }

    /// Create an invalid arguments error.
    pub fn invalid_arguments(tool: impl Into<String>, message: impl Into<String>) -> Self {
        Self::InvalidArguments {
            tool: tool.into(),
            message: message.into(),
        }
    }

    /// Whether this error is a timeout of any kind.
    pub fn is_timeout(&self) -> bool {
        matches!(
            self,
            Self::CorrelationTimeout { .. } | Self::Transport(TransportError::Timeout)
        )
    }

    /// Whether retrying on a fresh connection could succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Transport(e) => e.is_retryable(),
            Self::CorrelationTimeout { .. } | Self::Http(_) | Self::NotRunning => true,
            _ => false,
        }
    }
}

impl From<reqwest::Error> for AtpError {
    fn from(err: reqwest::Error) -> Self {
        Self::Http(err.to_string())
    }
}

/// Errors loading a configuration file.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Config file not found
    #[error("Configuration file not found: {0}")]
    FileNotFound(PathBuf),

    /// Unsupported file format
    #[error("Unsupported configuration file format. Use .toml, .yaml, .yml, or .json")]
    UnsupportedFormat,

    /// Configuration parsing error
    #[error("Failed to parse configuration: {0}")]
    Parse(#[from] config::ConfigError),
}

impl From<ConfigError> for AtpError {
    fn from(err: ConfigError) -> Self {
        Self::Configuration(err.to_string())
    }
}
