//! Configuration for the duplex websocket binding.

use std::time::Duration;

use crate::error::{TransportError, TransportResult};
use crate::types::Credentials;

/// Placeholder substituted with the API key when the binding is opened.
pub const API_KEY_PLACEHOLDER: &str = "{api_key}";

/// Path of the toolkit-side websocket endpoint.
pub const TOOLKIT_PATH: &str = "/ws/v1/atp/toolkit-client/{api_key}/";

/// Path of the caller-side websocket endpoint.
pub const LLM_CLIENT_PATH: &str = "/ws/v1/atp/llm-client/{api_key}/";

/// Configuration for [`super::WebSocketTransport`].
#[derive(Clone, Debug)]
pub struct WebSocketConfig {
    /// Endpoint URL, possibly containing [`API_KEY_PLACEHOLDER`].
    pub url_template: String,

    /// Interval between keepalive pings.
    pub keep_alive_interval: Duration,

    /// Bound on the websocket upgrade.
    pub connect_timeout: Duration,
}

impl Default for WebSocketConfig {
    fn default() -> Self {
        Self {
            url_template: String::new(),
            keep_alive_interval: Duration::from_secs(30),
            connect_timeout: Duration::from_secs(10),
        }
    }
}

impl WebSocketConfig {
    /// Configuration with an explicit URL template.
    pub fn new(url_template: impl Into<String>) -> Self {
        Self {
            url_template: url_template.into(),
            ..Self::default()
        }
    }

    /// Toolkit endpoint derived from an `http(s)` base URL.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::ConfigurationError`] if the base URL is not `http`, `https`,
    /// `ws` or `wss`.
    pub fn toolkit(base_url: &str) -> TransportResult<Self> {
        Ok(Self::new(format!("{}{TOOLKIT_PATH}", websocket_base(base_url)?)))
    }

    /// Caller endpoint derived from an `http(s)` base URL.
    ///
    /// # Errors
    ///
    /// See [`WebSocketConfig::toolkit`].
    pub fn llm_client(base_url: &str) -> TransportResult<Self> {
        Ok(Self::new(format!("{}{LLM_CLIENT_PATH}", websocket_base(base_url)?)))
    }

    /// Set keep-alive interval
    pub fn with_keep_alive_interval(mut self, interval: Duration) -> Self {
        self.keep_alive_interval = interval;
        self
    }

    /// Set connect timeout
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Resolve the URL for a set of credentials.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::ConfigurationError`] if the template is empty or the
    /// resulting URL does not parse.
    pub fn endpoint_for(&self, credentials: &Credentials) -> TransportResult<String> {
        if self.url_template.is_empty() {
            return Err(TransportError::ConfigurationError(
                "No websocket URL configured".to_string(),
            ));
        }
        let resolved = self
            .url_template
            .replace(API_KEY_PLACEHOLDER, &credentials.api_key);
        url::Url::parse(&resolved)
            .map_err(|e| TransportError::ConfigurationError(format!("invalid websocket URL: {e}")))?;
        Ok(resolved)
    }
}

/// Map an HTTP base URL onto its websocket equivalent, without a trailing slash.
fn websocket_base(base_url: &str) -> TransportResult<String> {
    let trimmed = base_url.trim_end_matches('/');
    let mapped = if let Some(rest) = trimmed.strip_prefix("https://") {
        format!("wss://{rest}")
    } else if let Some(rest) = trimmed.strip_prefix("http://") {
        format!("ws://{rest}")
    } else if trimmed.starts_with("wss://") || trimmed.starts_with("ws://") {
        trimmed.to_string()
    } else {
        return Err(TransportError::ConfigurationError(format!(
            "unsupported base URL scheme: {base_url}"
        )));
    };
    Ok(mapped)
}
