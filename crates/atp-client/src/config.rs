//! Client configuration.
//!
//! [`ToolkitConfig`] configures a toolkit that serves tools, [`LlmClientConfig`]
//! a caller that invokes tools on remote toolkits. Both load from TOML, YAML or
//! JSON files with environment overrides:
//!
//! ```rust,no_run
//! use atp_client::ToolkitConfig;
//!
//! // ATP_IDLE_TIMEOUT=60 or ATP_RECONNECT__INITIAL_DELAY=2.5 override the file.
//! let config = ToolkitConfig::from_file("toolkit.toml")?;
//! # Ok::<(), atp_client::ConfigError>(())
//! ```

use std::path::Path;
use std::time::Duration;

use atp_transport::{PollingConfig, TransportResult, TransportType, WebSocketConfig};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_with::{DurationSecondsWithFrac, serde_as};

use crate::error::{AtpError, ConfigError, Result};

/// Default server base URL.
pub const DEFAULT_BASE_URL: &str = "https://chatatp-backend.onrender.com";

/// Environment prefix used by [`ToolkitConfig::from_file`] and [`LlmClientConfig::from_file`].
pub const ENV_PREFIX: &str = "ATP";

/// Reconnect policy applied after a connection is lost.
#[serde_as]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReconnectConfig {
    /// Whether to reconnect at all.
    pub enabled: bool,
    /// Delay before the first reconnect attempt.
    #[serde_as(as = "DurationSecondsWithFrac<f64>")]
    pub initial_delay: Duration,
    /// Upper bound for the delay when backing off.
    #[serde_as(as = "DurationSecondsWithFrac<f64>")]
    pub max_delay: Duration,
    /// Multiplier per attempt. `1.0` keeps the delay fixed.
    pub backoff_factor: f64,
    /// Attempts before giving up; `None` retries forever.
    pub max_retries: Option<u32>,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            initial_delay: Duration::from_secs(5),
            max_delay: Duration::from_secs(60),
            backoff_factor: 1.0,
            max_retries: None,
        }
    }
}

impl ReconnectConfig {
    /// A fixed delay, retried forever.
    pub fn fixed(delay: Duration) -> Self {
        Self {
            initial_delay: delay,
            max_delay: delay,
            ..Self::default()
        }
    }

    /// Reconnect disabled.
    pub fn disabled() -> Self {
        Self {
            enabled: false,
            ..Self::default()
        }
    }

    /// Delay before attempt `attempt` (zero-based).
    ///
    /// Exponential policies get up to 10% jitter below the computed delay.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        if self.backoff_factor.is_nan() || self.backoff_factor <= 1.0 {
            return self.initial_delay;
        }
        let exponent = attempt.min(32) as i32;
        let base = self.initial_delay.as_secs_f64() * self.backoff_factor.powi(exponent);
        let capped = base.min(self.max_delay.as_secs_f64());
        if !capped.is_finite() {
            return self.max_delay;
        }
        let jitter = capped * 0.1 * fastrand::f64();
        Duration::try_from_secs_f64((capped - jitter).max(0.0))
            .map_or(self.max_delay, |delay| delay.min(self.max_delay))
    }

    /// Whether another attempt is allowed after `attempts` failures.
    pub fn allows(&self, attempts: u32) -> bool {
        self.enabled && self.max_retries.is_none_or(|max| attempts < max)
    }
}

/// Settings the lifecycle manager needs, independent of client kind.
#[derive(Debug, Clone)]
pub struct ConnectionConfig {
    /// Key presented in the handshake.
    pub api_key: String,
    /// Bound on the wait for handshake confirmation.
    pub auth_timeout: Duration,
    /// Reconnect policy.
    pub reconnect: ReconnectConfig,
    /// Stop after this long without inbound traffic; `None` disables.
    pub idle_timeout: Option<Duration>,
    /// How often the idle watcher wakes.
    pub idle_check_interval: Duration,
    /// Capacity of the transport event channel.
    pub event_buffer: usize,
}

impl ConnectionConfig {
    /// Defaults for an API key.
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            auth_timeout: Duration::from_secs(10),
            reconnect: ReconnectConfig::default(),
            idle_timeout: Some(Duration::from_secs(300)),
            idle_check_interval: Duration::from_secs(10),
            event_buffer: 64,
        }
    }

    /// Interval actually used by the idle watcher: never coarser than a quarter
    /// of the idle bound.
    pub fn effective_idle_check(&self) -> Duration {
        let interval = match self.idle_timeout {
            Some(idle) => self.idle_check_interval.min(idle / 4),
            None => self.idle_check_interval,
        };
        interval.max(Duration::from_millis(10))
    }
}

/// Configuration of a toolkit client.
#[serde_as]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ToolkitConfig {
    /// Toolkit API key.
    pub api_key: String,
    /// Application identity the tools register under.
    pub app_name: String,
    /// Server base URL.
    pub base_url: String,
    /// Binding used to receive invocations.
    pub transport: TransportType,
    /// Websocket URL template overriding the one derived from `base_url`.
    pub websocket_url: Option<String>,
    /// Public URL of locally exposed tool routes, sent with registrations.
    pub endpoint_url: Option<String>,
    /// Stop after this long without inbound traffic.
    #[serde_as(as = "Option<DurationSecondsWithFrac<f64>>")]
    pub idle_timeout: Option<Duration>,
    /// How often the idle watcher wakes.
    #[serde_as(as = "DurationSecondsWithFrac<f64>")]
    pub idle_check_interval: Duration,
    /// Inbox fetch interval for the polling binding.
    #[serde_as(as = "DurationSecondsWithFrac<f64>")]
    pub poll_interval: Duration,
    /// Websocket keepalive ping interval.
    #[serde_as(as = "DurationSecondsWithFrac<f64>")]
    pub keep_alive_interval: Duration,
    /// Bound on the handshake.
    #[serde_as(as = "DurationSecondsWithFrac<f64>")]
    pub auth_timeout: Duration,
    /// Bound on opening the binding.
    #[serde_as(as = "DurationSecondsWithFrac<f64>")]
    pub connect_timeout: Duration,
    /// Reconnect policy.
    pub reconnect: ReconnectConfig,
    /// Interactive sessions idle this long are evicted.
    #[serde_as(as = "DurationSecondsWithFrac<f64>")]
    pub session_idle_timeout: Duration,
    /// Timeout for registration and reporting HTTP calls.
    #[serde_as(as = "DurationSecondsWithFrac<f64>")]
    pub request_timeout: Duration,
    /// Bound on the sample invocation made at registration.
    #[serde_as(as = "DurationSecondsWithFrac<f64>")]
    pub sample_timeout: Duration,
    /// Report each execution result to the server after replying.
    pub report_results: bool,
    /// Source watcher polling interval.
    #[serde_as(as = "DurationSecondsWithFrac<f64>")]
    pub watch_interval: Duration,
}

impl Default for ToolkitConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            app_name: String::new(),
            base_url: DEFAULT_BASE_URL.to_string(),
            transport: TransportType::WebSocket,
            websocket_url: None,
            endpoint_url: None,
            idle_timeout: Some(Duration::from_secs(300)),
            idle_check_interval: Duration::from_secs(10),
            poll_interval: Duration::from_secs(30),
            keep_alive_interval: Duration::from_secs(30),
            auth_timeout: Duration::from_secs(10),
            connect_timeout: Duration::from_secs(10),
            reconnect: ReconnectConfig::default(),
            session_idle_timeout: Duration::from_secs(1800),
            request_timeout: Duration::from_secs(30),
            sample_timeout: Duration::from_secs(5),
            report_results: false,
            watch_interval: Duration::from_secs(1),
        }
    }
}

impl ToolkitConfig {
    /// Configuration for an API key and application name, with defaults.
    pub fn new(api_key: impl Into<String>, app_name: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            app_name: app_name.into(),
            ..Self::default()
        }
    }

    /// Load from a file, with `ATP_` environment overrides.
    ///
    /// # Errors
    ///
    /// Returns an error if the file is missing, has an unsupported extension, or
    /// does not describe a valid configuration.
    pub fn from_file(path: impl AsRef<Path>) -> std::result::Result<Self, ConfigError> {
        load_file(path.as_ref(), ENV_PREFIX)
    }

    /// Load from a file with a custom environment prefix.
    ///
    /// # Errors
    ///
    /// See [`ToolkitConfig::from_file`].
    pub fn from_file_with_prefix(
        path: impl AsRef<Path>,
        env_prefix: &str,
    ) -> std::result::Result<Self, ConfigError> {
        load_file(path.as_ref(), env_prefix)
    }

    /// Set the server base URL
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    /// Set the binding
    pub fn with_transport(mut self, transport: TransportType) -> Self {
        self.transport = transport;
        self
    }

    /// Override the websocket URL template (must contain `{api_key}`)
    pub fn with_websocket_url(mut self, url: impl Into<String>) -> Self {
        self.websocket_url = Some(url.into());
        self
    }

    /// Set the public tool endpoint URL
    pub fn with_endpoint_url(mut self, url: impl Into<String>) -> Self {
        self.endpoint_url = Some(url.into());
        self
    }

    /// Set or disable the idle timeout
    pub fn with_idle_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.idle_timeout = timeout;
        self
    }

    /// Set the idle watcher interval
    pub fn with_idle_check_interval(mut self, interval: Duration) -> Self {
        self.idle_check_interval = interval;
        self
    }

    /// Set the inbox fetch interval
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Set the keepalive interval
    pub fn with_keep_alive_interval(mut self, interval: Duration) -> Self {
        self.keep_alive_interval = interval;
        self
    }

    /// Set the handshake bound
    pub fn with_auth_timeout(mut self, timeout: Duration) -> Self {
        self.auth_timeout = timeout;
        self
    }

    /// Set the reconnect policy
    pub fn with_reconnect(mut self, reconnect: ReconnectConfig) -> Self {
        self.reconnect = reconnect;
        self
    }

    /// Set the session idle bound
    pub fn with_session_idle_timeout(mut self, timeout: Duration) -> Self {
        self.session_idle_timeout = timeout;
        self
    }

    /// Set the HTTP request timeout
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// Enable or disable result reporting
    pub fn with_report_results(mut self, enabled: bool) -> Self {
        self.report_results = enabled;
        self
    }

    /// Set the source watcher interval
    pub fn with_watch_interval(mut self, interval: Duration) -> Self {
        self.watch_interval = interval;
        self
    }

    /// Check required fields.
    ///
    /// # Errors
    ///
    /// Returns [`AtpError::Configuration`] naming the first missing field.
    pub fn validate(&self) -> Result<()> {
        require("api_key", &self.api_key)?;
        require("app_name", &self.app_name)?;
        require("base_url", &self.base_url)
    }

    /// Lifecycle settings.
    pub fn connection(&self) -> ConnectionConfig {
        ConnectionConfig {
            api_key: self.api_key.clone(),
            auth_timeout: self.auth_timeout,
            reconnect: self.reconnect.clone(),
            idle_timeout: self.idle_timeout,
            idle_check_interval: self.idle_check_interval,
            event_buffer: 64,
        }
    }

    /// Websocket binding settings.
    ///
    /// # Errors
    ///
    /// Returns an error if the base URL has no http(s) or ws(s) scheme.
    pub fn websocket(&self) -> TransportResult<WebSocketConfig> {
        let config = match &self.websocket_url {
            Some(template) => WebSocketConfig::new(template.clone()),
            None => WebSocketConfig::toolkit(&self.base_url)?,
        };
        Ok(config
            .with_keep_alive_interval(self.keep_alive_interval)
            .with_connect_timeout(self.connect_timeout))
    }

    /// Polling binding settings.
    pub fn polling(&self) -> PollingConfig {
        PollingConfig::new(self.base_url.clone())
            .with_poll_interval(self.poll_interval)
            .with_request_timeout(self.request_timeout)
    }
}

/// How the caller client reaches the server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CallerTransport {
    /// Correlated requests over a persistent websocket.
    #[default]
    WebSocket,
    /// One HTTP exchange per request.
    Http,
}

/// Configuration of the caller client.
#[serde_as]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LlmClientConfig {
    /// Caller API key.
    pub api_key: String,
    /// Server base URL.
    pub base_url: String,
    /// How requests are carried.
    pub transport: CallerTransport,
    /// Websocket URL template overriding the one derived from `base_url`.
    pub websocket_url: Option<String>,
    /// Bound on toolkit context fetches.
    #[serde_as(as = "DurationSecondsWithFrac<f64>")]
    pub context_timeout: Duration,
    /// Bound on each tool call.
    #[serde_as(as = "DurationSecondsWithFrac<f64>")]
    pub call_timeout: Duration,
    /// Bound on the handshake.
    #[serde_as(as = "DurationSecondsWithFrac<f64>")]
    pub auth_timeout: Duration,
    /// Bound on opening the binding.
    #[serde_as(as = "DurationSecondsWithFrac<f64>")]
    pub connect_timeout: Duration,
    /// Websocket keepalive ping interval.
    #[serde_as(as = "DurationSecondsWithFrac<f64>")]
    pub keep_alive_interval: Duration,
    /// Reconnect policy.
    pub reconnect: ReconnectConfig,
    /// Stop after this long without inbound traffic.
    #[serde_as(as = "Option<DurationSecondsWithFrac<f64>>")]
    pub idle_timeout: Option<Duration>,
}

impl Default for LlmClientConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            base_url: DEFAULT_BASE_URL.to_string(),
            transport: CallerTransport::WebSocket,
            websocket_url: None,
            context_timeout: Duration::from_secs(30),
            call_timeout: Duration::from_secs(120),
            auth_timeout: Duration::from_secs(10),
            connect_timeout: Duration::from_secs(10),
            keep_alive_interval: Duration::from_secs(30),
            reconnect: ReconnectConfig::default(),
            idle_timeout: Some(Duration::from_secs(300)),
        }
    }
}

impl LlmClientConfig {
    /// Configuration for an API key, with defaults.
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            ..Self::default()
        }
    }

    /// Load from a file, with `ATP_` environment overrides.
    ///
    /// # Errors
    ///
    /// See [`ToolkitConfig::from_file`].
    pub fn from_file(path: impl AsRef<Path>) -> std::result::Result<Self, ConfigError> {
        load_file(path.as_ref(), ENV_PREFIX)
    }

    /// Load from a file with a custom environment prefix.
    ///
    /// # Errors
    ///
    /// See [`ToolkitConfig::from_file`].
    pub fn from_file_with_prefix(
        path: impl AsRef<Path>,
        env_prefix: &str,
    ) -> std::result::Result<Self, ConfigError> {
        load_file(path.as_ref(), env_prefix)
    }

    /// Set the server base URL
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    /// Set how requests are carried
    pub fn with_transport(mut self, transport: CallerTransport) -> Self {
        self.transport = transport;
        self
    }

    /// Override the websocket URL template (must contain `{api_key}`)
    pub fn with_websocket_url(mut self, url: impl Into<String>) -> Self {
        self.websocket_url = Some(url.into());
        self
    }

    /// Set the context fetch bound
    pub fn with_context_timeout(mut self, timeout: Duration) -> Self {
        self.context_timeout = timeout;
        self
    }

    /// Set the per-call bound
    pub fn with_call_timeout(mut self, timeout: Duration) -> Self {
        self.call_timeout = timeout;
        self
    }

    /// Set the handshake bound
    pub fn with_auth_timeout(mut self, timeout: Duration) -> Self {
        self.auth_timeout = timeout;
        self
    }

    /// Set the reconnect policy
    pub fn with_reconnect(mut self, reconnect: ReconnectConfig) -> Self {
        self.reconnect = reconnect;
        self
    }

    /// Set or disable the idle timeout
    pub fn with_idle_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.idle_timeout = timeout;
        self
    }

    /// Check required fields.
    ///
    /// # Errors
    ///
    /// Returns [`AtpError::Configuration`] naming the first missing field.
    pub fn validate(&self) -> Result<()> {
        require("api_key", &self.api_key)?;
        require("base_url", &self.base_url)
    }

    /// Lifecycle settings.
    pub fn connection(&self) -> ConnectionConfig {
        ConnectionConfig {
            auth_timeout: self.auth_timeout,
            reconnect: self.reconnect.clone(),
            idle_timeout: self.idle_timeout,
            ..ConnectionConfig::new(self.api_key.clone())
        }
    }

    /// Websocket binding settings.
    ///
    /// # Errors
    ///
    /// Returns an error if the base URL has no http(s) or ws(s) scheme.
    pub fn websocket(&self) -> TransportResult<WebSocketConfig> {
        let config = match &self.websocket_url {
            Some(template) => WebSocketConfig::new(template.clone()),
            None => WebSocketConfig::llm_client(&self.base_url)?,
        };
        Ok(config
            .with_keep_alive_interval(self.keep_alive_interval)
            .with_connect_timeout(self.connect_timeout))
    }

    /// URL of the HTTP processing endpoint.
    pub fn process_url(&self) -> String {
        format!(
            "{}/api/v1/atp/llm-client/process/",
            self.base_url.trim_end_matches('/')
        )
    }
}

fn require(field: &str, value: &str) -> Result<()> {
    if value.trim().is_empty() {
        return Err(AtpError::Configuration(format!("{field} must not be empty")));
    }
    Ok(())
}

fn load_file<T: DeserializeOwned>(path: &Path, env_prefix: &str) -> std::result::Result<T, ConfigError> {
    use config::{Config, Environment, File, FileFormat};

    if !path.exists() {
        return Err(ConfigError::FileNotFound(path.to_path_buf()));
    }

    let format = match path.extension().and_then(|s| s.to_str()) {
        Some("toml") => FileFormat::Toml,
        Some("yaml" | "yml") => FileFormat::Yaml,
        Some("json") => FileFormat::Json,
        _ => return Err(ConfigError::UnsupportedFormat),
    };
    let path = path.to_str().ok_or(ConfigError::UnsupportedFormat)?;

    let config = Config::builder()
        .add_source(File::new(path, format))
        // Environment variables override file settings, e.g. ATP_RECONNECT__INITIAL_DELAY.
        .add_source(
            Environment::with_prefix(env_prefix)
                .separator("__")
                .try_parsing(true),
        )
        .build()?;

    Ok(config.try_deserialize()?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::io::Write;

    #[test]
    fn test_toolkit_defaults() {
        let config = ToolkitConfig::new("key", "app");
        assert_eq!(config.base_url, DEFAULT_BASE_URL);
        assert_eq!(config.transport, TransportType::WebSocket);
        assert_eq!(config.idle_timeout, Some(Duration::from_secs(300)));
        assert_eq!(config.poll_interval, Duration::from_secs(30));
        assert_eq!(config.auth_timeout, Duration::from_secs(10));
        assert_eq!(config.keep_alive_interval, Duration::from_secs(30));
        assert_eq!(config.session_idle_timeout, Duration::from_secs(1800));
        assert_eq!(config.reconnect.delay_for(0), Duration::from_secs(5));
        assert_eq!(config.reconnect.delay_for(7), Duration::from_secs(5));
        assert!(config.reconnect.allows(1_000));
        config.validate().unwrap();
    }

    #[test]
    fn test_llm_defaults() {
        let config = LlmClientConfig::new("key");
        assert_eq!(config.context_timeout, Duration::from_secs(30));
        assert_eq!(config.call_timeout, Duration::from_secs(120));
        assert_eq!(
            config.process_url(),
            "https://chatatp-backend.onrender.com/api/v1/atp/llm-client/process/"
        );
        assert_eq!(
            config.websocket().unwrap().url_template,
            "wss://chatatp-backend.onrender.com/ws/v1/atp/llm-client/{api_key}/"
        );
    }

    #[test]
    fn test_validate_rejects_missing_fields() {
        let err = ToolkitConfig::new("", "app").validate().unwrap_err();
        assert_eq!(err.to_string(), "Configuration error: api_key must not be empty");
        assert!(ToolkitConfig::new("k", " ").validate().is_err());
    }

    #[test]
    fn test_exponential_backoff_is_capped() {
        let policy = ReconnectConfig {
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(8),
            backoff_factor: 2.0,
            max_retries: Some(3),
            ..ReconnectConfig::default()
        };
        let third = policy.delay_for(2);
        assert!(third <= Duration::from_secs(4) && third >= Duration::from_millis(3600));
        assert!(policy.delay_for(20) <= Duration::from_secs(8));
        assert!(policy.allows(2));
        assert!(!policy.allows(3));
        assert!(!ReconnectConfig::disabled().allows(0));
    }

    #[test]
    fn test_backoff_tolerates_degenerate_factors() {
        let policy = |backoff_factor: f64, max_delay: Duration| ReconnectConfig {
            initial_delay: Duration::from_secs(1),
            max_delay,
            backoff_factor,
            ..ReconnectConfig::default()
        };
        let bound = Duration::from_secs(30);
        for factor in [f64::NAN, -3.0, f64::NEG_INFINITY] {
            assert_eq!(policy(factor, bound).delay_for(5), Duration::from_secs(1));
        }
        for factor in [f64::INFINITY, f64::MAX, 1e300] {
            for attempt in [0, 1, 31, u32::MAX] {
                assert!(policy(factor, bound).delay_for(attempt) <= bound);
            }
        }
        assert!(policy(1e300, Duration::MAX).delay_for(3) > Duration::from_secs(1));
    }

    #[test]
    fn test_idle_check_never_coarser_than_quarter_bound() {
        let mut config = ConnectionConfig::new("k");
        config.idle_timeout = Some(Duration::from_secs(1));
        assert_eq!(config.effective_idle_check(), Duration::from_millis(250));
        config.idle_timeout = None;
        assert_eq!(config.effective_idle_check(), Duration::from_secs(10));
    }

    #[test]
    fn test_from_file_toml_with_fractional_seconds() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(
            file,
            r#"
api_key = "file-key"
app_name = "weather"
transport = "polling"
poll_interval = 2.5
idle_timeout = 60

[reconnect]
initial_delay = 0.5
"#
        )
        .unwrap();

        let config = ToolkitConfig::from_file_with_prefix(file.path(), "ATP_TEST_UNUSED").unwrap();
        assert_eq!(config.api_key, "file-key");
        assert_eq!(config.transport, TransportType::Polling);
        assert_eq!(config.poll_interval, Duration::from_millis(2500));
        assert_eq!(config.idle_timeout, Some(Duration::from_secs(60)));
        assert_eq!(config.reconnect.initial_delay, Duration::from_millis(500));
        assert_eq!(config.reconnect.backoff_factor, 1.0);
        assert_eq!(config.base_url, DEFAULT_BASE_URL);
    }

    #[test]
    fn test_from_file_errors() {
        assert!(matches!(
            ToolkitConfig::from_file("/nonexistent/atp.toml"),
            Err(ConfigError::FileNotFound(_))
        ));

        let file = tempfile::Builder::new().suffix(".ini").tempfile().unwrap();
        assert!(matches!(
            LlmClientConfig::from_file(file.path()),
            Err(ConfigError::UnsupportedFormat)
        ));
    }

    #[test]
    fn test_websocket_override() {
        let config = ToolkitConfig::new("k", "app")
            .with_websocket_url("ws://127.0.0.1:9000/ws/{api_key}/")
            .with_keep_alive_interval(Duration::from_secs(5));
        let ws = config.websocket().unwrap();
        assert_eq!(ws.url_template, "ws://127.0.0.1:9000/ws/{api_key}/");
        assert_eq!(ws.keep_alive_interval, Duration::from_secs(5));
    }
}
