//! Configuration for the polling binding.

use std::time::Duration;

/// Configuration for [`super::PollingTransport`].
#[derive(Clone, Debug)]
pub struct PollingConfig {
    /// Server base URL, e.g. `https://chatatp-backend.onrender.com`.
    pub base_url: String,

    /// Interval between inbox fetches.
    pub poll_interval: Duration,

    /// Timeout applied to each HTTP exchange.
    pub request_timeout: Duration,

    /// Optional User-Agent header.
    pub user_agent: Option<String>,
}

impl Default for PollingConfig {
    fn default() -> Self {
        Self {
            base_url: String::new(),
            poll_interval: Duration::from_secs(30),
            request_timeout: Duration::from_secs(30),
            user_agent: Some(format!("atp-transport/{}", env!("CARGO_PKG_VERSION"))),
        }
    }
}

impl PollingConfig {
    /// Configuration for a base URL with default timings.
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            ..Self::default()
        }
    }

    /// Set the inbox fetch interval
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Set the per-request timeout
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    pub(super) fn inbox_url(&self, api_key: &str) -> String {
        format!("{}/api/v1/toolkit/{api_key}/inbox", self.base_url)
    }

    pub(super) fn respond_url(&self, api_key: &str) -> String {
        format!("{}/api/v1/toolkit/{api_key}/inbox/respond", self.base_url)
    }
}
