//! Caller-side client: fetches toolkit context for an LLM and executes the
//! tool calls the LLM produces against remote toolkits.
//!
//! Requests travel either as correlated messages on a persistent websocket or
//! as one HTTP exchange each. Tool calls in any supported provider shape are
//! normalized before they are sent; one failed call never fails the batch.

use std::sync::Arc;
use std::time::Duration;

use atp_transport::{OutboundMessage, Transport, WebSocketTransport};
use futures::StreamExt;
use futures::future::join_all;
use reqwest::Client as HttpClient;
use reqwest::header::{ACCEPT, CACHE_CONTROL};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tracing::{debug, info, warn};

use crate::config::{CallerTransport, LlmClientConfig};
use crate::connection::Connection;
use crate::correlator::new_request_id;
use crate::error::{AtpError, Result};
use crate::normalize::{NormalizedToolCall, Provider, normalize_tool_calls};
use crate::streaming::{EventStream, sse_events};

/// Options for [`LlmClient::call_tool`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CallOptions {
    /// Provider the tool calls came from.
    pub provider: Provider,
    /// Auth token forwarded to the tools.
    pub auth_token: Option<String>,
    /// Prompt context forwarded to the server.
    pub user_prompt: Option<String>,
    /// Per-call bound; defaults to the configured call timeout.
    pub timeout: Option<Duration>,
    /// Execute calls one after another instead of concurrently.
    pub sequential: bool,
}

impl CallOptions {
    /// Options for a provider.
    pub fn new(provider: Provider) -> Self {
        Self {
            provider,
            ..Self::default()
        }
    }

    /// Forward an auth token.
    pub fn with_auth_token(mut self, token: impl Into<String>) -> Self {
        self.auth_token = Some(token.into());
        self
    }

    /// Forward a prompt.
    pub fn with_user_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.user_prompt = Some(prompt.into());
        self
    }

    /// Bound each call.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Execute calls sequentially.
    pub fn sequential(mut self) -> Self {
        self.sequential = true;
        self
    }
}

/// The outcome of one tool call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCallResult {
    /// Id of the call, as assigned by the provider (`call_{index}` when absent).
    pub tool_call_id: String,
    /// The server's result payload, or `{"error": …}`.
    pub result: Value,
}

impl ToolCallResult {
    fn failure(tool_call_id: String, error: impl std::fmt::Display) -> Self {
        Self {
            tool_call_id,
            result: json!({ "error": error.to_string() }),
        }
    }

    /// Whether the call failed.
    pub fn is_error(&self) -> bool {
        self.result.get("error").is_some()
    }
}

#[derive(Debug, Clone)]
enum Backend {
    Duplex(Connection),
    Http(HttpClient),
}

/// Client used by LLM applications to reach remote toolkits.
#[derive(Debug, Clone)]
pub struct LlmClient {
    config: Arc<LlmClientConfig>,
    backend: Backend,
}

impl LlmClient {
    /// Create a client using the transport named in the configuration.
    ///
    /// The websocket is opened lazily, on the first request or on [`connect`](Self::connect).
    ///
    /// # Errors
    ///
    /// Returns [`AtpError::Configuration`] for missing fields or an unusable base URL.
    pub fn new(config: LlmClientConfig) -> Result<Self> {
        config.validate()?;
        match config.transport {
            CallerTransport::WebSocket => {
                let transport = Arc::new(WebSocketTransport::new(config.websocket()?));
                Self::with_transport(config, transport)
            }
            CallerTransport::Http => {
                let http = HttpClient::builder()
                    .connect_timeout(config.connect_timeout)
                    .user_agent(format!("atp-client/{}", env!("CARGO_PKG_VERSION")))
                    .build()
                    .map_err(|e| AtpError::Configuration(e.to_string()))?;
                Ok(Self {
                    config: Arc::new(config),
                    backend: Backend::Http(http),
                })
            }
        }
    }

    /// Create a client carrying requests over a caller-supplied duplex binding.
    ///
    /// # Errors
    ///
    /// Returns [`AtpError::Configuration`] for missing fields.
    pub fn with_transport(config: LlmClientConfig, transport: Arc<dyn Transport>) -> Result<Self> {
        config.validate()?;
        let connection = Connection::new(config.connection(), transport, None);
        Ok(Self {
            config: Arc::new(config),
            backend: Backend::Duplex(connection),
        })
    }

    /// The configuration.
    pub fn config(&self) -> &LlmClientConfig {
        &self.config
    }

    /// The websocket connection, when requests travel over one.
    pub fn connection(&self) -> Option<&Connection> {
        match &self.backend {
            Backend::Duplex(connection) => Some(connection),
            Backend::Http(_) => None,
        }
    }

    /// Open the websocket and wait for the server to confirm it. A no-op over HTTP.
    ///
    /// # Errors
    ///
    /// Returns [`AtpError::Authentication`] when the handshake fails or times out.
    pub async fn connect(&self) -> Result<()> {
        match &self.backend {
            Backend::Duplex(connection) => connection.wait_authenticated().await,
            Backend::Http(_) => Ok(()),
        }
    }

    /// Close the websocket. Outstanding requests fail with [`AtpError::NotRunning`].
    pub async fn close(&self) {
        if let Backend::Duplex(connection) = &self.backend {
            connection.stop().await;
        }
    }

    /// Fetch a toolkit's tool context rendered for `provider`.
    ///
    /// # Errors
    ///
    /// Returns [`AtpError::CorrelationTimeout`] if no context arrives within the
    /// context timeout, or the transport or HTTP error.
    pub async fn get_toolkit_context(
        &self,
        toolkit_id: &str,
        user_prompt: &str,
        provider: Provider,
    ) -> Result<Value> {
        let message = OutboundMessage::GetToolkitContext {
            request_id: new_request_id("context", toolkit_id),
            toolkit_id: toolkit_id.to_string(),
            provider: provider.to_string(),
            user_prompt: user_prompt.to_string(),
        };
        debug!(toolkit = toolkit_id, %provider, "Fetching toolkit context");
        self.request(message, self.config.context_timeout).await
    }

    /// Execute tool calls produced by an LLM on a remote toolkit.
    ///
    /// Calls are normalized first; malformed ones yield an error result without
    /// being sent. Results are returned in input order. Failures of individual
    /// calls are reported in their results.
    ///
    /// # Errors
    ///
    /// Returns [`AtpError::Authentication`] if the websocket cannot be
    /// established. Errors of individual calls never fail the batch.
    pub async fn call_tool<T: Serialize>(
        &self,
        toolkit_id: &str,
        tool_calls: &[T],
        options: &CallOptions,
    ) -> Result<Vec<ToolCallResult>> {
        if tool_calls.is_empty() {
            warn!(toolkit = toolkit_id, "No tool calls provided");
            return Ok(Vec::new());
        }
        self.connect().await?;

        let calls = normalize_tool_calls(options.provider, tool_calls);
        let total = calls.len();
        info!(toolkit = toolkit_id, total, sequential = options.sequential, "Executing tool calls");

        if options.sequential {
            let mut results = Vec::with_capacity(total);
            for (index, call) in calls.into_iter().enumerate() {
                results.push(self.execute(toolkit_id, index, call, options).await);
            }
            Ok(results)
        } else {
            let pending = calls
                .into_iter()
                .enumerate()
                .map(|(index, call)| self.execute(toolkit_id, index, call, options));
            Ok(join_all(pending).await)
        }
    }

    /// Execute the first tool call over HTTP and stream the server's events.
    ///
    /// Use [`crate::streaming::collect_stream`] to fold the events into a final result.
    ///
    /// # Errors
    ///
    /// Returns [`AtpError::Configuration`] unless the client uses the HTTP
    /// transport, [`AtpError::InvalidArguments`] if the first call is malformed,
    /// and [`AtpError::Http`] for a non-success status.
    pub async fn call_tool_streaming<T: Serialize>(
        &self,
        toolkit_id: &str,
        tool_calls: &[T],
        options: &CallOptions,
    ) -> Result<EventStream> {
        let Backend::Http(http) = &self.backend else {
            return Err(AtpError::Configuration(
                "streaming requires the HTTP transport".to_string(),
            ));
        };
        let Some(first) = tool_calls.first() else {
            warn!(toolkit = toolkit_id, "No tool calls provided");
            return Ok(futures::stream::empty().boxed());
        };
        if tool_calls.len() > 1 {
            debug!(ignored = tool_calls.len() - 1, "Streaming executes only the first tool call");
        }

        let call = normalize_tool_calls(options.provider, std::slice::from_ref(first)).remove(0);
        if let Some(error) = &call.error {
            return Err(AtpError::invalid_arguments(&call.function, error.clone()));
        }
        let message = task_request(new_request_id("task", toolkit_id), toolkit_id, &call, options)?;

        let response = http
            .post(self.config.process_url())
            .header(ACCEPT, "text/event-stream")
            .header(CACHE_CONTROL, "no-cache")
            .timeout(options.timeout.unwrap_or(self.config.call_timeout))
            .json(&message)
            .send()
            .await?;
        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(AtpError::Http(format!("streaming request failed: {status} {text}")));
        }
        Ok(sse_events(response.bytes_stream()))
    }

    async fn execute(
        &self,
        toolkit_id: &str,
        index: usize,
        call: NormalizedToolCall,
        options: &CallOptions,
    ) -> ToolCallResult {
        let tool_call_id = if call.id.is_empty() {
            format!("call_{index}")
        } else {
            call.id.clone()
        };
        if let Some(error) = &call.error {
            return ToolCallResult::failure(tool_call_id, error);
        }

        let request_id = new_request_id("task", &format!("{toolkit_id}_{index}"));
        let timeout = options.timeout.unwrap_or(self.config.call_timeout);
        let outcome = match task_request(request_id, toolkit_id, &call, options) {
            Ok(message) => self.request(message, timeout).await,
            Err(e) => Err(e),
        };
        match outcome {
            Ok(result) => {
                debug!(tool_call_id = %tool_call_id, function = %call.function, "Tool call completed");
                ToolCallResult { tool_call_id, result }
            }
            Err(e) => {
                warn!(tool_call_id = %tool_call_id, function = %call.function, "Tool call failed: {}", e);
                ToolCallResult::failure(tool_call_id, e)
            }
        }
    }

    async fn request(&self, message: OutboundMessage, timeout: Duration) -> Result<Value> {
        match &self.backend {
            Backend::Duplex(connection) => connection.send_and_await(message, timeout).await,
            Backend::Http(http) => {
                let response = http
                    .post(self.config.process_url())
                    .timeout(timeout)
                    .json(&message)
                    .send()
                    .await
                    .map_err(|e| {
                        if e.is_timeout() {
                            AtpError::CorrelationTimeout {
                                request_id: message.request_id().unwrap_or_default().to_string(),
                                timeout,
                            }
                        } else {
                            e.into()
                        }
                    })?;
                let status = response.status();
                if !status.is_success() {
                    let text = response.text().await.unwrap_or_default();
                    return Err(AtpError::Http(format!("{status}: {text}")));
                }
                let body: Value = response.json().await?;
                Ok(match body {
                    Value::Object(mut map) if map.contains_key("payload") => {
                        map.remove("payload").unwrap_or_default()
                    }
                    other => other,
                })
            }
        }
    }
}

fn task_request(
    request_id: String,
    toolkit_id: &str,
    call: &NormalizedToolCall,
    options: &CallOptions,
) -> Result<OutboundMessage> {
    Ok(OutboundMessage::TaskRequest {
        request_id,
        toolkit_id: toolkit_id.to_string(),
        payload: serde_json::to_value(call)?,
        provider: options.provider.to_string(),
        auth_token: options.auth_token.clone(),
        user_prompt: options.user_prompt.clone(),
    })
}
