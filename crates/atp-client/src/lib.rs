//! # atp-client
//!
//! Client library for ATP toolkits and for the language-model side that calls
//! them.
//!
//! ## Toolkit side
//!
//! A [`ToolkitClient`] registers named tools with a coordinating server, keeps
//! a persistent authenticated connection open, and answers invocations pushed
//! by the server:
//!
//! - standard tools run once per request and reply with a result or an error
//! - interactive tools ([`AppHandler`]) keep per-session state across
//!   start, action and terminate messages
//! - tools may accept or require a caller-supplied auth token, which is
//!   injected into their parameters
//! - registration is skipped when the server already holds the toolkit's
//!   fingerprint
//!
//! ## Caller side
//!
//! An [`LlmClient`] fetches toolkit context for a prompt and executes batches
//! of model-produced tool calls, normalizing provider-specific call shapes
//! ([`Provider`]) and correlating each request with its reply.
//!
//! ## Architecture
//!
//! ```text
//! ToolkitClient ── ToolRegistry ── RegistrationApi (HTTP)
//!       │
//!   Connection ── RequestCorrelator
//!       │   └──── DispatchEngine ── SessionStore
//!       ↓
//! atp-transport (WebSocket | polling)
//! ```
//!
//! ## Usage
//!
//! ```rust,no_run
//! use atp_client::prelude::*;
//! use serde_json::json;
//!
//! # async fn example() -> atp_client::Result<()> {
//! let llm = LlmClient::new(LlmClientConfig::new("my-api-key"))?;
//! let calls = vec![json!({
//!     "id": "call_1",
//!     "function": { "name": "echo", "arguments": "{\"text\": \"hi\"}" }
//! })];
//! let results = llm
//!     .call_tool("weather", &calls, &CallOptions::new(Provider::OpenAi))
//!     .await?;
//! println!("{}", results[0].result);
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs, missing_debug_implementations, rust_2018_idioms)]
#![deny(unsafe_code)]

pub mod api;
pub mod config;
pub mod connection;
pub mod correlator;
pub mod directory;
pub mod dispatch;
pub mod error;
pub mod llm;
pub mod logging;
pub mod normalize;
pub mod registry;
pub mod routes;
pub mod session;
pub mod streaming;
pub mod tool;
pub mod toolkit;
pub mod watcher;

pub use api::{ExecutionReporter, RegistrationApi, RegistrationMetadata, ToolRegistration};
pub use config::{
    CallerTransport, ConnectionConfig, LlmClientConfig, ReconnectConfig, ToolkitConfig,
};
pub use connection::{Connection, ConnectionState, InboundHandler, ReplyChannel};
pub use correlator::{RequestCorrelator, new_request_id};
pub use directory::ToolkitDirectory;
pub use dispatch::{DispatchEngine, DispatchOutcome};
pub use error::{AtpError, ConfigError, Result};
pub use llm::{CallOptions, LlmClient, ToolCallResult};
pub use logging::{LogOutput, LogRotation, LoggingConfig, LoggingGuard};
pub use normalize::{NormalizedToolCall, Provider, acknowledgment, normalize_tool_calls};
pub use registry::{
    AUTH_TOKEN_PARAM, AuthDescriptor, AuthTokenMode, RegisteredTool, ToolDefinition, ToolKind,
    ToolRegistry,
};
pub use session::SessionStore;
pub use streaming::{CollectedStream, EventStream, SseDecoder, collect_stream};
pub use tool::{AppHandler, AppStep, FunctionTool, ToolArguments, ToolError, ToolHandler};
pub use toolkit::{SyncOutcome, ToolkitClient};
pub use watcher::SourceWatcher;

pub use atp_transport::{TransportType, protocol::ToolReply};

/// Common imports for toolkit authors and callers.
pub mod prelude {
    pub use crate::config::{CallerTransport, LlmClientConfig, ReconnectConfig, ToolkitConfig};
    pub use crate::connection::ConnectionState;
    pub use crate::error::{AtpError, Result};
    pub use crate::llm::{CallOptions, LlmClient, ToolCallResult};
    pub use crate::normalize::Provider;
    pub use crate::registry::{AuthDescriptor, ToolDefinition};
    pub use crate::tool::{AppHandler, AppStep, ToolArguments, ToolError, ToolHandler};
    pub use crate::toolkit::ToolkitClient;
    pub use atp_transport::TransportType;
}
