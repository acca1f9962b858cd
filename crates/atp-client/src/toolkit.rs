//! Toolkit client: the facade tying registry, server sync, connection and
//! dispatch together.
//!
//! ```no_run
//! use atp_client::prelude::*;
//! use serde_json::json;
//!
//! # async fn example() -> atp_client::Result<()> {
//! let config = ToolkitConfig::new("my-api-key", "weather");
//! let client = ToolkitClient::new(config)?;
//!
//! client
//!     .register(
//!         ToolDefinition::from_fn("echo", |args: ToolArguments| async move {
//!             Ok(json!({ "text": args.require_str("text")? }))
//!         })
//!         .params(["text"])
//!         .required(["text"])
//!         .description("Echo the input"),
//!     )
//!     .await?;
//!
//! client.start();
//! client.run_until_stopped().await;
//! # Ok(())
//! # }
//! ```

use std::path::{Path, PathBuf};
use std::sync::{Arc, Weak};

use atp_transport::{
    InboundMessage, OutboundMessage, PollingTransport, ToolReply, ToolRequest, Transport,
    TransportType, WebSocketTransport,
};
use serde_json::{Map, Value, json};
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::api::{ExecutionReporter, RegistrationApi, ToolRegistration};
use crate::config::ToolkitConfig;
use crate::connection::{Connection, ConnectionState};
use crate::correlator::new_request_id;
use crate::dispatch::{DispatchEngine, DispatchOutcome};
use crate::error::{AtpError, Result};
use crate::registry::{RegisteredTool, ToolDefinition, ToolRegistry};
use crate::session::SessionStore;
use crate::watcher::SourceWatcher;

/// Result of synchronizing the tool set with the server.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncOutcome {
    /// The server already holds the current fingerprint; nothing was sent.
    UpToDate,
    /// Tools were (re-)registered.
    Registered {
        /// Tools the server accepted.
        registered: usize,
        /// Tools whose registration failed.
        failed: usize,
    },
}

struct ToolkitInner {
    config: ToolkitConfig,
    registry: Arc<ToolRegistry>,
    sessions: Arc<SessionStore>,
    engine: Arc<DispatchEngine>,
    api: RegistrationApi,
    connection: Connection,
    watcher: tokio::sync::Mutex<Option<SourceWatcher>>,
}

/// A toolkit exposing registered tools to the coordinating server.
///
/// Cheap to clone; clones share the registry, sessions and connection.
#[derive(Clone)]
pub struct ToolkitClient {
    inner: Arc<ToolkitInner>,
}

impl std::fmt::Debug for ToolkitClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ToolkitClient")
            .field("app_name", &self.inner.config.app_name)
            .field("tools", &self.inner.registry.len())
            .field("connection", &self.inner.connection)
            .finish_non_exhaustive()
    }
}

impl ToolkitClient {
    /// Create a client using the binding named by `config.transport`.
    ///
    /// # Errors
    ///
    /// Returns [`AtpError::Configuration`] for missing fields or an unusable
    /// base URL.
    pub fn new(config: ToolkitConfig) -> Result<Self> {
        config.validate()?;
        let transport: Arc<dyn Transport> = match config.transport {
            TransportType::WebSocket => Arc::new(WebSocketTransport::new(config.websocket()?)),
            TransportType::Polling => Arc::new(PollingTransport::new(config.polling())?),
        };
        Self::with_transport(config, transport)
    }

    /// Create a client over a caller-supplied binding.
    ///
    /// # Errors
    ///
    /// Returns [`AtpError::Configuration`] for missing fields.
    pub fn with_transport(config: ToolkitConfig, transport: Arc<dyn Transport>) -> Result<Self> {
        config.validate()?;
        let registry = Arc::new(ToolRegistry::new());
        let sessions = Arc::new(SessionStore::new(config.session_idle_timeout));
        let api = RegistrationApi::new(&config.base_url, config.api_key.clone(), config.request_timeout)?;

        let mut engine = DispatchEngine::new(registry.clone(), sessions.clone());
        if config.report_results {
            engine = engine.with_reporter(ExecutionReporter::new(api.clone()));
        }
        let engine = Arc::new(engine);
        let connection = Connection::new(config.connection(), transport, Some(engine.clone()));

        Ok(Self {
            inner: Arc::new(ToolkitInner {
                config,
                registry,
                sessions,
                engine,
                api,
                connection,
                watcher: tokio::sync::Mutex::new(None),
            }),
        })
    }

    /// The configuration.
    pub fn config(&self) -> &ToolkitConfig {
        &self.inner.config
    }

    /// Application identity.
    pub fn app_name(&self) -> &str {
        &self.inner.config.app_name
    }

    /// The tool registry.
    pub fn registry(&self) -> &Arc<ToolRegistry> {
        &self.inner.registry
    }

    /// Live interactive sessions.
    pub fn sessions(&self) -> &Arc<SessionStore> {
        &self.inner.sessions
    }

    /// The managed connection.
    pub fn connection(&self) -> &Connection {
        &self.inner.connection
    }

    /// Current connection state.
    pub fn state(&self) -> ConnectionState {
        self.inner.connection.state()
    }

    /// Observe connection state transitions.
    pub fn subscribe_state(&self) -> watch::Receiver<ConnectionState> {
        self.inner.connection.subscribe()
    }

    /// The aggregate fingerprint of the registered tools.
    pub fn fingerprint(&self) -> String {
        self.inner.registry.fingerprint()
    }

    /// Register a tool locally, then bring the server up to date.
    ///
    /// Server failures are logged; the tool stays callable locally.
    ///
    /// # Errors
    ///
    /// Returns [`AtpError::InvalidRegistration`] if the definition is invalid.
    pub async fn register(&self, definition: ToolDefinition) -> Result<Arc<RegisteredTool>> {
        let tool = self.register_local(definition)?;
        match self.check_up_to_date().await {
            Some(true) => debug!(tool = %tool.name, "Server already up to date"),
            _ => {
                if let Err(e) = self.register_remote(&tool).await {
                    warn!(tool = %tool.name, "{}", e);
                }
            }
        }
        Ok(tool)
    }

    /// Register a tool without contacting the server.
    ///
    /// # Errors
    ///
    /// Returns [`AtpError::InvalidRegistration`] if the definition is invalid.
    pub fn register_local(&self, definition: ToolDefinition) -> Result<Arc<RegisteredTool>> {
        self.inner.registry.register(definition)
    }

    /// Look up a registered tool.
    pub fn resolve(&self, name: &str) -> Option<Arc<RegisteredTool>> {
        self.inner.registry.resolve(name)
    }

    /// Bring the server up to date with every registered tool.
    ///
    /// Skips all registrations when the server confirms the current
    /// fingerprint. Individual failures are logged and counted.
    ///
    /// # Errors
    ///
    /// Currently infallible; reserved for failures that affect the whole sync.
    pub async fn sync_with_server(&self) -> Result<SyncOutcome> {
        if self.check_up_to_date().await == Some(true) {
            info!(app_name = %self.app_name(), "Toolkit up to date with server");
            return Ok(SyncOutcome::UpToDate);
        }

        let (mut registered, mut failed) = (0, 0);
        for tool in self.inner.registry.tools() {
            match self.register_remote(&tool).await {
                Ok(()) => registered += 1,
                Err(e) => {
                    warn!(tool = %tool.name, "{}", e);
                    failed += 1;
                }
            }
        }
        info!(registered, failed, "Toolkit synchronized with server");
        Ok(SyncOutcome::Registered { registered, failed })
    }

    async fn check_up_to_date(&self) -> Option<bool> {
        let fingerprint = self.inner.registry.fingerprint();
        match self
            .inner
            .api
            .check_fingerprint(self.app_name(), &fingerprint)
            .await
        {
            Ok(up_to_date) => Some(up_to_date),
            Err(e) => {
                warn!("Fingerprint check failed, registering anyway: {}", e);
                None
            }
        }
    }

    async fn register_remote(&self, tool: &RegisteredTool) -> Result<()> {
        let registration = ToolRegistration::for_tool(
            tool,
            self.app_name(),
            self.inner.config.endpoint_url.as_deref(),
            self.inner.config.sample_timeout,
        )
        .await;
        if let Some(token) = self.inner.api.register_tool(&registration).await? {
            self.inner.registry.store_exchange_token(&tool.name, token);
        }
        Ok(())
    }

    /// Start the connection in the background. A no-op while running.
    pub fn start(&self) {
        info!(
            app_name = %self.app_name(),
            transport = %self.inner.config.transport,
            tools = self.inner.registry.len(),
            "Starting toolkit client"
        );
        self.inner.connection.start();
    }

    /// Start if needed and wait until the server confirms the connection.
    ///
    /// # Errors
    ///
    /// See [`Connection::wait_authenticated`].
    pub async fn wait_ready(&self) -> Result<()> {
        self.inner.connection.wait_authenticated().await
    }

    /// Stop the connection and the source watcher, ending all sessions.
    ///
    /// When this returns no background task touches the client any more.
    pub async fn stop(&self) {
        if let Some(mut watcher) = self.inner.watcher.lock().await.take() {
            watcher.stop().await;
        }
        self.inner.connection.stop().await;
        self.inner.sessions.clear();
        info!(app_name = %self.app_name(), "Toolkit client stopped");
    }

    /// Wait until the client stops, by request, idle timeout or giving up on
    /// reconnects.
    pub async fn run_until_stopped(&self) {
        self.inner.connection.wait_stopped().await;
        if let Some(mut watcher) = self.inner.watcher.lock().await.take() {
            watcher.stop().await;
        }
    }

    /// Restart after a source change: stop the connection, forget exchange
    /// tokens, re-sync with the server and start again.
    pub async fn reload(&self) {
        info!(app_name = %self.app_name(), "Reloading toolkit");
        self.inner.connection.stop().await;
        self.inner.sessions.clear();
        self.inner.registry.clear_exchange_tokens();
        if let Err(e) = self.sync_with_server().await {
            warn!("Re-sync after reload failed: {}", e);
        }
        self.inner.connection.start();
    }

    /// Report a tool's result to the server using its exchange token.
    ///
    /// Returns `Ok(false)` when no token is held for the tool.
    ///
    /// # Errors
    ///
    /// Returns the HTTP error; the token is consumed either way.
    pub async fn report_execution(&self, tool: &str, result: &Value) -> Result<bool> {
        ExecutionReporter::new(self.inner.api.clone())
            .report(&self.inner.registry, tool, result)
            .await
    }

    /// Watch source files and [`reload`](Self::reload) when one changes.
    ///
    /// Each path may be a file, or a directory scanned for `extension` files.
    /// Replaces any previous watcher.
    ///
    /// # Errors
    ///
    /// Returns [`AtpError::Configuration`] if a directory cannot be scanned.
    pub async fn watch_sources<I, P>(&self, paths: I, extension: &str) -> Result<usize>
    where
        I: IntoIterator<Item = P>,
        P: AsRef<Path>,
    {
        let client: Weak<ToolkitInner> = Arc::downgrade(&self.inner);
        let mut watcher = SourceWatcher::new(move |path: PathBuf| {
            let client = client.clone();
            async move {
                if let Some(inner) = client.upgrade() {
                    info!(path = %path.display(), "Source changed; reloading");
                    ToolkitClient { inner }.reload().await;
                }
            }
        })
        .with_interval(self.inner.config.watch_interval);

        for path in paths {
            let path = path.as_ref();
            if path.is_dir() {
                watcher
                    .add_dir(path, extension)
                    .map_err(|e| AtpError::Configuration(format!("cannot watch {}: {e}", path.display())))?;
            } else {
                watcher.add_file(path);
            }
        }
        let watched = watcher.files().len();
        watcher.start();

        if let Some(mut previous) = self.inner.watcher.lock().await.replace(watcher) {
            previous.stop().await;
        }
        Ok(watched)
    }

    /// The toolkit description: app identity, fingerprint and every tool's context.
    pub fn describe(&self) -> Value {
        let tools: Vec<Value> = self
            .inner
            .registry
            .tools()
            .iter()
            .map(|tool| tool.describe())
            .collect();
        json!({
            "app_name": self.app_name(),
            "toolkit_hash": self.fingerprint(),
            "tools": tools,
        })
    }

    /// Invoke a standard tool locally, outside the server connection.
    ///
    /// Applies the same auth-token and parameter checks as remote dispatch.
    ///
    /// # Errors
    ///
    /// Returns [`AtpError::ToolNotFound`], [`AtpError::MissingAuthToken`],
    /// [`AtpError::InvalidArguments`] or [`AtpError::ToolExecution`].
    pub async fn invoke_local(
        &self,
        tool: &str,
        params: Map<String, Value>,
        auth_token: Option<String>,
    ) -> Result<Value> {
        let request = ToolRequest {
            request_id: new_request_id("http", tool),
            tool_name: tool.to_string(),
            params,
            auth_token,
        };
        match self.inner.engine.dispatch(InboundMessage::ToolRequest(request)).await {
            DispatchOutcome::Completed {
                reply:
                    OutboundMessage::ToolResponse {
                        reply: ToolReply::Success { result },
                        ..
                    },
                ..
            } => Ok(result),
            DispatchOutcome::Failed { error, .. } | DispatchOutcome::Dropped(error) => Err(error),
            other => Err(AtpError::tool_execution(tool, format!("unexpected outcome: {other:?}"))),
        }
    }
}
