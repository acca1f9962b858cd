//! Connection lifecycle management.
//!
//! [`Connection`] owns a transport binding and drives it through
//!
//! ```text
//! Disconnected → Connecting → AuthPending → Authenticated → Closing → Disconnected
//! ```
//!
//! A supervisor task opens the binding, performs the handshake, routes inbound
//! traffic and reconnects after the policy delay whenever the binding is lost.
//! An idle watcher stops everything once no inbound traffic has been seen for
//! the configured bound. Polling bindings skip the handshake: the connection
//! counts as authenticated while the polling loop runs.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use atp_transport::{
    AuthResponse, Credentials, InboundMessage, OutboundMessage, Transport, TransportError,
    TransportEvent, TransportType,
};
use parking_lot::Mutex;
use serde_json::Value;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info, trace, warn};

use crate::config::ConnectionConfig;
use crate::correlator::RequestCorrelator;
use crate::error::{AtpError, Result};

/// Lifecycle state of a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConnectionState {
    /// No binding is open.
    Disconnected,
    /// The binding is being opened.
    Connecting,
    /// Credentials were sent; waiting for the server to confirm.
    AuthPending,
    /// The server confirmed the connection.
    Authenticated,
    /// A stop is in progress.
    Closing,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::AuthPending => "auth_pending",
            Self::Authenticated => "authenticated",
            Self::Closing => "closing",
        };
        f.write_str(name)
    }
}

/// Sends replies for one inbound invocation.
#[derive(Debug, Clone)]
pub struct ReplyChannel {
    transport: Arc<dyn Transport>,
}

impl ReplyChannel {
    /// Reply through a binding.
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        Self { transport }
    }

    /// Send a reply.
    ///
    /// # Errors
    ///
    /// Returns the binding's error; duplex bindings fail fast when closed.
    pub async fn send(&self, message: &OutboundMessage) -> Result<()> {
        self.transport.send(message).await?;
        Ok(())
    }

    /// The binding replies travel on.
    pub fn transport_type(&self) -> TransportType {
        self.transport.transport_type()
    }
}

/// Receives inbound invocations.
///
/// Responses to correlated requests never reach the handler; the connection
/// resolves them itself.
#[async_trait]
pub trait InboundHandler: Send + Sync {
    /// Handle one invocation, replying through `replies` as needed.
    async fn handle(&self, message: InboundMessage, replies: ReplyChannel);

    /// Called on every idle watcher cycle.
    async fn on_idle_check(&self) {}
}

enum SessionEnd {
    Cancelled,
    Closed(String),
    Failed(AtpError),
}

struct Lifecycle {
    cancel: CancellationToken,
    tracker: TaskTracker,
    idle_watcher: JoinHandle<()>,
}

struct Inner {
    config: ConnectionConfig,
    credentials: Credentials,
    transport: Arc<dyn Transport>,
    handler: Option<Arc<dyn InboundHandler>>,
    correlator: Arc<RequestCorrelator>,
    state: watch::Sender<ConnectionState>,
    running: watch::Sender<bool>,
    last_activity: Mutex<Instant>,
    last_auth_error: Mutex<Option<String>>,
    lifecycle: Mutex<Option<Lifecycle>>,
    stop_lock: tokio::sync::Mutex<()>,
}

/// A managed connection to the coordinating server.
///
/// Cheap to clone; clones share the same binding and state.
#[derive(Clone)]
pub struct Connection {
    inner: Arc<Inner>,
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("transport", &self.inner.transport)
            .field("state", &self.state())
            .field("running", &self.is_running())
            .field("pending", &self.inner.correlator.pending_count())
            .finish()
    }
}

impl Connection {
    /// Create a stopped connection.
    ///
    /// Without a handler, inbound invocations are logged and dropped.
    pub fn new(
        config: ConnectionConfig,
        transport: Arc<dyn Transport>,
        handler: Option<Arc<dyn InboundHandler>>,
    ) -> Self {
        let credentials = Credentials::new(config.api_key.clone());
        let (state, _) = watch::channel(ConnectionState::Disconnected);
        let (running, _) = watch::channel(false);
        Self {
            inner: Arc::new(Inner {
                config,
                credentials,
                transport,
                handler,
                correlator: Arc::new(RequestCorrelator::new()),
                state,
                running,
                last_activity: Mutex::new(Instant::now()),
                last_auth_error: Mutex::new(None),
                lifecycle: Mutex::new(None),
                stop_lock: tokio::sync::Mutex::new(()),
            }),
        }
    }

    /// Current state.
    pub fn state(&self) -> ConnectionState {
        *self.inner.state.borrow()
    }

    /// Observe state transitions.
    pub fn subscribe(&self) -> watch::Receiver<ConnectionState> {
        self.inner.state.subscribe()
    }

    /// Whether the connection is started and has not been stopped.
    pub fn is_running(&self) -> bool {
        *self.inner.running.borrow()
    }

    /// The underlying binding.
    pub fn transport(&self) -> &Arc<dyn Transport> {
        &self.inner.transport
    }

    /// The correlator resolving responses received on this connection.
    pub fn correlator(&self) -> &Arc<RequestCorrelator> {
        &self.inner.correlator
    }

    /// Time since the last inbound message.
    pub fn idle_for(&self) -> Duration {
        self.inner.last_activity.lock().elapsed()
    }

    /// The most recent handshake failure, cleared on success.
    pub fn last_auth_error(&self) -> Option<String> {
        self.inner.last_auth_error.lock().clone()
    }

    /// Start the supervisor and idle watcher. A no-op while already running.
    pub fn start(&self) {
        let mut lifecycle = self.inner.lifecycle.lock();
        if lifecycle
            .as_ref()
            .is_some_and(|current| !current.cancel.is_cancelled())
        {
            return;
        }

        let cancel = CancellationToken::new();
        let tracker = TaskTracker::new();
        *self.inner.last_activity.lock() = Instant::now();
        *self.inner.last_auth_error.lock() = None;
        self.inner.running.send_replace(true);

        tracker.spawn(self.clone().supervise(cancel.clone(), tracker.clone()));
        let idle_watcher = tokio::spawn(self.clone().watch_idle(cancel.clone()));

        info!(
            transport = %self.inner.transport.transport_type(),
            "Connection started"
        );
        *lifecycle = Some(Lifecycle {
            cancel,
            tracker,
            idle_watcher,
        });
    }

    /// Stop the connection and wait for every background task to finish.
    ///
    /// Idempotent. When this returns, no loop or in-flight dispatch touches the
    /// connection any more.
    pub async fn stop(&self) {
        if let Some(idle_watcher) = self.shutdown().await
            && let Err(e) = idle_watcher.await
        {
            warn!("Idle watcher ended abnormally: {}", e);
        }
    }

    /// Wait until the connection stops, by request, idle timeout or giving up
    /// on reconnects.
    pub async fn wait_stopped(&self) {
        let mut running = self.inner.running.subscribe();
        let _ = running.wait_for(|running| !*running).await;
    }

    /// Start if needed and wait for the server to confirm the connection.
    ///
    /// # Errors
    ///
    /// Returns [`AtpError::Authentication`] carrying the server's rejection, or
    /// a timeout description when the handshake does not complete within the
    /// auth bound. Returns [`AtpError::NotRunning`] if the connection gave up.
    pub async fn wait_authenticated(&self) -> Result<()> {
        if !self.is_running() {
            self.start();
        }

        let bound = self.inner.config.auth_timeout;
        let deadline = Instant::now() + bound;
        let mut states = self.subscribe();
        loop {
            if *states.borrow_and_update() == ConnectionState::Authenticated {
                return Ok(());
            }
            if let Some(reason) = self.last_auth_error() {
                return Err(AtpError::Authentication(reason));
            }
            if !self.is_running() {
                return Err(AtpError::NotRunning);
            }
            match tokio::time::timeout_at(deadline, states.changed()).await {
                Ok(Ok(())) => {}
                Ok(Err(_)) => return Err(AtpError::NotRunning),
                Err(_) => {
                    return Err(AtpError::Authentication(format!(
                        "not authenticated within {bound:?}"
                    )));
                }
            }
        }
    }

    /// Send a message on the authenticated connection.
    ///
    /// # Errors
    ///
    /// Fails fast with [`TransportError::NotConnected`] when a duplex connection
    /// is not authenticated.
    pub async fn send(&self, message: &OutboundMessage) -> Result<()> {
        if self.inner.transport.requires_handshake()
            && self.state() != ConnectionState::Authenticated
        {
            return Err(TransportError::NotConnected.into());
        }
        self.inner.transport.send(message).await?;
        Ok(())
    }

    /// Send a correlated request and await its response.
    ///
    /// # Errors
    ///
    /// See [`Connection::wait_authenticated`] and [`RequestCorrelator::send_and_await`].
    pub async fn send_and_await(&self, message: OutboundMessage, timeout: Duration) -> Result<Value> {
        self.wait_authenticated().await?;
        let connection = self.clone();
        self.inner
            .correlator
            .send_and_await(message, timeout, |message| async move {
                connection.send(&message).await
            })
            .await
    }

    fn set_state(&self, next: ConnectionState) {
        self.inner.state.send_if_modified(|current| {
            if *current == next {
                return false;
            }
            debug!(from = %current, to = %next, "Connection state changed");
            *current = next;
            true
        });
    }

    fn touch(&self) {
        *self.inner.last_activity.lock() = Instant::now();
    }

    /// Stop without joining the idle watcher, which may be the caller.
    async fn shutdown(&self) -> Option<JoinHandle<()>> {
        let _guard = self.inner.stop_lock.lock().await;
        let lifecycle = self.inner.lifecycle.lock().take()?;

        self.set_state(ConnectionState::Closing);
        self.inner.running.send_replace(false);
        lifecycle.cancel.cancel();

        if let Err(e) = self.inner.transport.close().await {
            warn!("Transport close failed: {}", e);
        }
        lifecycle.tracker.close();
        lifecycle.tracker.wait().await;

        self.inner.correlator.clear();
        self.set_state(ConnectionState::Disconnected);
        info!("Connection stopped");
        Some(lifecycle.idle_watcher)
    }

    async fn supervise(self, cancel: CancellationToken, tracker: TaskTracker) {
        let reconnect = self.inner.config.reconnect.clone();
        let mut attempt: u32 = 0;

        loop {
            let (events_tx, mut events) = mpsc::channel(self.inner.config.event_buffer);
            self.set_state(ConnectionState::Connecting);

            let opened = tokio::select! {
                () = cancel.cancelled() => break,
                opened = self.inner.transport.open(&self.inner.credentials, events_tx) => opened,
            };

            let outcome = match opened {
                Err(e) => SessionEnd::Failed(e.into()),
                Ok(()) => match self.authenticate(&mut events, &cancel, &tracker).await {
                    Err(_) if cancel.is_cancelled() => SessionEnd::Cancelled,
                    Err(e) => SessionEnd::Failed(e),
                    Ok(()) => {
                        attempt = 0;
                        *self.inner.last_auth_error.lock() = None;
                        self.set_state(ConnectionState::Authenticated);
                        info!(
                            endpoint = ?self.inner.transport.endpoint(),
                            "Connection authenticated"
                        );
                        self.pump(&mut events, &cancel, &tracker).await
                    }
                },
            };

            match outcome {
                SessionEnd::Cancelled => break,
                SessionEnd::Closed(reason) => warn!(%reason, "Connection lost"),
                SessionEnd::Failed(AtpError::Authentication(reason)) => {
                    error!(%reason, "Authentication failed");
                    *self.inner.last_auth_error.lock() = Some(reason);
                }
                SessionEnd::Failed(e) => warn!("Connection attempt failed: {}", e),
            }

            if let Err(e) = self.inner.transport.close().await {
                debug!("Transport close after failure: {}", e);
            }
            self.set_state(ConnectionState::Disconnected);
            if cancel.is_cancelled() {
                break;
            }

            if !reconnect.allows(attempt) {
                error!(attempts = attempt, "Giving up on reconnecting");
                self.inner.running.send_replace(false);
                cancel.cancel();
                break;
            }
            let delay = reconnect.delay_for(attempt);
            attempt = attempt.saturating_add(1);
            info!(?delay, attempt, "Reconnecting");
            tokio::select! {
                () = cancel.cancelled() => break,
                () = tokio::time::sleep(delay) => {}
            }
        }
        debug!("Connection supervisor finished");
    }

    async fn authenticate(
        &self,
        events: &mut mpsc::Receiver<TransportEvent>,
        cancel: &CancellationToken,
        tracker: &TaskTracker,
    ) -> Result<()> {
        if !self.inner.transport.requires_handshake() {
            return Ok(());
        }

        self.set_state(ConnectionState::AuthPending);
        self.inner
            .transport
            .send(&OutboundMessage::Auth {
                api_key: self.inner.credentials.api_key.clone(),
            })
            .await?;

        let bound = self.inner.config.auth_timeout;
        let deadline = Instant::now() + bound;
        loop {
            let event = tokio::select! {
                () = cancel.cancelled() => return Err(AtpError::NotRunning),
                event = tokio::time::timeout_at(deadline, events.recv()) => event,
            };
            let message = match event {
                Err(_) => {
                    return Err(AtpError::Authentication(format!(
                        "no confirmation within {bound:?}"
                    )));
                }
                Ok(None) => {
                    return Err(TransportError::ConnectionLost(
                        "event channel closed during handshake".to_string(),
                    )
                    .into());
                }
                Ok(Some(TransportEvent::Closed { reason })) => {
                    return Err(TransportError::ConnectionLost(
                        reason.unwrap_or_else(|| "closed during handshake".to_string()),
                    )
                    .into());
                }
                Ok(Some(TransportEvent::Message(message))) => message,
            };

            self.touch();
            match message {
                InboundMessage::AuthResponse(AuthResponse { success: true, .. }) => return Ok(()),
                InboundMessage::AuthResponse(AuthResponse {
                    success: false,
                    error,
                }) => {
                    return Err(AtpError::Authentication(
                        error.unwrap_or_else(|| "credentials rejected".to_string()),
                    ));
                }
                InboundMessage::ClientConnected { message } => {
                    debug!(?message, "Server acknowledged connection");
                    return Ok(());
                }
                other => self.route(other, cancel, tracker).await,
            }
        }
    }

    async fn pump(
        &self,
        events: &mut mpsc::Receiver<TransportEvent>,
        cancel: &CancellationToken,
        tracker: &TaskTracker,
    ) -> SessionEnd {
        loop {
            let event = tokio::select! {
                () = cancel.cancelled() => return SessionEnd::Cancelled,
                event = events.recv() => event,
            };
            match event {
                Some(TransportEvent::Message(message)) => {
                    self.touch();
                    self.route(message, cancel, tracker).await;
                }
                Some(TransportEvent::Closed { reason }) => {
                    return SessionEnd::Closed(reason.unwrap_or_else(|| "closed".to_string()));
                }
                None => return SessionEnd::Closed("event channel closed".to_string()),
            }
        }
    }

    async fn route(&self, message: InboundMessage, cancel: &CancellationToken, tracker: &TaskTracker) {
        match message {
            InboundMessage::Response {
                kind, request_id, ..
            } if !self.inner.correlator.is_pending(&request_id) => {
                warn!(request_id = %request_id, ?kind, "Dropping unmatched response");
            }
            InboundMessage::Response {
                kind,
                request_id,
                payload,
            } => {
                trace!(request_id = %request_id, ?kind, "Resolving response");
                self.inner.correlator.resolve(&request_id, payload);
            }
            InboundMessage::Unknown(tag) => {
                warn!(tag = %tag, "Ignoring message with unrecognized type");
            }
            InboundMessage::ClientConnected { message } => {
                debug!(?message, "Server acknowledged connection");
            }
            InboundMessage::AuthResponse(response) => {
                debug!(success = response.success, "Ignoring auth response outside the handshake");
            }
            invocation => {
                let Some(handler) = self.inner.handler.clone() else {
                    warn!(tag = invocation.tag(), "No handler installed; dropping invocation");
                    return;
                };
                let replies = ReplyChannel::new(self.inner.transport.clone());
                let cancel = cancel.clone();
                let dispatch = async move {
                    tokio::select! {
                        () = cancel.cancelled() => debug!("Dispatch cancelled by stop"),
                        () = handler.handle(invocation, replies) => {}
                    }
                };

                // Polling processes one item at a time; duplex invocations run independently.
                if self.inner.transport.transport_type() == TransportType::Polling {
                    dispatch.await;
                } else {
                    tracker.spawn(dispatch);
                }
            }
        }
    }

    async fn watch_idle(self, cancel: CancellationToken) {
        let interval = self.inner.config.effective_idle_check();
        let mut ticker = tokio::time::interval_at(Instant::now() + interval, interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                () = cancel.cancelled() => return,
                _ = ticker.tick() => {}
            }

            if let Some(handler) = &self.inner.handler {
                handler.on_idle_check().await;
            }

            if let Some(limit) = self.inner.config.idle_timeout {
                let quiet = self.idle_for();
                if quiet >= limit {
                    info!(?quiet, ?limit, "Idle timeout reached; stopping connection");
                    self.shutdown().await;
                    return;
                }
            }
        }
    }
}
