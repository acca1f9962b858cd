//! Websocket binding implementation.

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use futures::SinkExt as _;
use futures::StreamExt as _;
use futures::stream::SplitSink;
use tokio::net::TcpStream;
use tokio::sync::{Mutex, mpsc};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::config::WebSocketConfig;
use crate::error::{TransportError, TransportResult};
use crate::events::TransportEvent;
use crate::protocol::OutboundMessage;
use crate::traits::Transport;
use crate::types::{Credentials, TransportType};

pub(super) type WsWriter = SplitSink<WebSocketStream<MaybeTlsStream<TcpStream>>, Message>;

/// Background tasks tied to one opening of the binding.
struct ConnectionTasks {
    cancel: CancellationToken,
    handles: Vec<JoinHandle<()>>,
}

/// Duplex websocket binding.
pub struct WebSocketTransport {
    config: WebSocketConfig,
    pub(super) writer: Arc<Mutex<Option<WsWriter>>>,
    pub(super) open: Arc<AtomicBool>,
    endpoint: parking_lot::Mutex<Option<String>>,
    tasks: parking_lot::Mutex<Option<ConnectionTasks>>,
}

impl fmt::Debug for WebSocketTransport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WebSocketTransport")
            .field("config", &self.config)
            .field("open", &self.open.load(Ordering::Acquire))
            .finish_non_exhaustive()
    }
}

impl WebSocketTransport {
    /// Create a closed binding.
    pub fn new(config: WebSocketConfig) -> Self {
        Self {
            config,
            writer: Arc::new(Mutex::new(None)),
            open: Arc::new(AtomicBool::new(false)),
            endpoint: parking_lot::Mutex::new(None),
            tasks: parking_lot::Mutex::new(None),
        }
    }

    /// The binding's configuration.
    pub fn config(&self) -> &WebSocketConfig {
        &self.config
    }
}

#[async_trait]
impl Transport for WebSocketTransport {
    fn transport_type(&self) -> TransportType {
        TransportType::WebSocket
    }

    async fn open(
        &self,
        credentials: &Credentials,
        events: mpsc::Sender<TransportEvent>,
    ) -> TransportResult<()> {
        // Reap tasks left over from a connection the peer already dropped.
        let stale = self.tasks.lock().is_some();
        if stale || self.is_open() {
            self.close().await?;
        }

        let url = self.config.endpoint_for(credentials)?;
        // Log without the key-bearing path.
        info!(
            template = %self.config.url_template,
            "Connecting to websocket endpoint"
        );

        let (stream, _response) = tokio::time::timeout(self.config.connect_timeout, connect_async(&url))
            .await
            .map_err(|_| {
                TransportError::ConnectionFailed(format!(
                    "websocket upgrade timed out after {:?}",
                    self.config.connect_timeout
                ))
            })?
            .map_err(|e| TransportError::ConnectionFailed(format!("websocket connection failed: {e}")))?;

        let (writer, reader) = stream.split();
        *self.writer.lock().await = Some(writer);
        self.open.store(true, Ordering::Release);
        *self.endpoint.lock() = Some(self.config.url_template.clone());

        let cancel = CancellationToken::new();
        let handles = vec![
            self.spawn_reader_task(reader, events, cancel.clone()),
            self.spawn_keep_alive_task(self.config.keep_alive_interval, cancel.clone()),
        ];
        *self.tasks.lock() = Some(ConnectionTasks { cancel, handles });

        info!("Websocket connected");
        Ok(())
    }

    async fn send(&self, message: &OutboundMessage) -> TransportResult<()> {
        if !self.is_open() {
            return Err(TransportError::NotConnected);
        }
        let text = message.to_json()?;

        let mut guard = self.writer.lock().await;
        let writer = guard.as_mut().ok_or(TransportError::NotConnected)?;
        writer
            .send(Message::text(text))
            .await
            .map_err(|e| TransportError::SendFailed(e.to_string()))?;
        debug!(request_id = ?message.request_id(), "Sent websocket frame");
        Ok(())
    }

    async fn close(&self) -> TransportResult<()> {
        let tasks = self.tasks.lock().take();
        self.open.store(false, Ordering::Release);

        let writer = self.writer.lock().await.take();
        if let Some(mut writer) = writer {
            let _ = writer.send(Message::Close(None)).await;
            let _ = writer.close().await;
        }

        if let Some(tasks) = tasks {
            tasks.cancel.cancel();
            for handle in tasks.handles {
                if let Err(e) = handle.await {
                    warn!("Websocket task ended abnormally: {}", e);
                }
            }
        }

        debug!("Websocket binding closed");
        Ok(())
    }

    fn is_open(&self) -> bool {
        self.open.load(Ordering::Acquire)
    }

    fn endpoint(&self) -> Option<String> {
        self.endpoint.lock().clone()
    }
}
