//! Polling binding implementation.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use reqwest::{Client as HttpClient, StatusCode};
use serde_json::{Value, json};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::config::PollingConfig;
use crate::error::{TransportError, TransportResult};
use crate::events::TransportEvent;
use crate::protocol::{InboundMessage, OutboundMessage};
use crate::traits::Transport;
use crate::types::{Credentials, TransportType};

/// Polling HTTP binding.
#[derive(Debug)]
pub struct PollingTransport {
    config: PollingConfig,
    http_client: HttpClient,
    api_key: parking_lot::RwLock<Option<String>>,
    open: Arc<AtomicBool>,
    poller: parking_lot::Mutex<Option<(CancellationToken, JoinHandle<()>)>>,
}

impl PollingTransport {
    /// Create a closed binding.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::ConfigurationError`] if the base URL is empty or the
    /// HTTP client cannot be built.
    pub fn new(config: PollingConfig) -> TransportResult<Self> {
        if config.base_url.is_empty() {
            return Err(TransportError::ConfigurationError(
                "Polling transport requires a base URL".to_string(),
            ));
        }

        let mut builder = HttpClient::builder().timeout(config.request_timeout);
        if let Some(ref user_agent) = config.user_agent {
            builder = builder.user_agent(user_agent);
        }
        let http_client = builder
            .build()
            .map_err(|e| TransportError::ConfigurationError(e.to_string()))?;

        Ok(Self {
            config,
            http_client,
            api_key: parking_lot::RwLock::new(None),
            open: Arc::new(AtomicBool::new(false)),
            poller: parking_lot::Mutex::new(None),
        })
    }

    /// The binding's configuration.
    pub fn config(&self) -> &PollingConfig {
        &self.config
    }

    /// Fetch at most one pending inbox item.
    ///
    /// An empty body, `null`, `{}` or `204 No Content` mean nothing is pending.
    ///
    /// # Errors
    ///
    /// Returns an error on HTTP failure or when the item is not a valid message.
    pub async fn fetch_once(&self, api_key: &str) -> TransportResult<Option<InboundMessage>> {
        fetch_inbox(&self.http_client, &self.config.inbox_url(api_key)).await
    }

    async fn post_reply(&self, body: Value) -> TransportResult<()> {
        let api_key = self
            .api_key
            .read()
            .clone()
            .ok_or(TransportError::NotConnected)?;
        let url = self.config.respond_url(&api_key);

        let response = self.http_client.post(&url).json(&body).send().await?;
        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(TransportError::Http(format!(
                "inbox respond failed: {status} {text}"
            )));
        }
        debug!(%status, "Inbox reply accepted");
        Ok(())
    }
}

async fn fetch_inbox(client: &HttpClient, url: &str) -> TransportResult<Option<InboundMessage>> {
    let response = client.get(url).send().await?;
    let status = response.status();
    if status == StatusCode::NO_CONTENT {
        return Ok(None);
    }
    if !status.is_success() {
        let text = response.text().await.unwrap_or_default();
        return Err(TransportError::Http(format!(
            "inbox poll failed: {status} {text}"
        )));
    }

    let text = response.text().await?;
    if text.trim().is_empty() {
        return Ok(None);
    }
    let value: Value = serde_json::from_str(&text)
        .map_err(|e| TransportError::ProtocolError(format!("inbox item is not JSON: {e}")))?;
    match value {
        Value::Null => Ok(None),
        Value::Object(ref object) if object.is_empty() => Ok(None),
        other => InboundMessage::from_value(other).map(Some),
    }
}

#[async_trait]
impl Transport for PollingTransport {
    fn transport_type(&self) -> TransportType {
        TransportType::Polling
    }

    async fn open(
        &self,
        credentials: &Credentials,
        events: mpsc::Sender<TransportEvent>,
    ) -> TransportResult<()> {
        let stale = self.poller.lock().is_some();
        if stale {
            self.close().await?;
        }

        *self.api_key.write() = Some(credentials.api_key.clone());
        let client = self.http_client.clone();
        let url = self.config.inbox_url(&credentials.api_key);
        let interval = self.config.poll_interval;
        let cancel = CancellationToken::new();
        let token = cancel.clone();

        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    () = token.cancelled() => break,
                    _ = ticker.tick() => {}
                }

                match fetch_inbox(&client, &url).await {
                    Ok(Some(message)) => {
                        debug!(tag = message.tag(), "Inbox item received");
                        tokio::select! {
                            () = token.cancelled() => break,
                            sent = events.send(TransportEvent::Message(message)) => {
                                if sent.is_err() {
                                    debug!("Event receiver dropped; stopping inbox poller");
                                    break;
                                }
                            }
                        }
                    }
                    Ok(None) => debug!("Inbox is empty"),
                    Err(e) => warn!("Inbox poll failed, retrying next interval: {}", e),
                }
            }
        });

        *self.poller.lock() = Some((cancel, handle));
        self.open.store(true, Ordering::Release);
        info!(interval = ?self.config.poll_interval, "Inbox polling started");
        Ok(())
    }

    async fn send(&self, message: &OutboundMessage) -> TransportResult<()> {
        match message {
            // The inbox is keyed by API key; there is no handshake.
            OutboundMessage::Auth { .. } => Ok(()),
            OutboundMessage::ToolResponse { request_id, reply } => {
                self.post_reply(json!({
                    "request_id": request_id,
                    "response": reply.to_value(),
                }))
                .await
            }
            OutboundMessage::AppResponse {
                request_id,
                session_id,
                reply,
                terminated,
            } => {
                self.post_reply(json!({
                    "request_id": request_id,
                    "session_id": session_id,
                    "response": reply.to_value(),
                    "terminated": terminated,
                }))
                .await
            }
            OutboundMessage::GetToolkitContext { .. } | OutboundMessage::TaskRequest { .. } => {
                Err(TransportError::NotAvailable(
                    "correlated requests require the websocket binding".to_string(),
                ))
            }
        }
    }

    async fn close(&self) -> TransportResult<()> {
        self.open.store(false, Ordering::Release);
        let poller = self.poller.lock().take();
        if let Some((cancel, handle)) = poller {
            cancel.cancel();
            if let Err(e) = handle.await {
                warn!("Inbox poller ended abnormally: {}", e);
            }
            info!("Inbox polling stopped");
        }
        Ok(())
    }

    fn is_open(&self) -> bool {
        self.open.load(Ordering::Acquire)
    }

    fn requires_handshake(&self) -> bool {
        false
    }

    fn endpoint(&self) -> Option<String> {
        Some(self.config.base_url.clone())
    }
}
