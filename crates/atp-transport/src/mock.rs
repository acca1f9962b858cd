//! In-memory transport for tests.
//!
//! `MockTransport` records everything sent through it and lets a test push
//! inbound messages or a disconnect. Clones share state, so a test can hand one
//! clone to a client and keep another to drive it.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::{Notify, mpsc};

use crate::error::{TransportError, TransportResult};
use crate::events::TransportEvent;
use crate::protocol::{AuthResponse, InboundMessage, OutboundMessage};
use crate::traits::Transport;
use crate::types::{Credentials, TransportType};

/// How the mock answers an `auth` message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HandshakeBehavior {
    /// Reply with `auth_response {success: true}`.
    Accept,
    /// Reply with `auth_response {success: false, error}`.
    Reject(String),
    /// Never reply.
    Silent,
}

type Responder = Arc<dyn Fn(&OutboundMessage) -> Option<InboundMessage> + Send + Sync>;

struct MockState {
    transport_type: TransportType,
    handshake: Mutex<HandshakeBehavior>,
    responder: Mutex<Option<Responder>>,
    events: Mutex<Option<mpsc::Sender<TransportEvent>>>,
    sent: Mutex<Vec<OutboundMessage>>,
    sent_notify: Notify,
    open: AtomicBool,
    opens: AtomicUsize,
    failing_opens: AtomicUsize,
    api_keys: Mutex<Vec<String>>,
}

/// In-memory [`Transport`] for tests.
#[derive(Clone)]
pub struct MockTransport {
    state: Arc<MockState>,
}

impl std::fmt::Debug for MockTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MockTransport")
            .field("transport_type", &self.state.transport_type)
            .field("open", &self.state.open.load(Ordering::Acquire))
            .field("sent", &self.state.sent.lock().len())
            .finish()
    }
}

impl Default for MockTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl MockTransport {
    /// A duplex mock that accepts the handshake.
    pub fn new() -> Self {
        Self::with_type(TransportType::WebSocket)
    }

    /// A polling mock: no handshake, replies recorded like any other send.
    pub fn polling() -> Self {
        Self::with_type(TransportType::Polling)
    }

    fn with_type(transport_type: TransportType) -> Self {
        Self {
            state: Arc::new(MockState {
                transport_type,
                handshake: Mutex::new(HandshakeBehavior::Accept),
                responder: Mutex::new(None),
                events: Mutex::new(None),
                sent: Mutex::new(Vec::new()),
                sent_notify: Notify::new(),
                open: AtomicBool::new(false),
                opens: AtomicUsize::new(0),
                failing_opens: AtomicUsize::new(0),
                api_keys: Mutex::new(Vec::new()),
            }),
        }
    }

    /// Change how the handshake is answered.
    pub fn set_handshake(&self, behavior: HandshakeBehavior) {
        *self.state.handshake.lock() = behavior;
    }

    /// Builder form of [`MockTransport::set_handshake`].
    pub fn with_handshake(self, behavior: HandshakeBehavior) -> Self {
        self.set_handshake(behavior);
        self
    }

    /// Answer outbound messages automatically. Returning `None` sends nothing back.
    pub fn with_responder<F>(self, responder: F) -> Self
    where
        F: Fn(&OutboundMessage) -> Option<InboundMessage> + Send + Sync + 'static,
    {
        *self.state.responder.lock() = Some(Arc::new(responder));
        self
    }

    /// Make the next `count` calls to `open` fail with a connection error.
    pub fn fail_next_opens(&self, count: usize) {
        self.state.failing_opens.store(count, Ordering::Release);
    }

    /// Number of successful and failed `open` calls.
    pub fn open_count(&self) -> usize {
        self.state.opens.load(Ordering::Acquire)
    }

    /// API keys presented to `open`, in order.
    pub fn api_keys(&self) -> Vec<String> {
        self.state.api_keys.lock().clone()
    }

    /// Everything sent so far.
    pub fn sent(&self) -> Vec<OutboundMessage> {
        self.state.sent.lock().clone()
    }

    /// Sent messages that answer inbound invocations.
    pub fn replies(&self) -> Vec<OutboundMessage> {
        self.sent().into_iter().filter(OutboundMessage::is_reply).collect()
    }

    /// Wait until at least `count` messages were sent, or `timeout` elapses.
    pub async fn wait_for_sent(&self, count: usize, timeout: Duration) -> Vec<OutboundMessage> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            let notified = self.state.sent_notify.notified();
            {
                let sent = self.state.sent.lock();
                if sent.len() >= count {
                    return sent.clone();
                }
            }
            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                return self.sent();
            }
        }
    }

    /// Wait until at least `count` replies were sent, or `timeout` elapses.
    pub async fn wait_for_replies(&self, count: usize, timeout: Duration) -> Vec<OutboundMessage> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            let notified = self.state.sent_notify.notified();
            let replies = self.replies();
            if replies.len() >= count {
                return replies;
            }
            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                return self.replies();
            }
        }
    }

    /// Deliver an inbound message as if the peer pushed it.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::NotConnected`] if the mock is not open.
    pub async fn inject(&self, message: InboundMessage) -> TransportResult<()> {
        let sender = self
            .state
            .events
            .lock()
            .clone()
            .ok_or(TransportError::NotConnected)?;
        sender
            .send(TransportEvent::Message(message))
            .await
            .map_err(|_| TransportError::NotConnected)
    }

    /// Parse and deliver a raw JSON frame.
    ///
    /// # Errors
    ///
    /// Returns a protocol error for malformed frames, or `NotConnected`.
    pub async fn inject_json(&self, frame: serde_json::Value) -> TransportResult<()> {
        self.inject(InboundMessage::from_value(frame)?).await
    }

    /// Simulate the peer dropping the connection.
    pub async fn drop_connection(&self, reason: &str) {
        self.state.open.store(false, Ordering::Release);
        let sender = self.state.events.lock().take();
        if let Some(sender) = sender {
            let _ = sender.send(TransportEvent::closed(reason)).await;
        }
    }

    async fn push(&self, message: InboundMessage) {
        let sender = self.state.events.lock().clone();
        if let Some(sender) = sender {
            let _ = sender.send(TransportEvent::Message(message)).await;
        }
    }
}

#[async_trait]
impl Transport for MockTransport {
    fn transport_type(&self) -> TransportType {
        self.state.transport_type
    }

    async fn open(
        &self,
        credentials: &Credentials,
        events: mpsc::Sender<TransportEvent>,
    ) -> TransportResult<()> {
        self.state.opens.fetch_add(1, Ordering::AcqRel);
        self.state.api_keys.lock().push(credentials.api_key.clone());

        let failing = self.state.failing_opens.load(Ordering::Acquire);
        if failing > 0 {
            self.state.failing_opens.store(failing - 1, Ordering::Release);
            return Err(TransportError::ConnectionFailed(
                "mock connection refused".to_string(),
            ));
        }

        *self.state.events.lock() = Some(events);
        self.state.open.store(true, Ordering::Release);
        Ok(())
    }

    async fn send(&self, message: &OutboundMessage) -> TransportResult<()> {
        let handshake_needed = self.requires_handshake();
        if handshake_needed && !self.is_open() {
            return Err(TransportError::NotConnected);
        }

        self.state.sent.lock().push(message.clone());
        self.state.sent_notify.notify_waiters();

        if let OutboundMessage::Auth { .. } = message {
            let behavior = self.state.handshake.lock().clone();
            match behavior {
                HandshakeBehavior::Accept => {
                    self.push(InboundMessage::AuthResponse(AuthResponse {
                        success: true,
                        error: None,
                    }))
                    .await;
                }
                HandshakeBehavior::Reject(reason) => {
                    self.push(InboundMessage::AuthResponse(AuthResponse {
                        success: false,
                        error: Some(reason),
                    }))
                    .await;
                }
                HandshakeBehavior::Silent => {}
            }
            return Ok(());
        }

        let responder = self.state.responder.lock().clone();
        if let Some(reply) = responder.and_then(|respond| respond(message)) {
            self.push(reply).await;
        }
        Ok(())
    }

    async fn close(&self) -> TransportResult<()> {
        self.state.open.store(false, Ordering::Release);
        self.state.events.lock().take();
        Ok(())
    }

    fn is_open(&self) -> bool {
        self.state.open.load(Ordering::Acquire)
    }

    fn requires_handshake(&self) -> bool {
        self.state.transport_type == TransportType::WebSocket
    }

    fn endpoint(&self) -> Option<String> {
        Some("mock://".to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{ToolReply, ToolRequest};

    #[tokio::test]
    async fn test_mock_records_and_answers_handshake() {
        let mock = MockTransport::new();
        let (tx, mut rx) = mpsc::channel(8);
        mock.open(&Credentials::new("k"), tx).await.unwrap();

        mock.send(&OutboundMessage::Auth {
            api_key: "k".into(),
        })
        .await
        .unwrap();

        let event = rx.recv().await.unwrap();
        assert!(matches!(
            event,
            TransportEvent::Message(InboundMessage::AuthResponse(AuthResponse {
                success: true,
                ..
            }))
        ));
        assert_eq!(mock.sent().len(), 1);
        assert_eq!(mock.api_keys(), vec!["k".to_string()]);
    }

    #[tokio::test]
    async fn test_mock_inject_and_drop() {
        let mock = MockTransport::new();
        let (tx, mut rx) = mpsc::channel(8);
        mock.open(&Credentials::new("k"), tx).await.unwrap();

        let request = InboundMessage::ToolRequest(ToolRequest {
            request_id: "r1".into(),
            tool_name: "echo".into(),
            params: serde_json::Map::new(),
            auth_token: None,
        });
        mock.inject(request.clone()).await.unwrap();
        assert_eq!(rx.recv().await.unwrap(), TransportEvent::Message(request));

        mock.drop_connection("gone").await;
        assert_eq!(rx.recv().await.unwrap(), TransportEvent::closed("gone"));
        assert!(!mock.is_open());
        assert!(
            mock.send(&OutboundMessage::ToolResponse {
                request_id: "r1".into(),
                reply: ToolReply::success(serde_json::Value::Null),
            })
            .await
            .is_err()
        );
    }

    #[tokio::test]
    async fn test_mock_failing_opens() {
        let mock = MockTransport::new();
        mock.fail_next_opens(1);
        let (tx, _rx) = mpsc::channel(8);
        assert!(mock.open(&Credentials::new("k"), tx.clone()).await.is_err());
        assert!(mock.open(&Credentials::new("k"), tx).await.is_ok());
        assert_eq!(mock.open_count(), 2);
    }
}
