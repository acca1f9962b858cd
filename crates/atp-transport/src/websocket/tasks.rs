//! Background tasks for the websocket binding: frame reader and keepalive pings.

use std::sync::atomic::Ordering;
use std::time::Duration;

use futures::SinkExt as _;
use futures::StreamExt as _;
use futures::stream::SplitStream;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

use super::transport::WebSocketTransport;
use crate::events::TransportEvent;
use crate::protocol::InboundMessage;

type WsReader = SplitStream<WebSocketStream<MaybeTlsStream<TcpStream>>>;

impl WebSocketTransport {
    /// Spawn the reader task, forwarding parsed frames until the stream ends or
    /// the binding is closed.
    pub(super) fn spawn_reader_task(
        &self,
        mut reader: WsReader,
        events: mpsc::Sender<TransportEvent>,
        cancel: CancellationToken,
    ) -> JoinHandle<()> {
        let writer = self.writer.clone();
        let open = self.open.clone();

        tokio::spawn(async move {
            let reason = loop {
                let frame = tokio::select! {
                    () = cancel.cancelled() => return,
                    frame = reader.next() => frame,
                };

                let text = match frame {
                    Some(Ok(Message::Text(text))) => text.as_str().to_owned(),
                    Some(Ok(Message::Binary(bytes))) => match String::from_utf8(bytes.to_vec()) {
                        Ok(text) => text,
                        Err(e) => {
                            warn!("Dropping non-UTF-8 binary frame: {}", e);
                            continue;
                        }
                    },
                    Some(Ok(Message::Ping(_) | Message::Pong(_) | Message::Frame(_))) => {
                        trace!("Control frame received");
                        continue;
                    }
                    Some(Ok(Message::Close(frame))) => {
                        break frame.map_or_else(
                            || "closed by peer".to_string(),
                            |f| format!("closed by peer: {} {}", f.code, f.reason.as_str()),
                        );
                    }
                    Some(Err(e)) => break format!("websocket read failed: {e}"),
                    None => break "websocket stream ended".to_string(),
                };

                match InboundMessage::parse(&text) {
                    Ok(message) => {
                        trace!(tag = message.tag(), "Websocket frame received");
                        tokio::select! {
                            () = cancel.cancelled() => return,
                            sent = events.send(TransportEvent::Message(message)) => {
                                if sent.is_err() {
                                    debug!("Event receiver dropped; stopping websocket reader");
                                    return;
                                }
                            }
                        }
                    }
                    Err(e) => warn!("Dropping malformed websocket frame: {}", e),
                }
            };

            open.store(false, Ordering::Release);
            writer.lock().await.take();
            if !cancel.is_cancelled() {
                debug!(%reason, "Websocket reader finished");
                let _ = events.send(TransportEvent::closed(reason)).await;
            }
        })
    }

    /// Spawn keep-alive task to send periodic ping messages
    pub(super) fn spawn_keep_alive_task(
        &self,
        interval: Duration,
        cancel: CancellationToken,
    ) -> JoinHandle<()> {
        let writer = self.writer.clone();
        let open = self.open.clone();

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // The first tick completes immediately.
            ticker.tick().await;
            let mut ping_count = 0u64;

            loop {
                tokio::select! {
                    () = cancel.cancelled() => break,
                    _ = ticker.tick() => {}
                }

                if !open.load(Ordering::Acquire) {
                    continue;
                }

                if let Some(w) = writer.lock().await.as_mut() {
                    ping_count += 1;
                    let ping_data = format!("ping-{ping_count}");
                    match w.send(Message::Ping(ping_data.into_bytes().into())).await {
                        Ok(()) => trace!("Keep-alive ping {} sent", ping_count),
                        // The reader observes the broken stream and reports it.
                        Err(e) => warn!("Keep-alive ping failed: {}", e),
                    }
                }
            }
        })
    }
}
