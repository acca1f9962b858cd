//! Websocket binding against a local websocket server.

use std::time::Duration;

use atp_transport::{
    Credentials, InboundMessage, OutboundMessage, ToolReply, Transport, TransportError,
    TransportEvent, WebSocketConfig, WebSocketTransport,
};
use futures::{SinkExt, StreamExt};
use pretty_assertions::assert_eq;
use serde_json::{Value, json};
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;

#[tokio::test]
async fn test_round_trip_and_peer_close() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    let server = tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        let mut ws = tokio_tungstenite::accept_async(stream).await.unwrap();

        let push = json!({
            "message_type": "atp_tool_request",
            "payload": {"request_id": "r1", "tool_name": "echo", "params": {"text": "hi"}}
        });
        ws.send(Message::text(push.to_string())).await.unwrap();
        // Garbage must not take the connection down.
        ws.send(Message::text("not json")).await.unwrap();

        let reply = loop {
            match ws.next().await.unwrap().unwrap() {
                Message::Text(text) => break serde_json::from_str::<Value>(text.as_str()).unwrap(),
                _ => continue,
            }
        };
        ws.close(None).await.unwrap();
        reply
    });

    let config = WebSocketConfig::new(format!("ws://{addr}/ws/v1/atp/toolkit-client/{{api_key}}/"))
        .with_keep_alive_interval(Duration::from_millis(100));
    let transport = WebSocketTransport::new(config);
    let (tx, mut rx) = mpsc::channel(8);
    transport.open(&Credentials::new("k"), tx).await.unwrap();
    assert!(transport.is_open());

    let event = tokio::time::timeout(Duration::from_secs(5), rx.recv())
        .await
        .unwrap()
        .unwrap();
    let TransportEvent::Message(InboundMessage::ToolRequest(request)) = event else {
        panic!("unexpected event: {event:?}");
    };
    assert_eq!(request.tool_name, "echo");

    transport
        .send(&OutboundMessage::ToolResponse {
            request_id: request.request_id.clone(),
            reply: ToolReply::success(Value::Object(request.params.clone())),
        })
        .await
        .unwrap();

    let reply = server.await.unwrap();
    assert_eq!(
        reply,
        json!({"type": "tool_response", "request_id": "r1", "result": {"text": "hi"}})
    );

    let closed = tokio::time::timeout(Duration::from_secs(5), rx.recv())
        .await
        .unwrap()
        .unwrap();
    assert!(matches!(closed, TransportEvent::Closed { .. }));
    assert!(!transport.is_open());

    let err = transport
        .send(&OutboundMessage::Auth { api_key: "k".into() })
        .await
        .unwrap_err();
    assert!(matches!(err, TransportError::NotConnected));

    transport.close().await.unwrap();
}

#[tokio::test]
async fn test_open_fails_fast_when_nothing_listens() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let transport = WebSocketTransport::new(
        WebSocketConfig::new(format!("ws://{addr}/{{api_key}}/"))
            .with_connect_timeout(Duration::from_secs(2)),
    );
    let (tx, _rx) = mpsc::channel(1);
    let err = transport.open(&Credentials::new("k"), tx).await.unwrap_err();
    assert!(matches!(err, TransportError::ConnectionFailed(_)));
    assert!(err.is_retryable());
}
