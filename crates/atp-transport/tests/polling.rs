//! Polling binding against a mock HTTP server.

use std::time::Duration;

use atp_transport::{
    Credentials, InboundMessage, OutboundMessage, PollingConfig, PollingTransport, ToolReply,
    Transport, TransportError, TransportEvent,
};
use pretty_assertions::assert_eq;
use serde_json::json;
use tokio::sync::mpsc;
use wiremock::matchers::{body_json, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn fast_config(server: &MockServer) -> PollingConfig {
    PollingConfig::new(server.uri()).with_poll_interval(Duration::from_millis(50))
}

#[tokio::test]
async fn test_poller_forwards_inbox_item_after_failures() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/api/v1/toolkit/key-1/inbox"))
        .respond_with(ResponseTemplate::new(500).set_body_string("inbox unavailable"))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/api/v1/toolkit/key-1/inbox"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({})))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/api/v1/toolkit/key-1/inbox"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "request_id": "req-7",
            "tool_name": "echo",
            "params": {"text": "hi"}
        })))
        .mount(&server)
        .await;

    let transport = PollingTransport::new(fast_config(&server)).unwrap();
    let (tx, mut rx) = mpsc::channel(4);
    transport.open(&Credentials::new("key-1"), tx).await.unwrap();
    assert!(transport.is_open());
    assert!(!transport.requires_handshake());

    let event = tokio::time::timeout(Duration::from_secs(5), rx.recv())
        .await
        .expect("poller should deliver an item")
        .unwrap();
    match event {
        TransportEvent::Message(InboundMessage::ToolRequest(request)) => {
            assert_eq!(request.request_id, "req-7");
            assert_eq!(request.tool_name, "echo");
            assert_eq!(request.params.get("text"), Some(&json!("hi")));
        }
        other => panic!("unexpected event: {other:?}"),
    }

    transport.close().await.unwrap();
    assert!(!transport.is_open());
}

#[tokio::test]
async fn test_reply_posts_to_respond_endpoint() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/v1/toolkit/key-2/inbox"))
        .respond_with(ResponseTemplate::new(204))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/api/v1/toolkit/key-2/inbox/respond"))
        .and(body_json(json!({
            "request_id": "req-1",
            "response": {"text": "hi"}
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"status": "ok"})))
        .expect(1)
        .mount(&server)
        .await;

    let transport = PollingTransport::new(fast_config(&server)).unwrap();
    let (tx, _rx) = mpsc::channel(4);
    transport.open(&Credentials::new("key-2"), tx).await.unwrap();

    transport
        .send(&OutboundMessage::ToolResponse {
            request_id: "req-1".into(),
            reply: ToolReply::success(json!({"text": "hi"})),
        })
        .await
        .unwrap();

    // Auth is meaningless for the inbox and must not hit the server.
    transport
        .send(&OutboundMessage::Auth {
            api_key: "key-2".into(),
        })
        .await
        .unwrap();

    transport.close().await.unwrap();
}

#[tokio::test]
async fn test_error_reply_posts_error_object() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/v1/toolkit/key-4/inbox"))
        .respond_with(ResponseTemplate::new(204))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/api/v1/toolkit/key-4/inbox/respond"))
        .and(body_json(json!({
            "request_id": "req-9",
            "response": {"error": "boom"}
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"status": "ok"})))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/api/v1/toolkit/key-4/inbox/respond"))
        .and(body_json(json!({
            "request_id": "act-1",
            "session_id": "s1",
            "response": {"count": 1},
            "terminated": false
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"status": "ok"})))
        .expect(1)
        .mount(&server)
        .await;

    let transport = PollingTransport::new(fast_config(&server)).unwrap();
    let (tx, _rx) = mpsc::channel(4);
    transport.open(&Credentials::new("key-4"), tx).await.unwrap();

    transport
        .send(&OutboundMessage::ToolResponse {
            request_id: "req-9".into(),
            reply: ToolReply::failure("boom"),
        })
        .await
        .unwrap();
    transport
        .send(&OutboundMessage::AppResponse {
            request_id: "act-1".into(),
            session_id: "s1".into(),
            reply: ToolReply::success(json!({"count": 1})),
            terminated: false,
        })
        .await
        .unwrap();

    transport.close().await.unwrap();
}

#[tokio::test]
async fn test_reply_failure_is_reported() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/v1/toolkit/key-3/inbox/respond"))
        .respond_with(ResponseTemplate::new(502))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(204))
        .mount(&server)
        .await;

    let transport = PollingTransport::new(fast_config(&server)).unwrap();
    let (tx, _rx) = mpsc::channel(4);
    transport.open(&Credentials::new("key-3"), tx).await.unwrap();

    let err = transport
        .send(&OutboundMessage::ToolResponse {
            request_id: "req-1".into(),
            reply: ToolReply::failure("boom"),
        })
        .await
        .unwrap_err();
    assert!(matches!(err, TransportError::Http(_)), "{err}");

    let err = transport
        .send(&OutboundMessage::TaskRequest {
            request_id: "task_1".into(),
            toolkit_id: "kit".into(),
            payload: json!({}),
            provider: "openai".into(),
            auth_token: None,
            user_prompt: None,
        })
        .await
        .unwrap_err();
    assert!(matches!(err, TransportError::NotAvailable(_)));

    transport.close().await.unwrap();
}

#[tokio::test]
async fn test_fetch_once_ignores_null_body() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/v1/toolkit/key-4/inbox"))
        .respond_with(ResponseTemplate::new(200).set_body_string("null"))
        .mount(&server)
        .await;

    let transport = PollingTransport::new(fast_config(&server)).unwrap();
    assert_eq!(transport.fetch_once("key-4").await.unwrap(), None);
}

#[test]
fn test_requires_base_url() {
    assert!(PollingTransport::new(PollingConfig::default()).is_err());
}
