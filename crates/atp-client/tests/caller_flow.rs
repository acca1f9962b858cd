//! Caller-side flows: batches of model tool calls, streamed execution and
//! local tool routes.

use std::sync::Arc;
use std::time::Duration;

use atp_client::prelude::*;
use atp_client::{ToolkitDirectory, acknowledgment, collect_stream, routes};
use atp_transport::mock::MockTransport;
use atp_transport::{InboundMessage, OutboundMessage, ResponseKind};
use axum::body::Body;
use axum::http::{Request, StatusCode};
use pretty_assertions::assert_eq;
use serde_json::{Value, json};
use tower::ServiceExt;
use wiremock::matchers::{body_partial_json, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn task_answering() -> MockTransport {
    MockTransport::new().with_responder(|message| match message {
        OutboundMessage::TaskRequest { request_id, payload, .. } => Some(InboundMessage::Response {
            kind: ResponseKind::TaskResponse,
            request_id: request_id.clone(),
            payload: json!({"function": payload["function"], "echo": payload["arguments"]}),
        }),
        _ => None,
    })
}

#[tokio::test]
async fn test_batch_with_malformed_middle_call() {
    let transport = task_answering();
    let config = LlmClientConfig::new("llm-key").with_auth_timeout(Duration::from_secs(2));
    let client = LlmClient::with_transport(config, Arc::new(transport.clone())).unwrap();

    let calls = vec![
        json!({"id": "c1", "function": {"name": "get_weather", "arguments": "{\"city\": \"Lima\"}"}}),
        json!({"id": "c2", "function": {"name": "get_time", "arguments": "{not json"}}),
        json!({"id": "c3", "function": {"name": "get_date", "arguments": null}}),
    ];
    let results = client
        .call_tool("clock", &calls, &CallOptions::new(Provider::OpenAi))
        .await
        .unwrap();

    assert_eq!(results.len(), 3);
    assert_eq!(results[0].tool_call_id, "c1");
    assert_eq!(
        results[0].result,
        json!({"function": "get_weather", "echo": {"city": "Lima"}})
    );
    assert!(results[1].is_error());
    assert_eq!(results[2].result, json!({"function": "get_date", "echo": {}}));

    let task_requests = transport
        .sent()
        .into_iter()
        .filter(|message| matches!(message, OutboundMessage::TaskRequest { .. }))
        .count();
    assert_eq!(task_requests, 2);

    let ack = acknowledgment("openai", &results[0].tool_call_id, "get_weather", &results[0].result)
        .unwrap();
    assert_eq!(ack["role"], "tool");
    assert_eq!(ack["tool_call_id"], "c1");
    client.close().await;
}

#[tokio::test]
async fn test_streamed_execution_over_http() {
    let server = MockServer::start().await;
    let body = concat!(
        "data: {\"delta\": \"Sun\"}\n\n",
        "data: {\"delta\": \"ny\"}\n\n",
        "data: {\"type\": \"done\", \"payload\": {\"sky\": \"sunny\"}}\n\n",
        "data: [DONE]\n\n",
    );
    Mock::given(method("POST"))
        .and(path("/api/v1/atp/llm-client/process/"))
        .and(header("accept", "text/event-stream"))
        .and(body_partial_json(json!({"type": "task_request", "toolkit_id": "weather"})))
        .respond_with(ResponseTemplate::new(200).set_body_raw(body, "text/event-stream"))
        .expect(1)
        .mount(&server)
        .await;

    let config = LlmClientConfig::new("llm-key")
        .with_base_url(server.uri())
        .with_transport(CallerTransport::Http);
    let client = LlmClient::new(config).unwrap();
    let calls = [json!({"name": "forecast", "input": {"city": "Lima"}})];

    let events = client
        .call_tool_streaming("weather", &calls, &CallOptions::new(Provider::Anthropic))
        .await
        .unwrap();
    let collected = collect_stream(events).await.unwrap();

    assert_eq!(collected.events, 3);
    assert_eq!(collected.text, "Sunny");
    assert_eq!(collected.into_value(), json!({"sky": "sunny"}));
}

#[tokio::test]
async fn test_local_routes_over_directory() {
    let toolkit = ToolkitClient::with_transport(
        ToolkitConfig::new("key", "math"),
        Arc::new(MockTransport::new()),
    )
    .unwrap();
    toolkit
        .register_local(
            ToolDefinition::from_fn("add", |args: ToolArguments| async move {
                let a = args.get("a").and_then(Value::as_i64).unwrap_or(0);
                let b = args.get("b").and_then(Value::as_i64).unwrap_or(0);
                Ok::<Value, ToolError>(json!(a + b))
            })
            .params(["a", "b"])
            .required(["a", "b"]),
        )
        .unwrap();
    let directory = Arc::new(ToolkitDirectory::new());
    directory.insert("math", toolkit);

    let request = Request::builder()
        .method("POST")
        .uri("/toolkits/math/tools/add")
        .header("content-type", "application/json")
        .body(Body::from(json!({"a": 2, "b": 3}).to_string()))
        .unwrap();
    let response = routes::router(directory).oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let body: Value = serde_json::from_slice(&bytes).unwrap();
    assert_eq!(body, json!({"result": 5}));
}
