//! HTTP routes exposing registered tools as local endpoints.
//!
//! - `GET  /toolkits/{toolkit}`: the toolkit and its tools
//! - `GET  /toolkits/{toolkit}/tools/{tool}`: one tool's context
//! - `POST /toolkits/{toolkit}/tools/{tool}`: invoke with a JSON object of
//!   parameters; a `Bearer` authorization header supplies the auth token
//!
//! Unknown toolkits and tools answer `404 {"error": …}`; failed invocations
//! answer `400 {"error": …}`.

use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode, header::AUTHORIZATION};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use serde_json::{Map, Value, json};
use tracing::{debug, warn};

use crate::directory::ToolkitDirectory;
use crate::error::AtpError;
use crate::toolkit::ToolkitClient;

/// Build the router over a directory of toolkits.
pub fn router(directory: Arc<ToolkitDirectory>) -> Router {
    Router::new()
        .route("/toolkits/{toolkit}", get(describe_toolkit))
        .route(
            "/toolkits/{toolkit}/tools/{tool}",
            get(describe_tool).post(invoke_tool),
        )
        .with_state(directory)
}

fn error(status: StatusCode, message: impl Into<String>) -> Response {
    (status, Json(json!({ "error": message.into() }))).into_response()
}

fn lookup(directory: &ToolkitDirectory, toolkit: &str) -> Result<ToolkitClient, Response> {
    directory
        .get(toolkit)
        .ok_or_else(|| error(StatusCode::NOT_FOUND, "Toolkit not found"))
}

async fn describe_toolkit(
    State(directory): State<Arc<ToolkitDirectory>>,
    Path(toolkit): Path<String>,
) -> Response {
    let client = match lookup(&directory, &toolkit) {
        Ok(client) => client,
        Err(response) => return response,
    };
    let mut description = client.describe();
    if let Value::Object(fields) = &mut description {
        fields.insert("toolkit".to_string(), Value::String(toolkit));
    }
    Json(description).into_response()
}

async fn describe_tool(
    State(directory): State<Arc<ToolkitDirectory>>,
    Path((toolkit, tool)): Path<(String, String)>,
) -> Response {
    let client = match lookup(&directory, &toolkit) {
        Ok(client) => client,
        Err(response) => return response,
    };
    match client.resolve(&tool) {
        Some(tool) => Json(tool.describe()).into_response(),
        None => error(StatusCode::NOT_FOUND, "Tool not found"),
    }
}

fn bearer_token(headers: &HeaderMap) -> Option<String> {
    headers
        .get(AUTHORIZATION)?
        .to_str()
        .ok()?
        .strip_prefix("Bearer ")
        .map(|token| token.trim().to_string())
        .filter(|token| !token.is_empty())
}

async fn invoke_tool(
    State(directory): State<Arc<ToolkitDirectory>>,
    Path((toolkit, tool)): Path<(String, String)>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let client = match lookup(&directory, &toolkit) {
        Ok(client) => client,
        Err(response) => return response,
    };
    if client.resolve(&tool).is_none() {
        return error(StatusCode::NOT_FOUND, "Tool not found");
    }

    let params = if body.iter().all(u8::is_ascii_whitespace) {
        Map::new()
    } else {
        match serde_json::from_slice::<Value>(&body) {
            Ok(Value::Object(params)) => params,
            Ok(Value::Null) => Map::new(),
            Ok(_) => return error(StatusCode::BAD_REQUEST, "parameters must be a JSON object"),
            Err(e) => return error(StatusCode::BAD_REQUEST, format!("invalid JSON body: {e}")),
        }
    };

    debug!(toolkit = %toolkit, tool = %tool, "Local invocation");
    match client.invoke_local(&tool, params, bearer_token(&headers)).await {
        Ok(result) => Json(json!({ "result": result })).into_response(),
        Err(AtpError::ToolExecution { message, .. }) => error(StatusCode::BAD_REQUEST, message),
        Err(e) => {
            warn!(toolkit = %toolkit, tool = %tool, "Local invocation failed: {}", e);
            error(StatusCode::BAD_REQUEST, e.to_string())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ToolkitConfig;
    use crate::registry::ToolDefinition;
    use crate::tool::{ToolArguments, ToolError};
    use atp_transport::mock::MockTransport;
    use axum::body::Body;
    use axum::http::Request;
    use pretty_assertions::assert_eq;
    use tower::ServiceExt;

    fn directory() -> Arc<ToolkitDirectory> {
        let client = ToolkitClient::with_transport(
            ToolkitConfig::new("key", "weather-app"),
            Arc::new(MockTransport::new()),
        )
        .unwrap();
        client
            .register_local(
                ToolDefinition::from_fn("forecast", |args: ToolArguments| async move {
                    let city = args.get_str("city").unwrap_or_default().to_string();
                    if city.is_empty() {
                        return Err(ToolError::new("city is empty"));
                    }
                    Ok(json!({ "city": city, "sky": "clear" }))
                })
                .params(["city"])
                .required(["city"]),
            )
            .unwrap();
        client
            .register_local(
                ToolDefinition::from_fn("whoami", |args: ToolArguments| async move {
                    Ok::<Value, ToolError>(json!(args.get_str("auth_token")))
                })
                .requires_auth_token(),
            )
            .unwrap();

        let directory = ToolkitDirectory::new();
        directory.insert("weather", client);
        Arc::new(directory)
    }

    async fn send(request: Request<Body>) -> (StatusCode, Value) {
        let response = router(directory()).oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, serde_json::from_slice(&bytes).unwrap())
    }

    fn get(uri: &str) -> Request<Body> {
        Request::builder().uri(uri).body(Body::empty()).unwrap()
    }

    fn post(uri: &str, body: Value) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri(uri)
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    #[tokio::test]
    async fn test_describe_toolkit() {
        let (status, body) = send(get("/toolkits/weather")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["toolkit"], "weather");
        assert_eq!(body["app_name"], "weather-app");
        assert_eq!(body["tools"].as_array().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_unknown_toolkit_and_tool() {
        let (status, body) = send(get("/toolkits/maps")).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body, json!({"error": "Toolkit not found"}));

        let (status, body) = send(get("/toolkits/weather/tools/radar")).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body, json!({"error": "Tool not found"}));

        let (status, _) = send(post("/toolkits/weather/tools/radar", json!({}))).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_describe_tool() {
        let (status, body) = send(get("/toolkits/weather/tools/forecast")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["function"], "forecast");
    }

    #[tokio::test]
    async fn test_invoke_tool() {
        let (status, body) =
            send(post("/toolkits/weather/tools/forecast", json!({"city": "Oslo"}))).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, json!({"result": {"city": "Oslo", "sky": "clear"}}));
    }

    #[tokio::test]
    async fn test_invoke_failures_are_bad_requests() {
        let (status, body) =
            send(post("/toolkits/weather/tools/forecast", json!({"city": ""}))).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body, json!({"error": "city is empty"}));

        let (status, body) = send(post("/toolkits/weather/tools/forecast", json!({}))).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body["error"].as_str().unwrap().contains("city"));

        let (status, _) = send(post("/toolkits/weather/tools/forecast", json!([1, 2]))).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_bearer_token_is_forwarded() {
        let (status, _) = send(post("/toolkits/weather/tools/whoami", json!({}))).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let request = Request::builder()
            .method("POST")
            .uri("/toolkits/weather/tools/whoami")
            .header("authorization", "Bearer tok-9")
            .body(Body::empty())
            .unwrap();
        let (status, body) = send(request).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, json!({"result": "tok-9"}));
    }
}
