//! Tool handler traits for standard and interactive tools.

use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use futures::future::BoxFuture;
use serde_json::{Map, Value};
use thiserror::Error;
use tokio_util::task::AbortOnDropHandle;

use crate::error::AtpError;
use crate::registry::{AUTH_TOKEN_PARAM, AuthTokenMode};

/// Error returned by user tool code.
///
/// Converted to `{"error": message}` at the dispatch boundary.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message}")]
pub struct ToolError {
    message: String,
}

impl ToolError {
    /// Create a tool error.
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }

    /// The failure description.
    pub fn message(&self) -> &str {
        &self.message
    }
}

impl From<String> for ToolError {
    fn from(message: String) -> Self {
        Self::new(message)
    }
}

impl From<&str> for ToolError {
    fn from(message: &str) -> Self {
        Self::new(message)
    }
}

impl From<serde_json::Error> for ToolError {
    fn from(err: serde_json::Error) -> Self {
        Self::new(err.to_string())
    }
}

/// Arguments of one invocation.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ToolArguments {
    /// Id of the invocation (the session id for interactive starts).
    pub request_id: String,
    /// Parameters, including the injected auth token when the tool accepts one.
    pub params: Map<String, Value>,
}

impl ToolArguments {
    /// Create arguments for an invocation.
    pub fn new(request_id: impl Into<String>, params: Map<String, Value>) -> Self {
        Self {
            request_id: request_id.into(),
            params,
        }
    }

    /// A parameter value.
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.params.get(name)
    }

    /// A string parameter, if present and a string.
    pub fn get_str(&self, name: &str) -> Option<&str> {
        self.params.get(name).and_then(Value::as_str)
    }

    /// A string parameter that must be present.
    ///
    /// # Errors
    ///
    /// Returns a [`ToolError`] naming the parameter when it is missing or not a string.
    pub fn require_str(&self, name: &str) -> Result<&str, ToolError> {
        self.get_str(name)
            .ok_or_else(|| ToolError::new(format!("missing string parameter '{name}'")))
    }

    /// The injected auth token, if any.
    pub fn auth_token(&self) -> Option<&str> {
        self.get_str(AUTH_TOKEN_PARAM)
    }

    /// The parameters as a JSON object.
    pub fn into_params(self) -> Map<String, Value> {
        self.params
    }
}

/// A standard, single-shot tool.
#[async_trait]
pub trait ToolHandler: Send + Sync {
    /// Execute the tool.
    async fn call(&self, args: ToolArguments) -> Result<Value, ToolError>;

    /// How the tool consumes the invocation's auth token.
    fn auth_token_mode(&self) -> AuthTokenMode {
        AuthTokenMode::Ignore
    }
}

type ToolFn = Arc<dyn Fn(ToolArguments) -> BoxFuture<'static, Result<Value, ToolError>> + Send + Sync>;

/// Adapts an async closure to [`ToolHandler`].
#[derive(Clone)]
pub struct FunctionTool {
    handler: ToolFn,
    auth_token_mode: AuthTokenMode,
}

impl std::fmt::Debug for FunctionTool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FunctionTool")
            .field("auth_token_mode", &self.auth_token_mode)
            .finish_non_exhaustive()
    }
}

impl FunctionTool {
    /// Wrap a closure.
    pub fn new<F, Fut>(handler: F) -> Self
    where
        F: Fn(ToolArguments) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value, ToolError>> + Send + 'static,
    {
        let handler: ToolFn = Arc::new(move |args| Box::pin(handler(args)) as BoxFuture<'static, _>);
        Self {
            handler,
            auth_token_mode: AuthTokenMode::Ignore,
        }
    }

    /// Declare how the closure consumes auth tokens.
    pub fn with_auth_token_mode(mut self, mode: AuthTokenMode) -> Self {
        self.auth_token_mode = mode;
        self
    }
}

#[async_trait]
impl ToolHandler for FunctionTool {
    async fn call(&self, args: ToolArguments) -> Result<Value, ToolError> {
        (self.handler)(args).await
    }

    fn auth_token_mode(&self) -> AuthTokenMode {
        self.auth_token_mode
    }
}

/// One round of an interactive tool.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AppStep {
    /// Application state carried to the next round.
    pub state: Value,
    /// Payload returned to the server for rendering.
    pub render: Value,
    /// Whether the session ends with this round.
    pub terminate: bool,
}

impl AppStep {
    /// A round that keeps the session open.
    pub fn render(state: Value, render: Value) -> Self {
        Self {
            state,
            render,
            terminate: false,
        }
    }

    /// A round that ends the session.
    pub fn finish(state: Value, render: Value) -> Self {
        Self {
            state,
            render,
            terminate: true,
        }
    }
}

/// A multi-turn interactive tool.
///
/// `start` runs on the first invocation and `act` on each action addressed to
/// the session. Actions on one session never run concurrently.
#[async_trait]
pub trait AppHandler: Send + Sync {
    /// Produce the initial state and render.
    async fn start(&self, args: ToolArguments) -> Result<AppStep, ToolError>;

    /// Apply an action to the current state.
    async fn act(
        &self,
        state: Value,
        action: Value,
        args: ToolArguments,
    ) -> Result<AppStep, ToolError>;

    /// How the app consumes the session's auth token.
    fn auth_token_mode(&self) -> AuthTokenMode {
        AuthTokenMode::Ignore
    }
}

/// Run user tool code on its own task so a panic becomes an error.
///
/// Dropping the returned future aborts the task.
pub(crate) async fn invoke_isolated<T, F>(tool: &str, invocation: F) -> Result<T, AtpError>
where
    T: Send + 'static,
    F: Future<Output = Result<T, ToolError>> + Send + 'static,
{
    let handle = AbortOnDropHandle::new(tokio::spawn(invocation));
    match handle.await {
        Ok(Ok(value)) => Ok(value),
        Ok(Err(e)) => Err(AtpError::tool_execution(tool, e.message())),
        Err(e) if e.is_panic() => Err(AtpError::tool_execution(tool, "tool panicked")),
        Err(e) => Err(AtpError::tool_execution(tool, e.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_function_tool_invokes_closure() {
        let tool = FunctionTool::new(|args: ToolArguments| async move {
            let text = args.require_str("text")?;
            Ok(json!({ "text": text }))
        });

        let params = json!({"text": "hi"}).as_object().cloned().unwrap();
        let result = tool.call(ToolArguments::new("r1", params)).await.unwrap();
        assert_eq!(result, json!({"text": "hi"}));

        let err = tool.call(ToolArguments::default()).await.unwrap_err();
        assert_eq!(err.message(), "missing string parameter 'text'");
        assert_eq!(tool.auth_token_mode(), AuthTokenMode::Ignore);
    }

    #[tokio::test]
    async fn test_panics_become_execution_errors() {
        let exploding = async {
            let values: Vec<Value> = Vec::new();
            Ok::<Value, ToolError>(values[3].clone())
        };
        let err = invoke_isolated("boom", exploding).await.unwrap_err();
        assert_eq!(err.to_string(), "Tool 'boom' failed: tool panicked");

        let err = invoke_isolated::<Value, _>("fails", async { Err(ToolError::new("bad input")) })
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "Tool 'fails' failed: bad input");
    }

    #[test]
    fn test_auth_token_accessor() {
        let params = json!({"auth_token": "tok", "q": 1}).as_object().cloned().unwrap();
        let args = ToolArguments::new("r1", params);
        assert_eq!(args.auth_token(), Some("tok"));
        assert_eq!(args.get("q"), Some(&json!(1)));
    }
}
