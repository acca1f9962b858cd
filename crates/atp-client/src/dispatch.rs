//! Inbound invocation dispatch.
//!
//! Resolves each invocation against the registry, applies the tool's auth
//! token mode, runs the tool on an isolated task and produces the reply. Tool
//! failures and panics become `{"error": …}` replies; invocations of unknown
//! tools or sessions are logged and dropped without a reply.

use std::sync::Arc;

use async_trait::async_trait;
use atp_transport::{AppAction, AppStart, AppTerminate, InboundMessage, OutboundMessage, ToolReply, ToolRequest};
use serde_json::{Map, Value};
use tracing::{debug, info, warn};

use crate::api::ExecutionReporter;
use crate::connection::{InboundHandler, ReplyChannel};
use crate::error::AtpError;
use crate::registry::{AUTH_TOKEN_PARAM, AuthTokenMode, RegisteredTool, ToolKind, ToolRegistry};
use crate::session::SessionStore;
use crate::tool::{ToolArguments, invoke_isolated};

/// What dispatching one inbound message produced.
#[derive(Debug)]
pub enum DispatchOutcome {
    /// The tool ran and its result is the reply.
    Completed {
        /// Tool that ran.
        tool: String,
        /// Reply to send.
        reply: OutboundMessage,
    },
    /// The invocation failed; the reply carries the error.
    Failed {
        /// Tool that was invoked.
        tool: String,
        /// Error reply to send.
        reply: OutboundMessage,
        /// What went wrong.
        error: AtpError,
    },
    /// Nothing to reply to: unknown tool or session.
    Dropped(AtpError),
    /// A session was ended by the server.
    Terminated(String),
    /// Not an invocation.
    Ignored,
}

impl DispatchOutcome {
    /// The reply to send, if any.
    pub fn reply(&self) -> Option<&OutboundMessage> {
        match self {
            Self::Completed { reply, .. } | Self::Failed { reply, .. } => Some(reply),
            _ => None,
        }
    }

    /// The error behind a failed or dropped invocation.
    pub fn error(&self) -> Option<&AtpError> {
        match self {
            Self::Failed { error, .. } | Self::Dropped(error) => Some(error),
            _ => None,
        }
    }
}

/// Text carried in an error reply.
fn error_text(error: &AtpError) -> String {
    match error {
        AtpError::ToolExecution { message, .. } => message.clone(),
        other => other.to_string(),
    }
}

/// Dispatches inbound invocations against a registry and session store.
#[derive(Debug, Clone)]
pub struct DispatchEngine {
    registry: Arc<ToolRegistry>,
    sessions: Arc<SessionStore>,
    reporter: Option<ExecutionReporter>,
}

impl DispatchEngine {
    /// Create an engine over shared state.
    pub fn new(registry: Arc<ToolRegistry>, sessions: Arc<SessionStore>) -> Self {
        Self {
            registry,
            sessions,
            reporter: None,
        }
    }

    /// Report every standard tool result to the server after replying.
    pub fn with_reporter(mut self, reporter: ExecutionReporter) -> Self {
        self.reporter = Some(reporter);
        self
    }

    /// The session store.
    pub fn sessions(&self) -> &Arc<SessionStore> {
        &self.sessions
    }

    /// Dispatch one inbound message.
    pub async fn dispatch(&self, message: InboundMessage) -> DispatchOutcome {
        match message {
            InboundMessage::ToolRequest(request) => self.invoke_tool(request).await,
            InboundMessage::AppStart(start) => self.start_app(start).await,
            InboundMessage::AppAction(action) => self.act_app(action).await,
            InboundMessage::AppTerminate(terminate) => self.terminate_app(&terminate),
            other => {
                debug!(tag = other.tag(), "Not an invocation");
                DispatchOutcome::Ignored
            }
        }
    }

    async fn invoke_tool(&self, request: ToolRequest) -> DispatchOutcome {
        let ToolRequest {
            request_id,
            tool_name,
            params,
            auth_token,
        } = request;
        info!(request_id = %request_id, tool = %tool_name, "Tool request received");

        let Some(tool) = self.registry.resolve(&tool_name) else {
            warn!(request_id = %request_id, tool = %tool_name, "Dropping request for unknown tool");
            return DispatchOutcome::Dropped(AtpError::ToolNotFound(tool_name));
        };

        let failed = |error: AtpError| {
            warn!(request_id = %request_id, tool = %tool_name, "Tool request failed: {}", error);
            DispatchOutcome::Failed {
                tool: tool_name.clone(),
                reply: OutboundMessage::ToolResponse {
                    request_id: request_id.clone(),
                    reply: ToolReply::failure(error_text(&error)),
                },
                error,
            }
        };

        let handler = match &tool.kind {
            ToolKind::Function(handler) => handler.clone(),
            ToolKind::App(_) => {
                return failed(AtpError::invalid_arguments(
                    &tool.name,
                    "interactive tool must be started with an app start message",
                ));
            }
        };
        let params = match prepare_params(&tool, params, auth_token.as_deref()) {
            Ok(params) => params,
            Err(error) => return failed(error),
        };

        let args = ToolArguments::new(request_id.clone(), params);
        match invoke_isolated(&tool.name, async move { handler.call(args).await }).await {
            Ok(value) => {
                debug!(request_id = %request_id, tool = %tool_name, "Tool completed");
                DispatchOutcome::Completed {
                    tool: tool_name.clone(),
                    reply: OutboundMessage::ToolResponse {
                        request_id: request_id.clone(),
                        reply: ToolReply::success(value),
                    },
                }
            }
            Err(error) => failed(error),
        }
    }

    async fn start_app(&self, start: AppStart) -> DispatchOutcome {
        let AppStart {
            request_id,
            tool_name,
            params,
            auth_token,
        } = start;
        info!(session_id = %request_id, tool = %tool_name, "App start received");

        let Some(tool) = self.registry.resolve(&tool_name) else {
            warn!(session_id = %request_id, tool = %tool_name, "Dropping app start for unknown tool");
            return DispatchOutcome::Dropped(AtpError::ToolNotFound(tool_name));
        };

        let failed = |error: AtpError| {
            warn!(session_id = %request_id, tool = %tool_name, "App start failed: {}", error);
            DispatchOutcome::Failed {
                tool: tool_name.clone(),
                reply: OutboundMessage::AppResponse {
                    request_id: request_id.clone(),
                    session_id: request_id.clone(),
                    reply: ToolReply::failure(error_text(&error)),
                    terminated: true,
                },
                error,
            }
        };

        let ToolKind::App(handler) = &tool.kind else {
            return failed(AtpError::invalid_arguments(&tool.name, "not an interactive tool"));
        };
        let params = match prepare_params(&tool, params, auth_token.as_deref()) {
            Ok(params) => params,
            Err(error) => return failed(error),
        };
        let session_token = auth_token.filter(|_| tool.auth_token_mode.injects());

        let args = ToolArguments::new(request_id.clone(), params);
        match self
            .sessions
            .start(&request_id, &tool.name, handler.clone(), args, session_token)
            .await
        {
            Ok(step) => DispatchOutcome::Completed {
                tool: tool_name.clone(),
                reply: OutboundMessage::AppResponse {
                    request_id: request_id.clone(),
                    session_id: request_id.clone(),
                    reply: ToolReply::success(step.render),
                    terminated: step.terminate,
                },
            },
            Err(error) => failed(error),
        }
    }

    async fn act_app(&self, action: AppAction) -> DispatchOutcome {
        let reply_id = action.reply_id().to_string();
        let AppAction {
            session_id,
            action,
            state,
            ..
        } = action;
        debug!(session_id = %session_id, request_id = %reply_id, "App action received");

        match self.sessions.act(&session_id, &reply_id, action, state).await {
            Ok(step) => DispatchOutcome::Completed {
                tool: String::new(),
                reply: OutboundMessage::AppResponse {
                    request_id: reply_id,
                    session_id,
                    reply: ToolReply::success(step.render),
                    terminated: step.terminate,
                },
            },
            Err(error @ AtpError::SessionNotFound(_)) => {
                warn!(session_id = %session_id, "Dropping action for unknown session");
                DispatchOutcome::Dropped(error)
            }
            Err(error) => {
                warn!(session_id = %session_id, "App action failed: {}", error);
                let tool = match &error {
                    AtpError::ToolExecution { tool, .. } => tool.clone(),
                    _ => String::new(),
                };
                DispatchOutcome::Failed {
                    tool,
                    reply: OutboundMessage::AppResponse {
                        request_id: reply_id,
                        session_id,
                        reply: ToolReply::failure(error_text(&error)),
                        terminated: false,
                    },
                    error,
                }
            }
        }
    }

    fn terminate_app(&self, terminate: &AppTerminate) -> DispatchOutcome {
        if self.sessions.terminate(&terminate.session_id) {
            DispatchOutcome::Terminated(terminate.session_id.clone())
        } else {
            warn!(session_id = %terminate.session_id, "Terminate for unknown session");
            DispatchOutcome::Dropped(AtpError::SessionNotFound(terminate.session_id.clone()))
        }
    }

    async fn report(&self, outcome: &DispatchOutcome) {
        let Some(reporter) = &self.reporter else {
            return;
        };
        let (tool, result) = match outcome {
            DispatchOutcome::Completed {
                tool,
                reply: OutboundMessage::ToolResponse { reply, .. },
            }
            | DispatchOutcome::Failed {
                tool,
                reply: OutboundMessage::ToolResponse { reply, .. },
                ..
            } => (tool, reply.to_value()),
            _ => return,
        };
        if let Err(e) = reporter.report(&self.registry, tool, &result).await {
            warn!(tool = %tool, "Execution report failed: {}", e);
        }
    }
}

/// Merge the auth token into the parameters according to the tool's mode and
/// check required parameters.
fn prepare_params(
    tool: &RegisteredTool,
    mut params: Map<String, Value>,
    auth_token: Option<&str>,
) -> Result<Map<String, Value>, AtpError> {
    let token = auth_token.filter(|token| !token.is_empty());
    params.remove(AUTH_TOKEN_PARAM);

    match (tool.auth_token_mode, token) {
        (AuthTokenMode::Require, None) => {
            return Err(AtpError::MissingAuthToken(tool.name.clone()));
        }
        (AuthTokenMode::Accept | AuthTokenMode::Require, Some(token)) => {
            params.insert(AUTH_TOKEN_PARAM.to_string(), Value::String(token.to_string()));
        }
        _ => {}
    }

    let missing = tool.missing_required(&params);
    if !missing.is_empty() {
        return Err(AtpError::invalid_arguments(
            &tool.name,
            format!("missing required parameters: {}", missing.join(", ")),
        ));
    }
    Ok(params)
}

#[async_trait]
impl InboundHandler for DispatchEngine {
    async fn handle(&self, message: InboundMessage, replies: ReplyChannel) {
        let outcome = self.dispatch(message).await;
        if let Some(reply) = outcome.reply() {
            if let Err(e) = replies.send(reply).await {
                warn!(request_id = ?reply.request_id(), "Failed to send reply: {}", e);
                return;
            }
        }
        self.report(&outcome).await;
    }

    async fn on_idle_check(&self) {
        self.sessions.evict_idle();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::ToolDefinition;
    use crate::tool::{AppHandler, AppStep, ToolError};
    use pretty_assertions::assert_eq;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    fn engine() -> DispatchEngine {
        DispatchEngine::new(
            Arc::new(ToolRegistry::new()),
            Arc::new(SessionStore::new(Duration::from_secs(60))),
        )
    }

    fn request(tool: &str, params: Value, token: Option<&str>) -> InboundMessage {
        InboundMessage::ToolRequest(ToolRequest {
            request_id: "r1".into(),
            tool_name: tool.into(),
            params: params.as_object().cloned().unwrap_or_default(),
            auth_token: token.map(str::to_owned),
        })
    }

    #[tokio::test]
    async fn test_echo_round_trip() {
        let engine = engine();
        engine
            .registry
            .register(
                ToolDefinition::from_fn("echo", |args: ToolArguments| async move {
                    Ok(json!({ "text": args.require_str("text")? }))
                })
                .params(["text"]),
            )
            .unwrap();

        let outcome = engine.dispatch(request("echo", json!({"text": "hi"}), None)).await;
        let reply = serde_json::to_value(outcome.reply().unwrap()).unwrap();
        assert_eq!(
            reply,
            json!({"type": "tool_response", "request_id": "r1", "result": {"text": "hi"}})
        );
    }

    #[tokio::test]
    async fn test_unknown_tool_is_dropped_without_reply() {
        let outcome = engine().dispatch(request("ghost", json!({}), None)).await;
        assert!(outcome.reply().is_none());
        assert!(matches!(outcome, DispatchOutcome::Dropped(AtpError::ToolNotFound(ref name)) if name == "ghost"));
    }

    #[tokio::test]
    async fn test_required_token_missing_skips_invocation() {
        let engine = engine();
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        engine
            .registry
            .register(
                ToolDefinition::from_fn("inbox", move |_args: ToolArguments| {
                    let counter = counter.clone();
                    async move {
                        counter.fetch_add(1, Ordering::SeqCst);
                        Ok(Value::Null)
                    }
                })
                .requires_auth_token(),
            )
            .unwrap();

        let outcome = engine.dispatch(request("inbox", json!({}), None)).await;
        assert!(matches!(outcome, DispatchOutcome::Failed { error: AtpError::MissingAuthToken(_), .. }));
        assert_eq!(
            outcome.reply().unwrap(),
            &OutboundMessage::ToolResponse {
                request_id: "r1".into(),
                reply: ToolReply::failure("Tool 'inbox' requires an auth token"),
            }
        );
        assert_eq!(calls.load(Ordering::SeqCst), 0);

        let outcome = engine.dispatch(request("inbox", json!({}), Some("tok"))).await;
        assert!(matches!(outcome, DispatchOutcome::Completed { .. }));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_token_injection_follows_mode() {
        let engine = engine();
        let seen = |args: ToolArguments| async move { Ok::<Value, ToolError>(json!(args.auth_token())) };
        engine
            .registry
            .register(ToolDefinition::from_fn("accepts", seen).accepts_auth_token())
            .unwrap();
        engine
            .registry
            .register(ToolDefinition::from_fn("ignores", seen))
            .unwrap();

        let accepted = engine.dispatch(request("accepts", json!({}), Some("tok"))).await;
        assert_eq!(
            accepted.reply().unwrap(),
            &OutboundMessage::ToolResponse {
                request_id: "r1".into(),
                reply: ToolReply::success(json!("tok")),
            }
        );

        let smuggled = engine
            .dispatch(request("ignores", json!({"auth_token": "forged"}), Some("tok")))
            .await;
        assert_eq!(
            smuggled.reply().unwrap(),
            &OutboundMessage::ToolResponse {
                request_id: "r1".into(),
                reply: ToolReply::success(Value::Null),
            }
        );
    }

    #[tokio::test]
    async fn test_tool_errors_and_panics_become_error_replies() {
        let engine = engine();
        engine
            .registry
            .register(ToolDefinition::from_fn("fails", |_args: ToolArguments| async {
                Err(ToolError::new("quota exceeded"))
            }))
            .unwrap();
        engine
            .registry
            .register(ToolDefinition::from_fn("panics", |args: ToolArguments| async move {
                let n = args.get("n").and_then(Value::as_u64).unwrap_or(0);
                Ok(json!(10 / n))
            }))
            .unwrap();

        let outcome = engine.dispatch(request("fails", json!({}), None)).await;
        assert_eq!(
            outcome.reply().unwrap(),
            &OutboundMessage::ToolResponse {
                request_id: "r1".into(),
                reply: ToolReply::failure("quota exceeded"),
            }
        );

        let outcome = engine.dispatch(request("panics", json!({"n": 0}), None)).await;
        assert!(matches!(outcome, DispatchOutcome::Failed { error: AtpError::ToolExecution { .. }, .. }));
        assert_eq!(
            outcome.reply().unwrap(),
            &OutboundMessage::ToolResponse {
                request_id: "r1".into(),
                reply: ToolReply::failure("tool panicked"),
            }
        );
    }

    #[tokio::test]
    async fn test_missing_required_param() {
        let engine = engine();
        engine
            .registry
            .register(
                ToolDefinition::from_fn("search", |_args: ToolArguments| async { Ok(Value::Null) })
                    .params(["query", "limit"])
                    .required(["query"]),
            )
            .unwrap();

        let outcome = engine.dispatch(request("search", json!({"limit": 3}), None)).await;
        assert!(matches!(outcome, DispatchOutcome::Failed { error: AtpError::InvalidArguments { .. }, .. }));
    }

    struct Wizard;

    #[async_trait]
    impl AppHandler for Wizard {
        async fn start(&self, args: ToolArguments) -> Result<AppStep, ToolError> {
            Ok(AppStep::render(
                json!({"step": 1, "name": args.get("name")}),
                json!({"screen": "step-1"}),
            ))
        }

        async fn act(&self, state: Value, action: Value, _args: ToolArguments) -> Result<AppStep, ToolError> {
            let step = state["step"].as_i64().unwrap_or(0);
            if action == json!("finish") {
                return Ok(AppStep::finish(state, json!({"screen": "done"})));
            }
            Ok(AppStep::render(
                json!({"step": step + 1, "name": state["name"]}),
                json!({"screen": format!("step-{}", step + 1)}),
            ))
        }
    }

    #[tokio::test]
    async fn test_session_lifecycle() {
        let engine = engine();
        engine
            .registry
            .register(ToolDefinition::app("wizard", Wizard).params(["name"]))
            .unwrap();

        let start = InboundMessage::AppStart(AppStart {
            request_id: "s1".into(),
            tool_name: "wizard".into(),
            params: json!({"name": "ada"}).as_object().cloned().unwrap(),
            auth_token: None,
        });
        let outcome = engine.dispatch(start).await;
        assert_eq!(
            outcome.reply().unwrap(),
            &OutboundMessage::AppResponse {
                request_id: "s1".into(),
                session_id: "s1".into(),
                reply: ToolReply::success(json!({"screen": "step-1"})),
                terminated: false,
            }
        );

        let action = |value: Value| {
            InboundMessage::AppAction(AppAction {
                session_id: "s1".into(),
                request_id: Some("a1".into()),
                action: value,
                state: None,
            })
        };
        let outcome = engine.dispatch(action(json!("next"))).await;
        assert_eq!(
            engine.sessions.state_of("s1").await,
            Some(json!({"step": 2, "name": "ada"}))
        );
        assert_eq!(outcome.reply().unwrap().request_id(), Some("a1"));

        let outcome = engine.dispatch(action(json!("finish"))).await;
        assert!(matches!(
            outcome.reply(),
            Some(OutboundMessage::AppResponse { terminated: true, .. })
        ));
        assert!(!engine.sessions.contains("s1"));

        let outcome = engine.dispatch(action(json!("next"))).await;
        assert!(matches!(outcome, DispatchOutcome::Dropped(AtpError::SessionNotFound(_))));
        assert!(outcome.reply().is_none());
    }

    #[tokio::test]
    async fn test_external_terminate() {
        let engine = engine();
        engine.registry.register(ToolDefinition::app("wizard", Wizard)).unwrap();
        engine
            .dispatch(InboundMessage::AppStart(AppStart {
                request_id: "s2".into(),
                tool_name: "wizard".into(),
                params: Map::new(),
                auth_token: None,
            }))
            .await;

        let terminate = || {
            InboundMessage::AppTerminate(AppTerminate {
                session_id: "s2".into(),
            })
        };
        assert!(matches!(engine.dispatch(terminate()).await, DispatchOutcome::Terminated(ref id) if id == "s2"));
        assert!(matches!(engine.dispatch(terminate()).await, DispatchOutcome::Dropped(_)));
    }

    #[tokio::test]
    async fn test_app_tool_through_standard_path_gets_error() {
        let engine = engine();
        engine.registry.register(ToolDefinition::app("wizard", Wizard)).unwrap();
        let outcome = engine.dispatch(request("wizard", json!({}), None)).await;
        assert!(matches!(outcome, DispatchOutcome::Failed { .. }));
        assert!(!engine.sessions.contains("r1"));
    }
}
