//! ATP wire protocol envelopes.
//!
//! Inbound traffic uses two tagging conventions. Toolkit traffic carries a
//! `message_type` tag and nests its body under `payload`:
//!
//! ```json
//! {"message_type": "atp_tool_request",
//!  "payload": {"request_id": "r1", "tool_name": "echo", "params": {"text": "hi"}}}
//! ```
//!
//! Caller traffic carries a flat `type` tag, with response bodies under `payload`:
//!
//! ```json
//! {"type": "task_response", "request_id": "task_kit_0_…", "payload": {"ok": true}}
//! ```
//!
//! Polling inbox items may omit the tag entirely; an untagged object carrying
//! `tool_name` is treated as a standard tool invocation.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{TransportError, TransportResult};

/// Inbound message tags.
pub mod tags {
    /// Server acknowledged the toolkit connection.
    pub const CLIENT_CONNECTED: &str = "atp_client_connected";
    /// Standard tool invocation.
    pub const TOOL_REQUEST: &str = "atp_tool_request";
    /// First round of an interactive app session.
    pub const APP_START: &str = "atp_app_start";
    /// Subsequent action against an interactive app session.
    pub const APP_ACTION: &str = "atp_app_action";
    /// External termination of an interactive app session.
    pub const APP_TERMINATE: &str = "atp_app_terminate";
    /// Result of the `auth` handshake.
    pub const AUTH_RESPONSE: &str = "auth_response";
    /// Reply to a `get_toolkit_context` request.
    pub const TOOLKIT_CONTEXT: &str = "toolkit_context";
    /// Reply to a `task_request`.
    pub const TASK_RESPONSE: &str = "task_response";
}

/// A standard tool invocation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolRequest {
    /// Correlates the reply with the invocation.
    pub request_id: String,
    /// Registered tool name.
    pub tool_name: String,
    /// Caller-supplied arguments.
    #[serde(default)]
    pub params: Map<String, Value>,
    /// Optional opaque auth token for the tool.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auth_token: Option<String>,
}

/// The first invocation of an interactive app tool.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AppStart {
    /// Becomes the session id.
    pub request_id: String,
    /// Registered app tool name.
    pub tool_name: String,
    /// Arguments for the initial render.
    #[serde(default)]
    pub params: Map<String, Value>,
    /// Token valid for the lifetime of the session.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auth_token: Option<String>,
}

/// A follow-up action against an existing session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AppAction {
    /// Session being acted on.
    pub session_id: String,
    /// Correlates the reply; defaults to the session id when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,
    /// Action payload produced by the rendered app.
    #[serde(default)]
    pub action: Value,
    /// Application state as the server last saw it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state: Option<Value>,
}

impl AppAction {
    /// Request id to reply under.
    pub fn reply_id(&self) -> &str {
        self.request_id.as_deref().unwrap_or(&self.session_id)
    }
}

/// External termination of a session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AppTerminate {
    /// Session to remove.
    pub session_id: String,
}

/// Outcome of the `auth` handshake.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuthResponse {
    /// Whether the server accepted the credentials.
    pub success: bool,
    /// Rejection reason, when not successful.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Response-type tags that resolve a pending outbound request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResponseKind {
    /// Reply to `get_toolkit_context`.
    ToolkitContext,
    /// Reply to `task_request`.
    TaskResponse,
}

impl ResponseKind {
    fn from_tag(tag: &str) -> Option<Self> {
        match tag {
            tags::TOOLKIT_CONTEXT => Some(Self::ToolkitContext),
            tags::TASK_RESPONSE => Some(Self::TaskResponse),
            _ => None,
        }
    }
}

/// A parsed inbound protocol message.
#[derive(Debug, Clone, PartialEq)]
pub enum InboundMessage {
    /// Server acknowledged the toolkit connection.
    ClientConnected {
        /// Greeting text sent by the server.
        message: Option<String>,
    },
    /// Standard tool invocation.
    ToolRequest(ToolRequest),
    /// Interactive session start.
    AppStart(AppStart),
    /// Interactive session action.
    AppAction(AppAction),
    /// Interactive session terminate.
    AppTerminate(AppTerminate),
    /// Handshake result.
    AuthResponse(AuthResponse),
    /// Reply to an outbound correlated request.
    Response {
        /// Which response tag was carried.
        kind: ResponseKind,
        /// Id of the originating request.
        request_id: String,
        /// Response body.
        payload: Value,
    },
    /// A well-formed message with a tag this client does not handle.
    Unknown(String),
}

impl InboundMessage {
    /// Parse a text frame.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::ProtocolError`] if the frame is not a JSON object,
    /// carries no tag, or its body does not match the tag.
    pub fn parse(text: &str) -> TransportResult<Self> {
        let value: Value = serde_json::from_str(text)
            .map_err(|e| TransportError::ProtocolError(format!("invalid JSON frame: {e}")))?;
        Self::from_value(value)
    }

    /// Parse an already-decoded JSON value.
    ///
    /// # Errors
    ///
    /// See [`InboundMessage::parse`].
    pub fn from_value(value: Value) -> TransportResult<Self> {
        let Value::Object(mut object) = value else {
            return Err(TransportError::ProtocolError(
                "expected a JSON object".to_string(),
            ));
        };

        let tag = object
            .get("message_type")
            .or_else(|| object.get("type"))
            .and_then(Value::as_str)
            .map(str::to_owned);
        let tag = match tag {
            Some(tag) => tag,
            None if object.contains_key("tool_name") => tags::TOOL_REQUEST.to_string(),
            None => {
                return Err(TransportError::ProtocolError(
                    "message carries no type tag".to_string(),
                ));
            }
        };

        if let Some(kind) = ResponseKind::from_tag(&tag) {
            let request_id = object
                .get("request_id")
                .and_then(Value::as_str)
                .map(str::to_owned)
                .ok_or_else(|| {
                    TransportError::ProtocolError(format!("{tag} message carries no request_id"))
                })?;
            let payload = object.remove("payload").unwrap_or(Value::Null);
            return Ok(Self::Response {
                kind,
                request_id,
                payload,
            });
        }

        let body = match object.remove("payload") {
            Some(Value::Object(payload)) => payload,
            Some(other) => {
                object.insert("payload".to_string(), other);
                object
            }
            None => object,
        };

        let message = match tag.as_str() {
            tags::CLIENT_CONNECTED => Self::ClientConnected {
                message: body
                    .get("message")
                    .and_then(Value::as_str)
                    .map(str::to_owned),
            },
            tags::TOOL_REQUEST => Self::ToolRequest(decode(&tag, body)?),
            tags::APP_START => Self::AppStart(decode(&tag, body)?),
            tags::APP_ACTION => Self::AppAction(decode(&tag, body)?),
            tags::APP_TERMINATE => Self::AppTerminate(decode(&tag, body)?),
            tags::AUTH_RESPONSE => Self::AuthResponse(decode(&tag, body)?),
            _ => Self::Unknown(tag),
        };
        Ok(message)
    }

    /// The tag this message was parsed from.
    pub fn tag(&self) -> &str {
        match self {
            Self::ClientConnected { .. } => tags::CLIENT_CONNECTED,
            Self::ToolRequest(_) => tags::TOOL_REQUEST,
            Self::AppStart(_) => tags::APP_START,
            Self::AppAction(_) => tags::APP_ACTION,
            Self::AppTerminate(_) => tags::APP_TERMINATE,
            Self::AuthResponse(_) => tags::AUTH_RESPONSE,
            Self::Response {
                kind: ResponseKind::ToolkitContext,
                ..
            } => tags::TOOLKIT_CONTEXT,
            Self::Response {
                kind: ResponseKind::TaskResponse,
                ..
            } => tags::TASK_RESPONSE,
            Self::Unknown(tag) => tag,
        }
    }
}

fn decode<T: serde::de::DeserializeOwned>(tag: &str, body: Map<String, Value>) -> TransportResult<T> {
    serde_json::from_value(Value::Object(body))
        .map_err(|e| TransportError::ProtocolError(format!("malformed {tag} message: {e}")))
}

/// The outcome of a tool invocation, sent under the reply's `result` key.
///
/// On the wire a success is the tool's value as-is and a failure is
/// `{"error": "…"}`. A tool value that is exactly `{"error": <string>}` reads
/// back as a failure.
#[derive(Debug, Clone, PartialEq)]
pub enum ToolReply {
    /// The tool completed.
    Success {
        /// Value returned by the tool.
        result: Value,
    },
    /// The tool failed or could not be invoked.
    Failure {
        /// Human-readable failure description.
        error: String,
    },
}

impl ToolReply {
    /// Successful reply.
    pub fn success(result: Value) -> Self {
        Self::Success { result }
    }

    /// Error reply.
    pub fn failure(error: impl Into<String>) -> Self {
        Self::Failure {
            error: error.into(),
        }
    }

    /// Whether this reply reports an error.
    pub fn is_error(&self) -> bool {
        matches!(self, Self::Failure { .. })
    }

    /// The wire `result` value: the tool's value, or `{"error": …}`.
    pub fn to_value(&self) -> Value {
        match self {
            Self::Success { result } => result.clone(),
            Self::Failure { error } => serde_json::json!({ "error": error }),
        }
    }

    /// Read a wire `result` value back.
    pub fn from_value(value: Value) -> Self {
        if let Value::Object(fields) = &value
            && fields.len() == 1
            && let Some(Value::String(error)) = fields.get("error")
        {
            return Self::failure(error.clone());
        }
        Self::Success { result: value }
    }
}

#[derive(Serialize)]
struct ErrorBody<'a> {
    error: &'a str,
}

impl Serialize for ToolReply {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Self::Success { result } => result.serialize(serializer),
            Self::Failure { error } => ErrorBody { error }.serialize(serializer),
        }
    }
}

impl<'de> Deserialize<'de> for ToolReply {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        Value::deserialize(deserializer).map(Self::from_value)
    }
}

/// Messages sent by the client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OutboundMessage {
    /// Handshake credentials.
    Auth {
        /// Client API key.
        api_key: String,
    },
    /// Reply to a standard tool invocation.
    ToolResponse {
        /// Id of the invocation being answered.
        request_id: String,
        /// Result or error.
        #[serde(rename = "result")]
        reply: ToolReply,
    },
    /// Reply to an interactive session round.
    AppResponse {
        /// Id of the round being answered.
        request_id: String,
        /// Session the round belongs to.
        session_id: String,
        /// Render payload or error.
        #[serde(rename = "result")]
        reply: ToolReply,
        /// Whether the session ended with this round.
        terminated: bool,
    },
    /// Request the provider-shaped tool context of a toolkit.
    GetToolkitContext {
        /// Correlation id.
        request_id: String,
        /// Target toolkit.
        toolkit_id: String,
        /// Provider schema to render the context in.
        provider: String,
        /// Prompt used to select relevant tools.
        user_prompt: String,
    },
    /// Execute one normalized tool call on a remote toolkit.
    TaskRequest {
        /// Correlation id.
        request_id: String,
        /// Target toolkit.
        toolkit_id: String,
        /// The normalized tool call.
        payload: Value,
        /// Provider the call originated from.
        provider: String,
        /// Optional auth token forwarded to the tool.
        auth_token: Option<String>,
        /// Optional prompt context.
        user_prompt: Option<String>,
    },
}

impl OutboundMessage {
    /// Correlation or reply id carried by the message, if any.
    pub fn request_id(&self) -> Option<&str> {
        match self {
            Self::Auth { .. } => None,
            Self::ToolResponse { request_id, .. }
            | Self::AppResponse { request_id, .. }
            | Self::GetToolkitContext { request_id, .. }
            | Self::TaskRequest { request_id, .. } => Some(request_id),
        }
    }

    /// Whether this message answers an inbound invocation.
    pub fn is_reply(&self) -> bool {
        matches!(self, Self::ToolResponse { .. } | Self::AppResponse { .. })
    }

    /// Serialize to a text frame.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::SerializationFailed`] if a payload cannot be encoded.
    pub fn to_json(&self) -> TransportResult<String> {
        Ok(serde_json::to_string(self)?)
    }
}
